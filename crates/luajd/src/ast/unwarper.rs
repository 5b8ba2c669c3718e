// Control-flow reconstruction: reduces the block-and-warps graph to nested
// structured statements.
//
// The reducer repeatedly rewrites the innermost reducible region, bottom-up:
// straight-line chains merge, loop regions collapse into for/while/repeat
// statements (their bodies reduced recursively with break edges turned into
// Break statements first), and the highest-positioned conditional warp folds
// into an if/else or an and/or assignment. Every reduction removes at least
// one block, which bounds the iteration count by the block count.
//
// Region-external edges are rewritten to two sentinels before a region is
// reduced recursively: EXIT ("fall off the end of this region") and
// BREAK_TARGET ("leave the innermost loop").

use crate::ast::builder::invert_condition;
use crate::ast::nodes::*;
use crate::ast::slotworks::for_each_nested_function;
use crate::error::{DecompileError, DecompileResult};

const EXIT: BlockId = usize::MAX;
const BREAK_TARGET: BlockId = usize::MAX - 1;

fn is_sentinel(id: BlockId) -> bool {
    id == EXIT || id == BREAK_TARGET
}

/// Reduce the function and every nested function to structured statements.
pub fn unwarp(function: &mut FunctionDefinition) -> DecompileResult<()> {
    unwarp_one(function)?;
    let mut failure = None;
    for_each_nested_function(&mut function.statements, &mut |nested| {
        if failure.is_none() {
            if let Err(err) = unwarp_one(nested) {
                failure = Some(err);
            }
        }
    });
    match failure {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

fn unwarp_one(function: &mut FunctionDefinition) -> DecompileResult<()> {
    if function.error.is_some() {
        function.statements.contents.clear();
        return Ok(());
    }
    if function.statements.contents.is_empty() {
        return Ok(());
    }
    if !function
        .statements
        .contents
        .iter()
        .any(|s| matches!(s, Statement::Block(_)))
    {
        // Already structured.
        return Ok(());
    }

    let blocks: Vec<Block> = std::mem::take(&mut function.statements.contents)
        .into_iter()
        .map(|statement| match statement {
            Statement::Block(block) => Ok(block),
            _ => Err(DecompileError::structural(
                "warped body mixes blocks and statements",
            )),
        })
        .collect::<DecompileResult<_>>()?;

    function.statements = reduce_region(blocks)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// The region reducer.

fn reduce_region(mut blocks: Vec<Block>) -> DecompileResult<StatementsList> {
    let limit = blocks.len() * 4 + 16;
    for _ in 0..limit {
        if let Some(statements) = finished(&mut blocks) {
            return Ok(statements);
        }
        if normalize_breaks(&mut blocks) {
            continue;
        }
        if merge_straight_line(&mut blocks) {
            continue;
        }
        if drop_dead_block(&mut blocks) {
            continue;
        }
        if reduce_innermost_loop(&mut blocks)? {
            continue;
        }
        if reduce_innermost_conditional(&mut blocks)? {
            continue;
        }
        return Err(irreducible(&blocks));
    }
    Err(irreducible(&blocks))
}

fn irreducible(blocks: &[Block]) -> DecompileError {
    let first = blocks.first().map(|b| b.index).unwrap_or(0);
    let last = blocks.last().map(|b| b.index).unwrap_or(first);
    DecompileError::IrreducibleCfg {
        first_block: first,
        last_block: last,
    }
}

fn finished(blocks: &mut Vec<Block>) -> Option<StatementsList> {
    if blocks.len() != 1 {
        return None;
    }
    let terminal = match &blocks[0].warp {
        Warp::End => true,
        Warp::Unconditional(w) => w.target == EXIT || w.target == BREAK_TARGET,
        _ => false,
    };
    if !terminal {
        return None;
    }
    let block = blocks.pop().unwrap();
    let mut contents = block.contents;
    if matches!(&block.warp, Warp::Unconditional(w) if w.target == BREAK_TARGET) {
        contents.push(Statement::Break);
    }
    Some(StatementsList { contents })
}

fn pos_of(blocks: &[Block], id: BlockId) -> Option<usize> {
    if is_sentinel(id) {
        return None;
    }
    blocks.iter().position(|b| b.index == id)
}

fn preds(blocks: &[Block], id: BlockId) -> usize {
    blocks
        .iter()
        .flat_map(|b| b.warp.targets())
        .filter(|&t| t == id)
        .count()
}

/// Every edge from outside positions `lo..=hi` into the region must satisfy
/// `allow(source_position, target_id)`; a region entered mid-body cannot be
/// reduced and signals irreducible control flow.
fn region_closed(
    blocks: &[Block],
    lo: usize,
    hi: usize,
    allow: impl Fn(usize, BlockId) -> bool,
) -> bool {
    for (position, block) in blocks.iter().enumerate() {
        if (lo..=hi).contains(&position) {
            continue;
        }
        for target in block.warp.targets() {
            if let Some(target_position) = pos_of(blocks, target) {
                if (lo..=hi).contains(&target_position) && !allow(position, target) {
                    return false;
                }
            }
        }
    }
    true
}

/// Rewrite every warp target equal to `from` into `to`.
fn rewrite_targets(blocks: &mut [Block], from: BlockId, to: BlockId) {
    for block in blocks {
        match &mut block.warp {
            Warp::Unconditional(w) => {
                if w.target == from {
                    w.target = to;
                }
            }
            Warp::Conditional(w) => {
                if w.true_target == from {
                    w.true_target = to;
                }
                if w.false_target == from {
                    w.false_target = to;
                }
            }
            Warp::Iterator(w) => {
                if w.body == from {
                    w.body = to;
                }
                if w.way_out == from {
                    w.way_out = to;
                }
            }
            Warp::NumericLoop(w) => {
                if w.body == from {
                    w.body = to;
                }
                if w.way_out == from {
                    w.way_out = to;
                }
            }
            Warp::End => {}
        }
    }
}

/// An unconditional edge to the break sentinel becomes a Break statement.
fn normalize_breaks(blocks: &mut [Block]) -> bool {
    for block in blocks.iter_mut() {
        if matches!(&block.warp, Warp::Unconditional(w) if w.target == BREAK_TARGET) {
            block.contents.push(Statement::Break);
            block.warp = Warp::End;
            return true;
        }
    }
    false
}

/// Merge `A -> B` when B directly follows A and has no other predecessor.
fn merge_straight_line(blocks: &mut Vec<Block>) -> bool {
    for position in 0..blocks.len().saturating_sub(1) {
        let target = match &blocks[position].warp {
            Warp::Unconditional(w) => w.target,
            _ => continue,
        };
        if target != blocks[position + 1].index || preds(blocks, target) != 1 {
            continue;
        }
        let follower = blocks.remove(position + 1);
        let block = &mut blocks[position];
        block.contents.extend(follower.contents);
        block.last_address = follower.last_address;
        block.warp = follower.warp;
        return true;
    }
    false
}

/// Unreachable blocks (no predecessors, not the region entry) are dropped.
fn drop_dead_block(blocks: &mut Vec<Block>) -> bool {
    for position in 1..blocks.len() {
        if preds(blocks, blocks[position].index) == 0 {
            blocks.remove(position);
            return true;
        }
    }
    false
}

// ---------------------------------------------------------------------------
// Loops.

struct LoopCandidate {
    /// Position where the loop's region starts.
    start: usize,
    kind: LoopKind,
}

enum LoopKind {
    /// FORI header at this position.
    Numeric(usize),
    /// ITERL block at this position.
    Iterator(usize),
    /// Generic back edge: header position, back-edge position.
    Generic(usize, usize),
}

fn reduce_innermost_loop(blocks: &mut Vec<Block>) -> DecompileResult<bool> {
    let mut candidates: Vec<LoopCandidate> = Vec::new();

    for (position, block) in blocks.iter().enumerate() {
        match &block.warp {
            Warp::NumericLoop(w) => {
                if pos_of(blocks, w.body) == Some(position + 1) {
                    candidates.push(LoopCandidate {
                        start: position + 1,
                        kind: LoopKind::Numeric(position),
                    });
                }
            }
            Warp::Iterator(w) => {
                if let Some(body) = pos_of(blocks, w.body) {
                    if body <= position {
                        candidates.push(LoopCandidate {
                            start: body,
                            kind: LoopKind::Iterator(position),
                        });
                    }
                }
            }
            Warp::Unconditional(w) => {
                if let Some(header) = pos_of(blocks, w.target) {
                    if header <= position {
                        candidates.push(LoopCandidate {
                            start: header,
                            kind: LoopKind::Generic(header, position),
                        });
                    }
                }
            }
            Warp::Conditional(w) => {
                for target in [w.true_target, w.false_target] {
                    if let Some(header) = pos_of(blocks, target) {
                        if header <= position {
                            candidates.push(LoopCandidate {
                                start: header,
                                kind: LoopKind::Generic(header, position),
                            });
                        }
                    }
                }
            }
            _ => {}
        }
    }
    let Some(candidate) = candidates.into_iter().max_by_key(|c| {
        // Innermost region first; for equal starts prefer the shortest.
        let end = match c.kind {
            LoopKind::Numeric(p) | LoopKind::Iterator(p) => p,
            LoopKind::Generic(_, l) => l,
        };
        (c.start, usize::MAX - end)
    }) else {
        return Ok(false);
    };

    match candidate.kind {
        LoopKind::Numeric(header) => reduce_numeric_for(blocks, header)?,
        LoopKind::Iterator(position) => reduce_iterator_for(blocks, position)?,
        LoopKind::Generic(header, backedge) => reduce_generic_loop(blocks, header, backedge)?,
    }
    Ok(true)
}

fn reduce_numeric_for(blocks: &mut Vec<Block>, header: usize) -> DecompileResult<()> {
    let Warp::NumericLoop(warp) = blocks[header].warp.clone() else {
        unreachable!();
    };
    let body_id = warp.body;
    let end = match pos_of(blocks, warp.way_out) {
        Some(way_out) if way_out > header => way_out - 1,
        Some(_) => return Err(irreducible(blocks)),
        None => blocks.len() - 1,
    };
    if end <= header {
        return Err(irreducible(blocks));
    }
    if !region_closed(blocks, header + 1, end, |source, _| source == header) {
        return Err(irreducible(blocks));
    }

    let mut region: Vec<Block> = blocks.drain(header + 1..=end).collect();
    rewrite_targets(&mut region, body_id, EXIT);
    rewrite_targets(&mut region, warp.way_out, BREAK_TARGET);
    let statements = reduce_region(region)?;

    let block = &mut blocks[header];
    block.contents.push(Statement::NumericFor(NumericFor {
        variable: warp.index,
        expressions: warp.controls,
        statements,
    }));
    block.warp = Warp::flow(warp.way_out);
    Ok(())
}

fn reduce_iterator_for(blocks: &mut Vec<Block>, position: usize) -> DecompileResult<()> {
    let Warp::Iterator(warp) = blocks[position].warp.clone() else {
        unreachable!();
    };
    let iterator_id = blocks[position].index;
    let Some(body) = pos_of(blocks, warp.body) else {
        return Err(irreducible(blocks));
    };
    if body == 0 {
        return Err(irreducible(blocks));
    }
    // The block before the body jumps over it into the iterator call.
    let setup = body - 1;
    if !matches!(&blocks[setup].warp, Warp::Unconditional(w) if w.target == iterator_id) {
        return Err(irreducible(blocks));
    }
    if !region_closed(blocks, body, position, |source, target| {
        source == setup && target == iterator_id
    }) {
        return Err(irreducible(blocks));
    }

    let mut region: Vec<Block> = blocks.drain(body..=position).collect();
    // The drained slice ends with the ITERL block itself; its contents (if
    // any) belong before the loop's next iteration, i.e. at region end.
    rewrite_targets(&mut region, iterator_id, EXIT);
    rewrite_targets(&mut region, warp.way_out, BREAK_TARGET);
    if let Some(last) = region.last_mut() {
        if matches!(last.warp, Warp::Iterator(_)) {
            last.warp = Warp::flow(EXIT);
        }
    }
    let statements = reduce_region(region)?;

    let block = &mut blocks[setup];
    block.contents.push(Statement::IteratorFor(IteratorFor {
        identifiers: warp.variables,
        expressions: warp.controls,
        statements,
    }));
    block.warp = Warp::flow(warp.way_out);
    Ok(())
}

fn reduce_generic_loop(
    blocks: &mut Vec<Block>,
    header: usize,
    backedge: usize,
) -> DecompileResult<()> {
    let header_id = blocks[header].index;

    // While: the header's conditional has exactly one edge leaving the
    // region, and the header itself carries no statements to re-run.
    if let Warp::Conditional(w) = &blocks[header].warp {
        let exit_true = pos_of(blocks, w.true_target).map_or(true, |p| p > backedge);
        let exit_false = pos_of(blocks, w.false_target).map_or(true, |p| p > backedge);
        if blocks[header].contents.is_empty()
            && exit_true != exit_false
            && header < backedge
            && region_closed(blocks, header + 1, backedge, |source, _| source == header)
        {
            let (exit_id, condition) = if exit_true {
                // True leaves the loop, so the loop runs while the
                // condition is false.
                (w.true_target, invert_condition(w.condition.clone()))
            } else {
                (w.false_target, w.condition.clone())
            };
            let mut region: Vec<Block> = blocks.drain(header + 1..=backedge).collect();
            rewrite_targets(&mut region, header_id, EXIT);
            rewrite_targets(&mut region, exit_id, BREAK_TARGET);
            let statements = reduce_region(region)?;

            let block = &mut blocks[header];
            block.contents.push(Statement::While(While {
                condition,
                statements,
            }));
            block.warp = Warp::flow(exit_id);
            return Ok(());
        }
    }

    // Repeat-until: the back-edge block ends in a conditional whose backward
    // target re-enters the loop.
    if let Warp::Conditional(w) = &blocks[backedge].warp {
        if (w.true_target == header_id || w.false_target == header_id)
            && region_closed(blocks, header, backedge, |_, target| target == header_id)
        {
            let (condition, exit_id) = if w.true_target == header_id {
                // True re-enters, so the loop exits when it fails.
                (invert_condition(w.condition.clone()), w.false_target)
            } else {
                (w.condition.clone(), w.true_target)
            };
            let first_address = blocks[header].first_address;
            let last_address = blocks[backedge].last_address;
            let mut region: Vec<Block> = blocks.drain(header..=backedge).collect();
            if let Some(last) = region.last_mut() {
                last.warp = Warp::flow(EXIT);
            }
            rewrite_targets(&mut region, exit_id, BREAK_TARGET);
            let statements = reduce_region(region)?;

            let replacement = Block {
                index: header_id,
                first_address,
                last_address,
                contents: vec![Statement::RepeatUntil(RepeatUntil {
                    condition,
                    statements,
                })],
                warp: Warp::flow(exit_id),
                warpins_count: 0,
            };
            blocks.insert(header, replacement);
            return Ok(());
        }
    }

    // Everything else is an unconditional loop; breaks target the block
    // right after the back edge.
    if !region_closed(blocks, header, backedge, |_, target| target == header_id) {
        return Err(irreducible(blocks));
    }
    let exit_id = blocks.get(backedge + 1).map(|b| b.index).unwrap_or(EXIT);
    let first_address = blocks[header].first_address;
    let last_address = blocks[backedge].last_address;
    let mut region: Vec<Block> = blocks.drain(header..=backedge).collect();
    rewrite_targets(&mut region, header_id, EXIT);
    if !is_sentinel(exit_id) {
        rewrite_targets(&mut region, exit_id, BREAK_TARGET);
    }
    let statements = reduce_region(region)?;

    let replacement = Block {
        index: header_id,
        first_address,
        last_address,
        contents: vec![Statement::While(While {
            condition: Expression::Primitive(Primitive::True),
            statements,
        })],
        warp: if is_sentinel(exit_id) {
            Warp::flow(EXIT)
        } else {
            Warp::flow(exit_id)
        },
        warpins_count: 0,
    };
    blocks.insert(header, replacement);
    Ok(())
}

// ---------------------------------------------------------------------------
// Conditionals.

fn reduce_innermost_conditional(blocks: &mut Vec<Block>) -> DecompileResult<bool> {
    let Some(position) = blocks
        .iter()
        .rposition(|b| matches!(b.warp, Warp::Conditional(_)))
    else {
        return Ok(false);
    };
    let Warp::Conditional(warp) = blocks[position].warp.clone() else {
        unreachable!();
    };

    // Degenerate diamond: both edges reach the same place.
    if warp.true_target == warp.false_target {
        blocks[position].warp = Warp::flow(warp.true_target);
        return Ok(true);
    }

    if let Some(target) = pos_of(blocks, warp.true_target) {
        if target <= position {
            // A backward conditional is a loop, handled elsewhere.
            return Err(irreducible(blocks));
        }
    }

    // The false edge is the fall-through; when the header is the last block
    // of its region the fall-through is the region exit itself.
    let fallthrough_ok = match pos_of(blocks, warp.false_target) {
        Some(p) => p == position + 1,
        None => position + 1 == blocks.len() && warp.false_target == EXIT,
    };
    if !fallthrough_ok {
        return Err(irreducible(blocks));
    }

    if try_fold_and_or(blocks, position, &warp) {
        return Ok(true);
    }

    // `if C then break end`
    if warp.true_target == BREAK_TARGET {
        let follow = warp.false_target;
        let block = &mut blocks[position];
        block.contents.push(Statement::If(If {
            condition: warp.condition,
            then_block: StatementsList {
                contents: vec![Statement::Break],
            },
            elseifs: Vec::new(),
            else_block: StatementsList::default(),
        }));
        block.warp = Warp::flow(follow);
        return Ok(true);
    }

    // The then branch is the fall-through region, entered when the
    // condition fails; find where it ends.
    let then_start = position + 1;
    let then_end = match pos_of(blocks, warp.true_target) {
        Some(p) => p,          // exclusive
        None => blocks.len(),  // EXIT: everything to the region end
    };
    if then_start >= then_end && then_end != blocks.len() {
        // Empty then branch: nothing to structure.
        blocks[position].warp = Warp::flow(warp.false_target);
        return Ok(true);
    }
    if then_start >= blocks.len() {
        // Conditional at the very end with an EXIT fall-through.
        let block = &mut blocks[position];
        block.contents.push(Statement::If(If {
            condition: invert_condition(warp.condition),
            then_block: StatementsList::default(),
            elseifs: Vec::new(),
            else_block: StatementsList::default(),
        }));
        block.warp = Warp::flow(EXIT);
        return Ok(true);
    }

    // Decide between if-then and if-then-else by the then branch's last exit.
    let last = &blocks[then_end - 1];
    let else_info = match &last.warp {
        Warp::Unconditional(w) if w.target == warp.true_target => None,
        Warp::Unconditional(w)
            if w.target == EXIT
                || pos_of(blocks, w.target).map_or(false, |p| p > then_end) =>
        {
            Some(w.target)
        }
        Warp::End if pos_of(blocks, warp.true_target).is_some()
            && preds(blocks, warp.true_target) == 1 =>
        {
            // The then branch returns or breaks; a sole-predecessor join
            // block is really the else branch.
            Some(EXIT)
        }
        Warp::End => None,
        _ => return Err(irreducible(blocks)),
    };

    if then_start < then_end
        && !region_closed(blocks, then_start, then_end - 1, |source, _| source == position)
    {
        return Err(irreducible(blocks));
    }

    match else_info {
        None => {
            // Plain if-then; the merge point is the true target.
            let region: Vec<Block> = blocks.drain(then_start..then_end).collect();
            let statements = reduce_then_region(region, warp.true_target)?;
            let block = &mut blocks[position];
            block.contents.push(Statement::If(If {
                condition: invert_condition(warp.condition),
                then_block: statements,
                elseifs: Vec::new(),
                else_block: StatementsList::default(),
            }));
            block.warp = Warp::flow(warp.true_target);
            Ok(true)
        }
        Some(merge) => {
            // If-then-else: the else region runs from the true target to
            // the merge point (or the region end when the then branch
            // terminates).
            let else_start = pos_of(blocks, warp.true_target).ok_or_else(|| irreducible(blocks))?;
            let else_end = match merge {
                EXIT => else_run_end(blocks, position, else_start),
                m => pos_of(blocks, m).ok_or_else(|| irreducible(blocks))?,
            };
            if else_end < else_start {
                return Err(irreducible(blocks));
            }
            let else_entry = blocks[else_start].index;
            if else_start < else_end
                && !region_closed(blocks, else_start, else_end - 1, |source, target| {
                    source == position && target == else_entry
                })
            {
                return Err(irreducible(blocks));
            }

            let else_region: Vec<Block> = blocks.drain(else_start..else_end).collect();
            let then_region: Vec<Block> = blocks.drain(then_start..then_end).collect();

            let then_statements = reduce_then_region(then_region, merge)?;
            let else_statements = reduce_then_region(else_region, merge)?;

            let follow_warp = match merge {
                EXIT => {
                    // Both branches leave the region on their own.
                    if then_statements
                        .contents
                        .last()
                        .map_or(false, ends_in_terminator)
                        && else_statements
                            .contents
                            .last()
                            .map_or(false, ends_in_terminator)
                    {
                        Warp::End
                    } else {
                        Warp::flow(EXIT)
                    }
                }
                m => Warp::flow(m),
            };

            let block = &mut blocks[position];
            block.contents.push(Statement::If(If {
                condition: invert_condition(warp.condition),
                then_block: then_statements,
                elseifs: Vec::new(),
                else_block: else_statements,
            }));
            block.warp = follow_warp;
            Ok(true)
        }
    }
}

/// End (exclusive) of an else run that starts at `start`: blocks reachable
/// only from the conditional header or from inside the run itself.
fn else_run_end(blocks: &[Block], header: usize, start: usize) -> usize {
    let mut end = start;
    while end < blocks.len() {
        let id = blocks[end].index;
        let externally_reached = blocks.iter().enumerate().any(|(p, b)| {
            p != header && !(start..end).contains(&p) && b.warp.targets().contains(&id)
        });
        if end > start && externally_reached {
            break;
        }
        end += 1;
        // A terminating block closes the run.
        match &blocks[end - 1].warp {
            Warp::End => break,
            Warp::Unconditional(w) if is_sentinel(w.target) => break,
            _ => {}
        }
    }
    end
}

fn ends_in_terminator(statement: &Statement) -> bool {
    matches!(statement, Statement::Return(_) | Statement::Break)
}

/// Reduce a branch region whose merge point is `merge`.
fn reduce_then_region(mut region: Vec<Block>, merge: BlockId) -> DecompileResult<StatementsList> {
    if region.is_empty() {
        return Ok(StatementsList::default());
    }
    if !is_sentinel(merge) {
        rewrite_targets(&mut region, merge, EXIT);
    }
    reduce_region(region)
}

// ---------------------------------------------------------------------------
// and/or folding.

/// Rewrite short-circuit diamonds into a single assignment of an and/or
/// expression. Preferred over an `If` only when the involved branches are
/// pure assignments to one common destination.
fn try_fold_and_or(blocks: &mut Vec<Block>, position: usize, warp: &ConditionalWarp) -> bool {
    let Some(true_pos) = pos_of(blocks, warp.true_target) else {
        return false;
    };

    // Form A, from ISTC/ISFC: the header's trailing copy plus a single
    // fall-through block assigning the same destination.
    if true_pos == position + 2 {
        let fall = &blocks[position + 1];
        if preds(blocks, fall.index) == 1
            && matches!(&fall.warp, Warp::Unconditional(w) if w.target == warp.true_target)
        {
            if let (Some(head_assign), [Statement::Assignment(fall_assign)]) = (
                last_assignment(&blocks[position].contents),
                fall.contents.as_slice(),
            ) {
                if let (Some(destination), Some(fall_destination)) = (
                    sole_pure_destination(head_assign),
                    sole_pure_destination(fall_assign),
                ) {
                    if same_variable(&destination, &fall_destination)
                        && fall_assign.expressions.contents.len() == 1
                        && head_assign.expressions.contents.len() == 1
                    {
                        let kind = match &warp.condition {
                            Expression::UnaryOp(op) if op.kind == UnOpKind::Not => {
                                BinOpKind::LogicalAnd
                            }
                            _ => BinOpKind::LogicalOr,
                        };
                        let right = fall_assign.expressions.contents[0].clone();
                        let target = warp.true_target;

                        let Some(Statement::Assignment(head)) =
                            blocks[position].contents.last_mut()
                        else {
                            unreachable!();
                        };
                        let left = head.expressions.contents[0].clone();
                        head.expressions.contents[0] = Expression::binary(kind, left, right);
                        blocks[position].warp = Warp::flow(target);
                        blocks.remove(position + 1);
                        return true;
                    }
                }
            }
        }
    }

    // Form B: both branches are single pure assignments to one destination
    // rejoining at a common block.
    if true_pos == position + 2 && position + 3 <= blocks.len() {
        let fall = &blocks[position + 1];
        let jump = &blocks[position + 2];
        let merge = jump
            .warp
            .targets()
            .first()
            .copied()
            .unwrap_or(EXIT);
        let branches_rejoin = matches!(&fall.warp, Warp::Unconditional(w) if w.target == merge)
            && matches!(&jump.warp, Warp::Unconditional(w) if w.target == merge)
            && preds(blocks, fall.index) == 1
            && preds(blocks, jump.index) == 1;
        if branches_rejoin {
            if let ([Statement::Assignment(fall_assign)], [Statement::Assignment(jump_assign)]) =
                (fall.contents.as_slice(), jump.contents.as_slice())
            {
                if let (Some(fall_destination), Some(jump_destination)) = (
                    sole_pure_destination(fall_assign),
                    sole_pure_destination(jump_assign),
                ) {
                    if same_variable(&fall_destination, &jump_destination)
                        && fall_assign.expressions.contents.len() == 1
                        && jump_assign.expressions.contents.len() == 1
                        && is_pure_value(&fall_assign.expressions.contents[0])
                        && is_pure_value(&jump_assign.expressions.contents[0])
                    {
                        // Condition false falls through, true jumps.
                        let false_value = fall_assign.expressions.contents[0].clone();
                        let true_value = jump_assign.expressions.contents[0].clone();
                        let destination = fall_destination.clone();
                        let value = fold_diamond_value(
                            warp.condition.clone(),
                            true_value,
                            false_value,
                        );

                        blocks[position]
                            .contents
                            .push(Statement::Assignment(Assignment::single(destination, value)));
                        blocks[position].warp = Warp::flow(merge);
                        blocks.remove(position + 2);
                        blocks.remove(position + 1);
                        return true;
                    }
                }
            }
        }
    }

    false
}

fn fold_diamond_value(
    condition: Expression,
    true_value: Expression,
    false_value: Expression,
) -> Expression {
    let t = Expression::Primitive(Primitive::True);
    let f = Expression::Primitive(Primitive::False);
    if true_value == t && false_value == f {
        condition
    } else if true_value == f && false_value == t {
        invert_condition(condition)
    } else {
        // On a failed condition the fall-through value wins.
        Expression::binary(
            BinOpKind::LogicalOr,
            Expression::binary(
                BinOpKind::LogicalAnd,
                invert_condition(condition),
                false_value,
            ),
            true_value,
        )
    }
}

fn last_assignment(contents: &[Statement]) -> Option<&Assignment> {
    match contents.last() {
        Some(Statement::Assignment(node)) => Some(node),
        _ => None,
    }
}

/// The single identifier destination of an assignment, if that is all it has.
fn sole_pure_destination(node: &Assignment) -> Option<Expression> {
    match node.destinations.contents.as_slice() {
        [destination @ Expression::Identifier(_)] => Some(destination.clone()),
        _ => None,
    }
}

fn same_variable(a: &Expression, b: &Expression) -> bool {
    match (a, b) {
        (Expression::Identifier(x), Expression::Identifier(y)) => {
            x.kind == y.kind && x.slot == y.slot && x.name == y.name
        }
        _ => false,
    }
}

fn is_pure_value(expr: &Expression) -> bool {
    match expr {
        Expression::Identifier(_) | Expression::Constant(_) | Expression::Primitive(_) => true,
        Expression::BinaryOp(op) => is_pure_value(&op.left) && is_pure_value(&op.right),
        Expression::UnaryOp(op) => is_pure_value(&op.operand),
        _ => false,
    }
}
