// Temporary-slot elimination.
//
// LuaJIT materializes intermediate expressions into numbered slots; this pass
// inverts that by fusing a slot definition with exactly one subsequent use
// into the consuming expression. The work is two-phase per block: find one
// applicable fusion, apply it, repeat until a fixpoint. Deleted definitions
// leave NoOp placeholders so statement indices stay stable during a scan;
// NoOps are swept at the end.
//
// Safety rules:
//   - the definition must write a single unnamed slot and be read exactly
//     once afterwards, with no intervening write to that slot;
//   - statements crossed by the fusion must not write any slot the defining
//     expression reads;
//   - a defining expression with side effects may not cross statements that
//     call, or touch tables, globals or upvalues, and must not move past
//     impure operands evaluated before its use site (reordering pure operand
//     reads is unobservable, which is what operator commutativity permits);
//   - a table-reading definition may not cross calls or table writes;
//   - MULTRES producers and consumers fuse only when strictly adjacent; any
//     ambiguity means "do not fuse".

use ahash::AHashMap;
use ahash::AHashSet;

use crate::ast::nodes::*;

/// Run slot elimination over a warped function and its nested functions.
/// With `identify_slots` set, surviving multi-generation slots get small
/// integer ids so emitted names stay stable and readable.
pub fn eliminate_temporary(function: &mut FunctionDefinition, identify_slots: bool) {
    eliminate_in_function(function, identify_slots);
    // The walker yields nested definitions at every depth, so each function
    // is processed exactly once.
    for_each_nested_function(&mut function.statements, &mut |nested| {
        eliminate_in_function(nested, identify_slots);
    });
}

fn eliminate_in_function(function: &mut FunctionDefinition, identify_slots: bool) {
    for statement in &mut function.statements.contents {
        if let Statement::Block(block) = statement {
            eliminate_in_block(&mut block.contents, &mut block.warp);
        }
    }
    fuse_iterator_controls(&mut function.statements.contents);
    if identify_slots {
        assign_slot_ids(function);
    }
}

/// A second elimination round over the structured tree: unwarping (notably
/// the and/or folding) re-creates single-use temporaries inside statement
/// lists. Each list is treated as one straight line; structured statements
/// act as barriers.
pub fn eliminate_structured(function: &mut FunctionDefinition) {
    eliminate_structured_list(&mut function.statements);
    for_each_nested_function(&mut function.statements, &mut |nested| {
        eliminate_structured_list(&mut nested.statements);
    });
}

fn eliminate_structured_list(list: &mut StatementsList) {
    let mut no_warp = Warp::End;
    eliminate_in_block(&mut list.contents, &mut no_warp);
    for statement in &mut list.contents {
        match statement {
            Statement::If(node) => {
                eliminate_structured_list(&mut node.then_block);
                for elseif in &mut node.elseifs {
                    eliminate_structured_list(&mut elseif.then_block);
                }
                eliminate_structured_list(&mut node.else_block);
            }
            Statement::While(node) => eliminate_structured_list(&mut node.statements),
            Statement::RepeatUntil(node) => eliminate_structured_list(&mut node.statements),
            Statement::NumericFor(node) => eliminate_structured_list(&mut node.statements),
            Statement::IteratorFor(node) => eliminate_structured_list(&mut node.statements),
            _ => {}
        }
    }
}

// ---------------------------------------------------------------------------
// Expression analysis.

#[derive(Default, Clone)]
struct ExprTraits {
    has_effects: bool,
    reads_tables: bool,
    has_multres: bool,
    reads: Vec<u16>,
}

fn analyze(expr: &Expression, traits: &mut ExprTraits) {
    match expr {
        Expression::Identifier(id) => {
            if id.kind == IdentifierKind::Slot {
                traits.reads.push(id.slot as u16);
            }
        }
        Expression::Constant(_) | Expression::Primitive(_) => {}
        Expression::Vararg => traits.has_effects = true,
        Expression::MultRes => traits.has_multres = true,
        Expression::BinaryOp(op) => {
            analyze(&op.left, traits);
            analyze(&op.right, traits);
        }
        Expression::UnaryOp(op) => analyze(&op.operand, traits),
        Expression::GetItem(item) => {
            traits.reads_tables = true;
            analyze(&item.key, traits);
            analyze(&item.table, traits);
        }
        Expression::Table(table) => {
            for record in table
                .array
                .contents
                .iter()
                .chain(table.records.contents.iter())
            {
                match record {
                    Record::Array(r) => analyze(&r.value, traits),
                    Record::Keyed(r) => {
                        analyze(&r.key, traits);
                        analyze(&r.value, traits);
                    }
                }
            }
        }
        Expression::Call(call) => {
            traits.has_effects = true;
            for argument in &call.arguments.contents {
                analyze(argument, traits);
            }
            analyze(&call.function, traits);
        }
        // Closure creation captures slots the tree does not show as reads;
        // treat it as a barrier rather than reason about the captures.
        Expression::Function(_) => traits.has_effects = true,
    }
}

fn expression_traits(expr: &Expression) -> ExprTraits {
    let mut traits = ExprTraits::default();
    analyze(expr, &mut traits);
    traits
}

/// Effects and writes of a whole statement, as seen by a fusion crossing it.
#[derive(Default)]
struct Hazard {
    has_effects: bool,
    touches_tables: bool,
    writes: AHashSet<u16>,
}

fn statement_hazard(statement: &Statement) -> Hazard {
    let mut hazard = Hazard::default();
    match statement {
        Statement::Assignment(node) => {
            let mut traits = ExprTraits::default();
            for expr in &node.expressions.contents {
                analyze(expr, &mut traits);
            }
            hazard.has_effects |= traits.has_effects;
            hazard.touches_tables |= traits.reads_tables;
            for destination in &node.destinations.contents {
                match destination {
                    Expression::Identifier(id) => match id.kind {
                        IdentifierKind::Slot | IdentifierKind::Local => {
                            hazard.writes.insert(id.slot as u16);
                        }
                        _ => hazard.has_effects = true,
                    },
                    Expression::GetItem(item) => {
                        hazard.has_effects = true;
                        hazard.touches_tables = true;
                        let mut traits = ExprTraits::default();
                        analyze(&item.key, &mut traits);
                        analyze(&item.table, &mut traits);
                        hazard.has_effects |= traits.has_effects;
                    }
                    Expression::MultRes => {}
                    _ => hazard.has_effects = true,
                }
            }
        }
        Statement::Call(_) => {
            hazard.has_effects = true;
            hazard.touches_tables = true;
        }
        Statement::NoOp => {}
        // Structured statements and returns end a block's straight line.
        _ => {
            hazard.has_effects = true;
            hazard.touches_tables = true;
        }
    }
    hazard
}

// ---------------------------------------------------------------------------
// Read counting and replacement, in evaluation order.

fn count_reads_in_statement(statement: &Statement, slot: u16) -> usize {
    let mut traits = ExprTraits::default();
    analyze_statement_reads(statement, &mut traits);
    traits.reads.iter().filter(|&&s| s == slot).count()
}

/// Collect every slot read of a statement, descending into structured
/// statements so the second elimination round cannot miss uses hidden in
/// nested bodies.
fn analyze_statement_reads(statement: &Statement, traits: &mut ExprTraits) {
    let analyze_list = |list: &StatementsList, traits: &mut ExprTraits| {
        for inner in &list.contents {
            analyze_statement_reads(inner, traits);
        }
    };
    match statement {
        Statement::Assignment(node) => {
            for expr in &node.expressions.contents {
                analyze(expr, traits);
            }
            for destination in &node.destinations.contents {
                // The written identifier itself is not a read, but a table
                // destination reads its table and key.
                if let Expression::GetItem(item) = destination {
                    analyze(&item.key, traits);
                    analyze(&item.table, traits);
                }
            }
        }
        Statement::Call(call) => {
            for argument in &call.arguments.contents {
                analyze(argument, traits);
            }
            analyze(&call.function, traits);
        }
        Statement::Return(node) => {
            for expr in &node.returns.contents {
                analyze(expr, traits);
            }
        }
        Statement::If(node) => {
            analyze(&node.condition, traits);
            analyze_list(&node.then_block, traits);
            for elseif in &node.elseifs {
                analyze(&elseif.condition, traits);
                analyze_list(&elseif.then_block, traits);
            }
            analyze_list(&node.else_block, traits);
        }
        Statement::While(node) => {
            analyze(&node.condition, traits);
            analyze_list(&node.statements, traits);
        }
        Statement::RepeatUntil(node) => {
            analyze_list(&node.statements, traits);
            analyze(&node.condition, traits);
        }
        Statement::NumericFor(node) => {
            for expr in &node.expressions.contents {
                analyze(expr, traits);
            }
            analyze_list(&node.statements, traits);
        }
        Statement::IteratorFor(node) => {
            for expr in &node.expressions.contents {
                analyze(expr, traits);
            }
            analyze_list(&node.statements, traits);
        }
        Statement::Block(block) => {
            for inner in &block.contents {
                analyze_statement_reads(inner, traits);
            }
        }
        Statement::Break | Statement::NoOp => {}
    }
}

/// Statement kinds `replace_in_statement` can substitute into.
fn supports_replacement(statement: &Statement) -> bool {
    matches!(
        statement,
        Statement::Assignment(_) | Statement::Call(_) | Statement::Return(_)
    )
}

fn count_reads_in_warp(warp: &Warp, slot: u16) -> usize {
    let mut traits = ExprTraits::default();
    match warp {
        Warp::Conditional(w) => analyze(&w.condition, &mut traits),
        Warp::Iterator(w) => {
            for expr in &w.controls.contents {
                analyze(expr, &mut traits);
            }
        }
        Warp::NumericLoop(w) => {
            for expr in &w.controls.contents {
                analyze(expr, &mut traits);
            }
        }
        _ => {}
    }
    traits.reads.iter().filter(|&&s| s == slot).count()
}

/// Reads of `slot` occurring inside the destination side of an assignment
/// (table and key operands of stores).
fn reads_in_destination_side(statement: &Statement, slot: u16) -> usize {
    let Statement::Assignment(node) = statement else {
        return 0;
    };
    let mut traits = ExprTraits::default();
    for destination in &node.destinations.contents {
        if let Expression::GetItem(item) = destination {
            analyze(&item.key, &mut traits);
            analyze(&item.table, &mut traits);
        }
    }
    traits.reads.iter().filter(|&&s| s == slot).count()
}

fn statement_writes_slot(statement: &Statement, slot: u16) -> bool {
    let Statement::Assignment(node) = statement else {
        return false;
    };
    node.destinations.contents.iter().any(|destination| {
        matches!(
            destination,
            Expression::Identifier(id)
                if id.kind == IdentifierKind::Slot && id.slot == slot as i32
        )
    })
}

/// What a fusion target may be: a slot read or the MULTRES marker.
#[derive(Clone, Copy, PartialEq)]
enum UseSite {
    Slot(u16),
    MultRes,
}

/// Impurity seen strictly before the use site within one statement.
#[derive(Default)]
struct Prefix {
    calls: bool,
    tables: bool,
}

struct Substitution<'a> {
    site: UseSite,
    replacement: Option<Expression>,
    prefix: &'a mut Prefix,
}

impl Substitution<'_> {
    fn offer(&mut self, expr: &mut Expression) -> bool {
        if self.replacement.is_none() {
            return true;
        }
        let matches = match (&self.site, &*expr) {
            (UseSite::Slot(slot), Expression::Identifier(id)) => {
                id.kind == IdentifierKind::Slot && id.slot == *slot as i32
            }
            (UseSite::MultRes, Expression::MultRes) => true,
            _ => false,
        };
        if matches {
            *expr = self.replacement.take().unwrap();
            return true;
        }
        self.descend(expr);
        self.replacement.is_none()
    }

    fn descend(&mut self, expr: &mut Expression) {
        match expr {
            Expression::BinaryOp(op) => {
                if self.offer(&mut op.left) {
                    return;
                }
                self.offer(&mut op.right);
            }
            Expression::UnaryOp(op) => {
                self.offer(&mut op.operand);
            }
            Expression::GetItem(item) => {
                if self.offer(&mut item.key) {
                    return;
                }
                if self.offer(&mut item.table) {
                    return;
                }
                self.prefix.tables = true;
            }
            Expression::Table(table) => {
                for record in table
                    .array
                    .contents
                    .iter_mut()
                    .chain(table.records.contents.iter_mut())
                {
                    let done = match record {
                        Record::Array(r) => self.offer(&mut r.value),
                        Record::Keyed(r) => self.offer(&mut r.key) && self.offer(&mut r.value),
                    };
                    if done && self.replacement.is_none() {
                        return;
                    }
                }
            }
            Expression::Call(call) => {
                for argument in &mut call.arguments.contents {
                    if self.offer(argument) && self.replacement.is_none() {
                        return;
                    }
                }
                if self.offer(&mut call.function) && self.replacement.is_none() {
                    return;
                }
                self.prefix.calls = true;
            }
            _ => {}
        }
    }
}

/// Replace the first evaluation-order read of `site` inside `statement`.
/// Returns the impurity evaluated before the use, or None if no use found.
fn replace_in_statement(
    statement: &mut Statement,
    site: UseSite,
    replacement: Expression,
) -> Option<Prefix> {
    let mut prefix = Prefix::default();
    let mut sub = Substitution {
        site,
        replacement: Some(replacement),
        prefix: &mut prefix,
    };
    match statement {
        Statement::Assignment(node) => {
            for expr in &mut node.expressions.contents {
                if sub.offer(expr) && sub.replacement.is_none() {
                    return Some(prefix);
                }
            }
            for destination in &mut node.destinations.contents {
                if let Expression::GetItem(item) = destination {
                    if sub.offer(&mut item.key) && sub.replacement.is_none() {
                        return Some(prefix);
                    }
                    if sub.offer(&mut item.table) && sub.replacement.is_none() {
                        return Some(prefix);
                    }
                }
            }
        }
        Statement::Call(call) => {
            for argument in &mut call.arguments.contents {
                if sub.offer(argument) && sub.replacement.is_none() {
                    return Some(prefix);
                }
            }
            if sub.offer(&mut call.function) && sub.replacement.is_none() {
                return Some(prefix);
            }
        }
        Statement::Return(node) => {
            for expr in &mut node.returns.contents {
                if sub.offer(expr) && sub.replacement.is_none() {
                    return Some(prefix);
                }
            }
        }
        _ => {}
    }
    None
}

fn replace_in_warp(warp: &mut Warp, site: UseSite, replacement: Expression) -> Option<Prefix> {
    let mut prefix = Prefix::default();
    let mut sub = Substitution {
        site,
        replacement: Some(replacement),
        prefix: &mut prefix,
    };
    let exprs: Vec<&mut Expression> = match warp {
        Warp::Conditional(w) => vec![&mut w.condition],
        Warp::Iterator(w) => w.controls.contents.iter_mut().collect(),
        Warp::NumericLoop(w) => w.controls.contents.iter_mut().collect(),
        _ => vec![],
    };
    for expr in exprs {
        if sub.offer(expr) && sub.replacement.is_none() {
            return Some(prefix);
        }
    }
    None
}

// ---------------------------------------------------------------------------
// The per-block fixpoint.

fn eliminate_in_block(contents: &mut Vec<Statement>, warp: &mut Warp) {
    loop {
        let mut changed = false;
        while fuse_one(contents, warp) {
            changed = true;
        }
        if fold_table_constructors(contents) {
            changed = true;
        }
        if !changed {
            break;
        }
    }
    contents.retain(|statement| !matches!(statement, Statement::NoOp));
}

/// One fusion plan: take the defining expression at `definition`, substitute
/// it at the use site.
struct Plan {
    definition: usize,
    /// `contents.len()` means the block's warp.
    use_index: usize,
    site: UseSite,
}

fn fuse_one(contents: &mut Vec<Statement>, warp: &mut Warp) -> bool {
    let Some(plan) = find_fusion(contents, warp) else {
        return false;
    };

    let Statement::Assignment(def) = std::mem::replace(&mut contents[plan.definition], Statement::NoOp)
    else {
        unreachable!("fusion definition is always an assignment");
    };
    let expression = def.expressions.contents.into_iter().next().unwrap();
    let traits = expression_traits(&expression);

    let prefix = if plan.use_index == contents.len() {
        replace_in_warp(warp, plan.site, expression)
    } else {
        replace_in_statement(&mut contents[plan.use_index], plan.site, expression)
    };

    match prefix {
        Some(prefix) => {
            debug_assert!(!(traits.has_effects && (prefix.calls || prefix.tables)));
            debug_assert!(!(traits.reads_tables && prefix.calls));
            true
        }
        None => unreachable!("fusion use site disappeared between find and apply"),
    }
}

fn find_fusion(contents: &[Statement], warp: &Warp) -> Option<Plan> {
    for (index, statement) in contents.iter().enumerate() {
        let Statement::Assignment(node) = statement else {
            continue;
        };
        if node.expressions.contents.len() != 1 {
            continue;
        }
        let site = match node.destinations.contents.as_slice() {
            [Expression::Identifier(id)] if id.kind == IdentifierKind::Slot => {
                UseSite::Slot(id.slot as u16)
            }
            [Expression::MultRes] => UseSite::MultRes,
            _ => continue,
        };
        let expression = &node.expressions.contents[0];
        // A bare slot-to-slot move of the same slot is already gone; a MOV
        // of a different slot is still a fusion candidate.
        let traits = expression_traits(expression);
        if let Some(plan) = plan_for_definition(contents, warp, index, site, &traits) {
            return Some(plan);
        }
    }
    None
}

fn plan_for_definition(
    contents: &[Statement],
    warp: &Warp,
    definition: usize,
    site: UseSite,
    traits: &ExprTraits,
) -> Option<Plan> {
    let slot = match site {
        UseSite::Slot(slot) => slot,
        // MULTRES fuses only into the immediately following statement.
        UseSite::MultRes => {
            let next = contents.get(definition + 1)?;
            let uses = count_multres_uses(next);
            // A multi-value table append reads MULTRES both as the running
            // index and as the appended values; the value side is the one
            // substituted (it is first in evaluation order).
            let expected = if is_multres_append(next) { 2 } else { 1 };
            if uses == expected && multres_total(contents, definition + 2) == 0 {
                return Some(Plan {
                    definition,
                    use_index: definition + 1,
                    site,
                });
            }
            return None;
        }
    };

    let mut crossed_effects = false;
    let mut crossed_tables = false;
    for (offset, statement) in contents[definition + 1..].iter().enumerate() {
        let index = definition + 1 + offset;
        let reads_here = count_reads_in_statement(statement, slot);

        if reads_here == 1 {
            if !supports_replacement(statement) {
                // The use hides inside a structured statement.
                return None;
            }
            // A table literal used as a store destination must stay
            // materialized; only the constructor fold may absorb those
            // writes.
            if matches!(
                contents[definition],
                Statement::Assignment(ref def)
                    if matches!(def.expressions.contents[0], Expression::Table(_))
            ) && reads_in_destination_side(statement, slot) > 0
            {
                return None;
            }
            // The single use; verify nothing reads the slot later before a
            // rewrite, and that crossing is safe.
            if !single_use_confirmed(contents, warp, index, slot, statement) {
                return None;
            }
            if !crossing_allowed(traits, crossed_effects, crossed_tables) {
                return None;
            }
            if !prefix_allowed(contents, index, site, traits) {
                return None;
            }
            return Some(Plan {
                definition,
                use_index: index,
                site,
            });
        }
        if reads_here > 1 {
            return None;
        }
        if statement_writes_slot(statement, slot) {
            // Dead definition; not this pass's business.
            return None;
        }

        let hazard = statement_hazard(statement);
        if hazard.writes.iter().any(|w| traits.reads.contains(w)) {
            return None;
        }
        crossed_effects |= hazard.has_effects;
        crossed_tables |= hazard.touches_tables;
        if traits.has_multres && (hazard.has_effects || !hazard.writes.is_empty()) {
            return None;
        }
    }

    // No use in the statements; the warp may hold it.
    if count_reads_in_warp(warp, slot) == 1
        && crossing_allowed(traits, crossed_effects, crossed_tables)
    {
        return Some(Plan {
            definition,
            use_index: contents.len(),
            site,
        });
    }
    None
}

fn crossing_allowed(traits: &ExprTraits, crossed_effects: bool, crossed_tables: bool) -> bool {
    if traits.has_effects && (crossed_effects || crossed_tables) {
        return false;
    }
    if traits.reads_tables && crossed_effects {
        return false;
    }
    true
}

fn single_use_confirmed(
    contents: &[Statement],
    warp: &Warp,
    use_index: usize,
    slot: u16,
    use_statement: &Statement,
) -> bool {
    if statement_writes_slot(use_statement, slot) {
        // Reads then overwrites (slot = slot + 1): the read is the use and
        // the rewrite kills the old value afterwards.
        return true;
    }
    for statement in &contents[use_index + 1..] {
        if count_reads_in_statement(statement, slot) > 0 {
            return false;
        }
        if statement_writes_slot(statement, slot) {
            return true;
        }
    }
    count_reads_in_warp(warp, slot) == 0
}

/// Simulate the substitution on a clone to learn what is evaluated before
/// the use, then check it against the defining expression's traits.
fn prefix_allowed(
    contents: &[Statement],
    use_index: usize,
    site: UseSite,
    traits: &ExprTraits,
) -> bool {
    if !traits.has_effects && !traits.reads_tables {
        return true;
    }
    let mut probe = contents[use_index].clone();
    let Some(prefix) = replace_in_statement(&mut probe, site, Expression::nil()) else {
        return false;
    };
    if traits.has_effects && (prefix.calls || prefix.tables) {
        return false;
    }
    if traits.reads_tables && prefix.calls {
        return false;
    }
    true
}

fn count_multres_uses(statement: &Statement) -> usize {
    fn count_expr(expr: &Expression) -> usize {
        match expr {
            Expression::MultRes => 1,
            Expression::BinaryOp(op) => count_expr(&op.left) + count_expr(&op.right),
            Expression::UnaryOp(op) => count_expr(&op.operand),
            Expression::GetItem(item) => count_expr(&item.key) + count_expr(&item.table),
            Expression::Call(call) => {
                call.arguments.contents.iter().map(count_expr).sum::<usize>()
                    + count_expr(&call.function)
            }
            _ => 0,
        }
    }
    match statement {
        Statement::Return(node) => node.returns.contents.iter().map(count_expr).sum(),
        Statement::Call(call) => {
            call.arguments.contents.iter().map(count_expr).sum::<usize>()
                + count_expr(&call.function)
        }
        Statement::Assignment(node) => {
            let mut total: usize = node.expressions.contents.iter().map(count_expr).sum();
            for destination in &node.destinations.contents {
                if let Expression::GetItem(item) = destination {
                    total += count_expr(&item.key) + count_expr(&item.table);
                }
            }
            total
        }
        _ => 0,
    }
}

fn multres_total(contents: &[Statement], from: usize) -> usize {
    contents
        .get(from..)
        .unwrap_or_default()
        .iter()
        .map(count_multres_uses)
        .sum()
}

/// A multi-value append into a table: `t[MULTRES] = MULTRES`.
fn is_multres_append(statement: &Statement) -> bool {
    let Statement::Assignment(node) = statement else {
        return false;
    };
    matches!(node.expressions.contents.as_slice(), [Expression::MultRes])
        && matches!(
            node.destinations.contents.as_slice(),
            [Expression::GetItem(item)] if item.key == Expression::MultRes
        )
}

// ---------------------------------------------------------------------------
// Table constructor folding.

/// Fold `t = {} ; t.k = v ; t[1] = w` runs back into the constructor.
fn fold_table_constructors(contents: &mut Vec<Statement>) -> bool {
    let mut changed = false;
    let mut index = 0;
    while index < contents.len() {
        let is_constructor_def = matches!(
            &contents[index],
            Statement::Assignment(node)
                if node.expressions.contents.len() == 1
                    && matches!(node.expressions.contents[0], Expression::Table(_))
                    && matches!(
                        node.destinations.contents.as_slice(),
                        [Expression::Identifier(id)]
                            if id.kind == IdentifierKind::Slot
                    )
        );
        if !is_constructor_def {
            index += 1;
            continue;
        }
        let slot = match &contents[index] {
            Statement::Assignment(node) => match &node.destinations.contents[0] {
                Expression::Identifier(id) => id.slot as u16,
                _ => unreachable!(),
            },
            _ => unreachable!(),
        };

        while let Some((set_index, live_addr, record)) = foldable_record(contents, index, slot) {
            let Statement::Assignment(def) = &mut contents[index] else {
                unreachable!();
            };
            let Expression::Table(constructor) = &mut def.expressions.contents[0] else {
                unreachable!();
            };
            match record {
                Record::Array(r) => constructor.array.contents.push(Record::Array(r)),
                keyed => constructor.records.contents.push(keyed),
            }
            // The constructed value is only complete after its last fill;
            // move the definition's liveness there so debug ranges match.
            if let Expression::Identifier(id) = &mut def.destinations.contents[0] {
                id.addr = live_addr;
            }
            contents.remove(set_index);
            changed = true;
        }
        index += 1;
    }
    changed
}

/// The next table-set statement after the constructor definition (skipping
/// placeholders left by earlier fusions), if it is a fold candidate; returns
/// its position, the pc after which the table is complete, and the record it
/// becomes.
fn foldable_record(
    contents: &[Statement],
    index: usize,
    slot: u16,
) -> Option<(usize, u32, Record)> {
    let mut set_index = index + 1;
    while matches!(contents.get(set_index), Some(Statement::NoOp)) {
        set_index += 1;
    }
    let Statement::Assignment(node) = contents.get(set_index)? else {
        return None;
    };
    if node.expressions.contents.len() != 1 {
        return None;
    }
    let [Expression::GetItem(item)] = node.destinations.contents.as_slice() else {
        return None;
    };
    let Expression::Identifier(table) = &item.table else {
        return None;
    };
    if table.kind != IdentifierKind::Slot || table.slot != slot as i32 {
        return None;
    }
    let live_addr = table.addr + 1;
    let value = node.expressions.contents[0].clone();
    // Self-referencing records cannot live inside the constructor.
    let value_traits = expression_traits(&value);
    if value_traits.reads.contains(&slot) {
        return None;
    }
    let key_traits = expression_traits(&item.key);
    if key_traits.reads.contains(&slot) {
        return None;
    }

    let array_len = match &contents[index] {
        Statement::Assignment(def) => match &def.expressions.contents[0] {
            Expression::Table(t) => t.array.contents.len() as i64,
            _ => return None,
        },
        _ => return None,
    };

    match &item.key {
        // The next array position extends the array part.
        Expression::Constant(Constant::Integer(i)) if *i == array_len + 1 => {
            Some((set_index, live_addr, Record::Array(ArrayRecord { value })))
        }
        // A trailing multi-value append (from TSETM).
        Expression::MultRes if value_traits.has_effects || value == Expression::MultRes => {
            Some((set_index, live_addr, Record::Array(ArrayRecord { value })))
        }
        Expression::MultRes => None,
        key => Some((
            set_index,
            live_addr,
            Record::Keyed(TableRecord {
                key: key.clone(),
                value,
            }),
        )),
    }
}

// ---------------------------------------------------------------------------
// Iterator control fusion (cross-block).

/// `for k, v in pairs(t)` leaves the iterator triple in three consecutive
/// slots written by one call; the IteratorWarp at the bottom of the loop
/// reads them as its controls. When the setup assignment is the last
/// statement before the loop and its destinations are exactly the control
/// slots, the call becomes the single control expression.
fn fuse_iterator_controls(contents: &mut [Statement]) {
    for index in 0..contents.len() {
        let control_slots = {
            let Statement::Block(block) = &contents[index] else {
                continue;
            };
            let Warp::Iterator(warp) = &block.warp else {
                continue;
            };
            let slots: Vec<u16> = warp
                .controls
                .contents
                .iter()
                .filter_map(Expression::as_slot)
                .collect();
            if slots.len() != 3 {
                continue;
            }
            slots
        };

        // The setup block is the one that jumps over the body to the
        // iterator block.
        let Some(setup_index) = contents.iter().position(|statement| {
            matches!(
                statement,
                Statement::Block(b)
                    if matches!(&b.warp, Warp::Unconditional(w) if w.target == index)
            )
        }) else {
            continue;
        };
        if setup_index == index {
            continue;
        }

        let call = {
            let Statement::Block(setup) = &contents[setup_index] else {
                continue;
            };
            let Some(Statement::Assignment(node)) = setup.contents.last() else {
                continue;
            };
            if node.expressions.contents.len() != 1 {
                continue;
            }
            let destinations: Vec<u16> = node
                .destinations
                .contents
                .iter()
                .filter_map(Expression::as_slot)
                .collect();
            if destinations != control_slots {
                continue;
            }
            node.expressions.contents[0].clone()
        };

        if let Statement::Block(setup) = &mut contents[setup_index] {
            setup.contents.pop();
        }
        if let Statement::Block(block) = &mut contents[index] {
            if let Warp::Iterator(warp) = &mut block.warp {
                warp.controls.contents = vec![call];
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Slot identification.

/// Count write generations per slot; slots with more than one generation get
/// sequential ids so distinct lifetimes emit distinct names.
fn assign_slot_ids(function: &mut FunctionDefinition) {
    let mut generations: AHashMap<u16, u32> = AHashMap::new();
    for argument in &function.arguments.contents {
        if argument.kind == IdentifierKind::Slot {
            generations.insert(argument.slot as u16, 1);
        }
    }
    for statement in &function.statements.contents {
        if let Statement::Block(block) = statement {
            for inner in &block.contents {
                if let Statement::Assignment(node) = inner {
                    for destination in &node.destinations.contents {
                        if let Expression::Identifier(id) = destination {
                            if id.kind == IdentifierKind::Slot {
                                *generations.entry(id.slot as u16).or_insert(0) += 1;
                            }
                        }
                    }
                }
            }
        }
    }

    let multi: AHashSet<u16> = generations
        .iter()
        .filter(|&(_, &count)| count > 1)
        .map(|(&slot, _)| slot)
        .collect();
    if multi.is_empty() {
        return;
    }

    let mut tagger = SlotIdTagger {
        multi,
        current: AHashMap::new(),
    };
    for argument in &mut function.arguments.contents {
        tagger.tag_read(argument);
    }
    for statement in &mut function.statements.contents {
        if let Statement::Block(block) = statement {
            tagger.tag_block(block);
        }
    }
}

struct SlotIdTagger {
    multi: AHashSet<u16>,
    current: AHashMap<u16, i32>,
}

impl SlotIdTagger {
    fn tag_read(&mut self, id: &mut Identifier) {
        if id.kind == IdentifierKind::Slot && self.multi.contains(&(id.slot as u16)) {
            id.id = *self.current.entry(id.slot as u16).or_insert(0);
        }
    }

    fn tag_write(&mut self, id: &mut Identifier) {
        if id.kind == IdentifierKind::Slot && self.multi.contains(&(id.slot as u16)) {
            let generation = self.current.entry(id.slot as u16).or_insert(-1);
            *generation += 1;
            id.id = *generation;
        }
    }

    fn tag_block(&mut self, block: &mut Block) {
        for statement in &mut block.contents {
            self.tag_statement(statement);
        }
        let mut reads = ReadTagger(self);
        crate::ast::traverse::walk_warp(&mut reads, &mut block.warp);
    }

    fn tag_statement(&mut self, statement: &mut Statement) {
        if let Statement::Assignment(node) = statement {
            {
                let mut reads = ReadTagger(self);
                for expr in &mut node.expressions.contents {
                    crate::ast::traverse::walk_expression(&mut reads, expr);
                }
            }
            for destination in &mut node.destinations.contents {
                match destination {
                    Expression::Identifier(id) => self.tag_write(id),
                    other => {
                        let mut reads = ReadTagger(self);
                        crate::ast::traverse::walk_expression(&mut reads, other);
                    }
                }
            }
        } else {
            let mut reads = ReadTagger(self);
            crate::ast::traverse::walk_statement(&mut reads, statement);
        }
    }
}

struct ReadTagger<'a>(&'a mut SlotIdTagger);

impl crate::ast::traverse::VisitorMut for ReadTagger<'_> {
    fn visit_identifier(&mut self, node: &mut Identifier) {
        self.0.tag_read(node);
    }
}

// ---------------------------------------------------------------------------

/// Apply `f` to every nested function definition in the list.
pub(crate) fn for_each_nested_function<F: FnMut(&mut FunctionDefinition)>(
    statements: &mut StatementsList,
    f: &mut F,
) {
    struct Finder<'a, F: FnMut(&mut FunctionDefinition)> {
        f: &'a mut F,
    }
    impl<F: FnMut(&mut FunctionDefinition)> crate::ast::traverse::VisitorMut for Finder<'_, F> {
        fn enter_function_definition(&mut self, node: &mut FunctionDefinition) {
            (self.f)(node);
        }
    }
    let mut finder = Finder { f };
    crate::ast::traverse::walk_statements_list(&mut finder, statements);
}
