// AST mutation passes.
//
// The pre-pass runs on the warped tree and canonicalizes instruction-level
// leftovers so the later stages see one shape. The primary pass runs after
// unwarping and cleans the structured tree up for emission.

use crate::ast::builder::invert_condition;
use crate::ast::nodes::*;
use crate::ast::slotworks::for_each_nested_function;
use crate::ast::traverse::{self, VisitorMut};

// ---------------------------------------------------------------------------
// Pre-pass (warped).

/// Canonicalize the freshly built tree:
/// - UCLO edges in functions that create no closures cannot close anything
///   and become plain jumps;
/// - jump warps to the adjacent block become fall-through edges.
pub fn pre_pass(function: &mut FunctionDefinition) {
    pre_pass_one(function);
    for_each_nested_function(&mut function.statements, &mut |nested| {
        pre_pass_one(nested);
    });
}

fn pre_pass_one(function: &mut FunctionDefinition) {
    let makes_closures = contains_function_expression(&function.statements);
    let count = function.statements.contents.len();
    for (position, statement) in function.statements.contents.iter_mut().enumerate() {
        let Statement::Block(block) = statement else {
            continue;
        };
        if let Warp::Unconditional(w) = &mut block.warp {
            if w.is_uclo && !makes_closures {
                w.is_uclo = false;
            }
            if w.kind == UnconditionalWarpKind::Jump
                && position + 1 < count
                && w.target == position + 1
            {
                w.kind = UnconditionalWarpKind::Flow;
            }
        }
    }
}

fn contains_function_expression(statements: &StatementsList) -> bool {
    struct Finder {
        found: bool,
    }
    impl VisitorMut for Finder {
        fn enter_function_definition(&mut self, _node: &mut FunctionDefinition) {
            self.found = true;
        }
    }
    let mut finder = Finder { found: false };
    // The walker takes mutable access; the probe does not mutate.
    let mut probe = statements.clone();
    traverse::walk_statements_list(&mut finder, &mut probe);
    finder.found
}

// ---------------------------------------------------------------------------
// Primary pass (structured).

/// Post-unwarping cleanups:
/// - `if not c then T else E end` becomes `if c then E else T end`;
/// - an else branch holding a single `if` collapses into an elseif chain;
/// - adjacent single-local definitions from one source line merge into a
///   multi-local definition;
/// - `obj.method(obj, ...)` calls regain their `:` sugar;
/// - a trailing bare `return` at the end of a function body is dropped.
pub fn primary_pass(function: &mut FunctionDefinition) {
    let lines = function.debug_lines.clone();
    rewrite_list(&mut function.statements, &lines);
    drop_trailing_return(&mut function.statements);
    for_each_nested_function(&mut function.statements, &mut |nested| {
        let nested_lines = nested.debug_lines.clone();
        rewrite_list(&mut nested.statements, &nested_lines);
        drop_trailing_return(&mut nested.statements);
    });
}

fn rewrite_list(list: &mut StatementsList, lines: &[u32]) {
    for statement in &mut list.contents {
        rewrite_statement(statement, lines);
    }
    merge_local_definitions(list, lines);
}

fn rewrite_statement(statement: &mut Statement, lines: &[u32]) {
    match statement {
        Statement::If(node) => {
            invert_negated_if(node);
            collapse_elseif(node);
            rewrite_list(&mut node.then_block, lines);
            for elseif in &mut node.elseifs {
                rewrite_list(&mut elseif.then_block, lines);
            }
            rewrite_list(&mut node.else_block, lines);
        }
        Statement::While(node) => rewrite_list(&mut node.statements, lines),
        Statement::RepeatUntil(node) => rewrite_list(&mut node.statements, lines),
        Statement::NumericFor(node) => rewrite_list(&mut node.statements, lines),
        Statement::IteratorFor(node) => rewrite_list(&mut node.statements, lines),
        Statement::Call(call) => restore_method_sugar(call),
        Statement::Assignment(node) => {
            for expr in &mut node.expressions.contents {
                restore_method_sugar_in_expression(expr);
            }
        }
        Statement::Return(node) => {
            for expr in &mut node.returns.contents {
                restore_method_sugar_in_expression(expr);
            }
        }
        _ => {}
    }
}

/// `if not c then T else E end` reads better flipped; only worthwhile when
/// there is an else branch to swap in.
fn invert_negated_if(node: &mut If) {
    let negated = matches!(
        &node.condition,
        Expression::UnaryOp(op) if op.kind == UnOpKind::Not
    );
    if !negated || node.else_block.is_empty() || !node.elseifs.is_empty() {
        return;
    }
    let condition = std::mem::replace(&mut node.condition, Expression::nil());
    node.condition = invert_condition(condition);
    std::mem::swap(&mut node.then_block, &mut node.else_block);
}

/// An else branch holding exactly one `if` statement becomes an elseif arm.
fn collapse_elseif(node: &mut If) {
    while node.else_block.contents.len() == 1 {
        let Statement::If(_) = &node.else_block.contents[0] else {
            break;
        };
        let Statement::If(mut inner) = node.else_block.contents.pop().unwrap() else {
            unreachable!();
        };
        invert_negated_if(&mut inner);
        node.elseifs.push(ElseIf {
            condition: inner.condition,
            then_block: inner.then_block,
        });
        node.elseifs.extend(inner.elseifs);
        node.else_block = inner.else_block;
    }
}

/// Merge runs of single-destination local definitions that the compiler
/// split out of one source line: `local a, b = f(), g()`.
fn merge_local_definitions(list: &mut StatementsList, lines: &[u32]) {
    if lines.is_empty() {
        return;
    }
    let mut index = 0;
    while index + 1 < list.contents.len() {
        let Some(line) = definition_line(&list.contents[index], lines) else {
            index += 1;
            continue;
        };
        let mergeable = match (&list.contents[index], &list.contents[index + 1]) {
            (Statement::Assignment(first), Statement::Assignment(second)) => {
                definition_line(&list.contents[index + 1], lines) == Some(line)
                    && consecutive_slots(first, second)
                    && !reads_any_destination(second, first)
            }
            _ => false,
        };
        if !mergeable {
            index += 1;
            continue;
        }
        let Statement::Assignment(second) = list.contents.remove(index + 1) else {
            unreachable!();
        };
        let Statement::Assignment(first) = &mut list.contents[index] else {
            unreachable!();
        };
        first.destinations.contents.extend(second.destinations.contents);
        first.expressions.contents.extend(second.expressions.contents);
    }
}

fn definition_line(statement: &Statement, lines: &[u32]) -> Option<u32> {
    let Statement::Assignment(node) = statement else {
        return None;
    };
    if node.kind != AssignmentKind::LocalDefinition {
        return None;
    }
    match node.destinations.contents.first() {
        Some(Expression::Identifier(id)) => lines.get(id.addr as usize).copied(),
        _ => None,
    }
}

fn consecutive_slots(first: &Assignment, second: &Assignment) -> bool {
    let last = first.destinations.contents.last();
    let next = second.destinations.contents.first();
    match (last, next) {
        (Some(Expression::Identifier(a)), Some(Expression::Identifier(b))) => {
            b.slot == a.slot + 1
        }
        _ => false,
    }
}

fn reads_any_destination(second: &Assignment, first: &Assignment) -> bool {
    let destinations: Vec<(IdentifierKind, i32)> = first
        .destinations
        .contents
        .iter()
        .filter_map(|d| match d {
            Expression::Identifier(id) => Some((id.kind, id.slot)),
            _ => None,
        })
        .collect();

    struct Reads<'a> {
        destinations: &'a [(IdentifierKind, i32)],
        found: bool,
    }
    impl VisitorMut for Reads<'_> {
        fn visit_identifier(&mut self, node: &mut Identifier) {
            if self.destinations.contains(&(node.kind, node.slot)) {
                self.found = true;
            }
        }
    }
    let mut probe = Reads {
        destinations: &destinations,
        found: false,
    };
    let mut expressions = second.expressions.clone();
    for expr in &mut expressions.contents {
        traverse::walk_expression(&mut probe, expr);
    }
    probe.found
}

/// `t.name(t, ...)` becomes `t:name(...)`; the receiver stays as the first
/// argument and the writer skips it.
fn restore_method_sugar(call: &mut FunctionCall) {
    for argument in &mut call.arguments.contents {
        restore_method_sugar_in_expression(argument);
    }
    restore_method_sugar_in_expression(&mut call.function);

    if call.is_method {
        return;
    }
    let Expression::GetItem(item) = &call.function else {
        return;
    };
    let Expression::Constant(Constant::String(name)) = &item.key else {
        return;
    };
    if !is_identifier_name(name) {
        return;
    }
    let Some(receiver) = call.arguments.contents.first() else {
        return;
    };
    if same_simple_expression(receiver, &item.table) {
        call.is_method = true;
    }
}

fn restore_method_sugar_in_expression(expr: &mut Expression) {
    match expr {
        Expression::Call(call) => restore_method_sugar(call),
        Expression::BinaryOp(op) => {
            restore_method_sugar_in_expression(&mut op.left);
            restore_method_sugar_in_expression(&mut op.right);
        }
        Expression::UnaryOp(op) => restore_method_sugar_in_expression(&mut op.operand),
        Expression::GetItem(item) => {
            restore_method_sugar_in_expression(&mut item.key);
            restore_method_sugar_in_expression(&mut item.table);
        }
        Expression::Table(table) => {
            for record in table
                .array
                .contents
                .iter_mut()
                .chain(table.records.contents.iter_mut())
            {
                match record {
                    Record::Array(r) => restore_method_sugar_in_expression(&mut r.value),
                    Record::Keyed(r) => {
                        restore_method_sugar_in_expression(&mut r.key);
                        restore_method_sugar_in_expression(&mut r.value);
                    }
                }
            }
        }
        _ => {}
    }
}

/// Structural equality that ignores bookkeeping fields (addresses, slot
/// generation ids) so a receiver matches the indexed table.
fn same_simple_expression(a: &Expression, b: &Expression) -> bool {
    match (a, b) {
        (Expression::Identifier(x), Expression::Identifier(y)) => {
            x.kind == y.kind && x.slot == y.slot && x.name == y.name
        }
        (Expression::Constant(x), Expression::Constant(y)) => x == y,
        (Expression::GetItem(x), Expression::GetItem(y)) => {
            same_simple_expression(&x.table, &y.table) && same_simple_expression(&x.key, &y.key)
        }
        _ => false,
    }
}

pub(crate) fn is_identifier_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_') && !is_lua_keyword(name)
}

fn is_lua_keyword(name: &str) -> bool {
    matches!(
        name,
        "and"
            | "break"
            | "do"
            | "else"
            | "elseif"
            | "end"
            | "false"
            | "for"
            | "function"
            | "if"
            | "in"
            | "local"
            | "nil"
            | "not"
            | "or"
            | "repeat"
            | "return"
            | "then"
            | "true"
            | "until"
            | "while"
    )
}

fn drop_trailing_return(statements: &mut StatementsList) {
    if let Some(Statement::Return(node)) = statements.contents.last() {
        if node.returns.contents.is_empty() {
            statements.contents.pop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smol_str::SmolStr;

    fn local(name: &str, slot: i32, addr: u32) -> Expression {
        Expression::Identifier(Identifier {
            name: Some(SmolStr::new(name)),
            kind: IdentifierKind::Local,
            slot,
            id: -1,
            addr,
        })
    }

    #[test]
    fn test_invert_negated_if() {
        let mut node = If {
            condition: Expression::unary(UnOpKind::Not, Expression::slot(0, 0)),
            then_block: StatementsList {
                contents: vec![Statement::Break],
            },
            elseifs: Vec::new(),
            else_block: StatementsList {
                contents: vec![Statement::Return(Return::default())],
            },
        };
        invert_negated_if(&mut node);
        assert_eq!(node.condition, Expression::slot(0, 0));
        assert!(matches!(node.then_block.contents[0], Statement::Return(_)));
        assert!(matches!(node.else_block.contents[0], Statement::Break));
    }

    #[test]
    fn test_collapse_elseif_chain() {
        let inner = If {
            condition: Expression::slot(1, 0),
            then_block: StatementsList {
                contents: vec![Statement::Break],
            },
            elseifs: Vec::new(),
            else_block: StatementsList {
                contents: vec![Statement::Return(Return::default())],
            },
        };
        let mut outer = If {
            condition: Expression::slot(0, 0),
            then_block: StatementsList::default(),
            elseifs: Vec::new(),
            else_block: StatementsList {
                contents: vec![Statement::If(inner)],
            },
        };
        collapse_elseif(&mut outer);
        assert_eq!(outer.elseifs.len(), 1);
        assert_eq!(outer.elseifs[0].condition, Expression::slot(1, 0));
        assert!(matches!(
            outer.else_block.contents[0],
            Statement::Return(_)
        ));
    }

    #[test]
    fn test_merge_same_line_locals() {
        let mut first = Assignment::single(
            local("a", 0, 3),
            Expression::Constant(Constant::Integer(1)),
        );
        first.kind = AssignmentKind::LocalDefinition;
        let mut second = Assignment::single(
            local("b", 1, 4),
            Expression::Constant(Constant::Integer(2)),
        );
        second.kind = AssignmentKind::LocalDefinition;

        let mut list = StatementsList {
            contents: vec![
                Statement::Assignment(first),
                Statement::Assignment(second),
            ],
        };
        // Both identifiers reference pcs mapping to source line 7.
        let lines = vec![7u32; 8];
        merge_local_definitions(&mut list, &lines);

        assert_eq!(list.contents.len(), 1);
        let Statement::Assignment(merged) = &list.contents[0] else {
            unreachable!();
        };
        assert_eq!(merged.destinations.contents.len(), 2);
        assert_eq!(merged.expressions.contents.len(), 2);
    }

    #[test]
    fn test_no_merge_across_lines() {
        let mut first = Assignment::single(
            local("a", 0, 0),
            Expression::Constant(Constant::Integer(1)),
        );
        first.kind = AssignmentKind::LocalDefinition;
        let mut second = Assignment::single(
            local("b", 1, 1),
            Expression::Constant(Constant::Integer(2)),
        );
        second.kind = AssignmentKind::LocalDefinition;

        let mut list = StatementsList {
            contents: vec![
                Statement::Assignment(first),
                Statement::Assignment(second),
            ],
        };
        let lines = vec![1, 2];
        merge_local_definitions(&mut list, &lines);
        assert_eq!(list.contents.len(), 2);
    }

    #[test]
    fn test_method_sugar() {
        let table = local("obj", 0, 0);
        let mut call = FunctionCall {
            function: Expression::index(
                table.clone(),
                Expression::Constant(Constant::String("move".into())),
            ),
            arguments: ExpressionsList {
                contents: vec![table, Expression::Constant(Constant::Integer(1))],
            },
            is_method: false,
        };
        restore_method_sugar(&mut call);
        assert!(call.is_method);
    }

    #[test]
    fn test_no_method_sugar_for_keyword_key() {
        let table = local("obj", 0, 0);
        let mut call = FunctionCall {
            function: Expression::index(
                table.clone(),
                Expression::Constant(Constant::String("end".into())),
            ),
            arguments: ExpressionsList {
                contents: vec![table],
            },
            is_method: false,
        };
        restore_method_sugar(&mut call);
        assert!(!call.is_method);
    }
}
