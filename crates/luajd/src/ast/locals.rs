// Local variable discovery.
//
// `mark_locals` retags slot identifiers covered by a debug range as named
// locals. `mark_local_definitions` runs on the structured tree and flags the
// first write to each local in each scope as a `local` definition statement.

use ahash::AHashSet;
use smol_str::SmolStr;

use crate::ast::nodes::*;
use crate::ast::traverse::{self, VisitorMut};

/// Retag `Identifier(kind = Slot)` nodes whose referencing pc falls inside a
/// debug local range. Slots without a covering range stay slots and later get
/// synthetic names.
///
/// `alt_mode` re-runs after unwarping, where loop variables reference the
/// loop prologue pc while their debug range only opens at the first body
/// instruction; the lookup window is widened accordingly.
pub fn mark_locals(function: &mut FunctionDefinition, alt_mode: bool) {
    let mut marker = LocalMarker {
        stack: Vec::new(),
        alt_mode,
    };
    // walk_function enters the root definition itself, which pushes its
    // ranges onto the stack.
    traverse::walk_function(&mut marker, function);
}

struct LocalMarker {
    stack: Vec<Vec<DebugLocal>>,
    alt_mode: bool,
}

impl LocalMarker {
    fn lookup(&self, slot: i32, addr: u32) -> Option<&DebugLocal> {
        let ranges = self.stack.last()?;
        let window = if self.alt_mode { 2 } else { 0 };
        for probe in addr..=addr + window {
            let mut active = 0;
            for local in ranges {
                if local.start_addr <= probe && probe < local.end_addr {
                    if active == slot {
                        return Some(local);
                    }
                    active += 1;
                }
            }
        }
        None
    }
}

impl VisitorMut for LocalMarker {
    fn enter_function_definition(&mut self, node: &mut FunctionDefinition) {
        self.stack.push(node.debug_locals.clone());
    }

    fn leave_function_definition(&mut self, _node: &mut FunctionDefinition) {
        self.stack.pop();
    }

    fn visit_identifier(&mut self, node: &mut Identifier) {
        if node.kind != IdentifierKind::Slot {
            return;
        }
        if let Some(local) = self.lookup(node.slot, node.addr) {
            if !local.internal {
                node.kind = IdentifierKind::Local;
                node.name = Some(local.name.clone());
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Local definitions.

/// Identity of one local as the writer will name it.
type LocalKey = (i32, i32, Option<SmolStr>);

fn local_key(id: &Identifier) -> LocalKey {
    (id.slot, id.id, id.name.clone())
}

/// Flag the first write to each local in each scope as a LocalDefinition.
/// Loop variables are implicitly local to their body and need no flag.
pub fn mark_local_definitions(function: &mut FunctionDefinition) {
    let mut scopes = vec![AHashSet::new()];
    for argument in &function.arguments.contents {
        scopes[0].insert(local_key(argument));
    }
    mark_list(&mut function.statements, &mut scopes);
}

fn mark_list(list: &mut StatementsList, scopes: &mut Vec<AHashSet<LocalKey>>) {
    for statement in &mut list.contents {
        mark_statement(statement, scopes);
    }
}

fn mark_statement(statement: &mut Statement, scopes: &mut Vec<AHashSet<LocalKey>>) {
    match statement {
        Statement::Assignment(node) => {
            for expr in &mut node.expressions.contents {
                scan_expression(expr);
            }
            let definable = !node.destinations.contents.is_empty()
                && node.destinations.contents.iter().all(|destination| {
                    matches!(
                        destination,
                        Expression::Identifier(id)
                            if matches!(id.kind, IdentifierKind::Local | IdentifierKind::Slot)
                                && !declared(scopes, &local_key(id))
                    )
                });
            if definable && node.kind != AssignmentKind::LocalDefinition {
                node.kind = AssignmentKind::LocalDefinition;
            }
            if node.kind == AssignmentKind::LocalDefinition {
                for destination in &node.destinations.contents {
                    if let Expression::Identifier(id) = destination {
                        declare(scopes, local_key(id));
                    }
                }
            }
        }
        Statement::Call(call) => scan_call(call),
        Statement::If(node) => {
            scan_expression(&mut node.condition);
            scoped(scopes, |scopes| mark_list(&mut node.then_block, scopes));
            for elseif in &mut node.elseifs {
                scan_expression(&mut elseif.condition);
                scoped(scopes, |scopes| mark_list(&mut elseif.then_block, scopes));
            }
            scoped(scopes, |scopes| mark_list(&mut node.else_block, scopes));
        }
        Statement::While(node) => {
            scan_expression(&mut node.condition);
            scoped(scopes, |scopes| mark_list(&mut node.statements, scopes));
        }
        Statement::RepeatUntil(node) => {
            scoped(scopes, |scopes| mark_list(&mut node.statements, scopes));
            scan_expression(&mut node.condition);
        }
        Statement::NumericFor(node) => {
            for expr in &mut node.expressions.contents {
                scan_expression(expr);
            }
            scoped(scopes, |scopes| {
                declare(scopes, local_key(&node.variable));
                mark_list(&mut node.statements, scopes);
            });
        }
        Statement::IteratorFor(node) => {
            for expr in &mut node.expressions.contents {
                scan_expression(expr);
            }
            scoped(scopes, |scopes| {
                for identifier in &node.identifiers.contents {
                    if let Expression::Identifier(id) = identifier {
                        declare(scopes, local_key(id));
                    }
                }
                mark_list(&mut node.statements, scopes);
            });
        }
        Statement::Return(node) => {
            for expr in &mut node.returns.contents {
                scan_expression(expr);
            }
        }
        Statement::Break | Statement::NoOp => {}
        Statement::Block(node) => {
            // Pre-structuring call: blocks share the function-level scope.
            for inner in &mut node.contents {
                mark_statement(inner, scopes);
            }
        }
    }
}

fn scoped<F: FnOnce(&mut Vec<AHashSet<LocalKey>>)>(scopes: &mut Vec<AHashSet<LocalKey>>, f: F) {
    scopes.push(AHashSet::new());
    f(scopes);
    scopes.pop();
}

fn declared(scopes: &[AHashSet<LocalKey>], key: &LocalKey) -> bool {
    scopes.iter().any(|scope| scope.contains(key))
}

fn declare(scopes: &mut [AHashSet<LocalKey>], key: LocalKey) {
    if let Some(scope) = scopes.last_mut() {
        scope.insert(key);
    }
}

/// Recurse into nested function definitions; everything else is scanned for
/// the functions it may contain.
fn scan_expression(expr: &mut Expression) {
    match expr {
        Expression::Function(function) => mark_local_definitions(function),
        Expression::BinaryOp(op) => {
            scan_expression(&mut op.left);
            scan_expression(&mut op.right);
        }
        Expression::UnaryOp(op) => scan_expression(&mut op.operand),
        Expression::GetItem(item) => {
            scan_expression(&mut item.key);
            scan_expression(&mut item.table);
        }
        Expression::Table(table) => {
            for record in table
                .array
                .contents
                .iter_mut()
                .chain(table.records.contents.iter_mut())
            {
                match record {
                    Record::Array(r) => scan_expression(&mut r.value),
                    Record::Keyed(r) => {
                        scan_expression(&mut r.key);
                        scan_expression(&mut r.value);
                    }
                }
            }
        }
        Expression::Call(call) => scan_call(call),
        _ => {}
    }
}

fn scan_call(call: &mut FunctionCall) {
    for argument in &mut call.arguments.contents {
        scan_expression(argument);
    }
    scan_expression(&mut call.function);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn named_local(name: &str, slot: i32) -> Expression {
        Expression::Identifier(Identifier {
            name: Some(SmolStr::new(name)),
            kind: IdentifierKind::Local,
            slot,
            id: -1,
            addr: 0,
        })
    }

    #[test]
    fn test_mark_locals_from_debug_ranges() {
        let mut function = FunctionDefinition {
            debug_locals: vec![DebugLocal {
                name: SmolStr::new("x"),
                internal: false,
                start_addr: 0,
                end_addr: 5,
            }],
            statements: StatementsList {
                contents: vec![Statement::Return(Return {
                    returns: ExpressionsList {
                        contents: vec![Expression::slot(0, 2), Expression::slot(0, 9)],
                    },
                })],
            },
            ..Default::default()
        };
        mark_locals(&mut function, false);

        let Statement::Return(ret) = &function.statements.contents[0] else {
            unreachable!();
        };
        let Expression::Identifier(covered) = &ret.returns.contents[0] else {
            unreachable!();
        };
        assert_eq!(covered.kind, IdentifierKind::Local);
        assert_eq!(covered.name.as_deref(), Some("x"));
        // Outside the range the slot stays a slot.
        let Expression::Identifier(uncovered) = &ret.returns.contents[1] else {
            unreachable!();
        };
        assert_eq!(uncovered.kind, IdentifierKind::Slot);
    }

    #[test]
    fn test_internal_ranges_do_not_name_slots() {
        let mut function = FunctionDefinition {
            debug_locals: vec![DebugLocal {
                name: SmolStr::new("(for index)"),
                internal: true,
                start_addr: 0,
                end_addr: 5,
            }],
            statements: StatementsList {
                contents: vec![Statement::Return(Return {
                    returns: ExpressionsList {
                        contents: vec![Expression::slot(0, 2)],
                    },
                })],
            },
            ..Default::default()
        };
        mark_locals(&mut function, false);
        let Statement::Return(ret) = &function.statements.contents[0] else {
            unreachable!();
        };
        assert!(matches!(
            &ret.returns.contents[0],
            Expression::Identifier(id) if id.kind == IdentifierKind::Slot
        ));
    }

    #[test]
    fn test_first_write_becomes_definition() {
        let mut function = FunctionDefinition {
            statements: StatementsList {
                contents: vec![
                    Statement::Assignment(Assignment::single(
                        named_local("x", 0),
                        Expression::Constant(Constant::Integer(1)),
                    )),
                    Statement::Assignment(Assignment::single(
                        named_local("x", 0),
                        Expression::Constant(Constant::Integer(2)),
                    )),
                ],
            },
            ..Default::default()
        };
        mark_local_definitions(&mut function);

        let kinds: Vec<AssignmentKind> = function
            .statements
            .contents
            .iter()
            .map(|s| match s {
                Statement::Assignment(a) => a.kind,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(
            kinds,
            vec![AssignmentKind::LocalDefinition, AssignmentKind::Normal]
        );
    }

    #[test]
    fn test_loop_variable_needs_no_definition() {
        let mut function = FunctionDefinition {
            statements: StatementsList {
                contents: vec![Statement::NumericFor(NumericFor {
                    variable: Identifier {
                        name: Some(SmolStr::new("i")),
                        kind: IdentifierKind::Local,
                        slot: 3,
                        id: -1,
                        addr: 0,
                    },
                    expressions: ExpressionsList::default(),
                    statements: StatementsList {
                        contents: vec![Statement::Assignment(Assignment::single(
                            named_local("i", 3),
                            Expression::Constant(Constant::Integer(0)),
                        ))],
                    },
                })],
            },
            ..Default::default()
        };
        mark_local_definitions(&mut function);

        let Statement::NumericFor(numeric_for) = &function.statements.contents[0] else {
            unreachable!();
        };
        let Statement::Assignment(assignment) = &numeric_for.statements.contents[0] else {
            unreachable!();
        };
        // Writing to the loop variable is a plain assignment, not a new local.
        assert_eq!(assignment.kind, AssignmentKind::Normal);
    }
}
