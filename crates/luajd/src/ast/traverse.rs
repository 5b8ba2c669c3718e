// Mutable visitor over the AST.
//
// Hooks come in enter/leave pairs per node kind; the free walk_* functions
// provide the default recursion, which follows execution order of the
// generated code: call arguments before the callee, table keys before the
// table, assignment sources before destinations, repeat bodies before their
// condition. Warp targets are block indices and are never traversed.

use crate::ast::nodes::*;

#[allow(unused_variables)]
pub trait VisitorMut {
    // Generic hooks, called before the per-kind pair. They receive the
    // enclosing enum so a pass can replace the node wholesale.
    fn enter_statement(&mut self, statement: &mut Statement) {}
    fn leave_statement(&mut self, statement: &mut Statement) {}
    fn enter_expression(&mut self, expression: &mut Expression) {}
    fn leave_expression(&mut self, expression: &mut Expression) {}

    fn enter_function_definition(&mut self, node: &mut FunctionDefinition) {}
    fn leave_function_definition(&mut self, node: &mut FunctionDefinition) {}

    fn enter_statements_list(&mut self, node: &mut StatementsList) {}
    fn leave_statements_list(&mut self, node: &mut StatementsList) {}

    fn enter_block(&mut self, node: &mut Block) {}
    fn leave_block(&mut self, node: &mut Block) {}

    fn enter_assignment(&mut self, node: &mut Assignment) {}
    fn leave_assignment(&mut self, node: &mut Assignment) {}

    fn enter_if(&mut self, node: &mut If) {}
    fn leave_if(&mut self, node: &mut If) {}

    fn enter_elseif(&mut self, node: &mut ElseIf) {}
    fn leave_elseif(&mut self, node: &mut ElseIf) {}

    fn enter_while(&mut self, node: &mut While) {}
    fn leave_while(&mut self, node: &mut While) {}

    fn enter_repeat_until(&mut self, node: &mut RepeatUntil) {}
    fn leave_repeat_until(&mut self, node: &mut RepeatUntil) {}

    fn enter_numeric_for(&mut self, node: &mut NumericFor) {}
    fn leave_numeric_for(&mut self, node: &mut NumericFor) {}

    fn enter_iterator_for(&mut self, node: &mut IteratorFor) {}
    fn leave_iterator_for(&mut self, node: &mut IteratorFor) {}

    fn enter_return(&mut self, node: &mut Return) {}
    fn leave_return(&mut self, node: &mut Return) {}

    fn enter_break(&mut self) {}
    fn leave_break(&mut self) {}

    fn enter_function_call(&mut self, node: &mut FunctionCall) {}
    fn leave_function_call(&mut self, node: &mut FunctionCall) {}

    fn enter_binary_operator(&mut self, node: &mut BinaryOperator) {}
    fn leave_binary_operator(&mut self, node: &mut BinaryOperator) {}

    fn enter_unary_operator(&mut self, node: &mut UnaryOperator) {}
    fn leave_unary_operator(&mut self, node: &mut UnaryOperator) {}

    fn enter_get_item(&mut self, node: &mut GetItem) {}
    fn leave_get_item(&mut self, node: &mut GetItem) {}

    fn enter_table_constructor(&mut self, node: &mut TableConstructor) {}
    fn leave_table_constructor(&mut self, node: &mut TableConstructor) {}

    fn enter_array_record(&mut self, node: &mut ArrayRecord) {}
    fn leave_array_record(&mut self, node: &mut ArrayRecord) {}

    fn enter_table_record(&mut self, node: &mut TableRecord) {}
    fn leave_table_record(&mut self, node: &mut TableRecord) {}

    fn visit_identifier(&mut self, node: &mut Identifier) {}
    fn visit_constant(&mut self, node: &mut Constant) {}
    fn visit_primitive(&mut self, node: &mut Primitive) {}
    fn visit_vararg(&mut self) {}
    fn visit_multres(&mut self) {}

    fn enter_unconditional_warp(&mut self, node: &mut UnconditionalWarp) {}
    fn leave_unconditional_warp(&mut self, node: &mut UnconditionalWarp) {}

    fn enter_conditional_warp(&mut self, node: &mut ConditionalWarp) {}
    fn leave_conditional_warp(&mut self, node: &mut ConditionalWarp) {}

    fn enter_iterator_warp(&mut self, node: &mut IteratorWarp) {}
    fn leave_iterator_warp(&mut self, node: &mut IteratorWarp) {}

    fn enter_numeric_loop_warp(&mut self, node: &mut NumericLoopWarp) {}
    fn leave_numeric_loop_warp(&mut self, node: &mut NumericLoopWarp) {}

    fn visit_end_warp(&mut self) {}
}

pub fn walk_function<V: VisitorMut + ?Sized>(v: &mut V, node: &mut FunctionDefinition) {
    v.enter_function_definition(node);
    for argument in &mut node.arguments.contents {
        v.visit_identifier(argument);
    }
    walk_statements_list(v, &mut node.statements);
    v.leave_function_definition(node);
}

pub fn walk_statements_list<V: VisitorMut + ?Sized>(v: &mut V, node: &mut StatementsList) {
    v.enter_statements_list(node);
    for statement in &mut node.contents {
        walk_statement(v, statement);
    }
    v.leave_statements_list(node);
}

pub fn walk_statement<V: VisitorMut + ?Sized>(v: &mut V, statement: &mut Statement) {
    v.enter_statement(statement);
    match statement {
        Statement::Assignment(node) => {
            v.enter_assignment(node);
            walk_expressions(v, &mut node.expressions.contents);
            walk_expressions(v, &mut node.destinations.contents);
            v.leave_assignment(node);
        }
        Statement::Call(node) => walk_call(v, node),
        Statement::If(node) => {
            v.enter_if(node);
            walk_expression(v, &mut node.condition);
            walk_statements_list(v, &mut node.then_block);
            for elseif in &mut node.elseifs {
                v.enter_elseif(elseif);
                walk_expression(v, &mut elseif.condition);
                walk_statements_list(v, &mut elseif.then_block);
                v.leave_elseif(elseif);
            }
            walk_statements_list(v, &mut node.else_block);
            v.leave_if(node);
        }
        Statement::While(node) => {
            v.enter_while(node);
            walk_expression(v, &mut node.condition);
            walk_statements_list(v, &mut node.statements);
            v.leave_while(node);
        }
        Statement::RepeatUntil(node) => {
            v.enter_repeat_until(node);
            walk_statements_list(v, &mut node.statements);
            walk_expression(v, &mut node.condition);
            v.leave_repeat_until(node);
        }
        Statement::NumericFor(node) => {
            v.enter_numeric_for(node);
            v.visit_identifier(&mut node.variable);
            walk_expressions(v, &mut node.expressions.contents);
            walk_statements_list(v, &mut node.statements);
            v.leave_numeric_for(node);
        }
        Statement::IteratorFor(node) => {
            v.enter_iterator_for(node);
            walk_expressions(v, &mut node.expressions.contents);
            walk_expressions(v, &mut node.identifiers.contents);
            walk_statements_list(v, &mut node.statements);
            v.leave_iterator_for(node);
        }
        Statement::Return(node) => {
            v.enter_return(node);
            walk_expressions(v, &mut node.returns.contents);
            v.leave_return(node);
        }
        Statement::Break => {
            v.enter_break();
            v.leave_break();
        }
        Statement::Block(node) => walk_block(v, node),
        Statement::NoOp => {}
    }
    v.leave_statement(statement);
}

pub fn walk_block<V: VisitorMut + ?Sized>(v: &mut V, node: &mut Block) {
    v.enter_block(node);
    for statement in &mut node.contents {
        walk_statement(v, statement);
    }
    walk_warp(v, &mut node.warp);
    v.leave_block(node);
}

pub fn walk_warp<V: VisitorMut + ?Sized>(v: &mut V, warp: &mut Warp) {
    match warp {
        Warp::Unconditional(node) => {
            v.enter_unconditional_warp(node);
            v.leave_unconditional_warp(node);
        }
        Warp::Conditional(node) => {
            v.enter_conditional_warp(node);
            walk_expression(v, &mut node.condition);
            v.leave_conditional_warp(node);
        }
        Warp::Iterator(node) => {
            v.enter_iterator_warp(node);
            walk_expressions(v, &mut node.variables.contents);
            walk_expressions(v, &mut node.controls.contents);
            v.leave_iterator_warp(node);
        }
        Warp::NumericLoop(node) => {
            v.enter_numeric_loop_warp(node);
            v.visit_identifier(&mut node.index);
            walk_expressions(v, &mut node.controls.contents);
            v.leave_numeric_loop_warp(node);
        }
        Warp::End => v.visit_end_warp(),
    }
}

pub fn walk_expressions<V: VisitorMut + ?Sized>(v: &mut V, expressions: &mut [Expression]) {
    for expression in expressions {
        walk_expression(v, expression);
    }
}

pub fn walk_expression<V: VisitorMut + ?Sized>(v: &mut V, expression: &mut Expression) {
    v.enter_expression(expression);
    match expression {
        Expression::Identifier(node) => v.visit_identifier(node),
        Expression::Constant(node) => v.visit_constant(node),
        Expression::Primitive(node) => v.visit_primitive(node),
        Expression::BinaryOp(node) => {
            v.enter_binary_operator(node);
            walk_expression(v, &mut node.left);
            walk_expression(v, &mut node.right);
            v.leave_binary_operator(node);
        }
        Expression::UnaryOp(node) => {
            v.enter_unary_operator(node);
            walk_expression(v, &mut node.operand);
            v.leave_unary_operator(node);
        }
        Expression::GetItem(node) => {
            v.enter_get_item(node);
            walk_expression(v, &mut node.key);
            walk_expression(v, &mut node.table);
            v.leave_get_item(node);
        }
        Expression::Table(node) => {
            v.enter_table_constructor(node);
            walk_records(v, &mut node.array);
            walk_records(v, &mut node.records);
            v.leave_table_constructor(node);
        }
        Expression::Call(node) => walk_call(v, node),
        Expression::Function(node) => walk_function(v, node),
        Expression::Vararg => v.visit_vararg(),
        Expression::MultRes => v.visit_multres(),
    }
    v.leave_expression(expression);
}

fn walk_records<V: VisitorMut + ?Sized>(v: &mut V, records: &mut RecordsList) {
    for record in &mut records.contents {
        match record {
            Record::Array(node) => {
                v.enter_array_record(node);
                walk_expression(v, &mut node.value);
                v.leave_array_record(node);
            }
            Record::Keyed(node) => {
                v.enter_table_record(node);
                walk_expression(v, &mut node.key);
                walk_expression(v, &mut node.value);
                v.leave_table_record(node);
            }
        }
    }
}

fn walk_call<V: VisitorMut + ?Sized>(v: &mut V, node: &mut FunctionCall) {
    v.enter_function_call(node);
    walk_expressions(v, &mut node.arguments.contents);
    walk_expression(v, &mut node.function);
    v.leave_function_call(node);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::nodes::{BinOpKind, Constant};

    #[derive(Default)]
    struct OrderProbe {
        events: Vec<String>,
    }

    impl VisitorMut for OrderProbe {
        fn visit_identifier(&mut self, node: &mut Identifier) {
            self.events.push(format!("ident:{}", node.slot));
        }

        fn visit_constant(&mut self, node: &mut Constant) {
            if let Constant::String(s) = node {
                self.events.push(format!("const:{s}"));
            }
        }

        fn enter_function_call(&mut self, _node: &mut FunctionCall) {
            self.events.push("call".into());
        }
    }

    #[test]
    fn test_call_visits_arguments_before_function() {
        let mut call = FunctionCall {
            function: Expression::slot(0, 0),
            arguments: ExpressionsList {
                contents: vec![Expression::slot(1, 0), Expression::slot(2, 0)],
            },
            is_method: false,
        };
        let mut probe = OrderProbe::default();
        walk_call(&mut probe, &mut call);
        assert_eq!(probe.events, vec!["call", "ident:1", "ident:2", "ident:0"]);
    }

    #[test]
    fn test_get_item_visits_key_before_table() {
        let mut expr = Expression::index(
            Expression::slot(4, 0),
            Expression::Constant(Constant::String("k".into())),
        );
        let mut probe = OrderProbe::default();
        walk_expression(&mut probe, &mut expr);
        assert_eq!(probe.events, vec!["const:k", "ident:4"]);
    }

    #[test]
    fn test_warp_targets_not_traversed() {
        // A conditional warp's condition is visited, its targets are plain
        // indices with nothing to recurse into.
        let mut block = Block {
            index: 0,
            first_address: 0,
            last_address: 0,
            contents: vec![],
            warp: Warp::Conditional(ConditionalWarp {
                condition: Expression::slot(9, 0),
                true_target: 1,
                false_target: 2,
            }),
            warpins_count: 0,
        };
        let mut probe = OrderProbe::default();
        walk_block(&mut probe, &mut block);
        assert_eq!(probe.events, vec!["ident:9"]);
    }
}
