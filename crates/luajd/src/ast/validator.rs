// Structural assertions between pipeline stages.
//
// With `warped = true` the function body must be a flat list of blocks, one
// warp each, all targets resolving. With `warped = false` no blocks may
// remain, breaks must sit inside loops, returns must be final, and every
// local read must be covered by a definition in scope.

use ahash::AHashSet;
use smol_str::SmolStr;

use crate::ast::nodes::*;
use crate::error::{DecompileError, DecompileResult};

pub fn validate(function: &FunctionDefinition, warped: bool) -> DecompileResult<()> {
    if function.error.is_some() {
        // A poisoned function has an intentionally empty body.
        return Ok(());
    }
    if warped {
        validate_warped(function)
    } else {
        let mut scopes = ScopeStack::default();
        scopes.push_function(function);
        validate_statements(&function.statements, &mut scopes, false)?;
        scopes.pop();
        Ok(())
    }
}

fn validate_warped(function: &FunctionDefinition) -> DecompileResult<()> {
    let count = function.statements.contents.len();
    for (position, statement) in function.statements.contents.iter().enumerate() {
        let Statement::Block(block) = statement else {
            return Err(DecompileError::structural(format!(
                "warped body holds a non-block statement at {position}"
            )));
        };
        if block.index != position {
            return Err(DecompileError::structural(format!(
                "block index {} does not match its position {position}",
                block.index
            )));
        }
        for target in block.warp.targets() {
            if target >= count {
                return Err(DecompileError::structural(format!(
                    "block {} warps to a nonexistent block {target}",
                    block.index
                )));
            }
        }
        for inner in &block.contents {
            if matches!(inner, Statement::Block(_)) {
                return Err(DecompileError::structural(format!(
                    "nested block inside block {}",
                    block.index
                )));
            }
            check_multres_placement(inner)?;
        }
    }
    Ok(())
}

fn check_multres_placement(statement: &Statement) -> DecompileResult<()> {
    match statement {
        Statement::Return(node) => {
            let count = node.returns.contents.len();
            for (position, expr) in node.returns.contents.iter().enumerate() {
                if *expr == Expression::MultRes && position + 1 != count {
                    return Err(DecompileError::structural(
                        "MULTRES is not the last returned expression",
                    ));
                }
            }
        }
        Statement::Call(call) => check_call_multres(call)?,
        Statement::Assignment(node) => {
            let absorbs = node
                .destinations
                .contents
                .iter()
                .any(multres_absorber);
            for expr in &node.expressions.contents {
                if *expr == Expression::MultRes
                    && (!absorbs || node.expressions.contents.len() != 1)
                {
                    return Err(DecompileError::structural(
                        "MULTRES assigned without a multi-value absorber",
                    ));
                }
                if let Expression::Call(call) = expr {
                    check_call_multres(call)?;
                }
            }
        }
        _ => {}
    }
    Ok(())
}

fn multres_absorber(destination: &Expression) -> bool {
    match destination {
        Expression::MultRes => true,
        Expression::GetItem(item) => item.key == Expression::MultRes,
        _ => false,
    }
}

fn check_call_multres(call: &FunctionCall) -> DecompileResult<()> {
    let count = call.arguments.contents.len();
    for (position, argument) in call.arguments.contents.iter().enumerate() {
        if *argument == Expression::MultRes && position + 1 != count {
            return Err(DecompileError::structural(
                "MULTRES is not the last call argument",
            ));
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Unwarped validation.

#[derive(Default)]
struct ScopeStack {
    scopes: Vec<AHashSet<SmolStr>>,
    loop_depth: usize,
}

impl ScopeStack {
    fn push(&mut self) {
        self.scopes.push(AHashSet::new());
    }

    fn push_function(&mut self, function: &FunctionDefinition) {
        self.push();
        for argument in &function.arguments.contents {
            if let Some(name) = &argument.name {
                self.declare(name.clone());
            }
        }
        for name in &function.upvalue_names {
            self.declare(name.clone());
        }
    }

    fn pop(&mut self) {
        self.scopes.pop();
    }

    fn declare(&mut self, name: SmolStr) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name);
        }
    }

    fn is_declared(&self, name: &SmolStr) -> bool {
        self.scopes.iter().rev().any(|scope| scope.contains(name))
    }
}

fn validate_statements(
    list: &StatementsList,
    scopes: &mut ScopeStack,
    in_loop: bool,
) -> DecompileResult<()> {
    let count = list.contents.len();
    for (position, statement) in list.contents.iter().enumerate() {
        match statement {
            Statement::Block(_) => {
                return Err(DecompileError::structural(
                    "block statement survived unwarping",
                ));
            }
            Statement::Break => {
                if !in_loop && scopes.loop_depth == 0 {
                    return Err(DecompileError::structural("break outside of a loop"));
                }
            }
            Statement::Return(node) => {
                if position + 1 != count {
                    return Err(DecompileError::structural(
                        "return is not the final statement of its block",
                    ));
                }
                for expr in &node.returns.contents {
                    validate_expression(expr, scopes)?;
                }
            }
            Statement::Assignment(node) => {
                for expr in &node.expressions.contents {
                    validate_expression(expr, scopes)?;
                }
                if node.kind == AssignmentKind::LocalDefinition {
                    for destination in &node.destinations.contents {
                        if let Expression::Identifier(id) = destination {
                            if let Some(name) = &id.name {
                                scopes.declare(name.clone());
                            }
                        }
                    }
                } else {
                    for destination in &node.destinations.contents {
                        validate_expression(destination, scopes)?;
                    }
                }
            }
            Statement::Call(call) => {
                validate_expression(&call.function, scopes)?;
                for argument in &call.arguments.contents {
                    validate_expression(argument, scopes)?;
                }
            }
            Statement::If(node) => {
                validate_expression(&node.condition, scopes)?;
                scopes.push();
                validate_statements(&node.then_block, scopes, in_loop)?;
                scopes.pop();
                for elseif in &node.elseifs {
                    validate_expression(&elseif.condition, scopes)?;
                    scopes.push();
                    validate_statements(&elseif.then_block, scopes, in_loop)?;
                    scopes.pop();
                }
                scopes.push();
                validate_statements(&node.else_block, scopes, in_loop)?;
                scopes.pop();
            }
            Statement::While(node) => {
                validate_expression(&node.condition, scopes)?;
                scopes.push();
                scopes.loop_depth += 1;
                validate_statements(&node.statements, scopes, true)?;
                scopes.loop_depth -= 1;
                scopes.pop();
            }
            Statement::RepeatUntil(node) => {
                scopes.push();
                scopes.loop_depth += 1;
                validate_statements(&node.statements, scopes, true)?;
                validate_expression(&node.condition, scopes)?;
                scopes.loop_depth -= 1;
                scopes.pop();
            }
            Statement::NumericFor(node) => {
                for expr in &node.expressions.contents {
                    validate_expression(expr, scopes)?;
                }
                scopes.push();
                if let Some(name) = &node.variable.name {
                    scopes.declare(name.clone());
                }
                scopes.loop_depth += 1;
                validate_statements(&node.statements, scopes, true)?;
                scopes.loop_depth -= 1;
                scopes.pop();
            }
            Statement::IteratorFor(node) => {
                for expr in &node.expressions.contents {
                    validate_expression(expr, scopes)?;
                }
                scopes.push();
                for identifier in &node.identifiers.contents {
                    if let Expression::Identifier(id) = identifier {
                        if let Some(name) = &id.name {
                            scopes.declare(name.clone());
                        }
                    }
                }
                scopes.loop_depth += 1;
                validate_statements(&node.statements, scopes, true)?;
                scopes.loop_depth -= 1;
                scopes.pop();
            }
            Statement::NoOp => {}
        }
    }
    Ok(())
}

fn validate_expression(expr: &Expression, scopes: &mut ScopeStack) -> DecompileResult<()> {
    match expr {
        Expression::Identifier(id) => {
            if id.kind == IdentifierKind::Local {
                match &id.name {
                    Some(name) if scopes.is_declared(name) => {}
                    Some(name) => {
                        return Err(DecompileError::structural(format!(
                            "local '{name}' read without a covering definition"
                        )));
                    }
                    None => {
                        return Err(DecompileError::structural(
                            "local identifier without a resolved name",
                        ));
                    }
                }
            }
            Ok(())
        }
        Expression::BinaryOp(op) => {
            validate_expression(&op.left, scopes)?;
            validate_expression(&op.right, scopes)
        }
        Expression::UnaryOp(op) => validate_expression(&op.operand, scopes),
        Expression::GetItem(item) => {
            validate_expression(&item.key, scopes)?;
            validate_expression(&item.table, scopes)
        }
        Expression::Table(table) => {
            for record in table
                .array
                .contents
                .iter()
                .chain(table.records.contents.iter())
            {
                match record {
                    Record::Array(r) => validate_expression(&r.value, scopes)?,
                    Record::Keyed(r) => {
                        validate_expression(&r.key, scopes)?;
                        validate_expression(&r.value, scopes)?;
                    }
                }
            }
            Ok(())
        }
        Expression::Call(call) => {
            validate_expression(&call.function, scopes)?;
            for argument in &call.arguments.contents {
                validate_expression(argument, scopes)?;
            }
            Ok(())
        }
        Expression::Function(function) => {
            // Nested functions carry their own scopes; locals from enclosing
            // functions arrive as upvalues.
            validate(function, false)
        }
        _ => Ok(()),
    }
}
