// Prints an emitter-ready AST as Lua 5.1 source text.
//
// Two-space indentation, strings requoted with double quotes and decimal
// escapes, numbers in shortest round-tripping form, parentheses inserted
// from operator precedence only where grouping demands them.

use std::fmt::{self, Write};

use crate::ast::nodes::*;

/// Write a decompiled chunk: the top-level function's body at indent zero.
pub fn write_chunk<W: Write>(out: &mut W, chunk: &FunctionDefinition) -> fmt::Result {
    let mut writer = LuaWriter { out, indent: 0 };
    if let Some(error) = &chunk.error {
        return writer.line(&format!("-- decompilation error: {error}"));
    }
    writer.statements(&chunk.statements)
}

struct LuaWriter<'a, W: Write> {
    out: &'a mut W,
    indent: usize,
}

impl<'a, W: Write> LuaWriter<'a, W> {
    fn line(&mut self, text: &str) -> fmt::Result {
        self.write_indent()?;
        self.out.write_str(text)?;
        self.out.write_char('\n')
    }

    fn write_indent(&mut self) -> fmt::Result {
        for _ in 0..self.indent {
            self.out.write_str("  ")?;
        }
        Ok(())
    }

    fn statements(&mut self, list: &StatementsList) -> fmt::Result {
        for statement in &list.contents {
            self.statement(statement)?;
        }
        Ok(())
    }

    fn statement(&mut self, statement: &Statement) -> fmt::Result {
        match statement {
            Statement::Assignment(node) => self.assignment(node),
            Statement::Call(call) => {
                self.write_indent()?;
                self.call(call)?;
                self.out.write_char('\n')
            }
            Statement::If(node) => self.if_statement(node),
            Statement::While(node) => {
                self.write_indent()?;
                self.out.write_str("while ")?;
                self.expression(&node.condition, 0)?;
                self.out.write_str(" do\n")?;
                self.indented(&node.statements)?;
                self.line("end")
            }
            Statement::RepeatUntil(node) => {
                self.line("repeat")?;
                self.indented(&node.statements)?;
                self.write_indent()?;
                self.out.write_str("until ")?;
                self.expression(&node.condition, 0)?;
                self.out.write_char('\n')
            }
            Statement::NumericFor(node) => self.numeric_for(node),
            Statement::IteratorFor(node) => self.iterator_for(node),
            Statement::Return(node) => {
                self.write_indent()?;
                self.out.write_str("return")?;
                for (position, value) in node.returns.contents.iter().enumerate() {
                    self.out.write_str(if position == 0 { " " } else { ", " })?;
                    self.expression(value, 0)?;
                }
                self.out.write_char('\n')
            }
            Statement::Break => self.line("break"),
            Statement::NoOp => Ok(()),
            Statement::Block(block) => {
                // Must not survive unwarping.
                self.line(&format!("-- unreduced block {}", block.index))?;
                for inner in &block.contents {
                    self.statement(inner)?;
                }
                Ok(())
            }
        }
    }

    fn indented(&mut self, list: &StatementsList) -> fmt::Result {
        self.indent += 1;
        self.statements(list)?;
        self.indent -= 1;
        Ok(())
    }

    fn assignment(&mut self, node: &Assignment) -> fmt::Result {
        // Function-definition sugar.
        if let [destination] = node.destinations.contents.as_slice() {
            if let [Expression::Function(function)] = node.expressions.contents.as_slice() {
                if let Some(path) = function_path(destination) {
                    self.write_indent()?;
                    if node.kind == AssignmentKind::LocalDefinition {
                        self.out.write_str("local ")?;
                    }
                    self.out.write_str("function ")?;
                    self.out.write_str(&path)?;
                    self.function_tail(function)?;
                    return self.out.write_char('\n');
                }
            }
        }

        self.write_indent()?;
        // A value evaluated for nothing keeps only its expression.
        if node.destinations.contents.is_empty() {
            for (position, value) in node.expressions.contents.iter().enumerate() {
                if position > 0 {
                    self.out.write_str(", ")?;
                }
                self.expression(value, 0)?;
            }
            return self.out.write_char('\n');
        }
        if node.kind == AssignmentKind::LocalDefinition {
            self.out.write_str("local ")?;
        }
        for (position, destination) in node.destinations.contents.iter().enumerate() {
            if position > 0 {
                self.out.write_str(", ")?;
            }
            self.expression(destination, 0)?;
        }
        // A definition initialized to nothing: `local a, b`.
        let implicit_nil = node.kind == AssignmentKind::LocalDefinition
            && matches!(
                node.expressions.contents.as_slice(),
                [value] if *value == Expression::nil()
            )
            && node.destinations.contents.len() > 1;
        if !implicit_nil {
            self.out.write_str(" = ")?;
            for (position, value) in node.expressions.contents.iter().enumerate() {
                if position > 0 {
                    self.out.write_str(", ")?;
                }
                self.expression(value, 0)?;
            }
        }
        self.out.write_char('\n')
    }

    fn if_statement(&mut self, node: &If) -> fmt::Result {
        self.write_indent()?;
        self.out.write_str("if ")?;
        self.expression(&node.condition, 0)?;
        self.out.write_str(" then\n")?;
        self.indented(&node.then_block)?;
        for elseif in &node.elseifs {
            self.write_indent()?;
            self.out.write_str("elseif ")?;
            self.expression(&elseif.condition, 0)?;
            self.out.write_str(" then\n")?;
            self.indented(&elseif.then_block)?;
        }
        if !node.else_block.is_empty() {
            self.line("else")?;
            self.indented(&node.else_block)?;
        }
        self.line("end")
    }

    fn numeric_for(&mut self, node: &NumericFor) -> fmt::Result {
        self.write_indent()?;
        self.out.write_str("for ")?;
        self.identifier(&node.variable)?;
        self.out.write_str(" = ")?;
        let controls = &node.expressions.contents;
        for (position, value) in controls.iter().enumerate() {
            // An implicit step of 1 is not spelled out.
            if position == 2 && *value == Expression::Constant(Constant::Integer(1)) {
                break;
            }
            if position > 0 {
                self.out.write_str(", ")?;
            }
            self.expression(value, 0)?;
        }
        self.out.write_str(" do\n")?;
        self.indented(&node.statements)?;
        self.line("end")
    }

    fn iterator_for(&mut self, node: &IteratorFor) -> fmt::Result {
        self.write_indent()?;
        self.out.write_str("for ")?;
        for (position, identifier) in node.identifiers.contents.iter().enumerate() {
            if position > 0 {
                self.out.write_str(", ")?;
            }
            self.expression(identifier, 0)?;
        }
        self.out.write_str(" in ")?;
        for (position, value) in node.expressions.contents.iter().enumerate() {
            if position > 0 {
                self.out.write_str(", ")?;
            }
            self.expression(value, 0)?;
        }
        self.out.write_str(" do\n")?;
        self.indented(&node.statements)?;
        self.line("end")
    }

    // -- expressions -------------------------------------------------------

    /// `parent_precedence` is the binding strength of the context; a weaker
    /// child gets parenthesized.
    fn expression(&mut self, expr: &Expression, parent_precedence: u8) -> fmt::Result {
        match expr {
            Expression::Identifier(id) => self.identifier(id),
            Expression::Constant(constant) => self.constant(constant),
            Expression::Primitive(Primitive::Nil) => self.out.write_str("nil"),
            Expression::Primitive(Primitive::True) => self.out.write_str("true"),
            Expression::Primitive(Primitive::False) => self.out.write_str("false"),
            Expression::Vararg | Expression::MultRes => self.out.write_str("..."),
            Expression::BinaryOp(op) => {
                let precedence = op.kind.precedence();
                let parens = precedence < parent_precedence;
                if parens {
                    self.out.write_char('(')?;
                }
                let (left_context, right_context) = if op.kind.is_right_associative() {
                    (precedence + 1, precedence)
                } else {
                    (precedence, precedence + 1)
                };
                self.expression(&op.left, left_context)?;
                write!(self.out, " {} ", op.kind.token())?;
                self.expression(&op.right, right_context)?;
                if parens {
                    self.out.write_char(')')?;
                }
                Ok(())
            }
            Expression::UnaryOp(op) => {
                // The coercion forms read as calls, not operators.
                if matches!(op.kind, UnOpKind::ToString | UnOpKind::ToNumber) {
                    self.out.write_str(op.kind.token())?;
                    self.out.write_char('(')?;
                    self.expression(&op.operand, 0)?;
                    return self.out.write_char(')');
                }
                let parens = PR_UNARY < parent_precedence;
                if parens {
                    self.out.write_char('(')?;
                }
                self.out.write_str(op.kind.token())?;
                // `- -x` must not merge into a comment token.
                let operand_parens = matches!(
                    &op.operand,
                    Expression::UnaryOp(inner)
                        if inner.kind == UnOpKind::Minus && op.kind == UnOpKind::Minus
                );
                if operand_parens {
                    self.out.write_char('(')?;
                    self.expression(&op.operand, 0)?;
                    self.out.write_char(')')?;
                } else {
                    self.expression(&op.operand, PR_UNARY)?;
                }
                if parens {
                    self.out.write_char(')')?;
                }
                Ok(())
            }
            Expression::GetItem(item) => self.get_item(item),
            Expression::Table(table) => self.table(table),
            Expression::Call(call) => self.call(call),
            Expression::Function(function) => {
                self.out.write_str("function")?;
                self.function_tail(function)
            }
        }
    }

    fn identifier(&mut self, id: &Identifier) -> fmt::Result {
        match (&id.name, id.kind) {
            (Some(name), IdentifierKind::Local)
            | (Some(name), IdentifierKind::Upvalue)
            | (Some(name), IdentifierKind::Builtin) => self.out.write_str(name),
            _ => {
                write!(self.out, "slot{}", id.slot)?;
                if id.id >= 0 {
                    write!(self.out, "_{}", id.id)?;
                }
                Ok(())
            }
        }
    }

    fn constant(&mut self, constant: &Constant) -> fmt::Result {
        match constant {
            Constant::Integer(value) => {
                let mut buffer = itoa::Buffer::new();
                self.out.write_str(buffer.format(*value))
            }
            Constant::Float(value) => self.number(*value),
            Constant::String(value) => self.quoted(value),
            Constant::CData(CData::I64(value)) => {
                let mut buffer = itoa::Buffer::new();
                self.out.write_str(buffer.format(*value))?;
                self.out.write_str("LL")
            }
            Constant::CData(CData::U64(value)) => {
                let mut buffer = itoa::Buffer::new();
                self.out.write_str(buffer.format(*value))?;
                self.out.write_str("ULL")
            }
            Constant::CData(CData::Complex { real, imaginary }) => {
                self.number(*real)?;
                if *imaginary >= 0.0 {
                    self.out.write_char('+')?;
                }
                self.number(*imaginary)?;
                self.out.write_char('i')
            }
        }
    }

    fn number(&mut self, value: f64) -> fmt::Result {
        if value.is_nan() {
            self.out.write_str("(0 / 0)")
        } else if value.is_infinite() {
            self.out
                .write_str(if value > 0.0 { "(1 / 0)" } else { "(-1 / 0)" })
        } else {
            // Rust's shortest round-trip formatting.
            write!(self.out, "{value}")
        }
    }

    fn quoted(&mut self, value: &str) -> fmt::Result {
        self.out.write_char('"')?;
        for c in value.chars() {
            match c {
                '\\' => self.out.write_str("\\\\")?,
                '"' => self.out.write_str("\\\"")?,
                '\n' => self.out.write_str("\\n")?,
                '\r' => self.out.write_str("\\r")?,
                '\t' => self.out.write_str("\\t")?,
                c if c.is_control() => write!(self.out, "\\{:03}", c as u32)?,
                c => self.out.write_char(c)?,
            }
        }
        self.out.write_char('"')
    }

    fn get_item(&mut self, item: &GetItem) -> fmt::Result {
        // Global access: `_env.name` is a bare `name`.
        if is_environment(&item.table) {
            if let Expression::Constant(Constant::String(name)) = &item.key {
                if crate::ast::mutator::is_identifier_name(name) {
                    return self.out.write_str(name);
                }
            }
            self.out.write_str("_G[")?;
            self.expression(&item.key, 0)?;
            return self.out.write_char(']');
        }

        self.prefix_expression(&item.table)?;
        if let Expression::Constant(Constant::String(name)) = &item.key {
            if crate::ast::mutator::is_identifier_name(name) {
                self.out.write_char('.')?;
                return self.out.write_str(name);
            }
        }
        self.out.write_char('[')?;
        self.expression(&item.key, 0)?;
        self.out.write_char(']')
    }

    fn table(&mut self, table: &TableConstructor) -> fmt::Result {
        if table.array.contents.is_empty() && table.records.contents.is_empty() {
            return self.out.write_str("{}");
        }
        self.out.write_char('{')?;
        let mut first = true;
        for record in &table.array.contents {
            if !first {
                self.out.write_str(", ")?;
            }
            first = false;
            match record {
                Record::Array(r) => self.expression(&r.value, 0)?,
                Record::Keyed(r) => self.keyed_record(r)?,
            }
        }
        for record in &table.records.contents {
            if !first {
                self.out.write_str(", ")?;
            }
            first = false;
            match record {
                Record::Array(r) => self.expression(&r.value, 0)?,
                Record::Keyed(r) => self.keyed_record(r)?,
            }
        }
        self.out.write_char('}')
    }

    fn keyed_record(&mut self, record: &TableRecord) -> fmt::Result {
        if let Expression::Constant(Constant::String(name)) = &record.key {
            if crate::ast::mutator::is_identifier_name(name) {
                self.out.write_str(name)?;
                self.out.write_str(" = ")?;
                return self.expression(&record.value, 0);
            }
        }
        self.out.write_char('[')?;
        self.expression(&record.key, 0)?;
        self.out.write_str("] = ")?;
        self.expression(&record.value, 0)
    }

    fn call(&mut self, call: &FunctionCall) -> fmt::Result {
        let mut arguments: &[Expression] = &call.arguments.contents;
        if call.is_method {
            if let Expression::GetItem(item) = &call.function {
                if let Expression::Constant(Constant::String(name)) = &item.key {
                    self.prefix_expression(&item.table)?;
                    self.out.write_char(':')?;
                    self.out.write_str(name)?;
                    arguments = &arguments[1..];
                    return self.argument_list(arguments);
                }
            }
        }
        self.prefix_expression(&call.function)?;
        self.argument_list(arguments)
    }

    fn argument_list(&mut self, arguments: &[Expression]) -> fmt::Result {
        self.out.write_char('(')?;
        for (position, argument) in arguments.iter().enumerate() {
            if position > 0 {
                self.out.write_str(", ")?;
            }
            self.expression(argument, 0)?;
        }
        self.out.write_char(')')
    }

    /// Lua's prefix expressions (names, indexes, calls) stand alone; other
    /// callees and tables need parentheses.
    fn prefix_expression(&mut self, expr: &Expression) -> fmt::Result {
        match expr {
            Expression::Identifier(_) | Expression::GetItem(_) | Expression::Call(_) => {
                self.expression(expr, 0)
            }
            _ => {
                self.out.write_char('(')?;
                self.expression(expr, 0)?;
                self.out.write_char(')')
            }
        }
    }

    fn function_tail(&mut self, function: &FunctionDefinition) -> fmt::Result {
        self.out.write_char('(')?;
        let mut first = true;
        for argument in &function.arguments.contents {
            if !first {
                self.out.write_str(", ")?;
            }
            first = false;
            self.identifier(argument)?;
        }
        if function.is_vararg {
            if !first {
                self.out.write_str(", ")?;
            }
            self.out.write_str("...")?;
        }
        self.out.write_str(")\n")?;
        self.indent += 1;
        if let Some(error) = &function.error {
            self.line(&format!("-- decompilation error: {error}"))?;
        } else {
            self.statements(&function.statements)?;
        }
        self.indent -= 1;
        self.write_indent()?;
        self.out.write_str("end")
    }
}

/// A simple name path usable after the `function` keyword.
fn function_path(destination: &Expression) -> Option<String> {
    match destination {
        Expression::Identifier(id) => match (&id.name, id.kind) {
            (Some(name), IdentifierKind::Local) | (Some(name), IdentifierKind::Upvalue) => {
                Some(name.to_string())
            }
            _ => None,
        },
        Expression::GetItem(item) => {
            let Expression::Constant(Constant::String(name)) = &item.key else {
                return None;
            };
            if !crate::ast::mutator::is_identifier_name(name) {
                return None;
            }
            if is_environment(&item.table) {
                return Some(name.to_string());
            }
            let base = function_path(&item.table)?;
            Some(format!("{base}.{name}"))
        }
        _ => None,
    }
}

fn is_environment(expr: &Expression) -> bool {
    matches!(
        expr,
        Expression::Identifier(id)
            if id.kind == IdentifierKind::Builtin && id.name.as_deref() == Some("_env")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render_statement(statement: Statement) -> String {
        let function = FunctionDefinition {
            statements: StatementsList {
                contents: vec![statement],
            },
            ..Default::default()
        };
        let mut out = String::new();
        write_chunk(&mut out, &function).unwrap();
        out
    }

    fn render_expression(expr: Expression) -> String {
        let text = render_statement(Statement::Return(Return {
            returns: ExpressionsList {
                contents: vec![expr],
            },
        }));
        text.trim_end()
            .strip_prefix("return ")
            .unwrap()
            .to_string()
    }

    fn int(value: i64) -> Expression {
        Expression::Constant(Constant::Integer(value))
    }

    #[test]
    fn test_precedence_no_spurious_parens() {
        // 1 + 2 * 3 keeps its natural grouping without parentheses.
        let expr = Expression::binary(
            BinOpKind::Add,
            int(1),
            Expression::binary(BinOpKind::Multiply, int(2), int(3)),
        );
        assert_eq!(render_expression(expr), "1 + 2 * 3");
    }

    #[test]
    fn test_precedence_forced_parens() {
        // (1 + 2) * 3 needs them.
        let expr = Expression::binary(
            BinOpKind::Multiply,
            Expression::binary(BinOpKind::Add, int(1), int(2)),
            int(3),
        );
        assert_eq!(render_expression(expr), "(1 + 2) * 3");
    }

    #[test]
    fn test_subtraction_right_grouping() {
        // 1 - (2 - 3) must keep its parentheses, 1 - 2 - 3 must not gain any.
        let grouped = Expression::binary(
            BinOpKind::Subtract,
            int(1),
            Expression::binary(BinOpKind::Subtract, int(2), int(3)),
        );
        assert_eq!(render_expression(grouped), "1 - (2 - 3)");

        let flat = Expression::binary(
            BinOpKind::Subtract,
            Expression::binary(BinOpKind::Subtract, int(1), int(2)),
            int(3),
        );
        assert_eq!(render_expression(flat), "1 - 2 - 3");
    }

    #[test]
    fn test_pow_right_associative() {
        // 2 ^ 3 ^ 4 groups right; the right-nested tree needs no parens.
        let right_nested = Expression::binary(
            BinOpKind::Pow,
            int(2),
            Expression::binary(BinOpKind::Pow, int(3), int(4)),
        );
        assert_eq!(render_expression(right_nested), "2 ^ 3 ^ 4");

        let left_nested = Expression::binary(
            BinOpKind::Pow,
            Expression::binary(BinOpKind::Pow, int(2), int(3)),
            int(4),
        );
        assert_eq!(render_expression(left_nested), "(2 ^ 3) ^ 4");
    }

    #[test]
    fn test_concat_left_grouped() {
        let left_nested = Expression::binary(
            BinOpKind::Concat,
            Expression::binary(
                BinOpKind::Concat,
                Expression::Constant(Constant::String("a".into())),
                Expression::Constant(Constant::String("b".into())),
            ),
            Expression::Constant(Constant::String("c".into())),
        );
        assert_eq!(render_expression(left_nested), "\"a\" .. \"b\" .. \"c\"");
    }

    #[test]
    fn test_string_escapes() {
        let expr = Expression::Constant(Constant::String("a\"b\n\u{1}".into()));
        assert_eq!(render_expression(expr), "\"a\\\"b\\n\\001\"");
    }

    #[test]
    fn test_global_sugar() {
        let expr = Expression::index(
            Expression::Identifier(Identifier::builtin("_env")),
            Expression::Constant(Constant::String("print".into())),
        );
        assert_eq!(render_expression(expr), "print");
    }

    #[test]
    fn test_awkward_global_key() {
        let expr = Expression::index(
            Expression::Identifier(Identifier::builtin("_env")),
            Expression::Constant(Constant::String("a b".into())),
        );
        assert_eq!(render_expression(expr), "_G[\"a b\"]");
    }

    #[test]
    fn test_local_definition() {
        let mut assignment = Assignment::single(
            Expression::Identifier(Identifier {
                name: Some("x".into()),
                kind: IdentifierKind::Local,
                slot: 0,
                id: -1,
                addr: 0,
            }),
            int(7),
        );
        assignment.kind = AssignmentKind::LocalDefinition;
        assert_eq!(
            render_statement(Statement::Assignment(assignment)),
            "local x = 7\n"
        );
    }

    #[test]
    fn test_numeric_for_omits_unit_step() {
        let statement = Statement::NumericFor(NumericFor {
            variable: Identifier {
                name: Some("i".into()),
                kind: IdentifierKind::Local,
                slot: 3,
                id: -1,
                addr: 0,
            },
            expressions: ExpressionsList {
                contents: vec![int(1), int(10), int(1)],
            },
            statements: StatementsList {
                contents: vec![Statement::Break],
            },
        });
        assert_eq!(
            render_statement(statement),
            "for i = 1, 10 do\n  break\nend\n"
        );
    }

    #[test]
    fn test_method_call() {
        let receiver = Expression::Identifier(Identifier {
            name: Some("obj".into()),
            kind: IdentifierKind::Local,
            slot: 0,
            id: -1,
            addr: 0,
        });
        let call = FunctionCall {
            function: Expression::index(
                receiver.clone(),
                Expression::Constant(Constant::String("move".into())),
            ),
            arguments: ExpressionsList {
                contents: vec![receiver, int(1)],
            },
            is_method: true,
        };
        assert_eq!(render_statement(Statement::Call(call)), "obj:move(1)\n");
    }

    #[test]
    fn test_slot_names() {
        let plain = Expression::slot(7, 0);
        assert_eq!(render_expression(plain), "slot7");

        let mut generation = Identifier::slot(3, 0);
        generation.id = 1;
        assert_eq!(
            render_expression(Expression::Identifier(generation)),
            "slot3_1"
        );
    }
}
