// Lifts a prototype's instruction stream into a per-function AST of basic
// blocks joined by warps.
//
// The stream is walked twice: once to find block boundaries (every jump
// target and the instruction after every branch), once to translate each
// block's instructions into statements and attach its single outgoing warp.
// LuaJIT compare instructions always precede a JMP; the pair fuses into one
// conditional warp here.

use smol_str::SmolStr;

use crate::ast::nodes::*;
use crate::error::{DecompileError, DecompileResult};
use crate::opcode::{decode_fields, decode_opcode, jump_target, Op, VersionedContext};
use crate::rawdump::header::Header;
use crate::rawdump::prototype::{
    GcConstant, NumericConstant, Prototype, TableItem, TableTemplate, UpvalueRef, VarName,
};

/// Build the AST for `prototype` and, recursively, its children.
pub fn build(
    ctx: &VersionedContext,
    header: &Header,
    prototype: &Prototype,
) -> DecompileResult<FunctionDefinition> {
    let scope = FunctionScope {
        prototype,
        upvalue_names: resolve_root_upvalue_names(prototype),
    };
    build_function(ctx, header, &scope)
}

struct FunctionScope<'a> {
    prototype: &'a Prototype,
    upvalue_names: Vec<SmolStr>,
}

fn build_function(
    ctx: &VersionedContext,
    header: &Header,
    scope: &FunctionScope,
) -> DecompileResult<FunctionDefinition> {
    let prototype = scope.prototype;
    let mut definition = FunctionDefinition {
        arguments: argument_list(prototype),
        is_vararg: prototype.is_vararg(),
        upvalue_names: scope.upvalue_names.clone(),
        debug_locals: debug_local_ranges(prototype),
        debug_lines: prototype
            .debug
            .as_ref()
            .map(|d| d.addr_to_line.clone())
            .unwrap_or_default(),
        instructions_count: prototype.instructions.len() as u32,
        ..Default::default()
    };

    match build_blocks(ctx, header, scope) {
        Ok(blocks) => {
            definition.statements.contents =
                blocks.into_iter().map(Statement::Block).collect();
            Ok(definition)
        }
        // A lift failure poisons only this function; siblings and parents
        // still decompile around the placeholder.
        Err(err @ DecompileError::Lift { .. }) => {
            definition.error = Some(err.to_string());
            Ok(definition)
        }
        Err(err) => Err(err),
    }
}

fn debug_local_ranges(prototype: &Prototype) -> Vec<DebugLocal> {
    let Some(debug) = &prototype.debug else {
        return Vec::new();
    };
    debug
        .variable_info
        .iter()
        .map(|info| DebugLocal {
            name: match &info.name {
                VarName::Visible(name) => name.clone(),
                VarName::Internal(name) => SmolStr::new(*name),
            },
            internal: matches!(info.name, VarName::Internal(_)),
            start_addr: info.start_addr,
            end_addr: info.end_addr,
        })
        .collect()
}

fn argument_list(prototype: &Prototype) -> IdentifiersList {
    let contents = (0..prototype.arguments_count)
        .map(|slot| Identifier::slot(slot as u16, 0))
        .collect();
    IdentifiersList { contents }
}

fn lift_error(message: impl Into<String>, opcode: u8, pc: u32) -> DecompileError {
    DecompileError::Lift {
        message: message.into(),
        opcode,
        pc,
    }
}

// ---------------------------------------------------------------------------
// Phase 1: block boundaries.

fn find_block_starts(ctx: &VersionedContext, prototype: &Prototype) -> DecompileResult<Vec<u32>> {
    let count = prototype.instructions.len() as u32;
    let mut starts = vec![0u32];
    let mut add = |pc: u32| {
        if pc < count {
            starts.push(pc);
        }
    };

    let mut pc = 0u32;
    while pc < count {
        let word = prototype.instructions[pc as usize];
        let opcode = decode_opcode(word);
        let fields = decode_fields(word);
        let descriptor = ctx
            .descriptor(opcode)
            .ok_or_else(|| lift_error("unknown opcode", opcode, pc))?;

        match descriptor.op {
            op if is_comparison(op) => {
                let jmp = prototype
                    .instructions
                    .get(pc as usize + 1)
                    .copied()
                    .filter(|&w| {
                        ctx.descriptor(decode_opcode(w)).map(|d| d.op) == Some(Op::Jmp)
                    })
                    .ok_or_else(|| {
                        lift_error("comparison not followed by JMP", opcode, pc)
                    })?;
                add(jump_target(pc + 1, decode_fields(jmp).d));
                add(pc + 2);
                pc += 2;
                continue;
            }
            Op::Jmp | Op::UClo | Op::IsNext | Op::ForI | Op::JForI => {
                add(jump_target(pc, fields.d));
                add(pc + 1);
            }
            Op::ForL | Op::IForL | Op::IterL | Op::IIterL => {
                add(jump_target(pc, fields.d));
                add(pc + 1);
            }
            Op::Loop | Op::ILoop => {
                // Not a branch at runtime; its target still marks the loop
                // exit and is a useful split point.
                add(jump_target(pc, fields.d));
            }
            Op::Ret | Op::Ret0 | Op::Ret1 | Op::RetM | Op::CallT | Op::CallMT => {
                add(pc + 1);
            }
            _ => {}
        }
        pc += 1;
    }

    starts.sort_unstable();
    starts.dedup();
    Ok(starts)
}

fn is_comparison(op: Op) -> bool {
    matches!(
        op,
        Op::IsLt
            | Op::IsGe
            | Op::IsLe
            | Op::IsGt
            | Op::IsEqV
            | Op::IsNeV
            | Op::IsEqS
            | Op::IsNeS
            | Op::IsEqN
            | Op::IsNeN
            | Op::IsEqP
            | Op::IsNeP
            | Op::IsTC
            | Op::IsFC
            | Op::IsT
            | Op::IsF
    )
}

// ---------------------------------------------------------------------------
// Phase 2: per-block translation.

fn build_blocks(
    ctx: &VersionedContext,
    header: &Header,
    scope: &FunctionScope,
) -> DecompileResult<Vec<Block>> {
    let prototype = scope.prototype;
    let starts = find_block_starts(ctx, prototype)?;
    let count = prototype.instructions.len() as u32;

    let block_of = |pc: u32| -> DecompileResult<BlockId> {
        starts
            .binary_search(&pc)
            .map_err(|_| DecompileError::structural(format!("jump into mid-block pc {pc}")))
    };

    let mut blocks = Vec::with_capacity(starts.len());
    for (index, &first) in starts.iter().enumerate() {
        let last = starts.get(index + 1).copied().unwrap_or(count) - 1;
        let mut translator = Translator {
            ctx,
            header,
            scope,
            contents: Vec::new(),
            warp: None,
        };
        translator.run(first, last, &block_of)?;

        let warp = match translator.warp {
            Some(warp) => warp,
            // Fall-through into the next block, or off the end.
            None if index + 1 < starts.len() => Warp::flow(index + 1),
            None => Warp::End,
        };
        blocks.push(Block {
            index,
            first_address: first,
            last_address: last,
            contents: translator.contents,
            warp,
            warpins_count: 0,
        });
    }

    let mut warpins = vec![0u32; blocks.len()];
    for block in &blocks {
        for target in block.warp.targets() {
            if let Some(n) = warpins.get_mut(target) {
                *n += 1;
            }
        }
    }
    for (block, count) in blocks.iter_mut().zip(warpins) {
        block.warpins_count = count;
    }
    Ok(blocks)
}

struct Translator<'a> {
    ctx: &'a VersionedContext,
    header: &'a Header,
    scope: &'a FunctionScope<'a>,
    contents: Vec<Statement>,
    warp: Option<Warp>,
}

impl<'a> Translator<'a> {
    fn run(
        &mut self,
        first: u32,
        last: u32,
        block_of: &dyn Fn(u32) -> DecompileResult<BlockId>,
    ) -> DecompileResult<()> {
        let prototype = self.scope.prototype;
        let mut pc = first;
        while pc <= last {
            let word = prototype.instructions[pc as usize];
            let opcode = decode_opcode(word);
            let descriptor = self
                .ctx
                .descriptor(opcode)
                .ok_or_else(|| lift_error("unknown opcode", opcode, pc))?;

            if is_comparison(descriptor.op) {
                let jmp_word = prototype.instructions[pc as usize + 1];
                let target = jump_target(pc + 1, decode_fields(jmp_word).d);
                self.translate_comparison(descriptor.op, word, pc, block_of(target)?, block_of(pc + 2)?)?;
                return Ok(());
            }
            self.translate(descriptor.op, opcode, word, pc, block_of)?;
            pc += 1;
        }
        Ok(())
    }

    fn translate_comparison(
        &mut self,
        op: Op,
        word: u32,
        pc: u32,
        true_target: BlockId,
        false_target: BlockId,
    ) -> DecompileResult<()> {
        let f = decode_fields(word);
        let a = || Expression::slot(f.a as u16, pc);
        let d_slot = || Expression::slot(f.d as u16, pc);

        let condition = match op {
            Op::IsLt => Expression::binary(BinOpKind::Less, a(), d_slot()),
            Op::IsGe => Expression::binary(BinOpKind::GreaterOrEqual, a(), d_slot()),
            Op::IsLe => Expression::binary(BinOpKind::LessOrEqual, a(), d_slot()),
            Op::IsGt => Expression::binary(BinOpKind::Greater, a(), d_slot()),
            Op::IsEqV => Expression::binary(BinOpKind::Equal, a(), d_slot()),
            Op::IsNeV => Expression::binary(BinOpKind::NotEqual, a(), d_slot()),
            Op::IsEqS => Expression::binary(BinOpKind::Equal, a(), self.string_constant(f.d, pc)?),
            Op::IsNeS => {
                Expression::binary(BinOpKind::NotEqual, a(), self.string_constant(f.d, pc)?)
            }
            Op::IsEqN => Expression::binary(BinOpKind::Equal, a(), self.numeric_constant(f.d, pc)?),
            Op::IsNeN => {
                Expression::binary(BinOpKind::NotEqual, a(), self.numeric_constant(f.d, pc)?)
            }
            Op::IsEqP => Expression::binary(BinOpKind::Equal, a(), primitive(f.d)),
            Op::IsNeP => Expression::binary(BinOpKind::NotEqual, a(), primitive(f.d)),
            Op::IsT => d_slot(),
            Op::IsF => invert_condition(d_slot()),
            // Copy-and-test: the copy is materialized as a statement and the
            // and/or folding in the unwarper reconstructs the expression.
            Op::IsTC => {
                self.contents.push(Statement::Assignment(Assignment::single(
                    Expression::slot(f.a as u16, pc + 1),
                    d_slot(),
                )));
                d_slot()
            }
            Op::IsFC => {
                self.contents.push(Statement::Assignment(Assignment::single(
                    Expression::slot(f.a as u16, pc + 1),
                    d_slot(),
                )));
                invert_condition(d_slot())
            }
            _ => unreachable!("not a comparison"),
        };

        self.warp = Some(Warp::Conditional(ConditionalWarp {
            condition,
            true_target,
            false_target,
        }));
        Ok(())
    }

    fn translate(
        &mut self,
        op: Op,
        opcode: u8,
        word: u32,
        pc: u32,
        block_of: &dyn Fn(u32) -> DecompileResult<BlockId>,
    ) -> DecompileResult<()> {
        let f = decode_fields(word);
        let a = f.a as u16;
        let slot = |n: u32| Expression::slot(n as u16, pc);
        // A written slot holds its value from the next instruction on, which
        // is where the debug ranges of freshly defined locals open.
        let assign = |dst: u16, expr: Expression| {
            Statement::Assignment(Assignment::single(Expression::slot(dst, pc + 1), expr))
        };

        match op {
            Op::Mov => self.contents.push(assign(a, slot(f.d))),
            Op::Not => self
                .contents
                .push(assign(a, Expression::unary(UnOpKind::Not, slot(f.d)))),
            Op::Unm => self
                .contents
                .push(assign(a, Expression::unary(UnOpKind::Minus, slot(f.d)))),
            Op::Len => self
                .contents
                .push(assign(a, Expression::unary(UnOpKind::Length, slot(f.d)))),

            Op::AddVN | Op::SubVN | Op::MulVN | Op::DivVN | Op::ModVN => {
                let kind = arith_kind(op);
                let expr =
                    Expression::binary(kind, slot(f.b), self.numeric_constant(f.c, pc)?);
                self.contents.push(assign(a, expr));
            }
            Op::AddNV | Op::SubNV | Op::MulNV | Op::DivNV | Op::ModNV => {
                // Operands are reversed: constant on the left.
                let kind = arith_kind(op);
                let expr =
                    Expression::binary(kind, self.numeric_constant(f.c, pc)?, slot(f.b));
                self.contents.push(assign(a, expr));
            }
            Op::AddVV | Op::SubVV | Op::MulVV | Op::DivVV | Op::ModVV | Op::Pow => {
                let kind = arith_kind(op);
                self.contents
                    .push(assign(a, Expression::binary(kind, slot(f.b), slot(f.c))));
            }
            Op::Cat => {
                let mut expr = slot(f.b);
                for s in f.b + 1..=f.c {
                    expr = Expression::binary(BinOpKind::Concat, expr, slot(s));
                }
                self.contents.push(assign(a, expr));
            }

            Op::KStr => {
                let expr = self.string_constant(f.d, pc)?;
                self.contents.push(assign(a, expr));
            }
            Op::KCData => {
                let expr = self.cdata_constant(f.d, pc)?;
                self.contents.push(assign(a, expr));
            }
            Op::KShort => {
                let value = f.d as u16 as i16 as i64;
                self.contents
                    .push(assign(a, Expression::Constant(Constant::Integer(value))));
            }
            Op::KNum => {
                let expr = self.numeric_constant(f.d, pc)?;
                self.contents.push(assign(a, expr));
            }
            Op::KPri => self.contents.push(assign(a, primitive(f.d))),
            Op::KNil => {
                let destinations = (f.a..=f.d)
                    .map(|s| Expression::slot(s as u16, pc + 1))
                    .collect();
                self.contents.push(Statement::Assignment(Assignment {
                    destinations: VariablesList {
                        contents: destinations,
                    },
                    expressions: ExpressionsList {
                        contents: vec![Expression::nil()],
                    },
                    kind: AssignmentKind::Normal,
                }));
            }

            Op::UGet => {
                let expr = Expression::Identifier(self.upvalue(f.d, opcode, pc)?);
                self.contents.push(assign(a, expr));
            }
            Op::USetV | Op::USetS | Op::USetN | Op::USetP => {
                let destination = Expression::Identifier(self.upvalue(f.a, opcode, pc)?);
                let value = match op {
                    Op::USetV => slot(f.d),
                    Op::USetS => self.string_constant(f.d, pc)?,
                    Op::USetN => self.numeric_constant(f.d, pc)?,
                    _ => primitive(f.d),
                };
                self.contents
                    .push(Statement::Assignment(Assignment::single(destination, value)));
            }

            Op::FNew => {
                let expr = self.child_function(f.d, pc)?;
                self.contents.push(assign(a, expr));
            }

            Op::TNew => {
                self.contents
                    .push(assign(a, Expression::Table(TableConstructor::default())));
            }
            Op::TDup => {
                let template = self
                    .scope
                    .prototype
                    .constants
                    .table(f.d)
                    .ok_or_else(|| lift_error("bad table template index", opcode, pc))?;
                self.contents
                    .push(assign(a, Expression::Table(seed_table(template))));
            }
            Op::GGet => {
                let key = self.string_constant(f.d, pc)?;
                self.contents.push(assign(a, global_item(key)));
            }
            Op::GSet => {
                let key = self.string_constant(f.d, pc)?;
                self.contents
                    .push(Statement::Assignment(Assignment::single(
                        global_item(key),
                        slot(f.a),
                    )));
            }
            Op::TGetV | Op::TGetR => {
                self.contents
                    .push(assign(a, Expression::index(slot(f.b), slot(f.c))));
            }
            Op::TGetS => {
                let key = self.string_constant(f.c, pc)?;
                self.contents
                    .push(assign(a, Expression::index(slot(f.b), key)));
            }
            Op::TGetB => {
                let key = Expression::Constant(Constant::Integer(f.c as i64));
                self.contents
                    .push(assign(a, Expression::index(slot(f.b), key)));
            }
            Op::TSetV | Op::TSetR => {
                let destination = Expression::index(slot(f.b), slot(f.c));
                self.contents
                    .push(Statement::Assignment(Assignment::single(destination, slot(f.a))));
            }
            Op::TSetS => {
                let key = self.string_constant(f.c, pc)?;
                let destination = Expression::index(slot(f.b), key);
                self.contents
                    .push(Statement::Assignment(Assignment::single(destination, slot(f.a))));
            }
            Op::TSetB => {
                let key = Expression::Constant(Constant::Integer(f.c as i64));
                let destination = Expression::index(slot(f.b), key);
                self.contents
                    .push(Statement::Assignment(Assignment::single(destination, slot(f.a))));
            }
            Op::TSetM => {
                // Append all pending results to the array part of the table
                // below the base; slot elimination folds this back into the
                // constructor.
                let destination =
                    Expression::index(slot(f.a.wrapping_sub(1)), Expression::MultRes);
                self.contents
                    .push(Statement::Assignment(Assignment::single(
                        destination,
                        Expression::MultRes,
                    )));
            }

            Op::Call | Op::CallM => {
                let call = self.call_expression(f.a, f.b, f.c, op == Op::CallM, pc);
                self.push_call_results(f.a, f.b, call, pc);
            }
            Op::CallT | Op::CallMT => {
                let call = self.call_expression(f.a, 0, f.d, op == Op::CallMT, pc);
                self.contents.push(Statement::Return(Return {
                    returns: ExpressionsList {
                        contents: vec![Expression::Call(Box::new(call))],
                    },
                }));
                self.warp = Some(Warp::End);
            }
            Op::VarG => {
                self.push_call_results_expr(f.a, f.b, Expression::Vararg, pc);
            }

            Op::IterC | Op::IterN => {
                // The loop structure is carried entirely by the following
                // ITERL's warp; the iterator call itself adds no statement.
            }
            Op::IterL | Op::IIterL => {
                let body_pc = jump_target(pc, f.d);
                let body = block_of(body_pc)?;
                let way_out = block_of(pc + 1)?;
                let warp = self.iterator_warp(pc, body_pc, body, way_out, opcode)?;
                self.warp = Some(Warp::Iterator(warp));
            }
            Op::IsNext => {
                // Specialized pairs() dispatch: a plain jump down to ITERN.
                self.warp = Some(Warp::jump(block_of(jump_target(pc, f.d))?));
            }

            Op::ForI | Op::JForI => {
                let body = block_of(pc + 1)?;
                let way_out = block_of(jump_target(pc, f.d))?;
                let base = f.a;
                self.warp = Some(Warp::NumericLoop(NumericLoopWarp {
                    index: Identifier::slot((base + 3) as u16, pc + 1),
                    controls: ExpressionsList {
                        contents: vec![slot(base), slot(base + 1), slot(base + 2)],
                    },
                    body,
                    way_out,
                }));
            }
            Op::ForL | Op::IForL => {
                self.warp = Some(Warp::jump(block_of(jump_target(pc, f.d))?));
            }

            Op::Ret0 => {
                self.contents.push(Statement::Return(Return::default()));
                self.warp = Some(Warp::End);
            }
            Op::Ret1 => {
                self.contents.push(Statement::Return(Return {
                    returns: ExpressionsList {
                        contents: vec![slot(f.a)],
                    },
                }));
                self.warp = Some(Warp::End);
            }
            Op::Ret => {
                let returns = (f.a..f.a + f.d.saturating_sub(1)).map(|s| slot(s)).collect();
                self.contents.push(Statement::Return(Return {
                    returns: ExpressionsList { contents: returns },
                }));
                self.warp = Some(Warp::End);
            }
            Op::RetM => {
                let mut returns: Vec<Expression> = (f.a..f.a + f.d).map(|s| slot(s)).collect();
                returns.push(Expression::MultRes);
                self.contents.push(Statement::Return(Return {
                    returns: ExpressionsList { contents: returns },
                }));
                self.warp = Some(Warp::End);
            }

            Op::UClo => {
                let target = jump_target(pc, f.d);
                self.warp = Some(Warp::Unconditional(UnconditionalWarp {
                    kind: UnconditionalWarpKind::Jump,
                    target: block_of(target)?,
                    is_uclo: true,
                }));
            }
            Op::Jmp => {
                self.warp = Some(Warp::jump(block_of(jump_target(pc, f.d))?));
            }
            Op::Loop | Op::ILoop => {
                // Loop marker; control simply falls through.
            }
            Op::IsType | Op::IsNum => {
                // Parameter type assertions; nothing to reconstruct.
            }

            Op::JForL | Op::JIterL | Op::JLoop => {
                return Err(lift_error(
                    "JIT-specialized loop instruction carries no jump target",
                    opcode,
                    pc,
                ));
            }
            Op::FuncF
            | Op::IFuncF
            | Op::JFuncF
            | Op::FuncV
            | Op::IFuncV
            | Op::JFuncV
            | Op::FuncC
            | Op::FuncCW => {
                return Err(lift_error("function header opcode inside a dump", opcode, pc));
            }
            _ => {
                return Err(lift_error("unhandled opcode", opcode, pc));
            }
        }
        Ok(())
    }

    // -- operand materialization ------------------------------------------

    fn string_constant(&self, index: u32, pc: u32) -> DecompileResult<Expression> {
        self.scope
            .prototype
            .constants
            .string(index)
            .map(|s| Expression::Constant(Constant::String(s.clone())))
            .ok_or_else(|| lift_error("bad string constant index", 0, pc))
    }

    fn numeric_constant(&self, index: u32, pc: u32) -> DecompileResult<Expression> {
        match self.scope.prototype.constants.numeric.get(index as usize) {
            Some(NumericConstant::Integer(i)) => {
                Ok(Expression::Constant(Constant::Integer(*i as i64)))
            }
            Some(NumericConstant::Double(d)) => Ok(Expression::Constant(Constant::Float(*d))),
            None => Err(lift_error("bad numeric constant index", 0, pc)),
        }
    }

    fn cdata_constant(&self, index: u32, pc: u32) -> DecompileResult<Expression> {
        let value = match self.scope.prototype.constants.gc.get(index as usize) {
            Some(GcConstant::I64(v)) => CData::I64(*v),
            Some(GcConstant::U64(v)) => CData::U64(*v),
            Some(GcConstant::Complex { real, imaginary }) => CData::Complex {
                real: *real,
                imaginary: *imaginary,
            },
            _ => return Err(lift_error("bad cdata constant index", 0, pc)),
        };
        Ok(Expression::Constant(Constant::CData(value)))
    }

    fn upvalue(&self, index: u32, opcode: u8, pc: u32) -> DecompileResult<Identifier> {
        self.scope
            .upvalue_names
            .get(index as usize)
            .map(|name| Identifier::upvalue(name.clone()))
            .ok_or_else(|| lift_error("bad upvalue index", opcode, pc))
    }

    fn child_function(&self, index: u32, pc: u32) -> DecompileResult<Expression> {
        let child_index = self
            .scope
            .prototype
            .constants
            .child_index(index)
            .ok_or_else(|| lift_error("bad child prototype index", 0, pc))?;
        let child = self
            .scope
            .prototype
            .children
            .get(child_index)
            .ok_or_else(|| lift_error("bad child prototype index", 0, pc))?;
        let child_scope = FunctionScope {
            prototype: child,
            upvalue_names: resolve_upvalue_names(child, self.scope, pc),
        };
        let definition = build_function(self.ctx, self.header, &child_scope)?;
        Ok(Expression::Function(Box::new(definition)))
    }

    // -- calls -------------------------------------------------------------

    fn call_expression(&self, base: u32, _b: u32, c: u32, multres: bool, pc: u32) -> FunctionCall {
        // With the two-slot frame layout arguments start one slot higher.
        let arg_start = base + 1 + self.header.flags.fr2 as u32;
        let arg_count = if multres { c } else { c.saturating_sub(1) };
        let mut arguments: Vec<Expression> = (arg_start..arg_start + arg_count)
            .map(|s| Expression::slot(s as u16, pc))
            .collect();
        if multres {
            arguments.push(Expression::MultRes);
        }
        FunctionCall {
            function: Expression::slot(base as u16, pc),
            arguments: ExpressionsList {
                contents: arguments,
            },
            is_method: false,
        }
    }

    fn push_call_results(&mut self, base: u32, b: u32, call: FunctionCall, pc: u32) {
        self.push_call_results_expr(base, b, Expression::Call(Box::new(call)), pc);
    }

    fn push_call_results_expr(&mut self, base: u32, b: u32, expr: Expression, pc: u32) {
        match b {
            // All results pending: MULTRES absorbs them.
            0 => self.contents.push(Statement::Assignment(Assignment {
                destinations: VariablesList {
                    contents: vec![Expression::MultRes],
                },
                expressions: ExpressionsList {
                    contents: vec![expr],
                },
                kind: AssignmentKind::Normal,
            })),
            // No results: a bare call statement (varargs cannot reach here).
            1 => match expr {
                Expression::Call(call) => self.contents.push(Statement::Call(*call)),
                other => self.contents.push(Statement::Assignment(Assignment {
                    destinations: VariablesList::default(),
                    expressions: ExpressionsList {
                        contents: vec![other],
                    },
                    kind: AssignmentKind::Normal,
                })),
            },
            results => {
                let destinations = (base..base + results - 1)
                    .map(|s| Expression::slot(s as u16, pc + 1))
                    .collect();
                self.contents.push(Statement::Assignment(Assignment {
                    destinations: VariablesList {
                        contents: destinations,
                    },
                    expressions: ExpressionsList {
                        contents: vec![expr],
                    },
                    kind: AssignmentKind::Normal,
                }));
            }
        }
    }

    fn iterator_warp(
        &self,
        pc: u32,
        body_pc: u32,
        body: BlockId,
        way_out: BlockId,
        opcode: u8,
    ) -> DecompileResult<IteratorWarp> {
        // The preceding ITERC/ITERN carries the base and result count.
        let prototype = self.scope.prototype;
        let iterc_pc = pc.checked_sub(1).ok_or_else(|| {
            lift_error("iterator loop without iterator call", opcode, pc)
        })?;
        let word = prototype.instructions[iterc_pc as usize];
        let descriptor = self.ctx.descriptor(decode_opcode(word));
        if !matches!(descriptor.map(|d| d.op), Some(Op::IterC) | Some(Op::IterN)) {
            return Err(lift_error("iterator loop without iterator call", opcode, pc));
        }
        let f = decode_fields(word);
        let base = f.a;
        // Loop variables come alive at the body's first instruction.
        let variables = (base..base + f.b.saturating_sub(1))
            .map(|s| Expression::slot(s as u16, body_pc))
            .collect();
        let fr2 = self.header.flags.fr2 as u32;
        let control_base = base
            .checked_sub(3 + fr2)
            .ok_or_else(|| lift_error("iterator call below the control slots", opcode, pc))?;
        let controls = (control_base..control_base + 3)
            .map(|s| Expression::slot(s as u16, iterc_pc))
            .collect();
        Ok(IteratorWarp {
            variables: VariablesList {
                contents: variables,
            },
            controls: ExpressionsList { contents: controls },
            body,
            way_out,
        })
    }
}

fn arith_kind(op: Op) -> BinOpKind {
    match op {
        Op::AddVN | Op::AddNV | Op::AddVV => BinOpKind::Add,
        Op::SubVN | Op::SubNV | Op::SubVV => BinOpKind::Subtract,
        Op::MulVN | Op::MulNV | Op::MulVV => BinOpKind::Multiply,
        Op::DivVN | Op::DivNV | Op::DivVV => BinOpKind::Divide,
        Op::ModVN | Op::ModNV | Op::ModVV => BinOpKind::Mod,
        Op::Pow => BinOpKind::Pow,
        _ => unreachable!("not an arithmetic opcode"),
    }
}

fn primitive(d: u32) -> Expression {
    Expression::Primitive(match d {
        1 => Primitive::False,
        2 => Primitive::True,
        _ => Primitive::Nil,
    })
}

/// Reads and writes of globals go through the environment table.
fn global_item(key: Expression) -> Expression {
    Expression::index(Expression::Identifier(Identifier::builtin("_env")), key)
}

fn seed_table(template: &TableTemplate) -> TableConstructor {
    let mut constructor = TableConstructor::default();
    for (position, item) in template.array.iter().enumerate() {
        if position == 0 {
            // Array part starts at index 0, which Lua sources cannot
            // express implicitly; surface a non-nil entry as an explicit
            // record.
            if *item != TableItem::Nil {
                constructor.records.contents.push(Record::Keyed(TableRecord {
                    key: Expression::Constant(Constant::Integer(0)),
                    value: table_item_expression(item),
                }));
            }
            continue;
        }
        constructor.array.contents.push(Record::Array(ArrayRecord {
            value: table_item_expression(item),
        }));
    }
    // Trailing nils are padding from the template's array sizing.
    while let Some(Record::Array(last)) = constructor.array.contents.last() {
        if last.value == Expression::nil() {
            constructor.array.contents.pop();
        } else {
            break;
        }
    }
    for (key, value) in &template.hash {
        constructor.records.contents.push(Record::Keyed(TableRecord {
            key: table_item_expression(key),
            value: table_item_expression(value),
        }));
    }
    constructor
}

fn table_item_expression(item: &TableItem) -> Expression {
    match item {
        TableItem::Nil => Expression::nil(),
        TableItem::False => Expression::Primitive(Primitive::False),
        TableItem::True => Expression::Primitive(Primitive::True),
        TableItem::Integer(i) => Expression::Constant(Constant::Integer(*i as i64)),
        TableItem::Double(d) => Expression::Constant(Constant::Float(*d)),
        TableItem::Str(s) => Expression::Constant(Constant::String(s.clone())),
    }
}

/// A condition that holds exactly when `expr` does not.
pub fn invert_condition(expr: Expression) -> Expression {
    match expr {
        Expression::BinaryOp(op) if op.kind.inverted().is_some() => {
            let kind = op.kind.inverted().unwrap();
            Expression::BinaryOp(Box::new(BinaryOperator {
                kind,
                left: op.left,
                right: op.right,
            }))
        }
        Expression::UnaryOp(op) if op.kind == UnOpKind::Not => op.operand,
        other => Expression::unary(UnOpKind::Not, other),
    }
}

// ---------------------------------------------------------------------------
// Upvalue name resolution.

fn resolve_root_upvalue_names(prototype: &Prototype) -> Vec<SmolStr> {
    (0..prototype.upvalues_count as usize)
        .map(|k| debug_upvalue_name(prototype, k).unwrap_or_else(|| synthetic_upvalue_name(k)))
        .collect()
}

fn resolve_upvalue_names(child: &Prototype, parent: &FunctionScope, fnew_pc: u32) -> Vec<SmolStr> {
    (0..child.upvalues_count as usize)
        .map(|k| {
            if let Some(name) = debug_upvalue_name(child, k) {
                return name;
            }
            match child.upvalue_refs.get(k).copied().map(UpvalueRef::decode) {
                Some(UpvalueRef::ParentSlot(slot)) => parent
                    .prototype
                    .debug
                    .as_ref()
                    .and_then(|d| d.lookup_name(slot, fnew_pc))
                    .and_then(VarName::visible)
                    .cloned()
                    .unwrap_or_else(|| synthetic_upvalue_name(k)),
                Some(UpvalueRef::ParentUpvalue(index)) => parent
                    .upvalue_names
                    .get(index as usize)
                    .cloned()
                    .unwrap_or_else(|| synthetic_upvalue_name(k)),
                None => synthetic_upvalue_name(k),
            }
        })
        .collect()
}

fn debug_upvalue_name(prototype: &Prototype, index: usize) -> Option<SmolStr> {
    prototype
        .debug
        .as_ref()
        .and_then(|d| d.upvalue_names.get(index))
        .filter(|name| !name.is_empty())
        .cloned()
}

fn synthetic_upvalue_name(index: usize) -> SmolStr {
    SmolStr::new(format!("uv{index}"))
}
