// AST node variants.
//
// The tree is owned top-down. Warps are control-flow edges attached to
// blocks, never statements; their targets are integer indices into the
// enclosing function's block list, so the tree has no cycles and serializes
// as plain data.

use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

/// Index of a block inside the enclosing function's warped body.
pub type BlockId = usize;

// Precedence levels, shared between binary and unary operators.
pub const PR_OR: u8 = 1;
pub const PR_AND: u8 = 2;
pub const PR_COMPARISON: u8 = 3;
pub const PR_CONCATENATE: u8 = 4;
pub const PR_MATH_ADDSUB: u8 = 5;
pub const PR_MATH: u8 = 6;
pub const PR_UNARY: u8 = 7;
pub const PR_EXPONENT: u8 = 8;

/// Binary operator kinds. The numeric codes are ordered so that range tests
/// produce precedence levels; do not renumber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum BinOpKind {
    LogicalOr = 0,
    LogicalAnd = 10,
    Less = 20,
    Greater = 21,
    LessOrEqual = 22,
    GreaterOrEqual = 23,
    NotEqual = 24,
    Equal = 25,
    Concat = 30,
    Add = 40,
    Subtract = 41,
    Multiply = 50,
    Divide = 51,
    Mod = 52,
    Pow = 70,
}

impl BinOpKind {
    pub fn precedence(self) -> u8 {
        let code = self as u8;
        if code <= BinOpKind::LogicalOr as u8 {
            PR_OR
        } else if code <= BinOpKind::LogicalAnd as u8 {
            PR_AND
        } else if code <= BinOpKind::Equal as u8 {
            PR_COMPARISON
        } else if code <= BinOpKind::Concat as u8 {
            PR_CONCATENATE
        } else if code <= BinOpKind::Subtract as u8 {
            PR_MATH_ADDSUB
        } else if code <= BinOpKind::Mod as u8 {
            PR_MATH
        } else {
            PR_EXPONENT
        }
    }

    /// `..` is grouped left by the bytecode even though the manual calls it
    /// right-associative; emitting it right-grouped would add spurious
    /// parentheses.
    pub fn is_right_associative(self) -> bool {
        self == BinOpKind::Pow
    }

    pub fn is_commutative(self) -> bool {
        matches!(
            self,
            BinOpKind::LogicalOr
                | BinOpKind::LogicalAnd
                | BinOpKind::Equal
                | BinOpKind::NotEqual
                | BinOpKind::Add
                | BinOpKind::Multiply
        )
    }

    /// The comparison holding exactly when `self` does not.
    pub fn inverted(self) -> Option<BinOpKind> {
        Some(match self {
            BinOpKind::Less => BinOpKind::GreaterOrEqual,
            BinOpKind::GreaterOrEqual => BinOpKind::Less,
            BinOpKind::Greater => BinOpKind::LessOrEqual,
            BinOpKind::LessOrEqual => BinOpKind::Greater,
            BinOpKind::Equal => BinOpKind::NotEqual,
            BinOpKind::NotEqual => BinOpKind::Equal,
            _ => return None,
        })
    }

    pub fn token(self) -> &'static str {
        match self {
            BinOpKind::LogicalOr => "or",
            BinOpKind::LogicalAnd => "and",
            BinOpKind::Less => "<",
            BinOpKind::Greater => ">",
            BinOpKind::LessOrEqual => "<=",
            BinOpKind::GreaterOrEqual => ">=",
            BinOpKind::NotEqual => "~=",
            BinOpKind::Equal => "==",
            BinOpKind::Concat => "..",
            BinOpKind::Add => "+",
            BinOpKind::Subtract => "-",
            BinOpKind::Multiply => "*",
            BinOpKind::Divide => "/",
            BinOpKind::Mod => "%",
            BinOpKind::Pow => "^",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum UnOpKind {
    Not = 60,
    Length = 61,
    Minus = 62,
    /// TOSTRING/TONUMBER coercions, bytecode revision 2.1 only.
    ToString = 63,
    ToNumber = 64,
}

impl UnOpKind {
    pub fn precedence(self) -> u8 {
        PR_UNARY
    }

    pub fn token(self) -> &'static str {
        match self {
            UnOpKind::Not => "not ",
            UnOpKind::Length => "#",
            UnOpKind::Minus => "-",
            UnOpKind::ToString => "tostring",
            UnOpKind::ToNumber => "tonumber",
        }
    }
}

// ---------------------------------------------------------------------------
// Lists. First-class wrapper nodes so visitors traverse them uniformly.

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StatementsList {
    pub contents: Vec<Statement>,
}

impl StatementsList {
    pub fn len(&self) -> usize {
        self.contents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contents.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct IdentifiersList {
    pub contents: Vec<Identifier>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ExpressionsList {
    pub contents: Vec<Expression>,
}

/// Assignment destinations: slots, locals, table elements or a MULTRES
/// absorber.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct VariablesList {
    pub contents: Vec<Expression>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RecordsList {
    pub contents: Vec<Record>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Record {
    Array(ArrayRecord),
    Keyed(TableRecord),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArrayRecord {
    pub value: Expression,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableRecord {
    pub key: Expression,
    pub value: Expression,
}

// ---------------------------------------------------------------------------
// Expressions.

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expression {
    Identifier(Identifier),
    Constant(Constant),
    Primitive(Primitive),
    BinaryOp(Box<BinaryOperator>),
    UnaryOp(Box<UnaryOperator>),
    GetItem(Box<GetItem>),
    Table(TableConstructor),
    Call(Box<FunctionCall>),
    Function(Box<FunctionDefinition>),
    Vararg,
    /// "All results of the most recent multi-value producer".
    MultRes,
}

impl Expression {
    pub fn slot(slot: u16, addr: u32) -> Expression {
        Expression::Identifier(Identifier::slot(slot, addr))
    }

    pub fn nil() -> Expression {
        Expression::Primitive(Primitive::Nil)
    }

    pub fn as_slot(&self) -> Option<u16> {
        match self {
            Expression::Identifier(id) if id.kind == IdentifierKind::Slot => Some(id.slot as u16),
            _ => None,
        }
    }

    pub fn binary(kind: BinOpKind, left: Expression, right: Expression) -> Expression {
        Expression::BinaryOp(Box::new(BinaryOperator { kind, left, right }))
    }

    pub fn unary(kind: UnOpKind, operand: Expression) -> Expression {
        Expression::UnaryOp(Box::new(UnaryOperator { kind, operand }))
    }

    pub fn index(table: Expression, key: Expression) -> Expression {
        Expression::GetItem(Box::new(GetItem { table, key }))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IdentifierKind {
    /// A numbered virtual register with no resolved name yet.
    Slot,
    Local,
    Upvalue,
    Builtin,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identifier {
    pub name: Option<SmolStr>,
    pub kind: IdentifierKind,
    /// Slot number; -1 for builtins.
    pub slot: i32,
    /// Synthetic slot generation assigned by slot identification; -1 until
    /// assigned.
    pub id: i32,
    /// pc of the referencing instruction, for debug-range lookups.
    pub addr: u32,
}

impl Identifier {
    pub fn slot(slot: u16, addr: u32) -> Identifier {
        Identifier {
            name: None,
            kind: IdentifierKind::Slot,
            slot: slot as i32,
            id: -1,
            addr,
        }
    }

    pub fn builtin(name: &str) -> Identifier {
        Identifier {
            name: Some(SmolStr::new(name)),
            kind: IdentifierKind::Builtin,
            slot: -1,
            id: -1,
            addr: 0,
        }
    }

    pub fn upvalue(name: SmolStr) -> Identifier {
        Identifier {
            name: Some(name),
            kind: IdentifierKind::Upvalue,
            slot: -1,
            id: -1,
            addr: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Constant {
    Integer(i64),
    Float(f64),
    String(SmolStr),
    CData(CData),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CData {
    I64(i64),
    U64(u64),
    Complex { real: f64, imaginary: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Primitive {
    Nil,
    True,
    False,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinaryOperator {
    pub kind: BinOpKind,
    pub left: Expression,
    pub right: Expression,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnaryOperator {
    pub kind: UnOpKind,
    pub operand: Expression,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetItem {
    pub table: Expression,
    pub key: Expression,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TableConstructor {
    pub array: RecordsList,
    pub records: RecordsList,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub function: Expression,
    pub arguments: ExpressionsList,
    pub is_method: bool,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FunctionDefinition {
    pub arguments: IdentifiersList,
    pub statements: StatementsList,
    pub is_vararg: bool,
    /// Resolved upvalue names, in upvalue index order.
    pub upvalue_names: Vec<SmolStr>,
    /// Debug local-variable ranges, in activation order.
    pub debug_locals: Vec<DebugLocal>,
    /// Source line per instruction, when the dump carries line info.
    pub debug_lines: Vec<u32>,
    pub instructions_count: u32,
    /// Set when lifting this function failed; the body is left empty and
    /// emitted as a placeholder comment.
    pub error: Option<String>,
}

/// One local-variable validity range from the dump's debug section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebugLocal {
    pub name: SmolStr,
    /// Compiler-internal loop control slots carry reserved names.
    pub internal: bool,
    pub start_addr: u32,
    pub end_addr: u32,
}

impl FunctionDefinition {
    /// Resolve the debug name of `slot` at `addr`: active ranges map to
    /// consecutive slots in activation order.
    pub fn debug_local_at(&self, slot: i32, addr: u32) -> Option<&DebugLocal> {
        let mut active = 0;
        for local in &self.debug_locals {
            if local.start_addr <= addr && addr < local.end_addr {
                if active == slot {
                    return Some(local);
                }
                active += 1;
            }
        }
        None
    }
}

// ---------------------------------------------------------------------------
// Statements.

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Statement {
    Assignment(Assignment),
    Call(FunctionCall),
    If(If),
    While(While),
    RepeatUntil(RepeatUntil),
    NumericFor(NumericFor),
    IteratorFor(IteratorFor),
    Return(Return),
    Break,
    /// Warped-phase only: a basic block inside the function body.
    Block(Block),
    /// Placeholder left by slot elimination; swept before emission.
    NoOp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssignmentKind {
    LocalDefinition,
    Normal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub destinations: VariablesList,
    pub expressions: ExpressionsList,
    pub kind: AssignmentKind,
}

impl Assignment {
    pub fn single(destination: Expression, expression: Expression) -> Assignment {
        Assignment {
            destinations: VariablesList {
                contents: vec![destination],
            },
            expressions: ExpressionsList {
                contents: vec![expression],
            },
            kind: AssignmentKind::Normal,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct If {
    pub condition: Expression,
    pub then_block: StatementsList,
    pub elseifs: Vec<ElseIf>,
    pub else_block: StatementsList,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElseIf {
    pub condition: Expression,
    pub then_block: StatementsList,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct While {
    pub condition: Expression,
    pub statements: StatementsList,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepeatUntil {
    pub condition: Expression,
    pub statements: StatementsList,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumericFor {
    pub variable: Identifier,
    /// Start, limit, step.
    pub expressions: ExpressionsList,
    pub statements: StatementsList,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IteratorFor {
    pub identifiers: VariablesList,
    pub expressions: ExpressionsList,
    pub statements: StatementsList,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Return {
    pub returns: ExpressionsList,
}

// ---------------------------------------------------------------------------
// Blocks and warps.

/// A basic block of the warped CFG.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub index: BlockId,
    pub first_address: u32,
    pub last_address: u32,
    pub contents: Vec<Statement>,
    pub warp: Warp,
    /// Number of incoming edges; maintained by the builder and consulted by
    /// the unwarper.
    pub warpins_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Warp {
    Unconditional(UnconditionalWarp),
    Conditional(ConditionalWarp),
    Iterator(IteratorWarp),
    NumericLoop(NumericLoopWarp),
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnconditionalWarpKind {
    /// An explicit jump.
    Jump,
    /// Fall-through between adjacent blocks.
    Flow,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnconditionalWarp {
    pub kind: UnconditionalWarpKind,
    pub target: BlockId,
    /// Set when the edge closes upvalues (UCLO).
    pub is_uclo: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionalWarp {
    /// Control transfers to `true_target` when this holds.
    pub condition: Expression,
    pub true_target: BlockId,
    pub false_target: BlockId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IteratorWarp {
    pub variables: VariablesList,
    /// Generator, state, control.
    pub controls: ExpressionsList,
    pub body: BlockId,
    pub way_out: BlockId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumericLoopWarp {
    pub index: Identifier,
    /// Start, limit, step.
    pub controls: ExpressionsList,
    pub body: BlockId,
    pub way_out: BlockId,
}

impl Warp {
    pub fn flow(target: BlockId) -> Warp {
        Warp::Unconditional(UnconditionalWarp {
            kind: UnconditionalWarpKind::Flow,
            target,
            is_uclo: false,
        })
    }

    pub fn jump(target: BlockId) -> Warp {
        Warp::Unconditional(UnconditionalWarp {
            kind: UnconditionalWarpKind::Jump,
            target,
            is_uclo: false,
        })
    }

    /// Every block this warp may transfer control to.
    pub fn targets(&self) -> Vec<BlockId> {
        match self {
            Warp::Unconditional(w) => vec![w.target],
            Warp::Conditional(w) => vec![w.true_target, w.false_target],
            Warp::Iterator(w) => vec![w.body, w.way_out],
            Warp::NumericLoop(w) => vec![w.body, w.way_out],
            Warp::End => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operator_precedence_ordering() {
        assert_eq!(BinOpKind::LogicalOr.precedence(), PR_OR);
        assert_eq!(BinOpKind::LogicalAnd.precedence(), PR_AND);
        assert_eq!(BinOpKind::Equal.precedence(), PR_COMPARISON);
        assert_eq!(BinOpKind::Concat.precedence(), PR_CONCATENATE);
        assert_eq!(BinOpKind::Subtract.precedence(), PR_MATH_ADDSUB);
        assert_eq!(BinOpKind::Mod.precedence(), PR_MATH);
        assert_eq!(BinOpKind::Pow.precedence(), PR_EXPONENT);
        assert!(BinOpKind::Pow.precedence() > UnOpKind::Minus.precedence());
    }

    #[test]
    fn test_associativity() {
        assert!(BinOpKind::Pow.is_right_associative());
        assert!(!BinOpKind::Concat.is_right_associative());
        assert!(!BinOpKind::Subtract.is_right_associative());
    }

    #[test]
    fn test_commutativity() {
        assert!(BinOpKind::Add.is_commutative());
        assert!(BinOpKind::Multiply.is_commutative());
        assert!(!BinOpKind::Subtract.is_commutative());
        assert!(!BinOpKind::Concat.is_commutative());
        assert!(!BinOpKind::Less.is_commutative());
        assert!(BinOpKind::Equal.is_commutative());
    }

    #[test]
    fn test_comparison_inversion() {
        assert_eq!(BinOpKind::Less.inverted(), Some(BinOpKind::GreaterOrEqual));
        assert_eq!(BinOpKind::Equal.inverted(), Some(BinOpKind::NotEqual));
        assert_eq!(BinOpKind::Add.inverted(), None);
    }

    #[test]
    fn test_serialization_roundtrip() {
        let expr = Expression::binary(
            BinOpKind::Add,
            Expression::Constant(Constant::Integer(1)),
            Expression::binary(
                BinOpKind::Multiply,
                Expression::Constant(Constant::Integer(2)),
                Expression::slot(3, 7),
            ),
        );
        let statement = Statement::Assignment(Assignment::single(Expression::slot(0, 8), expr));
        let json = serde_json::to_value(&statement).unwrap();
        let loaded: Statement = serde_json::from_value(json).unwrap();
        assert_eq!(loaded, statement);
    }
}
