// Raw dump decoding: binary container -> header + prototype tree.

pub mod header;
pub mod parser;
pub mod prototype;
pub mod reader;

#[cfg(test)]
pub(crate) mod testutil;

pub use header::{DumpFlags, Header};
pub use parser::parse_dump;
pub use prototype::{
    Constants, DebugInfo, GcConstant, NumericConstant, Prototype, TableItem, TableTemplate,
    UpvalueRef, VarName, VariableInfo,
};
