//! Error types for the decompiler pipeline.
//!
//! Every failure is per-file: the batch driver logs it and moves on. Lift
//! errors are additionally recorded on the enclosing function definition so
//! sibling functions still decompile.

use thiserror::Error;

/// Errors produced while decompiling one dump.
#[derive(Debug, Error)]
pub enum DecompileError {
    /// Malformed or unsupported bytecode container.
    #[error("dump format error at offset {offset}: {message}")]
    DumpFormat { message: String, offset: usize },

    /// An instruction with an unknown opcode or impossible operands.
    #[error("cannot lift instruction {opcode:#04x} at pc {pc}: {message}")]
    Lift {
        message: String,
        opcode: u8,
        pc: u32,
    },

    /// A structural invariant failed between stages.
    #[error("structural error: {message}")]
    Structural { message: String },

    /// The unwarper could not reduce the control-flow graph.
    #[error("irreducible control flow in blocks {first_block}..{last_block}")]
    IrreducibleCfg {
        first_block: usize,
        last_block: usize,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type DecompileResult<T> = Result<T, DecompileError>;

impl DecompileError {
    pub(crate) fn dump(message: impl Into<String>, offset: usize) -> Self {
        DecompileError::DumpFormat {
            message: message.into(),
            offset,
        }
    }

    pub(crate) fn structural(message: impl Into<String>) -> Self {
        DecompileError::Structural {
            message: message.into(),
        }
    }
}
