// Test module organization
pub mod test_pipeline;
pub mod test_properties;

use smol_str::SmolStr;

use crate::opcode::{BytecodeVersion, Op, VersionedContext};
use crate::rawdump::header::{DumpFlags, Header};
use crate::rawdump::prototype::{
    Constants, DebugInfo, GcConstant, NumericConstant, Prototype, VarName, VariableInfo,
};
use crate::rawdump::testutil::opcode_number;

pub fn v21() -> (VersionedContext, Header) {
    let header = Header {
        version: BytecodeVersion::V21,
        flags: DumpFlags::default(),
        origin: SmolStr::default(),
    };
    (VersionedContext::new(BytecodeVersion::V21), header)
}

pub fn op(o: Op) -> u8 {
    opcode_number(BytecodeVersion::V21, o)
}

/// A local-variable debug range with a user-visible name.
pub fn visible(name: &str, start: u32, end: u32) -> VariableInfo {
    VariableInfo {
        name: VarName::Visible(SmolStr::new(name)),
        start_addr: start,
        end_addr: end,
    }
}

/// A compiler-internal loop-control range.
pub fn internal(name: &'static str, start: u32, end: u32) -> VariableInfo {
    VariableInfo {
        name: VarName::Internal(name),
        start_addr: start,
        end_addr: end,
    }
}

pub struct ProtoSpec {
    pub instructions: Vec<u32>,
    pub strings: Vec<&'static str>,
    pub numerics: Vec<NumericConstant>,
    pub locals: Vec<VariableInfo>,
    pub frame_size: u8,
}

/// Assemble a main-chunk prototype with debug info; every instruction maps
/// to source line 1 unless a test says otherwise.
pub fn proto(spec: ProtoSpec) -> Prototype {
    let gc = spec
        .strings
        .iter()
        .map(|s| GcConstant::Str(SmolStr::new(*s)))
        .collect();
    let lines = vec![1u32; spec.instructions.len()];
    Prototype {
        flags: 0,
        arguments_count: 0,
        frame_size: spec.frame_size,
        upvalues_count: 0,
        upvalue_refs: Vec::new(),
        debug: Some(DebugInfo {
            first_line: 1,
            lines_count: 1,
            addr_to_line: lines,
            upvalue_names: Vec::new(),
            variable_info: spec.locals,
        }),
        instructions: spec.instructions,
        constants: Constants {
            gc,
            numeric: spec.numerics,
        },
        children: Vec::new(),
    }
}

/// Decompile a hand-assembled prototype straight to source text.
pub fn decompile_to_text(prototype: &Prototype) -> String {
    let (ctx, header) = v21();
    let chunk = crate::decompile(&ctx, &header, prototype).expect("decompilation failed");
    let mut out = String::new();
    crate::lua::write_chunk(&mut out, &chunk).unwrap();
    out
}
