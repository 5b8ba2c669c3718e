// Test-only dump assembler: builds small, well-formed dumps so parser and
// pipeline tests can start from real bytes.

use crate::opcode::{BytecodeVersion, Op, VersionedContext};
use crate::rawdump::prototype::NumericConstant;

/// Numeric opcode of `op` in the given revision's table.
pub fn opcode_number(version: BytecodeVersion, op: Op) -> u8 {
    let ctx = VersionedContext::new(version);
    for number in 0..ctx.opcode_count() {
        if ctx.descriptor(number as u8).map(|d| d.op) == Some(op) {
            return number as u8;
        }
    }
    panic!("opcode {op:?} not present in {version:?}");
}

/// Assemble an ABC-format instruction word.
pub fn ins_abc(opcode: u8, a: u8, b: u8, c: u8) -> u32 {
    opcode as u32 | ((a as u32) << 8) | ((c as u32) << 16) | ((b as u32) << 24)
}

/// Assemble an AD-format instruction word.
pub fn ins_ad(opcode: u8, a: u8, d: u16) -> u32 {
    opcode as u32 | ((a as u32) << 8) | ((d as u32) << 16)
}

/// A jump operand: relative offset biased by 0x8000.
pub fn jump_d(offset: i32) -> u16 {
    (offset + 0x8000) as u16
}

/// One prototype to be written. String constants are given in instruction
/// operand order; the writer reverses them into file order.
#[derive(Default)]
pub struct ProtoSketch {
    pub flags: u8,
    pub arguments_count: u8,
    pub frame_size: u8,
    pub upvalues_count: u8,
    pub instructions: Vec<u32>,
    pub upvalue_refs: Vec<u16>,
    pub strings: Vec<String>,
    pub numerics: Vec<NumericConstant>,
    /// Number of trailing KGC child entries (popping previously written
    /// prototypes).
    pub child_count: usize,
}

/// Serialize a stripped dump containing `protos` in post-order; the last
/// entry is the root.
pub fn write_dump(version: BytecodeVersion, protos: &[ProtoSketch]) -> Vec<u8> {
    let mut out = vec![0x1B, b'L', b'J'];
    out.push(match version {
        BytecodeVersion::V20 => 1,
        BytecodeVersion::V21 => 2,
    });
    write_uleb(&mut out, 0x02); // stripped

    for proto in protos {
        let body = write_proto(proto);
        write_uleb(&mut out, body.len() as u32);
        out.extend_from_slice(&body);
    }
    out.push(0);
    out
}

fn write_proto(proto: &ProtoSketch) -> Vec<u8> {
    let mut body = Vec::new();
    body.push(proto.flags);
    body.push(proto.arguments_count);
    body.push(proto.frame_size);
    body.push(proto.upvalues_count);
    let gc_count = proto.strings.len() + proto.child_count;
    write_uleb(&mut body, gc_count as u32);
    write_uleb(&mut body, proto.numerics.len() as u32);
    write_uleb(&mut body, proto.instructions.len() as u32);
    for &word in &proto.instructions {
        body.extend_from_slice(&word.to_le_bytes());
    }
    for &uv in &proto.upvalue_refs {
        body.extend_from_slice(&uv.to_le_bytes());
    }
    // Children are written first in the KGC area, then the strings in
    // reverse operand order, so operand 0 names the last string.
    for _ in 0..proto.child_count {
        write_uleb(&mut body, 0);
    }
    for s in proto.strings.iter().rev() {
        write_uleb(&mut body, 5 + s.len() as u32);
        body.extend_from_slice(s.as_bytes());
    }
    for &num in &proto.numerics {
        write_numeric(&mut body, num);
    }
    body
}

fn write_uleb(out: &mut Vec<u8>, mut value: u32) {
    loop {
        let mut byte = (value & 0x7F) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if value == 0 {
            break;
        }
    }
}

/// The 33-bit variant: `tag` becomes the low bit of the first byte.
fn write_uleb_33(out: &mut Vec<u8>, value: u32, tag: bool) {
    let mut first = ((value & 0x3F) << 1) as u8 | tag as u8;
    let mut rest = value >> 6;
    if rest != 0 {
        first |= 0x80;
        out.push(first);
        loop {
            let mut byte = (rest & 0x7F) as u8;
            rest >>= 7;
            if rest != 0 {
                byte |= 0x80;
            }
            out.push(byte);
            if rest == 0 {
                break;
            }
        }
    } else {
        out.push(first);
    }
}

fn write_numeric(out: &mut Vec<u8>, num: NumericConstant) {
    match num {
        NumericConstant::Integer(i) => write_uleb_33(out, i as u32, false),
        NumericConstant::Double(d) => {
            let bits = d.to_bits();
            write_uleb_33(out, bits as u32, true);
            write_uleb(out, (bits >> 32) as u32);
        }
    }
}
