// Pseudo-assembly listing of a parsed dump, in the style of luac -l:
// one header line per prototype, then one line per instruction with the
// opcode name and decoded operands.

use std::fmt::{self, Write};

use crate::opcode::{decode_fields, decode_opcode, jump_target, ArgType, OpMode, VersionedContext};
use crate::rawdump::header::Header;
use crate::rawdump::prototype::Prototype;

/// Write the listing for `prototype` and, recursively, its children.
pub fn write_listing<W: Write>(
    out: &mut W,
    ctx: &VersionedContext,
    header: &Header,
    prototype: &Prototype,
) -> fmt::Result {
    listing(out, ctx, header, prototype, true)
}

fn listing<W: Write>(
    out: &mut W,
    ctx: &VersionedContext,
    header: &Header,
    prototype: &Prototype,
    is_main: bool,
) -> fmt::Result {
    let origin = if header.origin.is_empty() {
        "?"
    } else {
        header.origin.as_str()
    };
    let what = if is_main { "main" } else { "function" };
    writeln!(
        out,
        "{} <{}> ({} instructions)",
        what,
        origin,
        prototype.instructions.len()
    )?;
    let param_str = if prototype.is_vararg() {
        format!("{}+", prototype.arguments_count)
    } else {
        format!("{}", prototype.arguments_count)
    };
    writeln!(
        out,
        "{} params, {} slots, {} upvalues, {} constants, {} functions",
        param_str,
        prototype.frame_size,
        prototype.upvalues_count,
        prototype.constants.gc.len() + prototype.constants.numeric.len(),
        prototype.children.len()
    )?;

    for (pc, &word) in prototype.instructions.iter().enumerate() {
        let pc = pc as u32;
        let opcode = decode_opcode(word);
        let fields = decode_fields(word);
        let line = prototype
            .line_at(pc)
            .map(|l| l.to_string())
            .unwrap_or_else(|| "-".into());

        match ctx.descriptor(opcode) {
            Some(descriptor) => {
                write!(out, "{pc:4} [{line:>4}] {:<8}", descriptor.name)?;
                let cd_value = match descriptor.mode {
                    OpMode::Abc => {
                        write!(out, " {:3} {:3} {:3}", fields.a, fields.b, fields.c)?;
                        fields.c
                    }
                    OpMode::Ad => {
                        write!(out, " {:3} {:5}", fields.a, fields.d)?;
                        fields.d
                    }
                    OpMode::Aj => {
                        write!(out, " {:3} => {:04}", fields.a, jump_target(pc, fields.d))?;
                        fields.d
                    }
                };
                if let Some(note) = operand_note(descriptor.cd, cd_value, prototype) {
                    write!(out, "  ; {note}")?;
                }
                writeln!(out)?;
            }
            None => writeln!(out, "{pc:4} [{line:>4}] ??? {word:#010x}")?,
        }
    }
    writeln!(out)?;

    for child in &prototype.children {
        listing(out, ctx, header, child, false)?;
    }
    Ok(())
}

/// Resolve the D operand against the constant pools for the annotation
/// column.
fn operand_note(arg: ArgType, d: u32, prototype: &Prototype) -> Option<String> {
    match arg {
        ArgType::Str => prototype
            .constants
            .string(d)
            .map(|s| format!("\"{}\"", escape(s))),
        ArgType::Num => prototype
            .constants
            .numeric
            .get(d as usize)
            .map(|n| match n {
                crate::rawdump::prototype::NumericConstant::Integer(i) => i.to_string(),
                crate::rawdump::prototype::NumericConstant::Double(f) => f.to_string(),
            }),
        ArgType::Pri => Some(
            match d {
                1 => "false",
                2 => "true",
                _ => "nil",
            }
            .to_string(),
        ),
        _ => None,
    }
}

fn escape(s: &str) -> String {
    let mut escaped = String::new();
    for c in s.chars().take(40) {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '\n' => escaped.push_str("\\n"),
            '\t' => escaped.push_str("\\t"),
            c if c.is_control() => escaped.push_str(&format!("\\{:03}", c as u32)),
            c => escaped.push(c),
        }
    }
    if s.chars().count() > 40 {
        escaped.push_str("...");
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opcode::{BytecodeVersion, Op};
    use crate::rawdump::parse_dump;
    use crate::rawdump::testutil::{ins_ad, opcode_number, write_dump, ProtoSketch};

    #[test]
    fn test_listing_contains_opcode_names() {
        let version = BytecodeVersion::V21;
        let buf = write_dump(
            version,
            &[ProtoSketch {
                frame_size: 2,
                instructions: vec![
                    ins_ad(opcode_number(version, Op::KShort), 0, 7),
                    ins_ad(opcode_number(version, Op::Ret1), 0, 2),
                ],
                ..Default::default()
            }],
        );
        let (header, ctx, proto) = parse_dump(&buf).unwrap();
        let mut out = String::new();
        write_listing(&mut out, &ctx, &header, &proto).unwrap();
        assert!(out.contains("KSHORT"));
        assert!(out.contains("RET1"));
        assert!(out.contains("2 instructions"));
    }
}
