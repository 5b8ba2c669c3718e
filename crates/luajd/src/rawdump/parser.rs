// Dump container parser.
// Prototypes are stored in post-order (children before parents); completed
// prototypes are kept on a stack and popped by their parent's child
// constants.

use crate::error::{DecompileError, DecompileResult};
use crate::opcode::VersionedContext;
use crate::rawdump::header::Header;
use crate::rawdump::prototype::{
    Constants, DebugInfo, GcConstant, NumericConstant, Prototype, TableItem, TableTemplate,
    VarName, VariableInfo,
};
use crate::rawdump::reader::ByteReader;

const KGC_CHILD: u32 = 0;
const KGC_TAB: u32 = 1;
const KGC_I64: u32 = 2;
const KGC_U64: u32 = 3;
const KGC_COMPLEX: u32 = 4;
const KGC_STR: u32 = 5;

const KTAB_NIL: u32 = 0;
const KTAB_FALSE: u32 = 1;
const KTAB_TRUE: u32 = 2;
const KTAB_INT: u32 = 3;
const KTAB_NUM: u32 = 4;
const KTAB_STR: u32 = 5;

const INTERNAL_VARNAMES: [&str; 6] = [
    "(for index)",
    "(for limit)",
    "(for step)",
    "(for generator)",
    "(for state)",
    "(for control)",
];

/// Parse a complete dump buffer into its header and root prototype.
pub fn parse_dump(buf: &[u8]) -> DecompileResult<(Header, VersionedContext, Prototype)> {
    let mut r = ByteReader::new(buf);
    let header = Header::parse(&mut r)?;
    let ctx = VersionedContext::new(header.version);

    let mut stack: Vec<Prototype> = Vec::new();
    loop {
        if r.is_eof() {
            return Err(DecompileError::dump("missing dump terminator", r.position()));
        }
        let size = r.read_uleb128()? as usize;
        if size == 0 {
            break;
        }
        let start = r.position();
        let proto = parse_prototype(&mut r, &header, &mut stack)?;
        if r.position() - start != size {
            return Err(DecompileError::dump(
                format!(
                    "prototype length mismatch: declared {size}, consumed {}",
                    r.position() - start
                ),
                r.position(),
            ));
        }
        stack.push(proto);
    }

    match (stack.pop(), stack.is_empty()) {
        (Some(root), true) => Ok((header, ctx, root)),
        (Some(_), false) => Err(DecompileError::dump(
            "dangling child prototypes after root",
            r.position(),
        )),
        (None, _) => Err(DecompileError::dump("dump contains no prototypes", r.position())),
    }
}

fn parse_prototype(
    r: &mut ByteReader,
    header: &Header,
    stack: &mut Vec<Prototype>,
) -> DecompileResult<Prototype> {
    let flags = r.read_u8()?;
    let arguments_count = r.read_u8()?;
    let frame_size = r.read_u8()?;
    let upvalues_count = r.read_u8()?;
    let gc_count = r.read_uleb128()?;
    let numeric_count = r.read_uleb128()?;
    let instructions_count = r.read_uleb128()?;

    let (debug_size, first_line, lines_count) = if header.flags.is_stripped {
        (0, 0, 0)
    } else {
        let debug_size = r.read_uleb128()?;
        if debug_size > 0 {
            (debug_size, r.read_uleb128()?, r.read_uleb128()?)
        } else {
            (0, 0, 0)
        }
    };

    let mut instructions = Vec::with_capacity(instructions_count as usize);
    for _ in 0..instructions_count {
        instructions.push(r.read_u32()?);
    }

    let mut upvalue_refs = Vec::with_capacity(upvalues_count as usize);
    for _ in 0..upvalues_count {
        upvalue_refs.push(r.read_u16()?);
    }

    let mut children = Vec::new();
    let mut gc_file_order = Vec::with_capacity(gc_count as usize);
    for _ in 0..gc_count {
        gc_file_order.push(parse_gc_constant(r, header, stack, &mut children)?);
    }
    // Instruction operands index GC constants from the end of the on-disk
    // order; reverse once so gc[D] resolves directly.
    gc_file_order.reverse();

    let mut numeric = Vec::with_capacity(numeric_count as usize);
    for _ in 0..numeric_count {
        numeric.push(parse_numeric_constant(r)?);
    }

    let debug = if debug_size > 0 {
        let debug_start = r.position();
        let info = parse_debug_info(
            r,
            first_line,
            lines_count,
            instructions_count,
            upvalues_count,
        )?;
        if r.position() - debug_start != debug_size as usize {
            return Err(DecompileError::dump(
                "debug section length mismatch",
                r.position(),
            ));
        }
        Some(info)
    } else {
        None
    };

    Ok(Prototype {
        flags,
        arguments_count,
        frame_size,
        upvalues_count,
        instructions,
        upvalue_refs,
        constants: Constants {
            gc: gc_file_order,
            numeric,
        },
        children,
        debug,
    })
}

fn parse_gc_constant(
    r: &mut ByteReader,
    header: &Header,
    stack: &mut Vec<Prototype>,
    children: &mut Vec<Prototype>,
) -> DecompileResult<GcConstant> {
    let kind = r.read_uleb128()?;
    match kind {
        KGC_CHILD => {
            let child = stack.pop().ok_or_else(|| {
                DecompileError::dump("child constant with empty prototype stack", r.position())
            })?;
            children.push(child);
            Ok(GcConstant::Child(children.len() - 1))
        }
        KGC_TAB => Ok(GcConstant::Table(parse_table_template(r)?)),
        KGC_I64 | KGC_U64 | KGC_COMPLEX if !header.flags.has_ffi => Err(DecompileError::dump(
            "cdata constant in a dump without the FFI flag",
            r.position(),
        )),
        KGC_I64 => {
            let lo = r.read_uleb128()? as u64;
            let hi = r.read_uleb128()? as u64;
            Ok(GcConstant::I64(((hi << 32) | lo) as i64))
        }
        KGC_U64 => {
            let lo = r.read_uleb128()? as u64;
            let hi = r.read_uleb128()? as u64;
            Ok(GcConstant::U64((hi << 32) | lo))
        }
        KGC_COMPLEX => {
            let real = read_double(r)?;
            let imaginary = read_double(r)?;
            Ok(GcConstant::Complex { real, imaginary })
        }
        _ => {
            let length = (kind - KGC_STR) as usize;
            Ok(GcConstant::Str(r.read_string(length)?))
        }
    }
}

fn read_double(r: &mut ByteReader) -> DecompileResult<f64> {
    let lo = r.read_uleb128()? as u64;
    let hi = r.read_uleb128()? as u64;
    Ok(f64::from_bits((hi << 32) | lo))
}

fn parse_numeric_constant(r: &mut ByteReader) -> DecompileResult<NumericConstant> {
    let is_double = r.peek_u8()? & 1 != 0;
    let lo = r.read_uleb128_33()?;
    if is_double {
        let hi = r.read_uleb128()? as u64;
        Ok(NumericConstant::Double(f64::from_bits(
            (hi << 32) | lo as u64,
        )))
    } else {
        Ok(NumericConstant::Integer(lo as i32))
    }
}

fn parse_table_template(r: &mut ByteReader) -> DecompileResult<TableTemplate> {
    let array_count = r.read_uleb128()?;
    let hash_count = r.read_uleb128()?;
    let mut template = TableTemplate::default();
    for _ in 0..array_count {
        template.array.push(parse_table_item(r)?);
    }
    for _ in 0..hash_count {
        let key = parse_table_item(r)?;
        let value = parse_table_item(r)?;
        template.hash.push((key, value));
    }
    Ok(template)
}

fn parse_table_item(r: &mut ByteReader) -> DecompileResult<TableItem> {
    let kind = r.read_uleb128()?;
    match kind {
        KTAB_NIL => Ok(TableItem::Nil),
        KTAB_FALSE => Ok(TableItem::False),
        KTAB_TRUE => Ok(TableItem::True),
        KTAB_INT => Ok(TableItem::Integer(r.read_uleb128()? as i32)),
        KTAB_NUM => Ok(TableItem::Double(read_double(r)?)),
        _ => {
            let length = (kind - KTAB_STR) as usize;
            Ok(TableItem::Str(r.read_string(length)?))
        }
    }
}

fn parse_debug_info(
    r: &mut ByteReader,
    first_line: u32,
    lines_count: u32,
    instructions_count: u32,
    upvalues_count: u8,
) -> DecompileResult<DebugInfo> {
    let mut addr_to_line = Vec::with_capacity(instructions_count as usize);
    for _ in 0..instructions_count {
        let offset = if lines_count < 0x100 {
            r.read_u8()? as u32
        } else if lines_count < 0x10000 {
            r.read_u16()? as u32
        } else {
            r.read_u32()?
        };
        addr_to_line.push(first_line + offset);
    }

    let mut upvalue_names = Vec::with_capacity(upvalues_count as usize);
    for _ in 0..upvalues_count {
        upvalue_names.push(r.read_zstring()?);
    }

    let mut variable_info = Vec::new();
    let mut last_start: u32 = 0;
    loop {
        let tag = r.peek_u8()?;
        if tag == 0 {
            r.read_u8()?;
            break;
        }
        let name = if (tag as usize) <= INTERNAL_VARNAMES.len() {
            r.read_u8()?;
            VarName::Internal(INTERNAL_VARNAMES[tag as usize - 1])
        } else {
            VarName::Visible(r.read_zstring()?)
        };
        // Start pcs are gap-coded from the previous entry, ends are relative
        // to their own start. The on-disk pcs are 1-based (pc 0 is the
        // function header, which is not part of the dump); shift to the
        // 0-based addressing used everywhere else.
        last_start += r.read_uleb128()?;
        let length = r.read_uleb128()?;
        let start_addr = last_start.saturating_sub(1);
        variable_info.push(VariableInfo {
            name,
            start_addr,
            end_addr: start_addr + length,
        });
    }

    Ok(DebugInfo {
        first_line,
        lines_count,
        addr_to_line,
        upvalue_names,
        variable_info,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opcode::{BytecodeVersion, Op};
    use crate::rawdump::testutil::{ins_ad, opcode_number, write_dump, ProtoSketch};

    fn ret0(version: BytecodeVersion) -> u32 {
        ins_ad(opcode_number(version, Op::Ret0), 0, 1)
    }

    #[test]
    fn test_minimal_stripped_dump() {
        // main: RET0 0 1
        let version = BytecodeVersion::V21;
        let buf = write_dump(
            version,
            &[ProtoSketch {
                frame_size: 1,
                instructions: vec![ret0(version)],
                ..Default::default()
            }],
        );

        let (header, ctx, proto) = parse_dump(&buf).unwrap();
        assert_eq!(header.version, BytecodeVersion::V21);
        assert_eq!(ctx.version(), BytecodeVersion::V21);
        assert_eq!(proto.instructions.len(), 1);
        assert!(proto.children.is_empty());
        assert!(proto.debug.is_none());
    }

    #[test]
    fn test_truncated_dump() {
        let version = BytecodeVersion::V21;
        let buf = write_dump(
            version,
            &[ProtoSketch {
                frame_size: 1,
                instructions: vec![ret0(version)],
                ..Default::default()
            }],
        );
        assert!(parse_dump(&buf[..buf.len() - 2]).is_err());
    }

    #[test]
    fn test_string_constant_ordering() {
        // Operand order is the reverse of file order; the sketch writer
        // stores operand order, so lookups must match it.
        let version = BytecodeVersion::V21;
        let buf = write_dump(
            version,
            &[ProtoSketch {
                frame_size: 2,
                instructions: vec![ret0(version)],
                strings: vec!["first".into(), "second".into()],
                ..Default::default()
            }],
        );

        let (_, _, proto) = parse_dump(&buf).unwrap();
        assert_eq!(proto.constants.string(0).unwrap(), "first");
        assert_eq!(proto.constants.string(1).unwrap(), "second");
    }

    #[test]
    fn test_numeric_constants_roundtrip() {
        let version = BytecodeVersion::V21;
        let buf = write_dump(
            version,
            &[ProtoSketch {
                frame_size: 1,
                instructions: vec![ret0(version)],
                numerics: vec![
                    NumericConstant::Integer(7),
                    NumericConstant::Integer(-1),
                    NumericConstant::Double(0.5),
                ],
                ..Default::default()
            }],
        );

        let (_, _, proto) = parse_dump(&buf).unwrap();
        assert_eq!(
            proto.constants.numeric,
            vec![
                NumericConstant::Integer(7),
                NumericConstant::Integer(-1),
                NumericConstant::Double(0.5),
            ]
        );
    }

    #[test]
    fn test_child_prototype_attachment() {
        let version = BytecodeVersion::V21;
        let child = ProtoSketch {
            frame_size: 1,
            instructions: vec![ret0(version)],
            ..Default::default()
        };
        let root = ProtoSketch {
            flags: crate::rawdump::prototype::PROTO_FLAG_CHILD,
            frame_size: 1,
            instructions: vec![ret0(version)],
            child_count: 1,
            ..Default::default()
        };
        let buf = write_dump(version, &[child, root]);

        let (_, _, proto) = parse_dump(&buf).unwrap();
        assert_eq!(proto.children.len(), 1);
        assert_eq!(proto.constants.child_index(0), Some(0));
    }
}
