// Dump header: magic, version byte, flags, optional chunk name.

use crate::error::{DecompileError, DecompileResult};
use crate::opcode::BytecodeVersion;
use crate::rawdump::reader::ByteReader;
use smol_str::SmolStr;

const MAGIC: [u8; 3] = [0x1B, b'L', b'J'];

const FLAG_IS_BIG_ENDIAN: u32 = 0x01;
const FLAG_IS_STRIPPED: u32 = 0x02;
const FLAG_HAS_FFI: u32 = 0x04;
const FLAG_FR2: u32 = 0x08;

/// Decoded dump header.
#[derive(Debug, Clone)]
pub struct Header {
    pub version: BytecodeVersion,
    pub flags: DumpFlags,
    /// Chunk name, empty when the dump is stripped.
    pub origin: SmolStr,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DumpFlags {
    pub is_big_endian: bool,
    pub is_stripped: bool,
    pub has_ffi: bool,
    /// Two-slot frame layout (GC64 builds of 2.1).
    pub fr2: bool,
}

impl Header {
    pub fn parse(r: &mut ByteReader) -> DecompileResult<Header> {
        let magic = r.read_bytes(3)?;
        if magic != MAGIC {
            return Err(DecompileError::dump("bad dump magic", 0));
        }

        let version = match r.read_u8()? {
            1 => BytecodeVersion::V20,
            2 => BytecodeVersion::V21,
            v => {
                return Err(DecompileError::dump(
                    format!("unsupported bytecode version {v}"),
                    r.position(),
                ));
            }
        };

        let raw_flags = r.read_uleb128()?;
        let flags = DumpFlags {
            is_big_endian: raw_flags & FLAG_IS_BIG_ENDIAN != 0,
            is_stripped: raw_flags & FLAG_IS_STRIPPED != 0,
            has_ffi: raw_flags & FLAG_HAS_FFI != 0,
            fr2: raw_flags & FLAG_FR2 != 0,
        };

        let known = FLAG_IS_BIG_ENDIAN | FLAG_IS_STRIPPED | FLAG_HAS_FFI | FLAG_FR2;
        if raw_flags & !known != 0 {
            return Err(DecompileError::dump(
                format!("unknown dump flags {:#x}", raw_flags & !known),
                r.position(),
            ));
        }
        if flags.fr2 && version == BytecodeVersion::V20 {
            return Err(DecompileError::dump(
                "FR2 flag is invalid in a 2.0 dump",
                r.position(),
            ));
        }

        r.set_big_endian(flags.is_big_endian);

        let origin = if flags.is_stripped {
            SmolStr::default()
        } else {
            let length = r.read_uleb128()? as usize;
            r.read_string(length)?
        };

        Ok(Header {
            version,
            flags,
            origin,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_stripped_header() {
        let dump = [0x1B, b'L', b'J', 2, 0x02];
        let mut r = ByteReader::new(&dump);
        let header = Header::parse(&mut r).unwrap();
        assert_eq!(header.version, BytecodeVersion::V21);
        assert!(header.flags.is_stripped);
        assert!(!header.flags.is_big_endian);
        assert_eq!(header.origin, "");
    }

    #[test]
    fn test_parse_named_header() {
        let mut dump = vec![0x1B, b'L', b'J', 1, 0x00, 7];
        dump.extend_from_slice(b"@a.lua\n");
        // Trailing newline is part of the recorded name.
        let mut r = ByteReader::new(&dump);
        let header = Header::parse(&mut r).unwrap();
        assert_eq!(header.version, BytecodeVersion::V20);
        assert_eq!(header.origin, "@a.lua\n");
    }

    #[test]
    fn test_bad_magic() {
        let mut r = ByteReader::new(b"LuaQ");
        assert!(Header::parse(&mut r).is_err());
    }

    #[test]
    fn test_unknown_version() {
        let mut r = ByteReader::new(&[0x1B, b'L', b'J', 9, 0]);
        assert!(Header::parse(&mut r).is_err());
    }
}
