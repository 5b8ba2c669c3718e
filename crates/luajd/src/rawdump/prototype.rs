// Prototype: one compiled function unit of the dump.
// Instructions, constant pools, upvalue descriptors, child prototypes and the
// optional debug section.

use smol_str::SmolStr;

pub const PROTO_FLAG_CHILD: u8 = 0x01;
pub const PROTO_FLAG_VARARG: u8 = 0x02;
pub const PROTO_FLAG_FFI: u8 = 0x04;

/// A single compiled function unit.
#[derive(Debug, Clone, Default)]
pub struct Prototype {
    pub flags: u8,
    pub arguments_count: u8,
    /// Number of stack slots the function uses.
    pub frame_size: u8,
    pub upvalues_count: u8,
    /// Raw 32-bit instruction words, 0-based pc addressing.
    pub instructions: Vec<u32>,
    /// Raw upvalue references; see [`UpvalueRef`] for decoding.
    pub upvalue_refs: Vec<u16>,
    pub constants: Constants,
    pub children: Vec<Prototype>,
    pub debug: Option<DebugInfo>,
}

impl Prototype {
    pub fn is_vararg(&self) -> bool {
        self.flags & PROTO_FLAG_VARARG != 0
    }

    pub fn has_children(&self) -> bool {
        self.flags & PROTO_FLAG_CHILD != 0
    }

    /// Source line of the instruction at `pc`, when debug info is present.
    pub fn line_at(&self, pc: u32) -> Option<u32> {
        self.debug
            .as_ref()
            .and_then(|d| d.addr_to_line.get(pc as usize).copied())
    }
}

/// Decoded form of one entry of `Prototype::upvalue_refs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpvalueRef {
    /// Captures a local slot of the parent function.
    ParentSlot(u16),
    /// Captures an upvalue of the parent function.
    ParentUpvalue(u16),
}

impl UpvalueRef {
    pub fn decode(raw: u16) -> UpvalueRef {
        if raw & 0x8000 != 0 {
            // Bit 14 marks immutable captures; irrelevant for source
            // reconstruction.
            UpvalueRef::ParentSlot(raw & 0x3FFF)
        } else {
            UpvalueRef::ParentUpvalue(raw)
        }
    }
}

/// Constant pools of one prototype.
///
/// GC constants are stored here in instruction-operand order: an operand `D`
/// indexes `gc[D]` directly (the on-disk order is reversed during parsing).
#[derive(Debug, Clone, Default)]
pub struct Constants {
    pub gc: Vec<GcConstant>,
    pub numeric: Vec<NumericConstant>,
}

impl Constants {
    pub fn string(&self, index: u32) -> Option<&SmolStr> {
        match self.gc.get(index as usize) {
            Some(GcConstant::Str(s)) => Some(s),
            _ => None,
        }
    }

    pub fn table(&self, index: u32) -> Option<&TableTemplate> {
        match self.gc.get(index as usize) {
            Some(GcConstant::Table(t)) => Some(t),
            _ => None,
        }
    }

    /// Child prototype index for an FNEW operand.
    pub fn child_index(&self, index: u32) -> Option<usize> {
        match self.gc.get(index as usize) {
            Some(GcConstant::Child(i)) => Some(*i),
            _ => None,
        }
    }
}

/// A garbage-collected constant.
#[derive(Debug, Clone)]
pub enum GcConstant {
    /// Index into `Prototype::children`.
    Child(usize),
    Table(TableTemplate),
    I64(i64),
    U64(u64),
    Complex { real: f64, imaginary: f64 },
    Str(SmolStr),
}

/// A numeric constant: LuaJIT distinguishes 32-bit integers from doubles.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NumericConstant {
    Integer(i32),
    Double(f64),
}

/// A constant table template, used by TDUP.
#[derive(Debug, Clone, Default)]
pub struct TableTemplate {
    pub array: Vec<TableItem>,
    pub hash: Vec<(TableItem, TableItem)>,
}

/// One key or value inside a table template.
#[derive(Debug, Clone, PartialEq)]
pub enum TableItem {
    Nil,
    False,
    True,
    Integer(i32),
    Double(f64),
    Str(SmolStr),
}

/// Optional debug section of a prototype.
#[derive(Debug, Clone, Default)]
pub struct DebugInfo {
    pub first_line: u32,
    pub lines_count: u32,
    /// Absolute source line per instruction, indexed by pc.
    pub addr_to_line: Vec<u32>,
    pub upvalue_names: Vec<SmolStr>,
    pub variable_info: Vec<VariableInfo>,
}

/// Validity range of one local variable slot.
#[derive(Debug, Clone)]
pub struct VariableInfo {
    pub name: VarName,
    /// First pc at which the variable is live, inclusive.
    pub start_addr: u32,
    /// Last pc at which the variable is live, exclusive.
    pub end_addr: u32,
}

/// Debug variable names: user-visible, or one of the compiler's internal
/// loop-control names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VarName {
    Visible(SmolStr),
    Internal(&'static str),
}

impl VarName {
    pub fn visible(&self) -> Option<&SmolStr> {
        match self {
            VarName::Visible(name) => Some(name),
            VarName::Internal(_) => None,
        }
    }
}

impl DebugInfo {
    /// Resolve the user-visible name of `slot` at `pc`.
    ///
    /// Active ranges are assigned to consecutive slots in activation order,
    /// mirroring how the runtime's `lua_getlocal` walks the table: the n-th
    /// range covering `pc` belongs to slot n (counting actives only).
    pub fn lookup_name(&self, slot: u16, pc: u32) -> Option<&VarName> {
        let mut active = 0u16;
        for info in &self.variable_info {
            if info.start_addr <= pc && pc < info.end_addr {
                if active == slot {
                    return Some(&info.name);
                }
                active += 1;
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upvalue_ref_decoding() {
        assert_eq!(UpvalueRef::decode(0x8000), UpvalueRef::ParentSlot(0));
        assert_eq!(UpvalueRef::decode(0xC003), UpvalueRef::ParentSlot(3));
        assert_eq!(UpvalueRef::decode(0x0002), UpvalueRef::ParentUpvalue(2));
    }

    #[test]
    fn test_debug_name_lookup() {
        let debug = DebugInfo {
            variable_info: vec![
                VariableInfo {
                    name: VarName::Visible(SmolStr::new("x")),
                    start_addr: 0,
                    end_addr: 10,
                },
                VariableInfo {
                    name: VarName::Visible(SmolStr::new("y")),
                    start_addr: 3,
                    end_addr: 8,
                },
            ],
            ..Default::default()
        };
        assert_eq!(
            debug.lookup_name(0, 5),
            Some(&VarName::Visible(SmolStr::new("x")))
        );
        assert_eq!(
            debug.lookup_name(1, 5),
            Some(&VarName::Visible(SmolStr::new("y")))
        );
        // Slot 1 has no active range outside y's span.
        assert_eq!(debug.lookup_name(1, 9), None);
    }
}
