//! D3D9 constant table (`CTAB`) reader.
//!
//! Used for shader comment blocks and for the input table of preshader programs. All offsets are
//! relative to the start of the table payload (the byte after the `CTAB` FourCC).

use crate::error::ParseError;
use crate::reader::{read_cstring, read_u16_le, read_u32_le};
use crate::types::{ParameterClass, ParameterType};

const HEADER_LEN: usize = 28;
const CONSTANT_INFO_LEN: usize = 20;
const TYPE_INFO_LEN: usize = 16;

/// `D3DXREGISTER_SET`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegisterSet {
    Bool,
    Int4,
    Float4,
    Sampler,
}

impl RegisterSet {
    pub fn from_raw(raw: u16) -> Option<Self> {
        Some(match raw {
            0 => Self::Bool,
            1 => Self::Int4,
            2 => Self::Float4,
            3 => Self::Sampler,
            _ => return None,
        })
    }
}

/// One entry of a constant table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstantDesc {
    pub name: String,
    pub register_set: RegisterSet,
    pub register_index: u32,
    pub register_count: u32,
    /// `None` when the entry carries no type info.
    pub class: Option<ParameterClass>,
    pub ty: Option<ParameterType>,
    pub rows: u32,
    pub columns: u32,
    pub elements: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConstantTable {
    pub creator: Option<String>,
    pub target: Option<String>,
    pub constants: Vec<ConstantDesc>,
}

impl ConstantTable {
    pub fn find(&self, name: &str) -> Option<&ConstantDesc> {
        self.constants.iter().find(|c| c.name == name)
    }

    /// Number of float components spanned by the `Float4` entries.
    pub(crate) fn float_components(&self) -> usize {
        self.constants
            .iter()
            .filter(|c| c.register_set != RegisterSet::Sampler)
            .map(|c| (c.register_index as usize + c.register_count as usize) * 4)
            .max()
            .unwrap_or(0)
    }
}

fn read_optional_string(
    bytes: &[u8],
    offset: u32,
    what: &str,
) -> Result<Option<String>, ParseError> {
    if offset == 0 {
        return Ok(None);
    }
    Ok(Some(read_cstring(bytes, offset as usize, what)?.to_owned()))
}

/// Parses a `CTAB` payload.
pub fn parse_constant_table(bytes: &[u8]) -> Result<ConstantTable, ParseError> {
    if bytes.len() < HEADER_LEN {
        return Err(ParseError::Truncated {
            what: "constant table header",
            offset: 0,
            needed: HEADER_LEN,
            len: bytes.len(),
        });
    }

    let creator_offset = read_u32_le(bytes, 4, "ctab creator offset")?;
    let constant_count = read_u32_le(bytes, 12, "ctab constant count")? as usize;
    let constant_offset = read_u32_le(bytes, 16, "ctab constant info offset")? as usize;
    let target_offset = read_u32_le(bytes, 24, "ctab target offset")?;

    let table_len = constant_count
        .checked_mul(CONSTANT_INFO_LEN)
        .and_then(|len| len.checked_add(constant_offset))
        .ok_or_else(|| ParseError::invalid("ctab constant table size overflows"))?;
    if table_len > bytes.len() {
        return Err(ParseError::Truncated {
            what: "ctab constant info",
            offset: constant_offset,
            needed: table_len - constant_offset,
            len: bytes.len(),
        });
    }

    let mut constants = Vec::with_capacity(constant_count);
    for i in 0..constant_count {
        let base = constant_offset + i * CONSTANT_INFO_LEN;
        let name_offset = read_u32_le(bytes, base, "ctab constant name offset")?;
        let raw_set = read_u16_le(bytes, base + 4, "ctab register set")?;
        let register_index = read_u16_le(bytes, base + 6, "ctab register index")? as u32;
        let register_count = read_u16_le(bytes, base + 8, "ctab register count")? as u32;
        let type_offset = read_u32_le(bytes, base + 12, "ctab type info offset")? as usize;

        let register_set = RegisterSet::from_raw(raw_set)
            .ok_or_else(|| ParseError::invalid(format!("unknown register set {raw_set}")))?;
        let name = read_cstring(bytes, name_offset as usize, "ctab constant name")?.to_owned();

        let mut desc = ConstantDesc {
            name,
            register_set,
            register_index,
            register_count,
            class: None,
            ty: None,
            rows: 0,
            columns: 0,
            elements: 0,
        };

        if type_offset != 0 {
            if type_offset
                .checked_add(TYPE_INFO_LEN)
                .map_or(true, |end| end > bytes.len())
            {
                return Err(ParseError::Truncated {
                    what: "ctab type info",
                    offset: type_offset,
                    needed: TYPE_INFO_LEN,
                    len: bytes.len(),
                });
            }
            let raw_class = read_u16_le(bytes, type_offset, "ctab type class")?;
            let raw_ty = read_u16_le(bytes, type_offset + 2, "ctab type")?;
            desc.class = Some(ParameterClass::from_raw(raw_class.into()).ok_or_else(|| {
                ParseError::invalid(format!("unknown ctab class {raw_class}"))
            })?);
            desc.ty = Some(
                ParameterType::from_raw(raw_ty.into())
                    .ok_or_else(|| ParseError::invalid(format!("unknown ctab type {raw_ty}")))?,
            );
            desc.rows = read_u16_le(bytes, type_offset + 4, "ctab type rows")? as u32;
            desc.columns = read_u16_le(bytes, type_offset + 6, "ctab type columns")? as u32;
            desc.elements = read_u16_le(bytes, type_offset + 8, "ctab type elements")? as u32;
        }

        constants.push(desc);
    }

    Ok(ConstantTable {
        creator: read_optional_string(bytes, creator_offset, "ctab creator")?,
        target: read_optional_string(bytes, target_offset, "ctab target")?,
        constants,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{build_ctab, CtabEntry};

    fn push_u32(out: &mut Vec<u8>, v: u32) {
        out.extend_from_slice(&v.to_le_bytes());
    }

    fn push_u16(out: &mut Vec<u8>, v: u16) {
        out.extend_from_slice(&v.to_le_bytes());
    }

    #[test]
    fn parses_minimal_table_without_type_info() {
        let mut chunk = Vec::new();
        push_u32(&mut chunk, 28); // size
        push_u32(&mut chunk, 0); // creator offset
        push_u32(&mut chunk, 0xFFFE_0200); // version
        push_u32(&mut chunk, 1); // constant count
        push_u32(&mut chunk, 28); // constant info offset
        push_u32(&mut chunk, 0); // flags
        push_u32(&mut chunk, 48); // target offset

        push_u32(&mut chunk, 55); // name offset
        push_u16(&mut chunk, 2); // register set
        push_u16(&mut chunk, 3); // register index
        push_u16(&mut chunk, 4); // register count
        push_u16(&mut chunk, 0); // reserved
        push_u32(&mut chunk, 0); // type info offset
        push_u32(&mut chunk, 0); // default value offset

        chunk.extend_from_slice(b"vs_2_0\0");
        chunk.extend_from_slice(b"mvp\0");

        let table = parse_constant_table(&chunk).unwrap();
        assert_eq!(table.creator, None);
        assert_eq!(table.target.as_deref(), Some("vs_2_0"));
        assert_eq!(table.constants.len(), 1);
        let c = &table.constants[0];
        assert_eq!(c.name, "mvp");
        assert_eq!(c.register_set, RegisterSet::Float4);
        assert_eq!((c.register_index, c.register_count), (3, 4));
        assert_eq!(c.class, None);
    }

    #[test]
    fn builder_output_roundtrips_type_info() {
        let bytes = build_ctab(&[
            CtabEntry::float4("g_world", 0, 4).matrix(ParameterClass::MatrixColumns, 4, 4),
            CtabEntry::new("s0", RegisterSet::Sampler, 1, 1),
        ]);
        let table = parse_constant_table(&bytes).unwrap();
        assert_eq!(table.constants.len(), 2);
        assert_eq!(table.constants[0].class, Some(ParameterClass::MatrixColumns));
        assert_eq!(table.constants[0].rows, 4);
        assert_eq!(table.find("s0").map(|c| c.register_index), Some(1));
        assert_eq!(table.float_components(), 16);
    }

    #[test]
    fn rejects_constant_info_past_end() {
        let mut chunk = Vec::new();
        push_u32(&mut chunk, 28);
        push_u32(&mut chunk, 0);
        push_u32(&mut chunk, 0);
        push_u32(&mut chunk, 3); // three entries, none present
        push_u32(&mut chunk, 28);
        push_u32(&mut chunk, 0);
        push_u32(&mut chunk, 0);
        let err = parse_constant_table(&chunk).unwrap_err();
        assert!(matches!(err, ParseError::Truncated { .. }), "{err:?}");
    }

    #[test]
    fn rejects_unterminated_name() {
        let mut bytes = build_ctab(&[CtabEntry::float4("abc", 0, 1)]);
        // Drop the trailing NUL of the last string in the table.
        while bytes.last() == Some(&0) {
            bytes.pop();
        }
        assert!(parse_constant_table(&bytes).is_err());
    }
}
