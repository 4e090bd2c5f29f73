//! Bounds-checked reader for compiled `fx_2_0` effect blobs.
//!
//! The blob is treated as untrusted: every offset and length is validated against the blob size
//! before it is dereferenced, and nothing from a failed parse escapes to the caller.

use crate::error::ParseError;
use crate::state::STATE_TABLE;
use crate::types::{ParameterClass, ParameterType};

/// Effect blob tag (`fx_2_0`).
pub const EFFECT_TAG: u32 = 0xFEFF_0901;

/// Header bytes preceding the data region: tag + header offset.
const BLOB_PREAMBLE_LEN: usize = 8;

/// Index value meaning "no technique"/"no element" in resource records.
pub(crate) const NO_INDEX: u32 = 0xFFFF_FFFF;

/// Nesting limit for struct/array typedefs and sampler state values.
const MAX_TYPE_DEPTH: u32 = 16;

/// Upper bound on parameter nodes produced by one blob (all elements, members, states).
///
/// Zero-sized struct arrays consume no value words, so the blob length alone does not bound the
/// expansion.
const MAX_PARAMETER_NODES: usize = 1 << 20;

pub(crate) fn read_u32_le(bytes: &[u8], offset: usize, what: &'static str) -> Result<u32, ParseError> {
    let end = offset.checked_add(4).ok_or(ParseError::Truncated {
        what,
        offset,
        needed: 4,
        len: bytes.len(),
    })?;
    match bytes.get(offset..end) {
        Some(b) => Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]])),
        None => Err(ParseError::Truncated {
            what,
            offset,
            needed: 4,
            len: bytes.len(),
        }),
    }
}

pub(crate) fn read_u16_le(bytes: &[u8], offset: usize, what: &'static str) -> Result<u16, ParseError> {
    let end = offset.checked_add(2).ok_or(ParseError::Truncated {
        what,
        offset,
        needed: 2,
        len: bytes.len(),
    })?;
    match bytes.get(offset..end) {
        Some(b) => Ok(u16::from_le_bytes([b[0], b[1]])),
        None => Err(ParseError::Truncated {
            what,
            offset,
            needed: 2,
            len: bytes.len(),
        }),
    }
}

pub(crate) fn read_bytes<'a>(
    bytes: &'a [u8],
    offset: usize,
    len: usize,
    what: &'static str,
) -> Result<&'a [u8], ParseError> {
    offset
        .checked_add(len)
        .and_then(|end| bytes.get(offset..end))
        .ok_or(ParseError::Truncated {
            what,
            offset,
            needed: len,
            len: bytes.len(),
        })
}

/// Decodes a NUL-terminated string, dropping the terminator and anything after it.
pub(crate) fn decode_cstr(raw: &[u8]) -> Result<String, ParseError> {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    std::str::from_utf8(&raw[..end])
        .map(str::to_owned)
        .map_err(|_| ParseError::invalid("string is not valid UTF-8"))
}

/// Reads a NUL-terminated string starting at `offset`.
pub(crate) fn read_cstring<'a>(
    bytes: &'a [u8],
    offset: usize,
    what: &str,
) -> Result<&'a str, ParseError> {
    let tail = bytes.get(offset..).ok_or_else(|| {
        ParseError::invalid(format!(
            "{what} offset {offset} is outside length {}",
            bytes.len()
        ))
    })?;
    let nul = tail.iter().position(|&b| b == 0).ok_or_else(|| {
        ParseError::invalid(format!(
            "{what} at offset {offset} is missing a null terminator"
        ))
    })?;
    std::str::from_utf8(&tail[..nul])
        .map_err(|_| ParseError::invalid(format!("{what} at offset {offset} is not valid UTF-8")))
}

/// Packs a four-character code the way it appears in a little-endian token stream.
pub(crate) const fn fourcc(code: &[u8; 4]) -> u32 {
    u32::from_le_bytes(*code)
}

/// Low half of a D3D9 comment token.
pub(crate) const COMMENT_TOKEN: u32 = 0xFFFE;

/// A comment block in a D3D9-style token stream.
#[derive(Debug, Clone, Copy)]
pub(crate) struct CommentBlock<'a> {
    pub fourcc: u32,
    /// Payload following the FourCC dword.
    pub body: &'a [u8],
}

/// Scans the run of comment tokens starting at `offset`.
///
/// Returns the blocks and the offset of the first token that is not a comment.
pub(crate) fn comment_blocks(
    bytes: &[u8],
    mut offset: usize,
) -> Result<(Vec<CommentBlock<'_>>, usize), ParseError> {
    let mut blocks = Vec::new();
    while offset < bytes.len() {
        let token = read_u32_le(bytes, offset, "comment token")?;
        if token & 0xFFFF != COMMENT_TOKEN {
            break;
        }
        let len_dwords = (token >> 16) as usize;
        if len_dwords == 0 {
            return Err(ParseError::invalid(format!(
                "empty comment block at offset {offset}"
            )));
        }
        let payload = read_bytes(bytes, offset + 4, len_dwords * 4, "comment block")?;
        blocks.push(CommentBlock {
            fourcc: read_u32_le(payload, 0, "comment fourcc")?,
            body: &payload[4..],
        });
        offset += 4 + len_dwords * 4;
    }
    Ok((blocks, offset))
}

/// Sequential little-endian dword cursor over a byte slice.
#[derive(Debug, Clone)]
pub(crate) struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub fn new(bytes: &'a [u8], pos: usize) -> Self {
        Self { bytes, pos }
    }

    pub fn read_u32(&mut self, what: &'static str) -> Result<u32, ParseError> {
        let v = read_u32_le(self.bytes, self.pos, what)?;
        self.pos += 4;
        Ok(v)
    }

    /// Reads `len` bytes and skips padding up to the next dword boundary.
    pub fn read_padded(&mut self, len: usize, what: &'static str) -> Result<&'a [u8], ParseError> {
        let data = read_bytes(self.bytes, self.pos, len, what)?;
        let padded = len
            .checked_add(3)
            .map(|v| v & !3)
            .ok_or_else(|| ParseError::invalid(format!("{what} size {len} overflows")))?;
        self.pos = self
            .pos
            .checked_add(padded)
            .ok_or_else(|| ParseError::invalid(format!("{what} size {len} overflows")))?;
        Ok(data)
    }
}

/// A typed node decoded from a typedef plus its initial value.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeRecord {
    pub name: Option<String>,
    pub semantic: Option<String>,
    pub class: ParameterClass,
    pub ty: ParameterType,
    pub rows: u32,
    pub columns: u32,
    pub elements: u32,
    /// Array elements when `elements > 0`, otherwise struct members.
    pub children: Vec<NodeRecord>,
    pub leaf: LeafRecord,
}

/// Initial value of a leaf node.
#[derive(Debug, Clone, PartialEq)]
pub enum LeafRecord {
    /// Struct or array: the value lives in the children.
    None,
    /// `rows * columns` raw dwords.
    Words(Vec<u32>),
    /// Index into the effect object table.
    Object(u32),
    /// Sampler state list.
    Sampler(Vec<StateRecord>),
    /// Object of a type the runtime does not store; the id is consumed and dropped.
    Unsupported,
}

/// A `(state, index, value)` triple from a pass or sampler.
#[derive(Debug, Clone, PartialEq)]
pub struct StateRecord {
    pub operation: u32,
    pub index: u32,
    pub value: NodeRecord,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParameterRecord {
    pub flags: u32,
    pub node: NodeRecord,
    pub annotations: Vec<NodeRecord>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PassRecord {
    pub name: Option<String>,
    pub annotations: Vec<NodeRecord>,
    pub states: Vec<StateRecord>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TechniqueRecord {
    pub name: Option<String>,
    pub annotations: Vec<NodeRecord>,
    pub passes: Vec<PassRecord>,
}

/// Raw data attached to an object id (string literal or shader bytecode).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectDataRecord {
    pub id: u32,
    pub data: Vec<u8>,
}

/// Late-bound data for a pass or sampler state (shader code, expression, reference).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRecord {
    pub technique: u32,
    pub index: u32,
    pub element: u32,
    pub state: u32,
    pub usage: u32,
    pub data: Vec<u8>,
}

/// Fully decoded, not yet linked, effect blob.
#[derive(Debug, Clone, PartialEq)]
pub struct EffectImage {
    pub parameters: Vec<ParameterRecord>,
    pub techniques: Vec<TechniqueRecord>,
    pub object_count: u32,
    pub object_data: Vec<ObjectDataRecord>,
    pub resources: Vec<ResourceRecord>,
}

/// Parsed typedef, before a value has been attached.
#[derive(Debug, Clone)]
struct TypeDef {
    ty: ParameterType,
    class: ParameterClass,
    name: Option<String>,
    semantic: Option<String>,
    elements: u32,
    rows: u32,
    columns: u32,
    members: Vec<TypeDef>,
}

struct Parser<'a> {
    /// Data region (blob minus the 8-byte preamble).
    data: &'a [u8],
    object_count: u32,
    node_budget: usize,
}

impl EffectImage {
    /// Parses an effect blob.
    pub fn parse(bytes: &[u8]) -> Result<Self, ParseError> {
        let tag = read_u32_le(bytes, 0, "effect tag")?;
        if tag != EFFECT_TAG {
            return Err(ParseError::invalid(format!(
                "bad effect tag {tag:#010x}, expected {EFFECT_TAG:#010x}"
            )));
        }
        let start = read_u32_le(bytes, 4, "effect header offset")? as usize;
        let data = &bytes[BLOB_PREAMBLE_LEN..];

        let mut p = Parser {
            data,
            object_count: 0,
            node_budget: MAX_PARAMETER_NODES,
        };
        let mut cur = Cursor::new(data, start);

        let parameter_count = cur.read_u32("parameter count")?;
        let technique_count = cur.read_u32("technique count")?;
        cur.read_u32("reserved header field")?;
        p.object_count = cur.read_u32("object count")?;

        // Each record needs at least 16 bytes; reject counts the blob cannot possibly hold.
        p.check_count(parameter_count, 16, "parameter")?;
        p.check_count(technique_count, 12, "technique")?;

        let mut parameters = Vec::with_capacity(parameter_count as usize);
        for _ in 0..parameter_count {
            parameters.push(p.parse_parameter(&mut cur)?);
        }

        let mut techniques = Vec::with_capacity(technique_count as usize);
        for _ in 0..technique_count {
            techniques.push(p.parse_technique(&mut cur)?);
        }

        let string_count = cur.read_u32("object data count")?;
        let resource_count = cur.read_u32("resource count")?;
        p.check_count(string_count, 8, "object data")?;
        p.check_count(resource_count, 24, "resource")?;

        let mut object_data = Vec::with_capacity(string_count as usize);
        for _ in 0..string_count {
            let id = cur.read_u32("object id")?;
            if id >= p.object_count {
                return Err(ParseError::invalid(format!(
                    "object data id {id} out of range (object count {})",
                    p.object_count
                )));
            }
            let size = cur.read_u32("object data size")? as usize;
            let data = cur.read_padded(size, "object data")?.to_vec();
            object_data.push(ObjectDataRecord { id, data });
        }

        let mut resources = Vec::with_capacity(resource_count as usize);
        for _ in 0..resource_count {
            let technique = cur.read_u32("resource technique index")?;
            let index = cur.read_u32("resource index")?;
            let element = cur.read_u32("resource element index")?;
            let state = cur.read_u32("resource state index")?;
            let usage = cur.read_u32("resource usage")?;
            let size = cur.read_u32("resource size")? as usize;
            let data = cur.read_padded(size, "resource data")?.to_vec();
            resources.push(ResourceRecord {
                technique,
                index,
                element,
                state,
                usage,
                data,
            });
        }

        Ok(Self {
            parameters,
            techniques,
            object_count: p.object_count,
            object_data,
            resources,
        })
    }
}

impl<'a> Parser<'a> {
    fn check_count(&self, count: u32, min_record_len: usize, what: &str) -> Result<(), ParseError> {
        let needed = (count as usize).checked_mul(min_record_len);
        match needed {
            Some(n) if n <= self.data.len() => Ok(()),
            _ => Err(ParseError::invalid(format!(
                "{what} count {count} cannot fit in {} bytes",
                self.data.len()
            ))),
        }
    }

    fn take_node(&mut self) -> Result<(), ParseError> {
        self.node_budget = self
            .node_budget
            .checked_sub(1)
            .ok_or_else(|| ParseError::invalid("too many parameter nodes"))?;
        Ok(())
    }

    fn parse_name(&self, offset: u32) -> Result<Option<String>, ParseError> {
        let offset = offset as usize;
        let len = read_u32_le(self.data, offset, "name length")? as usize;
        if len == 0 {
            return Ok(None);
        }
        let raw = read_bytes(self.data, offset + 4, len, "name")?;
        decode_cstr(raw).map(Some)
    }

    fn parse_parameter(&mut self, cur: &mut Cursor<'_>) -> Result<ParameterRecord, ParseError> {
        let typedef_offset = cur.read_u32("parameter typedef offset")?;
        let value_offset = cur.read_u32("parameter value offset")?;
        let flags = cur.read_u32("parameter flags")?;
        let annotation_count = cur.read_u32("annotation count")?;
        let annotations = self.parse_annotations(cur, annotation_count)?;
        let node = self.parse_typed_value(typedef_offset, value_offset, 0)?;
        Ok(ParameterRecord {
            flags,
            node,
            annotations,
        })
    }

    fn parse_annotations(
        &mut self,
        cur: &mut Cursor<'_>,
        count: u32,
    ) -> Result<Vec<NodeRecord>, ParseError> {
        self.check_count(count, 8, "annotation")?;
        let mut out = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let typedef_offset = cur.read_u32("annotation typedef offset")?;
            let value_offset = cur.read_u32("annotation value offset")?;
            out.push(self.parse_typed_value(typedef_offset, value_offset, 0)?);
        }
        Ok(out)
    }

    fn parse_technique(&mut self, cur: &mut Cursor<'_>) -> Result<TechniqueRecord, ParseError> {
        let name = self.parse_name(cur.read_u32("technique name offset")?)?;
        let annotation_count = cur.read_u32("technique annotation count")?;
        let pass_count = cur.read_u32("pass count")?;
        let annotations = self.parse_annotations(cur, annotation_count)?;
        self.check_count(pass_count, 12, "pass")?;
        let mut passes = Vec::with_capacity(pass_count as usize);
        for _ in 0..pass_count {
            let name = self.parse_name(cur.read_u32("pass name offset")?)?;
            let annotation_count = cur.read_u32("pass annotation count")?;
            let state_count = cur.read_u32("pass state count")?;
            let annotations = self.parse_annotations(cur, annotation_count)?;
            let states = self.parse_states(cur, state_count, 0)?;
            passes.push(PassRecord {
                name,
                annotations,
                states,
            });
        }
        Ok(TechniqueRecord {
            name,
            annotations,
            passes,
        })
    }

    fn parse_states(
        &mut self,
        cur: &mut Cursor<'_>,
        count: u32,
        depth: u32,
    ) -> Result<Vec<StateRecord>, ParseError> {
        self.check_count(count, 16, "state")?;
        let mut out = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let operation = cur.read_u32("state operation")?;
            if operation as usize >= STATE_TABLE.len() {
                return Err(ParseError::invalid(format!(
                    "state operation {operation} out of range"
                )));
            }
            let index = cur.read_u32("state index")?;
            let typedef_offset = cur.read_u32("state typedef offset")?;
            let value_offset = cur.read_u32("state value offset")?;
            let value = self.parse_typed_value(typedef_offset, value_offset, depth + 1)?;
            out.push(StateRecord {
                operation,
                index,
                value,
            });
        }
        Ok(out)
    }

    fn parse_typed_value(
        &mut self,
        typedef_offset: u32,
        value_offset: u32,
        depth: u32,
    ) -> Result<NodeRecord, ParseError> {
        let mut type_cur = Cursor::new(self.data, typedef_offset as usize);
        let def = self.parse_typedef(&mut type_cur, depth)?;
        let mut value_cur = Cursor::new(self.data, value_offset as usize);
        self.parse_value(&def, &mut value_cur, depth)
    }

    fn parse_typedef(&mut self, cur: &mut Cursor<'_>, depth: u32) -> Result<TypeDef, ParseError> {
        if depth > MAX_TYPE_DEPTH {
            return Err(ParseError::invalid("typedef nesting too deep"));
        }
        let raw_ty = cur.read_u32("parameter type")?;
        let raw_class = cur.read_u32("parameter class")?;
        let ty = ParameterType::from_raw(raw_ty)
            .ok_or_else(|| ParseError::invalid(format!("unknown parameter type {raw_ty}")))?;
        let class = ParameterClass::from_raw(raw_class)
            .ok_or_else(|| ParseError::invalid(format!("unknown parameter class {raw_class}")))?;
        let name = self.parse_name(cur.read_u32("parameter name offset")?)?;
        let semantic = self.parse_name(cur.read_u32("parameter semantic offset")?)?;
        let elements = cur.read_u32("parameter element count")?;

        let (mut rows, mut columns) = (0, 0);
        let mut members = Vec::new();
        match class {
            ParameterClass::Vector => {
                rows = 1;
                columns = cur.read_u32("vector columns")?;
            }
            ParameterClass::Scalar | ParameterClass::MatrixRows | ParameterClass::MatrixColumns => {
                rows = cur.read_u32("parameter rows")?;
                columns = cur.read_u32("parameter columns")?;
            }
            ParameterClass::Struct => {
                let member_count = cur.read_u32("struct member count")?;
                self.check_count(member_count, 20, "struct member")?;
                members.reserve(member_count as usize);
                for _ in 0..member_count {
                    members.push(self.parse_typedef(cur, depth + 1)?);
                }
            }
            ParameterClass::Object => {}
        }

        let def = TypeDef {
            ty,
            class,
            name,
            semantic,
            elements,
            rows,
            columns,
            members,
        };
        validate_typedef(&def)?;
        Ok(def)
    }

    fn parse_value(
        &mut self,
        def: &TypeDef,
        cur: &mut Cursor<'_>,
        depth: u32,
    ) -> Result<NodeRecord, ParseError> {
        self.take_node()?;
        let mut node = NodeRecord {
            name: def.name.clone(),
            semantic: def.semantic.clone(),
            class: def.class,
            ty: def.ty,
            rows: def.rows,
            columns: def.columns,
            elements: def.elements,
            children: Vec::new(),
            leaf: LeafRecord::None,
        };

        if def.elements > 0 {
            let element_def = TypeDef {
                elements: 0,
                ..def.clone()
            };
            for _ in 0..def.elements {
                node.children.push(self.parse_value(&element_def, cur, depth)?);
            }
            return Ok(node);
        }

        node.leaf = match def.class {
            ParameterClass::Struct => {
                for member in &def.members {
                    node.children.push(self.parse_value(member, cur, depth)?);
                }
                LeafRecord::None
            }
            ParameterClass::Object if def.ty.is_sampler() => {
                let count = cur.read_u32("sampler state count")?;
                LeafRecord::Sampler(self.parse_states(cur, count, depth + 1)?)
            }
            ParameterClass::Object => {
                let id = cur.read_u32("object id")?;
                if id >= self.object_count {
                    return Err(ParseError::invalid(format!(
                        "object id {id} out of range (object count {})",
                        self.object_count
                    )));
                }
                if def.ty == ParameterType::Unsupported {
                    LeafRecord::Unsupported
                } else {
                    LeafRecord::Object(id)
                }
            }
            _ => {
                let count = (def.rows * def.columns) as usize;
                let mut words = Vec::with_capacity(count);
                for _ in 0..count {
                    words.push(cur.read_u32("parameter value")?);
                }
                LeafRecord::Words(words)
            }
        };
        Ok(node)
    }
}

fn validate_typedef(def: &TypeDef) -> Result<(), ParseError> {
    let ok = match def.class {
        ParameterClass::Scalar | ParameterClass::MatrixRows | ParameterClass::MatrixColumns => {
            def.ty.is_numeric() && (1..=4).contains(&def.rows) && (1..=4).contains(&def.columns)
        }
        ParameterClass::Vector => def.ty.is_numeric() && (1..=4).contains(&def.columns),
        ParameterClass::Object => {
            !def.ty.is_numeric() && def.rows == 0 && def.columns == 0
        }
        ParameterClass::Struct => def.ty == ParameterType::Void,
    };
    if !ok {
        return Err(ParseError::invalid(format!(
            "inconsistent typedef: class {:?}, type {:?}, {}x{}",
            def.class, def.ty, def.rows, def.columns
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{EffectBuilder, TypeSpec, ValueSpec};

    #[test]
    fn rejects_bad_tag() {
        let mut blob = EffectBuilder::new().build();
        blob[0] ^= 0xFF;
        let err = EffectImage::parse(&blob).unwrap_err();
        assert!(matches!(err, ParseError::InvalidFormat(_)), "{err:?}");
    }

    #[test]
    fn rejects_header_offset_past_end() {
        let mut blob = EffectBuilder::new().build();
        let bogus = (blob.len() as u32).to_le_bytes();
        blob[4..8].copy_from_slice(&bogus);
        let err = EffectImage::parse(&blob).unwrap_err();
        assert!(matches!(err, ParseError::Truncated { .. }), "{err:?}");
    }

    #[test]
    fn rejects_truncated_blob_at_every_length() {
        let mut b = EffectBuilder::new();
        b.parameter(
            TypeSpec::matrix_rows(crate::test_utils::ty::FLOAT, "m", 4, 4),
            ValueSpec::floats(&[1.0; 16]),
        );
        let blob = b.build();
        assert!(EffectImage::parse(&blob).is_ok());
        for len in 0..blob.len() {
            // Truncation must never panic, and must never produce a partial image.
            assert!(EffectImage::parse(&blob[..len]).is_err(), "len {len}");
        }
    }

    #[test]
    fn parses_struct_array_members_per_element() {
        let mut b = EffectBuilder::new();
        let s = TypeSpec::structure(
            "s",
            vec![
                TypeSpec::scalar(crate::test_utils::ty::FLOAT, "a"),
                TypeSpec::vector(crate::test_utils::ty::INT, "b", 2),
            ],
        )
        .array(2);
        b.parameter(s, ValueSpec::words(&[1, 2, 3, 4, 5, 6]));
        let image = EffectImage::parse(&b.build()).unwrap();

        let node = &image.parameters[0].node;
        assert_eq!(node.elements, 2);
        assert_eq!(node.children.len(), 2);
        assert_eq!(node.children[1].children[1].leaf, LeafRecord::Words(vec![5, 6]));
        assert_eq!(node.children[1].name.as_deref(), Some("s"));
    }

    #[test]
    fn rejects_object_id_out_of_range() {
        let mut b = EffectBuilder::new();
        b.parameter(
            TypeSpec::object(crate::test_utils::ty::TEXTURE2D, "t"),
            ValueSpec::object(3),
        );
        b.object_count(2);
        let err = EffectImage::parse(&b.build()).unwrap_err();
        assert!(matches!(err, ParseError::InvalidFormat(_)));
    }

    #[test]
    fn rejects_numeric_object_mismatch() {
        let mut b = EffectBuilder::new();
        b.parameter(
            TypeSpec::raw(crate::test_utils::ty::FLOAT, crate::test_utils::class::OBJECT, "x"),
            ValueSpec::object(0),
        );
        b.object_count(1);
        assert!(EffectImage::parse(&b.build()).is_err());
    }
}
