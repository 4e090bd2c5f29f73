//! Builders for synthetic effect blobs, constant tables, preshaders and shader bytecode.
//!
//! The output is structurally valid input for the crate's parsers. Nothing here is tuned to look
//! like compiler output; offsets are laid out in whatever order is easiest to emit.

use std::hash::Hash;
use std::rc::Rc;

use hashbrown::HashMap;

use crate::ctab::RegisterSet;
use crate::device::{EffectDevice, StateManager};
use crate::object::{Shader, ShaderStage, Texture};
use crate::preshader::{Opcode, Table, PRESHADER_VERSION_TAG};
use crate::reader::{fourcc, COMMENT_TOKEN, EFFECT_TAG, NO_INDEX};
use crate::state::{state_index, Light, Material, StateClass};
use crate::types::{Matrix4, ParameterClass};

/// Raw `D3DXPARAMETER_TYPE` values.
pub mod ty {
    pub const VOID: u32 = 0;
    pub const BOOL: u32 = 1;
    pub const INT: u32 = 2;
    pub const FLOAT: u32 = 3;
    pub const STRING: u32 = 4;
    pub const TEXTURE: u32 = 5;
    pub const TEXTURE1D: u32 = 6;
    pub const TEXTURE2D: u32 = 7;
    pub const TEXTURE3D: u32 = 8;
    pub const TEXTURECUBE: u32 = 9;
    pub const SAMPLER: u32 = 10;
    pub const SAMPLER2D: u32 = 12;
    pub const PIXELSHADER: u32 = 15;
    pub const VERTEXSHADER: u32 = 16;
}

/// Raw `D3DXPARAMETER_CLASS` values.
pub mod class {
    pub const SCALAR: u32 = 0;
    pub const VECTOR: u32 = 1;
    pub const MATRIX_ROWS: u32 = 2;
    pub const MATRIX_COLUMNS: u32 = 3;
    pub const OBJECT: u32 = 4;
    pub const STRUCT: u32 = 5;
}

/// Resource record usages.
pub mod usage {
    /// Shader bytecode, or a preshader expression for numeric states.
    pub const CODE: u32 = 0;
    /// NUL-terminated parameter path.
    pub const PARAMETER: u32 = 1;
    /// Array parameter path followed by an index-selecting preshader.
    pub const ARRAY_SELECTOR: u32 = 2;
}

fn push_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn push_u16(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn pad4(out: &mut Vec<u8>) {
    while out.len() % 4 != 0 {
        out.push(0);
    }
}

fn len_u32(len: usize) -> u32 {
    u32::try_from(len).expect("length does not fit in u32")
}

/// Appends a D3D9 comment token carrying `fourcc` and `body` (padded to whole dwords).
pub fn push_comment(out: &mut Vec<u8>, code: &[u8; 4], body: &[u8]) {
    let mut payload = fourcc(code).to_le_bytes().to_vec();
    payload.extend_from_slice(body);
    pad4(&mut payload);
    let dwords = len_u32(payload.len() / 4);
    push_u32(out, COMMENT_TOKEN | (dwords << 16));
    out.extend_from_slice(&payload);
}

// -------------------------------------------------------------------------------------------------
// Constant tables
// -------------------------------------------------------------------------------------------------

/// One constant of a synthetic `CTAB`.
#[derive(Debug, Clone)]
pub struct CtabEntry {
    pub name: String,
    pub register_set: RegisterSet,
    pub register_index: u16,
    pub register_count: u16,
    /// `(class, type, rows, columns, elements)` as raw values; `None` omits the type info.
    pub type_info: Option<(u16, u16, u16, u16, u16)>,
}

impl CtabEntry {
    pub fn new(name: &str, register_set: RegisterSet, register_index: u16, register_count: u16) -> Self {
        let type_info = match register_set {
            RegisterSet::Sampler => (class::OBJECT, ty::SAMPLER2D),
            RegisterSet::Bool => (class::SCALAR, ty::BOOL),
            RegisterSet::Int4 => (class::SCALAR, ty::INT),
            RegisterSet::Float4 => (class::SCALAR, ty::FLOAT),
        };
        Self {
            name: name.to_owned(),
            register_set,
            register_index,
            register_count,
            type_info: Some((type_info.0 as u16, type_info.1 as u16, 1, 1, 1)),
        }
    }

    /// A `float4` (or `float4[count]`) constant.
    pub fn float4(name: &str, register_index: u16, register_count: u16) -> Self {
        Self {
            type_info: Some((
                class::VECTOR as u16,
                ty::FLOAT as u16,
                1,
                4,
                register_count.max(1),
            )),
            ..Self::new(name, RegisterSet::Float4, register_index, register_count)
        }
    }

    pub fn matrix(mut self, class: ParameterClass, rows: u16, columns: u16) -> Self {
        let raw = match class {
            ParameterClass::MatrixColumns => self::class::MATRIX_COLUMNS,
            _ => self::class::MATRIX_ROWS,
        };
        self.type_info = Some((raw as u16, ty::FLOAT as u16, rows, columns, 1));
        self
    }

    pub fn untyped(mut self) -> Self {
        self.type_info = None;
        self
    }
}

/// Builds a `CTAB` payload (the bytes after the FourCC). Constant names are emitted last.
pub fn build_ctab(entries: &[CtabEntry]) -> Vec<u8> {
    const HEADER_LEN: usize = 28;
    let info_len = entries.len() * 20;
    let typed = entries.iter().filter(|e| e.type_info.is_some()).count();
    let target_offset = HEADER_LEN + info_len + typed * 16;
    let target = b"vs_2_0\0\0";
    let mut name_offset = target_offset + target.len();

    let mut out = Vec::new();
    push_u32(&mut out, HEADER_LEN as u32);
    push_u32(&mut out, 0); // creator
    push_u32(&mut out, 0xFFFE_0200);
    push_u32(&mut out, len_u32(entries.len()));
    push_u32(&mut out, HEADER_LEN as u32);
    push_u32(&mut out, 0); // flags
    push_u32(&mut out, len_u32(target_offset));

    let mut type_offset = HEADER_LEN + info_len;
    for e in entries {
        push_u32(&mut out, len_u32(name_offset));
        push_u16(&mut out, e.register_set as u16);
        push_u16(&mut out, e.register_index);
        push_u16(&mut out, e.register_count);
        push_u16(&mut out, 0);
        if e.type_info.is_some() {
            push_u32(&mut out, len_u32(type_offset));
            type_offset += 16;
        } else {
            push_u32(&mut out, 0);
        }
        push_u32(&mut out, 0); // default value
        name_offset += e.name.len() + 1;
    }
    for (class, ty, rows, columns, elements) in entries.iter().filter_map(|e| e.type_info) {
        for v in [class, ty, rows, columns, elements, 0] {
            push_u16(&mut out, v);
        }
        push_u32(&mut out, 0); // struct member info
    }
    out.extend_from_slice(target);
    for e in entries {
        out.extend_from_slice(e.name.as_bytes());
        out.push(0);
    }
    out
}

// -------------------------------------------------------------------------------------------------
// Preshaders
// -------------------------------------------------------------------------------------------------

/// A preshader operand: a component offset into one of the register tables.
#[derive(Debug, Clone, Copy)]
pub struct Reg {
    table: Table,
    offset: u32,
    index: Option<(Table, u32)>,
    scalar: bool,
}

impl Reg {
    fn at(table: Table, offset: u32) -> Self {
        Self {
            table,
            offset,
            index: None,
            scalar: false,
        }
    }

    pub fn lit(offset: u32) -> Self {
        Self::at(Table::Literal, offset)
    }

    pub fn input(offset: u32) -> Self {
        Self::at(Table::Input, offset)
    }

    pub fn out(offset: u32) -> Self {
        Self::at(Table::Output, offset)
    }

    pub fn temp(offset: u32) -> Self {
        Self::at(Table::Temp, offset)
    }

    /// Marks the first input of an instruction as broadcast from lane 0.
    pub fn scalar(mut self) -> Self {
        self.scalar = true;
        self
    }

    /// Addresses this operand relative to the value at `offset` of `table`.
    pub fn indexed(mut self, table: Table, offset: u32) -> Self {
        self.index = Some((table, offset));
        self
    }
}

fn table_raw(table: Table) -> u32 {
    match table {
        Table::Literal => 1,
        Table::Input => 2,
        Table::Output => 4,
        Table::Temp => 7,
    }
}

#[derive(Debug, Clone, Default)]
pub struct ProgramBuilder {
    literals: Vec<f64>,
    inputs: Vec<CtabEntry>,
    code: Vec<u8>,
    count: u32,
}

impl ProgramBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn literals(mut self, literals: &[f64]) -> Self {
        self.literals.extend_from_slice(literals);
        self
    }

    /// Declares a float4 input named `name` at register `register`.
    pub fn input_float4(mut self, name: &str, register: u16, count: u16) -> Self {
        self.inputs.push(CtabEntry::float4(name, register, count));
        self
    }

    /// Declares an arbitrary input table entry.
    pub fn input(mut self, entry: CtabEntry) -> Self {
        self.inputs.push(entry);
        self
    }

    pub fn op(mut self, opcode: Opcode, components: u32, inputs: &[Reg], output: Reg) -> Self {
        let scalar = inputs.first().is_some_and(|r| r.scalar);
        let token = (u32::from(scalar) << 31) | (opcode.raw() << 20) | components;
        push_u32(&mut self.code, token);
        push_u32(&mut self.code, len_u32(inputs.len()));
        for reg in inputs.iter().chain(std::iter::once(&output)) {
            match reg.index {
                None => push_u32(&mut self.code, 0),
                Some((table, offset)) => {
                    push_u32(&mut self.code, 1);
                    push_u32(&mut self.code, table_raw(table));
                    push_u32(&mut self.code, offset);
                }
            }
            push_u32(&mut self.code, table_raw(reg.table));
            push_u32(&mut self.code, reg.offset);
        }
        self.count += 1;
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut out = Vec::new();
        push_u32(&mut out, (PRESHADER_VERSION_TAG << 16) | 0x0200);
        if !self.inputs.is_empty() {
            push_comment(&mut out, b"CTAB", &build_ctab(&self.inputs));
        }
        let mut clit = Vec::new();
        push_u32(&mut clit, len_u32(self.literals.len()));
        for l in &self.literals {
            clit.extend_from_slice(&l.to_le_bytes());
        }
        push_comment(&mut out, b"CLIT", &clit);
        let mut fxlc = Vec::new();
        push_u32(&mut fxlc, self.count);
        fxlc.extend_from_slice(&self.code);
        push_comment(&mut out, b"FXLC", &fxlc);
        push_u32(&mut out, 0x0000_FFFF);
        out
    }
}

/// Shader model 2.0 bytecode carrying a constant table and an optional `PRES` preshader.
pub fn shader_bytecode(stage: ShaderStage, constants: &[CtabEntry], preshader: Option<&[u8]>) -> Vec<u8> {
    let mut out = Vec::new();
    let kind = match stage {
        ShaderStage::Vertex => 0xFFFE,
        ShaderStage::Pixel => 0xFFFF,
    };
    push_u32(&mut out, (kind << 16) | 0x0200);
    push_comment(&mut out, b"CTAB", &build_ctab(constants));
    if let Some(pres) = preshader {
        push_comment(&mut out, b"PRES", pres);
    }
    push_u32(&mut out, 0x0000_FFFF);
    out
}

// -------------------------------------------------------------------------------------------------
// Effect blobs
// -------------------------------------------------------------------------------------------------

/// A typedef.
#[derive(Debug, Clone)]
pub struct TypeSpec {
    ty: u32,
    class: u32,
    name: Option<String>,
    semantic: Option<String>,
    elements: u32,
    rows: u32,
    columns: u32,
    members: Vec<TypeSpec>,
}

impl TypeSpec {
    /// A typedef with explicit raw type and class and no shape.
    pub fn raw(ty: u32, class: u32, name: &str) -> Self {
        Self {
            ty,
            class,
            name: Some(name.to_owned()).filter(|n| !n.is_empty()),
            semantic: None,
            elements: 0,
            rows: 0,
            columns: 0,
            members: Vec::new(),
        }
    }

    pub fn scalar(ty: u32, name: &str) -> Self {
        Self {
            rows: 1,
            columns: 1,
            ..Self::raw(ty, class::SCALAR, name)
        }
    }

    pub fn vector(ty: u32, name: &str, columns: u32) -> Self {
        Self {
            rows: 1,
            columns,
            ..Self::raw(ty, class::VECTOR, name)
        }
    }

    pub fn matrix_rows(ty: u32, name: &str, rows: u32, columns: u32) -> Self {
        Self {
            rows,
            columns,
            ..Self::raw(ty, class::MATRIX_ROWS, name)
        }
    }

    pub fn matrix_columns(ty: u32, name: &str, rows: u32, columns: u32) -> Self {
        Self {
            rows,
            columns,
            ..Self::raw(ty, class::MATRIX_COLUMNS, name)
        }
    }

    pub fn object(ty: u32, name: &str) -> Self {
        Self::raw(ty, class::OBJECT, name)
    }

    pub fn structure(name: &str, members: Vec<TypeSpec>) -> Self {
        Self {
            members,
            ..Self::raw(ty::VOID, class::STRUCT, name)
        }
    }

    pub fn array(mut self, elements: u32) -> Self {
        self.elements = elements;
        self
    }

    pub fn with_semantic(mut self, semantic: &str) -> Self {
        self.semantic = Some(semantic.to_owned());
        self
    }
}

#[derive(Debug, Clone)]
enum ValuePart {
    Word(u32),
    Sampler(Vec<StateSpec>),
}

/// Initial value words, consumed leaf by leaf in tree order.
#[derive(Debug, Clone, Default)]
pub struct ValueSpec {
    parts: Vec<ValuePart>,
}

impl ValueSpec {
    pub fn words(words: &[u32]) -> Self {
        Self {
            parts: words.iter().map(|w| ValuePart::Word(*w)).collect(),
        }
    }

    pub fn floats(values: &[f32]) -> Self {
        Self::words(&values.iter().map(|v| v.to_bits()).collect::<Vec<_>>())
    }

    pub fn ints(values: &[i32]) -> Self {
        Self::words(&values.iter().map(|v| *v as u32).collect::<Vec<_>>())
    }

    pub fn object(id: u32) -> Self {
        Self::words(&[id])
    }

    /// Sampler leaf: a state list.
    pub fn sampler(states: Vec<StateSpec>) -> Self {
        Self {
            parts: vec![ValuePart::Sampler(states)],
        }
    }

    /// Concatenates another value after this one.
    pub fn then(mut self, other: ValueSpec) -> Self {
        self.parts.extend(other.parts);
        self
    }
}

/// A state assignment in a pass or sampler.
#[derive(Debug, Clone)]
pub struct StateSpec {
    operation: u32,
    index: u32,
    ty: TypeSpec,
    value: ValueSpec,
}

impl StateSpec {
    pub fn new(class: StateClass, op: u32, index: u32, ty: TypeSpec, value: ValueSpec) -> Self {
        let operation = state_index(class, op).expect("no state table entry for class/op");
        Self {
            operation,
            index,
            ty,
            value,
        }
    }

    /// A dword-valued state (render, texture stage, sampler states).
    pub fn dword(class: StateClass, op: u32, index: u32, value: u32) -> Self {
        Self::new(class, op, index, TypeSpec::scalar(ty::INT, ""), ValueSpec::words(&[value]))
    }

    pub fn float(class: StateClass, op: u32, index: u32, value: f32) -> Self {
        Self::new(class, op, index, TypeSpec::scalar(ty::FLOAT, ""), ValueSpec::floats(&[value]))
    }

    /// An object-valued state (shader or texture) referring to object `id`.
    pub fn object(class: StateClass, op: u32, index: u32, ty: u32, id: u32) -> Self {
        Self::new(class, op, index, TypeSpec::object(ty, ""), ValueSpec::object(id))
    }
}

/// A pass with its annotations and states.
#[derive(Debug, Clone, Default)]
pub struct PassSpec {
    name: Option<String>,
    annotations: Vec<(TypeSpec, ValueSpec)>,
    states: Vec<StateSpec>,
}

impl PassSpec {
    pub fn new(name: &str) -> Self {
        Self {
            name: Some(name.to_owned()),
            ..Self::default()
        }
    }

    pub fn annotation(mut self, ty: TypeSpec, value: ValueSpec) -> Self {
        self.annotations.push((ty, value));
        self
    }

    pub fn state(mut self, state: StateSpec) -> Self {
        self.states.push(state);
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct TechniqueSpec {
    name: Option<String>,
    annotations: Vec<(TypeSpec, ValueSpec)>,
    passes: Vec<PassSpec>,
}

impl TechniqueSpec {
    pub fn new(name: &str) -> Self {
        Self {
            name: Some(name.to_owned()),
            ..Self::default()
        }
    }

    pub fn annotation(mut self, ty: TypeSpec, value: ValueSpec) -> Self {
        self.annotations.push((ty, value));
        self
    }

    pub fn pass(mut self, pass: PassSpec) -> Self {
        self.passes.push(pass);
        self
    }
}

#[derive(Debug, Clone)]
struct ParameterSpec {
    ty: TypeSpec,
    value: ValueSpec,
    flags: u32,
    annotations: Vec<(TypeSpec, ValueSpec)>,
}

#[derive(Debug, Clone)]
struct ResourceSpec {
    technique: u32,
    index: u32,
    element: u32,
    state: u32,
    usage: u32,
    data: Vec<u8>,
}

/// Builds `fx_2_0` effect blobs.
#[derive(Debug, Clone, Default)]
pub struct EffectBuilder {
    parameters: Vec<ParameterSpec>,
    techniques: Vec<TechniqueSpec>,
    object_count: u32,
    object_data: Vec<(u32, Vec<u8>)>,
    resources: Vec<ResourceSpec>,
}

impl EffectBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parameter(&mut self, ty: TypeSpec, value: ValueSpec) -> &mut Self {
        self.parameter_with_flags(ty, value, 0, Vec::new())
    }

    pub fn annotated_parameter(
        &mut self,
        ty: TypeSpec,
        value: ValueSpec,
        annotations: Vec<(TypeSpec, ValueSpec)>,
    ) -> &mut Self {
        self.parameter_with_flags(ty, value, 0, annotations)
    }

    /// A parameter flagged `SHARED`.
    pub fn shared_parameter(&mut self, ty: TypeSpec, value: ValueSpec) -> &mut Self {
        self.parameter_with_flags(ty, value, 1, Vec::new())
    }

    pub fn parameter_with_flags(
        &mut self,
        ty: TypeSpec,
        value: ValueSpec,
        flags: u32,
        annotations: Vec<(TypeSpec, ValueSpec)>,
    ) -> &mut Self {
        self.parameters.push(ParameterSpec {
            ty,
            value,
            flags,
            annotations,
        });
        self
    }

    pub fn technique(&mut self, technique: TechniqueSpec) -> &mut Self {
        self.techniques.push(technique);
        self
    }

    pub fn object_count(&mut self, count: u32) -> &mut Self {
        self.object_count = count;
        self
    }

    /// Allocates a new object id.
    pub fn add_object(&mut self) -> u32 {
        self.object_count += 1;
        self.object_count - 1
    }

    /// Binds raw data (string bytes or shader bytecode) to object `id`.
    pub fn object_data(&mut self, id: u32, data: &[u8]) -> &mut Self {
        self.object_data.push((id, data.to_vec()));
        self
    }

    /// Binds a NUL-terminated string literal to object `id`.
    pub fn string(&mut self, id: u32, value: &str) -> &mut Self {
        let mut data = value.as_bytes().to_vec();
        data.push(0);
        self.object_data(id, &data)
    }

    /// Attaches late-bound data to state `state` of pass `pass` of technique `technique`.
    pub fn pass_resource(
        &mut self,
        technique: u32,
        pass: u32,
        state: u32,
        usage: u32,
        data: &[u8],
    ) -> &mut Self {
        self.resources.push(ResourceSpec {
            technique,
            index: pass,
            element: NO_INDEX,
            state,
            usage,
            data: data.to_vec(),
        });
        self
    }

    /// Attaches late-bound data to sampler state `state` of top-level parameter `parameter`.
    pub fn sampler_resource(
        &mut self,
        parameter: u32,
        element: Option<u32>,
        state: u32,
        usage: u32,
        data: &[u8],
    ) -> &mut Self {
        self.resources.push(ResourceSpec {
            technique: NO_INDEX,
            index: parameter,
            element: element.unwrap_or(NO_INDEX),
            state,
            usage,
            data: data.to_vec(),
        });
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut w = Writer::default();
        // Offset 0 holds an empty name so absent names can point at it.
        w.push_words(&[0]);

        let mut records = Vec::new();
        records.push(len_u32(self.parameters.len()));
        records.push(len_u32(self.techniques.len()));
        records.push(0);
        records.push(self.object_count);
        for p in &self.parameters {
            records.push(w.typedef(&p.ty));
            records.push(w.value(&p.value));
            records.push(p.flags);
            records.push(len_u32(p.annotations.len()));
            w.annotations(&p.annotations, &mut records);
        }
        for t in &self.techniques {
            records.push(w.name(t.name.as_deref()));
            records.push(len_u32(t.annotations.len()));
            records.push(len_u32(t.passes.len()));
            w.annotations(&t.annotations, &mut records);
            for pass in &t.passes {
                records.push(w.name(pass.name.as_deref()));
                records.push(len_u32(pass.annotations.len()));
                records.push(len_u32(pass.states.len()));
                w.annotations(&pass.annotations, &mut records);
                for s in &pass.states {
                    w.state(s, &mut records);
                }
            }
        }

        let start = len_u32(w.data.len());
        let mut data = std::mem::take(&mut w.data);
        for r in records {
            push_u32(&mut data, r);
        }
        push_u32(&mut data, len_u32(self.object_data.len()));
        push_u32(&mut data, len_u32(self.resources.len()));
        for (id, bytes) in &self.object_data {
            push_u32(&mut data, *id);
            push_u32(&mut data, len_u32(bytes.len()));
            data.extend_from_slice(bytes);
            pad4(&mut data);
        }
        for r in &self.resources {
            for v in [r.technique, r.index, r.element, r.state, r.usage, len_u32(r.data.len())] {
                push_u32(&mut data, v);
            }
            data.extend_from_slice(&r.data);
            pad4(&mut data);
        }

        let mut out = Vec::with_capacity(8 + data.len());
        push_u32(&mut out, EFFECT_TAG);
        push_u32(&mut out, start);
        out.extend_from_slice(&data);
        out
    }
}

/// Resource data for [`usage::PARAMETER`].
pub fn parameter_path_data(path: &str) -> Vec<u8> {
    let mut out = path.as_bytes().to_vec();
    out.push(0);
    out
}

/// Resource data for [`usage::ARRAY_SELECTOR`].
pub fn array_selector_data(path: &str, program: &[u8]) -> Vec<u8> {
    let name = parameter_path_data(path);
    let mut out = Vec::new();
    push_u32(&mut out, len_u32(name.len()));
    out.extend_from_slice(&name);
    pad4(&mut out);
    out.extend_from_slice(program);
    out
}

#[derive(Default)]
struct Writer {
    data: Vec<u8>,
}

impl Writer {
    fn push_words(&mut self, words: &[u32]) -> u32 {
        let offset = len_u32(self.data.len());
        for w in words {
            push_u32(&mut self.data, *w);
        }
        offset
    }

    fn name(&mut self, name: Option<&str>) -> u32 {
        let Some(name) = name else { return 0 };
        let offset = len_u32(self.data.len());
        push_u32(&mut self.data, len_u32(name.len() + 1));
        self.data.extend_from_slice(name.as_bytes());
        self.data.push(0);
        pad4(&mut self.data);
        offset
    }

    fn typedef_words(&mut self, t: &TypeSpec, out: &mut Vec<u32>) {
        let name = self.name(t.name.as_deref());
        let semantic = self.name(t.semantic.as_deref());
        out.extend([t.ty, t.class, name, semantic, t.elements]);
        match t.class {
            class::VECTOR => out.push(t.columns),
            class::SCALAR | class::MATRIX_ROWS | class::MATRIX_COLUMNS => {
                out.extend([t.rows, t.columns])
            }
            class::STRUCT => {
                out.push(len_u32(t.members.len()));
                for m in &t.members {
                    self.typedef_words(m, out);
                }
            }
            _ => {}
        }
    }

    fn typedef(&mut self, t: &TypeSpec) -> u32 {
        let mut words = Vec::new();
        self.typedef_words(t, &mut words);
        self.push_words(&words)
    }

    fn value(&mut self, v: &ValueSpec) -> u32 {
        let mut words = Vec::new();
        for part in &v.parts {
            match part {
                ValuePart::Word(w) => words.push(*w),
                ValuePart::Sampler(states) => {
                    words.push(len_u32(states.len()));
                    for s in states {
                        self.state(s, &mut words);
                    }
                }
            }
        }
        self.push_words(&words)
    }

    fn state(&mut self, s: &StateSpec, out: &mut Vec<u32>) {
        let typedef = self.typedef(&s.ty);
        let value = self.value(&s.value);
        out.extend([s.operation, s.index, typedef, value]);
    }

    /// Emits `(typedef, value)` pairs; the count is part of the enclosing record header.
    fn annotations(&mut self, list: &[(TypeSpec, ValueSpec)], out: &mut Vec<u32>) {
        for (ty, value) in list {
            out.push(self.typedef(ty));
            out.push(self.value(value));
        }
    }
}

// -------------------------------------------------------------------------------------------------
// Recording device
// -------------------------------------------------------------------------------------------------

/// One state-setting call observed by a [`RecordingDevice`].
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    RenderState(u32, u32),
    TextureStage(u32, u32, u32),
    Sampler(u32, u32, u32),
    Texture(u32),
    Transform(u32),
    Light(u32),
    LightEnable(u32, bool),
    Material,
    VertexShader,
    PixelShader,
    Fvf(u32),
    NPatchMode,
    /// `(start register, register count)`.
    VertexConstF(u32, usize),
    VertexConstI(u32, usize),
    VertexConstB(u32, usize),
    PixelConstF(u32, usize),
    PixelConstI(u32, usize),
    PixelConstB(u32, usize),
}

/// Device state held by a [`RecordingDevice`].
///
/// Entries holding the default value (zero, `false`, `None`) are removed instead of stored, so two
/// states compare equal whenever every query would return the same thing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceState {
    pub render: HashMap<u32, u32>,
    pub texture_stage: HashMap<(u32, u32), u32>,
    pub sampler: HashMap<(u32, u32), u32>,
    pub textures: HashMap<u32, Rc<Texture>>,
    pub transforms: HashMap<u32, Matrix4>,
    pub lights: HashMap<u32, Light>,
    pub lights_enabled: HashMap<u32, bool>,
    pub material: Material,
    pub vertex_shader: Option<Rc<Shader>>,
    pub pixel_shader: Option<Rc<Shader>>,
    pub fvf: u32,
    pub npatch_mode: f32,
    pub vs_float: HashMap<u32, [f32; 4]>,
    pub vs_int: HashMap<u32, [i32; 4]>,
    pub vs_bool: HashMap<u32, bool>,
    pub ps_float: HashMap<u32, [f32; 4]>,
    pub ps_int: HashMap<u32, [i32; 4]>,
    pub ps_bool: HashMap<u32, bool>,
}

fn put<K: Eq + Hash, V: Default + PartialEq>(map: &mut HashMap<K, V>, key: K, value: V) {
    if value == V::default() {
        map.remove(&key);
    } else {
        map.insert(key, value);
    }
}

fn get<K: Eq + Hash, V: Default + Clone>(map: &HashMap<K, V>, key: &K) -> V {
    map.get(key).cloned().unwrap_or_default()
}

fn put_registers<T: Copy + Default + PartialEq>(
    map: &mut HashMap<u32, [T; 4]>,
    start: u32,
    data: &[T],
) -> usize {
    let mut count = 0;
    for (i, chunk) in data.chunks_exact(4).enumerate() {
        let mut reg = [T::default(); 4];
        reg.copy_from_slice(chunk);
        put(map, start + len_u32(i), reg);
        count += 1;
    }
    count
}

/// In-memory [`EffectDevice`] that stores every state and logs every call.
///
/// Also usable as a [`StateManager`] on its own (wrap it in `Rc<RefCell<_>>`).
#[derive(Debug, Clone, Default)]
pub struct RecordingDevice {
    pub state: DeviceState,
    pub calls: Vec<Call>,
}

impl RecordingDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes the call log, leaving it empty.
    pub fn take_calls(&mut self) -> Vec<Call> {
        std::mem::take(&mut self.calls)
    }
}

impl StateManager for RecordingDevice {
    fn set_render_state(&mut self, state: u32, value: u32) {
        self.calls.push(Call::RenderState(state, value));
        put(&mut self.state.render, state, value);
    }
    fn set_texture_stage_state(&mut self, stage: u32, ty: u32, value: u32) {
        self.calls.push(Call::TextureStage(stage, ty, value));
        put(&mut self.state.texture_stage, (stage, ty), value);
    }
    fn set_sampler_state(&mut self, sampler: u32, ty: u32, value: u32) {
        self.calls.push(Call::Sampler(sampler, ty, value));
        put(&mut self.state.sampler, (sampler, ty), value);
    }
    fn set_texture(&mut self, stage: u32, texture: Option<Rc<Texture>>) {
        self.calls.push(Call::Texture(stage));
        match texture {
            Some(t) => self.state.textures.insert(stage, t),
            None => self.state.textures.remove(&stage),
        };
    }
    fn set_transform(&mut self, state: u32, matrix: &Matrix4) {
        self.calls.push(Call::Transform(state));
        if *matrix == [[0.0; 4]; 4] {
            self.state.transforms.remove(&state);
        } else {
            self.state.transforms.insert(state, *matrix);
        }
    }
    fn set_light(&mut self, index: u32, light: &Light) {
        self.calls.push(Call::Light(index));
        put(&mut self.state.lights, index, *light);
    }
    fn light_enable(&mut self, index: u32, enable: bool) {
        self.calls.push(Call::LightEnable(index, enable));
        put(&mut self.state.lights_enabled, index, enable);
    }
    fn set_material(&mut self, material: &Material) {
        self.calls.push(Call::Material);
        self.state.material = *material;
    }
    fn set_vertex_shader(&mut self, shader: Option<Rc<Shader>>) {
        self.calls.push(Call::VertexShader);
        self.state.vertex_shader = shader;
    }
    fn set_pixel_shader(&mut self, shader: Option<Rc<Shader>>) {
        self.calls.push(Call::PixelShader);
        self.state.pixel_shader = shader;
    }
    fn set_fvf(&mut self, fvf: u32) {
        self.calls.push(Call::Fvf(fvf));
        self.state.fvf = fvf;
    }
    fn set_npatch_mode(&mut self, segments: f32) {
        self.calls.push(Call::NPatchMode);
        self.state.npatch_mode = segments;
    }
    fn set_vertex_shader_constant_f(&mut self, start: u32, data: &[f32]) {
        let n = put_registers(&mut self.state.vs_float, start, data);
        self.calls.push(Call::VertexConstF(start, n));
    }
    fn set_vertex_shader_constant_i(&mut self, start: u32, data: &[i32]) {
        let n = put_registers(&mut self.state.vs_int, start, data);
        self.calls.push(Call::VertexConstI(start, n));
    }
    fn set_vertex_shader_constant_b(&mut self, start: u32, data: &[bool]) {
        for (i, b) in data.iter().enumerate() {
            put(&mut self.state.vs_bool, start + len_u32(i), *b);
        }
        self.calls.push(Call::VertexConstB(start, data.len()));
    }
    fn set_pixel_shader_constant_f(&mut self, start: u32, data: &[f32]) {
        let n = put_registers(&mut self.state.ps_float, start, data);
        self.calls.push(Call::PixelConstF(start, n));
    }
    fn set_pixel_shader_constant_i(&mut self, start: u32, data: &[i32]) {
        let n = put_registers(&mut self.state.ps_int, start, data);
        self.calls.push(Call::PixelConstI(start, n));
    }
    fn set_pixel_shader_constant_b(&mut self, start: u32, data: &[bool]) {
        for (i, b) in data.iter().enumerate() {
            put(&mut self.state.ps_bool, start + len_u32(i), *b);
        }
        self.calls.push(Call::PixelConstB(start, data.len()));
    }
}

impl EffectDevice for RecordingDevice {
    fn render_state(&self, state: u32) -> u32 {
        get(&self.state.render, &state)
    }
    fn texture_stage_state(&self, stage: u32, ty: u32) -> u32 {
        get(&self.state.texture_stage, &(stage, ty))
    }
    fn sampler_state(&self, sampler: u32, ty: u32) -> u32 {
        get(&self.state.sampler, &(sampler, ty))
    }
    fn texture(&self, stage: u32) -> Option<Rc<Texture>> {
        self.state.textures.get(&stage).cloned()
    }
    fn transform(&self, state: u32) -> Matrix4 {
        self.state.transforms.get(&state).copied().unwrap_or([[0.0; 4]; 4])
    }
    fn light(&self, index: u32) -> Light {
        get(&self.state.lights, &index)
    }
    fn light_enabled(&self, index: u32) -> bool {
        get(&self.state.lights_enabled, &index)
    }
    fn material(&self) -> Material {
        self.state.material
    }
    fn vertex_shader(&self) -> Option<Rc<Shader>> {
        self.state.vertex_shader.clone()
    }
    fn pixel_shader(&self) -> Option<Rc<Shader>> {
        self.state.pixel_shader.clone()
    }
    fn fvf(&self) -> u32 {
        self.state.fvf
    }
    fn npatch_mode(&self) -> f32 {
        self.state.npatch_mode
    }
    fn vertex_shader_constant_f(&self, register: u32) -> [f32; 4] {
        get(&self.state.vs_float, &register)
    }
    fn vertex_shader_constant_i(&self, register: u32) -> [i32; 4] {
        get(&self.state.vs_int, &register)
    }
    fn vertex_shader_constant_b(&self, register: u32) -> bool {
        get(&self.state.vs_bool, &register)
    }
    fn pixel_shader_constant_f(&self, register: u32) -> [f32; 4] {
        get(&self.state.ps_float, &register)
    }
    fn pixel_shader_constant_i(&self, register: u32) -> [i32; 4] {
        get(&self.state.ps_int, &register)
    }
    fn pixel_shader_constant_b(&self, register: u32) -> bool {
        get(&self.state.ps_bool, &register)
    }
}
