//! Reference-counted object values held by effect parameters: strings, textures and shaders.

use std::fmt;
use std::rc::Rc;

use crate::ctab::{parse_constant_table, ConstantTable};
use crate::error::ParseError;
use crate::preshader::Program;
use crate::reader::{comment_blocks, fourcc, read_u32_le};
use crate::types::ParameterType;

const CTAB: u32 = fourcc(b"CTAB");
const PRES: u32 = fourcc(b"PRES");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Pixel,
}

/// A D3D9 shader decoded from effect bytecode.
///
/// The bytecode is kept verbatim for the device; the constant table and the optional preshader are
/// decoded so the effect can feed the shader its constants.
#[derive(Debug, PartialEq)]
pub struct Shader {
    stage: ShaderStage,
    major: u8,
    minor: u8,
    bytecode: Vec<u8>,
    constants: ConstantTable,
    preshader: Option<Program>,
}

impl Shader {
    pub fn parse(bytecode: &[u8]) -> Result<Self, ParseError> {
        let version = read_u32_le(bytecode, 0, "shader version token")?;
        let stage = match version >> 16 {
            0xFFFE => ShaderStage::Vertex,
            0xFFFF => ShaderStage::Pixel,
            other => {
                return Err(ParseError::invalid(format!(
                    "bad shader version token {version:#010x} (type {other:#06x})"
                )))
            }
        };
        if bytecode.len() % 4 != 0 {
            return Err(ParseError::invalid(format!(
                "shader bytecode length {} is not a multiple of 4",
                bytecode.len()
            )));
        }

        let (blocks, _) = comment_blocks(bytecode, 4)?;
        let mut constants = ConstantTable::default();
        let mut preshader = None;
        for block in blocks {
            match block.fourcc {
                CTAB => constants = parse_constant_table(block.body)?,
                PRES => preshader = Some(Program::parse(block.body)?),
                _ => {}
            }
        }

        Ok(Self {
            stage,
            major: ((version >> 8) & 0xFF) as u8,
            minor: (version & 0xFF) as u8,
            bytecode: bytecode.to_vec(),
            constants,
            preshader,
        })
    }

    pub fn stage(&self) -> ShaderStage {
        self.stage
    }

    /// Shader model as `(major, minor)`.
    pub fn version(&self) -> (u8, u8) {
        (self.major, self.minor)
    }

    pub fn bytecode(&self) -> &[u8] {
        &self.bytecode
    }

    pub fn constant_table(&self) -> &ConstantTable {
        &self.constants
    }

    pub fn preshader(&self) -> Option<&Program> {
        self.preshader.as_ref()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureKind {
    Texture1D,
    Texture2D,
    Texture3D,
    Cube,
}

/// Host-owned texture resource.
///
/// The runtime never looks inside a texture; it only moves references between parameters and the
/// device.
#[derive(Debug, PartialEq, Eq)]
pub struct Texture {
    kind: TextureKind,
    label: String,
}

impl Texture {
    pub fn new(kind: TextureKind, label: impl Into<String>) -> Self {
        Self {
            kind,
            label: label.into(),
        }
    }

    pub fn kind(&self) -> TextureKind {
        self.kind
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Whether a texture of this kind may be stored in a parameter of type `ty`.
    pub(crate) fn fits(&self, ty: ParameterType) -> bool {
        match ty {
            ParameterType::Texture => true,
            ParameterType::Texture1D => self.kind == TextureKind::Texture1D,
            ParameterType::Texture2D => self.kind == TextureKind::Texture2D,
            ParameterType::Texture3D => self.kind == TextureKind::Texture3D,
            ParameterType::TextureCube => self.kind == TextureKind::Cube,
            _ => false,
        }
    }
}

/// Value of an object slot.
///
/// Cloning shares the underlying object; equality is identity.
#[derive(Clone)]
pub enum EffectObject {
    String(Rc<str>),
    Texture(Rc<Texture>),
    VertexShader(Rc<Shader>),
    PixelShader(Rc<Shader>),
}

impl EffectObject {
    /// Whether this object may be stored in a parameter of type `ty`.
    pub(crate) fn fits(&self, ty: ParameterType) -> bool {
        match self {
            Self::String(_) => ty == ParameterType::String,
            Self::Texture(t) => t.fits(ty),
            Self::VertexShader(_) => ty == ParameterType::VertexShader,
            Self::PixelShader(_) => ty == ParameterType::PixelShader,
        }
    }

    pub(crate) fn shader(shader: Rc<Shader>) -> Self {
        match shader.stage() {
            ShaderStage::Vertex => Self::VertexShader(shader),
            ShaderStage::Pixel => Self::PixelShader(shader),
        }
    }

    pub(crate) fn as_shader(&self) -> Option<&Rc<Shader>> {
        match self {
            Self::VertexShader(s) | Self::PixelShader(s) => Some(s),
            _ => None,
        }
    }

    pub(crate) fn as_texture(&self) -> Option<&Rc<Texture>> {
        match self {
            Self::Texture(t) => Some(t),
            _ => None,
        }
    }
}

impl PartialEq for EffectObject {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::String(a), Self::String(b)) => Rc::ptr_eq(a, b),
            (Self::Texture(a), Self::Texture(b)) => Rc::ptr_eq(a, b),
            (Self::VertexShader(a), Self::VertexShader(b))
            | (Self::PixelShader(a), Self::PixelShader(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for EffectObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => f.debug_tuple("String").field(s).finish(),
            Self::Texture(t) => f.debug_tuple("Texture").field(&t.label).finish(),
            Self::VertexShader(s) => write!(f, "VertexShader({} bytes)", s.bytecode.len()),
            Self::PixelShader(s) => write!(f, "PixelShader({} bytes)", s.bytecode.len()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ctab::RegisterSet;
    use crate::preshader::Opcode;
    use crate::test_utils::{shader_bytecode, CtabEntry, ProgramBuilder, Reg};

    #[test]
    fn parses_stage_version_and_constant_table() {
        let code = shader_bytecode(
            ShaderStage::Pixel,
            &[CtabEntry::float4("tint", 2, 1), CtabEntry::new("s", RegisterSet::Sampler, 0, 1)],
            None,
        );
        let shader = Shader::parse(&code).unwrap();
        assert_eq!(shader.stage(), ShaderStage::Pixel);
        assert_eq!(shader.version(), (2, 0));
        assert_eq!(shader.constant_table().constants.len(), 2);
        assert!(shader.preshader().is_none());
        assert_eq!(shader.bytecode(), &code[..]);
    }

    #[test]
    fn parses_embedded_preshader() {
        let pres = ProgramBuilder::new()
            .input_float4("scale", 0, 1)
            .op(Opcode::Add, 4, &[Reg::input(0), Reg::input(0)], Reg::out(8))
            .build();
        let code = shader_bytecode(ShaderStage::Vertex, &[], Some(&pres));
        let shader = Shader::parse(&code).unwrap();
        let program = shader.preshader().unwrap();
        assert_eq!(program.written_output_registers(), vec![2]);
    }

    #[test]
    fn rejects_non_shader_token() {
        let err = Shader::parse(&0x4658_0101u32.to_le_bytes()).unwrap_err();
        assert!(matches!(err, ParseError::InvalidFormat(_)));
    }

    #[test]
    fn object_equality_is_identity() {
        let a: Rc<str> = Rc::from("x");
        let b: Rc<str> = Rc::from("x");
        assert_eq!(EffectObject::String(a.clone()), EffectObject::String(a));
        assert_ne!(
            EffectObject::String(Rc::from("x")),
            EffectObject::String(b)
        );
    }

    #[test]
    fn texture_kind_must_match_typed_parameters() {
        let t = Texture::new(TextureKind::Cube, "env");
        assert!(t.fits(ParameterType::Texture));
        assert!(t.fits(ParameterType::TextureCube));
        assert!(!t.fits(ParameterType::Texture2D));
    }
}
