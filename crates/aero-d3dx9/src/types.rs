//! Effect type model: parameter classes/types, flags, handles and descriptors.

use std::rc::Rc;

use bitflags::bitflags;

use crate::object::Shader;

/// Four-component float vector (`D3DXVECTOR4`).
pub type Vector4 = [f32; 4];

/// Row-major 4x4 float matrix (`D3DXMATRIX`).
pub type Matrix4 = [[f32; 4]; 4];

/// `D3DXPARAMETER_CLASS`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParameterClass {
    Scalar,
    Vector,
    MatrixRows,
    MatrixColumns,
    Object,
    Struct,
}

impl ParameterClass {
    pub fn from_raw(raw: u32) -> Option<Self> {
        Some(match raw {
            0 => Self::Scalar,
            1 => Self::Vector,
            2 => Self::MatrixRows,
            3 => Self::MatrixColumns,
            4 => Self::Object,
            5 => Self::Struct,
            _ => return None,
        })
    }

    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            Self::Scalar | Self::Vector | Self::MatrixRows | Self::MatrixColumns
        )
    }
}

/// `D3DXPARAMETER_TYPE`.
///
/// Fragment types and anything the runtime cannot store map to [`ParameterType::Unsupported`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParameterType {
    Void,
    Bool,
    Int,
    Float,
    String,
    Texture,
    Texture1D,
    Texture2D,
    Texture3D,
    TextureCube,
    Sampler,
    Sampler1D,
    Sampler2D,
    Sampler3D,
    SamplerCube,
    PixelShader,
    VertexShader,
    Unsupported,
}

impl ParameterType {
    pub fn from_raw(raw: u32) -> Option<Self> {
        Some(match raw {
            0 => Self::Void,
            1 => Self::Bool,
            2 => Self::Int,
            3 => Self::Float,
            4 => Self::String,
            5 => Self::Texture,
            6 => Self::Texture1D,
            7 => Self::Texture2D,
            8 => Self::Texture3D,
            9 => Self::TextureCube,
            10 => Self::Sampler,
            11 => Self::Sampler1D,
            12 => Self::Sampler2D,
            13 => Self::Sampler3D,
            14 => Self::SamplerCube,
            15 => Self::PixelShader,
            16 => Self::VertexShader,
            17..=19 => Self::Unsupported,
            _ => return None,
        })
    }

    pub fn is_numeric(self) -> bool {
        matches!(self, Self::Void | Self::Bool | Self::Int | Self::Float)
    }

    pub fn is_texture(self) -> bool {
        matches!(
            self,
            Self::Texture | Self::Texture1D | Self::Texture2D | Self::Texture3D | Self::TextureCube
        )
    }

    pub fn is_sampler(self) -> bool {
        matches!(
            self,
            Self::Sampler | Self::Sampler1D | Self::Sampler2D | Self::Sampler3D | Self::SamplerCube
        )
    }

    pub fn is_shader(self) -> bool {
        matches!(self, Self::PixelShader | Self::VertexShader)
    }

    /// Types stored as one object slot per element (strings, textures, shaders).
    pub(crate) fn is_object_slot(self) -> bool {
        self == Self::String || self.is_texture() || self.is_shader()
    }
}

bitflags! {
    /// `D3DX_PARAMETER_*` flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ParameterFlags: u32 {
        const SHARED = 0x1;
        const LITERAL = 0x2;
        const ANNOTATION = 0x4;
    }
}

bitflags! {
    /// `D3DXFX_*` flags accepted by [`crate::Effect::begin`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct BeginFlags: u32 {
        const DONOTSAVESTATE = 0x1;
        const DONOTSAVESHADERSTATE = 0x2;
        const DONOTSAVESAMPLERSTATE = 0x4;
    }
}

/// Handle to a parameter or annotation owned by an [`crate::Effect`].
///
/// Handles are arena indices; they are only meaningful for the effect that produced them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParamHandle(pub(crate) u32);

/// Handle to a technique.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TechniqueHandle(pub(crate) u32);

/// Handle to a pass of a technique.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PassHandle {
    pub(crate) technique: u32,
    pub(crate) pass: u32,
}

/// Handle to a recorded parameter block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParameterBlockHandle(pub(crate) u32);

/// Anything that can carry annotations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Annotated {
    Parameter(ParamHandle),
    Technique(TechniqueHandle),
    Pass(PassHandle),
}

impl From<ParamHandle> for Annotated {
    fn from(h: ParamHandle) -> Self {
        Self::Parameter(h)
    }
}

impl From<TechniqueHandle> for Annotated {
    fn from(h: TechniqueHandle) -> Self {
        Self::Technique(h)
    }
}

impl From<PassHandle> for Annotated {
    fn from(h: PassHandle) -> Self {
        Self::Pass(h)
    }
}

/// `D3DXPARAMETER_DESC`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterDesc<'a> {
    pub name: Option<&'a str>,
    pub semantic: Option<&'a str>,
    pub class: ParameterClass,
    pub ty: ParameterType,
    pub rows: u32,
    pub columns: u32,
    pub elements: u32,
    pub annotations: u32,
    pub struct_members: u32,
    pub flags: ParameterFlags,
    pub bytes: u32,
}

/// `D3DXEFFECT_DESC` (the counts that exist without a compiler).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EffectDesc {
    pub parameters: u32,
    pub techniques: u32,
}

/// `D3DXTECHNIQUE_DESC`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TechniqueDesc<'a> {
    pub name: Option<&'a str>,
    pub passes: u32,
    pub annotations: u32,
}

/// `D3DXPASS_DESC`.
#[derive(Debug, Clone)]
pub struct PassDesc<'a> {
    pub name: Option<&'a str>,
    pub annotations: u32,
    pub vertex_shader: Option<Rc<Shader>>,
    pub pixel_shader: Option<Rc<Shader>>,
}
