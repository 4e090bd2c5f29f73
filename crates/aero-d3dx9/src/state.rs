//! State assignment table: maps the `operation` index stored in effect blobs to the device state it
//! drives.

use crate::d3d9::*;

/// Device call family a state operation is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateClass {
    RenderState,
    TextureStage,
    NPatchMode,
    Fvf,
    Transform,
    Material,
    Light,
    LightEnable,
    VertexShader,
    PixelShader,
    ShaderConst,
    Texture,
    SamplerState,
    SetSampler,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateInfo {
    pub class: StateClass,
    /// Device enumerant (render state id, sampler state type, transform base, field selector).
    pub op: u32,
    pub name: &'static str,
}

/// Material field selectors (`op` of [`StateClass::Material`]).
pub mod material_field {
    pub const DIFFUSE: u32 = 0;
    pub const AMBIENT: u32 = 1;
    pub const SPECULAR: u32 = 2;
    pub const EMISSIVE: u32 = 3;
    pub const POWER: u32 = 4;
}

/// Light field selectors (`op` of [`StateClass::Light`]).
pub mod light_field {
    pub const TYPE: u32 = 0;
    pub const DIFFUSE: u32 = 1;
    pub const SPECULAR: u32 = 2;
    pub const AMBIENT: u32 = 3;
    pub const POSITION: u32 = 4;
    pub const DIRECTION: u32 = 5;
    pub const RANGE: u32 = 6;
    pub const FALLOFF: u32 = 7;
    pub const ATTENUATION0: u32 = 8;
    pub const ATTENUATION1: u32 = 9;
    pub const ATTENUATION2: u32 = 10;
    pub const THETA: u32 = 11;
    pub const PHI: u32 = 12;
}

/// Shader constant families (`op` of [`StateClass::ShaderConst`]).
pub mod shader_const {
    pub const VS_FLOAT: u32 = 0;
    pub const VS_BOOL: u32 = 1;
    pub const VS_INT: u32 = 2;
    pub const PS_FLOAT: u32 = 3;
    pub const PS_BOOL: u32 = 4;
    pub const PS_INT: u32 = 5;
}

macro_rules! states {
    ($($class:ident $op:expr, $name:literal;)*) => {
        &[$(StateInfo { class: StateClass::$class, op: $op, name: $name },)*]
    };
}

pub static STATE_TABLE: &[StateInfo] = states! {
    RenderState D3DRS_ZENABLE, "ZENABLE";
    RenderState D3DRS_FILLMODE, "FILLMODE";
    RenderState D3DRS_SHADEMODE, "SHADEMODE";
    RenderState D3DRS_ZWRITEENABLE, "ZWRITEENABLE";
    RenderState D3DRS_ALPHATESTENABLE, "ALPHATESTENABLE";
    RenderState D3DRS_LASTPIXEL, "LASTPIXEL";
    RenderState D3DRS_SRCBLEND, "SRCBLEND";
    RenderState D3DRS_DESTBLEND, "DESTBLEND";
    RenderState D3DRS_CULLMODE, "CULLMODE";
    RenderState D3DRS_ZFUNC, "ZFUNC";
    RenderState D3DRS_ALPHAREF, "ALPHAREF";
    RenderState D3DRS_ALPHAFUNC, "ALPHAFUNC";
    RenderState D3DRS_DITHERENABLE, "DITHERENABLE";
    RenderState D3DRS_ALPHABLENDENABLE, "ALPHABLENDENABLE";
    RenderState D3DRS_FOGENABLE, "FOGENABLE";
    RenderState D3DRS_SPECULARENABLE, "SPECULARENABLE";
    RenderState D3DRS_FOGCOLOR, "FOGCOLOR";
    RenderState D3DRS_FOGTABLEMODE, "FOGTABLEMODE";
    RenderState D3DRS_FOGSTART, "FOGSTART";
    RenderState D3DRS_FOGEND, "FOGEND";
    RenderState D3DRS_FOGDENSITY, "FOGDENSITY";
    RenderState D3DRS_RANGEFOGENABLE, "RANGEFOGENABLE";
    RenderState D3DRS_STENCILENABLE, "STENCILENABLE";
    RenderState D3DRS_STENCILFAIL, "STENCILFAIL";
    RenderState D3DRS_STENCILZFAIL, "STENCILZFAIL";
    RenderState D3DRS_STENCILPASS, "STENCILPASS";
    RenderState D3DRS_STENCILFUNC, "STENCILFUNC";
    RenderState D3DRS_STENCILREF, "STENCILREF";
    RenderState D3DRS_STENCILMASK, "STENCILMASK";
    RenderState D3DRS_STENCILWRITEMASK, "STENCILWRITEMASK";
    RenderState D3DRS_TEXTUREFACTOR, "TEXTUREFACTOR";
    RenderState D3DRS_WRAP0, "WRAP0";
    RenderState D3DRS_WRAP1, "WRAP1";
    RenderState D3DRS_WRAP2, "WRAP2";
    RenderState D3DRS_WRAP3, "WRAP3";
    RenderState D3DRS_WRAP4, "WRAP4";
    RenderState D3DRS_WRAP5, "WRAP5";
    RenderState D3DRS_WRAP6, "WRAP6";
    RenderState D3DRS_WRAP7, "WRAP7";
    RenderState D3DRS_WRAP8, "WRAP8";
    RenderState D3DRS_WRAP9, "WRAP9";
    RenderState D3DRS_WRAP10, "WRAP10";
    RenderState D3DRS_WRAP11, "WRAP11";
    RenderState D3DRS_WRAP12, "WRAP12";
    RenderState D3DRS_WRAP13, "WRAP13";
    RenderState D3DRS_WRAP14, "WRAP14";
    RenderState D3DRS_WRAP15, "WRAP15";
    RenderState D3DRS_CLIPPING, "CLIPPING";
    RenderState D3DRS_LIGHTING, "LIGHTING";
    RenderState D3DRS_AMBIENT, "AMBIENT";
    RenderState D3DRS_FOGVERTEXMODE, "FOGVERTEXMODE";
    RenderState D3DRS_COLORVERTEX, "COLORVERTEX";
    RenderState D3DRS_LOCALVIEWER, "LOCALVIEWER";
    RenderState D3DRS_NORMALIZENORMALS, "NORMALIZENORMALS";
    RenderState D3DRS_DIFFUSEMATERIALSOURCE, "DIFFUSEMATERIALSOURCE";
    RenderState D3DRS_SPECULARMATERIALSOURCE, "SPECULARMATERIALSOURCE";
    RenderState D3DRS_AMBIENTMATERIALSOURCE, "AMBIENTMATERIALSOURCE";
    RenderState D3DRS_EMISSIVEMATERIALSOURCE, "EMISSIVEMATERIALSOURCE";
    RenderState D3DRS_VERTEXBLEND, "VERTEXBLEND";
    RenderState D3DRS_CLIPPLANEENABLE, "CLIPPLANEENABLE";
    RenderState D3DRS_POINTSIZE, "POINTSIZE";
    RenderState D3DRS_POINTSIZE_MIN, "POINTSIZE_MIN";
    RenderState D3DRS_POINTSIZE_MAX, "POINTSIZE_MAX";
    RenderState D3DRS_POINTSPRITEENABLE, "POINTSPRITEENABLE";
    RenderState D3DRS_POINTSCALEENABLE, "POINTSCALEENABLE";
    RenderState D3DRS_POINTSCALE_A, "POINTSCALE_A";
    RenderState D3DRS_POINTSCALE_B, "POINTSCALE_B";
    RenderState D3DRS_POINTSCALE_C, "POINTSCALE_C";
    RenderState D3DRS_MULTISAMPLEANTIALIAS, "MULTISAMPLEANTIALIAS";
    RenderState D3DRS_MULTISAMPLEMASK, "MULTISAMPLEMASK";
    RenderState D3DRS_PATCHEDGESTYLE, "PATCHEDGESTYLE";
    RenderState D3DRS_DEBUGMONITORTOKEN, "DEBUGMONITORTOKEN";
    RenderState D3DRS_INDEXEDVERTEXBLENDENABLE, "INDEXEDVERTEXBLENDENABLE";
    RenderState D3DRS_COLORWRITEENABLE, "COLORWRITEENABLE";
    RenderState D3DRS_TWEENFACTOR, "TWEENFACTOR";
    RenderState D3DRS_BLENDOP, "BLENDOP";
    RenderState D3DRS_POSITIONDEGREE, "POSITIONDEGREE";
    RenderState D3DRS_NORMALDEGREE, "NORMALDEGREE";
    RenderState D3DRS_SCISSORTESTENABLE, "SCISSORTESTENABLE";
    RenderState D3DRS_SLOPESCALEDEPTHBIAS, "SLOPESCALEDEPTHBIAS";
    RenderState D3DRS_ANTIALIASEDLINEENABLE, "ANTIALIASEDLINEENABLE";
    RenderState D3DRS_MINTESSELLATIONLEVEL, "MINTESSELLATIONLEVEL";
    RenderState D3DRS_MAXTESSELLATIONLEVEL, "MAXTESSELLATIONLEVEL";
    RenderState D3DRS_ADAPTIVETESS_X, "ADAPTIVETESS_X";
    RenderState D3DRS_ADAPTIVETESS_Y, "ADAPTIVETESS_Y";
    RenderState D3DRS_ADAPTIVETESS_Z, "ADAPTIVETESS_Z";
    RenderState D3DRS_ADAPTIVETESS_W, "ADAPTIVETESS_W";
    RenderState D3DRS_ENABLEADAPTIVETESSELLATION, "ENABLEADAPTIVETESSELLATION";
    RenderState D3DRS_TWOSIDEDSTENCILMODE, "TWOSIDEDSTENCILMODE";
    RenderState D3DRS_CCW_STENCILFAIL, "CCW_STENCILFAIL";
    RenderState D3DRS_CCW_STENCILZFAIL, "CCW_STENCILZFAIL";
    RenderState D3DRS_CCW_STENCILPASS, "CCW_STENCILPASS";
    RenderState D3DRS_CCW_STENCILFUNC, "CCW_STENCILFUNC";
    RenderState D3DRS_COLORWRITEENABLE1, "COLORWRITEENABLE1";
    RenderState D3DRS_COLORWRITEENABLE2, "COLORWRITEENABLE2";
    RenderState D3DRS_COLORWRITEENABLE3, "COLORWRITEENABLE3";
    RenderState D3DRS_BLENDFACTOR, "BLENDFACTOR";
    RenderState D3DRS_SRGBWRITEENABLE, "SRGBWRITEENABLE";
    RenderState D3DRS_DEPTHBIAS, "DEPTHBIAS";
    RenderState D3DRS_SEPARATEALPHABLENDENABLE, "SEPARATEALPHABLENDENABLE";
    RenderState D3DRS_SRCBLENDALPHA, "SRCBLENDALPHA";
    RenderState D3DRS_DESTBLENDALPHA, "DESTBLENDALPHA";
    RenderState D3DRS_BLENDOPALPHA, "BLENDOPALPHA";

    TextureStage D3DTSS_COLOROP, "COLOROP";
    TextureStage D3DTSS_COLORARG0, "COLORARG0";
    TextureStage D3DTSS_COLORARG1, "COLORARG1";
    TextureStage D3DTSS_COLORARG2, "COLORARG2";
    TextureStage D3DTSS_ALPHAOP, "ALPHAOP";
    TextureStage D3DTSS_ALPHAARG0, "ALPHAARG0";
    TextureStage D3DTSS_ALPHAARG1, "ALPHAARG1";
    TextureStage D3DTSS_ALPHAARG2, "ALPHAARG2";
    TextureStage D3DTSS_RESULTARG, "RESULTARG";
    TextureStage D3DTSS_BUMPENVMAT00, "BUMPENVMAT00";
    TextureStage D3DTSS_BUMPENVMAT01, "BUMPENVMAT01";
    TextureStage D3DTSS_BUMPENVMAT10, "BUMPENVMAT10";
    TextureStage D3DTSS_BUMPENVMAT11, "BUMPENVMAT11";
    TextureStage D3DTSS_BUMPENVLSCALE, "BUMPENVLSCALE";
    TextureStage D3DTSS_BUMPENVLOFFSET, "BUMPENVLOFFSET";
    TextureStage D3DTSS_TEXCOORDINDEX, "TEXCOORDINDEX";
    TextureStage D3DTSS_TEXTURETRANSFORMFLAGS, "TEXTURETRANSFORMFLAGS";
    TextureStage D3DTSS_CONSTANT, "CONSTANT";

    NPatchMode 0, "NPATCHMODE";
    Fvf 0, "FVF";

    Transform D3DTS_PROJECTION, "PROJECTION";
    Transform D3DTS_VIEW, "VIEW";
    Transform D3DTS_WORLD, "WORLD";
    Transform D3DTS_TEXTURE0, "TEXTURE0";

    Material material_field::DIFFUSE, "MATERIALDIFFUSE";
    Material material_field::AMBIENT, "MATERIALAMBIENT";
    Material material_field::SPECULAR, "MATERIALSPECULAR";
    Material material_field::EMISSIVE, "MATERIALEMISSIVE";
    Material material_field::POWER, "MATERIALPOWER";

    Light light_field::TYPE, "LIGHTTYPE";
    Light light_field::DIFFUSE, "LIGHTDIFFUSE";
    Light light_field::SPECULAR, "LIGHTSPECULAR";
    Light light_field::AMBIENT, "LIGHTAMBIENT";
    Light light_field::POSITION, "LIGHTPOSITION";
    Light light_field::DIRECTION, "LIGHTDIRECTION";
    Light light_field::RANGE, "LIGHTRANGE";
    Light light_field::FALLOFF, "LIGHTFALLOFF";
    Light light_field::ATTENUATION0, "LIGHTATTENUATION0";
    Light light_field::ATTENUATION1, "LIGHTATTENUATION1";
    Light light_field::ATTENUATION2, "LIGHTATTENUATION2";
    Light light_field::THETA, "LIGHTTHETA";
    Light light_field::PHI, "LIGHTPHI";

    LightEnable 0, "LIGHTENABLE";
    VertexShader 0, "VERTEXSHADER";
    PixelShader 0, "PIXELSHADER";

    ShaderConst shader_const::VS_FLOAT, "VERTEXSHADERCONSTANTF";
    ShaderConst shader_const::VS_BOOL, "VERTEXSHADERCONSTANTB";
    ShaderConst shader_const::VS_INT, "VERTEXSHADERCONSTANTI";
    ShaderConst shader_const::PS_FLOAT, "PIXELSHADERCONSTANTF";
    ShaderConst shader_const::PS_BOOL, "PIXELSHADERCONSTANTB";
    ShaderConst shader_const::PS_INT, "PIXELSHADERCONSTANTI";

    Texture 0, "TEXTURE";

    SamplerState D3DSAMP_ADDRESSU, "ADDRESSU";
    SamplerState D3DSAMP_ADDRESSV, "ADDRESSV";
    SamplerState D3DSAMP_ADDRESSW, "ADDRESSW";
    SamplerState D3DSAMP_BORDERCOLOR, "BORDERCOLOR";
    SamplerState D3DSAMP_MAGFILTER, "MAGFILTER";
    SamplerState D3DSAMP_MINFILTER, "MINFILTER";
    SamplerState D3DSAMP_MIPFILTER, "MIPFILTER";
    SamplerState D3DSAMP_MIPMAPLODBIAS, "MIPMAPLODBIAS";
    SamplerState D3DSAMP_MAXMIPLEVEL, "MAXMIPLEVEL";
    SamplerState D3DSAMP_MAXANISOTROPY, "MAXANISOTROPY";
    SamplerState D3DSAMP_SRGBTEXTURE, "SRGBTEXTURE";
    SamplerState D3DSAMP_ELEMENTINDEX, "ELEMENTINDEX";
    SamplerState D3DSAMP_DMAPOFFSET, "DMAPOFFSET";

    SetSampler 0, "SAMPLER";
};

/// Index into [`STATE_TABLE`] of the first entry with the given class and op.
pub fn state_index(class: StateClass, op: u32) -> Option<u32> {
    STATE_TABLE
        .iter()
        .position(|s| s.class == class && s.op == op)
        .map(|i| i as u32)
}

/// Number of light slots the effect accumulates light field assignments for.
pub const MAX_LIGHTS: u32 = 8;

/// `D3DLIGHT9`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Light {
    pub light_type: u32,
    pub diffuse: [f32; 4],
    pub specular: [f32; 4],
    pub ambient: [f32; 4],
    pub position: [f32; 3],
    pub direction: [f32; 3],
    pub range: f32,
    pub falloff: f32,
    pub attenuation0: f32,
    pub attenuation1: f32,
    pub attenuation2: f32,
    pub theta: f32,
    pub phi: f32,
}

impl Light {
    /// Writes one field from raw parameter words (`op` is a [`light_field`] selector).
    pub(crate) fn set_field(&mut self, op: u32, words: &[u32]) {
        fn floats<const N: usize>(dst: &mut [f32; N], words: &[u32]) {
            for (d, w) in dst.iter_mut().zip(words) {
                *d = f32::from_bits(*w);
            }
        }
        let first = words.first().map_or(0.0, |w| f32::from_bits(*w));
        match op {
            light_field::TYPE => self.light_type = words.first().copied().unwrap_or(0),
            light_field::DIFFUSE => floats(&mut self.diffuse, words),
            light_field::SPECULAR => floats(&mut self.specular, words),
            light_field::AMBIENT => floats(&mut self.ambient, words),
            light_field::POSITION => floats(&mut self.position, words),
            light_field::DIRECTION => floats(&mut self.direction, words),
            light_field::RANGE => self.range = first,
            light_field::FALLOFF => self.falloff = first,
            light_field::ATTENUATION0 => self.attenuation0 = first,
            light_field::ATTENUATION1 => self.attenuation1 = first,
            light_field::ATTENUATION2 => self.attenuation2 = first,
            light_field::THETA => self.theta = first,
            light_field::PHI => self.phi = first,
            _ => tracing::debug!(op, "unhandled light field"),
        }
    }
}

/// `D3DMATERIAL9`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Material {
    pub diffuse: [f32; 4],
    pub ambient: [f32; 4],
    pub specular: [f32; 4],
    pub emissive: [f32; 4],
    pub power: f32,
}

impl Material {
    pub(crate) fn set_field(&mut self, op: u32, words: &[u32]) {
        let dst = match op {
            material_field::DIFFUSE => &mut self.diffuse,
            material_field::AMBIENT => &mut self.ambient,
            material_field::SPECULAR => &mut self.specular,
            material_field::EMISSIVE => &mut self.emissive,
            material_field::POWER => {
                self.power = words.first().map_or(0.0, |w| f32::from_bits(*w));
                return;
            }
            _ => {
                tracing::debug!(op, "unhandled material field");
                return;
            }
        };
        for (d, w) in dst.iter_mut().zip(words) {
            *d = f32::from_bits(*w);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_has_one_entry_per_class_op_pair() {
        for (i, a) in STATE_TABLE.iter().enumerate() {
            assert_eq!(state_index(a.class, a.op), Some(i as u32), "{}", a.name);
        }
    }

    #[test]
    fn light_fields_write_only_their_slice() {
        let mut light = Light::default();
        light.set_field(light_field::DIFFUSE, &[1.0f32.to_bits(), 0.5f32.to_bits()]);
        light.set_field(light_field::RANGE, &[100.0f32.to_bits()]);
        light.set_field(light_field::TYPE, &[D3DLIGHT_SPOT]);
        assert_eq!(light.diffuse, [1.0, 0.5, 0.0, 0.0]);
        assert_eq!(light.range, 100.0);
        assert_eq!(light.light_type, D3DLIGHT_SPOT);
        assert_eq!(light.specular, [0.0; 4]);
    }

    #[test]
    fn material_power_is_scalar() {
        let mut m = Material::default();
        m.set_field(material_field::POWER, &[8.0f32.to_bits(), 9.0f32.to_bits()]);
        m.set_field(material_field::EMISSIVE, &[0.25f32.to_bits(); 4]);
        assert_eq!(m.power, 8.0);
        assert_eq!(m.emissive, [0.25; 4]);
    }
}
