//! A D3DX9-style effect runtime.
//!
//! Parses compiled effect blobs (`fx_2_0`), exposes the typed parameter tree, evaluates preshader
//! programs and applies technique passes to a host [`EffectDevice`] with save/restore semantics.
//!
//! The crate never talks to a GPU. The device and the optional [`StateManager`] are traits the
//! host implements; effects call them synchronously from [`Effect::begin`], [`Effect::begin_pass`],
//! [`Effect::commit_changes`] and [`Effect::end`].

#![forbid(unsafe_code)]

mod coerce;
mod config;
mod constants;
pub mod ctab;
pub mod d3d9;
mod device;
mod effect;
mod error;
mod object;
mod param;
mod pass;
mod pool;
pub mod preshader;
pub mod reader;
mod snapshot;
pub mod state;
mod types;
mod value;

/// Helpers for building synthetic effect, shader and preshader blobs in tests.
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use coerce::{pack_color, unpack_color, UNSUPPORTED_SENTINEL};
pub use config::EffectConfig;
pub use device::{EffectDevice, StateManager};
pub use effect::Effect;
pub use error::{EffectError, ParseError, Result};
pub use object::{EffectObject, Shader, ShaderStage, Texture, TextureKind};
pub use pool::EffectPool;
pub use state::{Light, Material, StateClass};
pub use types::{
    Annotated, BeginFlags, EffectDesc, Matrix4, ParamHandle, ParameterBlockHandle, ParameterClass,
    ParameterDesc, ParameterFlags, ParameterType, PassDesc, PassHandle, TechniqueDesc,
    TechniqueHandle, Vector4,
};
