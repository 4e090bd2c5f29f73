//! Device state capture for `Begin`/`End`.
//!
//! `Begin` replays every pass of the technique into a [`Recorder`] to learn which device states the
//! technique can touch, then reads their current values. `End` writes those values back. Restore
//! is plain value replacement, so the order entries were recorded in does not matter.

use std::rc::Rc;

use hashbrown::HashSet;
use tracing::trace;

use crate::device::{EffectDevice, StateManager};
use crate::object::{Shader, Texture};
use crate::state::{Light, Material};
use crate::types::{BeginFlags, Matrix4};

/// One addressable piece of device state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum StateKey {
    RenderState(u32),
    TextureStage { stage: u32, ty: u32 },
    Sampler { sampler: u32, ty: u32 },
    Texture(u32),
    Transform(u32),
    Light(u32),
    LightEnable(u32),
    Material,
    VertexShader,
    PixelShader,
    Fvf,
    NPatchMode,
    VertexConstF(u32),
    VertexConstI(u32),
    VertexConstB(u32),
    PixelConstF(u32),
    PixelConstI(u32),
    PixelConstB(u32),
}

impl StateKey {
    fn is_shader_state(self) -> bool {
        matches!(
            self,
            Self::VertexShader
                | Self::PixelShader
                | Self::VertexConstF(_)
                | Self::VertexConstI(_)
                | Self::VertexConstB(_)
                | Self::PixelConstF(_)
                | Self::PixelConstI(_)
                | Self::PixelConstB(_)
        )
    }

    fn is_sampler_state(self) -> bool {
        matches!(self, Self::Sampler { .. } | Self::Texture(_))
    }
}

#[derive(Debug, Clone)]
enum StateValue {
    Dword(u32),
    Float(f32),
    Bool(bool),
    Texture(Option<Rc<Texture>>),
    Shader(Option<Rc<Shader>>),
    Matrix(Matrix4),
    Light(Light),
    Material(Material),
    Floats([f32; 4]),
    Ints([i32; 4]),
}

/// [`StateManager`] that only remembers which states were addressed.
#[derive(Debug, Default)]
pub(crate) struct Recorder {
    flags: BeginFlags,
    seen: HashSet<StateKey>,
    keys: Vec<StateKey>,
}

impl Recorder {
    pub fn new(flags: BeginFlags) -> Self {
        Self {
            flags,
            ..Self::default()
        }
    }

    fn record(&mut self, key: StateKey) {
        if self.flags.contains(BeginFlags::DONOTSAVESHADERSTATE) && key.is_shader_state() {
            return;
        }
        if self.flags.contains(BeginFlags::DONOTSAVESAMPLERSTATE) && key.is_sampler_state() {
            return;
        }
        if self.seen.insert(key) {
            self.keys.push(key);
        }
    }

    fn record_registers(&mut self, start: u32, count: usize, key: fn(u32) -> StateKey) {
        for r in 0..count as u32 {
            self.record(key(start + r));
        }
    }

    /// Reads the current value of every recorded state.
    pub fn capture(self, device: &dyn EffectDevice) -> Snapshot {
        let entries = self
            .keys
            .into_iter()
            .map(|key| (key, read(device, key)))
            .collect::<Vec<_>>();
        trace!(states = entries.len(), "captured device state");
        Snapshot { entries }
    }
}

impl StateManager for Recorder {
    fn set_render_state(&mut self, state: u32, _: u32) {
        self.record(StateKey::RenderState(state));
    }
    fn set_texture_stage_state(&mut self, stage: u32, ty: u32, _: u32) {
        self.record(StateKey::TextureStage { stage, ty });
    }
    fn set_sampler_state(&mut self, sampler: u32, ty: u32, _: u32) {
        self.record(StateKey::Sampler { sampler, ty });
    }
    fn set_texture(&mut self, stage: u32, _: Option<Rc<Texture>>) {
        self.record(StateKey::Texture(stage));
    }
    fn set_transform(&mut self, state: u32, _: &Matrix4) {
        self.record(StateKey::Transform(state));
    }
    fn set_light(&mut self, index: u32, _: &Light) {
        self.record(StateKey::Light(index));
    }
    fn light_enable(&mut self, index: u32, _: bool) {
        self.record(StateKey::LightEnable(index));
    }
    fn set_material(&mut self, _: &Material) {
        self.record(StateKey::Material);
    }
    fn set_vertex_shader(&mut self, _: Option<Rc<Shader>>) {
        self.record(StateKey::VertexShader);
    }
    fn set_pixel_shader(&mut self, _: Option<Rc<Shader>>) {
        self.record(StateKey::PixelShader);
    }
    fn set_fvf(&mut self, _: u32) {
        self.record(StateKey::Fvf);
    }
    fn set_npatch_mode(&mut self, _: f32) {
        self.record(StateKey::NPatchMode);
    }
    fn set_vertex_shader_constant_f(&mut self, start: u32, data: &[f32]) {
        self.record_registers(start, data.len() / 4, StateKey::VertexConstF);
    }
    fn set_vertex_shader_constant_i(&mut self, start: u32, data: &[i32]) {
        self.record_registers(start, data.len() / 4, StateKey::VertexConstI);
    }
    fn set_vertex_shader_constant_b(&mut self, start: u32, data: &[bool]) {
        self.record_registers(start, data.len(), StateKey::VertexConstB);
    }
    fn set_pixel_shader_constant_f(&mut self, start: u32, data: &[f32]) {
        self.record_registers(start, data.len() / 4, StateKey::PixelConstF);
    }
    fn set_pixel_shader_constant_i(&mut self, start: u32, data: &[i32]) {
        self.record_registers(start, data.len() / 4, StateKey::PixelConstI);
    }
    fn set_pixel_shader_constant_b(&mut self, start: u32, data: &[bool]) {
        self.record_registers(start, data.len(), StateKey::PixelConstB);
    }
}

/// Device state captured by `Begin`.
#[derive(Debug, Clone, Default)]
pub(crate) struct Snapshot {
    entries: Vec<(StateKey, StateValue)>,
}

impl Snapshot {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn restore(&self, device: &mut dyn EffectDevice) {
        for (key, value) in &self.entries {
            write(device, *key, value);
        }
        trace!(states = self.entries.len(), "restored device state");
    }
}

fn read(device: &dyn EffectDevice, key: StateKey) -> StateValue {
    match key {
        StateKey::RenderState(s) => StateValue::Dword(device.render_state(s)),
        StateKey::TextureStage { stage, ty } => {
            StateValue::Dword(device.texture_stage_state(stage, ty))
        }
        StateKey::Sampler { sampler, ty } => StateValue::Dword(device.sampler_state(sampler, ty)),
        StateKey::Texture(stage) => StateValue::Texture(device.texture(stage)),
        StateKey::Transform(s) => StateValue::Matrix(device.transform(s)),
        StateKey::Light(i) => StateValue::Light(device.light(i)),
        StateKey::LightEnable(i) => StateValue::Bool(device.light_enabled(i)),
        StateKey::Material => StateValue::Material(device.material()),
        StateKey::VertexShader => StateValue::Shader(device.vertex_shader()),
        StateKey::PixelShader => StateValue::Shader(device.pixel_shader()),
        StateKey::Fvf => StateValue::Dword(device.fvf()),
        StateKey::NPatchMode => StateValue::Float(device.npatch_mode()),
        StateKey::VertexConstF(r) => StateValue::Floats(device.vertex_shader_constant_f(r)),
        StateKey::VertexConstI(r) => StateValue::Ints(device.vertex_shader_constant_i(r)),
        StateKey::VertexConstB(r) => StateValue::Bool(device.vertex_shader_constant_b(r)),
        StateKey::PixelConstF(r) => StateValue::Floats(device.pixel_shader_constant_f(r)),
        StateKey::PixelConstI(r) => StateValue::Ints(device.pixel_shader_constant_i(r)),
        StateKey::PixelConstB(r) => StateValue::Bool(device.pixel_shader_constant_b(r)),
    }
}

fn write(device: &mut dyn EffectDevice, key: StateKey, value: &StateValue) {
    match (key, value) {
        (StateKey::RenderState(s), StateValue::Dword(v)) => device.set_render_state(s, *v),
        (StateKey::TextureStage { stage, ty }, StateValue::Dword(v)) => {
            device.set_texture_stage_state(stage, ty, *v)
        }
        (StateKey::Sampler { sampler, ty }, StateValue::Dword(v)) => {
            device.set_sampler_state(sampler, ty, *v)
        }
        (StateKey::Texture(stage), StateValue::Texture(t)) => device.set_texture(stage, t.clone()),
        (StateKey::Transform(s), StateValue::Matrix(m)) => device.set_transform(s, m),
        (StateKey::Light(i), StateValue::Light(l)) => device.set_light(i, l),
        (StateKey::LightEnable(i), StateValue::Bool(b)) => device.light_enable(i, *b),
        (StateKey::Material, StateValue::Material(m)) => device.set_material(m),
        (StateKey::VertexShader, StateValue::Shader(s)) => device.set_vertex_shader(s.clone()),
        (StateKey::PixelShader, StateValue::Shader(s)) => device.set_pixel_shader(s.clone()),
        (StateKey::Fvf, StateValue::Dword(v)) => device.set_fvf(*v),
        (StateKey::NPatchMode, StateValue::Float(v)) => device.set_npatch_mode(*v),
        (StateKey::VertexConstF(r), StateValue::Floats(v)) => {
            device.set_vertex_shader_constant_f(r, v)
        }
        (StateKey::VertexConstI(r), StateValue::Ints(v)) => device.set_vertex_shader_constant_i(r, v),
        (StateKey::VertexConstB(r), StateValue::Bool(b)) => {
            device.set_vertex_shader_constant_b(r, &[*b])
        }
        (StateKey::PixelConstF(r), StateValue::Floats(v)) => device.set_pixel_shader_constant_f(r, v),
        (StateKey::PixelConstI(r), StateValue::Ints(v)) => device.set_pixel_shader_constant_i(r, v),
        (StateKey::PixelConstB(r), StateValue::Bool(b)) => {
            device.set_pixel_shader_constant_b(r, &[*b])
        }
        (key, value) => tracing::warn!(?key, ?value, "snapshot entry with mismatched value"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recorder_deduplicates_and_expands_registers() {
        let mut r = Recorder::new(BeginFlags::empty());
        r.set_render_state(7, 1);
        r.set_render_state(7, 0);
        r.set_vertex_shader_constant_f(2, &[0.0; 8]);
        r.set_pixel_shader_constant_b(0, &[true, false, true]);
        assert_eq!(
            r.keys,
            vec![
                StateKey::RenderState(7),
                StateKey::VertexConstF(2),
                StateKey::VertexConstF(3),
                StateKey::PixelConstB(0),
                StateKey::PixelConstB(1),
                StateKey::PixelConstB(2),
            ]
        );
    }

    #[test]
    fn recorder_honours_exclusion_flags() {
        let mut r = Recorder::new(
            BeginFlags::DONOTSAVESHADERSTATE | BeginFlags::DONOTSAVESAMPLERSTATE,
        );
        r.set_vertex_shader(None);
        r.set_vertex_shader_constant_i(0, &[0; 4]);
        r.set_sampler_state(0, 1, 1);
        r.set_texture(0, None);
        r.set_render_state(8, 3);
        assert_eq!(r.keys, vec![StateKey::RenderState(8)]);
    }
}
