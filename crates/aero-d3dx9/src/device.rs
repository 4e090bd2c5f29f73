//! Device boundary: the state-setting calls effects issue and the queries used to save state.

use std::rc::Rc;

use crate::object::{Shader, Texture};
use crate::state::{Light, Material};
use crate::types::Matrix4;

/// Receiver of effect state changes (`ID3DXEffectStateManager`).
///
/// Install one with [`crate::Effect::set_state_manager`] to intercept state application instead
/// of letting the effect call the device directly.
pub trait StateManager {
    fn set_render_state(&mut self, state: u32, value: u32);
    fn set_texture_stage_state(&mut self, stage: u32, ty: u32, value: u32);
    fn set_sampler_state(&mut self, sampler: u32, ty: u32, value: u32);
    fn set_texture(&mut self, stage: u32, texture: Option<Rc<Texture>>);
    fn set_transform(&mut self, state: u32, matrix: &Matrix4);
    fn set_light(&mut self, index: u32, light: &Light);
    fn light_enable(&mut self, index: u32, enable: bool);
    fn set_material(&mut self, material: &Material);
    fn set_vertex_shader(&mut self, shader: Option<Rc<Shader>>);
    fn set_pixel_shader(&mut self, shader: Option<Rc<Shader>>);
    fn set_fvf(&mut self, fvf: u32);
    fn set_npatch_mode(&mut self, segments: f32);
    /// `data` holds whole 4-component registers.
    fn set_vertex_shader_constant_f(&mut self, start: u32, data: &[f32]);
    fn set_vertex_shader_constant_i(&mut self, start: u32, data: &[i32]);
    fn set_vertex_shader_constant_b(&mut self, start: u32, data: &[bool]);
    fn set_pixel_shader_constant_f(&mut self, start: u32, data: &[f32]);
    fn set_pixel_shader_constant_i(&mut self, start: u32, data: &[i32]);
    fn set_pixel_shader_constant_b(&mut self, start: u32, data: &[bool]);
}

/// The host graphics device: a [`StateManager`] that can also report its current state.
pub trait EffectDevice: StateManager {
    fn render_state(&self, state: u32) -> u32;
    fn texture_stage_state(&self, stage: u32, ty: u32) -> u32;
    fn sampler_state(&self, sampler: u32, ty: u32) -> u32;
    fn texture(&self, stage: u32) -> Option<Rc<Texture>>;
    fn transform(&self, state: u32) -> Matrix4;
    fn light(&self, index: u32) -> Light;
    fn light_enabled(&self, index: u32) -> bool;
    fn material(&self) -> Material;
    fn vertex_shader(&self) -> Option<Rc<Shader>>;
    fn pixel_shader(&self) -> Option<Rc<Shader>>;
    fn fvf(&self) -> u32;
    fn npatch_mode(&self) -> f32;
    fn vertex_shader_constant_f(&self, register: u32) -> [f32; 4];
    fn vertex_shader_constant_i(&self, register: u32) -> [i32; 4];
    fn vertex_shader_constant_b(&self, register: u32) -> bool;
    fn pixel_shader_constant_f(&self, register: u32) -> [f32; 4];
    fn pixel_shader_constant_i(&self, register: u32) -> [i32; 4];
    fn pixel_shader_constant_b(&self, register: u32) -> bool;
}

/// Routes [`StateManager`] calls straight to a device.
pub(crate) struct DeviceSink<'a>(pub &'a mut dyn EffectDevice);

impl StateManager for DeviceSink<'_> {
    fn set_render_state(&mut self, state: u32, value: u32) {
        self.0.set_render_state(state, value)
    }
    fn set_texture_stage_state(&mut self, stage: u32, ty: u32, value: u32) {
        self.0.set_texture_stage_state(stage, ty, value)
    }
    fn set_sampler_state(&mut self, sampler: u32, ty: u32, value: u32) {
        self.0.set_sampler_state(sampler, ty, value)
    }
    fn set_texture(&mut self, stage: u32, texture: Option<Rc<Texture>>) {
        self.0.set_texture(stage, texture)
    }
    fn set_transform(&mut self, state: u32, matrix: &Matrix4) {
        self.0.set_transform(state, matrix)
    }
    fn set_light(&mut self, index: u32, light: &Light) {
        self.0.set_light(index, light)
    }
    fn light_enable(&mut self, index: u32, enable: bool) {
        self.0.light_enable(index, enable)
    }
    fn set_material(&mut self, material: &Material) {
        self.0.set_material(material)
    }
    fn set_vertex_shader(&mut self, shader: Option<Rc<Shader>>) {
        self.0.set_vertex_shader(shader)
    }
    fn set_pixel_shader(&mut self, shader: Option<Rc<Shader>>) {
        self.0.set_pixel_shader(shader)
    }
    fn set_fvf(&mut self, fvf: u32) {
        self.0.set_fvf(fvf)
    }
    fn set_npatch_mode(&mut self, segments: f32) {
        self.0.set_npatch_mode(segments)
    }
    fn set_vertex_shader_constant_f(&mut self, start: u32, data: &[f32]) {
        self.0.set_vertex_shader_constant_f(start, data)
    }
    fn set_vertex_shader_constant_i(&mut self, start: u32, data: &[i32]) {
        self.0.set_vertex_shader_constant_i(start, data)
    }
    fn set_vertex_shader_constant_b(&mut self, start: u32, data: &[bool]) {
        self.0.set_vertex_shader_constant_b(start, data)
    }
    fn set_pixel_shader_constant_f(&mut self, start: u32, data: &[f32]) {
        self.0.set_pixel_shader_constant_f(start, data)
    }
    fn set_pixel_shader_constant_i(&mut self, start: u32, data: &[i32]) {
        self.0.set_pixel_shader_constant_i(start, data)
    }
    fn set_pixel_shader_constant_b(&mut self, start: u32, data: &[bool]) {
        self.0.set_pixel_shader_constant_b(start, data)
    }
}
