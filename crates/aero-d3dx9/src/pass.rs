//! Pass engine: resolves state assignments and issues them to the device or state manager.

use std::rc::Rc;

use tracing::{debug, trace, warn};

use crate::coerce::{self, Number};
use crate::constants::{bool_registers, float_registers, gather_inputs, int_registers};
use crate::ctab::{ConstantDesc, RegisterSet};
use crate::d3d9::D3DVERTEXTEXTURESAMPLER0;
use crate::device::{DeviceSink, EffectDevice, StateManager};
use crate::effect::Effect;
use crate::error::{EffectError, Result};
use crate::object::{Shader, ShaderStage};
use crate::param::ParamTree;
use crate::preshader::Program;
use crate::snapshot::{Recorder, Snapshot};
use crate::state::{shader_const, Light, Material, StateClass, MAX_LIGHTS, STATE_TABLE};
use crate::types::{BeginFlags, Matrix4, ParamHandle, PassHandle, TechniqueHandle};

/// Resolved parameter bindings of a preshader's input table.
pub(crate) type InputBindings = Vec<(ConstantDesc, Option<ParamHandle>)>;

pub(crate) fn bind_inputs(tree: &ParamTree, program: &Program) -> InputBindings {
    program
        .inputs()
        .constants
        .iter()
        .map(|c| (c.clone(), tree.find(None, &c.name)))
        .collect()
}

fn inputs_dirty(tree: &ParamTree, inputs: &InputBindings, since: u64) -> bool {
    inputs
        .iter()
        .any(|(_, h)| h.is_some_and(|h| tree.is_dirty(h, since)))
}

/// A preshader whose inputs were resolved against the effect's parameters at creation.
#[derive(Debug, Clone)]
pub(crate) struct BoundProgram {
    pub program: Rc<Program>,
    pub inputs: InputBindings,
}

impl BoundProgram {
    pub fn bind(tree: &ParamTree, program: Program) -> Self {
        let inputs = bind_inputs(tree, &program);
        Self {
            program: Rc::new(program),
            inputs,
        }
    }

    pub fn is_dirty(&self, tree: &ParamTree, since: u64) -> bool {
        inputs_dirty(tree, &self.inputs, since)
    }

    pub fn run(&self, tree: &ParamTree) -> Vec<f32> {
        let inputs = gather_inputs(tree, &self.inputs, self.program.input_len());
        self.program.run(&inputs)
    }
}

/// Where a state assignment takes its value from.
#[derive(Debug, Clone)]
pub(crate) enum StateSource {
    /// The value stored in the state's own parameter.
    Constant,
    /// The current value of another parameter.
    Parameter(ParamHandle),
    /// A preshader computing the state's value.
    Expression(BoundProgram),
    /// An element of an array parameter chosen by a preshader.
    ArraySelector {
        array: ParamHandle,
        program: BoundProgram,
    },
}

#[derive(Debug, Clone)]
pub(crate) struct StateEntry {
    /// Index into [`STATE_TABLE`].
    pub operation: u32,
    pub index: u32,
    /// Parameter holding the state's own value.
    pub param: ParamHandle,
    pub source: StateSource,
}

#[derive(Debug, Clone)]
pub(crate) struct Pass {
    pub name: Option<String>,
    pub annotations: Vec<ParamHandle>,
    pub states: Vec<StateEntry>,
    /// Update counter value at the end of the last application.
    pub update_version: u64,
}

#[derive(Debug, Clone)]
pub(crate) struct Technique {
    pub name: Option<String>,
    pub annotations: Vec<ParamHandle>,
    pub passes: Vec<Pass>,
}

/// Begin/pass bookkeeping and the light/material accumulators.
#[derive(Debug, Clone, Default)]
pub(crate) struct PassState {
    pub in_effect: bool,
    pub active_pass: Option<u32>,
    pub flags: BeginFlags,
    pub snapshot: Option<Snapshot>,
    pub lights: [Light; MAX_LIGHTS as usize],
    pub lights_updated: u8,
    pub material: Material,
    pub material_updated: bool,
}

fn matrix_from(tree: &ParamTree, h: ParamHandle) -> Matrix4 {
    let mut m = [[0.0; 4]; 4];
    let Some(n) = tree.get(h) else { return m };
    let words = tree.words(h);
    for r in 0..n.rows.min(4) {
        for c in 0..n.columns.min(4) {
            if let Some(w) = words.get((r * n.columns + c) as usize) {
                m[r as usize][c as usize] = coerce::read(n.ty, *w).to_float();
            }
        }
    }
    m
}

impl Effect {
    fn technique_index(&self) -> Result<usize> {
        self.current_technique
            .map(|t| t.0 as usize)
            .filter(|&t| t < self.techniques.len())
            .ok_or(EffectError::InvalidCall("effect has no valid technique"))
    }

    /// Starts the current technique and returns its pass count.
    ///
    /// Unless `DONOTSAVESTATE` is set, every device state the technique can touch is captured
    /// here and written back by [`Effect::end`]. Calling `begin` again before `end` captures a
    /// fresh snapshot that replaces the previous one.
    pub fn begin(&mut self, device: &mut dyn EffectDevice, flags: BeginFlags) -> Result<u32> {
        let t = self.technique_index()?;
        let passes = self.techniques[t].passes.len() as u32;
        if self.pass_state.in_effect {
            warn!("begin called while the effect is already active; recapturing state");
        }

        self.pass_state.snapshot = None;
        if !flags.contains(BeginFlags::DONOTSAVESTATE) {
            let mut recorder = Recorder::new(flags);
            for p in 0..passes as usize {
                self.record_pass(t, p, &mut recorder);
            }
            let snapshot = recorder.capture(&*device);
            debug!(technique = t, states = snapshot.len(), "effect begin");
            self.pass_state.snapshot = Some(snapshot);
        }
        self.pass_state.flags = flags;
        self.pass_state.in_effect = true;
        self.pass_state.active_pass = None;
        Ok(passes)
    }

    /// Applies every state of pass `pass` of the current technique.
    pub fn begin_pass(&mut self, device: &mut dyn EffectDevice, pass: u32) -> Result<()> {
        if !self.pass_state.in_effect {
            return Err(EffectError::InvalidCall("begin_pass outside begin/end"));
        }
        if self.pass_state.active_pass.is_some() {
            return Err(EffectError::InvalidCall("a pass is already active"));
        }
        let t = self.technique_index()?;
        if pass as usize >= self.techniques[t].passes.len() {
            return Err(EffectError::InvalidCall("pass index out of range"));
        }
        self.with_sink(device, |effect, sink| effect.apply_pass(t, pass as usize, sink, true))?;
        self.pass_state.active_pass = Some(pass);
        Ok(())
    }

    /// Re-applies the states of the active pass whose inputs changed since it was applied.
    pub fn commit_changes(&mut self, device: &mut dyn EffectDevice) -> Result<()> {
        let pass = self
            .pass_state
            .active_pass
            .ok_or(EffectError::InvalidCall("commit_changes without an active pass"))?;
        let t = self.technique_index()?;
        self.with_sink(device, |effect, sink| effect.apply_pass(t, pass as usize, sink, false))
    }

    /// Leaves the active pass. Device state set by the pass stays in place.
    pub fn end_pass(&mut self) -> Result<()> {
        if self.pass_state.active_pass.take().is_none() {
            return Err(EffectError::InvalidCall("end_pass without an active pass"));
        }
        Ok(())
    }

    /// Ends the technique, restoring the device state captured by [`Effect::begin`].
    pub fn end(&mut self, device: &mut dyn EffectDevice) -> Result<()> {
        if !self.pass_state.in_effect {
            return Err(EffectError::InvalidCall("end without begin"));
        }
        if self.pass_state.active_pass.take().is_some() {
            warn!("end called inside a pass");
        }
        if let Some(snapshot) = self.pass_state.snapshot.take() {
            snapshot.restore(device);
        }
        self.pass_state.in_effect = false;
        debug!("effect end");
        Ok(())
    }

    /// Whether a pass is currently applied.
    pub fn active_pass(&self) -> Option<PassHandle> {
        let technique = self.current_technique?;
        self.pass_state.active_pass.map(|pass| PassHandle {
            technique: technique.0,
            pass,
        })
    }

    fn with_sink<R>(
        &mut self,
        device: &mut dyn EffectDevice,
        f: impl FnOnce(&mut Self, &mut dyn StateManager) -> Result<R>,
    ) -> Result<R> {
        match self.state_manager.clone() {
            Some(manager) => {
                let mut guard = manager
                    .try_borrow_mut()
                    .map_err(|_| EffectError::InvalidCall("state manager is already in use"))?;
                f(self, &mut *guard)
            }
            None => f(self, &mut DeviceSink(device)),
        }
    }

    fn apply_pass(
        &mut self,
        technique: usize,
        pass: usize,
        sink: &mut dyn StateManager,
        update_all: bool,
    ) -> Result<()> {
        let since = self.techniques[technique].passes[pass].update_version;
        let stamp = self.tree.next_version();
        let states = self.techniques[technique].passes[pass].states.clone();

        self.pass_state.lights_updated = 0;
        self.pass_state.material_updated = false;
        for state in &states {
            self.apply_state(state, sink, update_all, since, None)?;
        }
        self.flush_lights_and_material(sink);

        self.techniques[technique].passes[pass].update_version = stamp;
        Ok(())
    }

    /// Addresses every device state pass `pass` can set, whatever its inputs hold right now.
    ///
    /// An array selector is recorded once per element. A state that fails to resolve is skipped
    /// and the rest of the pass is still recorded.
    fn record_pass(&mut self, technique: usize, pass: usize, recorder: &mut Recorder) {
        let states = self.techniques[technique].passes[pass].states.clone();

        self.pass_state.lights_updated = 0;
        self.pass_state.material_updated = false;
        for state in &states {
            let candidates = match &state.source {
                StateSource::ArraySelector { array, .. } => self
                    .tree
                    .get(*array)
                    .map(|n| n.members.clone())
                    .unwrap_or_default()
                    .into_iter()
                    .map(|member| StateEntry {
                        source: StateSource::Parameter(member),
                        ..state.clone()
                    })
                    .collect(),
                _ => vec![state.clone()],
            };
            for candidate in &candidates {
                if let Err(err) = self.apply_state(candidate, recorder, true, 0, None) {
                    warn!(pass, operation = state.operation, %err, "state skipped while recording");
                }
            }
        }
        self.flush_lights_and_material(recorder);
    }

    fn flush_lights_and_material(&mut self, sink: &mut dyn StateManager) {
        for i in 0..MAX_LIGHTS {
            if self.pass_state.lights_updated & (1 << i) != 0 {
                sink.set_light(i, &self.pass_state.lights[i as usize]);
            }
        }
        if self.pass_state.material_updated {
            sink.set_material(&self.pass_state.material);
        }
    }

    /// Returns the parameter holding the state's value and whether it changed since `since`.
    fn resolve_state(
        &mut self,
        state: &StateEntry,
        update_all: bool,
        since: u64,
    ) -> Result<(ParamHandle, bool)> {
        match &state.source {
            StateSource::Constant => Ok((state.param, false)),
            StateSource::Parameter(p) => Ok((*p, self.tree.is_dirty(*p, since))),
            StateSource::Expression(program) => {
                let dirty = program.is_dirty(&self.tree, since);
                if update_all || dirty {
                    let out = program.run(&self.tree);
                    let ty = self.tree.node(state.param)?.ty;
                    self.tree.write_words(state.param, |words| {
                        for (i, w) in words.iter_mut().enumerate() {
                            let v = out.get(i).copied().unwrap_or(0.0);
                            *w = coerce::store(ty, Number::Float(v));
                        }
                    })?;
                }
                Ok((state.param, dirty))
            }
            StateSource::ArraySelector { array, program } => {
                let dirty = program.is_dirty(&self.tree, since) || self.tree.is_dirty(*array, since);
                let out = program.run(&self.tree);
                let value = out.first().copied().unwrap_or(0.0);
                Ok((self.select_element(*array, value)?, dirty))
            }
        }
    }

    pub(crate) fn select_element(&self, array: ParamHandle, value: f32) -> Result<ParamHandle> {
        let n = self.tree.node(array)?;
        let index = if value == -1.0 {
            debug!(name = ?n.name, "array selector returned -1; using element 0");
            0
        } else {
            value as i64
        };
        let in_range = value.is_finite() && index >= 0 && index < i64::from(n.elements);
        if !in_range {
            return Err(EffectError::Evaluation(format!(
                "array selector index {value} out of range for {:?} ({} elements)",
                n.name, n.elements
            )));
        }
        Ok(n.members[index as usize])
    }

    pub(crate) fn apply_state(
        &mut self,
        state: &StateEntry,
        sink: &mut dyn StateManager,
        update_all: bool,
        since: u64,
        sampler: Option<u32>,
    ) -> Result<()> {
        let Some(info) = STATE_TABLE.get(state.operation as usize).copied() else {
            debug!(operation = state.operation, "unknown state operation");
            return Ok(());
        };
        let (value, dirty) = self.resolve_state(state, update_all, since)?;
        let always = matches!(
            info.class,
            StateClass::VertexShader | StateClass::PixelShader | StateClass::SetSampler
        );
        if !update_all && !dirty && !always {
            return Ok(());
        }
        trace!(state = info.name, index = state.index, "applying state");

        let words = self.tree.words(value);
        let first = words.first().copied().unwrap_or(0);
        match info.class {
            StateClass::RenderState => sink.set_render_state(info.op, first),
            StateClass::TextureStage => sink.set_texture_stage_state(state.index, info.op, first),
            StateClass::SamplerState => {
                sink.set_sampler_state(sampler.unwrap_or(state.index), info.op, first)
            }
            StateClass::Texture => {
                let texture = self.tree.object(value).and_then(|o| o.as_texture().cloned());
                sink.set_texture(sampler.unwrap_or(state.index), texture);
            }
            StateClass::NPatchMode => sink.set_npatch_mode(f32::from_bits(first)),
            StateClass::Fvf => sink.set_fvf(first),
            StateClass::Transform => {
                sink.set_transform(info.op + state.index, &matrix_from(&self.tree, value))
            }
            StateClass::Material => {
                self.pass_state.material.set_field(info.op, &words);
                self.pass_state.material_updated = true;
            }
            StateClass::Light => {
                if state.index >= MAX_LIGHTS {
                    debug!(index = state.index, "ignoring light state beyond the light cache");
                } else {
                    self.pass_state.lights[state.index as usize].set_field(info.op, &words);
                    self.pass_state.lights_updated |= 1 << state.index;
                }
            }
            StateClass::LightEnable => sink.light_enable(state.index, first != 0),
            StateClass::VertexShader | StateClass::PixelShader => {
                let shader = self.tree.object(value).and_then(|o| o.as_shader().cloned());
                let changed = update_all || dirty;
                if changed {
                    if info.class == StateClass::VertexShader {
                        sink.set_vertex_shader(shader.clone());
                    } else {
                        sink.set_pixel_shader(shader.clone());
                    }
                }
                if let Some(shader) = shader {
                    self.set_shader_constants(&shader, sink, changed, since)?;
                }
            }
            StateClass::ShaderConst => {
                let floats: Vec<f32> = words.iter().map(|w| f32::from_bits(*w)).collect();
                let ints: Vec<i32> = words.iter().map(|w| *w as i32).collect();
                let bools: Vec<bool> = words.iter().map(|w| *w != 0).collect();
                let vec4 = words.len() / 4 * 4;
                let start = state.index;
                match info.op {
                    shader_const::VS_FLOAT => sink.set_vertex_shader_constant_f(start, &floats[..vec4]),
                    shader_const::VS_INT => sink.set_vertex_shader_constant_i(start, &ints[..vec4]),
                    shader_const::VS_BOOL => sink.set_vertex_shader_constant_b(start, &bools),
                    shader_const::PS_FLOAT => sink.set_pixel_shader_constant_f(start, &floats[..vec4]),
                    shader_const::PS_INT => sink.set_pixel_shader_constant_i(start, &ints[..vec4]),
                    shader_const::PS_BOOL => sink.set_pixel_shader_constant_b(start, &bools),
                    op => debug!(op, "unhandled shader constant state"),
                }
            }
            StateClass::SetSampler => {
                let states = self.tree.node(value)?.sampler_states.clone();
                for s in &states {
                    self.apply_state(s, sink, update_all, since, Some(state.index))?;
                }
            }
        }
        Ok(())
    }

    /// Uploads a shader's constant table from same-named parameters and runs its preshader.
    fn set_shader_constants(
        &mut self,
        shader: &Rc<Shader>,
        sink: &mut dyn StateManager,
        update_all: bool,
        since: u64,
    ) -> Result<()> {
        let vertex = shader.stage() == ShaderStage::Vertex;
        for c in &shader.constant_table().constants {
            if self.config.skips(&c.name) {
                continue;
            }
            let Some(h) = self.tree.find(None, &c.name) else {
                trace!(name = %c.name, "shader constant has no matching parameter");
                continue;
            };
            let dirty = update_all || self.tree.is_dirty(h, since);
            match c.register_set {
                RegisterSet::Sampler => self.apply_sampler_constant(h, c, vertex, sink, dirty, since)?,
                _ if !dirty => {}
                RegisterSet::Float4 => {
                    let regs = float_registers(&self.tree, h, c);
                    if vertex {
                        sink.set_vertex_shader_constant_f(c.register_index, &regs);
                    } else {
                        sink.set_pixel_shader_constant_f(c.register_index, &regs);
                    }
                }
                RegisterSet::Int4 => {
                    let regs = int_registers(&self.tree, h, c);
                    if vertex {
                        sink.set_vertex_shader_constant_i(c.register_index, &regs);
                    } else {
                        sink.set_pixel_shader_constant_i(c.register_index, &regs);
                    }
                }
                RegisterSet::Bool => {
                    let regs = bool_registers(&self.tree, h, c);
                    if vertex {
                        sink.set_vertex_shader_constant_b(c.register_index, &regs);
                    } else {
                        sink.set_pixel_shader_constant_b(c.register_index, &regs);
                    }
                }
            }
        }

        if let Some(program) = shader.preshader() {
            let inputs = bind_inputs(&self.tree, program);
            if update_all || inputs_dirty(&self.tree, &inputs, since) {
                let out = program.run(&gather_inputs(&self.tree, &inputs, program.input_len()));
                for reg in program.written_output_registers() {
                    let start = reg as usize * 4;
                    let Some(values) = out.get(start..start + 4) else { continue };
                    if vertex {
                        sink.set_vertex_shader_constant_f(reg, values);
                    } else {
                        sink.set_pixel_shader_constant_f(reg, values);
                    }
                }
            }
        }
        Ok(())
    }

    fn apply_sampler_constant(
        &mut self,
        h: ParamHandle,
        c: &ConstantDesc,
        vertex: bool,
        sink: &mut dyn StateManager,
        update: bool,
        since: u64,
    ) -> Result<()> {
        let n = self.tree.node(h)?;
        if !n.ty.is_sampler() {
            debug!(name = %c.name, "sampler register bound to a non-sampler parameter");
            return Ok(());
        }
        let samplers = if n.elements > 0 { n.members.clone() } else { vec![h] };
        let base = c.register_index + if vertex { D3DVERTEXTEXTURESAMPLER0 } else { 0 };
        for (k, s) in samplers.iter().take(c.register_count.max(1) as usize).enumerate() {
            let states = self.tree.node(*s)?.sampler_states.clone();
            for state in &states {
                self.apply_state(state, sink, update, since, Some(base + k as u32))?;
            }
        }
        Ok(())
    }

    /// Whether any pass of `technique` reads `parameter`, directly, through a preshader, or
    /// through a bound shader's constant table.
    pub fn is_parameter_used(&self, parameter: ParamHandle, technique: TechniqueHandle) -> bool {
        let (Some(node), Some(t)) = (
            self.tree.get(parameter),
            self.techniques.get(technique.0 as usize),
        ) else {
            return false;
        };
        let top = node.top;
        t.passes
            .iter()
            .flat_map(|p| p.states.iter())
            .any(|s| self.state_reads(s, top, 0))
    }

    fn reads(&self, h: ParamHandle, top: ParamHandle) -> bool {
        self.tree.get(h).is_some_and(|n| n.top == top)
    }

    fn state_reads(&self, state: &StateEntry, top: ParamHandle, depth: u32) -> bool {
        if depth > 4 {
            return false;
        }
        let values: Vec<ParamHandle> = match &state.source {
            StateSource::Constant => vec![state.param],
            StateSource::Parameter(p) => {
                if self.reads(*p, top) {
                    return true;
                }
                vec![*p]
            }
            StateSource::Expression(program) => {
                if program.inputs.iter().any(|(_, h)| h.is_some_and(|h| self.reads(h, top))) {
                    return true;
                }
                vec![state.param]
            }
            StateSource::ArraySelector { array, program } => {
                if self.reads(*array, top)
                    || program.inputs.iter().any(|(_, h)| h.is_some_and(|h| self.reads(h, top)))
                {
                    return true;
                }
                self.tree.get(*array).map(|n| n.members.clone()).unwrap_or_default()
            }
        };

        values.iter().any(|&v| {
            let Some(n) = self.tree.get(v) else { return false };
            if n.sampler_states.iter().any(|s| self.state_reads(s, top, depth + 1)) {
                return true;
            }
            let shader = self.tree.object(v).and_then(|o| o.as_shader().cloned());
            shader.is_some_and(|shader| self.shader_reads(&shader, top, depth))
        })
    }

    fn shader_reads(&self, shader: &Shader, top: ParamHandle, depth: u32) -> bool {
        let constants = shader.constant_table().constants.iter().any(|c| {
            let Some(h) = self.tree.find(None, &c.name) else { return false };
            if self.reads(h, top) {
                return true;
            }
            c.register_set == RegisterSet::Sampler
                && self.tree.get(h).is_some_and(|n| {
                    let samplers = if n.elements > 0 { n.members.clone() } else { vec![h] };
                    samplers.iter().any(|s| {
                        self.tree.get(*s).is_some_and(|sn| {
                            sn.sampler_states.iter().any(|st| self.state_reads(st, top, depth + 1))
                        })
                    })
                })
        });
        constants
            || shader.preshader().is_some_and(|p| {
                p.inputs()
                    .constants
                    .iter()
                    .any(|c| self.tree.find(None, &c.name).is_some_and(|h| self.reads(h, top)))
            })
    }
}
