//! The effect object: creation and linking, queries, technique selection and parameter blocks.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use tracing::{debug, warn};

use crate::config::EffectConfig;
use crate::device::StateManager;
use crate::error::{EffectError, ParseError, Result};
use crate::object::{EffectObject, Shader, ShaderStage};
use crate::param::{ParamTree, PendingObject};
use crate::pass::{BoundProgram, Pass, PassState, StateEntry, StateSource, Technique};
use crate::pool::EffectPool;
use crate::preshader::Program;
use crate::reader::{read_cstring, read_u32_le, EffectImage, LeafRecord, NodeRecord, NO_INDEX};
use crate::state::{StateClass, STATE_TABLE};
use crate::types::{
    Annotated, EffectDesc, ParamHandle, ParameterBlockHandle, ParameterDesc, ParameterFlags,
    ParameterType, PassDesc, PassHandle, TechniqueDesc, TechniqueHandle,
};

/// Values captured between `begin_parameter_block` and `end_parameter_block`.
#[derive(Debug, Clone, Default)]
pub(crate) struct ParameterBlock {
    entries: Vec<(ParamHandle, Vec<u32>, Vec<Option<EffectObject>>)>,
}

/// A loaded effect (`ID3DXEffect`).
///
/// Owns the parameter tree, the techniques and the Begin/End state. Devices are passed in per
/// call; the effect never holds on to one.
pub struct Effect {
    pub(crate) image: Rc<EffectImage>,
    pub(crate) config: EffectConfig,
    pub(crate) pool: Option<EffectPool>,
    pub(crate) tree: ParamTree,
    pub(crate) techniques: Vec<Technique>,
    pub(crate) current_technique: Option<TechniqueHandle>,
    pub(crate) pass_state: PassState,
    pub(crate) state_manager: Option<Rc<RefCell<dyn StateManager>>>,
    blocks: Vec<Option<ParameterBlock>>,
    recording: Option<ParameterBlock>,
}

impl fmt::Debug for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Effect")
            .field("parameters", &self.tree.top_level.len())
            .field("techniques", &self.techniques.len())
            .field("current_technique", &self.current_technique)
            .field("in_effect", &self.pass_state.in_effect)
            .field("state_manager", &self.state_manager.is_some())
            .finish_non_exhaustive()
    }
}

fn object_types(node: &NodeRecord, out: &mut Vec<(u32, ParameterType)>) {
    match &node.leaf {
        LeafRecord::Object(id) => out.push((*id, node.ty)),
        LeafRecord::Sampler(states) => {
            for s in states {
                object_types(&s.value, out);
            }
        }
        _ => {}
    }
    for child in &node.children {
        object_types(child, out);
    }
}

fn decode_string(data: &[u8]) -> Rc<str> {
    let end = data.iter().position(|&b| b == 0).unwrap_or(data.len());
    Rc::from(String::from_utf8_lossy(&data[..end]).as_ref())
}

impl Effect {
    /// Parses and links an effect blob with default options and no pool.
    pub fn new(data: &[u8]) -> Result<Self> {
        Self::with_options(data, None, EffectConfig::default())
    }

    pub fn with_options(data: &[u8], pool: Option<&EffectPool>, config: EffectConfig) -> Result<Self> {
        let image = EffectImage::parse(data)?;
        Self::from_image(Rc::new(image), pool, config)
    }

    /// Links an already parsed image.
    pub fn from_image(
        image: Rc<EffectImage>,
        pool: Option<&EffectPool>,
        config: EffectConfig,
    ) -> Result<Self> {
        let counter = pool.map_or_else(|| Rc::new(Cell::new(0)), EffectPool::counter);
        Self::link(image, pool, config, counter)
    }

    fn link(
        image: Rc<EffectImage>,
        pool: Option<&EffectPool>,
        config: EffectConfig,
        counter: Rc<Cell<u64>>,
    ) -> Result<Self> {
        let mut tree = ParamTree::new(counter);
        let mut pending = Vec::new();

        for p in &image.parameters {
            let flags = ParameterFlags::from_bits_truncate(p.flags);
            let h = tree.add_root(&p.node, flags, &mut pending);
            let annotations = p
                .annotations
                .iter()
                .map(|a| tree.add_root(a, ParameterFlags::ANNOTATION, &mut pending))
                .collect();
            tree.nodes[h.0 as usize].annotations = annotations;
            tree.top_level.push(h);
        }

        let mut techniques = Vec::with_capacity(image.techniques.len());
        for t in &image.techniques {
            let annotations = t
                .annotations
                .iter()
                .map(|a| tree.add_root(a, ParameterFlags::ANNOTATION, &mut pending))
                .collect();
            let mut passes = Vec::with_capacity(t.passes.len());
            for p in &t.passes {
                let annotations = p
                    .annotations
                    .iter()
                    .map(|a| tree.add_root(a, ParameterFlags::ANNOTATION, &mut pending))
                    .collect();
                let states = p
                    .states
                    .iter()
                    .map(|s| StateEntry {
                        operation: s.operation,
                        index: s.index,
                        param: tree.add_root(&s.value, ParameterFlags::empty(), &mut pending),
                        source: StateSource::Constant,
                    })
                    .collect();
                passes.push(Pass {
                    name: p.name.clone(),
                    annotations,
                    states,
                    update_version: 0,
                });
            }
            techniques.push(Technique {
                name: t.name.clone(),
                annotations,
                passes,
            });
        }

        let mut effect = Self {
            image: image.clone(),
            config,
            pool: pool.cloned(),
            tree,
            techniques,
            current_technique: None,
            pass_state: PassState::default(),
            state_manager: None,
            blocks: Vec::new(),
            recording: None,
        };

        let mut objects = Self::load_objects(&image)?;
        for resource in &image.resources {
            effect.bind_resource(resource, &pending, &mut objects)?;
        }
        for p in &pending {
            let object = objects.get(p.id as usize).cloned().flatten();
            effect.tree.fill_object(*p, object);
        }
        effect.validate_programs(&objects)?;

        if let Some(pool) = pool {
            for &h in &effect.tree.top_level.clone() {
                let shared = effect
                    .tree
                    .get(h)
                    .is_some_and(|n| n.flags.contains(ParameterFlags::SHARED));
                if shared {
                    pool.bind(&mut effect.tree, h);
                }
            }
        }

        if !effect.techniques.is_empty() {
            effect.current_technique = Some(TechniqueHandle(0));
        }
        debug!(
            parameters = effect.tree.top_level.len(),
            techniques = effect.techniques.len(),
            objects = image.object_count,
            "effect created"
        );
        Ok(effect)
    }

    /// Decodes the object data table into string and shader objects.
    fn load_objects(image: &EffectImage) -> Result<Vec<Option<EffectObject>>> {
        let mut types = Vec::new();
        for p in &image.parameters {
            object_types(&p.node, &mut types);
            for a in &p.annotations {
                object_types(a, &mut types);
            }
        }
        for t in &image.techniques {
            for a in &t.annotations {
                object_types(a, &mut types);
            }
            for p in &t.passes {
                for a in &p.annotations {
                    object_types(a, &mut types);
                }
                for s in &p.states {
                    object_types(&s.value, &mut types);
                }
            }
        }
        let ty_of = |id: u32| types.iter().find(|(i, _)| *i == id).map(|(_, ty)| *ty);

        let mut objects = vec![None; image.object_count as usize];
        for record in &image.object_data {
            let object = match ty_of(record.id) {
                Some(ParameterType::String) => Some(EffectObject::String(decode_string(&record.data))),
                Some(ty @ (ParameterType::VertexShader | ParameterType::PixelShader)) => {
                    Some(shader_object(ty, &record.data)?)
                }
                Some(ty) => {
                    debug!(id = record.id, ?ty, "ignoring object data for non-string object");
                    None
                }
                None => {
                    debug!(id = record.id, "object data for an unreferenced object");
                    None
                }
            };
            if let Some(slot) = objects.get_mut(record.id as usize) {
                *slot = object;
            }
        }
        Ok(objects)
    }

    fn bind_resource(
        &mut self,
        resource: &crate::reader::ResourceRecord,
        pending: &[PendingObject],
        objects: &mut [Option<EffectObject>],
    ) -> Result<()> {
        let state = self.resource_state(resource)?;
        let param = state.param;
        let node = self.tree.node(param)?;
        let ty = node.ty;
        let root = node.root;

        let source = match resource.usage {
            0 if ty.is_shader() => {
                let object = shader_object(ty, &resource.data)?;
                let id = pending
                    .iter()
                    .find(|p| p.root == root)
                    .map(|p| p.id)
                    .ok_or_else(|| ParseError::invalid("shader state without an object slot"))?;
                if let Some(slot) = objects.get_mut(id as usize) {
                    *slot = Some(object);
                }
                StateSource::Constant
            }
            0 => StateSource::Expression(self.bind_program(&resource.data)?),
            1 => {
                let path = read_cstring(&resource.data, 0, "parameter reference")?;
                let target = self.tree.find(None, path).ok_or_else(|| {
                    ParseError::invalid(format!("state references unknown parameter {path:?}"))
                })?;
                StateSource::Parameter(target)
            }
            2 => {
                let len = read_u32_le(&resource.data, 0, "array selector name size")? as usize;
                let path = read_cstring(&resource.data, 4, "array selector name")?;
                let code_start = len
                    .checked_add(3)
                    .map(|l| 4 + (l & !3))
                    .filter(|&s| s <= resource.data.len())
                    .ok_or_else(|| ParseError::invalid("array selector name overruns resource"))?;
                let array = self.tree.find(None, path).ok_or_else(|| {
                    ParseError::invalid(format!("array selector names unknown parameter {path:?}"))
                })?;
                if self.tree.node(array)?.elements == 0 {
                    return Err(
                        ParseError::invalid(format!("array selector target {path:?} is not an array")).into(),
                    );
                }
                StateSource::ArraySelector {
                    array,
                    program: self.bind_program(&resource.data[code_start..])?,
                }
            }
            usage => {
                return Err(ParseError::invalid(format!("unknown resource usage {usage}")).into())
            }
        };
        self.resource_state(resource)?.source = source;
        Ok(())
    }

    /// The state a resource record attaches to.
    fn resource_state(&mut self, r: &crate::reader::ResourceRecord) -> Result<&mut StateEntry> {
        let missing = || ParseError::invalid(format!(
            "resource targets missing state (technique {:#x}, index {}, element {:#x}, state {})",
            r.technique, r.index, r.element, r.state
        ));
        if r.technique == NO_INDEX {
            let mut h = *self.tree.top_level.get(r.index as usize).ok_or_else(missing)?;
            if r.element != NO_INDEX {
                h = self.tree.element(h, r.element).ok_or_else(missing)?;
            }
            let node = self.tree.nodes.get_mut(h.0 as usize).ok_or_else(missing)?;
            return Ok(node.sampler_states.get_mut(r.state as usize).ok_or_else(missing)?);
        }
        Ok(self
            .techniques
            .get_mut(r.technique as usize)
            .and_then(|t| t.passes.get_mut(r.index as usize))
            .and_then(|p| p.states.get_mut(r.state as usize))
            .ok_or_else(missing)?)
    }

    fn bind_program(&self, data: &[u8]) -> Result<BoundProgram> {
        let program = BoundProgram::bind(&self.tree, Program::parse(data)?);
        self.check_inputs(&program.program)?;
        Ok(program)
    }

    /// Preshader inputs must name parameters, and must not name skipped constants.
    fn check_inputs(&self, program: &Program) -> Result<()> {
        for c in &program.inputs().constants {
            if self.config.skips(&c.name) {
                warn!(name = %c.name, "skip constant is a preshader input");
                return Err(EffectError::InvalidCall("skip constant is used by a preshader"));
            }
            if self.tree.find(None, &c.name).is_none() {
                return Err(ParseError::invalid(format!(
                    "preshader input {:?} has no matching parameter",
                    c.name
                ))
                .into());
            }
        }
        Ok(())
    }

    fn validate_programs(&self, objects: &[Option<EffectObject>]) -> Result<()> {
        for object in objects.iter().flatten() {
            if let Some(program) = object.as_shader().and_then(|s| s.preshader()) {
                self.check_inputs(program)?;
            }
        }
        Ok(())
    }

    // ---------------------------------------------------------------------------------------------
    // Queries
    // ---------------------------------------------------------------------------------------------

    pub fn desc(&self) -> EffectDesc {
        EffectDesc {
            parameters: self.tree.top_level.len() as u32,
            techniques: self.techniques.len() as u32,
        }
    }

    pub fn pool(&self) -> Option<&EffectPool> {
        self.pool.as_ref()
    }

    pub fn config(&self) -> &EffectConfig {
        &self.config
    }

    /// Top-level parameter `index`, or member/element `index` of `parent`.
    pub fn parameter(&self, parent: Option<ParamHandle>, index: u32) -> Option<ParamHandle> {
        self.tree.child(parent, index)
    }

    /// Resolves a parameter path (`name`, `.member`, `[n]`, `@annotation`) relative to `parent`.
    pub fn parameter_by_name(&self, parent: Option<ParamHandle>, path: &str) -> Option<ParamHandle> {
        self.tree.find(parent, path)
    }

    pub fn parameter_by_semantic(
        &self,
        parent: Option<ParamHandle>,
        semantic: Option<&str>,
    ) -> Option<ParamHandle> {
        self.tree.by_semantic(parent, semantic)
    }

    pub fn parameter_element(&self, parameter: ParamHandle, index: u32) -> Option<ParamHandle> {
        self.tree.element(parameter, index)
    }

    pub fn parameter_desc(&self, parameter: ParamHandle) -> Result<ParameterDesc<'_>> {
        self.tree.desc(parameter)
    }

    pub fn technique(&self, index: u32) -> Option<TechniqueHandle> {
        ((index as usize) < self.techniques.len()).then_some(TechniqueHandle(index))
    }

    pub fn technique_by_name(&self, name: &str) -> Option<TechniqueHandle> {
        self.techniques
            .iter()
            .position(|t| t.name.as_deref() == Some(name))
            .map(|i| TechniqueHandle(i as u32))
    }

    fn technique_ref(&self, t: TechniqueHandle) -> Result<&Technique> {
        self.techniques
            .get(t.0 as usize)
            .ok_or(EffectError::InvalidCall("invalid technique handle"))
    }

    pub fn technique_desc(&self, t: TechniqueHandle) -> Result<TechniqueDesc<'_>> {
        let t = self.technique_ref(t)?;
        Ok(TechniqueDesc {
            name: t.name.as_deref(),
            passes: t.passes.len() as u32,
            annotations: t.annotations.len() as u32,
        })
    }

    pub fn pass(&self, technique: TechniqueHandle, index: u32) -> Option<PassHandle> {
        let t = self.techniques.get(technique.0 as usize)?;
        ((index as usize) < t.passes.len()).then_some(PassHandle {
            technique: technique.0,
            pass: index,
        })
    }

    pub fn pass_by_name(&self, technique: TechniqueHandle, name: &str) -> Option<PassHandle> {
        let t = self.techniques.get(technique.0 as usize)?;
        t.passes
            .iter()
            .position(|p| p.name.as_deref() == Some(name))
            .map(|i| PassHandle {
                technique: technique.0,
                pass: i as u32,
            })
    }

    fn pass_ref(&self, p: PassHandle) -> Result<&Pass> {
        self.techniques
            .get(p.technique as usize)
            .and_then(|t| t.passes.get(p.pass as usize))
            .ok_or(EffectError::InvalidCall("invalid pass handle"))
    }

    /// Name, annotation count and the shaders the pass binds with the current parameter values.
    pub fn pass_desc(&self, p: PassHandle) -> Result<PassDesc<'_>> {
        let pass = self.pass_ref(p)?;
        let mut desc = PassDesc {
            name: pass.name.as_deref(),
            annotations: pass.annotations.len() as u32,
            vertex_shader: None,
            pixel_shader: None,
        };
        for state in &pass.states {
            let class = STATE_TABLE.get(state.operation as usize).map(|s| s.class);
            let slot = match class {
                Some(StateClass::VertexShader) => &mut desc.vertex_shader,
                Some(StateClass::PixelShader) => &mut desc.pixel_shader,
                _ => continue,
            };
            let value = match &state.source {
                StateSource::Constant | StateSource::Expression(_) => Some(state.param),
                StateSource::Parameter(h) => Some(*h),
                StateSource::ArraySelector { array, program } => {
                    let index = program.run(&self.tree).first().copied().unwrap_or(0.0);
                    self.select_element(*array, index).ok()
                }
            };
            *slot = value
                .and_then(|h| self.tree.object(h))
                .and_then(|o| o.as_shader().cloned());
        }
        Ok(desc)
    }

    fn annotation_list(&self, target: Annotated) -> Option<&[ParamHandle]> {
        match target {
            Annotated::Parameter(h) => self.tree.get(h).map(|n| n.annotations.as_slice()),
            Annotated::Technique(t) => self.techniques.get(t.0 as usize).map(|t| t.annotations.as_slice()),
            Annotated::Pass(p) => self.pass_ref(p).ok().map(|p| p.annotations.as_slice()),
        }
    }

    pub fn annotation(&self, target: impl Into<Annotated>, index: u32) -> Option<ParamHandle> {
        self.annotation_list(target.into())?.get(index as usize).copied()
    }

    pub fn annotation_by_name(&self, target: impl Into<Annotated>, path: &str) -> Option<ParamHandle> {
        let list = self.annotation_list(target.into())?;
        self.tree.annotation_by_name(list, path)
    }

    // ---------------------------------------------------------------------------------------------
    // Technique selection
    // ---------------------------------------------------------------------------------------------

    pub fn set_technique(&mut self, technique: TechniqueHandle) -> Result<()> {
        self.technique_ref(technique)?;
        self.current_technique = Some(technique);
        Ok(())
    }

    pub fn current_technique(&self) -> Option<TechniqueHandle> {
        self.current_technique
    }

    // ---------------------------------------------------------------------------------------------
    // State manager
    // ---------------------------------------------------------------------------------------------

    /// Installs (or with `None` removes) the receiver of state changes.
    pub fn set_state_manager(&mut self, manager: Option<Rc<RefCell<dyn StateManager>>>) {
        self.state_manager = manager;
    }

    pub fn state_manager(&self) -> Option<Rc<RefCell<dyn StateManager>>> {
        self.state_manager.clone()
    }

    // ---------------------------------------------------------------------------------------------
    // Values
    // ---------------------------------------------------------------------------------------------

    /// Restores a parameter to the value it had when the effect was created.
    pub fn reset_value(&mut self, parameter: ParamHandle) -> Result<()> {
        self.tree.reset(parameter)?;
        self.record_write(parameter);
        Ok(())
    }

    /// Notes a completed write for the parameter block being recorded.
    pub(crate) fn record_write(&mut self, h: ParamHandle) {
        let Some(block) = self.recording.as_mut() else { return };
        let words = self.tree.words(h);
        let objects = self.tree.objects(h);
        match block.entries.iter_mut().find(|(e, _, _)| *e == h) {
            Some(entry) => {
                entry.1 = words;
                entry.2 = objects;
            }
            None => block.entries.push((h, words, objects)),
        }
    }

    pub fn begin_parameter_block(&mut self) -> Result<()> {
        if self.recording.is_some() {
            return Err(EffectError::InvalidCall("a parameter block is already being recorded"));
        }
        self.recording = Some(ParameterBlock::default());
        Ok(())
    }

    pub fn end_parameter_block(&mut self) -> Result<ParameterBlockHandle> {
        let block = self
            .recording
            .take()
            .ok_or(EffectError::InvalidCall("no parameter block is being recorded"))?;
        debug!(values = block.entries.len(), "parameter block recorded");
        self.blocks.push(Some(block));
        Ok(ParameterBlockHandle(self.blocks.len() as u32 - 1))
    }

    /// Writes every value captured by `block` back into its parameter.
    pub fn apply_parameter_block(&mut self, block: ParameterBlockHandle) -> Result<()> {
        let entries = self
            .blocks
            .get(block.0 as usize)
            .and_then(Option::as_ref)
            .ok_or(EffectError::InvalidCall("invalid parameter block"))?
            .entries
            .clone();
        for (h, words, objects) in entries {
            if !words.is_empty() {
                self.tree.write_words(h, |w| w.copy_from_slice(&words))?;
            }
            if !objects.is_empty() {
                self.tree.write_objects(h, |o| o.clone_from_slice(&objects))?;
            }
            self.record_write(h);
        }
        Ok(())
    }

    pub fn delete_parameter_block(&mut self, block: ParameterBlockHandle) -> Result<()> {
        self.blocks
            .get_mut(block.0 as usize)
            .and_then(Option::take)
            .map(|_| ())
            .ok_or(EffectError::InvalidCall("invalid parameter block"))
    }

    // ---------------------------------------------------------------------------------------------
    // Cloning
    // ---------------------------------------------------------------------------------------------

    /// Creates an independent effect from the same blob.
    ///
    /// Private parameter values and the current technique carry over; pool-shared parameters keep
    /// pointing at the pool. The state manager and Begin/End state do not carry over.
    pub fn clone_effect(&self) -> Result<Self> {
        let mut clone = Self::link(
            self.image.clone(),
            self.pool.as_ref(),
            self.config.clone(),
            self.tree.counter.clone(),
        )?;
        for (mine, theirs) in self.tree.roots.iter().zip(&clone.tree.roots) {
            if !Rc::ptr_eq(mine, theirs) {
                *theirs.borrow_mut() = mine.borrow().clone();
            }
        }
        clone.current_technique = self.current_technique;
        Ok(clone)
    }
}

fn shader_object(ty: ParameterType, data: &[u8]) -> Result<EffectObject, ParseError> {
    let shader = Shader::parse(data)?;
    let expected = match ty {
        ParameterType::VertexShader => ShaderStage::Vertex,
        _ => ShaderStage::Pixel,
    };
    if shader.stage() != expected {
        return Err(ParseError::invalid(format!(
            "{:?} bytecode stored in a {ty:?} object",
            shader.stage()
        )));
    }
    Ok(EffectObject::shader(Rc::new(shader)))
}
