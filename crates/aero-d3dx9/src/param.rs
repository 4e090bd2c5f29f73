//! Parameter tree: an arena of typed nodes over shared value blocks.
//!
//! Every root (top-level parameter, annotation, or state value) owns one [`ValueBlock`]; its
//! descendants address contiguous word and object ranges inside that block. Blocks are
//! reference-counted so that pool-shared parameters can alias the same storage across effects.

use std::cell::{Cell, RefCell};
use std::ops::Range;
use std::rc::Rc;

use crate::error::{EffectError, Result};
use crate::object::EffectObject;
use crate::pass::{StateEntry, StateSource};
use crate::reader::{LeafRecord, NodeRecord};
use crate::types::{ParamHandle, ParameterClass, ParameterDesc, ParameterFlags, ParameterType};

/// Backing storage of one root parameter.
#[derive(Debug, Clone, Default)]
pub(crate) struct ValueBlock {
    pub words: Vec<u32>,
    pub objects: Vec<Option<EffectObject>>,
    /// Value of the update counter when this block was last written.
    pub version: u64,
}

pub(crate) type SharedBlock = Rc<RefCell<ValueBlock>>;

/// Object slot waiting for the effect's object table to be resolved.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PendingObject {
    pub root: usize,
    pub slot: usize,
    pub id: u32,
}

#[derive(Debug, Clone)]
pub(crate) struct Node {
    pub name: Option<String>,
    pub semantic: Option<String>,
    pub class: ParameterClass,
    pub ty: ParameterType,
    pub rows: u32,
    pub columns: u32,
    pub elements: u32,
    /// Array elements when `elements > 0`, otherwise struct members.
    pub members: Vec<ParamHandle>,
    pub annotations: Vec<ParamHandle>,
    pub flags: ParameterFlags,
    pub bytes: u32,
    pub root: usize,
    /// Outermost parameter this node belongs to (itself for roots).
    pub top: ParamHandle,
    pub words: Range<usize>,
    pub objects: Range<usize>,
    /// Sampler leaves only.
    pub sampler_states: Vec<StateEntry>,
}

impl Node {
    pub fn is_leaf(&self) -> bool {
        self.members.is_empty() && self.elements == 0 && self.class != ParameterClass::Struct
    }
}

#[derive(Debug)]
pub(crate) struct ParamTree {
    pub nodes: Vec<Node>,
    pub roots: Vec<SharedBlock>,
    /// Values each root held when the effect was created.
    pub initial: Vec<ValueBlock>,
    pub top_level: Vec<ParamHandle>,
    pub counter: Rc<Cell<u64>>,
}

impl ParamTree {
    pub fn new(counter: Rc<Cell<u64>>) -> Self {
        Self {
            nodes: Vec::new(),
            roots: Vec::new(),
            initial: Vec::new(),
            top_level: Vec::new(),
            counter,
        }
    }

    pub fn node(&self, h: ParamHandle) -> Result<&Node> {
        self.nodes
            .get(h.0 as usize)
            .ok_or(EffectError::InvalidCall("invalid parameter handle"))
    }

    pub(crate) fn get(&self, h: ParamHandle) -> Option<&Node> {
        self.nodes.get(h.0 as usize)
    }

    // ---------------------------------------------------------------------------------------------
    // Construction
    // ---------------------------------------------------------------------------------------------

    /// Adds a root parameter built from `record`, allocating its value block.
    pub fn add_root(
        &mut self,
        record: &NodeRecord,
        flags: ParameterFlags,
        pending: &mut Vec<PendingObject>,
    ) -> ParamHandle {
        let root = self.roots.len();
        self.roots.push(Rc::new(RefCell::new(ValueBlock::default())));
        self.initial.push(ValueBlock::default());

        let mut block = ValueBlock::default();
        let h = self.add_node(record, root, None, flags, &mut block, pending);
        self.initial[root] = block.clone();
        *self.roots[root].borrow_mut() = block;
        h
    }

    fn add_node(
        &mut self,
        record: &NodeRecord,
        root: usize,
        top: Option<ParamHandle>,
        flags: ParameterFlags,
        block: &mut ValueBlock,
        pending: &mut Vec<PendingObject>,
    ) -> ParamHandle {
        let h = ParamHandle(self.nodes.len() as u32);
        let top = top.unwrap_or(h);
        let word_start = block.words.len();
        let object_start = block.objects.len();
        self.nodes.push(Node {
            name: record.name.clone(),
            semantic: record.semantic.clone(),
            class: record.class,
            ty: record.ty,
            rows: record.rows,
            columns: record.columns,
            elements: record.elements,
            members: Vec::new(),
            annotations: Vec::new(),
            flags,
            bytes: 0,
            root,
            top,
            words: word_start..word_start,
            objects: object_start..object_start,
            sampler_states: Vec::new(),
        });

        let mut members = Vec::with_capacity(record.children.len());
        let mut bytes = 0u32;
        for child in &record.children {
            let m = self.add_node(child, root, Some(top), flags, block, pending);
            bytes = bytes.saturating_add(self.nodes[m.0 as usize].bytes);
            members.push(m);
        }

        let mut sampler_states = Vec::new();
        match &record.leaf {
            LeafRecord::None => {}
            LeafRecord::Words(words) => {
                block.words.extend_from_slice(words);
                bytes = record.rows * record.columns * 4;
            }
            LeafRecord::Object(id) => {
                if record.ty.is_object_slot() {
                    pending.push(PendingObject {
                        root,
                        slot: block.objects.len(),
                        id: *id,
                    });
                    block.objects.push(None);
                }
                bytes = 4;
            }
            LeafRecord::Sampler(states) => {
                for state in states {
                    let param = self.add_root(&state.value, ParameterFlags::empty(), pending);
                    sampler_states.push(StateEntry {
                        operation: state.operation,
                        index: state.index,
                        param,
                        source: StateSource::Constant,
                    });
                }
                bytes = 4;
            }
            LeafRecord::Unsupported => bytes = 4,
        }

        let node = &mut self.nodes[h.0 as usize];
        node.members = members;
        node.bytes = bytes;
        node.words = word_start..block.words.len();
        node.objects = object_start..block.objects.len();
        node.sampler_states = sampler_states;
        h
    }

    /// Stores a resolved object into a root's slot, both current and initial value.
    pub fn fill_object(&mut self, pending: PendingObject, object: Option<EffectObject>) {
        if let Some(slot) = self.initial[pending.root].objects.get_mut(pending.slot) {
            *slot = object.clone();
        }
        if let Some(slot) = self.roots[pending.root].borrow_mut().objects.get_mut(pending.slot) {
            *slot = object;
        }
    }

    /// Type signature used to decide whether two parameters may share storage.
    pub fn signature(&self, h: ParamHandle) -> Vec<(ParameterClass, ParameterType, u32, u32, u32)> {
        let mut out = Vec::new();
        let mut stack = vec![h];
        while let Some(h) = stack.pop() {
            let n = &self.nodes[h.0 as usize];
            out.push((n.class, n.ty, n.rows, n.columns, n.elements));
            stack.extend(n.members.iter().rev().copied());
        }
        out
    }

    // ---------------------------------------------------------------------------------------------
    // Lookup
    // ---------------------------------------------------------------------------------------------

    fn named(&self, list: &[ParamHandle], name: &str) -> Option<ParamHandle> {
        list.iter()
            .copied()
            .find(|h| self.nodes[h.0 as usize].name.as_deref() == Some(name))
    }

    /// Resolves `path` relative to `base` (or the top level).
    ///
    /// Grammar: `name`, then any sequence of `.member`, `[index]`, and (top level only)
    /// `@annotation`. Anything malformed resolves to `None`.
    pub fn find(&self, base: Option<ParamHandle>, path: &str) -> Option<ParamHandle> {
        if path.is_empty() {
            return base;
        }
        let candidates: &[ParamHandle] = match base {
            None => &self.top_level,
            Some(b) => &self.get(b)?.members,
        };
        let split = path.find(['[', '.', '@']).unwrap_or(path.len());
        let (name, rest) = path.split_at(split);
        let found = self.named(candidates, name)?;

        match rest.as_bytes().first() {
            None => Some(found),
            Some(b'.') => self.find_member(found, &rest[1..]),
            Some(b'[') => self.find_element(found, &rest[1..]),
            Some(b'@') if base.is_none() => {
                self.annotation_by_name(&self.nodes[found.0 as usize].annotations, &rest[1..])
            }
            _ => None,
        }
    }

    fn find_member(&self, h: ParamHandle, path: &str) -> Option<ParamHandle> {
        if path.is_empty() {
            return None;
        }
        self.find(Some(h), path)
    }

    /// `path` is the text after `[`.
    fn find_element(&self, h: ParamHandle, path: &str) -> Option<ParamHandle> {
        let close = path.find(']')?;
        let digits = &path[..close];
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let element = self.element(h, digits.parse().ok()?)?;
        let rest = &path[close + 1..];
        match rest.as_bytes().first() {
            None => Some(element),
            Some(b'.') => self.find_member(element, &rest[1..]),
            Some(b'[') => self.find_element(element, &rest[1..]),
            _ => None,
        }
    }

    /// Looks up `path` among an annotation list; the first token names the annotation.
    pub fn annotation_by_name(&self, list: &[ParamHandle], path: &str) -> Option<ParamHandle> {
        let split = path.find(['[', '.', '@']).unwrap_or(path.len());
        let (name, rest) = path.split_at(split);
        let found = self.named(list, name)?;
        match rest.as_bytes().first() {
            None => Some(found),
            Some(b'.') => self.find_member(found, &rest[1..]),
            Some(b'[') => self.find_element(found, &rest[1..]),
            _ => None,
        }
    }

    /// Element `index` of an array parameter; `None` for non-arrays.
    pub fn element(&self, h: ParamHandle, index: u32) -> Option<ParamHandle> {
        let n = self.get(h)?;
        if index < n.elements {
            n.members.get(index as usize).copied()
        } else {
            None
        }
    }

    /// Member or element `index` of `parent`, or top-level parameter `index`.
    pub fn child(&self, parent: Option<ParamHandle>, index: u32) -> Option<ParamHandle> {
        match parent {
            None => self.top_level.get(index as usize).copied(),
            Some(p) => self.get(p)?.members.get(index as usize).copied(),
        }
    }

    /// First child whose semantic matches, ASCII case-insensitively.
    ///
    /// `None` selects the first child without a semantic.
    pub fn by_semantic(&self, parent: Option<ParamHandle>, semantic: Option<&str>) -> Option<ParamHandle> {
        let list: &[ParamHandle] = match parent {
            None => &self.top_level,
            Some(p) => &self.get(p)?.members,
        };
        list.iter().copied().find(|h| {
            match (self.nodes[h.0 as usize].semantic.as_deref(), semantic) {
                (None, None) => true,
                (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
                _ => false,
            }
        })
    }

    pub fn desc(&self, h: ParamHandle) -> Result<ParameterDesc<'_>> {
        let n = self.node(h)?;
        let struct_members = match (n.class, n.elements) {
            (ParameterClass::Struct, 0) => n.members.len(),
            (ParameterClass::Struct, _) => n
                .members
                .first()
                .map_or(0, |e| self.nodes[e.0 as usize].members.len()),
            _ => 0,
        };
        Ok(ParameterDesc {
            name: n.name.as_deref(),
            semantic: n.semantic.as_deref(),
            class: n.class,
            ty: n.ty,
            rows: n.rows,
            columns: n.columns,
            elements: n.elements,
            annotations: n.annotations.len() as u32,
            struct_members: struct_members as u32,
            flags: n.flags,
            bytes: n.bytes,
        })
    }

    // ---------------------------------------------------------------------------------------------
    // Values
    // ---------------------------------------------------------------------------------------------

    pub fn read_words<R>(&self, h: ParamHandle, f: impl FnOnce(&[u32]) -> R) -> Result<R> {
        let n = self.node(h)?;
        let block = self.roots[n.root].borrow();
        Ok(f(&block.words[n.words.clone()]))
    }

    pub fn words(&self, h: ParamHandle) -> Vec<u32> {
        self.read_words(h, <[u32]>::to_vec).unwrap_or_default()
    }

    pub fn objects(&self, h: ParamHandle) -> Vec<Option<EffectObject>> {
        match self.get(h) {
            Some(n) => self.roots[n.root].borrow().objects[n.objects.clone()].to_vec(),
            None => Vec::new(),
        }
    }

    pub fn object(&self, h: ParamHandle) -> Option<EffectObject> {
        self.objects(h).into_iter().next().flatten()
    }

    /// Mutates a node's words and marks its root as updated.
    pub fn write_words<R>(&self, h: ParamHandle, f: impl FnOnce(&mut [u32]) -> R) -> Result<R> {
        let n = self.node(h)?;
        let mut block = self.roots[n.root].borrow_mut();
        let r = f(&mut block.words[n.words.clone()]);
        block.version = self.next_version();
        Ok(r)
    }

    pub fn write_objects<R>(
        &self,
        h: ParamHandle,
        f: impl FnOnce(&mut [Option<EffectObject>]) -> R,
    ) -> Result<R> {
        let n = self.node(h)?;
        let mut block = self.roots[n.root].borrow_mut();
        let r = f(&mut block.objects[n.objects.clone()]);
        block.version = self.next_version();
        Ok(r)
    }

    /// Restores a node's slice of its root to the creation-time value.
    pub fn reset(&self, h: ParamHandle) -> Result<()> {
        let n = self.node(h)?;
        let initial = &self.initial[n.root];
        let mut block = self.roots[n.root].borrow_mut();
        block.words[n.words.clone()].copy_from_slice(&initial.words[n.words.clone()]);
        block.objects[n.objects.clone()].clone_from_slice(&initial.objects[n.objects.clone()]);
        block.version = self.next_version();
        Ok(())
    }

    pub fn next_version(&self) -> u64 {
        let v = self.counter.get() + 1;
        self.counter.set(v);
        v
    }

    pub fn version(&self, h: ParamHandle) -> u64 {
        self.get(h)
            .map_or(0, |n| self.roots[n.root].borrow().version)
    }

    pub fn is_dirty(&self, h: ParamHandle, since: u64) -> bool {
        self.version(h) > since
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::EffectImage;
    use crate::test_utils::{ty, EffectBuilder, TypeSpec, ValueSpec};

    /// Builds a tree the same way effect creation does, without techniques.
    fn tree_from(builder: &EffectBuilder) -> ParamTree {
        let image = EffectImage::parse(&builder.build()).unwrap();
        let mut tree = ParamTree::new(Rc::new(Cell::new(0)));
        let mut pending = Vec::new();
        for p in &image.parameters {
            let h = tree.add_root(&p.node, ParameterFlags::from_bits_truncate(p.flags), &mut pending);
            let annotations = p
                .annotations
                .iter()
                .map(|a| tree.add_root(a, ParameterFlags::ANNOTATION, &mut pending))
                .collect();
            tree.nodes[h.0 as usize].annotations = annotations;
            tree.top_level.push(h);
        }
        tree
    }

    fn sample() -> ParamTree {
        let mut b = EffectBuilder::new();
        b.parameter(TypeSpec::scalar(ty::FLOAT, "f"), ValueSpec::floats(&[0.5]));
        b.parameter(
            TypeSpec::structure(
                "s",
                vec![
                    TypeSpec::vector(ty::FLOAT, "v", 3),
                    TypeSpec::scalar(ty::INT, "i").array(2),
                ],
            )
            .array(2),
            ValueSpec::words(&[0; 10]),
        );
        b.annotated_parameter(
            TypeSpec::scalar(ty::FLOAT, "g").with_semantic("WorldViewProj"),
            ValueSpec::floats(&[1.0]),
            vec![(TypeSpec::scalar(ty::INT, "h").array(3), ValueSpec::words(&[7, 8, 9]))],
        );
        tree_from(&b)
    }

    #[test]
    fn resolves_members_and_elements() {
        let t = sample();
        let s = t.find(None, "s").unwrap();
        let s1 = t.element(s, 1).unwrap();
        let i = t.find(Some(s1), "i").unwrap();
        assert_eq!(t.find(None, "s[1].i"), Some(i));
        assert_eq!(t.find(None, "s[1].i[1]"), t.element(i, 1));
        assert_eq!(t.find(Some(s1), ""), Some(s1));
        assert_eq!(t.find(None, ""), None);
    }

    #[test]
    fn malformed_paths_resolve_to_nothing() {
        let t = sample();
        for path in ["s[", "s[]", "s[1", "s[x]", "s[2]", "s.", "s[1].", "s[1]x", "f.", "f[0]", "nope", "s[1].i@h"] {
            assert_eq!(t.find(None, path), None, "{path}");
        }
    }

    #[test]
    fn annotation_paths_compose() {
        let t = sample();
        let g = t.find(None, "g").unwrap();
        let h = t.find(None, "g@h").unwrap();
        let h0 = t.element(h, 0).unwrap();
        assert_eq!(t.find(None, "g@h[0]"), Some(h0));
        assert_eq!(t.annotation_by_name(&t.nodes[g.0 as usize].annotations, "h[0]"), Some(h0));
        // Annotations are only reachable from the top level.
        assert_eq!(t.find(Some(g), "h"), None);
        assert_eq!(t.read_words(h0, |w| w.to_vec()).unwrap(), vec![7]);
    }

    #[test]
    fn element_of_non_array_is_none() {
        let t = sample();
        let f = t.find(None, "f").unwrap();
        assert_eq!(t.element(f, 0), None);
    }

    #[test]
    fn semantic_lookup_ignores_ascii_case() {
        let t = sample();
        assert_eq!(t.by_semantic(None, Some("worldviewproj")), t.find(None, "g"));
        assert_eq!(t.by_semantic(None, None), t.find(None, "f"));
    }

    #[test]
    fn byte_sizes_follow_shape() {
        let t = sample();
        let s = t.find(None, "s").unwrap();
        let d = t.desc(s).unwrap();
        assert_eq!(d.bytes, 2 * (3 * 4 + 2 * 4));
        assert_eq!(d.struct_members, 2);
        let g = t.desc(t.find(None, "g").unwrap()).unwrap();
        assert_eq!(g.annotations, 1);
        assert_eq!(g.semantic, Some("WorldViewProj"));
    }

    #[test]
    fn writes_bump_root_version_and_reset_restores() {
        let t = sample();
        let f = t.find(None, "f").unwrap();
        let before = t.version(f);
        t.write_words(f, |w| w[0] = 2.0f32.to_bits()).unwrap();
        assert!(t.is_dirty(f, before));
        t.reset(f).unwrap();
        assert_eq!(t.words(f), vec![0.5f32.to_bits()]);
    }
}
