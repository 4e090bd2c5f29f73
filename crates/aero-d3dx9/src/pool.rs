//! Parameter storage shared between effects (`ID3DXEffectPool`).

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use hashbrown::HashMap;
use tracing::{debug, warn};

use crate::param::{ParamTree, SharedBlock};
use crate::types::{ParamHandle, ParameterClass, ParameterType};

type Signature = Vec<(ParameterClass, ParameterType, u32, u32, u32)>;

#[derive(Debug, Default)]
struct PoolInner {
    params: HashMap<String, (Signature, SharedBlock)>,
}

/// Named parameter storage shared by every effect created against the pool.
///
/// The pool also owns the update counter, so dirty tracking stays consistent when one effect
/// writes a shared value that another effect applies. Cloning the pool yields another handle to the
/// same table.
#[derive(Debug, Clone, Default)]
pub struct EffectPool {
    inner: Rc<RefCell<PoolInner>>,
    counter: Rc<Cell<u64>>,
}

impl EffectPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct shared parameters registered so far.
    pub fn len(&self) -> usize {
        self.inner.borrow().params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn counter(&self) -> Rc<Cell<u64>> {
        self.counter.clone()
    }

    /// Binds top-level parameter `h` to the pool entry of the same name.
    ///
    /// The first effect to declare a name provides its storage. Later effects adopt it when their
    /// declaration has the same type signature, and keep private storage otherwise.
    pub(crate) fn bind(&self, tree: &mut ParamTree, h: ParamHandle) {
        let Some(node) = tree.get(h) else { return };
        let Some(name) = node.name.clone() else {
            warn!("shared parameter without a name stays private");
            return;
        };
        let root = node.root;
        let signature = tree.signature(h);

        let mut inner = self.inner.borrow_mut();
        match inner.params.get(&name) {
            Some((existing, block)) if *existing == signature => {
                debug!(%name, "binding shared parameter to pool storage");
                tree.roots[root] = block.clone();
            }
            Some(_) => {
                warn!(%name, "shared parameter type differs from the pool; keeping private storage");
            }
            None => {
                inner
                    .params
                    .insert(name, (signature, tree.roots[root].clone()));
            }
        }
    }
}
