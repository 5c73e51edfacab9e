//! The arena-allocated node tree.
//!
//! Nodes live in a [`NodeArena`] and refer to their children by [`NodeId`].
//! Each node instance owns its private memoization cells (`TransformMemo`,
//! `ProjectionMemo`, resolved canvas ids, resolved geometry buffers, the
//! loader record), which is what lets derived state persist across visits of
//! the *same* node without any shared global cache.
//!
//! Trees are described declaratively as [`NodeDef`] values (built with the
//! constructors in [`dsl`](crate::dsl)) and instantiated into the arena by
//! the engine. The asynchronous loader also instantiates defs at runtime,
//! splicing fetched subgraphs under their load node and removing them again
//! when the cache evicts them.

use crate::config::Config;
use crate::context::{GeometryBuffers, Light, Material, TransformFrame};
use crate::dsl::{
    CanvasParams, FrustumParams, GeometryParams, LayerParams, LookAtParams, OrthoParams,
    PerspectiveParams, RotateParams, ScaleParams, ShaderParams, TranslateParams, ViewportParams,
};
use crate::graphics::CanvasId;
use crate::load::LoadRecord;
use crate::scope::Value;
use glam::Mat4;

/// Index-based handle to a node in its arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NodeId(pub(crate) usize);

/// A declarative node description, not yet attached to an arena.
pub struct NodeDef {
    pub(crate) kind: NodeKind,
    pub(crate) children: Vec<NodeDef>,
}

impl NodeDef {
    pub(crate) fn new(kind: NodeKind, children: Vec<NodeDef>) -> Self {
        Self { kind, children }
    }
}

/// Per-instance cache cells for a model-view transform node.
///
/// `local` is the matrix built from the node's own parameters; `combined` is
/// its composition with the ambient frame as of the previous visit. Either
/// may be reused only under the fixity rules of the memoization protocol.
#[derive(Debug, Default)]
pub struct TransformMemo {
    pub local: Option<Mat4>,
    pub combined: Option<TransformFrame>,
}

/// Per-instance cache cell for a projection node.
#[derive(Debug, Default)]
pub struct ProjectionMemo {
    pub frame: Option<TransformFrame>,
}

/// What a node is and the state it carries.
pub enum NodeKind {
    /// Structural grouping only.
    Group,
    /// Extends the scope with bindings for the subtree.
    Bindings {
        config: Config<Vec<(String, Value)>>,
    },
    Rotate {
        config: Config<RotateParams>,
        memo: TransformMemo,
    },
    Translate {
        config: Config<TranslateParams>,
        memo: TransformMemo,
    },
    Scale {
        config: Config<ScaleParams>,
        memo: TransformMemo,
    },
    LookAt {
        config: Config<LookAtParams>,
        memo: TransformMemo,
    },
    Perspective {
        config: Config<PerspectiveParams>,
        memo: ProjectionMemo,
    },
    Ortho {
        config: Config<OrthoParams>,
        memo: ProjectionMemo,
    },
    Frustum {
        config: Config<FrustumParams>,
        memo: ProjectionMemo,
    },
    Viewport {
        config: Config<ViewportParams>,
    },
    Canvas {
        config: Config<CanvasParams>,
        /// Memoized resolution, used only while the config is fixed.
        resolved: Option<CanvasId>,
    },
    Layer {
        config: Config<LayerParams>,
    },
    Material {
        config: Config<Material>,
    },
    Lights {
        config: Config<Vec<Light>>,
    },
    Shader {
        config: Config<ShaderParams>,
    },
    Geometry {
        config: Config<GeometryParams>,
        /// Buffers resolved on first visit; never re-derived.
        resolved: Option<GeometryBuffers>,
    },
    Load(LoadRecord),
}

/// A node attached to an arena.
pub struct Node {
    pub kind: NodeKind,
    pub children: Vec<NodeId>,
}

/// Slot-reusing arena of scene nodes.
pub struct NodeArena {
    slots: Vec<Option<Node>>,
    free: Vec<usize>,
}

impl NodeArena {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
        }
    }

    /// Attaches a node, reusing a vacant slot when one exists.
    pub fn insert(&mut self, node: Node) -> NodeId {
        match self.free.pop() {
            Some(index) => {
                self.slots[index] = Some(node);
                NodeId(index)
            }
            None => {
                self.slots.push(Some(node));
                NodeId(self.slots.len() - 1)
            }
        }
    }

    /// Recursively attaches a declarative def, returning its root id.
    pub fn instantiate(&mut self, def: NodeDef) -> NodeId {
        let children = def
            .children
            .into_iter()
            .map(|child| self.instantiate(child))
            .collect();
        self.insert(Node {
            kind: def.kind,
            children,
        })
    }

    /// Detaches `id` and everything below it, returning the slots to the
    /// free list.
    pub fn remove_subtree(&mut self, id: NodeId) {
        let children = self.children(id);
        for child in children {
            self.remove_subtree(child);
        }
        if self.slots[id.0].take().is_some() {
            self.free.push(id.0);
        }
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.slots.get(id.0).is_some_and(Option::is_some)
    }

    /// Number of attached nodes.
    pub fn node_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn get(&self, id: NodeId) -> &Node {
        self.slots[id.0].as_ref().expect("stale node id")
    }

    pub fn get_mut(&mut self, id: NodeId) -> &mut Node {
        self.slots[id.0].as_mut().expect("stale node id")
    }

    /// The node's child list, cloned so the caller can traverse without
    /// holding a borrow on the arena.
    pub fn children(&self, id: NodeId) -> Vec<NodeId> {
        self.get(id).children.clone()
    }
}

impl Default for NodeArena {
    fn default() -> Self {
        Self::new()
    }
}
