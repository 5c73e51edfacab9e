//! Named capability modules and the registry that wires them up.
//!
//! Backends are the engine's capability modules: canvas resolution, shader
//! program management, transform and projection math, lights, material, and
//! geometry. Each is registered once per engine under a unique name and gets
//! a one-time [`Backend::install`] hook against the [`RenderContext`] it will
//! operate over.
//!
//! The registry is an explicit dependency-injection object owned by each
//! [`SceneGraph`] — there is no process-global state, so any number of scene
//! graphs can coexist, each with its own backend set.
//!
//! [`SceneGraph`]: crate::engine::SceneGraph

use crate::context::RenderContext;
use crate::error::SceneError;
use log::{debug, warn};
use std::any::Any;
use std::collections::HashMap;
use std::rc::Rc;

/// A capability module operating over shared [`RenderContext`] state.
pub trait Backend: Any {
    /// Unique registry name for this backend type.
    const NAME: &'static str;

    /// One-time initialization hook, called when the backend is installed.
    ///
    /// Backends that lazily build context sub-state (caches, builtin shader
    /// tables) do it here rather than on first use.
    fn install(&self, _ctx: &mut RenderContext) {}
}

/// Per-engine table of installed backends.
pub struct BackendRegistry {
    entries: HashMap<&'static str, Rc<dyn Any>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Installs `backend` under its type name, running its install hook.
    ///
    /// Installing the same name twice keeps the first registration; backends
    /// are meant to be wired exactly once, at engine construction.
    pub fn install<B: Backend>(&mut self, backend: B, ctx: &mut RenderContext) {
        if self.entries.contains_key(B::NAME) {
            warn!("[registry] backend '{}' already installed, ignoring", B::NAME);
            return;
        }
        backend.install(ctx);
        debug!("[registry] installed backend '{}'", B::NAME);
        self.entries.insert(B::NAME, Rc::new(backend));
    }

    /// Looks up an installed backend by type.
    pub fn get<B: Backend>(&self) -> Result<Rc<B>, SceneError> {
        self.entries
            .get(B::NAME)
            .cloned()
            .and_then(|rc| rc.downcast::<B>().ok())
            .ok_or(SceneError::UnknownBackend { name: B::NAME })
    }

    /// Whether a backend is installed under `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}
