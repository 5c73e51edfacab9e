//! Error types for scene construction, traversal, and asynchronous loading.
//!
//! Errors fall into three families with very different lifetimes:
//!
//! - [`ConfigError`] — a node was built with parameters that can never work
//!   (zero-length rotation axis, degenerate look-at, missing uri). These are
//!   detected at the node that owns them and abort the traversal pass.
//! - [`SceneError`] — the tree is structurally wrong for the state it runs in
//!   (geometry outside a shader, unknown backend, shader link failure). Also
//!   fatal to the pass; nothing is retried.
//! - [`LoadError`] — an asynchronous subgraph fetch failed or timed out. These
//!   never unwind a traversal: by the time they fire, the traversal that
//!   kicked off the load has long returned. They are reported through the
//!   engine's event queue and the owning load node parks itself in its
//!   terminal error state while the rest of the tree keeps rendering.

use thiserror::Error;

/// A node was configured with parameters that are invalid regardless of
/// traversal state.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    /// A mandatory parameter was not supplied.
    #[error("node parameter expected: {0}")]
    MissingParam(&'static str),

    /// A rotate node was given a zero-length axis vector.
    #[error("rotate config invalid: axis vector has zero length")]
    InvalidRotate,

    /// A look-at node was given coincident eye/look points or a zero-length
    /// up vector.
    #[error("look-at config invalid: {0}")]
    InvalidLookAt(&'static str),

    /// A geometry node was given no positions or no indices.
    #[error("geometry config invalid: {0}")]
    EmptyGeometry(&'static str),

    /// A geometry index referred past the end of the position array.
    #[error("geometry index {index} out of bounds for {vertex_count} vertices")]
    BadIndex { index: u32, vertex_count: usize },
}

/// A synchronous traversal failure.
///
/// Any of these unwinds the current render pass entirely; there is no
/// partial-frame recovery. Context state is still restored on the way out by
/// the scoped guards, so a failed pass leaves the [`RenderContext`] exactly as
/// it was before the pass began.
///
/// [`RenderContext`]: crate::context::RenderContext
#[derive(Debug, Error)]
pub enum SceneError {
    /// A node's configuration was invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// An operation that uploads shader state ran with no active program.
    ///
    /// This is a tree-authoring mistake: transforms, materials, lights and
    /// geometry must sit below a shader node.
    #[error("no active shader program")]
    NoActiveShader,

    /// An operation that needs a drawable surface ran with no active canvas,
    /// or the named canvas could not be resolved.
    #[error("no active canvas: {detail}")]
    NoActiveCanvas { detail: String },

    /// A capability module was requested that was never installed.
    #[error("unknown backend: '{name}'")]
    UnknownBackend { name: &'static str },

    /// The graphics layer failed to compile or link a shader program.
    #[error("shader program failed to link: {log}")]
    ShaderLinkFailure { log: String },

    /// An attribute or uniform expected by the engine was not found in the
    /// active program.
    #[error("shader variable not found: '{name}'")]
    ShaderVariableNotFound { name: String },

    /// An operation the engine deliberately refuses to perform.
    ///
    /// The one current case is dynamic geometry: re-deriving vertex buffers
    /// every visit would silently re-upload per frame, so it fails fast
    /// instead.
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(&'static str),
}

/// An asynchronous subgraph load failure.
///
/// Delivered through [`SceneGraph::take_load_errors`], never through the
/// `render` result.
///
/// [`SceneGraph::take_load_errors`]: crate::engine::SceneGraph::take_load_errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LoadError {
    /// The request did not complete within the transport's deadline.
    #[error("load timed out - uri: {uri}")]
    Timeout { uri: String },

    /// The transport reported a failure.
    #[error("load failed - {message} - uri: {uri}")]
    Transport { uri: String, message: String },

    /// The payload arrived but the parser could not produce a subgraph.
    #[error("load parse failed - {message} - uri: {uri}")]
    Parse { uri: String, message: String },
}
