//! # Phalanx
//!
//! **A retained-mode scene graph engine that gets out of your way.**
//!
//! Describe a scene once as a tree of declarative nodes, then render it every
//! frame. The engine handles the rest: transform and projection stacks,
//! shader and buffer caching, memoization of everything that cannot change,
//! and asynchronous loading of remote subgraphs — all behind a graphics
//! trait you can back with a real device or run entirely in memory.
//!
//! ## Quick Start
//!
//! ```no_run
//! use phalanx::*;
//! use phalanx::dsl::*;
//! use phalanx::context::Material;
//! use phalanx::engine::SceneGraph;
//! use phalanx::graphics::HeadlessGraphics;
//! use phalanx::load::ManualTransport;
//!
//! fn main() {
//!     let tree = canvas(CanvasParams::named("main"), vec![
//!         shader(ShaderParams::named("flat"), vec![
//!             perspective(PerspectiveParams::default(), vec![
//!                 look_at(LookAtParams::from_eye(Vec3::new(0.0, 2.0, 8.0)), vec![
//!                     material(Material::default(), vec![
//!                         rotate(RotateParams::about(Vec3::Y, 30.0), vec![
//!                             geometry(GeometryParams::cube(), vec![]),
//!                         ]),
//!                     ]),
//!                 ]),
//!             ]),
//!         ]),
//!     ]);
//!
//!     let mut scene = SceneGraph::new(HeadlessGraphics::new(), ManualTransport::new(), tree);
//!     scene.render().unwrap();
//! }
//! ```
//!
//! ## Philosophy
//!
//! - **Declare once, render forever** — The tree is data. Fixed parameters
//!   are resolved once and their derived matrices, programs, and buffers are
//!   cached for the life of the node.
//! - **Dynamic where you need it** — Any node can take a provider closure
//!   instead of a literal config; it re-evaluates every visit against the
//!   scope chain, and everything beneath it conservatively recomputes.
//! - **State that cannot leak** — Hierarchical state goes through scoped
//!   guards that restore on drop, so a failed visit unwinds as cleanly as a
//!   successful one.
//! - **No hidden globals** — Every [`SceneGraph`](engine::SceneGraph) owns
//!   its own context, backend registry, and caches; graphs coexist freely.
//!
//! See the [repository](https://github.com/xandwr/phalanx) for full
//! documentation and examples.

pub mod backend;
pub mod config;
pub mod context;
pub mod dsl;
pub mod engine;
pub mod error;
pub mod graphics;
pub mod load;
pub mod logging;
pub mod node;
pub mod registry;
pub mod scope;

pub use config::Config;
pub use context::{Light, LightKind, Material, RenderContext, TransformFrame, TraversalStats};
pub use engine::SceneGraph;
pub use error::{ConfigError, LoadError, SceneError};
pub use graphics::{GraphicsApi, HeadlessGraphics, ShaderSource, UniformValue};
pub use load::{LoadParams, LoadState, ManualTransport, SubgraphCache, SubgraphTransport};
pub use node::{NodeDef, NodeId};
pub use registry::{Backend, BackendRegistry};
pub use scope::{Scope, Value};

// Re-export glam math types for convenience
pub use glam::{Mat3, Mat4, Quat, Vec2, Vec3, Vec4};
