//! The standard capability backends.
//!
//! One module per capability, mirroring the registry names they install
//! under: `canvas`, `shader`, `model-view-transform`, `projection-transform`,
//! `lights`, `material`, and `geometry`. [`SceneGraph::new`] installs all of
//! them; custom engines can install their own set through
//! [`BackendRegistry`](crate::registry::BackendRegistry).
//!
//! [`SceneGraph::new`]: crate::engine::SceneGraph::new

mod canvas;
mod geometry;
mod lights;
mod material;
mod projection;
mod shader;
mod transform;

pub use canvas::CanvasBackend;
pub use geometry::GeometryBackend;
pub use lights::LightsBackend;
pub use material::MaterialBackend;
pub use projection::ProjectionBackend;
pub use shader::ShaderBackend;
pub use transform::TransformBackend;
