//! Declarative node constructors — the engine's authoring surface.
//!
//! Every constructor takes a configuration (a literal parameter struct, or a
//! [`Config::dynamic`] provider over the scope) plus the node's children, and
//! yields a [`NodeDef`] ready to hand to [`SceneGraph::new`] or to return
//! from a subgraph parser:
//!
//! ```
//! use phalanx::dsl::*;
//! use phalanx::context::Material;
//! use phalanx::Vec3;
//!
//! let tree = canvas(CanvasParams::named("main"), vec![
//!     shader(ShaderParams::named("flat"), vec![
//!         perspective(PerspectiveParams::default(), vec![
//!             look_at(LookAtParams::from_eye(Vec3::new(0.0, 2.0, 8.0)), vec![
//!                 material(Material::default(), vec![
//!                     rotate(RotateParams::about(Vec3::Y, 30.0), vec![
//!                         geometry(GeometryParams::cube(), vec![]),
//!                     ]),
//!                 ]),
//!             ]),
//!         ]),
//!     ]),
//! ]);
//! # let _ = tree;
//! ```
//!
//! Child lists nest one level of `Vec` and nothing deeper; a child that is
//! itself a list goes through [`group`].
//!
//! [`SceneGraph::new`]: crate::engine::SceneGraph::new

use crate::config::Config;
use crate::context::{Light, Material};
use crate::graphics::ShaderSource;
use crate::load::LoadParams;
use crate::load::LoadRecord;
use crate::node::{NodeDef, NodeKind, ProjectionMemo, TransformMemo};
use crate::scope::Value;
use glam::Vec3;

/// Axis/angle rotation, angle in degrees.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RotateParams {
    pub angle_degrees: f32,
    pub axis: Vec3,
}

impl RotateParams {
    pub fn about(axis: Vec3, angle_degrees: f32) -> Self {
        Self {
            angle_degrees,
            axis,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TranslateParams {
    pub offset: Vec3,
}

impl TranslateParams {
    pub fn by(offset: Vec3) -> Self {
        Self { offset }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ScaleParams {
    pub factors: Vec3,
}

impl ScaleParams {
    pub fn by(factors: Vec3) -> Self {
        Self { factors }
    }

    pub fn uniform(factor: f32) -> Self {
        Self {
            factors: Vec3::splat(factor),
        }
    }
}

/// Eye/look/up view transform.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LookAtParams {
    pub eye: Vec3,
    pub look: Vec3,
    pub up: Vec3,
}

impl LookAtParams {
    /// Looks at the origin from `eye` with +Y up.
    pub fn from_eye(eye: Vec3) -> Self {
        Self {
            eye,
            look: Vec3::ZERO,
            up: Vec3::Y,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PerspectiveParams {
    pub fovy_degrees: f32,
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for PerspectiveParams {
    fn default() -> Self {
        Self {
            fovy_degrees: 45.0,
            aspect: 1.0,
            near: 0.1,
            far: 1000.0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct OrthoParams {
    pub left: f32,
    pub right: f32,
    pub bottom: f32,
    pub top: f32,
    pub near: f32,
    pub far: f32,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FrustumParams {
    pub left: f32,
    pub right: f32,
    pub bottom: f32,
    pub top: f32,
    pub near: f32,
    pub far: f32,
}

/// Viewport rectangle in pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ViewportParams {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CanvasParams {
    pub name: String,
}

impl CanvasParams {
    pub fn named(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LayerParams {
    pub name: String,
}

impl LayerParams {
    pub fn named(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Shader selection: a builtin variant name, or a custom source pair
/// registered under its own variant name.
#[derive(Clone, Debug, PartialEq)]
pub struct ShaderParams {
    pub variant: String,
    pub source: Option<ShaderSource>,
}

impl ShaderParams {
    /// A builtin variant (`"flat"`, `"phong"`).
    pub fn named(variant: impl Into<String>) -> Self {
        Self {
            variant: variant.into(),
            source: None,
        }
    }

    /// A custom program cached under `variant`.
    pub fn custom(variant: impl Into<String>, source: ShaderSource) -> Self {
        Self {
            variant: variant.into(),
            source: Some(source),
        }
    }
}

/// Triangle-list geometry.
///
/// `type_name` opts the node into the canvas-scoped buffer cache: every
/// geometry node sharing a type name on a canvas shares one buffer set.
/// Without it the buffers are anonymous and unshared. Missing `normals` are
/// synthesized by face-normal averaging at buffer-creation time.
#[derive(Clone, Debug, PartialEq)]
pub struct GeometryParams {
    pub type_name: Option<String>,
    pub positions: Vec<[f32; 3]>,
    pub normals: Option<Vec<[f32; 3]>>,
    pub indices: Vec<u32>,
}

impl GeometryParams {
    /// A unit cube centered at the origin, cached under type `"cube"`.
    ///
    /// Four vertices per face so each face keeps its own flat normal.
    pub fn cube() -> Self {
        #[rustfmt::skip]
        let positions: Vec<[f32; 3]> = vec![
            // Front (Z+)
            [-0.5, -0.5,  0.5], [ 0.5, -0.5,  0.5], [ 0.5,  0.5,  0.5], [-0.5,  0.5,  0.5],
            // Back (Z-)
            [ 0.5, -0.5, -0.5], [-0.5, -0.5, -0.5], [-0.5,  0.5, -0.5], [ 0.5,  0.5, -0.5],
            // Top (Y+)
            [-0.5,  0.5,  0.5], [ 0.5,  0.5,  0.5], [ 0.5,  0.5, -0.5], [-0.5,  0.5, -0.5],
            // Bottom (Y-)
            [-0.5, -0.5, -0.5], [ 0.5, -0.5, -0.5], [ 0.5, -0.5,  0.5], [-0.5, -0.5,  0.5],
            // Right (X+)
            [ 0.5, -0.5,  0.5], [ 0.5, -0.5, -0.5], [ 0.5,  0.5, -0.5], [ 0.5,  0.5,  0.5],
            // Left (X-)
            [-0.5, -0.5, -0.5], [-0.5, -0.5,  0.5], [-0.5,  0.5,  0.5], [-0.5,  0.5, -0.5],
        ];
        #[rustfmt::skip]
        let normals: Vec<[f32; 3]> = vec![
            [0.0, 0.0, 1.0], [0.0, 0.0, 1.0], [0.0, 0.0, 1.0], [0.0, 0.0, 1.0],
            [0.0, 0.0, -1.0], [0.0, 0.0, -1.0], [0.0, 0.0, -1.0], [0.0, 0.0, -1.0],
            [0.0, 1.0, 0.0], [0.0, 1.0, 0.0], [0.0, 1.0, 0.0], [0.0, 1.0, 0.0],
            [0.0, -1.0, 0.0], [0.0, -1.0, 0.0], [0.0, -1.0, 0.0], [0.0, -1.0, 0.0],
            [1.0, 0.0, 0.0], [1.0, 0.0, 0.0], [1.0, 0.0, 0.0], [1.0, 0.0, 0.0],
            [-1.0, 0.0, 0.0], [-1.0, 0.0, 0.0], [-1.0, 0.0, 0.0], [-1.0, 0.0, 0.0],
        ];
        let indices = (0..6u32)
            .flat_map(|face| {
                let base = face * 4;
                [base, base + 1, base + 2, base, base + 2, base + 3]
            })
            .collect();
        Self {
            type_name: Some("cube".to_string()),
            positions,
            normals: Some(normals),
            indices,
        }
    }

    /// A `size` x `size` plane on the XZ axis at y=0, cached under `"plane"`.
    pub fn plane(size: f32) -> Self {
        let half = size / 2.0;
        Self {
            type_name: Some("plane".to_string()),
            positions: vec![
                [-half, 0.0, half],
                [half, 0.0, half],
                [half, 0.0, -half],
                [-half, 0.0, -half],
            ],
            normals: Some(vec![[0.0, 1.0, 0.0]; 4]),
            indices: vec![0, 1, 2, 0, 2, 3],
        }
    }
}

/// Structural grouping with no state of its own.
pub fn group(children: Vec<NodeDef>) -> NodeDef {
    NodeDef::new(NodeKind::Group, children)
}

/// Extends the scope with bindings visible to the subtree.
pub fn bindings(
    config: impl Into<Config<Vec<(String, Value)>>>,
    children: Vec<NodeDef>,
) -> NodeDef {
    NodeDef::new(
        NodeKind::Bindings {
            config: config.into(),
        },
        children,
    )
}

pub fn rotate(config: impl Into<Config<RotateParams>>, children: Vec<NodeDef>) -> NodeDef {
    NodeDef::new(
        NodeKind::Rotate {
            config: config.into(),
            memo: TransformMemo::default(),
        },
        children,
    )
}

pub fn translate(config: impl Into<Config<TranslateParams>>, children: Vec<NodeDef>) -> NodeDef {
    NodeDef::new(
        NodeKind::Translate {
            config: config.into(),
            memo: TransformMemo::default(),
        },
        children,
    )
}

pub fn scale(config: impl Into<Config<ScaleParams>>, children: Vec<NodeDef>) -> NodeDef {
    NodeDef::new(
        NodeKind::Scale {
            config: config.into(),
            memo: TransformMemo::default(),
        },
        children,
    )
}

pub fn look_at(config: impl Into<Config<LookAtParams>>, children: Vec<NodeDef>) -> NodeDef {
    NodeDef::new(
        NodeKind::LookAt {
            config: config.into(),
            memo: TransformMemo::default(),
        },
        children,
    )
}

pub fn perspective(
    config: impl Into<Config<PerspectiveParams>>,
    children: Vec<NodeDef>,
) -> NodeDef {
    NodeDef::new(
        NodeKind::Perspective {
            config: config.into(),
            memo: ProjectionMemo::default(),
        },
        children,
    )
}

pub fn ortho(config: impl Into<Config<OrthoParams>>, children: Vec<NodeDef>) -> NodeDef {
    NodeDef::new(
        NodeKind::Ortho {
            config: config.into(),
            memo: ProjectionMemo::default(),
        },
        children,
    )
}

pub fn frustum(config: impl Into<Config<FrustumParams>>, children: Vec<NodeDef>) -> NodeDef {
    NodeDef::new(
        NodeKind::Frustum {
            config: config.into(),
            memo: ProjectionMemo::default(),
        },
        children,
    )
}

pub fn viewport(config: impl Into<Config<ViewportParams>>, children: Vec<NodeDef>) -> NodeDef {
    NodeDef::new(
        NodeKind::Viewport {
            config: config.into(),
        },
        children,
    )
}

/// Activates a named drawable surface for the subtree.
///
/// Entering the canvas clears it; leaving flushes it and restores whichever
/// canvas was active before, so canvas nodes nest arbitrarily.
pub fn canvas(config: impl Into<Config<CanvasParams>>, children: Vec<NodeDef>) -> NodeDef {
    NodeDef::new(
        NodeKind::Canvas {
            config: config.into(),
            resolved: None,
        },
        children,
    )
}

pub fn layer(config: impl Into<Config<LayerParams>>, children: Vec<NodeDef>) -> NodeDef {
    NodeDef::new(
        NodeKind::Layer {
            config: config.into(),
        },
        children,
    )
}

pub fn material(config: impl Into<Config<Material>>, children: Vec<NodeDef>) -> NodeDef {
    NodeDef::new(
        NodeKind::Material {
            config: config.into(),
        },
        children,
    )
}

pub fn lights(config: impl Into<Config<Vec<Light>>>, children: Vec<NodeDef>) -> NodeDef {
    NodeDef::new(
        NodeKind::Lights {
            config: config.into(),
        },
        children,
    )
}

pub fn shader(config: impl Into<Config<ShaderParams>>, children: Vec<NodeDef>) -> NodeDef {
    NodeDef::new(
        NodeKind::Shader {
            config: config.into(),
        },
        children,
    )
}

/// Triangle-list geometry leaf. Children are visited after the draw.
pub fn geometry(config: impl Into<Config<GeometryParams>>, children: Vec<NodeDef>) -> NodeDef {
    NodeDef::new(
        NodeKind::Geometry {
            config: config.into(),
            resolved: None,
        },
        children,
    )
}

/// Asynchronously loads its subtree from a remote location.
///
/// The node starts empty: the first visit kicks off the fetch and traversal
/// continues at the next sibling. Once the subgraph arrives and parses, a
/// later visit attaches it and descends as if it had been declared inline.
pub fn load(config: impl Into<Config<LoadParams>>) -> NodeDef {
    NodeDef::new(NodeKind::Load(LoadRecord::new(config.into())), Vec::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cube_is_a_closed_triangle_list() {
        let cube = GeometryParams::cube();
        assert_eq!(cube.positions.len(), 24);
        assert_eq!(cube.indices.len(), 36);
        assert_eq!(cube.normals.as_ref().unwrap().len(), 24);
        assert!(cube.indices.iter().all(|&i| (i as usize) < 24));
    }
}
