//! Projection matrix construction.
//!
//! Projection is not hierarchical in this engine: a perspective, ortho, or
//! frustum node *replaces* the ambient projection outright rather than
//! composing with it. The traversal still pushes the frame so the previous
//! projection is restored when the node's visit unwinds.

use crate::dsl::{FrustumParams, OrthoParams, PerspectiveParams};
use crate::registry::Backend;
use glam::Mat4;

/// Matrix construction for the projection node kinds.
pub struct ProjectionBackend;

impl Backend for ProjectionBackend {
    const NAME: &'static str = "projection-transform";
}

impl ProjectionBackend {
    /// Symmetric perspective projection; `fovy_degrees` is the vertical field
    /// of view. Uses the GL clip-space convention (z in [-1, 1]).
    pub fn perspective_matrix(&self, params: &PerspectiveParams) -> Mat4 {
        Mat4::perspective_rh_gl(
            params.fovy_degrees.to_radians(),
            params.aspect,
            params.near,
            params.far,
        )
    }

    pub fn ortho_matrix(&self, params: &OrthoParams) -> Mat4 {
        Mat4::orthographic_rh_gl(
            params.left,
            params.right,
            params.bottom,
            params.top,
            params.near,
            params.far,
        )
    }

    /// General (possibly asymmetric) frustum projection.
    pub fn frustum_matrix(&self, params: &FrustumParams) -> Mat4 {
        // glam has no frustum constructor; build the GL-convention matrix
        // column by column.
        let rl = params.right - params.left;
        let tb = params.top - params.bottom;
        let fnear = params.far - params.near;
        Mat4::from_cols_array(&[
            2.0 * params.near / rl,
            0.0,
            0.0,
            0.0,
            //
            0.0,
            2.0 * params.near / tb,
            0.0,
            0.0,
            //
            (params.right + params.left) / rl,
            (params.top + params.bottom) / tb,
            -(params.far + params.near) / fnear,
            -1.0,
            //
            0.0,
            0.0,
            -2.0 * params.far * params.near / fnear,
            0.0,
        ])
    }
}
