//! Model-view transform construction.
//!
//! Builds the local matrices for rotate, translate, scale, and look-at nodes
//! and validates their parameters. Composition with the ambient frame and the
//! memoization protocol live in the traversal; this backend is pure matrix
//! math over validated inputs.

use crate::dsl::{LookAtParams, RotateParams, ScaleParams, TranslateParams};
use crate::error::ConfigError;
use crate::registry::Backend;
use glam::Mat4;

const DEGENERATE_EPSILON: f32 = 1e-6;

/// Matrix construction for the model-view node kinds.
pub struct TransformBackend;

impl Backend for TransformBackend {
    const NAME: &'static str = "model-view-transform";
}

impl TransformBackend {
    /// Axis/angle rotation. The angle is in degrees; a zero-length axis is a
    /// configuration error.
    pub fn rotation_matrix(&self, params: &RotateParams) -> Result<Mat4, ConfigError> {
        let len = params.axis.length();
        if len < DEGENERATE_EPSILON {
            return Err(ConfigError::InvalidRotate);
        }
        Ok(Mat4::from_axis_angle(
            params.axis / len,
            params.angle_degrees.to_radians(),
        ))
    }

    pub fn translation_matrix(&self, params: &TranslateParams) -> Mat4 {
        Mat4::from_translation(params.offset)
    }

    pub fn scale_matrix(&self, params: &ScaleParams) -> Mat4 {
        Mat4::from_scale(params.factors)
    }

    /// Eye/look/up view matrix. Coincident eye/look points or a zero-length
    /// up vector are configuration errors.
    pub fn look_at_matrix(&self, params: &LookAtParams) -> Result<Mat4, ConfigError> {
        if (params.look - params.eye).length() < DEGENERATE_EPSILON {
            return Err(ConfigError::InvalidLookAt("eye and look points coincide"));
        }
        if params.up.length() < DEGENERATE_EPSILON {
            return Err(ConfigError::InvalidLookAt("up vector has zero length"));
        }
        Ok(Mat4::look_at_rh(params.eye, params.look, params.up))
    }
}
