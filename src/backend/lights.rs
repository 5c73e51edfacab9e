//! Light stack application.

use crate::context::{Light, LightsGuard, RenderContext};
use crate::error::SceneError;
use crate::registry::Backend;

/// Pushes a batch of lights for the duration of a subtree visit.
pub struct LightsBackend;

impl Backend for LightsBackend {
    const NAME: &'static str = "lights";
}

impl LightsBackend {
    /// Pushes `batch` onto the light stack until the returned guard drops.
    pub fn push<'a>(
        &self,
        ctx: &'a mut RenderContext,
        batch: &[Light],
    ) -> Result<LightsGuard<'a>, SceneError> {
        ctx.push_lights(batch)
    }
}
