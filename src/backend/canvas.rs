//! Named drawable surface resolution.

use crate::context::RenderContext;
use crate::error::SceneError;
use crate::graphics::CanvasId;
use crate::registry::Backend;
use log::debug;

/// Resolves canvas names to graphics-layer contexts.
///
/// Resolution goes through [`GraphicsApi::acquire_canvas`]; the id for a
/// fixed-config canvas node is memoized on the node, so a given surface is
/// looked up once per node instance.
///
/// [`GraphicsApi::acquire_canvas`]: crate::graphics::GraphicsApi::acquire_canvas
pub struct CanvasBackend;

impl Backend for CanvasBackend {
    const NAME: &'static str = "canvas";

    fn install(&self, _ctx: &mut RenderContext) {
        debug!("[canvas] backend installed");
    }
}

impl CanvasBackend {
    /// Resolves `name`, failing if the graphics layer knows no such surface.
    pub fn resolve(&self, ctx: &mut RenderContext, name: &str) -> Result<CanvasId, SceneError> {
        ctx.gfx
            .acquire_canvas(name)
            .ok_or_else(|| SceneError::NoActiveCanvas {
                detail: format!("canvas '{name}' could not be resolved"),
            })
    }
}
