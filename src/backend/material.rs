//! Material application.

use crate::context::{Material, MaterialGuard, RenderContext};
use crate::error::SceneError;
use crate::registry::Backend;

/// Applies a material for the duration of a subtree visit.
///
/// Thin by design: the save/upload/restore machinery lives on the context
/// guards; the backend exists so material handling is a named, replaceable
/// capability like every other.
pub struct MaterialBackend;

impl Backend for MaterialBackend {
    const NAME: &'static str = "material";
}

impl MaterialBackend {
    /// Makes `material` current until the returned guard drops.
    pub fn apply<'a>(
        &self,
        ctx: &'a mut RenderContext,
        material: Material,
    ) -> Result<MaterialGuard<'a>, SceneError> {
        ctx.set_material(material)
    }
}
