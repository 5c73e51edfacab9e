//! Shader program management and the per-canvas program cache.
//!
//! Programs are created once per `(canvas, variant)` pair and reused for the
//! life of the engine. A variant is either one of the builtin source pairs
//! (`"flat"`, `"phong"`) or a custom [`ShaderSource`] supplied on the node.

use crate::context::RenderContext;
use crate::dsl::ShaderParams;
use crate::error::SceneError;
use crate::graphics::{ProgramHandle, ShaderSource};
use crate::registry::Backend;
use log::debug;

/// Flat-shaded variant: model-view-projection transform, solid base color.
const FLAT_VERTEX: &str = r#"
attribute vec3 a_position;
attribute vec3 a_normal;
uniform mat4 u_model_view;
uniform mat4 u_projection;
uniform mat3 u_normal_matrix;
void main() {
    gl_Position = u_projection * u_model_view * vec4(a_position, 1.0);
}
"#;

const FLAT_FRAGMENT: &str = r#"
precision mediump float;
uniform vec4 u_material_base_color;
void main() {
    gl_FragColor = u_material_base_color;
}
"#;

/// Per-fragment lighting against the light stack uniforms.
const PHONG_VERTEX: &str = r#"
attribute vec3 a_position;
attribute vec3 a_normal;
uniform mat4 u_model_view;
uniform mat4 u_projection;
uniform mat3 u_normal_matrix;
varying vec3 v_normal;
varying vec3 v_eye_pos;
void main() {
    vec4 eye_pos = u_model_view * vec4(a_position, 1.0);
    v_eye_pos = eye_pos.xyz;
    v_normal = normalize(u_normal_matrix * a_normal);
    gl_Position = u_projection * eye_pos;
}
"#;

const PHONG_FRAGMENT: &str = r#"
precision mediump float;
uniform vec4 u_material_base_color;
uniform vec3 u_material_specular;
uniform float u_material_shininess;
uniform int u_light_count;
uniform int u_light0_mode;
uniform vec3 u_light0_color;
uniform vec3 u_light0_direction;
uniform vec3 u_light0_position;
varying vec3 v_normal;
varying vec3 v_eye_pos;
void main() {
    vec3 n = normalize(v_normal);
    vec3 lit = vec3(0.0);
    if (u_light_count > 0) {
        vec3 l = u_light0_mode == 0
            ? normalize(-u_light0_direction)
            : normalize(u_light0_position - v_eye_pos);
        lit += u_light0_color * max(dot(n, l), 0.0);
    }
    gl_FragColor = vec4(u_material_base_color.rgb * lit, u_material_base_color.a);
}
"#;

/// Program creation, caching, and variant lookup.
pub struct ShaderBackend;

impl Backend for ShaderBackend {
    const NAME: &'static str = "shader";

    fn install(&self, ctx: &mut RenderContext) {
        // The program cache is context sub-state; make sure installation
        // starts from a clean table even if a context is reused.
        ctx.programs.clear();
        debug!("[shader] backend installed");
    }
}

impl ShaderBackend {
    /// The builtin source pair for `variant`, if there is one.
    pub fn builtin_source(&self, variant: &str) -> Option<ShaderSource> {
        match variant {
            "flat" => Some(ShaderSource {
                vertex: FLAT_VERTEX.to_string(),
                fragment: FLAT_FRAGMENT.to_string(),
            }),
            "phong" => Some(ShaderSource {
                vertex: PHONG_VERTEX.to_string(),
                fragment: PHONG_FRAGMENT.to_string(),
            }),
            _ => None,
        }
    }

    /// Returns the cached program for the active canvas and `params.variant`,
    /// creating and linking it on first use.
    pub fn ensure_program(
        &self,
        ctx: &mut RenderContext,
        params: &ShaderParams,
    ) -> Result<ProgramHandle, SceneError> {
        let canvas = ctx.require_canvas("shader")?;
        let key = (canvas, params.variant.clone());
        if let Some(handle) = ctx.programs.get(&key) {
            return Ok(*handle);
        }

        let source = match &params.source {
            Some(custom) => custom.clone(),
            None => self
                .builtin_source(&params.variant)
                .ok_or_else(|| SceneError::ShaderLinkFailure {
                    log: format!("unknown shader variant '{}'", params.variant),
                })?,
        };

        let handle = ctx
            .gfx
            .create_program(canvas, &source)
            .map_err(|log| SceneError::ShaderLinkFailure { log })?;
        ctx.stats.program_links += 1;
        debug!(
            "[shader] linked variant '{}' for canvas {:?}",
            params.variant, canvas
        );
        ctx.programs.insert(key, handle);
        Ok(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ActiveCanvas;
    use crate::graphics::HeadlessGraphics;

    fn context_on_canvas() -> RenderContext {
        let mut ctx = RenderContext::new(Box::new(HeadlessGraphics::new()));
        let id = ctx.gfx.acquire_canvas("main").unwrap();
        ctx.active_canvas = Some(ActiveCanvas {
            name: "main".into(),
            id,
        });
        ctx
    }

    #[test]
    fn programs_are_created_once_per_canvas_and_variant() {
        let mut ctx = context_on_canvas();
        let backend = ShaderBackend;
        let params = ShaderParams::named("flat");

        let a = backend.ensure_program(&mut ctx, &params).unwrap();
        let b = backend.ensure_program(&mut ctx, &params).unwrap();
        assert_eq!(a, b);
        assert_eq!(ctx.stats.program_links, 1);

        let c = backend
            .ensure_program(&mut ctx, &ShaderParams::named("phong"))
            .unwrap();
        assert_ne!(a, c);
        assert_eq!(ctx.stats.program_links, 2);
    }

    #[test]
    fn link_failure_carries_the_log() {
        let mut ctx = RenderContext::new(Box::new(HeadlessGraphics::new().failing_links()));
        let id = ctx.gfx.acquire_canvas("main").unwrap();
        ctx.active_canvas = Some(ActiveCanvas {
            name: "main".into(),
            id,
        });
        let err = ShaderBackend
            .ensure_program(&mut ctx, &ShaderParams::named("flat"))
            .err()
            .unwrap();
        assert!(matches!(err, SceneError::ShaderLinkFailure { .. }));
    }

    #[test]
    fn unknown_variant_without_source_fails() {
        let mut ctx = context_on_canvas();
        let err = ShaderBackend
            .ensure_program(&mut ctx, &ShaderParams::named("chrome"))
            .err()
            .unwrap();
        assert!(matches!(
            err,
            SceneError::ShaderLinkFailure { ref log } if log.contains("chrome")
        ));
    }

    #[test]
    fn shader_outside_canvas_is_an_error() {
        let mut ctx = RenderContext::new(Box::new(HeadlessGraphics::new()));
        let err = ShaderBackend
            .ensure_program(&mut ctx, &ShaderParams::named("flat"))
            .err()
            .unwrap();
        assert!(matches!(err, SceneError::NoActiveCanvas { .. }));
    }
}
