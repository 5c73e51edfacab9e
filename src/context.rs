//! The shared mutable state of one traversal.
//!
//! A [`RenderContext`] is the single structure every node reads and writes
//! while the tree is being visited: the active canvas and shader program, the
//! model-view and projection stacks, the light stack, the current material,
//! and the per-canvas GPU object caches. Exactly one context exists per
//! [`SceneGraph`], and it is only ever touched from inside that graph's
//! traversal call stack.
//!
//! Hierarchical state changes are expressed as scoped guards: a node asks the
//! context to push new state, receives a guard that derefs back to the
//! context, traverses its children through the guard, and the guard restores
//! the prior state on drop — on the happy path, on `?`-unwind, always. That
//! makes the strict push/pop symmetry the engine depends on impossible to
//! forget rather than merely conventional.
//!
//! [`SceneGraph`]: crate::engine::SceneGraph

use crate::error::SceneError;
use crate::graphics::{
    BufferHandle, CanvasId, GraphicsApi, ProgramHandle, UniformValue, ViewportRect,
};
use glam::{Mat3, Mat4, Vec3};
use std::collections::HashMap;
use std::ops::{Deref, DerefMut};

/// One level of a transform stack: a matrix, its upload-ready derived arrays,
/// and the fixity bit that decides whether anything computed from this frame
/// may be cached.
///
/// `fixed` is conjunctive down the tree: a frame is fixed only if the node
/// that produced it has a fixed config *and* the ambient frame it composed
/// with was fixed. A frame can only be treated as constant if every ancestor
/// contribution is constant too.
#[derive(Clone, Debug, PartialEq)]
pub struct TransformFrame {
    pub matrix: Mat4,
    /// Column-major flattening of `matrix`, ready for upload.
    pub flat: [f32; 16],
    /// Inverse-transpose of the upper 3x3 block, for transforming normals.
    pub normal: [f32; 9],
    pub fixed: bool,
}

impl TransformFrame {
    /// Builds a frame and its derived arrays.
    pub fn new(matrix: Mat4, fixed: bool) -> Self {
        let m3 = Mat3::from_mat4(matrix);
        let normal = if m3.determinant().abs() > f32::EPSILON {
            m3.inverse().transpose()
        } else {
            Mat3::IDENTITY
        };
        Self {
            matrix,
            flat: matrix.to_cols_array(),
            normal: normal.to_cols_array(),
            fixed,
        }
    }

    /// The identity frame that sits at the bottom of every stack.
    pub fn identity() -> Self {
        Self::new(Mat4::IDENTITY, true)
    }
}

/// A single light on the light stack.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Light {
    pub kind: LightKind,
    pub color: Vec3,
    /// Meaningful for directional lights.
    pub direction: Vec3,
    /// Meaningful for point lights.
    pub position: Vec3,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LightKind {
    Directional,
    Point,
}

impl Light {
    pub fn directional(direction: Vec3, color: Vec3) -> Self {
        Self {
            kind: LightKind::Directional,
            color,
            direction,
            position: Vec3::ZERO,
        }
    }

    pub fn point(position: Vec3, color: Vec3) -> Self {
        Self {
            kind: LightKind::Point,
            color,
            direction: Vec3::ZERO,
            position,
        }
    }
}

/// Surface appearance uploaded for whatever geometry draws next.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Material {
    pub base_color: [f32; 4],
    pub specular_color: [f32; 3],
    pub shininess: f32,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            base_color: [1.0, 1.0, 1.0, 1.0],
            specular_color: [0.0, 0.0, 0.0],
            shininess: 0.0,
        }
    }
}

/// The GPU buffers backing one piece of geometry on one canvas.
#[derive(Clone, Copy, Debug)]
pub struct GeometryBuffers {
    pub vertices: BufferHandle,
    pub normals: BufferHandle,
    pub indices: BufferHandle,
    pub index_count: u32,
}

/// Counters exposed for cache observability.
///
/// These exist so memoization behavior is testable: a visit that reuses a
/// cached combined frame must not bump `composes`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TraversalStats {
    /// Times a local matrix was rebuilt from node parameters.
    pub local_rebuilds: usize,
    /// Times a combined frame was composed from ambient x local.
    pub composes: usize,
    /// Programs created (cache misses), not activations.
    pub program_links: usize,
    /// Geometry buffer sets created (cache misses).
    pub buffer_creates: usize,
    /// Indexed draws issued.
    pub draws: usize,
}

/// The shared, traversal-scoped mutable state.
///
/// All stacks bottom out at well-defined defaults (identity frames, empty
/// light stack, default material) so every node always has an ambient value
/// to read.
pub struct RenderContext {
    pub gfx: Box<dyn GraphicsApi>,
    pub active_canvas: Option<ActiveCanvas>,
    pub active_program: Option<ProgramHandle>,
    /// Program cache, keyed by canvas identity and shader variant name.
    pub programs: HashMap<(CanvasId, String), ProgramHandle>,
    /// Geometry buffer cache, keyed by canvas identity and geometry type name.
    pub buffers: HashMap<(CanvasId, String), GeometryBuffers>,
    model_view: Vec<TransformFrame>,
    projection: Vec<TransformFrame>,
    viewports: Vec<ViewportRect>,
    lights: Vec<Light>,
    pub material: Material,
    /// Innermost enclosing layer name, if any.
    pub layer: Option<String>,
    pub stats: TraversalStats,
}

/// The canvas currently receiving draws.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActiveCanvas {
    pub name: String,
    pub id: CanvasId,
}

impl RenderContext {
    pub fn new(gfx: Box<dyn GraphicsApi>) -> Self {
        Self {
            gfx,
            active_canvas: None,
            active_program: None,
            programs: HashMap::new(),
            buffers: HashMap::new(),
            model_view: vec![TransformFrame::identity()],
            projection: vec![TransformFrame::identity()],
            viewports: Vec::new(),
            lights: Vec::new(),
            material: Material::default(),
            layer: None,
            stats: TraversalStats::default(),
        }
    }

    /// The ambient model-view frame at this point of the traversal.
    pub fn ambient_model_view(&self) -> &TransformFrame {
        self.model_view.last().expect("model-view stack underflow")
    }

    /// The ambient projection frame at this point of the traversal.
    pub fn ambient_projection(&self) -> &TransformFrame {
        self.projection.last().expect("projection stack underflow")
    }

    /// The lights visible at this point of the traversal, outermost first.
    pub fn lights(&self) -> &[Light] {
        &self.lights
    }

    /// The canvas draws currently target.
    pub fn require_canvas(&self, wanted_by: &str) -> Result<CanvasId, SceneError> {
        self.active_canvas
            .as_ref()
            .map(|c| c.id)
            .ok_or_else(|| SceneError::NoActiveCanvas {
                detail: format!("{wanted_by} requires an active canvas"),
            })
    }

    /// The program uniforms currently upload into.
    pub fn require_program(&self) -> Result<ProgramHandle, SceneError> {
        self.active_program.ok_or(SceneError::NoActiveShader)
    }

    /// Composes a node's local matrix under the ambient frame.
    ///
    /// This is the only place combined frames are built, so the stats counter
    /// here is an exact measure of memoization misses.
    pub fn compose(
        &mut self,
        ambient: &TransformFrame,
        local: Mat4,
        node_fixed: bool,
    ) -> TransformFrame {
        self.stats.composes += 1;
        TransformFrame::new(ambient.matrix * local, ambient.fixed && node_fixed)
    }

    /// Writes a uniform on the active program, surfacing a missing variable
    /// as [`SceneError::ShaderVariableNotFound`].
    pub fn set_uniform(&mut self, name: &str, value: UniformValue) -> Result<(), SceneError> {
        let program = self.require_program()?;
        if self.gfx.set_uniform(program, name, value) {
            Ok(())
        } else {
            Err(SceneError::ShaderVariableNotFound {
                name: name.to_string(),
            })
        }
    }

    /// Pushes a combined model-view frame and uploads it to the active
    /// program. Fails with [`SceneError::NoActiveShader`] outside a shader.
    pub fn push_model_view(
        &mut self,
        frame: TransformFrame,
    ) -> Result<ModelViewGuard<'_>, SceneError> {
        self.set_uniform("u_model_view", UniformValue::Mat4(frame.flat))?;
        self.set_uniform("u_normal_matrix", UniformValue::Mat3(frame.normal))?;
        self.model_view.push(frame);
        Ok(ModelViewGuard { ctx: self })
    }

    /// Pushes a projection frame (projection *replaces*, so the frame passed
    /// here is not composed with the ambient one) and uploads it.
    pub fn push_projection(
        &mut self,
        frame: TransformFrame,
    ) -> Result<ProjectionGuard<'_>, SceneError> {
        self.set_uniform("u_projection", UniformValue::Mat4(frame.flat))?;
        self.projection.push(frame);
        Ok(ProjectionGuard { ctx: self })
    }

    /// Sets the GPU viewport rectangle, restoring the prior rectangle when
    /// the guard drops. The outermost push restores the canvas's full
    /// rectangle, so the device never keeps an inner viewport past its
    /// subtree.
    pub fn push_viewport(&mut self, rect: ViewportRect) -> Result<ViewportGuard<'_>, SceneError> {
        let canvas = self.require_canvas("viewport")?;
        let prior = match self.viewports.last().copied() {
            Some(enclosing) => enclosing,
            None => self.gfx.canvas_rect(canvas),
        };
        self.gfx.set_viewport(canvas, rect);
        self.viewports.push(rect);
        Ok(ViewportGuard { prior, ctx: self })
    }

    /// Pushes a batch of lights and re-uploads the light uniforms.
    pub fn push_lights(&mut self, batch: &[Light]) -> Result<LightsGuard<'_>, SceneError> {
        let restore_len = self.lights.len();
        self.lights.extend_from_slice(batch);
        if let Err(e) = self.upload_lights() {
            self.lights.truncate(restore_len);
            return Err(e);
        }
        Ok(LightsGuard {
            restore_len,
            ctx: self,
        })
    }

    /// Replaces the current material and uploads it.
    pub fn set_material(&mut self, material: Material) -> Result<MaterialGuard<'_>, SceneError> {
        let previous = self.material;
        self.material = material;
        if let Err(e) = self.upload_material() {
            self.material = previous;
            return Err(e);
        }
        Ok(MaterialGuard {
            previous,
            ctx: self,
        })
    }

    /// Activates a linked program, restoring the prior one when the guard
    /// drops.
    pub fn activate_program(&mut self, program: ProgramHandle) -> ProgramGuard<'_> {
        let previous = self.active_program;
        self.gfx.use_program(Some(program));
        self.active_program = Some(program);
        ProgramGuard {
            previous,
            ctx: self,
        }
    }

    /// Activates a canvas: makes it current and clears it. The guard flushes
    /// and restores the previously active canvas on drop.
    pub fn activate_canvas(&mut self, name: &str, id: CanvasId) -> CanvasGuard<'_> {
        let previous = self.active_canvas.take();
        self.gfx.clear(id);
        self.active_canvas = Some(ActiveCanvas {
            name: name.to_string(),
            id,
        });
        CanvasGuard {
            previous,
            ctx: self,
        }
    }

    /// Sets the current layer name, restoring the prior one on drop.
    pub fn enter_layer(&mut self, name: &str) -> LayerGuard<'_> {
        let previous = self.layer.take();
        self.layer = Some(name.to_string());
        LayerGuard {
            previous,
            ctx: self,
        }
    }

    fn upload_material(&mut self) -> Result<(), SceneError> {
        let m = self.material;
        self.set_uniform("u_material_base_color", UniformValue::Vec4(m.base_color))?;
        self.set_uniform(
            "u_material_specular",
            UniformValue::Vec3(m.specular_color),
        )?;
        self.set_uniform("u_material_shininess", UniformValue::Float(m.shininess))?;
        Ok(())
    }

    fn upload_lights(&mut self) -> Result<(), SceneError> {
        let lights: Vec<Light> = self.lights.clone();
        self.set_uniform("u_light_count", UniformValue::Int(lights.len() as i32))?;
        for (i, light) in lights.iter().enumerate() {
            let mode = match light.kind {
                LightKind::Directional => 0,
                LightKind::Point => 1,
            };
            self.set_uniform(&format!("u_light{i}_mode"), UniformValue::Int(mode))?;
            self.set_uniform(
                &format!("u_light{i}_color"),
                UniformValue::Vec3(light.color.to_array()),
            )?;
            self.set_uniform(
                &format!("u_light{i}_direction"),
                UniformValue::Vec3(light.direction.to_array()),
            )?;
            self.set_uniform(
                &format!("u_light{i}_position"),
                UniformValue::Vec3(light.position.to_array()),
            )?;
        }
        Ok(())
    }

    /// A cheap structural fingerprint of the mutable state, used by tests to
    /// assert push/pop symmetry around any subtree.
    pub fn state_fingerprint(&self) -> StateFingerprint {
        StateFingerprint {
            model_view_depth: self.model_view.len(),
            projection_depth: self.projection.len(),
            viewport_depth: self.viewports.len(),
            light_count: self.lights.len(),
            material: self.material,
            active_canvas: self.active_canvas.clone(),
            active_program: self.active_program,
            top_model_view: self.ambient_model_view().matrix,
            top_projection: self.ambient_projection().matrix,
            layer: self.layer.clone(),
        }
    }
}

/// Snapshot of everything a node visit must leave untouched.
#[derive(Clone, Debug, PartialEq)]
pub struct StateFingerprint {
    pub model_view_depth: usize,
    pub projection_depth: usize,
    pub viewport_depth: usize,
    pub light_count: usize,
    pub material: Material,
    pub active_canvas: Option<ActiveCanvas>,
    pub active_program: Option<ProgramHandle>,
    pub top_model_view: Mat4,
    pub top_projection: Mat4,
    pub layer: Option<String>,
}

macro_rules! guard_deref {
    ($guard:ident) => {
        impl Deref for $guard<'_> {
            type Target = RenderContext;
            fn deref(&self) -> &RenderContext {
                self.ctx
            }
        }
        impl DerefMut for $guard<'_> {
            fn deref_mut(&mut self) -> &mut RenderContext {
                self.ctx
            }
        }
    };
}

/// Pops the model-view frame pushed by [`RenderContext::push_model_view`].
pub struct ModelViewGuard<'a> {
    ctx: &'a mut RenderContext,
}

impl Drop for ModelViewGuard<'_> {
    fn drop(&mut self) {
        self.ctx.model_view.pop();
        // Best-effort re-upload of the restored frame; if the program is gone
        // the next push will upload anyway.
        let frame = self.ctx.ambient_model_view().clone();
        let _ = self.ctx.set_uniform("u_model_view", UniformValue::Mat4(frame.flat));
        let _ = self
            .ctx
            .set_uniform("u_normal_matrix", UniformValue::Mat3(frame.normal));
    }
}
guard_deref!(ModelViewGuard);

/// Pops the projection frame pushed by [`RenderContext::push_projection`].
pub struct ProjectionGuard<'a> {
    ctx: &'a mut RenderContext,
}

impl Drop for ProjectionGuard<'_> {
    fn drop(&mut self) {
        self.ctx.projection.pop();
        let frame = self.ctx.ambient_projection().clone();
        let _ = self.ctx.set_uniform("u_projection", UniformValue::Mat4(frame.flat));
    }
}
guard_deref!(ProjectionGuard);

/// Restores the prior viewport rectangle.
pub struct ViewportGuard<'a> {
    prior: ViewportRect,
    ctx: &'a mut RenderContext,
}

impl Drop for ViewportGuard<'_> {
    fn drop(&mut self) {
        self.ctx.viewports.pop();
        if let Some(canvas) = self.ctx.active_canvas.as_ref().map(|c| c.id) {
            self.ctx.gfx.set_viewport(canvas, self.prior);
        }
    }
}
guard_deref!(ViewportGuard);

/// Truncates the light stack back to its pre-push length.
pub struct LightsGuard<'a> {
    restore_len: usize,
    ctx: &'a mut RenderContext,
}

impl Drop for LightsGuard<'_> {
    fn drop(&mut self) {
        self.ctx.lights.truncate(self.restore_len);
        let _ = self.ctx.upload_lights();
    }
}
guard_deref!(LightsGuard);

/// Restores the prior material.
pub struct MaterialGuard<'a> {
    previous: Material,
    ctx: &'a mut RenderContext,
}

impl Drop for MaterialGuard<'_> {
    fn drop(&mut self) {
        self.ctx.material = self.previous;
        let _ = self.ctx.upload_material();
    }
}
guard_deref!(MaterialGuard);

/// Restores the prior active program.
pub struct ProgramGuard<'a> {
    previous: Option<ProgramHandle>,
    ctx: &'a mut RenderContext,
}

impl Drop for ProgramGuard<'_> {
    fn drop(&mut self) {
        self.ctx.gfx.use_program(self.previous);
        self.ctx.active_program = self.previous;
    }
}
guard_deref!(ProgramGuard);

/// Flushes the canvas and restores the previously active one.
pub struct CanvasGuard<'a> {
    previous: Option<ActiveCanvas>,
    ctx: &'a mut RenderContext,
}

impl Drop for CanvasGuard<'_> {
    fn drop(&mut self) {
        if let Some(current) = &self.ctx.active_canvas {
            self.ctx.gfx.flush(current.id);
        }
        self.ctx.active_canvas = self.previous.take();
    }
}
guard_deref!(CanvasGuard);

/// Restores the prior layer name.
pub struct LayerGuard<'a> {
    previous: Option<String>,
    ctx: &'a mut RenderContext,
}

impl Drop for LayerGuard<'_> {
    fn drop(&mut self) {
        self.ctx.layer = self.previous.take();
    }
}
guard_deref!(LayerGuard);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graphics::HeadlessGraphics;

    fn context_with_program() -> RenderContext {
        let mut ctx = RenderContext::new(Box::new(HeadlessGraphics::new()));
        let canvas = ctx.gfx.acquire_canvas("main").unwrap();
        ctx.active_canvas = Some(ActiveCanvas {
            name: "main".into(),
            id: canvas,
        });
        let program = ctx
            .gfx
            .create_program(
                canvas,
                &crate::graphics::ShaderSource {
                    vertex: String::new(),
                    fragment: String::new(),
                },
            )
            .unwrap();
        ctx.gfx.use_program(Some(program));
        ctx.active_program = Some(program);
        ctx
    }

    #[test]
    fn model_view_guard_restores_the_ambient_frame() {
        let mut ctx = context_with_program();
        let before = ctx.state_fingerprint();

        let frame = TransformFrame::new(Mat4::from_translation(Vec3::X), true);
        {
            let mut inner = ctx.push_model_view(frame).unwrap();
            assert_eq!(
                inner.ambient_model_view().matrix,
                Mat4::from_translation(Vec3::X)
            );
            // Nested push through the guard.
            let nested = TransformFrame::new(Mat4::from_scale(Vec3::splat(2.0)), false);
            let inner2 = inner.push_model_view(nested).unwrap();
            assert_eq!(inner2.ambient_model_view().fixed, false);
        }

        assert_eq!(ctx.state_fingerprint(), before);
    }

    #[test]
    fn push_without_program_is_an_error() {
        let mut ctx = RenderContext::new(Box::new(HeadlessGraphics::new()));
        let frame = TransformFrame::identity();
        assert!(matches!(
            ctx.push_model_view(frame),
            Err(SceneError::NoActiveShader)
        ));
    }

    #[test]
    fn outermost_viewport_pop_restores_the_canvas_rect() {
        let gfx = HeadlessGraphics::new();
        let trace = gfx.trace();
        let mut ctx = RenderContext::new(Box::new(gfx));
        let canvas = ctx.gfx.acquire_canvas("main").unwrap();
        ctx.active_canvas = Some(ActiveCanvas {
            name: "main".into(),
            id: canvas,
        });

        {
            let mut outer = ctx.push_viewport((10, 10, 100, 100)).unwrap();
            let _inner = outer.push_viewport((20, 20, 50, 50)).unwrap();
        }

        // Push, push, pop back to the outer rect, pop back to the full canvas.
        assert_eq!(
            trace.borrow().viewports,
            vec![
                (10, 10, 100, 100),
                (20, 20, 50, 50),
                (10, 10, 100, 100),
                (0, 0, 800, 600),
            ]
        );
    }

    #[test]
    fn lights_guard_truncates_exactly() {
        let mut ctx = context_with_program();
        let batch = [
            Light::directional(Vec3::NEG_Y, Vec3::ONE),
            Light::point(Vec3::new(0.0, 4.0, 0.0), Vec3::ONE),
        ];
        {
            let guard = ctx.push_lights(&batch).unwrap();
            assert_eq!(guard.lights().len(), 2);
        }
        assert!(ctx.lights().is_empty());
    }

    #[test]
    fn material_guard_restores_previous_material() {
        let mut ctx = context_with_program();
        let red = Material {
            base_color: [1.0, 0.0, 0.0, 1.0],
            ..Material::default()
        };
        {
            let guard = ctx.set_material(red).unwrap();
            assert_eq!(guard.material.base_color, [1.0, 0.0, 0.0, 1.0]);
        }
        assert_eq!(ctx.material, Material::default());
    }

    #[test]
    fn compose_bumps_the_counter() {
        let mut ctx = context_with_program();
        let ambient = ctx.ambient_model_view().clone();
        let composed = ctx.compose(&ambient, Mat4::from_translation(Vec3::Z), true);
        assert_eq!(ctx.stats.composes, 1);
        assert!(composed.fixed);

        let poisoned = ctx.compose(&ambient, Mat4::IDENTITY, false);
        assert!(!poisoned.fixed);
    }

    #[test]
    fn missing_uniform_surfaces_variable_not_found() {
        let mut gfx = HeadlessGraphics::new().without_variable("u_model_view");
        let canvas = gfx.acquire_canvas("main").unwrap();
        let program = gfx
            .create_program(
                canvas,
                &crate::graphics::ShaderSource {
                    vertex: String::new(),
                    fragment: String::new(),
                },
            )
            .unwrap();
        let mut ctx = RenderContext::new(Box::new(gfx));
        ctx.active_program = Some(program);

        let err = ctx
            .push_model_view(TransformFrame::identity())
            .err()
            .unwrap();
        assert!(matches!(
            err,
            SceneError::ShaderVariableNotFound { ref name } if name == "u_model_view"
        ));
    }
}
