//! Geometry buffer creation, normal synthesis, and draw submission.
//!
//! Buffers are created once per canvas and geometry type and never
//! re-derived: geometry with a dynamic config is rejected outright rather
//! than silently re-uploading every frame. Nodes that declare a reusable
//! `type_name` share buffers through the canvas-scoped cache in the
//! [`RenderContext`]; anonymous geometry gets its own unshared set.

use crate::context::{GeometryBuffers, RenderContext};
use crate::dsl::GeometryParams;
use crate::error::{ConfigError, SceneError};
use crate::graphics::BufferKind;
use crate::registry::Backend;
use glam::Vec3;
use log::debug;

/// Buffer lifecycle and drawing for geometry nodes.
pub struct GeometryBackend;

impl Backend for GeometryBackend {
    const NAME: &'static str = "geometry";

    fn install(&self, ctx: &mut RenderContext) {
        ctx.buffers.clear();
        debug!("[geometry] backend installed");
    }
}

impl GeometryBackend {
    /// Validates positions and indices before any GPU work happens.
    pub fn validate(&self, params: &GeometryParams) -> Result<(), ConfigError> {
        if params.positions.is_empty() {
            return Err(ConfigError::EmptyGeometry("no vertex positions"));
        }
        if params.indices.is_empty() || params.indices.len() % 3 != 0 {
            return Err(ConfigError::EmptyGeometry(
                "indices must form a non-empty triangle list",
            ));
        }
        for &index in &params.indices {
            if index as usize >= params.positions.len() {
                return Err(ConfigError::BadIndex {
                    index,
                    vertex_count: params.positions.len(),
                });
            }
        }
        Ok(())
    }

    /// Returns the buffers for this geometry on the active canvas.
    ///
    /// Named geometry is looked up in the canvas-scoped cache and created on
    /// the first miss; anonymous geometry is created unconditionally and the
    /// caller keeps the handle on the node.
    pub fn resolve_buffers(
        &self,
        ctx: &mut RenderContext,
        params: &GeometryParams,
    ) -> Result<GeometryBuffers, SceneError> {
        let canvas = ctx.require_canvas("geometry")?;
        match &params.type_name {
            Some(type_name) => {
                let key = (canvas, type_name.clone());
                if let Some(buffers) = ctx.buffers.get(&key) {
                    return Ok(*buffers);
                }
                let buffers = self.create_buffers(ctx, params)?;
                debug!("[geometry] cached buffers for type '{type_name}'");
                ctx.buffers.insert(key, buffers);
                Ok(buffers)
            }
            None => self.create_buffers(ctx, params),
        }
    }

    /// Binds the buffer set to the active program and issues one indexed
    /// triangle-list draw.
    pub fn draw(
        &self,
        ctx: &mut RenderContext,
        buffers: &GeometryBuffers,
    ) -> Result<(), SceneError> {
        let program = ctx.require_program()?;

        let position_loc = ctx
            .gfx
            .attribute_location(program, "a_position")
            .ok_or_else(|| SceneError::ShaderVariableNotFound {
                name: "a_position".to_string(),
            })?;
        let normal_loc = ctx
            .gfx
            .attribute_location(program, "a_normal")
            .ok_or_else(|| SceneError::ShaderVariableNotFound {
                name: "a_normal".to_string(),
            })?;

        ctx.gfx.bind_attribute(position_loc, buffers.vertices);
        ctx.gfx.bind_attribute(normal_loc, buffers.normals);
        ctx.gfx.draw_indexed(buffers.indices, buffers.index_count);
        ctx.stats.draws += 1;
        Ok(())
    }

    fn create_buffers(
        &self,
        ctx: &mut RenderContext,
        params: &GeometryParams,
    ) -> Result<GeometryBuffers, SceneError> {
        self.validate(params)?;
        let canvas = ctx.require_canvas("geometry")?;

        let normals = match &params.normals {
            Some(supplied) => supplied.clone(),
            None => synthesize_normals(&params.positions, &params.indices),
        };

        let vertices = ctx.gfx.create_buffer(
            canvas,
            BufferKind::Vertex,
            bytemuck::cast_slice(&params.positions),
        );
        let normal_buffer =
            ctx.gfx
                .create_buffer(canvas, BufferKind::Normal, bytemuck::cast_slice(&normals));
        let indices = ctx.gfx.create_buffer(
            canvas,
            BufferKind::Index,
            bytemuck::cast_slice(&params.indices),
        );
        ctx.stats.buffer_creates += 1;

        Ok(GeometryBuffers {
            vertices,
            normals: normal_buffer,
            indices,
            index_count: params.indices.len() as u32,
        })
    }
}

/// Synthesizes smooth per-vertex normals.
///
/// Accumulates each triangle's face normal onto its three vertices, then
/// normalizes the per-vertex sum — i.e. averages the face normals over every
/// face sharing the vertex. Supplied normals never pass through here.
pub fn synthesize_normals(positions: &[[f32; 3]], indices: &[u32]) -> Vec<[f32; 3]> {
    let mut accumulated = vec![Vec3::ZERO; positions.len()];

    for triangle in indices.chunks_exact(3) {
        let a = Vec3::from(positions[triangle[0] as usize]);
        let b = Vec3::from(positions[triangle[1] as usize]);
        let c = Vec3::from(positions[triangle[2] as usize]);
        let face = (b - a).cross(c - a);
        for &i in triangle {
            accumulated[i as usize] += face;
        }
    }

    accumulated
        .into_iter()
        .map(|n| {
            if n.length() > f32::EPSILON {
                n.normalize().to_array()
            } else {
                [0.0, 0.0, 0.0]
            }
        })
        .collect()
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

    fn quad() -> GeometryParams {
        GeometryParams {
            type_name: Some("quad".into()),
            positions: vec![
                [0.0, 0.0, 0.0],
                [1.0, 0.0, 0.0],
                [1.0, 1.0, 0.0],
                [0.0, 1.0, 0.0],
            ],
            normals: None,
            indices: vec![0, 1, 2, 0, 2, 3],
        }
    }

    #[test]
    fn named_geometry_shares_buffers_per_canvas() {
        let mut ctx = context_on_canvas();
        let backend = GeometryBackend;
        let params = quad();

        let a = backend.resolve_buffers(&mut ctx, &params).unwrap();
        let b = backend.resolve_buffers(&mut ctx, &params).unwrap();
        assert_eq!(a.vertices, b.vertices);
        assert_eq!(ctx.stats.buffer_creates, 1);
    }

    #[test]
    fn anonymous_geometry_creates_fresh_buffers() {
        let mut ctx = context_on_canvas();
        let backend = GeometryBackend;
        let params = GeometryParams {
            type_name: None,
            ..quad()
        };

        let a = backend.resolve_buffers(&mut ctx, &params).unwrap();
        let b = backend.resolve_buffers(&mut ctx, &params).unwrap();
        assert_ne!(a.vertices, b.vertices);
        assert_eq!(ctx.stats.buffer_creates, 2);
    }

    #[test]
    fn out_of_range_index_is_rejected() {
        let backend = GeometryBackend;
        let mut params = quad();
        params.indices[4] = 9;
        assert!(matches!(
            backend.validate(&params),
            Err(ConfigError::BadIndex {
                index: 9,
                vertex_count: 4
            })
        ));
    }

    #[test]
    fn synthesized_normals_average_shared_faces() {
        // Single upward-facing triangle: every vertex normal is +Y.
        let positions = vec![[0.0, 0.0, 0.0], [0.0, 0.0, -1.0], [1.0, 0.0, -1.0]];
        let normals = synthesize_normals(&positions, &[0, 2, 1]);
        for n in &normals {
            assert!((Vec3::from(*n) - Vec3::Y).length() < 1e-6);
        }
    }

    #[test]
    fn unreferenced_vertices_get_zero_normals() {
        let positions = vec![[0.0, 0.0, 0.0], [0.0, 0.0, -1.0], [1.0, 0.0, -1.0], [5.0, 5.0, 5.0]];
        let normals = synthesize_normals(&positions, &[0, 1, 2]);
        assert_eq!(normals[3], [0.0, 0.0, 0.0]);
    }
}
