//! The scene graph root, the renderer, and the traversal.
//!
//! A [`SceneGraph`] owns everything one scene needs: the node arena, the
//! [`RenderContext`], the backend registry, the subgraph transport and cache,
//! and the reply channel asynchronous loads complete through. Rendering is a
//! single depth-first, left-to-right pass over the tree: each node reads the
//! ambient context state, derives its own contribution (memoized when its
//! config and everything above it are fixed), pushes it through a scoped
//! guard, visits its children, and the guard restores the prior state as the
//! visit unwinds — on success and on error alike.
//!
//! Traversal is strictly single-threaded. The only concurrency in the engine
//! is between traversal and transport completions, which arrive on a channel
//! and are applied at the start of each [`SceneGraph::render`] call (or
//! explicitly via [`SceneGraph::pump_loads`]).

use crate::backend::{
    CanvasBackend, GeometryBackend, LightsBackend, MaterialBackend, ProjectionBackend,
    ShaderBackend, TransformBackend,
};
use crate::context::{RenderContext, TransformFrame, TraversalStats};
use crate::error::{ConfigError, LoadError, SceneError};
use crate::graphics::GraphicsApi;
use crate::load::{
    LoadOutcome, LoadRecord, LoadReply, LoadState, SubgraphCache, SubgraphTransport, make_request,
};
use crate::node::{NodeArena, NodeDef, NodeId, NodeKind};
use crate::registry::BackendRegistry;
use crate::scope::{Scope, Value};
use log::{debug, error, warn};
use std::sync::mpsc::{self, Receiver, Sender};

/// A retained scene: node tree, shared render state, and loader plumbing.
///
/// ```no_run
/// use phalanx::dsl::*;
/// use phalanx::context::Material;
/// use phalanx::engine::SceneGraph;
/// use phalanx::graphics::HeadlessGraphics;
/// use phalanx::load::ManualTransport;
/// use phalanx::Vec3;
///
/// let tree = canvas(CanvasParams::named("main"), vec![
///     shader(ShaderParams::named("flat"), vec![
///         look_at(LookAtParams::from_eye(Vec3::new(0.0, 2.0, 8.0)), vec![
///             material(Material::default(), vec![
///                 geometry(GeometryParams::cube(), vec![]),
///             ]),
///         ]),
///     ]),
/// ]);
///
/// let mut scene = SceneGraph::new(HeadlessGraphics::new(), ManualTransport::new(), tree);
/// scene.render().unwrap();
/// ```
pub struct SceneGraph {
    arena: NodeArena,
    root: NodeId,
    ctx: RenderContext,
    registry: BackendRegistry,
    transport: Box<dyn SubgraphTransport>,
    cache: SubgraphCache,
    reply_tx: Sender<LoadReply>,
    reply_rx: Receiver<LoadReply>,
    /// Engine-wide request serial source; arena slots are reused, so per-node
    /// counters could not tell a node's requests from a dead predecessor's.
    next_serial: u64,
    root_params: Vec<(String, Value)>,
    load_errors: Vec<LoadError>,
}

impl SceneGraph {
    /// Builds a scene over a graphics layer and a subgraph transport,
    /// instantiating `root` into the arena and installing the standard
    /// backends.
    pub fn new(
        graphics: impl GraphicsApi + 'static,
        transport: impl SubgraphTransport + 'static,
        root: NodeDef,
    ) -> Self {
        let mut ctx = RenderContext::new(Box::new(graphics));
        let mut registry = BackendRegistry::new();
        registry.install(CanvasBackend, &mut ctx);
        registry.install(ShaderBackend, &mut ctx);
        registry.install(TransformBackend, &mut ctx);
        registry.install(ProjectionBackend, &mut ctx);
        registry.install(LightsBackend, &mut ctx);
        registry.install(MaterialBackend, &mut ctx);
        registry.install(GeometryBackend, &mut ctx);

        let mut arena = NodeArena::new();
        let root = arena.instantiate(root);
        let (reply_tx, reply_rx) = mpsc::channel();

        Self {
            arena,
            root,
            ctx,
            registry,
            transport: Box::new(transport),
            cache: SubgraphCache::new(),
            reply_tx,
            reply_rx,
            next_serial: 0,
            root_params: Vec::new(),
            load_errors: Vec::new(),
        }
    }

    /// Binds a root-scope parameter visible to every dynamic provider.
    pub fn set_root_param(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.root_params.push((key.into(), value.into()));
    }

    /// Renders one pass with no parameter overrides.
    pub fn render(&mut self) -> Result<(), SceneError> {
        self.render_with(&[])
    }

    /// Renders one pass, overriding root parameters for this pass only.
    ///
    /// Overrides make the root scope non-fixed: every memoized value that
    /// could observe them is conservatively recomputed.
    pub fn render_with(&mut self, overrides: &[(&str, Value)]) -> Result<(), SceneError> {
        self.pump_loads();

        let mut scope = Scope::root(overrides.is_empty());
        for (key, value) in &self.root_params {
            scope.put(key.clone(), value.clone());
        }
        for (key, value) in overrides {
            scope.put(*key, value.clone());
        }

        let mut traversal = Traversal {
            arena: &mut self.arena,
            registry: &self.registry,
            cache: &mut self.cache,
            transport: self.transport.as_mut(),
            reply_tx: &self.reply_tx,
            next_serial: &mut self.next_serial,
        };
        traversal.visit(&mut self.ctx, self.root, &scope)
    }

    /// Applies any queued load completions without rendering.
    ///
    /// [`SceneGraph::render`] calls this first, so explicit pumping is only
    /// needed when the host wants load state to advance between frames.
    pub fn pump_loads(&mut self) {
        while let Ok(reply) = self.reply_rx.try_recv() {
            self.apply_reply(reply);
        }
    }

    /// Asynchronous load failures accumulated since the last call.
    pub fn take_load_errors(&mut self) -> Vec<LoadError> {
        std::mem::take(&mut self.load_errors)
    }

    /// Traversal cache counters.
    pub fn stats(&self) -> &TraversalStats {
        &self.ctx.stats
    }

    /// The cache backing attached subgraphs, for host-driven eviction.
    pub fn subgraph_cache_mut(&mut self) -> &mut SubgraphCache {
        &mut self.cache
    }

    fn apply_reply(&mut self, reply: LoadReply) {
        if !self.arena.contains(reply.node) {
            debug!("[load] dropping reply for removed node {:?}", reply.node);
            return;
        }
        let NodeKind::Load(record) = &mut self.arena.get_mut(reply.node).kind else {
            debug!("[load] dropping reply for non-load node {:?}", reply.node);
            return;
        };
        if reply.serial != record.serial || record.state != LoadState::Loading {
            debug!(
                "[load] dropping stale reply (serial {} vs {})",
                reply.serial, record.serial
            );
            return;
        }

        let uri = record
            .params
            .as_ref()
            .map(|p| p.uri.clone())
            .unwrap_or_default();

        match reply.outcome {
            LoadOutcome::Success(payload) => {
                let parser = record
                    .params
                    .as_ref()
                    .and_then(|p| p.parser.clone())
                    .expect("parser checked at load kickoff");
                match parser(&payload) {
                    Ok(def) => {
                        record.pending = Some(Box::new(def));
                        record.state = LoadState::Loaded;
                        record.handle = Some(self.cache.insert(&uri));
                        debug!("[load] subgraph ready for '{uri}'");
                    }
                    Err(message) => {
                        record.state = LoadState::Error;
                        let err = LoadError::Parse { uri, message };
                        error!("[load] {err}");
                        self.load_errors.push(err);
                    }
                }
            }
            LoadOutcome::Timeout => {
                record.state = LoadState::Error;
                let err = LoadError::Timeout { uri };
                error!("[load] {err}");
                self.load_errors.push(err);
            }
            LoadOutcome::Error(message) => {
                record.state = LoadState::Error;
                let err = LoadError::Transport { uri, message };
                error!("[load] {err}");
                self.load_errors.push(err);
            }
        }
    }
}

/// Internal kind tag so dispatch does not hold an arena borrow.
#[derive(Clone, Copy)]
enum Tag {
    Group,
    Bindings,
    ModelView,
    Projection,
    Viewport,
    Canvas,
    Layer,
    Material,
    Lights,
    Shader,
    Geometry,
    Load,
}

/// One traversal pass's view of the engine.
struct Traversal<'a> {
    arena: &'a mut NodeArena,
    registry: &'a BackendRegistry,
    cache: &'a mut SubgraphCache,
    transport: &'a mut dyn SubgraphTransport,
    reply_tx: &'a Sender<LoadReply>,
    next_serial: &'a mut u64,
}

impl Traversal<'_> {
    fn visit(
        &mut self,
        ctx: &mut RenderContext,
        id: NodeId,
        scope: &Scope,
    ) -> Result<(), SceneError> {
        let tag = match &self.arena.get(id).kind {
            NodeKind::Group => Tag::Group,
            NodeKind::Bindings { .. } => Tag::Bindings,
            NodeKind::Rotate { .. }
            | NodeKind::Translate { .. }
            | NodeKind::Scale { .. }
            | NodeKind::LookAt { .. } => Tag::ModelView,
            NodeKind::Perspective { .. } | NodeKind::Ortho { .. } | NodeKind::Frustum { .. } => {
                Tag::Projection
            }
            NodeKind::Viewport { .. } => Tag::Viewport,
            NodeKind::Canvas { .. } => Tag::Canvas,
            NodeKind::Layer { .. } => Tag::Layer,
            NodeKind::Material { .. } => Tag::Material,
            NodeKind::Lights { .. } => Tag::Lights,
            NodeKind::Shader { .. } => Tag::Shader,
            NodeKind::Geometry { .. } => Tag::Geometry,
            NodeKind::Load(_) => Tag::Load,
        };

        match tag {
            Tag::Group => {
                let children = self.arena.children(id);
                self.visit_children(ctx, &children, scope)
            }
            Tag::Bindings => self.visit_bindings(ctx, id, scope),
            Tag::ModelView => self.visit_model_view(ctx, id, scope),
            Tag::Projection => self.visit_projection(ctx, id, scope),
            Tag::Viewport => self.visit_viewport(ctx, id, scope),
            Tag::Canvas => self.visit_canvas(ctx, id, scope),
            Tag::Layer => self.visit_layer(ctx, id, scope),
            Tag::Material => self.visit_material(ctx, id, scope),
            Tag::Lights => self.visit_lights(ctx, id, scope),
            Tag::Shader => self.visit_shader(ctx, id, scope),
            Tag::Geometry => self.visit_geometry(ctx, id, scope),
            Tag::Load => self.visit_load(ctx, id, scope),
        }
    }

    fn visit_children(
        &mut self,
        ctx: &mut RenderContext,
        children: &[NodeId],
        scope: &Scope,
    ) -> Result<(), SceneError> {
        for &child in children {
            self.visit(ctx, child, scope)?;
        }
        Ok(())
    }

    fn visit_bindings(
        &mut self,
        ctx: &mut RenderContext,
        id: NodeId,
        scope: &Scope,
    ) -> Result<(), SceneError> {
        let (fixed, entries) = {
            let NodeKind::Bindings { config } = &self.arena.get(id).kind else {
                unreachable!()
            };
            (config.is_fixed(), config.resolve(scope))
        };
        let mut child_scope = Scope::child(scope, fixed);
        for (key, value) in entries {
            child_scope.put(key, value);
        }
        let children = self.arena.children(id);
        self.visit_children(ctx, &children, &child_scope)
    }

    /// The memoization protocol shared by rotate/translate/scale/look-at.
    ///
    /// 1. Rebuild the local matrix if unset or the config is dynamic.
    /// 2. Reuse the combined frame only if it exists, the node is fixed, and
    ///    the ambient frame is fixed; otherwise compose afresh.
    /// 3. Push (which uploads), visit children, pop via the guard.
    fn visit_model_view(
        &mut self,
        ctx: &mut RenderContext,
        id: NodeId,
        scope: &Scope,
    ) -> Result<(), SceneError> {
        let backend = self.registry.get::<TransformBackend>()?;

        let (fixed, local) = {
            let node = self.arena.get_mut(id);
            match &mut node.kind {
                NodeKind::Rotate { config, memo } => {
                    let fixed = config.is_fixed();
                    if memo.local.is_none() || !fixed {
                        let params = config.resolve(scope);
                        memo.local = Some(backend.rotation_matrix(&params)?);
                        ctx.stats.local_rebuilds += 1;
                    }
                    (fixed, memo.local.unwrap())
                }
                NodeKind::Translate { config, memo } => {
                    let fixed = config.is_fixed();
                    if memo.local.is_none() || !fixed {
                        let params = config.resolve(scope);
                        memo.local = Some(backend.translation_matrix(&params));
                        ctx.stats.local_rebuilds += 1;
                    }
                    (fixed, memo.local.unwrap())
                }
                NodeKind::Scale { config, memo } => {
                    let fixed = config.is_fixed();
                    if memo.local.is_none() || !fixed {
                        let params = config.resolve(scope);
                        memo.local = Some(backend.scale_matrix(&params));
                        ctx.stats.local_rebuilds += 1;
                    }
                    (fixed, memo.local.unwrap())
                }
                NodeKind::LookAt { config, memo } => {
                    let fixed = config.is_fixed();
                    if memo.local.is_none() || !fixed {
                        let params = config.resolve(scope);
                        memo.local = Some(backend.look_at_matrix(&params)?);
                        ctx.stats.local_rebuilds += 1;
                    }
                    (fixed, memo.local.unwrap())
                }
                _ => unreachable!(),
            }
        };

        let ambient = ctx.ambient_model_view().clone();
        let cached = if fixed && ambient.fixed {
            self.transform_memo(id).combined.clone()
        } else {
            None
        };
        let combined = match cached {
            Some(frame) => frame,
            None => {
                let frame = ctx.compose(&ambient, local, fixed);
                self.transform_memo_mut(id).combined = Some(frame.clone());
                frame
            }
        };

        let children = self.arena.children(id);
        let mut guard = ctx.push_model_view(combined)?;
        self.visit_children(&mut guard, &children, scope)
    }

    fn transform_memo(&self, id: NodeId) -> &crate::node::TransformMemo {
        match &self.arena.get(id).kind {
            NodeKind::Rotate { memo, .. } => memo,
            NodeKind::Translate { memo, .. } => memo,
            NodeKind::Scale { memo, .. } => memo,
            NodeKind::LookAt { memo, .. } => memo,
            _ => unreachable!(),
        }
    }

    fn transform_memo_mut(&mut self, id: NodeId) -> &mut crate::node::TransformMemo {
        match &mut self.arena.get_mut(id).kind {
            NodeKind::Rotate { memo, .. } => memo,
            NodeKind::Translate { memo, .. } => memo,
            NodeKind::Scale { memo, .. } => memo,
            NodeKind::LookAt { memo, .. } => memo,
            _ => unreachable!(),
        }
    }

    /// Projection replaces the ambient projection rather than composing with
    /// it, so its memo depends only on the node's own fixity.
    fn visit_projection(
        &mut self,
        ctx: &mut RenderContext,
        id: NodeId,
        scope: &Scope,
    ) -> Result<(), SceneError> {
        let backend = self.registry.get::<ProjectionBackend>()?;

        let frame = {
            let node = self.arena.get_mut(id);
            match &mut node.kind {
                NodeKind::Perspective { config, memo } => {
                    let fixed = config.is_fixed();
                    if memo.frame.is_none() || !fixed {
                        let params = config.resolve(scope);
                        memo.frame = Some(TransformFrame::new(
                            backend.perspective_matrix(&params),
                            fixed,
                        ));
                        ctx.stats.local_rebuilds += 1;
                    }
                    memo.frame.clone().unwrap()
                }
                NodeKind::Ortho { config, memo } => {
                    let fixed = config.is_fixed();
                    if memo.frame.is_none() || !fixed {
                        let params = config.resolve(scope);
                        memo.frame =
                            Some(TransformFrame::new(backend.ortho_matrix(&params), fixed));
                        ctx.stats.local_rebuilds += 1;
                    }
                    memo.frame.clone().unwrap()
                }
                NodeKind::Frustum { config, memo } => {
                    let fixed = config.is_fixed();
                    if memo.frame.is_none() || !fixed {
                        let params = config.resolve(scope);
                        memo.frame =
                            Some(TransformFrame::new(backend.frustum_matrix(&params), fixed));
                        ctx.stats.local_rebuilds += 1;
                    }
                    memo.frame.clone().unwrap()
                }
                _ => unreachable!(),
            }
        };

        let children = self.arena.children(id);
        let mut guard = ctx.push_projection(frame)?;
        self.visit_children(&mut guard, &children, scope)
    }

    fn visit_viewport(
        &mut self,
        ctx: &mut RenderContext,
        id: NodeId,
        scope: &Scope,
    ) -> Result<(), SceneError> {
        let params = {
            let NodeKind::Viewport { config } = &self.arena.get(id).kind else {
                unreachable!()
            };
            config.resolve(scope)
        };
        let children = self.arena.children(id);
        let mut guard = ctx.push_viewport((params.x, params.y, params.width, params.height))?;
        self.visit_children(&mut guard, &children, scope)
    }

    fn visit_canvas(
        &mut self,
        ctx: &mut RenderContext,
        id: NodeId,
        scope: &Scope,
    ) -> Result<(), SceneError> {
        let backend = self.registry.get::<CanvasBackend>()?;

        let (fixed, memoized, params) = {
            let NodeKind::Canvas { config, resolved } = &self.arena.get(id).kind else {
                unreachable!()
            };
            (config.is_fixed(), *resolved, config.resolve(scope))
        };

        let canvas_id = match (fixed, memoized) {
            (true, Some(canvas_id)) => canvas_id,
            _ => {
                let canvas_id = backend.resolve(ctx, &params.name)?;
                if fixed {
                    let NodeKind::Canvas { resolved, .. } = &mut self.arena.get_mut(id).kind
                    else {
                        unreachable!()
                    };
                    *resolved = Some(canvas_id);
                }
                canvas_id
            }
        };

        let children = self.arena.children(id);
        let mut guard = ctx.activate_canvas(&params.name, canvas_id);
        self.visit_children(&mut guard, &children, scope)
    }

    fn visit_layer(
        &mut self,
        ctx: &mut RenderContext,
        id: NodeId,
        scope: &Scope,
    ) -> Result<(), SceneError> {
        let params = {
            let NodeKind::Layer { config } = &self.arena.get(id).kind else {
                unreachable!()
            };
            config.resolve(scope)
        };
        let children = self.arena.children(id);
        let mut guard = ctx.enter_layer(&params.name);
        self.visit_children(&mut guard, &children, scope)
    }

    fn visit_material(
        &mut self,
        ctx: &mut RenderContext,
        id: NodeId,
        scope: &Scope,
    ) -> Result<(), SceneError> {
        let backend = self.registry.get::<MaterialBackend>()?;
        let params = {
            let NodeKind::Material { config } = &self.arena.get(id).kind else {
                unreachable!()
            };
            config.resolve(scope)
        };
        let children = self.arena.children(id);
        let mut guard = backend.apply(ctx, params)?;
        self.visit_children(&mut guard, &children, scope)
    }

    fn visit_lights(
        &mut self,
        ctx: &mut RenderContext,
        id: NodeId,
        scope: &Scope,
    ) -> Result<(), SceneError> {
        let backend = self.registry.get::<LightsBackend>()?;
        let batch = {
            let NodeKind::Lights { config } = &self.arena.get(id).kind else {
                unreachable!()
            };
            config.resolve(scope)
        };
        let children = self.arena.children(id);
        let mut guard = backend.push(ctx, &batch)?;
        self.visit_children(&mut guard, &children, scope)
    }

    fn visit_shader(
        &mut self,
        ctx: &mut RenderContext,
        id: NodeId,
        scope: &Scope,
    ) -> Result<(), SceneError> {
        let backend = self.registry.get::<ShaderBackend>()?;
        let params = {
            let NodeKind::Shader { config } = &self.arena.get(id).kind else {
                unreachable!()
            };
            config.resolve(scope)
        };
        let program = backend.ensure_program(ctx, &params)?;
        let children = self.arena.children(id);
        let mut guard = ctx.activate_program(program);
        self.visit_children(&mut guard, &children, scope)
    }

    fn visit_geometry(
        &mut self,
        ctx: &mut RenderContext,
        id: NodeId,
        scope: &Scope,
    ) -> Result<(), SceneError> {
        let backend = self.registry.get::<GeometryBackend>()?;
        ctx.require_program()?;

        let resolved = {
            let NodeKind::Geometry { config, resolved } = &self.arena.get(id).kind else {
                unreachable!()
            };
            if !config.is_fixed() {
                // Re-deriving buffers per visit would re-upload every frame;
                // fail fast before anything is created.
                return Err(SceneError::UnsupportedOperation(
                    "dynamic geometry configuration",
                ));
            }
            *resolved
        };

        let buffers = match resolved {
            Some(buffers) => buffers,
            None => {
                let params = {
                    let NodeKind::Geometry { config, .. } = &self.arena.get(id).kind else {
                        unreachable!()
                    };
                    config.resolve(scope)
                };
                let buffers = backend.resolve_buffers(ctx, &params)?;
                let NodeKind::Geometry { resolved, .. } = &mut self.arena.get_mut(id).kind else {
                    unreachable!()
                };
                *resolved = Some(buffers);
                buffers
            }
        };

        backend.draw(ctx, &buffers)?;

        let children = self.arena.children(id);
        self.visit_children(ctx, &children, scope)
    }

    /// Steps the loader state machine for one visit.
    fn visit_load(
        &mut self,
        ctx: &mut RenderContext,
        id: NodeId,
        scope: &Scope,
    ) -> Result<(), SceneError> {
        // Late parameter resolution: the config may be dynamic, so params are
        // derived from the scope of the first visit.
        {
            let record = self.load_record_mut(id);
            if record.params.is_none() {
                let params = record.config.resolve(scope);
                if params.uri.is_empty() {
                    return Err(ConfigError::MissingParam("uri").into());
                }
                if params.parser.is_none() {
                    return Err(ConfigError::MissingParam("parser").into());
                }
                record.params = Some(params);
            }
        }

        // Eviction check before dispatch: an attached subgraph whose cache
        // entry is gone regresses to Initial and reloads on this same visit.
        let (state, handle) = {
            let record = self.load_record(id);
            (record.state, record.handle)
        };
        if state == LoadState::Attached {
            let resident = match handle {
                Some(h) if self.cache.contains(h) => {
                    self.cache.touch(h);
                    true
                }
                _ => false,
            };
            if !resident {
                let uri = self.load_uri(id);
                warn!("[load] subgraph for '{uri}' evicted, reloading");
                for child in self.arena.children(id) {
                    self.arena.remove_subtree(child);
                }
                self.arena.get_mut(id).children.clear();
                let record = self.load_record_mut(id);
                record.state = LoadState::Initial;
                record.handle = None;
            }
        }

        match self.load_record(id).state {
            LoadState::Attached => {
                let children = self.arena.children(id);
                self.visit_children(ctx, &children, scope)
            }
            // In flight: skip the subtree, it does not exist yet.
            LoadState::Loading => Ok(()),
            // Terminal: this subtree never renders.
            LoadState::Error => Ok(()),
            LoadState::Loaded => {
                let (handle, def) = {
                    let record = self.load_record_mut(id);
                    record.state = LoadState::Attached;
                    (
                        record.handle.expect("loaded record has a cache handle"),
                        record.pending.take().expect("loaded record has a subgraph"),
                    )
                };
                self.cache.finish_loading(handle);
                let subgraph_root = self.arena.instantiate(*def);
                self.arena.get_mut(id).children.push(subgraph_root);
                debug!("[load] attached subgraph for '{}'", self.load_uri(id));
                // Descend immediately, as if the subtree were declared inline.
                self.visit(ctx, subgraph_root, scope)
            }
            LoadState::Initial => {
                *self.next_serial += 1;
                let serial = *self.next_serial;
                let request = {
                    let record = self.load_record_mut(id);
                    record.serial = serial;
                    record.state = LoadState::Loading;
                    let params = record.params.as_ref().expect("params resolved above");
                    make_request(
                        params.uri.clone(),
                        params.request_params.clone(),
                        id,
                        serial,
                        self.reply_tx.clone(),
                    )
                };
                debug!("[load] requesting '{}'", request.uri);
                self.transport.begin(request);
                Ok(())
            }
        }
    }

    fn load_record(&self, id: NodeId) -> &LoadRecord {
        match &self.arena.get(id).kind {
            NodeKind::Load(record) => record,
            _ => unreachable!(),
        }
    }

    fn load_record_mut(&mut self, id: NodeId) -> &mut LoadRecord {
        match &mut self.arena.get_mut(id).kind {
            NodeKind::Load(record) => record,
            _ => unreachable!(),
        }
    }

    fn load_uri(&self, id: NodeId) -> String {
        self.load_record(id)
            .params
            .as_ref()
            .map(|p| p.uri.clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::context::Material;
    use crate::dsl::*;
    use crate::graphics::headless::TraceHandle;
    use crate::graphics::HeadlessGraphics;
    use crate::load::{LoadParams, LoadRequest, ManualTransport};
    use glam::{Mat4, Vec3};
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    type RequestQueue = Rc<RefCell<Vec<LoadRequest>>>;

    fn assert_mat4_eq(a: &[f32; 16], b: &Mat4, tolerance: f32) -> bool {
        a.iter()
            .zip(b.to_cols_array().iter())
            .all(|(x, y)| (x - y).abs() <= tolerance)
    }

    fn scene_with(root: NodeDef) -> (SceneGraph, TraceHandle, RequestQueue) {
        let graphics = HeadlessGraphics::new();
        let trace = graphics.trace();
        let transport = ManualTransport::new();
        let queue = transport.queue();
        (SceneGraph::new(graphics, transport, root), trace, queue)
    }

    fn standard_stack(inner: Vec<NodeDef>) -> NodeDef {
        canvas(
            CanvasParams::named("main"),
            vec![shader(ShaderParams::named("flat"), inner)],
        )
    }

    #[test]
    fn fixed_chain_composes_once_across_renders() {
        let tree = standard_stack(vec![look_at(
            LookAtParams::from_eye(Vec3::new(0.0, 0.0, 5.0)),
            vec![rotate(
                RotateParams::about(Vec3::Y, 30.0),
                vec![geometry(GeometryParams::cube(), vec![])],
            )],
        )]);
        let (mut scene, trace, _) = scene_with(tree);

        scene.render().unwrap();
        let after_first = *scene.stats();
        assert_eq!(after_first.composes, 2);
        assert_eq!(after_first.local_rebuilds, 2);

        scene.render().unwrap();
        scene.render().unwrap();
        assert_eq!(scene.stats().composes, 2);
        assert_eq!(scene.stats().local_rebuilds, 2);

        // The pushed matrices are bit-identical between passes.
        let writes = trace.borrow().mat4_writes("u_model_view");
        let per_pass = writes.len() / 3;
        assert_eq!(writes[0], writes[per_pass]);
        assert_eq!(writes[1], writes[per_pass + 1]);
    }

    #[test]
    fn dynamic_provider_changes_the_pushed_matrix() {
        let angle = Rc::new(Cell::new(0.0f32));
        let a = angle.clone();
        let tree = standard_stack(vec![rotate(
            Config::dynamic(move |_| RotateParams::about(Vec3::Y, a.get())),
            vec![geometry(GeometryParams::cube(), vec![])],
        )]);
        let (mut scene, trace, _) = scene_with(tree);

        scene.render().unwrap();
        angle.set(90.0);
        scene.render().unwrap();

        let writes = trace.borrow().mat4_writes("u_model_view");
        // First write of each pass is the rotate node's combined frame.
        let per_pass = writes.len() / 2;
        assert_ne!(writes[0], writes[per_pass]);
        assert!(assert_mat4_eq(&writes[0], &Mat4::IDENTITY, 1e-6));
        assert_eq!(scene.stats().composes, 2);
    }

    #[test]
    fn root_overrides_force_recomputation() {
        let tree = standard_stack(vec![rotate(
            Config::dynamic(|scope: &crate::scope::Scope| {
                let angle = scope.get("angle").and_then(|v| v.as_f32()).unwrap_or(0.0);
                RotateParams::about(Vec3::Y, angle)
            }),
            vec![geometry(GeometryParams::cube(), vec![])],
        )]);
        let (mut scene, trace, _) = scene_with(tree);
        scene.set_root_param("angle", 10.0f32);

        scene.render().unwrap();
        scene.render_with(&[("angle", Value::Number(65.0))]).unwrap();

        let writes = trace.borrow().mat4_writes("u_model_view");
        let per_pass = writes.len() / 2;
        assert_ne!(writes[0], writes[per_pass]);
    }

    #[test]
    fn identity_round_trip_composes_to_identity() {
        let tree = standard_stack(vec![rotate(
            RotateParams::about(Vec3::Y, 0.0),
            vec![translate(
                TranslateParams::by(Vec3::ZERO),
                vec![scale(
                    ScaleParams::uniform(1.0),
                    vec![geometry(GeometryParams::cube(), vec![])],
                )],
            )],
        )]);
        let (mut scene, trace, _) = scene_with(tree);
        scene.render().unwrap();

        let writes = trace.borrow().mat4_writes("u_model_view");
        // Third push is the innermost combined frame: rotate . translate . scale.
        assert!(assert_mat4_eq(&writes[2], &Mat4::IDENTITY, 1e-6));
    }

    #[test]
    fn look_at_uploads_the_canonical_view_matrix() {
        let tree = standard_stack(vec![look_at(
            LookAtParams::from_eye(Vec3::new(0.0, 0.0, 5.0)),
            vec![geometry(GeometryParams::cube(), vec![])],
        )]);
        let (mut scene, trace, _) = scene_with(tree);
        scene.render().unwrap();

        let writes = trace.borrow().mat4_writes("u_model_view");
        let view = Mat4::from_cols_array(&writes[0]);
        let z_row = view.row(2);
        assert!((z_row.truncate() - Vec3::Z).length() < 1e-6);
        let translation = view.col(3);
        assert!((translation.truncate() - Vec3::new(0.0, 0.0, -5.0)).length() < 1e-6);
    }

    #[test]
    fn context_state_is_restored_after_a_pass() {
        let tree = standard_stack(vec![perspective(
            PerspectiveParams::default(),
            vec![look_at(
                LookAtParams::from_eye(Vec3::new(2.0, 1.0, 8.0)),
                vec![
                    lights(
                        vec![crate::context::Light::directional(Vec3::NEG_Y, Vec3::ONE)],
                        vec![material(
                            Material::default(),
                            vec![viewport(
                                ViewportParams {
                                    x: 0,
                                    y: 0,
                                    width: 640,
                                    height: 480,
                                },
                                vec![geometry(GeometryParams::cube(), vec![])],
                            )],
                        )],
                    ),
                    layer(
                        LayerParams::named("overlay"),
                        vec![geometry(GeometryParams::plane(4.0), vec![])],
                    ),
                ],
            )],
        )]);
        let (mut scene, _, _) = scene_with(tree);

        let before = scene.ctx.state_fingerprint();
        scene.render().unwrap();
        assert_eq!(scene.ctx.state_fingerprint(), before);
    }

    #[test]
    fn context_state_is_restored_on_error_exit() {
        // Deep stack whose innermost geometry has an out-of-range index.
        let broken = GeometryParams {
            type_name: None,
            positions: vec![[0.0; 3], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
            normals: None,
            indices: vec![0, 1, 9],
        };
        let tree = standard_stack(vec![look_at(
            LookAtParams::from_eye(Vec3::new(0.0, 0.0, 5.0)),
            vec![rotate(
                RotateParams::about(Vec3::X, 12.0),
                vec![material(Material::default(), vec![geometry(broken, vec![])])],
            )],
        )]);
        let (mut scene, _, _) = scene_with(tree);

        let before = scene.ctx.state_fingerprint();
        let err = scene.render().err().unwrap();
        assert!(matches!(
            err,
            SceneError::Config(ConfigError::BadIndex { index: 9, .. })
        ));
        assert_eq!(scene.ctx.state_fingerprint(), before);
    }

    #[test]
    fn transform_outside_a_shader_fails() {
        let tree = canvas(
            CanvasParams::named("main"),
            vec![rotate(
                RotateParams::about(Vec3::Y, 10.0),
                vec![geometry(GeometryParams::cube(), vec![])],
            )],
        );
        let (mut scene, _, _) = scene_with(tree);
        assert!(matches!(scene.render(), Err(SceneError::NoActiveShader)));
    }

    #[test]
    fn dynamic_geometry_fails_before_creating_buffers() {
        let tree = standard_stack(vec![geometry(
            Config::dynamic(|_: &crate::scope::Scope| GeometryParams::cube()),
            vec![],
        )]);
        let (mut scene, trace, _) = scene_with(tree);

        let err = scene.render().err().unwrap();
        assert!(matches!(err, SceneError::UnsupportedOperation(_)));
        assert_eq!(trace.borrow().buffer_creates, 0);
    }

    #[test]
    fn programs_and_buffers_are_cached_across_passes() {
        let tree = standard_stack(vec![geometry(GeometryParams::cube(), vec![])]);
        let (mut scene, trace, _) = scene_with(tree);

        scene.render().unwrap();
        scene.render().unwrap();

        assert_eq!(trace.borrow().program_links, 1);
        // One buffer set: three buffers (vertex, normal, index), created once.
        assert_eq!(trace.borrow().buffer_creates, 3);
        assert_eq!(trace.borrow().draw_calls, 2);
        assert_eq!(scene.stats().buffer_creates, 1);
    }

    #[test]
    fn canvas_clears_on_entry_and_flushes_on_exit() {
        let tree = standard_stack(vec![geometry(GeometryParams::cube(), vec![])]);
        let (mut scene, trace, _) = scene_with(tree);
        scene.render().unwrap();
        assert_eq!(trace.borrow().clears, 1);
        assert_eq!(trace.borrow().flushes, 1);
    }

    fn load_scene() -> (SceneGraph, TraceHandle, RequestQueue) {
        let tree = standard_stack(vec![
            load(LoadParams::new("http://example.com/wing.scene", |payload| {
                // A parser that only accepts the canned payload.
                if payload == b"wing" {
                    Ok(geometry(GeometryParams::cube(), vec![]))
                } else {
                    Err("unexpected payload shape".to_string())
                }
            })),
            // Sibling after the load node keeps rendering regardless.
            geometry(GeometryParams::plane(2.0), vec![]),
        ]);
        scene_with(tree)
    }

    #[test]
    fn loader_walks_initial_loading_attached() {
        let (mut scene, trace, queue) = load_scene();

        // First pass: kick off the request, skip the subtree, draw the sibling.
        scene.render().unwrap();
        assert_eq!(queue.borrow().len(), 1);
        assert_eq!(trace.borrow().draw_calls, 1);

        // Still loading: no new request, still no subtree.
        scene.render().unwrap();
        assert_eq!(queue.borrow().len(), 1);
        assert_eq!(trace.borrow().draw_calls, 2);

        // Complete the fetch; the next pass attaches and descends once.
        queue.borrow_mut().pop().unwrap().succeed(b"wing".to_vec());
        scene.render().unwrap();
        assert_eq!(trace.borrow().draw_calls, 4);

        // Attached from here on.
        scene.render().unwrap();
        assert_eq!(trace.borrow().draw_calls, 6);
        assert!(scene.take_load_errors().is_empty());
    }

    #[test]
    fn eviction_regresses_to_initial_and_reissues_one_request() {
        let (mut scene, trace, queue) = load_scene();

        scene.render().unwrap();
        queue.borrow_mut().pop().unwrap().succeed(b"wing".to_vec());
        scene.render().unwrap();
        let attached_draws = trace.borrow().draw_calls;

        assert_eq!(
            scene
                .subgraph_cache_mut()
                .evict_by_uri("http://example.com/wing.scene"),
            1
        );

        // Evicted: this pass removes the stale subtree and issues exactly one
        // new request; the subgraph does not draw.
        scene.render().unwrap();
        assert_eq!(queue.borrow().len(), 1);
        assert_eq!(trace.borrow().draw_calls, attached_draws + 1);

        // Recovery: completing the new request re-attaches.
        queue.borrow_mut().pop().unwrap().succeed(b"wing".to_vec());
        scene.render().unwrap();
        assert_eq!(trace.borrow().draw_calls, attached_draws + 3);
    }

    #[test]
    fn timeout_parks_the_node_in_error() {
        let (mut scene, trace, queue) = load_scene();

        scene.render().unwrap();
        queue.borrow_mut().pop().unwrap().timeout();
        scene.render().unwrap();

        let errors = scene.take_load_errors();
        assert_eq!(errors.len(), 1);
        assert!(matches!(
            errors[0],
            LoadError::Timeout { ref uri } if uri == "http://example.com/wing.scene"
        ));

        // Terminal: no retry, no subtree, but the rest of the tree renders.
        scene.render().unwrap();
        assert!(queue.borrow().is_empty());
        assert!(scene.take_load_errors().is_empty());
        assert_eq!(trace.borrow().draw_calls, 3);
    }

    #[test]
    fn bad_payload_surfaces_a_parse_error() {
        let (mut scene, _, queue) = load_scene();

        scene.render().unwrap();
        queue.borrow_mut().pop().unwrap().succeed(b"garbage".to_vec());
        scene.render().unwrap();

        let errors = scene.take_load_errors();
        assert!(matches!(errors.as_slice(), [LoadError::Parse { .. }]));
    }

    #[test]
    fn reloaded_subgraphs_do_not_leak_nodes() {
        let (mut scene, _, queue) = load_scene();

        scene.render().unwrap();
        queue.borrow_mut().pop().unwrap().succeed(b"wing".to_vec());
        scene.render().unwrap();
        let attached_count = scene.arena.node_count();

        // Evicted subtrees must return their slots before the replacement
        // subgraph is instantiated.
        for _ in 0..3 {
            scene
                .subgraph_cache_mut()
                .evict_by_uri("http://example.com/wing.scene");
            scene.render().unwrap();
            queue.borrow_mut().pop().unwrap().succeed(b"wing".to_vec());
            scene.render().unwrap();
        }
        assert_eq!(scene.arena.node_count(), attached_count);
        assert!(scene.take_load_errors().is_empty());
    }

    #[test]
    fn dead_requests_cannot_complete_into_reused_slots() {
        // An outer load whose subgraph itself contains a load node. Evicting
        // the outer while the inner's request is in flight frees the inner's
        // arena slot, and the reattached replacement reclaims that same slot.
        let tree = standard_stack(vec![load(LoadParams::new(
            "http://example.com/wing.scene",
            |payload| {
                if payload == b"wing" {
                    Ok(load(LoadParams::new(
                        "http://example.com/leaf.scene",
                        |p| {
                            if p == b"leaf" {
                                Ok(geometry(GeometryParams::cube(), vec![]))
                            } else {
                                Err("unexpected payload shape".to_string())
                            }
                        },
                    )))
                } else {
                    Err("unexpected payload shape".to_string())
                }
            },
        ))]);
        let (mut scene, trace, queue) = scene_with(tree);

        scene.render().unwrap();
        queue.borrow_mut().pop().unwrap().succeed(b"wing".to_vec());
        scene.render().unwrap();
        // The inner load's request is now in flight.
        assert_eq!(queue.borrow().len(), 1);

        assert_eq!(
            scene
                .subgraph_cache_mut()
                .evict_by_uri("http://example.com/wing.scene"),
            1
        );
        // Eviction removes the inner node and reissues the outer request.
        scene.render().unwrap();
        assert_eq!(queue.borrow().len(), 2);

        // Reattach; the replacement inner node issues its own request.
        queue.borrow_mut().pop().unwrap().succeed(b"wing".to_vec());
        scene.render().unwrap();

        // Completing the dead inner request with garbage must not reach the
        // replacement node.
        let dead = queue.borrow_mut().remove(0);
        dead.succeed(b"garbage".to_vec());
        scene.render().unwrap();
        assert!(scene.take_load_errors().is_empty());

        // And the live request still resolves normally.
        queue.borrow_mut().pop().unwrap().succeed(b"leaf".to_vec());
        scene.render().unwrap();
        assert!(scene.take_load_errors().is_empty());
        assert_eq!(trace.borrow().draw_calls, 1);
    }

    #[test]
    fn bindings_extend_the_scope_for_the_subtree() {
        let seen = Rc::new(Cell::new(0.0f32));
        let s = seen.clone();
        let tree = standard_stack(vec![bindings(
            vec![("spin".to_string(), Value::Number(42.0))],
            vec![rotate(
                Config::dynamic(move |scope: &crate::scope::Scope| {
                    let spin = scope.get("spin").and_then(|v| v.as_f32()).unwrap_or(0.0);
                    s.set(spin);
                    RotateParams::about(Vec3::Y, spin)
                }),
                vec![geometry(GeometryParams::cube(), vec![])],
            )],
        )]);
        let (mut scene, _, _) = scene_with(tree);
        scene.render().unwrap();
        assert_eq!(seen.get(), 42.0);
    }

    #[test]
    fn nested_canvases_restore_the_outer_one() {
        let tree = canvas(
            CanvasParams::named("outer"),
            vec![
                shader(
                    ShaderParams::named("flat"),
                    vec![geometry(GeometryParams::cube(), vec![])],
                ),
                canvas(
                    CanvasParams::named("inner"),
                    vec![shader(
                        ShaderParams::named("flat"),
                        vec![geometry(GeometryParams::plane(1.0), vec![])],
                    )],
                ),
                shader(
                    ShaderParams::named("flat"),
                    vec![geometry(GeometryParams::cube(), vec![])],
                ),
            ],
        );
        let (mut scene, trace, _) = scene_with(tree);
        scene.render().unwrap();

        // Two canvases entered, each cleared and flushed exactly once.
        assert_eq!(trace.borrow().clears, 2);
        assert_eq!(trace.borrow().flushes, 2);
        // The outer canvas's program cache entry is reused by the third
        // branch even though the inner canvas linked its own program.
        assert_eq!(trace.borrow().program_links, 2);
        assert_eq!(trace.borrow().draw_calls, 3);
    }
}
