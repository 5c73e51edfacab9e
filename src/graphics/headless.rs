//! An in-memory [`GraphicsApi`] that records every call.
//!
//! `HeadlessGraphics` is the escape hatch for running scene graphs without a
//! device: CI, unit tests, and server-side scene validation. It hands out
//! monotonically numbered handles, remembers the last value written to every
//! uniform, and counts buffer creations, program links, and draw calls.
//!
//! The trace lives behind an `Rc<RefCell<..>>` so a test can keep a
//! [`TraceHandle`] after moving the graphics object into the engine:
//!
//! ```
//! use phalanx::graphics::{GraphicsApi, HeadlessGraphics};
//!
//! let mut gfx = HeadlessGraphics::new();
//! let trace = gfx.trace();
//!
//! let canvas = gfx.acquire_canvas("main").unwrap();
//! gfx.clear(canvas);
//!
//! assert_eq!(trace.borrow().calls, vec!["acquire_canvas(main)", "clear"]);
//! ```

use super::{
    BufferHandle, BufferKind, CanvasId, GraphicsApi, ProgramHandle, ShaderSource, UniformValue,
    ViewportRect,
};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

/// Everything a `HeadlessGraphics` has been asked to do.
#[derive(Debug, Default)]
pub struct Trace {
    /// Human-readable call log, in order.
    pub calls: Vec<String>,
    /// Number of buffers created.
    pub buffer_creates: usize,
    /// Number of programs linked.
    pub program_links: usize,
    /// Number of indexed draws issued.
    pub draw_calls: usize,
    /// Number of clears issued.
    pub clears: usize,
    /// Number of flushes issued.
    pub flushes: usize,
    /// Last value written per uniform name, across all programs.
    pub uniforms: HashMap<String, UniformValue>,
    /// Every uniform write in order, for inspecting intermediate state.
    pub uniform_history: Vec<(String, UniformValue)>,
    /// Every viewport rectangle that was set, in order.
    pub viewports: Vec<ViewportRect>,
    /// The currently active program, if any.
    pub active_program: Option<ProgramHandle>,
}

impl Trace {
    /// The last `Mat4` written to `name`, if any.
    pub fn mat4(&self, name: &str) -> Option<[f32; 16]> {
        match self.uniforms.get(name) {
            Some(UniformValue::Mat4(m)) => Some(*m),
            _ => None,
        }
    }

    /// Every `Mat4` written to `name`, in write order.
    pub fn mat4_writes(&self, name: &str) -> Vec<[f32; 16]> {
        self.uniform_history
            .iter()
            .filter_map(|(n, v)| match v {
                UniformValue::Mat4(m) if n == name => Some(*m),
                _ => None,
            })
            .collect()
    }
}

/// Shared view of a [`Trace`], kept by tests after the graphics object moves
/// into the engine.
pub type TraceHandle = Rc<RefCell<Trace>>;

/// Records the engine's graphics calls without touching a device.
pub struct HeadlessGraphics {
    trace: TraceHandle,
    canvases: HashMap<String, CanvasId>,
    /// When set, only these surface names resolve; otherwise any name does.
    known_surfaces: Option<HashSet<String>>,
    /// Uniform/attribute names that should report as missing.
    missing_variables: HashSet<String>,
    /// When true, every program link fails with a canned log.
    fail_links: bool,
    next_canvas: u32,
    next_program: u32,
    next_buffer: u32,
}

impl HeadlessGraphics {
    pub fn new() -> Self {
        Self {
            trace: Rc::new(RefCell::new(Trace::default())),
            canvases: HashMap::new(),
            known_surfaces: None,
            missing_variables: HashSet::new(),
            fail_links: false,
            next_canvas: 0,
            next_program: 0,
            next_buffer: 0,
        }
    }

    /// Restricts which surface names resolve; anything else returns `None`
    /// from [`GraphicsApi::acquire_canvas`].
    pub fn with_surfaces<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.known_surfaces = Some(names.into_iter().map(Into::into).collect());
        self
    }

    /// Makes every program link fail, for exercising link-error paths.
    pub fn failing_links(mut self) -> Self {
        self.fail_links = true;
        self
    }

    /// Marks a variable name as absent from every program.
    pub fn without_variable(mut self, name: impl Into<String>) -> Self {
        self.missing_variables.insert(name.into());
        self
    }

    /// A shared handle onto the call trace.
    pub fn trace(&self) -> TraceHandle {
        self.trace.clone()
    }

    fn record(&self, call: impl Into<String>) {
        self.trace.borrow_mut().calls.push(call.into());
    }
}

impl Default for HeadlessGraphics {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphicsApi for HeadlessGraphics {
    fn acquire_canvas(&mut self, name: &str) -> Option<CanvasId> {
        if let Some(known) = &self.known_surfaces {
            if !known.contains(name) {
                self.record(format!("acquire_canvas({name}) -> miss"));
                return None;
            }
        }
        self.record(format!("acquire_canvas({name})"));
        if let Some(id) = self.canvases.get(name) {
            return Some(*id);
        }
        let id = CanvasId(self.next_canvas);
        self.next_canvas += 1;
        self.canvases.insert(name.to_string(), id);
        Some(id)
    }

    fn clear(&mut self, _canvas: CanvasId) {
        self.record("clear");
        self.trace.borrow_mut().clears += 1;
    }

    fn flush(&mut self, _canvas: CanvasId) {
        self.record("flush");
        self.trace.borrow_mut().flushes += 1;
    }

    fn set_viewport(&mut self, _canvas: CanvasId, rect: ViewportRect) {
        self.record(format!("set_viewport{rect:?}"));
        self.trace.borrow_mut().viewports.push(rect);
    }

    fn canvas_rect(&mut self, _canvas: CanvasId) -> ViewportRect {
        // Headless surfaces are nominally 800x600.
        (0, 0, 800, 600)
    }

    fn create_program(
        &mut self,
        _canvas: CanvasId,
        _source: &ShaderSource,
    ) -> Result<ProgramHandle, String> {
        if self.fail_links {
            self.record("create_program -> link failure");
            return Err("headless: link failure requested".to_string());
        }
        let handle = ProgramHandle(self.next_program);
        self.next_program += 1;
        self.record(format!("create_program -> {}", handle.0));
        self.trace.borrow_mut().program_links += 1;
        Ok(handle)
    }

    fn use_program(&mut self, program: Option<ProgramHandle>) {
        match program {
            Some(p) => self.record(format!("use_program({})", p.0)),
            None => self.record("use_program(none)"),
        }
        self.trace.borrow_mut().active_program = program;
    }

    fn set_uniform(&mut self, _program: ProgramHandle, name: &str, value: UniformValue) -> bool {
        if self.missing_variables.contains(name) {
            self.record(format!("set_uniform({name}) -> miss"));
            return false;
        }
        self.record(format!("set_uniform({name})"));
        let mut trace = self.trace.borrow_mut();
        trace.uniforms.insert(name.to_string(), value);
        trace.uniform_history.push((name.to_string(), value));
        true
    }

    fn attribute_location(&mut self, _program: ProgramHandle, name: &str) -> Option<u32> {
        if self.missing_variables.contains(name) {
            self.record(format!("attribute_location({name}) -> miss"));
            return None;
        }
        // Stable synthetic locations for the standard attribute set.
        let location = match name {
            "a_position" => 0,
            "a_normal" => 1,
            _ => 15,
        };
        self.record(format!("attribute_location({name}) -> {location}"));
        Some(location)
    }

    fn create_buffer(&mut self, _canvas: CanvasId, kind: BufferKind, data: &[u8]) -> BufferHandle {
        let handle = BufferHandle(self.next_buffer);
        self.next_buffer += 1;
        self.record(format!(
            "create_buffer({kind:?}, {} bytes) -> {}",
            data.len(),
            handle.0
        ));
        self.trace.borrow_mut().buffer_creates += 1;
        handle
    }

    fn bind_attribute(&mut self, location: u32, buffer: BufferHandle) {
        self.record(format!("bind_attribute({location}, {})", buffer.0));
    }

    fn draw_indexed(&mut self, indices: BufferHandle, index_count: u32) {
        self.record(format!("draw_indexed({}, {index_count})", indices.0));
        self.trace.borrow_mut().draw_calls += 1;
    }
}
