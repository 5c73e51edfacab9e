//! The boundary between the engine and the low-level graphics layer.
//!
//! The traversal engine never talks to a GPU API directly. Everything it
//! needs from one is captured by [`GraphicsApi`]: resolve a named drawable
//! surface into a context, create and fill buffer objects, build and activate
//! shader programs, look up and set program variables, set the viewport,
//! clear, draw indexed triangles, and flush. An implementation backed by a
//! real device plugs in at [`SceneGraph::new`]; the bundled
//! [`headless::HeadlessGraphics`] records every call in memory for tests and
//! server-side validation.
//!
//! All handles are opaque and keyed per canvas; the engine caches them in the
//! [`RenderContext`] and an implementation is free to map them onto whatever
//! native objects it likes.
//!
//! [`SceneGraph::new`]: crate::engine::SceneGraph::new
//! [`RenderContext`]: crate::context::RenderContext

pub mod headless;

pub use headless::HeadlessGraphics;

/// Opaque identifier for a resolved drawable surface.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CanvasId(pub u32);

/// Opaque identifier for a linked shader program.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ProgramHandle(pub u32);

/// Opaque identifier for a GPU buffer object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BufferHandle(pub u32);

/// What a buffer will be bound as.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferKind {
    Vertex,
    Normal,
    Index,
}

/// Shader program source, one string per stage.
#[derive(Clone, Debug, PartialEq)]
pub struct ShaderSource {
    pub vertex: String,
    pub fragment: String,
}

/// A value uploadable to a program variable.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum UniformValue {
    Float(f32),
    Int(i32),
    Vec3([f32; 3]),
    Vec4([f32; 4]),
    Mat3([f32; 9]),
    Mat4([f32; 16]),
}

/// A viewport rectangle in pixels: `(x, y, width, height)`.
pub type ViewportRect = (i32, i32, i32, i32);

/// The complete set of graphics calls the engine issues.
///
/// Methods that can fail do so with plain payloads (`Option`, `String` link
/// logs); the engine wraps them into its own [`SceneError`] taxonomy so that
/// implementations stay free of engine types.
///
/// [`SceneError`]: crate::error::SceneError
pub trait GraphicsApi {
    /// Resolves a named drawable surface to a context, creating it on first
    /// use. Returns `None` if no such surface exists.
    fn acquire_canvas(&mut self, name: &str) -> Option<CanvasId>;

    /// Clears the color and depth attachments of `canvas`.
    fn clear(&mut self, canvas: CanvasId);

    /// Flushes any buffered work for `canvas` to the device.
    fn flush(&mut self, canvas: CanvasId);

    /// Sets the viewport rectangle on `canvas`.
    fn set_viewport(&mut self, canvas: CanvasId, rect: ViewportRect);

    /// The full drawable rectangle of `canvas`, the viewport to restore when
    /// no explicit viewport node encloses the current one.
    fn canvas_rect(&mut self, canvas: CanvasId) -> ViewportRect;

    /// Compiles and links a program for `canvas`. `Err` carries the link log.
    fn create_program(
        &mut self,
        canvas: CanvasId,
        source: &ShaderSource,
    ) -> Result<ProgramHandle, String>;

    /// Makes `program` current, or deactivates the current program on `None`.
    fn use_program(&mut self, program: Option<ProgramHandle>);

    /// Writes a uniform on `program`. Returns `false` if the program has no
    /// variable of that name.
    fn set_uniform(&mut self, program: ProgramHandle, name: &str, value: UniformValue) -> bool;

    /// Looks up the attribute location of `name` in `program`.
    fn attribute_location(&mut self, program: ProgramHandle, name: &str) -> Option<u32>;

    /// Creates a buffer on `canvas` and uploads `data` into it.
    fn create_buffer(&mut self, canvas: CanvasId, kind: BufferKind, data: &[u8]) -> BufferHandle;

    /// Binds `buffer` to vertex attribute slot `location`.
    fn bind_attribute(&mut self, location: u32, buffer: BufferHandle);

    /// Issues one indexed triangle-list draw from `indices`.
    fn draw_indexed(&mut self, indices: BufferHandle, index_count: u32);
}
