//! Legacy-API translation engine
//!
//! Everything under this module runs with the device's context lock held.
//! [`GlState`] is the per-context bundle the replay routines mutate: the
//! driver, the applied fixed-function state, the vertex array cache and the
//! last bound objects.

pub mod commands;
pub mod context;
pub mod conversions;
pub mod driver;
pub mod format;
pub mod framebuffer;
pub mod geometry;
pub mod pipeline;
pub mod replay;
pub mod state;

use crate::backends::gl::driver::{
    BufferName, DriverMessage, FramebufferName, FramebufferTarget, GlDriver, GlResult, ProgramName,
    VertexArrayName,
};
use crate::backends::gl::geometry::GeometryCache;
use crate::backends::gl::state::StateStack;
use crate::backends::Capabilities;

/// Objects most recently bound on the context
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BoundObjects {
    /// Program in use
    pub program: Option<ProgramName>,
    /// Vertex array
    pub vertex_array: Option<VertexArrayName>,
    /// Draw framebuffer, `None` for the default one
    pub draw_framebuffer: Option<FramebufferName>,
}

/// Counters exposed for diagnostics and tests
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    /// Pipeline binds replayed
    pub pipeline_binds: u64,
    /// State calls emitted by the most recent pipeline bind
    pub last_bind_calls: usize,
    /// State calls emitted by all pipeline binds
    pub total_bind_calls: usize,
    /// Live vertex array cache entries
    pub geometry_entries: usize,
    /// Vertex array cache hits
    pub geometry_hits: u64,
    /// Vertex array cache misses
    pub geometry_misses: u64,
    /// Submissions replayed
    pub submissions: u64,
}

/// Mutable state of one legacy context
pub struct GlState {
    /// Loaded driver
    pub driver: Box<dyn GlDriver>,
    /// Features usable at this backend's feature level
    pub caps: Capabilities,
    /// Applied fixed-function state
    pub stack: StateStack,
    /// Vertex array objects keyed by binding combination
    pub geometry: GeometryCache,
    /// Last bound program / vertex array / framebuffer
    pub bound: BoundObjects,
    /// Running counters
    pub stats: EngineStats,
    /// Uniform buffer backing push constants, with its size
    push_constants: Option<(BufferName, u64)>,
}

impl GlState {
    /// Wrap a freshly loaded driver
    pub fn new(
        driver: Box<dyn GlDriver>,
        caps: Capabilities,
        geometry_warn_threshold: Option<usize>,
    ) -> Self {
        Self {
            driver,
            caps,
            stack: StateStack::new(caps),
            geometry: GeometryCache::new(geometry_warn_threshold),
            bound: BoundObjects::default(),
            stats: EngineStats::default(),
            push_constants: None,
        }
    }

    /// One-time context setup after the driver is loaded
    pub fn initialize(&mut self) {
        if self.caps.contains(Capabilities::CLIP_CONTROL) {
            self.driver.clip_control(true, true);
        }
        if self.caps.contains(Capabilities::DEBUG_OUTPUT) {
            self.driver
                .set_capability(driver::Capability::DebugOutput, true);
        }
    }

    /// Bind a program if it is not already in use
    pub fn use_program(&mut self, program: Option<ProgramName>) {
        if self.bound.program != program {
            self.driver.use_program(program);
            self.bound.program = program;
        }
    }

    /// Bind a vertex array if it is not already bound
    pub fn bind_vertex_array(&mut self, vertex_array: Option<VertexArrayName>) {
        if self.bound.vertex_array != vertex_array {
            self.driver.bind_vertex_array(vertex_array);
            self.bound.vertex_array = vertex_array;
        }
    }

    /// Bind a draw framebuffer if it is not already bound
    pub fn bind_draw_framebuffer(&mut self, framebuffer: Option<FramebufferName>) {
        if self.bound.draw_framebuffer != framebuffer {
            self.driver
                .bind_framebuffer(FramebufferTarget::Draw, framebuffer);
            self.bound.draw_framebuffer = framebuffer;
        }
    }

    /// Uniform buffer holding at least `size` bytes of push constants
    pub fn push_constant_buffer(&mut self, size: u64) -> GlResult<BufferName> {
        match self.push_constants {
            Some((buffer, capacity)) if capacity >= size => Ok(buffer),
            previous => {
                if let Some((buffer, _)) = previous {
                    self.driver.delete_buffer(buffer);
                }
                let buffer = self.driver.create_buffer(size)?;
                self.push_constants = Some((buffer, size));
                Ok(buffer)
            }
        }
    }

    /// Delete engine-owned objects before the context goes away
    pub fn release(&mut self) {
        self.geometry.clear(self.driver.as_mut());
        if let Some((buffer, _)) = self.push_constants.take() {
            self.driver.delete_buffer(buffer);
        }
        self.bound = BoundObjects::default();
    }

    /// Forget a deleted vertex array
    pub fn forget_vertex_array(&mut self, vertex_array: VertexArrayName) {
        if self.bound.vertex_array == Some(vertex_array) {
            self.bound.vertex_array = None;
        }
    }

    /// Counters with the cache size filled in
    pub fn stats(&self) -> EngineStats {
        EngineStats {
            geometry_entries: self.geometry.len(),
            geometry_hits: self.geometry.hits(),
            geometry_misses: self.geometry.misses(),
            ..self.stats
        }
    }

    /// Drain queued driver debug output
    pub fn take_debug_messages(&mut self) -> Vec<DriverMessage> {
        self.driver.take_debug_messages()
    }
}
