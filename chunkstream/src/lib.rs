//! Streaming of chunk geometry for a large, sparsely modified voxel dataset (a “preview
//! world”), kept in sync with a moving viewpoint under a per-frame time budget.
//!
//! The pipeline is made of these parts:
//!
//! * [`ScratchBufferPool`]: a fixed set of CPU-side geometry buffers, each leased to one
//!   build at a time. Its capacity bounds how many builds can be in flight.
//! * [`ChunkRenderTask`]: one unit of work for one chunk, with a small state machine
//!   (`Pending → Compiling → Uploading → Done`, or `Cancelled`).
//! * [`BuildWorkerPool`]: background threads which compile tasks into geometry.
//! * [`UploadScheduler`]: the render-thread side, copying compiled geometry into backend
//!   buffers until the frame's [`Deadline`] passes.
//! * [`VisibilitySet`] and [`DirtyTracker`]: which chunks are worth drawing, and which of
//!   those need to be rebuilt, nearest first.
//! * [`StreamingCoordinator`]: owns all of the above and runs one frame at a time.
//!
//! To use it, implement [`PreviewWorld`] for your data source, [`BlockMesher`] for your block
//! appearance, and [`RenderBackend`] for your graphics API, then bundle them together by
//! implementing [`StreamTypes`].
//!
//! [`Deadline`]: crate::time::Deadline

#![forbid(unsafe_code)]

use core::fmt;

mod build;

mod chunk;
pub use chunk::{ChunkRecord, ChunkTable};

mod coordinator;
pub use coordinator::{DebugStats, StreamUpdateInfo, StreamingCoordinator};

mod dirty;
pub use dirty::DirtyTracker;

mod dispatch;
pub use dispatch::ChunkDispatcher;

mod error;
pub use error::{BackendError, BuildError, CrashReport, Interrupted, StreamError, TransitionError};

mod geometry;
pub use geometry::{CompiledChunkGeometry, MeshSink, Vertex, sort_quads_back_to_front};

mod layer;
pub use layer::{BuildKind, OverlayKind, RenderLayer, TargetMap, UploadTarget};

mod options;
pub use options::{ResortFairness, StreamOptions};

mod region;
pub use region::{PlacementRegion, RegionTransform, touched_chunks};

mod scratch;
pub use scratch::{ScratchBuffer, ScratchBufferPool, ScratchLease};

mod task;
pub use task::{ChunkRenderTask, TaskStatus};

mod upload;
pub use upload::{UploadScheduler, frame_budget, frame_deadline};

mod visibility;
pub use visibility::{Viewer, VisibilityChanges, VisibilityEntry, VisibilitySet};

mod worker;
pub use worker::BuildWorkerPool;

#[doc(hidden)]
pub mod testing;

pub use chunkstream_base::{math, time, util};

// --- Types and traits ---

/// Read access to the spatial dataset whose geometry is being streamed.
///
/// Implementations are shared between the render thread and the build workers, and must
/// tolerate concurrent reads. A world value should be an unchanging snapshot, or at least
/// tolerate its contents changing mid-build; either way, the pipeline learns about changes
/// only through [`StreamingCoordinator::mark_region_dirty()`].
pub trait PreviewWorld: fmt::Debug + Send + Sync + 'static {
    /// Data describing the contents of one cube, handed to the [`BlockMesher`].
    type Block: fmt::Debug + Send + Sync;

    /// Returns whether the source data for the column of chunks at chunk coordinates
    /// `(x, z)` is loaded. Chunks in unloaded columns are neither built nor drawn.
    fn is_chunk_loaded(&self, x: i32, z: i32) -> bool;

    /// Returns the contents of the given cube, or [`None`] if it is empty (air).
    ///
    /// Meshers also use this for neighbor queries.
    fn block(&self, cube: math::Cube) -> Option<Self::Block>;
}

/// Converts one block into geometry. This is the mesh-generation math, supplied by the
/// user of the pipeline.
///
/// Called from worker threads, concurrently for different chunks.
pub trait BlockMesher<W: PreviewWorld>: fmt::Debug + Send + Sync + 'static {
    /// Appends the geometry for the block at `cube` to `sink`.
    ///
    /// Returning an error is treated as an unrecoverable failure of the pipeline.
    fn mesh_block(
        &self,
        world: &W,
        cube: math::Cube,
        block: &W::Block,
        sink: &mut MeshSink<'_>,
    ) -> Result<(), BuildError>;
}

/// The graphics API side of the pipeline. Only ever used from the render thread.
pub trait RenderBackend: fmt::Debug {
    /// A handle to a backend-resident vertex buffer.
    type Buffer: fmt::Debug;

    /// Copies vertex data for one target of one chunk into a new buffer.
    fn upload(
        &mut self,
        chunk: math::ChunkPos,
        target: UploadTarget,
        vertices: &[Vertex],
    ) -> Result<Self::Buffer, BackendError>;

    /// Draws the given buffers, which all belong to `target`, in the given order.
    fn draw(&mut self, target: UploadTarget, chunks: &[(math::ChunkPos, &Self::Buffer)]);
}

/// Bundle of types chosen to stream a specific kind of world into a specific graphics API.
///
/// Implement this trait using a placeholder type which need not store any data.
pub trait StreamTypes: 'static {
    /// The spatial dataset.
    type World: PreviewWorld;
    /// Converts the world's blocks into geometry.
    type Mesher: BlockMesher<Self::World>;
    /// Receives uploaded geometry and draws it.
    type Backend: RenderBackend;
}
