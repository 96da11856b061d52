use core::num::NonZeroUsize;

/// Options controlling how much work the streaming pipeline does, and when.
///
/// These may be changed between frames only by constructing a new
/// [`StreamingCoordinator`](crate::StreamingCoordinator); none of them affect what the
/// finished geometry looks like.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
#[non_exhaustive]
pub struct StreamOptions {
    /// Distance, in chunks on the horizontal axes, beyond which chunks are not drawn.
    pub render_distance_chunks: i32,

    /// Number of background threads which build chunk geometry.
    pub worker_count: usize,

    /// Number of scratch buffers shared by the workers. Since each build in progress holds
    /// one until its upload completes, this is the limit on builds in flight.
    pub scratch_buffer_count: usize,

    /// Maximum number of tasks waiting for a worker. When full, the remaining dirty chunks
    /// wait for a later frame.
    pub dispatch_queue_capacity: usize,

    /// Chunks whose center is closer than this (squared) to the viewer are rebuilt and
    /// uploaded synchronously, and their uploads are not limited by the frame budget.
    pub immediate_update_distance_squared: f64,

    /// If true, uploads are never deferred to a later frame for lack of time.
    pub upload_no_timeout: bool,

    /// The host's frame rate cap, used with the measured frame rate to decide how much time
    /// per frame may be spent on uploads.
    pub fps_limit: f64,

    /// Maximum number of translucent re-sorts started per frame.
    pub translucent_resort_limit: usize,

    /// How the re-sort limit is shared among visible chunks.
    pub translucent_resort_fairness: ResortFairness,

    /// Whether to skip chunks outside the view frustum. If false, every loaded chunk within
    /// render distance is visible.
    pub frustum_culling: bool,
}

impl StreamOptions {
    /// Constrain fields to valid/practical values.
    #[must_use]
    pub fn repair(mut self) -> Self {
        self.render_distance_chunks = self.render_distance_chunks.clamp(1, 64);
        self.worker_count = self.worker_count.clamp(1, 64);
        self.scratch_buffer_count = self.scratch_buffer_count.max(1);
        self.dispatch_queue_capacity = self.dispatch_queue_capacity.max(1);
        if self.immediate_update_distance_squared.is_nan()
            || self.immediate_update_distance_squared < 0.0
        {
            self.immediate_update_distance_squared = 0.0;
        }
        if self.fps_limit.is_nan() || self.fps_limit <= 0.0 {
            self.fps_limit = Self::default().fps_limit;
        }
        self
    }
}

impl Default for StreamOptions {
    fn default() -> Self {
        let worker_count = default_worker_count();
        Self {
            render_distance_chunks: 8,
            worker_count,
            scratch_buffer_count: worker_count,
            dispatch_queue_capacity: 100,
            immediate_update_distance_squared: 32.0 * 32.0,
            upload_no_timeout: false,
            fps_limit: 260.0,
            translucent_resort_limit: 15,
            translucent_resort_fairness: ResortFairness::default(),
            frustum_culling: true,
        }
    }
}

/// One fewer than the number of CPUs, leaving one for the render thread.
fn default_worker_count() -> usize {
    let parallelism = std::thread::available_parallelism()
        .unwrap_or(NonZeroUsize::MIN)
        .get();
    parallelism.saturating_sub(1).clamp(1, 8)
}

/// Choices for [`StreamOptions::translucent_resort_fairness`].
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[non_exhaustive]
pub enum ResortFairness {
    /// Each frame, re-sort the nearest chunks that need it. Far chunks may wait for as long
    /// as the viewer keeps moving.
    NearestFirst,
    /// Continue each frame from where the previous frame stopped, nearest first within one
    /// pass over the visible chunks, so that every chunk is eventually re-sorted.
    #[default]
    RoundRobin,
}
