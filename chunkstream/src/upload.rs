//! Render-thread side of the pipeline: copying compiled geometry into backend buffers
//! within a per-frame time budget.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use futures_util::FutureExt as _;
use futures_util::future::BoxFuture;
use hashbrown::HashMap;

use crate::build::{UploadOp, UploadSubmission};
use crate::chunk::ChunkTable;
use crate::error::{CrashReport, TransitionError, UploadFailure};
use crate::geometry::CompiledChunkGeometry;
use crate::layer::TargetMap;
use crate::options::StreamOptions;
use crate::task::{ChunkRenderTask, TaskStatus};
use crate::time::{Deadline, Duration, Instant};
use crate::{RenderBackend, StreamTypes};

pub(crate) type BufferOf<T> = <<T as StreamTypes>::Backend as RenderBackend>::Buffer;

/// No frame rate below this is assumed when computing the upload budget, so that slow
/// frames do not get ever longer upload budgets.
const MIN_BUDGET_FPS: f64 = 60.0;

/// Returns the time which may be spent on uploads in one frame: half of one frame's time,
/// at the measured frame rate capped by `fps_limit` and no lower than 60 fps.
pub fn frame_budget(measured_fps: f64, fps_limit: f64) -> Duration {
    let fps = measured_fps.min(fps_limit).max(MIN_BUDGET_FPS);
    Duration::from_secs_f64(0.5 / fps)
}

/// Returns the deadline for uploads in a frame starting at `now`.
pub fn frame_deadline(now: Instant, measured_fps: f64, options: &StreamOptions) -> Deadline {
    if options.upload_no_timeout {
        Deadline::Whenever
    } else {
        Deadline::At(now + frame_budget(measured_fps, options.fps_limit))
    }
}

/// Counts of what one [`UploadScheduler::run_uploads()`] did.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub(crate) struct UploadStats {
    /// Uploads performed.
    pub(crate) uploaded: usize,
    /// Uploads left for a later frame because the deadline passed.
    pub(crate) deferred: usize,
    /// Chunks whose new geometry became visible.
    pub(crate) completed: usize,
}

/// One chunk's uploads, waiting for all of its [`UploadOp`]s to complete.
struct PendingBatch<W> {
    task: Arc<ChunkRenderTask<W>>,
    geometry: Arc<CompiledChunkGeometry>,
    completion: BoxFuture<'static, Result<(), UploadFailure>>,
}

/// Receives compiled chunks from the build workers, and performs their uploads and the
/// swap to the new geometry. Only used from the render thread.
///
/// Uploads for chunks near the viewer are always done in the frame they arrive; others
/// wait until there is time.
pub struct UploadScheduler<T: StreamTypes> {
    submissions: flume::Receiver<UploadSubmission<T::World>>,
    near_threshold_squared: f64,

    /// Ops exempt from the deadline.
    near_ops: VecDeque<UploadOp>,
    /// Ops started only while the deadline has not passed, in arrival order.
    ops: VecDeque<UploadOp>,
    batches: Vec<PendingBatch<T::World>>,

    /// Buffers already uploaded for batches which are not yet complete, by task generation.
    staged: HashMap<u64, TargetMap<Option<BufferOf<T>>>>,
}

impl<T: StreamTypes> UploadScheduler<T> {
    pub(crate) fn new(
        submissions: flume::Receiver<UploadSubmission<T::World>>,
        near_threshold_squared: f64,
    ) -> Self {
        Self {
            submissions,
            near_threshold_squared,
            near_ops: VecDeque::new(),
            ops: VecDeque::new(),
            batches: Vec::new(),
            staged: HashMap::new(),
        }
    }

    fn accept(&mut self, submission: UploadSubmission<T::World>) {
        let UploadSubmission {
            task,
            geometry,
            ops,
            completion,
        } = submission;
        for op in ops {
            if op.distance_squared < self.near_threshold_squared {
                self.near_ops.push_back(op);
            } else {
                self.ops.push_back(op);
            }
        }
        self.batches.push(PendingBatch {
            task,
            geometry,
            completion,
        });
    }

    /// Performs queued uploads until the queue is empty or `deadline` is reached, and swaps
    /// in the geometry of every chunk whose uploads have all completed.
    ///
    /// Uploads of near chunks are done regardless of the deadline. No other upload is started
    /// once the deadline is reached, so with [`Deadline::Asap`] only near chunks progress.
    ///
    /// Returns an error if the backend failed, which is unrecoverable.
    pub(crate) fn run_uploads(
        &mut self,
        deadline: Deadline,
        backend: &mut T::Backend,
        table: &mut ChunkTable<BufferOf<T>>,
    ) -> Result<UploadStats, CrashReport> {
        while let Ok(submission) = self.submissions.try_recv() {
            self.accept(submission);
        }
        // Dropping an op reports cancellation to its batch.
        self.near_ops.retain(|op| !op.is_cancelled());
        self.ops.retain(|op| !op.is_cancelled());

        let mut stats = UploadStats::default();
        while let Some(op) = self.near_ops.pop_front() {
            self.run_op(op, backend);
            stats.uploaded += 1;
        }
        while !self.ops.is_empty() && !deadline.is_reached(Instant::now()) {
            if let Some(op) = self.ops.pop_front() {
                self.run_op(op, backend);
                stats.uploaded += 1;
            }
        }
        stats.deferred = self.ops.len();

        stats.completed = self.poll_batches(table)?;
        Ok(stats)
    }

    /// Uploads a single compiled chunk right now, regardless of any deadline, and swaps it in.
    pub(crate) fn upload_now(
        &mut self,
        submission: UploadSubmission<T::World>,
        backend: &mut T::Backend,
        table: &mut ChunkTable<BufferOf<T>>,
    ) -> Result<bool, CrashReport> {
        let UploadSubmission {
            task,
            geometry,
            ops,
            mut completion,
        } = submission;
        for op in ops {
            self.run_op(op, backend);
        }
        match completion.as_mut().now_or_never() {
            Some(outcome) => self.complete(&task, geometry, outcome, table),
            None => {
                // Unreachable in practice, since every op has run; let a later frame finish it.
                self.batches.push(PendingBatch {
                    task,
                    geometry,
                    completion,
                });
                Ok(false)
            }
        }
    }

    fn run_op(&mut self, op: UploadOp, backend: &mut T::Backend) {
        if op.is_cancelled() {
            return;
        }
        match backend.upload(op.chunk, op.target, op.vertices()) {
            Ok(buffer) => {
                self.staged.entry(op.generation).or_default()[op.target] = Some(buffer);
                op.finish(Ok(()));
            }
            Err(error) => op.finish(Err(UploadFailure::Backend(error))),
        }
    }

    /// Completes every batch whose uploads have all finished. Returns the number of chunks
    /// whose geometry changed.
    fn poll_batches(&mut self, table: &mut ChunkTable<BufferOf<T>>) -> Result<usize, CrashReport> {
        let mut completed = 0;
        let mut index = 0;
        while index < self.batches.len() {
            let Some(outcome) = self.batches[index].completion.as_mut().now_or_never() else {
                index += 1;
                continue;
            };
            let PendingBatch { task, geometry, .. } = self.batches.swap_remove(index);
            if self.complete(&task, geometry, outcome, table)? {
                completed += 1;
            }
        }
        Ok(completed)
    }

    fn complete(
        &mut self,
        task: &ChunkRenderTask<T::World>,
        geometry: Arc<CompiledChunkGeometry>,
        outcome: Result<(), UploadFailure>,
        table: &mut ChunkTable<BufferOf<T>>,
    ) -> Result<bool, CrashReport> {
        let chunk = task.chunk();
        let staged = self.staged.remove(&task.generation()).unwrap_or_default();
        match outcome {
            Ok(()) => match task.transition(TaskStatus::Uploading, TaskStatus::Done) {
                Ok(()) => Ok(table.get_mut(chunk).is_some_and(|record| {
                    record.apply(task.kind(), task.generation(), geometry, staged)
                })),
                Err(TransitionError::AlreadyFinished { .. }) => Ok(false),
                Err(TransitionError::Unexpected { found, .. }) => {
                    log::warn!(
                        "Chunk render task for {chunk} was {found:?} when I expected it to be \
                        uploading; ignoring result"
                    );
                    Ok(false)
                }
            },
            Err(UploadFailure::Cancelled) => Ok(false),
            Err(UploadFailure::Backend(error)) => {
                task.cancel();
                Err(CrashReport::new(
                    chunk,
                    task.kind(),
                    CrashReport::UPLOADING,
                    error,
                ))
            }
        }
    }

    /// Drops every queued upload and incomplete batch.
    pub(crate) fn clear(&mut self) {
        self.submissions.drain().for_each(drop);
        self.near_ops.clear();
        self.ops.clear();
        self.batches.clear();
        self.staged.clear();
    }

    /// Number of uploads queued and not yet performed.
    pub fn pending_upload_count(&self) -> usize {
        self.near_ops.len() + self.ops.len()
    }

    /// Number of chunks whose builds are complete but whose new geometry is not yet visible.
    pub fn pending_chunk_count(&self) -> usize {
        self.batches.len() + self.submissions.len()
    }
}

impl<T: StreamTypes> fmt::Debug for UploadScheduler<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadScheduler")
            .field("near_threshold_squared", &self.near_threshold_squared)
            .field("near_ops", &self.near_ops.len())
            .field("ops", &self.ops.len())
            .field("batches", &self.batches.len())
            .field("incoming", &self.submissions.len())
            .finish_non_exhaustive()
    }
}
