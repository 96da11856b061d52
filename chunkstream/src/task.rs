//! [`ChunkRenderTask`] and its status state machine.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::TransitionError;
use crate::geometry::CompiledChunkGeometry;
use crate::layer::BuildKind;
use crate::math::ChunkPos;
use crate::scratch::ScratchLease;

/// Status of a [`ChunkRenderTask`].
///
/// ```text
/// Pending → Compiling → Uploading → Done
///    └──────────┴───────────┴──────→ Cancelled
/// ```
#[expect(clippy::exhaustive_enums)]
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum TaskStatus {
    /// Created and queued; nobody has started on it.
    Pending,
    /// A worker (or the render thread) is building its geometry.
    Compiling,
    /// Geometry is built and waiting for, or undergoing, upload.
    Uploading,
    /// Uploaded and swapped in. Terminal.
    Done,
    /// Abandoned; superseded by a newer task, or detached from its world. Terminal.
    Cancelled,
}

impl TaskStatus {
    /// Whether this status is terminal.
    pub const fn is_finished(self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Cancelled)
    }
}

type FinishCallback = Box<dyn FnOnce() + Send>;

/// The unit of work for building or re-sorting the geometry of one chunk.
///
/// Tasks are shared as `Arc<ChunkRenderTask<W>>` between the dispatcher, which created
/// it, and whichever thread is working on it. The status, scratch lease, and finish
/// callbacks are guarded by one lock, which is only held for the duration of a state
/// change and never while building geometry.
pub struct ChunkRenderTask<W> {
    chunk: ChunkPos,
    kind: BuildKind,
    /// Dispatch order; a higher generation always supersedes a lower one for the same chunk.
    generation: u64,
    /// Squared distance from the viewer to the chunk center when the task was created.
    distance_squared: f64,
    world: Arc<W>,
    /// For [`BuildKind::TransparencyResort`], the geometry to re-sort.
    prior: Option<Arc<CompiledChunkGeometry>>,

    state: Mutex<TaskState>,
}

struct TaskState {
    status: TaskStatus,
    /// Held from the start of uploading until the task finishes.
    lease: Option<Arc<ScratchLease>>,
    finish_callbacks: Vec<FinishCallback>,
}

impl<W> ChunkRenderTask<W> {
    pub(crate) fn new(
        chunk: ChunkPos,
        kind: BuildKind,
        generation: u64,
        distance_squared: f64,
        world: Arc<W>,
        prior: Option<Arc<CompiledChunkGeometry>>,
    ) -> Self {
        Self {
            chunk,
            kind,
            generation,
            distance_squared,
            world,
            prior,
            state: Mutex::new(TaskState {
                status: TaskStatus::Pending,
                lease: None,
                finish_callbacks: Vec::new(),
            }),
        }
    }

    /// The chunk this task builds.
    pub fn chunk(&self) -> ChunkPos {
        self.chunk
    }

    /// What this task does.
    pub fn kind(&self) -> BuildKind {
        self.kind
    }

    /// Position of this task in the order of all tasks created by its dispatcher.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Squared distance from the viewer to the chunk center when the task was created.
    pub fn distance_squared(&self) -> f64 {
        self.distance_squared
    }

    pub(crate) fn world(&self) -> &W {
        &self.world
    }

    pub(crate) fn prior(&self) -> Option<&CompiledChunkGeometry> {
        self.prior.as_deref()
    }

    fn lock(&self) -> MutexGuard<'_, TaskState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current status.
    pub fn status(&self) -> TaskStatus {
        self.lock().status
    }

    /// Whether the task has reached [`TaskStatus::Done`] or [`TaskStatus::Cancelled`].
    pub fn is_finished(&self) -> bool {
        self.status().is_finished()
    }

    /// Whether a scratch buffer lease is attached to this task.
    pub fn has_lease(&self) -> bool {
        self.lock().lease.is_some()
    }

    /// Atomically changes the status from `from` to `to`.
    ///
    /// If the status is not `from`, nothing changes and the error says whether that is
    /// because the task already finished (expected under cancellation) or because it is in
    /// some other unexpected state.
    ///
    /// Moving to [`TaskStatus::Done`] releases the lease and runs the finish callbacks.
    /// Use [`Self::cancel()`] rather than this to cancel.
    pub fn transition(&self, from: TaskStatus, to: TaskStatus) -> Result<(), TransitionError> {
        debug_assert!(to != TaskStatus::Cancelled, "use cancel() to cancel");
        let mut state = self.lock();
        Self::check(&state, from)?;
        state.status = to;
        if to.is_finished() {
            self.finish_locked(state);
        }
        Ok(())
    }

    /// Atomically moves from [`TaskStatus::Compiling`] to [`TaskStatus::Uploading`],
    /// attaching the lease whose buffer holds the compiled geometry.
    ///
    /// On failure the lease is not attached, and is dropped by the caller.
    pub(crate) fn begin_upload(&self, lease: Arc<ScratchLease>) -> Result<(), TransitionError> {
        let mut state = self.lock();
        Self::check(&state, TaskStatus::Compiling)?;
        state.lease = Some(lease);
        state.status = TaskStatus::Uploading;
        Ok(())
    }

    /// Moves the task to [`TaskStatus::Cancelled`] unless it has already finished.
    ///
    /// Returns whether the status changed.
    pub fn cancel(&self) -> bool {
        let mut state = self.lock();
        if state.status.is_finished() {
            return false;
        }
        state.status = TaskStatus::Cancelled;
        self.finish_locked(state);
        true
    }

    /// Registers a function to be called exactly once when the task finishes, whether it
    /// completes or is cancelled. If the task has already finished, `callback` is called
    /// immediately.
    pub fn add_finish_callback(&self, callback: impl FnOnce() + Send + 'static) {
        let mut state = self.lock();
        if state.status.is_finished() {
            drop(state);
            callback();
        } else {
            state.finish_callbacks.push(Box::new(callback));
        }
    }

    fn check(state: &TaskState, expected: TaskStatus) -> Result<(), TransitionError> {
        match state.status {
            found if found == expected => Ok(()),
            status if status.is_finished() => Err(TransitionError::AlreadyFinished { status }),
            found => Err(TransitionError::Unexpected { expected, found }),
        }
    }

    /// Releases everything held by a task which has just finished.
    /// Callbacks and the lease are dropped outside the lock.
    fn finish_locked(&self, mut state: MutexGuard<'_, TaskState>) {
        let callbacks = std::mem::take(&mut state.finish_callbacks);
        let lease = state.lease.take();
        drop(state);
        drop(lease);
        for callback in callbacks {
            callback();
        }
    }
}

impl<W> fmt::Debug for ChunkRenderTask<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("ChunkRenderTask")
            .field("chunk", &self.chunk)
            .field("kind", &self.kind)
            .field("generation", &self.generation)
            .field("status", &state.status)
            .field("has_lease", &state.lease.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scratch::ScratchBufferPool;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn task() -> ChunkRenderTask<()> {
        ChunkRenderTask::new(
            ChunkPos::new(0, 0, 0),
            BuildKind::FullRebuild,
            1,
            0.0,
            Arc::new(()),
            None,
        )
    }

    fn counting_callback(task: &ChunkRenderTask<()>) -> Arc<AtomicUsize> {
        let count = Arc::new(AtomicUsize::new(0));
        task.add_finish_callback({
            let count = count.clone();
            move || {
                count.fetch_add(1, Ordering::SeqCst);
            }
        });
        count
    }

    #[test]
    fn full_lifecycle() {
        let pool = ScratchBufferPool::new(1);
        let task = task();
        let calls = counting_callback(&task);

        task.transition(TaskStatus::Pending, TaskStatus::Compiling).unwrap();
        task.begin_upload(Arc::new(pool.lease().unwrap())).unwrap();
        assert_eq!(task.status(), TaskStatus::Uploading);
        assert!(task.has_lease());
        assert_eq!(pool.available(), 0);

        task.transition(TaskStatus::Uploading, TaskStatus::Done).unwrap();
        assert_eq!(task.status(), TaskStatus::Done);
        assert!(!task.has_lease());
        assert_eq!(pool.available(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // Cancelling after completion changes nothing and does not call back again.
        assert!(!task.cancel());
        assert_eq!(task.status(), TaskStatus::Done);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn transition_from_wrong_state() {
        let task = task();
        assert_eq!(
            task.transition(TaskStatus::Compiling, TaskStatus::Uploading),
            Err(TransitionError::Unexpected {
                expected: TaskStatus::Compiling,
                found: TaskStatus::Pending
            })
        );
        assert_eq!(task.status(), TaskStatus::Pending);
    }

    #[test]
    fn cancelled_mid_compile() {
        let pool = ScratchBufferPool::new(1);
        let task = task();
        let calls = counting_callback(&task);
        task.transition(TaskStatus::Pending, TaskStatus::Compiling).unwrap();

        assert!(task.cancel());
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // The worker finishes compiling and tries to upload.
        let lease = Arc::new(pool.lease().unwrap());
        assert_eq!(
            task.begin_upload(lease),
            Err(TransitionError::AlreadyFinished {
                status: TaskStatus::Cancelled
            })
        );
        // The rejected lease was dropped by the caller, i.e. here.
        assert_eq!(pool.available(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cancel_while_uploading_releases_lease() {
        let pool = ScratchBufferPool::new(1);
        let task = task();
        task.transition(TaskStatus::Pending, TaskStatus::Compiling).unwrap();
        task.begin_upload(Arc::new(pool.lease().unwrap())).unwrap();
        assert!(task.cancel());
        assert!(!task.has_lease());
        assert_eq!(pool.available(), 1);
    }

    #[test]
    fn callback_after_finish_runs_immediately() {
        let task = task();
        task.cancel();
        let calls = counting_callback(&task);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
