//! Creating [`ChunkRenderTask`]s and handing them to the build workers or building them
//! on the spot.

use std::fmt;
use std::sync::Arc;

use hashbrown::HashMap;

use crate::build::{ProcessError, UploadSubmission, process_task};
use crate::error::CrashReport;
use crate::geometry::CompiledChunkGeometry;
use crate::layer::BuildKind;
use crate::math::{ChunkPos, FreePoint};
use crate::options::StreamOptions;
use crate::scratch::ScratchBufferPool;
use crate::task::ChunkRenderTask;
use crate::worker::{BuildWorkerPool, SharedEye, WorkerOutputs};
use crate::StreamTypes;

type Task<T> = Arc<ChunkRenderTask<<T as StreamTypes>::World>>;

/// Owns the build workers and the queue feeding them, and keeps at most one live task per
/// chunk: starting a new task for a chunk cancels the previous one.
///
/// Tasks get increasing generation numbers, so that if an older build's upload finishes
/// after a newer one's, the older result is discarded.
pub struct ChunkDispatcher<T: StreamTypes> {
    mesher: Arc<T::Mesher>,
    worker_count: usize,
    scratch_buffer_count: usize,
    queue_capacity: usize,

    /// Most recent task for each chunk. Finished tasks are pruned lazily.
    tasks: HashMap<ChunkPos, Task<T>>,
    last_generation: u64,

    /// [`None`] after shutdown.
    queue: Option<flume::Sender<Task<T>>>,
    queue_rx: flume::Receiver<Task<T>>,
    pool: ScratchBufferPool,
    workers: Option<BuildWorkerPool>,
    /// Workers from before a restart, which exit on their own once their current build
    /// notices it was cancelled. Joined as soon as they have.
    retired: Vec<BuildWorkerPool>,

    /// Buffer for synchronous builds on the render thread, so they never wait for workers.
    main_pool: ScratchBufferPool,
    eye: SharedEye,
    outputs: WorkerOutputs<T::World>,
}

impl<T: StreamTypes> ChunkDispatcher<T> {
    pub(crate) fn new(
        mesher: Arc<T::Mesher>,
        options: &StreamOptions,
        outputs: WorkerOutputs<T::World>,
    ) -> Self {
        let (queue, queue_rx) = flume::bounded(options.dispatch_queue_capacity);
        let mut this = Self {
            mesher,
            worker_count: options.worker_count,
            scratch_buffer_count: options.scratch_buffer_count,
            queue_capacity: options.dispatch_queue_capacity,
            tasks: HashMap::new(),
            last_generation: 0,
            queue: Some(queue),
            queue_rx,
            pool: ScratchBufferPool::new(options.scratch_buffer_count),
            workers: None,
            retired: Vec::new(),
            main_pool: ScratchBufferPool::new(1),
            eye: SharedEye::default(),
            outputs,
        };
        this.spawn_workers();
        this
    }

    fn spawn_workers(&mut self) {
        self.workers = Some(BuildWorkerPool::spawn(
            self.worker_count,
            &self.queue_rx,
            &self.pool,
            &self.mesher,
            &self.eye,
            &self.outputs,
        ));
    }

    /// Sets the eye position that builds started from now on sort translucent geometry
    /// for. With [`None`], builds are cancelled instead of started.
    pub(crate) fn set_eye(&self, eye: Option<FreePoint>) {
        self.eye.set(eye);
    }

    fn start_task(
        &mut self,
        world: &Arc<T::World>,
        chunk: ChunkPos,
        kind: BuildKind,
        distance_squared: f64,
        prior: Option<Arc<CompiledChunkGeometry>>,
    ) -> Task<T> {
        self.last_generation += 1;
        let task = Arc::new(ChunkRenderTask::new(
            chunk,
            kind,
            self.last_generation,
            distance_squared,
            world.clone(),
            prior,
        ));
        if let Some(previous) = self.tasks.insert(chunk, task.clone()) {
            previous.cancel();
        }
        task
    }

    /// Queues a full rebuild of `chunk` for the workers.
    ///
    /// Returns false, and changes nothing, if the queue is full or there are no workers to
    /// take it; the caller should try again in a later frame.
    pub fn update_chunk_later(
        &mut self,
        world: &Arc<T::World>,
        chunk: ChunkPos,
        distance_squared: f64,
    ) -> bool {
        self.enqueue(world, chunk, BuildKind::FullRebuild, distance_squared, None)
    }

    /// Queues re-sorting of `chunk`'s translucent geometry for the current eye position,
    /// reusing `prior` instead of meshing again.
    ///
    /// Returns false if there is nothing to sort, another task for the chunk is still
    /// running, or the queue is full.
    pub fn update_transparency_later(
        &mut self,
        world: &Arc<T::World>,
        chunk: ChunkPos,
        distance_squared: f64,
        prior: Arc<CompiledChunkGeometry>,
    ) -> bool {
        if !prior.has_depth_sorted_geometry() || self.active_task(chunk).is_some() {
            return false;
        }
        self.enqueue(
            world,
            chunk,
            BuildKind::TransparencyResort,
            distance_squared,
            Some(prior),
        )
    }

    fn enqueue(
        &mut self,
        world: &Arc<T::World>,
        chunk: ChunkPos,
        kind: BuildKind,
        distance_squared: f64,
        prior: Option<Arc<CompiledChunkGeometry>>,
    ) -> bool {
        let Some(queue) = &self.queue else {
            return false;
        };
        if queue.is_full() || self.workers.as_ref().is_none_or(|w| w.thread_count() == 0) {
            return false;
        }
        let queue = queue.clone();
        let task = self.start_task(world, chunk, kind, distance_squared, prior);
        match queue.try_send(task.clone()) {
            Ok(()) => true,
            Err(_) => {
                task.cancel();
                false
            }
        }
    }

    /// Builds `chunk` on the calling thread, returning its uploads for the caller to perform
    /// right away.
    ///
    /// Returns `Ok(None)` if the build was skipped, which happens when there is no eye
    /// position or after shutdown.
    pub(crate) fn update_chunk_now(
        &mut self,
        world: &Arc<T::World>,
        chunk: ChunkPos,
        distance_squared: f64,
    ) -> Result<Option<UploadSubmission<T::World>>, CrashReport> {
        let task = self.start_task(world, chunk, BuildKind::FullRebuild, distance_squared, None);
        match process_task(
            &task,
            &self.main_pool,
            &*self.mesher,
            self.eye.get(),
            CrashReport::REBUILD_NOW,
        ) {
            Ok(submission) => Ok(submission),
            Err(ProcessError::Interrupted) => Ok(None),
            Err(ProcessError::Crash(report)) => Err(report),
        }
    }

    /// The unfinished task for `chunk`, if any.
    pub fn active_task(&self, chunk: ChunkPos) -> Option<&Arc<ChunkRenderTask<T::World>>> {
        self.tasks.get(&chunk).filter(|task| !task.is_finished())
    }

    /// The most recent task for `chunk`, whether or not it has finished. Finished tasks are
    /// forgotten at the start of each [`StreamingCoordinator::update()`](crate::StreamingCoordinator::update).
    pub fn task(&self, chunk: ChunkPos) -> Option<&Arc<ChunkRenderTask<T::World>>> {
        self.tasks.get(&chunk)
    }

    /// Cancels the task for `chunk`, if any, e.g. because the chunk is no longer tracked.
    pub fn cancel_chunk(&mut self, chunk: ChunkPos) {
        if let Some(task) = self.tasks.remove(&chunk) {
            task.cancel();
        }
    }

    /// Cancels every task and empties the queue.
    pub fn cancel_all(&mut self) {
        for (_, task) in self.tasks.drain() {
            task.cancel();
        }
        self.queue_rx.drain().for_each(drop);
    }

    /// Forgets finished tasks, and joins retired workers which have exited.
    pub(crate) fn prune(&mut self) {
        self.tasks.retain(|_, task| !task.is_finished());
        self.join_exited_workers();
    }

    fn join_exited_workers(&mut self) {
        let (exited, running): (Vec<_>, Vec<_>) = core::mem::take(&mut self.retired)
            .into_iter()
            .partition(BuildWorkerPool::has_exited);
        self.retired = running;
        for workers in exited {
            workers.join();
        }
    }

    /// Cancels everything and starts a fresh set of workers with a fresh buffer pool.
    ///
    /// The old workers are not waited for, since they may be in the middle of a long build;
    /// they exit when that build finishes.
    ///
    /// Also used to start again after [`Self::shutdown()`].
    pub(crate) fn restart(&mut self) {
        self.cancel_all();
        self.pool.close();
        if self.main_pool.is_closed() {
            self.main_pool = ScratchBufferPool::new(1);
        }
        let (queue, queue_rx) = flume::bounded(self.queue_capacity);
        self.queue = Some(queue);
        self.queue_rx = queue_rx;
        self.retired.extend(self.workers.take());
        self.join_exited_workers();
        self.pool = ScratchBufferPool::new(self.scratch_buffer_count);
        self.spawn_workers();
    }

    /// Cancels everything, stops the workers, and waits for them to exit.
    ///
    /// Afterward, nothing can be queued and synchronous builds are skipped.
    pub fn shutdown(&mut self) {
        self.cancel_all();
        self.pool.close();
        self.main_pool.close();
        self.queue = None;
        for workers in self.retired.drain(..).chain(self.workers.take()) {
            workers.join();
        }
    }

    /// Number of tasks not yet finished, whether queued, building, or uploading.
    pub fn active_count(&self) -> usize {
        self.tasks.values().filter(|task| !task.is_finished()).count()
    }

    /// Number of tasks waiting for a worker.
    pub fn queued_count(&self) -> usize {
        self.queue_rx.len()
    }

    /// Whether no more tasks can be queued this frame.
    pub fn is_queue_full(&self) -> bool {
        self.queue.as_ref().is_none_or(flume::Sender::is_full)
    }

    /// Number of scratch buffers not leased by any build.
    pub fn available_scratch_buffers(&self) -> usize {
        self.pool.available()
    }

    /// The pool the current workers lease from. A restart replaces it.
    pub fn scratch_pool(&self) -> &ScratchBufferPool {
        &self.pool
    }

    /// Number of running worker threads.
    pub fn worker_count(&self) -> usize {
        self.workers.as_ref().map_or(0, BuildWorkerPool::thread_count)
    }
}

impl<T: StreamTypes> Drop for ChunkDispatcher<T> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl<T: StreamTypes> fmt::Debug for ChunkDispatcher<T> {
    #[mutants::skip]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkDispatcher")
            .field("tasks", &self.tasks.len())
            .field("last_generation", &self.last_generation)
            .field("queued", &self.queue_rx.len())
            .field("pool", &self.pool)
            .field("workers", &self.workers)
            .field("retired", &self.retired.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::Cube;
    use crate::task::TaskStatus;
    use crate::testing::{TestBlock, TestMesher, TestWorld, Tt};
    use crate::time::Duration;
    use pretty_assertions::assert_eq;

    struct Harness {
        world: Arc<TestWorld>,
        dispatcher: ChunkDispatcher<Tt>,
        submissions: flume::Receiver<UploadSubmission<TestWorld>>,
        _crashes: flume::Receiver<CrashReport>,
    }

    fn harness(mesher: TestMesher, workers: usize, capacity: usize) -> Harness {
        let world = Arc::new(TestWorld::new());
        world.set(Cube::new(1, 1, 1), TestBlock::Solid);
        let (submissions_tx, submissions) = flume::unbounded();
        let (crashes_tx, crashes) = flume::unbounded();
        let mut options = StreamOptions::default();
        options.worker_count = workers;
        options.scratch_buffer_count = 2;
        options.dispatch_queue_capacity = capacity;
        let dispatcher = ChunkDispatcher::new(
            Arc::new(mesher),
            &options,
            WorkerOutputs {
                submissions: submissions_tx,
                crashes: crashes_tx,
            },
        );
        dispatcher.set_eye(Some(FreePoint::new(8.0, 8.0, 8.0)));
        Harness {
            world,
            dispatcher,
            submissions,
            _crashes: crashes,
        }
    }

    const ORIGIN: ChunkPos = ChunkPos::new(0, 0, 0);

    #[test]
    fn later_builds_on_a_worker() {
        let mut h = harness(TestMesher::new(), 1, 10);
        assert!(h.dispatcher.update_chunk_later(&h.world, ORIGIN, 0.0));
        let submission = h.submissions.recv_timeout(Duration::from_secs(10)).unwrap();
        assert_eq!(submission.task.chunk(), ORIGIN);
        assert_eq!(submission.task.generation(), 1);
        assert_eq!(submission.task.status(), TaskStatus::Uploading);
    }

    #[test]
    fn new_task_cancels_previous() {
        let (mesher, gate) = TestMesher::gated();
        let mut h = harness(mesher, 1, 10);
        assert!(h.dispatcher.update_chunk_later(&h.world, ORIGIN, 0.0));
        assert!(gate.wait_for_entries(1, Duration::from_secs(10)));
        let first = h.dispatcher.active_task(ORIGIN).unwrap().clone();
        assert_eq!(first.status(), TaskStatus::Compiling);

        assert!(h.dispatcher.update_chunk_later(&h.world, ORIGIN, 0.0));
        assert_eq!(first.status(), TaskStatus::Cancelled);
        gate.open();

        // Only the second build produces anything.
        let submission = h.submissions.recv_timeout(Duration::from_secs(10)).unwrap();
        assert_eq!(submission.task.generation(), 2);
        h.dispatcher.shutdown();
        assert!(h.submissions.try_recv().is_err());
    }

    #[test]
    fn full_queue_refuses() {
        let (mesher, gate) = TestMesher::gated();
        let mut h = harness(mesher, 1, 1);
        // One task occupies the worker, one fills the queue.
        assert!(h.dispatcher.update_chunk_later(&h.world, ORIGIN, 0.0));
        assert!(gate.wait_for_entries(1, Duration::from_secs(10)));
        assert!(h.dispatcher.update_chunk_later(&h.world, ChunkPos::new(1, 0, 0), 0.0));
        assert!(h.dispatcher.is_queue_full());

        assert!(!h.dispatcher.update_chunk_later(&h.world, ChunkPos::new(2, 0, 0), 0.0));
        assert!(h.dispatcher.active_task(ChunkPos::new(2, 0, 0)).is_none());
        assert_eq!(h.dispatcher.queued_count(), 1);
        gate.open();
    }

    #[test]
    fn now_builds_synchronously() {
        let mut h = harness(TestMesher::new(), 1, 10);
        let submission = h
            .dispatcher
            .update_chunk_now(&h.world, ORIGIN, 0.0)
            .unwrap()
            .unwrap();
        assert_eq!(submission.task.status(), TaskStatus::Uploading);
        assert_eq!(submission.ops.len(), 1);
    }

    #[test]
    fn now_reports_crash_context() {
        let mut h = harness(TestMesher::new(), 1, 10);
        h.world.set(Cube::new(2, 2, 2), TestBlock::Broken);
        let report = h
            .dispatcher
            .update_chunk_now(&h.world, ORIGIN, 0.0)
            .unwrap_err();
        assert_eq!(report.context, "Rendering chunk");
    }

    #[test]
    fn transparency_resort_requires_sortable_geometry_and_no_active_task() {
        let mut h = harness(TestMesher::new(), 1, 10);
        let empty = Arc::new(CompiledChunkGeometry::empty(ORIGIN));
        assert!(!h.dispatcher.update_transparency_later(&h.world, ORIGIN, 0.0, empty));

        h.world.set(Cube::new(3, 3, 3), TestBlock::Glass);
        let built = h
            .dispatcher
            .update_chunk_now(&h.world, ORIGIN, 0.0)
            .unwrap()
            .unwrap();
        // The synchronous task is still uploading.
        assert!(!h.dispatcher.update_transparency_later(
            &h.world,
            ORIGIN,
            0.0,
            built.geometry.clone()
        ));
        built.task.cancel();
        assert!(h.dispatcher.update_transparency_later(&h.world, ORIGIN, 0.0, built.geometry));
        let submission = h.submissions.recv_timeout(Duration::from_secs(10)).unwrap();
        assert_eq!(submission.task.kind(), BuildKind::TransparencyResort);
    }

    #[test]
    fn restart_cancels_and_keeps_working() {
        let (mesher, gate) = TestMesher::gated();
        let mut h = harness(mesher, 1, 10);
        assert!(h.dispatcher.update_chunk_later(&h.world, ORIGIN, 0.0));
        assert!(gate.wait_for_entries(1, Duration::from_secs(10)));
        let stuck = h.dispatcher.active_task(ORIGIN).unwrap().clone();

        h.dispatcher.restart();
        assert_eq!(stuck.status(), TaskStatus::Cancelled);
        assert_eq!(h.dispatcher.worker_count(), 1);
        gate.open();

        assert!(h.dispatcher.update_chunk_later(&h.world, ORIGIN, 0.0));
        let submission = h.submissions.recv_timeout(Duration::from_secs(10)).unwrap();
        assert_eq!(submission.task.generation(), 2);
    }

    #[test]
    fn exited_workers_are_joined_without_shutdown() {
        let mut h = harness(TestMesher::new(), 2, 10);
        for _ in 0..3 {
            h.dispatcher.restart();
        }
        // Idle workers exit as soon as their queue is disconnected.
        let start = std::time::Instant::now();
        while !h.dispatcher.retired.is_empty() {
            assert!(start.elapsed() < Duration::from_secs(10), "{:?}", h.dispatcher);
            std::thread::sleep(Duration::from_millis(1));
            h.dispatcher.prune();
        }
        assert_eq!(h.dispatcher.worker_count(), 2);
    }

    #[test]
    fn shutdown_stops_everything() {
        let mut h = harness(TestMesher::new(), 2, 10);
        h.dispatcher.shutdown();
        assert_eq!(h.dispatcher.worker_count(), 0);
        assert!(!h.dispatcher.update_chunk_later(&h.world, ORIGIN, 0.0));
        assert!(h.dispatcher.update_chunk_now(&h.world, ORIGIN, 0.0).unwrap().is_none());

        h.dispatcher.restart();
        assert_eq!(h.dispatcher.worker_count(), 2);
        assert!(h.dispatcher.update_chunk_later(&h.world, ORIGIN, 0.0));
        let submission = h.submissions.recv_timeout(Duration::from_secs(10)).unwrap();
        assert_eq!(submission.task.chunk(), ORIGIN);
        assert!(h.dispatcher.update_chunk_now(&h.world, ORIGIN, 0.0).unwrap().is_some());
    }
}
