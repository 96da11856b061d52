//! Compiling a [`ChunkRenderTask`] into geometry. Shared by the build workers and the
//! synchronous [`ChunkDispatcher::update_chunk_now()`](crate::ChunkDispatcher::update_chunk_now) path.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures_channel::oneshot;
use futures_util::FutureExt as _;
use futures_util::future::{self, BoxFuture};

use crate::error::{BuildError, CrashReport, TransitionError, UploadFailure};
use crate::geometry::{CompiledChunkGeometry, MeshSink, Vertex, sort_quads_back_to_front};
use crate::layer::{BuildKind, UploadTarget};
use crate::math::{ChunkPos, FreePoint};
use crate::scratch::{ScratchBuffer, ScratchBufferPool, ScratchLease};
use crate::task::{ChunkRenderTask, TaskStatus};
use crate::time::{Duration, Instant};
use crate::util::{ConciseDebug, Refmt as _};
use crate::{BlockMesher, PreviewWorld};

/// Shared flag telling queued [`UploadOp`]s that their task finished before they ran.
#[derive(Clone, Debug, Default)]
pub(crate) struct UploadToken(Arc<AtomicBool>);

impl UploadToken {
    pub(crate) fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Copying the vertices of one target of one compiled chunk into a backend buffer.
/// Executed on the render thread by the [`UploadScheduler`](crate::UploadScheduler).
///
/// Holds a share of the scratch lease, so the buffer is not returned to the pool until
/// every op of the build has run or been dropped.
pub(crate) struct UploadOp {
    pub(crate) chunk: ChunkPos,
    pub(crate) target: UploadTarget,
    pub(crate) generation: u64,
    pub(crate) distance_squared: f64,
    lease: Arc<ScratchLease>,
    token: UploadToken,
    done: oneshot::Sender<Result<(), UploadFailure>>,
}

impl UploadOp {
    pub(crate) fn vertices(&self) -> &[Vertex] {
        self.lease.vertices(self.target)
    }

    /// Whether running this op would be wasted work.
    pub(crate) fn is_cancelled(&self) -> bool {
        self.token.is_cancelled() || self.done.is_canceled()
    }

    /// Reports the outcome to the build's joined completion future.
    /// Dropping the op without calling this reports [`UploadFailure::Cancelled`].
    pub(crate) fn finish(self, result: Result<(), UploadFailure>) {
        _ = self.done.send(result);
    }
}

impl fmt::Debug for UploadOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadOp")
            .field("chunk", &self.chunk)
            .field("target", &self.target)
            .field("generation", &self.generation)
            .field("vertices", &self.vertices().len())
            .field("cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// The output of a successful compile: per-target copy operations, and one future which
/// resolves when all of them have.
pub(crate) struct UploadSubmission<W> {
    pub(crate) task: Arc<ChunkRenderTask<W>>,
    pub(crate) geometry: Arc<CompiledChunkGeometry>,
    pub(crate) ops: Vec<UploadOp>,
    pub(crate) completion: BoxFuture<'static, Result<(), UploadFailure>>,
}

impl<W> fmt::Debug for UploadSubmission<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadSubmission")
            .field("task", &self.task)
            .field("ops", &self.ops)
            .finish_non_exhaustive()
    }
}

/// Why [`process_task()`] stopped without producing a submission or quietly skipping.
#[derive(Debug)]
pub(crate) enum ProcessError {
    /// The scratch buffer pool was closed while waiting for a lease.
    Interrupted,
    Crash(CrashReport),
}

/// Builds one task.
///
/// Returns `Ok(None)` when the task was skipped: it was already finished, was in an
/// unexpected state, or there is no viewer position to build for. In every `Ok(None)` and
/// `Err` case the task has been left finished or untouched, never `Compiling`.
///
/// `eye` is the viewer's eye position in world coordinates, used for depth sorting.
pub(crate) fn process_task<W: PreviewWorld, M: BlockMesher<W>>(
    task: &Arc<ChunkRenderTask<W>>,
    pool: &ScratchBufferPool,
    mesher: &M,
    eye: Option<FreePoint>,
    crash_context: &'static str,
) -> Result<Option<UploadSubmission<W>>, ProcessError> {
    let chunk = task.chunk();
    let kind = task.kind();

    let token = UploadToken::default();
    task.add_finish_callback({
        let token = token.clone();
        move || token.cancel()
    });

    match task.transition(TaskStatus::Pending, TaskStatus::Compiling) {
        Ok(()) => {}
        Err(TransitionError::AlreadyFinished { .. }) => return Ok(None),
        Err(TransitionError::Unexpected { found, .. }) => {
            log::warn!(
                "Chunk render task for {chunk} was {found:?} when I expected it to be pending; \
                ignoring task"
            );
            return Ok(None);
        }
    }

    let Some(eye) = eye else {
        task.cancel();
        return Ok(None);
    };

    let Ok(mut lease) = pool.lease() else {
        task.cancel();
        return Err(ProcessError::Interrupted);
    };
    if task.is_finished() {
        // Cancelled while we waited for the buffer.
        return Ok(None);
    }

    let eye_relative = chunk_relative_eye(chunk, eye);
    let start_time = Instant::now();
    let built = match kind {
        BuildKind::FullRebuild => build_chunk(task.world(), mesher, chunk, &mut lease),
        BuildKind::TransparencyResort => {
            copy_sortable(task.prior(), &mut lease);
            Ok(())
        }
    }
    .and_then(|()| sort_depth_sorted(&mut lease, kind.targets(), eye_relative));
    if let Err(error) = built {
        task.cancel();
        return Err(ProcessError::Crash(CrashReport::new(
            chunk,
            kind,
            crash_context,
            error,
        )));
    }
    let compile_time = start_time.elapsed();
    if compile_time > Duration::from_millis(4) {
        log::trace!(
            "Chunk {chunk} {kind:?} took {}",
            compile_time.refmt(&ConciseDebug)
        );
    }

    let geometry = Arc::new(CompiledChunkGeometry::from_buffer(
        chunk,
        &lease,
        kind.targets(),
        task.prior(),
        eye_relative,
    ));

    let lease = Arc::new(lease);
    match task.begin_upload(lease.clone()) {
        Ok(()) => {}
        Err(TransitionError::AlreadyFinished { .. }) => return Ok(None),
        Err(TransitionError::Unexpected { found, .. }) => {
            log::warn!(
                "Chunk render task for {chunk} was {found:?} when I expected it to be compiling; \
                aborting task"
            );
            return Ok(None);
        }
    }

    let mut receivers = Vec::new();
    let ops: Vec<UploadOp> = kind
        .targets()
        .iter()
        .filter(|&&target| !lease.is_empty_for(target))
        .map(|&target| {
            let (done, receiver) = oneshot::channel();
            receivers.push(receiver);
            UploadOp {
                chunk,
                target,
                generation: task.generation(),
                distance_squared: task.distance_squared(),
                lease: lease.clone(),
                token: token.clone(),
                done,
            }
        })
        .collect();

    let completion = future::try_join_all(receivers.into_iter().map(|receiver| {
        receiver.map(|outcome| outcome.unwrap_or(Err(UploadFailure::Cancelled)))
    }))
    .map(|outcome| outcome.map(|_| ()))
    .boxed();

    Ok(Some(UploadSubmission {
        task: task.clone(),
        geometry,
        ops,
        completion,
    }))
}

/// Meshes every non-empty cube of `chunk` into `buffer`.
pub(crate) fn build_chunk<W: PreviewWorld, M: BlockMesher<W>>(
    world: &W,
    mesher: &M,
    chunk: ChunkPos,
    buffer: &mut ScratchBuffer,
) -> Result<(), BuildError> {
    let mut sink = MeshSink { buffer, chunk };
    for cube in chunk.bounds().interior_iter() {
        if let Some(block) = world.block(cube) {
            mesher.mesh_block(world, cube, &block, &mut sink)?;
        }
    }
    Ok(())
}

/// Loads the retained depth-sorted quads of `prior` into `buffer` for re-sorting.
fn copy_sortable(prior: Option<&CompiledChunkGeometry>, buffer: &mut ScratchBuffer) {
    let Some(prior) = prior else { return };
    for target in UploadTarget::DEPTH_SORTED {
        buffer
            .vertices_mut(target)
            .extend_from_slice(prior.sortable_vertices(target));
    }
}

fn sort_depth_sorted(
    buffer: &mut ScratchBuffer,
    targets: &[UploadTarget],
    eye: [f32; 3],
) -> Result<(), BuildError> {
    for &target in targets.iter().filter(|t| t.is_depth_sorted()) {
        sort_quads_back_to_front(buffer.vertices_mut(target), eye)?;
    }
    Ok(())
}

fn chunk_relative_eye(chunk: ChunkPos, eye: FreePoint) -> [f32; 3] {
    let relative = eye - chunk.lower_corner().to_f64();
    [relative.x as f32, relative.y as f32, relative.z as f32]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::RenderLayer;
    use crate::math::Cube;
    use crate::testing::{TestBlock, TestMesher, TestWorld};
    use pretty_assertions::assert_eq;

    const OPAQUE: UploadTarget = UploadTarget::Layer(RenderLayer::Opaque);
    const TRANSLUCENT: UploadTarget = UploadTarget::Layer(RenderLayer::Translucent);

    fn task_for(
        world: &Arc<TestWorld>,
        kind: BuildKind,
        prior: Option<Arc<CompiledChunkGeometry>>,
    ) -> Arc<ChunkRenderTask<TestWorld>> {
        Arc::new(ChunkRenderTask::new(
            ChunkPos::new(0, 0, 0),
            kind,
            1,
            0.0,
            world.clone(),
            prior,
        ))
    }

    fn eye() -> Option<FreePoint> {
        Some(FreePoint::new(8.0, 8.0, 8.0))
    }

    #[test]
    fn build_produces_one_op_per_nonempty_target() {
        let world = Arc::new(TestWorld::new());
        world.set(Cube::new(1, 1, 1), TestBlock::Solid);
        world.set(Cube::new(3, 1, 1), TestBlock::Glass);
        let pool = ScratchBufferPool::new(1);
        let task = task_for(&world, BuildKind::FullRebuild, None);

        let submission = process_task(&task, &pool, &TestMesher::new(), eye(), "test")
            .unwrap()
            .unwrap();

        assert_eq!(task.status(), TaskStatus::Uploading);
        let targets: Vec<UploadTarget> = submission.ops.iter().map(|op| op.target).collect();
        assert_eq!(targets, vec![OPAQUE, TRANSLUCENT]);
        // A solid cube alone in space has 6 faces.
        assert_eq!(submission.geometry.vertex_count(OPAQUE), 6 * 4);
        assert_eq!(submission.geometry.vertex_count(TRANSLUCENT), 6 * 4);
        assert_eq!(pool.available(), 0);
    }

    #[test]
    fn completion_resolves_after_all_ops_finish() {
        let world = Arc::new(TestWorld::new());
        world.set(Cube::new(1, 1, 1), TestBlock::Marker);
        let pool = ScratchBufferPool::new(1);
        let task = task_for(&world, BuildKind::FullRebuild, None);
        let mut submission = process_task(&task, &pool, &TestMesher::new(), eye(), "test")
            .unwrap()
            .unwrap();
        assert!(submission.ops.len() > 1);

        let mut ops = std::mem::take(&mut submission.ops);
        let last = ops.pop().unwrap();
        for op in ops {
            op.finish(Ok(()));
        }
        assert!(submission.completion.as_mut().now_or_never().is_none());
        last.finish(Ok(()));
        assert_eq!(submission.completion.as_mut().now_or_never(), Some(Ok(())));
    }

    #[test]
    fn dropped_op_resolves_as_cancelled() {
        let world = Arc::new(TestWorld::new());
        world.set(Cube::new(1, 1, 1), TestBlock::Solid);
        let pool = ScratchBufferPool::new(1);
        let task = task_for(&world, BuildKind::FullRebuild, None);
        let mut submission = process_task(&task, &pool, &TestMesher::new(), eye(), "test")
            .unwrap()
            .unwrap();

        task.cancel();
        assert!(submission.ops.iter().all(UploadOp::is_cancelled));
        submission.ops.clear();
        assert_eq!(
            pollster::block_on(submission.completion),
            Err(UploadFailure::Cancelled)
        );
        assert_eq!(pool.available(), 1);
    }

    #[test]
    fn no_viewer_cancels_without_building() {
        let world = Arc::new(TestWorld::new());
        world.set(Cube::new(1, 1, 1), TestBlock::Solid);
        let pool = ScratchBufferPool::new(1);
        let task = task_for(&world, BuildKind::FullRebuild, None);

        let outcome = process_task(&task, &pool, &TestMesher::new(), None, "test").unwrap();
        assert!(outcome.is_none());
        assert_eq!(task.status(), TaskStatus::Cancelled);
        assert_eq!(pool.available(), 1);
    }

    #[test]
    fn finished_task_is_skipped_quietly() {
        let world = Arc::new(TestWorld::new());
        let pool = ScratchBufferPool::new(1);
        let task = task_for(&world, BuildKind::FullRebuild, None);
        task.cancel();
        let outcome = process_task(&task, &pool, &TestMesher::new(), eye(), "test").unwrap();
        assert!(outcome.is_none());
        assert_eq!(task.status(), TaskStatus::Cancelled);
    }

    #[test]
    fn unexpected_state_is_skipped_and_left_alone() {
        let world = Arc::new(TestWorld::new());
        let pool = ScratchBufferPool::new(1);
        let task = task_for(&world, BuildKind::FullRebuild, None);
        task.transition(TaskStatus::Pending, TaskStatus::Compiling)
            .unwrap();
        let outcome = process_task(&task, &pool, &TestMesher::new(), eye(), "test").unwrap();
        assert!(outcome.is_none());
        assert_eq!(task.status(), TaskStatus::Compiling);
    }

    #[test]
    fn mesher_failure_is_a_crash() {
        let world = Arc::new(TestWorld::new());
        world.set(Cube::new(1, 1, 1), TestBlock::Broken);
        let pool = ScratchBufferPool::new(1);
        let task = task_for(&world, BuildKind::FullRebuild, None);

        let Err(ProcessError::Crash(report)) =
            process_task(&task, &pool, &TestMesher::new(), eye(), CrashReport::BATCHING)
        else {
            panic!("expected crash");
        };
        assert_eq!(report.chunk, ChunkPos::new(0, 0, 0));
        assert_eq!(report.context, "Batching chunks");
        assert_eq!(task.status(), TaskStatus::Cancelled);
        assert_eq!(pool.available(), 1);
    }

    #[test]
    fn closed_pool_interrupts() {
        let world = Arc::new(TestWorld::new());
        let pool = ScratchBufferPool::new(1);
        pool.close();
        let task = task_for(&world, BuildKind::FullRebuild, None);
        assert!(matches!(
            process_task(&task, &pool, &TestMesher::new(), eye(), "test"),
            Err(ProcessError::Interrupted)
        ));
        assert_eq!(task.status(), TaskStatus::Cancelled);
    }

    #[test]
    fn resort_touches_only_depth_sorted_targets() {
        let world = Arc::new(TestWorld::new());
        world.set(Cube::new(1, 1, 1), TestBlock::Solid);
        world.set(Cube::new(5, 1, 1), TestBlock::Glass);
        world.set(Cube::new(9, 1, 1), TestBlock::Glass);
        let pool = ScratchBufferPool::new(1);
        let full = process_task(
            &task_for(&world, BuildKind::FullRebuild, None),
            &pool,
            &TestMesher::new(),
            Some(FreePoint::new(0.0, 1.5, 1.5)),
            "test",
        )
        .unwrap()
        .unwrap();
        let prior = full.geometry.clone();
        drop(full);

        let resort = process_task(
            &task_for(&world, BuildKind::TransparencyResort, Some(prior.clone())),
            &pool,
            &TestMesher::new(),
            Some(FreePoint::new(16.0, 1.5, 1.5)),
            "test",
        )
        .unwrap()
        .unwrap();

        let targets: Vec<UploadTarget> = resort.ops.iter().map(|op| op.target).collect();
        assert_eq!(targets, vec![TRANSLUCENT]);
        // Untouched targets carry over; the sorted target has the same quads in a new order.
        assert_eq!(resort.geometry.vertex_count(OPAQUE), prior.vertex_count(OPAQUE));
        let before = prior.sortable_vertices(TRANSLUCENT);
        let after = resort.geometry.sortable_vertices(TRANSLUCENT);
        assert_eq!(after.len(), before.len());
        assert_ne!(after, before);
        // Viewed from +X, the far glass cube (at x = 5) is drawn first.
        assert!(after[0].position[0] < 7.0);
        assert_eq!(resort.geometry.sorted_for(), FreePoint::new(16.0, 1.5, 1.5));
    }
}
