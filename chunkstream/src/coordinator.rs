//! [`StreamingCoordinator`], which runs the whole pipeline one frame at a time.

use std::fmt;
use std::sync::Arc;

use hashbrown::HashSet;
use indoc::writedoc;
use itertools::Itertools as _;

use crate::chunk::{ChunkRecord, ChunkTable};
use crate::dirty::DirtyTracker;
use crate::dispatch::ChunkDispatcher;
use crate::error::CrashReport;
use crate::layer::{OverlayKind, RenderLayer, UploadTarget};
use crate::math::{ChunkPos, Cube, FreePoint, GridCoordinate, ViewFrustum};
use crate::options::{ResortFairness, StreamOptions};
use crate::region::{PlacementRegion, touched_chunks};
use crate::time::{Deadline, Duration, Instant, TimeStats};
use crate::upload::{UploadScheduler, frame_deadline};
use crate::util::{ConciseDebug, Refmt as _};
use crate::visibility::{Viewer, VisibilitySet};
use crate::worker::WorkerOutputs;
use crate::{RenderBackend, StreamTypes};


type Buffer<T> = <<T as StreamTypes>::Backend as RenderBackend>::Buffer;

/// Squared distance the eye must move before translucent geometry is sorted again.
const RESORT_THRESHOLD_SQUARED: f64 = 1.0;

/// Keeps backend-resident geometry for the chunks around a viewer up to date with a
/// [`PreviewWorld`](crate::PreviewWorld), and draws it.
///
/// Call [`Self::update()`] and then [`Self::draw()`] once per frame, from the render thread.
/// Each update:
///
/// 1. refreshes the [`VisibilitySet`] if the viewer moved enough,
/// 2. synchronously rebuilds and uploads dirty chunks close to the viewer,
/// 3. performs uploads of chunks built in the background until the frame's budget is spent,
/// 4. queues the remaining dirty chunks for the workers, nearest first, and
/// 5. queues re-sorts of translucent geometry if the viewer moved.
///
/// If any build or upload fails unrecoverably, streaming stops and every later update
/// returns the same [`CrashReport`].
pub struct StreamingCoordinator<T: StreamTypes> {
    options: StreamOptions,
    world: Option<Arc<T::World>>,
    /// Chunks touched by the placement regions.
    regions: HashSet<ChunkPos>,

    visibility: VisibilitySet,
    dirty: DirtyTracker,
    table: ChunkTable<Buffer<T>>,
    dispatcher: ChunkDispatcher<T>,
    uploads: UploadScheduler<T>,
    crashes: flume::Receiver<CrashReport>,
    crash: Option<CrashReport>,

    /// Eye position the current re-sort pass started from.
    resort_eye: Option<FreePoint>,
    /// Visible chunks not yet examined in the current re-sort pass.
    resort_remaining: usize,
    resort_cursor: usize,

    frame: u64,
    all_done: bool,
}

impl<T: StreamTypes> StreamingCoordinator<T> {
    /// Creates a coordinator and starts its build workers.
    ///
    /// Nothing is streamed until [`Self::set_regions()`] says where to look.
    pub fn new(
        world: Option<Arc<T::World>>,
        mesher: Arc<T::Mesher>,
        options: StreamOptions,
    ) -> Self {
        let options = options.repair();
        let (submissions_tx, submissions) = flume::unbounded();
        let (crashes_tx, crashes) = flume::unbounded();
        let mut dispatcher = ChunkDispatcher::new(
            mesher,
            &options,
            WorkerOutputs {
                submissions: submissions_tx,
                crashes: crashes_tx,
            },
        );
        if world.is_none() {
            dispatcher.shutdown();
        }
        Self {
            visibility: VisibilitySet::new(options.render_distance_chunks),
            uploads: UploadScheduler::new(submissions, options.immediate_update_distance_squared),
            options,
            world,
            regions: HashSet::new(),
            dirty: DirtyTracker::new(),
            table: ChunkTable::default(),
            dispatcher,
            crashes,
            crash: None,
            resort_eye: None,
            resort_remaining: 0,
            resort_cursor: 0,
            frame: 0,
            all_done: false,
        }
    }

    /// Runs one frame of streaming for the given viewer, using `backend` for uploads.
    ///
    /// `frustum` is used for culling if [`StreamOptions::frustum_culling`] is enabled.
    /// `measured_fps` is the host's current frame rate, which together with
    /// [`StreamOptions::fps_limit`] decides how long uploads may take.
    pub fn update(
        &mut self,
        viewer: &Viewer,
        frustum: Option<&ViewFrustum>,
        measured_fps: f64,
        backend: &mut T::Backend,
    ) -> Result<StreamUpdateInfo, CrashReport> {
        let deadline = frame_deadline(Instant::now(), measured_fps, &self.options);
        self.update_with_deadline(viewer, frustum, deadline, backend)
    }

    /// [`Self::update()`] with an explicit deadline for uploads and dispatching.
    fn update_with_deadline(
        &mut self,
        viewer: &Viewer,
        frustum: Option<&ViewFrustum>,
        deadline: Deadline,
        backend: &mut T::Backend,
    ) -> Result<StreamUpdateInfo, CrashReport> {
        let start_time = Instant::now();

        if let Some(report) = &self.crash {
            return Err(report.clone());
        }
        if let Ok(report) = self.crashes.try_recv() {
            return Err(self.stop(report));
        }
        let Some(world) = self.world.clone() else {
            return Ok(StreamUpdateInfo::default());
        };
        self.frame += 1;
        self.dispatcher.prune();

        let position = viewer.render_position();
        let eye = viewer.eye_position();
        self.dispatcher.set_eye(Some(eye));
        // Nearness, and so build priority, is judged from the eye.
        let distance = |chunk: ChunkPos| chunk.center_distance_squared(eye);

        // Visibility
        let frustum = frustum.filter(|_| self.options.frustum_culling);
        let changes = self.visibility.refresh(
            &*world,
            &self.regions,
            position,
            viewer.look_direction,
            frustum,
            self.frame,
        );
        for &chunk in &changes.removed {
            self.table.remove(chunk);
            self.dirty.remove(chunk);
            self.dispatcher.cancel_chunk(chunk);
        }
        for &chunk in &changes.added {
            self.table.ensure(chunk);
            self.dirty.mark_chunk_dirty(chunk, false);
        }
        self.dirty.partition(
            self.visibility.visible(),
            distance,
            self.options.immediate_update_distance_squared,
        );
        let visibility_done_time = Instant::now();

        // Synchronous builds
        let mut sync_build_times = TimeStats::default();
        let mut last_time = visibility_done_time;
        for chunk in self.dirty.take_now() {
            if !self.visibility.is_tracked(chunk) {
                continue;
            }
            let built = self
                .dispatcher
                .update_chunk_now(&world, chunk, distance(chunk))
                .map_err(|report| self.stop(report))?;
            if let Some(submission) = built {
                self.uploads
                    .upload_now(submission, backend, &mut self.table)
                    .map_err(|report| self.stop(report))?;
            }
            sync_build_times.record_consecutive_interval(&mut last_time, Instant::now());
        }
        let sync_done_time = Instant::now();

        // Uploads
        let upload_stats = self
            .uploads
            .run_uploads(deadline, backend, &mut self.table)
            .map_err(|report| self.stop(report))?;
        let upload_done_time = Instant::now();

        // Dispatch. At least one chunk is queued per frame, however late it is.
        let dispatcher = &mut self.dispatcher;
        let mut out_of_time = false;
        let dispatched = self.dirty.take_later_while(|chunk| {
            if out_of_time || !dispatcher.update_chunk_later(&world, chunk, distance(chunk)) {
                return false;
            }
            out_of_time = deadline.is_reached(Instant::now());
            true
        });
        let resorts = self.resort_translucent(&world, eye);
        let end_time = Instant::now();

        let all_done = self.dirty.later().is_empty()
            && self.dispatcher.active_count() == 0
            && self.uploads.pending_chunk_count() == 0;
        if all_done && !self.all_done {
            log::debug!("all chunks done");
        }
        self.all_done = all_done;

        let info = StreamUpdateInfo {
            total_time: end_time.saturating_duration_since(start_time),
            visibility_time: visibility_done_time.saturating_duration_since(start_time),
            sync_build_times,
            upload_time: upload_done_time.saturating_duration_since(sync_done_time),
            dispatch_time: end_time.saturating_duration_since(upload_done_time),
            visible_chunks: self.visibility.visible().len(),
            uploads: upload_stats.uploaded,
            deferred_uploads: upload_stats.deferred,
            completed_chunks: upload_stats.completed,
            dispatched,
            resorts,
        };
        log::trace!(
            "frame {frame}: {total} total, {dispatched} dispatched, eye {eye}",
            frame = self.frame,
            total = info.total_time.refmt(&ConciseDebug),
            eye = eye.refmt(&ConciseDebug),
        );
        Ok(info)
    }

    /// Queues translucent re-sorts for visible chunks, if the eye has moved since the last
    /// pass began. A pass over all visible chunks may span several frames.
    fn resort_translucent(&mut self, world: &Arc<T::World>, eye: FreePoint) -> usize {
        let visible = self.visibility.visible();
        if visible.is_empty() {
            return 0;
        }
        let moved = self
            .resort_eye
            .is_none_or(|last| (eye - last).square_length() > RESORT_THRESHOLD_SQUARED);
        if moved {
            self.resort_eye = Some(eye);
            self.resort_remaining = visible.len();
            if self.options.translucent_resort_fairness == ResortFairness::NearestFirst {
                self.resort_cursor = 0;
            }
        }

        let count = visible.len();
        let start = self.resort_cursor % count;
        let mut started = 0;
        let mut examined = 0;
        while examined < self.resort_remaining.min(count)
            && started < self.options.translucent_resort_limit
        {
            let chunk = visible[(start + examined) % count];
            examined += 1;
            let Some(geometry) = self.table.get(chunk).and_then(ChunkRecord::geometry) else {
                continue;
            };
            let relative_eye = (eye - chunk.lower_corner().to_f64()).to_point();
            if (relative_eye - geometry.sorted_for()).square_length() <= RESORT_THRESHOLD_SQUARED {
                continue;
            }
            if self.dispatcher.update_transparency_later(
                world,
                chunk,
                chunk.center_distance_squared(eye),
                geometry.clone(),
            ) {
                started += 1;
            }
        }
        self.resort_remaining -= examined;
        self.resort_cursor = (start + examined) % count;
        started
    }

    /// Draws every visible chunk's buffers: each [`RenderLayer`] in order, then each
    /// [`OverlayKind`]. Opaque and cutout layers are drawn nearest first; translucent
    /// geometry and overlays are drawn farthest first.
    pub fn draw(&self, backend: &mut T::Backend) {
        let targets = RenderLayer::ALL
            .into_iter()
            .map(UploadTarget::Layer)
            .chain(OverlayKind::ALL.into_iter().map(UploadTarget::Overlay));
        for target in targets {
            let mut chunks = self
                .visibility
                .visible()
                .iter()
                .filter_map(|&chunk| Some((chunk, self.table.get(chunk)?.buffer(target)?)))
                .collect_vec();
            if chunks.is_empty() {
                continue;
            }
            if back_to_front(target) {
                chunks.reverse();
            }
            backend.draw(target, &chunks);
        }
    }

    /// Marks every chunk overlapping the cubes from `min` to `max` inclusive, and the chunks
    /// adjacent to those, as needing a rebuild.
    ///
    /// If `immediate` is true, the chunks are rebuilt synchronously when next visible,
    /// regardless of distance.
    ///
    /// Chunks which are not currently tracked are unaffected, since they are built from
    /// scratch when they become tracked.
    pub fn mark_region_dirty(&mut self, min: Cube, max: Cube, immediate: bool) {
        let count = self
            .dirty
            .mark_region_dirty(min, max, immediate, self.visibility.tracked());
        log::trace!("marked {count} chunks dirty");
    }

    /// Call when the viewer moved discontinuously, e.g. teleported, so that visibility is
    /// recomputed even if the move looks small.
    pub fn on_viewer_moved(&mut self) {
        self.visibility.invalidate();
        self.resort_eye = None;
    }

    /// Replaces the world being streamed. Every task is cancelled and all chunk state is
    /// forgotten. With [`None`], the build workers are stopped until a world is provided
    /// again.
    pub fn on_world_changed(&mut self, world: Option<Arc<T::World>>) {
        log::debug!(
            "world changed ({})",
            if world.is_some() { "attached" } else { "detached" }
        );
        match &world {
            Some(_) => self.dispatcher.restart(),
            None => self.dispatcher.shutdown(),
        }
        self.dispatcher.set_eye(None);
        self.uploads.clear();
        self.crashes.drain().for_each(drop);
        self.table.clear();
        self.visibility.clear();
        self.dirty.clear();
        self.resort_eye = None;
        self.resort_remaining = 0;
        self.all_done = false;
        self.world = world;
    }

    /// Sets the placement regions, which bound what is streamed at all. Every chunk they
    /// touch is rebuilt: tracked ones are marked dirty now, and the rest when they become
    /// tracked.
    pub fn set_regions(&mut self, regions: &[PlacementRegion]) {
        self.regions = touched_chunks(regions);
        for chunk in self.visibility.tracked() {
            if self.regions.contains(&chunk) {
                self.dirty.mark_chunk_dirty(chunk, false);
            }
        }
        self.visibility.invalidate_candidates();
    }

    /// Changes how far from the viewer, in chunks, geometry is kept. Chunks which end up
    /// beyond it are forgotten at the next update, and chunks newly within it are built.
    pub fn set_render_distance(&mut self, render_distance_chunks: GridCoordinate) {
        let mut options = self.options.clone();
        options.render_distance_chunks = render_distance_chunks;
        self.options = options.repair();
        self.visibility
            .set_render_distance(self.options.render_distance_chunks);
    }

    /// Forces visibility to be recomputed at the next update, e.g. because columns were
    /// loaded or unloaded.
    pub fn invalidate_visibility(&mut self) {
        self.visibility.invalidate();
    }

    /// Counts describing the current state, for display.
    pub fn debug_stats(&self) -> DebugStats {
        let visible = self.visibility.visible();
        DebugStats {
            rendered_chunk_count: visible
                .iter()
                .filter(|&&chunk| self.table.get(chunk).is_some_and(ChunkRecord::is_rendered))
                .count(),
            total_chunk_count: visible.len(),
            pending_upload_count: self.uploads.pending_upload_count(),
            queued_build_count: self.dispatcher.queued_count(),
            available_scratch_buffers: self.dispatcher.available_scratch_buffers(),
        }
    }

    /// Stops streaming because of `report`, which is returned from every later update.
    fn stop(&mut self, report: CrashReport) -> CrashReport {
        self.dispatcher.cancel_all();
        self.uploads.clear();
        self.crash = Some(report.clone());
        report
    }

    /// The world being streamed.
    pub fn world(&self) -> Option<&Arc<T::World>> {
        self.world.as_ref()
    }

    /// The options in effect, after repair.
    pub fn options(&self) -> &StreamOptions {
        &self.options
    }

    /// The records of tracked chunks.
    pub fn chunk_table(&self) -> &ChunkTable<<T::Backend as RenderBackend>::Buffer> {
        &self.table
    }

    /// Which chunks are tracked and visible.
    pub fn visibility(&self) -> &VisibilitySet {
        &self.visibility
    }

    /// Which chunks are waiting for a rebuild.
    pub fn dirty(&self) -> &DirtyTracker {
        &self.dirty
    }

    /// Uploads waiting for the render thread.
    pub fn uploads(&self) -> &UploadScheduler<T> {
        &self.uploads
    }

    /// The build task registry and workers.
    pub fn dispatcher(&self) -> &ChunkDispatcher<T> {
        &self.dispatcher
    }
}

fn back_to_front(target: UploadTarget) -> bool {
    matches!(
        target,
        UploadTarget::Layer(RenderLayer::Translucent) | UploadTarget::Overlay(_)
    )
}

impl<T: StreamTypes> fmt::Debug for StreamingCoordinator<T> {
    #[mutants::skip]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamingCoordinator")
            .field("options", &self.options)
            .field("world", &self.world)
            .field("regions", &self.regions.len())
            .field("visibility", &self.visibility)
            .field("dirty", &self.dirty)
            .field("dispatcher", &self.dispatcher)
            .field("uploads", &self.uploads)
            .field("crash", &self.crash)
            .field("frame", &self.frame)
            .finish_non_exhaustive()
    }
}

/// Performance info from a [`StreamingCoordinator::update()`].
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[non_exhaustive]
pub struct StreamUpdateInfo {
    /// Total time spent on the update.
    pub total_time: Duration,
    /// Time spent refreshing visibility and sorting dirty chunks.
    pub visibility_time: Duration,
    /// Time spent on each synchronous build and upload.
    pub sync_build_times: TimeStats,
    /// Time spent on uploads of chunks built in the background.
    pub upload_time: Duration,
    /// Time spent queueing builds and re-sorts.
    pub dispatch_time: Duration,

    /// Number of chunks in view.
    pub visible_chunks: usize,
    /// Number of background-built uploads performed.
    pub uploads: usize,
    /// Number of uploads left for a later frame.
    pub deferred_uploads: usize,
    /// Number of chunks whose new geometry was swapped in from background builds.
    pub completed_chunks: usize,
    /// Number of rebuilds queued for the workers.
    pub dispatched: usize,
    /// Number of translucent re-sorts queued.
    pub resorts: usize,
}

impl fmt::Display for StreamUpdateInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Self {
            total_time: _,
            visibility_time,
            sync_build_times,
            upload_time,
            dispatch_time,
            visible_chunks,
            uploads,
            deferred_uploads,
            completed_chunks,
            dispatched,
            resorts,
        } = self;
        writedoc!(
            f,
            "
            Visibility  {visibility_time}  {visible_chunks} chunks in view
            Sync build  {sync_build_times}
            Upload      {upload_time}  {uploads} done, {deferred_uploads} deferred, {completed_chunks} swapped
            Dispatch    {dispatch_time}  {dispatched} builds, {resorts} re-sorts\
            ",
            visibility_time = visibility_time.refmt(&ConciseDebug),
            upload_time = upload_time.refmt(&ConciseDebug),
            dispatch_time = dispatch_time.refmt(&ConciseDebug),
        )
    }
}

/// Counts from [`StreamingCoordinator::debug_stats()`].
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub struct DebugStats {
    /// Visible chunks with any geometry.
    pub rendered_chunk_count: usize,
    /// Visible chunks.
    pub total_chunk_count: usize,
    /// Uploads waiting for the render thread.
    pub pending_upload_count: usize,
    /// Builds waiting for a worker.
    pub queued_build_count: usize,
    /// Scratch buffers not in use.
    pub available_scratch_buffers: usize,
}

impl fmt::Display for DebugStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Self {
            rendered_chunk_count,
            total_chunk_count,
            pending_upload_count,
            queued_build_count,
            available_scratch_buffers,
        } = self;
        write!(
            f,
            "C: {rendered_chunk_count}/{total_chunk_count}, U: {pending_upload_count}, \
            Q: {queued_build_count}, B: {available_scratch_buffers}"
        )
    }
}
