//! Deciding which chunks are tracked and which are drawn.

use hashbrown::{HashMap, HashSet};
use ordered_float::OrderedFloat;

use crate::PreviewWorld;
use crate::math::{
    Aab, ChunkPos, FreeCoordinate, FreePoint, FreeVector, GridCoordinate, GridPoint, ViewFrustum,
    point_to_chunk,
};

/// Distance the viewer must move, squared, before the visible set is recomputed.
const MOVE_THRESHOLD_SQUARED: FreeCoordinate = 16.0;

/// Distance the viewer's chunk must move on X or Z before the candidate set is recomputed.
const CANDIDATE_ORIGIN_THRESHOLD: GridCoordinate = 32;

/// Candidates extend this many chunks beyond the render distance, so that small movements
/// need not recompute them.
const CANDIDATE_MARGIN_CHUNKS: GridCoordinate = 2;

/// Where the viewer is, for one frame.
#[derive(Clone, Copy, Debug, PartialEq)]
#[expect(clippy::exhaustive_structs)]
pub struct Viewer {
    /// Position as of the latest simulation tick.
    pub position: FreePoint,
    /// Position as of the tick before that.
    pub previous_position: FreePoint,
    /// Direction of view. Need not be normalized.
    pub look_direction: FreeVector,
    /// Height of the eye above `position`.
    pub eye_height: FreeCoordinate,
    /// Fraction of the way from the previous tick to the latest that this frame shows.
    pub partial_ticks: FreeCoordinate,
}

impl Viewer {
    /// A viewer standing still at `position`, with its eye at that position.
    pub fn new(position: FreePoint, look_direction: FreeVector) -> Self {
        Self {
            position,
            previous_position: position,
            look_direction,
            eye_height: 0.0,
            partial_ticks: 1.0,
        }
    }

    /// Interpolates between the previous and latest positions. `partial` of 0 is the
    /// previous position and 1 is the latest.
    pub fn interpolated(&self, partial: FreeCoordinate) -> FreePoint {
        self.previous_position.lerp(self.position, partial)
    }

    /// Position for this frame.
    pub fn render_position(&self) -> FreePoint {
        self.interpolated(self.partial_ticks)
    }

    /// Position of the eye for this frame, which is what translucent geometry is sorted for.
    pub fn eye_position(&self) -> FreePoint {
        self.render_position() + FreeVector::new(0.0, self.eye_height, 0.0)
    }
}

/// Bookkeeping for one tracked chunk.
#[derive(Clone, Copy, Debug, PartialEq)]
#[non_exhaustive]
pub struct VisibilityEntry {
    /// Volume of the chunk, as used for frustum tests.
    pub bounds: Aab,
    /// The most recent frame in which the chunk was in the visible set, or the frame it
    /// became tracked if it never has been.
    pub last_seen_frame: u64,
}

/// Changes to the tracked set made by one [`VisibilitySet::refresh()`].
#[derive(Clone, Debug, Default, PartialEq)]
#[non_exhaustive]
pub struct VisibilityChanges {
    /// Chunks which became tracked, nearest first.
    pub added: Vec<ChunkPos>,
    /// Chunks which stopped being tracked.
    pub removed: Vec<ChunkPos>,
    /// Whether the visible list was recomputed at all.
    pub recomputed: bool,
}

/// Which chunks are worth keeping geometry for, and which of those to draw this frame.
///
/// There are three nested sets:
///
/// * *candidates*: chunks touched by a placement region within the render distance plus a
///   margin. Recomputed only when the viewer moves far or the regions change.
/// * *tracked*: candidates within the render distance whose column is loaded. Each of these
///   has a [`VisibilityEntry`], and (elsewhere) a chunk record.
/// * *visible*: tracked chunks intersecting the view frustum, nearest first.
#[derive(Debug)]
pub struct VisibilitySet {
    render_distance: GridCoordinate,

    candidates: Vec<ChunkPos>,
    /// Lower corner of the viewer's chunk when `candidates` were computed,
    /// or [`None`] if they need computing.
    candidate_origin: Option<GridPoint>,

    entries: HashMap<ChunkPos, VisibilityEntry>,
    visible: Vec<ChunkPos>,

    /// Viewer state when `visible` was computed, or [`None`] if it needs computing.
    last_view: Option<(ChunkPos, FreePoint, FreeVector)>,
}

impl VisibilitySet {
    /// Creates an empty set which will track chunks within `render_distance` chunks.
    pub fn new(render_distance: GridCoordinate) -> Self {
        Self {
            render_distance,
            candidates: Vec::new(),
            candidate_origin: None,
            entries: HashMap::new(),
            visible: Vec::new(),
            last_view: None,
        }
    }

    /// Brings the set up to date with the viewer, if the viewer has changed enough since
    /// the last refresh (or something was invalidated), and records `frame` as the
    /// last-seen frame of every visible chunk.
    ///
    /// `regions` is the set of chunks touched by placement regions; it is only read when the
    /// candidates need recomputing.
    pub fn refresh<W: PreviewWorld>(
        &mut self,
        world: &W,
        regions: &HashSet<ChunkPos>,
        position: FreePoint,
        view_direction: FreeVector,
        frustum: Option<&ViewFrustum>,
        frame: u64,
    ) -> VisibilityChanges {
        let mut changes = VisibilityChanges::default();
        let Some(viewer_chunk) = point_to_chunk(position) else {
            return changes;
        };
        let origin = viewer_chunk.lower_corner();

        let candidates_stale = self.candidate_origin.is_none_or(|old| {
            (origin.x - old.x).abs() > CANDIDATE_ORIGIN_THRESHOLD
                || (origin.z - old.z).abs() > CANDIDATE_ORIGIN_THRESHOLD
        });
        if candidates_stale {
            self.recompute_candidates(regions, viewer_chunk, position);
            self.candidate_origin = Some(origin);
            self.last_view = None;
        }

        let view_stale = self.last_view.is_none_or(|(chunk, old_position, direction)| {
            chunk != viewer_chunk
                || (position - old_position).square_length() > MOVE_THRESHOLD_SQUARED
                || direction != view_direction
        });
        if view_stale {
            self.recompute_visible(world, viewer_chunk, position, frustum, frame, &mut changes);
            self.last_view = Some((viewer_chunk, position, view_direction));
            changes.recomputed = true;
        }

        for chunk in &self.visible {
            if let Some(entry) = self.entries.get_mut(chunk) {
                entry.last_seen_frame = frame;
            }
        }
        changes
    }

    fn recompute_candidates(
        &mut self,
        regions: &HashSet<ChunkPos>,
        viewer_chunk: ChunkPos,
        position: FreePoint,
    ) {
        let limit = self.render_distance.saturating_add(CANDIDATE_MARGIN_CHUNKS);
        self.candidates.clear();
        self.candidates.extend(
            regions
                .iter()
                .copied()
                .filter(|&chunk| chunk.horizontal_chebyshev_distance(viewer_chunk) <= limit),
        );
        // Coordinates break ties so that the order does not depend on hashing.
        self.candidates.sort_by_cached_key(|&chunk| {
            let ChunkPos(cube) = chunk;
            (
                OrderedFloat(chunk.center_distance_squared(position)),
                cube.x,
                cube.y,
                cube.z,
            )
        });
    }

    fn recompute_visible<W: PreviewWorld>(
        &mut self,
        world: &W,
        viewer_chunk: ChunkPos,
        position: FreePoint,
        frustum: Option<&ViewFrustum>,
        frame: u64,
        changes: &mut VisibilityChanges,
    ) {
        let render_distance = self.render_distance;
        let tracked: Vec<ChunkPos> = self
            .candidates
            .iter()
            .copied()
            .filter(|&chunk| {
                let [x, z] = chunk.column();
                chunk.horizontal_chebyshev_distance(viewer_chunk) <= render_distance
                    && world.is_chunk_loaded(x, z)
            })
            .collect();
        let tracked_set: HashSet<ChunkPos> = tracked.iter().copied().collect();

        self.entries.retain(|chunk, _| {
            let keep = tracked_set.contains(chunk);
            if !keep {
                changes.removed.push(*chunk);
            }
            keep
        });

        self.visible.clear();
        for chunk in tracked {
            let entry = self.entries.entry(chunk).or_insert_with(|| {
                changes.added.push(chunk);
                VisibilityEntry {
                    bounds: chunk.bounds().to_free(),
                    last_seen_frame: frame,
                }
            });
            if frustum.is_none_or(|frustum| frustum.aab_in_view(entry.bounds)) {
                self.visible.push(chunk);
            }
        }
        // Candidates were sorted for where the viewer was then.
        self.visible
            .sort_by_cached_key(|chunk| OrderedFloat(chunk.center_distance_squared(position)));
    }

    /// Chunks to draw this frame, nearest first.
    pub fn visible(&self) -> &[ChunkPos] {
        &self.visible
    }

    /// Whether `chunk` is tracked.
    pub fn is_tracked(&self, chunk: ChunkPos) -> bool {
        self.entries.contains_key(&chunk)
    }

    /// Bookkeeping for a tracked chunk.
    pub fn entry(&self, chunk: ChunkPos) -> Option<&VisibilityEntry> {
        self.entries.get(&chunk)
    }

    /// Number of tracked chunks.
    pub fn tracked_count(&self) -> usize {
        self.entries.len()
    }

    /// Every tracked chunk, in no particular order.
    pub fn tracked(&self) -> impl Iterator<Item = ChunkPos> + '_ {
        self.entries.keys().copied()
    }

    /// The render distance in chunks.
    pub fn render_distance(&self) -> GridCoordinate {
        self.render_distance
    }

    /// Changes the render distance, taking effect at the next refresh.
    pub fn set_render_distance(&mut self, render_distance: GridCoordinate) {
        if render_distance != self.render_distance {
            self.render_distance = render_distance;
            self.invalidate_candidates();
        }
    }

    /// Forces the visible set to be recomputed at the next refresh, e.g. because a column
    /// was loaded or unloaded.
    pub fn invalidate(&mut self) {
        self.last_view = None;
    }

    /// Forces the candidate set to be recomputed at the next refresh, e.g. because the
    /// placement regions changed.
    pub fn invalidate_candidates(&mut self) {
        self.candidate_origin = None;
        self.last_view = None;
    }

    /// Forgets everything, returning the chunks which were tracked.
    pub fn clear(&mut self) -> Vec<ChunkPos> {
        self.candidates.clear();
        self.visible.clear();
        self.invalidate_candidates();
        self.entries.drain().map(|(chunk, _)| chunk).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::Plane;
    use crate::testing::TestWorld;
    use pretty_assertions::assert_eq;

    fn regions(chunks: impl IntoIterator<Item = ChunkPos>) -> HashSet<ChunkPos> {
        chunks.into_iter().collect()
    }

    fn row(xs: core::ops::RangeInclusive<i32>) -> HashSet<ChunkPos> {
        regions(xs.map(|x| ChunkPos::new(x, 0, 0)))
    }

    fn center_of(chunk: ChunkPos) -> FreePoint {
        chunk.center()
    }

    const FORWARD: FreeVector = FreeVector::new(0.0, 0.0, -1.0);

    #[test]
    fn viewer_interpolation() {
        let viewer = Viewer {
            position: FreePoint::new(10.0, 0.0, 0.0),
            previous_position: FreePoint::new(0.0, 0.0, 0.0),
            look_direction: FORWARD,
            eye_height: 1.5,
            partial_ticks: 0.25,
        };
        assert_eq!(viewer.render_position(), FreePoint::new(2.5, 0.0, 0.0));
        assert_eq!(viewer.eye_position(), FreePoint::new(2.5, 1.5, 0.0));
        assert_eq!(viewer.interpolated(1.0), viewer.position);
    }

    #[test]
    fn tracks_within_render_distance_nearest_first() {
        let world = TestWorld::new();
        let mut set = VisibilitySet::new(2);
        let changes = set.refresh(
            &world,
            &row(-5..=5),
            center_of(ChunkPos::new(0, 0, 0)),
            FORWARD,
            None,
            1,
        );
        assert!(changes.recomputed);
        assert_eq!(changes.added.len(), 5);
        assert_eq!(changes.added[0], ChunkPos::new(0, 0, 0));
        assert_eq!(set.visible()[0], ChunkPos::new(0, 0, 0));
        assert_eq!(set.tracked_count(), 5);
        assert!(set.is_tracked(ChunkPos::new(-2, 0, 0)));
        assert!(!set.is_tracked(ChunkPos::new(3, 0, 0)));
    }

    #[test]
    fn small_moves_do_not_recompute() {
        let world = TestWorld::new();
        let mut set = VisibilitySet::new(2);
        let regions = row(-5..=5);
        let start = center_of(ChunkPos::new(0, 0, 0));
        set.refresh(&world, &regions, start, FORWARD, None, 1);

        let changes = set.refresh(
            &world,
            &regions,
            start + FreeVector::new(3.0, 0.0, 0.0),
            FORWARD,
            None,
            2,
        );
        assert!(!changes.recomputed);
        assert_eq!(set.entry(ChunkPos::new(0, 0, 0)).unwrap().last_seen_frame, 2);

        // Turning recomputes.
        let changes = set.refresh(
            &world,
            &regions,
            start,
            FreeVector::new(1.0, 0.0, 0.0),
            None,
            3,
        );
        assert!(changes.recomputed);
        assert!(changes.added.is_empty());
    }

    #[test]
    fn moving_chunks_adds_and_removes() {
        let world = TestWorld::new();
        let mut set = VisibilitySet::new(1);
        let regions = row(-5..=5);
        set.refresh(&world, &regions, center_of(ChunkPos::new(0, 0, 0)), FORWARD, None, 1);
        let changes = set.refresh(
            &world,
            &regions,
            center_of(ChunkPos::new(1, 0, 0)),
            FORWARD,
            None,
            2,
        );
        assert_eq!(changes.added, vec![ChunkPos::new(2, 0, 0)]);
        assert_eq!(changes.removed, vec![ChunkPos::new(-1, 0, 0)]);
    }

    #[test]
    fn unloaded_columns_are_not_tracked() {
        let world = TestWorld::new();
        world.set_column_loaded(1, 0, false);
        let mut set = VisibilitySet::new(2);
        set.refresh(&world, &row(-2..=2), center_of(ChunkPos::new(0, 0, 0)), FORWARD, None, 1);
        assert!(!set.is_tracked(ChunkPos::new(1, 0, 0)));
        assert_eq!(set.tracked_count(), 4);

        world.set_column_loaded(1, 0, true);
        set.invalidate();
        let changes = set.refresh(
            &world,
            &row(-2..=2),
            center_of(ChunkPos::new(0, 0, 0)),
            FORWARD,
            None,
            2,
        );
        assert_eq!(changes.added, vec![ChunkPos::new(1, 0, 0)]);
    }

    #[test]
    fn frustum_limits_visible_but_not_tracked() {
        let world = TestWorld::new();
        let mut set = VisibilitySet::new(3);
        // Only the half-space x >= 0.5.
        let half = Plane::through_point(FreePoint::new(0.5, 0.0, 0.0), FreeVector::new(1.0, 0.0, 0.0));
        let mut planes = *ViewFrustum::EVERYTHING.planes();
        planes[0] = half;
        let frustum = ViewFrustum::from_planes(planes);

        set.refresh(
            &world,
            &row(-3..=3),
            FreePoint::new(0.5, 8.0, 8.0),
            FORWARD,
            Some(&frustum),
            1,
        );
        assert_eq!(set.tracked_count(), 7);
        assert_eq!(
            set.visible(),
            [
                ChunkPos::new(0, 0, 0),
                ChunkPos::new(1, 0, 0),
                ChunkPos::new(2, 0, 0),
                ChunkPos::new(3, 0, 0),
            ]
        );
    }

    #[test]
    fn candidates_cover_margin_until_far_move() {
        let world = TestWorld::new();
        let mut set = VisibilitySet::new(1);
        let regions = row(-10..=10);
        set.refresh(&world, &regions, center_of(ChunkPos::new(0, 0, 0)), FORWARD, None, 1);
        // Moving one chunk keeps the candidates, which reach 3 chunks out.
        set.refresh(&world, &regions, center_of(ChunkPos::new(1, 0, 0)), FORWARD, None, 2);
        assert!(set.is_tracked(ChunkPos::new(2, 0, 0)));
        // Moving 64 cubes from where they were computed recomputes them.
        let far = center_of(ChunkPos::new(4, 0, 0));
        set.refresh(&world, &regions, far, FORWARD, None, 3);
        assert!(set.is_tracked(ChunkPos::new(5, 0, 0)));
        assert!(set.is_tracked(ChunkPos::new(3, 0, 0)));
        assert_eq!(set.tracked_count(), 3);
    }

    #[test]
    fn clear_returns_tracked() {
        let world = TestWorld::new();
        let mut set = VisibilitySet::new(1);
        set.refresh(&world, &row(0..=0), center_of(ChunkPos::new(0, 0, 0)), FORWARD, None, 1);
        assert_eq!(set.clear(), vec![ChunkPos::new(0, 0, 0)]);
        assert_eq!(set.tracked_count(), 0);
        assert!(set.visible().is_empty());
    }
}
