//! Tracking which chunks need their geometry rebuilt.

use hashbrown::{HashMap, HashSet};
use ordered_float::OrderedFloat;

use crate::math::{ChunkPos, Cube, GridAab, chunks_overlapping};

/// Records which chunks need rebuilding, and sorts the visible ones among them into
/// those to rebuild right away and those to hand to the workers, closest first.
///
/// A chunk goes through up to two stages here:
///
/// 1. *pending*: marked dirty, not yet considered. Chunks stay pending while they are
///    tracked but not visible, and are forgotten when they stop being tracked.
/// 2. Once visible, [`DirtyTracker::partition()`] moves it to exactly one of *now*
///    (near the viewer or marked immediate) or *later*.
#[derive(Debug, Default)]
pub struct DirtyTracker {
    /// Value is whether an immediate rebuild was requested.
    pending: HashMap<ChunkPos, bool>,
    now: Vec<ChunkPos>,
    /// Sorted by distance from the viewer as of the last [`Self::partition()`].
    later: Vec<ChunkPos>,
    later_set: HashSet<ChunkPos>,
}

impl DirtyTracker {
    /// Creates an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks one chunk as needing a rebuild. `immediate` requests that it be rebuilt
    /// synchronously regardless of distance; once requested, it sticks until the chunk is
    /// partitioned.
    pub fn mark_chunk_dirty(&mut self, chunk: ChunkPos, immediate: bool) {
        *self.pending.entry(chunk).or_insert(false) |= immediate;
    }

    /// Marks as needing a rebuild every chunk in `tracked` which overlaps the box between
    /// the corner cubes `min` and `max` (inclusive), or shares a face with such a chunk,
    /// since block geometry depends on neighboring blocks.
    ///
    /// Chunks outside `tracked` are ignored, as they are built anyway once they become
    /// tracked. This also keeps the cost independent of the size of the box.
    ///
    /// Returns the number of chunks marked.
    pub fn mark_region_dirty(
        &mut self,
        min: Cube,
        max: Cube,
        immediate: bool,
        tracked: impl IntoIterator<Item = ChunkPos>,
    ) -> usize {
        let chunk_box = chunks_overlapping(GridAab::from_corner_cubes(min, max));
        let mut count = 0;
        for chunk in tracked {
            if in_or_beside(chunk_box, chunk) {
                self.mark_chunk_dirty(chunk, immediate);
                count += 1;
            }
        }
        count
    }

    /// Moves every pending chunk in `visible` into the *now* or *later* partition.
    ///
    /// A chunk goes to *now* if it was marked immediate or `distance_squared(chunk)` is
    /// below `near_threshold_squared`. Afterward, *later* is sorted closest first; chunks
    /// at equal distance keep their previous order.
    pub fn partition(
        &mut self,
        visible: &[ChunkPos],
        distance_squared: impl Fn(ChunkPos) -> f64,
        near_threshold_squared: f64,
    ) {
        for &chunk in visible {
            let Some(immediate) = self.pending.remove(&chunk) else {
                continue;
            };
            if immediate || distance_squared(chunk) < near_threshold_squared {
                if self.later_set.remove(&chunk) {
                    self.later.retain(|&c| c != chunk);
                }
                if !self.now.contains(&chunk) {
                    self.now.push(chunk);
                }
            } else if self.later_set.insert(chunk) {
                self.later.push(chunk);
            }
        }
        self.later
            .sort_by_cached_key(|&chunk| OrderedFloat(distance_squared(chunk)));
    }

    /// Removes and returns the *now* partition.
    pub fn take_now(&mut self) -> Vec<ChunkPos> {
        core::mem::take(&mut self.now)
    }

    /// The *later* partition, closest first.
    pub fn later(&self) -> &[ChunkPos] {
        &self.later
    }

    /// Calls `f` on *later* chunks in order, removing each one for which it returns true,
    /// and stopping at the first for which it returns false (which stays queued).
    ///
    /// Returns the number of chunks removed.
    pub fn take_later_while(&mut self, mut f: impl FnMut(ChunkPos) -> bool) -> usize {
        let taken = self.later.iter().take_while(|&&chunk| f(chunk)).count();
        for chunk in self.later.drain(..taken) {
            self.later_set.remove(&chunk);
        }
        taken
    }

    /// Forgets `chunk` entirely, e.g. because it stopped being tracked.
    pub fn remove(&mut self, chunk: ChunkPos) {
        self.pending.remove(&chunk);
        self.now.retain(|&c| c != chunk);
        if self.later_set.remove(&chunk) {
            self.later.retain(|&c| c != chunk);
        }
    }

    /// Forgets every chunk.
    pub fn clear(&mut self) {
        self.pending.clear();
        self.now.clear();
        self.later.clear();
        self.later_set.clear();
    }

    /// Whether `chunk` is in any stage.
    pub fn is_dirty(&self, chunk: ChunkPos) -> bool {
        self.pending.contains_key(&chunk)
            || self.later_set.contains(&chunk)
            || self.now.contains(&chunk)
    }

    /// Total number of chunks in any stage.
    pub fn len(&self) -> usize {
        self.pending.len() + self.now.len() + self.later.len()
    }

    /// Whether no chunk needs rebuilding.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Whether `chunk` is inside `chunk_box` or shares a face with it. Edge and corner
/// neighbors do not count.
fn in_or_beside(chunk_box: GridAab, ChunkPos(cube): ChunkPos) -> bool {
    if chunk_box.contains_cube(cube) {
        return true;
    }
    let mut axes_beside = 0;
    for (c, range) in [
        (cube.x, chunk_box.x_range()),
        (cube.y, chunk_box.y_range()),
        (cube.z, chunk_box.z_range()),
    ] {
        if range.contains(&c) {
            continue;
        }
        if c.checked_add(1) == Some(range.start) || c == range.end {
            axes_beside += 1;
        } else {
            return false;
        }
    }
    axes_beside == 1
}
