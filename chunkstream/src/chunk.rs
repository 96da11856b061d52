//! Per-chunk records of what is currently drawable.

use std::sync::Arc;

use hashbrown::HashMap;

use crate::geometry::CompiledChunkGeometry;
use crate::layer::{BuildKind, TargetMap, UploadTarget};
use crate::math::ChunkPos;

/// The visible state of one chunk: its latest applied geometry and the backend buffers
/// holding it.
///
/// Geometry and buffers only ever change together, in [`ChunkRecord::apply()`], and only
/// to the output of a build newer than the one currently applied.
#[derive(Debug)]
pub struct ChunkRecord<B> {
    chunk: ChunkPos,
    geometry: Option<Arc<CompiledChunkGeometry>>,
    buffers: TargetMap<Option<B>>,
    /// Generation of the build whose output is applied; 0 if none.
    applied_generation: u64,
}

impl<B> ChunkRecord<B> {
    /// A record with no geometry yet.
    pub fn new(chunk: ChunkPos) -> Self {
        Self {
            chunk,
            geometry: None,
            buffers: TargetMap::from_fn(|_| None),
            applied_generation: 0,
        }
    }

    /// The chunk this record describes.
    pub fn chunk(&self) -> ChunkPos {
        self.chunk
    }

    /// The latest applied geometry, if any build has completed.
    pub fn geometry(&self) -> Option<&Arc<CompiledChunkGeometry>> {
        self.geometry.as_ref()
    }

    /// The backend buffer for the given target, if that target is non-empty.
    pub fn buffer(&self, target: UploadTarget) -> Option<&B> {
        self.buffers[target].as_ref()
    }

    /// Generation of the applied build, or 0 if there is none.
    pub fn applied_generation(&self) -> u64 {
        self.applied_generation
    }

    /// Whether this chunk has applied geometry with anything in it.
    pub fn is_rendered(&self) -> bool {
        self.geometry.as_ref().is_some_and(|g| !g.is_empty())
    }

    /// Swaps in the output of a completed build, unless a build at least as new has already
    /// been applied. Returns whether anything changed.
    ///
    /// A [`BuildKind::FullRebuild`] replaces every buffer (targets missing from `staged` become
    /// empty); a [`BuildKind::TransparencyResort`] replaces only the depth-sorted ones.
    pub(crate) fn apply(
        &mut self,
        kind: BuildKind,
        generation: u64,
        geometry: Arc<CompiledChunkGeometry>,
        mut staged: TargetMap<Option<B>>,
    ) -> bool {
        if generation <= self.applied_generation {
            return false;
        }
        for &target in kind.targets() {
            self.buffers[target] = staged[target].take();
        }
        self.geometry = Some(geometry);
        self.applied_generation = generation;
        true
    }
}

/// All [`ChunkRecord`]s of chunks which are, or recently were, visible.
#[derive(Debug)]
pub struct ChunkTable<B> {
    records: HashMap<ChunkPos, ChunkRecord<B>>,
}

impl<B> Default for ChunkTable<B> {
    fn default() -> Self {
        Self {
            records: HashMap::new(),
        }
    }
}

impl<B> ChunkTable<B> {
    /// Returns the record for `chunk`, if present.
    pub fn get(&self, chunk: ChunkPos) -> Option<&ChunkRecord<B>> {
        self.records.get(&chunk)
    }

    pub(crate) fn get_mut(&mut self, chunk: ChunkPos) -> Option<&mut ChunkRecord<B>> {
        self.records.get_mut(&chunk)
    }

    /// Adds an empty record for `chunk` if there is none. Returns whether one was added.
    pub(crate) fn ensure(&mut self, chunk: ChunkPos) -> bool {
        match self.records.entry(chunk) {
            hashbrown::hash_map::Entry::Occupied(_) => false,
            hashbrown::hash_map::Entry::Vacant(v) => {
                v.insert(ChunkRecord::new(chunk));
                true
            }
        }
    }

    pub(crate) fn remove(&mut self, chunk: ChunkPos) -> Option<ChunkRecord<B>> {
        self.records.remove(&chunk)
    }

    pub(crate) fn clear(&mut self) {
        self.records.clear();
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether there are no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Iterates over all records in arbitrary order.
    pub fn iter(&self) -> impl Iterator<Item = &ChunkRecord<B>> {
        self.records.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::RenderLayer;
    use pretty_assertions::assert_eq;

    const OPAQUE: UploadTarget = UploadTarget::Layer(RenderLayer::Opaque);
    const TRANSLUCENT: UploadTarget = UploadTarget::Layer(RenderLayer::Translucent);

    fn staged(values: &[(UploadTarget, &'static str)]) -> TargetMap<Option<&'static str>> {
        let mut map = TargetMap::default();
        for &(target, value) in values {
            map[target] = Some(value);
        }
        map
    }

    fn geometry() -> Arc<CompiledChunkGeometry> {
        Arc::new(CompiledChunkGeometry::empty(ChunkPos::new(0, 0, 0)))
    }

    #[test]
    fn older_generation_never_overwrites_newer() {
        let mut record = ChunkRecord::new(ChunkPos::new(0, 0, 0));
        assert!(record.apply(BuildKind::FullRebuild, 5, geometry(), staged(&[(OPAQUE, "new")])));
        assert!(!record.apply(BuildKind::FullRebuild, 3, geometry(), staged(&[(OPAQUE, "old")])));
        assert_eq!(record.buffer(OPAQUE), Some(&"new"));
        assert_eq!(record.applied_generation(), 5);
    }

    #[test]
    fn resort_replaces_only_sorted_targets() {
        let mut record = ChunkRecord::new(ChunkPos::new(0, 0, 0));
        record.apply(
            BuildKind::FullRebuild,
            1,
            geometry(),
            staged(&[(OPAQUE, "opaque"), (TRANSLUCENT, "glass 1")]),
        );
        record.apply(
            BuildKind::TransparencyResort,
            2,
            geometry(),
            staged(&[(TRANSLUCENT, "glass 2")]),
        );
        assert_eq!(record.buffer(OPAQUE), Some(&"opaque"));
        assert_eq!(record.buffer(TRANSLUCENT), Some(&"glass 2"));

        // A full rebuild clears targets it has no geometry for.
        record.apply(BuildKind::FullRebuild, 3, geometry(), staged(&[(OPAQUE, "opaque 2")]));
        assert_eq!(record.buffer(TRANSLUCENT), None);
        assert!(!record.is_rendered());
    }

    #[test]
    fn table_ensure_is_idempotent() {
        let mut table = ChunkTable::<()>::default();
        assert!(table.ensure(ChunkPos::new(1, 2, 3)));
        assert!(!table.ensure(ChunkPos::new(1, 2, 3)));
        assert_eq!(table.len(), 1);
        assert!(table.remove(ChunkPos::new(1, 2, 3)).is_some());
        assert!(table.is_empty());
    }
}
