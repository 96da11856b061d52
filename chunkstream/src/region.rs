//! Placement regions: the parts of the world that have anything to stream at all.

use hashbrown::HashSet;

use crate::math::{ChunkPos, GridAab, chunks_overlapping};

/// How a region's contents are oriented relative to their source. Carried through
/// unexamined; the pipeline only ever looks at the bounds of a region.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[expect(clippy::exhaustive_structs)]
pub struct RegionTransform {
    /// Quarter turns about the vertical axis, 0 to 3.
    pub rotation: u8,
    /// Whether the contents are mirrored.
    pub mirror: bool,
}

/// An axis-aligned box of the world whose contents are to be shown.
///
/// Only chunks overlapping some placement region are candidates for streaming.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[expect(clippy::exhaustive_structs)]
pub struct PlacementRegion {
    /// The cubes the region covers.
    pub bounds: GridAab,
    /// Orientation metadata.
    pub transform: RegionTransform,
}

impl PlacementRegion {
    /// A region with the identity transform.
    pub fn new(bounds: GridAab) -> Self {
        Self {
            bounds,
            transform: RegionTransform::default(),
        }
    }

    /// The chunks this region overlaps.
    pub fn chunks(&self) -> impl Iterator<Item = ChunkPos> + use<> {
        chunks_overlapping(self.bounds)
            .interior_iter()
            .map(ChunkPos)
    }

    /// The part of this region which lies within `chunk`, or [`None`] if they do not
    /// overlap.
    pub fn bounds_within_chunk(&self, chunk: ChunkPos) -> Option<GridAab> {
        self.bounds.intersection_cubes(chunk.bounds())
    }
}

/// Returns the set of chunks overlapping any of `regions`.
pub fn touched_chunks<'a>(regions: impl IntoIterator<Item = &'a PlacementRegion>) -> HashSet<ChunkPos> {
    regions
        .into_iter()
        .flat_map(PlacementRegion::chunks)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::Cube;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[test]
    fn touched_chunks_union() {
        let regions = [
            PlacementRegion::new(GridAab::from_corner_cubes(
                Cube::new(0, 0, 0),
                Cube::new(17, 3, 3),
            )),
            PlacementRegion::new(GridAab::from_corner_cubes(
                Cube::new(16, 0, 0),
                Cube::new(16, 0, 0),
            )),
            PlacementRegion::new(GridAab::from_corner_cubes(
                Cube::new(-1, -1, -1),
                Cube::new(-1, -1, -1),
            )),
        ];
        let mut chunks: Vec<ChunkPos> = touched_chunks(&regions).into_iter().collect();
        chunks.sort_by_key(|c| (c.0.x, c.0.y, c.0.z));
        assert_eq!(
            chunks,
            vec![
                ChunkPos::new(-1, -1, -1),
                ChunkPos::new(0, 0, 0),
                ChunkPos::new(1, 0, 0),
            ]
        );
    }

    #[rstest]
    #[case::inside(ChunkPos::new(0, 0, 0), Some(([4, 0, 0], [16, 8, 8])))]
    #[case::partial(ChunkPos::new(1, 0, 0), Some(([16, 0, 0], [21, 8, 8])))]
    #[case::outside(ChunkPos::new(2, 0, 0), None)]
    fn bounds_within_chunk(
        #[case] chunk: ChunkPos,
        #[case] expected: Option<([i32; 3], [i32; 3])>,
    ) {
        let region = PlacementRegion::new(GridAab::from_lower_upper([4, 0, 0], [21, 8, 8]));
        assert_eq!(
            region.bounds_within_chunk(chunk),
            expected.map(|(l, u)| GridAab::from_lower_upper(l, u))
        );
    }
}
