//! Vertex data and compiled per-chunk geometry.

use std::sync::Arc;

use ordered_float::OrderedFloat;

use crate::error::BuildError;
use crate::layer::{TargetMap, UploadTarget};
use crate::math::{ChunkPos, FreePoint};
use crate::scratch::ScratchBuffer;

/// A single vertex of chunk geometry, in chunk-relative coordinates.
///
/// Geometry is always made of quads: each consecutive group of four vertices is one quad,
/// and depth sorting moves quads as units.
#[derive(Clone, Copy, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
#[expect(clippy::exhaustive_structs)]
pub struct Vertex {
    /// Position relative to the chunk's lowest corner, in cube units.
    pub position: [f32; 3],
    /// Linear RGBA color.
    pub color: [f32; 4],
}

/// Number of vertices in one quad.
const QUAD_VERTICES: usize = 4;

/// Destination for the geometry of one chunk, handed to a
/// [`BlockMesher`](crate::BlockMesher) for each block in the chunk.
#[derive(Debug)]
pub struct MeshSink<'a> {
    pub(crate) buffer: &'a mut ScratchBuffer,
    pub(crate) chunk: ChunkPos,
}

impl MeshSink<'_> {
    /// The chunk being built. Vertex positions are relative to its lowest corner.
    pub fn chunk(&self) -> ChunkPos {
        self.chunk
    }

    /// Appends one quad to the given target.
    pub fn push_quad(&mut self, target: UploadTarget, quad: [Vertex; 4]) {
        self.buffer.vertices_mut(target).extend_from_slice(&quad);
    }
}

/// Reorders the quads in `vertices` so that the quad whose center is farthest from `eye`
/// comes first. `eye` is in the same coordinate system as the vertex positions.
///
/// The sort is stable, so sorting already-sorted geometry again for the same eye position
/// changes nothing.
///
/// Returns an error if the number of vertices is not a multiple of four.
pub fn sort_quads_back_to_front(vertices: &mut [Vertex], eye: [f32; 3]) -> Result<(), BuildError> {
    let count = vertices.len();
    let quads: &mut [[Vertex; QUAD_VERTICES]] = bytemuck::try_cast_slice_mut(vertices)
        .map_err(|_| {
            BuildError::new(format!("vertex count {count} is not a whole number of quads"))
        })?;
    quads.sort_by_cached_key(|quad| {
        let center = quad.iter().fold([0.0f32; 3], |mut sum, v| {
            for (s, p) in sum.iter_mut().zip(v.position) {
                *s += p / QUAD_VERTICES as f32;
            }
            sum
        });
        let distance_squared: f32 = center.iter().zip(eye).map(|(c, e)| (c - e).powi(2)).sum();
        core::cmp::Reverse(OrderedFloat(distance_squared))
    });
    Ok(())
}

/// The result of compiling one chunk: which targets have geometry, and a retained copy of
/// the depth-sorted targets' quads so that they can be re-sorted later without rebuilding.
///
/// Immutable once produced; replaces the chunk's previous geometry as a whole.
#[derive(Clone, Debug, PartialEq)]
pub struct CompiledChunkGeometry {
    chunk: ChunkPos,
    vertex_counts: TargetMap<usize>,
    /// Present only for [`UploadTarget::is_depth_sorted()`] targets which are nonempty.
    sortable: TargetMap<Option<Arc<[Vertex]>>>,
    /// Eye position, relative to the chunk, that the depth-sorted targets are sorted for.
    sorted_for: [f32; 3],
}

impl CompiledChunkGeometry {
    /// Geometry with nothing in any target.
    pub fn empty(chunk: ChunkPos) -> Self {
        Self {
            chunk,
            vertex_counts: TargetMap::default(),
            sortable: TargetMap::default(),
            sorted_for: [0.0; 3],
        }
    }

    /// Captures the contents of a filled scratch buffer. Only the targets listed in
    /// `targets` are taken from the buffer; the others are copied from `previous`.
    pub(crate) fn from_buffer(
        chunk: ChunkPos,
        buffer: &ScratchBuffer,
        targets: &[UploadTarget],
        previous: Option<&CompiledChunkGeometry>,
        sorted_for: [f32; 3],
    ) -> Self {
        let mut geometry = match previous {
            Some(previous) => previous.clone(),
            None => Self::empty(chunk),
        };
        for &target in targets {
            let vertices = buffer.vertices(target);
            geometry.vertex_counts[target] = vertices.len();
            if target.is_depth_sorted() {
                geometry.sortable[target] = if vertices.is_empty() {
                    None
                } else {
                    Some(Arc::from(vertices))
                };
            }
        }
        geometry.sorted_for = sorted_for;
        geometry
    }

    /// The chunk this geometry belongs to.
    pub fn chunk(&self) -> ChunkPos {
        self.chunk
    }

    /// Whether the given target has no geometry.
    pub fn is_empty_for(&self, target: UploadTarget) -> bool {
        self.vertex_counts[target] == 0
    }

    /// Whether every target is empty.
    pub fn is_empty(&self) -> bool {
        self.vertex_counts.iter().all(|(_, &count)| count == 0)
    }

    /// Number of vertices in the given target.
    pub fn vertex_count(&self, target: UploadTarget) -> usize {
        self.vertex_counts[target]
    }

    /// Whether any depth-sorted target has geometry, so that a
    /// [`BuildKind::TransparencyResort`](crate::BuildKind::TransparencyResort) would do
    /// anything.
    pub fn has_depth_sorted_geometry(&self) -> bool {
        UploadTarget::DEPTH_SORTED
            .iter()
            .any(|&target| !self.is_empty_for(target))
    }

    /// The retained quads of a depth-sorted target, in their current order.
    pub fn sortable_vertices(&self, target: UploadTarget) -> &[Vertex] {
        self.sortable[target].as_deref().unwrap_or(&[])
    }

    /// The chunk-relative eye position the depth-sorted targets were last sorted for.
    pub fn sorted_for(&self) -> FreePoint {
        let [x, y, z] = self.sorted_for;
        FreePoint::new(x.into(), y.into(), z.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::RenderLayer;
    use pretty_assertions::assert_eq;

    fn quad_at_z(z: f32, color: f32) -> [Vertex; 4] {
        let v = |x: f32, y: f32| Vertex {
            position: [x, y, z],
            color: [color, 0.0, 0.0, 0.5],
        };
        [v(0.0, 0.0), v(1.0, 0.0), v(1.0, 1.0), v(0.0, 1.0)]
    }

    fn quad_colors(vertices: &[Vertex]) -> Vec<f32> {
        vertices.chunks(4).map(|q| q[0].color[0]).collect()
    }

    #[test]
    fn sort_puts_farthest_first() {
        let mut vertices: Vec<Vertex> = [quad_at_z(1.0, 1.0), quad_at_z(9.0, 9.0), quad_at_z(5.0, 5.0)]
            .concat();
        sort_quads_back_to_front(&mut vertices, [0.5, 0.5, 0.0]).unwrap();
        assert_eq!(quad_colors(&vertices), vec![9.0, 5.0, 1.0]);

        // from the other side, the order reverses
        sort_quads_back_to_front(&mut vertices, [0.5, 0.5, 20.0]).unwrap();
        assert_eq!(quad_colors(&vertices), vec![1.0, 5.0, 9.0]);
    }

    #[test]
    fn sort_is_idempotent() {
        // two quads at equal distance must keep their relative order
        let mut vertices: Vec<Vertex> = [
            quad_at_z(3.0, 1.0),
            quad_at_z(3.0, 2.0),
            quad_at_z(7.0, 3.0),
        ]
        .concat();
        let eye = [0.5, 0.5, 0.0];
        sort_quads_back_to_front(&mut vertices, eye).unwrap();
        let once = vertices.clone();
        sort_quads_back_to_front(&mut vertices, eye).unwrap();
        assert_eq!(vertices, once);
        assert_eq!(quad_colors(&vertices), vec![3.0, 1.0, 2.0]);
    }

    #[test]
    fn sort_rejects_partial_quads() {
        let mut vertices = vec![Vertex::default(); 6];
        assert!(sort_quads_back_to_front(&mut vertices, [0.0; 3]).is_err());
    }

    #[test]
    fn from_buffer_keeps_untouched_targets() {
        let chunk = ChunkPos::new(0, 0, 0);
        let translucent = UploadTarget::Layer(RenderLayer::Translucent);
        let opaque = UploadTarget::Layer(RenderLayer::Opaque);

        let mut buffer = ScratchBuffer::default();
        buffer.vertices_mut(opaque).extend_from_slice(&quad_at_z(0.0, 0.0));
        buffer.vertices_mut(translucent).extend_from_slice(&quad_at_z(1.0, 1.0));
        let full = CompiledChunkGeometry::from_buffer(chunk, &buffer, &UploadTarget::ALL, None, [0.0; 3]);
        assert_eq!(full.vertex_count(opaque), 4);
        assert_eq!(full.sortable_vertices(translucent).len(), 4);
        assert!(full.has_depth_sorted_geometry());

        buffer.clear();
        buffer.vertices_mut(translucent).extend_from_slice(&quad_at_z(2.0, 2.0));
        buffer.vertices_mut(translucent).extend_from_slice(&quad_at_z(3.0, 3.0));
        let resorted = CompiledChunkGeometry::from_buffer(
            chunk,
            &buffer,
            &UploadTarget::DEPTH_SORTED,
            Some(&full),
            [1.0, 2.0, 3.0],
        );
        assert_eq!(resorted.vertex_count(opaque), 4);
        assert_eq!(resorted.vertex_count(translucent), 8);
        assert_eq!(resorted.sorted_for(), FreePoint::new(1.0, 2.0, 3.0));
    }
}
