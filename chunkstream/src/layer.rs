//! Render layers, overlay kinds, and the upload targets they combine into.

use core::fmt;
use core::ops;

/// A pass in which chunk geometry is drawn, distinguished by how it blends.
#[expect(clippy::exhaustive_enums)]
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RenderLayer {
    /// Fully opaque surfaces.
    Opaque,
    /// Surfaces with binary (cut-out) transparency.
    Cutout,
    /// Like [`RenderLayer::Cutout`], but sampled with mipmaps.
    CutoutMipped,
    /// Surfaces with partial transparency, which must be drawn back to front.
    Translucent,
}

impl RenderLayer {
    /// All layers, in the order they are drawn.
    pub const ALL: [RenderLayer; 4] = [
        RenderLayer::Opaque,
        RenderLayer::Cutout,
        RenderLayer::CutoutMipped,
        RenderLayer::Translucent,
    ];
}

/// Extra geometry drawn over the world, such as highlighting of mismatched blocks.
#[expect(clippy::exhaustive_enums)]
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum OverlayKind {
    /// Line outlines.
    Outline,
    /// Filled, translucent quads; depth sorted like [`RenderLayer::Translucent`].
    Quad,
}

impl OverlayKind {
    /// All overlay kinds, in the order they are drawn.
    pub const ALL: [OverlayKind; 2] = [OverlayKind::Outline, OverlayKind::Quad];
}

/// One separately uploaded and drawn part of a chunk's geometry.
#[expect(clippy::exhaustive_enums)]
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum UploadTarget {
    /// Geometry for one of the world render layers.
    Layer(RenderLayer),
    /// Geometry for one of the overlays.
    Overlay(OverlayKind),
}

impl UploadTarget {
    /// All targets: every layer, then every overlay.
    pub const ALL: [UploadTarget; 6] = [
        UploadTarget::Layer(RenderLayer::Opaque),
        UploadTarget::Layer(RenderLayer::Cutout),
        UploadTarget::Layer(RenderLayer::CutoutMipped),
        UploadTarget::Layer(RenderLayer::Translucent),
        UploadTarget::Overlay(OverlayKind::Outline),
        UploadTarget::Overlay(OverlayKind::Quad),
    ];

    /// The targets whose geometry must be drawn back to front and is therefore
    /// re-sorted as the viewer moves.
    pub const DEPTH_SORTED: [UploadTarget; 2] = [
        UploadTarget::Layer(RenderLayer::Translucent),
        UploadTarget::Overlay(OverlayKind::Quad),
    ];

    /// Whether this target's geometry must be drawn back to front.
    #[inline]
    pub const fn is_depth_sorted(self) -> bool {
        matches!(
            self,
            UploadTarget::Layer(RenderLayer::Translucent) | UploadTarget::Overlay(OverlayKind::Quad)
        )
    }

    const fn index(self) -> usize {
        match self {
            UploadTarget::Layer(RenderLayer::Opaque) => 0,
            UploadTarget::Layer(RenderLayer::Cutout) => 1,
            UploadTarget::Layer(RenderLayer::CutoutMipped) => 2,
            UploadTarget::Layer(RenderLayer::Translucent) => 3,
            UploadTarget::Overlay(OverlayKind::Outline) => 4,
            UploadTarget::Overlay(OverlayKind::Quad) => 5,
        }
    }
}

impl fmt::Display for UploadTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadTarget::Layer(layer) => write!(f, "{layer:?} layer"),
            UploadTarget::Overlay(kind) => write!(f, "{kind:?} overlay"),
        }
    }
}

/// What a [`ChunkRenderTask`](crate::ChunkRenderTask) does.
#[expect(clippy::exhaustive_enums)]
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BuildKind {
    /// Mesh every block of the chunk into every target.
    FullRebuild,
    /// Re-sort the depth-sorted targets of the chunk's existing geometry for the current
    /// eye position, without meshing anything.
    TransparencyResort,
}

impl BuildKind {
    /// The targets which a build of this kind may produce new geometry for.
    pub fn targets(self) -> &'static [UploadTarget] {
        match self {
            BuildKind::FullRebuild => &UploadTarget::ALL,
            BuildKind::TransparencyResort => &UploadTarget::DEPTH_SORTED,
        }
    }
}

/// Container for values keyed by [`UploadTarget`]s. Always holds exactly six elements.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub struct TargetMap<V>([V; 6]);

impl<V> TargetMap<V> {
    /// Constructs a [`TargetMap`] by using the provided function to compute
    /// a value for each [`UploadTarget`].
    #[inline]
    pub fn from_fn(mut f: impl FnMut(UploadTarget) -> V) -> Self {
        Self(UploadTarget::ALL.map(&mut f))
    }

    /// Iterates over the targets and their values, in [`UploadTarget::ALL`] order.
    pub fn iter(&self) -> impl Iterator<Item = (UploadTarget, &V)> {
        UploadTarget::ALL.into_iter().zip(self.0.iter())
    }

    /// Iterates over the targets and mutable references to their values.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (UploadTarget, &mut V)> {
        UploadTarget::ALL.into_iter().zip(self.0.iter_mut())
    }

    /// Transforms each value.
    pub fn map<U>(self, mut f: impl FnMut(UploadTarget, V) -> U) -> TargetMap<U> {
        let mut index = 0;
        TargetMap(self.0.map(|v| {
            let target = UploadTarget::ALL[index];
            index += 1;
            f(target, v)
        }))
    }
}

impl<V> ops::Index<UploadTarget> for TargetMap<V> {
    type Output = V;
    #[inline]
    fn index(&self, target: UploadTarget) -> &V {
        &self.0[target.index()]
    }
}

impl<V> ops::IndexMut<UploadTarget> for TargetMap<V> {
    #[inline]
    fn index_mut(&mut self, target: UploadTarget) -> &mut V {
        &mut self.0[target.index()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn target_map_index_matches_all_order() {
        let map = TargetMap::from_fn(|target| target);
        for target in UploadTarget::ALL {
            assert_eq!(map[target], target);
        }
        assert_eq!(
            map.iter().map(|(t, &v)| (t, v)).collect::<Vec<_>>(),
            UploadTarget::ALL.map(|t| (t, t)).to_vec()
        );
    }

    #[test]
    fn resort_targets_are_depth_sorted() {
        for &target in BuildKind::TransparencyResort.targets() {
            assert!(target.is_depth_sorted(), "{target}");
        }
        assert_eq!(
            UploadTarget::ALL
                .iter()
                .filter(|t| t.is_depth_sorted())
                .count(),
            UploadTarget::DEPTH_SORTED.len()
        );
    }
}
