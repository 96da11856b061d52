//! Test helpers for chunkstream tests: a world, a mesher, and a backend which record
//! what happens to them.
//!
//! This module is public but doc(hidden).

#![allow(missing_docs)]

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use hashbrown::{HashMap, HashSet};

use crate::error::{BackendError, BuildError};
use crate::geometry::{MeshSink, Vertex};
use crate::layer::{OverlayKind, RenderLayer, UploadTarget};
use crate::math::{ChunkPos, Cube, Face6};
use crate::{BlockMesher, PreviewWorld, RenderBackend, StreamTypes};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// [`StreamTypes`] for the test doubles in this module.
#[derive(Debug)]
#[allow(clippy::exhaustive_enums)]
pub enum Tt {}

impl StreamTypes for Tt {
    type World = TestWorld;
    type Mesher = TestMesher;
    type Backend = TestBackend;
}

/// Contents of a [`TestWorld`] cube.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[allow(clippy::exhaustive_enums)]
pub enum TestBlock {
    /// Opaque faces, culled against other solid blocks.
    Solid,
    /// Translucent faces, culled against other glass blocks.
    Glass,
    /// One outline overlay quad and one quad overlay quad.
    Marker,
    /// Makes [`TestMesher`] return an error.
    Broken,
    /// Makes [`TestMesher`] panic.
    Panic,
}

/// In-memory [`PreviewWorld`]. Every column is loaded unless marked otherwise.
#[derive(Debug, Default)]
pub struct TestWorld {
    blocks: Mutex<HashMap<Cube, TestBlock>>,
    unloaded_columns: Mutex<HashSet<[i32; 2]>>,
}

impl TestWorld {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, cube: Cube, block: TestBlock) {
        lock(&self.blocks).insert(cube, block);
    }

    pub fn remove(&self, cube: Cube) {
        lock(&self.blocks).remove(&cube);
    }

    pub fn set_column_loaded(&self, x: i32, z: i32, loaded: bool) {
        let mut unloaded = lock(&self.unloaded_columns);
        if loaded {
            unloaded.remove(&[x, z]);
        } else {
            unloaded.insert([x, z]);
        }
    }
}

impl PreviewWorld for TestWorld {
    type Block = TestBlock;

    fn is_chunk_loaded(&self, x: i32, z: i32) -> bool {
        !lock(&self.unloaded_columns).contains(&[x, z])
    }

    fn block(&self, cube: Cube) -> Option<TestBlock> {
        lock(&self.blocks).get(&cube).copied()
    }
}

/// Lets a test hold [`TestMesher`] inside a build, to observe or cancel it mid-compile.
#[derive(Debug, Default)]
pub struct MeshGate {
    state: Mutex<GateState>,
    changed: Condvar,
}

#[derive(Debug, Default)]
struct GateState {
    open: bool,
    entered: usize,
}

impl MeshGate {
    /// Lets every current and future build through.
    pub fn open(&self) {
        lock(&self.state).open = true;
        self.changed.notify_all();
    }

    /// Waits until blocks have been meshed (or are waiting to be) `count` times in total.
    /// Returns false on timeout.
    pub fn wait_for_entries(&self, count: usize, timeout: Duration) -> bool {
        let state = lock(&self.state);
        let (state, _) = self
            .changed
            .wait_timeout_while(state, timeout, |s| s.entered < count)
            .unwrap_or_else(PoisonError::into_inner);
        state.entered >= count
    }

    fn pass(&self) {
        let mut state = lock(&self.state);
        state.entered += 1;
        self.changed.notify_all();
        while !state.open {
            state = self
                .changed
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

/// [`BlockMesher`] emitting axis-aligned unit faces, with simple same-kind face culling.
#[derive(Debug, Default)]
pub struct TestMesher {
    gate: Option<Arc<MeshGate>>,
}

impl TestMesher {
    pub fn new() -> Self {
        Self::default()
    }

    /// A mesher which waits at every block until the returned gate is opened.
    pub fn gated() -> (Self, Arc<MeshGate>) {
        let gate = Arc::new(MeshGate::default());
        (
            Self {
                gate: Some(gate.clone()),
            },
            gate,
        )
    }
}

impl BlockMesher<TestWorld> for TestMesher {
    fn mesh_block(
        &self,
        world: &TestWorld,
        cube: Cube,
        block: &TestBlock,
        sink: &mut MeshSink<'_>,
    ) -> Result<(), BuildError> {
        if let Some(gate) = &self.gate {
            gate.pass();
        }
        let relative = cube - Cube::from(sink.chunk().lower_corner());
        let relative = [relative.x as f32, relative.y as f32, relative.z as f32];
        let (target, color) = match block {
            TestBlock::Solid => (UploadTarget::Layer(RenderLayer::Opaque), [0.5, 0.5, 0.5, 1.0]),
            TestBlock::Glass => (
                UploadTarget::Layer(RenderLayer::Translucent),
                [0.5, 0.5, 1.0, 0.5],
            ),
            TestBlock::Marker => {
                let color = [1.0, 0.0, 0.0, 1.0];
                sink.push_quad(
                    UploadTarget::Overlay(OverlayKind::Outline),
                    face_quad(relative, Face6::PY, color),
                );
                sink.push_quad(
                    UploadTarget::Overlay(OverlayKind::Quad),
                    face_quad(relative, Face6::PY, color),
                );
                return Ok(());
            }
            TestBlock::Broken => return Err(BuildError::new(format!("broken block at {cube:?}"))),
            TestBlock::Panic => panic!("TestMesher asked to panic at {cube:?}"),
        };
        for face in Face6::ALL {
            let neighbor = cube.checked_add(face.normal_vector()).and_then(|n| world.block(n));
            if neighbor != Some(*block) {
                sink.push_quad(target, face_quad(relative, face, color));
            }
        }
        Ok(())
    }
}

/// The four corners of one face of the unit cube whose lowest corner is `lower`.
fn face_quad(lower: [f32; 3], face: Face6, color: [f32; 4]) -> [Vertex; 4] {
    let normal = face.normal_vector();
    let normal = [normal.x, normal.y, normal.z];
    let axis = normal.iter().position(|&c| c != 0).unwrap_or(0);
    let offset = if normal[axis] > 0 { 1.0 } else { 0.0 };
    let (a, b) = ((axis + 1) % 3, (axis + 2) % 3);
    [(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0)].map(|(da, db)| {
        let mut position = lower;
        position[axis] += offset;
        position[a] += da;
        position[b] += db;
        Vertex { position, color }
    })
}

/// What [`TestBackend`] hands out for each upload.
#[derive(Clone, Debug, Eq, PartialEq)]
#[allow(clippy::exhaustive_structs)]
pub struct TestBuffer {
    pub chunk: ChunkPos,
    pub target: UploadTarget,
    pub vertex_count: usize,
    /// Sequence number of the upload which produced this buffer.
    pub id: usize,
}

/// [`RenderBackend`] which records every call.
#[derive(Debug, Default)]
pub struct TestBackend {
    pub uploads: Vec<TestBuffer>,
    pub draws: Vec<(UploadTarget, Vec<ChunkPos>)>,
    /// If true, every upload fails.
    pub fail_uploads: bool,
}

impl TestBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// The chunks drawn in each target, in call order, excluding targets with nothing to draw.
    pub fn drawn(&self, target: UploadTarget) -> Vec<ChunkPos> {
        self.draws
            .iter()
            .filter(|(t, _)| *t == target)
            .flat_map(|(_, chunks)| chunks.iter().copied())
            .collect()
    }
}

impl RenderBackend for TestBackend {
    type Buffer = TestBuffer;

    fn upload(
        &mut self,
        chunk: ChunkPos,
        target: UploadTarget,
        vertices: &[Vertex],
    ) -> Result<TestBuffer, BackendError> {
        if self.fail_uploads {
            return Err(BackendError::new("TestBackend asked to fail"));
        }
        let buffer = TestBuffer {
            chunk,
            target,
            vertex_count: vertices.len(),
            id: self.uploads.len(),
        };
        self.uploads.push(buffer.clone());
        Ok(buffer)
    }

    fn draw(&mut self, target: UploadTarget, chunks: &[(ChunkPos, &TestBuffer)]) {
        self.draws
            .push((target, chunks.iter().map(|&(chunk, _)| chunk).collect()));
    }
}
