//! Background threads which compile queued [`ChunkRenderTask`]s.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

use crate::build::{ProcessError, UploadSubmission, process_task};
use crate::error::{CrashReport, StreamError};
use crate::math::FreePoint;
use crate::scratch::ScratchBufferPool;
use crate::task::ChunkRenderTask;
use crate::{BlockMesher, PreviewWorld};

/// The viewer's eye position, written by the render thread each frame and read by workers
/// when they start a build. [`None`] until the first frame, and after the world detaches.
#[derive(Clone, Debug, Default)]
pub(crate) struct SharedEye(Arc<Mutex<Option<FreePoint>>>);

impl SharedEye {
    pub(crate) fn get(&self) -> Option<FreePoint> {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn set(&self, eye: Option<FreePoint>) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = eye;
    }
}

/// Where workers send their results. Both are read by the render thread.
pub(crate) struct WorkerOutputs<W> {
    pub(crate) submissions: flume::Sender<UploadSubmission<W>>,
    pub(crate) crashes: flume::Sender<CrashReport>,
}

impl<W> Clone for WorkerOutputs<W> {
    fn clone(&self) -> Self {
        Self {
            submissions: self.submissions.clone(),
            crashes: self.crashes.clone(),
        }
    }
}

/// A fixed set of threads, each repeatedly taking the next task from the dispatch queue,
/// building it, and handing the result to the [`UploadScheduler`](crate::UploadScheduler).
///
/// Workers exit when the dispatch queue's sending side is dropped, or when the scratch
/// buffer pool is closed while they wait for a buffer. Neither is reported as an error.
pub struct BuildWorkerPool {
    threads: Vec<thread::JoinHandle<()>>,
}

impl BuildWorkerPool {
    /// Starts `count` worker threads.
    ///
    /// If a thread cannot be spawned, the pool runs with fewer; with none at all, only the
    /// synchronous build path makes progress.
    pub(crate) fn spawn<W: PreviewWorld, M: BlockMesher<W>>(
        count: usize,
        tasks: &flume::Receiver<Arc<ChunkRenderTask<W>>>,
        pool: &ScratchBufferPool,
        mesher: &Arc<M>,
        eye: &SharedEye,
        outputs: &WorkerOutputs<W>,
    ) -> Self {
        let mut threads = Vec::with_capacity(count);
        for i in 0..count {
            let worker = Worker {
                tasks: tasks.clone(),
                pool: pool.clone(),
                mesher: mesher.clone(),
                eye: eye.clone(),
                outputs: outputs.clone(),
            };
            match thread::Builder::new()
                .name(format!("chunkstream worker {i}"))
                .spawn(move || worker.run())
            {
                Ok(handle) => threads.push(handle),
                Err(e) => {
                    log::warn!("failed to spawn chunk worker thread (parallelism will be reduced): {e}");
                }
            }
        }
        log::debug!("Started {} chunk workers", threads.len());
        Self { threads }
    }

    /// Number of running threads.
    pub fn thread_count(&self) -> usize {
        self.threads.len()
    }

    /// Whether every worker thread has exited, so that [`Self::join()`] will not block.
    pub(crate) fn has_exited(&self) -> bool {
        self.threads.iter().all(thread::JoinHandle::is_finished)
    }

    /// Waits for every worker to exit. The caller must already have disconnected the
    /// dispatch queue and closed the scratch buffer pool, or this waits forever.
    pub(crate) fn join(self) {
        for handle in self.threads {
            // Panics inside a build are caught by the worker itself, so this only fails if
            // the worker's own loop panicked; nothing is left to clean up in that case.
            _ = handle.join();
        }
    }
}

impl fmt::Debug for BuildWorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuildWorkerPool")
            .field("thread_count", &self.threads.len())
            .finish()
    }
}

struct Worker<W, M> {
    tasks: flume::Receiver<Arc<ChunkRenderTask<W>>>,
    pool: ScratchBufferPool,
    mesher: Arc<M>,
    eye: SharedEye,
    outputs: WorkerOutputs<W>,
}

impl<W: PreviewWorld, M: BlockMesher<W>> Worker<W, M> {
    fn run(self) {
        while let Ok(task) = self.tasks.recv() {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                process_task(
                    &task,
                    &self.pool,
                    &*self.mesher,
                    self.eye.get(),
                    CrashReport::BATCHING,
                )
            }));
            match outcome {
                Ok(Ok(Some(submission))) => {
                    if self.outputs.submissions.send(submission).is_err() {
                        // The scheduler is gone; dropping the submission cancels its uploads.
                        break;
                    }
                }
                Ok(Ok(None)) => {}
                Ok(Err(ProcessError::Interrupted)) => break,
                Ok(Err(ProcessError::Crash(report))) => {
                    _ = self.outputs.crashes.send(report);
                }
                Err(payload) => {
                    task.cancel();
                    _ = self.outputs.crashes.send(CrashReport::new(
                        task.chunk(),
                        task.kind(),
                        CrashReport::BATCHING,
                        StreamError::WorkerPanicked(panic_message(&*payload).into()),
                    ));
                }
            }
        }
        log::debug!("Stopping chunk worker due to interrupt");
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "<non-string panic payload>"
    }
}
