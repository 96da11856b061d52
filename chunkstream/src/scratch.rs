//! A fixed-size pool of reusable geometry assembly buffers.

use std::fmt;
use std::ops;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use crate::error::Interrupted;
use crate::geometry::Vertex;
use crate::layer::{TargetMap, UploadTarget};

/// CPU-side buffers for assembling the geometry of one chunk: one vertex list per
/// [`UploadTarget`].
///
/// Buffers are reused between builds, so their allocations are kept; [`Self::clear()`]
/// only empties them.
#[derive(Clone, Debug, Default)]
pub struct ScratchBuffer {
    vertices: TargetMap<Vec<Vertex>>,
}

impl ScratchBuffer {
    /// The vertices written to the given target so far.
    pub fn vertices(&self, target: UploadTarget) -> &[Vertex] {
        &self.vertices[target]
    }

    pub(crate) fn vertices_mut(&mut self, target: UploadTarget) -> &mut Vec<Vertex> {
        &mut self.vertices[target]
    }

    /// Empties every target, keeping allocated capacity.
    pub fn clear(&mut self) {
        for (_, v) in self.vertices.iter_mut() {
            v.clear();
        }
    }

    /// Whether the given target has no vertices.
    pub fn is_empty_for(&self, target: UploadTarget) -> bool {
        self.vertices[target].is_empty()
    }
}

// -------------------------------------------------------------------------------------------------

/// A fixed number of [`ScratchBuffer`]s, each lent to at most one build at a time.
///
/// Because the number of buffers is fixed, [`ScratchBufferPool::lease()`] blocking on an
/// exhausted pool is what limits how many builds are in flight.
///
/// Cloning the pool produces another handle to the same buffers.
#[derive(Clone)]
pub struct ScratchBufferPool {
    shared: Arc<PoolShared>,
}

struct PoolShared {
    state: Mutex<PoolState>,
    /// Woken whenever a buffer is returned or the pool is closed.
    returned: Condvar,
    capacity: usize,
}

struct PoolState {
    free: Vec<ScratchBuffer>,
    closed: bool,
}

impl PoolShared {
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        // Every critical section leaves the state consistent, so poisoning is harmless.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ScratchBufferPool {
    /// Creates a pool of `capacity` empty buffers. A capacity of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            shared: Arc::new(PoolShared {
                state: Mutex::new(PoolState {
                    free: (0..capacity).map(|_| ScratchBuffer::default()).collect(),
                    closed: false,
                }),
                returned: Condvar::new(),
                capacity,
            }),
        }
    }

    /// Takes a buffer from the pool, waiting until one is available.
    ///
    /// Returns [`Interrupted`] if the pool is [closed](Self::close) before or during the wait.
    pub fn lease(&self) -> Result<ScratchLease, Interrupted> {
        let mut state = self.shared.lock();
        loop {
            if state.closed {
                return Err(Interrupted);
            }
            if let Some(buffer) = state.free.pop() {
                return Ok(self.wrap(buffer));
            }
            state = self
                .shared
                .returned
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Takes a buffer from the pool if one is available right now.
    pub fn try_lease(&self) -> Option<ScratchLease> {
        let mut state = self.shared.lock();
        if state.closed {
            return None;
        }
        state.free.pop().map(|buffer| self.wrap(buffer))
    }

    fn wrap(&self, buffer: ScratchBuffer) -> ScratchLease {
        ScratchLease {
            buffer: Some(buffer),
            shared: self.shared.clone(),
        }
    }

    /// Wakes every thread blocked in [`Self::lease()`] with [`Interrupted`], and makes all
    /// future leases fail. Buffers still leased may be returned normally.
    pub fn close(&self) {
        self.shared.lock().closed = true;
        self.shared.returned.notify_all();
    }

    /// Whether [`Self::close()`] has been called.
    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }

    /// The fixed number of buffers.
    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// The number of buffers not currently leased.
    pub fn available(&self) -> usize {
        self.shared.lock().free.len()
    }

    /// The number of buffers currently leased.
    pub fn leased(&self) -> usize {
        self.capacity() - self.available()
    }
}

impl fmt::Debug for ScratchBufferPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.lock();
        f.debug_struct("ScratchBufferPool")
            .field("capacity", &self.shared.capacity)
            .field("available", &state.free.len())
            .field("closed", &state.closed)
            .finish()
    }
}

/// Exclusive use of one [`ScratchBuffer`]. The buffer is emptied and returned to its pool
/// when the lease is dropped, which happens exactly once.
///
/// While geometry is being uploaded, the lease is shared as `Arc<ScratchLease>` by every
/// pending upload operation of the build, so that the buffer goes back to the pool only
/// after the last of them has completed or been dropped.
pub struct ScratchLease {
    /// Always [`Some`] until dropped.
    buffer: Option<ScratchBuffer>,
    shared: Arc<PoolShared>,
}

impl ops::Deref for ScratchLease {
    type Target = ScratchBuffer;
    fn deref(&self) -> &ScratchBuffer {
        self.buffer
            .as_ref()
            .expect("ScratchLease buffer taken before drop")
    }
}

impl ops::DerefMut for ScratchLease {
    fn deref_mut(&mut self) -> &mut ScratchBuffer {
        self.buffer
            .as_mut()
            .expect("ScratchLease buffer taken before drop")
    }
}

impl Drop for ScratchLease {
    fn drop(&mut self) {
        if let Some(mut buffer) = self.buffer.take() {
            buffer.clear();
            self.shared.lock().free.push(buffer);
            self.shared.returned.notify_one();
        }
    }
}

impl fmt::Debug for ScratchLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScratchLease").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::RenderLayer;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn lease_count_never_exceeds_capacity() {
        let pool = ScratchBufferPool::new(2);
        let a = pool.try_lease().unwrap();
        let b = pool.try_lease().unwrap();
        assert!(pool.try_lease().is_none());
        assert_eq!((pool.leased(), pool.available()), (2, 0));
        drop(a);
        assert_eq!(pool.leased(), 1);
        drop(b);
        assert_eq!(pool.available(), 2);
    }

    #[test]
    fn zero_capacity_is_one() {
        assert_eq!(ScratchBufferPool::new(0).capacity(), 1);
    }

    #[test]
    fn returned_buffer_is_cleared() {
        let pool = ScratchBufferPool::new(1);
        let target = UploadTarget::Layer(RenderLayer::Opaque);
        {
            let mut lease = pool.lease().unwrap();
            lease.vertices_mut(target).push(Vertex::default());
        }
        assert!(pool.lease().unwrap().is_empty_for(target));
    }

    #[test]
    fn exhausted_pool_blocks_until_return() {
        let pool = ScratchBufferPool::new(1);
        let held = pool.lease().unwrap();

        let (tx, rx) = mpsc::channel();
        let waiter = thread::spawn({
            let pool = pool.clone();
            move || {
                let lease = pool.lease();
                tx.send(()).unwrap();
                lease.map(drop)
            }
        });

        // The waiter must still be blocked.
        assert_eq!(
            rx.recv_timeout(Duration::from_millis(50)),
            Err(mpsc::RecvTimeoutError::Timeout)
        );
        drop(held);
        rx.recv_timeout(Duration::from_secs(10)).unwrap();
        assert_eq!(waiter.join().unwrap(), Ok(()));
        assert_eq!(pool.available(), 1);
    }

    #[test]
    fn close_interrupts_waiters() {
        let pool = ScratchBufferPool::new(1);
        let _held = pool.lease().unwrap();
        let waiter = thread::spawn({
            let pool = pool.clone();
            move || pool.lease().map(drop)
        });
        thread::sleep(Duration::from_millis(20));
        pool.close();
        assert_eq!(waiter.join().unwrap(), Err(Interrupted));
        assert!(pool.try_lease().is_none());
    }

    #[test]
    fn shared_lease_returns_after_last_holder() {
        let pool = ScratchBufferPool::new(1);
        let lease = Arc::new(pool.lease().unwrap());
        let second = lease.clone();
        drop(lease);
        assert_eq!(pool.available(), 0);
        drop(second);
        assert_eq!(pool.available(), 1);
    }
}
