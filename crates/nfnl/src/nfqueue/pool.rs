//! Bounded recycling pool of packet buffers.
//!
//! The receive loop copies each packet payload into a buffer leased from
//! the pool, so steady-state packet flow does no heap allocation. A lease
//! is returned by dropping its [`PooledBuf`] (or `Packet::free`). Leases
//! that are never returned keep their slot forever; once every slot is out
//! the receive loop waits for one to come back.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;
use tracing::warn;

struct Slots {
    bufs: Vec<Option<Vec<u8>>>,
    generations: Vec<u32>,
    free: Vec<usize>,
}

struct PoolInner {
    slots: Mutex<Slots>,
    available: Notify,
    buf_capacity: usize,
}

impl PoolInner {
    fn lock(&self) -> MutexGuard<'_, Slots> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Return a slot. Rejects (and logs) releases for a slot that is already
    /// free or was leased again since.
    fn release(&self, index: usize, generation: u32, mut buf: Vec<u8>) -> bool {
        {
            let mut slots = self.lock();
            let current = slots.generations.get(index).copied();
            let occupied = slots.bufs.get(index).is_some_and(Option::is_some);
            if current != Some(generation) || occupied {
                warn!(
                    slot = index,
                    generation,
                    current = ?current,
                    "ignoring release of a buffer that is not leased"
                );
                return false;
            }

            buf.clear();
            slots.bufs[index] = Some(buf);
            slots.generations[index] = generation.wrapping_add(1);
            slots.free.push(index);
        }
        self.available.notify_one();
        true
    }
}

/// A fixed set of reusable byte buffers.
#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

impl BufferPool {
    /// Allocate `slots` buffers of `buf_capacity` bytes each.
    pub fn new(slots: usize, buf_capacity: usize) -> Self {
        let slots = slots.max(1);
        let inner = PoolInner {
            slots: Mutex::new(Slots {
                bufs: (0..slots)
                    .map(|_| Some(Vec::with_capacity(buf_capacity)))
                    .collect(),
                generations: vec![0; slots],
                free: (0..slots).rev().collect(),
            }),
            available: Notify::new(),
            buf_capacity,
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Lease a buffer if one is free.
    pub fn try_acquire(&self) -> Option<PooledBuf> {
        let mut slots = self.inner.lock();
        let index = slots.free.pop()?;
        let buf = slots.bufs[index].take()?;
        let generation = slots.generations[index];
        Some(PooledBuf {
            pool: self.inner.clone(),
            index,
            generation,
            buf,
        })
    }

    /// Lease a buffer, waiting for a release when all are out.
    pub async fn acquire(&self) -> PooledBuf {
        loop {
            if let Some(buf) = self.try_acquire() {
                return buf;
            }
            // notify_one stores a permit, so a release between the check
            // above and this await is not lost.
            self.inner.available.notified().await;
        }
    }

    /// Number of buffers currently free.
    pub fn available(&self) -> usize {
        self.inner.lock().free.len()
    }

    /// Total number of buffers.
    pub fn capacity(&self) -> usize {
        self.inner.lock().bufs.len()
    }

    /// Preallocated size of each buffer.
    pub fn buf_capacity(&self) -> usize {
        self.inner.buf_capacity
    }
}

impl fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferPool")
            .field("available", &self.available())
            .field("capacity", &self.capacity())
            .field("buf_capacity", &self.inner.buf_capacity)
            .finish()
    }
}

/// A buffer leased from a [`BufferPool`]; returned on drop.
pub struct PooledBuf {
    pool: Arc<PoolInner>,
    index: usize,
    generation: u32,
    buf: Vec<u8>,
}

impl PooledBuf {
    /// The buffer contents.
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    /// The underlying vector, for in-place edits and padding.
    pub fn as_mut_vec(&mut self) -> &mut Vec<u8> {
        &mut self.buf
    }

    /// Replace the contents with `data`, reusing the allocation.
    pub fn fill(&mut self, data: &[u8]) {
        self.buf.clear();
        self.buf.extend_from_slice(data);
    }

    /// Return the buffer to its pool now.
    pub fn free(self) {
        drop(self)
    }
}

impl Drop for PooledBuf {
    fn drop(&mut self) {
        let buf = std::mem::take(&mut self.buf);
        self.pool.release(self.index, self.generation, buf);
    }
}

impl fmt::Debug for PooledBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledBuf")
            .field("slot", &self.index)
            .field("len", &self.buf.len())
            .finish()
    }
}
