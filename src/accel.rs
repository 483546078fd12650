// SPDX-License-Identifier: Apache-2.0
// SPDX-FileCopyrightText: Copyright The parquet-accel Authors

//! Device-side collaborators: buffer allocation and the ordered dispatch
//! queue kernels run on.
//!
//! One writer owns one [`DeviceQueue`]. Kernels submitted to a queue run off
//! the controlling thread and their results become visible at the explicit
//! `wait` points the writer places after fragment initialization, statistics
//! gathering, dictionary sizing, and each batch's encode pass. Batches are
//! materialized strictly one at a time, so the allocator's high-water mark is
//! bounded by the largest single batch.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::stream::{FuturesOrdered, StreamExt};
use tokio::task::JoinHandle;

use crate::error::Result;

/// A tracked, device-resident byte buffer.
///
/// The host-backed implementation stores plain memory; the type exists so
/// buffer lifetimes and peak usage flow through the allocator regardless of
/// backend.
#[derive(Debug)]
pub struct DeviceBuffer {
    data: Vec<u8>,
    tracker: Arc<MemoryTracker>,
}

impl DeviceBuffer {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

impl Drop for DeviceBuffer {
    fn drop(&mut self) {
        self.tracker
            .current
            .fetch_sub(self.data.len(), Ordering::Relaxed);
    }
}

#[derive(Debug, Default)]
struct MemoryTracker {
    current: AtomicUsize,
    peak: AtomicUsize,
}

/// Allocates device buffers and accounts for their lifetime.
pub trait DeviceAllocator: Send + Sync {
    fn allocate(&self, len: usize) -> Result<DeviceBuffer>;

    /// Bytes currently outstanding.
    fn allocated_bytes(&self) -> usize;

    /// High-water mark since construction.
    fn peak_bytes(&self) -> usize;
}

/// Host-memory allocator used when no accelerator is attached.
#[derive(Debug, Default)]
pub struct HostAllocator {
    tracker: Arc<MemoryTracker>,
}

impl HostAllocator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DeviceAllocator for HostAllocator {
    fn allocate(&self, len: usize) -> Result<DeviceBuffer> {
        let current = self.tracker.current.fetch_add(len, Ordering::Relaxed) + len;
        self.tracker.peak.fetch_max(current, Ordering::Relaxed);
        Ok(DeviceBuffer {
            data: vec![0u8; len],
            tracker: self.tracker.clone(),
        })
    }

    fn allocated_bytes(&self) -> usize {
        self.tracker.current.load(Ordering::Relaxed)
    }

    fn peak_bytes(&self) -> usize {
        self.tracker.peak.load(Ordering::Relaxed)
    }
}

/// Handle for one submitted kernel.
pub struct Dispatch<T> {
    handle: JoinHandle<Result<T>>,
}

impl<T> Dispatch<T> {
    /// Synchronization point: blocks the controlling task until the kernel's
    /// result is host-visible.
    pub async fn wait(self) -> Result<T> {
        self.handle.await?
    }
}

/// An ordered per-writer dispatch queue.
///
/// Kernels own their inputs and return their outputs, so submission order is
/// observed simply by waiting on dispatches in the order they were issued;
/// the queue exists to give every kernel launch a single seam through which
/// an accelerator runtime would route.
#[derive(Debug, Default, Clone)]
pub struct DeviceQueue {
    _priv: (),
}

impl DeviceQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Launches a kernel on the queue.
    pub fn dispatch<T, F>(&self, kernel: F) -> Dispatch<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        Dispatch {
            handle: tokio::task::spawn_blocking(kernel),
        }
    }

    /// Launches a set of independent kernels and waits for all of them,
    /// preserving submission order in the returned results.
    pub async fn dispatch_all<T, F, I>(&self, kernels: I) -> Result<Vec<T>>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T> + Send + 'static,
        I: IntoIterator<Item = F>,
    {
        let mut pending = kernels
            .into_iter()
            .map(|k| self.dispatch(k).wait())
            .collect::<FuturesOrdered<_>>();
        let mut out = Vec::with_capacity(pending.len());
        while let Some(result) = pending.next().await {
            out.push(result?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_allocator_tracks_peak() {
        let alloc = HostAllocator::new();
        let a = alloc.allocate(100).unwrap();
        let b = alloc.allocate(50).unwrap();
        assert_eq!(alloc.allocated_bytes(), 150);
        drop(a);
        assert_eq!(alloc.allocated_bytes(), 50);
        drop(b);
        assert_eq!(alloc.allocated_bytes(), 0);
        assert_eq!(alloc.peak_bytes(), 150);
    }

    #[tokio::test]
    async fn test_wait_surfaces_kernel_error() {
        let queue = DeviceQueue::new();
        let dispatch = queue.dispatch(|| -> Result<()> {
            Err(crate::error::Error::Device {
                message: "kernel fault".into(),
                location: snafu::location!(),
            })
        });
        assert!(dispatch.wait().await.is_err());

        let ok = queue.dispatch(|| Ok(41)).wait().await.unwrap();
        assert_eq!(ok, 41);
    }

    #[tokio::test]
    async fn test_dispatch_order_preserved() {
        let queue = DeviceQueue::new();
        let results = queue
            .dispatch_all((0..16).map(|i| move || Ok(i * 2)))
            .await
            .unwrap();
        assert_eq!(results, (0..16).map(|i| i * 2).collect::<Vec<_>>());
    }
}
