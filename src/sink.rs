// SPDX-License-Identifier: Apache-2.0
// SPDX-FileCopyrightText: Copyright The parquet-accel Authors

//! Byte sinks the writer streams encoded pages into.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};

use crate::accel::DeviceBuffer;
use crate::error::Result;

/// A destination for encoded file bytes.
///
/// Host writes are always available. A sink may additionally accept device
/// buffers directly, in which case gathered batch output skips the staging
/// copy through host memory.
#[async_trait]
pub trait DataSink: Send {
    async fn write_all(&mut self, buf: &[u8]) -> Result<()>;

    /// Current offset from the start of the stream.
    fn tell(&self) -> u64;

    async fn flush(&mut self) -> Result<()>;

    /// Whether [`DataSink::write_device`] avoids a host staging copy.
    fn supports_device_write(&self) -> bool {
        false
    }

    /// Writes a range of a device buffer. The default stages through host
    /// memory, which for the host-backed device layer is a direct slice.
    async fn write_device(&mut self, buf: &DeviceBuffer, offset: usize, len: usize) -> Result<()> {
        self.write_all(&buf.as_slice()[offset..offset + len]).await
    }
}

/// Sink backed by a local file.
pub struct FileSink {
    writer: BufWriter<File>,
    offset: u64,
}

impl FileSink {
    pub async fn try_new(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let file = File::create(path).await?;
        Ok(Self {
            writer: BufWriter::new(file),
            offset: 0,
        })
    }
}

#[async_trait]
impl DataSink for FileSink {
    async fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        self.writer.write_all(buf).await?;
        self.offset += buf.len() as u64;
        Ok(())
    }

    fn tell(&self) -> u64 {
        self.offset
    }

    async fn flush(&mut self) -> Result<()> {
        self.writer.flush().await?;
        Ok(())
    }
}

/// In-memory sink, mostly for tests and for producing footer-only blobs.
#[derive(Debug, Default)]
pub struct MemorySink {
    buf: BytesMut,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_bytes(self) -> Bytes {
        self.buf.freeze()
    }
}

#[async_trait]
impl DataSink for MemorySink {
    async fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        self.buf.extend_from_slice(buf);
        Ok(())
    }

    fn tell(&self) -> u64 {
        self.buf.len() as u64
    }

    async fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    fn supports_device_write(&self) -> bool {
        true
    }
}
