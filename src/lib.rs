// SPDX-License-Identifier: Apache-2.0
// SPDX-FileCopyrightText: Copyright The parquet-accel Authors

//! An accelerator-structured Parquet writer for Arrow record batches.
//!
//! The write path mirrors a device-offloaded encoder: columns are flattened
//! into level streams, measured in fixed-size fragments, laid out into row
//! groups and pages from fragment totals alone, and encoded chunk-by-chunk
//! by kernels on an ordered dispatch queue. Files can be written in one shot
//! or appended to batch-by-batch, and per-file footers can be merged into a
//! single multi-file footer without touching data pages.

pub mod accel;
pub mod column;
pub mod encode;
pub mod error;
pub mod format;
pub mod fragment;
pub mod layout;
pub mod schema;
pub mod sink;
pub mod statistics;
pub mod values;
pub mod writer;

pub use error::{Error, Result};
pub use schema::ColumnMetadata;
pub use sink::{DataSink, FileSink, MemorySink};
pub use writer::{
    merge_row_group_metadata, Compression, FileWriter, StatisticsGranularity, WriteMode,
    WriterOptions,
};
