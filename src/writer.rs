// SPDX-License-Identifier: Apache-2.0
// SPDX-FileCopyrightText: Copyright The parquet-accel Authors

//! The incremental Parquet writer.
//!
//! A writer accepts one batch ([`WriteMode::Single`]) or a sequence of
//! schema-identical batches ([`WriteMode::Chunked`]), encodes each into row
//! groups on its device queue, and streams the pages to a [`DataSink`].
//! [`FileWriter::close`] appends the footer and can hand back a framed
//! metadata blob for cross-file footer merging.

use std::sync::Arc;

use arrow_array::RecordBatch;
use log::debug;
use snafu::location;
use tracing::instrument;

use crate::accel::{DeviceAllocator, DeviceQueue, HostAllocator};
use crate::column::{build_levels, LeveledColumn};
use crate::encode::{self, ChunkEncodeParams, EncodedChunk};
use crate::error::{Error, Result};
use crate::format::{
    self, ColumnChunk, ColumnMetaData, CompressionCodec, FileMetaData, KeyValue, RowGroup,
    SchemaElement,
};
use crate::fragment::{self, Fragment};
use crate::layout::{self, DictDecision};
use crate::schema::{ColumnMetadata, SchemaNode, SchemaTree, StatisticsKind};
use crate::sink::DataSink;
use crate::values::{self, PhysicalValues};

/// User-facing compression choice. Variants the encoder cannot produce are
/// rejected when the writer is constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[non_exhaustive]
pub enum Compression {
    None,
    #[default]
    Snappy,
    /// Let the writer pick; currently snappy.
    Auto,
    Gzip,
    Zstd,
    Brotli,
}

impl Compression {
    fn to_codec(self) -> Result<CompressionCodec> {
        match self {
            Self::None => Ok(CompressionCodec::Uncompressed),
            Self::Snappy | Self::Auto => Ok(CompressionCodec::Snappy),
            other => Err(Error::NotSupported {
                source: format!("compression codec {other:?} is not available").into(),
                location: location!(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StatisticsGranularity {
    None,
    #[default]
    RowGroup,
    Page,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteMode {
    /// Exactly one write call; nullability is read off the data.
    #[default]
    Single,
    /// Any number of schema-identical writes before close.
    Chunked,
}

#[derive(Debug, Clone)]
pub struct WriterOptions {
    pub compression: Compression,
    pub statistics: StatisticsGranularity,
    pub max_row_group_bytes: usize,
    pub max_row_group_rows: usize,
    pub target_page_bytes: usize,
    pub fragment_size: usize,
    pub max_batch_bytes: usize,
    /// Per-column naming, nullability and decimal precision overrides.
    pub column_metadata: Option<Vec<ColumnMetadata>>,
    pub key_value_metadata: Vec<KeyValue>,
    /// Store timestamps as deprecated INT96 for old readers.
    pub int96_timestamps: bool,
    pub created_by: Option<String>,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            compression: Compression::default(),
            statistics: StatisticsGranularity::default(),
            max_row_group_bytes: layout::DEFAULT_ROW_GROUP_BYTES,
            max_row_group_rows: layout::DEFAULT_ROW_GROUP_ROWS,
            target_page_bytes: layout::DEFAULT_PAGE_BYTES,
            fragment_size: fragment::DEFAULT_FRAGMENT_SIZE,
            max_batch_bytes: layout::DEFAULT_BATCH_BYTES,
            column_metadata: None,
            key_value_metadata: Vec::new(),
            int96_timestamps: false,
            created_by: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriterState {
    Open,
    Closed,
    /// A failure after partial output; the sink contents are undefined.
    Poisoned,
}

struct SchemaSnapshot {
    tree: SchemaTree,
    elements: Vec<SchemaElement>,
}

pub struct FileWriter<S: DataSink> {
    sink: S,
    options: WriterOptions,
    mode: WriteMode,
    codec: CompressionCodec,
    allocator: Arc<dyn DeviceAllocator>,
    queue: DeviceQueue,
    schema: Option<SchemaSnapshot>,
    row_groups: Vec<RowGroup>,
    num_rows: i64,
    wrote_header: bool,
    wrote_data: bool,
    state: WriterState,
}

impl<S: DataSink> FileWriter<S> {
    pub fn try_new(sink: S, mode: WriteMode, options: WriterOptions) -> Result<Self> {
        Self::try_new_with_device(
            sink,
            mode,
            options,
            Arc::new(HostAllocator::new()),
            DeviceQueue::new(),
        )
    }

    pub fn try_new_with_device(
        sink: S,
        mode: WriteMode,
        options: WriterOptions,
        allocator: Arc<dyn DeviceAllocator>,
        queue: DeviceQueue,
    ) -> Result<Self> {
        let codec = options.compression.to_codec()?;
        if options.fragment_size == 0 {
            return Err(Error::InvalidInput {
                source: "fragment size must be positive".into(),
                location: location!(),
            });
        }
        Ok(Self {
            sink,
            options,
            mode,
            codec,
            allocator,
            queue,
            schema: None,
            row_groups: Vec::new(),
            num_rows: 0,
            wrote_header: false,
            wrote_data: false,
            state: WriterState::Open,
        })
    }

    /// Rows accepted so far.
    pub fn num_rows(&self) -> i64 {
        self.num_rows
    }

    /// Encodes `batch` and appends its row groups to the file.
    ///
    /// Validation failures leave the writer usable; failures during encoding
    /// or output poison it, since the sink may hold partial pages.
    #[instrument(level = "debug", skip_all, fields(num_rows = batch.num_rows()))]
    pub async fn write(&mut self, batch: &RecordBatch) -> Result<()> {
        match self.state {
            WriterState::Open => {}
            WriterState::Closed => {
                return Err(Error::InvalidInput {
                    source: "write called after close".into(),
                    location: location!(),
                })
            }
            WriterState::Poisoned => {
                return Err(Error::Internal {
                    message: "writer poisoned by an earlier failure".into(),
                    location: location!(),
                })
            }
        }
        if self.mode == WriteMode::Single && self.wrote_data {
            return Err(Error::InvalidInput {
                source: "single-shot writer accepts exactly one write".into(),
                location: location!(),
            });
        }
        if batch.num_columns() == 0 {
            return Err(Error::InvalidInput {
                source: "table has no columns".into(),
                location: location!(),
            });
        }

        let tree = SchemaTree::build(
            batch,
            self.options.column_metadata.as_deref(),
            self.mode == WriteMode::Single,
            self.options.int96_timestamps,
        )?;
        let elements = tree.to_schema_elements();
        match &self.schema {
            Some(snapshot) => {
                if snapshot.elements != elements {
                    return Err(Error::InvalidInput {
                        source: "batch schema differs from the first batch".into(),
                        location: location!(),
                    });
                }
            }
            None => {
                self.schema = Some(SchemaSnapshot {
                    tree: tree.clone(),
                    elements,
                });
            }
        }

        match self.write_inner(batch, &tree).await {
            Ok(()) => {
                self.wrote_data = true;
                Ok(())
            }
            Err(e) => {
                self.state = WriterState::Poisoned;
                Err(e)
            }
        }
    }

    async fn write_inner(&mut self, batch: &RecordBatch, tree: &SchemaTree) -> Result<()> {
        if !self.wrote_header {
            self.sink.write_all(format::MAGIC).await?;
            self.wrote_header = true;
        }
        if batch.num_rows() == 0 {
            return Ok(());
        }

        let leaf_nodes: Vec<SchemaNode> =
            tree.leaves.iter().map(|&n| tree.nodes[n].clone()).collect();
        let granularity = self.options.statistics;
        let stats_kind = move |node: &SchemaNode| match granularity {
            StatisticsGranularity::None => StatisticsKind::None,
            _ => node.stats_kind,
        };

        let columns: Vec<Arc<LeveledColumn>> = build_levels(tree, batch)?
            .into_iter()
            .map(Arc::new)
            .collect();

        // Lower every leaf to physical values on the queue.
        let lowered: Vec<Arc<PhysicalValues>> = self
            .queue
            .dispatch_all(columns.iter().zip(&leaf_nodes).map(|(col, node)| {
                let array = col.values.clone();
                let node = node.clone();
                move || values::lower(&array, &node)
            }))
            .await?
            .into_iter()
            .map(Arc::new)
            .collect();

        // Fragment initialization, one kernel per leaf.
        let spans = fragment::split_rows(batch.num_rows(), self.options.fragment_size);
        let fragments: Vec<Vec<Fragment>> = self
            .queue
            .dispatch_all(columns.iter().zip(&lowered).zip(&leaf_nodes).map(
                |((col, vals), node)| {
                    let col = col.clone();
                    let vals = vals.clone();
                    let kind = stats_kind(node);
                    let spans = spans.clone();
                    move || {
                        Ok(spans
                            .iter()
                            .map(|&(a, b)| fragment::build_fragment(&col, &vals, kind, a, b))
                            .collect::<Vec<_>>())
                    }
                },
            ))
            .await?;

        let groups = layout::plan_row_groups(
            &fragments,
            self.options.max_row_group_bytes,
            self.options.max_row_group_rows,
        );
        let batches = layout::plan_batches(&groups, self.options.max_batch_bytes);
        debug!(
            "planned {} row groups in {} batches for {} rows",
            groups.len(),
            batches.len(),
            batch.num_rows()
        );

        let num_leaves = columns.len();
        let codec = self.codec;
        let target_page_bytes = self.options.target_page_bytes;
        for &(batch_start, batch_end) in &batches {
            let batch_groups = &groups[batch_start..batch_end];

            // Dictionary decisions for every chunk of the batch.
            let dicts: Vec<DictDecision> = self
                .queue
                .dispatch_all(batch_groups.iter().flat_map(|group| {
                    let row_start = fragments[0][group.frag_start].row_start;
                    let row_end = fragments[0][group.frag_end - 1].row_end;
                    (0..num_leaves).map({
                        let columns = &columns;
                        let lowered = &lowered;
                        let leaf_nodes = &leaf_nodes;
                        let fragments = &fragments;
                        move |leaf| {
                            let col = columns[leaf].clone();
                            let vals = lowered[leaf].clone();
                            let physical = leaf_nodes[leaf].physical.unwrap_or(
                                crate::schema::Physical::Undefined,
                            );
                            let plain: usize = fragments[leaf]
                                [group.frag_start..group.frag_end]
                                .iter()
                                .map(|f| f.plain_size)
                                .sum();
                            move || {
                                Ok(layout::build_dictionary(
                                    &col, &vals, physical, row_start, row_end, plain,
                                ))
                            }
                        }
                    })
                }))
                .await?;

            // Encode every chunk of the batch.
            let chunks: Vec<EncodedChunk> = self
                .queue
                .dispatch_all(batch_groups.iter().enumerate().flat_map(|(gi, group)| {
                    let row_start = fragments[0][group.frag_start].row_start;
                    (0..num_leaves).map({
                        let columns = &columns;
                        let lowered = &lowered;
                        let leaf_nodes = &leaf_nodes;
                        let fragments = &fragments;
                        let dicts = &dicts;
                        move |leaf| {
                            let col = columns[leaf].clone();
                            let vals = lowered[leaf].clone();
                            let dict = dicts[gi * num_leaves + leaf].clone();
                            let pages = layout::plan_pages(
                                &fragments[leaf],
                                group.frag_start,
                                group.frag_end,
                                target_page_bytes,
                            );
                            let params = ChunkEncodeParams {
                                codec,
                                page_stats: granularity == StatisticsGranularity::Page,
                                stats_kind: stats_kind(&leaf_nodes[leaf]),
                            };
                            move || {
                                encode::encode_chunk(&col, &vals, &dict, &pages, row_start, &params)
                            }
                        }
                    })
                }))
                .await?;

            // Gather the batch into one device buffer, then stream it out
            // chunk by chunk while the footer metadata accumulates.
            let total: usize = chunks.iter().map(|c| c.bytes.len()).sum();
            let mut staging = self.allocator.allocate(total)?;
            let mut offsets = Vec::with_capacity(chunks.len());
            let mut cursor = 0usize;
            for chunk in &chunks {
                staging.as_mut_slice()[cursor..cursor + chunk.bytes.len()]
                    .copy_from_slice(&chunk.bytes);
                offsets.push(cursor);
                cursor += chunk.bytes.len();
            }

            for (gi, group) in batch_groups.iter().enumerate() {
                let mut group_columns = Vec::with_capacity(num_leaves);
                let mut total_byte_size = 0i64;
                for leaf in 0..num_leaves {
                    let chunk = &chunks[gi * num_leaves + leaf];
                    let chunk_offset = self.sink.tell() as i64;
                    self.sink
                        .write_device(&staging, offsets[gi * num_leaves + leaf], chunk.bytes.len())
                        .await?;
                    let node = &leaf_nodes[leaf];
                    let statistics = (self.options.statistics
                        != StatisticsGranularity::None)
                        .then(|| chunk.stats.to_format());
                    total_byte_size += chunk.total_uncompressed_size as i64;
                    group_columns.push(ColumnChunk {
                        file_path: None,
                        file_offset: chunk_offset,
                        meta_data: Some(ColumnMetaData {
                            type_: node
                                .physical
                                .unwrap_or(crate::schema::Physical::Undefined)
                                .to_format()?,
                            encodings: chunk.encodings.clone(),
                            path_in_schema: tree
                                .path_in_schema(tree.leaves[leaf]),
                            codec: self.codec,
                            num_values: chunk.num_values,
                            total_uncompressed_size: chunk.total_uncompressed_size as i64,
                            total_compressed_size: chunk.total_compressed_size as i64,
                            data_page_offset: chunk_offset + chunk.data_page_offset as i64,
                            dictionary_page_offset: chunk
                                .dictionary_page_offset
                                .map(|o| chunk_offset + o as i64),
                            statistics,
                        }),
                    });
                }
                self.row_groups.push(RowGroup {
                    columns: group_columns,
                    total_byte_size,
                    num_rows: group.num_rows as i64,
                });
            }
        }

        self.num_rows += batch.num_rows() as i64;
        Ok(())
    }

    fn file_metadata(&self) -> Result<FileMetaData> {
        let snapshot = self.schema.as_ref().ok_or_else(|| Error::InvalidInput {
            source: "close called before any write".into(),
            location: location!(),
        })?;
        Ok(FileMetaData {
            version: format::PARQUET_VERSION,
            schema: snapshot.elements.clone(),
            num_rows: self.num_rows,
            row_groups: self.row_groups.clone(),
            key_value_metadata: (!self.options.key_value_metadata.is_empty())
                .then(|| self.options.key_value_metadata.clone()),
            created_by: Some(
                self.options
                    .created_by
                    .clone()
                    .unwrap_or_else(|| {
                        format!("parquet-accel version {}", env!("CARGO_PKG_VERSION"))
                    }),
            ),
            column_order_count: Some(snapshot.tree.leaves.len()),
        })
    }

    /// Writes the footer and trailing magic, then flushes the sink.
    ///
    /// With `column_chunks_file_path` set, also returns the file's metadata
    /// as a framed blob with every chunk pointing at that path, suitable for
    /// [`merge_row_group_metadata`]. Closing an already closed writer is a
    /// no-op returning `None`.
    #[instrument(level = "debug", skip_all)]
    pub async fn close(
        &mut self,
        column_chunks_file_path: Option<&str>,
    ) -> Result<Option<Vec<u8>>> {
        match self.state {
            WriterState::Open => {}
            WriterState::Closed => return Ok(None),
            WriterState::Poisoned => {
                return Err(Error::Internal {
                    message: "writer poisoned by an earlier failure".into(),
                    location: location!(),
                })
            }
        }
        let metadata = self.file_metadata()?;
        let footer = metadata.to_thrift();
        self.sink.write_all(&footer).await?;
        self.sink.write_all(&(footer.len() as u32).to_le_bytes()).await?;
        self.sink.write_all(format::MAGIC).await?;
        self.sink.flush().await?;
        self.state = WriterState::Closed;
        debug!(
            "closed file: {} rows in {} row groups",
            metadata.num_rows,
            metadata.row_groups.len()
        );

        match column_chunks_file_path {
            Some(path) => {
                let mut blob_meta = metadata;
                for rg in &mut blob_meta.row_groups {
                    for chunk in &mut rg.columns {
                        chunk.file_path = Some(path.to_string());
                    }
                }
                Ok(Some(frame_metadata(&blob_meta.to_thrift())))
            }
            None => Ok(None),
        }
    }

    /// Consumes the writer, returning the sink.
    pub fn into_sink(self) -> S {
        self.sink
    }
}

/// Wraps serialized metadata in the same framing a data file carries, so
/// merge inputs and outputs are interchangeable with footer blobs.
fn frame_metadata(thrift: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(thrift.len() + 12);
    out.extend_from_slice(format::MAGIC);
    out.extend_from_slice(thrift);
    out.extend_from_slice(&(thrift.len() as u32).to_le_bytes());
    out.extend_from_slice(format::MAGIC);
    out
}

fn unframe_metadata(blob: &[u8]) -> Result<&[u8]> {
    if blob.len() < 12
        || &blob[..4] != format::MAGIC
        || &blob[blob.len() - 4..] != format::MAGIC
    {
        return Err(Error::InvalidInput {
            source: "metadata blob is not magic-framed".into(),
            location: location!(),
        });
    }
    let body = &blob[4..blob.len() - 8];
    let len = u32::from_le_bytes(blob[blob.len() - 8..blob.len() - 4].try_into().unwrap());
    if len as usize != body.len() {
        return Err(Error::InvalidInput {
            source: "metadata blob length trailer disagrees with its size".into(),
            location: location!(),
        });
    }
    Ok(body)
}

/// Merges per-file metadata blobs into one multi-file footer.
///
/// The first blob supplies the schema and file-level fields; later blobs
/// must carry a structurally identical schema. Row groups concatenate in
/// input order and row counts sum.
pub fn merge_row_group_metadata(blobs: &[Vec<u8>]) -> Result<Vec<u8>> {
    let mut iter = blobs.iter();
    let first = iter.next().ok_or_else(|| Error::InvalidInput {
        source: "no metadata blobs to merge".into(),
        location: location!(),
    })?;
    let mut merged = FileMetaData::from_thrift(unframe_metadata(first)?)?;
    for blob in iter {
        let next = FileMetaData::from_thrift(unframe_metadata(blob)?)?;
        if next.schema != merged.schema {
            return Err(Error::InvalidInput {
                source: "metadata blobs disagree on schema".into(),
                location: location!(),
            });
        }
        merged.num_rows += next.num_rows;
        merged.row_groups.extend(next.row_groups);
    }
    Ok(frame_metadata(&merged.to_thrift()))
}
