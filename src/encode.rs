// SPDX-License-Identifier: Apache-2.0
// SPDX-FileCopyrightText: Copyright The parquet-accel Authors

//! Page encoding: level streams, plain and dictionary value encodings, page
//! headers and compression.
//!
//! Everything in this module is synchronous and owns its inputs, so chunk
//! encodes run whole on the device queue.

use snafu::location;

use crate::column::LeveledColumn;
use crate::error::{Error, Result};
use crate::format::{
    CompressionCodec, Encoding, PageHeader, PageType, Statistics,
};
use crate::layout::{DictDecision, PagePlan};
use crate::schema::StatisticsKind;
use crate::statistics;
use crate::values::PhysicalValues;

/// Bits needed to store values in `0..=max`.
pub fn bit_width(max: u16) -> u8 {
    if max == 0 {
        0
    } else {
        (16 - max.leading_zeros()) as u8
    }
}

fn write_varint(out: &mut Vec<u8>, mut v: u64) {
    loop {
        let b = (v & 0x7f) as u8;
        v >>= 7;
        if v == 0 {
            out.push(b);
            break;
        }
        out.push(b | 0x80);
    }
}

/// RLE/bit-packed hybrid encoding.
///
/// Runs of eight or more identical values become RLE runs; everything else
/// accumulates into bit-packed groups of eight values, zero padded at the
/// tail.
pub fn encode_rle_hybrid(values: &[u32], width: u8) -> Vec<u8> {
    let mut out = Vec::new();
    if width == 0 {
        return out;
    }
    let value_bytes = ((width as usize) + 7) / 8;
    let mut literals: Vec<u32> = Vec::new();
    let mut i = 0;
    while i < values.len() {
        let mut run = 1;
        while i + run < values.len() && values[i + run] == values[i] {
            run += 1;
        }
        if run >= 8 {
            flush_literals(&mut out, &mut literals, width);
            write_varint(&mut out, (run as u64) << 1);
            let v = values[i];
            out.extend_from_slice(&v.to_le_bytes()[..value_bytes]);
            i += run;
        } else {
            literals.extend_from_slice(&values[i..i + run]);
            i += run;
        }
    }
    flush_literals(&mut out, &mut literals, width);
    out
}

fn flush_literals(out: &mut Vec<u8>, literals: &mut Vec<u32>, width: u8) {
    if literals.is_empty() {
        return;
    }
    let groups = (literals.len() + 7) / 8;
    literals.resize(groups * 8, 0);
    write_varint(out, ((groups as u64) << 1) | 1);
    let mut acc: u64 = 0;
    let mut bits = 0u32;
    for &v in literals.iter() {
        acc |= (v as u64) << bits;
        bits += width as u32;
        while bits >= 8 {
            out.push((acc & 0xff) as u8);
            acc >>= 8;
            bits -= 8;
        }
    }
    if bits > 0 {
        out.push((acc & 0xff) as u8);
    }
    literals.clear();
}

/// V1 level stream: four-byte little endian length, then the hybrid runs.
fn encode_levels(levels: &[u16], max_level: u16, out: &mut Vec<u8>) {
    let expanded: Vec<u32> = levels.iter().map(|&v| v as u32).collect();
    let encoded = encode_rle_hybrid(&expanded, bit_width(max_level));
    out.extend_from_slice(&(encoded.len() as u32).to_le_bytes());
    out.extend_from_slice(&encoded);
}

/// Plain-encodes the values selected by `indices` (absolute positions in
/// `values`).
pub fn encode_plain(values: &PhysicalValues, indices: &[usize], out: &mut Vec<u8>) {
    match values {
        PhysicalValues::Boolean(v) => {
            let mut acc = 0u8;
            let mut bits = 0;
            for &i in indices {
                acc |= (v[i] as u8) << bits;
                bits += 1;
                if bits == 8 {
                    out.push(acc);
                    acc = 0;
                    bits = 0;
                }
            }
            if bits > 0 {
                out.push(acc);
            }
        }
        PhysicalValues::Int32(v) => {
            for &i in indices {
                out.extend_from_slice(&v[i].to_le_bytes());
            }
        }
        PhysicalValues::Int64(v) => {
            for &i in indices {
                out.extend_from_slice(&v[i].to_le_bytes());
            }
        }
        PhysicalValues::Int96(v) => {
            for &i in indices {
                out.extend_from_slice(&v[i].0.to_le_bytes());
                out.extend_from_slice(&v[i].1.to_le_bytes());
            }
        }
        PhysicalValues::Float(v) => {
            for &i in indices {
                out.extend_from_slice(&v[i].to_le_bytes());
            }
        }
        PhysicalValues::Double(v) => {
            for &i in indices {
                out.extend_from_slice(&v[i].to_le_bytes());
            }
        }
        PhysicalValues::ByteArray(v) => {
            for &i in indices {
                out.extend_from_slice(&(v[i].len() as u32).to_le_bytes());
                out.extend_from_slice(&v[i]);
            }
        }
    }
}

/// Compresses a page payload, keeping the original when compression does not
/// shrink it. Returns the bytes actually stored and whether they are
/// compressed.
fn compress(codec: CompressionCodec, payload: Vec<u8>) -> Result<(Vec<u8>, bool)> {
    match codec {
        CompressionCodec::Uncompressed => Ok((payload, false)),
        CompressionCodec::Snappy => {
            let mut encoder = snap::raw::Encoder::new();
            let compressed = encoder.compress_vec(&payload).map_err(|e| Error::Internal {
                message: format!("snappy compression failed: {e}"),
                location: location!(),
            })?;
            if compressed.len() < payload.len() {
                Ok((compressed, true))
            } else {
                Ok((payload, false))
            }
        }
    }
}

/// One encoded column chunk: dictionary page (if any) followed by data
/// pages, with offsets relative to the start of `bytes`.
#[derive(Debug, Clone)]
pub struct EncodedChunk {
    pub bytes: Vec<u8>,
    pub dictionary_page_offset: Option<usize>,
    pub data_page_offset: usize,
    pub total_uncompressed_size: usize,
    pub total_compressed_size: usize,
    pub num_values: i64,
    pub encodings: Vec<Encoding>,
    pub stats: ColumnChunkStats,
}

pub type ColumnChunkStats = crate::statistics::ColumnStats;

pub struct ChunkEncodeParams {
    pub codec: CompressionCodec,
    /// Attach statistics to each data page header.
    pub page_stats: bool,
    pub stats_kind: StatisticsKind,
}

/// Encodes every page of one leaf chunk. Runs as a device kernel.
pub fn encode_chunk(
    column: &LeveledColumn,
    values: &PhysicalValues,
    dict: &DictDecision,
    pages: &[PagePlan],
    chunk_row_start: usize,
    params: &ChunkEncodeParams,
) -> Result<EncodedChunk> {
    let mut bytes = Vec::new();
    let mut total_uncompressed = 0usize;
    let mut total_compressed = 0usize;
    let mut chunk_stats = ColumnChunkStats::default();
    let mut num_values = 0i64;

    let dictionary_page_offset = if dict.use_dictionary {
        let mut payload = Vec::new();
        if let PhysicalValues::ByteArray(_) = values {
            for entry in &dict.entries {
                payload.extend_from_slice(&(entry.len() as u32).to_le_bytes());
                payload.extend_from_slice(entry);
            }
        } else {
            for entry in &dict.entries {
                payload.extend_from_slice(entry);
            }
        }
        let uncompressed = payload.len();
        let (stored, _) = compress(params.codec, payload)?;
        let header = PageHeader {
            type_: PageType::DictionaryPage,
            uncompressed_page_size: uncompressed as i32,
            compressed_page_size: stored.len() as i32,
            num_values: dict.entries.len() as i32,
            encoding: Encoding::PlainDictionary,
            statistics: None,
        }
        .to_thrift();
        total_uncompressed += header.len() + uncompressed;
        total_compressed += header.len() + stored.len();
        bytes.extend_from_slice(&header);
        bytes.extend_from_slice(&stored);
        Some(0)
    } else {
        None
    };

    let data_page_offset = bytes.len();
    let (chunk_val_start, _) = column.value_range(chunk_row_start, chunk_row_start);
    for page in pages {
        let (slot_start, slot_end) = column.slot_range(page.row_start, page.row_end);
        let (val_start, val_end) = column.value_range(page.row_start, page.row_end);

        let mut payload = Vec::new();
        if column.max_rep > 0 {
            encode_levels(&column.rep[slot_start..slot_end], column.max_rep, &mut payload);
        }
        if column.max_def > 0 {
            encode_levels(&column.def[slot_start..slot_end], column.max_def, &mut payload);
        }
        let encoding = if dict.use_dictionary {
            let indices = &dict.indices[val_start - chunk_val_start..val_end - chunk_val_start];
            payload.push(dict.index_bits);
            payload.extend_from_slice(&encode_rle_hybrid(indices, dict.index_bits));
            Encoding::PlainDictionary
        } else {
            encode_plain(values, &column.value_index[val_start..val_end], &mut payload);
            Encoding::Plain
        };

        let page_stats = statistics::gather(
            column,
            values,
            params.stats_kind,
            page.row_start,
            page.row_end,
        );
        let header_stats: Option<Statistics> =
            params.page_stats.then(|| page_stats.to_format());
        chunk_stats.merge(&page_stats);
        num_values += (slot_end - slot_start) as i64;

        let uncompressed = payload.len();
        let (stored, _) = compress(params.codec, payload)?;
        let header = PageHeader {
            type_: PageType::DataPage,
            uncompressed_page_size: uncompressed as i32,
            compressed_page_size: stored.len() as i32,
            num_values: (slot_end - slot_start) as i32,
            encoding,
            statistics: header_stats,
        }
        .to_thrift();
        total_uncompressed += header.len() + uncompressed;
        total_compressed += header.len() + stored.len();
        bytes.extend_from_slice(&header);
        bytes.extend_from_slice(&stored);
    }

    let mut encodings = vec![Encoding::Rle];
    encodings.push(if dict.use_dictionary {
        Encoding::PlainDictionary
    } else {
        Encoding::Plain
    });

    Ok(EncodedChunk {
        bytes,
        dictionary_page_offset,
        data_page_offset,
        total_uncompressed_size: total_uncompressed,
        total_compressed_size: total_compressed,
        num_values,
        encodings,
        stats: chunk_stats,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::build_levels;
    use crate::fragment::{build_fragment, split_rows};
    use crate::layout::{build_dictionary, plan_pages};
    use crate::schema::SchemaTree;
    use arrow_array::{ArrayRef, Int32Array, RecordBatch, StringArray};
    use arrow_schema::{DataType, Field, Schema};
    use std::sync::Arc;

    #[test]
    fn test_bit_width() {
        assert_eq!(bit_width(0), 0);
        assert_eq!(bit_width(1), 1);
        assert_eq!(bit_width(2), 2);
        assert_eq!(bit_width(3), 2);
        assert_eq!(bit_width(255), 8);
        assert_eq!(bit_width(256), 9);
    }

    #[test]
    fn test_rle_run() {
        // 16 identical values: one RLE run, header (16 << 1), one value byte.
        let encoded = encode_rle_hybrid(&[1; 16], 1);
        assert_eq!(encoded, vec![32, 1]);
    }

    #[test]
    fn test_bit_packed_group() {
        // Alternating bits cannot run: one literal group of 8.
        let encoded = encode_rle_hybrid(&[0, 1, 0, 1, 0, 1, 0, 1], 1);
        // Header (1 << 1) | 1 = 3, then 0b10101010.
        assert_eq!(encoded, vec![3, 0xaa]);
    }

    #[test]
    fn test_rle_multibyte_value() {
        let encoded = encode_rle_hybrid(&[300; 10], 9);
        assert_eq!(encoded, vec![20, 44, 1]);
    }

    #[test]
    fn test_plain_bool_bitpacks() {
        let values = PhysicalValues::Boolean(vec![true, false, true, true]);
        let mut out = Vec::new();
        encode_plain(&values, &[0, 1, 2, 3], &mut out);
        assert_eq!(out, vec![0b1101]);
    }

    #[test]
    fn test_plain_strings_length_prefixed() {
        let values = PhysicalValues::ByteArray(vec![b"ab".to_vec(), b"".to_vec()]);
        let mut out = Vec::new();
        encode_plain(&values, &[0, 1], &mut out);
        assert_eq!(out, vec![2, 0, 0, 0, b'a', b'b', 0, 0, 0, 0]);
    }

    fn chunk_for(batch: &RecordBatch, codec: CompressionCodec, with_dict: bool) -> EncodedChunk {
        let tree = SchemaTree::build(batch, None, true, false).unwrap();
        let node = &tree.nodes[tree.leaves[0]];
        let cols = build_levels(&tree, batch).unwrap();
        let values = crate::values::lower(&cols[0].values, node).unwrap();
        let frags: Vec<_> = split_rows(batch.num_rows(), 5000)
            .into_iter()
            .map(|(a, b)| build_fragment(&cols[0], &values, node.stats_kind, a, b))
            .collect();
        let plain: usize = frags.iter().map(|f| f.plain_size).sum();
        let dict = if with_dict {
            build_dictionary(
                &cols[0],
                &values,
                node.physical.unwrap(),
                0,
                batch.num_rows(),
                plain,
            )
        } else {
            DictDecision::default()
        };
        let pages = plan_pages(&frags, 0, frags.len(), crate::layout::DEFAULT_PAGE_BYTES);
        encode_chunk(
            &cols[0],
            &values,
            &dict,
            &pages,
            0,
            &ChunkEncodeParams {
                codec,
                page_stats: false,
                stats_kind: node.stats_kind,
            },
        )
        .unwrap()
    }

    #[test]
    fn test_encode_plain_int_chunk() {
        let batch = RecordBatch::try_new(
            Arc::new(Schema::new(vec![Field::new("a", DataType::Int32, false)])),
            vec![Arc::new(Int32Array::from((0..100).collect::<Vec<_>>())) as ArrayRef],
        )
        .unwrap();
        let chunk = chunk_for(&batch, CompressionCodec::Uncompressed, false);
        assert!(chunk.dictionary_page_offset.is_none());
        assert_eq!(chunk.data_page_offset, 0);
        assert_eq!(chunk.num_values, 100);
        assert_eq!(chunk.total_compressed_size, chunk.total_uncompressed_size);
        assert_eq!(chunk.encodings, vec![Encoding::Rle, Encoding::Plain]);
        // Page payload carries 400 plain bytes after the header.
        assert!(chunk.bytes.len() > 400);
    }

    #[test]
    fn test_encode_dictionary_chunk() {
        let data: Vec<Option<&str>> =
            (0..64).map(|i| Some(["x", "yy", "zzz"][i % 3])).collect();
        let batch = RecordBatch::try_new(
            Arc::new(Schema::new(vec![Field::new("s", DataType::Utf8, false)])),
            vec![Arc::new(StringArray::from(data)) as ArrayRef],
        )
        .unwrap();
        let chunk = chunk_for(&batch, CompressionCodec::Uncompressed, true);
        assert_eq!(chunk.dictionary_page_offset, Some(0));
        assert!(chunk.data_page_offset > 0);
        assert!(chunk.encodings.contains(&Encoding::PlainDictionary));
    }

    #[test]
    fn test_snappy_helps_repetitive_data() {
        let batch = RecordBatch::try_new(
            Arc::new(Schema::new(vec![Field::new("a", DataType::Int32, false)])),
            vec![Arc::new(Int32Array::from(vec![7; 2048])) as ArrayRef],
        )
        .unwrap();
        let chunk = chunk_for(&batch, CompressionCodec::Snappy, false);
        assert!(chunk.total_compressed_size < chunk.total_uncompressed_size);
    }

    #[test]
    fn test_incompressible_payload_kept_plain() {
        let payload: Vec<u8> = (0..64u8).collect();
        let (stored, compressed) = compress(CompressionCodec::Snappy, payload.clone()).unwrap();
        if !compressed {
            assert_eq!(stored, payload);
        } else {
            assert!(stored.len() < payload.len());
        }
    }
}
