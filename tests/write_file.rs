// SPDX-License-Identifier: Apache-2.0
// SPDX-FileCopyrightText: Copyright The parquet-accel Authors

//! End-to-end write tests over a real file sink.

use std::sync::Arc;

use arrow_array::builder::{Int32Builder, ListBuilder};
use arrow_array::{Array, ArrayRef, Float64Array, Int32Array, RecordBatch, StringArray};
use arrow_schema::{DataType, Field, Schema};

use parquet_accel::accel::{DeviceAllocator, DeviceQueue, HostAllocator};
use parquet_accel::format::{self, FileMetaData, PhysicalType, Repetition};
use parquet_accel::{
    Compression, FileSink, FileWriter, MemorySink, StatisticsGranularity, WriteMode, WriterOptions,
};

fn sample_batch(num_rows: usize) -> RecordBatch {
    let ids: Vec<i32> = (0..num_rows as i32).collect();
    let names: Vec<Option<&str>> = (0..num_rows)
        .map(|i| {
            if i % 7 == 0 {
                None
            } else {
                Some(["alpha", "beta", "gamma"][i % 3])
            }
        })
        .collect();
    let scores: Vec<f64> = (0..num_rows).map(|i| i as f64 / 3.0).collect();
    let mut tags = ListBuilder::new(Int32Builder::new());
    for i in 0..num_rows {
        match i % 4 {
            0 => tags.append_value((0..(i % 5) as i32).map(Some)),
            1 => tags.append_value([]),
            2 => tags.append_null(),
            _ => tags.append_value([Some(i as i32)]),
        }
    }
    let tags = tags.finish();
    let schema = Schema::new(vec![
        Field::new("id", DataType::Int32, false),
        Field::new("name", DataType::Utf8, true),
        Field::new("score", DataType::Float64, false),
        Field::new("tags", tags.data_type().clone(), true),
    ]);
    RecordBatch::try_new(
        Arc::new(schema),
        vec![
            Arc::new(Int32Array::from(ids)) as ArrayRef,
            Arc::new(StringArray::from(names)),
            Arc::new(Float64Array::from(scores)),
            Arc::new(tags),
        ],
    )
    .unwrap()
}

fn parse_footer(bytes: &[u8]) -> FileMetaData {
    assert_eq!(&bytes[..4], b"PAR1");
    assert_eq!(&bytes[bytes.len() - 4..], b"PAR1");
    let len =
        u32::from_le_bytes(bytes[bytes.len() - 8..bytes.len() - 4].try_into().unwrap()) as usize;
    let start = bytes.len() - 8 - len;
    FileMetaData::from_thrift(&bytes[start..start + len]).unwrap()
}

#[tokio::test]
async fn test_write_mixed_schema_to_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sample.parquet");
    let sink = FileSink::try_new(&path).await.unwrap();
    let options = WriterOptions {
        statistics: StatisticsGranularity::Page,
        fragment_size: 100,
        ..Default::default()
    };
    let mut writer = FileWriter::try_new(sink, WriteMode::Single, options).unwrap();
    writer.write(&sample_batch(1000)).await.unwrap();
    writer.close(None).await.unwrap();

    let bytes = std::fs::read(&path).unwrap();
    let md = parse_footer(&bytes);
    assert_eq!(md.version, format::PARQUET_VERSION);
    assert_eq!(md.num_rows, 1000);
    assert_eq!(md.row_groups.len(), 1);

    // Four columns, with the list expanding into two extra schema levels.
    assert_eq!(md.schema.len(), 7);
    assert_eq!(md.schema[0].num_children, Some(4));
    let names: Vec<&str> = md.schema.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(
        names,
        vec!["schema", "id", "name", "score", "tags", "list", "element"]
    );
    assert_eq!(md.schema[5].repetition_type, Some(Repetition::Repeated));

    let group = &md.row_groups[0];
    assert_eq!(group.columns.len(), 4);
    let id_chunk = group.columns[0].meta_data.as_ref().unwrap();
    assert_eq!(id_chunk.type_, PhysicalType::Int32);
    assert_eq!(id_chunk.num_values, 1000);
    let id_stats = id_chunk.statistics.as_ref().unwrap();
    assert_eq!(id_stats.min.as_deref(), Some(&0i32.to_le_bytes()[..]));
    assert_eq!(id_stats.max.as_deref(), Some(&999i32.to_le_bytes()[..]));

    // Three distinct names dictionary-encode.
    let name_chunk = group.columns[1].meta_data.as_ref().unwrap();
    assert!(name_chunk.dictionary_page_offset.is_some());
    assert!(name_chunk.dictionary_page_offset.unwrap() < name_chunk.data_page_offset);
    let name_stats = name_chunk.statistics.as_ref().unwrap();
    assert_eq!(name_stats.min.as_deref(), Some(b"alpha".as_slice()));
    assert!(name_stats.null_count.unwrap() > 0);

    // Offsets land inside the file, after the header magic.
    for chunk in &group.columns {
        let meta = chunk.meta_data.as_ref().unwrap();
        assert!(meta.data_page_offset >= 4);
        assert!((meta.data_page_offset as usize) < bytes.len());
    }
}

#[tokio::test]
async fn test_chunked_file_matches_accumulated_rows() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("chunked.parquet");
    let sink = FileSink::try_new(&path).await.unwrap();
    let mut writer =
        FileWriter::try_new(sink, WriteMode::Chunked, WriterOptions::default()).unwrap();
    for _ in 0..3 {
        writer.write(&sample_batch(200)).await.unwrap();
    }
    writer.close(None).await.unwrap();

    let bytes = std::fs::read(&path).unwrap();
    let md = parse_footer(&bytes);
    assert_eq!(md.num_rows, 600);
    assert_eq!(md.row_groups.len(), 3);
    let total: i64 = md.row_groups.iter().map(|g| g.num_rows).sum();
    assert_eq!(total, 600);
    // Chunked mode marks data-derived columns optional.
    assert_eq!(md.schema[1].repetition_type, Some(Repetition::Optional));
}

#[tokio::test]
async fn test_batch_cap_bounds_staging_memory() {
    let allocator = Arc::new(HostAllocator::new());
    let options = WriterOptions {
        compression: Compression::None,
        fragment_size: 50,
        max_row_group_rows: 100,
        // Force one row group per encode batch.
        max_batch_bytes: 1,
        ..Default::default()
    };
    let mut writer = FileWriter::try_new_with_device(
        MemorySink::new(),
        WriteMode::Single,
        options,
        allocator.clone(),
        DeviceQueue::new(),
    )
    .unwrap();
    writer.write(&sample_batch(1000)).await.unwrap();
    writer.close(None).await.unwrap();

    let bytes = writer.into_sink().into_bytes();
    let md = parse_footer(&bytes);
    assert_eq!(md.row_groups.len(), 10);

    // Staging held one row group at a time, so the high-water mark stays
    // well below the total encoded size.
    let total_encoded: i64 = md
        .row_groups
        .iter()
        .flat_map(|g| &g.columns)
        .map(|c| c.meta_data.as_ref().unwrap().total_compressed_size)
        .sum();
    assert!(allocator.peak_bytes() > 0);
    assert!((allocator.peak_bytes() as i64) < total_encoded);
    assert_eq!(allocator.allocated_bytes(), 0);
}

#[tokio::test]
async fn test_snappy_file_smaller_than_uncompressed() {
    async fn write_with(compression: Compression) -> usize {
        let options = WriterOptions {
            compression,
            ..Default::default()
        };
        let mut writer =
            FileWriter::try_new(MemorySink::new(), WriteMode::Single, options).unwrap();
        let data: Vec<Option<&str>> = (0..2000).map(|_| Some("repetitive payload")).collect();
        let batch = RecordBatch::try_new(
            Arc::new(Schema::new(vec![Field::new("s", DataType::Utf8, false)])),
            vec![Arc::new(StringArray::from(data)) as ArrayRef],
        )
        .unwrap();
        writer.write(&batch).await.unwrap();
        writer.close(None).await.unwrap();
        writer.into_sink().into_bytes().len()
    }
    let plain = write_with(Compression::None).await;
    let snappy = write_with(Compression::Snappy).await;
    assert!(snappy < plain);
}
