// SPDX-License-Identifier: Apache-2.0
// SPDX-FileCopyrightText: Copyright The parquet-accel Authors

//! On-disk Parquet metadata structures.
//!
//! These mirror the Thrift definitions in `parquet.thrift` (field ids
//! included) and are serialized with the compact protocol codec in
//! [`thrift`]. Only the subset the write path produces is modeled; the
//! reader side skips anything else so foreign footers can be merged.

pub mod thrift;

use snafu::location;

use crate::error::{Error, Result};
use thrift::{CompactReader, CompactWriter, FieldType};

/// Magic bytes at both ends of a Parquet file.
pub const MAGIC: &[u8; 4] = b"PAR1";
/// Footer format version we produce.
pub const PARQUET_VERSION: i32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhysicalType {
    Boolean = 0,
    Int32 = 1,
    Int64 = 2,
    Int96 = 3,
    Float = 4,
    Double = 5,
    ByteArray = 6,
    FixedLenByteArray = 7,
}

impl PhysicalType {
    fn from_i32(v: i32) -> Result<Self> {
        Ok(match v {
            0 => Self::Boolean,
            1 => Self::Int32,
            2 => Self::Int64,
            3 => Self::Int96,
            4 => Self::Float,
            5 => Self::Double,
            6 => Self::ByteArray,
            7 => Self::FixedLenByteArray,
            other => {
                return Err(Error::InvalidInput {
                    source: format!("unknown parquet physical type {other}").into(),
                    location: location!(),
                })
            }
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Repetition {
    Required = 0,
    Optional = 1,
    Repeated = 2,
}

impl Repetition {
    fn from_i32(v: i32) -> Result<Self> {
        Ok(match v {
            0 => Self::Required,
            1 => Self::Optional,
            2 => Self::Repeated,
            other => {
                return Err(Error::InvalidInput {
                    source: format!("unknown repetition type {other}").into(),
                    location: location!(),
                })
            }
        })
    }
}

/// Legacy `ConvertedType` annotations, the logical-type vocabulary the
/// original writer emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvertedType {
    Utf8 = 0,
    List = 3,
    Decimal = 5,
    Date = 6,
    TimeMillis = 7,
    TimeMicros = 8,
    TimestampMillis = 9,
    TimestampMicros = 10,
    Uint8 = 11,
    Uint16 = 12,
    Uint32 = 13,
    Uint64 = 14,
    Int8 = 15,
    Int16 = 16,
    Int32 = 17,
    Int64 = 18,
}

impl ConvertedType {
    fn from_i32(v: i32) -> Option<Self> {
        Some(match v {
            0 => Self::Utf8,
            3 => Self::List,
            5 => Self::Decimal,
            6 => Self::Date,
            7 => Self::TimeMillis,
            8 => Self::TimeMicros,
            9 => Self::TimestampMillis,
            10 => Self::TimestampMicros,
            11 => Self::Uint8,
            12 => Self::Uint16,
            13 => Self::Uint32,
            14 => Self::Uint64,
            15 => Self::Int8,
            16 => Self::Int16,
            17 => Self::Int32,
            18 => Self::Int64,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Plain = 0,
    PlainDictionary = 2,
    Rle = 3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompressionCodec {
    #[default]
    Uncompressed = 0,
    Snappy = 1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageType {
    DataPage = 0,
    DictionaryPage = 2,
}

/// One flattened schema entry of the footer's pre-order schema list.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SchemaElement {
    pub type_: Option<PhysicalType>,
    pub type_length: Option<i32>,
    pub repetition_type: Option<Repetition>,
    pub name: String,
    pub num_children: Option<i32>,
    pub converted_type: Option<ConvertedType>,
    pub scale: Option<i32>,
    pub precision: Option<i32>,
}

impl SchemaElement {
    fn write(&self, w: &mut CompactWriter) {
        w.struct_begin();
        if let Some(t) = self.type_ {
            w.field_i32(1, t as i32);
        }
        if let Some(l) = self.type_length {
            w.field_i32(2, l);
        }
        if let Some(r) = self.repetition_type {
            w.field_i32(3, r as i32);
        }
        w.field_string(4, &self.name);
        if let Some(n) = self.num_children {
            w.field_i32(5, n);
        }
        if let Some(c) = self.converted_type {
            w.field_i32(6, c as i32);
        }
        if let Some(s) = self.scale {
            w.field_i32(7, s);
        }
        if let Some(p) = self.precision {
            w.field_i32(8, p);
        }
        w.struct_end();
    }

    fn read(r: &mut CompactReader) -> Result<Self> {
        let mut out = Self::default();
        r.struct_begin();
        while let Some((id, ty)) = r.field_header()? {
            match id {
                1 => out.type_ = Some(PhysicalType::from_i32(r.read_i32()?)?),
                2 => out.type_length = Some(r.read_i32()?),
                3 => out.repetition_type = Some(Repetition::from_i32(r.read_i32()?)?),
                4 => out.name = r.read_string()?,
                5 => out.num_children = Some(r.read_i32()?),
                // Annotations we never write decode to None rather than
                // failing the whole merge.
                6 => out.converted_type = ConvertedType::from_i32(r.read_i32()?),
                7 => out.scale = Some(r.read_i32()?),
                8 => out.precision = Some(r.read_i32()?),
                _ => r.skip(ty)?,
            }
        }
        r.struct_end();
        Ok(out)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Statistics {
    pub max: Option<Vec<u8>>,
    pub min: Option<Vec<u8>>,
    pub null_count: Option<i64>,
    pub distinct_count: Option<i64>,
}

impl Statistics {
    fn write(&self, w: &mut CompactWriter) {
        w.struct_begin();
        if let Some(v) = &self.max {
            w.field_binary(1, v);
        }
        if let Some(v) = &self.min {
            w.field_binary(2, v);
        }
        if let Some(v) = self.null_count {
            w.field_i64(3, v);
        }
        if let Some(v) = self.distinct_count {
            w.field_i64(4, v);
        }
        // Fields 5/6 (min_value/max_value) carry the same bytes for the
        // total orderings we produce.
        if let Some(v) = &self.max {
            w.field_binary(5, v);
        }
        if let Some(v) = &self.min {
            w.field_binary(6, v);
        }
        w.struct_end();
    }

    fn read(r: &mut CompactReader) -> Result<Self> {
        let mut out = Self::default();
        r.struct_begin();
        while let Some((id, ty)) = r.field_header()? {
            match id {
                1 => out.max = Some(r.read_binary()?),
                2 => out.min = Some(r.read_binary()?),
                3 => out.null_count = Some(r.read_i64()?),
                4 => out.distinct_count = Some(r.read_i64()?),
                _ => r.skip(ty)?,
            }
        }
        r.struct_end();
        Ok(out)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnMetaData {
    pub type_: PhysicalType,
    pub encodings: Vec<Encoding>,
    pub path_in_schema: Vec<String>,
    pub codec: CompressionCodec,
    pub num_values: i64,
    pub total_uncompressed_size: i64,
    pub total_compressed_size: i64,
    pub data_page_offset: i64,
    pub dictionary_page_offset: Option<i64>,
    pub statistics: Option<Statistics>,
}

impl ColumnMetaData {
    fn write(&self, w: &mut CompactWriter) {
        w.struct_begin();
        w.field_i32(1, self.type_ as i32);
        w.field_list(2, FieldType::I32, self.encodings.len());
        for e in &self.encodings {
            w.elem_i32(*e as i32);
        }
        w.field_list(3, FieldType::Binary, self.path_in_schema.len());
        for p in &self.path_in_schema {
            w.elem_string(p);
        }
        w.field_i32(4, self.codec as i32);
        w.field_i64(5, self.num_values);
        w.field_i64(6, self.total_uncompressed_size);
        w.field_i64(7, self.total_compressed_size);
        w.field_i64(9, self.data_page_offset);
        if let Some(off) = self.dictionary_page_offset {
            w.field_i64(11, off);
        }
        if let Some(stats) = &self.statistics {
            w.field_struct(12);
            stats.write(w);
        }
        w.struct_end();
    }

    fn read(r: &mut CompactReader) -> Result<Self> {
        let mut out = Self {
            type_: PhysicalType::Boolean,
            encodings: Vec::new(),
            path_in_schema: Vec::new(),
            codec: CompressionCodec::Uncompressed,
            num_values: 0,
            total_uncompressed_size: 0,
            total_compressed_size: 0,
            data_page_offset: 0,
            dictionary_page_offset: None,
            statistics: None,
        };
        r.struct_begin();
        while let Some((id, ty)) = r.field_header()? {
            match id {
                1 => out.type_ = PhysicalType::from_i32(r.read_i32()?)?,
                2 => {
                    let (_, len) = r.list_header()?;
                    for _ in 0..len {
                        out.encodings.push(match r.read_i32()? {
                            0 => Encoding::Plain,
                            2 => Encoding::PlainDictionary,
                            _ => Encoding::Rle,
                        });
                    }
                }
                3 => {
                    let (_, len) = r.list_header()?;
                    for _ in 0..len {
                        out.path_in_schema.push(r.read_string()?);
                    }
                }
                4 => {
                    out.codec = match r.read_i32()? {
                        1 => CompressionCodec::Snappy,
                        _ => CompressionCodec::Uncompressed,
                    }
                }
                5 => out.num_values = r.read_i64()?,
                6 => out.total_uncompressed_size = r.read_i64()?,
                7 => out.total_compressed_size = r.read_i64()?,
                9 => out.data_page_offset = r.read_i64()?,
                11 => out.dictionary_page_offset = Some(r.read_i64()?),
                12 => out.statistics = Some(Statistics::read(r)?),
                _ => r.skip(ty)?,
            }
        }
        r.struct_end();
        Ok(out)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnChunk {
    pub file_path: Option<String>,
    pub file_offset: i64,
    pub meta_data: Option<ColumnMetaData>,
}

impl ColumnChunk {
    fn write(&self, w: &mut CompactWriter) {
        w.struct_begin();
        if let Some(p) = &self.file_path {
            w.field_string(1, p);
        }
        w.field_i64(2, self.file_offset);
        if let Some(md) = &self.meta_data {
            w.field_struct(3);
            md.write(w);
        }
        w.struct_end();
    }

    fn read(r: &mut CompactReader) -> Result<Self> {
        let mut out = Self {
            file_path: None,
            file_offset: 0,
            meta_data: None,
        };
        r.struct_begin();
        while let Some((id, ty)) = r.field_header()? {
            match id {
                1 => out.file_path = Some(r.read_string()?),
                2 => out.file_offset = r.read_i64()?,
                3 => out.meta_data = Some(ColumnMetaData::read(r)?),
                _ => r.skip(ty)?,
            }
        }
        r.struct_end();
        Ok(out)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RowGroup {
    pub columns: Vec<ColumnChunk>,
    pub total_byte_size: i64,
    pub num_rows: i64,
}

impl RowGroup {
    fn write(&self, w: &mut CompactWriter) {
        w.struct_begin();
        w.field_list(1, FieldType::Struct, self.columns.len());
        for c in &self.columns {
            c.write(w);
        }
        w.field_i64(2, self.total_byte_size);
        w.field_i64(3, self.num_rows);
        w.struct_end();
    }

    fn read(r: &mut CompactReader) -> Result<Self> {
        let mut out = Self::default();
        r.struct_begin();
        while let Some((id, ty)) = r.field_header()? {
            match id {
                1 => {
                    let (_, len) = r.list_header()?;
                    for _ in 0..len {
                        out.columns.push(ColumnChunk::read(r)?);
                    }
                }
                2 => out.total_byte_size = r.read_i64()?,
                3 => out.num_rows = r.read_i64()?,
                _ => r.skip(ty)?,
            }
        }
        r.struct_end();
        Ok(out)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct KeyValue {
    pub key: String,
    pub value: Option<String>,
}

/// The accumulated footer structure.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FileMetaData {
    pub version: i32,
    pub schema: Vec<SchemaElement>,
    pub num_rows: i64,
    pub row_groups: Vec<RowGroup>,
    pub key_value_metadata: Option<Vec<KeyValue>>,
    pub created_by: Option<String>,
    /// Count of leaf columns ordered by the default type-defined order.
    /// `Some(n)` emits `n` TypeDefinedOrder entries.
    pub column_order_count: Option<usize>,
}

impl FileMetaData {
    pub fn to_thrift(&self) -> Vec<u8> {
        let mut w = CompactWriter::new();
        w.struct_begin();
        w.field_i32(1, self.version);
        w.field_list(2, FieldType::Struct, self.schema.len());
        for s in &self.schema {
            s.write(&mut w);
        }
        w.field_i64(3, self.num_rows);
        w.field_list(4, FieldType::Struct, self.row_groups.len());
        for rg in &self.row_groups {
            rg.write(&mut w);
        }
        if let Some(kvs) = &self.key_value_metadata {
            w.field_list(5, FieldType::Struct, kvs.len());
            for kv in kvs {
                w.struct_begin();
                w.field_string(1, &kv.key);
                if let Some(v) = &kv.value {
                    w.field_string(2, v);
                }
                w.struct_end();
            }
        }
        if let Some(by) = &self.created_by {
            w.field_string(6, by);
        }
        if let Some(n) = self.column_order_count {
            // ColumnOrder is a union holding the empty TypeDefinedOrder.
            w.field_list(7, FieldType::Struct, n);
            for _ in 0..n {
                w.struct_begin();
                w.field_struct(1);
                w.struct_begin();
                w.struct_end();
                w.struct_end();
            }
        }
        w.struct_end();
        w.into_bytes()
    }

    pub fn from_thrift(buf: &[u8]) -> Result<Self> {
        let mut r = CompactReader::new(buf);
        let mut out = Self::default();
        r.struct_begin();
        while let Some((id, ty)) = r.field_header()? {
            match id {
                1 => out.version = r.read_i32()?,
                2 => {
                    let (_, len) = r.list_header()?;
                    for _ in 0..len {
                        out.schema.push(SchemaElement::read(&mut r)?);
                    }
                }
                3 => out.num_rows = r.read_i64()?,
                4 => {
                    let (_, len) = r.list_header()?;
                    for _ in 0..len {
                        out.row_groups.push(RowGroup::read(&mut r)?);
                    }
                }
                5 => {
                    let (_, len) = r.list_header()?;
                    let mut kvs = Vec::with_capacity(len);
                    for _ in 0..len {
                        let mut kv = KeyValue::default();
                        r.struct_begin();
                        while let Some((kid, kty)) = r.field_header()? {
                            match kid {
                                1 => kv.key = r.read_string()?,
                                2 => kv.value = Some(r.read_string()?),
                                _ => r.skip(kty)?,
                            }
                        }
                        r.struct_end();
                        kvs.push(kv);
                    }
                    out.key_value_metadata = Some(kvs);
                }
                6 => out.created_by = Some(r.read_string()?),
                7 => {
                    let (_, len) = r.list_header()?;
                    for _ in 0..len {
                        r.skip(FieldType::Struct)?;
                    }
                    out.column_order_count = Some(len);
                }
                _ => r.skip(ty)?,
            }
        }
        r.struct_end();
        Ok(out)
    }
}

/// Serialized page header preceding every dictionary or data page.
#[derive(Debug, Clone)]
pub struct PageHeader {
    pub type_: PageType,
    pub uncompressed_page_size: i32,
    pub compressed_page_size: i32,
    /// Data pages only.
    pub num_values: i32,
    pub encoding: Encoding,
    pub statistics: Option<Statistics>,
}

impl PageHeader {
    pub fn to_thrift(&self) -> Vec<u8> {
        let mut w = CompactWriter::new();
        w.struct_begin();
        w.field_i32(1, self.type_ as i32);
        w.field_i32(2, self.uncompressed_page_size);
        w.field_i32(3, self.compressed_page_size);
        match self.type_ {
            PageType::DataPage => {
                w.field_struct(5);
                w.struct_begin();
                w.field_i32(1, self.num_values);
                w.field_i32(2, self.encoding as i32);
                w.field_i32(3, Encoding::Rle as i32);
                w.field_i32(4, Encoding::Rle as i32);
                if let Some(stats) = &self.statistics {
                    w.field_struct(5);
                    stats.write(&mut w);
                }
                w.struct_end();
            }
            PageType::DictionaryPage => {
                w.field_struct(7);
                w.struct_begin();
                w.field_i32(1, self.num_values);
                w.field_i32(2, self.encoding as i32);
                w.struct_end();
            }
        }
        w.struct_end();
        w.into_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_metadata() -> FileMetaData {
        FileMetaData {
            version: PARQUET_VERSION,
            schema: vec![
                SchemaElement {
                    name: "schema".into(),
                    num_children: Some(1),
                    ..Default::default()
                },
                SchemaElement {
                    type_: Some(PhysicalType::Int32),
                    repetition_type: Some(Repetition::Optional),
                    name: "a".into(),
                    converted_type: Some(ConvertedType::Int8),
                    ..Default::default()
                },
            ],
            num_rows: 10,
            row_groups: vec![RowGroup {
                columns: vec![ColumnChunk {
                    file_path: None,
                    file_offset: 4,
                    meta_data: Some(ColumnMetaData {
                        type_: PhysicalType::Int32,
                        encodings: vec![Encoding::Plain, Encoding::Rle],
                        path_in_schema: vec!["a".into()],
                        codec: CompressionCodec::Snappy,
                        num_values: 10,
                        total_uncompressed_size: 100,
                        total_compressed_size: 60,
                        data_page_offset: 4,
                        dictionary_page_offset: None,
                        statistics: Some(Statistics {
                            max: Some(7i32.to_le_bytes().to_vec()),
                            min: Some(1i32.to_le_bytes().to_vec()),
                            null_count: Some(2),
                            distinct_count: None,
                        }),
                    }),
                }],
                total_byte_size: 100,
                num_rows: 10,
            }],
            key_value_metadata: Some(vec![KeyValue {
                key: "pandas".into(),
                value: Some("{}".into()),
            }]),
            created_by: Some("parquet-accel".into()),
            column_order_count: Some(1),
        }
    }

    #[test]
    fn test_footer_roundtrip() {
        let md = sample_metadata();
        let bytes = md.to_thrift();
        let back = FileMetaData::from_thrift(&bytes).unwrap();
        assert_eq!(back, md);
    }

    #[test]
    fn test_page_header_encodes_nonempty() {
        let hdr = PageHeader {
            type_: PageType::DataPage,
            uncompressed_page_size: 128,
            compressed_page_size: 100,
            num_values: 32,
            encoding: Encoding::Plain,
            statistics: None,
        };
        let bytes = hdr.to_thrift();
        assert!(bytes.len() > 8);
        // Struct terminator present.
        assert_eq!(*bytes.last().unwrap(), 0);
    }
}
