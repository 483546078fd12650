// SPDX-License-Identifier: Apache-2.0
// SPDX-FileCopyrightText: Copyright The parquet-accel Authors

//! Canonical physical value buffers.
//!
//! Each leaf array is converted once into the physical representation its
//! schema node dictates. Statistics, fragment sizing, dictionary building
//! and plain encoding all read from the same buffer, so unit rescaling and
//! narrowing happen in exactly one place.

use arrow_array::cast::AsArray;
use arrow_array::types::{
    Date32Type, Date64Type, Decimal128Type, DurationMicrosecondType, DurationMillisecondType,
    DurationNanosecondType, DurationSecondType, Float32Type, Float64Type, Int16Type, Int32Type,
    Int64Type, Int8Type, TimestampMicrosecondType, TimestampMillisecondType,
    TimestampNanosecondType, TimestampSecondType, UInt16Type, UInt32Type, UInt64Type, UInt8Type,
};
use arrow_array::{Array, ArrayRef};
use arrow_schema::{DataType, TimeUnit};
use snafu::location;

use crate::error::{Error, Result};
use crate::schema::{Physical, SchemaNode};

/// Nanoseconds per day, for INT96 splitting.
const NANOS_PER_DAY: i64 = 86_400_000_000_000;
/// Julian day number of the Unix epoch.
const JULIAN_EPOCH_DAY: i64 = 2_440_588;

/// A leaf array lowered to its parquet physical type.
///
/// Slots at null positions hold arbitrary values; callers index through the
/// present-value index so those slots are never read.
#[derive(Debug, Clone)]
pub enum PhysicalValues {
    Boolean(Vec<bool>),
    Int32(Vec<i32>),
    Int64(Vec<i64>),
    /// Split as (nanoseconds within day, julian day).
    Int96(Vec<(u64, u32)>),
    Float(Vec<f32>),
    Double(Vec<f64>),
    ByteArray(Vec<Vec<u8>>),
}

impl PhysicalValues {
    pub fn len(&self) -> usize {
        match self {
            Self::Boolean(v) => v.len(),
            Self::Int32(v) => v.len(),
            Self::Int64(v) => v.len(),
            Self::Int96(v) => v.len(),
            Self::Float(v) => v.len(),
            Self::Double(v) => v.len(),
            Self::ByteArray(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Plain-encoded size in bytes of the value at `idx`.
    pub fn plain_size(&self, idx: usize) -> usize {
        match self {
            // Booleans bit-pack; count them rounded up at the caller.
            Self::Boolean(_) => 1,
            Self::Int32(_) | Self::Float(_) => 4,
            Self::Int64(_) | Self::Double(_) => 8,
            Self::Int96(_) => 12,
            Self::ByteArray(v) => 4 + v[idx].len(),
        }
    }

    /// Plain-encoded bytes of the value at `idx`, for dictionary keying and
    /// statistics blobs.
    pub fn plain_bytes(&self, idx: usize) -> Vec<u8> {
        match self {
            Self::Boolean(v) => vec![v[idx] as u8],
            Self::Int32(v) => v[idx].to_le_bytes().to_vec(),
            Self::Int64(v) => v[idx].to_le_bytes().to_vec(),
            Self::Int96(v) => {
                let mut out = Vec::with_capacity(12);
                out.extend_from_slice(&v[idx].0.to_le_bytes());
                out.extend_from_slice(&v[idx].1.to_le_bytes());
                out
            }
            Self::Float(v) => v[idx].to_le_bytes().to_vec(),
            Self::Double(v) => v[idx].to_le_bytes().to_vec(),
            Self::ByteArray(v) => v[idx].clone(),
        }
    }
}

fn rescale(v: i64, ts_scale: i64) -> i64 {
    if ts_scale > 1 {
        v * ts_scale
    } else if ts_scale < -1 {
        v / -ts_scale
    } else {
        v
    }
}

fn split_int96(nanos: i64) -> (u64, u32) {
    let day = nanos.div_euclid(NANOS_PER_DAY);
    let in_day = nanos.rem_euclid(NANOS_PER_DAY);
    (in_day as u64, (day + JULIAN_EPOCH_DAY) as u32)
}

/// Lowers `array` to the physical representation `node` prescribes.
pub fn lower(array: &ArrayRef, node: &SchemaNode) -> Result<PhysicalValues> {
    let physical = node.physical.ok_or_else(|| Error::Internal {
        message: "lowering a non-leaf schema node".into(),
        location: location!(),
    })?;
    let dt = array.data_type();
    let out = match physical {
        Physical::Boolean => {
            PhysicalValues::Boolean(array.as_boolean().iter().map(|v| v.unwrap_or(false)).collect())
        }
        Physical::Int32 => PhysicalValues::Int32(lower_i32(array, dt)?),
        Physical::Int64 => PhysicalValues::Int64(lower_i64(array, dt, node.ts_scale)?),
        Physical::Int96 => {
            let nanos = lower_i64(array, dt, node.ts_scale)?;
            PhysicalValues::Int96(nanos.into_iter().map(split_int96).collect())
        }
        Physical::Float => {
            PhysicalValues::Float(array.as_primitive::<Float32Type>().values().to_vec())
        }
        Physical::Double => {
            PhysicalValues::Double(array.as_primitive::<Float64Type>().values().to_vec())
        }
        Physical::ByteArray => {
            let s = array.as_string::<i32>();
            PhysicalValues::ByteArray(
                (0..s.len())
                    .map(|i| {
                        if s.is_null(i) {
                            Vec::new()
                        } else {
                            s.value(i).as_bytes().to_vec()
                        }
                    })
                    .collect(),
            )
        }
        Physical::Undefined => {
            return Err(Error::NotSupported {
                source: format!("column type {dt} cannot be written").into(),
                location: location!(),
            })
        }
    };
    Ok(out)
}

fn lower_i32(array: &ArrayRef, dt: &DataType) -> Result<Vec<i32>> {
    Ok(match dt {
        DataType::Int8 => collect_as::<Int8Type, _, _>(array, |v| v as i32),
        DataType::Int16 => collect_as::<Int16Type, _, _>(array, |v| v as i32),
        DataType::Int32 => array.as_primitive::<Int32Type>().values().to_vec(),
        DataType::UInt8 => collect_as::<UInt8Type, _, _>(array, |v| v as i32),
        DataType::UInt16 => collect_as::<UInt16Type, _, _>(array, |v| v as i32),
        DataType::UInt32 => collect_as::<UInt32Type, _, _>(array, |v| v as i32),
        DataType::Date32 => array.as_primitive::<Date32Type>().values().to_vec(),
        DataType::Decimal128(_, _) => collect_as::<Decimal128Type, _, _>(array, |v| v as i32),
        other => {
            return Err(Error::Internal {
                message: format!("{other} does not lower to INT32"),
                location: location!(),
            })
        }
    })
}

fn lower_i64(array: &ArrayRef, dt: &DataType, ts_scale: i64) -> Result<Vec<i64>> {
    Ok(match dt {
        DataType::Int64 => array.as_primitive::<Int64Type>().values().to_vec(),
        DataType::UInt64 => collect_as::<UInt64Type, _, _>(array, |v| v as i64),
        DataType::Date64 => array.as_primitive::<Date64Type>().values().to_vec(),
        DataType::Timestamp(unit, _) => {
            let raw: Vec<i64> = match unit {
                TimeUnit::Second => array.as_primitive::<TimestampSecondType>().values().to_vec(),
                TimeUnit::Millisecond => array
                    .as_primitive::<TimestampMillisecondType>()
                    .values()
                    .to_vec(),
                TimeUnit::Microsecond => array
                    .as_primitive::<TimestampMicrosecondType>()
                    .values()
                    .to_vec(),
                TimeUnit::Nanosecond => array
                    .as_primitive::<TimestampNanosecondType>()
                    .values()
                    .to_vec(),
            };
            raw.into_iter().map(|v| rescale(v, ts_scale)).collect()
        }
        DataType::Duration(unit) => {
            let raw: Vec<i64> = match unit {
                TimeUnit::Second => array.as_primitive::<DurationSecondType>().values().to_vec(),
                TimeUnit::Millisecond => array
                    .as_primitive::<DurationMillisecondType>()
                    .values()
                    .to_vec(),
                TimeUnit::Microsecond => array
                    .as_primitive::<DurationMicrosecondType>()
                    .values()
                    .to_vec(),
                TimeUnit::Nanosecond => array
                    .as_primitive::<DurationNanosecondType>()
                    .values()
                    .to_vec(),
            };
            raw.into_iter().map(|v| rescale(v, ts_scale)).collect()
        }
        DataType::Decimal128(_, _) => collect_as::<Decimal128Type, _, _>(array, |v| v as i64),
        other => {
            return Err(Error::Internal {
                message: format!("{other} does not lower to INT64"),
                location: location!(),
            })
        }
    })
}

fn collect_as<T, U, F>(array: &ArrayRef, f: F) -> Vec<U>
where
    T: arrow_array::ArrowPrimitiveType,
    F: Fn(T::Native) -> U,
{
    array.as_primitive::<T>().values().iter().map(|v| f(*v)).collect()
}
