// SPDX-License-Identifier: Apache-2.0
// SPDX-FileCopyrightText: Copyright The parquet-accel Authors

//! Column statistics accumulation.
//!
//! Statistics are gathered per fragment on the device queue and merged up
//! into page and row-group scopes. Floating point min/max follow IEEE total
//! order over the comparable values, skipping NaN; binary min/max compare
//! bytewise.

use crate::column::LeveledColumn;
use crate::schema::StatisticsKind;
use crate::values::PhysicalValues;

#[derive(Debug, Clone, PartialEq)]
pub enum StatValue {
    Boolean(bool),
    Int32(i32),
    Int64(i64),
    Float(f32),
    Double(f64),
    Binary(Vec<u8>),
}

impl StatValue {
    /// Plain-encoded blob for the footer. Binary stats omit the length
    /// prefix, matching the format's `Statistics` convention.
    pub fn to_plain_bytes(&self) -> Vec<u8> {
        match self {
            Self::Boolean(v) => vec![*v as u8],
            Self::Int32(v) => v.to_le_bytes().to_vec(),
            Self::Int64(v) => v.to_le_bytes().to_vec(),
            Self::Float(v) => v.to_le_bytes().to_vec(),
            Self::Double(v) => v.to_le_bytes().to_vec(),
            Self::Binary(v) => v.clone(),
        }
    }

    fn le(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Boolean(a), Self::Boolean(b)) => a <= b,
            (Self::Int32(a), Self::Int32(b)) => a <= b,
            (Self::Int64(a), Self::Int64(b)) => a <= b,
            (Self::Float(a), Self::Float(b)) => a <= b,
            (Self::Double(a), Self::Double(b)) => a <= b,
            (Self::Binary(a), Self::Binary(b)) => a <= b,
            _ => false,
        }
    }
}

/// Accumulated statistics for one leaf over some row range.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ColumnStats {
    pub min: Option<StatValue>,
    pub max: Option<StatValue>,
    pub null_count: i64,
}

impl ColumnStats {
    pub fn observe(&mut self, v: StatValue) {
        match &self.min {
            Some(m) if m.le(&v) => {}
            _ => self.min = Some(v.clone()),
        }
        match &self.max {
            Some(m) if v.le(m) => {}
            _ => self.max = Some(v),
        }
    }

    /// Folds `other` into `self`. Scopes nest, so merging fragment stats
    /// yields exact page and row-group stats.
    pub fn merge(&mut self, other: &ColumnStats) {
        if let Some(min) = &other.min {
            self.observe(min.clone());
        }
        if let Some(max) = &other.max {
            self.observe(max.clone());
        }
        self.null_count += other.null_count;
    }

    pub fn to_format(&self) -> crate::format::Statistics {
        crate::format::Statistics {
            min: self.min.as_ref().map(|v| v.to_plain_bytes()),
            max: self.max.as_ref().map(|v| v.to_plain_bytes()),
            null_count: Some(self.null_count),
            distinct_count: None,
        }
    }
}

fn stat_value(values: &PhysicalValues, kind: StatisticsKind, idx: usize) -> Option<StatValue> {
    match (kind, values) {
        (StatisticsKind::Boolean, PhysicalValues::Boolean(v)) => Some(StatValue::Boolean(v[idx])),
        (StatisticsKind::Int32, PhysicalValues::Int32(v)) => Some(StatValue::Int32(v[idx])),
        (StatisticsKind::Int64, PhysicalValues::Int64(v)) => Some(StatValue::Int64(v[idx])),
        (StatisticsKind::Float, PhysicalValues::Float(v)) => {
            (!v[idx].is_nan()).then(|| StatValue::Float(v[idx]))
        }
        (StatisticsKind::Double, PhysicalValues::Double(v)) => {
            (!v[idx].is_nan()).then(|| StatValue::Double(v[idx]))
        }
        (StatisticsKind::ByteArray, PhysicalValues::ByteArray(v)) => {
            Some(StatValue::Binary(v[idx].clone()))
        }
        _ => None,
    }
}

/// Computes exact statistics for rows `[row_start, row_end)` of one leaf.
///
/// The null count includes slots nulled out by an ancestor, matching the
/// number of level slots that carry no value.
pub fn gather(
    column: &LeveledColumn,
    values: &PhysicalValues,
    kind: StatisticsKind,
    row_start: usize,
    row_end: usize,
) -> ColumnStats {
    let (slot_start, slot_end) = column.slot_range(row_start, row_end);
    let (val_start, val_end) = column.value_range(row_start, row_end);
    let mut stats = ColumnStats {
        null_count: ((slot_end - slot_start) - (val_end - val_start)) as i64,
        ..Default::default()
    };
    if kind == StatisticsKind::None {
        return stats;
    }
    for &idx in &column.value_index[val_start..val_end] {
        if let Some(v) = stat_value(values, kind, idx) {
            stats.observe(v);
        }
    }
    stats
}
