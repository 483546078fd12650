// SPDX-License-Identifier: Apache-2.0
// SPDX-FileCopyrightText: Copyright The parquet-accel Authors

//! Fragments: fixed-count row slices that are the unit of size accounting.
//!
//! Every leaf is measured fragment-by-fragment. Row group and page
//! boundaries are then chosen purely from fragment totals, so layout never
//! re-reads column data.

use std::collections::HashSet;

use crate::column::LeveledColumn;
use crate::schema::StatisticsKind;
use crate::statistics::{self, ColumnStats};
use crate::values::PhysicalValues;

/// Rows per fragment unless the writer overrides it.
pub const DEFAULT_FRAGMENT_SIZE: usize = 5000;

#[derive(Debug, Clone)]
pub struct Fragment {
    pub row_start: usize,
    pub row_end: usize,
    /// Level slots in the fragment, nulls included.
    pub num_slots: usize,
    /// Present leaf values.
    pub num_values: usize,
    /// Plain-encoded size of the present values.
    pub plain_size: usize,
    /// Distinct present values within this fragment alone.
    pub distinct: usize,
    pub stats: ColumnStats,
}

impl Fragment {
    pub fn num_rows(&self) -> usize {
        self.row_end - self.row_start
    }
}

/// Splits `num_rows` into `[start, end)` spans of at most `fragment_size`.
pub fn split_rows(num_rows: usize, fragment_size: usize) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut start = 0;
    while start < num_rows {
        let end = (start + fragment_size).min(num_rows);
        spans.push((start, end));
        start = end;
    }
    spans
}

/// Measures one fragment of one leaf. Runs as a device kernel.
pub fn build_fragment(
    column: &LeveledColumn,
    values: &PhysicalValues,
    stats_kind: StatisticsKind,
    row_start: usize,
    row_end: usize,
) -> Fragment {
    let (slot_start, slot_end) = column.slot_range(row_start, row_end);
    let (val_start, val_end) = column.value_range(row_start, row_end);
    let present = &column.value_index[val_start..val_end];

    let plain_size = match values {
        PhysicalValues::Boolean(_) => (present.len() + 7) / 8,
        _ => present.iter().map(|&i| values.plain_size(i)).sum(),
    };
    let mut seen: HashSet<Vec<u8>> = HashSet::with_capacity(present.len().min(1024));
    for &i in present {
        seen.insert(values.plain_bytes(i));
    }

    Fragment {
        row_start,
        row_end,
        num_slots: slot_end - slot_start,
        num_values: present.len(),
        plain_size,
        distinct: seen.len(),
        stats: statistics::gather(column, values, stats_kind, row_start, row_end),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::build_levels;
    use crate::schema::SchemaTree;
    use arrow_array::{ArrayRef, Int32Array, RecordBatch, StringArray};
    use arrow_schema::{DataType, Field, Schema};
    use std::sync::Arc;

    #[test]
    fn test_split_rows() {
        assert_eq!(split_rows(0, 5000), vec![]);
        assert_eq!(split_rows(4999, 5000), vec![(0, 4999)]);
        assert_eq!(split_rows(5000, 5000), vec![(0, 5000)]);
        assert_eq!(split_rows(10001, 5000), vec![(0, 5000), (5000, 10000), (10000, 10001)]);
    }

    #[test]
    fn test_fragment_accounting() {
        let batch = RecordBatch::try_new(
            Arc::new(Schema::new(vec![Field::new("s", DataType::Utf8, true)])),
            vec![Arc::new(StringArray::from(vec![
                Some("aa"),
                Some("bb"),
                None,
                Some("aa"),
            ])) as ArrayRef],
        )
        .unwrap();
        let tree = SchemaTree::build(&batch, None, true, false).unwrap();
        let cols = build_levels(&tree, &batch).unwrap();
        let values = crate::values::lower(&cols[0].values, &tree.nodes[tree.leaves[0]]).unwrap();

        let frag = build_fragment(&cols[0], &values, StatisticsKind::ByteArray, 0, 4);
        assert_eq!(frag.num_rows(), 4);
        assert_eq!(frag.num_slots, 4);
        assert_eq!(frag.num_values, 3);
        // Three present strings of two bytes each, four-byte length prefixes.
        assert_eq!(frag.plain_size, 18);
        assert_eq!(frag.distinct, 2);
        assert_eq!(frag.stats.null_count, 1);
    }

    #[test]
    fn test_fragment_distinct_is_local() {
        let data: Vec<i32> = (0..10).map(|i| i % 3).collect();
        let batch = RecordBatch::try_new(
            Arc::new(Schema::new(vec![Field::new("a", DataType::Int32, false)])),
            vec![Arc::new(Int32Array::from(data)) as ArrayRef],
        )
        .unwrap();
        let tree = SchemaTree::build(&batch, None, true, false).unwrap();
        let cols = build_levels(&tree, &batch).unwrap();
        let values = crate::values::lower(&cols[0].values, &tree.nodes[tree.leaves[0]]).unwrap();

        let a = build_fragment(&cols[0], &values, StatisticsKind::Int32, 0, 5);
        let b = build_fragment(&cols[0], &values, StatisticsKind::Int32, 5, 10);
        assert_eq!(a.distinct, 3);
        assert_eq!(b.distinct, 3);
        assert_eq!(a.plain_size, 20);
    }
}
