// SPDX-License-Identifier: Apache-2.0
// SPDX-FileCopyrightText: Copyright The parquet-accel Authors

//! Layout planning: which fragments form row groups, which fragments form
//! pages, which chunks dictionary-encode, and how row groups batch under the
//! encode memory cap.
//!
//! All decisions here are pure functions over fragment totals. Boundaries
//! never split a fragment.

use std::collections::HashMap;

use crate::column::LeveledColumn;
use crate::fragment::Fragment;
use crate::schema::Physical;
use crate::values::PhysicalValues;

/// Row group byte threshold.
pub const DEFAULT_ROW_GROUP_BYTES: usize = 128 * 1024 * 1024;
/// Row group row threshold.
pub const DEFAULT_ROW_GROUP_ROWS: usize = 1_000_000;
/// Uncompressed data page target.
pub const DEFAULT_PAGE_BYTES: usize = 512 * 1024;
/// A chunk with more distinct values than this never dictionary-encodes.
pub const MAX_DICT_ENTRIES: usize = 65_536;
/// Soft cap on plain bytes materialized per encode batch.
pub const DEFAULT_BATCH_BYTES: usize = 1 << 30;

/// A row group as a span of fragment ordinals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowGroupPlan {
    pub frag_start: usize,
    pub frag_end: usize,
    pub num_rows: usize,
    /// Plain bytes summed over every leaf.
    pub plain_size: usize,
}

/// Chooses row group boundaries greedily over fragment totals.
///
/// `fragments` is indexed `[leaf][fragment]`; every leaf shares the same row
/// spans. A group closes when admitting the next fragment would cross either
/// threshold, so a single oversized fragment still forms a group of its own.
pub fn plan_row_groups(
    fragments: &[Vec<Fragment>],
    max_bytes: usize,
    max_rows: usize,
) -> Vec<RowGroupPlan> {
    let num_fragments = fragments.first().map(|f| f.len()).unwrap_or(0);
    let mut groups = Vec::new();
    let mut current = RowGroupPlan {
        frag_start: 0,
        frag_end: 0,
        num_rows: 0,
        plain_size: 0,
    };
    for f in 0..num_fragments {
        let frag_rows = fragments[0][f].num_rows();
        let frag_bytes: usize = fragments.iter().map(|leaf| leaf[f].plain_size).sum();
        let would_overflow = current.num_rows + frag_rows > max_rows
            || current.plain_size + frag_bytes > max_bytes;
        if current.frag_end > current.frag_start && would_overflow {
            groups.push(current.clone());
            current = RowGroupPlan {
                frag_start: f,
                frag_end: f,
                num_rows: 0,
                plain_size: 0,
            };
        }
        current.frag_end = f + 1;
        current.num_rows += frag_rows;
        current.plain_size += frag_bytes;
    }
    if current.frag_end > current.frag_start {
        groups.push(current);
    }
    groups
}

/// A data page as a span of fragment ordinals within one row group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PagePlan {
    pub frag_start: usize,
    pub frag_end: usize,
    pub row_start: usize,
    pub row_end: usize,
    pub num_slots: usize,
    pub num_values: usize,
    pub plain_size: usize,
}

/// Splits one leaf's fragments `[frag_start, frag_end)` into pages near the
/// target size. Every page holds at least one fragment.
pub fn plan_pages(
    fragments: &[Fragment],
    frag_start: usize,
    frag_end: usize,
    target_bytes: usize,
) -> Vec<PagePlan> {
    let mut pages = Vec::new();
    let mut current: Option<PagePlan> = None;
    for f in frag_start..frag_end {
        let frag = &fragments[f];
        if let Some(page) = &mut current {
            if page.plain_size + frag.plain_size > target_bytes {
                pages.push(current.take().unwrap());
            }
        }
        match &mut current {
            Some(page) => {
                page.frag_end = f + 1;
                page.row_end = frag.row_end;
                page.num_slots += frag.num_slots;
                page.num_values += frag.num_values;
                page.plain_size += frag.plain_size;
            }
            None => {
                current = Some(PagePlan {
                    frag_start: f,
                    frag_end: f + 1,
                    row_start: frag.row_start,
                    row_end: frag.row_end,
                    num_slots: frag.num_slots,
                    num_values: frag.num_values,
                    plain_size: frag.plain_size,
                });
            }
        }
    }
    pages.extend(current);
    pages
}

/// Outcome of the dictionary decision for one leaf chunk.
#[derive(Debug, Clone, Default)]
pub struct DictDecision {
    pub use_dictionary: bool,
    /// Bit width of dictionary indices, 8 or 16.
    pub index_bits: u8,
    /// Distinct plain-encoded values in first-occurrence order.
    pub entries: Vec<Vec<u8>>,
    /// Index per present value of the chunk, in slot order.
    pub indices: Vec<u32>,
    /// Plain bytes of the dictionary page payload.
    pub dict_plain_size: usize,
}

/// Decides whether one leaf chunk dictionary-encodes. Runs as a device
/// kernel over rows `[row_start, row_end)`.
///
/// Booleans already bit-pack, undefined types never encode, and repeated
/// columns stay plain so index runs line up with level slots.
pub fn build_dictionary(
    column: &LeveledColumn,
    values: &PhysicalValues,
    physical: Physical,
    row_start: usize,
    row_end: usize,
    plain_size: usize,
) -> DictDecision {
    if matches!(physical, Physical::Boolean | Physical::Undefined) || column.max_rep > 0 {
        return DictDecision::default();
    }
    let (val_start, val_end) = column.value_range(row_start, row_end);
    let present = &column.value_index[val_start..val_end];

    let mut keys: HashMap<Vec<u8>, u32> = HashMap::new();
    let mut entries = Vec::new();
    let mut indices = Vec::with_capacity(present.len());
    let mut dict_plain_size = 0usize;
    for &i in present {
        let bytes = values.plain_bytes(i);
        let next = keys.len() as u32;
        let idx = *keys.entry(bytes.clone()).or_insert_with(|| {
            dict_plain_size += values.plain_size(i);
            entries.push(bytes);
            next
        });
        indices.push(idx);
        if keys.len() > MAX_DICT_ENTRIES {
            return DictDecision::default();
        }
    }
    let index_bits: u8 = if entries.len() <= 256 { 8 } else { 16 };
    let index_size = present.len() * (index_bits as usize / 8);
    if dict_plain_size + index_size >= plain_size {
        return DictDecision::default();
    }
    DictDecision {
        use_dictionary: true,
        index_bits,
        entries,
        indices,
        dict_plain_size,
    }
}

/// Groups row groups into encode batches under a plain-byte soft cap.
///
/// Returns spans over `groups`. The first group of a batch is always
/// admitted even when it alone exceeds the cap.
pub fn plan_batches(groups: &[RowGroupPlan], max_batch_bytes: usize) -> Vec<(usize, usize)> {
    let mut batches = Vec::new();
    let mut start = 0;
    let mut bytes = 0usize;
    for (i, group) in groups.iter().enumerate() {
        if i > start && bytes + group.plain_size > max_batch_bytes {
            batches.push((start, i));
            start = i;
            bytes = 0;
        }
        bytes += group.plain_size;
    }
    if start < groups.len() {
        batches.push((start, groups.len()));
    }
    batches
}
