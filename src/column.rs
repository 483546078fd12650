// SPDX-License-Identifier: Apache-2.0
// SPDX-FileCopyrightText: Copyright The parquet-accel Authors

//! Flattens nested Arrow columns into per-leaf repetition/definition level
//! streams plus an index of which leaf values are actually present.
//!
//! Levels follow the Dremel encoding: a slot's definition level counts the
//! non-required ancestors that are present, its repetition level names the
//! depth of the repeated ancestor that restarted. Top-level row boundaries
//! are kept alongside so fragments can slice level streams without
//! re-walking the column.

use arrow_array::cast::AsArray;
use arrow_array::{Array, ArrayRef, RecordBatch};
use arrow_buffer::{NullBuffer, OffsetBuffer};
use arrow_schema::DataType;
use snafu::location;

use crate::error::{Error, Result};
use crate::schema::{NodeKind, SchemaTree};

/// End-exclusive cursor positions after one top-level row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowSpan {
    /// Level slots emitted through this row.
    pub level_end: usize,
    /// Present leaf values emitted through this row.
    pub value_end: usize,
}

/// One leaf column flattened to level streams.
#[derive(Debug, Clone)]
pub struct LeveledColumn {
    /// The leaf's value array with list nesting unwrapped. Indices in
    /// `value_index` are absolute into this array.
    pub values: ArrayRef,
    /// Definition level per slot; empty when every ancestor is required.
    pub def: Vec<u16>,
    /// Repetition level per slot; empty for non-repeated columns.
    pub rep: Vec<u16>,
    /// Absolute value index of each present leaf value, in slot order.
    pub value_index: Vec<usize>,
    /// Cursor positions after each top-level row.
    pub rows: Vec<RowSpan>,
    pub max_def: u16,
    pub max_rep: u16,
}

impl LeveledColumn {
    /// Total level slots (values in the parquet sense, nulls included).
    pub fn num_slots(&self) -> usize {
        self.rows.last().map(|s| s.level_end).unwrap_or(0)
    }

    /// Level slot range covering rows `[row_start, row_end)`.
    pub fn slot_range(&self, row_start: usize, row_end: usize) -> (usize, usize) {
        let start = if row_start == 0 {
            0
        } else {
            self.rows[row_start - 1].level_end
        };
        let end = if row_end == 0 {
            0
        } else {
            self.rows[row_end - 1].level_end
        };
        (start, end)
    }

    /// Present-value range covering rows `[row_start, row_end)`, as indices
    /// into `value_index`.
    pub fn value_range(&self, row_start: usize, row_end: usize) -> (usize, usize) {
        let start = if row_start == 0 {
            0
        } else {
            self.rows[row_start - 1].value_end
        };
        let end = if row_end == 0 {
            0
        } else {
            self.rows[row_end - 1].value_end
        };
        (start, end)
    }
}

/// One level of the path from a root column down to a leaf.
#[derive(Clone)]
enum Link {
    Struct {
        nulls: Option<NullBuffer>,
        optional: bool,
    },
    List {
        nulls: Option<NullBuffer>,
        offsets: OffsetBuffer<i32>,
        optional: bool,
        /// Repetition level of elements after the first in a list.
        elem_rep: u16,
    },
    Leaf {
        nulls: Option<NullBuffer>,
        optional: bool,
    },
}

/// Builds level streams for every leaf of `batch` under `tree`.
///
/// The tree must have been derived from a batch with the same shape; the
/// writer guarantees this by re-deriving and comparing schemas per write.
pub fn build_levels(tree: &SchemaTree, batch: &RecordBatch) -> Result<Vec<LeveledColumn>> {
    let mut out = Vec::with_capacity(tree.leaves.len());
    let root_children = child_indices(tree, 0);
    if root_children.len() != batch.num_columns() {
        return Err(Error::Internal {
            message: format!(
                "schema has {} root columns but batch has {}",
                root_children.len(),
                batch.num_columns()
            ),
            location: location!(),
        });
    }
    for (node, column) in root_children.iter().zip(batch.columns()) {
        gather(tree, *node, column, &mut Vec::new(), 0, batch.num_rows(), &mut out)?;
    }
    Ok(out)
}

fn child_indices(tree: &SchemaTree, parent: usize) -> Vec<usize> {
    tree.nodes
        .iter()
        .enumerate()
        .filter(|(_, n)| n.parent == Some(parent))
        .map(|(i, _)| i)
        .collect()
}

fn gather(
    tree: &SchemaTree,
    node: usize,
    array: &ArrayRef,
    chain: &mut Vec<Link>,
    rep_depth: u16,
    num_rows: usize,
    out: &mut Vec<LeveledColumn>,
) -> Result<()> {
    let optional = tree.nodes[node].repetition == crate::format::Repetition::Optional;
    match tree.nodes[node].kind {
        NodeKind::Leaf => {
            chain.push(Link::Leaf {
                nulls: array.nulls().cloned(),
                optional,
            });
            // The walk is per top-level row; the leaf array is longer than
            // that whenever a list sits anywhere above it.
            out.push(flatten_chain(chain, array.clone(), num_rows));
            chain.pop();
            Ok(())
        }
        NodeKind::Struct => {
            let s = array.as_struct();
            chain.push(Link::Struct {
                nulls: array.nulls().cloned(),
                optional,
            });
            for (pos, child_node) in child_indices(tree, node).into_iter().enumerate() {
                gather(tree, child_node, s.column(pos), chain, rep_depth, num_rows, out)?;
            }
            chain.pop();
            Ok(())
        }
        NodeKind::ListGroup => {
            if !matches!(array.data_type(), DataType::List(_)) {
                return Err(Error::Internal {
                    message: "schema expects a list column here".into(),
                    location: location!(),
                });
            }
            let list = array.as_list::<i32>();
            chain.push(Link::List {
                nulls: array.nulls().cloned(),
                offsets: list.offsets().clone(),
                optional,
                elem_rep: rep_depth + 1,
            });
            // The repeated wrapper has exactly one child, the element.
            let repeated = child_indices(tree, node)[0];
            let element = child_indices(tree, repeated)[0];
            gather(tree, element, list.values(), chain, rep_depth + 1, num_rows, out)?;
            chain.pop();
            Ok(())
        }
        NodeKind::ListRepeated | NodeKind::Root => Err(Error::Internal {
            message: "unexpected schema node while walking columns".into(),
            location: location!(),
        }),
    }
}

struct LevelSink {
    def: Vec<u16>,
    rep: Vec<u16>,
    value_index: Vec<usize>,
    slots: usize,
    max_def: u16,
    max_rep: u16,
}

impl LevelSink {
    fn emit_null(&mut self, rep: u16, def: u16) {
        self.slots += 1;
        if self.max_def > 0 {
            self.def.push(def);
        }
        if self.max_rep > 0 {
            self.rep.push(rep);
        }
    }

    fn emit_value(&mut self, rep: u16, def: u16, index: usize) {
        self.emit_null(rep, def);
        self.value_index.push(index);
    }
}

fn flatten_chain(chain: &[Link], values: ArrayRef, num_rows: usize) -> LeveledColumn {
    let mut max_def = 0u16;
    let mut max_rep = 0u16;
    for link in chain {
        match link {
            Link::Struct { optional, .. } | Link::Leaf { optional, .. } => {
                max_def += *optional as u16;
            }
            Link::List { optional, .. } => {
                max_def += 1 + *optional as u16;
                max_rep += 1;
            }
        }
    }

    let mut sink = LevelSink {
        def: Vec::new(),
        rep: Vec::new(),
        value_index: Vec::new(),
        slots: 0,
        max_def,
        max_rep,
    };
    let mut rows = Vec::with_capacity(num_rows);
    for row in 0..num_rows {
        visit(chain, row, 0, 0, &mut sink);
        rows.push(RowSpan {
            level_end: sink.slots,
            value_end: sink.value_index.len(),
        });
    }

    LeveledColumn {
        values,
        def: sink.def,
        rep: sink.rep,
        value_index: sink.value_index,
        rows,
        max_def,
        max_rep,
    }
}

fn visit(chain: &[Link], index: usize, rep: u16, def: u16, sink: &mut LevelSink) {
    match &chain[0] {
        Link::Struct { nulls, optional } => {
            if *optional {
                if nulls.as_ref().map(|n| n.is_null(index)).unwrap_or(false) {
                    sink.emit_null(rep, def);
                    return;
                }
                visit(&chain[1..], index, rep, def + 1, sink);
            } else {
                visit(&chain[1..], index, rep, def, sink);
            }
        }
        Link::List {
            nulls,
            offsets,
            optional,
            elem_rep,
        } => {
            if *optional && nulls.as_ref().map(|n| n.is_null(index)).unwrap_or(false) {
                sink.emit_null(rep, def);
                return;
            }
            let def = def + *optional as u16;
            let start = offsets[index] as usize;
            let end = offsets[index + 1] as usize;
            if start == end {
                // Empty list: the list itself is defined, nothing below it.
                sink.emit_null(rep, def);
                return;
            }
            for (k, child) in (start..end).enumerate() {
                let r = if k == 0 { rep } else { *elem_rep };
                visit(&chain[1..], child, r, def + 1, sink);
            }
        }
        Link::Leaf { nulls, optional } => {
            if *optional {
                if nulls.as_ref().map(|n| n.is_null(index)).unwrap_or(false) {
                    sink.emit_null(rep, def);
                } else {
                    sink.emit_value(rep, def + 1, index);
                }
            } else {
                sink.emit_value(rep, def, index);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow_array::builder::{Int32Builder, ListBuilder};
    use arrow_array::{Int32Array, StructArray};
    use arrow_schema::{Field, Fields, Schema};
    use std::sync::Arc;

    fn levels_for(batch: &RecordBatch) -> Vec<LeveledColumn> {
        let tree = SchemaTree::build(batch, None, true, false).unwrap();
        build_levels(&tree, batch).unwrap()
    }

    /// Chunked-mode tree, so every nullable level stays optional regardless
    /// of whether this batch happens to contain nulls.
    fn chunked_levels_for(batch: &RecordBatch) -> Vec<LeveledColumn> {
        let tree = SchemaTree::build(batch, None, false, false).unwrap();
        build_levels(&tree, batch).unwrap()
    }

    #[test]
    fn test_flat_required_column() {
        let batch = RecordBatch::try_new(
            Arc::new(Schema::new(vec![Field::new("a", DataType::Int32, false)])),
            vec![Arc::new(Int32Array::from(vec![1, 2, 3]))],
        )
        .unwrap();
        let cols = levels_for(&batch);
        let col = &cols[0];
        assert_eq!(col.max_def, 0);
        assert_eq!(col.max_rep, 0);
        assert!(col.def.is_empty());
        assert_eq!(col.value_index, vec![0, 1, 2]);
        assert_eq!(col.slot_range(1, 3), (1, 3));
    }

    #[test]
    fn test_flat_optional_column() {
        let batch = RecordBatch::try_new(
            Arc::new(Schema::new(vec![Field::new("a", DataType::Int32, true)])),
            vec![Arc::new(Int32Array::from(vec![Some(7), None, Some(9)]))],
        )
        .unwrap();
        let cols = levels_for(&batch);
        let col = &cols[0];
        assert_eq!(col.max_def, 1);
        assert_eq!(col.def, vec![1, 0, 1]);
        assert_eq!(col.value_index, vec![0, 2]);
        assert_eq!(col.value_range(0, 2), (0, 1));
    }

    #[test]
    fn test_list_levels() {
        // [[1, 2], [], null, [3]]
        let mut builder = ListBuilder::new(Int32Builder::new());
        builder.append_value([Some(1), Some(2)]);
        builder.append_value([]);
        builder.append_null();
        builder.append_value([Some(3)]);
        let list = builder.finish();
        let field = Field::new("v", list.data_type().clone(), true);
        let batch = RecordBatch::try_new(
            Arc::new(Schema::new(vec![field])),
            vec![Arc::new(list) as ArrayRef],
        )
        .unwrap();
        let cols = chunked_levels_for(&batch);
        let col = &cols[0];
        assert_eq!(col.max_def, 3);
        assert_eq!(col.max_rep, 1);
        assert_eq!(col.def, vec![3, 3, 1, 0, 3]);
        assert_eq!(col.rep, vec![0, 1, 0, 0, 0]);
        assert_eq!(col.value_index, vec![0, 1, 2]);
        assert_eq!(
            col.rows,
            vec![
                RowSpan { level_end: 2, value_end: 2 },
                RowSpan { level_end: 3, value_end: 2 },
                RowSpan { level_end: 4, value_end: 2 },
                RowSpan { level_end: 5, value_end: 3 },
            ]
        );
    }

    #[test]
    fn test_nested_list_levels() {
        // [[[1, 2], []], [[3]]]
        let mut builder = ListBuilder::new(ListBuilder::new(Int32Builder::new()));
        builder.values().append_value([Some(1), Some(2)]);
        builder.values().append_value([]);
        builder.append(true);
        builder.values().append_value([Some(3)]);
        builder.append(true);
        let list = builder.finish();
        let field = Field::new("m", list.data_type().clone(), true);
        let batch = RecordBatch::try_new(
            Arc::new(Schema::new(vec![field])),
            vec![Arc::new(list) as ArrayRef],
        )
        .unwrap();
        let cols = chunked_levels_for(&batch);
        let col = &cols[0];
        assert_eq!(col.max_rep, 2);
        // Two optional list wrappers, two repeated levels, optional leaf.
        assert_eq!(col.max_def, 5);
        assert_eq!(col.def, vec![5, 5, 3, 5]);
        assert_eq!(col.rep, vec![0, 2, 1, 0]);
        assert_eq!(col.value_index, vec![0, 1, 2]);
        assert_eq!(col.num_slots(), 4);
    }

    #[test]
    fn test_struct_with_null_rows() {
        let inner = Arc::new(Int32Array::from(vec![1, 2, 3])) as ArrayRef;
        let fields = Fields::from(vec![Field::new("x", DataType::Int32, false)]);
        let nulls = NullBuffer::from(vec![true, false, true]);
        let s = StructArray::new(fields.clone(), vec![inner], Some(nulls));
        let field = Field::new("s", DataType::Struct(fields), true);
        let batch = RecordBatch::try_new(
            Arc::new(Schema::new(vec![field])),
            vec![Arc::new(s) as ArrayRef],
        )
        .unwrap();
        let cols = levels_for(&batch);
        let col = &cols[0];
        assert_eq!(col.max_def, 1);
        assert_eq!(col.def, vec![1, 0, 1]);
        // The null struct row still occupies a slot in the child array but
        // contributes no present value.
        assert_eq!(col.value_index, vec![0, 2]);
    }

    #[test]
    fn test_list_of_struct_leaf() {
        let mut builder = ListBuilder::new(Int32Builder::new());
        builder.append_value([Some(10), None]);
        builder.append_value([Some(20)]);
        let list = builder.finish();
        let field = Field::new("v", list.data_type().clone(), true);
        let batch = RecordBatch::try_new(
            Arc::new(Schema::new(vec![field])),
            vec![Arc::new(list) as ArrayRef],
        )
        .unwrap();
        let cols = chunked_levels_for(&batch);
        let col = &cols[0];
        // Null element inside a present list: def stops below the leaf.
        assert_eq!(col.def, vec![3, 2, 3]);
        assert_eq!(col.rep, vec![0, 1, 0]);
        assert_eq!(col.value_index, vec![0, 2]);
    }

    #[test]
    fn test_struct_containing_list() {
        // struct { tags: list<int32> } with rows {[1, 2]} and {[3]}: the
        // walk is per struct row even though the leaf holds three values.
        let mut builder = ListBuilder::new(Int32Builder::new());
        builder.append_value([Some(1), Some(2)]);
        builder.append_value([Some(3)]);
        let tags = builder.finish();
        let fields = Fields::from(vec![Field::new("tags", tags.data_type().clone(), true)]);
        let s = StructArray::new(fields.clone(), vec![Arc::new(tags) as ArrayRef], None);
        let field = Field::new("s", DataType::Struct(fields), true);
        let batch = RecordBatch::try_new(
            Arc::new(Schema::new(vec![field])),
            vec![Arc::new(s) as ArrayRef],
        )
        .unwrap();
        let cols = levels_for(&batch);
        let col = &cols[0];
        assert_eq!(col.max_rep, 1);
        // Null-free single write: only the repeated level is non-required.
        assert_eq!(col.max_def, 1);
        assert_eq!(col.def, vec![1, 1, 1]);
        assert_eq!(col.rep, vec![0, 1, 0]);
        assert_eq!(col.value_index, vec![0, 1, 2]);
        assert_eq!(
            col.rows,
            vec![
                RowSpan { level_end: 2, value_end: 2 },
                RowSpan { level_end: 3, value_end: 3 },
            ]
        );
    }
}
