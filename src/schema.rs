// SPDX-License-Identifier: Apache-2.0
// SPDX-FileCopyrightText: Copyright The parquet-accel Authors

//! Builds the flat, pre-order Parquet schema tree from a nested Arrow
//! column hierarchy.
//!
//! Each node's parent index is strictly less than its own; the root sits at
//! index 0 with no parent. LIST columns expand into two synthetic levels
//! (an annotated group plus a repeated wrapper) around the element subtree,
//! STRUCT columns into one level per member.

use arrow_array::{Array, ArrayRef, RecordBatch};
use arrow_schema::{DataType, Field, TimeUnit};
use snafu::location;

use crate::error::{Error, Result};
use crate::format::{ConvertedType, Repetition, SchemaElement};

/// Physical storage type of a leaf, with an explicit marker for Arrow types
/// the format cannot carry. The marker defers the failure to the leaf
/// descriptor pass instead of rejecting whole tables eagerly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Physical {
    Undefined,
    Boolean,
    Int32,
    Int64,
    Int96,
    Float,
    Double,
    ByteArray,
}

impl Physical {
    pub fn to_format(self) -> Result<crate::format::PhysicalType> {
        use crate::format::PhysicalType as P;
        Ok(match self {
            Self::Boolean => P::Boolean,
            Self::Int32 => P::Int32,
            Self::Int64 => P::Int64,
            Self::Int96 => P::Int96,
            Self::Float => P::Float,
            Self::Double => P::Double,
            Self::ByteArray => P::ByteArray,
            Self::Undefined => {
                return Err(Error::NotSupported {
                    source: "column type has no parquet physical type".into(),
                    location: location!(),
                })
            }
        })
    }

    /// Fixed width of plain-encoded values, if the type has one.
    pub fn fixed_width(self) -> Option<usize> {
        match self {
            Self::Int32 | Self::Float => Some(4),
            Self::Int64 | Self::Double => Some(8),
            Self::Int96 => Some(12),
            _ => None,
        }
    }
}

/// Which statistics accumulator a leaf feeds, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatisticsKind {
    None,
    Boolean,
    Int32,
    Int64,
    Float,
    Double,
    ByteArray,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Root,
    Struct,
    /// The outer, annotated level of a LIST column.
    ListGroup,
    /// The synthetic repeated wrapper inside a LIST column.
    ListRepeated,
    Leaf,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SchemaNode {
    pub name: String,
    pub kind: NodeKind,
    pub repetition: Repetition,
    pub physical: Option<Physical>,
    pub converted: Option<ConvertedType>,
    pub stats_kind: StatisticsKind,
    /// Decimal leaves only.
    pub scale: i32,
    pub precision: i32,
    /// Timestamp/duration rescale: positive multiplies, negative divides.
    pub ts_scale: i64,
    pub parent: Option<usize>,
    pub num_children: usize,
    /// Ordinal among leaves, for leaf nodes.
    pub leaf: Option<usize>,
}

/// Caller-supplied per-column metadata, mirroring the column nesting.
#[derive(Debug, Clone, Default)]
pub struct ColumnMetadata {
    pub name: Option<String>,
    /// Explicit nullability. Leaving this unset on a chunked writer marks
    /// the column optional, since later chunks may carry nulls.
    pub nullable: Option<bool>,
    pub decimal_precision: Option<i32>,
    pub children: Vec<ColumnMetadata>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SchemaTree {
    pub nodes: Vec<SchemaNode>,
    /// Node index of each leaf, in pre-order.
    pub leaves: Vec<usize>,
}

struct SchemaBuilder {
    nodes: Vec<SchemaNode>,
    leaves: Vec<usize>,
    single_write: bool,
    int96_timestamps: bool,
}

impl SchemaTree {
    pub fn build(
        batch: &RecordBatch,
        metadata: Option<&[ColumnMetadata]>,
        single_write: bool,
        int96_timestamps: bool,
    ) -> Result<Self> {
        if let Some(meta) = metadata {
            if meta.len() != batch.num_columns() {
                return Err(Error::InvalidInput {
                    source: format!(
                        "table has {} columns but metadata describes {}",
                        batch.num_columns(),
                        meta.len()
                    )
                    .into(),
                    location: location!(),
                });
            }
        }
        let mut builder = SchemaBuilder {
            nodes: Vec::new(),
            leaves: Vec::new(),
            single_write,
            int96_timestamps,
        };
        builder.nodes.push(SchemaNode {
            name: "schema".into(),
            kind: NodeKind::Root,
            repetition: Repetition::Required,
            physical: None,
            converted: None,
            stats_kind: StatisticsKind::None,
            scale: 0,
            precision: 0,
            ts_scale: 0,
            parent: None,
            num_children: batch.num_columns(),
            leaf: None,
        });
        let schema = batch.schema();
        for (idx, (field, column)) in schema.fields().iter().zip(batch.columns()).enumerate() {
            let meta = metadata.map(|m| &m[idx]);
            let fallback = format!("_col{idx}");
            builder.add_column(field.as_ref(), column, meta, 0, &fallback)?;
        }
        Ok(Self {
            nodes: builder.nodes,
            leaves: builder.leaves,
        })
    }

    /// Number of OPTIONAL/REPEATED ancestors of a leaf, the leaf included.
    pub fn max_def_level(&self, leaf_node: usize) -> u16 {
        self.ancestry(leaf_node)
            .filter(|n| self.nodes[*n].repetition != Repetition::Required)
            .count() as u16
    }

    /// Number of REPEATED ancestors of a leaf.
    pub fn max_rep_level(&self, leaf_node: usize) -> u16 {
        self.ancestry(leaf_node)
            .filter(|n| self.nodes[*n].repetition == Repetition::Repeated)
            .count() as u16
    }

    /// Per-level nullability flags, root side first, synthetic list wrappers
    /// excluded.
    pub fn nullability(&self, leaf_node: usize) -> Vec<bool> {
        let mut flags: Vec<bool> = self
            .ancestry(leaf_node)
            .filter(|n| self.nodes[*n].kind != NodeKind::ListRepeated)
            .map(|n| self.nodes[n].repetition == Repetition::Optional)
            .collect();
        flags.reverse();
        flags
    }

    /// Dotted path of the leaf for the footer, root excluded.
    pub fn path_in_schema(&self, leaf_node: usize) -> Vec<String> {
        let mut path: Vec<String> = self
            .ancestry(leaf_node)
            .map(|n| self.nodes[n].name.clone())
            .collect();
        path.reverse();
        path
    }

    /// Walks leaf → root, excluding the root node itself.
    fn ancestry(&self, node: usize) -> impl Iterator<Item = usize> + '_ {
        let mut current = Some(node);
        std::iter::from_fn(move || {
            let n = current?;
            current = self.nodes[n].parent.filter(|p| *p != 0);
            if n == 0 {
                None
            } else {
                Some(n)
            }
        })
    }

    pub fn to_schema_elements(&self) -> Vec<SchemaElement> {
        self.nodes
            .iter()
            .map(|node| SchemaElement {
                type_: node
                    .physical
                    .and_then(|p| p.to_format().ok())
                    .filter(|_| node.kind == NodeKind::Leaf),
                type_length: None,
                repetition_type: (node.kind != NodeKind::Root).then_some(node.repetition),
                name: node.name.clone(),
                num_children: (node.num_children > 0).then_some(node.num_children as i32),
                converted_type: node.converted,
                scale: (node.converted == Some(ConvertedType::Decimal)).then_some(node.scale),
                precision: (node.converted == Some(ConvertedType::Decimal))
                    .then_some(node.precision),
            })
            .collect()
    }
}

impl SchemaBuilder {
    fn resolve_repetition(&self, meta: Option<&ColumnMetadata>, column: &ArrayRef) -> Result<Repetition> {
        if self.single_write {
            // A single write sees all data this column will ever hold.
            return Ok(if column.nulls().is_some() && column.null_count() > 0 {
                Repetition::Optional
            } else {
                Repetition::Required
            });
        }
        match meta.and_then(|m| m.nullable) {
            Some(false) => {
                if column.null_count() > 0 {
                    Err(Error::InvalidInput {
                        source: "column declared non-nullable but contains nulls".into(),
                        location: location!(),
                    })
                } else {
                    Ok(Repetition::Required)
                }
            }
            // Unknown nullability must stay optional: a later chunk may
            // carry nulls.
            Some(true) | None => Ok(Repetition::Optional),
        }
    }

    fn add_column(
        &mut self,
        field: &Field,
        column: &ArrayRef,
        meta: Option<&ColumnMetadata>,
        parent: usize,
        fallback_name: &str,
    ) -> Result<()> {
        let name = meta
            .and_then(|m| m.name.clone())
            .or_else(|| (!field.name().is_empty()).then(|| field.name().clone()))
            .unwrap_or_else(|| fallback_name.to_string());
        let repetition = self.resolve_repetition(meta, column)?;

        match field.data_type() {
            DataType::Struct(fields) => {
                if let Some(m) = meta {
                    if !m.children.is_empty() && m.children.len() != fields.len() {
                        return Err(Error::InvalidInput {
                            source: format!(
                                "struct column `{name}` has {} children but metadata describes {}",
                                fields.len(),
                                m.children.len()
                            )
                            .into(),
                            location: location!(),
                        });
                    }
                }
                let node = self.push_group(name, NodeKind::Struct, repetition, parent, fields.len());
                let array = arrow_array::cast::AsArray::as_struct(column);
                for (idx, child_field) in fields.iter().enumerate() {
                    let child_meta = meta.and_then(|m| m.children.get(idx));
                    let child = array.column(idx);
                    let fallback = format!("{}_{idx}", self.nodes[node].name);
                    self.add_column(child_field.as_ref(), child, child_meta, node, &fallback)?;
                }
                Ok(())
            }
            DataType::List(element_field) => {
                let group =
                    self.push_group(name, NodeKind::ListGroup, repetition, parent, 1);
                self.nodes[group].converted = Some(ConvertedType::List);
                let repeated = self.push_group(
                    "list".into(),
                    NodeKind::ListRepeated,
                    Repetition::Repeated,
                    group,
                    1,
                );
                let list = arrow_array::cast::AsArray::as_list::<i32>(column);
                let element_meta = meta.and_then(|m| m.children.first());
                // Children of the synthetic wrapper are always "element".
                let element_meta_named = ColumnMetadata {
                    name: Some("element".into()),
                    nullable: element_meta.and_then(|m| m.nullable),
                    decimal_precision: element_meta.and_then(|m| m.decimal_precision),
                    children: element_meta.map(|m| m.children.clone()).unwrap_or_default(),
                };
                self.add_column(
                    element_field.as_ref(),
                    list.values(),
                    Some(&element_meta_named),
                    repeated,
                    "element",
                )
            }
            other => {
                let info = leaf_type_info(
                    other,
                    meta.and_then(|m| m.decimal_precision),
                    self.int96_timestamps,
                )?;
                let leaf_ordinal = self.leaves.len();
                let idx = self.nodes.len();
                self.nodes.push(SchemaNode {
                    name,
                    kind: NodeKind::Leaf,
                    repetition,
                    physical: Some(info.physical),
                    converted: info.converted,
                    stats_kind: info.stats_kind,
                    scale: info.scale,
                    precision: info.precision,
                    ts_scale: info.ts_scale,
                    parent: Some(parent),
                    num_children: 0,
                    leaf: Some(leaf_ordinal),
                });
                self.leaves.push(idx);
                Ok(())
            }
        }
    }

    fn push_group(
        &mut self,
        name: String,
        kind: NodeKind,
        repetition: Repetition,
        parent: usize,
        num_children: usize,
    ) -> usize {
        let idx = self.nodes.len();
        self.nodes.push(SchemaNode {
            name,
            kind,
            repetition,
            physical: None,
            converted: None,
            stats_kind: StatisticsKind::None,
            scale: 0,
            precision: 0,
            ts_scale: 0,
            parent: Some(parent),
            num_children,
            leaf: None,
        });
        idx
    }
}

struct LeafTypeInfo {
    physical: Physical,
    converted: Option<ConvertedType>,
    stats_kind: StatisticsKind,
    scale: i32,
    precision: i32,
    ts_scale: i64,
}

impl LeafTypeInfo {
    fn simple(physical: Physical, converted: Option<ConvertedType>, stats: StatisticsKind) -> Self {
        Self {
            physical,
            converted,
            stats_kind: stats,
            scale: 0,
            precision: 0,
            ts_scale: 0,
        }
    }
}

/// Total mapping from an Arrow leaf type to its parquet descriptor record.
fn leaf_type_info(
    dt: &DataType,
    precision_override: Option<i32>,
    int96_timestamps: bool,
) -> Result<LeafTypeInfo> {
    use ConvertedType as C;
    use Physical as P;
    use StatisticsKind as S;

    let info = match dt {
        DataType::Boolean => LeafTypeInfo::simple(P::Boolean, None, S::Boolean),
        DataType::Int8 => LeafTypeInfo::simple(P::Int32, Some(C::Int8), S::Int32),
        DataType::Int16 => LeafTypeInfo::simple(P::Int32, Some(C::Int16), S::Int32),
        DataType::Int32 => LeafTypeInfo::simple(P::Int32, None, S::Int32),
        DataType::Int64 => LeafTypeInfo::simple(P::Int64, None, S::Int64),
        DataType::UInt8 => LeafTypeInfo::simple(P::Int32, Some(C::Uint8), S::Int32),
        DataType::UInt16 => LeafTypeInfo::simple(P::Int32, Some(C::Uint16), S::Int32),
        DataType::UInt32 => LeafTypeInfo::simple(P::Int32, Some(C::Uint32), S::Int32),
        DataType::UInt64 => LeafTypeInfo::simple(P::Int64, Some(C::Uint64), S::Int64),
        DataType::Float32 => LeafTypeInfo::simple(P::Float, None, S::Float),
        DataType::Float64 => LeafTypeInfo::simple(P::Double, None, S::Double),
        DataType::Utf8 => LeafTypeInfo::simple(P::ByteArray, Some(C::Utf8), S::ByteArray),
        DataType::Date32 => LeafTypeInfo::simple(P::Int32, Some(C::Date), S::Int32),
        DataType::Date64 => LeafTypeInfo::simple(P::Int64, Some(C::TimestampMillis), S::Int64),
        DataType::Timestamp(unit, _) => timestamp_info(unit, int96_timestamps),
        DataType::Duration(unit) => {
            let (converted, ts_scale) = match unit {
                TimeUnit::Second => (C::TimeMillis, 1000),
                TimeUnit::Millisecond => (C::TimeMillis, 0),
                TimeUnit::Microsecond => (C::TimeMicros, 0),
                TimeUnit::Nanosecond => (C::TimeMicros, -1000),
            };
            LeafTypeInfo {
                ts_scale,
                ..LeafTypeInfo::simple(P::Int64, Some(converted), S::Int64)
            }
        }
        DataType::Decimal128(p, s) => {
            let precision = precision_override.unwrap_or(*p as i32);
            let scale = *s as i32;
            if precision <= 0 {
                return Err(Error::InvalidInput {
                    source: "decimal column requires a positive precision".into(),
                    location: location!(),
                });
            }
            if precision < scale {
                return Err(Error::InvalidInput {
                    source: format!("decimal precision {precision} is smaller than scale {scale}")
                        .into(),
                    location: location!(),
                });
            }
            let (physical, stats) = if precision <= 9 {
                (P::Int32, S::Int32)
            } else if precision <= 18 {
                (P::Int64, S::Int64)
            } else {
                return Err(Error::NotSupported {
                    source: format!("decimal precision {precision} exceeds 18 digits").into(),
                    location: location!(),
                });
            };
            LeafTypeInfo {
                scale,
                precision,
                ..LeafTypeInfo::simple(physical, Some(C::Decimal), stats)
            }
        }
        _ => LeafTypeInfo::simple(P::Undefined, None, S::None),
    };
    Ok(info)
}

fn timestamp_info(unit: &TimeUnit, int96: bool) -> LeafTypeInfo {
    use ConvertedType as C;
    if int96 {
        // INT96 carries nanoseconds; rescale from the source unit.
        let ts_scale = match unit {
            TimeUnit::Second => 1_000_000_000,
            TimeUnit::Millisecond => 1_000_000,
            TimeUnit::Microsecond => 1_000,
            TimeUnit::Nanosecond => 0,
        };
        return LeafTypeInfo {
            ts_scale,
            ..LeafTypeInfo::simple(Physical::Int96, None, StatisticsKind::None)
        };
    }
    let (converted, ts_scale) = match unit {
        TimeUnit::Second => (C::TimestampMillis, 1000),
        TimeUnit::Millisecond => (C::TimestampMillis, 0),
        TimeUnit::Microsecond => (C::TimestampMicros, 0),
        TimeUnit::Nanosecond => (C::TimestampMicros, -1000),
    };
    LeafTypeInfo {
        ts_scale,
        ..LeafTypeInfo::simple(Physical::Int64, Some(converted), StatisticsKind::Int64)
    }
}
