//! Typed scalar values extracted from (or appended to) a record batch row.
//!
//! The physical operators work with [`ScalarValue`] whenever they need
//! per-row semantics (predicate evaluation, join key comparison, aggregate
//! accumulation) rather than Arrow's columnar representation. Nulls are
//! modelled explicitly so comparisons can follow SQL's three-valued logic.

use arrow_array::{
    Array, ArrayRef, BooleanArray, Float64Array, Int64Array, StringArray,
    TimestampMicrosecondArray,
};
use arrow_array::RecordBatch;
use arrow_schema::{DataType, SchemaRef};
use std::cmp::Ordering;
use std::sync::Arc;

/// One value of one of the column types the data model supports (§3).
#[derive(Debug, Clone, PartialEq)]
pub enum ScalarValue {
    Null,
    Utf8(String),
    Int64(i64),
    Float64(f64),
    Boolean(bool),
    /// Microseconds since the epoch.
    Timestamp(i64),
}

impl ScalarValue {
    pub fn is_null(&self) -> bool {
        matches!(self, ScalarValue::Null)
    }

    /// Byte-equal for strings, value-equal for numerics, per the join-key
    /// equality rule in §3. Returns `None` if either side is null (SQL
    /// three-valued logic: `NULL = x` is unknown, not false).
    pub fn sql_eq(&self, other: &ScalarValue) -> Option<bool> {
        if self.is_null() || other.is_null() {
            return None;
        }
        Some(self.partial_cmp_nonnull(other) == Some(Ordering::Equal))
    }

    /// Ordering comparison used by `<`, `>=`, MIN/MAX. `None` when either
    /// side is null or the two values are not comparable.
    pub fn sql_cmp(&self, other: &ScalarValue) -> Option<Ordering> {
        if self.is_null() || other.is_null() {
            return None;
        }
        self.partial_cmp_nonnull(other)
    }

    fn partial_cmp_nonnull(&self, other: &ScalarValue) -> Option<Ordering> {
        use ScalarValue::*;
        match (self, other) {
            (Utf8(a), Utf8(b)) => Some(a.cmp(b)),
            (Int64(a), Int64(b)) => Some(a.cmp(b)),
            (Float64(a), Float64(b)) => a.partial_cmp(b),
            (Int64(a), Float64(b)) => (*a as f64).partial_cmp(b),
            (Float64(a), Int64(b)) => a.partial_cmp(&(*b as f64)),
            (Boolean(a), Boolean(b)) => Some(a.cmp(b)),
            (Timestamp(a), Timestamp(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// View this value as `f64`, for numeric aggregates. `None` for
    /// non-numeric types or null (caller raises the `Aggregate` error kind).
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ScalarValue::Int64(v) => Some(*v as f64),
            ScalarValue::Float64(v) => Some(*v),
            _ => None,
        }
    }

    /// Renders this value as a literal in the object store's predicate
    /// dialect, for folding a bloom filter's probe set into an `IN (...)`
    /// push-down predicate (§4.2). `Null` has no SQL literal (`x IN (NULL)`
    /// never matches under three-valued logic), so callers filter it out.
    pub fn to_sql_literal(&self) -> Option<String> {
        match self {
            ScalarValue::Null => None,
            ScalarValue::Utf8(s) => Some(format!("'{}'", s.replace('\'', "''"))),
            ScalarValue::Int64(i) => Some(i.to_string()),
            ScalarValue::Float64(f) => Some(f.to_string()),
            ScalarValue::Boolean(b) => Some(b.to_string()),
            ScalarValue::Timestamp(t) => Some(t.to_string()),
        }
    }

    /// A stable byte representation used by the hash join and the bloom
    /// filter. Distinct types never collide (the type tag is folded in).
    pub fn hash_bytes(&self) -> Vec<u8> {
        match self {
            ScalarValue::Null => vec![0u8],
            ScalarValue::Utf8(s) => {
                let mut v = vec![1u8];
                v.extend_from_slice(s.as_bytes());
                v
            }
            ScalarValue::Int64(i) => {
                let mut v = vec![2u8];
                v.extend_from_slice(&i.to_le_bytes());
                v
            }
            ScalarValue::Float64(f) => {
                let mut v = vec![3u8];
                v.extend_from_slice(&f.to_bits().to_le_bytes());
                v
            }
            ScalarValue::Boolean(b) => vec![4u8, *b as u8],
            ScalarValue::Timestamp(t) => {
                let mut v = vec![5u8];
                v.extend_from_slice(&t.to_le_bytes());
                v
            }
        }
    }
}

impl std::fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScalarValue::Null => write!(f, ""),
            ScalarValue::Utf8(s) => write!(f, "{s}"),
            ScalarValue::Int64(i) => write!(f, "{i}"),
            ScalarValue::Float64(v) => write!(f, "{v}"),
            ScalarValue::Boolean(b) => write!(f, "{b}"),
            ScalarValue::Timestamp(t) => write!(f, "{t}"),
        }
    }
}

/// Reads the value at `(row, col)` out of a record batch, downcasting by the
/// column's declared Arrow type. Unsupported array types are treated as an
/// all-null column rather than panicking — callers that care surface a
/// schema error instead.
pub fn get_value(batch: &RecordBatch, col: usize, row: usize) -> ScalarValue {
    let array = batch.column(col);
    if array.is_null(row) {
        return ScalarValue::Null;
    }
    if let Some(a) = array.as_any().downcast_ref::<StringArray>() {
        return ScalarValue::Utf8(a.value(row).to_string());
    }
    if let Some(a) = array.as_any().downcast_ref::<Int64Array>() {
        return ScalarValue::Int64(a.value(row));
    }
    if let Some(a) = array.as_any().downcast_ref::<Float64Array>() {
        return ScalarValue::Float64(a.value(row));
    }
    if let Some(a) = array.as_any().downcast_ref::<BooleanArray>() {
        return ScalarValue::Boolean(a.value(row));
    }
    if let Some(a) = array.as_any().downcast_ref::<TimestampMicrosecondArray>() {
        return ScalarValue::Timestamp(a.value(row));
    }
    ScalarValue::Null
}

/// Builds a record batch from `schema` and one [`ScalarValue`] column per
/// field, each holding one value per output row. The inverse of
/// [`get_value`]; used by `Project`, `Group`/`Aggregate`, and `Collate` to
/// materialize a batch from per-row expression results rather than slicing
/// an existing one (§4.3, §4.7).
pub fn build_batch(schema: SchemaRef, columns: Vec<Vec<ScalarValue>>) -> anyhow::Result<RecordBatch> {
    anyhow::ensure!(
        columns.len() == schema.fields().len(),
        "column count {} does not match schema field count {}",
        columns.len(),
        schema.fields().len()
    );
    let arrays: Vec<ArrayRef> = schema
        .fields()
        .iter()
        .zip(columns.into_iter())
        .map(|(field, values)| build_array(field.data_type(), values))
        .collect::<anyhow::Result<_>>()?;
    Ok(RecordBatch::try_new(schema, arrays)?)
}

fn build_array(data_type: &DataType, values: Vec<ScalarValue>) -> anyhow::Result<ArrayRef> {
    match data_type {
        DataType::Utf8 => Ok(Arc::new(StringArray::from(
            values
                .into_iter()
                .map(|v| match v {
                    ScalarValue::Utf8(s) => Some(s),
                    ScalarValue::Null => None,
                    other => Some(format!("{other:?}")),
                })
                .collect::<Vec<_>>(),
        ))),
        DataType::Int64 => Ok(Arc::new(Int64Array::from(
            values
                .into_iter()
                .map(|v| match v {
                    ScalarValue::Int64(i) => Some(i),
                    ScalarValue::Null => None,
                    other => other.as_f64().map(|f| f as i64),
                })
                .collect::<Vec<_>>(),
        ))),
        DataType::Float64 => Ok(Arc::new(Float64Array::from(
            values
                .into_iter()
                .map(|v| match v {
                    ScalarValue::Null => None,
                    other => other.as_f64(),
                })
                .collect::<Vec<_>>(),
        ))),
        DataType::Boolean => Ok(Arc::new(BooleanArray::from(
            values
                .into_iter()
                .map(|v| match v {
                    ScalarValue::Boolean(b) => Some(b),
                    _ => None,
                })
                .collect::<Vec<_>>(),
        ))),
        DataType::Timestamp(_, _) => Ok(Arc::new(TimestampMicrosecondArray::from(
            values
                .into_iter()
                .map(|v| match v {
                    ScalarValue::Timestamp(t) => Some(t),
                    _ => None,
                })
                .collect::<Vec<_>>(),
        ))),
        other => Err(anyhow::anyhow!("unsupported output column type {other:?}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_equality_is_unknown() {
        assert_eq!(ScalarValue::Null.sql_eq(&ScalarValue::Int64(1)), None);
        assert_eq!(ScalarValue::Int64(1).sql_eq(&ScalarValue::Null), None);
    }

    #[test]
    fn numeric_cross_type_comparison() {
        assert_eq!(
            ScalarValue::Int64(2).sql_cmp(&ScalarValue::Float64(2.0)),
            Some(Ordering::Equal)
        );
    }

    #[test]
    fn sql_literal_escapes_quotes_and_skips_null() {
        assert_eq!(ScalarValue::Int64(7).to_sql_literal(), Some("7".to_string()));
        assert_eq!(
            ScalarValue::Utf8("O'Brien".into()).to_sql_literal(),
            Some("'O''Brien'".to_string())
        );
        assert_eq!(ScalarValue::Null.to_sql_literal(), None);
    }

    #[test]
    fn hash_bytes_distinguish_types() {
        let a = ScalarValue::Int64(1).hash_bytes();
        let b = ScalarValue::Float64(1.0).hash_bytes();
        assert_ne!(a, b);
    }

    #[test]
    fn build_batch_round_trips_through_get_value() {
        use arrow_schema::{Field, Schema};
        let schema = std::sync::Arc::new(Schema::new(vec![
            Field::new("a", DataType::Int64, true),
            Field::new("b", DataType::Utf8, true),
        ]));
        let batch = build_batch(
            schema,
            vec![
                vec![ScalarValue::Int64(1), ScalarValue::Null],
                vec![ScalarValue::Utf8("x".into()), ScalarValue::Utf8("y".into())],
            ],
        )
        .unwrap();
        assert_eq!(get_value(&batch, 0, 0), ScalarValue::Int64(1));
        assert_eq!(get_value(&batch, 0, 1), ScalarValue::Null);
        assert_eq!(get_value(&batch, 1, 1), ScalarValue::Utf8("y".into()));
    }
}
