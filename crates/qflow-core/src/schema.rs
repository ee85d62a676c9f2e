//! Schema helpers: name → ordinal resolution and join-output concatenation.
//!
//! The original source (`s3filter`) looked up columns through a dynamic
//! per-row dictionary keyed by either the logical name or an ordinal token
//! like `'_0'`. Here that becomes a single lookup against the Arrow
//! `Schema` computed once per stream (§9).

use crate::SchemaRef;
use arrow_schema::{Field, Schema};
use std::sync::Arc;

/// Resolves `name` to a column ordinal, accepting both a logical field name
/// and the `_N` ordinal token form used by push-down SQL text.
pub fn column_index(schema: &Schema, name: &str) -> Option<usize> {
    if let Some(idx) = name.strip_prefix('_').and_then(|n| n.parse::<usize>().ok()) {
        if idx < schema.fields().len() {
            return Some(idx);
        }
    }
    schema.fields().iter().position(|f| f.name() == name)
}

/// Builds the composite schema for a hash-join output: `probe.schema ‖
/// build.schema`, keeping duplicate column names and requiring ordinal
/// access to disambiguate them (§4.6).
pub fn concat_schemas(probe: &SchemaRef, build: &SchemaRef) -> SchemaRef {
    let fields: Vec<Arc<Field>> = probe
        .fields()
        .iter()
        .cloned()
        .chain(build.fields().iter().cloned())
        .collect();
    Arc::new(Schema::new(fields))
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow_schema::DataType;

    fn schema() -> Schema {
        Schema::new(vec![
            Field::new("l_orderkey", DataType::Int64, false),
            Field::new("l_extendedprice", DataType::Float64, true),
        ])
    }

    #[test]
    fn resolves_by_name_and_ordinal() {
        let s = schema();
        assert_eq!(column_index(&s, "l_orderkey"), Some(0));
        assert_eq!(column_index(&s, "_1"), Some(1));
        assert_eq!(column_index(&s, "_9"), None);
        assert_eq!(column_index(&s, "missing"), None);
    }

    #[test]
    fn concat_keeps_duplicate_names() {
        let a = Arc::new(schema());
        let b = Arc::new(schema());
        let joined = concat_schemas(&a, &b);
        assert_eq!(joined.fields().len(), 4);
        assert_eq!(joined.field(0).name(), joined.field(2).name());
    }
}
