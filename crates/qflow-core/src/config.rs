//! Declarative configuration: the engine-wide `EngineConfig` and the
//! plan-spec YAML consumed by the CLI runner (§10.3).
//!
//! A small set of `serde`-derived structs loaded from YAML, matched by the
//! plan loader to build the concrete operator for each node. A query plan
//! is a general DAG rather than a linear chain, so `PlanSpec` carries an
//! explicit node list plus an edge list rather than an ordered stage
//! vector.

use std::collections::HashMap;
use std::path::PathBuf;

use arrow_schema::{DataType, Field, Schema, SchemaRef, TimeUnit};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::expr::{BinaryOp, Expr, ExprError};
use crate::scalar::ScalarValue;
use crate::topk::Direction;

/// Engine-wide settings: where the object store lives, how scans cache
/// responses, and the defaults every plan falls back to unless a node
/// overrides them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub object_store_url: String,
    pub bucket: String,
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
    #[serde(default = "EngineConfig::default_channel_capacity")]
    pub channel_capacity: usize,
    #[serde(default = "EngineConfig::default_bloom_false_positive_rate")]
    pub bloom_false_positive_rate: f64,
    /// Response bytes per simulated multipart chunk, for estimating how
    /// many HTTP requests a push-down select would have taken on the real
    /// store (§4.1's `num_http_requests`).
    #[serde(default = "EngineConfig::default_multipart_chunk_bytes")]
    pub multipart_chunk_bytes: u64,
}

impl EngineConfig {
    fn default_channel_capacity() -> usize {
        1024
    }

    fn default_bloom_false_positive_rate() -> f64 {
        0.01
    }

    fn default_multipart_chunk_bytes() -> u64 {
        8 * 1024 * 1024
    }

    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        Self::from_yaml_str(&std::fs::read_to_string(path)?)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DataTypeSpec {
    Utf8,
    Int64,
    Float64,
    Boolean,
    Timestamp,
}

impl From<DataTypeSpec> for DataType {
    fn from(value: DataTypeSpec) -> Self {
        match value {
            DataTypeSpec::Utf8 => DataType::Utf8,
            DataTypeSpec::Int64 => DataType::Int64,
            DataTypeSpec::Float64 => DataType::Float64,
            DataTypeSpec::Boolean => DataType::Boolean,
            DataTypeSpec::Timestamp => DataType::Timestamp(TimeUnit::Microsecond, None),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: DataTypeSpec,
    #[serde(default = "FieldSpec::default_nullable")]
    pub nullable: bool,
}

impl FieldSpec {
    fn default_nullable() -> bool {
        true
    }
}

pub fn build_schema(fields: &[FieldSpec]) -> SchemaRef {
    Arc::new(Schema::new(
        fields
            .iter()
            .map(|f| Field::new(&f.name, f.data_type.into(), f.nullable))
            .collect::<Vec<_>>(),
    ))
}

/// A literal value as it appears in plan-spec YAML/JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LiteralSpec {
    Null,
    Utf8(String),
    Int64(i64),
    Float64(f64),
    Boolean(bool),
    /// Microseconds since the epoch.
    Timestamp(i64),
}

impl From<LiteralSpec> for ScalarValue {
    fn from(value: LiteralSpec) -> Self {
        match value {
            LiteralSpec::Null => ScalarValue::Null,
            LiteralSpec::Utf8(s) => ScalarValue::Utf8(s),
            LiteralSpec::Int64(i) => ScalarValue::Int64(i),
            LiteralSpec::Float64(f) => ScalarValue::Float64(f),
            LiteralSpec::Boolean(b) => ScalarValue::Boolean(b),
            LiteralSpec::Timestamp(t) => ScalarValue::Timestamp(t),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOpSpec {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Add,
    Sub,
    Mul,
    Div,
}

impl From<BinaryOpSpec> for BinaryOp {
    fn from(value: BinaryOpSpec) -> Self {
        match value {
            BinaryOpSpec::Eq => BinaryOp::Eq,
            BinaryOpSpec::NotEq => BinaryOp::NotEq,
            BinaryOpSpec::Lt => BinaryOp::Lt,
            BinaryOpSpec::LtEq => BinaryOp::LtEq,
            BinaryOpSpec::Gt => BinaryOp::Gt,
            BinaryOpSpec::GtEq => BinaryOp::GtEq,
            BinaryOpSpec::Add => BinaryOp::Add,
            BinaryOpSpec::Sub => BinaryOp::Sub,
            BinaryOpSpec::Mul => BinaryOp::Mul,
            BinaryOpSpec::Div => BinaryOp::Div,
        }
    }
}

/// The declarative, schema-unaware form of [`Expr`]. Column references are
/// by name and resolved against a concrete schema with [`build_expr`] once
/// the plan loader knows each node's input schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExprSpec {
    Column(String),
    Literal(LiteralSpec),
    BinaryOp {
        left: Box<ExprSpec>,
        op: BinaryOpSpec,
        right: Box<ExprSpec>,
    },
    And(Box<ExprSpec>, Box<ExprSpec>),
    Or(Box<ExprSpec>, Box<ExprSpec>),
    Not(Box<ExprSpec>),
    Like {
        expr: Box<ExprSpec>,
        pattern: String,
    },
    In {
        expr: Box<ExprSpec>,
        values: Vec<LiteralSpec>,
    },
}

/// Resolves an [`ExprSpec`] into an [`Expr`] against `schema`, looking up
/// every `Column(name)` reference once so row evaluation never re-resolves
/// a name (§9's dictionary -> `Schema` translation).
pub fn build_expr(spec: &ExprSpec, schema: &Schema) -> Result<Expr, ExprError> {
    Ok(match spec {
        ExprSpec::Column(name) => Expr::column(schema, name)?,
        ExprSpec::Literal(lit) => Expr::Literal(lit.clone().into()),
        ExprSpec::BinaryOp { left, op, right } => Expr::BinaryOp {
            left: Box::new(build_expr(left, schema)?),
            op: (*op).into(),
            right: Box::new(build_expr(right, schema)?),
        },
        ExprSpec::And(l, r) => Expr::And(Box::new(build_expr(l, schema)?), Box::new(build_expr(r, schema)?)),
        ExprSpec::Or(l, r) => Expr::Or(Box::new(build_expr(l, schema)?), Box::new(build_expr(r, schema)?)),
        ExprSpec::Not(e) => Expr::Not(Box::new(build_expr(e, schema)?)),
        ExprSpec::Like { expr, pattern } => Expr::Like {
            expr: Box::new(build_expr(expr, schema)?),
            pattern: pattern.clone(),
        },
        ExprSpec::In { expr, values } => Expr::In {
            expr: Box::new(build_expr(expr, schema)?),
            values: values.iter().cloned().map(ScalarValue::from).collect(),
        },
    })
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DirectionSpec {
    Largest,
    Smallest,
}

impl From<DirectionSpec> for Direction {
    fn from(value: DirectionSpec) -> Self {
        match value {
            DirectionSpec::Largest => Direction::Largest,
            DirectionSpec::Smallest => Direction::Smallest,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AggFuncSpec {
    Sum,
    Count,
    Min,
    Max,
    Avg,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggSpecYaml {
    pub input: ExprSpec,
    pub func: AggFuncSpec,
    pub name: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JoinTypeSpec {
    Inner,
    Left,
}

/// One node in the plan graph. Every variant names the operator's own
/// config plus the fields the loader needs to resolve expressions against
/// this node's input schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeSpec {
    Scan {
        id: String,
        object_key: String,
        schema: Vec<FieldSpec>,
        projection: Vec<String>,
        #[serde(default)]
        predicate_sql: Option<String>,
        #[serde(default = "NodeSpec::default_batch_rows")]
        batch_rows: usize,
    },
    ScanBloomUse {
        id: String,
        object_key: String,
        schema: Vec<FieldSpec>,
        projection: Vec<String>,
        #[serde(default)]
        predicate_sql: Option<String>,
        #[serde(default = "NodeSpec::default_batch_rows")]
        batch_rows: usize,
        join_key_column: String,
        /// `id` of the `bloom_create` node this scan subscribes to.
        bloom_source: String,
    },
    Project {
        id: String,
        output_schema: Vec<FieldSpec>,
        exprs: Vec<ExprSpec>,
    },
    Filter {
        id: String,
        predicate: ExprSpec,
    },
    Map {
        id: String,
        key: ExprSpec,
    },
    HashJoinBuild {
        id: String,
        key: ExprSpec,
        /// `id` this build side hands its hash table to.
        probe: String,
    },
    HashJoinProbe {
        id: String,
        key: ExprSpec,
        join_type: JoinTypeSpec,
        /// `id` of the paired `hash_join_build` node.
        build: String,
    },
    Group {
        id: String,
        key: Vec<ExprSpec>,
        key_names: Vec<FieldSpec>,
        aggs: Vec<AggSpecYaml>,
    },
    Aggregate {
        id: String,
        num_keys: usize,
        key_names: Vec<FieldSpec>,
        aggs: Vec<AggSpecYaml>,
    },
    BloomCreate {
        id: String,
        key: ExprSpec,
        #[serde(default)]
        false_positive_rate: Option<f64>,
        /// `id` of the `scan_bloom_use` node this filter is delivered to.
        consumer: String,
    },
    TopKFilterBuild {
        id: String,
        k: usize,
        direction: DirectionSpec,
        score: ExprSpec,
    },
    Collate {
        id: String,
    },
}

impl NodeSpec {
    fn default_batch_rows() -> usize {
        1024
    }

    pub fn id(&self) -> &str {
        match self {
            NodeSpec::Scan { id, .. }
            | NodeSpec::ScanBloomUse { id, .. }
            | NodeSpec::Project { id, .. }
            | NodeSpec::Filter { id, .. }
            | NodeSpec::Map { id, .. }
            | NodeSpec::HashJoinBuild { id, .. }
            | NodeSpec::HashJoinProbe { id, .. }
            | NodeSpec::Group { id, .. }
            | NodeSpec::Aggregate { id, .. }
            | NodeSpec::BloomCreate { id, .. }
            | NodeSpec::TopKFilterBuild { id, .. }
            | NodeSpec::Collate { id, .. } => id,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeSpec {
    pub from: String,
    pub to: String,
}

/// The full declarative plan: every node, the edges between them, and the
/// channel capacity to wire async operators with (falling back to the
/// engine default when absent).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanSpec {
    pub nodes: Vec<NodeSpec>,
    pub edges: Vec<EdgeSpec>,
    #[serde(default)]
    pub channel_capacity: Option<usize>,
}

impl PlanSpec {
    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        Self::from_yaml_str(&std::fs::read_to_string(path)?)
    }

    pub fn node_by_id(&self) -> HashMap<&str, &NodeSpec> {
        self.nodes.iter().map(|n| (n.id(), n)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_config_round_trips_defaults() {
        let yaml = "object_store_url: http://localhost:9000\nbucket: tpch\n";
        let cfg = EngineConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(cfg.channel_capacity, 1024);
        assert!((cfg.bloom_false_positive_rate - 0.01).abs() < 1e-12);
    }

    #[test]
    fn build_expr_resolves_column_by_name() {
        let schema = Schema::new(vec![Field::new("a", DataType::Int64, false)]);
        let spec = ExprSpec::BinaryOp {
            left: Box::new(ExprSpec::Column("a".into())),
            op: BinaryOpSpec::GtEq,
            right: Box::new(ExprSpec::Literal(LiteralSpec::Int64(5))),
        };
        let expr = build_expr(&spec, &schema).unwrap();
        matches!(expr, Expr::BinaryOp { .. });
    }

    #[test]
    fn plan_spec_parses_scan_and_filter_and_edge() {
        let yaml = r#"
channel_capacity: 256
nodes:
  - kind: scan
    id: scan1
    object_key: lineitem.csv
    schema:
      - { name: l_orderkey, type: int64, nullable: false }
      - { name: l_shipdate, type: timestamp }
    projection: [l_orderkey, l_shipdate]
  - kind: filter
    id: filter1
    predicate:
      binary_op:
        left: { column: l_orderkey }
        op: gt_eq
        right: { literal: { int64: 1 } }
edges:
  - { from: scan1, to: filter1 }
"#;
        let plan = PlanSpec::from_yaml_str(yaml).unwrap();
        assert_eq!(plan.nodes.len(), 2);
        assert_eq!(plan.edges.len(), 1);
        assert_eq!(plan.channel_capacity, Some(256));
    }
}
