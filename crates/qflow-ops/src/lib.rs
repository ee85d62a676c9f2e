//! # qflow-ops - Physical Query Operators
//!
//! The concrete [`qflow_core::Operator`] implementations a query plan is
//! built from: scans over the push-down object store, the row-level
//! operators (`Project`, `Filter`, `Map`), the hash-join build/probe pair,
//! the two-stage group/aggregate split, the bloom-filter side channel
//! between a join's build side and a bloom-pruned scan, the top-K threshold
//! exchanger, and the terminal `Collate` sink.
//!
//! [`PlanBuilder`] turns the declarative [`qflow_core::PlanSpec`] (as loaded
//! from plan-spec YAML) into boxed operators, resolving every node's
//! `ExprSpec` against its upstream schema and wiring the one-shot handoffs
//! (`HashJoinBuild` -> `HashJoinProbe`, `BloomCreate` -> `ScanBloomUse`) that
//! fall outside the plan's ordinary batch edges.

pub mod bloom_create;
pub mod collate;
pub mod filter;
pub mod group_aggregate;
pub mod hash_join;
pub mod map;
pub mod project;
pub mod scan;
pub mod scan_bloom_use;
pub mod topk_filter_build;

pub use bloom_create::BloomCreate;
pub use collate::Collate;
pub use filter::Filter;
pub use group_aggregate::{AggFunc, AggSpec, Aggregate, Group};
pub use hash_join::{BuildSide, HashJoinBuild, HashJoinProbe, JoinType};
pub use map::Map;
pub use project::Project;
pub use scan::Scan;
pub use scan_bloom_use::ScanBloomUse;
pub use topk_filter_build::TopKFilterBuild;

use std::collections::HashMap;
use std::sync::Arc;

use arrow_schema::{DataType, Field, Schema, SchemaRef};
use qflow_core::{
    build_expr, build_schema, AggFuncSpec, DirectionSpec, EngineConfig, JoinTypeSpec, NodeSpec,
    Operator, PlanSpec,
};
use qflow_objectstore::cache::ObjectCache;
use qflow_objectstore::client::{SelectClient, SelectRequest};
use tokio::sync::oneshot;

fn project_schema(full: &Schema, projection: &[String]) -> anyhow::Result<SchemaRef> {
    if projection.is_empty() {
        return Ok(Arc::new(full.clone()));
    }
    let fields: anyhow::Result<Vec<Field>> = projection
        .iter()
        .map(|name| {
            full.field_with_name(name)
                .cloned()
                .map_err(|_| anyhow::anyhow!("unknown projected column '{name}'"))
        })
        .collect();
    Ok(Arc::new(Schema::new(fields?)))
}

fn key_schema_tuples(fields: &[qflow_core::FieldSpec]) -> Vec<(String, DataType)> {
    fields
        .iter()
        .map(|f| (f.name.clone(), f.data_type.into()))
        .collect()
}

fn agg_specs(aggs: &[qflow_core::AggSpecYaml], schema: &Schema) -> anyhow::Result<Vec<AggSpec>> {
    aggs.iter()
        .map(|a| {
            Ok(AggSpec {
                input: build_expr(&a.input, schema)?,
                func: match a.func {
                    AggFuncSpec::Sum => AggFunc::Sum,
                    AggFuncSpec::Count => AggFunc::Count,
                    AggFuncSpec::Min => AggFunc::Min,
                    AggFuncSpec::Max => AggFunc::Max,
                    AggFuncSpec::Avg => AggFunc::Avg,
                },
                name: a.name.clone(),
            })
        })
        .collect()
}

/// Builds every operator named in a [`PlanSpec`], resolving column names
/// against each node's upstream schema and threading the one-shot channels
/// a bloom filter or a join's hash table travels over.
///
/// Call [`PlanBuilder::build`] once per node, in an order where each node's
/// producer (per the plan's edges) has already been built — the same
/// boot order [`qflow_core::QueryPlan`] computes from its own topology.
pub struct PlanBuilder {
    client: Arc<SelectClient>,
    schemas: HashMap<String, SchemaRef>,
    producer_of: HashMap<String, String>,
    bloom_tx: HashMap<String, oneshot::Sender<qflow_core::BloomFilter>>,
    bloom_rx: HashMap<String, oneshot::Receiver<qflow_core::BloomFilter>>,
    build_tx: HashMap<String, oneshot::Sender<BuildSide>>,
    build_rx: HashMap<String, oneshot::Receiver<BuildSide>>,
    result_tx: HashMap<String, oneshot::Sender<Vec<qflow_core::Message>>>,
    result_rx: HashMap<String, oneshot::Receiver<Vec<qflow_core::Message>>>,
}

impl PlanBuilder {
    pub fn new(config: &EngineConfig, plan: &PlanSpec) -> Self {
        let mut client = SelectClient::new(config.object_store_url.clone())
            .with_multipart_chunk_bytes(config.multipart_chunk_bytes);
        if let Some(dir) = &config.cache_dir {
            client = client.with_cache(ObjectCache::new(dir.clone()));
        }

        let mut bloom_tx = HashMap::new();
        let mut bloom_rx = HashMap::new();
        let mut build_tx = HashMap::new();
        let mut build_rx = HashMap::new();
        let mut result_tx = HashMap::new();
        let mut result_rx = HashMap::new();
        for node in &plan.nodes {
            match node {
                NodeSpec::BloomCreate { id, .. } => {
                    let (tx, rx) = oneshot::channel();
                    bloom_tx.insert(id.clone(), tx);
                    bloom_rx.insert(id.clone(), rx);
                }
                NodeSpec::HashJoinBuild { id, .. } => {
                    let (tx, rx) = oneshot::channel();
                    build_tx.insert(id.clone(), tx);
                    build_rx.insert(id.clone(), rx);
                }
                NodeSpec::Collate { id } => {
                    let (tx, rx) = oneshot::channel();
                    result_tx.insert(id.clone(), tx);
                    result_rx.insert(id.clone(), rx);
                }
                _ => {}
            }
        }

        let producer_of = plan
            .edges
            .iter()
            .map(|e| (e.to.clone(), e.from.clone()))
            .collect();

        Self {
            client: Arc::new(client),
            schemas: HashMap::new(),
            producer_of,
            bloom_tx,
            bloom_rx,
            build_tx,
            build_rx,
            result_tx,
            result_rx,
        }
    }

    /// The result channel for a `collate` node, taken once its operator has
    /// been built. The caller awaits this after the plan finishes executing
    /// to retrieve the buffered rows, since `QueryPlan::execute` consumes
    /// operator ownership into its own spawned tasks.
    pub fn take_collate_result_rx(
        &mut self,
        id: &str,
    ) -> Option<oneshot::Receiver<Vec<qflow_core::Message>>> {
        self.result_rx.remove(id)
    }

    /// The output schema registered for `node_id` once it has been built.
    pub fn schema_of(&self, node_id: &str) -> Option<&SchemaRef> {
        self.schemas.get(node_id)
    }

    fn input_schema(&self, node_id: &str) -> anyhow::Result<SchemaRef> {
        let producer = self
            .producer_of
            .get(node_id)
            .ok_or_else(|| anyhow::anyhow!("node '{node_id}' has no inbound edge"))?;
        self.schemas
            .get(producer)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("producer '{producer}' of '{node_id}' not yet built"))
    }

    pub fn build(&mut self, node: &NodeSpec) -> anyhow::Result<Box<dyn Operator>> {
        let default_fp_rate = 0.01;
        let op: Box<dyn Operator> = match node {
            NodeSpec::Scan {
                id,
                object_key,
                schema,
                projection,
                predicate_sql,
                batch_rows,
            } => {
                let full = build_schema(schema);
                let projected = project_schema(&full, projection)?;
                self.schemas.insert(id.clone(), projected.clone());
                let request = SelectRequest {
                    object_key: object_key.clone(),
                    schema: projected,
                    projection: projection.clone(),
                    predicate_sql: predicate_sql.clone(),
                    batch_rows: *batch_rows,
                };
                Box::new(Scan::new(id.clone(), self.client.clone(), request))
            }
            NodeSpec::ScanBloomUse {
                id,
                object_key,
                schema,
                projection,
                predicate_sql,
                batch_rows,
                join_key_column,
                bloom_source,
            } => {
                let full = build_schema(schema);
                let projected = project_schema(&full, projection)?;
                self.schemas.insert(id.clone(), projected.clone());
                let request = SelectRequest {
                    object_key: object_key.clone(),
                    schema: projected,
                    projection: projection.clone(),
                    predicate_sql: predicate_sql.clone(),
                    batch_rows: *batch_rows,
                };
                let bloom_rx = self.bloom_rx.remove(bloom_source).ok_or_else(|| {
                    anyhow::anyhow!(
                        "no bloom_create node with id '{bloom_source}' feeding scan '{id}'"
                    )
                })?;
                Box::new(ScanBloomUse::new(
                    id.clone(),
                    self.client.clone(),
                    request,
                    join_key_column.clone(),
                    bloom_rx,
                ))
            }
            NodeSpec::Project {
                id,
                output_schema,
                exprs,
            } => {
                let input = self.input_schema(id)?;
                let output = build_schema(output_schema);
                self.schemas.insert(id.clone(), output.clone());
                let exprs = exprs
                    .iter()
                    .map(|e| build_expr(e, &input))
                    .collect::<Result<Vec<_>, _>>()?;
                Box::new(Project::new(id.clone(), output, exprs))
            }
            NodeSpec::Filter { id, predicate } => {
                let input = self.input_schema(id)?;
                self.schemas.insert(id.clone(), input.clone());
                Box::new(Filter::new(id.clone(), build_expr(predicate, &input)?))
            }
            NodeSpec::Map { id, key } => {
                let input = self.input_schema(id)?;
                self.schemas.insert(id.clone(), input.clone());
                Box::new(Map::new(id.clone(), build_expr(key, &input)?))
            }
            NodeSpec::HashJoinBuild { id, key, .. } => {
                let input = self.input_schema(id)?;
                let key_expr = build_expr(key, &input)?;
                let build_tx = self
                    .build_tx
                    .remove(id)
                    .ok_or_else(|| anyhow::anyhow!("no build-side channel prepared for '{id}'"))?;
                Box::new(HashJoinBuild::new(id.clone(), key_expr, build_tx))
            }
            NodeSpec::HashJoinProbe {
                id,
                key,
                join_type,
                build,
            } => {
                let probe_schema = self.input_schema(id)?;
                let key_expr = build_expr(key, &probe_schema)?;
                let build_rx = self
                    .build_rx
                    .remove(build)
                    .ok_or_else(|| anyhow::anyhow!("no hash_join_build node with id '{build}'"))?;
                let build_schema_ref = self
                    .schemas
                    .get(build)
                    .cloned()
                    .unwrap_or_else(|| probe_schema.clone());
                let join_type = match join_type {
                    JoinTypeSpec::Inner => JoinType::Inner,
                    JoinTypeSpec::Left => JoinType::Left,
                };
                let output = qflow_core::concat_schemas(&probe_schema, &build_schema_ref);
                self.schemas.insert(id.clone(), output);
                Box::new(HashJoinProbe::new(
                    id.clone(),
                    key_expr,
                    join_type,
                    build_rx,
                    probe_schema,
                    build_schema_ref,
                ))
            }
            NodeSpec::Group {
                id,
                key,
                key_names,
                aggs,
            } => {
                let input = self.input_schema(id)?;
                let key_exprs = key
                    .iter()
                    .map(|e| build_expr(e, &input))
                    .collect::<Result<Vec<_>, _>>()?;
                let aggs = agg_specs(aggs, &input)?;
                let tuples = key_schema_tuples(key_names);
                let output = group_aggregate::partial_schema(&tuples, &aggs);
                self.schemas.insert(id.clone(), output.clone());
                Box::new(Group::new(id.clone(), key_exprs, aggs, output))
            }
            NodeSpec::Aggregate {
                id,
                num_keys,
                key_names,
                aggs,
            } => {
                let input = self.input_schema(id)?;
                let aggs = agg_specs(aggs, &input)?;
                let tuples = key_schema_tuples(key_names);
                let output = group_aggregate::final_schema(&tuples, &aggs);
                self.schemas.insert(id.clone(), output.clone());
                Box::new(Aggregate::new(id.clone(), *num_keys, aggs, output))
            }
            NodeSpec::BloomCreate {
                id,
                key,
                false_positive_rate,
                ..
            } => {
                let input = self.input_schema(id)?;
                let key_expr = build_expr(key, &input)?;
                let bloom_tx = self
                    .bloom_tx
                    .remove(id)
                    .ok_or_else(|| anyhow::anyhow!("no bloom channel prepared for '{id}'"))?;
                Box::new(BloomCreate::new(
                    id.clone(),
                    key_expr,
                    false_positive_rate.unwrap_or(default_fp_rate),
                    bloom_tx,
                ))
            }
            NodeSpec::TopKFilterBuild {
                id,
                k,
                direction,
                score,
            } => {
                let input = self.input_schema(id)?;
                self.schemas.insert(id.clone(), input.clone());
                let direction = match direction {
                    DirectionSpec::Largest => qflow_core::Direction::Largest,
                    DirectionSpec::Smallest => qflow_core::Direction::Smallest,
                };
                Box::new(TopKFilterBuild::new(
                    id.clone(),
                    *k,
                    direction,
                    build_expr(score, &input)?,
                ))
            }
            NodeSpec::Collate { id } => {
                let input = self.input_schema(id)?;
                self.schemas.insert(id.clone(), input.clone());
                let result_tx = self.result_tx.remove(id).ok_or_else(|| {
                    anyhow::anyhow!("no result channel registered for collate node '{id}'")
                })?;
                Box::new(Collate::new(id.clone(), result_tx))
            }
        };
        Ok(op)
    }
}
