//! Partitioned hash join: `HashJoinBuild` materializes the smaller side
//! into an in-memory hash table keyed by the join key's hash bytes, then
//! hands it to `HashJoinProbe` for a one-shot handoff once the build side
//! reaches end-of-stream (§4.6).
//!
//! Grounded in the build/probe pattern common to hash join implementations
//! (e.g. `TuringWorks-PrismDB`'s parallel join operator): one operator
//! drains its input into a table, the other streams its input against that
//! table, emitting the concatenated row on a match. Join-key equality
//! follows SQL three-valued logic: a `NULL` key never joins, in either
//! direction.

use std::collections::HashMap;

use async_trait::async_trait;
use qflow_core::{build_batch, concat_schemas, get_value, Batch, EngineError, Expr, Message, OpMetrics,
    Operator, OperatorContext, ScalarValue, SchemaRef};
use tokio::sync::oneshot;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinType {
    Inner,
    Left,
}

/// The build side's materialized state, handed from `HashJoinBuild` to
/// `HashJoinProbe` once the build side completes.
pub struct BuildSide {
    pub schema: SchemaRef,
    pub batches: Vec<Batch>,
    /// Join-key hash bytes -> every (batch, row) with that key. Rows whose
    /// key is `NULL` are never indexed.
    pub index: HashMap<Vec<u8>, Vec<(usize, usize)>>,
}

impl BuildSide {
    fn row_values(&self, batch_idx: usize, row: usize) -> Vec<ScalarValue> {
        let batch = &self.batches[batch_idx];
        (0..self.schema.fields().len())
            .map(|col| get_value(batch, col, row))
            .collect()
    }
}

pub struct HashJoinBuild {
    id: String,
    key_expr: Expr,
    build_tx: Option<oneshot::Sender<BuildSide>>,
    metrics: OpMetrics,
}

impl HashJoinBuild {
    pub fn new(id: String, key_expr: Expr, build_tx: oneshot::Sender<BuildSide>) -> Self {
        Self {
            id,
            key_expr,
            build_tx: Some(build_tx),
            metrics: OpMetrics::new(),
        }
    }
}

#[async_trait]
impl Operator for HashJoinBuild {
    fn name(&self) -> &str {
        &self.id
    }

    async fn run(&mut self, mut ctx: OperatorContext) -> anyhow::Result<()> {
        self.metrics.timer_start();
        let mut schema = None;
        let mut batches = Vec::new();
        let mut index: HashMap<Vec<u8>, Vec<(usize, usize)>> = HashMap::new();

        while let Some(msg) = ctx.inbound.recv().await {
            match msg {
                Message::FieldNames(s) => schema = Some(s),
                Message::Data(batch) => {
                    self.metrics.record_in(batch.num_rows() as u64);
                    let batch_idx = batches.len();
                    for row in 0..batch.num_rows() {
                        let key = self.key_expr.eval_row(&batch, row);
                        if key.is_null() {
                            continue;
                        }
                        index.entry(key.hash_bytes()).or_default().push((batch_idx, row));
                    }
                    batches.push(batch);
                }
                Message::Stop => break,
                _ => {}
            }
        }

        let schema = match schema {
            Some(s) => s,
            None => {
                self.metrics.timer_stop();
                ctx.control
                    .send(qflow_core::ControlMessage::Complete {
                        operator: self.id.clone(),
                        error: Some(EngineError::Schema {
                            operator: self.id.clone(),
                            detail: "build side completed without ever seeing FieldNames".into(),
                        }),
                        metrics: self.metrics.clone(),
                    })
                    .await
                    .ok();
                return Ok(());
            }
        };
        info!(operator = %self.id, build_rows = batches.iter().map(Batch::num_rows).sum::<usize>(), "build side materialized");

        if let Some(tx) = self.build_tx.take() {
            let _ = tx.send(BuildSide { schema, batches, index });
        }

        self.metrics.timer_stop();
        ctx.control
            .send(qflow_core::ControlMessage::Complete {
                operator: self.id.clone(),
                error: None,
                metrics: self.metrics.clone(),
            })
            .await
            .ok();
        Ok(())
    }

    fn metrics(&self) -> OpMetrics {
        self.metrics.clone()
    }
}

pub struct HashJoinProbe {
    id: String,
    key_expr: Expr,
    join_type: JoinType,
    build_rx: Option<oneshot::Receiver<BuildSide>>,
    probe_schema: SchemaRef,
    output_schema: SchemaRef,
    metrics: OpMetrics,
}

impl HashJoinProbe {
    pub fn new(
        id: String,
        key_expr: Expr,
        join_type: JoinType,
        build_rx: oneshot::Receiver<BuildSide>,
        probe_schema: SchemaRef,
        build_schema: SchemaRef,
    ) -> Self {
        let output_schema = concat_schemas(&probe_schema, &build_schema);
        Self {
            id,
            key_expr,
            join_type,
            build_rx: Some(build_rx),
            probe_schema,
            output_schema,
            metrics: OpMetrics::new(),
        }
    }
}

#[async_trait]
impl Operator for HashJoinProbe {
    fn name(&self) -> &str {
        &self.id
    }

    async fn run(&mut self, mut ctx: OperatorContext) -> anyhow::Result<()> {
        self.metrics.timer_start();

        let build = self
            .build_rx
            .take()
            .ok_or_else(|| anyhow::anyhow!("probe side '{}' already consumed its build handoff", self.id))?
            .await
            .map_err(|_| anyhow::anyhow!("build side for '{}' never completed", self.id))?;

        for out in &ctx.outbound {
            out.send(Message::FieldNames(self.output_schema.clone())).await.ok();
        }

        let build_arity = build.schema.fields().len();
        let nulls_for_build_side = || vec![ScalarValue::Null; build_arity];

        while let Some(msg) = ctx.inbound.recv().await {
            match msg {
                Message::Data(probe_batch) => {
                    self.metrics.record_in(probe_batch.num_rows() as u64);
                    let probe_arity = self.probe_schema.fields().len();
                    let mut out_columns: Vec<Vec<ScalarValue>> =
                        vec![Vec::new(); probe_arity + build_arity];

                    for row in 0..probe_batch.num_rows() {
                        let key = self.key_expr.eval_row(&probe_batch, row);
                        let probe_values: Vec<ScalarValue> = (0..probe_arity)
                            .map(|col| get_value(&probe_batch, col, row))
                            .collect();

                        let matches = if key.is_null() {
                            None
                        } else {
                            build.index.get(&key.hash_bytes())
                        };

                        match matches {
                            Some(matches) if !matches.is_empty() => {
                                for &(b, r) in matches {
                                    for (col, v) in probe_values.iter().cloned().enumerate() {
                                        out_columns[col].push(v);
                                    }
                                    for (col, v) in build.row_values(b, r).into_iter().enumerate() {
                                        out_columns[probe_arity + col].push(v);
                                    }
                                }
                            }
                            _ if self.join_type == JoinType::Left => {
                                for (col, v) in probe_values.into_iter().enumerate() {
                                    out_columns[col].push(v);
                                }
                                for (col, v) in nulls_for_build_side().into_iter().enumerate() {
                                    out_columns[probe_arity + col].push(v);
                                }
                            }
                            _ => {}
                        }
                    }

                    if !out_columns.iter().all(Vec::is_empty) {
                        let joined = build_batch(self.output_schema.clone(), out_columns)?;
                        self.metrics.record_out(joined.num_rows() as u64);
                        for out in &ctx.outbound {
                            out.send(Message::Data(joined.clone())).await.ok();
                        }
                    }
                }
                Message::Stop => break,
                _ => {}
            }
        }

        self.metrics.timer_stop();
        ctx.control
            .send(qflow_core::ControlMessage::Complete {
                operator: self.id.clone(),
                error: None,
                metrics: self.metrics.clone(),
            })
            .await
            .ok();
        Ok(())
    }

    fn metrics(&self) -> OpMetrics {
        self.metrics.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow_array::{Int64Array, RecordBatch};
    use arrow_schema::{DataType, Field, Schema};
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    fn schema(name: &str) -> SchemaRef {
        Arc::new(Schema::new(vec![
            Field::new("key", DataType::Int64, false),
            Field::new(name, DataType::Int64, false),
        ]))
    }

    #[tokio::test]
    async fn inner_join_only_emits_matches() {
        let build_schema = schema("b_val");
        let probe_schema = schema("p_val");

        let (build_tx, build_rx) = oneshot::channel();
        let mut build_op = HashJoinBuild::new("build".into(), Expr::Column(0), build_tx);

        let (b_in_tx, b_in_rx) = tokio::sync::mpsc::channel(4);
        let (b_out_tx, _b_out_rx) = tokio::sync::mpsc::channel(4);
        let (b_ctrl_tx, mut b_ctrl_rx) = tokio::sync::mpsc::channel(4);
        b_in_tx.send(Message::FieldNames(build_schema.clone())).await.unwrap();
        b_in_tx
            .send(Message::Data(
                RecordBatch::try_new(
                    build_schema.clone(),
                    vec![
                        Arc::new(Int64Array::from(vec![1, 2])),
                        Arc::new(Int64Array::from(vec![100, 200])),
                    ],
                )
                .unwrap(),
            ))
            .await
            .unwrap();
        drop(b_in_tx);
        build_op
            .run(OperatorContext {
                inbound: b_in_rx,
                outbound: vec![b_out_tx],
                control: b_ctrl_tx,
                cancel: CancellationToken::new(),
            })
            .await
            .unwrap();
        b_ctrl_rx.recv().await;

        let mut probe_op = HashJoinProbe::new(
            "probe".into(),
            Expr::Column(0),
            JoinType::Inner,
            build_rx,
            probe_schema.clone(),
            build_schema.clone(),
        );
        let (p_in_tx, p_in_rx) = tokio::sync::mpsc::channel(4);
        let (p_out_tx, mut p_out_rx) = tokio::sync::mpsc::channel(4);
        let (p_ctrl_tx, _p_ctrl_rx) = tokio::sync::mpsc::channel(4);
        p_in_tx
            .send(Message::Data(
                RecordBatch::try_new(
                    probe_schema.clone(),
                    vec![
                        Arc::new(Int64Array::from(vec![1, 3])),
                        Arc::new(Int64Array::from(vec![10, 30])),
                    ],
                )
                .unwrap(),
            ))
            .await
            .unwrap();
        drop(p_in_tx);
        probe_op
            .run(OperatorContext {
                inbound: p_in_rx,
                outbound: vec![p_out_tx],
                control: p_ctrl_tx,
                cancel: CancellationToken::new(),
            })
            .await
            .unwrap();

        // First message is FieldNames, second is the single matching row.
        let _ = p_out_rx.recv().await.unwrap();
        let Message::Data(joined) = p_out_rx.recv().await.unwrap() else {
            panic!("expected Data");
        };
        assert_eq!(joined.num_rows(), 1);
    }
}
