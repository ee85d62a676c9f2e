//! The repartitioner: hash-splits incoming rows across `N` consumers by a
//! key expression, the `all_to_all` connector's producer side (§4.5, §5).
//! Used ahead of a partitioned hash join or group-by so that matching keys
//! always land on the same downstream partition.

use arrow_array::{RecordBatch, UInt32Array};
use async_trait::async_trait;
use qflow_core::{partition_of, Expr, Message, OpMetrics, Operator, OperatorContext};

/// Builds the sub-batch of `batch`'s rows at `indices`, preserving schema.
fn take_rows(batch: &RecordBatch, indices: &UInt32Array) -> anyhow::Result<RecordBatch> {
    let columns = batch
        .columns()
        .iter()
        .map(|col| arrow_select::take::take(col, indices, None))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(RecordBatch::try_new(batch.schema(), columns)?)
}

pub struct Map {
    id: String,
    key_expr: Expr,
    metrics: OpMetrics,
}

impl Map {
    pub fn new(id: String, key_expr: Expr) -> Self {
        Self {
            id,
            key_expr,
            metrics: OpMetrics::new(),
        }
    }
}

#[async_trait]
impl Operator for Map {
    fn name(&self) -> &str {
        &self.id
    }

    async fn run(&mut self, mut ctx: OperatorContext) -> anyhow::Result<()> {
        self.metrics.timer_start();
        let num_partitions = ctx.outbound.len().max(1);

        while let Some(msg) = ctx.inbound.recv().await {
            match msg {
                Message::FieldNames(schema) => {
                    for out in &ctx.outbound {
                        out.send(Message::FieldNames(schema.clone())).await.ok();
                    }
                }
                Message::Data(batch) => {
                    self.metrics.record_in(batch.num_rows() as u64);
                    let mut rows_by_partition: Vec<Vec<u32>> = vec![Vec::new(); num_partitions];
                    for row in 0..batch.num_rows() {
                        let key = self.key_expr.eval_row(&batch, row);
                        let p = partition_of(&key, num_partitions);
                        rows_by_partition[p].push(row as u32);
                    }
                    for (p, indices) in rows_by_partition.into_iter().enumerate() {
                        if indices.is_empty() {
                            continue;
                        }
                        let idx_array = UInt32Array::from(indices);
                        let part_batch = take_rows(&batch, &idx_array)?;
                        self.metrics.record_out(part_batch.num_rows() as u64);
                        ctx.outbound[p].send(Message::Data(part_batch)).await.ok();
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
