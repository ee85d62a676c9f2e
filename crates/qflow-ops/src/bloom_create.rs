//! Builds a bloom filter over a join's build-side keys and hands it to
//! `ScanBloomUse` once the build side reaches end-of-stream (§4.8).
//!
//! Wired as a tee off the same input `HashJoinBuild` consumes (via
//! `qflow_core::many_to_many`): both operators observe every build-side row,
//! one materializes the hash index, the other only the key's membership
//! filter. Sizing a bloom filter needs the element count up front, so keys
//! are buffered for one pass rather than inserted as they arrive.

use async_trait::async_trait;
use qflow_core::{BloomFilter, Expr, Message, OpMetrics, Operator, OperatorContext};
use tokio::sync::oneshot;
use tracing::info;

pub struct BloomCreate {
    id: String,
    key_expr: Expr,
    false_positive_rate: f64,
    bloom_tx: Option<oneshot::Sender<BloomFilter>>,
    metrics: OpMetrics,
}

impl BloomCreate {
    pub fn new(
        id: String,
        key_expr: Expr,
        false_positive_rate: f64,
        bloom_tx: oneshot::Sender<BloomFilter>,
    ) -> Self {
        Self {
            id,
            key_expr,
            false_positive_rate,
            bloom_tx: Some(bloom_tx),
            metrics: OpMetrics::new(),
        }
    }
}

#[async_trait]
impl Operator for BloomCreate {
    fn name(&self) -> &str {
        &self.id
    }

    async fn run(&mut self, mut ctx: OperatorContext) -> anyhow::Result<()> {
        self.metrics.timer_start();
        let mut keys: Vec<qflow_core::ScalarValue> = Vec::new();

        while let Some(msg) = ctx.inbound.recv().await {
            match msg {
                Message::Data(batch) => {
                    self.metrics.record_in(batch.num_rows() as u64);
                    for row in 0..batch.num_rows() {
                        let key = self.key_expr.eval_row(&batch, row);
                        if !key.is_null() {
                            keys.push(key);
                        }
                    }
                }
                Message::Stop => break,
                _ => {}
            }
        }

        let bloom = if keys.is_empty() {
            BloomFilter::empty()
        } else {
            let mut f = BloomFilter::new(keys.len(), self.false_positive_rate);
            for key in &keys {
                f.insert(&key.hash_bytes());
                f.insert_sample(key);
            }
            f
        };
        info!(operator = %self.id, distinct_keys = keys.len(), "bloom filter built");

        if let Some(tx) = self.bloom_tx.take() {
            let _ = tx.send(bloom);
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

    #[tokio::test]
    async fn built_filter_contains_every_observed_key() {
        let schema = Arc::new(Schema::new(vec![Field::new("k", DataType::Int64, false)]));
        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![Arc::new(Int64Array::from(vec![1, 2, 3]))],
        )
        .unwrap();

        let (bloom_tx, bloom_rx) = oneshot::channel();
        let mut op = BloomCreate::new("bloom".into(), Expr::Column(0), 0.01, bloom_tx);

        let (in_tx, inbound) = tokio::sync::mpsc::channel(4);
        let (control_tx, mut control_rx) = tokio::sync::mpsc::channel(4);

        in_tx.send(Message::Data(batch)).await.unwrap();
        drop(in_tx);

        op.run(OperatorContext {
            inbound,
            outbound: vec![],
            control: control_tx,
            cancel: CancellationToken::new(),
        })
        .await
        .unwrap();
        control_rx.recv().await;

        let bloom = bloom_rx.await.unwrap();
        assert!(bloom.contains(&qflow_core::ScalarValue::Int64(2).hash_bytes()));
        assert!(!bloom.contains(&qflow_core::ScalarValue::Int64(999).hash_bytes()));
    }
}
