//! The plan's sink: buffers every message that reaches it in receipt order
//! and hands the buffered rows back to the plan owner once the stream ends
//! (§4.10). Any `ORDER BY`/`LIMIT` a query needs lives upstream of this
//! operator (`TopKFilterBuild`'s threshold exchange, §4.9); `Collate` itself
//! does no reordering — it's a fan-in, not a sort stage.

use async_trait::async_trait;
use qflow_core::{Message, OpMetrics, Operator, OperatorContext};
use tokio::sync::oneshot;

pub struct Collate {
    id: String,
    buffered: Vec<Message>,
    result_tx: Option<oneshot::Sender<Vec<Message>>>,
    metrics: OpMetrics,
}

impl Collate {
    /// `result_tx` hands the final buffered messages back across the
    /// ownership boundary the scheduler's `tokio::spawn` puts between the
    /// running operator and the plan owner, the same way a bloom filter or
    /// a join's build side travels from one operator to another.
    pub fn new(id: String, result_tx: oneshot::Sender<Vec<Message>>) -> Self {
        Self {
            id,
            buffered: Vec::new(),
            result_tx: Some(result_tx),
            metrics: OpMetrics::new(),
        }
    }

    /// Every message buffered in receipt order: the field-name announcement
    /// first, then each data batch as it arrived.
    pub fn rows(&self) -> &[Message] {
        &self.buffered
    }
}

#[async_trait]
impl Operator for Collate {
    fn name(&self) -> &str {
        &self.id
    }

    async fn run(&mut self, mut ctx: OperatorContext) -> anyhow::Result<()> {
        self.metrics.timer_start();

        while let Some(msg) = ctx.inbound.recv().await {
            match msg {
                Message::FieldNames(schema) => {
                    self.buffered.push(Message::FieldNames(schema.clone()));
                    for out in &ctx.outbound {
                        out.send(Message::FieldNames(schema.clone())).await.ok();
                    }
                }
                Message::Data(batch) => {
                    self.metrics.record_in(batch.num_rows() as u64);
                    self.metrics.record_out(batch.num_rows() as u64);
                    self.buffered.push(Message::Data(batch.clone()));
                    for out in &ctx.outbound {
                        out.send(Message::Data(batch.clone())).await.ok();
                    }
                }
                Message::Stop => break,
                _ => {}
            }
        }

        if let Some(tx) = self.result_tx.take() {
            let _ = tx.send(self.buffered.clone());
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
    async fn buffers_field_names_then_data_in_receipt_order() {
        let schema = Arc::new(Schema::new(vec![Field::new("v", DataType::Int64, false)]));
        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![Arc::new(Int64Array::from(vec![3, 1, 4]))],
        )
        .unwrap();

        let (result_tx, result_rx) = oneshot::channel();
        let mut op = Collate::new("collate".into(), result_tx);

        let (in_tx, inbound) = tokio::sync::mpsc::channel(4);
        let (out_tx, mut out_rx) = tokio::sync::mpsc::channel(4);
        let (control_tx, _control_rx) = tokio::sync::mpsc::channel(4);

        in_tx.send(Message::FieldNames(schema.clone())).await.unwrap();
        in_tx.send(Message::Data(batch)).await.unwrap();
        drop(in_tx);

        op.run(OperatorContext {
            inbound,
            outbound: vec![out_tx],
            control: control_tx,
            cancel: CancellationToken::new(),
        })
        .await
        .unwrap();

        assert_eq!(op.rows().len(), 2);
        assert!(matches!(op.rows()[0], Message::FieldNames(_)));
        let Message::Data(buffered) = &op.rows()[1] else {
            panic!("expected Data");
        };
        assert_eq!(buffered.num_rows(), 3);

        let delivered = result_rx.await.unwrap();
        assert_eq!(delivered.len(), 2);

        let _ = out_rx.recv().await.unwrap(); // FieldNames forwarded
        let Message::Data(forwarded) = out_rx.recv().await.unwrap() else {
            panic!("expected Data");
        };
        assert_eq!(forwarded.num_rows(), 3);
    }
}
