//! Row selection by predicate (§4.2). SQL three-valued logic is handled by
//! [`qflow_core::Expr::eval_predicate`]: a `NULL` predicate result drops
//! the row rather than raising an error.

use arrow_array::BooleanArray;
use async_trait::async_trait;
use qflow_core::{EngineError, Expr, Message, OpMetrics, Operator, OperatorContext};
use tracing::debug;

pub struct Filter {
    id: String,
    predicate: Expr,
    metrics: OpMetrics,
}

impl Filter {
    pub fn new(id: String, predicate: Expr) -> Self {
        Self {
            id,
            predicate,
            metrics: OpMetrics::new(),
        }
    }
}

#[async_trait]
impl Operator for Filter {
    fn name(&self) -> &str {
        &self.id
    }

    async fn run(&mut self, mut ctx: OperatorContext) -> anyhow::Result<()> {
        self.metrics.timer_start();

        while let Some(msg) = ctx.inbound.recv().await {
            match msg {
                Message::FieldNames(schema) => {
                    for out in &ctx.outbound {
                        out.send(Message::FieldNames(schema.clone())).await.ok();
                    }
                }
                Message::Data(batch) => {
                    self.metrics.record_in(batch.num_rows() as u64);
                    let mask: BooleanArray = (0..batch.num_rows())
                        .map(|row| Some(self.predicate.eval_predicate(&batch, row)))
                        .collect();
                    let filtered = match arrow_select::filter::filter_record_batch(&batch, &mask) {
                        Ok(filtered) => filtered,
                        Err(e) => {
                            self.metrics.timer_stop();
                            ctx.control
                                .send(qflow_core::ControlMessage::Complete {
                                    operator: self.id.clone(),
                                    error: Some(EngineError::Predicate {
                                        operator: self.id.clone(),
                                        source: e.into(),
                                    }),
                                    metrics: self.metrics.clone(),
                                })
                                .await
                                .ok();
                            return Ok(());
                        }
                    };
                    self.metrics.record_out(filtered.num_rows() as u64);
                    if filtered.num_rows() > 0 {
                        for out in &ctx.outbound {
                            out.send(Message::Data(filtered.clone())).await.ok();
                        }
                    }
                }
                Message::Stop => {
                    debug!(operator = %self.id, "received Stop");
                    break;
                }
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
    use qflow_core::{BinaryOp, ScalarValue};
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn drops_rows_failing_predicate() {
        let schema = Arc::new(Schema::new(vec![Field::new("a", DataType::Int64, false)]));
        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![Arc::new(Int64Array::from(vec![1, 5, 10]))],
        )
        .unwrap();

        let predicate = Expr::BinaryOp {
            left: Box::new(Expr::Column(0)),
            op: BinaryOp::GtEq,
            right: Box::new(Expr::Literal(ScalarValue::Int64(5))),
        };
        let mut op = Filter::new("f1".into(), predicate);

        let (in_tx, inbound) = tokio::sync::mpsc::channel(4);
        let (out_tx, mut out_rx) = tokio::sync::mpsc::channel(4);
        let (control_tx, mut control_rx) = tokio::sync::mpsc::channel(4);

        in_tx.send(Message::Data(batch)).await.unwrap();
        drop(in_tx);

        let ctx = OperatorContext {
            inbound,
            outbound: vec![out_tx],
            control: control_tx,
            cancel: CancellationToken::new(),
        };
        op.run(ctx).await.unwrap();

        let Message::Data(result) = out_rx.recv().await.unwrap() else {
            panic!("expected a Data message");
        };
        assert_eq!(result.num_rows(), 2);

        let qflow_core::ControlMessage::Complete { metrics, .. } = control_rx.recv().await.unwrap() else {
            panic!("expected Complete");
        };
        assert_eq!(metrics.rows_in, 3);
        assert_eq!(metrics.rows_out, 2);
    }
}
