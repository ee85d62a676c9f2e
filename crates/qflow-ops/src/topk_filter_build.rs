//! Maintains the running top-K threshold over a scored column as rows
//! stream past, and answers `Eval(Threshold)` requests with the current
//! value (§4.9).
//!
//! Grounded in the original's `retrieve_sampling_threshold`: rows are never
//! filtered here (that happens at the scan, which pushes the threshold down
//! as a predicate once one is available) — this operator only observes and
//! forwards, so a single streaming pass through the build side is all a
//! `LIMIT k ORDER BY ...` query needs before the scan can start skipping
//! rows it already knows can't make the cut.

use async_trait::async_trait;
use qflow_core::{ControlMessage, Direction, Expr, Message, OpMetrics, Operator, OperatorContext,
    TopKThreshold};
use qflow_core::{EvalRequest, EvalValue};

pub struct TopKFilterBuild {
    id: String,
    score_expr: Expr,
    topk: TopKThreshold,
    metrics: OpMetrics,
}

impl TopKFilterBuild {
    pub fn new(id: String, k: usize, direction: Direction, score_expr: Expr) -> Self {
        Self {
            id,
            score_expr,
            topk: TopKThreshold::new(k, direction),
            metrics: OpMetrics::new(),
        }
    }
}

#[async_trait]
impl Operator for TopKFilterBuild {
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
                    for row in 0..batch.num_rows() {
                        if let Some(v) = self.score_expr.eval_row(&batch, row).as_f64() {
                            self.topk.observe(v);
                        }
                    }
                    self.metrics.record_out(batch.num_rows() as u64);
                    for out in &ctx.outbound {
                        out.send(Message::Data(batch.clone())).await.ok();
                    }
                }
                Message::Eval(request) => {
                    if let Some(value) = self.eval(&request) {
                        ctx.control
                            .send(ControlMessage::Evaluated {
                                operator: self.id.clone(),
                                value,
                            })
                            .await
                            .ok();
                    }
                }
                Message::Stop => break,
                Message::Start => {}
            }
        }

        self.metrics.timer_stop();
        ctx.control
            .send(ControlMessage::Complete {
                operator: self.id.clone(),
                error: None,
                metrics: self.metrics.clone(),
            })
            .await
            .ok();
        Ok(())
    }

    fn eval(&self, request: &EvalRequest) -> Option<EvalValue> {
        match request {
            EvalRequest::Metrics => Some(EvalValue::Metrics(self.metrics())),
            EvalRequest::Threshold => Some(EvalValue::Threshold(self.topk.threshold())),
        }
    }

    fn metrics(&self) -> OpMetrics {
        self.metrics.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow_array::{Float64Array, RecordBatch};
    use arrow_schema::{DataType, Field, Schema};
    use qflow_core::ScalarValue;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn threshold_available_after_k_rows_and_rows_pass_through_unfiltered() {
        let schema = Arc::new(Schema::new(vec![Field::new("score", DataType::Float64, false)]));
        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![Arc::new(Float64Array::from(vec![5.0, 1.0, 9.0, 2.0, 7.0]))],
        )
        .unwrap();

        let mut op = TopKFilterBuild::new(
            "topk".into(),
            3,
            Direction::Largest,
            Expr::Column(0),
        );

        let (in_tx, inbound) = tokio::sync::mpsc::channel(4);
        let (out_tx, mut out_rx) = tokio::sync::mpsc::channel(4);
        let (control_tx, mut control_rx) = tokio::sync::mpsc::channel(4);

        in_tx.send(Message::Data(batch)).await.unwrap();
        in_tx.send(Message::Eval(EvalRequest::Threshold)).await.unwrap();
        drop(in_tx);

        let ctx = OperatorContext {
            inbound,
            outbound: vec![out_tx],
            control: control_tx,
            cancel: CancellationToken::new(),
        };
        op.run(ctx).await.unwrap();

        let Message::Data(forwarded) = out_rx.recv().await.unwrap() else {
            panic!("expected Data");
        };
        assert_eq!(forwarded.num_rows(), 5);

        let ControlMessage::Evaluated { value, .. } = control_rx.recv().await.unwrap() else {
            panic!("expected Evaluated");
        };
        assert_eq!(ScalarValue::Float64(5.0), match value {
            EvalValue::Threshold(Some(v)) => ScalarValue::Float64(v),
            _ => panic!("expected Threshold"),
        });
    }
}
