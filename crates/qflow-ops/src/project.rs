//! Column projection and computed expressions (§4.3).

use async_trait::async_trait;
use qflow_core::{build_batch, Expr, Message, OpMetrics, Operator, OperatorContext, SchemaRef};
use tracing::debug;

pub struct Project {
    id: String,
    output_schema: SchemaRef,
    exprs: Vec<Expr>,
    metrics: OpMetrics,
}

impl Project {
    pub fn new(id: String, output_schema: SchemaRef, exprs: Vec<Expr>) -> Self {
        Self {
            id,
            output_schema,
            exprs,
            metrics: OpMetrics::new(),
        }
    }
}

#[async_trait]
impl Operator for Project {
    fn name(&self) -> &str {
        &self.id
    }

    async fn run(&mut self, mut ctx: OperatorContext) -> anyhow::Result<()> {
        self.metrics.timer_start();
        for out in &ctx.outbound {
            out.send(Message::FieldNames(self.output_schema.clone()))
                .await
                .ok();
        }

        while let Some(msg) = ctx.inbound.recv().await {
            match msg {
                Message::Data(batch) => {
                    self.metrics.record_in(batch.num_rows() as u64);
                    let mut columns = vec![Vec::with_capacity(batch.num_rows()); self.exprs.len()];
                    for row in 0..batch.num_rows() {
                        for (col, expr) in columns.iter_mut().zip(self.exprs.iter()) {
                            col.push(expr.eval_row(&batch, row));
                        }
                    }
                    let projected = build_batch(self.output_schema.clone(), columns)?;
                    self.metrics.record_out(projected.num_rows() as u64);
                    for out in &ctx.outbound {
                        out.send(Message::Data(projected.clone())).await.ok();
                    }
                }
                Message::Stop => {
                    debug!(operator = %self.id, "received Stop, draining no further input");
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
