//! The leaf operator of every plan: pulls rows out of one partition of the
//! object store via push-down select (§4.1).
//!
//! Grounded in `s3filter`'s `SQLTableScan`: field names are announced once,
//! up front, then rows stream as `Data` batches; the operator's own
//! `ScanMetrics` are folded into the generic [`OpMetrics`] it reports back
//! to the scheduler.

use async_trait::async_trait;
use qflow_core::{EngineError, Message, OpMetrics, Operator, OperatorContext};
use qflow_objectstore::client::{SelectClient, SelectRequest};
use std::sync::Arc;
use tracing::{debug, info};

/// Scans one object-store partition, pushing the declared projection and
/// predicate down to the store.
pub struct Scan {
    id: String,
    client: Arc<SelectClient>,
    request: SelectRequest,
    metrics: OpMetrics,
    scan_metrics: qflow_objectstore::ScanMetrics,
}

impl Scan {
    pub fn new(id: String, client: Arc<SelectClient>, request: SelectRequest) -> Self {
        Self {
            id,
            client,
            request,
            metrics: OpMetrics::new(),
            scan_metrics: qflow_objectstore::ScanMetrics::new(),
        }
    }

    pub fn scan_metrics(&self) -> &qflow_objectstore::ScanMetrics {
        &self.scan_metrics
    }
}

#[async_trait]
impl Operator for Scan {
    fn name(&self) -> &str {
        &self.id
    }

    async fn run(&mut self, ctx: OperatorContext) -> anyhow::Result<()> {
        self.metrics.timer_start();
        info!(operator = %self.id, object_key = %self.request.object_key, "scan starting");

        for out in &ctx.outbound {
            out.send(Message::FieldNames(self.request.schema.clone()))
                .await
                .ok();
        }

        // The HTTP fetch runs in its own task so it can keep sending into
        // `tx` while this task concurrently drains `rx` and fans each
        // batch out to every consumer; running both in one task would
        // deadlock once `tx`'s buffer fills.
        let (tx, mut rx) = tokio::sync::mpsc::channel(64);
        let client = self.client.clone();
        let request = self.request.clone();
        let fetch = tokio::spawn(async move { client.select_into(&request, &tx).await });

        let mut rows_forwarded = 0u64;
        loop {
            tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => {
                    debug!(operator = %self.id, "scan cancelled, stopping early");
                    break;
                }
                msg = rx.recv() => {
                    match msg {
                        Some(Message::Data(batch)) => {
                            rows_forwarded += batch.num_rows() as u64;
                            self.metrics.record_out(batch.num_rows() as u64);
                            for out in &ctx.outbound {
                                if out.send(Message::Data(batch.clone())).await.is_err() {
                                    break;
                                }
                            }
                        }
                        Some(_) => {}
                        None => break,
                    }
                }
            }
        }
        match fetch.await {
            Ok(Ok(scan_metrics)) => self.scan_metrics = scan_metrics,
            Ok(Err(e)) => {
                self.metrics.timer_stop();
                ctx.control
                    .send(qflow_core::ControlMessage::Complete {
                        operator: self.id.clone(),
                        error: Some(EngineError::Transport {
                            object_key: self.request.object_key.clone(),
                            source: e,
                        }),
                        metrics: self.metrics.clone(),
                    })
                    .await
                    .ok();
                return Ok(());
            }
            Err(join_err) => return Err(join_err.into()),
        }

        self.metrics.timer_stop();
        info!(operator = %self.id, rows = rows_forwarded, "scan finished");

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
