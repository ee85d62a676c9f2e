//! A `Scan` that rewrites its push-down predicate from a bloom filter built
//! by the join's build side before scanning starts, then locally prunes any
//! surviving false positives after decode (§4.8).
//!
//! A tiny probe set becomes a precise `AND <key_column> IN (...)` predicate;
//! past `BloomFilter`'s sample cap it instead attaches the filter's raw bits
//! as an opaque side predicate the store can apply itself. Either way fewer
//! bytes come back over the wire than an unfiltered scan would transfer. An
//! empty filter (the build side had zero rows) short-circuits the scan
//! entirely: no request is issued, only `FieldNames` + `Complete`. The
//! filter arrives over a one-shot handoff from `BloomCreate`/`HashJoinBuild`,
//! mirroring the original's `Eval`/`Evaluated` round trip for fetching a
//! sibling operator's derived state generalized here to a direct channel,
//! since the bloom filter is produced exactly once per plan.

use arrow_array::BooleanArray;
use async_trait::async_trait;
use qflow_core::{get_value, schema::column_index, BloomFilter, EngineError, Message, OpMetrics, Operator, OperatorContext};
use qflow_objectstore::client::{SelectClient, SelectRequest};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, info};

/// A bloom filter's probe set folded into one predicate clause, phrased in
/// the object store's own dialect, or `None` if nothing survived filtering
/// that the request's existing predicate didn't already express.
fn bloom_predicate(bloom: &BloomFilter, key_column: &str) -> Option<String> {
    if let Some(keys) = bloom.sample_keys() {
        let literals: Vec<String> = keys.iter().filter_map(|k| k.to_sql_literal()).collect();
        if literals.is_empty() {
            return None;
        }
        return Some(format!("{key_column} IN ({})", literals.join(", ")));
    }
    Some(format!(
        "bloom_match({key_column}, '{}', {}, {})",
        bloom.bits_hex(),
        bloom.num_hashes(),
        bloom.num_bits()
    ))
}

fn fold_predicate(request: &mut SelectRequest, extra: &str) {
    request.predicate_sql = Some(match request.predicate_sql.take() {
        Some(existing) => format!("({existing}) AND ({extra})"),
        None => extra.to_string(),
    });
}

pub struct ScanBloomUse {
    id: String,
    client: Arc<SelectClient>,
    request: SelectRequest,
    join_key_column: String,
    bloom_rx: Option<oneshot::Receiver<BloomFilter>>,
    metrics: OpMetrics,
}

impl ScanBloomUse {
    pub fn new(
        id: String,
        client: Arc<SelectClient>,
        request: SelectRequest,
        join_key_column: String,
        bloom_rx: oneshot::Receiver<BloomFilter>,
    ) -> Self {
        Self {
            id,
            client,
            request,
            join_key_column,
            bloom_rx: Some(bloom_rx),
            metrics: OpMetrics::new(),
        }
    }
}

#[async_trait]
impl Operator for ScanBloomUse {
    fn name(&self) -> &str {
        &self.id
    }

    async fn run(&mut self, ctx: OperatorContext) -> anyhow::Result<()> {
        self.metrics.timer_start();

        let bloom = match self.bloom_rx.take() {
            Some(rx) => rx.await.unwrap_or_else(|_| BloomFilter::empty()),
            None => BloomFilter::empty(),
        };

        for out in &ctx.outbound {
            out.send(Message::FieldNames(self.request.schema.clone()))
                .await
                .ok();
        }

        if bloom.is_empty() {
            debug!(operator = %self.id, "build side produced no rows, scan short-circuits");
            self.metrics.timer_stop();
            ctx.control
                .send(qflow_core::ControlMessage::Complete {
                    operator: self.id.clone(),
                    error: None,
                    metrics: self.metrics.clone(),
                })
                .await
                .ok();
            return Ok(());
        }

        let key_col = match column_index(&self.request.schema, &self.join_key_column) {
            Some(col) => col,
            None => {
                self.metrics.timer_stop();
                ctx.control
                    .send(qflow_core::ControlMessage::Complete {
                        operator: self.id.clone(),
                        error: Some(EngineError::Schema {
                            operator: self.id.clone(),
                            detail: format!(
                                "join key column '{}' not found in scan schema",
                                self.join_key_column
                            ),
                        }),
                        metrics: self.metrics.clone(),
                    })
                    .await
                    .ok();
                return Ok(());
            }
        };

        let mut request = self.request.clone();
        if let Some(predicate) = bloom_predicate(&bloom, &self.join_key_column) {
            fold_predicate(&mut request, &predicate);
        }
        info!(operator = %self.id, cardinality = bloom.cardinality(), exact = bloom.sample_keys().is_some(), "bloom predicate folded into scan request");

        let (tx, mut rx) = tokio::sync::mpsc::channel(64);
        let client = self.client.clone();
        let fetch_request = request.clone();
        let fetch = tokio::spawn(async move { client.select_into(&fetch_request, &tx).await });

        let mut rows_in = 0u64;
        let mut rows_out = 0u64;
        loop {
            tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => break,
                msg = rx.recv() => {
                    match msg {
                        Some(Message::Data(batch)) => {
                            rows_in += batch.num_rows() as u64;
                            let pruned = prune(&batch, key_col, &bloom)?;
                            rows_out += pruned.num_rows() as u64;
                            if pruned.num_rows() > 0 {
                                for out in &ctx.outbound {
                                    out.send(Message::Data(pruned.clone())).await.ok();
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
            Ok(Ok(_scan_metrics)) => {}
            Ok(Err(e)) => {
                self.metrics.timer_stop();
                ctx.control
                    .send(qflow_core::ControlMessage::Complete {
                        operator: self.id.clone(),
                        error: Some(EngineError::Transport {
                            object_key: request.object_key.clone(),
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

        self.metrics.record_in(rows_in);
        self.metrics.record_out(rows_out);
        self.metrics.timer_stop();
        info!(operator = %self.id, rows_in, rows_out, "bloom-pruned scan finished");

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

fn prune(
    batch: &arrow_array::RecordBatch,
    key_col: usize,
    bloom: &BloomFilter,
) -> anyhow::Result<arrow_array::RecordBatch> {
    if bloom.is_empty() {
        return Ok(arrow_array::RecordBatch::new_empty(batch.schema()));
    }
    let mask: BooleanArray = (0..batch.num_rows())
        .map(|row| {
            let value = get_value(batch, key_col, row);
            Some(!value.is_null() && bloom.contains(&value.hash_bytes()))
        })
        .collect();
    Ok(arrow_select::filter::filter_record_batch(batch, &mask)?)
}
