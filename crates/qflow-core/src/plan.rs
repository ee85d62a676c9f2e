//! The `Operator` trait and the `QueryPlan` scheduler (§5).
//!
//! Grounded in `s3filter`'s `query_plan.py`: operators are registered into
//! a DAG, booted in reverse-topological order (sinks first, so no producer
//! can send into a channel whose consumer task hasn't started yet), and run
//! to completion by an event loop that collects one `Complete` per operator
//! off a shared control channel. `Eval`/`Evaluated` round trips (used by
//! `ScanBloomUse` to fetch a bloom filter and by push-down scans to fetch a
//! top-K threshold) are generalized the same way here.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    BatchRx, BatchTx, ControlMessage, ControlRx, ControlTx, EvalRequest, EvalValue, OpMetrics,
};

/// Whether an operator is driven by its own async worker task or runs
/// "inline" with its producer (§5 "Execution modes"). Both execute through
/// the same [`Operator::run`] signature; the distinction is expressed at
/// wiring time by the inbound channel's capacity (see
/// [`QueryPlan::channel_capacity_for`]) rather than by a different call
/// path, which keeps one uniform operator contract instead of two.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecMode {
    /// A bounded channel of capacity 1: the producer's send blocks until
    /// this operator has consumed the previous batch, closely
    /// approximating a direct synchronous call without a separate
    /// operator contract.
    Inline,
    /// A channel sized to the plan's configured `channel_capacity`,
    /// buffering ahead of the consumer.
    Async,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorState {
    Pending,
    Running,
    Completed,
}

/// Everything an operator's `run` needs to pull input, push output, report
/// completion, and notice a shutdown request.
pub struct OperatorContext {
    pub inbound: BatchRx,
    pub outbound: Vec<BatchTx>,
    pub control: ControlTx,
    pub cancel: CancellationToken,
}

/// A physical operator: a `Scan`, `Filter`, `HashJoinBuild`, `Aggregate`,
/// ... (the concrete implementations live in `qflow-ops` and
/// `qflow-objectstore`).
#[async_trait]
pub trait Operator: Send {
    fn name(&self) -> &str;

    fn exec_mode(&self) -> ExecMode {
        ExecMode::Async
    }

    /// Drives the operator to completion. Implementations are responsible
    /// for announcing their output schema with `Message::FieldNames`
    /// before the first `Message::Data`, forwarding batches to every
    /// sender in `ctx.outbound`, observing `ctx.cancel` for early
    /// shutdown, and reporting exactly one [`ControlMessage::Complete`] on
    /// `ctx.control` when finished (§3, §5, §7).
    async fn run(&mut self, ctx: OperatorContext) -> anyhow::Result<()>;

    /// Answers a scheduler [`EvalRequest`]. The default only knows how to
    /// report metrics; operators carrying extra evaluable state (a top-K
    /// threshold, a completed bloom filter) override this.
    fn eval(&self, request: &EvalRequest) -> Option<EvalValue> {
        match request {
            EvalRequest::Metrics => Some(EvalValue::Metrics(self.metrics())),
            EvalRequest::Threshold => None,
        }
    }

    fn metrics(&self) -> OpMetrics;
}

/// Owns the operator DAG's topology (for boot ordering and diagnostics) and
/// drives execution to completion. Actual channel wiring between operators
/// is done by the plan loader via [`crate::connectors`] before `execute` is
/// called; this type only tracks names, edges, and exec modes.
pub struct QueryPlan {
    graph: DiGraph<String, ()>,
    nodes: HashMap<String, NodeIndex>,
    exec_modes: HashMap<String, ExecMode>,
    channel_capacity: usize,
    cancel: CancellationToken,
}

impl QueryPlan {
    pub fn new(channel_capacity: usize) -> Self {
        Self {
            graph: DiGraph::new(),
            nodes: HashMap::new(),
            exec_modes: HashMap::new(),
            channel_capacity: channel_capacity.max(1),
            cancel: CancellationToken::new(),
        }
    }

    /// Registers an operator's name and exec mode with the plan. Returns a
    /// [`crate::EngineError::Plan`] if the name is already registered.
    pub fn add_operator(&mut self, name: &str, exec_mode: ExecMode) -> crate::Result<()> {
        if self.nodes.contains_key(name) {
            return Err(crate::EngineError::Plan(format!(
                "operator '{name}' registered twice"
            )));
        }
        let idx = self.graph.add_node(name.to_string());
        self.nodes.insert(name.to_string(), idx);
        self.exec_modes.insert(name.to_string(), exec_mode);
        Ok(())
    }

    /// Records a producer -> consumer data edge for topology bookkeeping.
    pub fn connect(&mut self, producer: &str, consumer: &str) -> crate::Result<()> {
        let p = *self
            .nodes
            .get(producer)
            .ok_or_else(|| crate::EngineError::Plan(format!("unknown operator '{producer}'")))?;
        let c = *self
            .nodes
            .get(consumer)
            .ok_or_else(|| crate::EngineError::Plan(format!("unknown operator '{consumer}'")))?;
        self.graph.add_edge(p, c, ());
        Ok(())
    }

    /// The channel capacity a newly wired inbound queue for `exec_mode`
    /// should use.
    pub fn channel_capacity_for(&self, exec_mode: ExecMode) -> usize {
        match exec_mode {
            ExecMode::Inline => 1,
            ExecMode::Async => self.channel_capacity,
        }
    }

    pub fn exec_mode_of(&self, name: &str) -> Option<ExecMode> {
        self.exec_modes.get(name).copied()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Sink-first boot order: reverse of a topological sort of the
    /// producer -> consumer DAG, so every consumer's task is already
    /// listening before its producer's first send (mirrors the original's
    /// `_boot_operators`, which starts workers in reverse-topological
    /// order for the same reason).
    pub fn boot_order(&self) -> crate::Result<Vec<String>> {
        let mut order = toposort(&self.graph, None)
            .map_err(|cycle| {
                crate::EngineError::Plan(format!(
                    "operator graph has a cycle at node {:?}",
                    cycle.node_id()
                ))
            })?
            .into_iter()
            .map(|idx| self.graph[idx].clone())
            .collect::<Vec<_>>();
        order.reverse();
        Ok(order)
    }

    /// Spawns every operator's `run` in boot order, then drives an event
    /// loop off the shared control channel until every registered operator
    /// has reported `Complete` (§5's completion-detection loop). Returns
    /// the first fatal error seen, after giving every still-running
    /// operator a chance to drain via the cancellation token.
    pub async fn execute(
        &self,
        mut operators: HashMap<String, Box<dyn Operator>>,
        mut contexts: HashMap<String, OperatorContext>,
        control_tx: ControlTx,
        mut control_rx: ControlRx,
    ) -> anyhow::Result<HashMap<String, OpMetrics>> {
        let boot_order = self.boot_order()?;
        let mut pending: HashSet<String> = self.nodes.keys().cloned().collect();
        let mut handles = Vec::with_capacity(boot_order.len());

        for name in &boot_order {
            let mut op = operators
                .remove(name)
                .ok_or_else(|| crate::EngineError::Plan(format!("operator '{name}' has no implementation")))?;
            let ctx = contexts
                .remove(name)
                .ok_or_else(|| crate::EngineError::Plan(format!("operator '{name}' was never wired")))?;
            let control = control_tx.clone();
            let op_name = name.clone();
            debug!(operator = %op_name, "booting operator");
            handles.push(tokio::spawn(async move {
                if let Err(e) = op.run(ctx).await {
                    error!(operator = %op_name, error = %e, "operator task exited with an error");
                    let _ = control
                        .send(ControlMessage::Complete {
                            operator: op_name,
                            error: Some(crate::EngineError::Shutdown(e.to_string())),
                            metrics: OpMetrics::new(),
                        })
                        .await;
                }
            }));
        }

        let mut metrics = HashMap::new();
        let mut first_error: Option<anyhow::Error> = None;

        while !pending.is_empty() {
            match control_rx.recv().await {
                Some(ControlMessage::Complete {
                    operator,
                    error,
                    metrics: m,
                }) => {
                    if !pending.remove(&operator) {
                        warn!(operator = %operator, "received Complete for an operator not pending (duplicate or unknown)");
                        continue;
                    }
                    info!(operator = %operator, rows_out = m.rows_out, "operator completed");
                    metrics.insert(operator.clone(), m);
                    if let Some(err) = error {
                        if first_error.is_none() {
                            error!(operator = %operator, error = %err, "fatal error, cancelling remaining operators");
                            self.cancel.cancel();
                            first_error = Some(err.into());
                        }
                    }
                }
                Some(ControlMessage::Evaluated { operator, .. }) => {
                    warn!(operator = %operator, "stray Evaluated message with no pending Eval request");
                }
                None => {
                    return Err(crate::EngineError::Plan(
                        "control channel closed before every operator reported Complete".into(),
                    )
                    .into());
                }
            }
        }

        for handle in handles {
            handle.await.ok();
        }

        if let Some(err) = first_error {
            return Err(err);
        }
        Ok(metrics)
    }

    /// Cancels every running operator; each operator's `run` is expected to
    /// observe `ctx.cancel` and stop pulling further input, finishing with
    /// whatever output it had already produced (§5 graceful shutdown).
    pub fn stop(&self) {
        self.cancel.cancel();
    }
}
