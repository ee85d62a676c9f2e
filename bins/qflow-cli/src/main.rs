//! # qflow - Query Plan Runner
//!
//! Command-line entry point that loads an [`qflow_core::EngineConfig`] and a
//! declarative plan-spec YAML, wires the named operators from
//! [`qflow_ops::PlanBuilder`] into a [`qflow_core::QueryPlan`], and drives it
//! to completion, printing each operator's metrics on exit.
//!
//! ## Usage
//!
//! ```bash
//! qflow --config engine.yml --plan tpch-q6.yml
//! qflow --config engine.yml --plan tpch-q6.yml --channel-capacity 1024
//! RUST_LOG=debug qflow --config engine.yml --plan tpch-q6.yml
//! ```
//!
//! The plan-spec YAML declares the scans, transforms, joins, and sinks for
//! one query plus the edges between them; the engine config carries the
//! object-store endpoint, bucket, and defaults every node falls back to.

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use qflow_core::{ExecMode, NodeSpec, Operator, OperatorContext, PlanSpec, QueryPlan};
use qflow_ops::PlanBuilder;
use tokio::signal;
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for the qflow plan runner.
#[derive(Parser, Debug)]
#[command(name = "qflow")]
#[command(about = "Push-down query plan runner")]
#[command(long_about = "
qflow executes a query plan defined in a declarative YAML file against a
partitioned object store, pushing projection and selection down to the
store and running the remaining joins, aggregation, and bloom-filter
pruning locally over Arrow record batches.

Examples:
  qflow --config engine.yml --plan tpch-q6.yml
  qflow -c engine.yml -p tpch-q6.yml --channel-capacity 2048
  RUST_LOG=debug qflow --config engine.yml --plan tpch-q6.yml
")]
struct Args {
    /// Path to the engine configuration YAML file.
    #[arg(short, long)]
    #[arg(help = "Engine configuration YAML (object-store endpoint, cache, defaults)")]
    config: PathBuf,

    /// Path to the plan-spec YAML configuration file.
    #[arg(short, long)]
    #[arg(help = "Plan-spec YAML configuration file")]
    plan: PathBuf,

    /// Channel capacity between plan operators, overriding both the engine
    /// config's and the plan's own default.
    #[arg(long)]
    #[arg(help = "Buffer size for operator message channels")]
    channel_capacity: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let config = qflow_core::EngineConfig::load(&args.config)?;
    let plan_spec = PlanSpec::load(&args.plan)?;

    let channel_capacity = args
        .channel_capacity
        .or(plan_spec.channel_capacity)
        .unwrap_or(config.channel_capacity);

    let mut plan = QueryPlan::new(channel_capacity);
    for node in &plan_spec.nodes {
        plan.add_operator(node.id(), ExecMode::Async)?;
    }
    for edge in &plan_spec.edges {
        plan.connect(&edge.from, &edge.to)?;
    }

    let mut builder = PlanBuilder::new(&config, &plan_spec);
    let boot_order = plan.boot_order()?;
    let nodes_by_id: HashMap<&str, &NodeSpec> = plan_spec.node_by_id();

    let collate_ids: Vec<String> = plan_spec
        .nodes
        .iter()
        .filter(|n| matches!(n, NodeSpec::Collate { .. }))
        .map(|n| n.id().to_string())
        .collect();

    let mut operators: HashMap<String, Box<dyn Operator>> = HashMap::new();
    let mut inbound: HashMap<String, mpsc::Receiver<qflow_core::Message>> = HashMap::new();
    let mut outbound: HashMap<String, Vec<mpsc::Sender<qflow_core::Message>>> = HashMap::new();

    for id in &boot_order {
        let node = nodes_by_id
            .get(id.as_str())
            .ok_or_else(|| anyhow::anyhow!("edge references unknown node '{id}'"))?;
        let op = builder.build(node)?;
        let capacity = plan.channel_capacity_for(op.exec_mode());
        let (tx, rx) = mpsc::channel(capacity);
        inbound.insert(id.clone(), rx);
        // Every producer of this node gets a cloned sender into its own
        // outbound vec, in the order its edges were declared, so `Map`'s
        // partition-indexed fan-out lines up with the plan-spec's edges.
        for edge in &plan_spec.edges {
            if &edge.to == id {
                outbound
                    .entry(edge.from.clone())
                    .or_default()
                    .push(tx.clone());
            }
        }
        operators.insert(id.clone(), op);
    }

    let mut collate_result_rx: HashMap<String, tokio::sync::oneshot::Receiver<Vec<qflow_core::Message>>> =
        HashMap::new();
    for id in &collate_ids {
        if let Some(rx) = builder.take_collate_result_rx(id) {
            collate_result_rx.insert(id.clone(), rx);
        }
    }

    let (control_tx, control_rx) = mpsc::channel(1024);
    let mut contexts = HashMap::new();
    for id in &boot_order {
        let ctx = OperatorContext {
            inbound: inbound
                .remove(id)
                .ok_or_else(|| anyhow::anyhow!("operator '{id}' has no inbound channel"))?,
            outbound: outbound.remove(id).unwrap_or_default(),
            control: control_tx.clone(),
            cancel: plan.cancellation_token(),
        };
        contexts.insert(id.clone(), ctx);
    }

    let run = plan.execute(operators, contexts, control_tx, control_rx);
    tokio::pin!(run);

    let metrics = tokio::select! {
        _ = signal::ctrl_c() => {
            tracing::warn!("received Ctrl-C, cancelling running operators");
            plan.stop();
            (&mut run).await
        }
        result = &mut run => result,
    }?;

    let mut names: Vec<&String> = metrics.keys().collect();
    names.sort();
    for name in names {
        let m = &metrics[name];
        println!(
            "{name}: rows_in={} rows_out={} elapsed={:?}",
            m.rows_in,
            m.rows_out,
            m.elapsed_time()
        );
    }

    for id in &collate_ids {
        if let Some(rx) = collate_result_rx.remove(id) {
            match rx.await {
                Ok(messages) => print_collate_result(id, &messages),
                Err(_) => tracing::warn!(node = %id, "collate node never reported a result"),
            }
        }
    }

    Ok(())
}

/// Prints a collate node's buffered rows as a pipe-delimited table: one
/// header line from its `FieldNames` message, then one line per row across
/// every `Data` batch, in receipt order.
fn print_collate_result(id: &str, messages: &[qflow_core::Message]) {
    println!("\n{id}:");
    let mut schema = None;
    for message in messages {
        match message {
            qflow_core::Message::FieldNames(s) => {
                let header: Vec<&str> = s.fields().iter().map(|f| f.name().as_str()).collect();
                println!("{}", header.join("|"));
                schema = Some(s.clone());
            }
            qflow_core::Message::Data(batch) => {
                let Some(schema) = &schema else { continue };
                for row in 0..batch.num_rows() {
                    let values: Vec<String> = (0..schema.fields().len())
                        .map(|col| qflow_core::get_value(batch, col, row).to_string())
                        .collect();
                    println!("{}", values.join("|"));
                }
            }
            _ => {}
        }
    }
}
