//! # qflow-core
//!
//! Core traits, types, and abstractions for the qflow push-down query engine.
//!
//! This crate defines the message-driven execution substrate that every
//! physical operator (in `qflow-ops`) and the object-store client (in
//! `qflow-objectstore`) is built on:
//!
//! - **Message bus**: the typed messages that flow over bounded channels
//!   between operators, plus the control channel operators use to report
//!   completion and answer `Eval` requests from the scheduler.
//! - **Operator runtime**: the `Operator` trait every physical operator
//!   implements, and the lifecycle state machine (`pending` → `running` →
//!   `completed`) the scheduler drives it through.
//! - **Connectors**: the four graph-construction primitives (`one_to_one`,
//!   `many_to_many`, `many_to_one`, `all_to_all`) used to wire operators
//!   together.
//! - **Query plan / scheduler**: owns the operator set, launches workers,
//!   drives execution to completion, and aggregates metrics.
//! - **Scalar values and expressions**: the row/column value model and the
//!   predicate/projection expression tree shared by `Project` and `Filter`.
//! - **Bloom filter** and **top-K threshold**: the two side-channel utilities
//!   used by the join and scan operators.

pub mod bloom;
pub mod config;
pub mod connectors;
pub mod expr;
pub mod message;
pub mod metrics;
pub mod plan;
pub mod scalar;
pub mod schema;
pub mod topk;

pub use bloom::BloomFilter;
pub use config::{
    build_expr, build_schema, AggFuncSpec, AggSpecYaml, BinaryOpSpec, DataTypeSpec, DirectionSpec,
    EdgeSpec, EngineConfig, ExprSpec, FieldSpec, JoinTypeSpec, LiteralSpec, NodeSpec, PlanSpec,
};
pub use connectors::{all_to_all, many_to_many, many_to_one, one_to_one, partition_of};
pub use expr::{BinaryOp, Expr, ExprError};
pub use message::{ControlMessage, EvalRequest, EvalValue, Message};
pub use metrics::OpMetrics;
pub use plan::{ExecMode, Operator, OperatorContext, OperatorState, QueryPlan};
pub use scalar::{build_batch, get_value, ScalarValue};
pub use schema::{column_index, concat_schemas};
pub use topk::{Direction, TopKThreshold};

use thiserror::Error;

/// Type alias for the Arrow record batch carried in [`Message::Data`].
pub type Batch = arrow_array::RecordBatch;

/// Type alias for an Arrow schema reference.
pub type SchemaRef = arrow_schema::SchemaRef;

/// Sender half of an operator's inbound data channel.
pub type BatchTx = tokio::sync::mpsc::Sender<Message>;
/// Receiver half of an operator's inbound data channel.
pub type BatchRx = tokio::sync::mpsc::Receiver<Message>;
/// Sender half of the plan-wide control channel.
pub type ControlTx = tokio::sync::mpsc::Sender<ControlMessage>;
/// Receiver half of the plan-wide control channel.
pub type ControlRx = tokio::sync::mpsc::Receiver<ControlMessage>;

/// The six error kinds from the engine's error-handling design.
///
/// Transport, schema, and aggregate errors are fatal for the operator that
/// raises them: the operator's `Complete` carries the error and the plan
/// fails fast. Predicate errors are local (the offending row is dropped and
/// the error logged once). Plan errors are raised at construction time,
/// before `execute()`. Shutdown errors mean a worker exited without ever
/// emitting `Complete`.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("transport error scanning '{object_key}': {source}")]
    Transport {
        object_key: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("schema error in operator '{operator}': {detail}")]
    Schema { operator: String, detail: String },

    #[error("predicate error in operator '{operator}': {source}")]
    Predicate {
        operator: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("aggregate error in operator '{operator}': {detail}")]
    Aggregate { operator: String, detail: String },

    #[error("plan construction error: {0}")]
    Plan(String),

    #[error("operator '{0}' shut down before emitting Complete")]
    Shutdown(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;
