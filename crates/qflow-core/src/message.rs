//! The message bus.
//!
//! The source system routed every message type through one queue owned by
//! the scheduler. Per the re-architectural translation in SPEC_FULL §9, that
//! becomes two Rust channel types: [`Message`] flows on each operator's own
//! bounded inbound channel (`Data`, `FieldNames`, `Start`, `Stop`, `Eval`),
//! while [`ControlMessage`] flows on the single plan-wide control channel
//! the scheduler listens on (`Complete`, `Evaluated`).

use crate::{Batch, EngineError, OpMetrics, SchemaRef};

/// A message delivered to an operator's inbound queue.
#[derive(Debug, Clone)]
pub enum Message {
    /// The schema announcement that must precede any `Data` message on a
    /// stream (§3 invariant: "a consumer never sees rows before the
    /// schema").
    FieldNames(SchemaRef),

    /// A batch of rows sharing the previously announced schema.
    Data(Batch),

    /// Told to an `inline` operator by its producer, or to a root operator
    /// by the scheduler, to begin pulling/emitting.
    Start,

    /// Broadcast by the plan on teardown. An async worker receiving this
    /// drains no further input and exits (§5 cancellation).
    Stop,

    /// A scheduler round-trip request for some operator-local value (e.g.
    /// `"self.op_metrics"` or a top-K threshold). The operator answers with
    /// a matching [`ControlMessage::Evaluated`] on the control channel.
    Eval(EvalRequest),
}

/// What the scheduler is asking for in an [`Message::Eval`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvalRequest {
    /// Mirrors the original's `EvalMessage("self.op_metrics")`.
    Metrics,
    /// The current top-K threshold, for `TopKFilterBuild` (§4.9).
    Threshold,
}

/// The value an operator answers an [`EvalRequest`] with.
#[derive(Debug, Clone)]
pub enum EvalValue {
    Metrics(crate::OpMetrics),
    Threshold(Option<f64>),
}

/// A message delivered to the plan's central control channel.
#[derive(Debug)]
pub enum ControlMessage {
    /// Emitted by an operator exactly once, after all of its output has
    /// been sent to every consumer. Carries the first fatal error the
    /// operator encountered, if any (§7 propagation), and the operator's
    /// final metrics so the scheduler can collect them without reaching
    /// back into a task it has already handed off to `tokio::spawn`.
    Complete {
        operator: String,
        error: Option<EngineError>,
        metrics: OpMetrics,
    },

    /// The operator's answer to a previously sent `Eval` request.
    Evaluated { operator: String, value: EvalValue },
}
