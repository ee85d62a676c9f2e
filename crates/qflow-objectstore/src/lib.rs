//! # qflow-objectstore
//!
//! The push-down "select" client: talks to the remote object store's query
//! endpoint over HTTP, decodes the filtered/projected rows it streams back,
//! and accounts for the bytes and time spent doing so (§6).
//!
//! The heavy lifting of relational execution (joins, aggregation, bloom
//! pruning) lives in `qflow-ops`; this crate's only job is getting rows out
//! of the object store as cheaply as the store's own push-down lets it, and
//! reporting honestly what that cost.

pub mod cache;
pub mod client;
pub mod csv_decode;
pub mod metrics;
pub mod parquet_decode;

pub use cache::ObjectCache;
pub use client::{SelectClient, SelectRequest};
pub use metrics::ScanMetrics;
