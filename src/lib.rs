//! A concurrent, in-memory, ordered key/value engine for
//! monotonically-ordered write workloads: per-thread write buffers are
//! gathered into segments, converted into immutable sorted blocks, and
//! indexed asynchronously by a fanout-based search layer.

pub mod config;
pub mod error;
pub mod tree;

#[cfg(test)]
mod proptests;

pub use config::Config;
pub use error::{Error, Result};
pub use tree::cursor::RangeCursor;
pub use tree::metrics::MetricsSnapshot;
pub use tree::{Key, KvPair, SBTree, Value};
