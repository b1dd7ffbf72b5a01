//! Execution engine for bore: durable store, phased execution state machine,
//! crash recovery, diff actions, and cluster lifecycle.

pub mod artifacts;
pub mod cluster;
pub mod diff_action;
pub mod engine;
pub mod gitignore;
pub mod logging;
pub mod recovery;
pub mod store;

pub use cluster::{ClusterError, ClusterHandle, ClusterPaths};
pub use diff_action::{apply_diff_action, DiffAction};
pub use engine::{EngineError, EventSink, ExecutionEngine, NoopSink};
pub use recovery::recover_interrupted;
pub use store::{SqliteStore, StoreError};
