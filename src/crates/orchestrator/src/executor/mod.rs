//! Task Execution Module
//!
//! This module runs planned tasks against capability clients: per-call
//! timeouts, bounded retry with backoff, at-most-one committed success per
//! task, concurrent fan-out and the response cache.

pub mod dispatcher;
pub mod ledger;
pub mod retry;

pub use dispatcher::{
    CacheConfig, DispatchConfig, DispatchReport, Dispatcher, TaskCompletion, TaskFailure,
    TaskResult, DEPENDENCIES_KEY,
};
pub use ledger::AttemptLedger;
pub use retry::{
    classify_capability_error, classify_error, retry_store_write, ErrorClass, RetryConfig,
    StoreWrite,
};
