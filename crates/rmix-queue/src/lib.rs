//! Job record store for rmix.
//!
//! This crate provides:
//! - The [`JobStore`] interface used by submitters and workers
//! - A durable Redis Streams backend with retry and retention
//! - An in-process backend for single-process runs

pub mod error;
pub mod memory;
pub mod redis_store;
pub mod store;

pub use error::{QueueError, QueueResult};
pub use memory::MemoryJobStore;
pub use redis_store::{retry_delay, RedisJobStore, RedisStoreConfig, Retention};
pub use store::{connect_store, consumer_name, BackendKind, ClaimedJob, FailureDisposition, JobStore};
