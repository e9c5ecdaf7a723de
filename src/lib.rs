//! Buckets and objects on a slow, eventually-durable remote storage network,
//! served immediately from a local write-through cache.
//!
//! [`services::bridge::SiaBridge`] is the entry point. It keeps object
//! metadata in SQLite, stages and serves bytes from a cache directory, submits
//! uploads to the remote network, and runs a periodic pass that promotes
//! confirmed uploads to durable and evicts stale cached copies.

pub mod config;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;

pub use config::BridgeConfig;
pub use errors::{BridgeError, BridgeResult};
pub use models::{bucket::BucketInfo, object::ObjectInfo};
pub use services::bridge::SiaBridge;
