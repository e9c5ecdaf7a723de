//! Bridge internals, leaf-first: the remote client, the catalog, the local
//! cache, the background reconciler/evictor and their scheduler, and the
//! `SiaBridge` service that ties them together.

pub mod bridge;
pub mod cache;
pub mod catalog;
pub mod evictor;
pub mod manager;
pub mod reconciler;
pub mod remote;
