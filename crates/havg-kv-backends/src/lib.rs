//! Coordination store backends.
//!
//! Provides concrete implementations of the [`havg_kv::KvStore`] trait:
//!
//! - **mem** -- In-memory revisioned store with watches and leases
//!   (always available; every integration test runs against it).
//! - **etcd** -- etcd backend (feature-gated behind `"etcd"`).

pub mod mem;

#[cfg(feature = "etcd")]
pub mod etcd;

// Re-export the primary in-memory store for convenience.
pub use mem::MemKvStore;

#[cfg(feature = "etcd")]
pub use etcd::EtcdStore;
