use async_trait::async_trait;
use havg_types::{Duration, Result};

use crate::types::{
    Compare, LeaseId, PrefixResponse, Revision, TxnOp, TxnResponse, WatchStream,
};

/// The coordination store seam.
///
/// Implementations must provide linearizable transactions and deliver watch
/// events in revision order. All methods are cancel-safe: callers bound them
/// with timeouts and may drop the future at any suspension point.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Read every key-value pair under `prefix` at one consistent revision.
    ///
    /// With `at == None` the latest revision is read. Reading a revision the
    /// store has already compacted fails with `KvCode::COMPACTED`.
    async fn get_prefix(&self, prefix: &str, at: Option<Revision>) -> Result<PrefixResponse>;

    /// Atomic multi-key compare-and-swap.
    ///
    /// If every predicate in `compares` holds, all of `then_ops` apply;
    /// otherwise all of `else_ops` apply. Never a mix. The response reports
    /// which branch ran and the commit revision.
    async fn txn(
        &self,
        compares: Vec<Compare>,
        then_ops: Vec<TxnOp>,
        else_ops: Vec<TxnOp>,
    ) -> Result<TxnResponse>;

    /// Subscribe to every change under `prefix` strictly after revision
    /// `from`, in revision order, batched per committed transaction.
    async fn watch_prefix(&self, prefix: &str, from: Revision) -> Result<WatchStream>;

    /// Create a lease with the given time-to-live. Keys put with the lease
    /// are deleted by the store when it expires.
    async fn lease_grant(&self, ttl: Duration) -> Result<LeaseId>;

    /// Refresh a lease. Fails with `KvCode::LEASE_EXPIRED` once the lease is
    /// gone; the holder must rejoin rather than retry.
    async fn lease_keep_alive(&self, lease: LeaseId) -> Result<()>;

    /// Drop a lease, deleting its keys immediately.
    async fn lease_revoke(&self, lease: LeaseId) -> Result<()>;
}
