//! Timeout-bounded view of the coordination store.
//!
//! Every store call the cluster core makes goes through here so a
//! partitioned store cannot stall a caller past the configured budget.

use std::future::Future;
use std::sync::Arc;

use havg_kv::{
    Compare, KeyValue, KvStore, LeaseId, PrefixResponse, Revision, TxnOp, TxnResponse,
    WatchStream,
};
use havg_types::{Duration, KvCode, Result, Status};

#[derive(Clone)]
pub struct KvGateway {
    store: Arc<dyn KvStore>,
    op_timeout: std::time::Duration,
}

impl KvGateway {
    pub fn new(store: Arc<dyn KvStore>, op_timeout: Duration) -> Self {
        Self {
            store,
            op_timeout: op_timeout.into(),
        }
    }

    pub fn store(&self) -> Arc<dyn KvStore> {
        Arc::clone(&self.store)
    }

    async fn bounded<T>(&self, what: &str, fut: impl Future<Output = Result<T>>) -> Result<T> {
        match tokio::time::timeout(self.op_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(Status::with_message(
                KvCode::TIMEOUT,
                format!("{} exceeded {:?}", what, self.op_timeout),
            )),
        }
    }

    pub async fn get_prefix(&self, prefix: &str, at: Option<Revision>) -> Result<PrefixResponse> {
        self.bounded("get_prefix", self.store.get_prefix(prefix, at))
            .await
    }

    /// Read one exact key. A prefix read would also match longer keys, so
    /// the response is filtered down to the requested key.
    pub async fn get_key(
        &self,
        key: &str,
        at: Option<Revision>,
    ) -> Result<(Option<KeyValue>, Revision)> {
        let resp = self.get_prefix(key, at).await?;
        let kv = resp.kvs.into_iter().find(|kv| kv.key == key);
        Ok((kv, resp.revision))
    }

    pub async fn txn(
        &self,
        compares: Vec<Compare>,
        then_ops: Vec<TxnOp>,
        else_ops: Vec<TxnOp>,
    ) -> Result<TxnResponse> {
        self.bounded("txn", self.store.txn(compares, then_ops, else_ops))
            .await
    }

    pub async fn watch_prefix(&self, prefix: &str, from: Revision) -> Result<WatchStream> {
        self.bounded("watch_prefix", self.store.watch_prefix(prefix, from))
            .await
    }

    pub async fn lease_grant(&self, ttl: Duration) -> Result<LeaseId> {
        self.bounded("lease_grant", self.store.lease_grant(ttl)).await
    }

    pub async fn lease_keep_alive(&self, lease: LeaseId) -> Result<()> {
        self.bounded("lease_keep_alive", self.store.lease_keep_alive(lease))
            .await
    }

    pub async fn lease_revoke(&self, lease: LeaseId) -> Result<()> {
        self.bounded("lease_revoke", self.store.lease_revoke(lease))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use havg_kv_backends::MemKvStore;

    fn gateway() -> (MemKvStore, KvGateway) {
        let store = MemKvStore::new();
        let gw = KvGateway::new(Arc::new(store.clone()), Duration::from_secs(2));
        (store, gw)
    }

    #[tokio::test]
    async fn test_get_key_exact_match_only() {
        let (_, gw) = gateway();
        gw.txn(
            vec![],
            vec![
                TxnOp::put("VGSTATE:a", "INITIAL"),
                TxnOp::put("VGSTATE:ab", "ONLINE"),
            ],
            vec![],
        )
        .await
        .unwrap();

        let (kv, _) = gw.get_key("VGSTATE:a", None).await.unwrap();
        assert_eq!(kv.unwrap().value, "INITIAL");

        let (kv, _) = gw.get_key("VGSTATE:missing", None).await.unwrap();
        assert!(kv.is_none());
    }

    #[tokio::test]
    async fn test_txn_passthrough() {
        let (store, gw) = gateway();
        let resp = gw
            .txn(vec![], vec![TxnOp::put("k", "v")], vec![])
            .await
            .unwrap();
        assert!(resp.succeeded);
        assert_eq!(store.current_revision(), resp.revision);
    }
}
