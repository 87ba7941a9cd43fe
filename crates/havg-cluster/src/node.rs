//! Node lifecycle: join/rejoin, heartbeat publishing, liveness detection
//! and CAS-guarded state transitions.
//!
//! ```text
//! STARTING --heartbeat-confirmed--> ONLINE
//! ONLINE --admin/self--> OFFLINING --all-local-vgs-offline--> OFFLINE
//! ONLINE --lease-expiry-observed-by-peer--> DEAD
//! OFFLINING --lease-expiry--> DEAD
//! DEAD --rejoin--> STARTING
//! ```

use std::collections::BTreeMap;

use tokio::sync::watch;
use tracing::{debug, warn};

use havg_kv::{Compare, CompareOp, LeaseId, Revision, TxnOp};
use havg_types::{make_error_msg, NodeCode, Result, UtcTime};

use crate::config::ClusterConfig;
use crate::gateway::KvGateway;
use crate::keyspace::{
    decode_node_records, encode_hb, node_hb_key, node_name_key, node_state_key, NODE_PREFIX,
};
use crate::state::{NodeRecord, NodeState};

/// Outcome of one liveness pass over the node records at a revision.
#[derive(Debug, Default)]
pub struct LivenessReport {
    /// Nodes whose heartbeat went stale since the last pass; candidates for
    /// a DEAD transition. Full records so the CAS can be guarded on the
    /// observed state and heartbeat version.
    pub newly_dead: Vec<NodeRecord>,
    /// Hosts currently ONLINE with a fresh heartbeat.
    pub online: Vec<String>,
    /// Hosts already marked DEAD.
    pub already_dead: Vec<String>,
    pub revision: Revision,
}

/// Why the heartbeat loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatExit {
    /// Clean shutdown was requested.
    Shutdown,
    /// Too many consecutive store failures; the node must stop serving
    /// without touching its addresses.
    Fenced,
}

pub struct NodeRegistry {
    gw: KvGateway,
    cfg: ClusterConfig,
}

impl NodeRegistry {
    pub fn new(gw: KvGateway, cfg: ClusterConfig) -> Self {
        Self { gw, cfg }
    }

    fn host(&self) -> &str {
        &self.cfg.host_name
    }

    /// Register this node: grant a lease and write the membership keys in
    /// one transaction predicated on the slot being free (never joined) or
    /// reclaimable (DEAD, or cleanly OFFLINE).
    ///
    /// The heartbeat key rides the lease so it disappears on its own when
    /// the node stops refreshing; the state key survives, keeping dead
    /// nodes visible to the rest of the cluster.
    pub async fn join(&self) -> Result<LeaseId> {
        let host = self.host();
        let lease = self.gw.lease_grant(self.cfg.lease_ttl()).await?;

        let puts = vec![
            TxnOp::put(node_name_key(host), host),
            TxnOp::put(node_state_key(host), NodeState::Starting.as_str()),
            TxnOp::put_with_lease(node_hb_key(host), encode_hb(UtcTime::now()), lease),
        ];
        let state_key = node_state_key(host);
        let preconditions = [
            Compare::version(&state_key, CompareOp::Equal, 0),
            Compare::value(&state_key, CompareOp::Equal, NodeState::Dead.as_str()),
            Compare::value(&state_key, CompareOp::Equal, NodeState::Offline.as_str()),
        ];
        for cmp in preconditions {
            let resp = self.gw.txn(vec![cmp], puts.clone(), vec![]).await?;
            if resp.succeeded {
                debug!(host, revision = resp.revision, "joined cluster");
                return Ok(lease);
            }
        }

        let _ = self.gw.lease_revoke(lease).await;
        make_error_msg(
            NodeCode::ALREADY_JOINED,
            format!("node {} is already registered and not DEAD or OFFLINE", host),
        )
    }

    /// Refresh the lease and rewrite the heartbeat key.
    pub async fn publish_heartbeat(&self, lease: LeaseId) -> Result<()> {
        self.gw.lease_keep_alive(lease).await?;
        self.gw
            .txn(
                vec![],
                vec![TxnOp::put_with_lease(
                    node_hb_key(self.host()),
                    encode_hb(UtcTime::now()),
                    lease,
                )],
                vec![],
            )
            .await?;
        Ok(())
    }

    /// STARTING -> ONLINE, once the first heartbeat has been accepted.
    pub async fn confirm_online(&self) -> Result<Revision> {
        self.transition(self.host(), NodeState::Starting, NodeState::Online)
            .await
    }

    /// CAS-guarded state change. Fails with `NodeCode::INVALID_TRANSITION`
    /// when the node is no longer in `from`; never retried here.
    pub async fn transition(
        &self,
        host: &str,
        from: NodeState,
        to: NodeState,
    ) -> Result<Revision> {
        let state_key = node_state_key(host);
        let resp = self
            .gw
            .txn(
                vec![Compare::value(&state_key, CompareOp::Equal, from.as_str())],
                vec![TxnOp::put(&state_key, to.as_str())],
                vec![],
            )
            .await?;
        if resp.succeeded {
            debug!(host, %from, %to, revision = resp.revision, "node transition");
            Ok(resp.revision)
        } else {
            make_error_msg(
                NodeCode::INVALID_TRANSITION,
                format!("{} is not {}", host, from),
            )
        }
    }

    /// Transition an observed node to DEAD, guarded on both the state we
    /// saw and the heartbeat key's write version so a concurrent refresh
    /// defeats a stale verdict. Returns whether this caller won.
    pub async fn mark_dead(&self, observed: &NodeRecord) -> Result<bool> {
        let resp = self
            .gw
            .txn(
                vec![
                    Compare::value(
                        node_state_key(&observed.host),
                        CompareOp::Equal,
                        observed.state.as_str(),
                    ),
                    Compare::version(
                        node_hb_key(&observed.host),
                        CompareOp::Equal,
                        observed.hb_version,
                    ),
                ],
                vec![TxnOp::put(
                    node_state_key(&observed.host),
                    NodeState::Dead.as_str(),
                )],
                vec![],
            )
            .await?;
        Ok(resp.succeeded)
    }

    /// Decode every node record at one revision.
    pub async fn list(
        &self,
        at: Option<Revision>,
    ) -> Result<(BTreeMap<String, NodeRecord>, Revision)> {
        let resp = self.gw.get_prefix(NODE_PREFIX, at).await?;
        Ok((decode_node_records(&resp.kvs), resp.revision))
    }

    /// Classify every node by liveness at `at` (or the latest revision).
    ///
    /// A node with no heartbeat key reads as the epoch, which is always
    /// past the dead threshold. This node never declares itself dead.
    pub async fn detect_dead(&self, at: Option<Revision>) -> Result<LivenessReport> {
        let (nodes, revision) = self.list(at).await?;
        let now = UtcTime::now();
        let threshold = self.cfg.dead_threshold();

        let mut report = LivenessReport {
            revision,
            ..Default::default()
        };
        for (host, rec) in nodes {
            match rec.state {
                NodeState::Dead => report.already_dead.push(host),
                NodeState::Offline => {}
                NodeState::Starting | NodeState::Online | NodeState::Offlining => {
                    let stale = now.since(rec.hb) > threshold;
                    if stale && host != self.host() {
                        report.newly_dead.push(rec);
                    } else if rec.state == NodeState::Online {
                        report.online.push(host);
                    }
                }
            }
        }
        Ok(report)
    }

    /// The periodic heartbeat task: refresh our lease and heartbeat key,
    /// then sweep for peers whose heartbeat went stale.
    ///
    /// After `max_heartbeat_misses` consecutive failures (or a lost lease)
    /// the node concludes it is partitioned and fences itself: the caller
    /// must stop serving without running down scripts, leaving the
    /// survivors to fail our volume groups over.
    pub async fn heartbeat_loop(
        &self,
        lease: LeaseId,
        mut shutdown: watch::Receiver<bool>,
    ) -> HeartbeatExit {
        let period: std::time::Duration = self.cfg.heartbeat_interval().into();
        let mut tick = tokio::time::interval(period);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut misses = 0u32;

        loop {
            tokio::select! {
                _ = shutdown.changed() => return HeartbeatExit::Shutdown,
                _ = tick.tick() => {
                    match self.publish_heartbeat(lease).await {
                        Ok(()) => {
                            misses = 0;
                            self.liveness_pass().await;
                        }
                        Err(err) => {
                            misses += 1;
                            warn!(
                                host = self.host(),
                                misses,
                                error = %err,
                                "heartbeat publish failed"
                            );
                            if err.code() == havg_types::KvCode::LEASE_EXPIRED
                                || misses >= self.cfg.max_heartbeat_misses
                            {
                                return HeartbeatExit::Fenced;
                            }
                        }
                    }
                }
            }
        }
    }

    async fn liveness_pass(&self) {
        let report = match self.detect_dead(None).await {
            Ok(report) => report,
            Err(err) => {
                debug!(error = %err, "liveness pass skipped");
                return;
            }
        };
        for rec in &report.newly_dead {
            match self.mark_dead(rec).await {
                Ok(true) => warn!(host = %rec.host, "marked node DEAD"),
                Ok(false) => debug!(host = %rec.host, "lost DEAD race or node revived"),
                Err(err) => warn!(host = %rec.host, error = %err, "mark_dead failed"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use havg_kv::KvStore;
    use havg_kv_backends::MemKvStore;
    use havg_types::Duration;

    fn fast_config(host: &str) -> ClusterConfig {
        let mut cfg = ClusterConfig::new(host);
        cfg.heartbeat_interval_ms = 50;
        // Wide threshold so a slow scheduler cannot expire the test lease
        // between a snapshot and its CAS.
        cfg.dead_multiple = 40;
        cfg.op_timeout_ms = 2_000;
        cfg
    }

    fn registry(store: &MemKvStore, host: &str) -> NodeRegistry {
        let cfg = fast_config(host);
        let gw = KvGateway::new(Arc::new(store.clone()), cfg.op_timeout());
        NodeRegistry::new(gw, cfg)
    }

    async fn state_of(store: &MemKvStore, host: &str) -> String {
        let resp = store.get_prefix(&node_state_key(host), None).await.unwrap();
        resp.kvs[0].value.clone()
    }

    #[tokio::test]
    async fn test_join_writes_membership_keys() {
        let store = MemKvStore::new();
        let reg = registry(&store, "h1");

        reg.join().await.unwrap();
        assert_eq!(state_of(&store, "h1").await, "STARTING");

        let (nodes, _) = reg.list(None).await.unwrap();
        let rec = &nodes["h1"];
        assert_eq!(rec.state, NodeState::Starting);
        assert!(rec.hb_version > 0);
    }

    #[tokio::test]
    async fn test_join_twice_rejected() {
        let store = MemKvStore::new();
        let reg = registry(&store, "h1");
        reg.join().await.unwrap();

        let err = reg.join().await.unwrap_err();
        assert_eq!(err.code(), NodeCode::ALREADY_JOINED);
    }

    #[tokio::test]
    async fn test_rejoin_after_dead() {
        let store = MemKvStore::new();
        let reg = registry(&store, "h1");
        reg.join().await.unwrap();
        reg.confirm_online().await.unwrap();

        // A peer fences us.
        let (nodes, _) = reg.list(None).await.unwrap();
        let reg2 = registry(&store, "h2");
        assert!(reg2.mark_dead(&nodes["h1"]).await.unwrap());
        assert_eq!(state_of(&store, "h1").await, "DEAD");

        // Rejoin restarts the lifecycle.
        reg.join().await.unwrap();
        assert_eq!(state_of(&store, "h1").await, "STARTING");
    }

    #[tokio::test]
    async fn test_confirm_online_and_invalid_transition() {
        let store = MemKvStore::new();
        let reg = registry(&store, "h1");
        reg.join().await.unwrap();

        reg.confirm_online().await.unwrap();
        assert_eq!(state_of(&store, "h1").await, "ONLINE");

        // Not STARTING any more.
        let err = reg.confirm_online().await.unwrap_err();
        assert_eq!(err.code(), NodeCode::INVALID_TRANSITION);
    }

    #[tokio::test]
    async fn test_detect_dead_flags_stale_heartbeat() {
        let store = MemKvStore::new();
        let reg = registry(&store, "h1");
        reg.join().await.unwrap();
        reg.confirm_online().await.unwrap();

        // Plant a peer whose heartbeat is ancient.
        store
            .txn(
                vec![],
                vec![
                    TxnOp::put(node_name_key("h2"), "h2"),
                    TxnOp::put(node_state_key("h2"), "ONLINE"),
                    TxnOp::put(node_hb_key("h2"), "1000"),
                ],
                vec![],
            )
            .await
            .unwrap();

        let report = reg.detect_dead(None).await.unwrap();
        assert_eq!(report.online, vec!["h1".to_string()]);
        assert_eq!(report.newly_dead.len(), 1);
        assert_eq!(report.newly_dead[0].host, "h2");
    }

    #[tokio::test]
    async fn test_detect_dead_missing_hb_key() {
        let store = MemKvStore::new();
        let reg = registry(&store, "h1");
        reg.join().await.unwrap();
        reg.confirm_online().await.unwrap();

        // State but no heartbeat key: lease already expired.
        store
            .txn(
                vec![],
                vec![
                    TxnOp::put(node_name_key("h3"), "h3"),
                    TxnOp::put(node_state_key("h3"), "ONLINE"),
                ],
                vec![],
            )
            .await
            .unwrap();

        let report = reg.detect_dead(None).await.unwrap();
        assert_eq!(report.newly_dead.len(), 1);
        assert_eq!(report.newly_dead[0].hb_version, 0);
    }

    #[tokio::test]
    async fn test_mark_dead_loses_to_concurrent_refresh() {
        let store = MemKvStore::new();
        let reg = registry(&store, "observer");

        store
            .txn(
                vec![],
                vec![
                    TxnOp::put(node_name_key("h2"), "h2"),
                    TxnOp::put(node_state_key("h2"), "ONLINE"),
                    TxnOp::put(node_hb_key("h2"), "1000"),
                ],
                vec![],
            )
            .await
            .unwrap();
        let (nodes, _) = reg.list(None).await.unwrap();
        let observed = nodes["h2"].clone();

        // h2 refreshes its heartbeat after our snapshot: version bumps.
        store
            .txn(
                vec![],
                vec![TxnOp::put(node_hb_key("h2"), "2000")],
                vec![],
            )
            .await
            .unwrap();

        assert!(!reg.mark_dead(&observed).await.unwrap());
        assert_eq!(state_of(&store, "h2").await, "ONLINE");
    }

    #[tokio::test]
    async fn test_heartbeat_loop_shutdown_and_fence() {
        let store = MemKvStore::new();
        let reg = Arc::new(registry(&store, "h1"));
        let lease = reg.join().await.unwrap();

        // Clean shutdown path.
        let (tx, rx) = watch::channel(false);
        let r = Arc::clone(&reg);
        let task = tokio::spawn(async move { r.heartbeat_loop(lease, rx).await });
        tokio::time::sleep(std::time::Duration::from_millis(120)).await;
        tx.send(true).unwrap();
        assert_eq!(task.await.unwrap(), HeartbeatExit::Shutdown);

        // Revoking the lease fences the loop on its next publish.
        store.lease_revoke(lease).await.unwrap();
        let (_tx, rx) = watch::channel(false);
        let r = Arc::clone(&reg);
        let task = tokio::spawn(async move { r.heartbeat_loop(lease, rx).await });
        assert_eq!(task.await.unwrap(), HeartbeatExit::Fenced);
    }
}
