//! Volume group registry: CRUD plus the CAS-guarded state transitions.
//!
//! Every transition is one transaction combining value compares on the
//! STATE key (and NODE where relevant) with puts on the keys it changes.
//! A failed predicate surfaces as a typed error and is never retried here;
//! the watcher redelivers the current state and the caller decides.

use std::collections::BTreeMap;
use std::net::Ipv4Addr;

use tracing::debug;

use havg_kv::{Compare, CompareOp, Revision, TxnOp};
use havg_types::{make_error_msg, Result, StatusCode, VgCode};

use crate::gateway::KvGateway;
use crate::keyspace::{
    decode_vg_records, encode_bool, node_state_key, vg_autofailover_key, vg_enabled_key,
    vg_ipaddr_key, vg_keys, vg_name_key, vg_netmask_key, vg_nic_key, vg_node_key, vg_state_key,
    vg_volumelist_key, VG_PREFIX,
};
use crate::state::{NodeState, VgRecord, VgState};

#[derive(Clone)]
pub struct VgRegistry {
    gw: KvGateway,
}

impl VgRegistry {
    pub fn new(gw: KvGateway) -> Self {
        Self { gw }
    }

    /// Create a volume group in INITIAL with no owner.
    ///
    /// The transaction requires all nine keys to be absent, so a concurrent
    /// duplicate add commits exactly once. The address-uniqueness check
    /// runs against the latest snapshot before the transaction.
    pub async fn add(
        &self,
        name: &str,
        ip_addr: &str,
        netmask: &str,
        nic: &str,
        auto_failover: bool,
        enabled: bool,
    ) -> Result<()> {
        if name.is_empty() {
            return make_error_msg(StatusCode::INVALID_ARG, "vg name must not be empty");
        }
        if ip_addr.parse::<Ipv4Addr>().is_err() {
            return make_error_msg(
                StatusCode::INVALID_ARG,
                format!("{:?} is not a dotted-quad address", ip_addr),
            );
        }
        if netmask.parse::<Ipv4Addr>().is_err() {
            return make_error_msg(
                StatusCode::INVALID_ARG,
                format!("{:?} is not a dotted-quad netmask", netmask),
            );
        }
        if nic.is_empty() {
            return make_error_msg(StatusCode::INVALID_ARG, "nic must not be empty");
        }

        // No two groups may carry the same address.
        let (records, _) = self.list(None).await?;
        if let Some(other) = records.values().find(|r| r.ip_addr == ip_addr) {
            return make_error_msg(
                VgCode::ADDRESS_IN_USE,
                format!("{} already carries {}", other.name, ip_addr),
            );
        }

        let compares = vg_keys(name)
            .iter()
            .map(|key| Compare::version(key, CompareOp::Equal, 0))
            .collect();
        let puts = vec![
            TxnOp::put(vg_name_key(name), name),
            TxnOp::put(vg_state_key(name), VgState::Initial.as_str()),
            TxnOp::put(vg_node_key(name), ""),
            TxnOp::put(vg_ipaddr_key(name), ip_addr),
            TxnOp::put(vg_netmask_key(name), netmask),
            TxnOp::put(vg_nic_key(name), nic),
            TxnOp::put(vg_autofailover_key(name), encode_bool(auto_failover)),
            TxnOp::put(vg_enabled_key(name), encode_bool(enabled)),
            TxnOp::put(vg_volumelist_key(name), ""),
        ];
        let resp = self.gw.txn(compares, puts, vec![]).await?;
        if resp.succeeded {
            debug!(vg = name, revision = resp.revision, "vg created");
            Ok(())
        } else {
            make_error_msg(VgCode::ALREADY_EXISTS, format!("vg {} already exists", name))
        }
    }

    /// Delete a volume group. Rejected while the group is ONLINING or
    /// ONLINE; the transaction re-checks both conditions so a racing start
    /// cannot slip past the pre-check.
    pub async fn remove(&self, name: &str) -> Result<()> {
        match self.get(name, None).await? {
            None => {
                return make_error_msg(VgCode::NOT_FOUND, format!("vg {} does not exist", name))
            }
            Some(rec) if matches!(rec.state, VgState::Onlining | VgState::Online) => {
                return make_error_msg(
                    VgCode::BUSY,
                    format!("vg {} is ONLINING or ONLINE", name),
                );
            }
            Some(_) => {}
        }

        let state_key = vg_state_key(name);
        let mut compares: Vec<Compare> = vg_keys(name)
            .iter()
            .map(|key| Compare::version(key, CompareOp::NotEqual, 0))
            .collect();
        compares.push(Compare::value(
            &state_key,
            CompareOp::NotEqual,
            VgState::Online.as_str(),
        ));
        compares.push(Compare::value(
            &state_key,
            CompareOp::NotEqual,
            VgState::Onlining.as_str(),
        ));
        let deletes = vg_keys(name).iter().map(TxnOp::delete).collect();

        let resp = self.gw.txn(compares, deletes, vec![]).await?;
        if resp.succeeded {
            debug!(vg = name, revision = resp.revision, "vg removed");
            Ok(())
        } else {
            make_error_msg(
                VgCode::PRECONDITION_FAILED,
                format!("vg {} changed while being removed", name),
            )
        }
    }

    /// Administrative FAILED marker. Idempotent: marking an already-FAILED
    /// group succeeds without a write.
    pub async fn mark_failed(&self, name: &str) -> Result<()> {
        match self.set_failed(name).await {
            Ok(_) => Ok(()),
            Err(err) if err.code() == VgCode::PRECONDITION_FAILED => {
                match self.get(name, None).await? {
                    None => make_error_msg(
                        VgCode::NOT_FOUND,
                        format!("vg {} does not exist", name),
                    ),
                    Some(rec) if rec.state == VgState::Failed => Ok(()),
                    Some(rec) => make_error_msg(
                        VgCode::INVALID_TRANSITION,
                        format!("vg {} is {}, not ONLINING", name, rec.state),
                    ),
                }
            }
            Err(err) => Err(err),
        }
    }

    /// INITIAL|OFFLINE -> ONLINING, installing `host` as the owner.
    ///
    /// Racing placers are serialized by the store: after the first commit
    /// neither predicate can hold, so the losers fail cleanly. The host
    /// must itself be ONLINE at the commit revision.
    pub async fn set_onlining(&self, host: &str, name: &str) -> Result<Revision> {
        let state_key = vg_state_key(name);
        let node_key = vg_node_key(name);
        let puts = vec![
            TxnOp::put(&state_key, VgState::Onlining.as_str()),
            TxnOp::put(&node_key, host),
        ];

        for from in [VgState::Initial, VgState::Offline] {
            let resp = self
                .gw
                .txn(
                    vec![
                        Compare::value(&state_key, CompareOp::Equal, from.as_str()),
                        Compare::value(&node_key, CompareOp::Equal, ""),
                        Compare::value(
                            node_state_key(host),
                            CompareOp::Equal,
                            NodeState::Online.as_str(),
                        ),
                    ],
                    puts.clone(),
                    vec![],
                )
                .await?;
            if resp.succeeded {
                debug!(vg = name, host, revision = resp.revision, "vg onlining");
                return Ok(resp.revision);
            }
        }
        make_error_msg(
            VgCode::PRECONDITION_FAILED,
            format!(
                "vg {} is no longer startable on {} (taken, or host not ONLINE)",
                name, host
            ),
        )
    }

    /// ONLINING -> ONLINE. The owner reports a successful up script.
    pub async fn set_online(&self, name: &str) -> Result<Revision> {
        self.transition_state(name, &[VgState::Onlining], VgState::Online, &[])
            .await
    }

    /// ONLINING|ONLINE -> OFFLINING. Requested by an administrator or by
    /// the owner draining itself.
    pub async fn set_offlining(&self, name: &str) -> Result<Revision> {
        self.transition_state(
            name,
            &[VgState::Online, VgState::Onlining],
            VgState::Offlining,
            &[],
        )
        .await
    }

    /// OFFLINING|ONLINE -> OFFLINE, clearing the owner. ONLINE is accepted
    /// for the failover path, where no graceful OFFLINING ever happened.
    pub async fn set_offline(&self, name: &str) -> Result<Revision> {
        self.transition_state(
            name,
            &[VgState::Offlining, VgState::Online],
            VgState::Offline,
            &[TxnOp::put(vg_node_key(name), "")],
        )
        .await
    }

    /// ONLINING -> FAILED, keeping the owner for the post-mortem.
    pub async fn set_failed(&self, name: &str) -> Result<Revision> {
        self.transition_state(name, &[VgState::Onlining], VgState::Failed, &[])
            .await
    }

    /// Force a dead node's group OFFLINE. Predicated on the node still
    /// being DEAD and the group still being owned by it in an active state,
    /// so concurrent rescuers commit exactly once.
    pub async fn force_offline_from_dead(&self, name: &str, dead_host: &str) -> Result<bool> {
        let state_key = vg_state_key(name);
        let resp = self
            .gw
            .txn(
                vec![
                    Compare::value(vg_node_key(name), CompareOp::Equal, dead_host),
                    Compare::value(
                        node_state_key(dead_host),
                        CompareOp::Equal,
                        NodeState::Dead.as_str(),
                    ),
                    Compare::value(&state_key, CompareOp::NotEqual, VgState::Offline.as_str()),
                    Compare::value(&state_key, CompareOp::NotEqual, VgState::Initial.as_str()),
                    Compare::value(&state_key, CompareOp::NotEqual, VgState::Failed.as_str()),
                ],
                vec![
                    TxnOp::put(&state_key, VgState::Offline.as_str()),
                    TxnOp::put(vg_node_key(name), ""),
                ],
                vec![],
            )
            .await?;
        Ok(resp.succeeded)
    }

    /// Flip the ENABLED flag. The group must exist.
    pub async fn set_enabled(&self, name: &str, enabled: bool) -> Result<()> {
        let resp = self
            .gw
            .txn(
                vec![Compare::version(vg_enabled_key(name), CompareOp::NotEqual, 0)],
                vec![TxnOp::put(vg_enabled_key(name), encode_bool(enabled))],
                vec![],
            )
            .await?;
        if resp.succeeded {
            Ok(())
        } else {
            make_error_msg(VgCode::NOT_FOUND, format!("vg {} does not exist", name))
        }
    }

    /// Decode one volume group at `at` (or the latest revision).
    pub async fn get(&self, name: &str, at: Option<Revision>) -> Result<Option<VgRecord>> {
        let (records, _) = self.list(at).await?;
        Ok(records.get(name).cloned())
    }

    /// Decode every volume group at one revision.
    pub async fn list(
        &self,
        at: Option<Revision>,
    ) -> Result<(BTreeMap<String, VgRecord>, Revision)> {
        let resp = self.gw.get_prefix(VG_PREFIX, at).await?;
        Ok((decode_vg_records(&resp.kvs), resp.revision))
    }

    async fn transition_state(
        &self,
        name: &str,
        from: &[VgState],
        to: VgState,
        extra_puts: &[TxnOp],
    ) -> Result<Revision> {
        let state_key = vg_state_key(name);
        let mut puts = vec![TxnOp::put(&state_key, to.as_str())];
        puts.extend_from_slice(extra_puts);

        for state in from {
            let resp = self
                .gw
                .txn(
                    vec![Compare::value(&state_key, CompareOp::Equal, state.as_str())],
                    puts.clone(),
                    vec![],
                )
                .await?;
            if resp.succeeded {
                debug!(vg = name, from = %state, %to, revision = resp.revision, "vg transition");
                return Ok(resp.revision);
            }
        }
        make_error_msg(
            VgCode::PRECONDITION_FAILED,
            format!("vg {} is not in a state that allows {}", name, to),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use havg_kv::KvStore;
    use havg_kv_backends::MemKvStore;
    use havg_types::Duration;

    use crate::keyspace::node_name_key;

    fn registry(store: &MemKvStore) -> VgRegistry {
        VgRegistry::new(KvGateway::new(
            Arc::new(store.clone()),
            Duration::from_secs(2),
        ))
    }

    async fn plant_online_node(store: &MemKvStore, host: &str) {
        store
            .txn(
                vec![],
                vec![
                    TxnOp::put(node_name_key(host), host),
                    TxnOp::put(node_state_key(host), "ONLINE"),
                ],
                vec![],
            )
            .await
            .unwrap();
    }

    async fn add_vg(reg: &VgRegistry, name: &str, ip: &str) {
        reg.add(name, ip, "255.255.255.0", "eth0", true, true)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_add_creates_initial_record() {
        let store = MemKvStore::new();
        let reg = registry(&store);
        add_vg(&reg, "vg0", "10.0.0.1").await;

        let rec = reg.get("vg0", None).await.unwrap().unwrap();
        assert_eq!(rec.state, VgState::Initial);
        assert_eq!(rec.node, "");
        assert_eq!(rec.ip_addr, "10.0.0.1");
        assert_eq!(rec.volume_list, "");
    }

    #[tokio::test]
    async fn test_add_twice_fails() {
        let store = MemKvStore::new();
        let reg = registry(&store);
        add_vg(&reg, "vg0", "10.0.0.1").await;

        let err = reg
            .add("vg0", "10.0.0.2", "255.255.255.0", "eth0", true, true)
            .await
            .unwrap_err();
        assert_eq!(err.code(), VgCode::ALREADY_EXISTS);
    }

    #[tokio::test]
    async fn test_add_rejects_duplicate_address() {
        let store = MemKvStore::new();
        let reg = registry(&store);
        add_vg(&reg, "vg0", "10.0.0.1").await;

        let err = reg
            .add("vg1", "10.0.0.1", "255.255.255.0", "eth0", true, true)
            .await
            .unwrap_err();
        assert_eq!(err.code(), VgCode::ADDRESS_IN_USE);
    }

    #[tokio::test]
    async fn test_add_rejects_malformed_input() {
        let store = MemKvStore::new();
        let reg = registry(&store);

        let err = reg
            .add("vg0", "not-an-ip", "255.255.255.0", "eth0", true, true)
            .await
            .unwrap_err();
        assert_eq!(err.code(), StatusCode::INVALID_ARG);

        let err = reg
            .add("vg0", "10.0.0.1", "255.255.255.0", "", true, true)
            .await
            .unwrap_err();
        assert_eq!(err.code(), StatusCode::INVALID_ARG);
    }

    #[tokio::test]
    async fn test_remove_lifecycle() {
        let store = MemKvStore::new();
        let reg = registry(&store);
        add_vg(&reg, "vg0", "10.0.0.1").await;

        reg.remove("vg0").await.unwrap();
        assert!(store.is_empty());

        let err = reg.remove("vg0").await.unwrap_err();
        assert_eq!(err.code(), VgCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_remove_rejected_while_active() {
        let store = MemKvStore::new();
        let reg = registry(&store);
        plant_online_node(&store, "h1").await;
        add_vg(&reg, "vg0", "10.0.0.1").await;
        reg.set_onlining("h1", "vg0").await.unwrap();

        let err = reg.remove("vg0").await.unwrap_err();
        assert_eq!(err.code(), VgCode::BUSY);

        reg.set_online("vg0").await.unwrap();
        let err = reg.remove("vg0").await.unwrap_err();
        assert_eq!(err.code(), VgCode::BUSY);

        // Once down, removal goes through.
        reg.set_offlining("vg0").await.unwrap();
        reg.set_offline("vg0").await.unwrap();
        reg.remove("vg0").await.unwrap();
        let (records, _) = reg.list(None).await.unwrap();
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn test_set_onlining_from_initial_and_offline() {
        let store = MemKvStore::new();
        let reg = registry(&store);
        plant_online_node(&store, "h1").await;
        add_vg(&reg, "vg0", "10.0.0.1").await;

        reg.set_onlining("h1", "vg0").await.unwrap();
        let rec = reg.get("vg0", None).await.unwrap().unwrap();
        assert_eq!(rec.state, VgState::Onlining);
        assert_eq!(rec.node, "h1");

        // Walk it down, then start again from OFFLINE.
        reg.set_online("vg0").await.unwrap();
        reg.set_offlining("vg0").await.unwrap();
        reg.set_offline("vg0").await.unwrap();
        let rec = reg.get("vg0", None).await.unwrap().unwrap();
        assert_eq!(rec.state, VgState::Offline);
        assert_eq!(rec.node, "");

        reg.set_onlining("h1", "vg0").await.unwrap();
        let rec = reg.get("vg0", None).await.unwrap().unwrap();
        assert_eq!(rec.state, VgState::Onlining);
    }

    #[tokio::test]
    async fn test_set_onlining_requires_online_host() {
        let store = MemKvStore::new();
        let reg = registry(&store);
        add_vg(&reg, "vg0", "10.0.0.1").await;

        // No such node registered.
        let err = reg.set_onlining("ghost", "vg0").await.unwrap_err();
        assert_eq!(err.code(), VgCode::PRECONDITION_FAILED);

        // Node exists but is not ONLINE.
        store
            .txn(
                vec![],
                vec![
                    TxnOp::put(node_name_key("h1"), "h1"),
                    TxnOp::put(node_state_key("h1"), "OFFLINING"),
                ],
                vec![],
            )
            .await
            .unwrap();
        let err = reg.set_onlining("h1", "vg0").await.unwrap_err();
        assert_eq!(err.code(), VgCode::PRECONDITION_FAILED);
    }

    #[tokio::test]
    async fn test_set_onlining_single_winner() {
        let store = MemKvStore::new();
        let reg = registry(&store);
        for host in ["h1", "h2", "h3"] {
            plant_online_node(&store, host).await;
        }
        add_vg(&reg, "vg0", "10.0.0.1").await;

        let mut handles = Vec::new();
        for host in ["h1", "h2", "h3"] {
            let reg = registry(&store);
            handles.push(tokio::spawn(async move {
                reg.set_onlining(host, "vg0").await.is_ok()
            }));
        }
        let mut winners = 0;
        for h in handles {
            if h.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
        let rec = reg.get("vg0", None).await.unwrap().unwrap();
        assert_eq!(rec.state, VgState::Onlining);
        assert!(!rec.node.is_empty());
    }

    #[tokio::test]
    async fn test_set_failed_keeps_node() {
        let store = MemKvStore::new();
        let reg = registry(&store);
        plant_online_node(&store, "h1").await;
        add_vg(&reg, "vg0", "10.0.0.1").await;
        reg.set_onlining("h1", "vg0").await.unwrap();

        reg.set_failed("vg0").await.unwrap();
        let rec = reg.get("vg0", None).await.unwrap().unwrap();
        assert_eq!(rec.state, VgState::Failed);
        assert_eq!(rec.node, "h1");
    }

    #[tokio::test]
    async fn test_mark_failed_idempotent() {
        let store = MemKvStore::new();
        let reg = registry(&store);
        plant_online_node(&store, "h1").await;
        add_vg(&reg, "vg0", "10.0.0.1").await;

        // INITIAL is not a failable state.
        let err = reg.mark_failed("vg0").await.unwrap_err();
        assert_eq!(err.code(), VgCode::INVALID_TRANSITION);

        reg.set_onlining("h1", "vg0").await.unwrap();
        reg.mark_failed("vg0").await.unwrap();
        // Second call observes FAILED and succeeds without a write.
        reg.mark_failed("vg0").await.unwrap();

        let err = reg.mark_failed("missing").await.unwrap_err();
        assert_eq!(err.code(), VgCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_set_offline_accepts_online_for_failover() {
        let store = MemKvStore::new();
        let reg = registry(&store);
        plant_online_node(&store, "h1").await;
        add_vg(&reg, "vg0", "10.0.0.1").await;
        reg.set_onlining("h1", "vg0").await.unwrap();
        reg.set_online("vg0").await.unwrap();

        reg.set_offline("vg0").await.unwrap();
        let rec = reg.get("vg0", None).await.unwrap().unwrap();
        assert_eq!(rec.state, VgState::Offline);
        assert_eq!(rec.node, "");
    }

    #[tokio::test]
    async fn test_invalid_transition_is_explicit() {
        let store = MemKvStore::new();
        let reg = registry(&store);
        add_vg(&reg, "vg0", "10.0.0.1").await;

        // INITIAL cannot go ONLINE directly.
        let err = reg.set_online("vg0").await.unwrap_err();
        assert_eq!(err.code(), VgCode::PRECONDITION_FAILED);

        let err = reg.set_offlining("vg0").await.unwrap_err();
        assert_eq!(err.code(), VgCode::PRECONDITION_FAILED);
    }

    #[tokio::test]
    async fn test_force_offline_from_dead() {
        let store = MemKvStore::new();
        let reg = registry(&store);
        plant_online_node(&store, "h1").await;
        add_vg(&reg, "vg0", "10.0.0.1").await;
        reg.set_onlining("h1", "vg0").await.unwrap();
        reg.set_online("vg0").await.unwrap();

        // Rescue requires the owner to actually be DEAD.
        assert!(!reg.force_offline_from_dead("vg0", "h1").await.unwrap());

        store
            .txn(
                vec![],
                vec![TxnOp::put(node_state_key("h1"), "DEAD")],
                vec![],
            )
            .await
            .unwrap();
        assert!(reg.force_offline_from_dead("vg0", "h1").await.unwrap());
        let rec = reg.get("vg0", None).await.unwrap().unwrap();
        assert_eq!(rec.state, VgState::Offline);
        assert_eq!(rec.node, "");

        // Second rescuer finds nothing to do.
        assert!(!reg.force_offline_from_dead("vg0", "h1").await.unwrap());
    }

    #[tokio::test]
    async fn test_enable_disable_flag() {
        let store = MemKvStore::new();
        let reg = registry(&store);
        add_vg(&reg, "vg0", "10.0.0.1").await;

        reg.set_enabled("vg0", false).await.unwrap();
        let rec = reg.get("vg0", None).await.unwrap().unwrap();
        assert!(!rec.enabled);

        reg.set_enabled("vg0", true).await.unwrap();
        let rec = reg.get("vg0", None).await.unwrap().unwrap();
        assert!(rec.enabled);

        let err = reg.set_enabled("ghost", true).await.unwrap_err();
        assert_eq!(err.code(), VgCode::NOT_FOUND);
    }
}
