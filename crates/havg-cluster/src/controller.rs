//! The placement brain.
//!
//! Consumes the typed event stream and drives three concerns:
//!
//! - **placement** -- promote startable groups to ONLINING on ONLINE nodes,
//!   round-robin over hosts sorted by name; losers of the placement CAS
//!   skip without retry, the next event drives the next pass,
//! - **local actuation** -- when a group turns ONLINING or OFFLINING with
//!   this host as owner, run the script and report the outcome,
//! - **repair** -- when a node dies, force its groups OFFLINE and re-place
//!   them; when this node drains, walk its groups down and finish the
//!   OFFLINING -> OFFLINE transition.
//!
//! Every decision works from a snapshot pinned to one revision, so the
//! controller never acts on a torn view.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use havg_kv::Revision;
use havg_types::{Result, VgCode};

use crate::config::ClusterConfig;
use crate::node::NodeRegistry;
use crate::script::{Actuator, UpDown};
use crate::state::{NodeRecord, NodeState, VgRecord, VgState};
use crate::vg::VgRegistry;
use crate::watcher::{ClusterEvent, EventBatch};

pub struct Controller {
    cfg: ClusterConfig,
    vgs: VgRegistry,
    nodes: NodeRegistry,
    actuator: Arc<dyn Actuator>,
    /// Serializes actuation per group so a second script run cannot start
    /// while one is in flight.
    locks: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
}

impl Controller {
    pub fn new(
        cfg: ClusterConfig,
        vgs: VgRegistry,
        nodes: NodeRegistry,
        actuator: Arc<dyn Actuator>,
    ) -> Self {
        Self {
            cfg,
            vgs,
            nodes,
            actuator,
            locks: DashMap::new(),
        }
    }

    fn host(&self) -> &str {
        &self.cfg.host_name
    }

    /// Consume event batches until shutdown or the watcher goes away.
    pub async fn run(
        self: Arc<Self>,
        mut rx: mpsc::Receiver<EventBatch>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    debug!("controller stopping on shutdown signal");
                    return;
                }
                batch = rx.recv() => {
                    let Some(batch) = batch else {
                        debug!("controller stopping: watcher gone");
                        return;
                    };
                    for name in self.handle_batch(batch).await {
                        let ctrl = Arc::clone(&self);
                        tokio::spawn(async move {
                            ctrl.actuate(&name).await;
                        });
                    }
                }
            }
        }
    }

    /// Combined view of both entity sets at one revision: the group prefix
    /// is read at the latest revision and the node prefix pinned to it.
    async fn snapshot(
        &self,
    ) -> Result<(
        BTreeMap<String, VgRecord>,
        BTreeMap<String, NodeRecord>,
        Revision,
    )> {
        let (vgs, revision) = self.vgs.list(None).await?;
        let (nodes, _) = self.nodes.list(Some(revision)).await?;
        Ok((vgs, nodes, revision))
    }

    /// One placement pass: every startable, enabled, auto-failover group is
    /// offered to the next ONLINE host in name order.
    ///
    /// Runs concurrently on every node; the store linearizes the attempts
    /// and each group gets exactly one owner. A lost CAS is skipped without
    /// retry within the pass, which keeps racing placers from livelocking:
    /// either this pass made progress or a concurrent one did.
    pub async fn start_vgs(&self) -> Result<()> {
        let (vgs, nodes, revision) = self.snapshot().await?;
        let online: Vec<&str> = nodes
            .values()
            .filter(|n| n.state == NodeState::Online)
            .map(|n| n.host.as_str())
            .collect();
        if online.is_empty() {
            debug!("placement pass: no ONLINE nodes");
            return Ok(());
        }

        let mut next = 0usize;
        for vg in vgs
            .values()
            .filter(|vg| vg.state.is_startable() && vg.enabled && vg.auto_failover)
        {
            let host = online[next % online.len()];
            next += 1;
            match self.vgs.set_onlining(host, &vg.name).await {
                Ok(rev) => info!(vg = %vg.name, host, revision = rev, "placed vg"),
                Err(err) if err.code() == VgCode::PRECONDITION_FAILED => {
                    debug!(vg = %vg.name, host, "lost placement race");
                }
                Err(err) => warn!(vg = %vg.name, host, error = %err, "placement failed"),
            }
        }
        debug!(revision, "placement pass done");
        Ok(())
    }

    /// Digest one batch; returns the groups whose actuation this node must
    /// run (spawned by the caller so this loop never blocks on a script).
    async fn handle_batch(&self, batch: EventBatch) -> Vec<String> {
        let mut run_placement = false;
        let mut check_drain = false;
        let mut actuation: BTreeSet<&str> = BTreeSet::new();

        for ev in &batch.events {
            match ev {
                ClusterEvent::VgStateChanged { name, state, .. } => match state {
                    VgState::Initial => run_placement = true,
                    VgState::Offline => {
                        run_placement = true;
                        check_drain = true;
                    }
                    VgState::Onlining | VgState::Offlining => {
                        actuation.insert(name.as_str());
                    }
                    VgState::Online | VgState::Failed => {}
                },
                ClusterEvent::VgNodeChanged { name, node, .. } if node == self.host() => {
                    actuation.insert(name.as_str());
                }
                // A re-enabled group may be sitting in OFFLINE with no
                // further state event coming; offer it a seat now.
                ClusterEvent::VgEnabledChanged { enabled: true, .. } => run_placement = true,
                ClusterEvent::NodeStateChanged { host, state, .. } => match state {
                    NodeState::Dead => {
                        self.failover(host).await;
                        run_placement = true;
                    }
                    NodeState::Online => run_placement = true,
                    NodeState::Offlining if host == self.host() => {
                        self.drain_local().await;
                    }
                    _ => {}
                },
                _ => {}
            }
        }

        // Ownership is judged at the batch's own revision, so an event that
        // was already superseded cannot trigger a stray script run.
        let mut to_actuate = Vec::new();
        for name in actuation {
            match self.vgs.get(name, Some(batch.revision)).await {
                Ok(Some(rec)) if rec.node == self.host() && rec.state.is_active() => {
                    to_actuate.push(name.to_string());
                }
                Ok(_) => {}
                Err(err) => warn!(vg = name, error = %err, "could not read vg at event revision"),
            }
        }

        if check_drain {
            self.finish_drain_if_done().await;
        }
        if run_placement {
            if let Err(err) = self.start_vgs().await {
                warn!(error = %err, "placement pass failed");
            }
        }
        to_actuate
    }

    /// Run the script for one group, serialized per group name. The current
    /// record is re-read under the lock: if the group moved on while we
    /// queued, there is nothing to do, and the CAS on the final report
    /// catches the remaining races.
    async fn actuate(&self, name: &str) {
        let lock = {
            let entry = self.locks.entry(name.to_string()).or_default();
            Arc::clone(entry.value())
        };
        let _guard = lock.lock().await;

        let rec = match self.vgs.get(name, None).await {
            Ok(Some(rec)) => rec,
            Ok(None) => return,
            Err(err) => {
                warn!(vg = name, error = %err, "actuation aborted: cannot read vg");
                return;
            }
        };
        if rec.node != self.host() {
            return;
        }

        match rec.state {
            VgState::Onlining => {
                info!(vg = name, ip = %rec.ip_addr, nic = %rec.nic, "bringing vg up");
                match self
                    .actuator
                    .run(UpDown::Up, name, &rec.ip_addr, &rec.netmask, &rec.nic)
                    .await
                {
                    Ok(()) => {
                        if let Err(err) = self.vgs.set_online(name).await {
                            warn!(vg = name, error = %err, "could not report vg ONLINE");
                        }
                    }
                    Err(err) => {
                        error!(vg = name, error = %err, "up script failed");
                        if let Err(err) = self.vgs.set_failed(name).await {
                            warn!(vg = name, error = %err, "could not report vg FAILED");
                        }
                    }
                }
            }
            VgState::Offlining => {
                info!(vg = name, ip = %rec.ip_addr, nic = %rec.nic, "taking vg down");
                // The address must actually be released before OFFLINE is
                // committed, or a peer could bind it while we still hold it.
                match self
                    .actuator
                    .run(UpDown::Down, name, &rec.ip_addr, &rec.netmask, &rec.nic)
                    .await
                {
                    Ok(()) => {
                        if let Err(err) = self.vgs.set_offline(name).await {
                            warn!(vg = name, error = %err, "could not report vg OFFLINE");
                        }
                    }
                    Err(err) => {
                        error!(
                            vg = name,
                            error = %err,
                            "down script failed; vg left OFFLINING for the operator"
                        );
                    }
                }
            }
            _ => debug!(vg = name, state = %rec.state, "actuation request superseded"),
        }
    }

    /// Rescue every group owned by a dead host: force it OFFLINE (guarded
    /// on the host still being DEAD) so the following placement pass can
    /// restart it elsewhere. FAILED groups stay put for the post-mortem.
    async fn failover(&self, dead_host: &str) {
        let (vgs, _, revision) = match self.snapshot().await {
            Ok(snap) => snap,
            Err(err) => {
                warn!(dead_host, error = %err, "failover skipped: snapshot failed");
                return;
            }
        };
        for rec in vgs
            .values()
            .filter(|r| r.node == dead_host && r.state.is_active())
        {
            match self.vgs.force_offline_from_dead(&rec.name, dead_host).await {
                Ok(true) => info!(vg = %rec.name, dead_host, "vg rescued from dead node"),
                Ok(false) => debug!(vg = %rec.name, dead_host, "vg already rescued"),
                Err(err) => warn!(vg = %rec.name, error = %err, "rescue failed"),
            }
        }
        debug!(dead_host, revision, "failover pass done");
    }

    /// This node is draining: ask every group it owns to go OFFLINING.
    /// Their OFFLINE events complete the node transition via
    /// [`finish_drain_if_done`].
    async fn drain_local(&self) {
        let (vgs, _, _) = match self.snapshot().await {
            Ok(snap) => snap,
            Err(err) => {
                warn!(error = %err, "drain skipped: snapshot failed");
                return;
            }
        };
        let mut owned = 0;
        for rec in vgs
            .values()
            .filter(|r| r.node == self.host() && r.state.is_active())
        {
            owned += 1;
            if rec.state == VgState::Offlining {
                continue;
            }
            if let Err(err) = self.vgs.set_offlining(&rec.name).await {
                warn!(vg = %rec.name, error = %err, "could not start vg drain");
            }
        }
        if owned == 0 {
            self.finish_drain_if_done().await;
        }
    }

    /// OFFLINING -> OFFLINE for the local node once it owns nothing active.
    async fn finish_drain_if_done(&self) {
        let (vgs, nodes, _) = match self.snapshot().await {
            Ok(snap) => snap,
            Err(err) => {
                warn!(error = %err, "drain check skipped: snapshot failed");
                return;
            }
        };
        let draining = nodes
            .get(self.host())
            .map(|n| n.state == NodeState::Offlining)
            .unwrap_or(false);
        if !draining {
            return;
        }
        let still_owned = vgs
            .values()
            .any(|r| r.node == self.host() && r.state.is_active());
        if still_owned {
            return;
        }
        match self
            .nodes
            .transition(self.host(), NodeState::Offlining, NodeState::Offline)
            .await
        {
            Ok(_) => info!(host = self.host(), "node drained, now OFFLINE"),
            Err(err) => debug!(error = %err, "drain completion lost a race"),
        }
    }
}
