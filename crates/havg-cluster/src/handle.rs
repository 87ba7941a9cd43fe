//! The public cluster handle.
//!
//! An explicit value constructed by the factory functions and passed to
//! every operation; there is no process-wide instance. One handle per
//! process per host name.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use havg_kv::{KvStore, LeaseId};
use havg_types::{make_error_msg, NodeCode, Result, VgCode};

use crate::config::ClusterConfig;
use crate::controller::Controller;
use crate::gateway::KvGateway;
use crate::keyspace::VG_PREFIX;
use crate::node::{HeartbeatExit, NodeRegistry};
use crate::script::{Actuator, ScriptActuator};
use crate::state::{VgRecord, VgState};
use crate::vg::VgRegistry;
use crate::watcher::run_watcher;

/// Handle to the coordination engine for one cluster member.
///
/// Administrative operations work immediately after construction;
/// [`server`] additionally registers the node and starts the background
/// tasks that serve volume groups.
///
/// [`server`]: Cluster::server
pub struct Cluster {
    cfg: ClusterConfig,
    gw: KvGateway,
    nodes: Arc<NodeRegistry>,
    vgs: VgRegistry,
    controller: Arc<Controller>,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    lease: Mutex<Option<LeaseId>>,
    serving: AtomicBool,
    fenced: Arc<AtomicBool>,
}

impl Cluster {
    /// Build a handle over any store, actuating through the configured
    /// script.
    pub fn new(store: Arc<dyn KvStore>, cfg: ClusterConfig) -> Result<Self> {
        let actuator = Arc::new(ScriptActuator::new(
            cfg.script_path.clone(),
            cfg.script_timeout(),
        ));
        Self::with_actuator(store, cfg, actuator)
    }

    /// Build a handle with a caller-supplied actuator.
    pub fn with_actuator(
        store: Arc<dyn KvStore>,
        cfg: ClusterConfig,
        actuator: Arc<dyn Actuator>,
    ) -> Result<Self> {
        cfg.validate()?;
        let gw = KvGateway::new(store, cfg.op_timeout());
        let nodes = Arc::new(NodeRegistry::new(gw.clone(), cfg.clone()));
        let vgs = VgRegistry::new(gw.clone());
        let controller = Arc::new(Controller::new(
            cfg.clone(),
            vgs.clone(),
            NodeRegistry::new(gw.clone(), cfg.clone()),
            actuator,
        ));
        let (shutdown, _) = watch::channel(false);
        Ok(Self {
            cfg,
            gw,
            nodes,
            vgs,
            controller,
            shutdown,
            tasks: Mutex::new(Vec::new()),
            lease: Mutex::new(None),
            serving: AtomicBool::new(false),
            fenced: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Connect to an etcd cluster and build a handle.
    #[cfg(feature = "etcd")]
    pub async fn connect(
        endpoints: &[String],
        cfg: ClusterConfig,
        connect_timeout: havg_types::Duration,
    ) -> Result<Self> {
        let store = havg_kv_backends::EtcdStore::connect(endpoints, connect_timeout).await?;
        Self::new(Arc::new(store), cfg)
    }

    pub fn host_name(&self) -> &str {
        &self.cfg.host_name
    }

    /// Whether the handle fenced itself after losing the store.
    pub fn is_fenced(&self) -> bool {
        self.fenced.load(Ordering::SeqCst)
    }

    /// Register this node and start serving volume groups.
    ///
    /// Joins with a fresh lease, confirms ONLINE, subscribes the watcher
    /// and controller, starts the heartbeat task, and runs the first
    /// placement pass. Returns once the node is ONLINE.
    pub async fn server(&self) -> Result<()> {
        if self.serving.swap(true, Ordering::SeqCst) {
            return make_error_msg(NodeCode::ALREADY_JOINED, "handle is already serving");
        }

        let lease = match self.nodes.join().await {
            Ok(lease) => lease,
            Err(err) => {
                self.serving.store(false, Ordering::SeqCst);
                return Err(err);
            }
        };
        *self.lease.lock() = Some(lease);
        self.nodes.publish_heartbeat(lease).await?;
        self.nodes.confirm_online().await?;

        // Watch from the revision we are about to snapshot so nothing can
        // slip between the snapshot and the subscription.
        let from = self.gw.get_prefix(VG_PREFIX, None).await?.revision;
        let (tx, rx) = mpsc::channel(self.cfg.event_queue_len);

        let watcher = {
            let gw = self.gw.clone();
            let host = self.cfg.host_name.clone();
            let shutdown = self.shutdown.subscribe();
            let fenced = Arc::clone(&self.fenced);
            tokio::spawn(async move {
                if let Err(err) = run_watcher(gw, host, from, tx, shutdown).await {
                    error!(error = %err, "watcher failed; fencing handle");
                    fenced.store(true, Ordering::SeqCst);
                }
            })
        };

        let controller = {
            let ctrl = Arc::clone(&self.controller);
            let shutdown = self.shutdown.subscribe();
            tokio::spawn(ctrl.run(rx, shutdown))
        };

        let heartbeat = {
            let nodes = Arc::clone(&self.nodes);
            let shutdown = self.shutdown.subscribe();
            let shutdown_tx = self.shutdown.clone();
            let fenced = Arc::clone(&self.fenced);
            tokio::spawn(async move {
                if nodes.heartbeat_loop(lease, shutdown).await == HeartbeatExit::Fenced {
                    // Partitioned from the store: stop serving, leave the
                    // addresses alone, let the peers fail us over.
                    warn!("heartbeat lost the store; fencing handle");
                    fenced.store(true, Ordering::SeqCst);
                    let _ = shutdown_tx.send(true);
                }
            })
        };

        self.tasks.lock().extend([watcher, controller, heartbeat]);

        self.controller.start_vgs().await?;
        info!(host = self.host_name(), "serving");
        Ok(())
    }

    /// Stop every background task and drop the lease.
    ///
    /// The heartbeat task joins before the lease is revoked, so the node's
    /// liveness keys disappear promptly and peers take over its groups.
    pub async fn close(&self) {
        let _ = self.shutdown.send(true);
        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            let _ = task.await;
        }
        let lease = self.lease.lock().take();
        if let Some(lease) = lease {
            if let Err(err) = self.gw.lease_revoke(lease).await {
                warn!(error = %err, "lease revoke failed; it will expire on its own");
            }
        }
        self.serving.store(false, Ordering::SeqCst);
        info!(host = self.host_name(), "closed");
    }

    /// Create a volume group in INITIAL.
    pub async fn add_volume_group(
        &self,
        name: &str,
        ip_addr: &str,
        netmask: &str,
        nic: &str,
        auto_failover: bool,
        enabled: bool,
    ) -> Result<()> {
        self.vgs
            .add(name, ip_addr, netmask, nic, auto_failover, enabled)
            .await
    }

    /// Delete a volume group that is neither ONLINING nor ONLINE.
    pub async fn rm_volume_group(&self, name: &str) -> Result<()> {
        self.vgs.remove(name).await
    }

    /// Mark a group FAILED; idempotent on an already-failed group.
    pub async fn mark_volume_group_failed(&self, name: &str) -> Result<()> {
        self.vgs.mark_failed(name).await
    }

    /// Allow the group to be placed again.
    pub async fn enable(&self, name: &str) -> Result<()> {
        self.vgs.set_enabled(name, true).await
    }

    /// Exclude the group from placement; if it is currently active, its
    /// owner is asked to take it down as well.
    pub async fn disable(&self, name: &str) -> Result<()> {
        self.vgs.set_enabled(name, false).await?;
        match self.vgs.set_offlining(name).await {
            Ok(_) => Ok(()),
            // Not active: the flag flip alone is the whole job.
            Err(err) if err.code() == VgCode::PRECONDITION_FAILED => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// Ask the owner of a group to take it down gracefully.
    pub async fn offline_volume_group(&self, name: &str) -> Result<()> {
        self.vgs.set_offlining(name).await.map(|_| ())
    }

    /// Every volume group at one consistent revision, in name order.
    pub async fn list(&self) -> Result<Vec<VgRecord>> {
        let (records, _) = self.vgs.list(None).await?;
        Ok(records.into_values().collect())
    }

    /// Current state of one volume group.
    pub async fn volume_group_state(&self, name: &str) -> Result<Option<VgState>> {
        Ok(self.vgs.get(name, None).await?.map(|r| r.state))
    }
}
