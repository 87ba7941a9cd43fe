//! Cluster coordination engine for highly-available volume groups.
//!
//! A volume group (VG) bundles a virtual IP, netmask, NIC and operational
//! metadata into one failover unit. Server nodes cooperate through a
//! strongly-consistent, watched key-value store to decide which node
//! serves each group at every moment: when a node dies its groups fail
//! over to survivors, when a node joins it picks up eligible groups, and
//! administrative changes converge without split-brain.
//!
//! The store is the single source of truth. Every state change is a
//! compare-and-swap transaction against it, every node observes the same
//! linearized order of changes through prefix watches, and per-process
//! caches are revision-tagged snapshots that writes must re-validate.
//!
//! ```no_run
//! use std::sync::Arc;
//! use havg_cluster::{Cluster, ClusterConfig};
//! use havg_kv_backends::MemKvStore;
//!
//! # async fn demo() -> havg_types::Result<()> {
//! let store = Arc::new(MemKvStore::new());
//! let cluster = Cluster::new(store, ClusterConfig::new("node-1"))?;
//! cluster.server().await?;
//! cluster
//!     .add_volume_group("vg0", "10.0.0.10", "255.255.255.0", "eth0", true, true)
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod controller;
pub mod gateway;
pub mod handle;
pub mod keyspace;
pub mod node;
pub mod script;
pub mod state;
pub mod testing;
pub mod vg;
pub mod watcher;

// Re-export the primary surface at the crate root.
pub use config::ClusterConfig;
pub use controller::Controller;
pub use gateway::KvGateway;
pub use handle::Cluster;
pub use node::{HeartbeatExit, LivenessReport, NodeRegistry};
pub use script::{Actuator, ScriptActuator, UpDown};
pub use state::{NodeRecord, NodeState, VgRecord, VgState};
pub use vg::VgRegistry;
pub use watcher::{ClusterEvent, EventBatch};
