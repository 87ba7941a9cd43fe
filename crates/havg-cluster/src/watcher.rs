//! Watch subscriber: converts raw key-change batches into typed cluster
//! events and hands them to the controller over a bounded channel.
//!
//! One producer, one consumer. Actuation can block for seconds, so nothing
//! is ever dispatched from this task; the controller consumes at its own
//! pace and the channel provides the back-pressure.

use std::str::FromStr;

use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use havg_kv::{EventType, Revision, WatchBatch};
use havg_types::{make_error_msg, KvCode, Result};

use crate::gateway::KvGateway;
use crate::keyspace::{split_node_key, split_vg_key, NodeField, VgField, NODE_PREFIX, VG_PREFIX};
use crate::state::{NodeState, VgState};

/// A typed change observed through the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterEvent {
    VgStateChanged {
        name: String,
        state: VgState,
        prev: Option<VgState>,
    },
    VgNodeChanged {
        name: String,
        node: String,
        prev: Option<String>,
    },
    VgEnabledChanged {
        name: String,
        enabled: bool,
    },
    VgDeleted {
        name: String,
    },
    NodeStateChanged {
        host: String,
        state: NodeState,
        prev: Option<NodeState>,
    },
    NodeRemoved {
        host: String,
    },
    NodeHeartbeat {
        host: String,
    },
}

/// Every event of one committed transaction, in one delivery.
#[derive(Debug, Clone)]
pub struct EventBatch {
    pub revision: Revision,
    pub events: Vec<ClusterEvent>,
}

/// Decode one raw batch. Keys outside the known fields, and values that do
/// not parse, are dropped with a warning; the store owns the truth and a
/// malformed key must not wedge the event pipeline.
pub fn decode_batch(batch: &WatchBatch) -> EventBatch {
    let mut events = Vec::with_capacity(batch.events.len());
    for raw in &batch.events {
        let key = raw.kv.key.as_str();
        let deleted = raw.event_type == EventType::Delete;

        if let Some((field, name)) = split_vg_key(key) {
            match (field, deleted) {
                (VgField::State, true) => events.push(ClusterEvent::VgDeleted {
                    name: name.to_string(),
                }),
                (VgField::State, false) => match VgState::from_str(&raw.kv.value) {
                    Ok(state) => events.push(ClusterEvent::VgStateChanged {
                        name: name.to_string(),
                        state,
                        prev: raw
                            .prev_value
                            .as_deref()
                            .and_then(|v| VgState::from_str(v).ok()),
                    }),
                    Err(_) => warn!(key, value = %raw.kv.value, "unparseable vg state event"),
                },
                (VgField::Node, false) => events.push(ClusterEvent::VgNodeChanged {
                    name: name.to_string(),
                    node: raw.kv.value.clone(),
                    prev: raw.prev_value.clone(),
                }),
                (VgField::Enabled, false) => {
                    match crate::keyspace::parse_bool(&raw.kv.value) {
                        Some(enabled) => events.push(ClusterEvent::VgEnabledChanged {
                            name: name.to_string(),
                            enabled,
                        }),
                        None => warn!(key, value = %raw.kv.value, "unparseable vg enabled event"),
                    }
                }
                // Remaining fields are immutable after creation or carry no
                // coordination meaning as single-key changes.
                _ => {}
            }
        } else if let Some((field, host)) = split_node_key(key) {
            match (field, deleted) {
                (NodeField::State, true) => events.push(ClusterEvent::NodeRemoved {
                    host: host.to_string(),
                }),
                (NodeField::State, false) => match NodeState::from_str(&raw.kv.value) {
                    Ok(state) => events.push(ClusterEvent::NodeStateChanged {
                        host: host.to_string(),
                        state,
                        prev: raw
                            .prev_value
                            .as_deref()
                            .and_then(|v| NodeState::from_str(v).ok()),
                    }),
                    Err(_) => warn!(key, value = %raw.kv.value, "unparseable node state event"),
                },
                (NodeField::Hb, false) => events.push(ClusterEvent::NodeHeartbeat {
                    host: host.to_string(),
                }),
                _ => {}
            }
        }
    }
    EventBatch {
        revision: batch.revision,
        events,
    }
}

/// Run the watch loop: subscribe to the `VG` and `NODE` prefixes from
/// `from`, decode every delivery, and forward it to the controller.
///
/// Returns cleanly when shutdown is signalled, when the controller goes
/// away, or once the local node has been observed OFFLINE (at which point
/// there is nothing left to coordinate). A dead stream is an error: the
/// caller must treat the handle as fenced.
pub async fn run_watcher(
    gw: KvGateway,
    host_name: String,
    from: Revision,
    tx: mpsc::Sender<EventBatch>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let mut vg_stream = gw.watch_prefix(VG_PREFIX, from).await?;
    let mut node_stream = gw.watch_prefix(NODE_PREFIX, from).await?;

    loop {
        let raw = tokio::select! {
            _ = shutdown.changed() => {
                debug!("watcher stopping on shutdown signal");
                return Ok(());
            }
            batch = vg_stream.recv() => batch,
            batch = node_stream.recv() => batch,
        };
        let Some(raw) = raw else {
            return make_error_msg(KvCode::WATCH_LOST, "watch stream terminated");
        };

        let batch = decode_batch(&raw);
        if batch.events.is_empty() {
            continue;
        }

        let local_offline = batch.events.iter().any(|ev| {
            matches!(
                ev,
                ClusterEvent::NodeStateChanged { host, state: NodeState::Offline, .. }
                    if *host == host_name
            )
        });

        if tx.send(batch).await.is_err() {
            debug!("watcher stopping: controller gone");
            return Ok(());
        }
        if local_offline {
            debug!("watcher stopping: local node is OFFLINE");
            return Ok(());
        }
    }
}
