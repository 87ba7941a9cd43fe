//! Domain state: volume group and node lifecycle states plus the decoded
//! record types.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use havg_types::{Status, StatusCode, UtcTime};

/// Lifecycle state of a volume group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum VgState {
    /// Created by the administrator; never started.
    Initial,
    /// A node is bringing the group online.
    Onlining,
    /// Serving on the node in the record.
    Online,
    /// The owning node is gracefully taking the group down.
    Offlining,
    /// Down, unowned.
    Offline,
    /// The up script failed; the node field names the culprit.
    Failed,
}

impl VgState {
    pub fn as_str(&self) -> &'static str {
        match self {
            VgState::Initial => "INITIAL",
            VgState::Onlining => "ONLINING",
            VgState::Online => "ONLINE",
            VgState::Offlining => "OFFLINING",
            VgState::Offline => "OFFLINE",
            VgState::Failed => "FAILED",
        }
    }

    /// Whether the state implies a non-empty node field.
    pub fn is_owned(&self) -> bool {
        matches!(
            self,
            VgState::Onlining | VgState::Online | VgState::Offlining | VgState::Failed
        )
    }

    /// Whether the group holds (or is acquiring/releasing) its address.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            VgState::Onlining | VgState::Online | VgState::Offlining
        )
    }

    /// Whether a placement pass may start the group.
    pub fn is_startable(&self) -> bool {
        matches!(self, VgState::Initial | VgState::Offline)
    }
}

impl fmt::Display for VgState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VgState {
    type Err = Status;

    fn from_str(s: &str) -> Result<Self, Status> {
        match s {
            "INITIAL" => Ok(VgState::Initial),
            "ONLINING" => Ok(VgState::Onlining),
            "ONLINE" => Ok(VgState::Online),
            "OFFLINING" => Ok(VgState::Offlining),
            "OFFLINE" => Ok(VgState::Offline),
            "FAILED" => Ok(VgState::Failed),
            other => Err(Status::with_message(
                StatusCode::INVALID_FORMAT,
                format!("unknown vg state {:?}", other),
            )),
        }
    }
}

/// Lifecycle state of a cluster node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum NodeState {
    /// Joined; heartbeat not yet confirmed.
    Starting,
    /// Heartbeating and eligible to own volume groups.
    Online,
    /// Draining its volume groups.
    Offlining,
    /// Cleanly drained; owns nothing.
    Offline,
    /// Heartbeat lease expired; peers have fenced it.
    Dead,
}

impl NodeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeState::Starting => "STARTING",
            NodeState::Online => "ONLINE",
            NodeState::Offlining => "OFFLINING",
            NodeState::Offline => "OFFLINE",
            NodeState::Dead => "DEAD",
        }
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeState {
    type Err = Status;

    fn from_str(s: &str) -> Result<Self, Status> {
        match s {
            "STARTING" => Ok(NodeState::Starting),
            "ONLINE" => Ok(NodeState::Online),
            "OFFLINING" => Ok(NodeState::Offlining),
            "OFFLINE" => Ok(NodeState::Offline),
            "DEAD" => Ok(NodeState::Dead),
            other => Err(Status::with_message(
                StatusCode::INVALID_FORMAT,
                format!("unknown node state {:?}", other),
            )),
        }
    }
}

/// A fully-decoded volume group record at some revision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VgRecord {
    pub name: String,
    pub state: VgState,
    /// Owning (or last-owning, for FAILED) host; empty when unowned.
    pub node: String,
    pub ip_addr: String,
    pub netmask: String,
    pub nic: String,
    pub auto_failover: bool,
    pub enabled: bool,
    /// Comma-joined volume names; may be empty.
    pub volume_list: String,
}

impl VgRecord {
    pub fn volumes(&self) -> Vec<&str> {
        if self.volume_list.is_empty() {
            Vec::new()
        } else {
            self.volume_list.split(',').collect()
        }
    }
}

/// A decoded cluster member record at some revision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeRecord {
    pub host: String,
    pub state: NodeState,
    /// Last published heartbeat; the epoch when the heartbeat key is gone
    /// (lease already expired).
    pub hb: UtcTime,
    /// Write version of the heartbeat key, 0 when absent. Used as a CAS
    /// guard so a stale death verdict loses to a concurrent refresh.
    pub hb_version: i64,
}
