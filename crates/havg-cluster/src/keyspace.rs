//! Flat keyspace encoding.
//!
//! Every entity field is one key: `VG<FIELD>:<vgName>` and
//! `NODE<FIELD>:<hostName>`. Per-field keys let watchers subscribe to
//! narrow prefixes (just `VGNODE:`, say) and keep transaction predicates
//! down to the fields that matter.
//!
//! States encode as their uppercase names, booleans as `true`/`false`,
//! heartbeats as decimal nanoseconds since the Unix epoch.

use std::collections::BTreeMap;
use std::str::FromStr;

use tracing::warn;

use havg_kv::KeyValue;
use havg_types::UtcTime;

use crate::state::{NodeRecord, NodeState, VgRecord, VgState};

/// Prefix shared by every volume group key.
pub const VG_PREFIX: &str = "VG";

/// Prefix shared by every node key.
pub const NODE_PREFIX: &str = "NODE";

// -- key builders -----------------------------------------------------------

pub fn vg_name_key(name: &str) -> String {
    format!("VGNAME:{}", name)
}

pub fn vg_state_key(name: &str) -> String {
    format!("VGSTATE:{}", name)
}

pub fn vg_node_key(name: &str) -> String {
    format!("VGNODE:{}", name)
}

pub fn vg_ipaddr_key(name: &str) -> String {
    format!("VGIPADDR:{}", name)
}

pub fn vg_netmask_key(name: &str) -> String {
    format!("VGNETMASK:{}", name)
}

pub fn vg_nic_key(name: &str) -> String {
    format!("VGNIC:{}", name)
}

pub fn vg_autofailover_key(name: &str) -> String {
    format!("VGAUTOFAILOVER:{}", name)
}

pub fn vg_enabled_key(name: &str) -> String {
    format!("VGENABLED:{}", name)
}

pub fn vg_volumelist_key(name: &str) -> String {
    format!("VGVOLUMELIST:{}", name)
}

/// All nine keys of a volume group, in creation order.
pub fn vg_keys(name: &str) -> [String; 9] {
    [
        vg_name_key(name),
        vg_state_key(name),
        vg_node_key(name),
        vg_ipaddr_key(name),
        vg_netmask_key(name),
        vg_nic_key(name),
        vg_autofailover_key(name),
        vg_enabled_key(name),
        vg_volumelist_key(name),
    ]
}

pub fn node_name_key(host: &str) -> String {
    format!("NODENAME:{}", host)
}

pub fn node_state_key(host: &str) -> String {
    format!("NODESTATE:{}", host)
}

pub fn node_hb_key(host: &str) -> String {
    format!("NODEHB:{}", host)
}

// -- value encoding ---------------------------------------------------------

pub fn encode_bool(b: bool) -> &'static str {
    if b {
        "true"
    } else {
        "false"
    }
}

pub fn parse_bool(s: &str) -> Option<bool> {
    match s {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    }
}

pub fn encode_hb(t: UtcTime) -> String {
    t.timestamp_nanos().to_string()
}

pub fn parse_hb(s: &str) -> Option<UtcTime> {
    s.parse::<i64>().ok().map(UtcTime::from_timestamp_nanos)
}

// -- key decoding -----------------------------------------------------------

/// The field a volume group key addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VgField {
    Name,
    State,
    Node,
    IpAddr,
    Netmask,
    Nic,
    AutoFailover,
    Enabled,
    VolumeList,
}

/// The field a node key addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeField {
    Name,
    State,
    Hb,
}

/// Split a raw volume group key into its field and entity name.
pub fn split_vg_key(key: &str) -> Option<(VgField, &str)> {
    const FIELDS: [(&str, VgField); 9] = [
        ("VGNAME:", VgField::Name),
        ("VGSTATE:", VgField::State),
        ("VGNODE:", VgField::Node),
        ("VGIPADDR:", VgField::IpAddr),
        ("VGNETMASK:", VgField::Netmask),
        ("VGNIC:", VgField::Nic),
        ("VGAUTOFAILOVER:", VgField::AutoFailover),
        ("VGENABLED:", VgField::Enabled),
        ("VGVOLUMELIST:", VgField::VolumeList),
    ];
    for (prefix, field) in FIELDS {
        if let Some(name) = key.strip_prefix(prefix) {
            return Some((field, name));
        }
    }
    None
}

/// Split a raw node key into its field and host name.
pub fn split_node_key(key: &str) -> Option<(NodeField, &str)> {
    const FIELDS: [(&str, NodeField); 3] = [
        ("NODENAME:", NodeField::Name),
        ("NODESTATE:", NodeField::State),
        ("NODEHB:", NodeField::Hb),
    ];
    for (prefix, field) in FIELDS {
        if let Some(host) = key.strip_prefix(prefix) {
            return Some((field, host));
        }
    }
    None
}

// -- record decoding --------------------------------------------------------

#[derive(Default)]
struct PartialVg {
    name: Option<String>,
    state: Option<VgState>,
    node: Option<String>,
    ip_addr: Option<String>,
    netmask: Option<String>,
    nic: Option<String>,
    auto_failover: Option<bool>,
    enabled: Option<bool>,
    volume_list: Option<String>,
}

impl PartialVg {
    fn complete(self) -> Option<VgRecord> {
        Some(VgRecord {
            name: self.name?,
            state: self.state?,
            node: self.node?,
            ip_addr: self.ip_addr?,
            netmask: self.netmask?,
            nic: self.nic?,
            auto_failover: self.auto_failover?,
            enabled: self.enabled?,
            volume_list: self.volume_list?,
        })
    }
}

/// Group a `VG` prefix read into one record per volume group.
///
/// A group missing any of its nine fields is mid-create or mid-delete and
/// is treated as absent.
pub fn decode_vg_records(kvs: &[KeyValue]) -> BTreeMap<String, VgRecord> {
    let mut partial: BTreeMap<String, PartialVg> = BTreeMap::new();
    for kv in kvs {
        let Some((field, name)) = split_vg_key(&kv.key) else {
            continue;
        };
        let entry = partial.entry(name.to_string()).or_default();
        let value = kv.value.as_str();
        match field {
            VgField::Name => entry.name = Some(value.to_string()),
            VgField::State => match VgState::from_str(value) {
                Ok(s) => entry.state = Some(s),
                Err(_) => {
                    warn!(vg = name, value, "dropping vg with unparseable state");
                }
            },
            VgField::Node => entry.node = Some(value.to_string()),
            VgField::IpAddr => entry.ip_addr = Some(value.to_string()),
            VgField::Netmask => entry.netmask = Some(value.to_string()),
            VgField::Nic => entry.nic = Some(value.to_string()),
            VgField::AutoFailover => entry.auto_failover = parse_bool(value),
            VgField::Enabled => entry.enabled = parse_bool(value),
            VgField::VolumeList => entry.volume_list = Some(value.to_string()),
        }
    }
    partial
        .into_iter()
        .filter_map(|(name, p)| p.complete().map(|r| (name, r)))
        .collect()
}

/// Group a `NODE` prefix read into one record per host.
///
/// STATE and NAME are required; a missing heartbeat key decodes as the
/// epoch, which always reads as past the dead threshold.
pub fn decode_node_records(kvs: &[KeyValue]) -> BTreeMap<String, NodeRecord> {
    #[derive(Default)]
    struct PartialNode {
        name: Option<String>,
        state: Option<NodeState>,
        hb: Option<UtcTime>,
        hb_version: i64,
    }

    let mut partial: BTreeMap<String, PartialNode> = BTreeMap::new();
    for kv in kvs {
        let Some((field, host)) = split_node_key(&kv.key) else {
            continue;
        };
        let entry = partial.entry(host.to_string()).or_default();
        match field {
            NodeField::Name => entry.name = Some(kv.value.clone()),
            NodeField::State => match NodeState::from_str(&kv.value) {
                Ok(s) => entry.state = Some(s),
                Err(_) => {
                    warn!(host, value = %kv.value, "dropping node with unparseable state");
                }
            },
            NodeField::Hb => {
                entry.hb = parse_hb(&kv.value);
                entry.hb_version = kv.version;
            }
        }
    }
    partial
        .into_iter()
        .filter_map(|(host, p)| {
            let state = p.state?;
            p.name.as_ref()?;
            Some((
                host.clone(),
                NodeRecord {
                    host,
                    state,
                    hb: p.hb.unwrap_or_else(UtcTime::epoch),
                    hb_version: p.hb_version,
                },
            ))
        })
        .collect()
}
