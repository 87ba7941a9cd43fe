//! Test support: recording actuators and store observation helpers.
//!
//! Nothing here is part of the coordination contract; it exists so the
//! test suites can watch convergence without reaching into internals.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use havg_kv::{EventType, KvStore};
use havg_types::{make_error_msg, Result, StatusCode, VgCode};

use crate::keyspace::{split_vg_key, VgField, VG_PREFIX};
use crate::script::{Actuator, UpDown};
use crate::state::{NodeState, VgState};

/// One recorded actuation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActuationCall {
    pub op: UpDown,
    pub vg: String,
    pub ip_addr: String,
    pub netmask: String,
    pub nic: String,
}

/// An [`Actuator`] that records every invocation and can be told to fail
/// ups or downs.
#[derive(Default)]
pub struct RecordingActuator {
    calls: Mutex<Vec<ActuationCall>>,
    fail_ups: AtomicBool,
    fail_downs: AtomicBool,
}

impl RecordingActuator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_ups(&self, fail: bool) {
        self.fail_ups.store(fail, Ordering::SeqCst);
    }

    pub fn fail_downs(&self, fail: bool) {
        self.fail_downs.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<ActuationCall> {
        self.calls.lock().clone()
    }

    /// Number of recorded up invocations for one group.
    pub fn ups(&self, vg: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.op == UpDown::Up && c.vg == vg)
            .count()
    }

    /// Number of recorded down invocations for one group.
    pub fn downs(&self, vg: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.op == UpDown::Down && c.vg == vg)
            .count()
    }
}

#[async_trait]
impl Actuator for RecordingActuator {
    async fn run(
        &self,
        op: UpDown,
        vg: &str,
        ip_addr: &str,
        netmask: &str,
        nic: &str,
    ) -> Result<()> {
        self.calls.lock().push(ActuationCall {
            op,
            vg: vg.to_string(),
            ip_addr: ip_addr.to_string(),
            netmask: netmask.to_string(),
            nic: nic.to_string(),
        });
        let fail = match op {
            UpDown::Up => self.fail_ups.load(Ordering::SeqCst),
            UpDown::Down => self.fail_downs.load(Ordering::SeqCst),
        };
        if fail {
            make_error_msg(VgCode::ACTUATION_FAILED, format!("forced {} failure", op))
        } else {
            Ok(())
        }
    }
}

/// A change to a volume group as seen through the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VgChange {
    pub name: String,
    pub state: Option<VgState>,
    pub node: Option<String>,
    pub deleted: bool,
}

/// Watches the `VG` prefix and emits one [`VgChange`] per STATE or NODE
/// key event.
pub struct VgTap {
    rx: mpsc::UnboundedReceiver<VgChange>,
}

impl VgTap {
    pub async fn start(store: Arc<dyn KvStore>) -> Result<Self> {
        let mut stream = store.watch_prefix(VG_PREFIX, 0).await?;
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Some(batch) = stream.recv().await {
                for ev in batch.events {
                    let Some((field, name)) = split_vg_key(&ev.kv.key) else {
                        continue;
                    };
                    let change = match (field, ev.event_type) {
                        (VgField::State, EventType::Delete) => VgChange {
                            name: name.to_string(),
                            state: None,
                            node: None,
                            deleted: true,
                        },
                        (VgField::State, EventType::Put) => VgChange {
                            name: name.to_string(),
                            state: ev.kv.value.parse().ok(),
                            node: None,
                            deleted: false,
                        },
                        (VgField::Node, EventType::Put) => VgChange {
                            name: name.to_string(),
                            state: None,
                            node: Some(ev.kv.value.clone()),
                            deleted: false,
                        },
                        _ => continue,
                    };
                    if tx.send(change).is_err() {
                        return;
                    }
                }
            }
        });
        Ok(Self { rx })
    }

    pub async fn next(&mut self) -> Option<VgChange> {
        self.rx.recv().await
    }

    /// Block until the named group reaches `state`, or the deadline passes.
    pub async fn wait_for_state(
        &mut self,
        name: &str,
        state: VgState,
        deadline: std::time::Duration,
    ) -> Result<()> {
        let wait = async {
            while let Some(change) = self.next().await {
                if change.name == name && change.state == Some(state) {
                    return Ok(());
                }
            }
            make_error_msg(StatusCode::INTERRUPTED, "vg tap closed")
        };
        match tokio::time::timeout(deadline, wait).await {
            Ok(result) => result,
            Err(_) => make_error_msg(
                StatusCode::INTERRUPTED,
                format!("{} did not reach {} within {:?}", name, state, deadline),
            ),
        }
    }
}

/// Poll the store until the named group reaches `state`; returns the record.
pub async fn wait_for_vg_state(
    store: &Arc<dyn KvStore>,
    name: &str,
    state: VgState,
    deadline: std::time::Duration,
) -> Result<crate::state::VgRecord> {
    let start = std::time::Instant::now();
    loop {
        let resp = store.get_prefix(VG_PREFIX, None).await?;
        let records = crate::keyspace::decode_vg_records(&resp.kvs);
        if let Some(rec) = records.get(name) {
            if rec.state == state {
                return Ok(rec.clone());
            }
        }
        if start.elapsed() > deadline {
            let seen = records.get(name).map(|r| r.state.as_str()).unwrap_or("absent");
            return make_error_msg(
                StatusCode::INTERRUPTED,
                format!("{} is {} after {:?}, wanted {}", name, seen, deadline, state),
            );
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
}

/// Poll the store until the named node reaches `state`.
pub async fn wait_for_node_state(
    store: &Arc<dyn KvStore>,
    host: &str,
    state: NodeState,
    deadline: std::time::Duration,
) -> Result<()> {
    let start = std::time::Instant::now();
    loop {
        let resp = store
            .get_prefix(crate::keyspace::NODE_PREFIX, None)
            .await?;
        let records = crate::keyspace::decode_node_records(&resp.kvs);
        if records.get(host).map(|r| r.state) == Some(state) {
            return Ok(());
        }
        if start.elapsed() > deadline {
            let seen = records
                .get(host)
                .map(|r| r.state.as_str())
                .unwrap_or("absent");
            return make_error_msg(
                StatusCode::INTERRUPTED,
                format!("{} is {} after {:?}, wanted {}", host, seen, deadline, state),
            );
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use havg_kv::TxnOp;
    use havg_kv_backends::MemKvStore;

    use crate::keyspace::{vg_node_key, vg_state_key};

    #[tokio::test]
    async fn test_recording_actuator_counts_and_failures() {
        let act = RecordingActuator::new();
        act.run(UpDown::Up, "vg0", "10.0.0.1", "255.255.255.0", "eth0")
            .await
            .unwrap();
        act.run(UpDown::Down, "vg0", "10.0.0.1", "255.255.255.0", "eth0")
            .await
            .unwrap();
        assert_eq!(act.ups("vg0"), 1);
        assert_eq!(act.downs("vg0"), 1);
        assert_eq!(act.ups("other"), 0);

        act.fail_ups(true);
        let err = act
            .run(UpDown::Up, "vg0", "10.0.0.1", "255.255.255.0", "eth0")
            .await
            .unwrap_err();
        assert_eq!(err.code(), VgCode::ACTUATION_FAILED);
        assert_eq!(act.ups("vg0"), 2);
    }

    #[tokio::test]
    async fn test_vg_tap_sees_state_changes() {
        let store = MemKvStore::new();
        let arc: Arc<dyn KvStore> = Arc::new(store.clone());
        let mut tap = VgTap::start(Arc::clone(&arc)).await.unwrap();

        store
            .txn(
                vec![],
                vec![
                    TxnOp::put(vg_state_key("a"), "ONLINING"),
                    TxnOp::put(vg_node_key("a"), "h1"),
                ],
                vec![],
            )
            .await
            .unwrap();

        tap.wait_for_state("a", VgState::Onlining, std::time::Duration::from_secs(2))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_wait_for_vg_state_times_out() {
        let store = MemKvStore::new();
        let arc: Arc<dyn KvStore> = Arc::new(store);
        let err = wait_for_vg_state(
            &arc,
            "ghost",
            VgState::Online,
            std::time::Duration::from_millis(100),
        )
        .await
        .unwrap_err();
        assert_eq!(err.code(), StatusCode::INTERRUPTED);
    }
}
