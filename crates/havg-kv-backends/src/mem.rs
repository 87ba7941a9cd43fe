//! In-memory coordination store.
//!
//! Implements the full [`KvStore`] contract: per-key create/mod revisions
//! and version counters, a global revision incremented per committed
//! transaction, bounded multi-version history for revision-pinned prefix
//! reads, prefix watchers fed one batch per commit, and TTL leases whose
//! keys are deleted through the normal commit path so watchers observe the
//! deletes.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};

use havg_kv::{
    Compare, CompareOp, CompareTarget, EventType, KeyValue, KvStore, LeaseId, PrefixResponse,
    Revision, TxnOp, TxnResponse, WatchBatch, WatchEvent, WatchStream,
};
use havg_types::{make_error, make_error_msg, Duration, KvCode, Result};

/// Revisions of history retained for pinned reads and watch resumption.
const HISTORY_LIMIT: usize = 1024;

/// How often the sweeper checks for expired leases.
const SWEEP_INTERVAL: std::time::Duration = std::time::Duration::from_millis(25);

#[derive(Debug, Clone)]
struct Stored {
    value: String,
    create_revision: Revision,
    mod_revision: Revision,
    version: i64,
    lease: Option<LeaseId>,
}

struct Lease {
    ttl: std::time::Duration,
    expires_at: Instant,
    keys: HashSet<String>,
}

struct Watcher {
    id: u64,
    prefix: String,
    tx: mpsc::UnboundedSender<WatchBatch>,
}

#[derive(Default)]
struct State {
    data: BTreeMap<String, Stored>,
    revision: Revision,
    /// Post-commit snapshots, oldest first. Entry 0 of a fresh store is
    /// (0, empty map).
    history: VecDeque<(Revision, BTreeMap<String, Stored>)>,
    /// Per-commit event batches kept for watch replay, oldest first.
    event_log: VecDeque<WatchBatch>,
    watchers: Vec<Watcher>,
    next_watcher_id: u64,
    leases: HashMap<LeaseId, Lease>,
    next_lease_id: LeaseId,
}

/// In-memory [`KvStore`]. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct MemKvStore {
    inner: Arc<Mutex<State>>,
    sweeper_started: Arc<AtomicBool>,
}

impl MemKvStore {
    pub fn new() -> Self {
        let mut state = State::default();
        state.history.push_back((0, BTreeMap::new()));
        state.next_lease_id = 1;
        Self {
            inner: Arc::new(Mutex::new(state)),
            sweeper_started: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Current commit revision.
    pub fn current_revision(&self) -> Revision {
        self.inner.lock().revision
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        self.inner.lock().data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().data.is_empty()
    }

    /// Apply mutations as one commit: bump the revision, record history,
    /// and fan the resulting batch out to matching watchers.
    fn commit(state: &mut State, ops: &[TxnOp]) -> Revision {
        if ops.is_empty() {
            return state.revision;
        }
        let rev = state.revision + 1;
        state.revision = rev;

        let mut events = Vec::with_capacity(ops.len());
        for op in ops {
            match op {
                TxnOp::Put { key, value, lease } => {
                    let prev = state.data.get(key).cloned();
                    // Re-attaching a key to a different lease detaches it
                    // from the old one.
                    if let Some(old) = prev.as_ref().and_then(|s| s.lease) {
                        if *lease != Some(old) {
                            if let Some(l) = state.leases.get_mut(&old) {
                                l.keys.remove(key);
                            }
                        }
                    }
                    if let Some(id) = lease {
                        if let Some(l) = state.leases.get_mut(id) {
                            l.keys.insert(key.clone());
                        }
                    }
                    let stored = Stored {
                        value: value.clone(),
                        create_revision: prev
                            .as_ref()
                            .map(|s| s.create_revision)
                            .unwrap_or(rev),
                        mod_revision: rev,
                        version: prev.as_ref().map(|s| s.version + 1).unwrap_or(1),
                        lease: *lease,
                    };
                    events.push(WatchEvent {
                        event_type: EventType::Put,
                        kv: KeyValue {
                            key: key.clone(),
                            value: stored.value.clone(),
                            create_revision: stored.create_revision,
                            mod_revision: stored.mod_revision,
                            version: stored.version,
                        },
                        prev_value: prev.map(|s| s.value),
                    });
                    state.data.insert(key.clone(), stored);
                }
                TxnOp::Delete { key } => {
                    let Some(prev) = state.data.remove(key) else {
                        continue;
                    };
                    if let Some(id) = prev.lease {
                        if let Some(l) = state.leases.get_mut(&id) {
                            l.keys.remove(key);
                        }
                    }
                    events.push(WatchEvent {
                        event_type: EventType::Delete,
                        kv: KeyValue {
                            key: key.clone(),
                            value: String::new(),
                            create_revision: prev.create_revision,
                            mod_revision: rev,
                            version: 0,
                        },
                        prev_value: Some(prev.value),
                    });
                }
            }
        }

        state.history.push_back((rev, state.data.clone()));
        if state.history.len() > HISTORY_LIMIT {
            state.history.pop_front();
        }

        let batch = WatchBatch {
            revision: rev,
            events,
        };
        state.event_log.push_back(batch.clone());
        if state.event_log.len() > HISTORY_LIMIT {
            state.event_log.pop_front();
        }

        // Watchers whose receiver went away are dropped here.
        state.watchers.retain(|w| {
            let matching: Vec<WatchEvent> = batch
                .events
                .iter()
                .filter(|e| e.kv.key.starts_with(&w.prefix))
                .cloned()
                .collect();
            if matching.is_empty() {
                return true;
            }
            w.tx
                .send(WatchBatch {
                    revision: batch.revision,
                    events: matching,
                })
                .is_ok()
        });

        rev
    }

    fn eval_compare(state: &State, cmp: &Compare) -> bool {
        let entry = state.data.get(&cmp.key);
        match &cmp.target {
            CompareTarget::Value(want) => {
                let empty = String::new();
                let have = entry.map(|s| &s.value).unwrap_or(&empty);
                match cmp.op {
                    CompareOp::Equal => have == want,
                    CompareOp::NotEqual => have != want,
                    CompareOp::Greater => have > want,
                    CompareOp::Less => have < want,
                }
            }
            CompareTarget::Version(want) => {
                let have = entry.map(|s| s.version).unwrap_or(0);
                match cmp.op {
                    CompareOp::Equal => have == *want,
                    CompareOp::NotEqual => have != *want,
                    CompareOp::Greater => have > *want,
                    CompareOp::Less => have < *want,
                }
            }
        }
    }

    /// Expire due leases, deleting their keys through the commit path.
    fn sweep_expired(inner: &Arc<Mutex<State>>) {
        let mut state = inner.lock();
        let now = Instant::now();
        let expired: Vec<LeaseId> = state
            .leases
            .iter()
            .filter(|(_, l)| l.expires_at <= now)
            .map(|(id, _)| *id)
            .collect();
        for id in expired {
            let Some(lease) = state.leases.remove(&id) else {
                continue;
            };
            let ops: Vec<TxnOp> = lease.keys.iter().map(TxnOp::delete).collect();
            Self::commit(&mut state, &ops);
        }
    }

    fn ensure_sweeper(&self) {
        if self.sweeper_started.swap(true, Ordering::SeqCst) {
            return;
        }
        let weak: Weak<Mutex<State>> = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(SWEEP_INTERVAL);
            loop {
                tick.tick().await;
                let Some(inner) = weak.upgrade() else { break };
                Self::sweep_expired(&inner);
            }
        });
    }
}

impl Default for MemKvStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KvStore for MemKvStore {
    async fn get_prefix(&self, prefix: &str, at: Option<Revision>) -> Result<PrefixResponse> {
        let state = self.inner.lock();
        let (rev, map) = match at {
            None => (state.revision, &state.data),
            Some(rev) if rev == state.revision => (rev, &state.data),
            Some(rev) => {
                let Some((r, map)) = state.history.iter().rev().find(|(r, _)| *r <= rev) else {
                    return make_error_msg(
                        KvCode::COMPACTED,
                        format!("revision {} is older than retained history", rev),
                    );
                };
                // The snapshot at the highest revision <= `rev` is exactly
                // the state at `rev`: commits are the only revision bumps.
                (*r, map)
            }
        };
        let kvs = map
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, s)| KeyValue {
                key: k.clone(),
                value: s.value.clone(),
                create_revision: s.create_revision,
                mod_revision: s.mod_revision,
                version: s.version,
            })
            .collect();
        Ok(PrefixResponse {
            kvs,
            revision: rev,
        })
    }

    async fn txn(
        &self,
        compares: Vec<Compare>,
        then_ops: Vec<TxnOp>,
        else_ops: Vec<TxnOp>,
    ) -> Result<TxnResponse> {
        let mut state = self.inner.lock();
        let succeeded = compares.iter().all(|c| Self::eval_compare(&state, c));
        let ops = if succeeded { &then_ops } else { &else_ops };
        // Reject puts against unknown leases before mutating anything.
        for op in ops {
            if let TxnOp::Put {
                lease: Some(id), ..
            } = op
            {
                if !state.leases.contains_key(id) {
                    return make_error_msg(KvCode::LEASE_NOT_FOUND, format!("lease {}", id));
                }
            }
        }
        let revision = Self::commit(&mut state, ops);
        Ok(TxnResponse {
            succeeded,
            revision,
        })
    }

    async fn watch_prefix(&self, prefix: &str, from: Revision) -> Result<WatchStream> {
        let (tx, rx) = mpsc::unbounded_channel();
        let (cancel_tx, cancel_rx) = oneshot::channel();
        let id;
        {
            let mut state = self.inner.lock();
            if let Some(oldest) = state.event_log.front() {
                if from < oldest.revision - 1 {
                    return make_error_msg(
                        KvCode::COMPACTED,
                        format!("cannot resume watch from revision {}", from),
                    );
                }
            }
            // Replay history strictly after `from` before going live, all
            // under the lock so no commit can slip between the two.
            for batch in state.event_log.iter().filter(|b| b.revision > from) {
                let matching: Vec<WatchEvent> = batch
                    .events
                    .iter()
                    .filter(|e| e.kv.key.starts_with(prefix))
                    .cloned()
                    .collect();
                if !matching.is_empty() {
                    let _ = tx.send(WatchBatch {
                        revision: batch.revision,
                        events: matching,
                    });
                }
            }
            id = state.next_watcher_id;
            state.next_watcher_id += 1;
            state.watchers.push(Watcher {
                id,
                prefix: prefix.to_string(),
                tx,
            });
        }

        // Eager deregistration on explicit cancel; send failure handles the
        // plain-drop case.
        let weak = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            let _ = cancel_rx.await;
            if let Some(inner) = weak.upgrade() {
                inner.lock().watchers.retain(|w| w.id != id);
            }
        });

        Ok(WatchStream::new(rx, cancel_tx))
    }

    async fn lease_grant(&self, ttl: Duration) -> Result<LeaseId> {
        self.ensure_sweeper();
        let ttl: std::time::Duration = ttl.into();
        if ttl.is_zero() {
            return make_error_msg(havg_types::StatusCode::INVALID_ARG, "zero lease ttl");
        }
        let mut state = self.inner.lock();
        let id = state.next_lease_id;
        state.next_lease_id += 1;
        state.leases.insert(
            id,
            Lease {
                ttl,
                expires_at: Instant::now() + ttl,
                keys: HashSet::new(),
            },
        );
        Ok(id)
    }

    async fn lease_keep_alive(&self, lease: LeaseId) -> Result<()> {
        let mut state = self.inner.lock();
        let now = Instant::now();
        match state.leases.get_mut(&lease) {
            Some(l) if l.expires_at > now => {
                l.expires_at = now + l.ttl;
                Ok(())
            }
            Some(_) => {
                // Expired but not yet swept; the sweeper will delete the keys.
                make_error(KvCode::LEASE_EXPIRED)
            }
            None => make_error(KvCode::LEASE_EXPIRED),
        }
    }

    async fn lease_revoke(&self, lease: LeaseId) -> Result<()> {
        let mut state = self.inner.lock();
        let Some(l) = state.leases.remove(&lease) else {
            return make_error_msg(KvCode::LEASE_NOT_FOUND, format!("lease {}", lease));
        };
        let ops: Vec<TxnOp> = l.keys.iter().map(TxnOp::delete).collect();
        Self::commit(&mut state, &ops);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn put(key: &str, value: &str) -> Vec<TxnOp> {
        vec![TxnOp::put(key, value)]
    }

    async fn must_put(store: &MemKvStore, key: &str, value: &str) -> Revision {
        let resp = store.txn(vec![], put(key, value), vec![]).await.unwrap();
        assert!(resp.succeeded);
        resp.revision
    }

    // -- basic reads and writes --------------------------------------------

    #[tokio::test]
    async fn test_put_and_get_prefix() {
        let store = MemKvStore::new();
        must_put(&store, "VGSTATE:a", "INITIAL").await;
        must_put(&store, "VGSTATE:b", "ONLINE").await;
        must_put(&store, "NODESTATE:h1", "ONLINE").await;

        let resp = store.get_prefix("VGSTATE:", None).await.unwrap();
        assert_eq!(resp.kvs.len(), 2);
        assert_eq!(resp.kvs[0].key, "VGSTATE:a");
        assert_eq!(resp.kvs[0].value, "INITIAL");
        assert_eq!(resp.revision, 3);
    }

    #[tokio::test]
    async fn test_version_and_revisions_track_writes() {
        let store = MemKvStore::new();
        let r1 = must_put(&store, "k", "v1").await;
        let r2 = must_put(&store, "k", "v2").await;
        assert!(r2 > r1);

        let resp = store.get_prefix("k", None).await.unwrap();
        let kv = &resp.kvs[0];
        assert_eq!(kv.create_revision, r1);
        assert_eq!(kv.mod_revision, r2);
        assert_eq!(kv.version, 2);
    }

    #[tokio::test]
    async fn test_empty_txn_does_not_bump_revision() {
        let store = MemKvStore::new();
        must_put(&store, "k", "v").await;
        let before = store.current_revision();
        let resp = store.txn(vec![], vec![], vec![]).await.unwrap();
        assert!(resp.succeeded);
        assert_eq!(resp.revision, before);
        assert_eq!(store.current_revision(), before);
    }

    // -- revision-pinned reads ---------------------------------------------

    #[tokio::test]
    async fn test_get_prefix_at_revision() {
        let store = MemKvStore::new();
        let r1 = must_put(&store, "k", "old").await;
        must_put(&store, "k", "new").await;

        let resp = store.get_prefix("k", Some(r1)).await.unwrap();
        assert_eq!(resp.kvs[0].value, "old");
        assert_eq!(resp.revision, r1);

        let resp = store.get_prefix("k", None).await.unwrap();
        assert_eq!(resp.kvs[0].value, "new");
    }

    #[tokio::test]
    async fn test_get_prefix_at_revision_between_commits() {
        let store = MemKvStore::new();
        must_put(&store, "a", "1").await;
        let r2 = must_put(&store, "b", "2").await;
        must_put(&store, "c", "3").await;

        // A revision with no commit of its own resolves to the nearest
        // earlier snapshot.
        let resp = store.get_prefix("", Some(r2)).await.unwrap();
        assert_eq!(resp.kvs.len(), 2);
    }

    // -- transactions ------------------------------------------------------

    #[tokio::test]
    async fn test_txn_value_compare() {
        let store = MemKvStore::new();
        must_put(&store, "state", "INITIAL").await;

        let resp = store
            .txn(
                vec![Compare::value("state", CompareOp::Equal, "INITIAL")],
                put("state", "ONLINING"),
                vec![],
            )
            .await
            .unwrap();
        assert!(resp.succeeded);

        // Same predicate no longer holds.
        let resp = store
            .txn(
                vec![Compare::value("state", CompareOp::Equal, "INITIAL")],
                put("state", "ONLINING"),
                vec![],
            )
            .await
            .unwrap();
        assert!(!resp.succeeded);
    }

    #[tokio::test]
    async fn test_txn_version_compare_absent_key() {
        let store = MemKvStore::new();
        // Absent key has version 0: create-if-absent predicate.
        let resp = store
            .txn(
                vec![Compare::version("new", CompareOp::Equal, 0)],
                put("new", "x"),
                vec![],
            )
            .await
            .unwrap();
        assert!(resp.succeeded);

        let resp = store
            .txn(
                vec![Compare::version("new", CompareOp::Equal, 0)],
                put("new", "y"),
                vec![],
            )
            .await
            .unwrap();
        assert!(!resp.succeeded);
        let kv = store.get_prefix("new", None).await.unwrap();
        assert_eq!(kv.kvs[0].value, "x");
    }

    #[tokio::test]
    async fn test_txn_else_branch_applies() {
        let store = MemKvStore::new();
        let resp = store
            .txn(
                vec![Compare::value("missing", CompareOp::Equal, "something")],
                put("then", "t"),
                put("else", "e"),
            )
            .await
            .unwrap();
        assert!(!resp.succeeded);
        assert!(store.get_prefix("then", None).await.unwrap().kvs.is_empty());
        assert_eq!(store.get_prefix("else", None).await.unwrap().kvs.len(), 1);
    }

    #[tokio::test]
    async fn test_txn_multi_key_atomicity() {
        let store = MemKvStore::new();
        let resp = store
            .txn(
                vec![],
                vec![TxnOp::put("a", "1"), TxnOp::put("b", "2"), TxnOp::put("c", "3")],
                vec![],
            )
            .await
            .unwrap();
        assert!(resp.succeeded);

        // One commit, one revision for all three keys.
        let all = store.get_prefix("", None).await.unwrap();
        assert_eq!(all.kvs.len(), 3);
        assert!(all.kvs.iter().all(|kv| kv.mod_revision == resp.revision));
    }

    #[tokio::test]
    async fn test_txn_delete() {
        let store = MemKvStore::new();
        must_put(&store, "gone", "v").await;
        let resp = store
            .txn(
                vec![Compare::version("gone", CompareOp::NotEqual, 0)],
                vec![TxnOp::delete("gone")],
                vec![],
            )
            .await
            .unwrap();
        assert!(resp.succeeded);
        assert!(store.is_empty());
    }

    // -- watches -----------------------------------------------------------

    #[tokio::test]
    async fn test_watch_delivers_commit_batches() {
        let store = MemKvStore::new();
        let mut watch = store.watch_prefix("VG", 0).await.unwrap();

        store
            .txn(
                vec![],
                vec![TxnOp::put("VGSTATE:a", "INITIAL"), TxnOp::put("VGNODE:a", "")],
                vec![],
            )
            .await
            .unwrap();

        let batch = watch.recv().await.unwrap();
        assert_eq!(batch.events.len(), 2);
        assert_eq!(batch.revision, 1);
        assert!(batch.events.iter().all(|e| e.event_type == EventType::Put));
    }

    #[tokio::test]
    async fn test_watch_prefix_filtering() {
        let store = MemKvStore::new();
        let mut watch = store.watch_prefix("NODE", 0).await.unwrap();

        must_put(&store, "VGSTATE:a", "INITIAL").await;
        must_put(&store, "NODESTATE:h1", "STARTING").await;

        let batch = watch.recv().await.unwrap();
        assert_eq!(batch.events.len(), 1);
        assert_eq!(batch.events[0].kv.key, "NODESTATE:h1");
    }

    #[tokio::test]
    async fn test_watch_replays_from_revision() {
        let store = MemKvStore::new();
        let r1 = must_put(&store, "VGSTATE:a", "INITIAL").await;
        must_put(&store, "VGSTATE:a", "ONLINING").await;

        // Start strictly after r1: only the second commit is replayed.
        let mut watch = store.watch_prefix("VG", r1).await.unwrap();
        let batch = watch.recv().await.unwrap();
        assert_eq!(batch.events[0].kv.value, "ONLINING");
        assert_eq!(batch.events[0].prev_value.as_deref(), Some("INITIAL"));
    }

    #[tokio::test]
    async fn test_watch_delete_event_carries_prev_value() {
        let store = MemKvStore::new();
        must_put(&store, "VGSTATE:a", "OFFLINE").await;
        let mut watch = store.watch_prefix("VG", store.current_revision()).await.unwrap();

        store
            .txn(vec![], vec![TxnOp::delete("VGSTATE:a")], vec![])
            .await
            .unwrap();

        let batch = watch.recv().await.unwrap();
        assert_eq!(batch.events[0].event_type, EventType::Delete);
        assert_eq!(batch.events[0].prev_value.as_deref(), Some("OFFLINE"));
        assert_eq!(batch.events[0].kv.version, 0);
    }

    #[tokio::test]
    async fn test_watch_cancel_detaches() {
        let store = MemKvStore::new();
        let watch = store.watch_prefix("VG", 0).await.unwrap();
        watch.cancel();
        // Give the deregistration task a chance to run.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        must_put(&store, "VGSTATE:a", "INITIAL").await;
        assert_eq!(store.inner.lock().watchers.len(), 0);
    }

    // -- leases ------------------------------------------------------------

    #[tokio::test]
    async fn test_lease_keys_deleted_on_revoke() {
        let store = MemKvStore::new();
        let lease = store.lease_grant(Duration::from_secs(10)).await.unwrap();
        store
            .txn(
                vec![],
                vec![TxnOp::put_with_lease("NODEHB:h1", "12345", lease)],
                vec![],
            )
            .await
            .unwrap();
        assert_eq!(store.len(), 1);

        store.lease_revoke(lease).await.unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_lease_expiry_deletes_keys_and_notifies() {
        let store = MemKvStore::new();
        let lease = store.lease_grant(Duration::from_millis(60)).await.unwrap();
        store
            .txn(
                vec![],
                vec![TxnOp::put_with_lease("NODEHB:h1", "1", lease)],
                vec![],
            )
            .await
            .unwrap();
        let mut watch = store.watch_prefix("NODE", store.current_revision()).await.unwrap();

        // Wait past the ttl plus a sweep cycle.
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        assert!(store.is_empty());

        let batch = watch.recv().await.unwrap();
        assert_eq!(batch.events[0].event_type, EventType::Delete);
        assert_eq!(batch.events[0].kv.key, "NODEHB:h1");

        // The lease is gone.
        let err = store.lease_keep_alive(lease).await.unwrap_err();
        assert_eq!(err.code(), KvCode::LEASE_EXPIRED);
    }

    #[tokio::test]
    async fn test_lease_keep_alive_extends() {
        let store = MemKvStore::new();
        let lease = store.lease_grant(Duration::from_millis(150)).await.unwrap();
        store
            .txn(
                vec![],
                vec![TxnOp::put_with_lease("NODEHB:h1", "1", lease)],
                vec![],
            )
            .await
            .unwrap();

        // Keep refreshing for longer than the original ttl.
        for _ in 0..4 {
            tokio::time::sleep(std::time::Duration::from_millis(75)).await;
            store.lease_keep_alive(lease).await.unwrap();
        }
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_put_with_unknown_lease_fails() {
        let store = MemKvStore::new();
        let err = store
            .txn(vec![], vec![TxnOp::put_with_lease("k", "v", 999)], vec![])
            .await
            .unwrap_err();
        assert_eq!(err.code(), KvCode::LEASE_NOT_FOUND);
        assert!(store.is_empty());
    }

    // -- concurrent CAS races ----------------------------------------------

    #[tokio::test]
    async fn test_concurrent_cas_single_winner() {
        let store = MemKvStore::new();
        must_put(&store, "VGSTATE:c", "INITIAL").await;
        must_put(&store, "VGNODE:c", "").await;

        let mut handles = Vec::new();
        for host in ["h1", "h2", "h3"] {
            let s = store.clone();
            handles.push(tokio::spawn(async move {
                s.txn(
                    vec![
                        Compare::value("VGSTATE:c", CompareOp::Equal, "INITIAL"),
                        Compare::value("VGNODE:c", CompareOp::Equal, ""),
                    ],
                    vec![
                        TxnOp::put("VGSTATE:c", "ONLINING"),
                        TxnOp::put("VGNODE:c", host),
                    ],
                    vec![],
                )
                .await
                .unwrap()
                .succeeded
            }));
        }

        let mut winners = 0;
        for h in handles {
            if h.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);

        let resp = store.get_prefix("VGNODE:c", None).await.unwrap();
        assert!(["h1", "h2", "h3"].contains(&resp.kvs[0].value.as_str()));
    }
}
