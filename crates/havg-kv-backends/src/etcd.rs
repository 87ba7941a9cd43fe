//! etcd-backed coordination store.
//!
//! Maps the [`KvStore`] contract onto an etcd cluster via `etcd-client`.
//! The keyspace written here is exactly the keyspace the rest of the system
//! describes, so it interoperates with any other tooling pointed at the
//! same etcd prefix.

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tracing::warn;

use etcd_client::{
    Client, Compare as EtcdCompare, CompareOp as EtcdCompareOp, ConnectOptions, EventType as
    EtcdEventType, GetOptions, PutOptions, Txn, TxnOp as EtcdTxnOp, WatchOptions,
};

use havg_kv::{
    Compare, CompareOp, CompareTarget, EventType, KeyValue, KvStore, LeaseId, PrefixResponse,
    Revision, TxnOp, TxnResponse, WatchBatch, WatchEvent, WatchStream,
};
use havg_types::{make_error, make_error_msg, Duration, KvCode, Result, Status};

/// [`KvStore`] implementation backed by etcd. Cheap to clone.
#[derive(Clone)]
pub struct EtcdStore {
    client: Client,
}

impl EtcdStore {
    /// Connect to the given endpoints, bounding dial and per-request time.
    pub async fn connect(endpoints: &[String], timeout: Duration) -> Result<Self> {
        let timeout: std::time::Duration = timeout.into();
        let options = ConnectOptions::new()
            .with_connect_timeout(timeout)
            .with_timeout(timeout);
        let client = Client::connect(endpoints, Some(options))
            .await
            .map_err(map_err)?;
        Ok(Self { client })
    }
}

fn map_err(err: etcd_client::Error) -> Status {
    Status::with_message(KvCode::UNAVAILABLE, err.to_string())
}

fn map_compare(cmp: Compare) -> EtcdCompare {
    let op = match cmp.op {
        CompareOp::Equal => EtcdCompareOp::Equal,
        CompareOp::NotEqual => EtcdCompareOp::NotEqual,
        CompareOp::Greater => EtcdCompareOp::Greater,
        CompareOp::Less => EtcdCompareOp::Less,
    };
    match cmp.target {
        CompareTarget::Value(v) => EtcdCompare::value(cmp.key, op, v),
        CompareTarget::Version(v) => EtcdCompare::version(cmp.key, op, v),
    }
}

fn map_op(op: TxnOp) -> EtcdTxnOp {
    match op {
        TxnOp::Put { key, value, lease } => {
            let options = lease.map(|id| PutOptions::new().with_lease(id));
            EtcdTxnOp::put(key, value, options)
        }
        TxnOp::Delete { key } => EtcdTxnOp::delete(key, None),
    }
}

fn map_kv(kv: &etcd_client::KeyValue) -> KeyValue {
    KeyValue {
        key: String::from_utf8_lossy(kv.key()).into_owned(),
        value: String::from_utf8_lossy(kv.value()).into_owned(),
        create_revision: kv.create_revision(),
        mod_revision: kv.mod_revision(),
        version: kv.version(),
    }
}

#[async_trait]
impl KvStore for EtcdStore {
    async fn get_prefix(&self, prefix: &str, at: Option<Revision>) -> Result<PrefixResponse> {
        let mut client = self.client.clone();
        let mut options = GetOptions::new().with_prefix();
        if let Some(rev) = at {
            options = options.with_revision(rev);
        }
        let resp = client
            .get(prefix, Some(options))
            .await
            .map_err(map_err)?;
        let revision = resp.header().map(|h| h.revision()).unwrap_or(0);
        Ok(PrefixResponse {
            kvs: resp.kvs().iter().map(map_kv).collect(),
            revision,
        })
    }

    async fn txn(
        &self,
        compares: Vec<Compare>,
        then_ops: Vec<TxnOp>,
        else_ops: Vec<TxnOp>,
    ) -> Result<TxnResponse> {
        let mut client = self.client.clone();
        let txn = Txn::new()
            .when(
                compares
                    .into_iter()
                    .map(map_compare)
                    .collect::<Vec<_>>(),
            )
            .and_then(then_ops.into_iter().map(map_op).collect::<Vec<_>>())
            .or_else(else_ops.into_iter().map(map_op).collect::<Vec<_>>());
        let resp = client.txn(txn).await.map_err(map_err)?;
        let revision = resp.header().map(|h| h.revision()).unwrap_or(0);
        Ok(TxnResponse {
            succeeded: resp.succeeded(),
            revision,
        })
    }

    async fn watch_prefix(&self, prefix: &str, from: Revision) -> Result<WatchStream> {
        let mut client = self.client.clone();
        let options = WatchOptions::new()
            .with_prefix()
            .with_start_revision(from + 1)
            .with_prev_key();
        let (mut watcher, mut stream) = client
            .watch(prefix, Some(options))
            .await
            .map_err(map_err)?;

        let (tx, rx) = mpsc::unbounded_channel();
        let (cancel_tx, mut cancel_rx) = oneshot::channel::<()>();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut cancel_rx => {
                        let _ = watcher.cancel().await;
                        break;
                    }
                    msg = stream.message() => {
                        let resp = match msg {
                            Ok(Some(resp)) => resp,
                            Ok(None) => break,
                            Err(err) => {
                                warn!(error = %err, "watch stream failed");
                                break;
                            }
                        };
                        if resp.canceled() {
                            break;
                        }
                        // One etcd response may span several commits; split
                        // it so every delivered batch is one revision.
                        let mut batch: Option<WatchBatch> = None;
                        let mut closed = false;
                        for event in resp.events() {
                            let Some(kv) = event.kv() else { continue };
                            let ev = WatchEvent {
                                event_type: match event.event_type() {
                                    EtcdEventType::Put => EventType::Put,
                                    EtcdEventType::Delete => EventType::Delete,
                                },
                                kv: map_kv(kv),
                                prev_value: event
                                    .prev_kv()
                                    .map(|p| String::from_utf8_lossy(p.value()).into_owned()),
                            };
                            let rev = ev.kv.mod_revision;
                            match batch.as_mut() {
                                Some(b) if b.revision == rev => b.events.push(ev),
                                _ => {
                                    if let Some(done) = batch.take() {
                                        if tx.send(done).is_err() {
                                            closed = true;
                                            break;
                                        }
                                    }
                                    batch = Some(WatchBatch {
                                        revision: rev,
                                        events: vec![ev],
                                    });
                                }
                            }
                        }
                        if closed {
                            break;
                        }
                        if let Some(done) = batch.take() {
                            if tx.send(done).is_err() {
                                break;
                            }
                        }
                    }
                }
            }
        });

        Ok(WatchStream::new(rx, cancel_tx))
    }

    async fn lease_grant(&self, ttl: Duration) -> Result<LeaseId> {
        let mut client = self.client.clone();
        // etcd leases are second-granular; round up so short ttls survive.
        let secs = ttl.as_secs().max(1) as i64;
        let resp = client.lease_grant(secs, None).await.map_err(map_err)?;
        Ok(resp.id())
    }

    async fn lease_keep_alive(&self, lease: LeaseId) -> Result<()> {
        let mut client = self.client.clone();
        let (mut keeper, mut stream) = client
            .lease_keep_alive(lease)
            .await
            .map_err(map_err)?;
        keeper.keep_alive().await.map_err(map_err)?;
        match stream.message().await.map_err(map_err)? {
            Some(resp) if resp.ttl() > 0 => Ok(()),
            Some(_) => make_error(KvCode::LEASE_EXPIRED),
            None => make_error_msg(KvCode::LEASE_EXPIRED, "keep-alive stream closed"),
        }
    }

    async fn lease_revoke(&self, lease: LeaseId) -> Result<()> {
        let mut client = self.client.clone();
        client.lease_revoke(lease).await.map_err(map_err)?;
        Ok(())
    }
}
