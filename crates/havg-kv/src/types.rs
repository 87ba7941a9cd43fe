use tokio::sync::{mpsc, oneshot};

/// Monotonically increasing integer assigned by the store to each committed
/// transaction; defines the global order of state changes.
pub type Revision = i64;

/// Identifier of a store-managed lease.
pub type LeaseId = i64;

/// A key-value pair as observed by a read or carried by a watch event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    pub key: String,
    pub value: String,
    /// Revision at which the key was created.
    pub create_revision: Revision,
    /// Revision of the key's most recent modification.
    pub mod_revision: Revision,
    /// Number of writes to the key since creation; 0 only for absent keys.
    pub version: i64,
}

/// Comparison operator for transaction predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Equal,
    NotEqual,
    Greater,
    Less,
}

/// What a predicate compares: the key's value or its write version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompareTarget {
    Value(String),
    Version(i64),
}

/// A single transaction predicate.
///
/// An absent key compares as the empty string for value predicates and as
/// version 0 for version predicates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Compare {
    pub key: String,
    pub op: CompareOp,
    pub target: CompareTarget,
}

impl Compare {
    pub fn value(key: impl Into<String>, op: CompareOp, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            op,
            target: CompareTarget::Value(value.into()),
        }
    }

    pub fn version(key: impl Into<String>, op: CompareOp, version: i64) -> Self {
        Self {
            key: key.into(),
            op,
            target: CompareTarget::Version(version),
        }
    }
}

/// A write operation inside a transaction branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxnOp {
    Put {
        key: String,
        value: String,
        lease: Option<LeaseId>,
    },
    Delete {
        key: String,
    },
}

impl TxnOp {
    pub fn put(key: impl Into<String>, value: impl Into<String>) -> Self {
        TxnOp::Put {
            key: key.into(),
            value: value.into(),
            lease: None,
        }
    }

    pub fn put_with_lease(key: impl Into<String>, value: impl Into<String>, lease: LeaseId) -> Self {
        TxnOp::Put {
            key: key.into(),
            value: value.into(),
            lease: Some(lease),
        }
    }

    pub fn delete(key: impl Into<String>) -> Self {
        TxnOp::Delete { key: key.into() }
    }
}

/// Outcome of a transaction: which branch applied, and at which revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxnResponse {
    pub succeeded: bool,
    pub revision: Revision,
}

/// Result of a prefix read: every matching pair at one consistent revision.
#[derive(Debug, Clone)]
pub struct PrefixResponse {
    pub kvs: Vec<KeyValue>,
    pub revision: Revision,
}

/// Kind of change carried by a watch event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Put,
    Delete,
}

/// One key change. Deletes carry the key with an empty value; the previous
/// value is present whenever the store still had it.
#[derive(Debug, Clone)]
pub struct WatchEvent {
    pub event_type: EventType,
    pub kv: KeyValue,
    pub prev_value: Option<String>,
}

/// All events of one committed transaction under the watched prefix.
#[derive(Debug, Clone)]
pub struct WatchBatch {
    pub revision: Revision,
    pub events: Vec<WatchEvent>,
}

/// A live prefix watch. Dropping the stream (or calling [`cancel`]) detaches
/// it from the store.
///
/// [`cancel`]: WatchStream::cancel
pub struct WatchStream {
    rx: mpsc::UnboundedReceiver<WatchBatch>,
    cancel: Option<oneshot::Sender<()>>,
}

impl WatchStream {
    /// Assemble a stream from its channel halves; used by backends.
    pub fn new(rx: mpsc::UnboundedReceiver<WatchBatch>, cancel: oneshot::Sender<()>) -> Self {
        Self {
            rx,
            cancel: Some(cancel),
        }
    }

    /// Receive the next batch; `None` once the watch has terminated.
    pub async fn recv(&mut self) -> Option<WatchBatch> {
        self.rx.recv().await
    }

    /// Detach from the store. Buffered batches are dropped.
    pub fn cancel(mut self) {
        if let Some(tx) = self.cancel.take() {
            let _ = tx.send(());
        }
    }
}
