//! Per-key FIFO execution of watch callbacks.
//!
//! Events for the same queue key run strictly one at a time, in arrival
//! order. Events for different keys proceed independently. A failing
//! callback is logged and acknowledged; it never blocks the items behind
//! it. Queues are created on first use and live for the rest of the
//! process.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::bindings::{KubernetesObject, WatchFn, WatchPhase};

/// How watch events are partitioned into serial lanes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ReconcileStrategy {
    /// One lane per kind.
    Kind,
    /// One lane per kind and namespace.
    KindNs,
    /// One lane per individual object.
    #[default]
    KindNsName,
    /// A single lane for everything.
    Global,
}

impl FromStr for ReconcileStrategy {
    type Err = UnknownStrategy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "kind" => Ok(ReconcileStrategy::Kind),
            "kindNs" => Ok(ReconcileStrategy::KindNs),
            "kindNsName" => Ok(ReconcileStrategy::KindNsName),
            "global" => Ok(ReconcileStrategy::Global),
            other => Err(UnknownStrategy(other.to_string())),
        }
    }
}

#[derive(Debug, Error)]
#[error("unknown reconcile strategy '{0}'")]
pub struct UnknownStrategy(String);

/// Compute the serial-lane key for an object. Missing fields map to fixed
/// placeholders so that, for example, all cluster-scoped objects of a kind
/// share one lane under the namespace strategies.
pub fn queue_key(obj: &KubernetesObject, strategy: ReconcileStrategy) -> String {
    let kind = obj.kind.as_deref().unwrap_or("UnknownKind");
    let namespace = obj.metadata.namespace.as_deref().unwrap_or("cluster-scoped");
    let name = obj.metadata.name.as_deref().unwrap_or("Unnamed");
    match strategy {
        ReconcileStrategy::Kind => kind.to_string(),
        ReconcileStrategy::KindNs => format!("{kind}/{namespace}"),
        ReconcileStrategy::KindNsName => format!("{kind}/{namespace}/{name}"),
        ReconcileStrategy::Global => "global".to_string(),
    }
}

#[derive(Debug, Error)]
pub enum QueueError {
    /// The worker task is gone; only possible during shutdown.
    #[error("ordering queue closed")]
    Closed,
    #[error("queued callback failed: {0}")]
    Callback(crate::bindings::CallbackError),
}

struct QueueItem {
    object: KubernetesObject,
    phase: WatchPhase,
    callback: WatchFn,
    done: oneshot::Sender<Result<(), QueueError>>,
}

/// A single serial lane: an unbounded channel drained by one worker task.
pub struct OrderingQueue {
    key: String,
    tx: mpsc::UnboundedSender<QueueItem>,
}

impl OrderingQueue {
    pub fn new(key: String) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<QueueItem>();
        let worker_key = key.clone();
        tokio::spawn(async move {
            while let Some(item) = rx.recv().await {
                let result = (item.callback)(item.object, item.phase).await;
                if let Err(err) = &result {
                    warn!(key = %worker_key, error = %err, "queued callback failed");
                }
                // Receiver may have been dropped; the item is done either way.
                let _ = item.done.send(result.map_err(QueueError::Callback));
            }
        });
        Self { key, tx }
    }

    /// Append an event to this lane and wait for its callback to finish.
    /// The returned error reports the callback's own failure; the lane
    /// keeps draining regardless.
    pub async fn enqueue(
        &self,
        object: KubernetesObject,
        phase: WatchPhase,
        callback: WatchFn,
    ) -> Result<(), QueueError> {
        debug!(key = %self.key, ?phase, "enqueueing watch event");
        let (done, ack) = oneshot::channel();
        let item = QueueItem {
            object,
            phase,
            callback,
            done,
        };
        self.tx.send(item).map_err(|_| QueueError::Closed)?;
        ack.await.map_err(|_| QueueError::Closed)?
    }
}

/// Owns the key-to-lane map for one reconcile strategy.
pub struct QueueSet {
    strategy: ReconcileStrategy,
    queues: Mutex<HashMap<String, Arc<OrderingQueue>>>,
}

impl QueueSet {
    pub fn new(strategy: ReconcileStrategy) -> Self {
        Self {
            strategy,
            queues: Mutex::new(HashMap::new()),
        }
    }

    pub fn strategy(&self) -> ReconcileStrategy {
        self.strategy
    }

    /// Number of lanes created so far.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Route an event onto its lane, creating the lane on first use, and
    /// wait for the callback to complete.
    pub async fn dispatch(
        &self,
        object: KubernetesObject,
        phase: WatchPhase,
        callback: WatchFn,
    ) -> Result<(), QueueError> {
        let key = queue_key(&object, self.strategy);
        let queue = {
            let mut queues = self.lock();
            Arc::clone(
                queues
                    .entry(key.clone())
                    .or_insert_with(|| Arc::new(OrderingQueue::new(key))),
            )
        };
        queue.enqueue(object, phase, callback).await
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<OrderingQueue>>> {
        self.queues.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
