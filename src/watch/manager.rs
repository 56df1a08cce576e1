//! Watch stream supervision.
//!
//! One stream per distinct subscription, addressed by a deterministic
//! stream key. The manager owns every stream task, pending reconnect
//! timer, attempt counter, and last-seen resource version; all of it
//! lives behind one lock so restarts and shutdown cannot race.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::StreamExt;
use rand::Rng;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::bindings::{
    Binding, BindingAction, Capability, CallbackError, KubernetesObject, WatchFn, WatchPhase,
};
use crate::config::Config;
use crate::filter::watch_skip_reason;
use crate::finalizer::{handle_finalize, ResourceClient};
use crate::queue::QueueSet;
use crate::watch::transport::{SubscribeRequest, WatchTransport};

/// Reconnect jitter keeps a fleet of watchers from stampeding.
const JITTER_MAX_MS: u64 = 500;
const BACKOFF_CAP: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("watch manager is shut down")]
    ShutDown,
}

/// Everything one stream needs to adjudicate and dispatch its events.
/// Shared between the stream task and its reconnect timers.
pub struct StreamRegistration {
    pub binding: Binding,
    pub capability_namespaces: Vec<String>,
    pub ignored_namespaces: Vec<String>,
}

/// Why a stream stopped. Idle streams relist on a fixed delay; failed
/// ones back off exponentially.
enum StreamExit {
    Idle,
    Failed(String),
}

struct ActiveStream {
    generation: u64,
    task: JoinHandle<()>,
}

#[derive(Default)]
struct ManagerState {
    streams: HashMap<String, ActiveStream>,
    reconnects: HashMap<String, JoinHandle<()>>,
    attempts: HashMap<String, u32>,
    last_seen: HashMap<String, String>,
    next_generation: u64,
    shut_down: bool,
}

pub struct WatchManager<T: WatchTransport> {
    transport: Arc<T>,
    client: Arc<dyn ResourceClient>,
    config: Config,
    queues: Arc<QueueSet>,
    state: Arc<Mutex<ManagerState>>,
}

impl<T: WatchTransport> Clone for WatchManager<T> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            client: Arc::clone(&self.client),
            config: self.config.clone(),
            queues: Arc::clone(&self.queues),
            state: Arc::clone(&self.state),
        }
    }
}

/// Deterministic key for one subscription. Two bindings that watch the
/// same thing share a key and therefore a stream slot.
pub fn stream_key(request: &SubscribeRequest) -> String {
    let mut hasher = Sha256::new();
    for part in [
        request.group.as_str(),
        request.version.as_str(),
        request.resource.as_str(),
        request.namespace.as_deref().unwrap_or_default(),
        request.label_selector.as_deref().unwrap_or_default(),
        request.field_selector.as_deref().unwrap_or_default(),
    ] {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    hasher.update(request.resync_period_seconds.to_be_bytes());
    hex::encode(hasher.finalize())
}

/// Exponential backoff before jitter: 1s doubling per attempt, capped.
pub fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_secs(1u64 << attempt.min(5)).min(BACKOFF_CAP)
}

impl<T: WatchTransport> WatchManager<T> {
    pub fn new(transport: T, client: Arc<dyn ResourceClient>, config: Config) -> Self {
        let queues = Arc::new(QueueSet::new(config.reconcile_strategy));
        Self {
            transport: Arc::new(transport),
            client,
            config,
            queues,
            state: Arc::new(Mutex::new(ManagerState::default())),
        }
    }

    /// Open one stream per watch-flagged binding across all capabilities.
    pub fn setup_watch(
        &self,
        capabilities: &[Capability],
        ignored_namespaces: &[String],
    ) -> Result<(), WatchError> {
        for capability in capabilities {
            for binding in &capability.bindings {
                if !binding.is_watchable() {
                    continue;
                }
                self.run_binding(
                    binding.clone(),
                    capability.namespaces.clone(),
                    ignored_namespaces.to_vec(),
                )?;
            }
        }
        Ok(())
    }

    /// Start (or restart) the stream for one binding. An existing stream
    /// or pending reconnect timer for the same key is cancelled first.
    /// Returns the stream key.
    pub fn run_binding(
        &self,
        binding: Binding,
        capability_namespaces: Vec<String>,
        ignored_namespaces: Vec<String>,
    ) -> Result<String, WatchError> {
        let registration = Arc::new(StreamRegistration {
            binding,
            capability_namespaces,
            ignored_namespaces,
        });
        self.start_stream(registration)
    }

    fn start_stream(&self, registration: Arc<StreamRegistration>) -> Result<String, WatchError> {
        let request = self.subscribe_request(&registration.binding);
        let key = stream_key(&request);

        let mut state = self.lock();
        if state.shut_down {
            return Err(WatchError::ShutDown);
        }
        if let Some(existing) = state.streams.remove(&key) {
            debug!(key = %key, "replacing existing stream");
            existing.task.abort();
        }
        if let Some(timer) = state.reconnects.remove(&key) {
            timer.abort();
        }

        state.next_generation += 1;
        let generation = state.next_generation;

        let manager = self.clone();
        let task_key = key.clone();
        // The task blocks on this lock until the entry below is in place.
        let task = tokio::spawn(async move {
            manager
                .stream_lifecycle(task_key, generation, registration, request)
                .await;
        });
        state.streams.insert(key.clone(), ActiveStream { generation, task });

        Ok(key)
    }

    async fn stream_lifecycle(
        self,
        key: String,
        generation: u64,
        registration: Arc<StreamRegistration>,
        mut request: SubscribeRequest,
    ) {
        // Resume from the last bookmark; only a cold start gets the
        // initial snapshot.
        let resume = self.lock().last_seen.get(&key).cloned();
        request.send_initial_list = resume.is_none();
        request.start_resource_version = resume;

        info!(
            key = %key,
            kind = %registration.binding.kind.kind,
            resuming = request.start_resource_version.is_some(),
            "opening watch stream"
        );

        let mut stream = match self.transport.subscribe(request).await {
            Ok(stream) => stream,
            Err(err) => {
                self.on_stream_exit(&key, generation, registration, StreamExit::Failed(err.to_string()));
                return;
            }
        };

        let quiet_limit = Duration::from_secs(self.config.last_seen_limit_seconds);
        let exit = loop {
            let next = tokio::time::timeout(quiet_limit, stream.next()).await;
            match next {
                Err(_) => break StreamExit::Idle,
                Ok(None) => break StreamExit::Failed("stream closed".to_string()),
                Ok(Some(Err(err))) => break StreamExit::Failed(err.to_string()),
                Ok(Some(Ok(event))) => {
                    {
                        let mut state = self.lock();
                        // Bookmark every frame, snapshot-end included, so
                        // a reconnect never replays what we already saw.
                        if let Some(rv) = &event.resource_version {
                            state.last_seen.insert(key.clone(), rv.clone());
                        }
                        if event.kind.phase().is_some() {
                            state.attempts.remove(&key);
                        }
                    }
                    if let Some(phase) = event.kind.phase() {
                        self.dispatch_event(&registration, &event.payload, phase).await;
                    }
                }
            }
        };

        self.on_stream_exit(&key, generation, registration, exit);
    }

    /// Decode, phase-match, adjudicate, then hand the event to its
    /// callback, queued or inline.
    async fn dispatch_event(
        &self,
        registration: &Arc<StreamRegistration>,
        payload: &[u8],
        phase: WatchPhase,
    ) {
        let obj: KubernetesObject = match serde_json::from_slice(payload) {
            Ok(obj) => obj,
            Err(err) => {
                warn!(error = %err, "dropping undecodable watch event");
                return;
            }
        };

        let binding = &registration.binding;
        if !binding.event.matches_phase(phase) {
            return;
        }
        if let Some(reason) = watch_skip_reason(
            binding,
            &obj,
            &registration.capability_namespaces,
            &registration.ignored_namespaces,
        ) {
            debug!(reason = %reason, "skipping watch event");
            return;
        }

        let callback: WatchFn = match &binding.action {
            BindingAction::Watch(callback) => Arc::clone(callback),
            BindingAction::Finalize(_) => {
                let client = Arc::clone(&self.client);
                let binding = binding.clone();
                Arc::new(move |obj: KubernetesObject, _phase| {
                    let client = Arc::clone(&client);
                    let binding = binding.clone();
                    Box::pin(async move {
                        handle_finalize(client.as_ref(), &binding, &obj)
                            .await
                            .map_err(|err| Box::new(err) as CallbackError)
                    })
                })
            }
            _ => return,
        };

        if binding.queued {
            // The queue logs callback failures itself.
            let _ = self.queues.dispatch(obj, phase, callback).await;
        } else if let Err(err) = callback(obj, phase).await {
            warn!(
                action = binding.action.category(),
                error = %err,
                "watch callback failed"
            );
        }
    }

    /// Stream teardown: schedule a reconnect unless this exit belongs to
    /// a superseded stream, a reconnect is already pending, or the
    /// failure budget is spent.
    fn on_stream_exit(
        &self,
        key: &str,
        generation: u64,
        registration: Arc<StreamRegistration>,
        exit: StreamExit,
    ) {
        let mut state = self.lock();
        if state.shut_down {
            return;
        }
        match state.streams.get(key) {
            Some(active) if active.generation == generation => {
                state.streams.remove(key);
            }
            // A newer stream owns this key; this exit is stale.
            _ => return,
        }
        if state.reconnects.contains_key(key) {
            return;
        }

        let delay = match exit {
            StreamExit::Idle => {
                info!(key = %key, "stream went quiet, scheduling relist");
                Duration::from_secs(self.config.resync_delay_seconds)
            }
            StreamExit::Failed(reason) => {
                let counter = state.attempts.entry(key.to_string()).or_insert(0);
                // The delay doubles from 1s, so the first failure waits
                // backoff_delay(0).
                let attempt = *counter;
                *counter += 1;
                if attempt >= self.config.resync_failure_max {
                    error!(
                        key = %key,
                        failures = attempt + 1,
                        reason = %reason,
                        "stream failure budget exhausted, giving up"
                    );
                    state.attempts.remove(key);
                    state.last_seen.remove(key);
                    return;
                }
                warn!(key = %key, failures = attempt + 1, reason = %reason, "stream failed, backing off");
                backoff_delay(attempt) + jitter()
            }
        };

        let manager = self.clone();
        let timer_key = key.to_string();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            manager.reconnect(timer_key, registration);
        });
        state.reconnects.insert(key.to_string(), timer);
    }

    fn reconnect(&self, key: String, registration: Arc<StreamRegistration>) {
        {
            let mut state = self.lock();
            state.reconnects.remove(&key);
            if state.shut_down {
                return;
            }
        }
        if let Err(err) = self.start_stream(registration) {
            debug!(key = %key, error = %err, "reconnect cancelled");
        }
    }

    /// Abort every stream and timer and forget all bookkeeping. Safe to
    /// call at any time, including repeatedly.
    pub fn shutdown(&self) {
        let mut state = self.lock();
        state.shut_down = true;
        for (_, active) in state.streams.drain() {
            active.task.abort();
        }
        for (_, timer) in state.reconnects.drain() {
            timer.abort();
        }
        state.attempts.clear();
        state.last_seen.clear();
        info!("watch manager shut down");
    }

    /// Number of live stream slots, pending reconnects included in their
    /// own count.
    pub fn stream_count(&self) -> usize {
        self.lock().streams.len()
    }

    pub fn pending_reconnects(&self) -> usize {
        self.lock().reconnects.len()
    }

    /// The bookmark a reconnect for this key would resume from.
    pub fn last_seen(&self, key: &str) -> Option<String> {
        self.lock().last_seen.get(key).cloned()
    }

    fn subscribe_request(&self, binding: &Binding) -> SubscribeRequest {
        let namespace = match binding.filters.namespaces.as_slice() {
            [only] => Some(only.clone()),
            _ => None,
        };
        let label_selector = if binding.filters.labels.is_empty() {
            None
        } else {
            Some(
                binding
                    .filters
                    .labels
                    .iter()
                    .map(|(k, v)| format!("{k}={v}"))
                    .collect::<Vec<_>>()
                    .join(","),
            )
        };
        let field_selector = if binding.filters.name.is_empty() {
            None
        } else {
            Some(format!("metadata.name={}", binding.filters.name))
        };
        SubscribeRequest {
            group: binding.kind.group.clone(),
            version: binding.kind.version.clone(),
            resource: binding.kind.resource(),
            namespace,
            label_selector,
            field_selector,
            resync_period_seconds: self.config.relist_interval_seconds,
            start_resource_version: None,
            send_initial_list: true,
        }
    }

    fn lock(&self) -> MutexGuard<'_, ManagerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn jitter() -> Duration {
    Duration::from_millis(rand::thread_rng().gen_range(0..JITTER_MAX_MS))
}
