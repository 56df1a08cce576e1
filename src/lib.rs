//! policy-controller library crate
//!
//! Decision and reliability core for a Kubernetes policy controller:
//! binding adjudication, watch stream supervision, per-key ordered
//! dispatch, and finalizer coordination. Network surfaces stay behind
//! the [`watch::WatchTransport`] and [`finalizer::ResourceClient`]
//! seams so the core stays testable in-process.

pub mod bindings;
pub mod config;
pub mod filter;
pub mod finalizer;
pub mod queue;
pub mod watch;

pub use bindings::{
    AdmissionRequest, Binding, BindingAction, BindingFilters, Capability, Event,
    GroupVersionKind, KubernetesObject, Operation, WatchPhase,
};
pub use config::Config;
pub use filter::{should_skip_request, watch_skip_reason};
pub use finalizer::{add_finalizer, handle_finalize, remove_finalizer, FINALIZER};
pub use queue::{queue_key, QueueSet, ReconcileStrategy};
pub use watch::{WatchManager, WatchTransport};
