//! Shared data model: bindings, filters, admission requests, and the
//! callback values they carry.
//!
//! A [`Binding`] is the immutable rule record produced at capability
//! registration time. It links a resource kind and a set of filters to a
//! single callback role. Bindings are created once and held for the
//! lifetime of the process; nothing in this crate mutates them.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{Deserialize, Serialize};

/// Error type produced by user-supplied callbacks.
pub type CallbackError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The change kinds a binding can subscribe to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    #[serde(rename = "CREATE")]
    Create,
    #[serde(rename = "UPDATE")]
    Update,
    #[serde(rename = "DELETE")]
    Delete,
    #[serde(rename = "CREATEORUPDATE")]
    CreateOrUpdate,
    #[serde(rename = "*")]
    Any,
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Event::Create => "CREATE",
            Event::Update => "UPDATE",
            Event::Delete => "DELETE",
            Event::CreateOrUpdate => "CREATEORUPDATE",
            Event::Any => "*",
        };
        f.write_str(s)
    }
}

impl Event {
    /// The watch phases this event subscribes to.
    pub fn phases(&self) -> &'static [WatchPhase] {
        match self {
            Event::Create => &[WatchPhase::Added],
            Event::Update => &[WatchPhase::Modified],
            Event::Delete => &[WatchPhase::Deleted],
            Event::CreateOrUpdate => &[WatchPhase::Added, WatchPhase::Modified],
            Event::Any => &[WatchPhase::Added, WatchPhase::Modified, WatchPhase::Deleted],
        }
    }

    /// Whether a decoded watch phase falls under this event.
    pub fn matches_phase(&self, phase: WatchPhase) -> bool {
        self.phases().contains(&phase)
    }
}

/// The write operation declared by an admission request.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Operation {
    #[default]
    Create,
    Update,
    Delete,
    Connect,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Operation::Create => "CREATE",
            Operation::Update => "UPDATE",
            Operation::Delete => "DELETE",
            Operation::Connect => "CONNECT",
        };
        f.write_str(s)
    }
}

/// The kind of change a streamed watch event represents.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum WatchPhase {
    Added,
    Modified,
    Deleted,
}

/// Group/version/kind triple identifying a resource type, with the
/// optional plural used to build watch paths.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupVersionKind {
    pub group: String,
    pub version: String,
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plural: Option<String>,
}

impl GroupVersionKind {
    pub fn new(group: &str, version: &str, kind: &str) -> Self {
        Self {
            group: group.to_string(),
            version: version.to_string(),
            kind: kind.to_string(),
            plural: None,
        }
    }

    /// The resource name used on the watch path: the registered plural if
    /// present, otherwise the lowercased kind with an "s" suffix.
    pub fn resource(&self) -> String {
        match &self.plural {
            Some(plural) => plural.clone(),
            None => format!("{}s", self.kind.to_lowercase()),
        }
    }
}

/// A possibly-partial resource snapshot. Any field may be absent; the
/// predicate library treats absence as "empty", never as an error.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct KubernetesObject {
    pub api_version: Option<String>,
    pub kind: Option<String>,
    pub metadata: ObjectMeta,
}

/// A single proposed cluster write submitted for adjudication. Created per
/// admission call and discarded after the response.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AdmissionRequest {
    pub uid: String,
    pub operation: Operation,
    pub kind: GroupVersionKind,
    pub name: String,
    pub namespace: Option<String>,
    /// The new object. Absent for DELETE.
    pub object: Option<KubernetesObject>,
    /// The prior object. Present for UPDATE and DELETE.
    pub old_object: Option<KubernetesObject>,
    pub dry_run: bool,
}

/// Declarative filters a binding uses to narrow which objects it cares
/// about. Every field defaults to its empty value; an unset filter never
/// causes a mismatch.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BindingFilters {
    /// Exact-match object name.
    pub name: String,
    /// Regex pattern for the object name.
    pub regex_name: String,
    /// Namespace allow-list.
    pub namespaces: Vec<String>,
    /// Regex allow-list for namespaces; matching any one pattern suffices.
    pub regex_namespaces: Vec<String>,
    /// Required label subset.
    pub labels: BTreeMap<String, String>,
    /// Required annotation subset.
    pub annotations: BTreeMap<String, String>,
    /// Require the object to be terminating.
    pub deletion_timestamp: bool,
}

/// Mutate-phase callback. Runs inside the external admission server;
/// carried here as a value only.
pub type MutateFn =
    Arc<dyn Fn(&mut KubernetesObject) -> Result<(), CallbackError> + Send + Sync>;

/// Validate-phase callback; returns whether the request is allowed.
pub type ValidateFn =
    Arc<dyn Fn(&KubernetesObject) -> Result<bool, CallbackError> + Send + Sync>;

/// Watch/reconcile callback invoked for matching stream events.
pub type WatchFn = Arc<
    dyn Fn(KubernetesObject, WatchPhase) -> BoxFuture<'static, Result<(), CallbackError>>
        + Send
        + Sync,
>;

/// Finalize callback; returning `Ok(false)` keeps the finalizer marker in
/// place, anything else allows removal.
pub type FinalizeFn = Arc<
    dyn Fn(KubernetesObject) -> BoxFuture<'static, Result<bool, CallbackError>> + Send + Sync,
>;

/// The single callback role a binding carries.
#[derive(Clone)]
pub enum BindingAction {
    Mutate(MutateFn),
    Validate(ValidateFn),
    Watch(WatchFn),
    /// Finalize is layered over watch: the admission side injects the
    /// marker, the watch side runs this callback and removes it.
    Finalize(FinalizeFn),
}

impl BindingAction {
    /// Human-readable role name, used in logs.
    pub fn category(&self) -> &'static str {
        match self {
            BindingAction::Mutate(_) => "Mutate",
            BindingAction::Validate(_) => "Validate",
            BindingAction::Watch(_) => "Watch",
            BindingAction::Finalize(_) => "Finalize",
        }
    }
}

impl fmt::Debug for BindingAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.category())
    }
}

/// An immutable rule linking a resource kind, filter set, and event to a
/// callback.
#[derive(Clone, Debug)]
pub struct Binding {
    pub event: Event,
    pub kind: GroupVersionKind,
    pub filters: BindingFilters,
    pub action: BindingAction,
    /// Route matching watch events through the per-key ordering queue
    /// instead of invoking the callback inline.
    pub queued: bool,
}

impl Binding {
    /// Whether this binding opens a watch stream.
    pub fn is_watchable(&self) -> bool {
        matches!(
            self.action,
            BindingAction::Watch(_) | BindingAction::Finalize(_)
        )
    }

    pub fn is_finalize(&self) -> bool {
        matches!(self.action, BindingAction::Finalize(_))
    }
}

/// A named collection of bindings registered together with a shared
/// namespace scope.
#[derive(Clone, Debug)]
pub struct Capability {
    pub name: String,
    /// Namespaces this capability is allowed to touch. Empty means
    /// unrestricted.
    pub namespaces: Vec<String>,
    pub bindings: Vec<Binding>,
}
