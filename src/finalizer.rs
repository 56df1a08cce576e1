//! Finalizer lifecycle: inject the marker during admission, run the
//! finalize callback when the object starts terminating, then release it.
//!
//! The marker keeps a terminating object visible until its finalize
//! callback has had a chance to run. Removal is deliberately permissive:
//! a failing callback still releases the object, since holding the marker
//! forever would wedge deletion. Only an explicit `Ok(false)` keeps it.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::bindings::{Binding, BindingAction, GroupVersionKind, KubernetesObject, Operation};

/// The marker this crate owns on `metadata.finalizers`.
pub const FINALIZER: &str = "policy-controller.dev/finalizer";

#[derive(Debug, Error)]
pub enum RegisterError {
    /// The kind was registered earlier; callers treat this as success.
    #[error("kind already registered")]
    AlreadyRegistered,
    #[error("kind registration failed: {0}")]
    Other(String),
}

#[derive(Debug, Error)]
pub enum FinalizerError {
    #[error("cannot patch finalizers without a name")]
    Unnamed,
    #[error("kind registration failed: {0}")]
    Register(String),
    #[error("finalizer patch failed: {0}")]
    Patch(String),
}

/// Minimal resource-write seam the coordinator needs. Production backs
/// this with the API server; tests record the calls.
#[async_trait]
pub trait ResourceClient: Send + Sync + 'static {
    /// Make the kind known to the client before patching it. Idempotent
    /// at the call site via [`RegisterError::AlreadyRegistered`].
    fn register_kind(&self, kind: &GroupVersionKind) -> Result<(), RegisterError>;

    /// Replace `metadata.finalizers` on one object.
    async fn patch_finalizers(
        &self,
        kind: &GroupVersionKind,
        namespace: Option<&str>,
        name: &str,
        finalizers: Vec<String>,
    ) -> Result<(), FinalizerError>;
}

/// Mutate-phase half: stamp the marker onto objects a finalize binding
/// covers. Returns whether the object was changed.
///
/// DELETE never gets a marker, and neither does an UPDATE of an object
/// that is already terminating; re-adding it there would fight the
/// deletion in flight.
pub fn add_finalizer(operation: Operation, obj: &mut KubernetesObject) -> bool {
    if operation == Operation::Delete {
        return false;
    }
    if operation == Operation::Update && obj.metadata.deletion_timestamp.is_some() {
        return false;
    }
    let finalizers = obj.metadata.finalizers.get_or_insert_with(Vec::new);
    if finalizers.iter().any(|f| f == FINALIZER) {
        return false;
    }
    debug!(
        name = obj.metadata.name.as_deref().unwrap_or_default(),
        "adding finalizer"
    );
    finalizers.push(FINALIZER.to_string());
    true
}

/// Watch-phase half: strip the marker with one read-modify-write patch.
pub async fn remove_finalizer(
    client: &dyn ResourceClient,
    binding: &Binding,
    obj: &KubernetesObject,
) -> Result<(), FinalizerError> {
    match client.register_kind(&binding.kind) {
        Ok(()) | Err(RegisterError::AlreadyRegistered) => {}
        Err(RegisterError::Other(reason)) => {
            // Without a registered kind the patch cannot be addressed.
            error!(kind = %binding.kind.kind, reason = %reason, "aborting finalizer removal");
            return Err(FinalizerError::Register(reason));
        }
    }

    let name = obj
        .metadata
        .name
        .as_deref()
        .ok_or(FinalizerError::Unnamed)?;
    let remaining: Vec<String> = obj
        .metadata
        .finalizers
        .as_deref()
        .unwrap_or_default()
        .iter()
        .filter(|f| *f != FINALIZER)
        .cloned()
        .collect();

    info!(kind = %binding.kind.kind, name, "removing finalizer");
    client
        .patch_finalizers(&binding.kind, obj.metadata.namespace.as_deref(), name, remaining)
        .await
}

/// Run the finalize callback for a terminating object, then release the
/// marker unless the callback explicitly voted to keep it.
pub async fn handle_finalize(
    client: &dyn ResourceClient,
    binding: &Binding,
    obj: &KubernetesObject,
) -> Result<(), FinalizerError> {
    if obj.metadata.deletion_timestamp.is_none() {
        return Ok(());
    }
    let callback = match &binding.action {
        BindingAction::Finalize(callback) => Arc::clone(callback),
        _ => return Ok(()),
    };

    match callback(obj.clone()).await {
        Ok(true) => {}
        Ok(false) => {
            // The callback asked to hold the object; it will be offered
            // again on the next watch event.
            debug!(
                name = obj.metadata.name.as_deref().unwrap_or_default(),
                "finalize callback deferred removal"
            );
            return Ok(());
        }
        Err(err) => {
            // A broken callback must not wedge deletion.
            warn!(
                name = obj.metadata.name.as_deref().unwrap_or_default(),
                error = %err,
                "finalize callback failed, removing finalizer anyway"
            );
        }
    }

    remove_finalizer(client, binding, obj).await
}
