//! Adjudication engine: decides whether a binding applies to an admission
//! request or a watch event.
//!
//! Two fixed pipelines run the predicate library in order and return the
//! first failing reason, or `None` to proceed. The check order is
//! load-bearing: with several constraints violated at once, the earliest
//! check in the pipeline supplies the reported reason, every time. No
//! predicate has side effects and the engine holds no state, so both
//! entry points are safe to call concurrently.

pub mod adjudicators;

use serde::Serialize;

use crate::bindings::{AdmissionRequest, Binding, KubernetesObject, Operation};
use adjudicators::*;

const ADMISSION_PREFIX: &str = "Ignoring Admission Callback:";
const WATCH_PREFIX: &str = "Ignoring Watch Callback:";

/// JSON-encode a value for a reason string. Lists and maps appear in
/// messages exactly as the registering module declared them.
fn json<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_default()
}

/// Decide whether an admission request should skip a binding's callback.
///
/// Returns `None` when the binding applies, otherwise the first mismatch
/// reason in pipeline order. DELETE operations are adjudicated against
/// the prior object; everything else uses the incoming one.
pub fn should_skip_request(
    binding: &Binding,
    request: &AdmissionRequest,
    capability_namespaces: &[String],
    ignored_namespaces: &[String],
) -> Option<String> {
    let fallback = KubernetesObject::default();
    let obj = if request.operation == Operation::Delete {
        request.old_object.as_ref()
    } else {
        request.object.as_ref()
    }
    .unwrap_or(&fallback);

    let prefix = ADMISSION_PREFIX;

    if misbound_delete_with_deletion_timestamp(binding) {
        return Some(format!(
            "{prefix} Cannot use deletionTimestamp filter on a DELETE operation."
        ));
    }
    if mismatched_deletion_timestamp(binding, obj) {
        return Some(format!(
            "{prefix} Binding defines deletionTimestamp but Object does not carry it."
        ));
    }
    if mismatched_event(binding, request) {
        return Some(format!(
            "{prefix} Binding defines event '{}' but Request declares '{}'.",
            defined_event(binding),
            declared_operation(request)
        ));
    }
    if mismatched_name(binding, obj) {
        return Some(format!(
            "{prefix} Binding defines name '{}' but Object carries '{}'.",
            defined_name(binding),
            carried_name(obj)
        ));
    }
    if mismatched_group(binding, request) {
        return Some(format!(
            "{prefix} Binding defines group '{}' but Request declares '{}'.",
            defined_group(binding),
            declared_group(request)
        ));
    }
    if mismatched_version(binding, request) {
        return Some(format!(
            "{prefix} Binding defines version '{}' but Request declares '{}'.",
            defined_version(binding),
            declared_version(request)
        ));
    }
    if mismatched_kind(binding, request) {
        return Some(format!(
            "{prefix} Binding defines kind '{}' but Request declares '{}'.",
            defined_kind(binding),
            declared_kind(request)
        ));
    }
    if unbindable_namespaces(capability_namespaces, binding) {
        return Some(format!(
            "{prefix} Binding defines namespaces {} but namespaces allowed by Capability are '{}'.",
            json(&defined_namespaces(binding)),
            json(&capability_namespaces)
        ));
    }
    if uncarryable_namespace(capability_namespaces, obj) {
        return Some(format!(
            "{prefix} Object carries namespace '{}' but namespaces allowed by Capability are '{}'.",
            carried_namespace(obj),
            json(&capability_namespaces)
        ));
    }
    if mismatched_namespace(binding, obj) {
        return Some(format!(
            "{prefix} Binding defines namespaces '{}' but Object carries '{}'.",
            json(&defined_namespaces(binding)),
            carried_namespace(obj)
        ));
    }
    if mismatched_labels(binding, obj) {
        return Some(format!(
            "{prefix} Binding defines labels '{}' but Object carries '{}'.",
            json(defined_labels(binding)),
            json(&carried_labels(obj))
        ));
    }
    if mismatched_annotations(binding, obj) {
        return Some(format!(
            "{prefix} Binding defines annotations '{}' but Object carries '{}'.",
            json(defined_annotations(binding)),
            json(&carried_annotations(obj))
        ));
    }
    if mismatched_namespace_regex(binding, obj) {
        return Some(format!(
            "{prefix} Binding defines namespace regexes '{}' but Object carries '{}'.",
            json(&defined_namespace_regexes(binding)),
            carried_namespace(obj)
        ));
    }
    if mismatched_name_regex(binding, obj) {
        return Some(format!(
            "{prefix} Binding defines name regex '{}' but Object carries '{}'.",
            defined_name_regex(binding),
            carried_name(obj)
        ));
    }
    if carries_ignored_namespace(ignored_namespaces, obj) {
        return Some(format!(
            "{prefix} Object carries namespace '{}' but ignored namespaces include '{}'.",
            carried_namespace(obj),
            json(&ignored_namespaces)
        ));
    }
    if missing_carriable_namespace(capability_namespaces, obj) {
        return Some(format!(
            "{prefix} Object does not carry a namespace but namespaces allowed by Capability are '{}'.",
            json(&capability_namespaces)
        ));
    }

    None
}

/// Decide whether a decoded watch event should skip a binding's callback.
///
/// Same predicate family as the admission pipeline, reordered to
/// front-load the cheap structural checks; operates on the raw object
/// since watch events carry no request envelope.
pub fn watch_skip_reason(
    binding: &Binding,
    obj: &KubernetesObject,
    capability_namespaces: &[String],
    ignored_namespaces: &[String],
) -> Option<String> {
    let prefix = WATCH_PREFIX;

    if mismatched_deletion_timestamp(binding, obj) {
        return Some(format!(
            "{prefix} Binding defines deletionTimestamp but Object does not carry it."
        ));
    }
    if mismatched_name(binding, obj) {
        return Some(format!(
            "{prefix} Binding defines name '{}' but Object carries '{}'.",
            defined_name(binding),
            carried_name(obj)
        ));
    }
    if misbound_namespace(binding) {
        return Some(format!(
            "{prefix} Cannot use namespace filter on a namespace object."
        ));
    }
    if mismatched_labels(binding, obj) {
        return Some(format!(
            "{prefix} Binding defines labels '{}' but Object carries '{}'.",
            json(defined_labels(binding)),
            json(&carried_labels(obj))
        ));
    }
    if mismatched_annotations(binding, obj) {
        return Some(format!(
            "{prefix} Binding defines annotations '{}' but Object carries '{}'.",
            json(defined_annotations(binding)),
            json(&carried_annotations(obj))
        ));
    }
    if uncarryable_namespace(capability_namespaces, obj) {
        return Some(format!(
            "{prefix} Object carries namespace '{}' but namespaces allowed by Capability are '{}'.",
            carried_namespace(obj),
            json(&capability_namespaces)
        ));
    }
    if unbindable_namespaces(capability_namespaces, binding) {
        return Some(format!(
            "{prefix} Binding defines namespaces {} but namespaces allowed by Capability are '{}'.",
            json(&defined_namespaces(binding)),
            json(&capability_namespaces)
        ));
    }
    if mismatched_namespace(binding, obj) {
        return Some(format!(
            "{prefix} Binding defines namespaces '{}' but Object carries '{}'.",
            json(&defined_namespaces(binding)),
            carried_namespace(obj)
        ));
    }
    if mismatched_namespace_regex(binding, obj) {
        return Some(format!(
            "{prefix} Binding defines namespace regexes '{}' but Object carries '{}'.",
            json(&defined_namespace_regexes(binding)),
            carried_namespace(obj)
        ));
    }
    if mismatched_name_regex(binding, obj) {
        return Some(format!(
            "{prefix} Binding defines name regex '{}' but Object carries '{}'.",
            defined_name_regex(binding),
            carried_name(obj)
        ));
    }
    if carries_ignored_namespace(ignored_namespaces, obj) {
        return Some(format!(
            "{prefix} Object carries namespace '{}' but ignored namespaces include '{}'.",
            carried_namespace(obj),
            json(&ignored_namespaces)
        ));
    }

    None
}
