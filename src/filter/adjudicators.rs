//! Predicate library: pure accessors and comparisons over bindings,
//! admission requests, and objects.
//!
//! Naming scheme:
//! - AdmissionRequest: "declares"
//! - KubernetesObject: "carries" / "missing"
//! - Binding: "defines" / "ignores"
//!
//! Accessors are total: an absent field yields its empty default, so every
//! predicate can assume a value is present. A `mismatched_*` predicate
//! returns true only when the binding actively declares a constraint AND
//! the declared value disagrees with the observed one; a binding that does
//! not declare a constraint can never mismatch on it.

use std::collections::BTreeMap;

use regex::Regex;

use crate::bindings::{AdmissionRequest, Binding, Event, KubernetesObject, Operation};

/*
  AdmissionRequest accessors
*/

pub fn declared_operation(request: &AdmissionRequest) -> Operation {
    request.operation
}

pub fn declared_group(request: &AdmissionRequest) -> &str {
    &request.kind.group
}

pub fn declared_version(request: &AdmissionRequest) -> &str {
    &request.kind.version
}

pub fn declared_kind(request: &AdmissionRequest) -> &str {
    &request.kind.kind
}

pub fn declared_uid(request: &AdmissionRequest) -> &str {
    &request.uid
}

/*
  KubernetesObject accessors
*/

pub fn carries_deletion_timestamp(obj: &KubernetesObject) -> bool {
    obj.metadata.deletion_timestamp.is_some()
}

pub fn missing_deletion_timestamp(obj: &KubernetesObject) -> bool {
    !carries_deletion_timestamp(obj)
}

pub fn carried_kind(obj: &KubernetesObject) -> &str {
    obj.kind.as_deref().unwrap_or("")
}

pub fn carried_name(obj: &KubernetesObject) -> &str {
    obj.metadata.name.as_deref().unwrap_or("")
}

pub fn carries_name(obj: &KubernetesObject) -> bool {
    !carried_name(obj).is_empty()
}

pub fn carried_namespace(obj: &KubernetesObject) -> &str {
    obj.metadata.namespace.as_deref().unwrap_or("")
}

pub fn carries_namespace(obj: &KubernetesObject) -> bool {
    !carried_namespace(obj).is_empty()
}

pub fn carried_labels(obj: &KubernetesObject) -> BTreeMap<String, String> {
    obj.metadata.labels.clone().unwrap_or_default()
}

pub fn carried_annotations(obj: &KubernetesObject) -> BTreeMap<String, String> {
    obj.metadata.annotations.clone().unwrap_or_default()
}

fn is_namespace_object(obj: &KubernetesObject) -> bool {
    carried_kind(obj) == "Namespace"
}

/*
  Binding accessors
*/

pub fn defines_deletion_timestamp(binding: &Binding) -> bool {
    binding.filters.deletion_timestamp
}

pub fn defined_name(binding: &Binding) -> &str {
    &binding.filters.name
}

pub fn defines_name(binding: &Binding) -> bool {
    !defined_name(binding).is_empty()
}

pub fn defined_name_regex(binding: &Binding) -> &str {
    &binding.filters.regex_name
}

pub fn defines_name_regex(binding: &Binding) -> bool {
    !defined_name_regex(binding).is_empty()
}

pub fn defined_namespaces(binding: &Binding) -> &[String] {
    &binding.filters.namespaces
}

pub fn defines_namespaces(binding: &Binding) -> bool {
    !defined_namespaces(binding).is_empty()
}

pub fn defined_namespace_regexes(binding: &Binding) -> &[String] {
    &binding.filters.regex_namespaces
}

pub fn defines_namespace_regexes(binding: &Binding) -> bool {
    !defined_namespace_regexes(binding).is_empty()
}

pub fn defined_labels(binding: &Binding) -> &BTreeMap<String, String> {
    &binding.filters.labels
}

pub fn defines_labels(binding: &Binding) -> bool {
    !defined_labels(binding).is_empty()
}

pub fn defined_annotations(binding: &Binding) -> &BTreeMap<String, String> {
    &binding.filters.annotations
}

pub fn defines_annotations(binding: &Binding) -> bool {
    !defined_annotations(binding).is_empty()
}

pub fn defined_event(binding: &Binding) -> Event {
    binding.event
}

pub fn defines_delete(binding: &Binding) -> bool {
    binding.event == Event::Delete
}

pub fn defined_group(binding: &Binding) -> &str {
    &binding.kind.group
}

pub fn defines_group(binding: &Binding) -> bool {
    !defined_group(binding).is_empty()
}

pub fn defined_version(binding: &Binding) -> &str {
    &binding.kind.version
}

pub fn defines_version(binding: &Binding) -> bool {
    !defined_version(binding).is_empty()
}

pub fn defined_kind(binding: &Binding) -> &str {
    &binding.kind.kind
}

pub fn defines_kind(binding: &Binding) -> bool {
    !defined_kind(binding).is_empty()
}

/*
  Comparisons
*/

/// Binding requires a deletion timestamp the object does not carry.
pub fn mismatched_deletion_timestamp(binding: &Binding, obj: &KubernetesObject) -> bool {
    defines_deletion_timestamp(binding) && missing_deletion_timestamp(obj)
}

pub fn mismatched_name(binding: &Binding, obj: &KubernetesObject) -> bool {
    defines_name(binding) && defined_name(binding) != carried_name(obj)
}

/// The stored string is a raw pattern; anchoring is the caller's choice.
/// A pattern that fails to compile can never match.
pub fn mismatched_name_regex(binding: &Binding, obj: &KubernetesObject) -> bool {
    defines_name_regex(binding)
        && !Regex::new(defined_name_regex(binding))
            .map(|re| re.is_match(carried_name(obj)))
            .unwrap_or(false)
}

pub fn binds_to_kind(binding: &Binding, kind: &str) -> bool {
    defines_kind(binding) && defined_kind(binding) == kind
}

pub fn binds_to_namespace(binding: &Binding) -> bool {
    binds_to_kind(binding, "Namespace")
}

/// A namespace filter on a Namespace-kind binding is a contradiction in
/// the binding definition, not a data mismatch.
pub fn misbound_namespace(binding: &Binding) -> bool {
    binds_to_namespace(binding) && defines_namespaces(binding)
}

/// A deletionTimestamp filter can never match on a DELETE binding: the
/// pre-image is evaluated and it does not carry one.
pub fn misbound_delete_with_deletion_timestamp(binding: &Binding) -> bool {
    defines_delete(binding) && defines_deletion_timestamp(binding)
}

pub fn mismatched_namespace(binding: &Binding, obj: &KubernetesObject) -> bool {
    defines_namespaces(binding)
        && !defined_namespaces(binding)
            .iter()
            .any(|ns| ns == carried_namespace(obj))
}

/// The declared regex list behaves as a logical OR: mismatched only when
/// none of the alternatives match.
pub fn mismatched_namespace_regex(binding: &Binding, obj: &KubernetesObject) -> bool {
    defines_namespace_regexes(binding)
        && !defined_namespace_regexes(binding).iter().any(|pattern| {
            Regex::new(pattern)
                .map(|re| re.is_match(carried_namespace(obj)))
                .unwrap_or(false)
        })
}

/// Map-subset comparison: every declared key must be carried with an equal
/// value; extra carried keys are ignored. A declared empty-string value is
/// a required empty value, not a wildcard.
pub fn metas_mismatch(
    defined: &BTreeMap<String, String>,
    carried: &BTreeMap<String, String>,
) -> bool {
    defined
        .iter()
        .any(|(key, value)| carried.get(key) != Some(value))
}

pub fn mismatched_labels(binding: &Binding, obj: &KubernetesObject) -> bool {
    defines_labels(binding) && metas_mismatch(defined_labels(binding), &carried_labels(obj))
}

pub fn mismatched_annotations(binding: &Binding, obj: &KubernetesObject) -> bool {
    defines_annotations(binding)
        && metas_mismatch(defined_annotations(binding), &carried_annotations(obj))
}

/// Object sits in a namespace outside the capability's allowed set. A
/// Namespace object is judged by its own name; an object with no
/// namespace at all cannot be uncarryable.
pub fn uncarryable_namespace(allowed: &[String], obj: &KubernetesObject) -> bool {
    if allowed.is_empty() {
        return false;
    }
    if is_namespace_object(obj) {
        return !allowed.iter().any(|ns| ns == carried_name(obj));
    }
    if carries_namespace(obj) {
        return !allowed.iter().any(|ns| ns == carried_namespace(obj));
    }
    false
}

/// Capability requires namespaces but the object carries none. A
/// Namespace object is again judged by its own name.
pub fn missing_carriable_namespace(allowed: &[String], obj: &KubernetesObject) -> bool {
    if allowed.is_empty() {
        return false;
    }
    if is_namespace_object(obj) {
        return !allowed.iter().any(|ns| ns == carried_name(obj));
    }
    !carries_namespace(obj)
}

/// Object sits in a globally ignored namespace.
pub fn carries_ignored_namespace(ignored: &[String], obj: &KubernetesObject) -> bool {
    if ignored.is_empty() {
        return false;
    }
    if is_namespace_object(obj) {
        return ignored.iter().any(|ns| ns == carried_name(obj));
    }
    carries_namespace(obj) && ignored.iter().any(|ns| ns == carried_namespace(obj))
}

/// Binding declares namespaces outside what the capability may touch.
pub fn unbindable_namespaces(allowed: &[String], binding: &Binding) -> bool {
    !allowed.is_empty()
        && defines_namespaces(binding)
        && defined_namespaces(binding)
            .iter()
            .any(|ns| !allowed.contains(ns))
}

/// ANY matches every operation; CREATE_OR_UPDATE matches CREATE and
/// UPDATE; everything else requires exact equality.
pub fn operation_matches_event(operation: Operation, event: Event) -> bool {
    match event {
        Event::Any => true,
        Event::CreateOrUpdate => {
            matches!(operation, Operation::Create | Operation::Update)
        }
        Event::Create => operation == Operation::Create,
        Event::Update => operation == Operation::Update,
        Event::Delete => operation == Operation::Delete,
    }
}

pub fn mismatched_event(binding: &Binding, request: &AdmissionRequest) -> bool {
    !operation_matches_event(declared_operation(request), defined_event(binding))
}

pub fn mismatched_group(binding: &Binding, request: &AdmissionRequest) -> bool {
    defines_group(binding) && defined_group(binding) != declared_group(request)
}

pub fn mismatched_version(binding: &Binding, request: &AdmissionRequest) -> bool {
    defines_version(binding) && defined_version(binding) != declared_version(request)
}

pub fn mismatched_kind(binding: &Binding, request: &AdmissionRequest) -> bool {
    defines_kind(binding) && defined_kind(binding) != declared_kind(request)
}
