// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic,
    clippy::string_slice
)]

//! Property-based tests for policy-controller.
//!
//! Uses proptest to generate random inputs and verify invariants.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use proptest::prelude::*;

use policy_controller::bindings::WatchFn;
use policy_controller::watch::manager::backoff_delay;
use policy_controller::{
    queue_key, should_skip_request, watch_skip_reason, AdmissionRequest, Binding, BindingAction,
    BindingFilters, Event, GroupVersionKind, KubernetesObject, Operation, ReconcileStrategy,
};

/// Strategy for generating DNS-label-ish names.
fn any_name() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9-]{0,15}"
}

/// Strategy for generating optional namespaces.
fn any_namespace() -> impl Strategy<Value = Option<String>> {
    prop_oneof![Just(None), any_name().prop_map(Some)]
}

/// Strategy for generating small label/annotation maps.
fn any_meta_map() -> impl Strategy<Value = BTreeMap<String, String>> {
    prop::collection::btree_map("[a-z]{1,8}", "[a-z0-9]{0,8}", 0..4)
}

/// Strategy for generating random events.
fn any_event() -> impl Strategy<Value = Event> {
    prop_oneof![
        Just(Event::Create),
        Just(Event::Update),
        Just(Event::Delete),
        Just(Event::CreateOrUpdate),
        Just(Event::Any),
    ]
}

/// Strategy for generating random operations.
fn any_operation() -> impl Strategy<Value = Operation> {
    prop_oneof![
        Just(Operation::Create),
        Just(Operation::Update),
        Just(Operation::Delete),
        Just(Operation::Connect),
    ]
}

/// Strategy for generating random objects with a Pod kind.
fn any_object() -> impl Strategy<Value = KubernetesObject> {
    (any_name(), any_namespace(), any_meta_map(), any_meta_map()).prop_map(
        |(name, namespace, labels, annotations)| KubernetesObject {
            kind: Some("Pod".to_string()),
            metadata: ObjectMeta {
                name: Some(name),
                namespace,
                labels: Some(labels),
                annotations: Some(annotations),
                ..Default::default()
            },
            ..Default::default()
        },
    )
}

/// Strategy for generating random reconcile strategies.
fn any_strategy() -> impl Strategy<Value = ReconcileStrategy> {
    prop_oneof![
        Just(ReconcileStrategy::Kind),
        Just(ReconcileStrategy::KindNs),
        Just(ReconcileStrategy::KindNsName),
        Just(ReconcileStrategy::Global),
    ]
}

fn noop_watch() -> WatchFn {
    Arc::new(|_obj, _phase| Box::pin(async { Ok(()) }))
}

fn watch_binding(event: Event, filters: BindingFilters) -> Binding {
    Binding {
        event,
        kind: GroupVersionKind::new("", "v1", "Pod"),
        filters,
        action: BindingAction::Watch(noop_watch()),
        queued: false,
    }
}

fn admission_request(operation: Operation, obj: KubernetesObject) -> AdmissionRequest {
    AdmissionRequest {
        uid: "uid".to_string(),
        operation,
        kind: GroupVersionKind::new("", "v1", "Pod"),
        name: obj.metadata.name.clone().unwrap_or_default(),
        namespace: obj.metadata.namespace.clone(),
        object: Some(obj),
        old_object: None,
        dry_run: false,
    }
}

proptest! {
    /// Property: a binding with no filters never skips a watch event.
    #[test]
    fn unfiltered_binding_is_silent(obj in any_object()) {
        let binding = watch_binding(Event::Any, BindingFilters::default());
        prop_assert_eq!(watch_skip_reason(&binding, &obj, &[], &[]), None);
    }

    /// Property: a binding with no filters admits every operation on its
    /// kind when no namespace policy is in force.
    #[test]
    fn unfiltered_binding_admits_everything(obj in any_object(), op in any_operation()) {
        let binding = watch_binding(Event::Any, BindingFilters::default());
        let request = admission_request(op, obj);
        prop_assert_eq!(should_skip_request(&binding, &request, &[], &[]), None);
    }

    /// Property: adjudication is deterministic. The same inputs always
    /// produce the same reason, including which check fires first.
    #[test]
    fn adjudication_is_deterministic(
        obj in any_object(),
        op in any_operation(),
        event in any_event(),
        name in any_name(),
        labels in any_meta_map(),
    ) {
        let binding = watch_binding(event, BindingFilters {
            name,
            labels,
            ..Default::default()
        });
        let request = admission_request(op, obj.clone());
        let first = should_skip_request(&binding, &request, &[], &[]);
        for _ in 0..3 {
            prop_assert_eq!(&first, &should_skip_request(&binding, &request, &[], &[]));
        }
        let watch_first = watch_skip_reason(&binding, &obj, &[], &[]);
        prop_assert_eq!(&watch_first, &watch_skip_reason(&binding, &obj, &[], &[]));
    }

    /// Property: every reason carries the pipeline prefix.
    #[test]
    fn reasons_carry_their_prefix(
        obj in any_object(),
        op in any_operation(),
        event in any_event(),
        name in any_name(),
    ) {
        let binding = watch_binding(event, BindingFilters {
            name,
            ..Default::default()
        });
        let request = admission_request(op, obj.clone());
        if let Some(reason) = should_skip_request(&binding, &request, &[], &[]) {
            prop_assert!(reason.starts_with("Ignoring Admission Callback: "));
        }
        if let Some(reason) = watch_skip_reason(&binding, &obj, &[], &[]) {
            prop_assert!(reason.starts_with("Ignoring Watch Callback: "));
        }
    }

    /// Property: label matching is subset semantics. An object carrying
    /// every declared pair plus extras is never skipped for labels.
    #[test]
    fn declared_label_subset_matches(
        declared in any_meta_map(),
        extra in any_meta_map(),
        name in any_name(),
    ) {
        let binding = watch_binding(Event::Any, BindingFilters {
            labels: declared.clone(),
            ..Default::default()
        });
        let mut carried = extra;
        carried.extend(declared);
        let obj = KubernetesObject {
            kind: Some("Pod".to_string()),
            metadata: ObjectMeta {
                name: Some(name),
                namespace: Some("default".to_string()),
                labels: Some(carried),
                ..Default::default()
            },
            ..Default::default()
        };
        prop_assert_eq!(watch_skip_reason(&binding, &obj, &[], &[]), None);
    }

    /// Property: removing any declared label pair from the object makes
    /// the binding skip it.
    #[test]
    fn missing_declared_label_skips(
        declared in prop::collection::btree_map("[a-z]{1,8}", "[a-z0-9]{1,8}", 1..4),
        name in any_name(),
    ) {
        let binding = watch_binding(Event::Any, BindingFilters {
            labels: declared.clone(),
            ..Default::default()
        });
        for missing in declared.keys() {
            let mut carried = declared.clone();
            carried.remove(missing);
            let obj = KubernetesObject {
                kind: Some("Pod".to_string()),
                metadata: ObjectMeta {
                    name: Some(name.clone()),
                    namespace: Some("default".to_string()),
                    labels: Some(carried),
                    ..Default::default()
                },
                ..Default::default()
            };
            let reason = watch_skip_reason(&binding, &obj, &[], &[]);
            prop_assert!(reason.is_some());
            prop_assert!(reason.unwrap().contains("Binding defines labels"));
        }
    }

    /// Property: a DELETE request is adjudicated purely against the prior
    /// object; the incoming one is irrelevant.
    #[test]
    fn delete_ignores_incoming_object(old in any_object(), new in any_object()) {
        let binding = watch_binding(Event::Any, BindingFilters {
            name: old.metadata.name.clone().unwrap_or_default(),
            ..Default::default()
        });
        let mut request = admission_request(Operation::Delete, new);
        request.old_object = Some(old);
        prop_assert_eq!(should_skip_request(&binding, &request, &[], &[]), None);
    }

    /// Property: a Namespace object is judged by its own name against the
    /// capability allow-list.
    #[test]
    fn namespace_objects_use_their_name(name in any_name(), allowed in any_name()) {
        let binding = watch_binding(Event::Any, BindingFilters::default());
        let obj = KubernetesObject {
            kind: Some("Namespace".to_string()),
            metadata: ObjectMeta {
                name: Some(name.clone()),
                ..Default::default()
            },
            ..Default::default()
        };
        let caps = vec![allowed.clone()];
        let reason = watch_skip_reason(&binding, &obj, &caps, &[]);
        if name == allowed {
            prop_assert_eq!(reason, None);
        } else {
            prop_assert!(reason.is_some());
        }
    }

    /// Property: queue keys are stable and respect strategy granularity.
    #[test]
    fn queue_keys_are_stable(obj in any_object(), strategy in any_strategy()) {
        prop_assert_eq!(queue_key(&obj, strategy), queue_key(&obj, strategy));

        // Coarser strategies ignore finer fields.
        let mut renamed = obj.clone();
        renamed.metadata.name = Some("different".to_string());
        prop_assert_eq!(
            queue_key(&obj, ReconcileStrategy::Kind),
            queue_key(&renamed, ReconcileStrategy::Kind)
        );
        prop_assert_eq!(
            queue_key(&obj, ReconcileStrategy::KindNs),
            queue_key(&renamed, ReconcileStrategy::KindNs)
        );
        prop_assert_eq!(queue_key(&obj, ReconcileStrategy::Global), "global".to_string());
    }

    /// Property: reconnect backoff never shrinks and never exceeds the cap.
    #[test]
    fn backoff_is_monotone_and_capped(attempt in 0u32..64) {
        let delay = backoff_delay(attempt);
        prop_assert!(delay >= Duration::from_secs(1));
        prop_assert!(delay <= Duration::from_secs(30));
        prop_assert!(delay <= backoff_delay(attempt + 1));
    }
}
