// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::executable_model::{ExecutableApiServer, Operation};
use crate::kubernetes_api_objects::{error::APIError, object_ref::KubeObjectRef};
use crate::podset_controller::exec::{
    labels::labels_for,
    pod::make_pod,
    reconciler::{Error, PodSetReconciler},
};
use crate::podset_controller::trusted::config::{PodSetControllerConfig, PodTemplateConfig};
use crate::reconciler::exec::reconciler::{ReconcileOutcome, Reconciler};
use crate::unit_tests::make_podset;
use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use std::time::Duration;

fn setup(namespace: &str, name: &str, size: i32) -> (PodSetReconciler<ExecutableApiServer>, KubeObjectRef) {
    let api = ExecutableApiServer::new();
    api.create_podset(&make_podset(namespace, name, size)).unwrap();
    let reconciler = PodSetReconciler::new(api, PodSetControllerConfig::default());
    (reconciler, KubeObjectRef::new(namespace, name))
}

async fn run_passes(reconciler: &PodSetReconciler<ExecutableApiServer>, key: &KubeObjectRef, passes: usize) {
    for _ in 0..passes {
        reconciler.reconcile(key).await.unwrap();
    }
}

fn live_pod_names(api: &ExecutableApiServer, namespace: &str) -> Vec<String> {
    api.pods(namespace)
        .iter()
        .filter(|pod| pod.metadata.deletion_timestamp.is_none())
        .map(|pod| pod.name_any())
        .collect()
}

fn status_pod_names(api: &ExecutableApiServer, key: &KubeObjectRef) -> Option<Vec<String>> {
    api.podset(key).unwrap().pod_names().map(|names| names.to_vec())
}

// A pod selected by the PodSet's labels but created by someone else.
fn foreign_pod(api: &ExecutableApiServer, key: &KubeObjectRef, finalizers: Option<Vec<String>>) -> Pod {
    let podset = api.podset(key).unwrap();
    let mut pod = make_pod(&podset, &PodTemplateConfig::default());
    pod.metadata.finalizers = finalizers;
    api.create_pod_directly(&key.namespace, &pod).unwrap()
}

// Tests for the reconcile pass
#[tokio::test]
pub async fn test_scale_up_one_pod_per_pass() {
    let (reconciler, key) = setup("ns1", "demo", 2);
    let api = reconciler.api();

    assert_eq!(ReconcileOutcome::Done, reconciler.reconcile(&key).await.unwrap());
    assert_eq!(1, api.pods("ns1").len());
    assert_eq!(1, api.call_count(Operation::CreatePod));
    // The status reflects the pods seen before the create.
    assert_eq!(Some(Vec::new()), status_pod_names(api, &key));

    reconciler.reconcile(&key).await.unwrap();
    assert_eq!(2, api.pods("ns1").len());
    assert_eq!(2, api.call_count(Operation::CreatePod));
    assert_eq!(1, status_pod_names(api, &key).unwrap().len());

    reconciler.reconcile(&key).await.unwrap();
    assert_eq!(2, api.pods("ns1").len());
    assert_eq!(2, api.call_count(Operation::CreatePod));
    assert_eq!(Some(live_pod_names(api, "ns1")), status_pod_names(api, &key));
    for name in live_pod_names(api, "ns1") {
        assert!(name.starts_with("demo-"));
    }
}

#[tokio::test]
pub async fn test_gap_of_n_takes_n_passes() {
    let (reconciler, key) = setup("ns1", "demo", 5);
    for pass in 1..=5 {
        reconciler.reconcile(&key).await.unwrap();
        assert_eq!(pass, reconciler.api().pods("ns1").len());
    }
    run_passes(&reconciler, &key, 3).await;
    assert_eq!(5, reconciler.api().pods("ns1").len());
    assert_eq!(5, reconciler.api().call_count(Operation::CreatePod));
    assert_eq!(0, reconciler.api().call_count(Operation::DeletePod));
}

#[tokio::test]
pub async fn test_scale_down_one_pod_per_pass() {
    let (reconciler, key) = setup("ns1", "demo", 3);
    let api = reconciler.api();
    run_passes(&reconciler, &key, 4).await;
    assert_eq!(3, api.pods("ns1").len());

    api.set_podset_size(&key, 1).unwrap();
    reconciler.reconcile(&key).await.unwrap();
    assert_eq!(2, api.pods("ns1").len());
    reconciler.reconcile(&key).await.unwrap();
    assert_eq!(1, api.pods("ns1").len());
    reconciler.reconcile(&key).await.unwrap();
    assert_eq!(1, api.pods("ns1").len());
    assert_eq!(2, api.call_count(Operation::DeletePod));
    assert_eq!(Some(live_pod_names(api, "ns1")), status_pod_names(api, &key));
}

#[tokio::test]
pub async fn test_converged_pass_writes_nothing() {
    let (reconciler, key) = setup("ns1", "demo", 2);
    let api = reconciler.api();
    run_passes(&reconciler, &key, 3).await;
    let writes = api.write_count();
    let resource_version = api.podset(&key).unwrap().metadata.resource_version;

    run_passes(&reconciler, &key, 3).await;
    assert_eq!(writes, api.write_count());
    assert_eq!(resource_version, api.podset(&key).unwrap().metadata.resource_version);
}

#[tokio::test]
pub async fn test_size_zero_writes_empty_status_once() {
    let (reconciler, key) = setup("ns1", "demo", 0);
    let api = reconciler.api();
    run_passes(&reconciler, &key, 2).await;
    assert!(api.pods("ns1").is_empty());
    assert_eq!(Some(Vec::new()), status_pod_names(api, &key));
    assert_eq!(1, api.write_count());
}

#[tokio::test]
pub async fn test_negative_size_is_treated_as_zero() {
    let (reconciler, key) = setup("ns1", "demo", -3);
    let api = reconciler.api();
    foreign_pod(api, &key, None);
    foreign_pod(api, &key, None);

    run_passes(&reconciler, &key, 3).await;
    assert!(api.pods("ns1").is_empty());
    assert_eq!(0, api.call_count(Operation::CreatePod));
    assert_eq!(2, api.call_count(Operation::DeletePod));
    assert_eq!(Some(Vec::new()), status_pod_names(api, &key));
}

#[tokio::test]
pub async fn test_missing_podset_ends_quietly() {
    let api = ExecutableApiServer::new();
    let reconciler = PodSetReconciler::new(api, PodSetControllerConfig::default());
    let key = KubeObjectRef::new("ns1", "ghost");
    assert_eq!(ReconcileOutcome::Done, reconciler.reconcile(&key).await.unwrap());
    assert_eq!(0, reconciler.api().call_count(Operation::ListPods));
    assert_eq!(0, reconciler.api().write_count());
}

#[tokio::test]
pub async fn test_deleted_podset_ends_quietly() {
    let (reconciler, key) = setup("ns1", "demo", 2);
    run_passes(&reconciler, &key, 3).await;
    reconciler.api().delete_podset(&key).unwrap();
    let writes = reconciler.api().write_count();

    assert_eq!(ReconcileOutcome::Done, reconciler.reconcile(&key).await.unwrap());
    assert_eq!(writes, reconciler.api().write_count());
    assert!(reconciler.api().pods("ns1").is_empty());
}

#[tokio::test]
pub async fn test_terminating_pods_are_not_counted() {
    let (reconciler, key) = setup("ns1", "demo", 1);
    let api = reconciler.api();
    let held = foreign_pod(api, &key, Some(vec!["example.com/hold".to_string()]));
    let held_key = KubeObjectRef::new("ns1", held.name_any());
    api.delete_pod_directly(&held_key).unwrap();
    assert!(api.pods("ns1")[0].metadata.deletion_timestamp.is_some());

    reconciler.reconcile(&key).await.unwrap();
    assert_eq!(1, api.call_count(Operation::CreatePod));
    assert_eq!(2, api.pods("ns1").len());
    assert_eq!(Some(Vec::new()), status_pod_names(api, &key));

    reconciler.reconcile(&key).await.unwrap();
    assert_eq!(1, api.call_count(Operation::CreatePod));
    assert_eq!(0, api.call_count(Operation::DeletePod));
    let names = status_pod_names(api, &key).unwrap();
    assert_eq!(1, names.len());
    assert!(!names.contains(&held.name_any()));

    api.finalize_pod(&held_key).unwrap();
    reconciler.reconcile(&key).await.unwrap();
    assert_eq!(1, api.pods("ns1").len());
}

#[tokio::test]
pub async fn test_terminating_pods_are_not_deleted_again() {
    let (reconciler, key) = setup("ns1", "demo", 0);
    let api = reconciler.api();
    let held = foreign_pod(api, &key, Some(vec!["example.com/hold".to_string()]));
    api.delete_pod_directly(&KubeObjectRef::new("ns1", held.name_any())).unwrap();

    run_passes(&reconciler, &key, 2).await;
    assert_eq!(0, api.call_count(Operation::DeletePod));
    assert_eq!(1, api.pods("ns1").len());
}

#[tokio::test]
pub async fn test_podsets_do_not_share_pods() {
    let api = ExecutableApiServer::new();
    api.create_podset(&make_podset("ns1", "a", 2)).unwrap();
    api.create_podset(&make_podset("ns1", "b", 1)).unwrap();
    let reconciler = PodSetReconciler::new(api, PodSetControllerConfig::default());
    let a = KubeObjectRef::new("ns1", "a");
    let b = KubeObjectRef::new("ns1", "b");
    for _ in 0..3 {
        reconciler.reconcile(&a).await.unwrap();
        reconciler.reconcile(&b).await.unwrap();
    }

    let api = reconciler.api();
    assert_eq!(3, api.pods("ns1").len());
    let a_names = status_pod_names(api, &a).unwrap();
    let b_names = status_pod_names(api, &b).unwrap();
    assert_eq!(2, a_names.len());
    assert_eq!(1, b_names.len());
    assert!(a_names.iter().all(|name| name.starts_with("a-")));
    assert!(b_names.iter().all(|name| name.starts_with("b-")));
}

#[tokio::test]
pub async fn test_same_name_in_other_namespace_is_separate() {
    let api = ExecutableApiServer::new();
    api.create_podset(&make_podset("ns1", "demo", 1)).unwrap();
    api.create_podset(&make_podset("ns2", "demo", 2)).unwrap();
    let reconciler = PodSetReconciler::new(api, PodSetControllerConfig::default());
    let key1 = KubeObjectRef::new("ns1", "demo");
    let key2 = KubeObjectRef::new("ns2", "demo");
    run_passes(&reconciler, &key1, 3).await;
    run_passes(&reconciler, &key2, 3).await;
    assert_eq!(1, reconciler.api().pods("ns1").len());
    assert_eq!(2, reconciler.api().pods("ns2").len());
}

#[tokio::test]
pub async fn test_pod_gets_labels_and_controller_reference() {
    let (reconciler, key) = setup("ns1", "demo", 1);
    reconciler.reconcile(&key).await.unwrap();
    let api = reconciler.api();
    let podset = api.podset(&key).unwrap();
    let pod = api.pods("ns1").remove(0);

    assert_eq!(Some(labels_for(&podset)), pod.metadata.labels);
    let owner_references = pod.metadata.owner_references.unwrap();
    assert_eq!(1, owner_references.len());
    assert_eq!("PodSet", owner_references[0].kind);
    assert_eq!("anvil.dev/v1alpha1", owner_references[0].api_version);
    assert_eq!("demo", owner_references[0].name);
    assert_eq!(podset.metadata.uid.unwrap(), owner_references[0].uid);
    assert_eq!(Some(true), owner_references[0].controller);
}

#[tokio::test]
pub async fn test_pod_uses_configured_template() {
    let api = ExecutableApiServer::new();
    api.create_podset(&make_podset("ns1", "demo", 1)).unwrap();
    let config = PodSetControllerConfig {
        pod_template: PodTemplateConfig::busybox(),
        ..PodSetControllerConfig::default()
    };
    let reconciler = PodSetReconciler::new(api, config);
    reconciler.reconcile(&KubeObjectRef::new("ns1", "demo")).await.unwrap();
    let pod = reconciler.api().pods("ns1").remove(0);
    assert_eq!(Some("busybox".to_string()), pod.spec.unwrap().containers[0].image);
}

#[tokio::test]
pub async fn test_resync_period_requeues() {
    let api = ExecutableApiServer::new();
    api.create_podset(&make_podset("ns1", "demo", 1)).unwrap();
    let config = PodSetControllerConfig {
        resync_period: Some(Duration::from_secs(30)),
        ..PodSetControllerConfig::default()
    };
    let reconciler = PodSetReconciler::new(api, config);
    let outcome = reconciler.reconcile(&KubeObjectRef::new("ns1", "demo")).await.unwrap();
    assert_eq!(ReconcileOutcome::RequeueAfter(Duration::from_secs(30)), outcome);
}

// Tests for failed requests
#[tokio::test]
pub async fn test_get_failure_is_reported() {
    let (reconciler, key) = setup("ns1", "demo", 1);
    reconciler.api().fail_next(Operation::GetPodSet, APIError::Timeout);
    match reconciler.reconcile(&key).await {
        Err(Error::GetPodSetFailed(APIError::Timeout)) => {}
        other => panic!("unexpected result {:?}", other),
    }
    assert_eq!(0, reconciler.api().write_count());
}

#[tokio::test]
pub async fn test_list_failure_skips_all_writes() {
    let (reconciler, key) = setup("ns1", "demo", 1);
    reconciler.api().fail_next(Operation::ListPods, APIError::InternalError);
    match reconciler.reconcile(&key).await {
        Err(Error::ListPodsFailed(APIError::InternalError)) => {}
        other => panic!("unexpected result {:?}", other),
    }
    assert_eq!(0, reconciler.api().write_count());
    assert_eq!(None, status_pod_names(reconciler.api(), &key));
}

#[tokio::test]
pub async fn test_create_failure_then_recovery() {
    let (reconciler, key) = setup("ns1", "demo", 1);
    let api = reconciler.api();
    api.fail_next(Operation::CreatePod, APIError::InternalError);
    match reconciler.reconcile(&key).await {
        Err(Error::CreatePodFailed(APIError::InternalError)) => {}
        other => panic!("unexpected result {:?}", other),
    }
    assert!(api.pods("ns1").is_empty());
    assert_eq!(0, api.call_count(Operation::UpdatePodSetStatus));

    run_passes(&reconciler, &key, 2).await;
    assert_eq!(1, api.pods("ns1").len());
    assert_eq!(Some(live_pod_names(api, "ns1")), status_pod_names(api, &key));
}

#[tokio::test]
pub async fn test_delete_failure_then_recovery() {
    let (reconciler, key) = setup("ns1", "demo", 0);
    let api = reconciler.api();
    foreign_pod(api, &key, None);
    api.fail_next(Operation::DeletePod, APIError::ObjectNotFound);
    match reconciler.reconcile(&key).await {
        Err(Error::DeletePodFailed(APIError::ObjectNotFound)) => {}
        other => panic!("unexpected result {:?}", other),
    }
    assert_eq!(1, api.pods("ns1").len());

    run_passes(&reconciler, &key, 2).await;
    assert!(api.pods("ns1").is_empty());
}

#[tokio::test]
pub async fn test_status_conflict_is_reported() {
    let (reconciler, key) = setup("ns1", "demo", 1);
    reconciler.api().fail_next(Operation::UpdatePodSetStatus, APIError::Conflict);
    let err = reconciler.reconcile(&key).await.unwrap_err();
    assert!(err.is_conflict());
    // The pod was created before the status write failed.
    assert_eq!(1, reconciler.api().pods("ns1").len());

    run_passes(&reconciler, &key, 2).await;
    assert_eq!(1, reconciler.api().pods("ns1").len());
    assert_eq!(1, status_pod_names(reconciler.api(), &key).unwrap().len());
}

#[tokio::test]
pub async fn test_other_errors_are_not_conflicts() {
    let (reconciler, key) = setup("ns1", "demo", 1);
    reconciler.api().fail_next(Operation::CreatePod, APIError::Conflict);
    let err = reconciler.reconcile(&key).await.unwrap_err();
    assert!(!err.is_conflict());
}
