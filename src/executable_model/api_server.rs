// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::executable_model::api_server_state::ApiServerState;
use crate::kubernetes_api_objects::{
    error::APIError, label_selector::matches_opt, object_ref::KubeObjectRef,
};
use crate::podset_controller::trusted::{cluster_api::ClusterApi, spec_types::PodSet};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference, Time};
use k8s_openapi::chrono::Utc;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

// The ExecutableApiServer is an in-memory stand-in for the Kubernetes API
// server, covering the requests the PodSet controller issues plus the ones
// users and the garbage collector make. It follows the API server where the
// controller's correctness depends on it:
// - created objects get a fresh uid and resource version, and pods named
//   only by generateName get a unique random-looking suffix;
// - deleting an object with finalizers only stamps its deletion timestamp;
// - a status update must carry the current resource version, or it fails
//   with Conflict, and it changes nothing but the status;
// - deleting a PodSet garbage collects the pods it controls.

/// The requests a ClusterApi client can issue, used to count calls and to
/// inject failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Operation {
    GetPodSet,
    ListPods,
    CreatePod,
    DeletePod,
    UpdatePodSetStatus,
}

impl Operation {
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            Operation::CreatePod | Operation::DeletePod | Operation::UpdatePodSetStatus
        )
    }
}

// Same alphabet as the API server's name generator.
const NAME_SUFFIX_ALPHABET: &[u8] = b"bcdfghjklmnpqrstvwxz2456789";
const NAME_SUFFIX_LEN: usize = 5;

fn generated_name_suffix(counter: u64) -> String {
    let base = NAME_SUFFIX_ALPHABET.len() as u64;
    // Spread consecutive counters so names do not look sequential.
    let mut n = counter.wrapping_mul(2_654_435_761) % base.pow(NAME_SUFFIX_LEN as u32);
    let mut suffix = Vec::with_capacity(NAME_SUFFIX_LEN);
    for _ in 0..NAME_SUFFIX_LEN {
        suffix.push(NAME_SUFFIX_ALPHABET[(n % base) as usize]);
        n /= base;
    }
    String::from_utf8_lossy(&suffix).into_owned()
}

fn controller_references(owner_references: &[OwnerReference]) -> usize {
    owner_references
        .iter()
        .filter(|owner_ref| owner_ref.controller == Some(true))
        .count()
}

fn metadata_validity_check(metadata: &ObjectMeta) -> Option<APIError> {
    match &metadata.owner_references {
        Some(owner_references) if controller_references(owner_references) > 1 => {
            Some(APIError::Invalid)
        }
        _ => None,
    }
}

fn has_finalizers(metadata: &ObjectMeta) -> bool {
    metadata
        .finalizers
        .as_ref()
        .map_or(false, |finalizers| !finalizers.is_empty())
}

fn is_controlled_by(metadata: &ObjectMeta, owner_uid: &str) -> bool {
    metadata.owner_references.as_ref().map_or(false, |owner_references| {
        owner_references
            .iter()
            .any(|owner_ref| owner_ref.controller == Some(true) && owner_ref.uid == owner_uid)
    })
}

impl ApiServerState {
    pub fn handle_get_podset(&self, key: &KubeObjectRef) -> Result<PodSet, APIError> {
        self.podsets.get(key).cloned().ok_or(APIError::ObjectNotFound)
    }

    pub fn handle_create_podset(&mut self, podset: &PodSet) -> Result<PodSet, APIError> {
        let name = podset.metadata.name.clone().ok_or(APIError::Invalid)?;
        let namespace = podset.metadata.namespace.clone().ok_or(APIError::BadRequest)?;
        let key = KubeObjectRef::new(namespace, name);
        if self.podsets.contains_key(&key) {
            return Err(APIError::ObjectAlreadyExists);
        }
        let mut created = podset.clone();
        created.metadata.uid = Some(self.next_uid());
        created.metadata.resource_version = Some(self.next_resource_version());
        created.metadata.deletion_timestamp = None;
        self.podsets.insert(key, created.clone());
        Ok(created)
    }

    /// A user update of the PodSet: spec and metadata change, status is kept.
    pub fn handle_update_podset(&mut self, podset: &PodSet) -> Result<PodSet, APIError> {
        let key = self.update_admission_check(podset)?;
        let old = self.podsets.get(&key).cloned().ok_or(APIError::ObjectNotFound)?;
        let mut updated = podset.clone();
        updated.metadata.uid = old.metadata.uid.clone();
        updated.metadata.deletion_timestamp = old.metadata.deletion_timestamp.clone();
        updated.metadata.resource_version = old.metadata.resource_version.clone();
        updated.status = old.status.clone();
        if updated == old {
            return Ok(old);
        }
        updated.metadata.resource_version = Some(self.next_resource_version());
        self.podsets.insert(key, updated.clone());
        Ok(updated)
    }

    pub fn handle_update_podset_status(&mut self, podset: &PodSet) -> Result<PodSet, APIError> {
        let key = self.update_admission_check(podset)?;
        let old = self.podsets.get(&key).cloned().ok_or(APIError::ObjectNotFound)?;
        let mut updated = old.clone();
        updated.status = podset.status.clone();
        if updated == old {
            return Ok(old);
        }
        updated.metadata.resource_version = Some(self.next_resource_version());
        self.podsets.insert(key, updated.clone());
        Ok(updated)
    }

    // Custom resources must be updated with a resource version; a stale one is a conflict.
    fn update_admission_check(&self, podset: &PodSet) -> Result<KubeObjectRef, APIError> {
        let name = podset.metadata.name.clone().ok_or(APIError::BadRequest)?;
        let namespace = podset.metadata.namespace.clone().ok_or(APIError::BadRequest)?;
        let key = KubeObjectRef::new(namespace, name);
        let stored = self.podsets.get(&key).ok_or(APIError::ObjectNotFound)?;
        match &podset.metadata.resource_version {
            None => Err(APIError::Invalid),
            Some(rv) if Some(rv) != stored.metadata.resource_version.as_ref() => {
                Err(APIError::Conflict)
            }
            Some(_) => match &podset.metadata.uid {
                Some(uid) if Some(uid) != stored.metadata.uid.as_ref() => {
                    Err(APIError::InternalError)
                }
                _ => Ok(key),
            },
        }
    }

    /// Deletes the PodSet and garbage collects the pods it controls.
    pub fn handle_delete_podset(&mut self, key: &KubeObjectRef) -> Result<(), APIError> {
        let podset = self.podsets.remove(key).ok_or(APIError::ObjectNotFound)?;
        self.resource_version_counter += 1;
        if let Some(uid) = podset.metadata.uid {
            let dependents: Vec<KubeObjectRef> = self
                .pods
                .iter()
                .filter(|(pod_key, pod)| {
                    pod_key.namespace == key.namespace && is_controlled_by(&pod.metadata, &uid)
                })
                .map(|(pod_key, _)| pod_key.clone())
                .collect();
            for pod_key in dependents {
                self.handle_delete_pod(&pod_key)?;
            }
        }
        Ok(())
    }

    pub fn handle_list_pods(
        &self,
        namespace: &str,
        selector: &BTreeMap<String, String>,
    ) -> Vec<Pod> {
        self.pods_in(namespace)
            .into_iter()
            .filter(|pod| matches_opt(selector, pod.metadata.labels.as_ref()))
            .cloned()
            .collect()
    }

    pub fn handle_create_pod(&mut self, namespace: &str, pod: &Pod) -> Result<Pod, APIError> {
        if let Some(ns) = &pod.metadata.namespace {
            if ns != namespace {
                return Err(APIError::BadRequest);
            }
        }
        if let Some(err) = metadata_validity_check(&pod.metadata) {
            return Err(err);
        }
        let name = match (&pod.metadata.name, &pod.metadata.generate_name) {
            (Some(name), _) => name.clone(),
            (None, Some(prefix)) => {
                let suffix = generated_name_suffix(self.generate_name_counter);
                self.generate_name_counter += 1;
                format!("{}{}", prefix, suffix)
            }
            (None, None) => return Err(APIError::Invalid),
        };
        let key = KubeObjectRef::new(namespace, name.clone());
        if self.pods.contains_key(&key) {
            return Err(APIError::ObjectAlreadyExists);
        }
        let mut created = pod.clone();
        created.metadata.name = Some(name);
        created.metadata.namespace = Some(namespace.to_string());
        created.metadata.uid = Some(self.next_uid());
        created.metadata.resource_version = Some(self.next_resource_version());
        created.metadata.deletion_timestamp = None;
        self.pods.insert(key, created.clone());
        Ok(created)
    }

    pub fn handle_delete_pod(&mut self, key: &KubeObjectRef) -> Result<(), APIError> {
        let pod = self.pods.get(key).cloned().ok_or(APIError::ObjectNotFound)?;
        if has_finalizers(&pod.metadata) {
            if pod.metadata.deletion_timestamp.is_none() {
                let mut stamped = pod;
                stamped.metadata.deletion_timestamp = Some(Time(Utc::now()));
                stamped.metadata.resource_version = Some(self.next_resource_version());
                self.pods.insert(key.clone(), stamped);
            }
        } else {
            self.pods.remove(key);
            self.resource_version_counter += 1;
        }
        Ok(())
    }

    /// Drops the pod's finalizers, as the component holding them would; a
    /// pod already marked for deletion goes away.
    pub fn handle_finalize_pod(&mut self, key: &KubeObjectRef) -> Result<(), APIError> {
        let mut pod = self.pods.get(key).cloned().ok_or(APIError::ObjectNotFound)?;
        if pod.metadata.deletion_timestamp.is_some() {
            self.pods.remove(key);
            self.resource_version_counter += 1;
        } else {
            pod.metadata.finalizers = None;
            pod.metadata.resource_version = Some(self.next_resource_version());
            self.pods.insert(key.clone(), pod);
        }
        Ok(())
    }
}

/// ExecutableApiServer serves ClusterApi from an ApiServerState.
///
/// Failures can be queued per operation with `fail_next`; each queued
/// failure is returned by exactly one later call of that operation.
#[derive(Default)]
pub struct ExecutableApiServer {
    state: Mutex<ApiServerState>,
    injected_failures: Mutex<Vec<(Operation, APIError)>>,
    calls: Mutex<BTreeMap<Operation, usize>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ExecutableApiServer {
    pub fn new() -> ExecutableApiServer {
        ExecutableApiServer::default()
    }

    /// A copy of the current state.
    pub fn state(&self) -> ApiServerState {
        lock(&self.state).clone()
    }

    pub fn fail_next(&self, operation: Operation, error: APIError) {
        lock(&self.injected_failures).push((operation, error));
    }

    pub fn call_count(&self, operation: Operation) -> usize {
        lock(&self.calls).get(&operation).copied().unwrap_or(0)
    }

    pub fn write_count(&self) -> usize {
        lock(&self.calls)
            .iter()
            .filter(|(operation, _)| operation.is_write())
            .map(|(_, count)| count)
            .sum()
    }

    pub fn create_podset(&self, podset: &PodSet) -> Result<PodSet, APIError> {
        lock(&self.state).handle_create_podset(podset)
    }

    pub fn update_podset(&self, podset: &PodSet) -> Result<PodSet, APIError> {
        lock(&self.state).handle_update_podset(podset)
    }

    /// Reads the PodSet and writes it back with a new size, as `kubectl scale` would.
    pub fn set_podset_size(&self, key: &KubeObjectRef, size: i32) -> Result<PodSet, APIError> {
        let mut state = lock(&self.state);
        let mut podset = state.handle_get_podset(key)?;
        podset.spec.size = size;
        state.handle_update_podset(&podset)
    }

    pub fn delete_podset(&self, key: &KubeObjectRef) -> Result<(), APIError> {
        lock(&self.state).handle_delete_podset(key)
    }

    /// Creates a pod the way any client would, outside the reconciler.
    pub fn create_pod_directly(&self, namespace: &str, pod: &Pod) -> Result<Pod, APIError> {
        lock(&self.state).handle_create_pod(namespace, pod)
    }

    pub fn delete_pod_directly(&self, key: &KubeObjectRef) -> Result<(), APIError> {
        lock(&self.state).handle_delete_pod(key)
    }

    pub fn finalize_pod(&self, key: &KubeObjectRef) -> Result<(), APIError> {
        lock(&self.state).handle_finalize_pod(key)
    }

    pub fn pods(&self, namespace: &str) -> Vec<Pod> {
        lock(&self.state)
            .pods_in(namespace)
            .into_iter()
            .cloned()
            .collect()
    }

    pub fn podset(&self, key: &KubeObjectRef) -> Option<PodSet> {
        lock(&self.state).podsets.get(key).cloned()
    }

    fn begin(&self, operation: Operation) -> Result<(), APIError> {
        *lock(&self.calls).entry(operation).or_insert(0) += 1;
        let mut failures = lock(&self.injected_failures);
        match failures.iter().position(|(op, _)| *op == operation) {
            Some(idx) => Err(failures.remove(idx).1),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ClusterApi for ExecutableApiServer {
    async fn get_podset(&self, key: &KubeObjectRef) -> Result<PodSet, APIError> {
        self.begin(Operation::GetPodSet)?;
        lock(&self.state).handle_get_podset(key)
    }

    async fn list_pods(
        &self,
        namespace: &str,
        selector: &BTreeMap<String, String>,
    ) -> Result<Vec<Pod>, APIError> {
        self.begin(Operation::ListPods)?;
        Ok(lock(&self.state).handle_list_pods(namespace, selector))
    }

    async fn create_pod(&self, namespace: &str, pod: &Pod) -> Result<Pod, APIError> {
        self.begin(Operation::CreatePod)?;
        lock(&self.state).handle_create_pod(namespace, pod)
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), APIError> {
        self.begin(Operation::DeletePod)?;
        lock(&self.state).handle_delete_pod(&KubeObjectRef::new(namespace, name))
    }

    async fn update_podset_status(&self, podset: &PodSet) -> Result<PodSet, APIError> {
        self.begin(Operation::UpdatePodSetStatus)?;
        lock(&self.state).handle_update_podset_status(podset)
    }
}
