// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::kubernetes_api_objects::{error::APIError, object_ref::KubeObjectRef};
use crate::podset_controller::trusted::spec_types::PodSet;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use std::collections::BTreeMap;
use std::sync::Arc;

/// ClusterApi is the slice of the API server the PodSet reconciler talks to.
///
/// The API server is the only source of truth: the reconciler caches nothing
/// between calls. Writes are checked against resource versions where
/// Kubernetes checks them, so a stale status write fails with
/// `APIError::Conflict`.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Fails with `APIError::ObjectNotFound` if the PodSet does not exist.
    async fn get_podset(&self, key: &KubeObjectRef) -> Result<PodSet, APIError>;

    /// Lists every pod in `namespace` carrying all of the `selector` labels,
    /// including pods that are already terminating.
    async fn list_pods(
        &self,
        namespace: &str,
        selector: &BTreeMap<String, String>,
    ) -> Result<Vec<Pod>, APIError>;

    /// Creates the pod; its final name is assigned from `metadata.generateName`.
    async fn create_pod(&self, namespace: &str, pod: &Pod) -> Result<Pod, APIError>;

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), APIError>;

    /// Writes the status subresource. Only `status` is taken from `podset`;
    /// `metadata.resourceVersion` must match the stored object.
    async fn update_podset_status(&self, podset: &PodSet) -> Result<PodSet, APIError>;
}

#[async_trait]
impl<T: ClusterApi + ?Sized> ClusterApi for Arc<T> {
    async fn get_podset(&self, key: &KubeObjectRef) -> Result<PodSet, APIError> {
        (**self).get_podset(key).await
    }

    async fn list_pods(
        &self,
        namespace: &str,
        selector: &BTreeMap<String, String>,
    ) -> Result<Vec<Pod>, APIError> {
        (**self).list_pods(namespace, selector).await
    }

    async fn create_pod(&self, namespace: &str, pod: &Pod) -> Result<Pod, APIError> {
        (**self).create_pod(namespace, pod).await
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), APIError> {
        (**self).delete_pod(namespace, name).await
    }

    async fn update_podset_status(&self, podset: &PodSet) -> Result<PodSet, APIError> {
        (**self).update_podset_status(podset).await
    }
}
