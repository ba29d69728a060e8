// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::kubernetes_api_objects::{
    error::APIError, label_selector::to_selector_string, object_ref::KubeObjectRef,
};
use crate::podset_controller::trusted::{cluster_api::ClusterApi, spec_types::PodSet};
use crate::shim_layer::fault_injection::crash_or_continue;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::{
    api::{Api, DeleteParams, ListParams, PostParams},
    Client,
};
use std::collections::BTreeMap;
use tracing::*;

/// KubeApiClient serves ClusterApi from a live cluster through kube-rs.
///
/// With fault injection on, every successful write is followed by a
/// crash_or_continue check, so the controller can be killed right after any
/// create, delete or status update it issues.
#[derive(Clone)]
pub struct KubeApiClient {
    client: Client,
    fault_injection: bool,
}

impl KubeApiClient {
    pub fn new(client: Client) -> KubeApiClient {
        KubeApiClient {
            client,
            fault_injection: false,
        }
    }

    pub fn with_fault_injection(client: Client) -> KubeApiClient {
        KubeApiClient {
            client,
            fault_injection: true,
        }
    }

    async fn check_fault_timing(&self, what: &str) {
        if !self.fault_injection {
            return;
        }
        if let Err(e) = crash_or_continue(&self.client).await {
            warn!("crash_or_continue after {} fails due to {}", what, e);
        }
    }
}

#[async_trait]
impl ClusterApi for KubeApiClient {
    async fn get_podset(&self, key: &KubeObjectRef) -> Result<PodSet, APIError> {
        // A quorum read, not a cache read, so the pass sees the latest spec.
        Api::<PodSet>::namespaced(self.client.clone(), &key.namespace)
            .get(&key.name)
            .await
            .map_err(|e| kube_error_to_api_error(&e))
    }

    async fn list_pods(
        &self,
        namespace: &str,
        selector: &BTreeMap<String, String>,
    ) -> Result<Vec<Pod>, APIError> {
        let lp = ListParams::default().labels(&to_selector_string(selector));
        let pod_list = Api::<Pod>::namespaced(self.client.clone(), namespace)
            .list(&lp)
            .await
            .map_err(|e| kube_error_to_api_error(&e))?;
        Ok(pod_list.items)
    }

    async fn create_pod(&self, namespace: &str, pod: &Pod) -> Result<Pod, APIError> {
        let created = Api::<Pod>::namespaced(self.client.clone(), namespace)
            .create(&PostParams::default(), pod)
            .await
            .map_err(|e| kube_error_to_api_error(&e))?;
        self.check_fault_timing("create").await;
        Ok(created)
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), APIError> {
        Api::<Pod>::namespaced(self.client.clone(), namespace)
            .delete(name, &DeleteParams::default())
            .await
            .map_err(|e| kube_error_to_api_error(&e))?;
        self.check_fault_timing("delete").await;
        Ok(())
    }

    async fn update_podset_status(&self, podset: &PodSet) -> Result<PodSet, APIError> {
        let name = podset.metadata.name.as_ref().ok_or(APIError::BadRequest)?;
        let namespace = podset.metadata.namespace.as_ref().ok_or(APIError::BadRequest)?;
        let data = serde_json::to_vec(podset).map_err(|e| APIError::Other(e.to_string()))?;
        // The body carries metadata.resourceVersion, so a stale write is rejected with Conflict.
        let updated = Api::<PodSet>::namespaced(self.client.clone(), namespace)
            .replace_status(name, &PostParams::default(), data)
            .await
            .map_err(|e| kube_error_to_api_error(&e))?;
        self.check_fault_timing("update status").await;
        Ok(updated)
    }
}

// kube_error_to_api_error translates the error from kube-rs APIs
// to the form the reconciler matches on.
pub fn kube_error_to_api_error(error: &kube::Error) -> APIError {
    match error {
        kube::Error::Api(error_resp) => APIError::from_reason(&error_resp.reason, &error_resp.message),
        _ => APIError::Other(error.to_string()),
    }
}
