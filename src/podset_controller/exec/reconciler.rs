// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::kubernetes_api_objects::{error::APIError, object_ref::KubeObjectRef};
use crate::podset_controller::exec::{labels::labels_for, pod::make_pod};
use crate::podset_controller::trusted::{
    cluster_api::ClusterApi, config::PodSetControllerConfig, spec_types::PodSet,
    spec_types::PodSetStatus,
};
use crate::reconciler::exec::reconciler::{ReconcileOutcome, Reconciler};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::{Resource, ResourceExt};
use thiserror::Error;
use tracing::*;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Failed to get PodSet: {0}")]
    GetPodSetFailed(#[source] APIError),
    #[error("Failed to list Pods: {0}")]
    ListPodsFailed(#[source] APIError),
    #[error("Failed to create Pod: {0}")]
    CreatePodFailed(#[source] APIError),
    #[error("Failed to delete Pod: {0}")]
    DeletePodFailed(#[source] APIError),
    #[error("Failed to update PodSet status: {0}")]
    UpdateStatusFailed(#[source] APIError),
    #[error("MissingObjectKey: {0}")]
    MissingObjectKey(&'static str),
}

impl Error {
    /// True if the pass failed because it wrote with a stale resource version.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::UpdateStatusFailed(e) if e.is_conflict())
    }
}

/// PodSetReconciler drives the pod count of one PodSet towards `spec.size`,
/// one pod per pass.
pub struct PodSetReconciler<A> {
    api: A,
    config: PodSetControllerConfig,
}

impl<A: ClusterApi> PodSetReconciler<A> {
    pub fn new(api: A, config: PodSetControllerConfig) -> PodSetReconciler<A> {
        PodSetReconciler { api, config }
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    pub fn config(&self) -> &PodSetControllerConfig {
        &self.config
    }

    /// One reconcile pass:
    /// fetch the PodSet, list its live pods, create or delete at most one pod,
    /// then write `status.podNames` if it changed.
    pub async fn reconcile_podset(&self, key: &KubeObjectRef) -> Result<ReconcileOutcome, Error> {
        let log_header = format!("Reconciling PodSet {}:", key);
        info!("{} starting", log_header);

        let podset = match self.api.get_podset(key).await {
            Err(APIError::ObjectNotFound) => {
                // The pods are owned by the PodSet and get garbage collected with it.
                info!("{} PodSet not found, end reconcile", log_header);
                return Ok(ReconcileOutcome::Done);
            }
            Err(e) => return Err(Error::GetPodSetFailed(e)),
            Ok(podset) => podset,
        };

        let pods = self.list_pods(&podset).await?;
        let actual_size = pods.len();
        let expected_size = podset.desired_size();
        info!(
            "{} {} pods exist, {} expected",
            log_header, actual_size, expected_size
        );

        if expected_size > 0 && actual_size < expected_size {
            info!("{} adding a pod", log_header);
            self.add_pod(&podset).await?;
        } else if actual_size > 0 && actual_size > expected_size {
            info!("{} removing a pod", log_header);
            self.remove_pod(&podset, &pods).await?;
        }

        // Status reflects the pods observed before the action above; the
        // create/delete event triggers the pass that catches it up.
        self.update_status(podset, &pods, &log_header).await?;

        info!("{} done", log_header);
        Ok(match self.config.resync_period {
            Some(period) => ReconcileOutcome::RequeueAfter(period),
            None => ReconcileOutcome::Done,
        })
    }

    /// Lists the pods selected by the PodSet's labels, leaving out the ones
    /// already being deleted so they are neither counted nor deleted twice.
    async fn list_pods(&self, podset: &PodSet) -> Result<Vec<Pod>, Error> {
        let namespace = podset
            .metadata
            .namespace
            .as_deref()
            .ok_or(Error::MissingObjectKey(".metadata.namespace"))?;
        let pods = self
            .api
            .list_pods(namespace, &labels_for(podset))
            .await
            .map_err(Error::ListPodsFailed)?;
        Ok(pods
            .into_iter()
            .filter(|pod| pod.metadata.deletion_timestamp.is_none())
            .collect())
    }

    async fn add_pod(&self, podset: &PodSet) -> Result<(), Error> {
        let mut pod = make_pod(podset, &self.config.pod_template);
        set_controller_reference(podset, &mut pod)?;
        let namespace = pod
            .metadata
            .namespace
            .clone()
            .ok_or(Error::MissingObjectKey(".metadata.namespace"))?;
        let created = self
            .api
            .create_pod(&namespace, &pod)
            .await
            .map_err(Error::CreatePodFailed)?;
        debug!("created pod {}", created.name_any());
        Ok(())
    }

    /// Deletes the first pod of the list. No ordering is applied; any single
    /// pod will do since the next pass re-evaluates the count.
    async fn remove_pod(&self, podset: &PodSet, pods: &[Pod]) -> Result<(), Error> {
        let namespace = podset
            .metadata
            .namespace
            .as_deref()
            .ok_or(Error::MissingObjectKey(".metadata.namespace"))?;
        let victim = match pods.first() {
            Some(pod) => pod,
            None => return Ok(()),
        };
        let name = victim
            .metadata
            .name
            .as_deref()
            .ok_or(Error::MissingObjectKey(".metadata.name"))?;
        self.api
            .delete_pod(namespace, name)
            .await
            .map_err(Error::DeletePodFailed)?;
        debug!("deleted pod {}", name);
        Ok(())
    }

    async fn update_status(
        &self,
        mut podset: PodSet,
        pods: &[Pod],
        log_header: &str,
    ) -> Result<(), Error> {
        let pod_names = pod_names(pods);
        let unchanged = match podset.pod_names() {
            Some(current) => current.iter().eq(pod_names.iter()),
            None => false,
        };
        if unchanged {
            return Ok(());
        }
        info!("{} updating status to {} pod names", log_header, pod_names.len());
        podset.status = Some(PodSetStatus { pod_names });
        self.api
            .update_podset_status(&podset)
            .await
            .map_err(Error::UpdateStatusFailed)?;
        Ok(())
    }
}

#[async_trait]
impl<A: ClusterApi> Reconciler for PodSetReconciler<A> {
    type Error = Error;

    async fn reconcile(&self, key: &KubeObjectRef) -> Result<ReconcileOutcome, Error> {
        self.reconcile_podset(key).await
    }
}

/// Marks `podset` as the controlling owner of `pod`, so the garbage
/// collector removes the pod once the PodSet is gone.
pub fn set_controller_reference(podset: &PodSet, pod: &mut Pod) -> Result<(), Error> {
    let owner_ref = podset
        .controller_owner_ref(&())
        .ok_or(Error::MissingObjectKey(".metadata.uid"))?;
    let owner_references = pod.metadata.owner_references.get_or_insert_with(Vec::new);
    owner_references.retain(|existing| existing.uid != owner_ref.uid);
    owner_references.push(owner_ref);
    Ok(())
}

fn pod_names(pods: &[Pod]) -> Vec<String> {
    pods.iter()
        .filter_map(|pod| pod.metadata.name.clone())
        .collect()
}
