// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

/// PodSet declares how many pods should run for it. The pods it owns are
/// found by label (see `podset_controller::exec::labels`), never by a field
/// read back from the pod.
#[derive(
    kube::CustomResource,
    Default,
    Debug,
    Clone,
    serde::Deserialize,
    serde::Serialize,
    schemars::JsonSchema,
    PartialEq,
)]
#[kube(group = "anvil.dev", version = "v1alpha1", kind = "PodSet")]
#[kube(shortname = "ps", namespaced)]
#[kube(status = "PodSetStatus")]
#[kube(derive = "PartialEq")]
#[kube(printcolumn = r#"{"name":"Size", "type":"integer", "jsonPath":".spec.size"}"#)]
#[kube(printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#)]
pub struct PodSetSpec {
    #[schemars(range(min = 0))]
    pub size: i32,
}

/// PodSetStatus is written only by the controller.
#[derive(
    Clone, Debug, Default, serde::Deserialize, serde::Serialize, schemars::JsonSchema, PartialEq,
)]
pub struct PodSetStatus {
    #[serde(rename = "podNames", default)]
    pub pod_names: Vec<String>,
}

impl Default for PodSet {
    fn default() -> Self {
        Self {
            metadata: ObjectMeta::default(),
            spec: PodSetSpec::default(),
            status: None,
        }
    }
}

impl PodSet {
    /// The declared size with negative values read as zero.
    pub fn desired_size(&self) -> usize {
        usize::try_from(self.spec.size).unwrap_or(0)
    }

    pub fn pod_names(&self) -> Option<&[String]> {
        self.status.as_ref().map(|status| status.pod_names.as_slice())
    }
}
