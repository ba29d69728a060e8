// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::kubernetes_api_objects::object_ref::KubeObjectRef;
use crate::podset_controller::trusted::spec_types::PodSet;
use k8s_openapi::api::core::v1::Pod;
use std::collections::BTreeMap;

// ApiServerState is what the executable API server stores: the objects,
// keyed by namespace and name, and the counters it draws uids, resource
// versions and generated name suffixes from.
#[derive(Debug, Clone, Default)]
pub struct ApiServerState {
    pub podsets: BTreeMap<KubeObjectRef, PodSet>,
    pub pods: BTreeMap<KubeObjectRef, Pod>,
    pub uid_counter: i64,
    pub resource_version_counter: i64,
    pub generate_name_counter: u64,
}

impl ApiServerState {
    pub fn new() -> ApiServerState {
        ApiServerState::default()
    }

    pub fn next_uid(&mut self) -> String {
        let uid = format!("uid-{}", self.uid_counter);
        self.uid_counter += 1;
        uid
    }

    pub fn next_resource_version(&mut self) -> String {
        let rv = self.resource_version_counter.to_string();
        self.resource_version_counter += 1;
        rv
    }

    /// Pods in `namespace`, in name order.
    pub fn pods_in(&self, namespace: &str) -> Vec<&Pod> {
        self.pods
            .iter()
            .filter(|(key, _)| key.namespace == namespace)
            .map(|(_, pod)| pod)
            .collect()
    }
}
