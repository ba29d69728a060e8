// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::podset_controller::exec::labels::labels_for;
use crate::podset_controller::trusted::{config::PodTemplateConfig, spec_types::PodSet};
use k8s_openapi::api::core::v1::{Container, Pod, PodSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;

/// make_pod builds a new pod for `podset`. It has no side effects.
///
/// The pod has no name, only `<podset>-` as generateName, so the API server
/// picks a unique one. The owner reference is not set here; the reconciler
/// adds it before creating the pod.
pub fn make_pod(podset: &PodSet, template: &PodTemplateConfig) -> Pod {
    Pod {
        metadata: ObjectMeta {
            generate_name: Some(format!("{}-", podset.name_any())),
            namespace: podset.namespace(),
            labels: Some(labels_for(podset)),
            ..ObjectMeta::default()
        },
        spec: Some(PodSpec {
            containers: vec![make_container(template)],
            ..PodSpec::default()
        }),
        ..Pod::default()
    }
}

fn make_container(template: &PodTemplateConfig) -> Container {
    Container {
        name: template.container_name.clone(),
        image: Some(template.image.clone()),
        command: template.command.clone(),
        ..Container::default()
    }
}
