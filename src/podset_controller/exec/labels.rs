// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::podset_controller::trusted::spec_types::PodSet;
use kube::ResourceExt;
use std::collections::BTreeMap;

pub const APP_LABEL_KEY: &str = "app";
pub const APP_LABEL_VALUE: &str = "podset";
pub const PODSET_LABEL_KEY: &str = "podset";

/// The labels every pod of `podset` carries regardless of the PodSet's own labels.
pub fn default_labels(podset: &PodSet) -> BTreeMap<String, String> {
    BTreeMap::from([
        (APP_LABEL_KEY.to_string(), APP_LABEL_VALUE.to_string()),
        (PODSET_LABEL_KEY.to_string(), podset.name_any()),
    ])
}

/// labels_for returns the default labels overlaid with the PodSet's own labels
/// (the PodSet's value wins on a shared key).
///
/// The same map is stamped on new pods and used as the selector that lists
/// them. Computing the two differently would make the controller lose count
/// of its pods, so both call sites go through this function.
pub fn labels_for(podset: &PodSet) -> BTreeMap<String, String> {
    let mut labels = default_labels(podset);
    labels.extend(
        podset
            .labels()
            .iter()
            .map(|(key, val)| (key.clone(), val.clone())),
    );
    labels
}
