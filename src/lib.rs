// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT

//! A controller that keeps the number of pods labelled for a `PodSet` equal to
//! the PodSet's declared `size`.
//!
//! Each reconcile pass fetches the PodSet, lists the pods selected by its
//! labels, creates or deletes at most one pod, and refreshes
//! `status.podNames`. Convergence from a gap of N takes N passes; every pass
//! re-reads the cluster, so passes are safe to repeat after any failure.

pub mod executable_model;
pub mod kubernetes_api_objects;
pub mod podset_controller;
pub mod reconciler;
pub mod shim_layer;


pub use kubernetes_api_objects::{error::APIError, object_ref::KubeObjectRef};
pub use podset_controller::exec::reconciler::{Error, PodSetReconciler};
pub use podset_controller::trusted::{
    cluster_api::ClusterApi,
    config::PodSetControllerConfig,
    spec_types::{PodSet, PodSetSpec, PodSetStatus},
};
pub use reconciler::{ReconcileOutcome, Reconciler};
