// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::kubernetes_api_objects::object_ref::KubeObjectRef;
use crate::podset_controller::trusted::config::ErrorBackoff;
use crate::reconciler::exec::reconciler::{ReconcileOutcome, Reconciler};
use anyhow::Result;
use core::fmt::Debug;
use futures::StreamExt;
use k8s_openapi::api::core::v1::Pod;
use kube::{
    api::{Api, ListParams},
    runtime::controller::{Action, Controller},
    Client, Resource,
};
use kube_core::NamespaceResourceScope;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use thiserror::Error;
use tracing::*;

// The shim layer connects the reconciler to the kube-rs controller runtime.
// kube-rs watches the primary resource and the pods it owns, collapses bursts
// of events into one pending request per object, and never runs two
// reconciles of the same object at once. All the reconciler sees is the key.

#[derive(Debug, Error)]
pub enum Error {
    #[error("MissingObjectKey: {0}")]
    MissingObjectKey(&'static str),
    #[error("Reconcile failed: {0}")]
    ReconcileFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
}

#[derive(Debug, Clone, Copy)]
struct FailureRecord {
    count: u32,
    last_failure: Instant,
}

// Data is passed to every reconcile and error_policy call.
//
// A key's failure count is dropped by its next successful pass. A PodSet
// deleted while failing never gets that pass, since kube-rs drops requeues
// for objects gone from its cache, so every recorded failure also prunes the
// entries that have not failed again within twice the maximum backoff. A key
// still retrying fails again within `backoff.max` and is never pruned.
pub struct Data<R> {
    pub reconciler: R,
    pub backoff: ErrorBackoff,
    failures: Mutex<HashMap<KubeObjectRef, FailureRecord>>,
}

impl<R> Data<R> {
    pub fn new(reconciler: R, backoff: ErrorBackoff) -> Data<R> {
        Data {
            reconciler,
            backoff,
            failures: Mutex::new(HashMap::new()),
        }
    }

    /// Records one more failure for `key` and returns the consecutive count.
    pub fn record_failure(&self, key: &KubeObjectRef) -> u32 {
        self.record_failure_at(key, Instant::now())
    }

    pub fn record_failure_at(&self, key: &KubeObjectRef, now: Instant) -> u32 {
        let horizon = self.backoff.max.saturating_mul(2);
        let mut failures = self.failures.lock().unwrap_or_else(PoisonError::into_inner);
        failures.retain(|other, record| {
            other == key || now.saturating_duration_since(record.last_failure) <= horizon
        });
        let record = failures.entry(key.clone()).or_insert(FailureRecord {
            count: 0,
            last_failure: now,
        });
        record.count = record.count.saturating_add(1);
        record.last_failure = now;
        record.count
    }

    pub fn reset_failures(&self, key: &KubeObjectRef) {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }

    pub fn failures(&self, key: &KubeObjectRef) -> u32 {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .map_or(0, |record| record.count)
    }

    /// Number of keys with a recorded failure.
    pub fn failing_keys(&self) -> usize {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

// run_controller prepares and runs the controller until a shutdown signal. It requires:
// K: the custom resource type, which owns pods
// R: the reconciler type
pub async fn run_controller<K, R>(client: Client, reconciler: R, backoff: ErrorBackoff) -> Result<()>
where
    K: Clone + Resource<Scope = NamespaceResourceScope> + DeserializeOwned + Debug + Send + Sync + 'static,
    K::DynamicType: Default + Eq + std::hash::Hash + Clone + Debug + Unpin,
    R: Reconciler + 'static,
{
    let crs = Api::<K>::all(client.clone());
    let pods = Api::<Pod>::all(client.clone());

    info!("starting controller");
    Controller::new(crs, ListParams::default()) // reconcile is triggered when a CR is created/updated
        .owns(pods, ListParams::default()) // ... or when a pod it controls changes
        .shutdown_on_signal()
        .run(reconcile_with::<K, R>, error_policy::<K, R>, Arc::new(Data::new(reconciler, backoff)))
        .for_each(|res| async move {
            match res {
                Ok(o) => info!("reconciled {:?}", o),
                Err(e) => warn!("reconcile failed: {}", e),
            }
        })
        .await;
    info!("controller terminated");
    Ok(())
}

// reconcile_with is invoked by kube-rs whenever the watcher sees a relevant
// event. It turns the object into its key and runs one reconcile pass.
pub async fn reconcile_with<K, R>(cr: Arc<K>, ctx: Arc<Data<R>>) -> Result<Action, Error>
where
    K: Resource,
    R: Reconciler,
{
    let key = object_key(cr.as_ref())?;
    match ctx.reconciler.reconcile(&key).await {
        Ok(outcome) => {
            ctx.reset_failures(&key);
            Ok(outcome_to_action(outcome))
        }
        Err(e) => Err(Error::ReconcileFailed(Box::new(e))),
    }
}

// error_policy defines the controller's behavior when the reconcile ends with an error.
pub fn error_policy<K, R>(cr: Arc<K>, error: &Error, ctx: Arc<Data<R>>) -> Action
where
    K: Resource,
{
    match object_key(cr.as_ref()) {
        Ok(key) => {
            let failures = ctx.record_failure(&key);
            let delay = ctx.backoff.delay(failures);
            warn!(
                "Reconciling {} failed ({} in a row): {}; retry in {:?}",
                key, failures, error, delay
            );
            Action::requeue(delay)
        }
        Err(_) => {
            warn!("Reconcile failed: {}", error);
            Action::requeue(ctx.backoff.max)
        }
    }
}

pub fn outcome_to_action(outcome: ReconcileOutcome) -> Action {
    match outcome {
        ReconcileOutcome::Done => Action::await_change(),
        ReconcileOutcome::RequeueAfter(delay) => Action::requeue(delay),
    }
}

pub fn object_key<K: Resource>(cr: &K) -> Result<KubeObjectRef, Error> {
    let name = cr
        .meta()
        .name
        .as_ref()
        .ok_or(Error::MissingObjectKey(".metadata.name"))?;
    let namespace = cr
        .meta()
        .namespace
        .as_ref()
        .ok_or(Error::MissingObjectKey(".metadata.namespace"))?;
    Ok(KubeObjectRef::new(namespace.clone(), name.clone()))
}
