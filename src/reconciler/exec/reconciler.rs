// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::kubernetes_api_objects::object_ref::KubeObjectRef;
use async_trait::async_trait;
use std::time::Duration;

/// ReconcileOutcome is what a successful reconcile pass asks of the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Nothing more to do until the next event for this key.
    Done,
    /// Run another pass for this key after the given delay, even without an event.
    RequeueAfter(Duration),
}

/// Reconciler is the interface the controller runtime drives.
///
/// One call is one reconcile pass for one key. The runtime never runs two
/// passes for the same key concurrently, and retries a key whose pass
/// returned an error. Implementations keep no state across passes; every
/// pass reads what it needs from the API server.
#[async_trait]
pub trait Reconciler: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    async fn reconcile(&self, key: &KubeObjectRef) -> Result<ReconcileOutcome, Self::Error>;
}
