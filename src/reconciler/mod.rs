// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
pub mod exec;

pub use exec::reconciler::{ReconcileOutcome, Reconciler};
