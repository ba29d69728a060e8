// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
pub mod controller_runtime;
pub mod fault_injection;
pub mod kube_api;

pub use controller_runtime::run_controller;
pub use kube_api::KubeApiClient;
