// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
pub mod cluster_api;
pub mod config;
pub mod spec_types;
