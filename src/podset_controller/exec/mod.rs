// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
pub mod labels;
pub mod pod;
pub mod reconciler;
