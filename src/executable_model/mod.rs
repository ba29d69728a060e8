// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
pub mod api_server;
pub mod api_server_state;

pub use api_server::{ExecutableApiServer, Operation};
pub use api_server_state::ApiServerState;
