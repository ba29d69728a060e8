// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use k8s_openapi::api::core::v1::ConfigMap;
use kube::{
    api::{Api, PostParams},
    Client,
};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::*;

pub const FAULT_INJECTION_CONFIG_MAP: &str = "fault-injection-config";
pub const FAULT_INJECTION_NAMESPACE: &str = "default";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FaultInjectionError {
    #[error("Fail to get fault injection config: {0}")]
    GetConfigFailed(String),
    #[error("Fail to update fault injection config: {0}")]
    UpdateConfigFailed(String),
    #[error("Fault injection config misses {0}")]
    MissingKey(&'static str),
    #[error("Fail to parse {0} value {1:?} to i32")]
    InvalidValue(&'static str, String),
}

/// The counters kept in the fault injection ConfigMap: `current` counts the
/// writes the controller has issued so far and `expected` is the write after
/// which it crashes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaultInjectionStep {
    pub current: i32,
    pub expected: i32,
}

impl FaultInjectionStep {
    pub fn from_data(data: &BTreeMap<String, String>) -> Result<FaultInjectionStep, FaultInjectionError> {
        Ok(FaultInjectionStep {
            current: parse_counter(data, "current")?,
            expected: parse_counter(data, "expected")?,
        })
    }

    pub fn should_crash(&self) -> bool {
        self.current == self.expected
    }

    pub fn next(&self) -> FaultInjectionStep {
        FaultInjectionStep {
            current: self.current.saturating_add(1),
            ..*self
        }
    }
}

fn parse_counter(data: &BTreeMap<String, String>, key: &'static str) -> Result<i32, FaultInjectionError> {
    let val = data.get(key).ok_or(FaultInjectionError::MissingKey(key))?;
    val.trim()
        .parse::<i32>()
        .map_err(|_| FaultInjectionError::InvalidValue(key, val.clone()))
}

/// crash_or_continue bumps the write counter in the fault injection
/// ConfigMap and crashes the process once it reaches the expected value.
pub async fn crash_or_continue(client: &Client) -> Result<(), FaultInjectionError> {
    let config_map_api = Api::<ConfigMap>::namespaced(client.clone(), FAULT_INJECTION_NAMESPACE);
    let mut config_map = config_map_api
        .get(FAULT_INJECTION_CONFIG_MAP)
        .await
        .map_err(|e| FaultInjectionError::GetConfigFailed(e.to_string()))?;
    let data = config_map.data.get_or_insert_with(BTreeMap::new);
    let step = FaultInjectionStep::from_data(data)?;
    data.insert("current".to_string(), step.next().current.to_string());
    config_map_api
        .replace(FAULT_INJECTION_CONFIG_MAP, &PostParams::default(), &config_map)
        .await
        .map_err(|e| FaultInjectionError::UpdateConfigFailed(e.to_string()))?;

    if step.should_crash() {
        // Now it is time to crash according to fault-injection-config
        error!("fault injection: crashing after write {}", step.current);
        panic!("fault injection: crashing after write {}", step.current);
    }
    Ok(())
}
