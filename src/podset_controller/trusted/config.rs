// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use std::time::Duration;
use thiserror::Error;

pub const POD_PRESET_ENV: &str = "PODSET_POD_PRESET";
pub const POD_CONTAINER_NAME_ENV: &str = "PODSET_POD_CONTAINER_NAME";
pub const POD_IMAGE_ENV: &str = "PODSET_POD_IMAGE";
pub const POD_COMMAND_ENV: &str = "PODSET_POD_COMMAND";
pub const RESYNC_SECONDS_ENV: &str = "PODSET_RESYNC_SECONDS";
pub const ERROR_BACKOFF_BASE_MILLIS_ENV: &str = "PODSET_ERROR_BACKOFF_BASE_MILLIS";
pub const ERROR_BACKOFF_MAX_SECONDS_ENV: &str = "PODSET_ERROR_BACKOFF_MAX_SECONDS";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("unknown pod preset {0:?}; expected \"nginx\" or \"busybox\"")]
    UnknownPreset(String),
    #[error("{name} must be a non-negative integer, got {value:?}")]
    InvalidNumber { name: &'static str, value: String },
    #[error("{0} must not be empty")]
    Empty(&'static str),
}

/// PodTemplateConfig is the single container every PodSet pod runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodTemplateConfig {
    pub container_name: String,
    pub image: String,
    pub command: Option<Vec<String>>,
}

impl PodTemplateConfig {
    pub fn nginx() -> PodTemplateConfig {
        PodTemplateConfig {
            container_name: "nginx".to_string(),
            image: "nginx:stable-alpine".to_string(),
            command: None,
        }
    }

    pub fn busybox() -> PodTemplateConfig {
        PodTemplateConfig {
            container_name: "busybox".to_string(),
            image: "busybox".to_string(),
            command: Some(vec!["sleep".to_string(), "3600".to_string()]),
        }
    }

    pub fn preset(name: &str) -> Result<PodTemplateConfig, ConfigError> {
        match name {
            "nginx" => Ok(PodTemplateConfig::nginx()),
            "busybox" => Ok(PodTemplateConfig::busybox()),
            other => Err(ConfigError::UnknownPreset(other.to_string())),
        }
    }
}

impl Default for PodTemplateConfig {
    fn default() -> Self {
        PodTemplateConfig::nginx()
    }
}

/// ErrorBackoff decides how long to wait before retrying a key whose last
/// pass failed: `base * 2^(failures - 1)`, capped at `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorBackoff {
    pub base: Duration,
    pub max: Duration,
}

impl Default for ErrorBackoff {
    fn default() -> Self {
        ErrorBackoff {
            base: Duration::from_millis(500),
            max: Duration::from_secs(300),
        }
    }
}

impl ErrorBackoff {
    /// `failures` counts consecutive failed passes, including the one just seen.
    pub fn delay(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(31);
        self.base
            .checked_mul(1u32 << exponent)
            .map_or(self.max, |delay| delay.min(self.max))
    }
}

/// PodSetControllerConfig is read once at startup and never changed afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PodSetControllerConfig {
    pub pod_template: PodTemplateConfig,
    /// When set, every successful pass asks to run again after this delay.
    pub resync_period: Option<Duration>,
    pub error_backoff: ErrorBackoff,
}

impl PodSetControllerConfig {
    pub fn from_env() -> Result<PodSetControllerConfig, ConfigError> {
        PodSetControllerConfig::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the config from `lookup`, which returns the value of a variable if it is set.
    pub fn from_lookup<F>(lookup: F) -> Result<PodSetControllerConfig, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut pod_template = match lookup(POD_PRESET_ENV) {
            Some(preset) => PodTemplateConfig::preset(preset.trim())?,
            None => PodTemplateConfig::default(),
        };
        if let Some(name) = lookup(POD_CONTAINER_NAME_ENV) {
            pod_template.container_name = non_empty(POD_CONTAINER_NAME_ENV, name)?;
        }
        if let Some(image) = lookup(POD_IMAGE_ENV) {
            pod_template.image = non_empty(POD_IMAGE_ENV, image)?;
        }
        if let Some(command) = lookup(POD_COMMAND_ENV) {
            let args: Vec<String> = command.split_whitespace().map(str::to_string).collect();
            pod_template.command = if args.is_empty() { None } else { Some(args) };
        }

        let resync_period = match lookup(RESYNC_SECONDS_ENV) {
            Some(value) => Some(Duration::from_secs(parse_u64(RESYNC_SECONDS_ENV, &value)?)),
            None => None,
        };

        let mut error_backoff = ErrorBackoff::default();
        if let Some(value) = lookup(ERROR_BACKOFF_BASE_MILLIS_ENV) {
            error_backoff.base = Duration::from_millis(parse_u64(ERROR_BACKOFF_BASE_MILLIS_ENV, &value)?);
        }
        if let Some(value) = lookup(ERROR_BACKOFF_MAX_SECONDS_ENV) {
            error_backoff.max = Duration::from_secs(parse_u64(ERROR_BACKOFF_MAX_SECONDS_ENV, &value)?);
        }

        Ok(PodSetControllerConfig {
            pod_template,
            resync_period,
            error_backoff,
        })
    }
}

fn non_empty(name: &'static str, value: String) -> Result<String, ConfigError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        Err(ConfigError::Empty(name))
    } else {
        Ok(trimmed.to_string())
    }
}

fn parse_u64(name: &'static str, value: &str) -> Result<u64, ConfigError> {
    value.trim().parse::<u64>().map_err(|_| ConfigError::InvalidNumber {
        name,
        value: value.to_string(),
    })
}
