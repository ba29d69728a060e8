// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use anyhow::Result;
use kube::{Client, CustomResourceExt};
use podset_controller::podset_controller::exec::reconciler::PodSetReconciler;
use podset_controller::podset_controller::trusted::{
    config::PodSetControllerConfig, spec_types::PodSet,
};
use podset_controller::shim_layer::{kube_api::KubeApiClient, run_controller};
use std::env;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let cmd = env::args().nth(1).unwrap_or_default();

    if cmd == "export" {
        println!("{}", serde_yaml::to_string(&PodSet::crd())?);
    } else if cmd == "run" || cmd == "crash" {
        let config = PodSetControllerConfig::from_env()?;
        let client = Client::try_default().await?;
        let api = if cmd == "crash" {
            info!("running podset-controller in crash-testing mode");
            KubeApiClient::with_fault_injection(client.clone())
        } else {
            info!("running podset-controller");
            KubeApiClient::new(client.clone())
        };
        info!("pod template: {:?}", config.pod_template);
        let backoff = config.error_backoff;
        run_controller::<PodSet, _>(client, PodSetReconciler::new(api, config), backoff).await?;
    } else {
        error!("wrong command; please use \"export\", \"run\" or \"crash\"");
    }
    Ok(())
}
