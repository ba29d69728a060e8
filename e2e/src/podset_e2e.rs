use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::{
    api::{Api, DeleteParams, ListParams, ResourceExt},
    discovery::Discovery,
    Client,
};
use podset_controller::kubernetes_api_objects::label_selector::to_selector_string;
use podset_controller::podset_controller::exec::labels::labels_for;
use podset_controller::PodSet;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::*;

use crate::common::*;

const PODSET_NAME: &str = "demo";

pub fn podset() -> String {
    "
    apiVersion: anvil.dev/v1alpha1
    kind: PodSet
    metadata:
      name: demo
      labels:
        tier: frontend
    spec:
      size: 3
    "
    .to_string()
}

// Pods of the PodSet that are not being deleted, sorted by name.
async fn live_pod_names(client: &Client, podset: &PodSet) -> Result<Vec<String>, kube::Error> {
    let pod_api: Api<Pod> = Api::default_namespaced(client.clone());
    let lp = ListParams::default().labels(&to_selector_string(&labels_for(podset)));
    let mut names: Vec<String> = pod_api
        .list(&lp)
        .await?
        .items
        .into_iter()
        .filter(|pod| pod.metadata.deletion_timestamp.is_none())
        .map(|pod| pod.name_any())
        .collect();
    names.sort();
    Ok(names)
}

fn check_pod_labels(pod: &Pod, podset: &PodSet) -> Result<(), Error> {
    let labels = pod.labels();
    for (key, val) in labels_for(podset) {
        if labels.get(&key) != Some(&val) {
            return Err(Error::PodSetFailed(format!(
                "pod {} misses label {}={}",
                pod.name_any(),
                key,
                val
            )));
        }
    }
    match pod.metadata.owner_references.as_ref() {
        Some(refs) if refs.iter().any(|r| Some(&r.uid) == podset.metadata.uid.as_ref()) => Ok(()),
        _ => Err(Error::PodSetFailed(format!(
            "pod {} is not owned by the PodSet",
            pod.name_any()
        ))),
    }
}

// Waits until the PodSet has exactly `size` live pods and its status lists them.
pub async fn wait_for_size(client: Client, size: usize) -> Result<(), Error> {
    let timeout = Duration::from_secs(360);
    let start = Instant::now();
    let podset_api: Api<PodSet> = Api::default_namespaced(client.clone());
    'poll: loop {
        sleep(Duration::from_secs(5)).await;
        if start.elapsed() > timeout {
            error!("Time out waiting for {} pods", size);
            return Err(Error::Timeout);
        }
        let podset = match podset_api.get(PODSET_NAME).await {
            Err(e) => {
                info!("Get PodSet failed with error {}.", e);
                continue;
            }
            Ok(podset) => podset,
        };
        let names = match live_pod_names(&client, &podset).await {
            Err(e) => {
                info!("List pods failed with error {}.", e);
                continue;
            }
            Ok(names) => names,
        };
        if names.len() != size {
            info!("Pod number is {}, waiting for {}.", names.len(), size);
            continue;
        }
        let mut status_names = podset.pod_names().map(|names| names.to_vec()).unwrap_or_default();
        status_names.sort();
        if status_names != names {
            info!("Status lists {:?}, pods are {:?}; waiting.", status_names, names);
            continue;
        }
        let pod_api: Api<Pod> = Api::default_namespaced(client.clone());
        for name in names.iter() {
            match pod_api.get(name).await {
                Ok(pod) => check_pod_labels(&pod, &podset)?,
                Err(e) => {
                    info!("Get pod {} failed with error {}.", name, e);
                    continue 'poll;
                }
            }
        }
        info!("We have {} pods now.", size);
        return Ok(());
    }
}

pub fn scale(size: usize) -> Result<(), Error> {
    let patch = format!(
        "[{{\"op\": \"replace\", \"path\": \"/spec/size\", \"value\": {}}}]",
        size
    );
    run_command(
        "kubectl",
        vec!["patch", "ps", PODSET_NAME, "--type=json", "-p", &patch],
    )?;
    Ok(())
}

pub async fn desired_state_test(client: Client) -> Result<(), Error> {
    wait_for_size(client, 3).await?;
    info!("Desired state test passed.");
    Ok(())
}

pub async fn scaling_test(client: Client) -> Result<(), Error> {
    scale(5)?;
    wait_for_size(client.clone(), 5).await?;
    scale(1)?;
    wait_for_size(client.clone(), 1).await?;
    scale(0)?;
    wait_for_size(client, 0).await?;
    info!("Scaling test passed.");
    Ok(())
}

pub async fn deletion_test(client: Client) -> Result<(), Error> {
    let podset_api: Api<PodSet> = Api::default_namespaced(client.clone());
    let podset = podset_api.get(PODSET_NAME).await?;
    podset_api.delete(PODSET_NAME, &DeleteParams::default()).await?;

    let timeout = Duration::from_secs(360);
    let start = Instant::now();
    loop {
        sleep(Duration::from_secs(5)).await;
        if start.elapsed() > timeout {
            error!("Time out on deletion test");
            return Err(Error::Timeout);
        }
        match live_pod_names(&client, &podset).await {
            Err(e) => info!("List pods failed with error {}.", e),
            Ok(names) if names.is_empty() => break,
            Ok(names) => info!("{} pods left; waiting for garbage collection.", names.len()),
        }
    }
    info!("Deletion test passed.");
    Ok(())
}

async fn setup() -> Result<Client, Error> {
    // check if the CRD is already registered
    let client = Client::try_default().await?;
    let crd_api: Api<CustomResourceDefinition> = Api::all(client.clone());
    match crd_api.get("podsets.anvil.dev").await {
        Err(e) => {
            error!("No CRD found, create one before run the e2e test.");
            return Err(Error::CRDGetFailed(e));
        }
        Ok(_) => info!("CRD found, continue to run the e2e test."),
    }
    let discovery = Discovery::new(client.clone()).run().await?;
    apply(podset(), client.clone(), &discovery).await?;
    Ok(client)
}

pub async fn podset_e2e_test() -> Result<(), Error> {
    let client = setup().await?;
    desired_state_test(client).await?;
    info!("E2e test passed.");
    Ok(())
}

pub async fn podset_scaling_e2e_test() -> Result<(), Error> {
    let client = setup().await?;
    desired_state_test(client.clone()).await?;
    scaling_test(client).await?;
    info!("E2e test passed.");
    Ok(())
}

pub async fn podset_deletion_e2e_test() -> Result<(), Error> {
    let client = setup().await?;
    desired_state_test(client.clone()).await?;
    deletion_test(client).await?;
    info!("E2e test passed.");
    Ok(())
}
