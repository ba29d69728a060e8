pub mod common;
pub mod podset_e2e;

use common::Error;
use podset_e2e::{podset_deletion_e2e_test, podset_e2e_test, podset_scaling_e2e_test};
use std::env;

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt::init();
    let cmd = env::args().nth(1).unwrap_or_default();
    match cmd.as_str() {
        "podset" => {
            println!("Running podset end-to-end test");
            podset_e2e_test().await
        }
        "podset-scaling" => {
            println!("Running podset end-to-end test for scaling");
            podset_scaling_e2e_test().await
        }
        "podset-deletion" => {
            println!("Running podset end-to-end test for deletion");
            podset_deletion_e2e_test().await
        }
        _ => {
            println!("Please specify one test: podset, podset-scaling or podset-deletion");
            Ok(())
        }
    }
}
