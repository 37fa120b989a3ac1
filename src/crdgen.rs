//! Prints the `ChaosExperiment` and `ChaosExperimentHistory` CRD manifests to stdout.
//! Usage: `cargo run --bin crdgen | kubectl apply -f -`.

use kube::CustomResourceExt;

use chaos_operator::types::{ChaosExperiment, ChaosExperimentHistory};

fn main() {
    print!("{}", serde_yaml::to_string(&ChaosExperiment::crd()).unwrap());
    println!("---");
    print!("{}", serde_yaml::to_string(&ChaosExperimentHistory::crd()).unwrap());
}
