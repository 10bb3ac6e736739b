//! Prints the Konfiguration CustomResourceDefinition as YAML
//!
//! ```bash
//! cargo run --bin crdgen | kubectl apply -f -
//! ```

use konfiguration_controller::crd::Konfiguration;
use kube::CustomResourceExt;

fn main() -> anyhow::Result<()> {
    print!("{}", serde_yaml::to_string(&Konfiguration::crd())?);
    Ok(())
}
