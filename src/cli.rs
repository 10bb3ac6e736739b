//! # konfctl
//!
//! Command-line interface for the Konfiguration Controller.
//!
//! ## Usage
//!
//! ```bash
//! # Request an immediate reconciliation
//! konfctl reconcile --namespace apps --name podinfo
//!
//! # Pause and resume reconciliation
//! konfctl suspend --name podinfo
//! konfctl resume --name podinfo
//!
//! # List Konfigurations
//! konfctl list
//!
//! # Show status of a Konfiguration
//! konfctl status --namespace apps --name podinfo
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use konfiguration_controller::crd::{Konfiguration, RECONCILE_REQUESTED_ANNOTATION};
use kube::{
    api::{Api, ListParams, Patch, PatchParams},
    Client,
};
use serde_json::json;

/// Konfiguration Controller CLI
#[derive(Parser)]
#[command(name = "konfctl")]
#[command(about = "Konfiguration Controller CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Kubernetes namespace (defaults to "default")
    #[arg(short, long, global = true)]
    namespace: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Request an immediate reconciliation, bypassing the revision check
    Reconcile {
        #[arg(long)]
        name: String,
    },
    /// Stop reconciling a Konfiguration
    Suspend {
        #[arg(long)]
        name: String,
    },
    /// Resume reconciling a suspended Konfiguration
    Resume {
        #[arg(long)]
        name: String,
    },
    /// List Konfigurations (all namespaces unless --namespace is given)
    List,
    /// Show status of a Konfiguration
    Status {
        #[arg(long)]
        name: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "konfctl=info".into()),
        )
        .init();

    let cli = Cli::parse();

    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client. Ensure kubeconfig is configured.")?;

    let namespace = cli.namespace;
    match cli.command {
        Commands::Reconcile { name } => reconcile_command(client, &name, namespace).await,
        Commands::Suspend { name } => set_suspend(client, &name, namespace, true).await,
        Commands::Resume { name } => set_suspend(client, &name, namespace, false).await,
        Commands::List => list_command(client, namespace).await,
        Commands::Status { name } => status_command(client, &name, namespace).await,
    }
}

/// Request reconciliation through the reconcile annotation
///
/// A new annotation value makes the controller re-render and re-apply even
/// when the source revision did not change.
async fn reconcile_command(client: Client, name: &str, namespace: Option<String>) -> Result<()> {
    let ns = namespace.as_deref().unwrap_or("default");
    let api: Api<Konfiguration> = Api::namespaced(client, ns);

    let requested_at = chrono::Utc::now().to_rfc3339();
    let patch = json!({
        "metadata": {
            "annotations": {
                RECONCILE_REQUESTED_ANNOTATION: requested_at
            }
        }
    });

    api.patch(name, &PatchParams::default(), &Patch::Merge(patch))
        .await
        .with_context(|| format!("Failed to request reconciliation of '{ns}/{name}'"))?;

    println!("✅ Reconciliation requested for {ns}/{name} at {requested_at}");
    Ok(())
}

async fn set_suspend(
    client: Client,
    name: &str,
    namespace: Option<String>,
    suspend: bool,
) -> Result<()> {
    let ns = namespace.as_deref().unwrap_or("default");
    let api: Api<Konfiguration> = Api::namespaced(client, ns);
    let patch = json!({ "spec": { "suspend": suspend } });

    api.patch(name, &PatchParams::default(), &Patch::Merge(patch))
        .await
        .with_context(|| format!("Failed to update '{ns}/{name}'"))?;

    if suspend {
        println!("⏸  Suspended {ns}/{name}");
    } else {
        println!("▶  Resumed {ns}/{name}");
    }
    Ok(())
}

async fn list_command(client: Client, namespace: Option<String>) -> Result<()> {
    let api: Api<Konfiguration> = match &namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    };

    let units = api
        .list(&ListParams::default())
        .await
        .context("Failed to list Konfiguration resources")?;

    if units.items.is_empty() {
        println!("No Konfiguration resources found.");
        return Ok(());
    }

    println!(
        "{:<30} {:<20} {:<8} {:<10} {:<28} REVISION",
        "NAME", "NAMESPACE", "READY", "SUSPENDED", "REASON"
    );
    for unit in &units.items {
        let ready = unit.ready_condition();
        let revision = unit
            .status
            .as_ref()
            .and_then(|status| status.last_applied_revision.as_deref())
            .unwrap_or("-");
        println!(
            "{:<30} {:<20} {:<8} {:<10} {:<28} {}",
            unit.name_or_unknown(),
            unit.namespace_or_default(),
            ready.map_or_else(|| "Unknown".to_string(), |c| c.status.to_string()),
            unit.spec.suspend,
            ready.map_or("-", |c| c.reason.as_str()),
            revision
        );
    }

    Ok(())
}

async fn status_command(client: Client, name: &str, namespace: Option<String>) -> Result<()> {
    let ns = namespace.as_deref().unwrap_or("default");
    let api: Api<Konfiguration> = Api::namespaced(client, ns);

    let unit = api
        .get(name)
        .await
        .with_context(|| format!("Failed to get Konfiguration '{ns}/{name}'"))?;

    println!("Konfiguration {ns}/{name}");
    if let Some(generation) = unit.generation() {
        println!("  Generation: {generation}");
    }
    println!("  Path: {}", unit.spec.path);
    if let Some(source) = unit.source_ref() {
        println!(
            "  Source: {} {}/{}",
            source.kind,
            source.namespace.as_deref().unwrap_or(ns),
            source.name
        );
    }
    println!("  Interval: {}", unit.spec.interval);
    println!("  Diff strategy: {}", unit.spec.diff_strategy.as_str());
    println!("  Prune: {}", unit.spec.prune);
    println!("  Suspended: {}", unit.spec.suspend);

    let Some(status) = &unit.status else {
        println!("\nStatus: not reconciled yet");
        return Ok(());
    };

    println!("\nStatus:");
    let field = |value: Option<&str>| value.unwrap_or("-").to_string();
    println!(
        "  Observed generation: {}",
        status
            .observed_generation
            .map_or_else(|| "-".to_string(), |g| g.to_string())
    );
    println!("  Last applied revision: {}", field(status.last_applied_revision.as_deref()));
    println!(
        "  Last attempted revision: {}",
        field(status.last_attempted_revision.as_deref())
    );
    println!(
        "  Last attempt result: {}",
        status.last_attempt_result.map_or("-", |r| r.as_str())
    );
    println!("  Last reconcile: {}", field(status.last_reconcile_time.as_deref()));
    println!("  Next reconcile: {}", field(status.next_reconcile_time.as_deref()));

    for condition in &status.conditions {
        println!("\n  {}: {} ({})", condition.r#type, condition.status, condition.reason);
        if !condition.message.is_empty() {
            println!("    {}", condition.message);
        }
        println!("    Last transition: {}", condition.last_transition_time);
    }

    if let Some(snapshot) = &status.snapshot {
        println!("\n  Snapshot ({} objects, {}):", snapshot.resources.len(), snapshot.checksum);
        for (namespace, kinds) in &snapshot.entries {
            let namespace = if namespace.is_empty() { "<cluster>" } else { namespace };
            for (kind, names) in kinds {
                println!("    {namespace} {kind}: {}", names.join(", "));
            }
        }
    }

    Ok(())
}
