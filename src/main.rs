use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use config_monitor::{config, resources, Backoff, KubeControlPlane, Reconciler};

/// Restarts pods selected by ConfigMonitor policies when a ConfigMap in their namespace changes.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Delay before the first retry of a failed reconciliation, in milliseconds.
    #[arg(long, env = "CONFIG_MONITOR_RETRY_BASE_MS", default_value_t = 500)]
    retry_base_ms: u64,

    /// Upper bound on the retry delay, in seconds.
    #[arg(long, env = "CONFIG_MONITOR_RETRY_MAX_SECS", default_value_t = 300)]
    retry_max_secs: u64,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the ConfigMonitor CustomResourceDefinition as YAML and exit.
    Crd,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    if let Some(Command::Crd) = args.command {
        print!("{}", resources::crd_yaml().context("rendering ConfigMonitor CRD")?);
        return Ok(());
    }

    let backoff = Backoff {
        base: Duration::from_millis(args.retry_base_ms),
        max: Duration::from_secs(args.retry_max_secs),
    };

    let client = kube_client::Client::try_default()
        .await
        .context("connecting to the Kubernetes apiserver")?;

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    log::info!("Interrupted, shutting down");
                    shutdown.cancel();
                }
                Err(err) => log::error!("Failed to listen for interrupts: {err}"),
            }
        }
    });

    log::info!("Watching ConfigMaps in namespace {}", resources::WATCHED_NAMESPACE);
    config_monitor::run(
        config::watch(client.clone()).with_backoff(backoff),
        Reconciler::new(KubeControlPlane::new(client)),
        shutdown,
    )
    .await;

    Ok(())
}
