//! Vigil operator binary

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use kube::{Client, CustomResourceExt};
use tokio_util::sync::CancellationToken;

use vigil_common::crd::{Vigil, VigilDashboard, VigilDatasource, VigilNotificationChannel};
use vigil_common::store::OperatorSettings;
use vigil_common::telemetry::{self, LogFormat};
use vigil_common::ConfigStore;

use vigil_operator::capability::{CapabilityDetector, KubeDiscoveryProbe};
use vigil_operator::controller_runner::{build_child_controllers, build_instance_controllers};
use vigil_operator::plugins::HttpRegistryProbe;
use vigil_operator::statebus::StateBus;

/// Vigil - Kubernetes operator for managed visualization instances
#[derive(Parser, Debug)]
#[command(name = "vigil-operator", version, about, long_about = None)]
struct Cli {
    /// Generate CRD manifests and exit
    #[arg(long)]
    crd: bool,

    /// Log output format (text|json)
    #[arg(long, default_value = "text")]
    log_format: LogFormat,

    /// URL template for the plugin registry existence probe
    /// ({name} and {version} are substituted per plugin)
    #[arg(
        long,
        env = "VIGIL_PLUGIN_REGISTRY_URL",
        default_value = "https://plugins.vigil.dev/api/plugins/{name}/versions/{version}"
    )]
    plugin_registry_url: String,

    /// Seconds between optional-API discovery polls
    #[arg(long, env = "VIGIL_CAPABILITY_POLL_SECS", default_value_t = 30)]
    capability_poll_secs: u64,

    /// Default admin-API client timeout in seconds
    #[arg(long, env = "VIGIL_CLIENT_TIMEOUT_SECS", default_value_t = 5)]
    client_timeout_secs: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.crd {
        print_crds()?;
        return Ok(());
    }

    telemetry::init(cli.log_format)?;
    tracing::info!("starting vigil operator");

    let client = Client::try_default().await?;

    let settings = OperatorSettings {
        plugin_registry_url: cli.plugin_registry_url.clone(),
        capability_poll_interval: Duration::from_secs(cli.capability_poll_secs),
        client_timeout: Duration::from_secs(cli.client_timeout_secs),
    };
    let poll_interval = settings.capability_poll_interval;
    let store = Arc::new(ConfigStore::new(settings));
    let bus = Arc::new(StateBus::new());
    let token = CancellationToken::new();

    let detector = CapabilityDetector::new(
        Arc::new(KubeDiscoveryProbe::new(client.clone())),
        store.clone(),
    );
    let route_events = detector.subscribe();
    let detector_handle = detector.start(poll_interval, token.clone());

    let registry = Arc::new(HttpRegistryProbe::new(
        cli.plugin_registry_url,
        Duration::from_secs(cli.client_timeout_secs),
    )?);

    tracing::info!("starting controllers:");
    let mut controllers = build_instance_controllers(
        client.clone(),
        store.clone(),
        bus.clone(),
        registry,
        route_events,
        token.clone(),
    );
    controllers.extend(build_child_controllers(client, store, bus));

    // Controllers stop on SIGTERM/SIGINT via shutdown_on_signal. The
    // token has to be cancelled on the same signal, not after the join:
    // the watch installer and the detector block on the token and would
    // otherwise keep the join pending forever.
    let signal_token = token.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_token.cancel();
    });

    futures::future::join_all(controllers).await;
    token.cancel();
    let _ = detector_handle.await;

    tracing::info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = match signal(SignalKind::terminate()) {
            Ok(term) => term,
            Err(e) => {
                tracing::warn!(error = %e, "failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

fn print_crds() -> anyhow::Result<()> {
    let crds = [
        serde_yaml::to_string(&Vigil::crd())?,
        serde_yaml::to_string(&VigilDashboard::crd())?,
        serde_yaml::to_string(&VigilDatasource::crd())?,
        serde_yaml::to_string(&VigilNotificationChannel::crd())?,
    ];
    println!("{}", crds.join("---\n"));
    Ok(())
}
