//! xds-dns binary entry point.

use clap::Parser;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use xds_dns::{telemetry, Config, DnsServer};

/// DNS server for mesh service names fed by an xDS control plane.
#[derive(Parser, Debug)]
#[command(name = "xds-dns")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file (TOML).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// DNS listen address, e.g. localhost:8053.
    #[arg(long)]
    dns_addr: Option<String>,

    /// Control plane address.
    #[arg(long)]
    xds_address: Option<String>,

    /// Default address for ServiceEntries without addresses.
    #[arg(long)]
    vip: Option<String>,

    #[arg(long, env = "POD_NAME", hide = true)]
    pod_name: Option<String>,

    #[arg(long, env = "POD_NAMESPACE", hide = true)]
    pod_namespace: Option<String>,

    #[arg(long, env = "POD_IP", hide = true)]
    pod_ip: Option<String>,
}

fn load_config(args: &Args) -> Result<Config, config::ConfigError> {
    let mut builder = config::Config::builder();
    if let Some(path) = &args.config {
        builder = builder.add_source(config::File::from(path.clone()));
    }

    builder
        .add_source(
            config::Environment::with_prefix("XDS_DNS")
                .separator("__")
                .try_parsing(true),
        )
        .set_override_option("dns.listen_addr", args.dns_addr.clone())?
        .set_override_option("feed.xds_address", args.xds_address.clone())?
        .set_override_option("feed.default_address", args.vip.clone())?
        .set_override_option("feed.pod_name", args.pod_name.clone())?
        .set_override_option("feed.pod_namespace", args.pod_namespace.clone())?
        .set_override_option("feed.pod_ip", args.pod_ip.clone())?
        .build()?
        .try_deserialize()
}

async fn wait_for_signal(shutdown: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }

    info!("Shutdown signal received");
    shutdown.cancel();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = load_config(&args)?;

    telemetry::init(&config.telemetry).map_err(|e| e as Box<dyn std::error::Error>)?;

    info!(
        config_file = ?args.config,
        listen_addr = %config.dns.listen_addr,
        xds_address = %config.feed.xds_address,
        default_address = ?config.feed.default_address,
        workload = %config.feed.workload(),
        "Starting xds-dns"
    );

    let shutdown = CancellationToken::new();
    tokio::spawn(wait_for_signal(shutdown.clone()));

    let server = DnsServer::new(config);
    if let Err(e) = server.run(shutdown).await {
        error!("DNS server error: {}", e);
        return Err(e.into());
    }

    info!("xds-dns shutdown complete");
    Ok(())
}
