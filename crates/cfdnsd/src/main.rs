// # cfdnsd - Cloudflare Dynamic DNS Daemon
//
// The cfdnsd daemon keeps one Cloudflare A or AAAA record pointed at the
// host's current address. It is responsible for:
// 1. Reading configuration from environment variables
// 2. Registering the address sources compiled in
// 3. Resolving the zone and record at Cloudflare
// 4. Running the supervisor (auto mode) or a single update (manual mode)
//
// ## Configuration
//
// All configuration is done via environment variables:
//
// ### Record
// - `CFDNS_API_TOKEN`: Cloudflare API token (Zone.DNS edit)
// - `CFDNS_ZONE`: Zone name (e.g., example.com)
// - `CFDNS_RECORD`: Fully qualified record name (e.g., home.example.com)
// - `CFDNS_IP_VERSION`: 4 or 6 (default 4)
//
// ### Address Source
// - `CFDNS_MODE`: auto or manual (default auto)
// - `CFDNS_SOURCE`: netlink, echo (alias ipify) or socket (default netlink)
// - `CFDNS_INTERFACE`: Interface to watch (netlink only, default: default route)
// - `CFDNS_INTERVAL_SECS`: Poll interval (echo and socket, default 300)
// - `CFDNS_ECHO_URL`: Echo endpoint override
// - `CFDNS_RESTART_SECS`: Source recreation period (default 86400)
//
// ### Updates
// - `CFDNS_MAX_RETRIES`: Retries per update (default 3)
// - `CFDNS_RETRY_DELAY_SECS`: Delay between retries (default 5)
// - `CFDNS_DRY_RUN`: Log updates instead of sending them
// - `CFDNS_LOG_LEVEL`: trace, debug, info, warn, error (default info)
//
// ## Example
//
// ```bash
// export CFDNS_API_TOKEN=...
// export CFDNS_ZONE=example.com
// export CFDNS_RECORD=home.example.com
// export CFDNS_INTERFACE=eth0
//
// cfdnsd
// ```

mod config;
mod updater;

use anyhow::Result;
use cfdns_core::{
    ConfiguredSource, RecordRef, SourceBuilder, SourceRegistry, Supervisor, SupervisorEvent,
};
use cfdns_provider_cloudflare::CloudflareClient;
use config::{Config, Mode};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;
use updater::RecordUpdater;

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

/// How long shutdown may take before the daemon gives up waiting
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Exit codes for the daemon
///
/// - 0: Clean shutdown (SIGTERM/SIGINT, or manual update done)
/// - 1: Configuration or startup error
/// - 2: Runtime error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CfdnsExitCode {
    CleanShutdown = 0,
    ConfigError = 1,
    RuntimeError = 2,
}

impl From<CfdnsExitCode> for ExitCode {
    fn from(code: CfdnsExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

/// Everything resolved at startup
struct Daemon {
    mode: Mode,
    source: ConfiguredSource,
    supervisor_config: cfdns_core::SupervisorConfig,
    updater: Arc<RecordUpdater>,
}

fn main() -> ExitCode {
    // Load configuration from environment
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return CfdnsExitCode::ConfigError.into();
        }
    };

    // Validate configuration
    if let Err(e) = config.validate() {
        eprintln!("Configuration validation error: {}", e);
        return CfdnsExitCode::ConfigError.into();
    }

    // Initialize tracing
    let log_level = match config.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder().with_max_level(log_level).finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return CfdnsExitCode::ConfigError.into();
    }

    info!("Starting cfdnsd daemon");
    debug!(?config, "Configuration loaded");

    // Enter tokio runtime
    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return CfdnsExitCode::RuntimeError.into();
        }
    };

    let code = rt.block_on(async {
        let daemon = match setup(&config).await {
            Ok(daemon) => daemon,
            Err(e) => {
                error!("Startup error: {}", e);
                return CfdnsExitCode::ConfigError;
            }
        };

        let result = match daemon.mode {
            Mode::Auto => run_auto(daemon).await,
            Mode::Manual => run_manual(daemon).await,
        };

        match result {
            Ok(()) => CfdnsExitCode::CleanShutdown,
            Err(e) => {
                error!("Daemon error: {}", e);
                CfdnsExitCode::RuntimeError
            }
        }
    });

    code.into()
}

/// Build the source registry from the compiled-in source crates
fn source_registry() -> SourceRegistry {
    #[allow(unused_mut)]
    let mut registry = SourceRegistry::new();

    #[cfg(feature = "netlink")]
    cfdns_ip_netlink::register(&mut registry);
    #[cfg(feature = "http")]
    cfdns_ip_http::register(&mut registry);
    #[cfg(feature = "socket")]
    cfdns_ip_socket::register(&mut registry);

    registry
}

/// Resolve everything the daemon needs before the first address is read
async fn setup(config: &Config) -> Result<Daemon> {
    let registry = Arc::new(source_registry());
    info!("Registered address sources: {:?}", registry.kinds());

    let source = ConfiguredSource::new(registry, config.source_config()?)?;

    let client = CloudflareClient::new(config.api_token.clone(), config.dry_run)?;
    if client.is_dry_run() {
        warn!("Dry run: DNS records will not be modified");
    }

    let zone_id = client.zone_id(&config.zone).await?;
    info!(zone = %config.zone, %zone_id, "Resolved Cloudflare zone");

    let record = RecordRef::new(zone_id, config.record.clone(), config.family.record_type());
    let updater = Arc::new(RecordUpdater::new(
        Arc::new(client),
        record,
        config.max_retries,
        config.retry_delay(),
    ));

    Ok(Daemon {
        mode: config.mode,
        source,
        supervisor_config: config.supervisor_config(),
        updater,
    })
}

/// Read the address once, update the record once
async fn run_manual(daemon: Daemon) -> Result<()> {
    let source = daemon.source.build().await?;
    info!(kind = source.kind(), family = %source.family(), "Reading current address");

    let Some(address) = source.current().await? else {
        anyhow::bail!("Couldn't find a valid {} address", source.family());
    };

    info!(%address, record = %daemon.updater.record().name, "Updating DNS record");
    daemon.updater.apply(address).await?;
    Ok(())
}

/// Keep the record in sync until SIGTERM or SIGINT
async fn run_auto(daemon: Daemon) -> Result<()> {
    let (mut supervisor, mut events) = Supervisor::new(
        Arc::new(daemon.source),
        daemon.updater,
        daemon.supervisor_config,
    )?;

    // Events are informational here; the supervisor logs what matters
    let event_log = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                SupervisorEvent::SourceFailed { generation, error } => {
                    debug!(generation, %error, "Address source failed")
                }
                other => debug!(?other, "Supervisor event"),
            }
        }
    });

    supervisor.start()?;
    info!("cfdnsd running, waiting for address changes");

    let signal = wait_for_shutdown().await?;
    info!("Received {}, shutting down gracefully", signal);

    match tokio::time::timeout(SHUTDOWN_TIMEOUT, supervisor.stop()).await {
        Ok(result) => result?,
        Err(_) => anyhow::bail!("Shutdown timeout after {:?}", SHUTDOWN_TIMEOUT),
    }

    // The event channel closes once the control loop has exited
    drop(supervisor);
    if event_log.await.is_err() {
        warn!("Event log task ended abnormally");
    }

    info!("cfdnsd stopped");
    Ok(())
}

/// Wait for a shutdown signal (SIGTERM or SIGINT)
#[cfg(unix)]
async fn wait_for_shutdown() -> Result<&'static str> {
    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGINT handler: {}", e))?;

    let signal = tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    };

    Ok(signal)
}

/// Wait for a shutdown signal (CTRL-C)
#[cfg(not(unix))]
async fn wait_for_shutdown() -> Result<&'static str> {
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to wait for CTRL-C: {}", e))?;
    Ok("SIGINT")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(CfdnsExitCode::CleanShutdown as u8, 0);
        assert_eq!(CfdnsExitCode::ConfigError as u8, 1);
        assert_eq!(CfdnsExitCode::RuntimeError as u8, 2);
    }

    #[test]
    fn test_registry_has_compiled_sources() {
        let registry = source_registry();

        #[cfg(feature = "netlink")]
        assert!(registry.contains("netlink"));
        #[cfg(feature = "http")]
        assert!(registry.contains("echo"));
        #[cfg(feature = "socket")]
        assert!(registry.contains("socket"));

        let _ = registry;
    }
}
