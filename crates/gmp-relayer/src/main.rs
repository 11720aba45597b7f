use anyhow::Context;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gmp_relayer::chains::{ChainFactory, ChainRegistry};
use gmp_relayer::config::RelayerConfig;
use gmp_relayer::monitor::{EventHub, EventTag, MonitorConfig, RelayEvent};
use gmp_relayer::relay::{
    DispatcherConfig, GasPolicy, GatewayDispatcher, IbcRelayer, RelayCoordinator, RetryPolicy,
};

#[derive(Parser)]
#[command(name = "relayer")]
#[command(about = "Relay engine for a local cross-chain messaging harness")]
#[command(version)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "config/relayer.toml")]
    pub config: String,

    /// Log level
    #[arg(long, default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the relayer
    Start,
    /// Load and validate the configuration file
    ValidateConfig,
    /// Health-check every configured chain
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("gmp_relayer={0},relayer={0}", cli.log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = RelayerConfig::load(&cli.config)?;
    info!("Loaded configuration from: {}", cli.config);

    match cli.command {
        Commands::Start => start_relayer(config).await?,
        Commands::ValidateConfig => validate_config(&config)?,
        Commands::Status => show_status(&config).await?,
    }

    Ok(())
}

fn build_registry(config: &RelayerConfig) -> anyhow::Result<ChainRegistry> {
    let mut ids: Vec<_> = config.chains.keys().collect();
    ids.sort();

    let mut registry = ChainRegistry::new();
    for id in ids {
        let chain_config = &config.chains[id];
        let chain = ChainFactory::create_chain(chain_config)
            .with_context(|| format!("failed to create chain {}", id))?;
        registry.register(chain)?;
        info!(chain = %id, kind = chain_config.config.family(), "chain registered");
    }
    Ok(registry)
}

async fn start_relayer(config: RelayerConfig) -> anyhow::Result<()> {
    config.validate()?;
    let registry = build_registry(&config)?;
    let (shutdown_sender, shutdown_receiver) = tokio::sync::watch::channel(false);

    let policy = GasPolicy::from_config(&config.gas)?;
    let mut dispatcher = GatewayDispatcher::new(registry.clone(), policy, DispatcherConfig::from_config(&config));
    dispatcher.on_failure(|outcome| {
        error!(
            command_id = %outcome.command_id,
            source = %outcome.source_chain,
            reason = outcome.reason.as_deref().unwrap_or_default(),
            "message failed"
        );
    });

    #[cfg(feature = "metrics")]
    let metrics = if config.metrics.enabled {
        let metrics = Arc::new(gmp_relayer::metrics::RelayerMetrics::new()?);
        let addr = format!("{}:{}", config.metrics.host, config.metrics.port)
            .parse()
            .context("invalid metrics address")?;
        let server = gmp_relayer::metrics::serve(metrics.clone(), addr, shutdown_receiver.clone());
        tokio::spawn(async move {
            if let Err(e) = server.await {
                error!("Metrics server error: {:#}", e);
            }
        });
        dispatcher = dispatcher.with_metrics(metrics.clone());
        Some(metrics)
    } else {
        None
    };

    let mut coordinator = RelayCoordinator::new(
        registry.clone(),
        Duration::from_millis(config.global.relay_interval_ms),
    );
    coordinator.add_relayer(Box::new(dispatcher)).await;

    for channel in &config.channels {
        let endpoint = |chain_id: &str| -> anyhow::Result<Arc<dyn gmp_relayer::IbcEndpoint>> {
            let chain_config = config
                .get_chain(chain_id)
                .with_context(|| format!("channel {} references unknown chain {}", channel.id, chain_id))?;
            Ok(ChainFactory::create_ibc_endpoint(chain_config)?)
        };
        let mut relayer = IbcRelayer::new(channel.clone(), endpoint(&channel.chain_a)?, endpoint(&channel.chain_b)?);
        #[cfg(feature = "metrics")]
        if let Some(metrics) = &metrics {
            relayer = relayer.with_metrics(metrics.clone());
        }
        match relayer.setup().await {
            Ok((a, b)) => info!(link = %channel.id, channel_a = %a, channel_b = %b, "channel link ready"),
            Err(e) => warn!(link = %channel.id, error = %e, "channel setup failed, retrying on first cycle"),
        }
        coordinator.add_relayer(Box::new(relayer)).await;
    }

    let hub = EventHub::new(MonitorConfig {
        polling_interval_ms: config.global.relay_interval_ms,
        max_block_range: config.global.max_block_range,
        retry: RetryPolicy::from_global(&config.global),
    });
    hub.listen(EventTag::RelayOutcome, |event: RelayEvent| async move {
        if let RelayEvent::Outcome { destination_chain, outcome } = event {
            info!(
                command_id = %outcome.command_id,
                destination = %destination_chain,
                status = %outcome.status,
                "relay outcome"
            );
        }
        Ok(())
    });
    coordinator.attach_hub(hub).await;
    coordinator
        .after_relay(|kind, data| {
            if !data.is_empty() {
                debug!(relayer = %kind, heights = data.heights.len(), "cycle produced results");
            }
        })
        .await;

    info!(chains = registry.len(), channels = config.channels.len(), "relayer starting");
    coordinator.start();

    tokio::signal::ctrl_c().await?;
    info!("Shutting down relayer...");
    coordinator.destroy().await;
    shutdown_sender.send_replace(true);

    Ok(())
}

fn validate_config(config: &RelayerConfig) -> anyhow::Result<()> {
    config.validate()?;
    GasPolicy::from_config(&config.gas)?;
    info!(
        chains = config.chains.len(),
        channels = config.channels.len(),
        "configuration is valid"
    );
    Ok(())
}

async fn show_status(config: &RelayerConfig) -> anyhow::Result<()> {
    let registry = build_registry(config)?;
    let coordinator = RelayCoordinator::new(registry, Duration::from_millis(config.global.relay_interval_ms));
    let status = coordinator.health_check().await;

    info!(
        healthy = status.healthy_chains,
        unhealthy = status.unhealthy_chains,
        "chain status"
    );
    for message in &status.chain_errors {
        warn!("{}", message);
    }
    if !status.is_healthy {
        anyhow::bail!("{} of {} chains unhealthy", status.unhealthy_chains, status.total_chains);
    }
    Ok(())
}
