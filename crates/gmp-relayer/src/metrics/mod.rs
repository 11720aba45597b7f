// Metrics and monitoring
use axum::{extract::State, http::StatusCode, routing::get, Router};
use prometheus::{Counter, Encoder, Histogram, HistogramOpts, Registry, TextEncoder};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

/// Relayer metrics
pub struct RelayerMetrics {
    // Gateway metrics
    pub messages_executed: Counter,
    pub messages_failed: Counter,
    pub approvals_submitted: Counter,

    // IBC metrics
    pub packets_relayed: Counter,

    // Chain metrics
    pub rpc_errors: Counter,
    pub relay_cycle_duration: Histogram,

    registry: Arc<Registry>,
}

impl RelayerMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let messages_executed = Counter::new("gmp_messages_executed_total", "Messages executed on their destination")?;
        let messages_failed = Counter::new("gmp_messages_failed_total", "Messages that reached the failed state")?;
        let approvals_submitted =
            Counter::new("gmp_approvals_submitted_total", "Approval transactions submitted to gateways")?;
        let packets_relayed = Counter::new("ibc_packets_relayed_total", "IBC receive and ack transactions landed")?;
        let rpc_errors = Counter::new("gmp_rpc_errors_total", "Chain polls abandoned after exhausting retries")?;
        let relay_cycle_duration = Histogram::with_opts(HistogramOpts::new(
            "gmp_relay_cycle_duration_seconds",
            "Wall time of one relay cycle",
        ))?;

        registry.register(Box::new(messages_executed.clone()))?;
        registry.register(Box::new(messages_failed.clone()))?;
        registry.register(Box::new(approvals_submitted.clone()))?;
        registry.register(Box::new(packets_relayed.clone()))?;
        registry.register(Box::new(rpc_errors.clone()))?;
        registry.register(Box::new(relay_cycle_duration.clone()))?;

        Ok(Self {
            messages_executed,
            messages_failed,
            approvals_submitted,
            packets_relayed,
            rpc_errors,
            relay_cycle_duration,
            registry,
        })
    }

    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    /// Prometheus text exposition of every registered metric
    pub fn encode(&self) -> prometheus::Result<String> {
        let mut buffer = vec![];
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

async fn metrics_handler(State(metrics): State<Arc<RelayerMetrics>>) -> Result<String, StatusCode> {
    metrics.encode().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

pub fn router(metrics: Arc<RelayerMetrics>) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(metrics)
}

/// Serve `/metrics` until `shutdown` flips to true
pub async fn serve(
    metrics: Arc<RelayerMetrics>,
    addr: SocketAddr,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Metrics server listening on http://{}/metrics", addr);

    axum::serve(listener, router(metrics))
        .with_graceful_shutdown(async move {
            while !*shutdown.borrow() {
                if shutdown.changed().await.is_err() {
                    break;
                }
            }
        })
        .await?;
    Ok(())
}
