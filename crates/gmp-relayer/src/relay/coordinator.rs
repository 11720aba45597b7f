// Relay coordinator: periodic single-flight cycles over every relayer
use futures::future::join_all;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::{RelayData, Relayer, RelayerKind};
use crate::chains::ChainRegistry;
use crate::monitor::{EventHub, RelayEvent};

type AfterRelayHook = Box<dyn Fn(RelayerKind, &RelayData) + Send + Sync>;

/// State touched by a cycle; holding its lock is the single-flight guard
struct CycleState {
    relayers: Vec<Box<dyn Relayer>>,
    after_relay: Vec<AfterRelayHook>,
    hub: Option<EventHub>,
}

#[derive(Clone)]
struct CycleRunner {
    state: Arc<Mutex<CycleState>>,
    stopped: Arc<AtomicBool>,
}

impl CycleRunner {
    /// Run one cycle unless one is already running; `None` means skipped
    async fn run(&self) -> Option<RelayData> {
        if self.stopped.load(Ordering::SeqCst) {
            return None;
        }
        let Ok(mut state) = self.state.clone().try_lock_owned() else {
            debug!("relay cycle still running, tick skipped");
            return None;
        };
        let state = &mut *state;

        let results = join_all(
            state
                .relayers
                .iter_mut()
                .map(|relayer| async move { (relayer.kind(), relayer.relay_cycle().await) }),
        )
        .await;

        let mut total = RelayData::default();
        for (kind, result) in results {
            match result {
                Ok(data) => {
                    for hook in &state.after_relay {
                        hook(kind, &data);
                    }
                    if let Some(hub) = &state.hub {
                        for (destination, outcomes) in &data.outcomes {
                            for outcome in outcomes {
                                hub.publish(RelayEvent::Outcome {
                                    destination_chain: destination.clone(),
                                    outcome: outcome.clone(),
                                });
                            }
                        }
                    }
                    total.merge(data);
                }
                Err(e) => warn!(relayer = %kind, error = %e, "relay cycle failed"),
            }
        }
        Some(total)
    }
}

/// Drives every relayer on a timer
pub struct RelayCoordinator {
    registry: ChainRegistry,
    relay_interval: Duration,
    runner: CycleRunner,
    shutdown_sender: watch::Sender<bool>,
    shutdown_receiver: watch::Receiver<bool>,
    task: Option<JoinHandle<()>>,
}

impl RelayCoordinator {
    pub fn new(registry: ChainRegistry, relay_interval: Duration) -> Self {
        let (shutdown_sender, shutdown_receiver) = watch::channel(false);
        Self {
            registry,
            relay_interval,
            runner: CycleRunner {
                state: Arc::new(Mutex::new(CycleState {
                    relayers: Vec::new(),
                    after_relay: Vec::new(),
                    hub: None,
                })),
                stopped: Arc::new(AtomicBool::new(false)),
            },
            shutdown_sender,
            shutdown_receiver,
            task: None,
        }
    }

    pub async fn add_relayer(&self, relayer: Box<dyn Relayer>) {
        let mut state = self.runner.state.lock().await;
        info!(relayer = %relayer.kind(), "relayer added");
        state.relayers.push(relayer);
    }

    /// Called after every successful relayer cycle with its data
    pub async fn after_relay<F>(&self, hook: F)
    where
        F: Fn(RelayerKind, &RelayData) + Send + Sync + 'static,
    {
        self.runner.state.lock().await.after_relay.push(Box::new(hook));
    }

    /// Publish cycle outcomes through `hub`; the hub is stopped with the coordinator
    pub async fn attach_hub(&self, hub: EventHub) {
        self.runner.state.lock().await.hub = Some(hub);
    }

    pub fn registry(&self) -> &ChainRegistry {
        &self.registry
    }

    pub fn is_stopped(&self) -> bool {
        self.runner.stopped.load(Ordering::SeqCst)
    }

    /// Run one cycle now. Returns `None` if a cycle is already in flight or
    /// the coordinator is stopped.
    pub async fn run_cycle(&self) -> Option<RelayData> {
        self.runner.run().await
    }

    /// Start the periodic cycle timer
    pub fn start(&mut self) {
        if self.task.is_some() || self.is_stopped() {
            return;
        }
        let runner = self.runner.clone();
        let mut shutdown = self.shutdown_receiver.clone();
        let period = self.relay_interval;

        info!(interval_ms = period.as_millis() as u64, "starting relay coordinator");
        self.task = Some(tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                if *shutdown.borrow() {
                    break;
                }
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = ticker.tick() => {
                        // Dropping the cycle future on shutdown cancels in-flight polls
                        tokio::select! {
                            _ = runner.run() => {}
                            _ = shutdown.changed() => break,
                        }
                    }
                }
            }
            debug!("relay loop exited");
        }));
    }

    /// Halt the timer and the hub subscriptions; repeated calls are no-ops.
    /// Transactions already broadcast may still confirm.
    pub async fn stop(&mut self) {
        if self.runner.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("stopping relay coordinator");
        self.shutdown_sender.send_replace(true);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "relay loop ended abnormally");
            }
        }
        if let Some(hub) = &self.runner.state.lock().await.hub {
            hub.stop();
        }
    }

    /// Stop and drop per-run gas bookkeeping
    pub async fn destroy(&mut self) {
        self.stop().await;
        let mut state = self.runner.state.lock().await;
        for relayer in state.relayers.iter_mut() {
            relayer.clear_gas_events();
        }
        state.after_relay.clear();
    }

    /// Wait for the relay loop to end
    pub async fn wait(&mut self) {
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }

    /// Health check for all registered chains
    pub async fn health_check(&self) -> HealthStatus {
        let mut status = HealthStatus::default();

        for (chain_id, chain) in self.registry.iter() {
            match chain.health_check().await {
                Ok(()) => {
                    status.healthy_chains += 1;
                    info!(chain = %chain_id, "chain healthy");
                }
                Err(e) => {
                    status.unhealthy_chains += 1;
                    warn!(chain = %chain_id, error = %e, "chain unhealthy");
                    status.chain_errors.push(format!("{}: {}", chain_id, e));
                }
            }
        }

        status.total_chains = self.registry.len();
        status.is_healthy = status.unhealthy_chains == 0;
        status
    }
}

/// Health status for all registered chains
#[derive(Debug, Default)]
pub struct HealthStatus {
    pub is_healthy: bool,
    pub total_chains: usize,
    pub healthy_chains: usize,
    pub unhealthy_chains: usize,
    pub chain_errors: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RelayError;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU32;

    struct CountingRelayer {
        cycles: Arc<AtomicU32>,
        cleared: Arc<AtomicBool>,
        data: RelayData,
    }

    #[async_trait]
    impl Relayer for CountingRelayer {
        fn kind(&self) -> RelayerKind {
            RelayerKind::Ibc
        }
        async fn relay_cycle(&mut self) -> Result<RelayData, RelayError> {
            let n = self.cycles.fetch_add(1, Ordering::SeqCst) as u64;
            self.data = RelayData {
                heights: vec![n],
                ..RelayData::default()
            };
            Ok(self.data.clone())
        }
        fn relay_data(&self) -> &RelayData {
            &self.data
        }
        fn clear_gas_events(&mut self) {
            self.cleared.store(true, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_run_cycle_merges_and_calls_hooks() {
        let coordinator = RelayCoordinator::new(ChainRegistry::new(), Duration::from_millis(10));
        let cycles = Arc::new(AtomicU32::new(0));
        coordinator
            .add_relayer(Box::new(CountingRelayer {
                cycles: cycles.clone(),
                cleared: Arc::new(AtomicBool::new(false)),
                data: RelayData::default(),
            }))
            .await;
        let seen = Arc::new(AtomicU32::new(0));
        let hook_seen = seen.clone();
        coordinator
            .after_relay(move |kind, data| {
                assert_eq!(kind, RelayerKind::Ibc);
                hook_seen.fetch_add(data.heights.len() as u32, Ordering::SeqCst);
            })
            .await;

        let data = coordinator.run_cycle().await.unwrap();
        assert_eq!(data.heights, vec![0]);
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_destroy_stops_and_clears() {
        let mut coordinator = RelayCoordinator::new(ChainRegistry::new(), Duration::from_millis(5));
        let cleared = Arc::new(AtomicBool::new(false));
        coordinator
            .add_relayer(Box::new(CountingRelayer {
                cycles: Arc::new(AtomicU32::new(0)),
                cleared: cleared.clone(),
                data: RelayData::default(),
            }))
            .await;
        coordinator.start();
        tokio::time::sleep(Duration::from_millis(20)).await;

        coordinator.destroy().await;
        coordinator.destroy().await;
        assert!(coordinator.is_stopped());
        assert!(cleared.load(Ordering::SeqCst));
        assert!(coordinator.run_cycle().await.is_none());
    }

    #[tokio::test]
    async fn test_health_check_without_chains() {
        let coordinator = RelayCoordinator::new(ChainRegistry::new(), Duration::from_secs(1));
        let status = coordinator.health_check().await;
        assert!(status.is_healthy);
        assert_eq!(status.total_chains, 0);
    }
}
