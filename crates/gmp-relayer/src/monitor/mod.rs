// Tagged event fan-out: per-chain subscriptions feeding registered handlers
use futures::future::BoxFuture;
use futures::FutureExt;
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::chains::{Chain, ChainRegistry, EventKind, GatewayEvent, GatewayEventData};
use crate::relay::{EventListener, RelayOutcome, RetryPolicy};

/// Closed set of event shapes handlers can subscribe to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventTag {
    ContractCall,
    ContractCallWithToken,
    TokenSent,
    GasPaid,
    ContractCallApproved,
    Executed,
    RelayOutcome,
    /// Every event
    Any,
}

/// Normalized event delivered to handlers
#[derive(Debug, Clone, PartialEq)]
pub enum RelayEvent {
    Gateway(GatewayEvent),
    Outcome {
        destination_chain: String,
        outcome: RelayOutcome,
    },
}

impl RelayEvent {
    pub fn tag(&self) -> EventTag {
        match self {
            RelayEvent::Gateway(event) => match &event.data {
                GatewayEventData::ContractCall { token: Some(_), .. } => EventTag::ContractCallWithToken,
                GatewayEventData::ContractCall { token: None, .. } => EventTag::ContractCall,
                GatewayEventData::TokenSent { .. } => EventTag::TokenSent,
                GatewayEventData::GasPaid { .. } => EventTag::GasPaid,
                GatewayEventData::ContractCallApproved { .. } => EventTag::ContractCallApproved,
                GatewayEventData::Executed { .. } => EventTag::Executed,
            },
            RelayEvent::Outcome { .. } => EventTag::RelayOutcome,
        }
    }
}

pub type EventHandler = Arc<dyn Fn(RelayEvent) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Identifies one registered handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    tag: EventTag,
    id: u64,
}

impl SubscriptionHandle {
    pub fn tag(&self) -> EventTag {
        self.tag
    }
}

/// Configuration for per-chain subscriptions
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Polling interval for new blocks
    pub polling_interval_ms: u64,
    /// Number of blocks to request in each poll
    pub max_block_range: u64,
    pub retry: RetryPolicy,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            polling_interval_ms: 1000,
            max_block_range: 1000,
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug)]
struct HandlerFailure {
    tag: EventTag,
    handler: u64,
    reason: String,
}

struct HubInner {
    config: MonitorConfig,
    handlers: RwLock<HashMap<EventTag, Vec<(u64, EventHandler)>>>,
    next_id: AtomicU64,
    failures: mpsc::UnboundedSender<HandlerFailure>,
    /// Receiver half, taken by the drain task on first use
    failure_sink: Mutex<Option<mpsc::UnboundedReceiver<HandlerFailure>>>,
    errors_observed: AtomicU64,
    stopped: AtomicBool,
    shutdown: watch::Sender<bool>,
}

/// Listener/dispatcher facade
#[derive(Clone)]
pub struct EventHub {
    inner: Arc<HubInner>,
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new(MonitorConfig::default())
    }
}

impl EventHub {
    pub fn new(config: MonitorConfig) -> Self {
        let (failures, failure_sink) = mpsc::unbounded_channel();
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(HubInner {
                config,
                handlers: RwLock::new(HashMap::new()),
                next_id: AtomicU64::new(0),
                failures,
                failure_sink: Mutex::new(Some(failure_sink)),
                errors_observed: AtomicU64::new(0),
                stopped: AtomicBool::new(false),
                shutdown,
            }),
        }
    }

    /// Register `handler` for events tagged `tag`
    pub fn listen<F, Fut>(&self, tag: EventTag, handler: F) -> SubscriptionHandle
    where
        F: Fn(RelayEvent) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let handler: EventHandler = Arc::new(move |event: RelayEvent| handler(event).boxed());
        if let Ok(mut handlers) = self.inner.handlers.write() {
            handlers.entry(tag).or_default().push((id, handler));
        }
        debug!(?tag, id, "handler registered");
        SubscriptionHandle { tag, id }
    }

    /// Remove one handler; returns false if it was not registered
    pub fn unlisten(&self, handle: SubscriptionHandle) -> bool {
        let Ok(mut handlers) = self.inner.handlers.write() else {
            return false;
        };
        match handlers.get_mut(&handle.tag) {
            Some(list) => {
                let before = list.len();
                list.retain(|(id, _)| *id != handle.id);
                list.len() != before
            }
            None => false,
        }
    }

    pub fn handler_count(&self) -> usize {
        self.inner
            .handlers
            .read()
            .map(|handlers| handlers.values().map(Vec::len).sum())
            .unwrap_or(0)
    }

    /// Handler errors and panics seen so far
    pub fn errors_observed(&self) -> u64 {
        self.inner.errors_observed.load(Ordering::SeqCst)
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }

    /// Fan `event` out to its tag's handlers and the `Any` handlers, in
    /// registration order. Each handler runs in its own task. Returns the
    /// number of handlers invoked.
    pub fn publish(&self, event: RelayEvent) -> usize {
        if self.is_stopped() {
            return 0;
        }
        let tag = event.tag();
        let mut selected: Vec<(u64, EventHandler)> = match self.inner.handlers.read() {
            Ok(handlers) => [tag, EventTag::Any]
                .iter()
                .filter_map(|t| handlers.get(t))
                .flatten()
                .cloned()
                .collect(),
            Err(_) => return 0,
        };
        if selected.is_empty() {
            return 0;
        }
        selected.sort_by_key(|(id, _)| *id);
        self.ensure_failure_drain();

        for (id, handler) in &selected {
            let handler = handler.clone();
            let event = event.clone();
            let failures = self.inner.failures.clone();
            let handler_id = *id;
            tokio::spawn(async move {
                let result = match std::panic::catch_unwind(AssertUnwindSafe(|| handler(event))) {
                    Ok(future) => match AssertUnwindSafe(future).catch_unwind().await {
                        Ok(Ok(())) => return,
                        Ok(Err(e)) => format!("{:#}", e),
                        Err(panic) => panic_message(panic),
                    },
                    Err(panic) => panic_message(panic),
                };
                let _ = failures.send(HandlerFailure {
                    tag,
                    handler: handler_id,
                    reason: result,
                });
            });
        }
        selected.len()
    }

    fn ensure_failure_drain(&self) {
        let receiver = match self.inner.failure_sink.lock() {
            Ok(mut sink) => sink.take(),
            Err(_) => None,
        };
        let Some(mut receiver) = receiver else {
            return;
        };
        let inner = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            while let Some(failure) = receiver.recv().await {
                warn!(
                    tag = ?failure.tag,
                    handler = failure.handler,
                    error = %failure.reason,
                    "event handler failed"
                );
                match inner.upgrade() {
                    Some(inner) => {
                        inner.errors_observed.fetch_add(1, Ordering::SeqCst);
                    }
                    None => break,
                }
            }
        });
    }

    /// Spawn one polling subscription per registered chain
    pub fn start(&self, registry: &ChainRegistry) {
        if self.is_stopped() {
            warn!("event hub already stopped, not starting subscriptions");
            return;
        }
        for (chain_id, chain) in registry.iter() {
            info!(chain = %chain_id, "starting event subscription");
            let hub = self.clone();
            let chain = chain.clone();
            let shutdown = self.inner.shutdown.subscribe();
            tokio::spawn(async move { hub.watch_chain(chain, shutdown).await });
        }
    }

    async fn watch_chain(&self, chain: Arc<dyn Chain>, mut shutdown: watch::Receiver<bool>) {
        let config = &self.inner.config;
        let mut listener = EventListener::new(config.max_block_range, config.retry.clone());
        let mut ticker = interval(Duration::from_millis(config.polling_interval_ms.max(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {
                    let polled = tokio::select! {
                        polled = listener.poll(chain.as_ref(), EventKind::All) => polled,
                        _ = shutdown.changed() => break,
                    };
                    match polled {
                        Ok(batch) => {
                            for event in &batch.events {
                                self.publish(RelayEvent::Gateway(event.clone()));
                            }
                            listener.commit(&batch);
                        }
                        Err(e) => warn!(chain = %chain.chain_id(), error = %e, "subscription poll failed"),
                    }
                }
            }
        }
        debug!(chain = %chain.chain_id(), "event subscription stopped");
    }

    /// Stop every subscription; later calls are no-ops
    pub fn stop(&self) {
        if self.inner.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.shutdown.send_replace(true);
        info!("event hub stopped");
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("handler panicked: {}", message)
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("handler panicked: {}", message)
    } else {
        "handler panicked".to_string()
    }
}
