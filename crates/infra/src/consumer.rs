//! At-least-once delivery from a stream log to registered handlers.
//!
//! Each subscription is two halves joined by a bounded channel:
//!
//! - a **read loop** (spawned task) that reads new entries for its consumer,
//!   decodes them and sends them on; it periodically re-reads the consumer's
//!   own pending entries so failed ones are retried
//! - a **processing loop** ([`EventConsumer::process_events`]) that runs the
//!   handlers for each event and acknowledges it only if all of them succeeded
//!
//! Every wait races the subscription's cancellation token.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use geotrack_events::{Event, EventHandler, EventType, HandlerRegistry, WireError, wire};

use crate::config::PipelineConfig;
use crate::metrics::PipelineMetrics;
use crate::stream_log::{GroupRead, LogEntry, LogError, ReadFrom, StreamLog};
use crate::subscription::{InFlight, Subscription, SubscriptionKey};

/// What happened to one event in the processing loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Every invoked handler succeeded and the entry was acknowledged.
    Acknowledged,
    /// No handler is registered for the type; acknowledged without processing.
    Dropped,
    /// At least one handler failed; the entry stays pending for redelivery.
    Redeliverable { failures: usize },
    /// Handlers succeeded but the acknowledgment did not go through.
    AckFailed,
}

pub struct EventConsumer<L> {
    log: Arc<L>,
    registry: HandlerRegistry,
    metrics: Arc<PipelineMetrics>,
    config: PipelineConfig,
}

impl<L> Clone for EventConsumer<L> {
    fn clone(&self) -> Self {
        Self {
            log: self.log.clone(),
            registry: self.registry.clone(),
            metrics: self.metrics.clone(),
            config: self.config.clone(),
        }
    }
}

impl<L> std::fmt::Debug for EventConsumer<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventConsumer")
            .field("registry", &self.registry)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<L: StreamLog> EventConsumer<L> {
    pub fn new(log: Arc<L>, metrics: Arc<PipelineMetrics>, config: PipelineConfig) -> Self {
        Self {
            log,
            registry: HandlerRegistry::new(),
            metrics,
            config,
        }
    }

    /// Add a handler for `event_type`, after any already registered.
    ///
    /// Only affects subscriptions processed by this consumer value or clones
    /// taken afterwards.
    pub fn register_handler(&mut self, event_type: EventType, handler: Arc<dyn EventHandler>) {
        let count = self.registry.register(event_type, handler);
        debug!(event_type = %event_type, handlers = count, "handler registered");
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// Start a read loop for `key` and return its subscription.
    ///
    /// The loop stops only when `cancel` fires; read errors are retried after
    /// the configured backoff.
    pub fn subscribe(&self, key: SubscriptionKey, cancel: CancellationToken) -> Subscription {
        let (tx, rx) = mpsc::channel(self.config.channel_capacity);
        let in_flight = Arc::new(InFlight::default());

        let reader = ReadLoop {
            log: self.log.clone(),
            metrics: self.metrics.clone(),
            config: self.config.clone(),
            key: key.clone(),
            cancel: cancel.clone(),
            in_flight: in_flight.clone(),
            tx,
        };
        let handle = tokio::spawn(reader.run());

        info!(stream = %key.stream, group = %key.group, consumer = %key.consumer, "subscribed");
        Subscription::new(key, rx, cancel, handle, in_flight)
    }

    /// Drain `subscription` until it is cancelled or its read loop stops.
    ///
    /// Events still buffered at cancellation are left unacknowledged and stay
    /// pending in the log.
    pub async fn process_events(&self, subscription: &mut Subscription) {
        let cancel = subscription.cancellation().clone();
        let key = subscription.key().clone();

        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                next = subscription.recv() => match next {
                    Some(event) => event,
                    None => break,
                },
            };

            self.process_event(&key, &event).await;
            if let Some(id) = event.stream_id() {
                subscription.in_flight.remove(id);
            }
        }

        debug!(subscription = %key, "processing loop stopped");
    }

    /// Run the handlers for one event and acknowledge it if all succeeded.
    pub async fn process_event(&self, key: &SubscriptionKey, event: &Event) -> ProcessOutcome {
        let event_type = event.event_type();
        let handlers = self.registry.handlers_for(event_type);

        if handlers.is_empty() {
            error!(
                stream = %key.stream,
                group = %key.group,
                event_id = event.id(),
                event_type = %event_type,
                "no handler registered for event type, dropping event"
            );
            self.metrics.record_unhandled();
            self.ack_event(key, event).await;
            return ProcessOutcome::Dropped;
        }

        let mut failures = 0;
        for handler in handlers {
            if !handler.can_handle(event_type) {
                continue;
            }
            if let Err(err) = handler.handle(event).await {
                warn!(
                    handler = handler.name(),
                    group = %key.group,
                    event_id = event.id(),
                    event_type = %event_type,
                    error = %err,
                    "handler failed"
                );
                self.metrics.record_handler_failure();
                failures += 1;
            }
        }

        if failures > 0 {
            return ProcessOutcome::Redeliverable { failures };
        }

        if self.ack_event(key, event).await {
            ProcessOutcome::Acknowledged
        } else {
            ProcessOutcome::AckFailed
        }
    }

    async fn ack_event(&self, key: &SubscriptionKey, event: &Event) -> bool {
        match event.stream_id() {
            Some(id) => self.ack(&key.stream, &key.group, id).await,
            None => {
                warn!(event_id = event.id(), "event has no stream id, cannot acknowledge");
                self.metrics.record_ack_failure();
                false
            }
        }
    }

    /// Mark one entry processed for one group. Failures are logged, not retried.
    pub async fn ack(&self, stream: &str, group: &str, id: &str) -> bool {
        ack_entry(self.log.as_ref(), &self.metrics, stream, group, id).await
    }
}

async fn ack_entry<L: StreamLog>(
    log: &L,
    metrics: &PipelineMetrics,
    stream: &str,
    group: &str,
    id: &str,
) -> bool {
    match log.ack(stream, group, &[id.to_string()]).await {
        Ok(_) => {
            metrics.record_acked();
            true
        }
        Err(err) => {
            error!(stream, group, stream_id = id, error = %err, "failed to acknowledge entry");
            metrics.record_ack_failure();
            false
        }
    }
}

/// State owned by one spawned read loop.
struct ReadLoop<L> {
    log: Arc<L>,
    metrics: Arc<PipelineMetrics>,
    config: PipelineConfig,
    key: SubscriptionKey,
    cancel: CancellationToken,
    in_flight: Arc<InFlight>,
    tx: mpsc::Sender<Event>,
}

impl<L: StreamLog> ReadLoop<L> {
    async fn run(self) {
        // First scan right away: picks up entries left pending by a previous run.
        let mut next_scan = Some(Instant::now());

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            if let (Some(due), Some(interval)) = (next_scan, self.config.redelivery_interval) {
                if Instant::now() >= due {
                    if !self.redeliver_pending().await {
                        break;
                    }
                    next_scan = Some(Instant::now() + interval);
                }
            }

            let read = GroupRead {
                stream: &self.key.stream,
                group: &self.key.group,
                consumer: &self.key.consumer,
                from: ReadFrom::New,
                count: self.config.read_count,
                block: Some(self.config.block),
            };

            let result = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                result = self.log.read_group(&read) => result,
            };

            match result {
                Ok(entries) if entries.is_empty() => continue,
                Ok(entries) => {
                    self.metrics.record_delivered(entries.len());
                    if !self.forward(entries).await {
                        break;
                    }
                }
                Err(LogError::NoGroup { .. }) => {
                    warn!(subscription = %self.key, "consumer group missing, recreating");
                    self.metrics.record_read_error();
                    match self.log.create_group(&self.key.stream, &self.key.group).await {
                        Ok(()) | Err(LogError::GroupExists { .. }) => {}
                        Err(err) => {
                            error!(subscription = %self.key, error = %err, "failed to recreate consumer group");
                            if !self.backoff().await {
                                break;
                            }
                        }
                    }
                }
                Err(err) => {
                    error!(subscription = %self.key, error = %err, "error reading from stream");
                    self.metrics.record_read_error();
                    if !self.backoff().await {
                        break;
                    }
                }
            }
        }

        debug!(subscription = %self.key, "read loop stopped");
        // Dropping `self.tx` closes the channel.
    }

    /// Sleep the retry backoff. Returns false if cancelled meanwhile.
    async fn backoff(&self) -> bool {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(self.config.retry_backoff) => true,
        }
    }

    /// Re-read this consumer's pending entries and forward those not already in flight.
    async fn redeliver_pending(&self) -> bool {
        let mut after = "0".to_string();

        loop {
            let read = GroupRead {
                stream: &self.key.stream,
                group: &self.key.group,
                consumer: &self.key.consumer,
                from: ReadFrom::Pending {
                    after: after.clone(),
                },
                count: self.config.read_count,
                block: None,
            };

            let entries = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return false,
                result = self.log.read_group(&read) => match result {
                    Ok(entries) => entries,
                    Err(err) => {
                        warn!(subscription = %self.key, error = %err, "pending scan failed");
                        self.metrics.record_read_error();
                        return true;
                    }
                },
            };

            let Some(last) = entries.last() else {
                return true;
            };
            after = last.id.clone();

            let retry: Vec<LogEntry> = entries
                .into_iter()
                .filter(|entry| !self.in_flight.contains(&entry.id))
                .collect();

            if !retry.is_empty() {
                debug!(subscription = %self.key, count = retry.len(), "redelivering pending entries");
                self.metrics.record_redelivered(retry.len());
                if !self.forward(retry).await {
                    return false;
                }
            }
        }
    }

    /// Decode entries and send them on in order. Returns false if the
    /// subscription was cancelled or its receiver is gone.
    async fn forward(&self, entries: Vec<LogEntry>) -> bool {
        for entry in entries {
            let event = match wire::decode(&entry.id, &entry.fields) {
                Ok(event) => event,
                Err(WireError::UnknownType(event_type)) => {
                    warn!(
                        subscription = %self.key,
                        stream_id = %entry.id,
                        event_type = %event_type,
                        "no handlers registered for event type, dropping"
                    );
                    self.metrics.record_unhandled();
                    ack_entry(
                        self.log.as_ref(),
                        &self.metrics,
                        &self.key.stream,
                        &self.key.group,
                        &entry.id,
                    )
                    .await;
                    continue;
                }
                Err(err) => {
                    error!(
                        subscription = %self.key,
                        stream_id = %entry.id,
                        error = %err,
                        "failed to decode entry, dropping"
                    );
                    self.metrics.record_decode_failure();
                    ack_entry(
                        self.log.as_ref(),
                        &self.metrics,
                        &self.key.stream,
                        &self.key.group,
                        &entry.id,
                    )
                    .await;
                    continue;
                }
            };

            self.in_flight.insert(&entry.id);
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return false,
                sent = self.tx.send(event) => {
                    if sent.is_err() {
                        return false;
                    }
                }
            }
        }
        true
    }
}
