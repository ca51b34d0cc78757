//! Pipeline lifecycle: stream setup, handler wiring, one task per subscription.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use geotrack_events::streams::{
    ANALYTICS_WORKER, GROUP_ANALYTICS, GROUP_NOTIFICATIONS, GROUP_REALTIME, NOTIFICATION_WORKER,
    POSITION_EVENTS, REALTIME_WORKER, WELL_KNOWN_GROUPS,
};
use geotrack_events::{EventHandler, EventType};

use crate::config::PipelineConfig;
use crate::consumer::EventConsumer;
use crate::handlers::{
    AnalyticsHandler, LogNotifier, NotificationHandler, Notifier, PositionUpdate, RealtimeHandler,
};
use crate::metrics::{MetricsSnapshot, PipelineMetrics};
use crate::publisher::{EventPublisher, PublishError};
use crate::stream_log::{LogError, StreamLog};
use crate::subscription::SubscriptionKey;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("event service is already running")]
    AlreadyStarted,

    #[error("failed to initialize streams: {0}")]
    Initialize(#[from] PublishError),

    #[error("failed to read stream stats: {0}")]
    Stats(#[from] LogError),
}

/// The `(stream, group, consumer)` tuples a default service runs: one worker
/// per well-known group, all on the position stream.
pub fn default_subscriptions() -> Vec<SubscriptionKey> {
    vec![
        SubscriptionKey::new(POSITION_EVENTS, GROUP_NOTIFICATIONS, NOTIFICATION_WORKER),
        SubscriptionKey::new(POSITION_EVENTS, GROUP_ANALYTICS, ANALYTICS_WORKER),
        SubscriptionKey::new(POSITION_EVENTS, GROUP_REALTIME, REALTIME_WORKER),
    ]
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupStats {
    pub name: String,
    /// Delivered but unacknowledged entries; `None` if the group is missing.
    pub pending: Option<u64>,
}

/// Read-only diagnostic snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineStats {
    pub stream: String,
    pub length: u64,
    pub groups: Vec<GroupStats>,
    pub metrics: MetricsSnapshot,
    pub generated_at: DateTime<Utc>,
}

struct Running {
    cancel: CancellationToken,
    tasks: JoinSet<()>,
}

/// Owns the publisher, the consumer and every subscription task.
///
/// ```text
/// start: initialize streams -> register handlers -> spawn subscriptions
/// stop:  cancel -> wait for every subscription task
/// ```
pub struct EventService<L> {
    log: Arc<L>,
    metrics: Arc<PipelineMetrics>,
    publisher: EventPublisher<L>,
    consumer: EventConsumer<L>,
    notifier: Arc<dyn Notifier>,
    realtime: RealtimeHandler,
    subscriptions: Vec<SubscriptionKey>,
    defaults_registered: bool,
    running: Option<Running>,
}

impl<L: StreamLog> EventService<L> {
    pub fn new(log: Arc<L>, config: PipelineConfig) -> Self {
        let metrics = Arc::new(PipelineMetrics::new());
        let realtime = RealtimeHandler::new(config.channel_capacity);

        Self {
            publisher: EventPublisher::new(log.clone(), metrics.clone()),
            consumer: EventConsumer::new(log.clone(), metrics.clone(), config),
            log,
            metrics,
            notifier: Arc::new(LogNotifier),
            realtime,
            subscriptions: default_subscriptions(),
            defaults_registered: false,
            running: None,
        }
    }

    /// Deliver notifications through `notifier` instead of logging them.
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Run these subscriptions instead of [`default_subscriptions`].
    pub fn with_subscriptions(mut self, subscriptions: Vec<SubscriptionKey>) -> Self {
        self.subscriptions = subscriptions;
        self
    }

    pub fn publisher(&self) -> &EventPublisher<L> {
        &self.publisher
    }

    pub fn metrics(&self) -> Arc<PipelineMetrics> {
        self.metrics.clone()
    }

    /// Receiver of position updates broadcast by the realtime handler.
    pub fn realtime_updates(&self) -> broadcast::Receiver<PositionUpdate> {
        self.realtime.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Add a handler. Only subscriptions started afterwards see it.
    pub fn register_handler(&mut self, event_type: EventType, handler: Arc<dyn EventHandler>) {
        self.consumer.register_handler(event_type, handler);
    }

    pub async fn start(&mut self) -> Result<(), ServiceError> {
        if self.running.is_some() {
            return Err(ServiceError::AlreadyStarted);
        }
        info!("starting event service");

        self.publisher.initialize_streams().await?;
        self.register_default_handlers();

        let cancel = CancellationToken::new();
        let mut tasks = JoinSet::new();
        for key in &self.subscriptions {
            let consumer = self.consumer.clone();
            let token = cancel.child_token();
            let key = key.clone();

            tasks.spawn(async move {
                info!(stream = %key.stream, group = %key.group, consumer = %key.consumer, "starting consumer");
                let mut subscription = consumer.subscribe(key.clone(), token);
                consumer.process_events(&mut subscription).await;
                subscription.close().await;
                info!(stream = %key.stream, group = %key.group, consumer = %key.consumer, "consumer stopped");
            });
        }

        self.running = Some(Running { cancel, tasks });
        info!(subscriptions = self.subscriptions.len(), "event service started");
        Ok(())
    }

    /// Cancel every subscription and wait for all of them to exit.
    ///
    /// Does nothing if the service is not running.
    pub async fn stop(&mut self) {
        let Some(Running { cancel, mut tasks }) = self.running.take() else {
            return;
        };
        info!("stopping event service");

        cancel.cancel();
        while let Some(joined) = tasks.join_next().await {
            if let Err(err) = joined {
                warn!(error = %err, "subscription task failed");
            }
        }

        info!("event service stopped");
    }

    /// Position stream length, pending count per known group, and counters.
    pub async fn stats(&self) -> Result<PipelineStats, ServiceError> {
        let length = self.log.len(POSITION_EVENTS).await?;

        let mut groups = Vec::with_capacity(WELL_KNOWN_GROUPS.len());
        for group in WELL_KNOWN_GROUPS {
            let pending = match self.log.pending_count(POSITION_EVENTS, group).await {
                Ok(n) => Some(n),
                Err(LogError::NoGroup { .. }) => None,
                Err(err) => return Err(err.into()),
            };
            groups.push(GroupStats {
                name: group.to_string(),
                pending,
            });
        }

        Ok(PipelineStats {
            stream: POSITION_EVENTS.to_string(),
            length,
            groups,
            metrics: self.metrics.snapshot(),
            generated_at: Utc::now(),
        })
    }

    fn register_default_handlers(&mut self) {
        if self.defaults_registered {
            return;
        }

        let notification: Arc<dyn EventHandler> =
            Arc::new(NotificationHandler::new(self.notifier.clone()));
        for event_type in [
            EventType::PositionChanged,
            EventType::UserEnteredSector,
            EventType::UserLeftSector,
        ] {
            self.consumer.register_handler(event_type, notification.clone());
        }
        self.consumer
            .register_handler(EventType::PositionChanged, Arc::new(AnalyticsHandler::new()));
        self.consumer
            .register_handler(EventType::PositionChanged, Arc::new(self.realtime.clone()));

        self.defaults_registered = true;
        info!(
            notification_types = 3,
            analytics_types = 1,
            realtime_types = 1,
            "event handlers registered"
        );
    }
}

impl<L> Drop for EventService<L> {
    fn drop(&mut self) {
        if let Some(running) = &self.running {
            running.cancel.cancel();
        }
    }
}
