//! Infrastructure layer: log backends, publishing, consuming, handlers, service.

pub mod config;
pub mod consumer;
pub mod handlers;
pub mod metrics;
pub mod position_tracker;
pub mod publisher;
pub mod service;
pub mod stream_log;
pub mod subscription;


pub use config::{ConfigError, PipelineConfig};
pub use consumer::{EventConsumer, ProcessOutcome};
pub use metrics::{MetricsSnapshot, PipelineMetrics};
pub use position_tracker::{PositionChange, PositionTracker, TrackReport};
pub use publisher::{EventPublisher, PublishError};
pub use service::{EventService, GroupStats, PipelineStats, ServiceError, default_subscriptions};
pub use stream_log::{InMemoryStreamLog, LogError, StreamLog};
#[cfg(feature = "redis")]
pub use stream_log::RedisStreamLog;
pub use subscription::{Subscription, SubscriptionKey};
