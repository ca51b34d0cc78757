//! Append-only log abstraction (consumer-group semantics).
//!
//! A `StreamLog` is the durable, ordered transport the pipeline publishes into
//! and consumes from. It follows the Redis Streams model:
//!
//! - **Append** assigns each entry a log identifier (e.g. `1700000000000-0`)
//! - **Consumer groups** are independent cursors; every group sees every entry
//! - **Pending entries**: an entry read by a consumer stays pending for its
//!   group until acknowledged, and can be read again from the consumer's
//!   pending list
//!
//! `InMemoryStreamLog` implements the model for tests/dev; `RedisStreamLog`
//! (feature `redis`) is the production backend.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

pub mod in_memory;
#[cfg(feature = "redis")]
pub mod redis_streams;

pub use in_memory::InMemoryStreamLog;
#[cfg(feature = "redis")]
pub use redis_streams::RedisStreamLog;

/// One entry as returned by a group read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub id: String,
    pub fields: HashMap<String, String>,
}

/// Where a group read starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadFrom {
    /// Entries never delivered to this group (`>`).
    New,
    /// Entries already delivered to this consumer and not yet acknowledged,
    /// with an id greater than `after` (`"0"` for the start of the list).
    Pending { after: String },
}

impl ReadFrom {
    pub fn pending_from_start() -> Self {
        ReadFrom::Pending {
            after: "0".to_string(),
        }
    }
}

/// Parameters of one `XREADGROUP`-style read.
#[derive(Debug, Clone)]
pub struct GroupRead<'a> {
    pub stream: &'a str,
    pub group: &'a str,
    pub consumer: &'a str,
    pub from: ReadFrom,
    pub count: usize,
    /// How long a read of new entries may wait for data. `None` returns immediately.
    pub block: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LogError {
    #[error("consumer group {group} already exists on {stream}")]
    GroupExists { stream: String, group: String },

    #[error("consumer group {group} does not exist on {stream}")]
    NoGroup { stream: String, group: String },

    #[error("log connection error: {0}")]
    Connection(String),

    #[error("log command error: {0}")]
    Command(String),
}

/// Durable ordered log with consumer groups.
///
/// Implementations must be safe to share across tasks: one instance serves
/// every publisher and every subscription.
#[async_trait]
pub trait StreamLog: Send + Sync + 'static {
    /// Append one entry; returns the log-assigned identifier.
    async fn append(&self, stream: &str, fields: &[(&str, String)]) -> Result<String, LogError>;

    /// Create `group` on `stream`, creating the stream if needed. The group
    /// starts at the beginning of the stream. Fails with `GroupExists` if it
    /// is already there.
    async fn create_group(&self, stream: &str, group: &str) -> Result<(), LogError>;

    /// Read entries for a consumer within a group. Reading `New` entries
    /// makes them pending for that consumer.
    async fn read_group(&self, read: &GroupRead<'_>) -> Result<Vec<LogEntry>, LogError>;

    /// Acknowledge entries for one group. Returns how many were pending.
    async fn ack(&self, stream: &str, group: &str, ids: &[String]) -> Result<u64, LogError>;

    /// Number of entries in the stream (0 if it does not exist).
    async fn len(&self, stream: &str) -> Result<u64, LogError>;

    /// Number of delivered-but-unacknowledged entries for a group.
    async fn pending_count(&self, stream: &str, group: &str) -> Result<u64, LogError>;
}

#[async_trait]
impl<L> StreamLog for Arc<L>
where
    L: StreamLog + ?Sized,
{
    async fn append(&self, stream: &str, fields: &[(&str, String)]) -> Result<String, LogError> {
        (**self).append(stream, fields).await
    }

    async fn create_group(&self, stream: &str, group: &str) -> Result<(), LogError> {
        (**self).create_group(stream, group).await
    }

    async fn read_group(&self, read: &GroupRead<'_>) -> Result<Vec<LogEntry>, LogError> {
        (**self).read_group(read).await
    }

    async fn ack(&self, stream: &str, group: &str, ids: &[String]) -> Result<u64, LogError> {
        (**self).ack(stream, group, ids).await
    }

    async fn len(&self, stream: &str) -> Result<u64, LogError> {
        (**self).len(stream).await
    }

    async fn pending_count(&self, stream: &str, group: &str) -> Result<u64, LogError> {
        (**self).pending_count(stream, group).await
    }
}
