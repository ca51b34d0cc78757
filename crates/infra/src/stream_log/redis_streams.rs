//! Redis Streams backend (XADD / XREADGROUP / XACK).
//!
//! - **Writes and acks** share one auto-reconnecting `ConnectionManager`
//! - **Blocking reads** get a dedicated multiplexed connection per
//!   `(stream, group, consumer)`, so an `XREADGROUP ... BLOCK` never holds up
//!   publishes or other subscriptions
//!
//! A reader connection that fails is dropped and reopened on the next read.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use redis::aio::{ConnectionManager, MultiplexedConnection};
use redis::streams::{StreamPendingReply, StreamReadOptions, StreamReadReply};
use redis::{AsyncCommands, RedisError};
use tracing::{debug, instrument};

use super::{GroupRead, LogEntry, LogError, ReadFrom, StreamLog};

pub struct RedisStreamLog {
    client: redis::Client,
    writer: ConnectionManager,
    readers: Mutex<HashMap<String, MultiplexedConnection>>,
}

impl std::fmt::Debug for RedisStreamLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStreamLog").finish_non_exhaustive()
    }
}

impl RedisStreamLog {
    /// Connect to Redis (e.g. `redis://localhost:6379`).
    pub async fn connect(redis_url: impl AsRef<str>) -> Result<Self, LogError> {
        let client = redis::Client::open(redis_url.as_ref())
            .map_err(|e| LogError::Connection(e.to_string()))?;
        let writer = client
            .get_connection_manager()
            .await
            .map_err(|e| LogError::Connection(e.to_string()))?;

        Ok(Self {
            client,
            writer,
            readers: Mutex::new(HashMap::new()),
        })
    }

    /// Round-trip a `PING`.
    pub async fn ping(&self) -> Result<(), LogError> {
        let mut conn = self.writer.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(command_error)?;
        Ok(())
    }

    async fn reader(&self, key: &str) -> Result<MultiplexedConnection, LogError> {
        let cached = self
            .readers
            .lock()
            .map_err(|_| LogError::Connection("reader cache poisoned".to_string()))?
            .get(key)
            .cloned();
        if let Some(conn) = cached {
            return Ok(conn);
        }

        let conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| LogError::Connection(e.to_string()))?;

        debug!(reader = key, "opened stream reader connection");
        if let Ok(mut readers) = self.readers.lock() {
            readers.insert(key.to_string(), conn.clone());
        }
        Ok(conn)
    }

    fn drop_reader(&self, key: &str) {
        if let Ok(mut readers) = self.readers.lock() {
            readers.remove(key);
        }
    }
}

#[async_trait]
impl StreamLog for RedisStreamLog {
    #[instrument(skip(self, fields), err)]
    async fn append(&self, stream: &str, fields: &[(&str, String)]) -> Result<String, LogError> {
        let mut conn = self.writer.clone();
        conn.xadd(stream, "*", fields).await.map_err(command_error)
    }

    async fn create_group(&self, stream: &str, group: &str) -> Result<(), LogError> {
        let mut conn = self.writer.clone();
        // MKSTREAM creates the stream; "0" starts the group at the beginning.
        let created: Result<String, RedisError> =
            conn.xgroup_create_mkstream(stream, group, "0").await;

        match created {
            Ok(_) => Ok(()),
            Err(e) if e.code() == Some("BUSYGROUP") => Err(LogError::GroupExists {
                stream: stream.to_string(),
                group: group.to_string(),
            }),
            Err(e) => Err(command_error(e)),
        }
    }

    async fn read_group(&self, read: &GroupRead<'_>) -> Result<Vec<LogEntry>, LogError> {
        let key = format!("{}/{}/{}", read.stream, read.group, read.consumer);
        let mut conn = self.reader(&key).await?;

        let mut options = StreamReadOptions::default()
            .group(read.group, read.consumer)
            .count(read.count);
        let start = match &read.from {
            ReadFrom::New => {
                if let Some(block) = read.block {
                    options = options.block(block.as_millis().max(1) as usize);
                }
                ">".to_string()
            }
            ReadFrom::Pending { after } => after.clone(),
        };

        let reply: Result<Option<StreamReadReply>, RedisError> = conn
            .xread_options(&[read.stream], &[start.as_str()], &options)
            .await;

        let reply = match reply {
            Ok(reply) => reply,
            Err(e) if e.code() == Some("NOGROUP") => {
                return Err(LogError::NoGroup {
                    stream: read.stream.to_string(),
                    group: read.group.to_string(),
                });
            }
            Err(e) => {
                if e.is_connection_dropped() || e.is_io_error() || e.is_timeout() {
                    self.drop_reader(&key);
                }
                return Err(command_error(e));
            }
        };

        let mut entries = Vec::new();
        for stream_key in reply.map(|r| r.keys).unwrap_or_default() {
            for id in stream_key.ids {
                let mut fields = HashMap::with_capacity(id.map.len());
                for (name, value) in &id.map {
                    let value: String = redis::from_redis_value(value).map_err(command_error)?;
                    fields.insert(name.clone(), value);
                }
                entries.push(LogEntry { id: id.id, fields });
            }
        }
        Ok(entries)
    }

    async fn ack(&self, stream: &str, group: &str, ids: &[String]) -> Result<u64, LogError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let mut conn = self.writer.clone();
        conn.xack(stream, group, ids).await.map_err(command_error)
    }

    async fn len(&self, stream: &str) -> Result<u64, LogError> {
        let mut conn = self.writer.clone();
        conn.xlen(stream).await.map_err(command_error)
    }

    async fn pending_count(&self, stream: &str, group: &str) -> Result<u64, LogError> {
        let mut conn = self.writer.clone();
        let reply: Result<StreamPendingReply, RedisError> = conn.xpending(stream, group).await;

        match reply {
            Ok(reply) => Ok(reply.count() as u64),
            Err(e) if e.code() == Some("NOGROUP") => Err(LogError::NoGroup {
                stream: stream.to_string(),
                group: group.to_string(),
            }),
            Err(e) => Err(command_error(e)),
        }
    }
}

fn command_error(e: RedisError) -> LogError {
    if e.is_connection_dropped() || e.is_connection_refusal() || e.is_io_error() {
        LogError::Connection(e.to_string())
    } else {
        LogError::Command(e.to_string())
    }
}
