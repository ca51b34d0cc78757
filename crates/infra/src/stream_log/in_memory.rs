use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Notify;
use tokio::time::Instant;

use super::{GroupRead, LogEntry, LogError, ReadFrom, StreamLog};

/// Entry identifier `<millis>-<seq>`, ordered numerically.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
struct EntryId {
    ms: u64,
    seq: u64,
}

impl EntryId {
    const ZERO: EntryId = EntryId { ms: 0, seq: 0 };

    fn parse(raw: &str) -> Option<Self> {
        match raw.split_once('-') {
            Some((ms, seq)) => Some(Self {
                ms: ms.parse().ok()?,
                seq: seq.parse().ok()?,
            }),
            None => Some(Self {
                ms: raw.parse().ok()?,
                seq: 0,
            }),
        }
    }

    fn next_after(last: EntryId, now_ms: u64) -> Self {
        if now_ms > last.ms {
            Self { ms: now_ms, seq: 0 }
        } else {
            Self {
                ms: last.ms,
                seq: last.seq + 1,
            }
        }
    }
}

impl Ord for EntryId {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.ms, self.seq).cmp(&(other.ms, other.seq))
    }
}

impl PartialOrd for EntryId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.ms, self.seq)
    }
}

#[derive(Debug)]
struct PendingEntry {
    consumer: String,
    deliveries: u64,
}

#[derive(Debug, Default)]
struct GroupState {
    /// Index into `StreamState::entries` of the next never-delivered entry.
    cursor: usize,
    pending: BTreeMap<EntryId, PendingEntry>,
}

#[derive(Debug)]
struct StreamState {
    entries: Vec<(EntryId, HashMap<String, String>)>,
    last_id: EntryId,
    groups: HashMap<String, GroupState>,
}

impl StreamState {
    fn new() -> Self {
        Self {
            entries: Vec::new(),
            last_id: EntryId::ZERO,
            groups: HashMap::new(),
        }
    }
}

/// In-memory stream log with consumer groups.
///
/// Intended for tests/dev. Entries are never trimmed.
#[derive(Debug, Default)]
pub struct InMemoryStreamLog {
    streams: Mutex<HashMap<String, StreamState>>,
    appended: Notify,
}

impl InMemoryStreamLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// How many times an entry has been delivered to its group, if it is pending.
    pub fn delivery_count(&self, stream: &str, group: &str, id: &str) -> Option<u64> {
        let id = EntryId::parse(id)?;
        let streams = self.streams.lock().ok()?;
        streams
            .get(stream)?
            .groups
            .get(group)?
            .pending
            .get(&id)
            .map(|p| p.deliveries)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, StreamState>>, LogError> {
        self.streams
            .lock()
            .map_err(|_| LogError::Connection("lock poisoned".to_string()))
    }

    fn try_read(&self, read: &GroupRead<'_>) -> Result<Vec<LogEntry>, LogError> {
        let no_group = || LogError::NoGroup {
            stream: read.stream.to_string(),
            group: read.group.to_string(),
        };

        let mut streams = self.lock()?;
        let state = streams.get_mut(read.stream).ok_or_else(no_group)?;
        let StreamState {
            entries, groups, ..
        } = state;
        let group = groups.get_mut(read.group).ok_or_else(no_group)?;

        let mut out = Vec::new();
        match &read.from {
            ReadFrom::New => {
                while out.len() < read.count && group.cursor < entries.len() {
                    let (id, fields) = &entries[group.cursor];
                    group.cursor += 1;
                    group.pending.insert(
                        *id,
                        PendingEntry {
                            consumer: read.consumer.to_string(),
                            deliveries: 1,
                        },
                    );
                    out.push(LogEntry {
                        id: id.to_string(),
                        fields: fields.clone(),
                    });
                }
            }
            ReadFrom::Pending { after } => {
                let after = EntryId::parse(after)
                    .ok_or_else(|| LogError::Command(format!("invalid entry id {after}")))?;
                let own = group
                    .pending
                    .range_mut(after..)
                    .filter(|(id, p)| **id > after && p.consumer == read.consumer)
                    .take(read.count);

                for (id, p) in own {
                    p.deliveries += 1;
                    let fields = entries
                        .binary_search_by(|(e, _)| e.cmp(id))
                        .map(|i| entries[i].1.clone())
                        .unwrap_or_default();
                    out.push(LogEntry {
                        id: id.to_string(),
                        fields,
                    });
                }
            }
        }

        Ok(out)
    }
}

#[async_trait]
impl StreamLog for InMemoryStreamLog {
    async fn append(&self, stream: &str, fields: &[(&str, String)]) -> Result<String, LogError> {
        let id = {
            let mut streams = self.lock()?;
            let state = streams
                .entry(stream.to_string())
                .or_insert_with(StreamState::new);

            let now_ms = u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0);
            let id = EntryId::next_after(state.last_id, now_ms);
            state.last_id = id;
            state.entries.push((
                id,
                fields
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.clone()))
                    .collect(),
            ));
            id
        };

        self.appended.notify_waiters();
        Ok(id.to_string())
    }

    async fn create_group(&self, stream: &str, group: &str) -> Result<(), LogError> {
        let mut streams = self.lock()?;
        let state = streams
            .entry(stream.to_string())
            .or_insert_with(StreamState::new);

        if state.groups.contains_key(group) {
            return Err(LogError::GroupExists {
                stream: stream.to_string(),
                group: group.to_string(),
            });
        }
        state.groups.insert(group.to_string(), GroupState::default());
        Ok(())
    }

    async fn read_group(&self, read: &GroupRead<'_>) -> Result<Vec<LogEntry>, LogError> {
        let deadline = match (&read.from, read.block) {
            (ReadFrom::New, Some(block)) => Some(Instant::now() + block),
            _ => None,
        };

        loop {
            let notified = self.appended.notified();
            tokio::pin!(notified);
            // Register before checking so an append between the check and the
            // wait is not missed.
            notified.as_mut().enable();

            let entries = self.try_read(read)?;
            let Some(deadline) = deadline else {
                return Ok(entries);
            };
            if !entries.is_empty() {
                return Ok(entries);
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.try_read(read);
            }
        }
    }

    async fn ack(&self, stream: &str, group: &str, ids: &[String]) -> Result<u64, LogError> {
        let mut streams = self.lock()?;
        let Some(group) = streams
            .get_mut(stream)
            .and_then(|s| s.groups.get_mut(group))
        else {
            return Ok(0);
        };

        let acked = ids
            .iter()
            .filter_map(|raw| EntryId::parse(raw))
            .filter(|id| group.pending.remove(id).is_some())
            .count();
        Ok(acked as u64)
    }

    async fn len(&self, stream: &str) -> Result<u64, LogError> {
        let streams = self.lock()?;
        Ok(streams.get(stream).map_or(0, |s| s.entries.len() as u64))
    }

    async fn pending_count(&self, stream: &str, group: &str) -> Result<u64, LogError> {
        let streams = self.lock()?;
        streams
            .get(stream)
            .and_then(|s| s.groups.get(group))
            .map(|g| g.pending.len() as u64)
            .ok_or_else(|| LogError::NoGroup {
                stream: stream.to_string(),
                group: group.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    fn new_read<'a>(stream: &'a str, group: &'a str, consumer: &'a str) -> GroupRead<'a> {
        GroupRead {
            stream,
            group,
            consumer,
            from: ReadFrom::New,
            count: 10,
            block: None,
        }
    }

    fn field(v: &str) -> Vec<(&'static str, String)> {
        vec![("v", v.to_string())]
    }

    #[test]
    fn entry_ids_order_numerically() {
        let a = EntryId::parse("9-5").unwrap();
        let b = EntryId::parse("10-0").unwrap();
        assert!(a < b);
        assert_eq!(EntryId::parse("7").unwrap(), EntryId { ms: 7, seq: 0 });
        assert!(EntryId::parse("x-1").is_none());

        let same_ms = EntryId::next_after(b, 10);
        assert_eq!(same_ms.to_string(), "10-1");
        let clock_behind = EntryId::next_after(b, 3);
        assert_eq!(clock_behind.to_string(), "10-1");
    }

    #[tokio::test]
    async fn append_assigns_increasing_ids() {
        let log = InMemoryStreamLog::new();
        let a = log.append("s", &field("a")).await.unwrap();
        let b = log.append("s", &field("b")).await.unwrap();

        assert!(EntryId::parse(&a).unwrap() < EntryId::parse(&b).unwrap());
        assert_eq!(log.len("s").await.unwrap(), 2);
        assert_eq!(log.len("missing").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn group_starts_at_the_beginning_and_rejects_duplicates() {
        let log = InMemoryStreamLog::new();
        log.append("s", &field("early")).await.unwrap();
        log.create_group("s", "g").await.unwrap();

        let err = log.create_group("s", "g").await.unwrap_err();
        assert!(matches!(err, LogError::GroupExists { .. }));

        let got = log.read_group(&new_read("s", "g", "c1")).await.unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].fields["v"], "early");
    }

    #[tokio::test]
    async fn groups_are_independent_cursors() {
        let log = InMemoryStreamLog::new();
        log.create_group("s", "a").await.unwrap();
        log.create_group("s", "b").await.unwrap();
        log.append("s", &field("1")).await.unwrap();

        assert_eq!(log.read_group(&new_read("s", "a", "c")).await.unwrap().len(), 1);
        assert_eq!(log.read_group(&new_read("s", "a", "c")).await.unwrap().len(), 0);
        assert_eq!(log.read_group(&new_read("s", "b", "c")).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unacked_entries_stay_pending_for_their_consumer() {
        let log = InMemoryStreamLog::new();
        log.create_group("s", "g").await.unwrap();
        let id = log.append("s", &field("1")).await.unwrap();
        log.read_group(&new_read("s", "g", "c1")).await.unwrap();

        assert_eq!(log.pending_count("s", "g").await.unwrap(), 1);

        let mut other = new_read("s", "g", "c2");
        other.from = ReadFrom::pending_from_start();
        assert!(log.read_group(&other).await.unwrap().is_empty());

        let mut own = new_read("s", "g", "c1");
        own.from = ReadFrom::pending_from_start();
        let again = log.read_group(&own).await.unwrap();
        assert_eq!(again.len(), 1);
        assert_eq!(again[0].id, id);
        assert_eq!(log.delivery_count("s", "g", &id), Some(2));

        assert_eq!(log.ack("s", "g", &[id.clone()]).await.unwrap(), 1);
        assert_eq!(log.ack("s", "g", &[id]).await.unwrap(), 0);
        assert_eq!(log.pending_count("s", "g").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn reading_an_unknown_group_fails() {
        let log = InMemoryStreamLog::new();
        log.append("s", &field("1")).await.unwrap();
        let err = log.read_group(&new_read("s", "nope", "c")).await.unwrap_err();
        assert!(matches!(err, LogError::NoGroup { .. }));
        assert!(log.pending_count("s", "nope").await.is_err());
    }

    #[tokio::test]
    async fn blocking_read_wakes_on_append() {
        let log = Arc::new(InMemoryStreamLog::new());
        log.create_group("s", "g").await.unwrap();

        let reader = {
            let log = log.clone();
            tokio::spawn(async move {
                let mut read = new_read("s", "g", "c");
                read.block = Some(Duration::from_secs(5));
                log.read_group(&read).await
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        log.append("s", &field("late")).await.unwrap();

        let got = reader.await.unwrap().unwrap();
        assert_eq!(got.len(), 1);
    }

    #[tokio::test]
    async fn blocking_read_times_out_empty() {
        let log = InMemoryStreamLog::new();
        log.create_group("s", "g").await.unwrap();

        let mut read = new_read("s", "g", "c");
        read.block = Some(Duration::from_millis(20));
        assert!(log.read_group(&read).await.unwrap().is_empty());
    }
}
