//! One running `(stream, group, consumer)` subscription.

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use geotrack_events::Event;

/// Which stream, which consumer group, and which named consumer inside it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionKey {
    pub stream: String,
    pub group: String,
    pub consumer: String,
}

impl SubscriptionKey {
    pub fn new(
        stream: impl Into<String>,
        group: impl Into<String>,
        consumer: impl Into<String>,
    ) -> Self {
        Self {
            stream: stream.into(),
            group: group.into(),
            consumer: consumer.into(),
        }
    }
}

impl fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.stream, self.group, self.consumer)
    }
}

/// Stream ids handed to the processing side and not yet finished.
///
/// Redelivery scans skip these so an entry that is merely queued is not
/// delivered twice.
#[derive(Debug, Default)]
pub(crate) struct InFlight {
    ids: Mutex<HashSet<String>>,
}

impl InFlight {
    pub(crate) fn insert(&self, id: &str) {
        if let Ok(mut ids) = self.ids.lock() {
            ids.insert(id.to_string());
        }
    }

    pub(crate) fn remove(&self, id: &str) {
        if let Ok(mut ids) = self.ids.lock() {
            ids.remove(id);
        }
    }

    pub(crate) fn contains(&self, id: &str) -> bool {
        self.ids.lock().map(|ids| ids.contains(id)).unwrap_or(false)
    }
}

/// Handle to a running read loop and the receiving end of its events.
///
/// The read loop owns the sending half: it closes the channel when it exits,
/// which happens only on cancellation. Dropping a `Subscription` cancels it
/// but does not wait; use [`Subscription::close`] to wait for the read loop.
#[derive(Debug)]
pub struct Subscription {
    key: SubscriptionKey,
    events: mpsc::Receiver<Event>,
    cancel: CancellationToken,
    reader: Option<JoinHandle<()>>,
    pub(crate) in_flight: Arc<InFlight>,
}

impl Subscription {
    pub(crate) fn new(
        key: SubscriptionKey,
        events: mpsc::Receiver<Event>,
        cancel: CancellationToken,
        reader: JoinHandle<()>,
        in_flight: Arc<InFlight>,
    ) -> Self {
        Self {
            key,
            events,
            cancel,
            reader: Some(reader),
            in_flight,
        }
    }

    pub fn key(&self) -> &SubscriptionKey {
        &self.key
    }

    /// Next decoded event; `None` once the read loop has stopped and the
    /// buffer is drained.
    pub async fn recv(&mut self) -> Option<Event> {
        self.events.recv().await
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Cancel the read loop and wait for it to exit.
    pub async fn close(mut self) {
        self.cancel.cancel();
        self.join_reader().await;
    }

    /// Wait for the read loop to exit (after cancellation).
    pub(crate) async fn join_reader(&mut self) {
        if let Some(reader) = self.reader.take() {
            if let Err(err) = reader.await {
                warn!(subscription = %self.key, error = %err, "stream reader task failed");
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
