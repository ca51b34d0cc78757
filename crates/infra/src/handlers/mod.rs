//! Built-in event handlers.
//!
//! | handler | event types | side effect |
//! |---|---|---|
//! | [`NotificationHandler`] | position changed, sector entered/left | hands notifications to a [`Notifier`] |
//! | [`AnalyticsHandler`] | position changed | structured analytics log line |
//! | [`RealtimeHandler`] | position changed | broadcasts a [`PositionUpdate`] |

pub mod analytics;
pub mod notification;
pub mod realtime;

pub use analytics::AnalyticsHandler;
pub use notification::{LogNotifier, Notification, NotificationHandler, Notifier, NotifyError};
pub use realtime::{PositionUpdate, RealtimeHandler};

/// Wall-clock time of day used in handler log lines.
pub(crate) fn clock(ts: chrono::DateTime<chrono::Utc>) -> String {
    ts.format("%H:%M:%S").to_string()
}
