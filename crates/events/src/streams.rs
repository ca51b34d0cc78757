//! Well-known stream, consumer group and worker names.

/// Stream that receives every position change.
pub const POSITION_EVENTS: &str = "geolocation:position-events";

/// Stream for sector enter/leave events.
pub const SECTOR_EVENTS: &str = "geolocation:sector-events";

pub const PROXIMITY_EVENTS: &str = "geolocation:proximity-events";

pub const WELL_KNOWN_STREAMS: [&str; 3] = [POSITION_EVENTS, SECTOR_EVENTS, PROXIMITY_EVENTS];

pub const GROUP_NOTIFICATIONS: &str = "notifications";
pub const GROUP_ANALYTICS: &str = "analytics";
pub const GROUP_REALTIME: &str = "realtime";

/// Consumer groups pre-created on every well-known stream.
pub const WELL_KNOWN_GROUPS: [&str; 3] = [GROUP_NOTIFICATIONS, GROUP_ANALYTICS, GROUP_REALTIME];

pub const NOTIFICATION_WORKER: &str = "notification-worker-1";
pub const ANALYTICS_WORKER: &str = "analytics-worker-1";
pub const REALTIME_WORKER: &str = "realtime-worker-1";
