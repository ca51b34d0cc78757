//! Position events and the mechanics to move them through an append-only log.
//!
//! This crate is I/O free: it defines the envelope, the typed payloads, the
//! wire record layout and the handler contract. Log backends, publishing and
//! consuming live in `geotrack-infra`.

pub mod envelope;
pub mod event;
pub mod handler;
pub mod payload;
pub mod registry;
pub mod streams;
pub mod wire;

pub use envelope::{EnvelopeError, Event, EventMetadata, SectorTransition};
pub use event::{EventType, UnknownEventType};
pub use handler::{EventHandler, HandlerError};
pub use payload::{EventData, PositionChangedData, ProximityData, SectorChangedData};
pub use registry::HandlerRegistry;
pub use wire::WireError;
