//! Core of ringcal, a call-history store built on iCalendar files.
//!
//! This crate provides:
//! - `vparser`, a streaming parser for RFC 5545 style text, driven by state tables
//! - `ics`, the mapping between parsed objects and event records, and the writer
//! - `Event` and its sync-state machine
//! - `Calendar`, one append-only `.ics` file per account, and `EventModel` tying
//!   the calendars to per-contact timelines

pub mod activity;
pub mod calendar;
pub mod config;
pub mod directory;
pub mod error;
pub mod event;
pub mod ics;
pub mod model;
pub mod timeline;
pub mod vparser;
pub mod warnings;

pub use activity::{Activity, ActivityKind, Recording};
pub use calendar::{
    Calendar, CalendarContext, CalendarSignal, EventChange, FlushOutcome, GcCounters,
    LoadReport, MergeOutcome, Origin,
};
pub use config::RingcalConfig;
pub use directory::{
    Account, AccountId, AccountRegistry, AttachmentStore, Collaborators, ContactDirectory,
    ContactId, MemoryDirectory,
};
pub use error::{CalError, CalResult};
pub use model::{EventModel, ImportReport};

// Re-export all event types at crate root for convenience
pub use event::*;
