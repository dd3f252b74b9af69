//! ICS file generation and parsing.
//!
//! Reading goes through the `vparser` state machines and the adapters in
//! [`adapter`]; writing mirrors the same vocabulary.

pub mod adapter;
mod generate;
mod parse;
pub mod record;
mod value;

pub use adapter::{IcsAdapters, StagedObject, VObjectAdapter};
pub use generate::{
    CALENDAR_FOOTER, PRODID, calendar_header, generate_calendar, generate_event,
    generate_tombstone,
};
pub use parse::{ParseOptions, ParsedCalendar, parse_calendar};
pub use record::{AttachmentRecord, AttendeeRecord, CalendarRecord, EventRecord, OrganizerRecord};
pub use value::{escape_text, format_timestamp, parse_timestamp, unescape_text};
