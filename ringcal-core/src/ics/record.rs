//! Staging records filled by the adapters while an object is being parsed.
//!
//! Records are plain data: nothing in here knows about contacts, accounts or
//! calendars. They become events (or updates to existing events) only when
//! the calendar commits them.

use crate::event::{Direction, EventCategory, EventStatus, EventType, Timestamp};
use crate::vparser::Property;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrganizerRecord {
    pub uri: String,
    pub cn: Option<String>,
    /// X_RING_ACCOUNTID
    pub account_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttendeeRecord {
    pub uri: String,
    pub cn: Option<String>,
    /// UID parameter: identity of the person behind the URI
    pub person_uid: Option<String>,
    /// X_RING_ACCOUNTID parameter: the account the URI was seen from
    pub account_hint: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttachmentRecord {
    pub uri: String,
    /// FMTTYPE
    pub mime: Option<String>,
    /// X_RING_ROLE
    pub role: Option<String>,
}

/// One VEVENT, VTODO, VJOURNAL or VALARM.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventRecord {
    pub kind: EventType,
    pub uid: String,
    pub start: Timestamp,
    pub stop: Timestamp,
    /// DTSTAMP
    pub revision: Timestamp,
    /// SEQUENCE
    pub revision_count: u32,
    pub category: Option<EventCategory>,
    pub status: Option<EventStatus>,
    pub direction: Option<Direction>,
    pub organizer: Option<OrganizerRecord>,
    pub attendees: Vec<AttendeeRecord>,
    pub attachments: Vec<AttachmentRecord>,
    /// The event was deleted (X_RING_DELETED)
    pub tombstone: bool,
    /// Properties without a handler, kept verbatim
    pub extra: Vec<Property>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CalendarRecord {
    pub version: Option<String>,
    pub prodid: Option<String>,
    pub events: Vec<EventRecord>,
}
