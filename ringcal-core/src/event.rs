//! Call-history events.
//!
//! An [`Event`] is one entry of an account's calendar: a call, a text
//! message group or a file transfer. Events are owned by their calendar and
//! addressed everywhere else through an [`EventHandle`].

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::directory::{AccountId, ContactId};
use crate::error::{CalError, CalResult};
use crate::vparser::Property;

/// Seconds since the Unix epoch. `0` means "not set".
pub type Timestamp = i64;

/// Identifies a calendar inside an `EventModel`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CalendarId(pub u32);

/// Stable identity of an event: its calendar and its slot in that calendar.
///
/// A handle stays valid for the lifetime of the calendar, including when a
/// placeholder is rebuilt with real data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventHandle {
    pub calendar: CalendarId,
    pub slot: u32,
}

/// RFC 5545 component the event is stored as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum EventType {
    #[default]
    Event,
    Todo,
    Alarm,
    Journal,
}

impl EventType {
    pub fn as_ics_str(&self) -> &'static str {
        match self {
            EventType::Event => "VEVENT",
            EventType::Todo => "VTODO",
            EventType::Alarm => "VALARM",
            EventType::Journal => "VJOURNAL",
        }
    }

    pub fn from_ics_str(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "VEVENT" => Some(EventType::Event),
            "VTODO" => Some(EventType::Todo),
            "VALARM" => Some(EventType::Alarm),
            "VJOURNAL" => Some(EventType::Journal),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum EventCategory {
    Call,
    DataTransfer,
    MessageGroup,
    #[default]
    Other,
}

impl EventCategory {
    pub const ALL: [EventCategory; 4] = [
        EventCategory::Call,
        EventCategory::DataTransfer,
        EventCategory::MessageGroup,
        EventCategory::Other,
    ];

    pub fn as_ics_str(&self) -> &'static str {
        match self {
            EventCategory::Call => "PHONE CALL",
            EventCategory::DataTransfer => "DATA TRANSFER",
            EventCategory::MessageGroup => "TEXT MESSAGES",
            EventCategory::Other => "OTHER",
        }
    }

    pub fn from_ics_str(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|category| category.as_ics_str().eq_ignore_ascii_case(name.trim()))
    }

    fn bit(&self) -> u8 {
        1 << (*self as u8)
    }
}

/// A set of categories, used to filter timelines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CategorySet(u8);

impl CategorySet {
    pub fn all() -> Self {
        EventCategory::ALL.into_iter().collect()
    }

    pub fn insert(&mut self, category: EventCategory) {
        self.0 |= category.bit();
    }

    pub fn contains(&self, category: EventCategory) -> bool {
        self.0 & category.bit() != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

impl FromIterator<EventCategory> for CategorySet {
    fn from_iter<I: IntoIterator<Item = EventCategory>>(iter: I) -> Self {
        let mut set = CategorySet::default();
        for category in iter {
            set.insert(category);
        }
        set
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum EventStatus {
    Tentative,
    InProcess,
    Cancelled,
    #[default]
    Final,
    /// Unanswered call
    Missed,
}

impl EventStatus {
    pub fn as_ics_str(&self) -> &'static str {
        match self {
            EventStatus::Tentative => "TENTATIVE",
            EventStatus::InProcess => "IN-PROCESS",
            EventStatus::Cancelled => "CANCELLED",
            EventStatus::Final => "FINAL",
            EventStatus::Missed => "X-MISSED",
        }
    }

    pub fn from_ics_str(name: &str) -> Option<Self> {
        match name.trim().to_ascii_uppercase().as_str() {
            "TENTATIVE" => Some(EventStatus::Tentative),
            "IN-PROCESS" => Some(EventStatus::InProcess),
            "CANCELLED" => Some(EventStatus::Cancelled),
            "FINAL" => Some(EventStatus::Final),
            "X-MISSED" => Some(EventStatus::Missed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Direction {
    #[default]
    Incoming,
    Outgoing,
}

impl Direction {
    pub fn as_ics_str(&self) -> &'static str {
        match self {
            Direction::Incoming => "INCOMING",
            Direction::Outgoing => "OUTGOING",
        }
    }

    pub fn from_ics_str(name: &str) -> Option<Self> {
        match name.trim().to_ascii_uppercase().as_str() {
            "INCOMING" => Some(Direction::Incoming),
            "OUTGOING" => Some(Direction::Outgoing),
            _ => None,
        }
    }
}

/// Persistence lifecycle of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyncState {
    /// Created locally, never written
    New,
    /// Created from an external source (legacy history, remote peer), never written
    Imported,
    /// Referenced by UID before its data was seen
    Placeholder,
    /// Matches the backing file
    Saved,
    Modified,
    Rescheduled,
    /// Updated from a remote copy since the last write
    Synchronized,
    /// Deleted after being written; a tombstone is still due
    Discarded,
    /// Deleted before ever being written
    Cancelled,
    Error,
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncState::New => "new",
            SyncState::Imported => "imported",
            SyncState::Placeholder => "placeholder",
            SyncState::Saved => "saved",
            SyncState::Modified => "modified",
            SyncState::Rescheduled => "rescheduled",
            SyncState::Synchronized => "synchronized",
            SyncState::Discarded => "discarded",
            SyncState::Cancelled => "cancelled",
            SyncState::Error => "error",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EditAction {
    Modify,
    Reschedule,
    Synchronize,
    Save,
    Delete,
    /// Fill a placeholder with data read from a file
    ResolveSaved,
    /// Fill a placeholder with data from an external source
    ResolveImported,
}

impl fmt::Display for EditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EditAction::Modify => "modify",
            EditAction::Reschedule => "reschedule",
            EditAction::Synchronize => "synchronize",
            EditAction::Save => "save",
            EditAction::Delete => "delete",
            EditAction::ResolveSaved => "resolve",
            EditAction::ResolveImported => "resolve",
        };
        f.write_str(name)
    }
}

use SyncState as St;

// Columns: Modify, Reschedule, Synchronize, Save, Delete, ResolveSaved, ResolveImported
const SYNC_TABLE: [[SyncState; 7]; 10] = [
    /* New          */ [St::New, St::New, St::Error, St::Saved, St::Cancelled, St::Error, St::Error],
    /* Imported     */ [St::Modified, St::Rescheduled, St::Imported, St::Saved, St::Cancelled, St::Error, St::Error],
    /* Placeholder  */ [St::Error, St::Error, St::Error, St::Error, St::Error, St::Saved, St::Imported],
    /* Saved        */ [St::Modified, St::Rescheduled, St::Synchronized, St::Saved, St::Discarded, St::Error, St::Error],
    /* Modified     */ [St::Modified, St::Rescheduled, St::Modified, St::Saved, St::Discarded, St::Error, St::Error],
    /* Rescheduled  */ [St::Rescheduled, St::Rescheduled, St::Rescheduled, St::Saved, St::Discarded, St::Error, St::Error],
    /* Synchronized */ [St::Modified, St::Rescheduled, St::Synchronized, St::Saved, St::Discarded, St::Error, St::Error],
    /* Discarded    */ [St::Error, St::Error, St::Error, St::Discarded, St::Discarded, St::Error, St::Error],
    /* Cancelled    */ [St::Error, St::Error, St::Error, St::Error, St::Cancelled, St::Error, St::Error],
    /* Error        */ [St::Error, St::Error, St::Error, St::Error, St::Error, St::Error, St::Error],
];

/// Next sync state for `action`, `Error` if the action is not allowed.
pub fn next_sync_state(state: SyncState, action: EditAction) -> SyncState {
    SYNC_TABLE[state as usize][action as usize]
}

/// A participant of an event, other than the owning account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attendee {
    pub contact: ContactId,
    /// URI as written in the file (`ring:...`, `sip:...`)
    pub uri: String,
    /// Display name (CN)
    pub name: String,
    /// Identity of the person behind the URI, when known
    pub person_uid: Option<String>,
}

/// A file referenced by an event (recording, transcript, transferred file).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub uri: String,
    /// FMTTYPE, e.g. `audio/x-wav`
    pub mime: Option<String>,
    /// X_RING_ROLE, e.g. `AUDIO_RECORDING`
    pub role: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    uid: String,
    kind: EventType,
    start: Timestamp,
    stop: Timestamp,
    /// DTSTAMP of the last persisted change
    revision: Timestamp,
    revision_count: u32,
    category: EventCategory,
    status: EventStatus,
    direction: Direction,
    account: AccountId,
    attendees: Vec<Attendee>,
    attachments: Vec<Attachment>,
    /// Properties this crate does not interpret, written back untouched
    custom_properties: Vec<Property>,
    sync_state: SyncState,
}

/// Everything needed to build an [`Event`].
#[derive(Debug, Clone, Default)]
pub struct EventData {
    pub uid: String,
    pub kind: EventType,
    pub start: Timestamp,
    pub stop: Timestamp,
    pub revision: Timestamp,
    pub revision_count: u32,
    pub category: EventCategory,
    pub status: EventStatus,
    pub direction: Direction,
    pub attendees: Vec<Attendee>,
    pub attachments: Vec<Attachment>,
    pub custom_properties: Vec<Property>,
}

impl Event {
    /// Build an event owned by `account`. A missing UID is generated.
    pub fn new(account: AccountId, data: EventData, sync_state: SyncState) -> Self {
        let mut event = Event {
            uid: data.uid,
            kind: data.kind,
            start: data.start,
            stop: data.stop.max(data.start),
            revision: data.revision,
            revision_count: data.revision_count,
            category: data.category,
            status: data.status,
            direction: data.direction,
            account,
            attendees: Vec::new(),
            attachments: Vec::new(),
            custom_properties: data.custom_properties,
            sync_state,
        };
        for attendee in data.attendees {
            event.add_attendee(attendee);
        }
        for attachment in data.attachments {
            event.attach(attachment);
        }
        if event.uid.is_empty() {
            event.uid = event.generate_uid();
        }
        event
    }

    /// An event only known by its UID.
    pub fn placeholder(account: AccountId, uid: impl Into<String>) -> Self {
        Event {
            uid: uid.into(),
            kind: EventType::Event,
            start: 0,
            stop: 0,
            revision: 0,
            revision_count: 0,
            category: EventCategory::Other,
            status: EventStatus::Tentative,
            direction: Direction::Incoming,
            account,
            attendees: Vec::new(),
            attachments: Vec::new(),
            custom_properties: Vec::new(),
            sync_state: SyncState::Placeholder,
        }
    }

    /// Fill a placeholder with real data, keeping its identity.
    pub fn resolve(&mut self, data: EventData, action: EditAction) -> CalResult<()> {
        let state = self.apply(action)?;
        let account = self.account.clone();
        let uid = std::mem::take(&mut self.uid);
        *self = Event::new(account, EventData { uid, ..data }, state);
        Ok(())
    }

    fn generate_uid(&self) -> String {
        let seed = uuid::Uuid::new_v4().simple().to_string().to_ascii_uppercase();
        format!(
            "{}-{}-{}@{}.ring.cx",
            self.start,
            self.stop - self.start,
            &seed[..8],
            self.account
        )
    }

    pub fn uid(&self) -> &str {
        &self.uid
    }

    pub fn kind(&self) -> EventType {
        self.kind
    }

    pub fn start(&self) -> Timestamp {
        self.start
    }

    pub fn stop(&self) -> Timestamp {
        self.stop
    }

    pub fn revision(&self) -> Timestamp {
        self.revision
    }

    pub fn revision_count(&self) -> u32 {
        self.revision_count
    }

    pub fn category(&self) -> EventCategory {
        self.category
    }

    pub fn status(&self) -> EventStatus {
        self.status
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn account(&self) -> &AccountId {
        &self.account
    }

    pub fn attendees(&self) -> &[Attendee] {
        &self.attendees
    }

    pub fn attachments(&self) -> &[Attachment] {
        &self.attachments
    }

    pub fn custom_properties(&self) -> &[Property] {
        &self.custom_properties
    }

    pub fn sync_state(&self) -> SyncState {
        self.sync_state
    }

    /// Run `action` through the sync table.
    ///
    /// An illegal action moves the event to [`SyncState::Error`].
    pub fn apply(&mut self, action: EditAction) -> CalResult<SyncState> {
        let state = self.sync_state;
        let next = next_sync_state(state, action);
        self.sync_state = next;
        if next == SyncState::Error {
            return Err(CalError::IllegalTransition { state, action });
        }
        Ok(next)
    }

    /// Whether the backing file holds the latest version of this event.
    pub fn is_saved(&self) -> bool {
        self.sync_state == SyncState::Saved
    }

    /// Whether the event is gone for good (deleted, or deleted and tombstoned).
    pub fn is_deleted(&self) -> bool {
        matches!(
            self.sync_state,
            SyncState::Discarded | SyncState::Cancelled
        )
    }

    /// Set the start time. Only possible while it is unset.
    pub fn set_start(&mut self, start: Timestamp) -> bool {
        if self.start != 0 || start == 0 {
            return false;
        }
        self.start = start;
        self.stop = self.stop.max(start);
        true
    }

    /// Move the stop time forward. Earlier values are ignored.
    pub fn extend_stop(&mut self, stop: Timestamp) -> bool {
        if stop <= self.stop {
            return false;
        }
        self.stop = stop;
        true
    }

    /// Record a new persisted revision.
    pub fn bump_revision(&mut self, revision: Timestamp) {
        if revision > self.revision {
            self.revision = revision;
        }
        self.revision_count += 1;
    }

    /// Keep the newer of the stored revision and one read elsewhere.
    pub fn merge_revision(&mut self, revision: Timestamp, revision_count: u32) {
        self.revision = self.revision.max(revision);
        self.revision_count = self.revision_count.max(revision_count);
    }

    pub fn set_status(&mut self, status: EventStatus) -> bool {
        let changed = self.status != status;
        self.status = status;
        changed
    }

    pub fn has_attendee(&self, contact: ContactId) -> bool {
        self.attendees.iter().any(|a| a.contact == contact)
    }

    /// Add an attendee unless the same contact is already listed.
    pub fn add_attendee(&mut self, attendee: Attendee) -> bool {
        if self.has_attendee(attendee.contact) {
            return false;
        }
        self.attendees.push(attendee);
        true
    }

    /// Point attendees of `from` at `into` (two contacts found to be the
    /// same person). Returns whether any attendee changed.
    pub fn relabel_contact(&mut self, from: ContactId, into: ContactId) -> bool {
        let mut changed = false;
        for attendee in self.attendees.iter_mut().filter(|a| a.contact == from) {
            attendee.contact = into;
            changed = true;
        }
        changed
    }

    pub fn has_attachment(&self, uri: &str) -> bool {
        self.attachments.iter().any(|a| a.uri == uri)
    }

    pub fn attach(&mut self, attachment: Attachment) -> bool {
        if self.has_attachment(&attachment.uri) {
            return false;
        }
        self.attachments.push(attachment);
        true
    }

    pub fn detach(&mut self, uri: &str) -> bool {
        let before = self.attachments.len();
        self.attachments.retain(|a| a.uri != uri);
        self.attachments.len() != before
    }

    /// Human readable duration: `mm:ss`, or `h:mm:ss` past one hour.
    /// Empty when the event has no duration.
    pub fn length(&self) -> String {
        let seconds = self.stop - self.start;
        if seconds <= 0 {
            return String::new();
        }
        let seconds = seconds % (3600 * 24);
        let (hours, minutes, secs) = (seconds / 3600, (seconds % 3600) / 60, seconds % 60);
        if hours > 0 {
            format!("{hours}:{minutes:02}:{secs:02}")
        } else {
            format!("{minutes:02}:{secs:02}")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account() -> AccountId {
        AccountId::from("acc1")
    }

    fn call(start: Timestamp, stop: Timestamp) -> Event {
        Event::new(
            account(),
            EventData {
                start,
                stop,
                category: EventCategory::Call,
                ..Default::default()
            },
            SyncState::New,
        )
    }

    fn attendee(contact: u64, uri: &str) -> Attendee {
        Attendee {
            contact: ContactId(contact),
            uri: uri.to_string(),
            name: String::new(),
            person_uid: None,
        }
    }

    #[test]
    fn test_generated_uid_shape() {
        let event = call(1000, 1042);
        let uid = event.uid();
        assert!(uid.starts_with("1000-42-"), "{uid}");
        assert!(uid.ends_with("@acc1.ring.cx"), "{uid}");
        let seed = uid.split('-').nth(2).unwrap().split('@').next().unwrap();
        assert_eq!(seed.len(), 8);
        assert!(seed.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_stop_never_before_start() {
        let event = call(1000, 10);
        assert_eq!(event.stop(), 1000);
    }

    #[test]
    fn test_start_is_immutable_once_set() {
        let mut event = call(1000, 2000);
        assert!(!event.set_start(500));
        assert_eq!(event.start(), 1000);

        let mut placeholder = Event::placeholder(account(), "x");
        assert!(placeholder.set_start(500));
        assert_eq!(placeholder.start(), 500);
    }

    #[test]
    fn test_stop_only_extends() {
        let mut event = call(1000, 2000);
        assert!(!event.extend_stop(1500));
        assert_eq!(event.stop(), 2000);
        assert!(event.extend_stop(2500));
        assert_eq!(event.stop(), 2500);
    }

    #[test]
    fn test_sync_table_normal_lifecycle() {
        let mut event = call(1, 2);
        assert_eq!(event.apply(EditAction::Save).unwrap(), SyncState::Saved);
        assert!(event.is_saved());
        assert_eq!(event.apply(EditAction::Reschedule).unwrap(), SyncState::Rescheduled);
        assert!(!event.is_saved());
        assert_eq!(event.apply(EditAction::Synchronize).unwrap(), SyncState::Rescheduled);
        assert_eq!(event.apply(EditAction::Save).unwrap(), SyncState::Saved);
        assert_eq!(event.apply(EditAction::Delete).unwrap(), SyncState::Discarded);
        assert_eq!(event.apply(EditAction::Save).unwrap(), SyncState::Discarded);
    }

    #[test]
    fn test_synchronized_event_is_not_saved() {
        let mut event = call(1, 2);
        event.apply(EditAction::Save).unwrap();
        assert_eq!(event.apply(EditAction::Synchronize).unwrap(), SyncState::Synchronized);
        assert!(!event.is_saved());
        event.apply(EditAction::Save).unwrap();
        assert!(event.is_saved());
    }

    #[test]
    fn test_relabel_contact() {
        let mut event = call(1, 2);
        event.add_attendee(attendee(1, "ring:bob"));
        event.add_attendee(attendee(2, "sip:bob@example.com"));
        assert!(event.relabel_contact(ContactId(2), ContactId(1)));
        assert!(!event.has_attendee(ContactId(2)));
        assert_eq!(event.attendees()[1].uri, "sip:bob@example.com");
        assert!(!event.relabel_contact(ContactId(2), ContactId(1)));
    }

    #[test]
    fn test_delete_before_save_cancels() {
        let mut event = call(1, 2);
        assert_eq!(event.apply(EditAction::Delete).unwrap(), SyncState::Cancelled);
        assert!(event.is_deleted());
    }

    #[test]
    fn test_illegal_transition_is_absorbing() {
        let mut event = call(1, 2);
        event.apply(EditAction::Delete).unwrap();
        let err = event.apply(EditAction::Synchronize).unwrap_err();
        assert!(matches!(
            err,
            CalError::IllegalTransition {
                state: SyncState::Cancelled,
                action: EditAction::Synchronize
            }
        ));
        assert_eq!(event.sync_state(), SyncState::Error);
        assert!(event.apply(EditAction::Save).is_err());
        assert_eq!(event.sync_state(), SyncState::Error);
    }

    #[test]
    fn test_placeholder_only_accepts_resolution() {
        for action in [
            EditAction::Modify,
            EditAction::Reschedule,
            EditAction::Synchronize,
            EditAction::Save,
            EditAction::Delete,
        ] {
            assert_eq!(
                next_sync_state(SyncState::Placeholder, action),
                SyncState::Error
            );
        }
        assert_eq!(
            next_sync_state(SyncState::Placeholder, EditAction::ResolveSaved),
            SyncState::Saved
        );
        assert_eq!(
            next_sync_state(SyncState::Placeholder, EditAction::ResolveImported),
            SyncState::Imported
        );
    }

    #[test]
    fn test_resolve_keeps_uid_and_account() {
        let mut event = Event::placeholder(account(), "abc@acc1.ring.cx");
        event
            .resolve(
                EventData {
                    uid: "ignored".into(),
                    start: 10,
                    stop: 20,
                    ..Default::default()
                },
                EditAction::ResolveSaved,
            )
            .unwrap();
        assert_eq!(event.uid(), "abc@acc1.ring.cx");
        assert_eq!(event.sync_state(), SyncState::Saved);
        assert_eq!(event.start(), 10);
        assert_eq!(event.account(), &account());
    }

    #[test]
    fn test_attendees_are_deduplicated() {
        let mut event = call(1, 2);
        assert!(event.add_attendee(attendee(1, "ring:a")));
        assert!(!event.add_attendee(attendee(1, "ring:a")));
        assert!(event.add_attendee(attendee(2, "ring:b")));
        assert_eq!(event.attendees().len(), 2);
        assert!(event.has_attendee(ContactId(2)));
    }

    #[test]
    fn test_attach_and_detach() {
        let mut event = call(1, 2);
        let file = Attachment {
            uri: "/tmp/rec.wav".into(),
            mime: Some("audio/x-wav".into()),
            role: None,
        };
        assert!(event.attach(file.clone()));
        assert!(!event.attach(file));
        assert!(event.has_attachment("/tmp/rec.wav"));
        assert!(event.detach("/tmp/rec.wav"));
        assert!(!event.detach("/tmp/rec.wav"));
    }

    #[test]
    fn test_length_format() {
        assert_eq!(call(0, 0).length(), "");
        assert_eq!(call(100, 165).length(), "01:05");
        assert_eq!(call(100, 100 + 3723).length(), "1:02:03");
    }

    #[test]
    fn test_category_names_round_trip() {
        for category in EventCategory::ALL {
            assert_eq!(
                EventCategory::from_ics_str(category.as_ics_str()),
                Some(category)
            );
        }
        assert_eq!(
            EventCategory::from_ics_str("phone call"),
            Some(EventCategory::Call)
        );
        let set: CategorySet = [EventCategory::Call].into_iter().collect();
        assert!(set.contains(EventCategory::Call));
        assert!(!set.contains(EventCategory::Other));
    }
}
