//! Activities that produce history events.
//!
//! An [`Activity`] is what the rest of the application hands over when a
//! call ends, a conversation gets a message or a file transfer completes.
//! Calendars turn activities into events.

use serde::{Deserialize, Serialize};

use crate::directory::AccountId;
use crate::event::{Direction, EventCategory, EventStatus, Timestamp};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActivityKind {
    Call { missed: bool },
    MessageGroup,
    DataTransfer,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recording {
    pub path: String,
    pub mime: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Activity {
    pub account: AccountId,
    pub peer_uri: String,
    pub peer_name: Option<String>,
    pub start: Timestamp,
    /// `0` while the activity is still going on
    pub stop: Timestamp,
    pub direction: Direction,
    pub kind: ActivityKind,
    pub recording: Option<Recording>,
    /// Set when the activity already has an event (e.g. a call that keeps
    /// ringing), so the same event is updated instead of a new one created
    pub event_uid: Option<String>,
}

impl Activity {
    pub fn category(&self) -> EventCategory {
        match self.kind {
            ActivityKind::Call { .. } => EventCategory::Call,
            ActivityKind::MessageGroup => EventCategory::MessageGroup,
            ActivityKind::DataTransfer => EventCategory::DataTransfer,
        }
    }

    pub fn status(&self) -> EventStatus {
        match self.kind {
            ActivityKind::Call { missed: true } => EventStatus::Missed,
            _ if self.stop == 0 => EventStatus::InProcess,
            _ => EventStatus::Final,
        }
    }

    /// A recording attached as an audio file.
    pub fn recording_role(&self) -> Option<&'static str> {
        self.recording.as_ref().map(|_| "AUDIO_RECORDING")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(missed: bool, stop: Timestamp) -> Activity {
        Activity {
            account: "acc".into(),
            peer_uri: "ring:bob".into(),
            peer_name: None,
            start: 100,
            stop,
            direction: Direction::Incoming,
            kind: ActivityKind::Call { missed },
            recording: None,
            event_uid: None,
        }
    }

    #[test]
    fn test_status_and_category() {
        assert_eq!(call(true, 100).status(), EventStatus::Missed);
        assert_eq!(call(false, 0).status(), EventStatus::InProcess);
        assert_eq!(call(false, 160).status(), EventStatus::Final);
        assert_eq!(call(false, 160).category(), EventCategory::Call);
    }
}
