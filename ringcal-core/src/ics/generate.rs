//! Calendar file generation.
//!
//! Mirrors the adapters: every property written here is read back by a
//! handler in `adapter.rs`.

use super::value::{escape_text, format_timestamp};
use crate::directory::Account;
use crate::event::{Event, Timestamp};
use crate::vparser::Property;

pub const PRODID: &str = "-//Ring//ringcal//EN";

/// Last line of every calendar file.
pub const CALENDAR_FOOTER: &str = "END:VCALENDAR\r\n";

/// Maximum line length in octets, line terminator excluded.
const FOLD_WIDTH: usize = 75;

/// Builds one content line.
struct ContentLine {
    text: String,
}

impl ContentLine {
    fn new(name: &str) -> Self {
        ContentLine {
            text: name.to_string(),
        }
    }

    fn param(mut self, name: &str, value: &str) -> Self {
        self.text.push(';');
        self.text.push_str(name);
        self.text.push('=');
        self.text.push_str(&param_value(value, false));
        self
    }

    /// A parameter that is always written between quotes (display names,
    /// roles).
    fn quoted_param(mut self, name: &str, value: &str) -> Self {
        self.text.push(';');
        self.text.push_str(name);
        self.text.push('=');
        self.text.push_str(&param_value(value, true));
        self
    }

    /// Finish the line. A raw line break in `value` (URIs, paths) would
    /// start a new property, so it is written as a space.
    fn write(mut self, value: &str, out: &mut String) {
        self.text.push(':');
        self.text.push_str(&value.replace(['\r', '\n'], " "));
        push_folded(out, &self.text);
    }
}

fn param_value(value: &str, always_quote: bool) -> String {
    let value = value.replace(['\r', '\n'], " ");
    let needs_quotes =
        always_quote || value.contains([':', ';', ',', '"', '\\']);
    if !needs_quotes {
        return value;
    }
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for c in value.chars() {
        if c == '"' || c == '\\' {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}

/// Append `line` followed by CRLF, folded at [`FOLD_WIDTH`] octets without
/// splitting UTF-8 sequences. Continuation lines start with one space.
fn push_folded(out: &mut String, line: &str) {
    let mut rest = line;
    let mut width = FOLD_WIDTH;
    while rest.len() > width {
        let mut cut = width;
        while !rest.is_char_boundary(cut) {
            cut -= 1;
        }
        out.push_str(&rest[..cut]);
        out.push_str("\r\n ");
        rest = &rest[cut..];
        width = FOLD_WIDTH - 1;
    }
    out.push_str(rest);
    out.push_str("\r\n");
}

pub fn calendar_header() -> String {
    let mut out = String::new();
    push_folded(&mut out, "BEGIN:VCALENDAR");
    push_folded(&mut out, "VERSION:2.0");
    push_folded(&mut out, &format!("PRODID:{PRODID}"));
    out
}

/// Serialize one event. `organizer` is the owning account, when known.
pub fn generate_event(event: &Event, organizer: Option<&Account>) -> String {
    let mut out = String::new();
    let kind = event.kind().as_ics_str();

    ContentLine::new("BEGIN").write(kind, &mut out);
    ContentLine::new("UID").write(&escape_text(event.uid()), &mut out);
    ContentLine::new("DTSTAMP").write(&format_timestamp(event.revision()), &mut out);
    ContentLine::new("DTSTART").write(&format_timestamp(event.start()), &mut out);
    ContentLine::new("DTEND").write(&format_timestamp(event.stop()), &mut out);
    ContentLine::new("SEQUENCE").write(&event.revision_count().to_string(), &mut out);
    ContentLine::new("CATEGORIES").write(event.category().as_ics_str(), &mut out);
    ContentLine::new("STATUS").write(event.status().as_ics_str(), &mut out);
    ContentLine::new("X_RING_DIRECTION")
        .param("VALUE", "TEXT")
        .write(event.direction().as_ics_str(), &mut out);

    if let Some(account) = organizer {
        ContentLine::new("ORGANIZER")
            .quoted_param("CN", &account.display_name)
            .param("X_RING_ACCOUNTID", account.id.as_str())
            .write(&account.uri, &mut out);
    }

    for attendee in event.attendees() {
        let mut line = ContentLine::new("ATTENDEE").quoted_param("CN", &attendee.name);
        if let Some(uid) = &attendee.person_uid {
            line = line.param("UID", uid);
        }
        line.write(&attendee.uri, &mut out);
    }

    for attachment in event.attachments() {
        let mut line = ContentLine::new("ATTACH");
        if let Some(mime) = &attachment.mime {
            line = line.param("FMTTYPE", mime);
        }
        if let Some(role) = &attachment.role {
            line = line.quoted_param("X_RING_ROLE", role);
        }
        line.write(&attachment.uri, &mut out);
    }

    for property in event.custom_properties() {
        write_property(property, &mut out);
    }

    ContentLine::new("END").write(kind, &mut out);
    out
}

/// Write a property kept from a previous parse. The value is already
/// escaped.
fn write_property(property: &Property, out: &mut String) {
    let mut line = ContentLine::new(&property.name);
    for (name, value) in property.parameters.iter() {
        line = line.param(name, value);
    }
    line.write(&property.value, out);
}

/// Marker telling the loader that `uid` was deleted.
pub fn generate_tombstone(uid: &str, revision: Timestamp) -> String {
    let mut out = String::new();
    ContentLine::new("BEGIN").write("VEVENT", &mut out);
    ContentLine::new("UID").write(&escape_text(uid), &mut out);
    ContentLine::new("DTSTAMP").write(&format_timestamp(revision), &mut out);
    ContentLine::new("X_RING_DELETED").write("TRUE", &mut out);
    ContentLine::new("END").write("VEVENT", &mut out);
    out
}

/// Serialize a complete calendar.
pub fn generate_calendar<'a>(
    events: impl IntoIterator<Item = &'a Event>,
    organizer: Option<&Account>,
) -> String {
    let mut out = calendar_header();
    for event in events {
        out.push_str(&generate_event(event, organizer));
    }
    out.push_str(CALENDAR_FOOTER);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::{AccountId, ContactId};
    use crate::event::{
        Attachment, Attendee, Direction, EventCategory, EventData, EventStatus, SyncState,
    };
    use crate::ics::{ParseOptions, parse_calendar};
    use crate::vparser::Parameters;
    use crate::warnings::WarnOnce;

    fn account() -> Account {
        Account {
            id: AccountId::from("acc1"),
            display_name: "Work \"main\"".into(),
            uri: "ring:0000".into(),
        }
    }

    fn sample_event() -> Event {
        Event::new(
            AccountId::from("acc1"),
            EventData {
                uid: "1000-60-ABCDEF01@acc1.ring.cx".into(),
                start: 1_600_000_000,
                stop: 1_600_000_060,
                revision: 1_600_000_100,
                revision_count: 2,
                category: EventCategory::Call,
                status: EventStatus::Missed,
                direction: Direction::Outgoing,
                attendees: vec![
                    Attendee {
                        contact: ContactId(1),
                        uri: "ring:bob".into(),
                        name: "Doe; Bob, Jr".into(),
                        person_uid: Some("person-1".into()),
                    },
                    Attendee {
                        contact: ContactId(2),
                        uri: "sip:alice@example.com".into(),
                        name: "Alice".into(),
                        person_uid: None,
                    },
                ],
                attachments: vec![Attachment {
                    uri: "/rec/call 1.wav".into(),
                    mime: Some("audio/x-wav".into()),
                    role: Some("AUDIO_RECORDING".into()),
                }],
                custom_properties: vec![Property {
                    name: "X-NOTE".into(),
                    parameters: [("LANG", "fr")].into_iter().collect::<Parameters>(),
                    value: "salut\\, toi".into(),
                }],
                ..Default::default()
            },
            SyncState::New,
        )
    }

    fn reparse(text: &str) -> crate::ics::ParsedCalendar {
        parse_calendar(text.as_bytes(), &ParseOptions { strict: true }, &WarnOnce::new()).unwrap()
    }

    #[test]
    fn test_event_round_trip() {
        let event = sample_event();
        let account = account();
        let text = generate_calendar([&event], Some(&account));
        let parsed = reparse(&text);
        assert_eq!(parsed.events.len(), 1);

        let record = &parsed.events[0];
        assert_eq!(record.uid, event.uid());
        assert_eq!(record.start, event.start());
        assert_eq!(record.stop, event.stop());
        assert_eq!(record.revision, event.revision());
        assert_eq!(record.revision_count, 2);
        assert_eq!(record.direction, Some(Direction::Outgoing));
        assert_eq!(record.category, Some(EventCategory::Call));
        assert_eq!(record.status, Some(EventStatus::Missed));

        let attendees: Vec<_> = record
            .attendees
            .iter()
            .map(|a| (a.uri.as_str(), a.cn.as_deref(), a.person_uid.as_deref()))
            .collect();
        assert_eq!(
            attendees,
            [
                ("ring:bob", Some("Doe; Bob, Jr"), Some("person-1")),
                ("sip:alice@example.com", Some("Alice"), None),
            ]
        );

        let organizer = record.organizer.as_ref().unwrap();
        assert_eq!(organizer.cn.as_deref(), Some("Work \"main\""));
        assert_eq!(organizer.account_id.as_deref(), Some("acc1"));
        assert_eq!(organizer.uri, "ring:0000");

        assert_eq!(record.attachments[0].uri, "/rec/call 1.wav");
        assert_eq!(record.attachments[0].role.as_deref(), Some("AUDIO_RECORDING"));
        assert_eq!(record.extra, event.custom_properties());
    }

    #[test]
    fn test_line_breaks_in_uris_stay_in_one_property() {
        let mut event = sample_event();
        event.add_attendee(Attendee {
            contact: ContactId(3),
            uri: "ring:eve\r\nX-INJECTED:1".into(),
            name: "Eve".into(),
            person_uid: None,
        });
        event.attach(Attachment {
            uri: "/rec/a.wav\nEND:VEVENT".into(),
            mime: None,
            role: None,
        });
        let organizer = Account {
            uri: "ring:0000\rX-OTHER:2".into(),
            ..account()
        };

        let text = generate_calendar([&event], Some(&organizer));
        assert!(!text.contains("\r\nX-INJECTED"));
        let parsed = reparse(&text);
        assert_eq!(parsed.events.len(), 1);
        let record = &parsed.events[0];
        assert_eq!(record.attendees[2].uri, "ring:eve  X-INJECTED:1");
        assert_eq!(record.attachments[1].uri, "/rec/a.wav END:VEVENT");
        assert_eq!(record.organizer.as_ref().unwrap().uri, "ring:0000 X-OTHER:2");
        assert_eq!(record.extra, event.custom_properties());
    }

    #[test]
    fn test_lines_are_folded() {
        let long_name = "x".repeat(200);
        let mut event = sample_event();
        event.add_attendee(Attendee {
            contact: ContactId(3),
            uri: "ring:long".into(),
            name: long_name.clone(),
            person_uid: None,
        });
        let text = generate_event(&event, None);
        for line in text.split("\r\n") {
            assert!(line.len() <= 75, "{line:?}");
        }
        let text = format!("{}{text}{CALENDAR_FOOTER}", calendar_header());
        let parsed = reparse(&text);
        assert_eq!(parsed.events[0].attendees[2].cn.as_deref(), Some(long_name.as_str()));
    }

    #[test]
    fn test_fold_keeps_multibyte_characters() {
        let mut out = String::new();
        let line = format!("X-NOTE:{}", "é".repeat(60));
        push_folded(&mut out, &line);
        assert!(out.split("\r\n").all(|l| l.len() <= 75));
        assert_eq!(out.replace("\r\n ", ""), format!("{line}\r\n"));
    }

    #[test]
    fn test_fold_of_value_starting_with_space() {
        let mut out = String::new();
        let line = format!("X-NOTE:{} tail", "a".repeat(68));
        push_folded(&mut out, &line);
        assert_eq!(out.replace("\r\n ", ""), format!("{line}\r\n"));
    }

    #[test]
    fn test_tombstone() {
        let text = format!(
            "{}{}{CALENDAR_FOOTER}",
            calendar_header(),
            generate_tombstone("gone@acc1.ring.cx", 1_600_000_000)
        );
        let parsed = reparse(&text);
        assert!(parsed.events[0].tombstone);
        assert_eq!(parsed.events[0].uid, "gone@acc1.ring.cx");
        assert_eq!(parsed.events[0].revision, 1_600_000_000);
    }

    #[test]
    fn test_param_quoting() {
        assert_eq!(param_value("plain", false), "plain");
        assert_eq!(param_value("plain", true), "\"plain\"");
        assert_eq!(param_value("a:b", false), "\"a:b\"");
        assert_eq!(param_value("say \"hi\"", false), "\"say \\\"hi\\\"\"");
        assert_eq!(param_value("two\nlines", false), "two lines");
    }
}
