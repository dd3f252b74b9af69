//! Object and property adapters.
//!
//! The parser only produces names and raw values. An adapter knows, for one
//! kind of object, how to create a staging record, which handler fills it
//! for each property name, what to do with properties it has no handler for
//! and what to do when a child object closes inside it.

use std::collections::HashMap;

use tracing::{debug, warn};

use super::record::{AttachmentRecord, AttendeeRecord, CalendarRecord, EventRecord, OrganizerRecord};
use super::value::{parse_timestamp, unescape_text};
use crate::event::{Direction, EventCategory, EventStatus, EventType};
use crate::vparser::{ParseErrorKind, Property};
use crate::warnings::WarnOnce;

/// Fills `T` from one property. Errors are the reason the value is invalid.
pub type PropertyHandler<T> = fn(&mut T, Property) -> Result<(), String>;

/// Receives a child object once it is complete.
pub type ObjectHandler<T> = fn(&mut T, StagedObject);

pub struct VObjectAdapter<T> {
    factory: fn(&str) -> T,
    handlers: HashMap<&'static str, PropertyHandler<T>>,
    fallback_property: Option<PropertyHandler<T>>,
    fallback_object: Option<ObjectHandler<T>>,
}

impl<T> VObjectAdapter<T> {
    pub fn new(factory: fn(&str) -> T) -> Self {
        VObjectAdapter {
            factory,
            handlers: HashMap::new(),
            fallback_property: None,
            fallback_object: None,
        }
    }

    pub fn on_property(mut self, name: &'static str, handler: PropertyHandler<T>) -> Self {
        self.handlers.insert(name, handler);
        self
    }

    pub fn on_unknown_property(mut self, handler: PropertyHandler<T>) -> Self {
        self.fallback_property = Some(handler);
        self
    }

    pub fn on_child(mut self, handler: ObjectHandler<T>) -> Self {
        self.fallback_object = Some(handler);
        self
    }

    pub fn create(&self, name: &str) -> T {
        (self.factory)(name)
    }

    pub fn handle(
        &self,
        target: &mut T,
        property: Property,
        warnings: &WarnOnce,
    ) -> Result<(), ParseErrorKind> {
        let name = property.name.clone();
        let result = match self.handlers.get(name.as_str()) {
            Some(handler) => handler(target, property),
            None => {
                if warnings.first(&format!("property:{name}")) {
                    warn!(property = %name, "Unknown property, it will be kept as is");
                }
                match self.fallback_property {
                    Some(fallback) => fallback(target, property),
                    None => Ok(()),
                }
            }
        };
        result.map_err(|reason| ParseErrorKind::InvalidValue {
            property: name,
            reason,
        })
    }

    pub fn close_child(&self, target: &mut T, child: StagedObject) {
        match self.fallback_object {
            Some(handler) => handler(target, child),
            None => debug!(object = child.name(), "Dropping nested object"),
        }
    }
}

/// The record being filled for an open object.
#[derive(Debug, Clone, PartialEq)]
pub enum StagedObject {
    Calendar(CalendarRecord),
    Event(EventRecord),
    /// An object nobody registered for (VTIMEZONE, ...)
    Opaque(String),
}

impl StagedObject {
    pub fn name(&self) -> &str {
        match self {
            StagedObject::Calendar(_) => "VCALENDAR",
            StagedObject::Event(record) => record.kind.as_ics_str(),
            StagedObject::Opaque(name) => name,
        }
    }
}

/// The adapters for every object this crate reads.
pub struct IcsAdapters {
    calendar: VObjectAdapter<CalendarRecord>,
    event: VObjectAdapter<EventRecord>,
}

impl IcsAdapters {
    pub fn standard() -> Self {
        let calendar = VObjectAdapter::new(|_| CalendarRecord::default())
            .on_property("VERSION", |record, p| {
                record.version = Some(p.value.trim().to_string());
                Ok(())
            })
            .on_property("PRODID", |record, p| {
                record.prodid = Some(unescape_text(&p.value));
                Ok(())
            })
            .on_child(commit_event);

        let event = VObjectAdapter::new(|name| EventRecord {
            kind: EventType::from_ics_str(name).unwrap_or_default(),
            ..Default::default()
        })
        .on_property("UID", |record, p| {
            record.uid = unescape_text(p.value.trim());
            Ok(())
        })
        .on_property("DTSTART", |record, p| {
            record.start = parse_timestamp(&p)?;
            Ok(())
        })
        .on_property("DTEND", |record, p| {
            record.stop = parse_timestamp(&p)?;
            Ok(())
        })
        .on_property("DTSTAMP", |record, p| {
            record.revision = parse_timestamp(&p)?;
            Ok(())
        })
        .on_property("SEQUENCE", |record, p| {
            record.revision_count = p.value.trim().parse().map_err(|e| format!("{e}"))?;
            Ok(())
        })
        .on_property("CATEGORIES", categories)
        .on_property("STATUS", |record, p| {
            match EventStatus::from_ics_str(&p.value) {
                Some(status) => record.status = Some(status),
                None => record.extra.push(p),
            }
            Ok(())
        })
        .on_property("X_RING_DIRECTION", |record, p| {
            match Direction::from_ics_str(&p.value) {
                Some(direction) => record.direction = Some(direction),
                None => record.extra.push(p),
            }
            Ok(())
        })
        .on_property("ATTENDEE", |record, p| {
            record.attendees.push(AttendeeRecord {
                uri: p.value.trim().to_string(),
                cn: p.parameters.get("CN").map(str::to_string),
                person_uid: p.parameters.get("UID").map(str::to_string),
                account_hint: p.parameters.get("X_RING_ACCOUNTID").map(str::to_string),
            });
            Ok(())
        })
        .on_property("ORGANIZER", |record, p| {
            record.organizer = Some(OrganizerRecord {
                uri: p.value.trim().to_string(),
                cn: p.parameters.get("CN").map(str::to_string),
                account_id: p.parameters.get("X_RING_ACCOUNTID").map(str::to_string),
            });
            Ok(())
        })
        .on_property("ATTACH", |record, p| {
            record.attachments.push(AttachmentRecord {
                uri: p.value.trim().to_string(),
                mime: p.parameters.get("FMTTYPE").map(str::to_string),
                role: p.parameters.get("X_RING_ROLE").map(str::to_string),
            });
            Ok(())
        })
        .on_property("X_RING_DELETED", |record, p| {
            record.tombstone = p.value.trim().eq_ignore_ascii_case("TRUE");
            Ok(())
        })
        .on_unknown_property(|record, p| {
            record.extra.push(p);
            Ok(())
        });

        IcsAdapters { calendar, event }
    }

    /// Staging record for an object that just started.
    pub fn begin(&self, name: &str) -> StagedObject {
        if name.eq_ignore_ascii_case("VCALENDAR") {
            StagedObject::Calendar(self.calendar.create(name))
        } else if EventType::from_ics_str(name).is_some() {
            StagedObject::Event(self.event.create(name))
        } else {
            StagedObject::Opaque(name.to_string())
        }
    }

    pub fn property(
        &self,
        object: &mut StagedObject,
        property: Property,
        warnings: &WarnOnce,
    ) -> Result<(), ParseErrorKind> {
        match object {
            StagedObject::Calendar(record) => self.calendar.handle(record, property, warnings),
            StagedObject::Event(record) => self.event.handle(record, property, warnings),
            StagedObject::Opaque(_) => Ok(()),
        }
    }

    /// A child object closed inside `parent`.
    pub fn close(&self, parent: &mut StagedObject, child: StagedObject) {
        match parent {
            StagedObject::Calendar(record) => self.calendar.close_child(record, child),
            StagedObject::Event(record) => self.event.close_child(record, child),
            StagedObject::Opaque(name) => {
                debug!(object = child.name(), parent = %name, "Dropping nested object")
            }
        }
    }
}

fn commit_event(calendar: &mut CalendarRecord, child: StagedObject) {
    match child {
        StagedObject::Event(record) => calendar.events.push(record),
        other => debug!(object = other.name(), "Dropping object in calendar"),
    }
}

fn categories(record: &mut EventRecord, property: Property) -> Result<(), String> {
    let known = property
        .value
        .split(',')
        .find_map(EventCategory::from_ics_str);
    match known {
        Some(category) => record.category = Some(category),
        None => record.extra.push(property),
    }
    Ok(())
}
