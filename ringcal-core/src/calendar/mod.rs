//! Per-account calendars.
//!
//! A [`Calendar`] owns every event of one account and keeps them in an
//! `.ics` file. New and changed events are appended just before the file
//! footer. Appending leaves garbage behind (see [`GcCounters`]); once there
//! is enough of it the next save rewrites the file from scratch.
//!
//! `Calendar` is a cheap handle: clones share the same events. Changes are
//! saved by a flush deferred to the next turn of the tokio runtime, so a
//! burst of changes ends up in a single write. Without a runtime the caller
//! flushes explicitly.

mod gc;
mod store;

pub use gc::GcCounters;

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::sync::{Notify, broadcast};
use tracing::{debug, info, warn};

use crate::activity::Activity;
use crate::config::RingcalConfig;
use crate::directory::{Account, AccountId, Collaborators, ContactId};
use crate::error::{CalError, CalResult};
use crate::event::{
    Attendee, CalendarId, EditAction, Event, EventData, EventHandle, EventStatus, EventType,
    SyncState, Timestamp, next_sync_state,
};
use crate::ics::{
    AttachmentRecord, AttendeeRecord, EventRecord, ParseOptions, ParsedCalendar,
    generate_calendar, generate_event, generate_tombstone, parse_calendar,
};
use crate::timeline::ContactIndex;
use crate::warnings::WarnOnce;

use gc::WriteOrder;

const SIGNAL_CAPACITY: usize = 256;

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Where a record comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// The calendar's own backing file
    File,
    /// This application: a call that just ended, a user edit
    Local,
    /// Another copy of the history (legacy import, another device)
    Remote,
}

/// What [`Calendar::add_record`] did with a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Added(EventHandle),
    /// A placeholder got its data
    Resolved(EventHandle),
    /// Merged into an existing event
    Updated(EventHandle),
    /// Same UID and nothing new
    Unchanged(EventHandle),
    /// Older than what the calendar has, ignored
    Stale(EventHandle),
    Removed(EventHandle),
}

impl MergeOutcome {
    pub fn handle(&self) -> EventHandle {
        match *self {
            MergeOutcome::Added(handle)
            | MergeOutcome::Resolved(handle)
            | MergeOutcome::Updated(handle)
            | MergeOutcome::Unchanged(handle)
            | MergeOutcome::Stale(handle)
            | MergeOutcome::Removed(handle) => handle,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CalendarSignal {
    LoadFinished { events: usize },
    LoadFailed { reason: String },
    EventAdded(EventHandle),
    EventUpdated(EventHandle),
    EventRemoved(EventHandle),
    Saved { success: bool, rebuilt: bool },
}

/// Summary of a load.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadReport {
    /// Live events once the file is integrated
    pub events: usize,
    pub tombstones: usize,
    /// Superseded copies that were ignored
    pub stale: usize,
    /// Broken events dropped by the parser
    pub skipped: usize,
    pub errors: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Nothing to write
    Clean,
    Appended { events: usize },
    Rebuilt { events: usize },
}

/// A change to one event.
#[derive(Debug, Clone, PartialEq)]
pub enum EventChange {
    Status(EventStatus),
    /// Extend the event; earlier stop times are ignored
    Stop(Timestamp),
    AddAttendee {
        uri: String,
        name: Option<String>,
    },
    Attach {
        uri: String,
        mime: Option<String>,
        role: Option<String>,
    },
    Detach(String),
}

impl EventChange {
    fn action(&self) -> EditAction {
        match self {
            EventChange::Stop(_) => EditAction::Reschedule,
            _ => EditAction::Modify,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalendarSettings {
    pub gc_threshold: u32,
    pub strict: bool,
}

impl From<&RingcalConfig> for CalendarSettings {
    fn from(config: &RingcalConfig) -> Self {
        CalendarSettings {
            gc_threshold: config.gc_threshold,
            strict: config.strict_parsing,
        }
    }
}

/// What every calendar of a model shares.
#[derive(Clone)]
pub struct CalendarContext {
    pub settings: CalendarSettings,
    pub index: Arc<Mutex<ContactIndex>>,
    pub collaborators: Collaborators,
    pub warnings: Arc<WarnOnce>,
}

impl CalendarContext {
    pub fn new(config: &RingcalConfig, collaborators: Collaborators) -> Self {
        CalendarContext {
            settings: config.into(),
            index: Arc::new(Mutex::new(ContactIndex::new(config.sort_threshold))),
            collaborators,
            warnings: Arc::new(WarnOnce::new()),
        }
    }
}

#[derive(Default)]
struct CalendarState {
    /// Arena; a slot is never reused
    events: Vec<Event>,
    by_uid: HashMap<String, u32>,
    /// Slots the file does not have yet
    unsaved: BTreeSet<u32>,
    /// Slots with at least one copy in the file
    in_file: HashSet<u32>,
    gc: GcCounters,
    order: WriteOrder,
    load_report: Option<LoadReport>,
    /// ORGANIZER found in the file, written back when the account registry
    /// does not know the account
    file_organizer: Option<Account>,
    flush_armed: bool,
}

impl CalendarState {
    fn live(&self) -> impl Iterator<Item = (u32, &Event)> {
        self.events
            .iter()
            .enumerate()
            .filter(|(_, event)| !event.is_deleted() && event.sync_state() != SyncState::Placeholder)
            .map(|(slot, event)| (slot as u32, event))
    }

    fn is_loaded(&self) -> bool {
        self.load_report.is_some()
    }

    fn compaction_due(&self, threshold: u32) -> bool {
        self.is_loaded() && self.gc.needs_rebuild(threshold)
    }

    /// Queue `slot` for the next save, counting the garbage the new copy
    /// will leave in the file.
    fn mark_unsaved(&mut self, slot: u32) {
        if !self.unsaved.insert(slot) {
            return;
        }
        let event = &self.events[slot as usize];
        if event.is_deleted() {
            return;
        }
        if self.order.is_behind(event.start()) {
            self.gc.unsorted += 1;
        }
        if self.in_file.contains(&slot) {
            self.gc.duplicates += 1;
        }
    }
}

struct Inner {
    id: CalendarId,
    account: AccountId,
    path: PathBuf,
    context: CalendarContext,
    state: Mutex<CalendarState>,
    signals: broadcast::Sender<CalendarSignal>,
    load_gate: tokio::sync::Mutex<()>,
    flushed: Notify,
}

#[derive(Clone)]
pub struct Calendar {
    inner: Arc<Inner>,
}

fn read_calendar(
    path: &Path,
    options: &ParseOptions,
    warnings: &WarnOnce,
) -> CalResult<ParsedCalendar> {
    match store::read(path)? {
        Some(bytes) => Ok(parse_calendar(&bytes, options, warnings)?),
        None => Ok(ParsedCalendar::default()),
    }
}

impl Calendar {
    pub fn new(id: CalendarId, account: AccountId, path: PathBuf, context: CalendarContext) -> Self {
        let (signals, _) = broadcast::channel(SIGNAL_CAPACITY);
        Calendar {
            inner: Arc::new(Inner {
                id,
                account,
                path,
                context,
                state: Mutex::new(CalendarState::default()),
                signals,
                load_gate: tokio::sync::Mutex::new(()),
                flushed: Notify::new(),
            }),
        }
    }

    pub fn id(&self) -> CalendarId {
        self.inner.id
    }

    pub fn account(&self) -> &AccountId {
        &self.inner.account
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CalendarSignal> {
        self.inner.signals.subscribe()
    }

    pub fn is_loaded(&self) -> bool {
        self.state().is_loaded()
    }

    pub fn load_report(&self) -> Option<LoadReport> {
        self.state().load_report.clone()
    }

    pub fn gc_counters(&self) -> GcCounters {
        self.state().gc
    }

    /// Number of live events.
    pub fn len(&self) -> usize {
        self.state().live().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn state(&self) -> MutexGuard<'_, CalendarState> {
        lock(&self.inner.state)
    }

    fn handle(&self, slot: u32) -> EventHandle {
        EventHandle {
            calendar: self.inner.id,
            slot,
        }
    }

    fn slot_of(&self, handle: EventHandle) -> CalResult<u32> {
        if handle.calendar != self.inner.id {
            return Err(unknown(handle));
        }
        Ok(handle.slot)
    }

    fn emit(&self, signal: CalendarSignal) {
        // No receiver is fine
        let _ = self.inner.signals.send(signal);
    }

    fn announce(&self, outcome: MergeOutcome) {
        match outcome {
            MergeOutcome::Added(handle) => self.emit(CalendarSignal::EventAdded(handle)),
            MergeOutcome::Resolved(handle) | MergeOutcome::Updated(handle) => {
                self.emit(CalendarSignal::EventUpdated(handle))
            }
            MergeOutcome::Removed(handle) => self.emit(CalendarSignal::EventRemoved(handle)),
            MergeOutcome::Unchanged(_) | MergeOutcome::Stale(_) => {}
        }
    }

    pub fn event(&self, handle: EventHandle) -> Option<Event> {
        if handle.calendar != self.inner.id {
            return None;
        }
        self.state().events.get(handle.slot as usize).cloned()
    }

    pub fn find(&self, uid: &str) -> Option<EventHandle> {
        let slot = self.state().by_uid.get(uid.trim()).copied()?;
        Some(self.handle(slot))
    }

    /// Live events, oldest first.
    pub fn events(&self) -> Vec<(EventHandle, Event)> {
        let state = self.state();
        let mut events: Vec<_> = state
            .live()
            .map(|(slot, event)| (self.handle(slot), event.clone()))
            .collect();
        events.sort_by(|(a, x), (b, y)| (x.start(), a).cmp(&(y.start(), b)));
        events
    }

    /// Events waiting for the next save, oldest first.
    pub fn unsaved_events(&self) -> Vec<Event> {
        let state = self.state();
        let mut events: Vec<Event> = state
            .unsaved
            .iter()
            .map(|slot| state.events[*slot as usize].clone())
            .collect();
        events.sort_by(|a, b| (a.start(), a.uid()).cmp(&(b.start(), b.uid())));
        events
    }

    /// Read the backing file.
    ///
    /// Loading twice is harmless: the second call reports the first load.
    /// Events are integrated in one step, and `LoadFinished` is emitted
    /// once they all are. A missing file is an empty calendar.
    pub async fn load(&self) -> CalResult<LoadReport> {
        let _gate = self.inner.load_gate.lock().await;

        let previous = self.state().load_report.clone();
        if let Some(report) = previous {
            self.emit(CalendarSignal::LoadFinished {
                events: report.events,
            });
            return Ok(report);
        }

        let path = self.inner.path.clone();
        let options = ParseOptions {
            strict: self.inner.context.settings.strict,
        };
        let warnings = Arc::clone(&self.inner.context.warnings);
        let parsed = match tokio::task::spawn_blocking(move || {
            read_calendar(&path, &options, &warnings)
        })
        .await
        {
            Ok(result) => result,
            Err(e) => Err(CalError::Task(e.to_string())),
        };

        let parsed = match parsed {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(account = %self.inner.account, error = %e, "Could not load calendar");
                self.emit(CalendarSignal::LoadFailed {
                    reason: e.to_string(),
                });
                return Err(e);
            }
        };

        let report = {
            let mut guard = self.state();
            let report = self.integrate(&mut guard, parsed);
            if guard.compaction_due(self.inner.context.settings.gc_threshold) {
                debug!(account = %self.inner.account, score = guard.gc.score(), "Calendar file due for compaction");
            }
            self.schedule_flush(&mut guard);
            report
        };

        info!(
            account = %self.inner.account,
            events = report.events,
            skipped = report.skipped,
            "Calendar loaded"
        );
        self.emit(CalendarSignal::LoadFinished {
            events: report.events,
        });
        Ok(report)
    }

    /// Merge the parsed file into the calendar.
    ///
    /// Records are taken newest first so that the latest copy of an event
    /// wins and tombstones hide the copies written before them.
    fn integrate(&self, state: &mut CalendarState, parsed: ParsedCalendar) -> LoadReport {
        let mut report = LoadReport {
            skipped: parsed.skipped,
            errors: parsed.errors,
            ..Default::default()
        };

        for record in parsed.events.iter().filter(|record| !record.tombstone) {
            if state.order.observe(record.start) {
                state.gc.unsorted += 1;
            }
            if state.file_organizer.is_none()
                && let Some(organizer) = &record.organizer
                && organizer
                    .account_id
                    .as_deref()
                    .is_none_or(|id| id == self.inner.account.as_str())
            {
                state.file_organizer = Some(Account {
                    id: self.inner.account.clone(),
                    display_name: organizer.cn.clone().unwrap_or_default(),
                    uri: organizer.uri.clone(),
                });
            }
        }

        let mut deleted: HashMap<String, Timestamp> = HashMap::new();
        // UIDs already read from a later copy in the file
        let mut read: HashSet<String> = HashSet::new();
        for record in parsed.events.into_iter().rev() {
            let uid = record.uid.trim().to_string();

            if record.tombstone {
                report.tombstones += 1;
                state.gc.removed += 1;
                let revision = deleted.entry(uid.clone()).or_insert(record.revision);
                *revision = (*revision).max(record.revision);

                let target = state.by_uid.get(&uid).copied();
                if let Some(slot) = target
                    && state.events[slot as usize].revision() <= record.revision
                    && let Err(e) = self.delete_slot(state, slot, Origin::File)
                {
                    report.errors += 1;
                    warn!(uid = %uid, error = %e, "Could not apply tombstone");
                }
                continue;
            }

            if deleted.get(&uid).is_some_and(|revision| record.revision <= *revision) {
                state.gc.removed += 1;
                continue;
            }

            // Written earlier, so superseded unless its revision is newer
            let superseded = read.contains(&uid)
                && state.by_uid.get(&uid).is_some_and(|&slot| {
                    record.revision <= state.events[slot as usize].revision()
                });
            if superseded {
                state.gc.duplicates += 1;
                report.stale += 1;
                continue;
            }

            match self.merge_record(state, record, Origin::File) {
                Ok(MergeOutcome::Stale(_)) => report.stale += 1,
                Ok(_) => {
                    if !uid.is_empty() {
                        read.insert(uid);
                    }
                }
                Err(e) => {
                    report.errors += 1;
                    warn!(uid = %uid, error = %e, "Could not load event");
                }
            }
        }

        report.events = state.live().count();
        state.load_report = Some(report.clone());
        report
    }

    /// Add an event, or merge it into the event with the same UID.
    ///
    /// A record older than the stored event is ignored. Otherwise the
    /// event's stop time only moves forward, a start time is only filled
    /// in when missing, and attendees and attachments are unioned.
    pub fn add_record(&self, record: EventRecord, origin: Origin) -> CalResult<MergeOutcome> {
        let outcome = {
            let mut guard = self.state();
            let outcome = self.merge_record(&mut guard, record, origin)?;
            self.schedule_flush(&mut guard);
            outcome
        };
        self.announce(outcome);
        Ok(outcome)
    }

    /// Record an activity of this calendar's account.
    pub fn add_activity(&self, activity: &Activity) -> CalResult<EventHandle> {
        self.record_activity(activity, Origin::Local)
    }

    /// Record an activity read from an older history store.
    pub fn import_activity(&self, activity: &Activity) -> CalResult<EventHandle> {
        self.record_activity(activity, Origin::Remote)
    }

    fn record_activity(&self, activity: &Activity, origin: Origin) -> CalResult<EventHandle> {
        if activity.account != self.inner.account {
            return Err(CalError::WrongAccount {
                expected: self.inner.account.clone(),
                found: activity.account.clone(),
            });
        }

        let record = EventRecord {
            kind: EventType::Event,
            uid: activity.event_uid.clone().unwrap_or_default(),
            start: activity.start,
            stop: activity.stop,
            revision: chrono::Utc::now().timestamp(),
            revision_count: 0,
            category: Some(activity.category()),
            status: Some(activity.status()),
            direction: Some(activity.direction),
            organizer: None,
            attendees: vec![AttendeeRecord {
                uri: activity.peer_uri.clone(),
                cn: activity.peer_name.clone(),
                person_uid: None,
                account_hint: Some(self.inner.account.to_string()),
            }],
            attachments: activity
                .recording
                .iter()
                .map(|recording| AttachmentRecord {
                    uri: recording.path.clone(),
                    mime: Some(recording.mime.clone()),
                    role: activity.recording_role().map(str::to_string),
                })
                .collect(),
            tombstone: false,
            extra: Vec::new(),
        };

        Ok(self.add_record(record, origin)?.handle())
    }

    /// Handle of the event with `uid`, creating an empty placeholder when
    /// the event has not been seen yet.
    ///
    /// The handle stays valid once the real event is added.
    pub fn placeholder(&self, uid: &str) -> CalResult<EventHandle> {
        let uid = uid.trim();
        if uid.is_empty() {
            return Err(CalError::UnknownEvent("empty UID".into()));
        }
        let mut guard = self.state();
        if let Some(&slot) = guard.by_uid.get(uid) {
            return Ok(self.handle(slot));
        }
        let slot = self.insert(&mut guard, Event::placeholder(self.inner.account.clone(), uid));
        Ok(self.handle(slot))
    }

    fn merge_record(
        &self,
        state: &mut CalendarState,
        mut record: EventRecord,
        origin: Origin,
    ) -> CalResult<MergeOutcome> {
        let uid = record.uid.trim().to_string();
        record.uid = uid.clone();
        let existing = state.by_uid.get(&uid).copied();

        if record.tombstone {
            let slot = existing.ok_or_else(|| CalError::UnknownEvent(uid.clone()))?;
            self.delete_slot(state, slot, origin)?;
            return Ok(MergeOutcome::Removed(self.handle(slot)));
        }

        let Some(slot) = existing else {
            let sync_state = match origin {
                Origin::File => SyncState::Saved,
                Origin::Local => SyncState::New,
                Origin::Remote => SyncState::Imported,
            };
            let event = Event::new(self.inner.account.clone(), self.event_data(record), sync_state);
            let slot = self.insert(state, event);
            if origin == Origin::File && !uid.is_empty() {
                state.in_file.insert(slot);
            } else {
                // A UID generated now has to reach the file too
                state.mark_unsaved(slot);
            }
            return Ok(MergeOutcome::Added(self.handle(slot)));
        };
        let handle = self.handle(slot);

        if state.events[slot as usize].sync_state() == SyncState::Placeholder {
            let action = match origin {
                Origin::File => EditAction::ResolveSaved,
                Origin::Local | Origin::Remote => EditAction::ResolveImported,
            };
            let data = self.event_data(record);
            state.events[slot as usize].resolve(data, action)?;
            self.index_event(state, slot);
            if origin == Origin::File {
                state.in_file.insert(slot);
            } else {
                state.mark_unsaved(slot);
            }
            return Ok(MergeOutcome::Resolved(handle));
        }

        if origin == Origin::File {
            state.gc.duplicates += 1;
        }

        let current = &state.events[slot as usize];
        if current.is_deleted() || record.revision < current.revision() {
            if origin == Origin::File {
                debug!(uid = %uid, "Skipping superseded copy");
            } else if self.inner.context.warnings.first(&format!("stale:{uid}")) {
                warn!(
                    uid = %uid,
                    revision = record.revision,
                    current = current.revision(),
                    "Ignoring stale copy of event"
                );
            }
            return Ok(MergeOutcome::Stale(handle));
        }

        self.squash(state, slot, record, origin)
    }

    fn squash(
        &self,
        state: &mut CalendarState,
        slot: u32,
        record: EventRecord,
        origin: Origin,
    ) -> CalResult<MergeOutcome> {
        let handle = self.handle(slot);
        let status = record.status;
        let data = self.event_data(record);

        let event = &mut state.events[slot as usize];
        let old_start = event.start();

        let mut rescheduled = event.set_start(data.start);
        rescheduled |= event.extend_stop(data.stop);

        let mut modified = false;
        let mut joined = Vec::new();
        for attendee in data.attendees {
            let contact = attendee.contact;
            if event.add_attendee(attendee) {
                joined.push(contact);
                modified = true;
            }
        }
        for attachment in data.attachments {
            modified |= event.attach(attachment);
        }
        if let Some(status) = status {
            modified |= event.set_status(status);
        }
        event.merge_revision(data.revision, data.revision_count);

        let start = event.start();
        {
            let mut index = lock(&self.inner.context.index);
            if start != old_start {
                for attendee in event.attendees() {
                    if !joined.contains(&attendee.contact) {
                        index.update_start(attendee.contact, handle, start);
                    }
                }
            }
            for contact in joined {
                index.append(contact, handle, start);
            }
        }

        if !rescheduled && !modified {
            return Ok(MergeOutcome::Unchanged(handle));
        }

        if origin != Origin::File {
            let synchronize = origin == Origin::Remote
                && next_sync_state(event.sync_state(), EditAction::Synchronize) != SyncState::Error;
            if synchronize {
                event.apply(EditAction::Synchronize)?;
            } else {
                if modified {
                    event.apply(EditAction::Modify)?;
                }
                if rescheduled {
                    event.apply(EditAction::Reschedule)?;
                }
            }
            state.mark_unsaved(slot);
        }
        Ok(MergeOutcome::Updated(handle))
    }

    fn event_data(&self, record: EventRecord) -> EventData {
        let collaborators = &self.inner.context.collaborators;

        if let Some(account_id) = record
            .organizer
            .as_ref()
            .and_then(|organizer| organizer.account_id.as_deref())
            && account_id != self.inner.account.as_str()
            && self
                .inner
                .context
                .warnings
                .first(&format!("organizer:{}:{account_id}", self.inner.account))
        {
            warn!(
                account = %self.inner.account,
                organizer = account_id,
                "Event organized by another account, keeping it in this calendar"
            );
        }

        let attendees = record
            .attendees
            .into_iter()
            .filter(|attendee| !attendee.uri.trim().is_empty())
            .map(|attendee| {
                let hint = attendee.account_hint.map(AccountId::from);
                let contact = collaborators.contacts.resolve(&attendee.uri, hint.as_ref());
                Attendee {
                    contact,
                    uri: attendee.uri,
                    name: attendee.cn.unwrap_or_default(),
                    person_uid: attendee.person_uid,
                }
            })
            .collect();

        let attachments = record
            .attachments
            .iter()
            .filter_map(|attachment| {
                let resolved = collaborators.attachments.resolve(
                    &attachment.uri,
                    attachment.mime.as_deref(),
                    attachment.role.as_deref(),
                );
                if resolved.is_none() {
                    debug!(uri = %attachment.uri, "Dropping attachment to an unknown file");
                }
                resolved
            })
            .collect();

        EventData {
            uid: record.uid,
            kind: record.kind,
            start: record.start,
            stop: record.stop,
            revision: record.revision,
            revision_count: record.revision_count,
            category: record.category.unwrap_or_default(),
            status: record.status.unwrap_or_default(),
            direction: record.direction.unwrap_or_default(),
            attendees,
            attachments,
            custom_properties: record.extra,
        }
    }

    fn insert(&self, state: &mut CalendarState, event: Event) -> u32 {
        let slot = state.events.len() as u32;
        state.by_uid.insert(event.uid().to_string(), slot);
        state.events.push(event);
        self.index_event(state, slot);
        slot
    }

    fn index_event(&self, state: &CalendarState, slot: u32) {
        let event = &state.events[slot as usize];
        let handle = self.handle(slot);
        let mut index = lock(&self.inner.context.index);
        for attendee in event.attendees() {
            index.append(attendee.contact, handle, event.start());
        }
    }

    fn delete_slot(&self, state: &mut CalendarState, slot: u32, origin: Origin) -> CalResult<()> {
        let handle = self.handle(slot);
        let event = state
            .events
            .get_mut(slot as usize)
            .ok_or_else(|| unknown(handle))?;
        if event.is_deleted() {
            return Ok(());
        }

        let next = event.apply(EditAction::Delete)?;
        {
            let mut index = lock(&self.inner.context.index);
            for attendee in event.attendees() {
                index.remove(attendee.contact, handle);
            }
        }

        match next {
            SyncState::Cancelled => {
                state.unsaved.remove(&slot);
            }
            // The tombstone is already in the file
            SyncState::Discarded if origin == Origin::File => {
                event.apply(EditAction::Save)?;
                state.unsaved.remove(&slot);
            }
            _ => {
                state.unsaved.insert(slot);
                state.gc.removed += 1;
            }
        }
        Ok(())
    }

    /// Apply `change` to an event. Returns whether anything changed.
    pub fn edit(&self, handle: EventHandle, change: EventChange) -> CalResult<bool> {
        let slot = self.slot_of(handle)?;
        let changed = {
            let mut guard = self.state();
            let state = &mut *guard;
            let event = state
                .events
                .get_mut(slot as usize)
                .ok_or_else(|| unknown(handle))?;

            let action = change.action();
            if next_sync_state(event.sync_state(), action) == SyncState::Error {
                return event.apply(action).map(|_| false);
            }

            let collaborators = &self.inner.context.collaborators;
            let changed = match change {
                EventChange::Status(status) => event.set_status(status),
                EventChange::Stop(stop) => event.extend_stop(stop),
                EventChange::AddAttendee { uri, name } => {
                    let contact = collaborators
                        .contacts
                        .resolve(&uri, Some(&self.inner.account));
                    let added = event.add_attendee(Attendee {
                        contact,
                        uri,
                        name: name.unwrap_or_default(),
                        person_uid: None,
                    });
                    if added {
                        lock(&self.inner.context.index).append(contact, handle, event.start());
                    }
                    added
                }
                EventChange::Attach { uri, mime, role } => {
                    match collaborators
                        .attachments
                        .resolve(&uri, mime.as_deref(), role.as_deref())
                    {
                        Some(attachment) => event.attach(attachment),
                        None => {
                            debug!(uri = %uri, "Not attaching an unknown file");
                            false
                        }
                    }
                }
                EventChange::Detach(uri) => event.detach(&uri),
            };

            if changed {
                event.apply(action)?;
                state.mark_unsaved(slot);
                self.schedule_flush(state);
            }
            changed
        };

        if changed {
            self.emit(CalendarSignal::EventUpdated(handle));
        }
        Ok(changed)
    }

    pub fn reschedule(&self, handle: EventHandle, stop: Timestamp) -> CalResult<bool> {
        self.edit(handle, EventChange::Stop(stop))
    }

    pub fn set_status(&self, handle: EventHandle, status: EventStatus) -> CalResult<bool> {
        self.edit(handle, EventChange::Status(status))
    }

    pub fn add_attendee(
        &self,
        handle: EventHandle,
        uri: &str,
        name: Option<&str>,
    ) -> CalResult<bool> {
        self.edit(
            handle,
            EventChange::AddAttendee {
                uri: uri.to_string(),
                name: name.map(str::to_string),
            },
        )
    }

    pub fn attach_file(
        &self,
        handle: EventHandle,
        uri: &str,
        mime: Option<&str>,
        role: Option<&str>,
    ) -> CalResult<bool> {
        self.edit(
            handle,
            EventChange::Attach {
                uri: uri.to_string(),
                mime: mime.map(str::to_string),
                role: role.map(str::to_string),
            },
        )
    }

    pub fn detach_file(&self, handle: EventHandle, uri: &str) -> CalResult<bool> {
        self.edit(handle, EventChange::Detach(uri.to_string()))
    }

    /// Delete an event. Events that were written get a tombstone on the
    /// next save; the others just disappear.
    pub fn remove_event(&self, handle: EventHandle) -> CalResult<()> {
        let slot = self.slot_of(handle)?;
        {
            let mut guard = self.state();
            self.delete_slot(&mut guard, slot, Origin::Local)?;
            self.schedule_flush(&mut guard);
        }
        self.emit(CalendarSignal::EventRemoved(handle));
        Ok(())
    }

    /// Write pending changes, appending unless the file is due for a
    /// rebuild.
    pub fn flush(&self) -> CalResult<FlushOutcome> {
        self.write(false)
    }

    /// Rewrite the whole file now. The calendar must be loaded.
    pub fn compact(&self) -> CalResult<FlushOutcome> {
        self.write(true)
    }

    /// Resolve once the pending deferred save (if any) has run.
    pub async fn flushed(&self) {
        loop {
            let notified = self.inner.flushed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            let armed = self.state().flush_armed;
            if !armed {
                return;
            }
            notified.await;
        }
    }

    fn schedule_flush(&self, state: &mut CalendarState) {
        if state.flush_armed {
            return;
        }
        if state.unsaved.is_empty() {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };

        state.flush_armed = true;
        let calendar = self.clone();
        runtime.spawn(async move {
            tokio::task::yield_now().await;
            // Errors are reported by flush itself
            if let Err(e) = tokio::task::spawn_blocking(move || calendar.flush()).await {
                warn!(error = %e, "Deferred save did not run");
            }
        });
    }

    fn write(&self, force_rebuild: bool) -> CalResult<FlushOutcome> {
        let mut guard = self.state();
        let state = &mut *guard;
        state.flush_armed = false;

        let file_exists = self.inner.path.exists();
        let loaded = state.is_loaded();
        if force_rebuild && file_exists && !loaded {
            drop(guard);
            self.inner.flushed.notify_waiters();
            return Err(CalError::NotLoaded(self.inner.account.clone()));
        }

        let compaction_due = state.compaction_due(self.inner.context.settings.gc_threshold);
        if state.unsaved.is_empty() && !force_rebuild && !compaction_due {
            drop(guard);
            self.inner.flushed.notify_waiters();
            return Ok(FlushOutcome::Clean);
        }
        let mut rebuild = force_rebuild || compaction_due || !file_exists;

        let now = chrono::Utc::now().timestamp();
        let mut pending: Vec<u32> = state.unsaved.iter().copied().collect();
        pending.sort_by_key(|slot| (state.events[*slot as usize].start(), *slot));
        for slot in &pending {
            let event = &mut state.events[*slot as usize];
            if !event.is_deleted() && event.sync_state() != SyncState::Placeholder {
                event.bump_revision(now);
            }
        }

        let organizer = self
            .inner
            .context
            .collaborators
            .accounts
            .by_id(&self.inner.account)
            .or_else(|| state.file_organizer.clone());

        let mut result = if rebuild {
            self.rebuild_file(state, organizer.as_ref())
        } else {
            self.append_file(state, &pending, now, organizer.as_ref())
        };
        if let Err(CalError::CorruptFile(reason)) = &result
            && loaded
        {
            warn!(account = %self.inner.account, reason = %reason, "Rewriting calendar file");
            rebuild = true;
            result = self.rebuild_file(state, organizer.as_ref());
        }

        match result {
            Ok(written) => {
                for slot in &pending {
                    let event = &mut state.events[*slot as usize];
                    if next_sync_state(event.sync_state(), EditAction::Save) != SyncState::Error {
                        event.apply(EditAction::Save)?;
                    }
                }
                if rebuild {
                    state.in_file = state.live().map(|(slot, _)| slot).collect();
                    let newest = state.live().map(|(_, event)| event.start()).max();
                    state.order.reset_to(newest.unwrap_or(0));
                } else {
                    for slot in &pending {
                        let event = &state.events[*slot as usize];
                        if !event.is_deleted() {
                            let start = event.start();
                            state.in_file.insert(*slot);
                            state.order.observe(start);
                        }
                    }
                }
                state.unsaved.clear();
                state.gc.reset();
                drop(guard);

                debug!(
                    account = %self.inner.account,
                    events = written,
                    rebuilt = rebuild,
                    "Calendar saved"
                );
                self.emit(CalendarSignal::Saved {
                    success: true,
                    rebuilt: rebuild,
                });
                self.inner.flushed.notify_waiters();
                Ok(if rebuild {
                    FlushOutcome::Rebuilt { events: written }
                } else {
                    FlushOutcome::Appended { events: written }
                })
            }
            Err(e) => {
                drop(guard);
                warn!(
                    account = %self.inner.account,
                    path = %self.inner.path.display(),
                    error = %e,
                    "Could not save calendar"
                );
                self.emit(CalendarSignal::Saved {
                    success: false,
                    rebuilt: rebuild,
                });
                self.inner.flushed.notify_waiters();
                Err(e)
            }
        }
    }

    fn rebuild_file(&self, state: &CalendarState, organizer: Option<&Account>) -> CalResult<usize> {
        let mut live: Vec<&Event> = state.live().map(|(_, event)| event).collect();
        live.sort_by(|a, b| (a.start(), a.uid()).cmp(&(b.start(), b.uid())));
        let content = generate_calendar(live.iter().copied(), organizer);
        store::rebuild(&self.inner.path, &content)?;
        Ok(live.len())
    }

    fn append_file(
        &self,
        state: &CalendarState,
        pending: &[u32],
        now: Timestamp,
        organizer: Option<&Account>,
    ) -> CalResult<usize> {
        let mut chunk = String::new();
        let mut written = 0;
        for slot in pending {
            let event = &state.events[*slot as usize];
            match event.sync_state() {
                SyncState::Discarded => chunk.push_str(&generate_tombstone(event.uid(), now)),
                SyncState::Cancelled | SyncState::Placeholder => continue,
                _ => chunk.push_str(&generate_event(event, organizer)),
            }
            written += 1;
        }
        if written > 0 {
            store::append_events(&self.inner.path, &chunk)?;
        }
        Ok(written)
    }
}

fn unknown(handle: EventHandle) -> CalError {
    CalError::UnknownEvent(format!("{}/{}", handle.calendar.0, handle.slot))
}

/// Fold contact `from` into `into` in every calendar and in the shared
/// index, all under the same locks. Calendars are locked in the order
/// given, then the index. Returns the number of events moved.
pub(crate) fn merge_contacts(
    calendars: &[Calendar],
    index: &Mutex<ContactIndex>,
    from: ContactId,
    into: ContactId,
) -> usize {
    if from == into {
        return 0;
    }
    let mut states: Vec<_> = calendars.iter().map(|calendar| calendar.state()).collect();
    let mut index = lock(index);
    let moved = index.merge(from, into);
    for state in &mut states {
        for event in state.events.iter_mut() {
            event.relabel_contact(from, into);
        }
    }
    moved
}
