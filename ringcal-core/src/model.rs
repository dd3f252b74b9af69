//! The event model: one calendar per account, and the contact timelines
//! shared by all of them.

use std::collections::HashMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::activity::Activity;
use crate::calendar::{Calendar, CalendarContext, LoadReport, lock};
use crate::config::RingcalConfig;
use crate::directory::{AccountId, Collaborators, ContactId};
use crate::error::CalResult;
use crate::event::{CalendarId, CategorySet, Event, EventHandle};

#[derive(Default)]
struct Registry {
    by_account: HashMap<AccountId, Calendar>,
    by_id: HashMap<CalendarId, Calendar>,
    next_id: u32,
}

/// Outcome of [`EventModel::import_history`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportReport {
    pub imported: usize,
    /// Activities of accounts that no longer exist
    pub skipped: usize,
    pub failed: usize,
}

pub struct EventModel {
    config: RingcalConfig,
    context: CalendarContext,
    registry: Mutex<Registry>,
}

impl EventModel {
    pub fn new(config: RingcalConfig, collaborators: Collaborators) -> Self {
        let context = CalendarContext::new(&config, collaborators);
        EventModel {
            config,
            context,
            registry: Mutex::new(Registry::default()),
        }
    }

    pub fn config(&self) -> &RingcalConfig {
        &self.config
    }

    pub fn context(&self) -> &CalendarContext {
        &self.context
    }

    /// The calendar of `account`, created (not loaded) on first use.
    pub fn calendar_for(&self, account: &AccountId) -> Calendar {
        let mut registry = lock(&self.registry);
        if let Some(calendar) = registry.by_account.get(account) {
            return calendar.clone();
        }

        let id = CalendarId(registry.next_id);
        registry.next_id += 1;
        let calendar = Calendar::new(
            id,
            account.clone(),
            self.config.calendar_path(account),
            self.context.clone(),
        );
        debug!(%account, path = %calendar.path().display(), "Calendar created");
        registry.by_account.insert(account.clone(), calendar.clone());
        registry.by_id.insert(id, calendar.clone());
        calendar
    }

    pub fn calendar(&self, account: &AccountId) -> Option<Calendar> {
        lock(&self.registry).by_account.get(account).cloned()
    }

    /// Every calendar, in creation order.
    pub fn calendars(&self) -> Vec<Calendar> {
        let registry = lock(&self.registry);
        let mut calendars: Vec<_> = registry.by_id.values().cloned().collect();
        calendars.sort_by_key(|calendar| calendar.id());
        calendars
    }

    /// Forget an account's calendar and its events. The file stays on disk.
    pub fn remove_account(&self, account: &AccountId) -> Option<Calendar> {
        let calendar = {
            let mut registry = lock(&self.registry);
            let calendar = registry.by_account.remove(account)?;
            registry.by_id.remove(&calendar.id());
            calendar
        };
        lock(&self.context.index).detach_calendar(calendar.id());
        info!(%account, "Calendar removed");
        Some(calendar)
    }

    /// Load every calendar. Failures are reported per account.
    pub async fn load_all(&self) -> Vec<(AccountId, CalResult<LoadReport>)> {
        let mut results = Vec::new();
        for calendar in self.calendars() {
            let result = calendar.load().await;
            results.push((calendar.account().clone(), result));
        }
        results
    }

    /// Flush every calendar, returning the first error once all were tried.
    pub fn flush_all(&self) -> CalResult<()> {
        let mut first_error = None;
        for calendar in self.calendars() {
            if let Err(e) = calendar.flush() {
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Replay activities from an older history store into the calendars of
    /// their accounts.
    pub fn import_history(&self, activities: impl IntoIterator<Item = Activity>) -> ImportReport {
        let accounts = &self.context.collaborators.accounts;
        let mut report = ImportReport::default();

        for activity in activities {
            if accounts.by_id(&activity.account).is_none() {
                report.skipped += 1;
                continue;
            }
            match self.calendar_for(&activity.account).import_activity(&activity) {
                Ok(_) => report.imported += 1,
                Err(e) => {
                    report.failed += 1;
                    warn!(account = %activity.account, error = %e, "Could not import activity");
                }
            }
        }

        if report.skipped > 0 {
            info!(skipped = report.skipped, "Skipped history of deleted accounts");
        }
        report
    }

    /// Fold `from`'s timeline into `into`'s (two identities turned out to be
    /// the same person). Returns the number of events moved.
    pub fn merge_contacts(&self, from: ContactId, into: ContactId) -> usize {
        let moved = crate::calendar::merge_contacts(&self.calendars(), &self.context.index, from, into);
        debug!(%from, %into, moved, "Contacts merged");
        moved
    }

    /// Events shared with `contact` across all calendars, oldest first.
    pub fn timeline(&self, contact: ContactId, categories: CategorySet) -> Vec<(EventHandle, Event)> {
        let handles = lock(&self.context.index).sorted(contact);
        let registry = lock(&self.registry);
        handles
            .into_iter()
            .filter_map(|handle| {
                let event = registry.by_id.get(&handle.calendar)?.event(handle)?;
                (!event.is_deleted() && categories.contains(event.category()))
                    .then_some((handle, event))
            })
            .collect()
    }

    pub fn find_by_uid(&self, uid: &str) -> Option<EventHandle> {
        self.calendars()
            .into_iter()
            .find_map(|calendar| calendar.find(uid))
    }

    pub fn event(&self, handle: EventHandle) -> Option<Event> {
        let calendar = lock(&self.registry).by_id.get(&handle.calendar).cloned()?;
        calendar.event(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::ActivityKind;
    use crate::directory::{Account, ContactDirectory, MemoryDirectory};
    use crate::event::{Direction, EventCategory, Timestamp};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn model(dir: &TempDir) -> (EventModel, Arc<MemoryDirectory>) {
        let directory = Arc::new(MemoryDirectory::new());
        for id in ["acc1", "acc2"] {
            directory.add_account(Account {
                id: id.into(),
                display_name: id.to_uppercase(),
                uri: format!("ring:{id}"),
            });
        }
        let config = RingcalConfig::with_data_dir(dir.path());
        (
            EventModel::new(config, Collaborators::in_memory(directory.clone())),
            directory,
        )
    }

    fn activity(account: &str, peer: &str, start: Timestamp, kind: ActivityKind) -> Activity {
        Activity {
            account: account.into(),
            peer_uri: peer.to_string(),
            peer_name: None,
            start,
            stop: start + 30,
            direction: Direction::Incoming,
            kind,
            recording: None,
            event_uid: None,
        }
    }

    fn call(account: &str, peer: &str, start: Timestamp) -> Activity {
        activity(account, peer, start, ActivityKind::Call { missed: false })
    }

    #[test]
    fn test_one_calendar_per_account() {
        let dir = TempDir::new().unwrap();
        let (model, _) = model(&dir);
        let a = model.calendar_for(&"acc1".into());
        let b = model.calendar_for(&"acc2".into());
        assert_eq!(model.calendar_for(&"acc1".into()).id(), a.id());
        assert_ne!(a.id(), b.id());
        assert_eq!(a.path(), dir.path().join("iCal").join("acc1.ics"));
        assert_eq!(model.calendars().len(), 2);
    }

    #[test]
    fn test_timeline_spans_calendars() {
        let dir = TempDir::new().unwrap();
        let (model, directory) = model(&dir);
        let late = model
            .calendar_for(&"acc1".into())
            .add_activity(&call("acc1", "ring:bob", 300))
            .unwrap();
        let early = model
            .calendar_for(&"acc2".into())
            .add_activity(&call("acc2", "ring:bob", 100))
            .unwrap();
        let chat = model
            .calendar_for(&"acc2".into())
            .add_activity(&activity("acc2", "ring:bob", 200, ActivityKind::MessageGroup))
            .unwrap();

        let bob = ContactDirectory::resolve(directory.as_ref(), "ring:bob", None);
        let all: Vec<_> = model
            .timeline(bob, CategorySet::all())
            .into_iter()
            .map(|(handle, _)| handle)
            .collect();
        assert_eq!(all, vec![early, chat, late]);

        let calls: CategorySet = [EventCategory::Call].into_iter().collect();
        assert_eq!(model.timeline(bob, calls).len(), 2);
    }

    #[test]
    fn test_merge_contacts_moves_timeline() {
        let dir = TempDir::new().unwrap();
        let (model, directory) = model(&dir);
        let calendar = model.calendar_for(&"acc1".into());
        calendar.add_activity(&call("acc1", "ring:bob", 100)).unwrap();
        calendar
            .add_activity(&call("acc1", "sip:bob@example.com", 50))
            .unwrap();

        let bob = ContactDirectory::resolve(directory.as_ref(), "ring:bob", None);
        let alias = ContactDirectory::resolve(directory.as_ref(), "sip:bob@example.com", None);
        assert_eq!(model.merge_contacts(alias, bob), 1);

        let starts: Vec<_> = model
            .timeline(bob, CategorySet::all())
            .iter()
            .map(|(_, event)| event.start())
            .collect();
        assert_eq!(starts, vec![50, 100]);
        assert!(model.timeline(alias, CategorySet::all()).is_empty());
    }

    #[test]
    fn test_merged_contact_events_stay_indexed() {
        let dir = TempDir::new().unwrap();
        let (model, directory) = model(&dir);
        let calendar = model.calendar_for(&"acc1".into());
        let direct = calendar.add_activity(&call("acc1", "ring:bob", 100)).unwrap();
        let aliased = calendar
            .add_activity(&call("acc1", "sip:bob@example.com", 50))
            .unwrap();

        let bob = ContactDirectory::resolve(directory.as_ref(), "ring:bob", None);
        let alias = ContactDirectory::resolve(directory.as_ref(), "sip:bob@example.com", None);
        model.merge_contacts(alias, bob);
        assert_eq!(model.event(aliased).unwrap().attendees()[0].contact, bob);

        calendar.remove_event(aliased).unwrap();
        let index = lock(&model.context().index);
        let chain = index.chain(bob).unwrap();
        assert_eq!(chain.len(), 1);
        assert!(!chain.contains(aliased));
        assert!(chain.contains(direct));
    }

    #[test]
    fn test_import_skips_deleted_accounts() {
        let dir = TempDir::new().unwrap();
        let (model, directory) = model(&dir);
        directory.remove_account(&"acc2".into());

        let report = model.import_history(vec![
            call("acc1", "ring:bob", 100),
            call("acc2", "ring:bob", 200),
            call("acc1", "ring:carol", 300),
        ]);
        assert_eq!(
            report,
            ImportReport {
                imported: 2,
                skipped: 1,
                failed: 0
            }
        );
        assert!(model.calendar(&"acc2".into()).is_none());
        let events = model.calendar_for(&"acc1".into()).unsaved_events();
        assert_eq!(events.len(), 2);
        assert_eq!(
            events[0].sync_state(),
            crate::event::SyncState::Imported
        );
    }

    #[test]
    fn test_removed_account_leaves_timelines() {
        let dir = TempDir::new().unwrap();
        let (model, directory) = model(&dir);
        let handle = model
            .calendar_for(&"acc1".into())
            .add_activity(&call("acc1", "ring:bob", 100))
            .unwrap();
        let uid = model.event(handle).unwrap().uid().to_string();
        assert_eq!(model.find_by_uid(&uid), Some(handle));

        assert!(model.remove_account(&"acc1".into()).is_some());
        let bob = ContactDirectory::resolve(directory.as_ref(), "ring:bob", None);
        assert!(model.timeline(bob, CategorySet::all()).is_empty());
        assert!(model.event(handle).is_none());
        assert!(model.find_by_uid(&uid).is_none());
    }

    #[tokio::test]
    async fn test_flush_then_load_all() {
        let dir = TempDir::new().unwrap();
        {
            let (model, _) = model(&dir);
            model
                .calendar_for(&"acc1".into())
                .add_activity(&call("acc1", "ring:bob", 100))
                .unwrap();
            model
                .calendar_for(&"acc2".into())
                .add_activity(&call("acc2", "ring:bob", 200))
                .unwrap();
            model.flush_all().unwrap();
        }

        let (model, _) = model(&dir);
        model.calendar_for(&"acc1".into());
        model.calendar_for(&"acc2".into());
        let results = model.load_all().await;
        assert_eq!(results.len(), 2);
        for (_, result) in results {
            assert_eq!(result.unwrap().events, 1);
        }
    }
}
