//! Per-contact event chains.
//!
//! Every contact has a doubly linked list of the events it took part in,
//! across all calendars. Links are event handles, never references: the
//! events stay owned by their calendar.
//!
//! Appends are O(1) and do not keep the chain sorted. Once enough
//! out-of-order appends accumulate (or someone asks for a sorted view), the
//! chain is sorted in place with a linked-list merge sort.

use std::collections::HashMap;

use tracing::debug;

use crate::directory::ContactId;
use crate::event::{CalendarId, EventHandle, Timestamp};

#[derive(Debug, Clone, Copy)]
struct Link {
    prev: Option<EventHandle>,
    next: Option<EventHandle>,
    start: Timestamp,
}

#[derive(Debug, Default)]
pub struct EventChain {
    head: Option<EventHandle>,
    tail: Option<EventHandle>,
    oldest: Option<EventHandle>,
    newest: Option<EventHandle>,
    links: HashMap<EventHandle, Link>,
    /// Out-of-order appends since the last sort
    unsorted: usize,
}

impl EventChain {
    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    pub fn contains(&self, handle: EventHandle) -> bool {
        self.links.contains_key(&handle)
    }

    pub fn oldest(&self) -> Option<EventHandle> {
        self.oldest
    }

    pub fn newest(&self) -> Option<EventHandle> {
        self.newest
    }

    pub fn unsorted(&self) -> usize {
        self.unsorted
    }

    /// Handles in chain order (append order until the next sort).
    pub fn iter(&self) -> impl Iterator<Item = EventHandle> + '_ {
        std::iter::successors(self.head, move |handle| self.next_of(*handle))
    }

    fn next_of(&self, handle: EventHandle) -> Option<EventHandle> {
        self.links.get(&handle).and_then(|link| link.next)
    }

    fn key(&self, handle: EventHandle) -> (Timestamp, EventHandle) {
        let start = self.links.get(&handle).map_or(0, |link| link.start);
        (start, handle)
    }

    fn set_next(&mut self, handle: EventHandle, next: Option<EventHandle>) {
        if let Some(link) = self.links.get_mut(&handle) {
            link.next = next;
        }
    }

    fn set_prev(&mut self, handle: EventHandle, prev: Option<EventHandle>) {
        if let Some(link) = self.links.get_mut(&handle) {
            link.prev = prev;
        }
    }

    /// Add `handle` at the tail. Returns false if it was already linked.
    fn append(&mut self, handle: EventHandle, start: Timestamp) -> bool {
        if self.contains(handle) {
            return false;
        }

        let tail = self.tail;
        if let Some(tail) = tail
            && (start, handle) < self.key(tail)
        {
            self.unsorted += 1;
        }

        self.links.insert(
            handle,
            Link {
                prev: tail,
                next: None,
                start,
            },
        );
        match tail {
            Some(tail) => self.set_next(tail, Some(handle)),
            None => self.head = Some(handle),
        }
        self.tail = Some(handle);

        if self.oldest.is_none_or(|oldest| self.key(handle) < self.key(oldest)) {
            self.oldest = Some(handle);
        }
        if self.newest.is_none_or(|newest| self.key(handle) > self.key(newest)) {
            self.newest = Some(handle);
        }
        true
    }

    fn remove(&mut self, handle: EventHandle) -> bool {
        let Some(link) = self.links.remove(&handle) else {
            return false;
        };
        match link.prev {
            Some(prev) => self.set_next(prev, link.next),
            None => self.head = link.next,
        }
        match link.next {
            Some(next) => self.set_prev(next, link.prev),
            None => self.tail = link.prev,
        }
        if self.oldest == Some(handle) || self.newest == Some(handle) {
            self.refresh_bounds();
        }
        if self.links.is_empty() {
            self.unsorted = 0;
        }
        true
    }

    /// The start of a linked event changed (placeholder resolution).
    fn update_start(&mut self, handle: EventHandle, start: Timestamp) {
        let Some(link) = self.links.get_mut(&handle) else {
            return;
        };
        link.start = start;
        let (prev, next) = (link.prev, link.next);
        let key = self.key(handle);
        let misplaced = prev.is_some_and(|p| self.key(p) > key)
            || next.is_some_and(|n| self.key(n) < key);
        if misplaced {
            self.unsorted += 1;
        }
        self.refresh_bounds();
    }

    fn refresh_bounds(&mut self) {
        self.oldest = self.links.keys().copied().min_by_key(|h| self.key(*h));
        self.newest = self.links.keys().copied().max_by_key(|h| self.key(*h));
    }

    /// Sort the chain by start time (then handle) in place.
    pub fn sort(&mut self) {
        if self.unsorted == 0 {
            return;
        }
        let head = self.merge_sort(self.head);
        self.head = head;

        // Rebuild the back links and the tail
        let mut prev = None;
        let mut cursor = head;
        while let Some(handle) = cursor {
            self.set_prev(handle, prev);
            prev = Some(handle);
            cursor = self.next_of(handle);
        }
        self.tail = prev;
        self.oldest = self.head;
        self.newest = self.tail;
        self.unsorted = 0;
    }

    fn merge_sort(&mut self, head: Option<EventHandle>) -> Option<EventHandle> {
        let first = head?;
        if self.next_of(first).is_none() {
            return Some(first);
        }

        // Split in the middle with a slow and a fast cursor
        let mut slow = first;
        let mut fast = self.next_of(first);
        while let Some(step) = fast {
            fast = self.next_of(step);
            if let Some(step) = fast {
                fast = self.next_of(step);
                slow = self.next_of(slow).unwrap_or(slow);
            }
        }
        let second = self.next_of(slow);
        self.set_next(slow, None);

        let left = self.merge_sort(Some(first));
        let right = self.merge_sort(second);
        self.merge(left, right)
    }

    fn merge(
        &mut self,
        mut left: Option<EventHandle>,
        mut right: Option<EventHandle>,
    ) -> Option<EventHandle> {
        let mut head = None;
        let mut tail: Option<EventHandle> = None;
        loop {
            let picked = match (left, right) {
                (Some(l), Some(r)) => {
                    if self.key(l) <= self.key(r) {
                        left = self.next_of(l);
                        l
                    } else {
                        right = self.next_of(r);
                        r
                    }
                }
                (rest, None) | (None, rest) => {
                    match tail {
                        Some(tail) => self.set_next(tail, rest),
                        None => head = rest,
                    }
                    return head;
                }
            };
            match tail {
                Some(tail) => self.set_next(tail, Some(picked)),
                None => head = Some(picked),
            }
            tail = Some(picked);
        }
    }
}

/// Event chains of every contact.
#[derive(Debug)]
pub struct ContactIndex {
    chains: HashMap<ContactId, EventChain>,
    sort_threshold: usize,
}

impl ContactIndex {
    /// `sort_threshold` is the number of out-of-order appends a chain
    /// tolerates before it is sorted.
    pub fn new(sort_threshold: usize) -> Self {
        ContactIndex {
            chains: HashMap::new(),
            sort_threshold: sort_threshold.max(1),
        }
    }

    pub fn chain(&self, contact: ContactId) -> Option<&EventChain> {
        self.chains.get(&contact)
    }

    pub fn contacts(&self) -> impl Iterator<Item = ContactId> + '_ {
        self.chains.keys().copied()
    }

    pub fn append(&mut self, contact: ContactId, handle: EventHandle, start: Timestamp) {
        let chain = self.chains.entry(contact).or_default();
        if chain.append(handle, start) && chain.unsorted >= self.sort_threshold {
            debug!(%contact, events = chain.len(), "Sorting event chain");
            chain.sort();
        }
    }

    pub fn remove(&mut self, contact: ContactId, handle: EventHandle) -> bool {
        let Some(chain) = self.chains.get_mut(&contact) else {
            return false;
        };
        let removed = chain.remove(handle);
        if chain.is_empty() {
            self.chains.remove(&contact);
        }
        removed
    }

    pub fn update_start(&mut self, contact: ContactId, handle: EventHandle, start: Timestamp) {
        if let Some(chain) = self.chains.get_mut(&contact) {
            chain.update_start(handle, start);
            if chain.unsorted >= self.sort_threshold {
                chain.sort();
            }
        }
    }

    /// Handles of `contact`'s events, oldest first.
    pub fn sorted(&mut self, contact: ContactId) -> Vec<EventHandle> {
        match self.chains.get_mut(&contact) {
            Some(chain) => {
                chain.sort();
                chain.iter().collect()
            }
            None => Vec::new(),
        }
    }

    /// Move every event of `from` into `into`'s chain.
    ///
    /// The whole chain is relinked in one call; `from` no longer exists
    /// afterwards. Returns the number of events moved.
    pub fn merge(&mut self, from: ContactId, into: ContactId) -> usize {
        if from == into {
            return 0;
        }
        let Some(source) = self.chains.remove(&from) else {
            return 0;
        };

        let target = self.chains.entry(into).or_default();
        let mut moved = 0;
        for handle in source.iter() {
            let start = source.key(handle).0;
            if target.append(handle, start) {
                moved += 1;
            }
        }
        target.sort();
        moved
    }

    /// Forget every event of a calendar that is going away.
    pub fn detach_calendar(&mut self, calendar: CalendarId) {
        for chain in self.chains.values_mut() {
            let doomed: Vec<_> = chain.iter().filter(|h| h.calendar == calendar).collect();
            for handle in doomed {
                chain.remove(handle);
            }
        }
        self.chains.retain(|_, chain| !chain.is_empty());
    }
}
