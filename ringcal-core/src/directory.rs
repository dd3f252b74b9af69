//! Collaborators the calendars depend on but do not own.
//!
//! Contacts, recordings and accounts live elsewhere in the application. The
//! calendars only need to map what the file says (URIs, paths, account ids)
//! to identities, through the traits below. [`MemoryDirectory`] implements
//! all three in memory.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};

use crate::event::Attachment;

/// Identity of a contact (a person or a conversation partner).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContactId(pub u64);

impl fmt::Display for ContactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "contact#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AccountId(pub String);

impl AccountId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AccountId {
    fn from(id: &str) -> Self {
        AccountId(id.to_string())
    }
}

impl From<String> for AccountId {
    fn from(id: String) -> Self {
        AccountId(id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub display_name: String,
    /// The account's own URI, written as the ORGANIZER of its events
    pub uri: String,
}

/// Maps contact URIs to identities.
pub trait ContactDirectory: Send + Sync {
    /// Identity behind `uri`. Unknown URIs get a new identity, so calling
    /// this twice with the same arguments returns the same contact.
    ///
    /// `hint` is the account the URI was seen from, if the file said so.
    fn resolve(&self, uri: &str, hint: Option<&AccountId>) -> ContactId;
}

/// Maps attachment paths to files the application knows about.
pub trait AttachmentStore: Send + Sync {
    fn resolve(&self, uri: &str, mime: Option<&str>, role: Option<&str>) -> Option<Attachment>;
}

pub trait AccountRegistry: Send + Sync {
    fn by_id(&self, id: &AccountId) -> Option<Account>;
}

/// The collaborators shared by every calendar of a model.
#[derive(Clone)]
pub struct Collaborators {
    pub contacts: std::sync::Arc<dyn ContactDirectory>,
    pub attachments: std::sync::Arc<dyn AttachmentStore>,
    pub accounts: std::sync::Arc<dyn AccountRegistry>,
}

impl Collaborators {
    /// All three roles served by the same in-memory directory.
    pub fn in_memory(directory: std::sync::Arc<MemoryDirectory>) -> Self {
        Collaborators {
            contacts: directory.clone(),
            attachments: directory.clone(),
            accounts: directory,
        }
    }
}

#[derive(Default)]
struct DirectoryState {
    contacts: HashMap<String, ContactId>,
    next_contact: u64,
    accounts: HashMap<AccountId, Account>,
    /// When set, only these attachment paths resolve
    known_files: Option<HashMap<String, Attachment>>,
}

/// In-memory implementation of every collaborator trait.
#[derive(Default)]
pub struct MemoryDirectory {
    state: Mutex<DirectoryState>,
}

fn normalize_uri(uri: &str) -> String {
    uri.trim().to_ascii_lowercase()
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, DirectoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add_account(&self, account: Account) {
        self.lock().accounts.insert(account.id.clone(), account);
    }

    pub fn remove_account(&self, id: &AccountId) -> Option<Account> {
        self.lock().accounts.remove(id)
    }

    /// Make `uri` resolve to an existing contact (e.g. after two contacts
    /// were found to be the same person).
    pub fn link(&self, uri: &str, contact: ContactId) {
        self.lock().contacts.insert(normalize_uri(uri), contact);
    }

    /// Restrict attachment resolution to registered files.
    pub fn register_file(&self, attachment: Attachment) {
        let mut state = self.lock();
        state
            .known_files
            .get_or_insert_with(HashMap::new)
            .insert(attachment.uri.clone(), attachment);
    }

    pub fn contact_count(&self) -> usize {
        let state = self.lock();
        let mut ids: Vec<_> = state.contacts.values().collect();
        ids.sort();
        ids.dedup();
        ids.len()
    }
}

impl ContactDirectory for MemoryDirectory {
    fn resolve(&self, uri: &str, _hint: Option<&AccountId>) -> ContactId {
        let mut state = self.lock();
        let key = normalize_uri(uri);
        if let Some(id) = state.contacts.get(&key) {
            return *id;
        }
        state.next_contact += 1;
        let id = ContactId(state.next_contact);
        state.contacts.insert(key, id);
        id
    }
}

impl AttachmentStore for MemoryDirectory {
    fn resolve(&self, uri: &str, mime: Option<&str>, role: Option<&str>) -> Option<Attachment> {
        if uri.trim().is_empty() {
            return None;
        }
        let state = self.lock();
        match &state.known_files {
            Some(files) => files.get(uri).cloned(),
            None => Some(Attachment {
                uri: uri.to_string(),
                mime: mime.map(str::to_string),
                role: role.map(str::to_string),
            }),
        }
    }
}

impl AccountRegistry for MemoryDirectory {
    fn by_id(&self, id: &AccountId) -> Option<Account> {
        self.lock().accounts.get(id).cloned()
    }
}
