//! Error types for ringcal.

use thiserror::Error;

use crate::directory::AccountId;
use crate::event::{EditAction, SyncState};
use crate::vparser::ParseError;

/// Errors that can occur while loading, mutating or saving calendars.
#[derive(Error, Debug)]
pub enum CalError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("ICS parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Cannot {action} an event in the {state} state")]
    IllegalTransition { state: SyncState, action: EditAction },

    #[error("Unknown event: {0}")]
    UnknownEvent(String),

    #[error("Event belongs to account {found}, not {expected}")]
    WrongAccount { expected: AccountId, found: AccountId },

    #[error("Calendar {0} must be loaded first")]
    NotLoaded(AccountId),

    #[error("Calendar file is corrupted: {0}")]
    CorruptFile(String),

    #[error("Background task failed: {0}")]
    Task(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for ringcal operations.
pub type CalResult<T> = Result<T, CalError>;
