//! Parameter list state machine.
//!
//! Parses everything between the `;` following a property name and the `:`
//! starting its value:
//!
//! ```text
//!     ATTENDEE;CN="Doe, John";X_RING_ACCOUNTID=abc:ring:1234
//!              \____________________________________/
//!                        parameters
//! ```
//!
//! Quoted values may contain `;`, `:` and `,`. A backslash escapes the next
//! byte, in and out of quotes.

use super::cursor::{Cursor, Window};
use super::Parameters;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamState {
    /// Before a parameter name
    Empty,
    /// Parsing the name
    Name,
    /// Parsing an unquoted value
    Value,
    /// Parsing a value between double quotes
    ValueQuoted,
    /// After a backslash in an unquoted value
    Escaped,
    /// After a backslash in a quoted value
    EscapedQuoted,
    /// The `:` was reached, the property value follows
    Done,
    /// The encoding is corrupted
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamEvent {
    /// Anything not listed below
    Read,
    /// `"`
    Quote,
    /// `=`
    Assign,
    /// `;`
    Split,
    /// `\`
    Skip,
    /// `:`
    Finish,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamAction {
    /// Copy the byte into the token
    Push,
    /// Drop the byte
    Skip,
    /// The token is a parameter name, drop the `=`
    SaveName,
    /// The token is a value, store the pair and drop the delimiter
    SaveValue,
    /// The token is a name without value, store it and drop the delimiter
    SaveFlag,
    Fail,
}

use ParamAction as A;
use ParamState as S;

const EVENT_COUNT: usize = 6;

// Columns:     Read                 Quote                 Assign               Split                Skip                      Finish
const TABLE: [[(ParamState, ParamAction); EVENT_COUNT]; 8] = [
    /* Empty        */ [(S::Name, A::Push),        (S::Error, A::Fail),         (S::Error, A::Fail),         (S::Empty, A::Skip),         (S::Error, A::Fail),             (S::Error, A::Fail)],
    /* Name         */ [(S::Name, A::Push),        (S::Error, A::Fail),         (S::Value, A::SaveName),     (S::Empty, A::SaveFlag),     (S::Error, A::Fail),             (S::Done, A::SaveFlag)],
    /* Value        */ [(S::Value, A::Push),       (S::ValueQuoted, A::Skip),   (S::Value, A::Push),         (S::Empty, A::SaveValue),    (S::Escaped, A::Skip),           (S::Done, A::SaveValue)],
    /* ValueQuoted  */ [(S::ValueQuoted, A::Push), (S::Value, A::Skip),         (S::ValueQuoted, A::Push),   (S::ValueQuoted, A::Push),   (S::EscapedQuoted, A::Skip),     (S::ValueQuoted, A::Push)],
    /* Escaped      */ [(S::Value, A::Push),       (S::Value, A::Push),         (S::Value, A::Push),         (S::Value, A::Push),         (S::Value, A::Push),             (S::Value, A::Push)],
    /* EscapedQuoted*/ [(S::ValueQuoted, A::Push), (S::ValueQuoted, A::Push),   (S::ValueQuoted, A::Push),   (S::ValueQuoted, A::Push),   (S::ValueQuoted, A::Push),       (S::ValueQuoted, A::Push)],
    /* Done         */ [(S::Error, A::Fail),       (S::Error, A::Fail),         (S::Error, A::Fail),         (S::Error, A::Fail),         (S::Error, A::Fail),             (S::Error, A::Fail)],
    /* Error        */ [(S::Error, A::Fail),       (S::Error, A::Fail),         (S::Error, A::Fail),         (S::Error, A::Fail),         (S::Error, A::Fail),             (S::Error, A::Fail)],
];

pub fn transition(state: ParamState, event: ParamEvent) -> (ParamState, ParamAction) {
    TABLE[state as usize][event as usize]
}

pub fn classify(window: Window) -> ParamEvent {
    match window[1] {
        b'"' => ParamEvent::Quote,
        b'=' => ParamEvent::Assign,
        b';' => ParamEvent::Split,
        b'\\' => ParamEvent::Skip,
        b':' => ParamEvent::Finish,
        _ => ParamEvent::Read,
    }
}

pub(crate) struct ParameterMachine {
    state: ParamState,
    name: String,
    parameters: Parameters,
    last_event: ParamEvent,
}

impl ParameterMachine {
    pub fn new() -> Self {
        ParameterMachine {
            state: ParamState::Empty,
            name: String::new(),
            parameters: Parameters::default(),
            last_event: ParamEvent::Read,
        }
    }

    pub fn state(&self) -> ParamState {
        self.state
    }

    pub fn last_event(&self) -> ParamEvent {
        self.last_event
    }

    /// Consume the byte under the cursor.
    pub fn apply(&mut self, cursor: &mut Cursor) -> ParamState {
        let event = classify(cursor.window());
        let (next, action) = transition(self.state, event);
        self.last_event = event;

        match action {
            A::Push => cursor.push(1),
            A::Skip => cursor.skip(1),
            A::SaveName => {
                self.name = token(cursor).to_ascii_uppercase();
                cursor.skip(1);
            }
            A::SaveValue => {
                let value = token(cursor);
                let name = std::mem::take(&mut self.name);
                self.parameters.push(name, value);
                cursor.skip(1);
            }
            A::SaveFlag => {
                let name = token(cursor).to_ascii_uppercase();
                self.parameters.push(name, String::new());
                cursor.skip(1);
            }
            A::Fail => {}
        }

        self.state = next;
        next
    }

    pub fn take(&mut self) -> Parameters {
        std::mem::take(&mut self.parameters)
    }
}

fn token(cursor: &mut Cursor) -> String {
    String::from_utf8_lossy(&cursor.flush()).into_owned()
}
