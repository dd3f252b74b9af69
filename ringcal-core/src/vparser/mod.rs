//! Streaming parser for the `BEGIN:`/`END:` object syntax shared by
//! iCalendar and vCard.
//!
//! Three table-driven state machines are stacked on top of a byte cursor:
//! one for parameter lists, one for content lines and one for object
//! nesting. [`VParser`] drives them and yields one [`ParseItem`] per
//! content line.
//!
//! The parser knows nothing about what the objects mean. Interpreting them
//! is the job of the `ics` module.

mod cursor;
mod object;
mod parameters;
mod property;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use cursor::Cursor;
use object::ObjectMachine;
use property::{PropState, PropertyMachine};

/// Parameters of a content line, in file order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameters(Vec<(String, String)>);

impl Parameters {
    /// Case-insensitive lookup of the first parameter called `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.push((name.into(), value.into()));
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Parameters {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Parameters(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// A single unfolded content line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Property {
    /// Upper-cased property name
    pub name: String,
    pub parameters: Parameters,
    /// Raw value, escapes included
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseItem {
    /// An object starts. Carries its upper-cased name.
    Begin(String),
    Property(Property),
    /// An object ends.
    End(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseErrorKind {
    #[error("unexpected {event} in {machine} state {state}")]
    IllegalTransition {
        machine: &'static str,
        state: String,
        event: String,
    },

    #[error("input ends inside {open}")]
    Truncated { open: String },

    #[error("END:{found} does not close {expected:?}")]
    UnbalancedEnd {
        expected: Option<String>,
        found: String,
    },

    #[error("{0} found outside of any object")]
    PropertyOutsideObject(String),

    /// Raised by the ics adapters when a value cannot be interpreted.
    #[error("invalid {property} value: {reason}")]
    InvalidValue { property: String, reason: String },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("at byte {offset}: {kind}")]
pub struct ParseError {
    /// Start of the offending line
    pub offset: usize,
    pub kind: ParseErrorKind,
}

/// Pull parser over a complete input buffer.
///
/// Iteration stops at the first error. Call [`VParser::resync`] to skip the
/// offending line and keep going.
pub struct VParser<'a> {
    cursor: Cursor<'a>,
    property: PropertyMachine,
    object: ObjectMachine,
    line_start: usize,
    /// Set when a line failed half-way and the cursor is still inside it
    mid_line: bool,
    failed: bool,
    finished: bool,
}

impl<'a> VParser<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        VParser {
            cursor: Cursor::new(data),
            property: PropertyMachine::new(),
            object: ObjectMachine::new(),
            line_start: 0,
            mid_line: false,
            failed: false,
            finished: false,
        }
    }

    /// Byte offset of the line that produced the last item.
    pub fn offset(&self) -> usize {
        self.line_start
    }

    /// Number of objects currently open.
    pub fn depth(&self) -> usize {
        self.object.depth()
    }

    /// Recover after an error: drop the rest of the failing line and resume
    /// with the next one.
    pub fn resync(&mut self) {
        if !self.failed {
            return;
        }
        if self.mid_line {
            self.cursor.skip_line();
        }
        self.property.reset();
        self.object.recover();
        self.mid_line = false;
        self.failed = false;
    }

    fn fail(&mut self, kind: ParseErrorKind, mid_line: bool) -> ParseError {
        self.failed = true;
        self.mid_line = mid_line;
        ParseError {
            offset: self.line_start,
            kind,
        }
    }
}

impl Iterator for VParser<'_> {
    type Item = Result<ParseItem, ParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.finished {
            return None;
        }

        loop {
            if self.property.state() == PropState::Empty {
                if self.cursor.at_end() {
                    self.finished = true;
                    return match self.object.finish() {
                        Ok(()) => None,
                        Err(kind) => Some(Err(ParseError {
                            offset: self.cursor.position(),
                            kind,
                        })),
                    };
                }
                self.line_start = self.cursor.position();
            }

            match self.property.step(&mut self.cursor) {
                PropState::Done => {
                    let Some(property) = self.property.take() else {
                        continue;
                    };
                    return Some(match self.object.feed(property) {
                        Ok(item) => Ok(item),
                        Err(kind) => Err(self.fail(kind, false)),
                    });
                }
                PropState::Error => {
                    let kind = self
                        .property
                        .take_failure()
                        .unwrap_or(ParseErrorKind::IllegalTransition {
                            machine: "property",
                            state: "Error".to_string(),
                            event: "Read".to_string(),
                        });
                    return Some(Err(self.fail(kind, true)));
                }
                _ => {}
            }
        }
    }
}
