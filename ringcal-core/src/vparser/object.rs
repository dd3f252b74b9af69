//! Object nesting state machine.
//!
//! Turns the flat stream of properties into `BEGIN` / property / `END`
//! items and keeps track of the open objects.

use super::{ParseErrorKind, ParseItem, Property};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjState {
    /// Nothing read yet
    Empty,
    /// Right after a `BEGIN`
    Header,
    Properties,
    /// Right after a nested object was closed
    Footer,
    /// Every object is closed
    Done,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjEvent {
    Begin,
    /// `END` of a nested object
    End,
    /// `END` of the outermost object
    Finish,
    Property,
    Eof,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ObjAction {
    Open,
    Close,
    Emit,
    Nothing,
    Fail,
}

use ObjAction as A;
use ObjState as S;

// Columns: Begin, End, Finish, Property, Eof
const TABLE: [[(ObjState, ObjAction); 5]; 6] = [
    /* Empty      */ [(S::Header, A::Open), (S::Error, A::Fail), (S::Error, A::Fail), (S::Error, A::Fail), (S::Done, A::Nothing)],
    /* Header     */ [(S::Header, A::Open), (S::Footer, A::Close), (S::Done, A::Close), (S::Properties, A::Emit), (S::Error, A::Fail)],
    /* Properties */ [(S::Header, A::Open), (S::Footer, A::Close), (S::Done, A::Close), (S::Properties, A::Emit), (S::Error, A::Fail)],
    /* Footer     */ [(S::Header, A::Open), (S::Footer, A::Close), (S::Done, A::Close), (S::Properties, A::Emit), (S::Error, A::Fail)],
    /* Done       */ [(S::Header, A::Open), (S::Error, A::Fail), (S::Error, A::Fail), (S::Error, A::Fail), (S::Done, A::Nothing)],
    /* Error      */ [(S::Error, A::Fail), (S::Error, A::Fail), (S::Error, A::Fail), (S::Error, A::Fail), (S::Error, A::Fail)],
];

pub(crate) struct ObjectMachine {
    state: ObjState,
    stack: Vec<String>,
    /// Name carried by a mismatched `END`, used to recover
    stray_end: Option<String>,
}

impl ObjectMachine {
    pub fn new() -> Self {
        ObjectMachine {
            state: ObjState::Empty,
            stack: Vec::new(),
            stray_end: None,
        }
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    fn classify(&self, property: &Property) -> ObjEvent {
        match property.name.as_str() {
            "BEGIN" => ObjEvent::Begin,
            "END" if self.stack.len() == 1 => ObjEvent::Finish,
            "END" => ObjEvent::End,
            _ => ObjEvent::Property,
        }
    }

    pub fn feed(&mut self, property: Property) -> Result<ParseItem, ParseErrorKind> {
        let event = self.classify(&property);
        let (next, action) = TABLE[self.state as usize][event as usize];

        let item = match action {
            A::Open => {
                let name = object_name(&property);
                self.stack.push(name.clone());
                Ok(ParseItem::Begin(name))
            }
            A::Close => {
                let name = object_name(&property);
                match self.stack.last() {
                    Some(open) if *open == name => {
                        self.stack.pop();
                        Ok(ParseItem::End(name))
                    }
                    open => {
                        let expected = open.cloned();
                        self.stray_end = Some(name.clone());
                        Err(ParseErrorKind::UnbalancedEnd {
                            expected,
                            found: name,
                        })
                    }
                }
            }
            A::Emit => Ok(ParseItem::Property(property)),
            A::Nothing | A::Fail => Err(match event {
                ObjEvent::Property => ParseErrorKind::PropertyOutsideObject(property.name),
                ObjEvent::End | ObjEvent::Finish => {
                    let found = object_name(&property);
                    self.stray_end = Some(found.clone());
                    ParseErrorKind::UnbalancedEnd {
                        expected: self.stack.last().cloned(),
                        found,
                    }
                }
                _ => ParseErrorKind::IllegalTransition {
                    machine: "object",
                    state: format!("{:?}", self.state),
                    event: format!("{event:?}"),
                },
            }),
        };

        self.state = if item.is_ok() { next } else { ObjState::Error };
        item
    }

    /// The input is exhausted.
    pub fn finish(&mut self) -> Result<(), ParseErrorKind> {
        let (next, action) = TABLE[self.state as usize][ObjEvent::Eof as usize];
        self.state = next;
        match action {
            A::Nothing => Ok(()),
            _ => Err(ParseErrorKind::Truncated {
                open: self.stack.join("/"),
            }),
        }
    }

    /// Leave the error state after a failure was reported.
    ///
    /// A stray `END` naming one of the open objects closes everything up to
    /// and including that object. Any other stray `END` closes the innermost
    /// object, unless that object is the root.
    pub fn recover(&mut self) {
        if let Some(found) = self.stray_end.take() {
            match self.stack.iter().rposition(|open| *open == found) {
                Some(index) => self.stack.truncate(index),
                None if self.stack.len() > 1 => {
                    self.stack.pop();
                }
                None => {}
            }
        }
        self.state = if self.stack.is_empty() {
            ObjState::Done
        } else {
            ObjState::Properties
        };
    }
}

fn object_name(property: &Property) -> String {
    property.value.trim().to_ascii_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vparser::Parameters;

    fn prop(name: &str, value: &str) -> Property {
        Property {
            name: name.to_string(),
            parameters: Parameters::default(),
            value: value.to_string(),
        }
    }

    #[test]
    fn test_nesting() {
        let mut machine = ObjectMachine::new();
        assert_eq!(
            machine.feed(prop("BEGIN", "vcalendar")).unwrap(),
            ParseItem::Begin("VCALENDAR".into())
        );
        machine.feed(prop("VERSION", "2.0")).unwrap();
        machine.feed(prop("BEGIN", "VEVENT")).unwrap();
        assert_eq!(machine.depth(), 2);
        assert_eq!(
            machine.feed(prop("END", "VEVENT")).unwrap(),
            ParseItem::End("VEVENT".into())
        );
        machine.feed(prop("END", "VCALENDAR")).unwrap();
        assert_eq!(machine.depth(), 0);
        assert!(machine.finish().is_ok());
    }

    #[test]
    fn test_property_outside_object() {
        let mut machine = ObjectMachine::new();
        assert!(matches!(
            machine.feed(prop("VERSION", "2.0")),
            Err(ParseErrorKind::PropertyOutsideObject(_))
        ));
    }

    #[test]
    fn test_mismatched_end_recovers_to_named_object() {
        let mut machine = ObjectMachine::new();
        machine.feed(prop("BEGIN", "VCALENDAR")).unwrap();
        machine.feed(prop("BEGIN", "VEVENT")).unwrap();
        machine.feed(prop("BEGIN", "VALARM")).unwrap();
        let error = machine.feed(prop("END", "VEVENT")).unwrap_err();
        assert_eq!(
            error,
            ParseErrorKind::UnbalancedEnd {
                expected: Some("VALARM".into()),
                found: "VEVENT".into()
            }
        );
        machine.recover();
        assert_eq!(machine.depth(), 1);
        machine.feed(prop("END", "VCALENDAR")).unwrap();
        assert!(machine.finish().is_ok());
    }

    #[test]
    fn test_unknown_end_closes_innermost_but_not_root() {
        let mut machine = ObjectMachine::new();
        machine.feed(prop("BEGIN", "VCALENDAR")).unwrap();
        machine.feed(prop("BEGIN", "VEVENT")).unwrap();
        assert!(machine.feed(prop("END", "VTODO")).is_err());
        machine.recover();
        assert_eq!(machine.depth(), 1);

        assert!(machine.feed(prop("END", "VTODO")).is_err());
        machine.recover();
        assert_eq!(machine.depth(), 1);
    }

    #[test]
    fn test_eof_inside_object_is_truncated() {
        let mut machine = ObjectMachine::new();
        machine.feed(prop("BEGIN", "VCALENDAR")).unwrap();
        machine.feed(prop("BEGIN", "VEVENT")).unwrap();
        assert_eq!(
            machine.finish(),
            Err(ParseErrorKind::Truncated {
                open: "VCALENDAR/VEVENT".into()
            })
        );
    }

    #[test]
    fn test_several_roots() {
        let mut machine = ObjectMachine::new();
        machine.feed(prop("BEGIN", "VCALENDAR")).unwrap();
        machine.feed(prop("END", "VCALENDAR")).unwrap();
        machine.feed(prop("BEGIN", "VCALENDAR")).unwrap();
        machine.feed(prop("END", "VCALENDAR")).unwrap();
        assert!(machine.finish().is_ok());
    }
}
