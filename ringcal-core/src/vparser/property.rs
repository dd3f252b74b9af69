//! Content line state machine.
//!
//! A content line is `NAME[;PARAMETERS]:VALUE` terminated by a line break.
//! Folded lines are unfolded on the fly and the parameter list is handed to
//! the [`ParameterMachine`] byte by byte.

use super::cursor::{line_break, Cursor, LineBreak};
use super::parameters::{ParamState, ParameterMachine};
use super::{ParseErrorKind, Property};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropState {
    /// At the start of a line
    Empty,
    Name,
    /// The parameter machine owns the input
    Parameters,
    Value,
    /// A fold was dropped inside the parameters
    LineBreakParams,
    /// A fold was dropped inside the value
    LineBreakValue,
    /// A complete property is ready
    Done,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropEvent {
    Read,
    /// `;`
    SplitParam,
    /// `:`
    Split,
    /// Line break followed by whitespace
    LineBreak,
    /// Line break or end of input
    EndOfLine,
    /// The parameter machine reached its final state
    ParamsDone,
    /// The parameter machine failed
    ParamError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PropAction {
    Push,
    /// Drop the line break under the cursor
    SkipBreak,
    /// Store the name and drop the delimiter
    SaveName,
    /// Store the value and drop the line terminator
    SaveValue,
    Delegate,
    Nothing,
    Fail,
}

use PropAction as A;
use PropState as S;

const FAIL: (PropState, PropAction) = (S::Error, A::Fail);

// Columns: Read, SplitParam, Split, LineBreak, EndOfLine, ParamsDone, ParamError
const TABLE: [[(PropState, PropAction); 7]; 8] = [
    /* Empty           */
    [
        (S::Name, A::Push),
        FAIL,
        FAIL,
        (S::Empty, A::SkipBreak),
        (S::Empty, A::SkipBreak),
        FAIL,
        FAIL,
    ],
    /* Name            */
    [
        (S::Name, A::Push),
        (S::Parameters, A::SaveName),
        (S::Value, A::SaveName),
        (S::Name, A::SkipBreak),
        FAIL,
        FAIL,
        FAIL,
    ],
    /* Parameters      */
    [
        (S::Parameters, A::Delegate),
        (S::Parameters, A::Delegate),
        (S::Parameters, A::Delegate),
        (S::LineBreakParams, A::SkipBreak),
        FAIL,
        (S::Value, A::Nothing),
        FAIL,
    ],
    /* Value           */
    [
        (S::Value, A::Push),
        (S::Value, A::Push),
        (S::Value, A::Push),
        (S::LineBreakValue, A::SkipBreak),
        (S::Done, A::SaveValue),
        FAIL,
        FAIL,
    ],
    /* LineBreakParams */
    [
        (S::Parameters, A::Delegate),
        (S::Parameters, A::Delegate),
        (S::Parameters, A::Delegate),
        (S::LineBreakParams, A::SkipBreak),
        FAIL,
        (S::Value, A::Nothing),
        FAIL,
    ],
    /* LineBreakValue  */
    [
        (S::Value, A::Push),
        (S::Value, A::Push),
        (S::Value, A::Push),
        (S::LineBreakValue, A::SkipBreak),
        (S::Done, A::SaveValue),
        FAIL,
        FAIL,
    ],
    /* Done            */
    [FAIL, FAIL, FAIL, FAIL, FAIL, FAIL, FAIL],
    /* Error           */
    [FAIL, FAIL, FAIL, FAIL, FAIL, FAIL, FAIL],
];

fn transition(state: PropState, event: PropEvent) -> (PropState, PropAction) {
    TABLE[state as usize][event as usize]
}

pub(crate) struct PropertyMachine {
    state: PropState,
    parameters: ParameterMachine,
    name: String,
    ready: Option<Property>,
    failure: Option<ParseErrorKind>,
}

impl PropertyMachine {
    pub fn new() -> Self {
        PropertyMachine {
            state: PropState::Empty,
            parameters: ParameterMachine::new(),
            name: String::new(),
            ready: None,
            failure: None,
        }
    }

    pub fn state(&self) -> PropState {
        self.state
    }

    fn classify(&self, cursor: &Cursor) -> (PropEvent, usize) {
        if matches!(self.state, S::Parameters | S::LineBreakParams) {
            match self.parameters.state() {
                ParamState::Done => return (PropEvent::ParamsDone, 0),
                ParamState::Error => return (PropEvent::ParamError, 0),
                _ => {}
            }
        }
        if cursor.at_end() {
            return (PropEvent::EndOfLine, 0);
        }

        let [_, current, next, after] = cursor.window();
        match line_break(current, next, after) {
            LineBreak::Fold(width) => (PropEvent::LineBreak, width),
            LineBreak::End(width) => (PropEvent::EndOfLine, width),
            LineBreak::None => match current {
                b';' => (PropEvent::SplitParam, 1),
                b':' => (PropEvent::Split, 1),
                _ => (PropEvent::Read, 1),
            },
        }
    }

    /// Advance by one event. Returns the new state.
    pub fn step(&mut self, cursor: &mut Cursor) -> PropState {
        let (event, width) = self.classify(cursor);
        let (next, action) = transition(self.state, event);

        match action {
            A::Push => cursor.push(1),
            A::SkipBreak => cursor.skip(width),
            A::SaveName => {
                self.name = String::from_utf8_lossy(&cursor.flush()).to_ascii_uppercase();
                cursor.skip(1);
            }
            A::SaveValue => {
                let value = String::from_utf8_lossy(&cursor.flush()).into_owned();
                cursor.skip(width);
                self.ready = Some(Property {
                    name: std::mem::take(&mut self.name),
                    parameters: self.parameters.take(),
                    value,
                });
            }
            A::Delegate => {
                self.parameters.apply(cursor);
            }
            A::Nothing => {}
            A::Fail => {
                self.failure = Some(if event == PropEvent::ParamError {
                    ParseErrorKind::IllegalTransition {
                        machine: "parameter",
                        state: format!("{:?}", self.parameters.state()),
                        event: format!("{:?}", self.parameters.last_event()),
                    }
                } else {
                    ParseErrorKind::IllegalTransition {
                        machine: "property",
                        state: format!("{:?}", self.state),
                        event: format!("{event:?}"),
                    }
                });
            }
        }

        self.state = next;
        next
    }

    /// Take the completed property and get ready for the next line.
    pub fn take(&mut self) -> Option<Property> {
        let property = self.ready.take();
        self.reset();
        property
    }

    pub fn take_failure(&mut self) -> Option<ParseErrorKind> {
        self.failure.take()
    }

    pub fn reset(&mut self) {
        self.state = PropState::Empty;
        self.parameters = ParameterMachine::new();
        self.name.clear();
        self.ready = None;
        self.failure = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_line(input: &str) -> Result<Property, ParseErrorKind> {
        let mut cursor = Cursor::new(input.as_bytes());
        let mut machine = PropertyMachine::new();
        loop {
            match machine.step(&mut cursor) {
                PropState::Done => return Ok(machine.take().unwrap()),
                PropState::Error => return Err(machine.take_failure().unwrap()),
                _ => {}
            }
        }
    }

    #[test]
    fn test_line_break_states_mirror_their_base_state() {
        let events = [
            PropEvent::Read,
            PropEvent::SplitParam,
            PropEvent::Split,
            PropEvent::LineBreak,
            PropEvent::EndOfLine,
            PropEvent::ParamsDone,
            PropEvent::ParamError,
        ];
        for event in events {
            assert_eq!(
                transition(S::LineBreakParams, event),
                transition(S::Parameters, event)
            );
            assert_eq!(
                transition(S::LineBreakValue, event),
                transition(S::Value, event)
            );
        }
        assert_eq!(transition(S::Name, PropEvent::EndOfLine), FAIL);
        assert_eq!(
            transition(S::Empty, PropEvent::EndOfLine),
            (S::Empty, A::SkipBreak)
        );
        assert_eq!(transition(S::Done, PropEvent::Read), FAIL);
    }

    #[test]
    fn test_plain_property() {
        let property = parse_line("summary:Hello world\r\n").unwrap();
        assert_eq!(property.name, "SUMMARY");
        assert_eq!(property.value, "Hello world");
        assert!(property.parameters.is_empty());
    }

    #[test]
    fn test_value_may_contain_delimiters() {
        let property = parse_line("ORGANIZER:ring:abc;x=y:z\n").unwrap();
        assert_eq!(property.value, "ring:abc;x=y:z");
    }

    #[test]
    fn test_parameters_are_delegated() {
        let property =
            parse_line("ATTENDEE;CN=\"Doe; Jane\";UID=7:ring:0123\r\n").unwrap();
        assert_eq!(property.name, "ATTENDEE");
        assert_eq!(property.parameters.get("CN"), Some("Doe; Jane"));
        assert_eq!(property.parameters.get("UID"), Some("7"));
        assert_eq!(property.value, "ring:0123");
    }

    #[test]
    fn test_folds_are_removed_everywhere() {
        let property = parse_line("DESC\r\n RIPTION;CN=a\r\n\tb:long\r\n  value\r\n").unwrap();
        assert_eq!(property.name, "DESCRIPTION");
        assert_eq!(property.parameters.get("CN"), Some("ab"));
        assert_eq!(property.value, "long value");
    }

    #[test]
    fn test_end_of_input_terminates_value() {
        let property = parse_line("END:VCALENDAR").unwrap();
        assert_eq!(property.value, "VCALENDAR");
    }

    #[test]
    fn test_blank_lines_are_skipped() {
        let property = parse_line("\r\n\r\nVERSION:2.0\r\n").unwrap();
        assert_eq!(property.name, "VERSION");
    }

    #[test]
    fn test_name_without_value_fails() {
        let error = parse_line("BROKEN\r\nNEXT:1\r\n").unwrap_err();
        assert!(matches!(
            error,
            ParseErrorKind::IllegalTransition { machine: "property", .. }
        ));
    }

    #[test]
    fn test_broken_parameters_fail() {
        let error = parse_line("X;\"bad=1:v\r\n").unwrap_err();
        assert!(matches!(
            error,
            ParseErrorKind::IllegalTransition { machine: "parameter", .. }
        ));
    }

    #[test]
    fn test_unterminated_parameters_fail() {
        let error = parse_line("X;CN=\"open:v\r\n").unwrap_err();
        assert!(matches!(
            error,
            ParseErrorKind::IllegalTransition { machine: "property", .. }
        ));
    }
}
