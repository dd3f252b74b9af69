//! Calendar file loading.

use tracing::{debug, warn};

use super::adapter::{IcsAdapters, StagedObject};
use super::record::{CalendarRecord, EventRecord};
use crate::vparser::{ParseError, ParseErrorKind, ParseItem, VParser};
use crate::warnings::WarnOnce;

#[derive(Debug, Clone, Copy, Default)]
pub struct ParseOptions {
    /// Abort on the first error instead of skipping the broken object.
    pub strict: bool,
}

/// Everything read from one calendar file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedCalendar {
    pub version: Option<String>,
    pub prodid: Option<String>,
    /// Events in file order
    pub events: Vec<EventRecord>,
    /// Broken events that were dropped
    pub skipped: usize,
    /// Parse errors that were recovered from
    pub errors: usize,
}

impl ParsedCalendar {
    fn absorb(&mut self, calendar: CalendarRecord) {
        if self.version.is_none() {
            self.version = calendar.version;
        }
        if self.prodid.is_none() {
            self.prodid = calendar.prodid;
        }
        self.events.extend(calendar.events);
    }
}

struct Frame {
    object: StagedObject,
    /// Something inside this object could not be read
    poisoned: bool,
}

struct Loader<'w> {
    adapters: IcsAdapters,
    warnings: &'w WarnOnce,
    stack: Vec<Frame>,
    out: ParsedCalendar,
}

impl Loader<'_> {
    fn close(&mut self, frame: Frame) {
        if frame.poisoned {
            if matches!(frame.object, StagedObject::Event(_)) {
                self.out.skipped += 1;
            }
            debug!(object = frame.object.name(), "Dropping broken object");
            return;
        }
        match self.stack.last_mut() {
            Some(parent) if parent.poisoned => {}
            Some(parent) => self.adapters.close(&mut parent.object, frame.object),
            None => match frame.object {
                StagedObject::Calendar(calendar) => self.out.absorb(calendar),
                StagedObject::Event(event) => self.out.events.push(event),
                StagedObject::Opaque(name) => debug!(object = %name, "Dropping root object"),
            },
        }
    }

    /// Drop the frames the parser closed while recovering.
    fn unwind_to(&mut self, depth: usize) {
        while self.stack.len() > depth {
            if let Some(frame) = self.stack.pop() {
                self.close(frame);
            }
        }
    }

    fn poison_top(&mut self) {
        if let Some(frame) = self.stack.last_mut()
            && !matches!(frame.object, StagedObject::Calendar(_))
        {
            frame.poisoned = true;
        }
    }
}

/// Parse a calendar file.
///
/// In lenient mode a broken event is dropped (up to its `END`), a broken
/// line directly inside the calendar is skipped, and a truncated file keeps
/// every object completed before the cut.
pub fn parse_calendar(
    data: &[u8],
    options: &ParseOptions,
    warnings: &WarnOnce,
) -> Result<ParsedCalendar, ParseError> {
    let mut parser = VParser::new(data);
    let mut loader = Loader {
        adapters: IcsAdapters::standard(),
        warnings,
        stack: Vec::new(),
        out: ParsedCalendar::default(),
    };

    loop {
        let Some(item) = parser.next() else {
            break;
        };
        let error = match item {
            Ok(ParseItem::Begin(name)) => {
                let object = loader.adapters.begin(&name);
                loader.stack.push(Frame {
                    object,
                    poisoned: false,
                });
                continue;
            }
            Ok(ParseItem::End(_)) => {
                if let Some(frame) = loader.stack.pop() {
                    loader.close(frame);
                }
                continue;
            }
            Ok(ParseItem::Property(property)) => {
                let Some(frame) = loader.stack.last_mut() else {
                    continue;
                };
                if frame.poisoned {
                    continue;
                }
                match loader
                    .adapters
                    .property(&mut frame.object, property, loader.warnings)
                {
                    Ok(()) => continue,
                    Err(kind) => ParseError {
                        offset: parser.offset(),
                        kind,
                    },
                }
            }
            Err(error) => error,
        };

        if options.strict {
            return Err(error);
        }
        loader.out.errors += 1;
        warn!(%error, "Skipping unreadable calendar content");

        if matches!(error.kind, ParseErrorKind::Truncated { .. }) {
            break;
        }
        loader.poison_top();
        parser.resync();
        loader.unwind_to(parser.depth());
    }

    // Whatever is still open was cut by the end of the file
    while let Some(mut frame) = loader.stack.pop() {
        if !matches!(frame.object, StagedObject::Calendar(_)) {
            frame.poisoned = true;
        }
        loader.close(frame);
    }

    Ok(loader.out)
}
