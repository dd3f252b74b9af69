//! Colored terminal rendering for ringcal-core types.

use chrono::{DateTime, Local};
use owo_colors::OwoColorize;
use ringcal_core::{Direction, Event, EventCategory, EventStatus, GcCounters};

pub trait Render {
    fn render(&self) -> String;
}

impl Render for Direction {
    fn render(&self) -> String {
        match self {
            Direction::Incoming => "←".cyan().to_string(),
            Direction::Outgoing => "→".green().to_string(),
        }
    }
}

impl Render for Event {
    fn render(&self) -> String {
        let time = DateTime::from_timestamp(self.start(), 0)
            .map(|utc| utc.with_timezone(&Local).format("%H:%M").to_string())
            .unwrap_or_else(|| "--:--".to_string());

        let category = match self.category() {
            EventCategory::Call => "call",
            EventCategory::DataTransfer => "file",
            EventCategory::MessageGroup => "chat",
            EventCategory::Other => "other",
        };

        let peers: Vec<&str> = self
            .attendees()
            .iter()
            .map(|attendee| {
                if attendee.name.is_empty() {
                    attendee.uri.as_str()
                } else {
                    attendee.name.as_str()
                }
            })
            .collect();

        let detail = match self.status() {
            EventStatus::Missed => "missed".red().to_string(),
            EventStatus::InProcess => "ongoing".yellow().to_string(),
            EventStatus::Cancelled => "cancelled".dimmed().to_string(),
            _ => self.length().dimmed().to_string(),
        };

        format!(
            "{:>7} {} {:<5} {} {}",
            time,
            self.direction().render(),
            category,
            peers.join(", "),
            detail
        )
    }
}

impl Render for GcCounters {
    fn render(&self) -> String {
        let text = format!(
            "garbage     {} duplicates, {} unsorted, {} removed (score {})",
            self.duplicates,
            self.unsorted,
            self.removed,
            self.score()
        );
        if self.score() == 0 {
            text.dimmed().to_string()
        } else {
            text
        }
    }
}
