use anyhow::Result;
use chrono::{DateTime, Local};
use owo_colors::OwoColorize;
use ringcal_core::{AccountId, CategorySet, ContactDirectory, Event, RingcalConfig, Timestamp};

use crate::render::Render;

pub async fn run(config: &RingcalConfig, account: &AccountId, peer: Option<&str>, json: bool) -> Result<()> {
    let (model, calendar, directory) = super::open(config, account).await?;

    let events: Vec<Event> = match peer {
        Some(uri) => {
            let contact = directory.as_ref().resolve(uri, Some(account));
            model
                .timeline(contact, CategorySet::all())
                .into_iter()
                .map(|(_, event)| event)
                .collect()
        }
        None => calendar.events().into_iter().map(|(_, event)| event).collect(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&events)?);
        return Ok(());
    }

    if events.is_empty() {
        println!("{}", "No events found".dimmed());
        return Ok(());
    }

    // Group events by day
    let mut current_date: Option<String> = None;
    for event in &events {
        let date_label = format_date_label(event.start());
        if current_date.as_ref() != Some(&date_label) {
            if current_date.is_some() {
                println!();
            }
            println!("{}", date_label.bold());
            current_date = Some(date_label);
        }
        println!("  {}", event.render());
    }

    Ok(())
}

/// "Today", "Yesterday", or e.g. "Wed Feb 25 2026"
fn format_date_label(start: Timestamp) -> String {
    let Some(utc) = DateTime::from_timestamp(start, 0) else {
        return "Unknown date".to_string();
    };
    let date = utc.with_timezone(&Local).date_naive();
    let today = Local::now().date_naive();

    match (today - date).num_days() {
        0 => "Today".to_string(),
        1 => "Yesterday".to_string(),
        _ => date.format("%a %b %-d %Y").to_string(),
    }
}
