use std::path::Path;

use anyhow::{Context, Result};
use owo_colors::OwoColorize;
use ringcal_core::ics::{ParseOptions, parse_calendar};
use ringcal_core::warnings::WarnOnce;

pub fn run(file: &Path, strict: bool) -> Result<()> {
    let data = std::fs::read(file).with_context(|| format!("Failed to read {}", file.display()))?;
    let warnings = WarnOnce::new();

    let parsed = parse_calendar(&data, &ParseOptions { strict }, &warnings)
        .with_context(|| format!("{} is not a readable calendar", file.display()))?;

    let tombstones = parsed.events.iter().filter(|record| record.tombstone).count();
    let events = parsed.events.len() - tombstones;

    let mark = if parsed.skipped == 0 && parsed.errors == 0 {
        "✓".green().to_string()
    } else {
        "!".yellow().to_string()
    };
    println!("{} {}", mark, file.display());
    if let Some(prodid) = &parsed.prodid {
        println!("   {}", prodid.dimmed());
    }
    println!("   {} events, {} tombstones", events, tombstones);
    if parsed.skipped > 0 {
        println!("   {}", format!("{} broken events dropped", parsed.skipped).yellow());
    }
    if parsed.errors > 0 {
        println!("   {}", format!("{} parse errors recovered", parsed.errors).yellow());
    }

    Ok(())
}
