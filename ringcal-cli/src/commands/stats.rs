use anyhow::Result;
use owo_colors::OwoColorize;
use ringcal_core::{AccountId, RingcalConfig};

use crate::render::Render;

pub async fn run(config: &RingcalConfig, account: &AccountId) -> Result<()> {
    let (_model, calendar, _) = super::open(config, account).await?;
    let report = calendar.load_report().unwrap_or_default();
    let gc = calendar.gc_counters();

    println!("{} {}", account.to_string().bold(), calendar.path().display().dimmed());
    println!("   events      {}", report.events);
    println!("   tombstones  {}", report.tombstones);
    println!("   stale       {}", report.stale);
    if report.skipped > 0 || report.errors > 0 {
        let broken = format!("{} broken events, {} parse errors", report.skipped, report.errors);
        println!("   {}", broken.red());
    }
    println!("   {}", gc.render());

    if gc.needs_rebuild(config.gc_threshold) {
        let note = format!(
            "score {} is over {}, the next save rewrites the file",
            gc.score(),
            config.gc_threshold
        );
        println!("   {}", note.yellow());
    }

    Ok(())
}
