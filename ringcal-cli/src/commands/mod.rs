pub mod check;
pub mod list;
pub mod stats;

use std::sync::Arc;

use anyhow::{Result, bail};
use ringcal_core::{AccountId, Calendar, Collaborators, EventModel, MemoryDirectory, RingcalConfig};

/// A model over `account`'s calendar, loaded, with an empty in-memory
/// directory standing in for the address book.
pub async fn open(
    config: &RingcalConfig,
    account: &AccountId,
) -> Result<(EventModel, Calendar, Arc<MemoryDirectory>)> {
    let path = config.calendar_path(account);
    if !path.exists() {
        bail!("No calendar for account '{}' (expected {})", account, path.display());
    }

    let directory = Arc::new(MemoryDirectory::new());
    let model = EventModel::new(config.clone(), Collaborators::in_memory(directory.clone()));
    let calendar = model.calendar_for(account);
    calendar.load().await?;
    Ok((model, calendar, directory))
}
