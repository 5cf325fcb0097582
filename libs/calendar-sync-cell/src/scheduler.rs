use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument};

use crate::services::CalendarSyncService;

/// Used when the settings row cannot be read.
const FALLBACK_INTERVAL: Duration = Duration::from_secs(15 * 60);

/// Background loop that syncs every feed on the configured interval.
///
/// The settings row is re-read on every tick, so changes made from the admin
/// console apply without a restart.
pub struct CalendarSyncScheduler {
    service: Arc<CalendarSyncService>,
    shutdown: watch::Receiver<bool>,
}

impl CalendarSyncScheduler {
    pub fn new(service: Arc<CalendarSyncService>, shutdown: watch::Receiver<bool>) -> Self {
        Self { service, shutdown }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) {
        info!("Calendar sync scheduler started");

        loop {
            let delay = self.tick().await;
            debug!("Next calendar sync in {:?}", delay);

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                changed = self.shutdown.changed() => {
                    // A dropped sender also means shutdown
                    if changed.is_err() || *self.shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Calendar sync scheduler stopped");
    }

    /// Run one scheduled pass and return how long to wait before the next.
    #[instrument(skip(self))]
    pub async fn tick(&self) -> Duration {
        let settings = match self.service.settings() {
            Ok(settings) => settings,
            Err(err) => {
                error!("Could not read calendar sync settings: {}", err);
                return FALLBACK_INTERVAL;
            }
        };

        if settings.enabled {
            match self.service.sync_all().await {
                Ok(runs) => debug!("Scheduled calendar sync finished {} runs", runs.len()),
                Err(err) => error!("Scheduled calendar sync failed: {}", err),
            }
        } else {
            debug!("Calendar sync disabled, skipping tick");
        }

        Duration::from_secs(settings.interval_minutes.max(1) as u64 * 60)
    }
}
