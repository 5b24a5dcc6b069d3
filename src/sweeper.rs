use std::sync::Arc;

use chrono::Utc;
use tokio::time::{interval, Duration, MissedTickBehavior};

use crate::store::CatalogStore;

/// How often the sweeper wakes.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Background task that closes `waiting` rooms past their age limit and
/// drops expired session tokens. Failures are logged and swallowed; the
/// task never exits.
pub async fn run(store: Arc<CatalogStore>) {
    let mut ticker = interval(SWEEP_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick fires immediately; skip it so a fresh start does not
    // sweep before the listeners are even up.
    ticker.tick().await;

    loop {
        ticker.tick().await;
        let now = Utc::now();

        match store.close_stale_rooms(now) {
            Ok(0) => tracing::debug!("Expired room cleanup completed"),
            Ok(closed) => tracing::info!(closed, "Closed expired rooms"),
            Err(e) => tracing::error!(error = %e, "Error cleaning expired rooms"),
        }

        match store.purge_expired_sessions(now) {
            Ok(0) => {}
            Ok(purged) => tracing::debug!(purged, "Purged expired sessions"),
            Err(e) => tracing::error!(error = %e, "Error purging expired sessions"),
        }
    }
}
