use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::engine::Engine;

/// How often the compactor looks at the journal.
const CHECK_INTERVAL_SECS: u64 = 60;

/// Background task that folds the journal into a snapshot once enough
/// records have piled up since the last one.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(CHECK_INTERVAL_SECS));
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        let records = engine.wal_records_since_snapshot().await;
        if records < threshold {
            continue;
        }
        debug!(records, "compacting journal");
        if let Err(e) = engine.compact_wal().await {
            warn!("journal compaction failed: {e}");
        }
    }
}
