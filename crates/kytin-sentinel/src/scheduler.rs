//! Daily reset scheduler
//!
//! Opens a new day window for the Resin tank and the spend policy at every
//! UTC midnight. Disable it with `daily_reset.enabled = false` to drive
//! `ResetDaily` over IPC instead.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tracing::{error, info};

use kytin_core::SentinelCore;

/// Time left until the next UTC midnight after `now`
pub fn until_next_midnight(now: DateTime<Utc>) -> Duration {
    let next = now
        .date_naive()
        .succ_opt()
        .and_then(|day| day.and_hms_opt(0, 0, 0))
        .map(|midnight| midnight.and_utc());

    match next {
        Some(next) => (next - now).to_std().unwrap_or(Duration::from_secs(1)),
        None => Duration::from_secs(24 * 60 * 60),
    }
}

/// Spawn the reset loop on the current runtime
pub fn spawn_daily_reset(core: Arc<SentinelCore>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let wait = until_next_midnight(Utc::now());
            info!("Next daily reset in {}s", wait.as_secs());
            tokio::time::sleep(wait).await;

            let core = Arc::clone(&core);
            if let Err(e) = tokio::task::spawn_blocking(move || core.reset_daily()).await {
                error!("Daily reset failed: {}", e);
            }
        }
    })
}
