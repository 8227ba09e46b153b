//! Deployment advance worker
//!
//! The retry trigger for the client runtime: periodically re-invokes
//! `try_advance` for every study which is not yet deployed, so transient
//! races resolve without user involvement. The schedule is policy, not
//! mechanism: interval and cooldown are configurable, and capability gaps
//! are never retried since they cannot resolve without a client update.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use crate::client::manager::ClientManager;
use crate::client::runtime::StudyRuntimeStatus;
use crate::utils::{calc_exp_backoff, CooldownOptions};

/// Advancer worker options
#[derive(Debug, Clone)]
pub struct Options {
    /// Polling interval
    pub interval: Duration,

    /// Cooldown applied after consecutive errors on one runtime
    pub cooldown: CooldownOptions,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            cooldown: CooldownOptions::default(),
        }
    }
}

#[derive(Debug, Default)]
struct RuntimeTracker {
    err_streak: u32,
    cooldown_ends_at: Option<DateTime<Utc>>,
    fatal: bool,
}

/// Run the advancer worker
pub async fn run<S, F>(
    options: &Options,
    manager: Arc<ClientManager>,
    sleep_fn: S,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) where
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    info!("Advancer worker starting...");

    let mut trackers: HashMap<String, RuntimeTracker> = HashMap::new();

    loop {
        // Check for shutdown
        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Advancer worker shutting down...");
                return;
            }
            _ = sleep_fn(options.interval) => {
                // Continue with pass
            }
        }

        for id in manager.study_ids().await {
            let tracker = trackers.entry(id.to_string()).or_default();
            if tracker.fatal {
                continue;
            }
            if let Some(ends_at) = tracker.cooldown_ends_at {
                if Utc::now() < ends_at {
                    debug!(runtime = %id, "In cooldown, skipping...");
                    continue;
                }
            }

            match manager.get_study_status(&id).await {
                Ok(StudyRuntimeStatus::Deployed) | Ok(StudyRuntimeStatus::Stopped) => continue,
                Ok(_) => {}
                Err(e) => {
                    error!(runtime = %id, "Failed to read study status: {}", e);
                    continue;
                }
            }

            debug!(runtime = %id, "Attempting deployment advance...");
            match manager.try_advance(&id).await {
                Ok(status) => {
                    tracker.err_streak = 0;
                    tracker.cooldown_ends_at = None;
                    if status == StudyRuntimeStatus::Deployed {
                        info!(runtime = %id, "Study deployed");
                    }
                }
                Err(e) if e.is_capability_gap() => {
                    error!(runtime = %id, "Capability gap, not retrying: {}", e);
                    tracker.fatal = true;
                }
                Err(e) => {
                    tracker.err_streak += 1;
                    let cooldown = calc_exp_backoff(&options.cooldown, tracker.err_streak);
                    tracker.cooldown_ends_at = Some(
                        Utc::now()
                            + chrono::Duration::from_std(cooldown)
                                .unwrap_or(chrono::Duration::zero()),
                    );
                    warn!(
                        runtime = %id,
                        streak = tracker.err_streak,
                        "Advance failed, cooling down: {}", e
                    );
                }
            }
        }
    }
}
