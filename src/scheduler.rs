//! Cron-driven tick source for the hot-set producer.
//!
//! Wraps a cron schedule into a channel that receives one tick per scheduled
//! moment, in order. The channel is bounded at one pending tick; the
//! consumer does idempotent work, so a tick delivered late is harmless and a
//! deep queue is never needed.

use crate::{Error, Result};

use chrono::{DateTime, Utc};
use cron::Schedule;
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug)]
pub struct Scheduler {
    schedule: Schedule,
}

impl Scheduler {
    /// Parse a standard 5-field crontab. 6/7-field expressions (with seconds
    /// and optional year) are accepted as-is.
    pub fn new(crontab: &str) -> Result<Self> {
        let schedule = Schedule::from_str(&normalize(crontab))
            .map_err(|e| Error::Config(format!("invalid crontab '{crontab}': {e}")))?;
        Ok(Self { schedule })
    }

    /// Spawn the tick loop. Ticks stop when `shutdown` fires or the receiver
    /// is dropped.
    pub fn start(
        self,
        shutdown: CancellationToken,
    ) -> (mpsc::Receiver<DateTime<Utc>>, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(1);
        let handle = tokio::spawn(async move {
            loop {
                let Some(next) = self.schedule.upcoming(Utc).next() else {
                    break;
                };
                let wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
                tokio::select! {
                    _ = tokio::time::sleep(wait) => {
                        if tx.send(next).await.is_err() {
                            break;
                        }
                    }
                    _ = shutdown.cancelled() => break,
                }
            }
            debug!("Scheduler stopped");
        });
        (rx, handle)
    }
}

/// The cron parser wants a seconds field; standard crontabs do not carry
/// one. Prefix 5-field expressions with second zero.
fn normalize(crontab: &str) -> String {
    let fields = crontab.split_whitespace().count();
    if fields == 5 {
        format!("0 {}", crontab.trim())
    } else {
        crontab.trim().to_string()
    }
}
