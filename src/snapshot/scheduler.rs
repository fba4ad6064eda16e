// Rebuild scheduling
//
// Once at startup when the published snapshot is missing or over a week old, then
// every Sunday at 06:00:00 local time on a fixed weekly period.

use chrono::{DateTime, Datelike, Duration as ChronoDuration, NaiveTime, TimeZone, Utc, Weekday};
use chrono_tz::Tz;
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{error, info};

use crate::error::{Result, TrackerError};
use crate::snapshot::builder::SnapshotBuilder;

pub const REBUILD_PERIOD: Duration = Duration::from_secs(7 * 24 * 60 * 60);
pub const MAX_SNAPSHOT_AGE: Duration = REBUILD_PERIOD;

const REBUILD_WEEKDAY: Weekday = Weekday::Sun;
const REBUILD_HOUR: u32 = 6;

/// Next Sunday 06:00:00 in `now`'s timezone, strictly after `now`.
pub fn next_weekly_run(now: DateTime<Tz>) -> DateTime<Tz> {
    let tz = now.timezone();
    let rebuild_time = NaiveTime::from_hms_opt(REBUILD_HOUR, 0, 0).unwrap_or_default();
    let days_ahead = (7 + REBUILD_WEEKDAY.num_days_from_monday()
        - now.weekday().num_days_from_monday())
        % 7;

    let mut date = now.date_naive() + ChronoDuration::days(days_ahead as i64);
    loop {
        let naive = date.and_time(rebuild_time);
        let candidate = tz
            .from_local_datetime(&naive)
            .earliest()
            // 06:00 fell into a DST gap; an hour later always exists.
            .or_else(|| tz.from_local_datetime(&(naive + ChronoDuration::hours(1))).earliest());
        if let Some(candidate) = candidate {
            if candidate > now {
                return candidate;
            }
        }
        date += ChronoDuration::days(7);
    }
}

pub struct RebuildScheduler {
    builder: Arc<SnapshotBuilder>,
    timezone: Tz,
}

pub struct SchedulerHandle {
    stop_tx: mpsc::Sender<()>,
    timer: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Stop the weekly timer. A rebuild already running finishes first.
    pub fn stop(self) {
        let _ = self.stop_tx.send(());
        if self.timer.join().is_err() {
            error!("❌ Rebuild timer thread panicked");
        }
    }
}

impl RebuildScheduler {
    pub fn new(builder: Arc<SnapshotBuilder>, timezone: Tz) -> Self {
        RebuildScheduler { builder, timezone }
    }

    pub fn start(self) -> Result<SchedulerHandle> {
        let startup_builder = self.builder.clone();
        thread::Builder::new()
            .name("snapshot-startup".to_string())
            .spawn(move || {
                if startup_builder.store().needs_rebuild(MAX_SNAPSHOT_AGE) {
                    info!("📥 Stop location database missing or stale, rebuilding now");
                    run_rebuild(&startup_builder);
                } else {
                    info!("✓ Stop location database is up to date");
                }
            })
            .map_err(|e| TrackerError::File(format!("Failed to start startup rebuild: {}", e)))?;

        let first_run = next_weekly_run(Utc::now().with_timezone(&self.timezone));
        let (stop_tx, stop_rx) = mpsc::channel();
        let builder = self.builder;

        let timer = thread::Builder::new()
            .name("snapshot-timer".to_string())
            .spawn(move || {
                info!(first_run = %first_run, "⏰ Weekly rebuild scheduled");
                let wait = (first_run - Utc::now().with_timezone(&first_run.timezone()))
                    .to_std()
                    .unwrap_or_default();
                let mut deadline = Instant::now() + wait;

                loop {
                    let timeout = deadline.saturating_duration_since(Instant::now());
                    match stop_rx.recv_timeout(timeout) {
                        Err(RecvTimeoutError::Timeout) => {
                            run_rebuild(&builder);
                            deadline += REBUILD_PERIOD;
                        }
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                info!("Weekly rebuild timer stopped");
            })
            .map_err(|e| TrackerError::File(format!("Failed to start rebuild timer: {}", e)))?;

        Ok(SchedulerHandle { stop_tx, timer })
    }
}

fn run_rebuild(builder: &SnapshotBuilder) {
    if let Err(e) = builder.rebuild() {
        error!(error = %e, "❌ Stop location rebuild failed");
    }
}
