//! Daily export trigger.
//!
//! Ticks on a fixed interval. On each tick every export-enabled location whose
//! local clock has passed its `export_time`, and which has not yet been exported
//! for its local yesterday, gets `export_and_send(yesterday)`. The date of the
//! last attempt is kept in the location's `last_export_date` setting, so a
//! restart catches up at most one missed day and never repeats one.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use futures::future::join_all;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::AppResult;
use crate::model::location::Location;
use crate::service::export::ExportPipeline;
use crate::store::LedgerStore;
use crate::utils::time::local_yesterday;

pub const LAST_EXPORT_KEY: &str = "last_export_date";

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickSummary {
    pub due: usize,
    pub sent: usize,
    pub skipped: usize,
    pub failed: usize,
}

enum Outcome {
    Sent,
    Skipped,
    Failed,
}

pub struct ExportScheduler {
    store: Arc<dyn LedgerStore>,
    pipeline: ExportPipeline,
    tick: Duration,
    shutdown: CancellationToken,
}

impl ExportScheduler {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        pipeline: ExportPipeline,
        tick: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            store,
            pipeline,
            tick,
            shutdown,
        }
    }

    /// Main loop; returns once the shutdown token is cancelled.
    pub async fn run(self) {
        info!(tick_secs = self.tick.as_secs(), "Export scheduler started");
        let mut interval = tokio::time::interval(self.tick);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = self.shutdown.cancelled() => {
                    info!("Export scheduler received shutdown signal");
                    break;
                }
            }

            match self.run_due(Utc::now()).await {
                Ok(summary) if summary.due > 0 => {
                    info!(
                        due = summary.due,
                        sent = summary.sent,
                        skipped = summary.skipped,
                        failed = summary.failed,
                        "Export tick finished"
                    );
                }
                Ok(_) => {}
                Err(e) => error!(error = %e, "Export tick failed to list locations"),
            }
        }

        info!("Export scheduler stopped");
    }

    /// One tick at `now`. Per-location failures are logged and counted, never raised.
    pub async fn run_due(&self, now: DateTime<Utc>) -> AppResult<TickSummary> {
        let locations = self.store.export_enabled_locations().await?;

        let mut due = Vec::new();
        for location in locations {
            match self.due_date(&location, now).await {
                Ok(Some(date)) => due.push((location, date)),
                Ok(None) => {}
                Err(e) => {
                    warn!(location_id = location.id, error = %e, "Cannot decide whether export is due");
                }
            }
        }

        let mut summary = TickSummary {
            due: due.len(),
            ..Default::default()
        };

        let outcomes = join_all(due.iter().map(|(location, date)| self.export_one(location, *date))).await;
        for outcome in outcomes {
            match outcome {
                Outcome::Sent => summary.sent += 1,
                Outcome::Skipped => summary.skipped += 1,
                Outcome::Failed => summary.failed += 1,
            }
        }

        Ok(summary)
    }

    /// Local yesterday, if the location is past its export time and has not had it yet.
    async fn due_date(&self, location: &Location, now: DateTime<Utc>) -> AppResult<Option<NaiveDate>> {
        let tz = location.tz()?;
        if now.with_timezone(&tz).time() < location.export_time {
            return Ok(None);
        }

        let yesterday = local_yesterday(tz, now);
        let last = self
            .store
            .setting(location.id, LAST_EXPORT_KEY)
            .await?
            .and_then(|v| v.as_str().and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()));

        Ok(match last {
            Some(done) if done >= yesterday => None,
            _ => Some(yesterday),
        })
    }

    async fn export_one(&self, location: &Location, date: NaiveDate) -> Outcome {
        let outcome = match self.pipeline.export_and_send(location.id, date).await {
            Ok(o) if o.sent => Outcome::Sent,
            Ok(_) => Outcome::Skipped,
            Err(e) => {
                error!(location_id = location.id, %date, error = %e, "Scheduled export failed");
                Outcome::Failed
            }
        };

        // recorded even on failure so a broken mailbox is not retried every tick
        let stamp = Value::String(date.format("%Y-%m-%d").to_string());
        if let Err(e) = self.store.put_setting(location.id, LAST_EXPORT_KEY, stamp).await {
            error!(location_id = location.id, error = %e, "Failed to record export date");
        }

        outcome
    }
}
