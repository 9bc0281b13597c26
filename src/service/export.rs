//! Daily attendance export.
//!
//! A report covers one local calendar day of one location: the half-open
//! window `[local midnight, next local midnight)` in the location's IANA zone,
//! converted to UTC for the ledger query. Valid and invalid events are both
//! exported; the `Valid` column tells them apart.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;

use crate::error::{AppError, AppResult};
use crate::model::location::Location;
use crate::service::mailer::{Attachment, MailTransport, OutboundMail};
use crate::store::LedgerStore;
use crate::utils::time::{local_day_bounds, local_yesterday};

pub const CSV_HEADER: [&str; 9] = [
    "Date",
    "Time",
    "Employee ID",
    "Employee Name",
    "Event Type",
    "Location Name",
    "Device ID",
    "Method",
    "Valid",
];

pub const DEFAULT_FROM: &str = "noreply@kioskapp.com";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportRow {
    pub local_date: String,
    pub local_time: String,
    pub employee_code: String,
    pub employee_name: String,
    pub kind: String,
    pub location_name: String,
    pub device_code: String,
    pub method: String,
    pub is_valid: bool,
}

impl ReportRow {
    fn fields(&self) -> [&str; 9] {
        [
            self.local_date.as_str(),
            self.local_time.as_str(),
            self.employee_code.as_str(),
            self.employee_name.as_str(),
            self.kind.as_str(),
            self.location_name.as_str(),
            self.device_code.as_str(),
            self.method.as_str(),
            if self.is_valid { "true" } else { "false" },
        ]
    }
}

#[derive(Debug, Clone)]
pub struct DailyReport {
    pub location_name: String,
    pub date: NaiveDate,
    pub rows: Vec<ReportRow>,
}

impl DailyReport {
    pub fn to_csv(&self) -> AppResult<Vec<u8>> {
        let mut writer = csv::Writer::from_writer(vec![]);
        writer
            .write_record(CSV_HEADER)
            .map_err(|e| AppError::Internal(format!("CSV write failed: {}", e)))?;
        for row in &self.rows {
            writer
                .write_record(row.fields())
                .map_err(|e| AppError::Internal(format!("CSV write failed: {}", e)))?;
        }
        writer
            .into_inner()
            .map_err(|e| AppError::Internal(format!("CSV flush failed: {}", e)))
    }

    pub fn subject(&self) -> String {
        format!("Daily Time Event Export - {}", self.date.format("%Y-%m-%d"))
    }

    pub fn filename(&self) -> String {
        format!("time_events_{}.csv", self.date.format("%Y%m%d"))
    }

    fn html_body(&self) -> String {
        format!(
            "<p>Please find attached the daily time event export for {} ({}).</p>",
            self.date.format("%Y-%m-%d"),
            self.location_name
        )
    }
}

/// Result of an on-demand export, as returned to admins.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ExportOutcome {
    #[schema(value_type = String, format = "date", example = "2024-01-14")]
    pub date: NaiveDate,
    pub sent: bool,
    pub rows: usize,
}

#[derive(Clone)]
pub struct ExportPipeline {
    store: Arc<dyn LedgerStore>,
    mailer: Option<Arc<dyn MailTransport>>,
    from_address: String,
}

impl ExportPipeline {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        mailer: Option<Arc<dyn MailTransport>>,
        from_address: impl Into<String>,
    ) -> Self {
        Self {
            store,
            mailer,
            from_address: from_address.into(),
        }
    }

    async fn location(&self, location_id: u64) -> AppResult<Location> {
        self.store
            .location(location_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Location {} not found", location_id)))
    }

    pub async fn render_daily_report(&self, location_id: u64, date: NaiveDate) -> AppResult<DailyReport> {
        let location = self.location(location_id).await?;
        self.render_for(&location, date).await
    }

    async fn render_for(&self, location: &Location, date: NaiveDate) -> AppResult<DailyReport> {
        let tz = location.tz()?;
        let (start, end) = local_day_bounds(date, tz);
        let records = self.store.export_records(location.id, start, end).await?;

        let rows = records
            .into_iter()
            .map(|r| {
                let local = r.event.event_time.with_timezone(&tz);
                ReportRow {
                    local_date: local.format("%Y-%m-%d").to_string(),
                    local_time: local.format("%H:%M:%S").to_string(),
                    employee_code: r.employee_code,
                    employee_name: r.employee_name,
                    kind: r.event.kind.to_string(),
                    location_name: location.name.clone(),
                    device_code: r.device_code,
                    method: r.event.method.to_string(),
                    is_valid: r.event.is_valid,
                }
            })
            .collect();

        Ok(DailyReport {
            location_name: location.name.clone(),
            date,
            rows,
        })
    }

    pub async fn deliver(&self, report: &DailyReport, recipient: &str) -> AppResult<()> {
        let mailer = self.mailer.as_ref().ok_or(AppError::DeliveryUnavailable)?;

        let mail = OutboundMail {
            from: self.from_address.clone(),
            to: recipient.to_string(),
            subject: report.subject(),
            html_body: report.html_body(),
            attachments: vec![Attachment {
                filename: report.filename(),
                content_type: "text/csv".to_string(),
                content: report.to_csv()?,
            }],
        };

        let status = mailer
            .send(&mail)
            .await
            .map_err(|e| AppError::DeliveryFailed(e.to_string()))?;
        if !(200..300).contains(&status) {
            return Err(AppError::DeliveryFailed(format!("transport returned status {}", status)));
        }
        Ok(())
    }

    /// `sent: false` when the location has exports disabled; nothing is sent.
    #[instrument(skip(self))]
    pub async fn export_and_send(&self, location_id: u64, date: NaiveDate) -> AppResult<ExportOutcome> {
        let location = self.location(location_id).await?;
        if !location.export_enabled() {
            info!(location_id, "Export disabled, no manager email");
            return Ok(ExportOutcome {
                date,
                sent: false,
                rows: 0,
            });
        }

        let report = self.render_for(&location, date).await?;
        self.deliver(&report, location.manager_email.trim()).await?;
        info!(location_id, %date, rows = report.rows.len(), "Daily export sent");
        Ok(ExportOutcome {
            date,
            sent: true,
            rows: report.rows.len(),
        })
    }

    pub async fn export_yesterday(&self, location_id: u64) -> AppResult<ExportOutcome> {
        self.export_yesterday_at(location_id, Utc::now()).await
    }

    /// "Yesterday" as seen from the location's zone at `now`.
    pub async fn export_yesterday_at(
        &self,
        location_id: u64,
        now: DateTime<Utc>,
    ) -> AppResult<ExportOutcome> {
        let location = self.location(location_id).await?;
        let date = local_yesterday(location.tz()?, now);
        let outcome = self.export_and_send(location_id, date).await;
        if let Err(e) = &outcome {
            warn!(location_id, %date, error = %e, "Export of yesterday failed");
        }
        outcome
    }
}
