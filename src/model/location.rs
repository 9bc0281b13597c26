use chrono::{DateTime, NaiveTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::AppResult;
use crate::utils::time::parse_timezone;

/// Tenant boundary. Employees, devices and events all belong to exactly one location.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
#[schema(
    example = json!({
        "id": 1,
        "name": "Head Office",
        "manager_email": "manager@company.com",
        "export_time": "01:00:00",
        "timezone": "America/Toronto",
        "created_at": "2024-01-01T00:00:00Z",
        "updated_at": "2024-01-01T00:00:00Z"
    })
)]
pub struct Location {
    #[schema(example = 1)]
    pub id: u64,

    #[schema(example = "Head Office")]
    pub name: String,

    /// Empty means daily exports are disabled.
    #[schema(example = "manager@company.com")]
    pub manager_email: String,

    #[schema(example = "01:00:00", value_type = String, format = "time")]
    pub export_time: NaiveTime,

    #[schema(example = "America/Toronto")]
    pub timezone: String,

    #[schema(value_type = String, format = "date-time")]
    pub created_at: DateTime<Utc>,

    #[schema(value_type = String, format = "date-time")]
    pub updated_at: DateTime<Utc>,
}

impl Location {
    pub fn tz(&self) -> AppResult<Tz> {
        parse_timezone(&self.timezone)
    }

    pub fn export_enabled(&self) -> bool {
        !self.manager_email.trim().is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct NewLocation {
    pub name: String,
    pub manager_email: String,
    pub export_time: NaiveTime,
    pub timezone: String,
}

#[derive(Debug, Clone, Default)]
pub struct LocationUpdate {
    pub manager_email: Option<String>,
    pub export_time: Option<NaiveTime>,
    pub timezone: Option<String>,
}
