use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// A kiosk. Owned by one location.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
pub struct Device {
    #[schema(example = 1)]
    pub id: u64,

    /// Hardware identifier reported by the kiosk.
    #[schema(example = "tablet-lobby-01")]
    pub device_code: String,

    #[schema(example = 1)]
    pub location_id: u64,

    #[serde(skip)]
    pub api_key_hash: String,

    #[schema(example = "Lobby tablet", nullable = true)]
    pub name: Option<String>,

    #[schema(value_type = String, format = "date-time")]
    pub registered_at: DateTime<Utc>,

    #[schema(value_type = String, format = "date-time")]
    pub last_seen_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewDevice {
    pub device_code: String,
    pub location_id: u64,
    pub name: Option<String>,
}
