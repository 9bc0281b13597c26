use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use utoipa::ToSchema;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum EventKind {
    In,
    Out,
}

/// How the kiosk identified the employee. Recorded for audit only.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum CaptureMethod {
    Face,
    Pin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttendanceState {
    ClockedIn,
    ClockedOut,
}

impl AttendanceState {
    /// State is a function of the most recent valid event alone.
    pub fn from_last_valid(last: Option<&AttendanceEvent>) -> Self {
        match last {
            Some(event) if event.kind == EventKind::In => AttendanceState::ClockedIn,
            _ => AttendanceState::ClockedOut,
        }
    }
}

/// Ledger record. Identity and time are fixed at creation; only `kind` and
/// `is_valid` may be changed, and only by an admin correction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[schema(
    example = json!({
        "id": 42,
        "employee_id": 1,
        "device_id": 3,
        "location_id": 1,
        "kind": "IN",
        "event_time": "2024-01-15T13:02:11Z",
        "method": "FACE",
        "is_valid": true,
        "created_at": "2024-01-15T13:02:11Z"
    })
)]
pub struct AttendanceEvent {
    /// Insertion sequence; breaks ties between equal `event_time`s.
    pub id: u64,
    pub employee_id: u64,
    pub device_id: u64,
    pub location_id: u64,
    pub kind: EventKind,
    #[schema(value_type = String, format = "date-time")]
    pub event_time: DateTime<Utc>,
    pub method: CaptureMethod,
    pub is_valid: bool,
    #[schema(value_type = String, format = "date-time")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewAttendanceEvent {
    pub employee_id: u64,
    pub device_id: u64,
    pub location_id: u64,
    pub kind: EventKind,
    pub event_time: DateTime<Utc>,
    pub method: CaptureMethod,
}

#[derive(Debug, Clone, Default)]
pub struct EventCorrection {
    pub kind: Option<EventKind>,
    pub is_valid: Option<bool>,
}

impl EventCorrection {
    pub fn is_empty(&self) -> bool {
        self.kind.is_none() && self.is_valid.is_none()
    }
}

/// The last valid event a clock attempt was validated against. A kind
/// correction of that event moves the head just like a new event does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerHead {
    pub id: u64,
    pub kind: EventKind,
}

impl From<&AttendanceEvent> for LedgerHead {
    fn from(event: &AttendanceEvent) -> Self {
        Self {
            id: event.id,
            kind: event.kind,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EventFilter {
    pub location_id: u64,
    pub employee_id: Option<u64>,
    /// Inclusive.
    pub from: Option<DateTime<Utc>>,
    /// Exclusive.
    pub until: Option<DateTime<Utc>>,
    pub limit: u32,
}

/// An event joined with the identifiers an export row needs.
#[derive(Debug, Clone)]
pub struct ExportRecord {
    pub event: AttendanceEvent,
    pub employee_code: String,
    pub employee_name: String,
    pub device_code: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(kind: EventKind) -> AttendanceEvent {
        AttendanceEvent {
            id: 1,
            employee_id: 1,
            device_id: 1,
            location_id: 1,
            kind,
            event_time: Utc::now(),
            method: CaptureMethod::Pin,
            is_valid: true,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn kinds_use_uppercase_tokens() {
        assert_eq!(EventKind::In.to_string(), "IN");
        assert_eq!("OUT".parse::<EventKind>().unwrap(), EventKind::Out);
        assert!("in".parse::<EventKind>().is_err());
        assert!("BREAK".parse::<EventKind>().is_err());
        assert_eq!(CaptureMethod::Face.as_ref(), "FACE");
    }

    #[test]
    fn state_follows_last_valid_event() {
        assert_eq!(AttendanceState::from_last_valid(None), AttendanceState::ClockedOut);
        assert_eq!(
            AttendanceState::from_last_valid(Some(&event(EventKind::In))),
            AttendanceState::ClockedIn
        );
        assert_eq!(
            AttendanceState::from_last_valid(Some(&event(EventKind::Out))),
            AttendanceState::ClockedOut
        );
    }

    #[test]
    fn state_serializes_screaming_snake() {
        let json = serde_json::to_string(&AttendanceState::ClockedIn).unwrap();
        assert_eq!(json, "\"CLOCKED_IN\"");
    }
}
