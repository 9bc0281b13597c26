//! Attendance state machine.
//!
//! `CLOCKED_OUT --IN--> CLOCKED_IN --OUT--> CLOCKED_OUT`, starting from
//! `CLOCKED_OUT` when an employee has no history. State is never stored; it is
//! derived from the most recent valid ledger event, ordered by
//! `(event_time, id)` so equal timestamps resolve by insertion order.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};
use utoipa::ToSchema;

use crate::error::{AppError, AppResult};
use crate::model::attendance::{
    AttendanceEvent, AttendanceState, CaptureMethod, EventKind, LedgerHead, NewAttendanceEvent,
};
use crate::model::employee::Employee;
use crate::model::location::Location;
use crate::store::{LedgerStore, StoreError};
use crate::utils::time::{local_midnight, local_today};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionRejection {
    #[error("You are already clocked in since {} UTC", .since.format("%H:%M"))]
    AlreadyClockedIn { since: DateTime<Utc> },

    #[error("You are not clocked in")]
    AlreadyClockedOut,

    #[error("Invalid event type: {0}")]
    UnknownKind(String),

    #[error("Event time {attempted} is earlier than the last recorded event at {last}")]
    OutOfOrder {
        attempted: DateTime<Utc>,
        last: DateTime<Utc>,
    },
}

impl TransitionRejection {
    pub fn code(&self) -> &'static str {
        match self {
            TransitionRejection::AlreadyClockedIn { .. } => "already_clocked_in",
            TransitionRejection::AlreadyClockedOut => "already_clocked_out",
            TransitionRejection::UnknownKind(_) => "unknown_event_kind",
            TransitionRejection::OutOfOrder { .. } => "out_of_order",
        }
    }
}

/// Derived state of one employee.
#[derive(Debug, Clone)]
pub struct EmployeeState {
    pub employee: Employee,
    pub state: AttendanceState,
    pub last_event: Option<AttendanceEvent>,
}

/// Pure transition rule.
pub fn check_transition(
    state: AttendanceState,
    last_event: Option<&AttendanceEvent>,
    kind: EventKind,
) -> Result<(), TransitionRejection> {
    match (state, kind) {
        (AttendanceState::ClockedOut, EventKind::In) | (AttendanceState::ClockedIn, EventKind::Out) => {
            Ok(())
        }
        (AttendanceState::ClockedIn, EventKind::In) => Err(TransitionRejection::AlreadyClockedIn {
            // a CLOCKED_IN state always has its opening event
            since: last_event.map(|e| e.event_time).unwrap_or_default(),
        }),
        (AttendanceState::ClockedOut, EventKind::Out) => Err(TransitionRejection::AlreadyClockedOut),
    }
}

pub fn parse_kind(proposed: &str) -> Result<EventKind, TransitionRejection> {
    proposed
        .parse::<EventKind>()
        .map_err(|_| TransitionRejection::UnknownKind(proposed.to_string()))
}

/// A clock attempt arriving from a kiosk.
#[derive(Debug, Clone)]
pub struct ClockRequest<'a> {
    pub employee_code: &'a str,
    pub location_id: u64,
    pub device_id: u64,
    pub kind: &'a str,
    pub method: CaptureMethod,
    /// Device-supplied time for queued offline events; `None` means now.
    pub event_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ClockedInEntry {
    #[schema(example = "EMP-001")]
    pub employee_code: String,
    #[schema(example = "John Doe")]
    pub name: String,
    #[schema(value_type = String, format = "date-time")]
    pub clock_in_time: DateTime<Utc>,
    pub device_id: u64,
    #[schema(nullable = true)]
    pub device_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct LocationStats {
    pub total_employees: u64,
    pub clocked_in_count: u64,
    pub clocked_out_count: u64,
    /// Events since local midnight.
    pub today_events: u64,
}

/// Read side of the ledger plus the guarded write of a new clock event.
#[derive(Clone)]
pub struct ClockEngine {
    store: Arc<dyn LedgerStore>,
}

impl ClockEngine {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    pub async fn get_state(&self, employee_code: &str, location_id: u64) -> AppResult<EmployeeState> {
        let employee = self
            .store
            .employee_by_code(location_id, employee_code)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Employee {} not found", employee_code)))?;

        self.state_of(employee).await
    }

    async fn state_of(&self, employee: Employee) -> AppResult<EmployeeState> {
        let last_event = self.store.last_valid_event(employee.id).await?;
        Ok(EmployeeState {
            state: AttendanceState::from_last_valid(last_event.as_ref()),
            employee,
            last_event,
        })
    }

    /// Checks a proposed kind against current state. Read-only.
    pub async fn validate_transition(
        &self,
        employee_code: &str,
        location_id: u64,
        proposed: &str,
    ) -> AppResult<EventKind> {
        let kind = parse_kind(proposed)?;
        let current = self.get_state(employee_code, location_id).await?;
        check_transition(current.state, current.last_event.as_ref(), kind)?;
        Ok(kind)
    }

    /// Validate and append in one atomic step per employee.
    ///
    /// The append is conditional on the ledger head observed during validation.
    /// If another write moved the head first, state is re-read and re-validated
    /// once; a second lost race is reported as `ConcurrencyConflict`.
    #[instrument(
        name = "clock",
        skip(self, request),
        fields(employee_code = %request.employee_code, location_id = request.location_id, kind = %request.kind)
    )]
    pub async fn clock(&self, request: ClockRequest<'_>) -> AppResult<AttendanceEvent> {
        let kind = parse_kind(request.kind)?;
        let mut retried = false;

        loop {
            let current = self.get_state(request.employee_code, request.location_id).await?;

            if !current.employee.is_active {
                return Err(AppError::Forbidden(format!(
                    "Employee {} is deactivated",
                    request.employee_code
                )));
            }

            check_transition(current.state, current.last_event.as_ref(), kind)?;

            let event_time = request.event_time.unwrap_or_else(Utc::now);
            if let Some(last) = &current.last_event {
                if event_time < last.event_time {
                    return Err(TransitionRejection::OutOfOrder {
                        attempted: event_time,
                        last: last.event_time,
                    }
                    .into());
                }
            }

            let new_event = NewAttendanceEvent {
                employee_id: current.employee.id,
                device_id: request.device_id,
                location_id: request.location_id,
                kind,
                event_time,
                method: request.method,
            };
            let expected_head = current.last_event.as_ref().map(LedgerHead::from);

            match self.store.append_event(new_event, expected_head).await {
                Ok(event) => {
                    info!(event_id = event.id, method = %event.method, "Clock event recorded");
                    return Ok(event);
                }
                Err(StoreError::Conflict) if !retried => {
                    warn!("Ledger head moved during clock attempt, re-validating");
                    retried = true;
                }
                Err(StoreError::Conflict) => return Err(AppError::ConcurrencyConflict),
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Active employees of the location that are currently clocked in.
    pub async fn clocked_in(&self, location_id: u64) -> AppResult<Vec<ClockedInEntry>> {
        let employees = self.store.employees(location_id, true).await?;
        let mut entries = Vec::new();

        for employee in employees {
            let current = self.state_of(employee).await?;
            let (AttendanceState::ClockedIn, Some(opening)) = (current.state, current.last_event) else {
                continue;
            };
            let device_name = self
                .store
                .device(opening.device_id)
                .await?
                .and_then(|d| d.name);
            entries.push(ClockedInEntry {
                employee_code: current.employee.employee_code,
                name: current.employee.name,
                clock_in_time: opening.event_time,
                device_id: opening.device_id,
                device_name,
            });
        }

        debug!(location_id, count = entries.len(), "Computed clocked-in list");
        Ok(entries)
    }

    pub async fn stats(&self, location: &Location, now: DateTime<Utc>) -> AppResult<LocationStats> {
        let employees = self.store.employees(location.id, true).await?;
        let total = employees.len() as u64;

        let mut clocked_in = 0u64;
        for employee in employees {
            if self.state_of(employee).await?.state == AttendanceState::ClockedIn {
                clocked_in += 1;
            }
        }

        let tz = location.tz()?;
        let since = local_midnight(local_today(tz, now), tz);
        let today_events = self.store.count_events_since(location.id, since).await?;

        Ok(LocationStats {
            total_employees: total,
            clocked_in_count: clocked_in,
            clocked_out_count: total - clocked_in,
            today_events,
        })
    }
}
