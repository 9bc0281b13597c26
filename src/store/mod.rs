//! Persistence boundary.
//!
//! `LedgerStore` is everything the core needs from storage. `MySqlStore` is the
//! production implementation; `MemoryStore` has the same semantics and backs
//! tests and `memory://` runs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;

use crate::model::{
    attendance::{
        AttendanceEvent, EventCorrection, EventFilter, ExportRecord, LedgerHead, NewAttendanceEvent,
    },
    device::{Device, NewDevice},
    employee::{Employee, EmployeeUpdate, NewEmployee},
    location::{Location, LocationUpdate, NewLocation},
    template::OwnedTemplate,
};

pub mod memory;
pub mod mysql;

pub use memory::MemoryStore;
pub use mysql::MySqlStore;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    /// A uniqueness constraint rejected the write.
    #[error("duplicate {0}")]
    Duplicate(&'static str),

    /// The employee's last valid event changed between read and write.
    #[error("ledger head moved since it was read")]
    Conflict,

    #[error("corrupt row: {0}")]
    Corrupt(String),
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    // ---------- locations ----------
    async fn location(&self, id: u64) -> StoreResult<Option<Location>>;
    async fn location_by_name(&self, name: &str) -> StoreResult<Option<Location>>;
    async fn create_location(&self, new: NewLocation) -> StoreResult<Location>;
    async fn update_location(&self, id: u64, update: LocationUpdate)
    -> StoreResult<Option<Location>>;
    /// Locations with a non-empty manager email.
    async fn export_enabled_locations(&self) -> StoreResult<Vec<Location>>;

    // ---------- employees ----------
    async fn employee_by_code(&self, location_id: u64, code: &str)
    -> StoreResult<Option<Employee>>;
    async fn employees(&self, location_id: u64, active_only: bool) -> StoreResult<Vec<Employee>>;
    async fn create_employee(&self, new: NewEmployee) -> StoreResult<Employee>;
    async fn update_employee(&self, id: u64, update: EmployeeUpdate)
    -> StoreResult<Option<Employee>>;

    // ---------- devices ----------
    async fn create_device(&self, new: NewDevice, api_key_hash: &str) -> StoreResult<Device>;
    async fn device(&self, id: u64) -> StoreResult<Option<Device>>;
    async fn device_by_code(&self, code: &str) -> StoreResult<Option<Device>>;
    async fn touch_device(&self, id: u64, at: DateTime<Utc>) -> StoreResult<Option<Device>>;

    // ---------- ledger ----------
    /// Most recent valid event, ordered by `(event_time, id)`.
    async fn last_valid_event(&self, employee_id: u64) -> StoreResult<Option<AttendanceEvent>>;

    /// Append `new` only if the employee's last valid event is still
    /// `expected_head`, same id and same kind; otherwise `StoreError::Conflict`.
    /// Atomic per employee.
    async fn append_event(
        &self,
        new: NewAttendanceEvent,
        expected_head: Option<LedgerHead>,
    ) -> StoreResult<AttendanceEvent>;

    async fn event(&self, location_id: u64, id: u64) -> StoreResult<Option<AttendanceEvent>>;
    async fn correct_event(
        &self,
        location_id: u64,
        id: u64,
        correction: EventCorrection,
    ) -> StoreResult<Option<AttendanceEvent>>;
    /// Newest first, at most `filter.limit`.
    async fn events(&self, filter: EventFilter) -> StoreResult<Vec<AttendanceEvent>>;
    async fn count_events_since(&self, location_id: u64, since: DateTime<Utc>) -> StoreResult<u64>;
    /// Valid and invalid events in `[start, end)`, oldest first.
    async fn export_records(
        &self,
        location_id: u64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StoreResult<Vec<ExportRecord>>;

    // ---------- templates ----------
    async fn upsert_template(
        &self,
        employee_id: u64,
        ciphertext: &[u8],
        key_version: &str,
    ) -> StoreResult<()>;
    /// Templates of active employees of the location.
    async fn templates_for_location(&self, location_id: u64) -> StoreResult<Vec<OwnedTemplate>>;
    async fn delete_template(&self, employee_id: u64) -> StoreResult<bool>;

    // ---------- settings ----------
    async fn setting(&self, location_id: u64, key: &str) -> StoreResult<Option<Value>>;
    async fn put_setting(&self, location_id: u64, key: &str, value: Value) -> StoreResult<()>;
}
