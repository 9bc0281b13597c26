use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{FromRow, MySqlPool, types::Json};
use tracing::debug;

use super::{LedgerStore, StoreError, StoreResult};
use crate::model::{
    attendance::{
        AttendanceEvent, EventCorrection, EventFilter, EventKind, ExportRecord, LedgerHead,
        NewAttendanceEvent,
    },
    device::{Device, NewDevice},
    employee::{Employee, EmployeeUpdate, NewEmployee},
    location::{Location, LocationUpdate, NewLocation},
    template::{BiometricTemplate, OwnedTemplate},
};

const LOCATION_COLUMNS: &str =
    "id, name, manager_email, export_time, timezone, created_at, updated_at";
const EMPLOYEE_COLUMNS: &str =
    "id, location_id, employee_code, name, pin_hash, is_active, created_at, updated_at";
const DEVICE_COLUMNS: &str =
    "id, device_code, location_id, api_key_hash, name, registered_at, last_seen_at";
const EVENT_COLUMNS: &str =
    "id, employee_id, device_id, location_id, event_type, event_time, method, is_valid, created_at";

// Kind and method are VARCHAR columns; they are parsed here rather than trusted.
#[derive(FromRow)]
struct EventRow {
    id: u64,
    employee_id: u64,
    device_id: u64,
    location_id: u64,
    event_type: String,
    event_time: DateTime<Utc>,
    method: String,
    is_valid: bool,
    created_at: DateTime<Utc>,
}

impl TryFrom<EventRow> for AttendanceEvent {
    type Error = StoreError;

    fn try_from(row: EventRow) -> Result<Self, Self::Error> {
        let kind = row
            .event_type
            .parse()
            .map_err(|_| StoreError::Corrupt(format!("event {}: type {:?}", row.id, row.event_type)))?;
        let method = row
            .method
            .parse()
            .map_err(|_| StoreError::Corrupt(format!("event {}: method {:?}", row.id, row.method)))?;
        Ok(AttendanceEvent {
            id: row.id,
            employee_id: row.employee_id,
            device_id: row.device_id,
            location_id: row.location_id,
            kind,
            event_time: row.event_time,
            method,
            is_valid: row.is_valid,
            created_at: row.created_at,
        })
    }
}

#[derive(FromRow)]
struct ExportRow {
    #[sqlx(flatten)]
    event: EventRow,
    employee_code: String,
    employee_name: String,
    device_code: String,
}

#[derive(FromRow)]
struct TemplateRow {
    #[sqlx(flatten)]
    employee: Employee,
    ciphertext: Vec<u8>,
    key_version: String,
    template_created_at: DateTime<Utc>,
    template_updated_at: DateTime<Utc>,
}

fn map_write_err(e: sqlx::Error, what: &'static str) -> StoreError {
    if let sqlx::Error::Database(db_err) = &e {
        if db_err.is_unique_violation() {
            return StoreError::Duplicate(what);
        }
    }
    StoreError::Database(e)
}

pub struct MySqlStore {
    pool: MySqlPool,
}

impl MySqlStore {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for MySqlStore {
    async fn location(&self, id: u64) -> StoreResult<Option<Location>> {
        let sql = format!("SELECT {LOCATION_COLUMNS} FROM locations WHERE id = ?");
        Ok(sqlx::query_as::<_, Location>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn location_by_name(&self, name: &str) -> StoreResult<Option<Location>> {
        let sql = format!("SELECT {LOCATION_COLUMNS} FROM locations WHERE name = ?");
        Ok(sqlx::query_as::<_, Location>(&sql)
            .bind(name)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn create_location(&self, new: NewLocation) -> StoreResult<Location> {
        let result = sqlx::query(
            r#"
            INSERT INTO locations (name, manager_email, export_time, timezone)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(&new.name)
        .bind(&new.manager_email)
        .bind(new.export_time)
        .bind(&new.timezone)
        .execute(&self.pool)
        .await
        .map_err(|e| map_write_err(e, "location"))?;

        self.location(result.last_insert_id())
            .await?
            .ok_or_else(|| StoreError::Corrupt("inserted location vanished".into()))
    }

    async fn update_location(
        &self,
        id: u64,
        update: LocationUpdate,
    ) -> StoreResult<Option<Location>> {
        let result = sqlx::query(
            r#"
            UPDATE locations
            SET manager_email = COALESCE(?, manager_email),
                export_time = COALESCE(?, export_time),
                timezone = COALESCE(?, timezone),
                updated_at = CURRENT_TIMESTAMP(6)
            WHERE id = ?
            "#,
        )
        .bind(update.manager_email)
        .bind(update.export_time)
        .bind(update.timezone)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.location(id).await
    }

    async fn export_enabled_locations(&self) -> StoreResult<Vec<Location>> {
        let sql = format!(
            "SELECT {LOCATION_COLUMNS} FROM locations WHERE TRIM(manager_email) <> '' ORDER BY id"
        );
        Ok(sqlx::query_as::<_, Location>(&sql)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn employee_by_code(
        &self,
        location_id: u64,
        code: &str,
    ) -> StoreResult<Option<Employee>> {
        let sql = format!(
            "SELECT {EMPLOYEE_COLUMNS} FROM employees WHERE location_id = ? AND employee_code = ?"
        );
        Ok(sqlx::query_as::<_, Employee>(&sql)
            .bind(location_id)
            .bind(code)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn employees(&self, location_id: u64, active_only: bool) -> StoreResult<Vec<Employee>> {
        let sql = format!(
            "SELECT {EMPLOYEE_COLUMNS} FROM employees \
             WHERE location_id = ? AND (is_active = TRUE OR ? = FALSE) \
             ORDER BY name, id"
        );
        Ok(sqlx::query_as::<_, Employee>(&sql)
            .bind(location_id)
            .bind(active_only)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn create_employee(&self, new: NewEmployee) -> StoreResult<Employee> {
        let result = sqlx::query(
            r#"
            INSERT INTO employees (location_id, employee_code, name, pin_hash)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(new.location_id)
        .bind(&new.employee_code)
        .bind(&new.name)
        .bind(&new.pin_hash)
        .execute(&self.pool)
        .await
        .map_err(|e| map_write_err(e, "employee"))?;

        let sql = format!("SELECT {EMPLOYEE_COLUMNS} FROM employees WHERE id = ?");
        Ok(sqlx::query_as::<_, Employee>(&sql)
            .bind(result.last_insert_id())
            .fetch_one(&self.pool)
            .await?)
    }

    async fn update_employee(
        &self,
        id: u64,
        update: EmployeeUpdate,
    ) -> StoreResult<Option<Employee>> {
        sqlx::query(
            r#"
            UPDATE employees
            SET name = COALESCE(?, name),
                pin_hash = COALESCE(?, pin_hash),
                is_active = COALESCE(?, is_active),
                updated_at = CURRENT_TIMESTAMP(6)
            WHERE id = ?
            "#,
        )
        .bind(update.name)
        .bind(update.pin_hash)
        .bind(update.is_active)
        .bind(id)
        .execute(&self.pool)
        .await?;

        let sql = format!("SELECT {EMPLOYEE_COLUMNS} FROM employees WHERE id = ?");
        Ok(sqlx::query_as::<_, Employee>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn create_device(&self, new: NewDevice, api_key_hash: &str) -> StoreResult<Device> {
        let result = sqlx::query(
            r#"
            INSERT INTO devices (device_code, location_id, api_key_hash, name)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(&new.device_code)
        .bind(new.location_id)
        .bind(api_key_hash)
        .bind(&new.name)
        .execute(&self.pool)
        .await
        .map_err(|e| map_write_err(e, "device"))?;

        self.device(result.last_insert_id())
            .await?
            .ok_or_else(|| StoreError::Corrupt("inserted device vanished".into()))
    }

    async fn device(&self, id: u64) -> StoreResult<Option<Device>> {
        let sql = format!("SELECT {DEVICE_COLUMNS} FROM devices WHERE id = ?");
        Ok(sqlx::query_as::<_, Device>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn device_by_code(&self, code: &str) -> StoreResult<Option<Device>> {
        let sql = format!("SELECT {DEVICE_COLUMNS} FROM devices WHERE device_code = ?");
        Ok(sqlx::query_as::<_, Device>(&sql)
            .bind(code)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn touch_device(&self, id: u64, at: DateTime<Utc>) -> StoreResult<Option<Device>> {
        sqlx::query("UPDATE devices SET last_seen_at = ? WHERE id = ?")
            .bind(at)
            .bind(id)
            .execute(&self.pool)
            .await?;
        self.device(id).await
    }

    async fn last_valid_event(&self, employee_id: u64) -> StoreResult<Option<AttendanceEvent>> {
        let sql = format!(
            "SELECT {EVENT_COLUMNS} FROM time_events \
             WHERE employee_id = ? AND is_valid = TRUE \
             ORDER BY event_time DESC, id DESC LIMIT 1"
        );
        sqlx::query_as::<_, EventRow>(&sql)
            .bind(employee_id)
            .fetch_optional(&self.pool)
            .await?
            .map(AttendanceEvent::try_from)
            .transpose()
    }

    async fn append_event(
        &self,
        new: NewAttendanceEvent,
        expected_head: Option<LedgerHead>,
    ) -> StoreResult<AttendanceEvent> {
        let mut tx = self.pool.begin().await?;

        // serializes clock attempts for this employee only
        sqlx::query("SELECT id FROM employees WHERE id = ? FOR UPDATE")
            .bind(new.employee_id)
            .fetch_optional(&mut *tx)
            .await?;

        let head = sqlx::query_as::<_, (u64, String)>(
            r#"
            SELECT id, event_type FROM time_events
            WHERE employee_id = ? AND is_valid = TRUE
            ORDER BY event_time DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(new.employee_id)
        .fetch_optional(&mut *tx)
        .await?
        .map(|(id, event_type)| {
            event_type
                .parse::<EventKind>()
                .map(|kind| LedgerHead { id, kind })
                .map_err(|_| StoreError::Corrupt(format!("event {} has type {:?}", id, event_type)))
        })
        .transpose()?;

        if head != expected_head {
            debug!(
                employee_id = new.employee_id,
                ?head,
                ?expected_head,
                "Ledger head moved, rejecting append"
            );
            tx.rollback().await?;
            return Err(StoreError::Conflict);
        }

        let created_at = Utc::now();
        let result = sqlx::query(
            r#"
            INSERT INTO time_events
            (employee_id, device_id, location_id, event_type, event_time, method, is_valid, created_at)
            VALUES (?, ?, ?, ?, ?, ?, TRUE, ?)
            "#,
        )
        .bind(new.employee_id)
        .bind(new.device_id)
        .bind(new.location_id)
        .bind(new.kind.as_ref())
        .bind(new.event_time)
        .bind(new.method.as_ref())
        .bind(created_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(AttendanceEvent {
            id: result.last_insert_id(),
            employee_id: new.employee_id,
            device_id: new.device_id,
            location_id: new.location_id,
            kind: new.kind,
            event_time: new.event_time,
            method: new.method,
            is_valid: true,
            created_at,
        })
    }

    async fn event(&self, location_id: u64, id: u64) -> StoreResult<Option<AttendanceEvent>> {
        let sql = format!("SELECT {EVENT_COLUMNS} FROM time_events WHERE id = ? AND location_id = ?");
        sqlx::query_as::<_, EventRow>(&sql)
            .bind(id)
            .bind(location_id)
            .fetch_optional(&self.pool)
            .await?
            .map(AttendanceEvent::try_from)
            .transpose()
    }

    async fn correct_event(
        &self,
        location_id: u64,
        id: u64,
        correction: EventCorrection,
    ) -> StoreResult<Option<AttendanceEvent>> {
        let mut tx = self.pool.begin().await?;

        let employee_id: Option<u64> = sqlx::query_scalar(
            "SELECT employee_id FROM time_events WHERE id = ? AND location_id = ?",
        )
        .bind(id)
        .bind(location_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(employee_id) = employee_id else {
            tx.rollback().await?;
            return Ok(None);
        };

        // same lock as append_event, so a correction cannot slip between a
        // clock attempt's head check and its insert
        sqlx::query("SELECT id FROM employees WHERE id = ? FOR UPDATE")
            .bind(employee_id)
            .fetch_optional(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            UPDATE time_events
            SET event_type = COALESCE(?, event_type),
                is_valid = COALESCE(?, is_valid)
            WHERE id = ?
            "#,
        )
        .bind(correction.kind.map(|k| k.as_ref().to_string()))
        .bind(correction.is_valid)
        .bind(id)
        .execute(&mut *tx)
        .await?;

        let sql = format!("SELECT {EVENT_COLUMNS} FROM time_events WHERE id = ?");
        let row = sqlx::query_as::<_, EventRow>(&sql)
            .bind(id)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(Some(AttendanceEvent::try_from(row)?))
    }

    async fn events(&self, filter: EventFilter) -> StoreResult<Vec<AttendanceEvent>> {
        let mut conditions = vec!["location_id = ?"];
        if filter.employee_id.is_some() {
            conditions.push("employee_id = ?");
        }
        if filter.from.is_some() {
            conditions.push("event_time >= ?");
        }
        if filter.until.is_some() {
            conditions.push("event_time < ?");
        }

        let sql = format!(
            "SELECT {EVENT_COLUMNS} FROM time_events WHERE {} \
             ORDER BY event_time DESC, id DESC LIMIT ?",
            conditions.join(" AND ")
        );
        debug!(sql = %sql, "Listing time events");

        let mut query = sqlx::query_as::<_, EventRow>(&sql).bind(filter.location_id);
        if let Some(employee_id) = filter.employee_id {
            query = query.bind(employee_id);
        }
        if let Some(from) = filter.from {
            query = query.bind(from);
        }
        if let Some(until) = filter.until {
            query = query.bind(until);
        }
        query = query.bind(filter.limit);

        query
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(AttendanceEvent::try_from)
            .collect()
    }

    async fn count_events_since(&self, location_id: u64, since: DateTime<Utc>) -> StoreResult<u64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM time_events WHERE location_id = ? AND event_time >= ?",
        )
        .bind(location_id)
        .bind(since)
        .fetch_one(&self.pool)
        .await?;
        Ok(count.max(0) as u64)
    }

    async fn export_records(
        &self,
        location_id: u64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StoreResult<Vec<ExportRecord>> {
        let rows = sqlx::query_as::<_, ExportRow>(
            r#"
            SELECT
                t.id, t.employee_id, t.device_id, t.location_id, t.event_type,
                t.event_time, t.method, t.is_valid, t.created_at,
                e.employee_code,
                e.name AS employee_name,
                d.device_code
            FROM time_events t
            JOIN employees e ON e.id = t.employee_id
            JOIN devices d ON d.id = t.device_id
            WHERE t.location_id = ?
              AND t.event_time >= ?
              AND t.event_time < ?
            ORDER BY t.event_time ASC, t.id ASC
            "#,
        )
        .bind(location_id)
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(ExportRecord {
                    event: AttendanceEvent::try_from(row.event)?,
                    employee_code: row.employee_code,
                    employee_name: row.employee_name,
                    device_code: row.device_code,
                })
            })
            .collect()
    }

    async fn upsert_template(
        &self,
        employee_id: u64,
        ciphertext: &[u8],
        key_version: &str,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO biometric_templates (employee_id, ciphertext, key_version)
            VALUES (?, ?, ?)
            ON DUPLICATE KEY UPDATE
                ciphertext = VALUES(ciphertext),
                key_version = VALUES(key_version),
                updated_at = CURRENT_TIMESTAMP(6)
            "#,
        )
        .bind(employee_id)
        .bind(ciphertext)
        .bind(key_version)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn templates_for_location(&self, location_id: u64) -> StoreResult<Vec<OwnedTemplate>> {
        let rows = sqlx::query_as::<_, TemplateRow>(
            r#"
            SELECT
                e.id, e.location_id, e.employee_code, e.name, e.pin_hash,
                e.is_active, e.created_at, e.updated_at,
                b.ciphertext, b.key_version,
                b.created_at AS template_created_at,
                b.updated_at AS template_updated_at
            FROM employees e
            JOIN biometric_templates b ON b.employee_id = e.id
            WHERE e.location_id = ? AND e.is_active = TRUE
            ORDER BY e.id
            "#,
        )
        .bind(location_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| OwnedTemplate {
                template: BiometricTemplate {
                    employee_id: row.employee.id,
                    ciphertext: row.ciphertext,
                    key_version: row.key_version,
                    created_at: row.template_created_at,
                    updated_at: row.template_updated_at,
                },
                employee: row.employee,
            })
            .collect())
    }

    async fn delete_template(&self, employee_id: u64) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM biometric_templates WHERE employee_id = ?")
            .bind(employee_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn setting(&self, location_id: u64, key: &str) -> StoreResult<Option<Value>> {
        let value: Option<Json<Value>> = sqlx::query_scalar(
            "SELECT value FROM settings WHERE location_id = ? AND setting_key = ?",
        )
        .bind(location_id)
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(value.map(|Json(v)| v))
    }

    async fn put_setting(&self, location_id: u64, key: &str, value: Value) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO settings (location_id, setting_key, value)
            VALUES (?, ?, ?)
            ON DUPLICATE KEY UPDATE
                value = VALUES(value),
                updated_at = CURRENT_TIMESTAMP(6)
            "#,
        )
        .bind(location_id)
        .bind(key)
        .bind(Json(value))
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
