use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::Mutex;

use super::{LedgerStore, StoreError, StoreResult};
use crate::model::{
    attendance::{
        AttendanceEvent, EventCorrection, EventFilter, ExportRecord, LedgerHead, NewAttendanceEvent,
    },
    device::{Device, NewDevice},
    employee::{Employee, EmployeeUpdate, NewEmployee},
    location::{Location, LocationUpdate, NewLocation},
    template::{BiometricTemplate, OwnedTemplate},
};

#[derive(Default)]
struct Tables {
    seq: u64,
    locations: Vec<Location>,
    employees: Vec<Employee>,
    devices: Vec<Device>,
    events: Vec<AttendanceEvent>,
    templates: HashMap<u64, BiometricTemplate>,
    settings: HashMap<(u64, String), Value>,
}

impl Tables {
    fn next_id(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }

    fn head(&self, employee_id: u64) -> Option<&AttendanceEvent> {
        self.events
            .iter()
            .filter(|e| e.employee_id == employee_id && e.is_valid)
            .max_by_key(|e| (e.event_time, e.id))
    }
}

/// In-process store. One lock over all tables, so every operation is serializable.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn location(&self, id: u64) -> StoreResult<Option<Location>> {
        let t = self.tables.lock().await;
        Ok(t.locations.iter().find(|l| l.id == id).cloned())
    }

    async fn location_by_name(&self, name: &str) -> StoreResult<Option<Location>> {
        let t = self.tables.lock().await;
        Ok(t.locations.iter().find(|l| l.name == name).cloned())
    }

    async fn create_location(&self, new: NewLocation) -> StoreResult<Location> {
        let mut t = self.tables.lock().await;
        if t.locations.iter().any(|l| l.name == new.name) {
            return Err(StoreError::Duplicate("location"));
        }
        let now = Utc::now();
        let location = Location {
            id: t.next_id(),
            name: new.name,
            manager_email: new.manager_email,
            export_time: new.export_time,
            timezone: new.timezone,
            created_at: now,
            updated_at: now,
        };
        t.locations.push(location.clone());
        Ok(location)
    }

    async fn update_location(
        &self,
        id: u64,
        update: LocationUpdate,
    ) -> StoreResult<Option<Location>> {
        let mut t = self.tables.lock().await;
        let Some(location) = t.locations.iter_mut().find(|l| l.id == id) else {
            return Ok(None);
        };
        if let Some(email) = update.manager_email {
            location.manager_email = email;
        }
        if let Some(export_time) = update.export_time {
            location.export_time = export_time;
        }
        if let Some(timezone) = update.timezone {
            location.timezone = timezone;
        }
        location.updated_at = Utc::now();
        Ok(Some(location.clone()))
    }

    async fn export_enabled_locations(&self) -> StoreResult<Vec<Location>> {
        let t = self.tables.lock().await;
        Ok(t.locations
            .iter()
            .filter(|l| l.export_enabled())
            .cloned()
            .collect())
    }

    async fn employee_by_code(
        &self,
        location_id: u64,
        code: &str,
    ) -> StoreResult<Option<Employee>> {
        let t = self.tables.lock().await;
        Ok(t.employees
            .iter()
            .find(|e| e.location_id == location_id && e.employee_code == code)
            .cloned())
    }

    async fn employees(&self, location_id: u64, active_only: bool) -> StoreResult<Vec<Employee>> {
        let t = self.tables.lock().await;
        let mut list: Vec<Employee> = t
            .employees
            .iter()
            .filter(|e| e.location_id == location_id && (!active_only || e.is_active))
            .cloned()
            .collect();
        list.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(list)
    }

    async fn create_employee(&self, new: NewEmployee) -> StoreResult<Employee> {
        let mut t = self.tables.lock().await;
        if t.employees
            .iter()
            .any(|e| e.location_id == new.location_id && e.employee_code == new.employee_code)
        {
            return Err(StoreError::Duplicate("employee"));
        }
        let now = Utc::now();
        let employee = Employee {
            id: t.next_id(),
            location_id: new.location_id,
            employee_code: new.employee_code,
            name: new.name,
            pin_hash: new.pin_hash,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        t.employees.push(employee.clone());
        Ok(employee)
    }

    async fn update_employee(
        &self,
        id: u64,
        update: EmployeeUpdate,
    ) -> StoreResult<Option<Employee>> {
        let mut t = self.tables.lock().await;
        let Some(employee) = t.employees.iter_mut().find(|e| e.id == id) else {
            return Ok(None);
        };
        if let Some(name) = update.name {
            employee.name = name;
        }
        if let Some(pin_hash) = update.pin_hash {
            employee.pin_hash = pin_hash;
        }
        if let Some(active) = update.is_active {
            employee.is_active = active;
        }
        employee.updated_at = Utc::now();
        Ok(Some(employee.clone()))
    }

    async fn create_device(&self, new: NewDevice, api_key_hash: &str) -> StoreResult<Device> {
        let mut t = self.tables.lock().await;
        if t.devices.iter().any(|d| d.device_code == new.device_code) {
            return Err(StoreError::Duplicate("device"));
        }
        let now = Utc::now();
        let device = Device {
            id: t.next_id(),
            device_code: new.device_code,
            location_id: new.location_id,
            api_key_hash: api_key_hash.to_string(),
            name: new.name,
            registered_at: now,
            last_seen_at: now,
        };
        t.devices.push(device.clone());
        Ok(device)
    }

    async fn device(&self, id: u64) -> StoreResult<Option<Device>> {
        let t = self.tables.lock().await;
        Ok(t.devices.iter().find(|d| d.id == id).cloned())
    }

    async fn device_by_code(&self, code: &str) -> StoreResult<Option<Device>> {
        let t = self.tables.lock().await;
        Ok(t.devices.iter().find(|d| d.device_code == code).cloned())
    }

    async fn touch_device(&self, id: u64, at: DateTime<Utc>) -> StoreResult<Option<Device>> {
        let mut t = self.tables.lock().await;
        let Some(device) = t.devices.iter_mut().find(|d| d.id == id) else {
            return Ok(None);
        };
        device.last_seen_at = at;
        Ok(Some(device.clone()))
    }

    async fn last_valid_event(&self, employee_id: u64) -> StoreResult<Option<AttendanceEvent>> {
        let t = self.tables.lock().await;
        Ok(t.head(employee_id).cloned())
    }

    async fn append_event(
        &self,
        new: NewAttendanceEvent,
        expected_head: Option<LedgerHead>,
    ) -> StoreResult<AttendanceEvent> {
        let mut t = self.tables.lock().await;
        if t.head(new.employee_id).map(LedgerHead::from) != expected_head {
            return Err(StoreError::Conflict);
        }
        let event = AttendanceEvent {
            id: t.next_id(),
            employee_id: new.employee_id,
            device_id: new.device_id,
            location_id: new.location_id,
            kind: new.kind,
            event_time: new.event_time,
            method: new.method,
            is_valid: true,
            created_at: Utc::now(),
        };
        t.events.push(event.clone());
        Ok(event)
    }

    async fn event(&self, location_id: u64, id: u64) -> StoreResult<Option<AttendanceEvent>> {
        let t = self.tables.lock().await;
        Ok(t.events
            .iter()
            .find(|e| e.id == id && e.location_id == location_id)
            .cloned())
    }

    async fn correct_event(
        &self,
        location_id: u64,
        id: u64,
        correction: EventCorrection,
    ) -> StoreResult<Option<AttendanceEvent>> {
        let mut t = self.tables.lock().await;
        let Some(event) = t
            .events
            .iter_mut()
            .find(|e| e.id == id && e.location_id == location_id)
        else {
            return Ok(None);
        };
        if let Some(kind) = correction.kind {
            event.kind = kind;
        }
        if let Some(valid) = correction.is_valid {
            event.is_valid = valid;
        }
        Ok(Some(event.clone()))
    }

    async fn events(&self, filter: EventFilter) -> StoreResult<Vec<AttendanceEvent>> {
        let t = self.tables.lock().await;
        let mut list: Vec<AttendanceEvent> = t
            .events
            .iter()
            .filter(|e| e.location_id == filter.location_id)
            .filter(|e| filter.employee_id.is_none_or(|id| e.employee_id == id))
            .filter(|e| filter.from.is_none_or(|from| e.event_time >= from))
            .filter(|e| filter.until.is_none_or(|until| e.event_time < until))
            .cloned()
            .collect();
        list.sort_by(|a, b| (b.event_time, b.id).cmp(&(a.event_time, a.id)));
        list.truncate(filter.limit as usize);
        Ok(list)
    }

    async fn count_events_since(&self, location_id: u64, since: DateTime<Utc>) -> StoreResult<u64> {
        let t = self.tables.lock().await;
        Ok(t.events
            .iter()
            .filter(|e| e.location_id == location_id && e.event_time >= since)
            .count() as u64)
    }

    async fn export_records(
        &self,
        location_id: u64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StoreResult<Vec<ExportRecord>> {
        let t = self.tables.lock().await;
        let mut events: Vec<&AttendanceEvent> = t
            .events
            .iter()
            .filter(|e| e.location_id == location_id && e.event_time >= start && e.event_time < end)
            .collect();
        events.sort_by_key(|e| (e.event_time, e.id));

        events
            .into_iter()
            .map(|event| {
                let employee = t
                    .employees
                    .iter()
                    .find(|emp| emp.id == event.employee_id)
                    .ok_or_else(|| StoreError::Corrupt(format!("event {} has no employee", event.id)))?;
                let device = t
                    .devices
                    .iter()
                    .find(|d| d.id == event.device_id)
                    .ok_or_else(|| StoreError::Corrupt(format!("event {} has no device", event.id)))?;
                Ok(ExportRecord {
                    event: event.clone(),
                    employee_code: employee.employee_code.clone(),
                    employee_name: employee.name.clone(),
                    device_code: device.device_code.clone(),
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
        let mut t = self.tables.lock().await;
        let now = Utc::now();
        t.templates
            .entry(employee_id)
            .and_modify(|tpl| {
                tpl.ciphertext = ciphertext.to_vec();
                tpl.key_version = key_version.to_string();
                tpl.updated_at = now;
            })
            .or_insert_with(|| BiometricTemplate {
                employee_id,
                ciphertext: ciphertext.to_vec(),
                key_version: key_version.to_string(),
                created_at: now,
                updated_at: now,
            });
        Ok(())
    }

    async fn templates_for_location(&self, location_id: u64) -> StoreResult<Vec<OwnedTemplate>> {
        let t = self.tables.lock().await;
        let mut employees: Vec<&Employee> = t
            .employees
            .iter()
            .filter(|e| e.location_id == location_id && e.is_active)
            .collect();
        employees.sort_by_key(|e| e.id);
        Ok(employees
            .into_iter()
            .filter_map(|employee| {
                t.templates.get(&employee.id).map(|template| OwnedTemplate {
                    employee: employee.clone(),
                    template: template.clone(),
                })
            })
            .collect())
    }

    async fn delete_template(&self, employee_id: u64) -> StoreResult<bool> {
        let mut t = self.tables.lock().await;
        Ok(t.templates.remove(&employee_id).is_some())
    }

    async fn setting(&self, location_id: u64, key: &str) -> StoreResult<Option<Value>> {
        let t = self.tables.lock().await;
        Ok(t.settings.get(&(location_id, key.to_string())).cloned())
    }

    async fn put_setting(&self, location_id: u64, key: &str, value: Value) -> StoreResult<()> {
        let mut t = self.tables.lock().await;
        t.settings.insert((location_id, key.to_string()), value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::attendance::{CaptureMethod, EventKind};
    use chrono::NaiveTime;

    async fn seed(store: &MemoryStore) -> (Location, Employee, Device) {
        let location = store
            .create_location(NewLocation {
                name: "Plant".into(),
                manager_email: String::new(),
                export_time: NaiveTime::from_hms_opt(1, 0, 0).unwrap(),
                timezone: "UTC".into(),
            })
            .await
            .unwrap();
        let employee = store
            .create_employee(NewEmployee {
                location_id: location.id,
                employee_code: "E1".into(),
                name: "Ada".into(),
                pin_hash: "x".into(),
            })
            .await
            .unwrap();
        let device = store
            .create_device(
                NewDevice {
                    device_code: "kiosk-1".into(),
                    location_id: location.id,
                    name: None,
                },
                "hash",
            )
            .await
            .unwrap();
        (location, employee, device)
    }

    fn new_event(employee: &Employee, device: &Device, kind: EventKind) -> NewAttendanceEvent {
        NewAttendanceEvent {
            employee_id: employee.id,
            device_id: device.id,
            location_id: employee.location_id,
            kind,
            event_time: Utc::now(),
            method: CaptureMethod::Pin,
        }
    }

    #[actix_web::test]
    async fn employee_code_is_unique_per_location_only() {
        let store = MemoryStore::new();
        let (location, _, _) = seed(&store).await;
        let other = store
            .create_location(NewLocation {
                name: "Warehouse".into(),
                manager_email: String::new(),
                export_time: NaiveTime::MIN,
                timezone: "UTC".into(),
            })
            .await
            .unwrap();

        let dup = store
            .create_employee(NewEmployee {
                location_id: location.id,
                employee_code: "E1".into(),
                name: "Bob".into(),
                pin_hash: "x".into(),
            })
            .await;
        assert!(matches!(dup, Err(StoreError::Duplicate("employee"))));

        let elsewhere = store
            .create_employee(NewEmployee {
                location_id: other.id,
                employee_code: "E1".into(),
                name: "Bob".into(),
                pin_hash: "x".into(),
            })
            .await;
        assert!(elsewhere.is_ok());
    }

    #[actix_web::test]
    async fn append_rejects_stale_head() {
        let store = MemoryStore::new();
        let (_, employee, device) = seed(&store).await;

        let first = store
            .append_event(new_event(&employee, &device, EventKind::In), None)
            .await
            .unwrap();

        let stale = store
            .append_event(new_event(&employee, &device, EventKind::In), None)
            .await;
        assert!(matches!(stale, Err(StoreError::Conflict)));

        let next = store
            .append_event(new_event(&employee, &device, EventKind::Out), Some(LedgerHead::from(&first)))
            .await;
        assert!(next.is_ok());
    }

    #[actix_web::test]
    async fn kind_correction_of_head_counts_as_moved() {
        let store = MemoryStore::new();
        let (location, employee, device) = seed(&store).await;

        let clock_in = store
            .append_event(new_event(&employee, &device, EventKind::In), None)
            .await
            .unwrap();
        let validated_against = LedgerHead::from(&clock_in);

        store
            .correct_event(
                location.id,
                clock_in.id,
                EventCorrection {
                    kind: Some(EventKind::Out),
                    is_valid: None,
                },
            )
            .await
            .unwrap();

        // an OUT validated against the old IN must not land after the corrected OUT
        let stale = store
            .append_event(new_event(&employee, &device, EventKind::Out), Some(validated_against))
            .await;
        assert!(matches!(stale, Err(StoreError::Conflict)));
    }

    #[actix_web::test]
    async fn invalidating_head_exposes_previous_event() {
        let store = MemoryStore::new();
        let (location, employee, device) = seed(&store).await;

        let clock_in = store
            .append_event(new_event(&employee, &device, EventKind::In), None)
            .await
            .unwrap();
        let clock_out = store
            .append_event(new_event(&employee, &device, EventKind::Out), Some(LedgerHead::from(&clock_in)))
            .await
            .unwrap();

        store
            .correct_event(
                location.id,
                clock_out.id,
                EventCorrection {
                    kind: None,
                    is_valid: Some(false),
                },
            )
            .await
            .unwrap();

        let head = store.last_valid_event(employee.id).await.unwrap().unwrap();
        assert_eq!(head.id, clock_in.id);
    }

    #[actix_web::test]
    async fn template_upsert_keeps_one_row() {
        let store = MemoryStore::new();
        let (location, employee, _) = seed(&store).await;

        store.upsert_template(employee.id, b"one", "v1").await.unwrap();
        store.upsert_template(employee.id, b"two", "v2").await.unwrap();

        let templates = store.templates_for_location(location.id).await.unwrap();
        assert_eq!(templates.len(), 1);
        assert_eq!(templates[0].template.ciphertext, b"two");
        assert_eq!(templates[0].template.key_version, "v2");

        assert!(store.delete_template(employee.id).await.unwrap());
        assert!(!store.delete_template(employee.id).await.unwrap());
    }
}
