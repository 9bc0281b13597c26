use crate::api::admin::UpdateLocation;
use crate::api::devices::{DeviceRegistered, RegisterDevice};
use crate::api::embeddings::StoreEmbedding;
use crate::api::employees::{CreateEmployee, EmployeeStateResponse, UpdateEmployee, VerifyPin};
use crate::api::time_events::{CorrectTimeEvent, CreateTimeEvent};
use crate::auth::middleware::API_KEY_HEADER;
use crate::model::attendance::{AttendanceEvent, AttendanceState, CaptureMethod, EventKind};
use crate::model::device::Device;
use crate::model::employee::Employee;
use crate::model::location::Location;
use crate::service::clock::{ClockedInEntry, LocationStats};
use crate::service::export::ExportOutcome;
use crate::service::templates::SyncTemplate;
use utoipa::Modify;
use utoipa::OpenApi;
use utoipa::openapi::security::{ApiKey, ApiKeyValue, SecurityScheme};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Kiosk Attendance API",
        version = "1.0.0",
        description = r#"
## Kiosk time tracking

Backend for tablet kiosks that clock employees in and out by face or PIN.

### Security
Kiosks register once at `/api/devices/register` and receive an API key.
Every other `/api` call sends it in the `X-Device-API-Key` header and only
sees data of the kiosk's own location.

### Daily export
Each location with a manager email receives yesterday's events as CSV,
stamped in the location's timezone.
"#,
    ),
    paths(
        crate::api::health,

        crate::api::devices::register_device,
        crate::api::devices::me,
        crate::api::devices::ping,

        crate::api::employees::list_employees,
        crate::api::employees::create_employee,
        crate::api::employees::update_employee,
        crate::api::employees::deactivate_employee,
        crate::api::employees::employee_state,
        crate::api::employees::verify_pin,

        crate::api::embeddings::store_embedding,
        crate::api::embeddings::delete_embedding,
        crate::api::embeddings::sync_embeddings,

        crate::api::time_events::create_time_event,
        crate::api::time_events::list_time_events,
        crate::api::time_events::get_time_event,
        crate::api::time_events::correct_time_event,
        crate::api::time_events::invalidate_time_event,
        crate::api::time_events::clocked_in,

        crate::api::admin::export_now,
        crate::api::admin::stats,
        crate::api::admin::clocked_in,
        crate::api::admin::get_location,
        crate::api::admin::update_location,
        crate::api::admin::get_setting,
        crate::api::admin::put_setting
    ),
    components(
        schemas(
            RegisterDevice,
            DeviceRegistered,
            Device,
            Location,
            UpdateLocation,
            Employee,
            CreateEmployee,
            UpdateEmployee,
            EmployeeStateResponse,
            VerifyPin,
            StoreEmbedding,
            SyncTemplate,
            AttendanceEvent,
            AttendanceState,
            EventKind,
            CaptureMethod,
            CreateTimeEvent,
            CorrectTimeEvent,
            ClockedInEntry,
            LocationStats,
            ExportOutcome
        )
    ),
    modifiers(&DeviceKeyAddon),
    tags(
        (name = "Health", description = "Liveness"),
        (name = "Devices", description = "Kiosk registration and heartbeat"),
        (name = "Employee", description = "Employee management APIs"),
        (name = "Embeddings", description = "Encrypted face templates"),
        (name = "Time Events", description = "Clock in/out ledger"),
        (name = "Admin", description = "Location settings and exports"),
    )
)]
pub struct ApiDoc;

struct DeviceKeyAddon;

impl Modify for DeviceKeyAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "api_key",
                SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::new(API_KEY_HEADER))),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn documents_every_route_and_the_key_header() {
        let doc = ApiDoc::openapi();
        assert!(doc.paths.paths.contains_key("/api/time-events"));
        assert!(doc.paths.paths.contains_key("/api/admin/export-now"));
        let schemes = doc.components.as_ref().map(|c| c.security_schemes.len());
        assert_eq!(schemes, Some(1));
    }
}
