use actix_web::{HttpResponse, web};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use utoipa::{IntoParams, ToSchema};

use crate::auth::device::AuthDevice;
use crate::auth::password::{hash_secret, verify_secret};
use crate::error::{AppError, AppResult};
use crate::model::attendance::{AttendanceState, EventKind};
use crate::model::employee::{Employee, EmployeeUpdate, NewEmployee};
use crate::state::AppState;

#[derive(Debug, Deserialize, Serialize, ToSchema)]
pub struct CreateEmployee {
    #[schema(example = "EMP-001")]
    pub employee_code: String,
    #[schema(example = "John Doe")]
    pub name: String,
    /// 4 to 8 digits.
    #[schema(example = "1234")]
    pub pin: String,
}

#[derive(Debug, Default, Deserialize, Serialize, ToSchema)]
pub struct UpdateEmployee {
    pub name: Option<String>,
    pub pin: Option<String>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct EmployeeQuery {
    /// Only active employees. Defaults to false.
    pub active_only: Option<bool>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct EmployeeStateResponse {
    #[schema(example = "EMP-001")]
    pub employee_code: String,
    pub name: String,
    pub state: AttendanceState,
    #[schema(value_type = Option<String>, format = "date-time")]
    pub last_event_time: Option<DateTime<Utc>>,
    pub last_event_kind: Option<EventKind>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct VerifyPin {
    #[schema(example = "1234")]
    pub pin: String,
}

pub(crate) fn validate_pin(pin: &str) -> AppResult<()> {
    if (4..=8).contains(&pin.len()) && pin.chars().all(|c| c.is_ascii_digit()) {
        Ok(())
    } else {
        Err(AppError::BadRequest("PIN must be 4 to 8 digits".into()))
    }
}

pub(crate) async fn employee_in_location(
    state: &AppState,
    location_id: u64,
    code: &str,
) -> AppResult<Employee> {
    state
        .store
        .employee_by_code(location_id, code)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Employee {} not found", code)))
}

/// List employees of the device's location
#[utoipa::path(
    get,
    path = "/api/employees",
    params(EmployeeQuery),
    responses(
        (status = 200, description = "Employees ordered by name", body = [Employee]),
        (status = 401, description = "Missing or invalid API key"),
    ),
    tag = "Employee",
    security(("api_key" = []))
)]
pub async fn list_employees(
    device: AuthDevice,
    state: web::Data<AppState>,
    query: web::Query<EmployeeQuery>,
) -> AppResult<HttpResponse> {
    let employees = state
        .store
        .employees(device.location_id, query.active_only.unwrap_or(false))
        .await?;
    Ok(HttpResponse::Ok().json(employees))
}

/// Create Employee
#[utoipa::path(
    post,
    path = "/api/employees",
    request_body = CreateEmployee,
    responses(
        (status = 201, description = "Employee created", body = Employee),
        (status = 400, description = "Invalid PIN or empty fields"),
        (status = 409, description = "Employee code already used at this location"),
    ),
    tag = "Employee",
    security(("api_key" = []))
)]
#[instrument(name = "create_employee", skip(state, payload), fields(location_id = device.location_id, employee_code = %payload.employee_code))]
pub async fn create_employee(
    device: AuthDevice,
    state: web::Data<AppState>,
    payload: web::Json<CreateEmployee>,
) -> AppResult<HttpResponse> {
    let payload = payload.into_inner();
    let code = payload.employee_code.trim();
    let name = payload.name.trim();
    if code.is_empty() || name.is_empty() {
        return Err(AppError::BadRequest("employee_code and name are required".into()));
    }
    validate_pin(&payload.pin)?;

    let employee = state
        .store
        .create_employee(NewEmployee {
            location_id: device.location_id,
            employee_code: code.to_string(),
            name: name.to_string(),
            pin_hash: hash_secret(&payload.pin)?,
        })
        .await?;

    info!(employee_id = employee.id, "Employee created");
    Ok(HttpResponse::Created().json(employee))
}

/// Update Employee
#[utoipa::path(
    put,
    path = "/api/employees/{code}",
    params(("code" = String, Path, description = "Employee code")),
    request_body = UpdateEmployee,
    responses(
        (status = 200, description = "Updated employee", body = Employee),
        (status = 404, description = "No such employee at this location"),
    ),
    tag = "Employee",
    security(("api_key" = []))
)]
pub async fn update_employee(
    device: AuthDevice,
    state: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<UpdateEmployee>,
) -> AppResult<HttpResponse> {
    let employee = employee_in_location(&state, device.location_id, &path).await?;
    let payload = payload.into_inner();

    let pin_hash = match payload.pin.as_deref() {
        Some(pin) => {
            validate_pin(pin)?;
            Some(hash_secret(pin)?)
        }
        None => None,
    };
    let name = payload.name.map(|n| n.trim().to_string());
    if name.as_deref() == Some("") {
        return Err(AppError::BadRequest("name must not be empty".into()));
    }

    let updated = state
        .store
        .update_employee(
            employee.id,
            EmployeeUpdate {
                name,
                pin_hash,
                is_active: payload.is_active,
            },
        )
        .await?
        .ok_or_else(|| AppError::NotFound("Employee not found".into()))?;

    Ok(HttpResponse::Ok().json(updated))
}

/// Deactivate Employee
#[utoipa::path(
    post,
    path = "/api/employees/{code}/deactivate",
    params(("code" = String, Path, description = "Employee code")),
    responses(
        (status = 200, description = "Deactivated employee", body = Employee),
        (status = 404, description = "No such employee at this location"),
    ),
    tag = "Employee",
    security(("api_key" = []))
)]
pub async fn deactivate_employee(
    device: AuthDevice,
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> AppResult<HttpResponse> {
    let employee = employee_in_location(&state, device.location_id, &path).await?;
    let updated = state
        .store
        .update_employee(
            employee.id,
            EmployeeUpdate {
                is_active: Some(false),
                ..Default::default()
            },
        )
        .await?
        .ok_or_else(|| AppError::NotFound("Employee not found".into()))?;

    info!(employee_id = updated.id, location_id = device.location_id, "Employee deactivated");
    Ok(HttpResponse::Ok().json(updated))
}

/// Current clock state
#[utoipa::path(
    get,
    path = "/api/employees/{code}/state",
    params(("code" = String, Path, description = "Employee code")),
    responses(
        (status = 200, description = "Derived state", body = EmployeeStateResponse),
        (status = 404, description = "No such employee at this location"),
    ),
    tag = "Employee",
    security(("api_key" = []))
)]
pub async fn employee_state(
    device: AuthDevice,
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> AppResult<HttpResponse> {
    let current = state.clock.get_state(&path, device.location_id).await?;
    Ok(HttpResponse::Ok().json(EmployeeStateResponse {
        employee_code: current.employee.employee_code,
        name: current.employee.name,
        state: current.state,
        last_event_time: current.last_event.as_ref().map(|e| e.event_time),
        last_event_kind: current.last_event.as_ref().map(|e| e.kind),
    }))
}

/// PIN fallback check
#[utoipa::path(
    post,
    path = "/api/employees/{code}/verify-pin",
    params(("code" = String, Path, description = "Employee code")),
    request_body = VerifyPin,
    responses(
        (status = 200, description = "PIN matches", body = Employee),
        (status = 401, description = "PIN does not match"),
        (status = 403, description = "Employee is deactivated"),
        (status = 404, description = "No such employee at this location"),
    ),
    tag = "Employee",
    security(("api_key" = []))
)]
pub async fn verify_pin(
    device: AuthDevice,
    state: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<VerifyPin>,
) -> AppResult<HttpResponse> {
    let employee = employee_in_location(&state, device.location_id, &path).await?;
    if !employee.is_active {
        return Err(AppError::Forbidden(format!("Employee {} is deactivated", employee.employee_code)));
    }
    if !verify_secret(&payload.pin, &employee.pin_hash) {
        info!(employee_id = employee.id, "PIN rejected");
        return Err(AppError::Unauthorized("Invalid PIN".into()));
    }
    Ok(HttpResponse::Ok().json(employee))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pin_rules() {
        assert!(validate_pin("1234").is_ok());
        assert!(validate_pin("12345678").is_ok());
        assert!(validate_pin("123").is_err());
        assert!(validate_pin("123456789").is_err());
        assert!(validate_pin("12a4").is_err());
    }
}

#[cfg(test)]
mod http_tests {
    use crate::api::test_support::{authed, init_app, register, seed_employee, test_state};
    use actix_web::{http::StatusCode, test};
    use serde_json::json;

    #[actix_web::test]
    async fn create_list_and_never_expose_pin_hash() {
        let state = test_state(None);
        let app = init_app!(state);
        let key = register!(app, "kiosk-1", "Shop").api_key;

        seed_employee!(app, &key, "E1", "Ada", "1234");

        let req = authed(test::TestRequest::get().uri("/api/employees"), &key).to_request();
        let list: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(list.as_array().unwrap().len(), 1);
        assert_eq!(list[0]["employee_code"], "E1");
        assert!(list[0].get("pin_hash").is_none());

        let req = authed(test::TestRequest::post().uri("/api/employees"), &key)
            .set_json(json!({"employee_code": "E1", "name": "Other", "pin": "9999"}))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::CONFLICT);
    }

    #[actix_web::test]
    async fn other_locations_employees_are_invisible() {
        let state = test_state(None);
        let app = init_app!(state);
        let shop = register!(app, "kiosk-1", "Shop").api_key;
        let depot = register!(app, "kiosk-2", "Depot").api_key;

        seed_employee!(app, &shop, "E1", "Ada", "1234");

        let req = authed(test::TestRequest::get().uri("/api/employees/E1/state"), &depot).to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);

        let req = authed(test::TestRequest::get().uri("/api/employees/E1/state"), &shop).to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["state"], "CLOCKED_OUT");
    }

    #[actix_web::test]
    async fn pin_verification_and_deactivation() {
        let state = test_state(None);
        let app = init_app!(state);
        let key = register!(app, "kiosk-1", "Shop").api_key;
        seed_employee!(app, &key, "E1", "Ada", "1234");

        let req = authed(test::TestRequest::post().uri("/api/employees/E1/verify-pin"), &key)
            .set_json(json!({"pin": "1234"}))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);

        let req = authed(test::TestRequest::post().uri("/api/employees/E1/verify-pin"), &key)
            .set_json(json!({"pin": "0000"}))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::UNAUTHORIZED);

        let req = authed(test::TestRequest::post().uri("/api/employees/E1/deactivate"), &key).to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["is_active"], false);

        let req = authed(test::TestRequest::post().uri("/api/employees/E1/verify-pin"), &key)
            .set_json(json!({"pin": "1234"}))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::FORBIDDEN);
    }
}
