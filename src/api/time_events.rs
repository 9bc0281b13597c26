use actix_web::{HttpResponse, web};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use tracing::{info, instrument};
use utoipa::{IntoParams, ToSchema};

use crate::api::employees::employee_in_location;
use crate::auth::device::AuthDevice;
use crate::error::{AppError, AppResult};
use crate::model::attendance::{CaptureMethod, EventCorrection, EventFilter, EventKind};
use crate::service::clock::ClockRequest;
use crate::state::AppState;
use crate::utils::time::local_day_bounds;

const LIST_LIMIT: u32 = 1000;

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateTimeEvent {
    #[schema(example = "EMP-001")]
    pub employee_code: String,
    /// `IN` or `OUT`.
    #[schema(example = "IN")]
    pub kind: String,
    pub method: CaptureMethod,
    /// Omit for "now". Queued offline events carry the time they happened.
    #[schema(value_type = Option<String>, format = "date-time")]
    pub event_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CorrectTimeEvent {
    pub kind: Option<EventKind>,
    pub is_valid: Option<bool>,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct TimeEventQuery {
    pub employee_code: Option<String>,
    /// First local day, inclusive.
    #[param(value_type = Option<String>, format = "date")]
    pub start_date: Option<NaiveDate>,
    /// Last local day, inclusive.
    #[param(value_type = Option<String>, format = "date")]
    pub end_date: Option<NaiveDate>,
}

/// Clock in or out
#[utoipa::path(
    post,
    path = "/api/time-events",
    request_body = CreateTimeEvent,
    responses(
        (status = 201, description = "Event recorded", body = AttendanceEvent),
        (status = 403, description = "Employee is deactivated"),
        (status = 404, description = "No such employee at this location"),
        (status = 409, description = "Transition rejected or lost a concurrent race", body = Object, example = json!({
            "error": "already_clocked_in",
            "message": "You are already clocked in since 08:02 UTC"
        })),
    ),
    tag = "Time Events",
    security(("api_key" = []))
)]
#[instrument(
    name = "create_time_event",
    skip(state, payload),
    fields(device_id = device.device_id, employee_code = %payload.employee_code)
)]
pub async fn create_time_event(
    device: AuthDevice,
    state: web::Data<AppState>,
    payload: web::Json<CreateTimeEvent>,
) -> AppResult<HttpResponse> {
    let event = state
        .clock
        .clock(ClockRequest {
            employee_code: &payload.employee_code,
            location_id: device.location_id,
            device_id: device.device_id,
            kind: &payload.kind,
            method: payload.method,
            event_time: payload.event_time,
        })
        .await?;
    Ok(HttpResponse::Created().json(event))
}

/// List events of this location, newest first
#[utoipa::path(
    get,
    path = "/api/time-events",
    params(TimeEventQuery),
    responses(
        (status = 200, description = "At most 1000 events", body = [AttendanceEvent]),
        (status = 404, description = "Unknown employee code"),
    ),
    tag = "Time Events",
    security(("api_key" = []))
)]
pub async fn list_time_events(
    device: AuthDevice,
    state: web::Data<AppState>,
    query: web::Query<TimeEventQuery>,
) -> AppResult<HttpResponse> {
    let employee_id = match query.employee_code.as_deref() {
        Some(code) => Some(employee_in_location(&state, device.location_id, code).await?.id),
        None => None,
    };

    let location = state
        .store
        .location(device.location_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Location not found".into()))?;
    let tz = location.tz()?;

    let events = state
        .store
        .events(EventFilter {
            location_id: device.location_id,
            employee_id,
            from: query.start_date.map(|d| local_day_bounds(d, tz).0),
            until: query.end_date.map(|d| local_day_bounds(d, tz).1),
            limit: LIST_LIMIT,
        })
        .await?;
    Ok(HttpResponse::Ok().json(events))
}

/// One event of this location
#[utoipa::path(
    get,
    path = "/api/time-events/{id}",
    params(("id" = u64, Path, description = "Event id")),
    responses(
        (status = 200, description = "Event", body = AttendanceEvent),
        (status = 404, description = "No such event at this location"),
    ),
    tag = "Time Events",
    security(("api_key" = []))
)]
pub async fn get_time_event(
    device: AuthDevice,
    state: web::Data<AppState>,
    path: web::Path<u64>,
) -> AppResult<HttpResponse> {
    let event_id = path.into_inner();
    let event = state
        .store
        .event(device.location_id, event_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Time event {} not found", event_id)))?;
    Ok(HttpResponse::Ok().json(event))
}

/// Correct kind and/or validity of an event
#[utoipa::path(
    put,
    path = "/api/time-events/{id}",
    params(("id" = u64, Path, description = "Event id")),
    request_body = CorrectTimeEvent,
    responses(
        (status = 200, description = "Corrected event", body = AttendanceEvent),
        (status = 400, description = "Nothing to change"),
        (status = 404, description = "No such event at this location"),
    ),
    tag = "Time Events",
    security(("api_key" = []))
)]
pub async fn correct_time_event(
    device: AuthDevice,
    state: web::Data<AppState>,
    path: web::Path<u64>,
    payload: web::Json<CorrectTimeEvent>,
) -> AppResult<HttpResponse> {
    let payload = payload.into_inner();
    let correction = EventCorrection {
        kind: payload.kind,
        is_valid: payload.is_valid,
    };
    if correction.is_empty() {
        return Err(AppError::BadRequest("Provide kind and/or is_valid".into()));
    }

    let event_id = path.into_inner();
    let event = state
        .store
        .correct_event(device.location_id, event_id, correction)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Time event {} not found", event_id)))?;

    info!(event_id, device_id = device.device_id, kind = %event.kind, is_valid = event.is_valid, "Time event corrected");
    Ok(HttpResponse::Ok().json(event))
}

/// Mark an event invalid (never deleted)
#[utoipa::path(
    delete,
    path = "/api/time-events/{id}",
    params(("id" = u64, Path, description = "Event id")),
    responses(
        (status = 204, description = "Event invalidated"),
        (status = 404, description = "No such event at this location"),
    ),
    tag = "Time Events",
    security(("api_key" = []))
)]
pub async fn invalidate_time_event(
    device: AuthDevice,
    state: web::Data<AppState>,
    path: web::Path<u64>,
) -> AppResult<HttpResponse> {
    let event_id = path.into_inner();
    state
        .store
        .correct_event(
            device.location_id,
            event_id,
            EventCorrection {
                kind: None,
                is_valid: Some(false),
            },
        )
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Time event {} not found", event_id)))?;

    info!(event_id, device_id = device.device_id, "Time event invalidated");
    Ok(HttpResponse::NoContent().finish())
}

/// Employees currently clocked in
#[utoipa::path(
    get,
    path = "/api/time-events/clocked-in",
    responses(
        (status = 200, description = "Open clock-ins at this location", body = [ClockedInEntry]),
    ),
    tag = "Time Events",
    security(("api_key" = []))
)]
pub async fn clocked_in(device: AuthDevice, state: web::Data<AppState>) -> AppResult<HttpResponse> {
    let entries = state.clock.clocked_in(device.location_id).await?;
    Ok(HttpResponse::Ok().json(entries))
}

#[cfg(test)]
mod tests {
    use crate::api::test_support::{authed, init_app, register, seed_employee, test_state};
    use actix_web::{http::StatusCode, test};
    use serde_json::json;

    #[actix_web::test]
    async fn clock_cycle_over_http() {
        let state = test_state(None);
        let app = init_app!(state);
        let key = register!(app, "kiosk-1", "Shop").api_key;
        seed_employee!(app, &key, "E1", "Ada", "1234");

        let clock = |kind: &'static str| {
            authed(test::TestRequest::post().uri("/api/time-events"), &key)
                .set_json(json!({"employee_code": "E1", "kind": kind, "method": "PIN"}))
                .to_request()
        };

        let resp = test::call_service(&app, clock("OUT")).await;
        assert_eq!(resp.status(), StatusCode::CONFLICT);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], "already_clocked_out");

        let event: serde_json::Value = test::call_and_read_body_json(&app, clock("IN")).await;
        assert_eq!(event["kind"], "IN");
        assert_eq!(event["method"], "PIN");

        let resp = test::call_service(&app, clock("IN")).await;
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], "already_clocked_in");
        assert!(body["message"].as_str().unwrap().starts_with("You are already clocked in since"));

        let resp = test::call_service(&app, clock("LUNCH")).await;
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], "unknown_event_kind");
        assert_eq!(body["message"], "Invalid event type: LUNCH");

        let req = authed(test::TestRequest::get().uri("/api/time-events/clocked-in"), &key).to_request();
        let list: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(list[0]["employee_code"], "E1");
    }

    #[actix_web::test]
    async fn invalidation_reopens_previous_state() {
        let state = test_state(None);
        let app = init_app!(state);
        let key = register!(app, "kiosk-1", "Shop").api_key;
        seed_employee!(app, &key, "E1", "Ada", "1234");

        for kind in ["IN", "OUT"] {
            let req = authed(test::TestRequest::post().uri("/api/time-events"), &key)
                .set_json(json!({"employee_code": "E1", "kind": kind, "method": "FACE"}))
                .to_request();
            assert_eq!(test::call_service(&app, req).await.status(), StatusCode::CREATED);
        }

        let req = authed(test::TestRequest::get().uri("/api/time-events?employee_code=E1"), &key).to_request();
        let events: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(events.as_array().unwrap().len(), 2);
        assert_eq!(events[0]["kind"], "OUT");
        let out_id = events[0]["id"].as_u64().unwrap();

        let req = authed(test::TestRequest::delete().uri(&format!("/api/time-events/{}", out_id)), &key).to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NO_CONTENT);

        let req = authed(test::TestRequest::get().uri("/api/employees/E1/state"), &key).to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["state"], "CLOCKED_IN");

        let req = authed(test::TestRequest::put().uri(&format!("/api/time-events/{}", out_id)), &key)
            .set_json(json!({}))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn events_of_other_locations_are_not_found() {
        let state = test_state(None);
        let app = init_app!(state);
        let shop = register!(app, "kiosk-1", "Shop").api_key;
        let depot = register!(app, "kiosk-2", "Depot").api_key;
        seed_employee!(app, &shop, "E1", "Ada", "1234");

        let req = authed(test::TestRequest::post().uri("/api/time-events"), &shop)
            .set_json(json!({"employee_code": "E1", "kind": "IN", "method": "FACE"}))
            .to_request();
        let event: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        let id = event["id"].as_u64().unwrap();

        let req = authed(test::TestRequest::delete().uri(&format!("/api/time-events/{}", id)), &depot).to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);

        let req = authed(test::TestRequest::get().uri(&format!("/api/time-events/{}", id)), &depot).to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);

        let req = authed(test::TestRequest::get().uri(&format!("/api/time-events/{}", id)), &shop).to_request();
        let fetched: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(fetched["is_valid"], true);

        let req = authed(test::TestRequest::post().uri("/api/time-events"), &depot)
            .set_json(json!({"employee_code": "E1", "kind": "OUT", "method": "FACE"}))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);
    }
}
