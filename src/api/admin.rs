use actix_web::{HttpResponse, web};
use chrono::{NaiveDate, NaiveTime, Utc};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{info, instrument};
use utoipa::{IntoParams, ToSchema};

use crate::auth::device::AuthDevice;
use crate::error::{AppError, AppResult};
use crate::model::location::{Location, LocationUpdate};
use crate::state::AppState;
use crate::utils::time::parse_timezone;

const MAX_SETTING_KEY_LEN: usize = 100;

#[derive(Debug, Deserialize, IntoParams)]
pub struct ExportQuery {
    /// Local calendar day to export; defaults to yesterday in the location's zone.
    #[param(value_type = Option<String>, format = "date")]
    pub date: Option<NaiveDate>,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct UpdateLocation {
    /// Empty string disables daily exports.
    #[schema(example = "manager@company.com")]
    pub manager_email: Option<String>,
    #[schema(value_type = Option<String>, example = "01:00:00")]
    pub export_time: Option<NaiveTime>,
    #[schema(example = "America/Toronto")]
    pub timezone: Option<String>,
}

async fn current_location(state: &AppState, location_id: u64) -> AppResult<Location> {
    state
        .store
        .location(location_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Location not found".into()))
}

/// Export a day now and email it to the manager
#[utoipa::path(
    post,
    path = "/api/admin/export-now",
    params(ExportQuery),
    responses(
        (status = 200, description = "Export attempted; `sent` is false when exports are disabled", body = ExportOutcome),
        (status = 502, description = "Mail transport rejected the message"),
        (status = 503, description = "No mail transport configured"),
    ),
    tag = "Admin",
    security(("api_key" = []))
)]
#[instrument(name = "export_now", skip(state), fields(location_id = device.location_id))]
pub async fn export_now(
    device: AuthDevice,
    state: web::Data<AppState>,
    query: web::Query<ExportQuery>,
) -> AppResult<HttpResponse> {
    let outcome = match query.date {
        Some(date) => state.export.export_and_send(device.location_id, date).await?,
        None => state.export.export_yesterday(device.location_id).await?,
    };
    Ok(HttpResponse::Ok().json(outcome))
}

/// Dashboard counters
#[utoipa::path(
    get,
    path = "/api/admin/stats",
    responses((status = 200, description = "Counters for this location", body = LocationStats)),
    tag = "Admin",
    security(("api_key" = []))
)]
pub async fn stats(device: AuthDevice, state: web::Data<AppState>) -> AppResult<HttpResponse> {
    let location = current_location(&state, device.location_id).await?;
    let stats = state.clock.stats(&location, Utc::now()).await?;
    Ok(HttpResponse::Ok().json(stats))
}

/// Employees currently clocked in
#[utoipa::path(
    get,
    path = "/api/admin/clocked-in",
    responses((status = 200, description = "Open clock-ins at this location", body = [ClockedInEntry])),
    tag = "Admin",
    security(("api_key" = []))
)]
pub async fn clocked_in(device: AuthDevice, state: web::Data<AppState>) -> AppResult<HttpResponse> {
    Ok(HttpResponse::Ok().json(state.clock.clocked_in(device.location_id).await?))
}

/// Location of the calling device
#[utoipa::path(
    get,
    path = "/api/admin/location",
    responses((status = 200, description = "Location", body = Location)),
    tag = "Admin",
    security(("api_key" = []))
)]
pub async fn get_location(device: AuthDevice, state: web::Data<AppState>) -> AppResult<HttpResponse> {
    Ok(HttpResponse::Ok().json(current_location(&state, device.location_id).await?))
}

/// Update export settings of the location
#[utoipa::path(
    put,
    path = "/api/admin/location",
    request_body = UpdateLocation,
    responses(
        (status = 200, description = "Updated location", body = Location),
        (status = 400, description = "Unknown timezone"),
    ),
    tag = "Admin",
    security(("api_key" = []))
)]
pub async fn update_location(
    device: AuthDevice,
    state: web::Data<AppState>,
    payload: web::Json<UpdateLocation>,
) -> AppResult<HttpResponse> {
    let payload = payload.into_inner();
    if let Some(tz) = &payload.timezone {
        parse_timezone(tz)?;
    }

    let location = state
        .store
        .update_location(
            device.location_id,
            LocationUpdate {
                manager_email: payload.manager_email.map(|e| e.trim().to_string()),
                export_time: payload.export_time,
                timezone: payload.timezone.map(|t| t.trim().to_string()),
            },
        )
        .await?
        .ok_or_else(|| AppError::NotFound("Location not found".into()))?;

    info!(location_id = location.id, export_enabled = location.export_enabled(), "Location updated");
    Ok(HttpResponse::Ok().json(location))
}

fn check_setting_key(key: &str) -> AppResult<()> {
    if key.is_empty() || key.len() > MAX_SETTING_KEY_LEN {
        return Err(AppError::BadRequest(format!(
            "Setting key must be 1 to {} characters",
            MAX_SETTING_KEY_LEN
        )));
    }
    Ok(())
}

/// Read a location setting
#[utoipa::path(
    get,
    path = "/api/admin/settings/{key}",
    params(("key" = String, Path, description = "Setting key")),
    responses(
        (status = 200, description = "Setting value", body = Object, example = json!({
            "key": "last_export_date",
            "value": "2024-01-14"
        })),
        (status = 404, description = "Setting not set"),
    ),
    tag = "Admin",
    security(("api_key" = []))
)]
pub async fn get_setting(
    device: AuthDevice,
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> AppResult<HttpResponse> {
    let key = path.into_inner();
    check_setting_key(&key)?;
    let value = state
        .store
        .setting(device.location_id, &key)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Setting {} not found", key)))?;
    Ok(HttpResponse::Ok().json(json!({ "key": key, "value": value })))
}

/// Write a location setting
#[utoipa::path(
    put,
    path = "/api/admin/settings/{key}",
    params(("key" = String, Path, description = "Setting key")),
    request_body = Object,
    responses((status = 200, description = "Stored")),
    tag = "Admin",
    security(("api_key" = []))
)]
pub async fn put_setting(
    device: AuthDevice,
    state: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<Value>,
) -> AppResult<HttpResponse> {
    let key = path.into_inner();
    check_setting_key(&key)?;
    let value = payload.into_inner();
    state
        .store
        .put_setting(device.location_id, &key, value.clone())
        .await?;
    Ok(HttpResponse::Ok().json(json!({ "key": key, "value": value })))
}
