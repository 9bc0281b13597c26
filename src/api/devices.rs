use actix_web::{HttpRequest, HttpResponse, web};
use chrono::{NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, instrument};
use utoipa::ToSchema;

use crate::auth::api_key::{format_key, generate_secret};
use crate::auth::device::AuthDevice;
use crate::auth::password::hash_secret;
use crate::error::{AppError, AppResult};
use crate::model::device::NewDevice;
use crate::model::location::{Location, NewLocation};
use crate::state::AppState;
use crate::utils::time::parse_timezone;

pub const PROVISIONING_HEADER: &str = "X-Provisioning-Token";

#[derive(Debug, Deserialize, ToSchema)]
pub struct RegisterDevice {
    #[schema(example = "tablet-lobby-01")]
    pub device_code: String,
    #[schema(example = "Head Office")]
    pub location_name: String,
    #[schema(example = "Lobby tablet")]
    pub name: Option<String>,
    /// Only used when the location does not exist yet.
    #[schema(example = "America/Toronto")]
    pub timezone: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct DeviceRegistered {
    pub device_id: u64,
    pub location_id: u64,
    pub location_name: String,
    /// Shown once. Send it as `X-Device-API-Key` on every later call.
    #[schema(example = "12.4f1c...")]
    pub api_key: String,
}

async fn find_or_create_location(state: &AppState, name: &str, timezone: Option<&str>) -> AppResult<Location> {
    if let Some(location) = state.store.location_by_name(name).await? {
        return Ok(location);
    }

    let timezone = timezone.unwrap_or(&state.config.default_timezone);
    parse_timezone(timezone)?;

    let created = state
        .store
        .create_location(NewLocation {
            name: name.to_string(),
            manager_email: String::new(),
            export_time: NaiveTime::from_hms_opt(1, 0, 0).unwrap_or(NaiveTime::MIN),
            timezone: timezone.to_string(),
        })
        .await;

    match created {
        Ok(location) => {
            info!(location_id = location.id, "Location created on first device registration");
            Ok(location)
        }
        // another kiosk registered the same new location first
        Err(crate::store::StoreError::Duplicate(_)) => state
            .store
            .location_by_name(name)
            .await?
            .ok_or_else(|| AppError::Internal("Location vanished after duplicate insert".into())),
        Err(e) => Err(e.into()),
    }
}

/// Register a kiosk and issue its API key
#[utoipa::path(
    post,
    path = "/api/devices/register",
    request_body = RegisterDevice,
    params(
        ("X-Provisioning-Token" = Option<String>, Header, description = "Required when the server has a provisioning token configured")
    ),
    responses(
        (status = 201, description = "Device registered", body = DeviceRegistered),
        (status = 400, description = "Invalid input"),
        (status = 401, description = "Provisioning token missing or wrong"),
        (status = 409, description = "Device code already registered"),
    ),
    tag = "Devices"
)]
#[instrument(name = "register_device", skip(state, req, payload), fields(device_code = %payload.device_code))]
pub async fn register_device(
    req: HttpRequest,
    state: web::Data<AppState>,
    payload: web::Json<RegisterDevice>,
) -> AppResult<HttpResponse> {
    if let Some(expected) = &state.config.provisioning_token {
        let presented = req
            .headers()
            .get(PROVISIONING_HEADER)
            .and_then(|h| h.to_str().ok());
        if presented != Some(expected.as_str()) {
            return Err(AppError::Unauthorized("Invalid provisioning token".into()));
        }
    }

    let payload = payload.into_inner();
    let device_code = payload.device_code.trim();
    let location_name = payload.location_name.trim();
    if device_code.is_empty() || location_name.is_empty() {
        return Err(AppError::BadRequest("device_code and location_name are required".into()));
    }

    if state.store.device_by_code(device_code).await?.is_some() {
        return Err(AppError::Duplicate(format!("Device {}", device_code)));
    }

    let location = find_or_create_location(&state, location_name, payload.timezone.as_deref()).await?;

    let secret = generate_secret();
    let device = state
        .store
        .create_device(
            NewDevice {
                device_code: device_code.to_string(),
                location_id: location.id,
                name: payload.name,
            },
            &hash_secret(&secret)?,
        )
        .await?;

    info!(device_id = device.id, location_id = location.id, "Device registered");

    Ok(HttpResponse::Created().json(DeviceRegistered {
        device_id: device.id,
        location_id: location.id,
        location_name: location.name,
        api_key: format_key(device.id, &secret),
    }))
}

/// Current device
#[utoipa::path(
    get,
    path = "/api/devices/me",
    responses(
        (status = 200, description = "The authenticated device", body = Device),
        (status = 401, description = "Missing or invalid API key"),
    ),
    tag = "Devices",
    security(("api_key" = []))
)]
pub async fn me(device: AuthDevice, state: web::Data<AppState>) -> AppResult<HttpResponse> {
    let record = state
        .store
        .device(device.device_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Device not found".into()))?;
    Ok(HttpResponse::Ok().json(record))
}

/// Heartbeat
#[utoipa::path(
    post,
    path = "/api/devices/ping",
    responses(
        (status = 200, description = "Alive", body = Object, example = json!({
            "status": "ok",
            "server_time": "2024-01-15T13:02:11Z"
        })),
        (status = 401, description = "Missing or invalid API key"),
    ),
    tag = "Devices",
    security(("api_key" = []))
)]
pub async fn ping(device: AuthDevice) -> AppResult<HttpResponse> {
    debug!(device_id = device.device_id, "Ping");
    Ok(HttpResponse::Ok().json(json!({
        "status": "ok",
        "server_time": Utc::now(),
    })))
}
