use actix_web::{FromRequest, HttpMessage, HttpRequest, dev::Payload};
use chrono::Utc;
use futures::future::{Ready, ready};
use tracing::{debug, info};

use crate::auth::{api_key::parse_key, password::verify_secret};
use crate::error::{AppError, AppResult};
use crate::model::device::Device;
use crate::state::AppState;

/// The kiosk behind the current request. Every handler scopes its work to
/// `location_id`, so one location's devices never see another's data.
#[derive(Debug, Clone)]
pub struct AuthDevice {
    pub device_id: u64,
    pub device_code: String,
    pub location_id: u64,
}

impl From<&Device> for AuthDevice {
    fn from(device: &Device) -> Self {
        Self {
            device_id: device.id,
            device_code: device.device_code.clone(),
            location_id: device.location_id,
        }
    }
}

impl FromRequest for AuthDevice {
    type Error = AppError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        ready(
            req.extensions()
                .get::<AuthDevice>()
                .cloned()
                .ok_or_else(|| AppError::Unauthorized("Device not authenticated".into())),
        )
    }
}

/// Resolve an API key to its device and advance last-seen.
pub async fn authenticate(state: &AppState, api_key: &str) -> AppResult<Device> {
    let invalid = || AppError::Unauthorized("Invalid API key".into());

    let device_id = match state.credentials.lookup(api_key).await {
        Some(id) => {
            debug!(device_id = id, "API key served from cache");
            id
        }
        None => {
            let (id, secret) = parse_key(api_key).ok_or_else(invalid)?;
            let device = state.store.device(id).await?.ok_or_else(invalid)?;
            if !verify_secret(secret, &device.api_key_hash) {
                info!(device_id = id, "API key rejected");
                return Err(invalid());
            }
            state.credentials.remember(api_key, id).await;
            id
        }
    };

    // a cached id whose device has since vanished is rejected here
    state
        .store
        .touch_device(device_id, Utc::now())
        .await?
        .ok_or_else(invalid)
}
