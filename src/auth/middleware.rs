use actix_web::middleware::Next;
use actix_web::{
    Error, HttpMessage, ResponseError,
    body::BoxBody,
    dev::{ServiceRequest, ServiceResponse},
    web::Data,
};

use crate::auth::device::{AuthDevice, authenticate};
use crate::error::AppError;
use crate::state::AppState;

pub const API_KEY_HEADER: &str = "X-Device-API-Key";

pub async fn device_auth_middleware(
    req: ServiceRequest,
    next: Next<BoxBody>,
) -> Result<ServiceResponse<BoxBody>, Error> {
    let state = req
        .app_data::<Data<AppState>>()
        .cloned()
        .ok_or_else(|| actix_web::error::ErrorInternalServerError("App state missing"))?;

    let api_key = match req.headers().get(API_KEY_HEADER) {
        Some(h) => match h.to_str() {
            Ok(v) => v.to_string(),
            Err(_) => {
                let resp = AppError::Unauthorized("Invalid API key header encoding".into()).error_response();
                return Ok(req.into_response(resp));
            }
        },
        None => {
            let resp = AppError::Unauthorized(format!("Missing {} header", API_KEY_HEADER)).error_response();
            return Ok(req.into_response(resp));
        }
    };

    let device = match authenticate(&state, &api_key).await {
        Ok(device) => device,
        Err(e) => return Ok(req.into_response(e.error_response())),
    };

    req.extensions_mut().insert(AuthDevice::from(&device));

    next.call(req).await
}
