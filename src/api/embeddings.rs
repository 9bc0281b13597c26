use actix_web::{HttpResponse, web};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, instrument};
use utoipa::ToSchema;

use crate::auth::device::AuthDevice;
use crate::error::{AppError, AppResult};
use crate::service::crypto::TEMPLATE_DIM;
use crate::state::AppState;

#[derive(Debug, Deserialize, ToSchema)]
pub struct StoreEmbedding {
    /// Exactly 512 finite floats.
    pub embedding: Vec<f32>,
}

fn validate_embedding(embedding: &[f32]) -> AppResult<()> {
    if embedding.len() != TEMPLATE_DIM {
        return Err(AppError::BadRequest(format!(
            "Embedding must be {} dimensions, got {}",
            TEMPLATE_DIM,
            embedding.len()
        )));
    }
    if embedding.iter().any(|v| !v.is_finite()) {
        return Err(AppError::BadRequest("Embedding contains non-finite values".into()));
    }
    Ok(())
}

/// Enroll or replace a face template
#[utoipa::path(
    post,
    path = "/api/employees/{code}/embedding",
    params(("code" = String, Path, description = "Employee code")),
    request_body = StoreEmbedding,
    responses(
        (status = 201, description = "Template stored", body = Object, example = json!({
            "status": "ok",
            "message": "Embedding stored"
        })),
        (status = 400, description = "Wrong dimension or non-finite values"),
        (status = 404, description = "No such employee at this location"),
    ),
    tag = "Embeddings",
    security(("api_key" = []))
)]
#[instrument(name = "store_embedding", skip(state, payload), fields(location_id = device.location_id))]
pub async fn store_embedding(
    device: AuthDevice,
    state: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<StoreEmbedding>,
) -> AppResult<HttpResponse> {
    validate_embedding(&payload.embedding)?;
    state
        .templates
        .upsert(&path, device.location_id, &payload.embedding)
        .await?;
    Ok(HttpResponse::Created().json(json!({
        "status": "ok",
        "message": "Embedding stored"
    })))
}

/// Remove a face template
#[utoipa::path(
    delete,
    path = "/api/employees/{code}/embedding",
    params(("code" = String, Path, description = "Employee code")),
    responses(
        (status = 200, description = "Whether a template existed", body = Object, example = json!({
            "deleted": true
        })),
        (status = 404, description = "No such employee at this location"),
    ),
    tag = "Embeddings",
    security(("api_key" = []))
)]
pub async fn delete_embedding(
    device: AuthDevice,
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> AppResult<HttpResponse> {
    let deleted = state.templates.delete(&path, device.location_id).await?;
    Ok(HttpResponse::Ok().json(json!({ "deleted": deleted })))
}

/// Decrypted templates for offline matching on the kiosk
#[utoipa::path(
    get,
    path = "/api/employees/embeddings",
    responses(
        (status = 200, description = "Templates of active employees at this location", body = [SyncTemplate]),
        (status = 500, description = "A stored template failed to decrypt"),
    ),
    tag = "Embeddings",
    security(("api_key" = []))
)]
pub async fn sync_embeddings(device: AuthDevice, state: web::Data<AppState>) -> AppResult<HttpResponse> {
    let templates = state.templates.list_for_sync(device.location_id).await?;
    info!(
        device_id = device.device_id,
        location_id = device.location_id,
        count = templates.len(),
        "Templates synced"
    );
    Ok(HttpResponse::Ok().json(templates))
}

#[cfg(test)]
fn vector() -> Vec<f32> {
    (0..TEMPLATE_DIM).map(|i| (i as f32) / 1000.0).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedding_shape_is_enforced() {
        assert!(validate_embedding(&vector()).is_ok());
        assert!(validate_embedding(&vector()[..511]).is_err());
        let mut v = vector();
        v[3] = f32::NAN;
        assert!(validate_embedding(&v).is_err());
    }
}
