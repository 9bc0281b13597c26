use actix_web::{HttpResponse, Responder};
use chrono::Utc;
use serde_json::json;

pub mod admin;
pub mod devices;
pub mod embeddings;
pub mod employees;
pub mod time_events;

/// Liveness
#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "Server is up", body = Object, example = json!({
        "status": "ok",
        "server_time": "2024-01-15T13:02:11Z"
    }))),
    tag = "Health"
)]
pub async fn health() -> impl Responder {
    HttpResponse::Ok().json(json!({
        "status": "ok",
        "server_time": Utc::now(),
    }))
}
