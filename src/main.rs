use std::time::Duration;

use actix_web::middleware::NormalizePath;
use actix_web::web::Data;
use actix_web::{App, HttpServer};
use anyhow::{Context, anyhow};
use dotenvy::dotenv;
use tokio_util::sync::CancellationToken;

mod api;
mod auth;
mod config;
mod db;
mod docs;
mod error;
mod model;
mod routes;
mod service;
mod state;
mod store;
mod utils;

use config::Config;
use db::init_store;

use crate::docs::ApiDoc;
use crate::service::export::ExportPipeline;
use crate::service::scheduler::ExportScheduler;
use crate::state::AppState;
use tracing::{error, info};
use tracing_appender::rolling;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    let config = Config::from_env()?;

    // Rolling daily log
    let file_appender = rolling::daily(&config.log_dir, "kiosk.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    let level: tracing::Level = config
        .log_level
        .parse()
        .map_err(|_| anyhow!("LOG_LEVEL {:?} is not a tracing level", config.log_level))?;

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_max_level(level)
        .with_ansi(false)
        .with_target(false)
        .with_level(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .init();

    info!("Server starting...");

    let store = init_store(&config.database_url).await?;
    let mailer = AppState::mailer_from_config(&config);
    if mailer.is_none() {
        info!("SENDGRID_API_KEY not set, daily exports will not be delivered");
    }

    let shutdown = CancellationToken::new();
    let scheduler = ExportScheduler::new(
        store.clone(),
        ExportPipeline::new(store.clone(), mailer.clone(), config.mail_from.clone()),
        Duration::from_secs(config.export_tick_secs.max(1)),
        shutdown.clone(),
    );
    let scheduler_task = actix_web::rt::spawn(scheduler.run());

    let server_addr = config.server_addr.clone();
    let state = Data::new(AppState::new(config, store, mailer).context("Invalid encryption key")?);

    let served = HttpServer::new(move || {
        App::new()
            .wrap(actix_web::middleware::Logger::default())
            .wrap(NormalizePath::trim())
            .service(
                SwaggerUi::new("/swagger-ui/{_:.*}") // wildcard matches the JS/CSS assets
                    .url("/api-doc/openapi.json", ApiDoc::openapi()),
            )
            .app_data(state.clone())
            .configure(|cfg| routes::configure(cfg, &state.config))
    })
    .bind(&server_addr)
    .with_context(|| format!("Failed to bind {}", server_addr))?
    .run()
    .await;

    shutdown.cancel();
    if let Err(e) = scheduler_task.await {
        error!(error = %e, "Export scheduler task failed");
    }
    info!("Server stopped");

    served.context("HTTP server failed")
}
