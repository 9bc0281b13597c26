use crate::{
    api::{self, admin, devices, embeddings, employees, time_events},
    auth::middleware::device_auth_middleware,
    config::Config,
};
use actix_governor::{
    Governor, GovernorConfigBuilder, PeerIpKeyExtractor, governor::middleware::NoOpMiddleware,
};
use actix_web::{middleware::from_fn, web};

// Helper to build per-route limiter
fn build_limiter(requests_per_min: u32) -> Governor<PeerIpKeyExtractor, NoOpMiddleware> {
    let requests_per_min = requests_per_min.max(1);
    let per_ms = (60_000 / requests_per_min as u64).max(1);
    let cfg = GovernorConfigBuilder::default()
        .per_millisecond(per_ms)
        .burst_size(requests_per_min)
        .key_extractor(PeerIpKeyExtractor)
        .finish()
        .unwrap_or_default();
    Governor::new(&cfg)
}

pub fn configure(cfg: &mut web::ServiceConfig, config: &Config) {
    let register_limiter = build_limiter(config.rate_register_per_min);
    let protected_limiter = build_limiter(config.rate_protected_per_min);

    cfg.service(web::resource("/health").route(web::get().to(api::health)));

    cfg.service(
        web::scope(&config.api_prefix)
            // public: provisioning token is checked in the handler
            .service(
                web::resource("/devices/register")
                    .wrap(register_limiter)
                    .route(web::post().to(devices::register_device)),
            )
            .service(
                web::scope("")
                    .wrap(from_fn(device_auth_middleware))
                    .wrap(protected_limiter)
                    .service(
                        web::scope("/devices")
                            .service(web::resource("/me").route(web::get().to(devices::me)))
                            .service(web::resource("/ping").route(web::post().to(devices::ping))),
                    )
                    .service(
                        web::scope("/employees")
                            // /employees
                            .service(
                                web::resource("")
                                    .route(web::get().to(employees::list_employees))
                                    .route(web::post().to(employees::create_employee)),
                            )
                            // before /{code} so "embeddings" is not taken as a code
                            .service(
                                web::resource("/embeddings")
                                    .route(web::get().to(embeddings::sync_embeddings)),
                            )
                            .service(
                                web::resource("/{code}")
                                    .route(web::put().to(employees::update_employee)),
                            )
                            .service(
                                web::resource("/{code}/deactivate")
                                    .route(web::post().to(employees::deactivate_employee)),
                            )
                            .service(
                                web::resource("/{code}/state")
                                    .route(web::get().to(employees::employee_state)),
                            )
                            .service(
                                web::resource("/{code}/verify-pin")
                                    .route(web::post().to(employees::verify_pin)),
                            )
                            .service(
                                web::resource("/{code}/embedding")
                                    .route(web::post().to(embeddings::store_embedding))
                                    .route(web::delete().to(embeddings::delete_embedding)),
                            ),
                    )
                    .service(
                        web::scope("/time-events")
                            .service(
                                web::resource("")
                                    .route(web::get().to(time_events::list_time_events))
                                    .route(web::post().to(time_events::create_time_event)),
                            )
                            .service(
                                web::resource("/clocked-in")
                                    .route(web::get().to(time_events::clocked_in)),
                            )
                            .service(
                                web::resource("/{id}")
                                    .route(web::get().to(time_events::get_time_event))
                                    .route(web::put().to(time_events::correct_time_event))
                                    .route(web::delete().to(time_events::invalidate_time_event)),
                            ),
                    )
                    .service(
                        web::scope("/admin")
                            .service(
                                web::resource("/export-now")
                                    .route(web::post().to(admin::export_now)),
                            )
                            .service(web::resource("/stats").route(web::get().to(admin::stats)))
                            .service(
                                web::resource("/clocked-in").route(web::get().to(admin::clocked_in)),
                            )
                            .service(
                                web::resource("/location")
                                    .route(web::get().to(admin::get_location))
                                    .route(web::put().to(admin::update_location)),
                            )
                            .service(
                                web::resource("/settings/{key}")
                                    .route(web::get().to(admin::get_setting))
                                    .route(web::put().to(admin::put_setting)),
                            ),
                    ),
            ),
    );
}

#[cfg(test)]
mod tests {
    use crate::api::test_support::{PEER, init_app, test_state};
    use actix_web::{http::StatusCode, test};

    #[actix_web::test]
    async fn health_is_public_and_api_is_not() {
        let state = test_state(None);
        let app = init_app!(state);

        let req = test::TestRequest::get().uri("/health").to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);

        let req = test::TestRequest::get()
            .uri("/api/employees")
            .peer_addr(PEER.parse().unwrap())
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::UNAUTHORIZED);
    }
}
