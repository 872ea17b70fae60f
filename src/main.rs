use std::net::SocketAddr;

use axum::{routing, Router};
use parcelhub::app::AppState;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "parcelhub=debug,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let app_state = AppState::new_from_env().await.unwrap();
    app_state.run_migration().await.unwrap();

    let api = Router::new().nest(
        "/v1",
        Router::new()
            .nest(
                "/users",
                Router::new()
                    .route(
                        "/",
                        routing::post(parcelhub::api::v1::user::upsert_on_login)
                            .get(parcelhub::api::v1::user::index),
                    )
                    .route("/search", routing::get(parcelhub::api::v1::user::search))
                    .route("/role", routing::get(parcelhub::api::v1::user::get_role))
                    .route("/:id/role", routing::patch(parcelhub::api::v1::user::set_role)),
            )
            .nest(
                "/parcels",
                Router::new()
                    .route(
                        "/",
                        routing::post(parcelhub::api::v1::parcel::create)
                            .get(parcelhub::api::v1::parcel::index),
                    )
                    .route("/:id", routing::get(parcelhub::api::v1::parcel::show))
                    .route(
                        "/:id/assign",
                        routing::patch(parcelhub::api::v1::parcel::assign_rider),
                    )
                    .route(
                        "/:id/status",
                        routing::patch(parcelhub::api::v1::parcel::set_status),
                    ),
            )
            .nest(
                "/riders",
                Router::new()
                    .route("/", routing::post(parcelhub::api::v1::rider::register))
                    .route(
                        "/pending",
                        routing::get(parcelhub::api::v1::rider::index_pending),
                    )
                    .route(
                        "/active",
                        routing::get(parcelhub::api::v1::rider::index_active),
                    )
                    .route(
                        "/by-district",
                        routing::get(parcelhub::api::v1::rider::index_by_district),
                    )
                    .route(
                        "/tasks",
                        routing::get(parcelhub::api::v1::rider::index_tasks),
                    )
                    .route(
                        "/completed",
                        routing::get(parcelhub::api::v1::rider::index_completed),
                    )
                    .route(
                        "/:id",
                        routing::patch(parcelhub::api::v1::rider::set_status),
                    ),
            )
            .nest(
                "/payments",
                Router::new()
                    .route("/", routing::get(parcelhub::api::v1::payment::index))
                    .route(
                        "/confirm",
                        routing::post(parcelhub::api::v1::payment::confirm),
                    ),
            )
            .route(
                "/create-payment-intent",
                routing::post(parcelhub::api::v1::payment::create_intent),
            )
            .route(
                "/tracking/:tracking_id",
                routing::get(parcelhub::api::v1::tracking::show),
            ),
    );

    let app = Router::new()
        .nest("/api", api)
        .with_state(app_state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(tower_http::cors::CorsLayer::permissive());

    let port = std::env::var("PORT")
        .ok()
        .and_then(|it| it.parse().ok())
        .unwrap_or(8080);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::debug!("listening on {}", addr);

    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await
        .unwrap();
}
