// src/routes.rs

use axum::{
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::{config::AppState, docs::ApiDoc, handlers, middleware::auth::auth_guard};

pub fn app_router(app_state: AppState) -> Router {
    // Públicas, mas sempre no escopo de um tenant (X-Tenant-ID)
    let public_routes = Router::new()
        .route("/centres/{id}/disponibilites", get(handlers::availability::get_disponibilites))
        .route("/centres/{id}/dates-disponibles", get(handlers::availability::get_dates_disponibles))
        .route("/paiements/check-promo", post(handlers::payments::check_promo))
        // Autenticada pelo segredo compartilhado, não por JWT
        .route("/paiements/webhook", post(handlers::payments::webhook));

    let protected_routes = Router::new()
        .route("/centres/{id}/planning", get(handlers::availability::get_planning))
        .route("/rdv/create-with-payment", post(handlers::appointments::create_with_payment))
        .route("/rdv/{id}", get(handlers::appointments::get_rdv))
        .route("/rdv/{id}/checkin", post(handlers::appointments::checkin))
        .route("/rdv/{id}/demarrer", post(handlers::appointments::demarrer))
        .route("/rdv/{id}/terminer", post(handlers::appointments::terminer))
        .route("/rdv/{id}/no-show", post(handlers::appointments::no_show))
        .route("/rdv/{id}/annuler", post(handlers::appointments::annuler))
        .route("/rdv/{id}/replanifier", post(handlers::appointments::replanifier))
        .layer(axum_middleware::from_fn_with_state(
            app_state.clone(),
            auth_guard,
        ));

    Router::new()
        .route("/api/health", get(|| async { "OK" }))
        .nest("/api", public_routes.merge(protected_routes))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(app_state)
}
