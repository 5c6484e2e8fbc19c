use super::handlers::{self, AppState};
use super::metrics_handler::{metrics_handler, track_http};
use axum::{Router, middleware, routing::get};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

/// Create the Axum router with all endpoints
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handlers::health_check))
        // Cache
        .route(
            "/cache/{key}",
            get(handlers::cache_get)
                .put(handlers::cache_put)
                .delete(handlers::cache_delete),
        )
        .route("/stats", get(handlers::node_stats))
        // Cluster
        .route("/cluster/nodes", get(handlers::cluster_nodes))
        .route("/cluster/leader", get(handlers::cluster_leader))
        .route("/cluster/health", get(handlers::cluster_health))
        .route("/metrics", get(metrics_handler))
        .route_layer(middleware::from_fn(track_http))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}
