//! HTTP surface of the dispatcher.
//!
//! ```text
//! GET /health
//! GET /api/v1/images/:id/predict
//! ```

pub mod handlers;

use axum::{http::Method, routing::get, Router};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

pub use handlers::{health, predict_image, AppState, ErrorResponse, HealthResponse, PredictResponse};

/// Build the router. CORS is open to any origin.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/api/v1/images/:id/predict", get(predict_image))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
