pub mod auth;
pub mod cache;
pub mod chat;
pub mod conversations;
pub mod error;
pub mod extract;
pub mod middleware;
pub mod state;
pub mod totp;
pub mod validate;

use axum::{
    Json, Router,
    middleware::from_fn_with_state,
    response::IntoResponse,
    routing::{get, post},
};
use serde_json::json;

pub use state::{AppState, AppStateInner, AuthSettings};

/// All API routes. Transport layers (CORS, tracing, static files) are added
/// by the server binary.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/auth/initiate_signin", post(auth::initiate_signin))
        .route("/auth/signin", post(auth::signin));

    let protected_routes = Router::new()
        .route("/ai/conversations", get(conversations::list_conversations))
        .route(
            "/ai/conversations/{conversation_id}",
            get(conversations::get_conversation).delete(conversations::delete_conversation),
        )
        .route("/ai/chat", post(chat::chat))
        .route_layer(from_fn_with_state(state.clone(), middleware::require_auth));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(state)
}

async fn root() -> &'static str {
    "Hello World! You are in the backend of the chatAI!"
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}
