//! HTTP server and routes.

mod handlers;
mod state;

pub use state::AppState;

use axum::{
    Router,
    routing::{delete, get, post, put},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let auth_routes = Router::new()
        .route("/login", post(handlers::auth_login))
        .route("/register", post(handlers::auth_register))
        .route("/logout", post(handlers::auth_logout))
        .route("/me", get(handlers::auth_me));

    let progress_routes = Router::new()
        .route("/", post(handlers::progress_upsert))
        .route("/", get(handlers::progress_list))
        .route("/{item_id}", get(handlers::progress_get));

    let annotation_routes = Router::new()
        .route("/", get(handlers::annotations_list))
        .route("/", post(handlers::annotation_create))
        .route("/{id}", put(handlers::annotation_update))
        .route("/{id}", delete(handlers::annotation_delete));

    let activity_routes = Router::new()
        .route("/log", post(handlers::activity_log))
        .route("/logs", get(handlers::activity_logs))
        .route("/archive", post(handlers::activity_archive));

    let book_routes = Router::new()
        .route("/", get(handlers::books_list))
        .route("/", post(handlers::book_create))
        .route("/{id}", get(handlers::book_get))
        .route("/{id}", put(handlers::book_update))
        .route("/{id}", delete(handlers::book_delete))
        .route("/{id}/download", get(handlers::book_download))
        .route("/{id}/cover", get(handlers::book_cover))
        .route("/{id}/thumbnail", get(handlers::book_thumbnail));

    let category_routes = Router::new()
        .route("/", get(handlers::categories_list))
        .route("/", post(handlers::category_create))
        .route("/{id}", put(handlers::category_update))
        .route("/{id}", delete(handlers::category_delete));

    let user_routes = Router::new()
        .route("/", get(handlers::users_list))
        .route("/", post(handlers::user_create))
        .route("/{id}", delete(handlers::user_delete));

    Router::new()
        .route("/", get(handlers::index))
        .nest("/api/auth", auth_routes)
        .nest("/api/progress", progress_routes)
        .nest("/api/annotations", annotation_routes)
        .nest("/api/activity", activity_routes)
        .nest("/api/books", book_routes)
        .nest("/api/categories", category_routes)
        .nest("/api/users", user_routes)
        .route("/api/stats", get(handlers::api_stats))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
