use crate::handlers;
use crate::state::AppState;
use axum::{
    Router,
    routing::{get, post, put},
};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/overview", get(handlers::get_overview))
        .route("/api/today", get(handlers::get_today))
        .route("/api/streak", get(handlers::get_streak))
        .route(
            "/api/tasks",
            get(handlers::list_tasks).post(handlers::create_task),
        )
        .route(
            "/api/tasks/:id",
            put(handlers::update_task).delete(handlers::delete_task),
        )
        .route("/api/tasks/:id/complete", post(handlers::complete_task))
        .route("/api/calendar", get(handlers::get_calendar))
        .route("/api/stats", get(handlers::get_stats))
        .route("/api/session/start", post(handlers::start_session))
        .route("/api/session/end", post(handlers::end_session))
        .route("/api/usage", get(handlers::get_usage))
        .with_state(state)
}
