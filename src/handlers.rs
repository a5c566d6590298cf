use crate::errors::AppError;
use crate::models::{
    CalendarMonth, CalendarQuery, CompleteRequest, CompletionOutcome, HistoryResponse, Overview,
    StreakResult, Task, TaskDraft, TaskId, TodaySummary, UsageSummary,
};
use crate::state::AppState;
use crate::stats::{build_calendar, build_history_at};
use crate::storage::{HabitStore, validate_user};
use crate::usage::{self, SessionHandle};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
};
use chrono::Datelike;

pub const USER_HEADER: &str = "x-user-id";

fn user_of(state: &AppState, headers: &HeaderMap) -> String {
    headers
        .get(USER_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or(&*state.default_user)
        .to_string()
}

pub async fn get_overview(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Overview>, AppError> {
    let user = user_of(&state, &headers);
    Ok(Json(state.recorder.overview(&user).await?))
}

pub async fn get_today(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<TodaySummary>, AppError> {
    let user = user_of(&state, &headers);
    Ok(Json(state.recorder.overview(&user).await?.today))
}

pub async fn get_streak(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<StreakResult>, AppError> {
    let user = user_of(&state, &headers);
    Ok(Json(state.recorder.streak(&user).await?))
}

pub async fn list_tasks(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<Task>>, AppError> {
    let user = user_of(&state, &headers);
    Ok(Json(state.recorder.list_tasks(&user).await?))
}

pub async fn create_task(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(draft): Json<TaskDraft>,
) -> Result<(StatusCode, Json<Task>), AppError> {
    let user = user_of(&state, &headers);
    let task = state.recorder.create_task(&user, draft).await?;
    Ok((StatusCode::CREATED, Json(task)))
}

pub async fn update_task(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(draft): Json<TaskDraft>,
) -> Result<Json<Task>, AppError> {
    let user = user_of(&state, &headers);
    let task = state
        .recorder
        .update_task(&user, &TaskId::new(id), draft)
        .await?;
    Ok(Json(task))
}

pub async fn delete_task(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    let user = user_of(&state, &headers);
    state.recorder.delete_task(&user, &TaskId::new(id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn complete_task(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(payload): Json<CompleteRequest>,
) -> Result<Json<CompletionOutcome>, AppError> {
    let user = user_of(&state, &headers);
    let outcome = state
        .recorder
        .record_completion(&user, &TaskId::new(id), &payload.responses)
        .await?;
    Ok(Json(outcome))
}

pub async fn get_calendar(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<CalendarQuery>,
) -> Result<Json<CalendarMonth>, AppError> {
    let user = user_of(&state, &headers);
    let today = state.recorder.clock().today();
    let year = query.year.unwrap_or(today.year());
    let month = query.month.unwrap_or(today.month());

    let log = state.recorder.store().load_daily_log(&user).await?;
    let calendar = build_calendar(&log, year, month, today)
        .ok_or_else(|| AppError::bad_request(format!("no such month: {year}-{month}")))?;
    Ok(Json(calendar))
}

pub async fn get_stats(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<HistoryResponse>, AppError> {
    let user = user_of(&state, &headers);
    let doc = state.recorder.store().load_document(&user).await?;
    let today = state.recorder.clock().today();
    Ok(Json(build_history_at(today, &doc.daily_data, &doc.tasks)))
}

pub async fn start_session(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<SessionHandle>, AppError> {
    let user = user_of(&state, &headers);
    validate_user(&user)?;
    let recorder = &state.recorder;
    let handle = usage::start_session(recorder.store(), recorder.clock(), &user).await;
    Ok(Json(handle))
}

pub async fn end_session(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(handle): Json<SessionHandle>,
) -> Result<StatusCode, AppError> {
    let user = user_of(&state, &headers);
    validate_user(&user)?;
    if handle.user != user {
        return Err(AppError::bad_request("session belongs to another user"));
    }

    let recorder = &state.recorder;
    let ended =
        usage::end_session(recorder.store(), recorder.clock(), &user, &handle.id).await?;
    if !ended {
        return Err(AppError::not_found(format!("no open session '{}'", handle.id)));
    }
    Ok(StatusCode::NO_CONTENT)
}

pub async fn get_usage(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<UsageSummary>, AppError> {
    let user = user_of(&state, &headers);
    let records = state.recorder.store().load_usage(&user).await?;
    Ok(Json(usage::summarize(&records)))
}
