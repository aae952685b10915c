use std::{net::SocketAddr, sync::Arc};

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use serde::Deserialize;
use server_api::ApiContext;
use shared::{
    domain::{ChapterId, CourseId, LessonId, UserId},
    error::{ApiError, ErrorCode},
    protocol::{
        ChapterSummary, CourseProgress, CourseQuery, CourseStructure, CourseSummary,
        CreateChapterRequest,
        CreateCourseRequest, CreateLessonRequest, CreateUserRequest, EnrollRequest,
        EnrollResponse, LessonProgress, LessonSummary, SetPositionsRequest,
        SetPositionsResponse, SetProgressRequest, UpdateChapterRequest, UpdateLessonRequest,
        UserSummary,
    },
};
use storage::Storage;
use tower_http::limit::RequestBodyLimitLayer;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod config;

use config::{load_settings, normalize_database_url};

#[derive(Clone)]
struct AppState {
    api: ApiContext,
}

#[derive(Debug, Deserialize)]
struct UserQuery {
    user_id: i64,
}

type HttpResult<T> = Result<T, (StatusCode, Json<ApiError>)>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = load_settings();
    let database_url = normalize_database_url(&settings.database_url);
    let storage = Storage::new(&database_url).await.map_err(|error| {
        error!(
            %database_url,
            %error,
            "failed to open SQLite database; verify parent directory exists and permissions are correct"
        );
        error
    })?;
    let state = AppState {
        api: ApiContext::new(storage),
    };
    let app = build_router(Arc::new(state), settings.max_body_bytes);

    let addr: SocketAddr = settings.server_bind.parse()?;
    info!(%addr, max_body_bytes = settings.max_body_bytes, "server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn build_router(state: Arc<AppState>, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/users", post(http_create_user))
        .route("/users/:user_id/enrollments", get(http_user_courses))
        .route("/courses", get(http_list_courses).post(http_create_course))
        .route("/courses/by-slug/:slug", get(http_course_by_slug))
        .route("/courses/:course_id/structure", get(http_course_structure))
        .route("/courses/:course_id/positions", put(http_set_positions))
        .route("/courses/:course_id/enroll", post(http_enroll))
        .route("/courses/:course_id/progress", get(http_course_progress))
        .route("/chapters", post(http_create_chapter))
        .route(
            "/chapters/:chapter_id",
            put(http_update_chapter).delete(http_delete_chapter),
        )
        .route("/lessons", post(http_create_lesson))
        .route(
            "/lessons/:lesson_id",
            put(http_update_lesson).delete(http_delete_lesson),
        )
        .route(
            "/lessons/:lesson_id/progress",
            get(http_lesson_progress).put(http_set_lesson_progress),
        )
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .with_state(state)
}

fn status_for(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::Validation => StatusCode::BAD_REQUEST,
        ErrorCode::Unauthorized => StatusCode::UNAUTHORIZED,
        ErrorCode::Forbidden => StatusCode::FORBIDDEN,
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::Conflict => StatusCode::CONFLICT,
        ErrorCode::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn reject(err: ApiError) -> (StatusCode, Json<ApiError>) {
    let status = status_for(err.code);
    if status.is_server_error() {
        error!(code = ?err.code, message = %err.message, "request failed");
    } else {
        warn!(code = ?err.code, message = %err.message, "request rejected");
    }
    (status, Json(err))
}

async fn healthz(State(state): State<Arc<AppState>>) -> HttpResult<&'static str> {
    state.api.storage.health_check().await.map_err(|e| {
        reject(ApiError::new(ErrorCode::Internal, e.to_string()))
    })?;
    Ok("ok")
}

async fn http_create_user(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateUserRequest>,
) -> HttpResult<Json<UserSummary>> {
    server_api::create_user(&state.api, &req.username)
        .await
        .map(Json)
        .map_err(reject)
}

async fn http_user_courses(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<i64>,
) -> HttpResult<Json<Vec<CourseSummary>>> {
    server_api::user_courses(&state.api, UserId(user_id))
        .await
        .map(Json)
        .map_err(reject)
}

async fn http_list_courses(
    State(state): State<Arc<AppState>>,
    Query(q): Query<CourseQuery>,
) -> HttpResult<Json<Vec<CourseSummary>>> {
    server_api::list_courses(&state.api, q)
        .await
        .map(Json)
        .map_err(reject)
}

async fn http_course_by_slug(
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
) -> HttpResult<Json<CourseSummary>> {
    server_api::course_by_slug(&state.api, &slug)
        .await
        .map(Json)
        .map_err(reject)
}

async fn http_create_course(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateCourseRequest>,
) -> HttpResult<impl IntoResponse> {
    let course = server_api::create_course(&state.api, req)
        .await
        .map_err(reject)?;
    Ok((StatusCode::CREATED, Json(course)))
}

async fn http_course_structure(
    State(state): State<Arc<AppState>>,
    Path(course_id): Path<i64>,
) -> HttpResult<Json<CourseStructure>> {
    server_api::course_structure(&state.api, CourseId(course_id))
        .await
        .map(Json)
        .map_err(reject)
}

async fn http_set_positions(
    State(state): State<Arc<AppState>>,
    Path(course_id): Path<i64>,
    Json(req): Json<SetPositionsRequest>,
) -> HttpResult<Json<SetPositionsResponse>> {
    server_api::set_positions(&state.api, CourseId(course_id), req)
        .await
        .map(Json)
        .map_err(reject)
}

async fn http_enroll(
    State(state): State<Arc<AppState>>,
    Path(course_id): Path<i64>,
    Json(req): Json<EnrollRequest>,
) -> HttpResult<Json<EnrollResponse>> {
    server_api::enroll(&state.api, req.user_id, CourseId(course_id))
        .await
        .map(Json)
        .map_err(reject)
}

async fn http_course_progress(
    State(state): State<Arc<AppState>>,
    Path(course_id): Path<i64>,
    Query(q): Query<UserQuery>,
) -> HttpResult<Json<CourseProgress>> {
    server_api::course_progress(&state.api, UserId(q.user_id), CourseId(course_id))
        .await
        .map(Json)
        .map_err(reject)
}

async fn http_create_chapter(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateChapterRequest>,
) -> HttpResult<impl IntoResponse> {
    let chapter = server_api::create_chapter(&state.api, req)
        .await
        .map_err(reject)?;
    Ok((StatusCode::CREATED, Json(chapter)))
}

async fn http_update_chapter(
    State(state): State<Arc<AppState>>,
    Path(chapter_id): Path<i64>,
    Json(req): Json<UpdateChapterRequest>,
) -> HttpResult<Json<ChapterSummary>> {
    server_api::update_chapter(&state.api, ChapterId(chapter_id), req)
        .await
        .map(Json)
        .map_err(reject)
}

async fn http_delete_chapter(
    State(state): State<Arc<AppState>>,
    Path(chapter_id): Path<i64>,
) -> HttpResult<StatusCode> {
    server_api::delete_chapter(&state.api, ChapterId(chapter_id))
        .await
        .map_err(reject)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn http_create_lesson(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateLessonRequest>,
) -> HttpResult<impl IntoResponse> {
    let lesson = server_api::create_lesson(&state.api, req)
        .await
        .map_err(reject)?;
    Ok((StatusCode::CREATED, Json(lesson)))
}

async fn http_update_lesson(
    State(state): State<Arc<AppState>>,
    Path(lesson_id): Path<i64>,
    Json(req): Json<UpdateLessonRequest>,
) -> HttpResult<Json<LessonSummary>> {
    server_api::update_lesson(&state.api, LessonId(lesson_id), req)
        .await
        .map(Json)
        .map_err(reject)
}

async fn http_delete_lesson(
    State(state): State<Arc<AppState>>,
    Path(lesson_id): Path<i64>,
) -> HttpResult<StatusCode> {
    server_api::delete_lesson(&state.api, LessonId(lesson_id))
        .await
        .map_err(reject)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn http_lesson_progress(
    State(state): State<Arc<AppState>>,
    Path(lesson_id): Path<i64>,
    Query(q): Query<UserQuery>,
) -> HttpResult<Json<LessonProgress>> {
    server_api::lesson_progress(&state.api, UserId(q.user_id), LessonId(lesson_id))
        .await
        .map(Json)
        .map_err(reject)
}

async fn http_set_lesson_progress(
    State(state): State<Arc<AppState>>,
    Path(lesson_id): Path<i64>,
    Json(req): Json<SetProgressRequest>,
) -> HttpResult<Json<LessonProgress>> {
    server_api::set_lesson_progress(&state.api, LessonId(lesson_id), req)
        .await
        .map(Json)
        .map_err(reject)
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
