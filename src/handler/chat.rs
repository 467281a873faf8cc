use std::sync::Arc;

use axum::{
    extract::{Path, Query},
    response::IntoResponse,
    routing::{get, put},
    Extension, Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use crate::{error::HttpError, middleware::JWTAuthMiddeware, AppState};

pub fn chat_handler() -> Router {
    Router::new()
        .route("/threads", get(get_user_threads).post(open_thread))
        .route("/threads/:thread_id", get(get_thread_details))
        .route(
            "/threads/:thread_id/messages",
            get(get_messages).post(send_message),
        )
        .route("/threads/:thread_id/read", put(mark_thread_as_read))
        .route("/unread-count", get(get_unread_count))
}

#[derive(Debug, Deserialize, Validate)]
pub struct OpenThreadDto {
    pub other_user_id: Uuid,
    pub request_id: Option<Uuid>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct SendMessageDto {
    #[validate(length(min = 1, max = 1000, message = "Message must be between 1 and 1000 characters"))]
    pub body: String,

    pub attachment_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct PaginationQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct MessageHistoryQuery {
    pub limit: Option<i64>,

    #[serde(rename = "beforeId")]
    pub before_id: Option<Uuid>,
}

pub async fn open_thread(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddeware>,
    Json(body): Json<OpenThreadDto>,
) -> Result<impl IntoResponse, HttpError> {
    body.validate()
        .map_err(|e| HttpError::bad_request(e.to_string()))?;

    let thread = app_state
        .chat_service
        .open_thread(&auth.user, body.other_user_id, body.request_id)
        .await?;

    Ok(Json(serde_json::json!({
        "status": "success",
        "data": thread
    })))
}

pub async fn get_user_threads(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddeware>,
    Query(pagination): Query<PaginationQuery>,
) -> Result<impl IntoResponse, HttpError> {
    let page = pagination.page.unwrap_or(1).max(1);
    let limit = pagination.limit.unwrap_or(20).min(100) as i64;
    let offset = ((page - 1) as i64) * limit;

    let threads = app_state
        .chat_service
        .thread_overviews(auth.user.id, limit, offset)
        .await?;

    Ok(Json(serde_json::json!({
        "status": "success",
        "data": threads
    })))
}

pub async fn get_thread_details(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddeware>,
    Path(thread_id): Path<Uuid>,
) -> Result<impl IntoResponse, HttpError> {
    let (thread, other_user) = app_state
        .chat_service
        .thread_detail(thread_id, auth.user.id)
        .await?;

    Ok(Json(serde_json::json!({
        "status": "success",
        "data": {
            "thread": thread,
            "otherUser": other_user
        }
    })))
}

pub async fn get_messages(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddeware>,
    Path(thread_id): Path<Uuid>,
    Query(query): Query<MessageHistoryQuery>,
) -> Result<impl IntoResponse, HttpError> {
    let limit = query.limit.unwrap_or(50).clamp(1, 100);

    let page = app_state
        .chat_service
        .list_messages(thread_id, auth.user.id, query.before_id, limit)
        .await?;

    Ok(Json(serde_json::json!({
        "status": "success",
        "data": {
            "items": page.items,
            "hasMore": page.has_more
        }
    })))
}

pub async fn send_message(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddeware>,
    Path(thread_id): Path<Uuid>,
    Json(body): Json<SendMessageDto>,
) -> Result<impl IntoResponse, HttpError> {
    body.validate()
        .map_err(|e| HttpError::bad_request(e.to_string()))?;

    let message = app_state
        .chat_service
        .send_message(thread_id, auth.user.id, body.body, body.attachment_id)
        .await?;

    Ok(Json(serde_json::json!({
        "status": "success",
        "data": message
    })))
}

pub async fn mark_thread_as_read(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddeware>,
    Path(thread_id): Path<Uuid>,
) -> Result<impl IntoResponse, HttpError> {
    let updated = app_state
        .chat_service
        .mark_read(thread_id, auth.user.id)
        .await?;

    Ok(Json(serde_json::json!({
        "status": "success",
        "data": {
            "updated": updated
        }
    })))
}

pub async fn get_unread_count(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddeware>,
) -> Result<impl IntoResponse, HttpError> {
    let count = app_state.chat_service.unread_count(auth.user.id).await?;

    Ok(Json(serde_json::json!({
        "status": "success",
        "data": {
            "unreadCount": count
        }
    })))
}
