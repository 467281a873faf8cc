use std::sync::Arc;

use axum::{
    extract::Path,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
    Extension, Json, Router,
};
use uuid::Uuid;
use validator::Validate;

use crate::{
    dtos::matchdtos::*,
    error::HttpError,
    middleware::JWTAuthMiddeware,
    AppState,
};

pub fn matching_handler() -> Router {
    Router::new()
        .route("/requests", post(create_request))
        .route("/requests/:request_id", get(get_request))
        .route(
            "/requests/:request_id/applications",
            get(get_request_applications).post(apply_to_request),
        )
        .route("/requests/:request_id/status", put(update_request_status))
        .route("/applications/:application_id/accept", post(accept_application))
        .route("/applications/:application_id/decline", post(decline_application))
}

pub async fn create_request(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddeware>,
    Json(body): Json<CreateRequestDto>,
) -> Result<impl IntoResponse, HttpError> {
    body.validate()
        .map_err(|e| HttpError::bad_request(e.to_string()))?;

    let request = app_state
        .match_service
        .create_request(&auth.user, body.category_id, body.title, body.description)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({
            "status": "success",
            "data": request
        })),
    ))
}

pub async fn get_request(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(_auth): Extension<JWTAuthMiddeware>,
    Path(request_id): Path<Uuid>,
) -> Result<impl IntoResponse, HttpError> {
    let request = app_state.match_service.get_request(request_id).await?;

    Ok(Json(serde_json::json!({
        "status": "success",
        "data": request
    })))
}

pub async fn get_request_applications(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddeware>,
    Path(request_id): Path<Uuid>,
) -> Result<impl IntoResponse, HttpError> {
    let applications = app_state
        .match_service
        .list_applications(request_id, auth.user.id)
        .await?;

    Ok(Json(serde_json::json!({
        "status": "success",
        "data": applications
    })))
}

pub async fn apply_to_request(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddeware>,
    Path(request_id): Path<Uuid>,
    Json(body): Json<CreateApplicationDto>,
) -> Result<impl IntoResponse, HttpError> {
    body.validate()
        .map_err(|e| HttpError::bad_request(e.to_string()))?;

    let application = app_state
        .match_service
        .create_application(request_id, &auth.user, body.message)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({
            "status": "success",
            "data": application
        })),
    ))
}

pub async fn update_request_status(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddeware>,
    Path(request_id): Path<Uuid>,
    Json(body): Json<UpdateRequestStatusDto>,
) -> Result<impl IntoResponse, HttpError> {
    let request = app_state
        .match_service
        .update_request_status(request_id, auth.user.id, body.status)
        .await?;

    Ok(Json(serde_json::json!({
        "status": "success",
        "data": request
    })))
}

pub async fn accept_application(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddeware>,
    Path(application_id): Path<Uuid>,
) -> Result<impl IntoResponse, HttpError> {
    let outcome = app_state
        .match_service
        .accept_application(application_id, auth.user.id)
        .await?;

    let response = AcceptApplicationResponseDto {
        thread_id: outcome.thread.id,
        application: outcome.application,
        request: outcome.request,
    };

    Ok(Json(serde_json::json!({
        "status": "success",
        "data": response
    })))
}

pub async fn decline_application(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddeware>,
    Path(application_id): Path<Uuid>,
) -> Result<impl IntoResponse, HttpError> {
    let application = app_state
        .match_service
        .decline_application(application_id, auth.user.id)
        .await?;

    Ok(Json(serde_json::json!({
        "status": "success",
        "data": application
    })))
}
