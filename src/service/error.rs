use thiserror::Error;
use uuid::Uuid;

use crate::db::matchdb::{ERR_ALREADY_APPLIED, ERR_APPLICATION_PROCESSED, ERR_REQUEST_NOT_OPEN};
use crate::error::HttpError;
use crate::models::matchmodel::{ApplicationStatus, RequestStatus};

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Request {0} not found")]
    RequestNotFound(Uuid),

    #[error("Application {0} not found")]
    ApplicationNotFound(Uuid),

    #[error("Thread {0} not found")]
    ThreadNotFound(Uuid),

    #[error("User {0} is not allowed to act on request {1}")]
    NotRequestOwner(Uuid, Uuid),

    #[error("User {0} is not a participant of thread {1}")]
    NotParticipant(Uuid, Uuid),

    #[error("Application {0} was already processed (status {1:?})")]
    InvalidApplicationStatus(Uuid, ApplicationStatus),

    #[error("Request {0} is no longer open")]
    RequestNotOpen(Uuid),

    #[error("Invalid status transition {from:?} -> {to:?}")]
    InvalidTransition {
        from: RequestStatus,
        to: RequestStatus,
    },

    #[error("Specialist {1} already applied to request {0}")]
    AlreadyApplied(Uuid, Uuid),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl ServiceError {
    /// Translate the store-level `Protocol` codes raised inside the accept /
    /// apply transactions into the caller-facing taxonomy.
    pub fn from_application_store_err(err: sqlx::Error, application_id: Uuid) -> Self {
        match err {
            sqlx::Error::RowNotFound => ServiceError::ApplicationNotFound(application_id),
            sqlx::Error::Protocol(code) if code == ERR_APPLICATION_PROCESSED => {
                ServiceError::InvalidApplicationStatus(application_id, ApplicationStatus::Accepted)
            }
            other => ServiceError::Database(other),
        }
    }

    pub fn from_accept_store_err(err: sqlx::Error, application_id: Uuid, request_id: Uuid) -> Self {
        match err {
            sqlx::Error::Protocol(code) if code == ERR_REQUEST_NOT_OPEN => {
                ServiceError::RequestNotOpen(request_id)
            }
            other => Self::from_application_store_err(other, application_id),
        }
    }

    pub fn from_apply_store_err(err: sqlx::Error, request_id: Uuid, specialist_id: Uuid) -> Self {
        match err {
            sqlx::Error::Protocol(code) if code == ERR_ALREADY_APPLIED => {
                ServiceError::AlreadyApplied(request_id, specialist_id)
            }
            other => ServiceError::Database(other),
        }
    }
}

impl From<ServiceError> for HttpError {
    fn from(error: ServiceError) -> Self {
        match error {
            ServiceError::RequestNotFound(_)
            | ServiceError::ApplicationNotFound(_)
            | ServiceError::ThreadNotFound(_) => HttpError::not_found(error.to_string()),

            ServiceError::NotRequestOwner(_, _) | ServiceError::NotParticipant(_, _) => {
                HttpError::forbidden(error.to_string())
            }

            ServiceError::InvalidApplicationStatus(_, _)
            | ServiceError::RequestNotOpen(_)
            | ServiceError::InvalidTransition { .. }
            | ServiceError::Validation(_) => HttpError::bad_request(error.to_string()),

            ServiceError::AlreadyApplied(_, _) => HttpError::conflict(error.to_string()),

            ServiceError::Database(_) => HttpError::server_error(error.to_string()),
        }
    }
}
