use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::models::matchmodel::{Application, Request, RequestStatus};

#[derive(Debug, Deserialize, Validate)]
pub struct CreateRequestDto {
    pub category_id: Uuid,

    #[validate(length(min = 1, max = 120, message = "Title must be between 1 and 120 characters"))]
    pub title: String,

    #[validate(length(max = 2000, message = "Description must be at most 2000 characters"))]
    pub description: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateApplicationDto {
    #[validate(length(min = 1, max = 1000, message = "Message must be between 1 and 1000 characters"))]
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateRequestStatusDto {
    pub status: RequestStatus,
}

/// Response to an accept: the thread identifier is what the UI navigates to.
#[derive(Debug, Serialize)]
pub struct AcceptApplicationResponseDto {
    #[serde(rename = "threadId")]
    pub thread_id: Uuid,
    pub application: Application,
    pub request: Request,
}
