//! Role/ownership checks for match operations, kept transport-free so they
//! can be tested without HTTP plumbing.

use uuid::Uuid;

use crate::models::matchmodel::{Request, RequestStatus};
use crate::models::usermodel::{User, UserRole};

/// Only the client who owns the request decides its applications.
pub fn can_decide_application(actor_id: Uuid, request: &Request) -> bool {
    request.client_id == actor_id
}

/// Specialists apply; a client can never apply to their own request.
pub fn can_apply(actor: &User, request: &Request) -> bool {
    actor.role == UserRole::Specialist && actor.id != request.client_id
}

/// Status transitions allowed per actor:
/// - the owning client: OPEN -> CANCELLED, IN_PROGRESS -> COMPLETED;
/// - the accepted specialist: IN_PROGRESS -> COMPLETED.
/// Everything else is denied.
pub fn can_transition(
    actor_id: Uuid,
    request: &Request,
    accepted_specialist: Option<Uuid>,
    to: RequestStatus,
) -> bool {
    use RequestStatus::*;

    let from = request.status;
    if actor_id == request.client_id {
        matches!((from, to), (Open, Cancelled) | (InProgress, Completed))
    } else if accepted_specialist == Some(actor_id) {
        matches!((from, to), (InProgress, Completed))
    } else {
        false
    }
}
