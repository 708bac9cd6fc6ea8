//! Project access policy.
//!
//! Every handler goes through [`authorize`] (or [`require_role`]) instead of
//! checking roles inline. Roles are ordered `Member < Admin < Owner`; a
//! requirement is met by the required role or anything above it.
//!
//! | Action                                   | Required role |
//! |------------------------------------------|---------------|
//! | read project, board, tasks, comments     | `Member`      |
//! | create / edit / move / delete tasks      | `Member`      |
//! | edit project, add or remove members      | `Admin`       |
//! | delete project                           | `Owner`       |

use super::models::ProjectRole;
use crate::errors::BoardError;

pub fn authorize(role: Option<ProjectRole>, required: ProjectRole) -> bool {
    role.is_some_and(|r| r >= required)
}

/// Like [`authorize`], but as an error suitable for `?`.
///
/// Non-members get `ProjectNotFound` so project ids cannot be probed;
/// members below `required` get `Forbidden`.
pub fn require_role(
    project_id: i64,
    role: Option<ProjectRole>,
    required: ProjectRole,
) -> Result<ProjectRole, BoardError> {
    match role {
        None => Err(BoardError::ProjectNotFound { id: project_id }),
        Some(r) if authorize(Some(r), required) => Ok(r),
        Some(_) => Err(BoardError::Forbidden),
    }
}
