//! Activity log entries written alongside board mutations.
//!
//! Builders here only shape a [`NewActivity`]; the store appends it inside
//! the same transaction as the mutation it describes.

use super::models::*;

pub fn project_created(project: &Project, user_id: i64) -> NewActivity {
    NewActivity {
        kind: ActivityType::ProjectCreated,
        message: format!("Created project \"{}\"", project.name),
        project_id: project.id,
        task_id: None,
        user_id,
        metadata: Some(
            ActivityDetail::ProjectChange {
                project_name: project.name.clone(),
            }
            .into(),
        ),
    }
}

pub fn project_updated(project: &Project, user_id: i64) -> NewActivity {
    NewActivity {
        kind: ActivityType::ProjectUpdated,
        message: format!("Updated project \"{}\"", project.name),
        project_id: project.id,
        task_id: None,
        user_id,
        metadata: Some(
            ActivityDetail::ProjectChange {
                project_name: project.name.clone(),
            }
            .into(),
        ),
    }
}

pub fn member_added(member: &ProjectMember, user_id: i64) -> NewActivity {
    NewActivity {
        kind: ActivityType::MemberAdded,
        message: format!("Added {} to the project", member.user.display_name()),
        project_id: member.project_id,
        task_id: None,
        user_id,
        metadata: Some(
            ActivityDetail::MemberChange {
                member_user_id: member.user.id,
                role: member.role,
            }
            .into(),
        ),
    }
}

pub fn member_removed(member: &ProjectMember, user_id: i64) -> NewActivity {
    NewActivity {
        kind: ActivityType::MemberRemoved,
        message: format!("Removed {} from the project", member.user.display_name()),
        project_id: member.project_id,
        task_id: None,
        user_id,
        metadata: Some(
            ActivityDetail::MemberChange {
                member_user_id: member.user.id,
                role: member.role,
            }
            .into(),
        ),
    }
}

pub fn task_created(task: &Task, user_id: i64) -> NewActivity {
    NewActivity {
        kind: ActivityType::TaskCreated,
        message: format!("Created task \"{}\"", task.title),
        project_id: task.project_id,
        task_id: Some(task.id),
        user_id,
        metadata: Some(task_change(task, None)),
    }
}

/// Entry for an edited task. A status change reads as "moved", or as
/// "completed" when the task lands in `Done`.
pub fn task_updated(task: &Task, old_status: TaskStatus, user_id: i64) -> NewActivity {
    let (kind, message) = if old_status == task.status {
        (ActivityType::TaskUpdated, format!("Updated task \"{}\"", task.title))
    } else if task.status == TaskStatus::Done {
        (ActivityType::TaskCompleted, format!("Completed task \"{}\"", task.title))
    } else {
        (
            ActivityType::TaskUpdated,
            format!("Moved task \"{}\" to {}", task.title, task.status.label()),
        )
    };
    NewActivity {
        kind,
        message,
        project_id: task.project_id,
        task_id: Some(task.id),
        user_id,
        metadata: Some(task_change(task, Some(old_status))),
    }
}

pub fn task_deleted(task: &Task, user_id: i64) -> NewActivity {
    NewActivity {
        kind: ActivityType::TaskDeleted,
        message: format!("Deleted task \"{}\"", task.title),
        project_id: task.project_id,
        task_id: None,
        user_id,
        metadata: Some(
            ActivityDetail::TaskDeleted {
                task_title: task.title.clone(),
                deleted_task_id: task.id,
            }
            .into(),
        ),
    }
}

pub fn comment_added(task: &Task, user_id: i64) -> NewActivity {
    NewActivity {
        kind: ActivityType::CommentAdded,
        message: format!("Added a comment to \"{}\"", task.title),
        project_id: task.project_id,
        task_id: Some(task.id),
        user_id,
        metadata: None,
    }
}

fn task_change(task: &Task, old_status: Option<TaskStatus>) -> ActivityMetadata {
    ActivityDetail::TaskChange {
        task_title: task.title.clone(),
        old_status,
        new_status: task.status,
        priority: task.priority,
        assignee_id: task.assignee_id,
    }
    .into()
}
