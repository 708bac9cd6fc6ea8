//! Demo data for a fresh database.

use anyhow::Result;

use super::auth;
use super::db::BoardDb;
use super::models::*;

pub const DEMO_PASSWORD: &str = "password123";

const DEMO_USERS: [(&str, &str); 3] = [
    ("demo@taskflow.com", "Demo User"),
    ("alice@taskflow.com", "Alice Johnson"),
    ("bob@taskflow.com", "Bob Smith"),
];

/// (title, description, status, priority, assignee index into `DEMO_USERS`)
const DEMO_TASKS: [(&str, &str, TaskStatus, TaskPriority, Option<usize>); 6] = [
    (
        "Set up project structure",
        "Initialize the project with proper folder structure and dependencies",
        TaskStatus::Done,
        TaskPriority::High,
        Some(0),
    ),
    (
        "Design user interface mockups",
        "Create wireframes and design mockups for the main application screens",
        TaskStatus::InProgress,
        TaskPriority::High,
        Some(1),
    ),
    (
        "Implement user authentication",
        "Email and password sign-in with server-side sessions",
        TaskStatus::InReview,
        TaskPriority::Medium,
        Some(0),
    ),
    (
        "Create task management features",
        "Build CRUD operations for tasks with drag-and-drop functionality",
        TaskStatus::Todo,
        TaskPriority::High,
        Some(2),
    ),
    (
        "Add real-time collaboration",
        "Push board changes to every open client",
        TaskStatus::Todo,
        TaskPriority::Medium,
        None,
    ),
    (
        "Write documentation",
        "Create comprehensive documentation for the project",
        TaskStatus::Todo,
        TaskPriority::Low,
        None,
    ),
];

#[derive(Debug, Clone, PartialEq)]
pub struct SeedSummary {
    pub users_created: usize,
    pub project_id: i64,
    pub tasks_created: usize,
    pub comments_created: usize,
}

/// Insert demo users (skipping ones that already exist), one demo project
/// with all three as members, its tasks and a short comment thread.
pub fn seed_demo(db: &BoardDb) -> Result<SeedSummary> {
    let password_hash = auth::hash_password(DEMO_PASSWORD)?;

    let mut users = Vec::with_capacity(DEMO_USERS.len());
    let mut users_created = 0;
    for (email, name) in DEMO_USERS {
        let user = match db.find_user_by_email(email)? {
            Some((user, _)) => user,
            None => {
                users_created += 1;
                db.create_user(email, Some(name), &password_hash)?
            }
        };
        users.push(user);
    }

    let owner = &users[0];
    let project = db.create_project(
        &NewProject {
            name: "TaskFlow Demo Project".into(),
            description: Some("A sample project to showcase TaskFlow features".into()),
            color: Some("#3b82f6".into()),
        },
        owner.id,
    )?;
    db.add_member(project.id, &users[1].email, ProjectRole::Admin, owner.id)?;
    db.add_member(project.id, &users[2].email, ProjectRole::Member, owner.id)?;

    let mut tasks = Vec::with_capacity(DEMO_TASKS.len());
    for (title, description, status, priority, assignee) in DEMO_TASKS {
        let new = NewTask {
            title: title.into(),
            description: Some(description.into()),
            status: Some(status),
            priority: Some(priority),
            assignee_id: assignee.map(|i| users[i].id),
            due_date: None,
        };
        tasks.push(db.create_task(project.id, &new, owner.id)?);
    }

    let first = &tasks[0];
    db.add_comment(
        first.id,
        "Great work on setting this up! The project structure looks clean.",
        users[1].id,
    )?;
    db.add_comment(first.id, "Thanks! Kept the layout simple on purpose.", owner.id)?;

    tracing::info!(project_id = project.id, users_created, "demo data seeded");
    Ok(SeedSummary {
        users_created,
        project_id: project.id,
        tasks_created: tasks.len(),
        comments_created: 2,
    })
}
