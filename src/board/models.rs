use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::BoardError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub name: Option<String>,
    pub created_at: String,
}

impl User {
    /// Name for activity messages, falling back to the email address.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.email)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    Active,
    Archived,
}

impl ProjectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Archived => "archived",
        }
    }
}

impl FromStr for ProjectStatus {
    type Err = BoardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "active" => Ok(Self::Active),
            "archived" => Ok(Self::Archived),
            _ => Err(BoardError::Validation(format!("Invalid project status: {}", s))),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct NewProject {
    pub name: String,
    pub description: Option<String>,
    pub color: Option<String>,
}

/// Partial update of a project; `description: Some(None)` clears it.
#[derive(Debug, Clone, Default)]
pub struct ProjectUpdate {
    pub name: Option<String>,
    pub description: Option<Option<String>>,
    pub color: Option<String>,
    pub status: Option<ProjectStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Project {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub color: String,
    pub status: ProjectStatus,
    pub created_at: String,
    pub updated_at: String,
}

/// Membership role within a project, ordered from least to most privileged.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ProjectRole {
    Member,
    Admin,
    Owner,
}

impl ProjectRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Member => "member",
            Self::Admin => "admin",
            Self::Owner => "owner",
        }
    }
}

impl FromStr for ProjectRole {
    type Err = BoardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "member" => Ok(Self::Member),
            "admin" => Ok(Self::Admin),
            "owner" => Ok(Self::Owner),
            _ => Err(BoardError::InvalidRole(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProjectMember {
    pub id: i64,
    pub project_id: i64,
    pub role: ProjectRole,
    pub user: User,
    pub joined_at: String,
}

/// Kanban column a task lives in. Any status is reachable from any other.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Todo,
    InProgress,
    InReview,
    Done,
}

impl TaskStatus {
    /// Board column order, left to right.
    pub const ALL: [TaskStatus; 4] = [
        TaskStatus::Todo,
        TaskStatus::InProgress,
        TaskStatus::InReview,
        TaskStatus::Done,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Todo => "todo",
            Self::InProgress => "in_progress",
            Self::InReview => "in_review",
            Self::Done => "done",
        }
    }

    /// Human-readable column name used in activity messages.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Todo => "todo",
            Self::InProgress => "in progress",
            Self::InReview => "in review",
            Self::Done => "done",
        }
    }
}

impl FromStr for TaskStatus {
    type Err = BoardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "todo" => Ok(Self::Todo),
            "in_progress" => Ok(Self::InProgress),
            "in_review" => Ok(Self::InReview),
            "done" => Ok(Self::Done),
            _ => Err(BoardError::InvalidStatus(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low,
    Medium,
    High,
    Urgent,
}

impl TaskPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Urgent => "urgent",
        }
    }
}

impl FromStr for TaskPriority {
    type Err = BoardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "urgent" => Ok(Self::Urgent),
            _ => Err(BoardError::InvalidPriority(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub id: i64,
    pub project_id: i64,
    pub title: String,
    pub description: Option<String>,
    pub status: TaskStatus,
    pub position: f64,
    pub priority: TaskPriority,
    pub assignee_id: Option<i64>,
    pub due_date: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Attributes for a new task. Position is never caller-supplied.
#[derive(Debug, Clone, Default)]
pub struct NewTask {
    pub title: String,
    pub description: Option<String>,
    pub status: Option<TaskStatus>,
    pub priority: Option<TaskPriority>,
    pub assignee_id: Option<i64>,
    pub due_date: Option<String>,
}

impl NewTask {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    pub fn in_status(mut self, status: TaskStatus) -> Self {
        self.status = Some(status);
        self
    }
}

/// Partial update of a task.
///
/// Nullable fields use `Option<Option<_>>`: `None` leaves the value alone,
/// `Some(None)` clears it.
#[derive(Debug, Clone, Default)]
pub struct TaskUpdate {
    pub title: Option<String>,
    pub description: Option<Option<String>>,
    pub status: Option<TaskStatus>,
    pub priority: Option<TaskPriority>,
    pub assignee_id: Option<Option<i64>>,
    pub due_date: Option<Option<String>>,
    pub position: Option<f64>,
}

impl TaskUpdate {
    /// True when the update touches anything other than status and position.
    pub fn edits_fields(&self) -> bool {
        self.title.is_some()
            || self.description.is_some()
            || self.priority.is_some()
            || self.assignee_id.is_some()
            || self.due_date.is_some()
    }
}

/// Drag-and-drop destination: a column and an optional zero-based index.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MoveTask {
    pub status: TaskStatus,
    pub index: Option<usize>,
}

/// A written task plus the column slot it occupied before the write.
#[derive(Debug, Clone, Serialize)]
pub struct TaskChange {
    pub task: Task,
    pub from_status: TaskStatus,
    pub from_position: f64,
}

impl TaskChange {
    pub fn status_changed(&self) -> bool {
        self.from_status != self.task.status
    }

    /// False when the task was dropped back into its own slot.
    pub fn moved(&self) -> bool {
        self.status_changed() || self.from_position != self.task.position
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Comment {
    pub id: i64,
    pub task_id: i64,
    pub content: String,
    pub user: User,
    pub created_at: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActivityType {
    ProjectCreated,
    ProjectUpdated,
    MemberAdded,
    MemberRemoved,
    TaskCreated,
    TaskUpdated,
    TaskCompleted,
    TaskDeleted,
    CommentAdded,
}

impl ActivityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ProjectCreated => "project_created",
            Self::ProjectUpdated => "project_updated",
            Self::MemberAdded => "member_added",
            Self::MemberRemoved => "member_removed",
            Self::TaskCreated => "task_created",
            Self::TaskUpdated => "task_updated",
            Self::TaskCompleted => "task_completed",
            Self::TaskDeleted => "task_deleted",
            Self::CommentAdded => "comment_added",
        }
    }
}

impl FromStr for ActivityType {
    type Err = BoardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "project_created" => Ok(Self::ProjectCreated),
            "project_updated" => Ok(Self::ProjectUpdated),
            "member_added" => Ok(Self::MemberAdded),
            "member_removed" => Ok(Self::MemberRemoved),
            "task_created" => Ok(Self::TaskCreated),
            "task_updated" => Ok(Self::TaskUpdated),
            "task_completed" => Ok(Self::TaskCompleted),
            "task_deleted" => Ok(Self::TaskDeleted),
            "comment_added" => Ok(Self::CommentAdded),
            _ => Err(BoardError::Validation(format!("Invalid activity type: {}", s))),
        }
    }
}

/// Known activity payload shapes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActivityDetail {
    TaskChange {
        task_title: String,
        old_status: Option<TaskStatus>,
        new_status: TaskStatus,
        priority: TaskPriority,
        assignee_id: Option<i64>,
    },
    TaskDeleted {
        task_title: String,
        deleted_task_id: i64,
    },
    MemberChange {
        member_user_id: i64,
        role: ProjectRole,
    },
    ProjectChange {
        project_name: String,
    },
}

/// Activity metadata: a known shape, or any other JSON kept verbatim so
/// rows written by newer versions still round-trip.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ActivityMetadata {
    Known(ActivityDetail),
    Unrecognized(serde_json::Value),
}

impl From<ActivityDetail> for ActivityMetadata {
    fn from(detail: ActivityDetail) -> Self {
        Self::Known(detail)
    }
}

/// An activity about to be appended to the log.
#[derive(Debug, Clone)]
pub struct NewActivity {
    pub kind: ActivityType,
    pub message: String,
    pub project_id: i64,
    pub task_id: Option<i64>,
    pub user_id: i64,
    pub metadata: Option<ActivityMetadata>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Activity {
    pub id: i64,
    #[serde(rename = "type")]
    pub kind: ActivityType,
    pub message: String,
    pub project_id: i64,
    pub task_id: Option<i64>,
    pub user_id: i64,
    pub metadata: Option<ActivityMetadata>,
    pub created_at: String,
}

#[derive(Debug, Clone, Default)]
pub struct ActivityQuery {
    pub project_ids: Vec<i64>,
    pub kind: Option<ActivityType>,
    pub limit: i64,
    pub offset: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityPage {
    pub activities: Vec<Activity>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
    pub has_more: bool,
}

// API view types
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectDetail {
    #[serde(flatten)]
    pub project: Project,
    pub members: Vec<ProjectMember>,
    pub task_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoardView {
    pub project: Project,
    pub columns: Vec<ColumnView>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnView {
    pub status: TaskStatus,
    pub tasks: Vec<Task>,
}
