use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use rusqlite::{Connection, params, params_from_iter};

use super::activity;
use super::models::*;
use super::ordering;
use crate::errors::BoardError;

const DEFAULT_PROJECT_COLOR: &str = "#6366f1";

/// Async-safe handle to the board database.
///
/// Wraps `BoardDb` behind `Arc<Mutex>` and runs all access on tokio's
/// blocking thread pool via `spawn_blocking`. The mutex also serializes
/// writers, so a read-then-write inside one closure is never interleaved
/// with another request's.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<std::sync::Mutex<BoardDb>>,
}

impl DbHandle {
    pub fn new(db: BoardDb) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
        }
    }

    /// Run a closure with access to the database on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&BoardDb) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db.lock().map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))?;
            f(&guard)
        })
        .await
        .context("DB task panicked")?
    }

    /// Acquire the database mutex synchronously. Only for startup and tests.
    pub fn lock_sync(&self) -> Result<std::sync::MutexGuard<'_, BoardDb>> {
        self.inner
            .lock()
            .map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))
    }
}

pub struct BoardDb {
    conn: Connection,
}

impl BoardDb {
    /// Open (or create) a SQLite database at the given path and run migrations.
    pub fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let conn = Connection::open(path).context("Failed to open SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Create an in-memory SQLite database (for testing).
    pub fn new_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<()> {
        self.conn
            .execute_batch("PRAGMA foreign_keys = ON;")
            .context("Failed to enable foreign keys")?;
        self.run_migrations().context("Failed to run migrations")?;
        Ok(())
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS users (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    email TEXT NOT NULL UNIQUE,
                    name TEXT,
                    password_hash TEXT NOT NULL,
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS sessions (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    token_hash TEXT NOT NULL UNIQUE,
                    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    expires_at TEXT NOT NULL,
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS projects (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL,
                    description TEXT,
                    color TEXT NOT NULL DEFAULT '#6366f1',
                    status TEXT NOT NULL DEFAULT 'active',
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS project_members (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    project_id INTEGER NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
                    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    role TEXT NOT NULL DEFAULT 'member',
                    joined_at TEXT NOT NULL DEFAULT (datetime('now')),
                    UNIQUE(project_id, user_id)
                );

                CREATE TABLE IF NOT EXISTS tasks (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    project_id INTEGER NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
                    title TEXT NOT NULL,
                    description TEXT,
                    status TEXT NOT NULL DEFAULT 'todo',
                    position REAL NOT NULL DEFAULT 0,
                    priority TEXT NOT NULL DEFAULT 'medium',
                    assignee_id INTEGER REFERENCES users(id) ON DELETE SET NULL,
                    due_date TEXT,
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS comments (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    task_id INTEGER NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
                    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    content TEXT NOT NULL,
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS activities (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    type TEXT NOT NULL,
                    message TEXT NOT NULL,
                    project_id INTEGER NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
                    task_id INTEGER REFERENCES tasks(id) ON DELETE SET NULL,
                    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    metadata TEXT,
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE INDEX IF NOT EXISTS idx_sessions_user ON sessions(user_id);
                CREATE INDEX IF NOT EXISTS idx_members_user ON project_members(user_id);
                CREATE INDEX IF NOT EXISTS idx_tasks_column ON tasks(project_id, status, position);
                CREATE INDEX IF NOT EXISTS idx_tasks_assignee ON tasks(assignee_id);
                CREATE INDEX IF NOT EXISTS idx_comments_task ON comments(task_id);
                CREATE INDEX IF NOT EXISTS idx_activities_project ON activities(project_id, created_at);
                ",
            )
            .context("Failed to create tables")?;
        Ok(())
    }

    // ── Users & sessions ──────────────────────────────────────────────

    /// Insert a user. `email` is stored lower-cased; duplicates are a `Conflict`.
    pub fn create_user(&self, email: &str, name: Option<&str>, password_hash: &str) -> Result<User> {
        let email = normalize_email(email)?;
        let name = name.map(str::trim).filter(|n| !n.is_empty());
        let exists: bool = self
            .conn
            .query_row(
                "SELECT COUNT(*) > 0 FROM users WHERE email = ?1",
                params![email],
                |row| row.get(0),
            )
            .context("Failed to check for existing user")?;
        if exists {
            return Err(BoardError::Conflict(format!("Email {} is already registered", email)).into());
        }

        self.conn
            .execute(
                "INSERT INTO users (email, name, password_hash) VALUES (?1, ?2, ?3)",
                params![email, name, password_hash],
            )
            .context("Failed to insert user")?;
        let id = self.conn.last_insert_rowid();
        self.get_user(id)?.context("User not found after insert")
    }

    pub fn get_user(&self, id: i64) -> Result<Option<User>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, email, name, created_at FROM users WHERE id = ?1")
            .context("Failed to prepare get_user")?;
        let mut rows = stmt
            .query_map(params![id], read_user)
            .context("Failed to query user")?;
        match rows.next() {
            Some(row) => Ok(Some(row.context("Failed to read user row")?)),
            None => Ok(None),
        }
    }

    /// Look up a user and their stored password hash for sign-in.
    pub fn find_user_by_email(&self, email: &str) -> Result<Option<(User, String)>> {
        let email = email.trim().to_lowercase();
        let mut stmt = self
            .conn
            .prepare("SELECT id, email, name, created_at, password_hash FROM users WHERE email = ?1")
            .context("Failed to prepare find_user_by_email")?;
        let mut rows = stmt
            .query_map(params![email], |row| Ok((read_user(row)?, row.get::<_, String>(4)?)))
            .context("Failed to query user by email")?;
        match rows.next() {
            Some(row) => Ok(Some(row.context("Failed to read user row")?)),
            None => Ok(None),
        }
    }

    pub fn create_session(&self, user_id: i64, token_hash: &str, ttl_hours: u32) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO sessions (token_hash, user_id, expires_at)
                 VALUES (?1, ?2, datetime('now', '+' || ?3 || ' hours'))",
                params![token_hash, user_id, ttl_hours],
            )
            .context("Failed to insert session")?;
        Ok(())
    }

    /// The user owning an unexpired session, if any.
    pub fn session_user(&self, token_hash: &str) -> Result<Option<User>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT u.id, u.email, u.name, u.created_at
                 FROM sessions s JOIN users u ON u.id = s.user_id
                 WHERE s.token_hash = ?1 AND s.expires_at > datetime('now')",
            )
            .context("Failed to prepare session_user")?;
        let mut rows = stmt
            .query_map(params![token_hash], read_user)
            .context("Failed to query session")?;
        match rows.next() {
            Some(row) => Ok(Some(row.context("Failed to read session user row")?)),
            None => Ok(None),
        }
    }

    pub fn delete_session(&self, token_hash: &str) -> Result<bool> {
        let count = self
            .conn
            .execute("DELETE FROM sessions WHERE token_hash = ?1", params![token_hash])
            .context("Failed to delete session")?;
        Ok(count > 0)
    }

    pub fn purge_expired_sessions(&self) -> Result<usize> {
        self.conn
            .execute("DELETE FROM sessions WHERE expires_at <= datetime('now')", [])
            .context("Failed to purge expired sessions")
    }

    // ── Projects ──────────────────────────────────────────────────────

    /// Create a project; the creator becomes its owner.
    pub fn create_project(&self, new: &NewProject, owner_id: i64) -> Result<Project> {
        let name = required_text(&new.name, "Project name")?;
        let color = match new.color.as_deref() {
            Some(c) => validate_color(c)?,
            None => DEFAULT_PROJECT_COLOR.to_string(),
        };

        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        tx.execute(
            "INSERT INTO projects (name, description, color) VALUES (?1, ?2, ?3)",
            params![name, optional_text(new.description.as_deref()), color],
        )
        .context("Failed to insert project")?;
        let id = tx.last_insert_rowid();
        tx.execute(
            "INSERT INTO project_members (project_id, user_id, role) VALUES (?1, ?2, 'owner')",
            params![id, owner_id],
        )
        .context("Failed to insert project owner")?;
        let project = load_project(&tx, id)?.context("Project not found after insert")?;
        insert_activity(&tx, &activity::project_created(&project, owner_id))?;
        tx.commit().context("Failed to commit project creation")?;

        tracing::info!(project_id = id, owner_id, "project created");
        Ok(project)
    }

    /// Projects `user_id` belongs to, most recently updated first.
    pub fn list_projects_for_user(&self, user_id: i64) -> Result<Vec<Project>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT p.id, p.name, p.description, p.color, p.status, p.created_at, p.updated_at
                 FROM projects p JOIN project_members m ON m.project_id = p.id
                 WHERE m.user_id = ?1
                 ORDER BY p.updated_at DESC, p.id DESC",
            )
            .context("Failed to prepare list_projects_for_user")?;
        let rows = stmt
            .query_map(params![user_id], ProjectRow::read)
            .context("Failed to query projects")?;
        let mut projects = Vec::new();
        for row in rows {
            projects.push(row.context("Failed to read project row")?.into_project()?);
        }
        Ok(projects)
    }

    pub fn get_project(&self, id: i64) -> Result<Option<Project>> {
        load_project(&self.conn, id)
    }

    pub fn get_project_detail(&self, id: i64) -> Result<Option<ProjectDetail>> {
        let Some(project) = self.get_project(id)? else {
            return Ok(None);
        };
        let members = self.list_members(id)?;
        let task_count: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM tasks WHERE project_id = ?1",
                params![id],
                |row| row.get(0),
            )
            .context("Failed to count project tasks")?;
        Ok(Some(ProjectDetail {
            project,
            members,
            task_count,
        }))
    }

    pub fn update_project(&self, id: i64, update: &ProjectUpdate, actor: i64) -> Result<Project> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        let current = load_project(&tx, id)?.ok_or(BoardError::ProjectNotFound { id })?;

        let name = match update.name.as_deref() {
            Some(n) => required_text(n, "Project name")?,
            None => current.name,
        };
        let description = match &update.description {
            Some(d) => optional_text(d.as_deref()),
            None => current.description,
        };
        let color = match update.color.as_deref() {
            Some(c) => validate_color(c)?,
            None => current.color,
        };
        let status = update.status.unwrap_or(current.status);

        tx.execute(
            "UPDATE projects SET name = ?1, description = ?2, color = ?3, status = ?4,
                    updated_at = datetime('now')
             WHERE id = ?5",
            params![name, description, color, status.as_str(), id],
        )
        .context("Failed to update project")?;
        let project = load_project(&tx, id)?.context("Project not found after update")?;
        insert_activity(&tx, &activity::project_updated(&project, actor))?;
        tx.commit().context("Failed to commit project update")?;
        Ok(project)
    }

    /// Delete a project and everything under it.
    pub fn delete_project(&self, id: i64) -> Result<bool> {
        let count = self
            .conn
            .execute("DELETE FROM projects WHERE id = ?1", params![id])
            .context("Failed to delete project")?;
        if count > 0 {
            tracing::info!(project_id = id, "project deleted");
        }
        Ok(count > 0)
    }

    // ── Members ───────────────────────────────────────────────────────

    /// Role of `user_id` in `project_id`, or `None` for non-members.
    pub fn member_role(&self, project_id: i64, user_id: i64) -> Result<Option<ProjectRole>> {
        let mut stmt = self
            .conn
            .prepare("SELECT role FROM project_members WHERE project_id = ?1 AND user_id = ?2")
            .context("Failed to prepare member_role")?;
        let mut rows = stmt
            .query_map(params![project_id, user_id], |row| row.get::<_, String>(0))
            .context("Failed to query member role")?;
        match rows.next() {
            Some(row) => {
                let role = row.context("Failed to read member role")?;
                Ok(Some(
                    ProjectRole::from_str(&role).context("Failed to parse member role")?,
                ))
            }
            None => Ok(None),
        }
    }

    pub fn list_members(&self, project_id: i64) -> Result<Vec<ProjectMember>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "{MEMBER_SELECT} WHERE m.project_id = ?1 ORDER BY m.joined_at ASC, m.id ASC"
            ))
            .context("Failed to prepare list_members")?;
        let rows = stmt
            .query_map(params![project_id], MemberRow::read)
            .context("Failed to query members")?;
        let mut members = Vec::new();
        for row in rows {
            members.push(row.context("Failed to read member row")?.into_member()?);
        }
        Ok(members)
    }

    /// Add the user registered under `email` to a project.
    pub fn add_member(
        &self,
        project_id: i64,
        email: &str,
        role: ProjectRole,
        actor: i64,
    ) -> Result<ProjectMember> {
        if role == ProjectRole::Owner {
            return Err(BoardError::Validation("A project has exactly one owner".into()).into());
        }
        let email = email.trim().to_lowercase();
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;

        let user_id: Option<i64> = {
            let mut stmt = tx
                .prepare("SELECT id FROM users WHERE email = ?1")
                .context("Failed to prepare user lookup")?;
            let mut rows = stmt
                .query_map(params![email], |row| row.get(0))
                .context("Failed to query user by email")?;
            match rows.next() {
                Some(row) => Some(row.context("Failed to read user id")?),
                None => None,
            }
        };
        let user_id = user_id.ok_or_else(|| BoardError::UserNotFound(email.clone()))?;

        let already: bool = tx
            .query_row(
                "SELECT COUNT(*) > 0 FROM project_members WHERE project_id = ?1 AND user_id = ?2",
                params![project_id, user_id],
                |row| row.get(0),
            )
            .context("Failed to check membership")?;
        if already {
            return Err(
                BoardError::Conflict(format!("{} is already a member of this project", email)).into(),
            );
        }

        tx.execute(
            "INSERT INTO project_members (project_id, user_id, role) VALUES (?1, ?2, ?3)",
            params![project_id, user_id, role.as_str()],
        )
        .context("Failed to insert member")?;
        let member_id = tx.last_insert_rowid();
        let member = load_member(&tx, project_id, member_id)?.context("Member not found after insert")?;
        insert_activity(&tx, &activity::member_added(&member, actor))?;
        tx.commit().context("Failed to commit member addition")?;
        Ok(member)
    }

    /// Remove a membership. The owner cannot be removed; tasks assigned to
    /// the departing user in this project become unassigned.
    pub fn remove_member(&self, project_id: i64, member_id: i64, actor: i64) -> Result<ProjectMember> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        let member = load_member(&tx, project_id, member_id)?
            .ok_or(BoardError::MemberNotFound { id: member_id })?;
        if member.role == ProjectRole::Owner {
            return Err(BoardError::Validation("The project owner cannot be removed".into()).into());
        }

        tx.execute("DELETE FROM project_members WHERE id = ?1", params![member_id])
            .context("Failed to delete member")?;
        tx.execute(
            "UPDATE tasks SET assignee_id = NULL, updated_at = datetime('now')
             WHERE project_id = ?1 AND assignee_id = ?2",
            params![project_id, member.user.id],
        )
        .context("Failed to unassign tasks of removed member")?;
        insert_activity(&tx, &activity::member_removed(&member, actor))?;
        tx.commit().context("Failed to commit member removal")?;
        Ok(member)
    }

    // ── Tasks ─────────────────────────────────────────────────────────

    /// Create a task at the end of its column.
    pub fn create_task(&self, project_id: i64, new: &NewTask, actor: i64) -> Result<Task> {
        let title = required_text(&new.title, "Task title")?;
        let due_date = new.due_date.as_deref().map(validate_due_date).transpose()?;
        let status = new.status.unwrap_or(TaskStatus::Todo);
        let priority = new.priority.unwrap_or(TaskPriority::Medium);

        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        if load_project(&tx, project_id)?.is_none() {
            return Err(BoardError::ProjectNotFound { id: project_id }.into());
        }
        if let Some(assignee) = new.assignee_id {
            ensure_assignable(&tx, project_id, assignee)?;
        }

        let position = ordering::assign_create_position(&tx, project_id, status)?;
        tx.execute(
            "INSERT INTO tasks (project_id, title, description, status, position, priority, assignee_id, due_date)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                project_id,
                title,
                optional_text(new.description.as_deref()),
                status.as_str(),
                position,
                priority.as_str(),
                new.assignee_id,
                due_date,
            ],
        )
        .context("Failed to insert task")?;
        let id = tx.last_insert_rowid();
        let task = load_task(&tx, id)?.context("Task not found after insert")?;
        insert_activity(&tx, &activity::task_created(&task, actor))?;
        tx.commit().context("Failed to commit task creation")?;

        tracing::debug!(task_id = id, project_id, status = status.as_str(), position, "task created");
        Ok(task)
    }

    pub fn get_task(&self, id: i64) -> Result<Option<Task>> {
        load_task(&self.conn, id)
    }

    /// A task addressed through its project; a task of another project is
    /// reported as missing.
    pub fn get_task_in_project(&self, project_id: i64, id: i64) -> Result<Task> {
        match self.get_task(id)? {
            Some(task) if task.project_id == project_id => Ok(task),
            _ => Err(BoardError::TaskNotFound { id }.into()),
        }
    }

    /// All tasks of a project in board order: column, then position.
    pub fn list_tasks(&self, project_id: i64) -> Result<Vec<Task>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "{TASK_SELECT} WHERE project_id = ?1
                 ORDER BY CASE status
                     WHEN 'todo' THEN 0 WHEN 'in_progress' THEN 1
                     WHEN 'in_review' THEN 2 WHEN 'done' THEN 3 ELSE 4 END,
                 position ASC, id ASC"
            ))
            .context("Failed to prepare list_tasks")?;
        let rows = stmt
            .query_map(params![project_id], TaskRow::read)
            .context("Failed to query tasks")?;
        let mut tasks = Vec::new();
        for row in rows {
            tasks.push(row.context("Failed to read task row")?.into_task()?);
        }
        Ok(tasks)
    }

    /// Apply a partial update.
    ///
    /// An explicit `position` is written as given. A status change without
    /// one appends the task to the destination column. Field edits and
    /// status changes are logged; a position-only update is not.
    pub fn update_task(&self, id: i64, update: &TaskUpdate, actor: i64) -> Result<Task> {
        if update.position.is_some_and(|p| !p.is_finite()) {
            return Err(BoardError::Validation("Position must be a finite number".into()).into());
        }

        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        let current = load_task(&tx, id)?.ok_or(BoardError::TaskNotFound { id })?;

        let title = match update.title.as_deref() {
            Some(t) => required_text(t, "Task title")?,
            None => current.title.clone(),
        };
        let description = match &update.description {
            Some(d) => optional_text(d.as_deref()),
            None => current.description.clone(),
        };
        let assignee_id = match update.assignee_id {
            Some(Some(assignee)) => {
                ensure_assignable(&tx, current.project_id, assignee)?;
                Some(assignee)
            }
            Some(None) => None,
            None => current.assignee_id,
        };
        let due_date = match &update.due_date {
            Some(Some(d)) => Some(validate_due_date(d)?),
            Some(None) => None,
            None => current.due_date.clone(),
        };
        let priority = update.priority.unwrap_or(current.priority);
        let status = update.status.unwrap_or(current.status);
        let position = match update.position {
            Some(p) => p,
            None if status != current.status => {
                ordering::assign_status_change_position(&tx, current.project_id, status, id)?
            }
            None => current.position,
        };

        tx.execute(
            "UPDATE tasks SET title = ?1, description = ?2, status = ?3, position = ?4,
                    priority = ?5, assignee_id = ?6, due_date = ?7, updated_at = datetime('now')
             WHERE id = ?8",
            params![
                title,
                description,
                status.as_str(),
                position,
                priority.as_str(),
                assignee_id,
                due_date,
                id,
            ],
        )
        .context("Failed to update task")?;
        let task = load_task(&tx, id)?.context("Task not found after update")?;
        if update.edits_fields() || status != current.status {
            insert_activity(&tx, &activity::task_updated(&task, current.status, actor))?;
        }
        tx.commit().context("Failed to commit task update")?;
        Ok(task)
    }

    /// Drag-and-drop move: status and position are computed and written
    /// together in one transaction.
    pub fn move_task(&self, id: i64, destination: &MoveTask, actor: i64) -> Result<TaskChange> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        let task = load_task(&tx, id)?.ok_or(BoardError::TaskNotFound { id })?;
        let (status, position) = ordering::resolve_placement(&tx, &task, destination)?;

        if status == task.status && position == task.position {
            return Ok(TaskChange {
                from_status: task.status,
                from_position: task.position,
                task,
            });
        }

        tx.execute(
            "UPDATE tasks SET status = ?1, position = ?2, updated_at = datetime('now') WHERE id = ?3",
            params![status.as_str(), position, id],
        )
        .context("Failed to move task")?;
        let moved = load_task(&tx, id)?.context("Task not found after move")?;
        if status != task.status {
            insert_activity(&tx, &activity::task_updated(&moved, task.status, actor))?;
        }
        tx.commit().context("Failed to commit task move")?;

        tracing::debug!(
            task_id = id,
            from = task.status.as_str(),
            to = status.as_str(),
            position,
            "task moved"
        );
        Ok(TaskChange {
            task: moved,
            from_status: task.status,
            from_position: task.position,
        })
    }

    /// Delete a task. Siblings keep their positions.
    pub fn delete_task(&self, id: i64, actor: i64) -> Result<bool> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        let Some(task) = load_task(&tx, id)? else {
            return Ok(false);
        };
        tx.execute("DELETE FROM tasks WHERE id = ?1", params![id])
            .context("Failed to delete task")?;
        insert_activity(&tx, &activity::task_deleted(&task, actor))?;
        tx.commit().context("Failed to commit task deletion")?;
        Ok(true)
    }

    // ── Board view ────────────────────────────────────────────────────

    pub fn get_board(&self, project_id: i64) -> Result<BoardView> {
        let project = self
            .get_project(project_id)?
            .ok_or(BoardError::ProjectNotFound { id: project_id })?;
        let all_tasks = self.list_tasks(project_id)?;

        let columns = TaskStatus::ALL
            .iter()
            .map(|status| ColumnView {
                status: *status,
                tasks: all_tasks
                    .iter()
                    .filter(|t| t.status == *status)
                    .cloned()
                    .collect(),
            })
            .collect();

        Ok(BoardView { project, columns })
    }

    // ── Comments ──────────────────────────────────────────────────────

    pub fn add_comment(&self, task_id: i64, content: &str, actor: i64) -> Result<Comment> {
        let content = required_text(content, "Comment")?;
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        let task = load_task(&tx, task_id)?.ok_or(BoardError::TaskNotFound { id: task_id })?;
        tx.execute(
            "INSERT INTO comments (task_id, user_id, content) VALUES (?1, ?2, ?3)",
            params![task_id, actor, content],
        )
        .context("Failed to insert comment")?;
        let id = tx.last_insert_rowid();
        let comment = load_comment(&tx, id)?.context("Comment not found after insert")?;
        insert_activity(&tx, &activity::comment_added(&task, actor))?;
        tx.commit().context("Failed to commit comment")?;
        Ok(comment)
    }

    pub fn list_comments(&self, task_id: i64) -> Result<Vec<Comment>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "{COMMENT_SELECT} WHERE c.task_id = ?1 ORDER BY c.created_at ASC, c.id ASC"
            ))
            .context("Failed to prepare list_comments")?;
        let rows = stmt
            .query_map(params![task_id], CommentRow::read)
            .context("Failed to query comments")?;
        let mut comments = Vec::new();
        for row in rows {
            comments.push(row.context("Failed to read comment row")?.into_comment());
        }
        Ok(comments)
    }

    // ── Activities ────────────────────────────────────────────────────

    /// Highest activity id written so far, `0` when the log is empty.
    pub fn last_activity_id(&self) -> Result<i64> {
        self.conn
            .query_row("SELECT COALESCE(MAX(id), 0) FROM activities", [], |row| row.get(0))
            .context("Failed to query last activity id")
    }

    /// Activities of a project written after `after_id`, oldest first.
    pub fn activities_after(&self, project_id: i64, after_id: i64) -> Result<Vec<Activity>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "{ACTIVITY_SELECT} WHERE project_id = ?1 AND id > ?2 ORDER BY id ASC"
            ))
            .context("Failed to prepare activities_after")?;
        let rows = stmt
            .query_map(params![project_id, after_id], ActivityRow::read)
            .context("Failed to query new activities")?;
        let mut activities = Vec::new();
        for row in rows {
            activities.push(row.context("Failed to read activity row")?.into_activity()?);
        }
        Ok(activities)
    }

    pub fn project_ids_for_user(&self, user_id: i64) -> Result<Vec<i64>> {
        let mut stmt = self
            .conn
            .prepare("SELECT project_id FROM project_members WHERE user_id = ?1 ORDER BY project_id")
            .context("Failed to prepare project_ids_for_user")?;
        let rows = stmt
            .query_map(params![user_id], |row| row.get::<_, i64>(0))
            .context("Failed to query member projects")?;
        let mut ids = Vec::new();
        for row in rows {
            ids.push(row.context("Failed to read project id")?);
        }
        Ok(ids)
    }

    /// One page of the activity feed across `query.project_ids`, newest first.
    pub fn list_activities(&self, query: &ActivityQuery) -> Result<ActivityPage> {
        if query.project_ids.is_empty() {
            return Ok(ActivityPage {
                activities: Vec::new(),
                total: 0,
                limit: query.limit,
                offset: query.offset,
                has_more: false,
            });
        }

        let placeholders = vec!["?"; query.project_ids.len()].join(", ");
        let mut filter = format!("project_id IN ({placeholders})");
        let mut values: Vec<rusqlite::types::Value> = query
            .project_ids
            .iter()
            .map(|id| rusqlite::types::Value::Integer(*id))
            .collect();
        if let Some(kind) = query.kind {
            filter.push_str(" AND type = ?");
            values.push(rusqlite::types::Value::Text(kind.as_str().to_string()));
        }

        let total: i64 = self
            .conn
            .query_row(
                &format!("SELECT COUNT(*) FROM activities WHERE {filter}"),
                params_from_iter(values.iter()),
                |row| row.get(0),
            )
            .context("Failed to count activities")?;

        values.push(rusqlite::types::Value::Integer(query.limit));
        values.push(rusqlite::types::Value::Integer(query.offset));
        let mut stmt = self
            .conn
            .prepare(&format!(
                "{ACTIVITY_SELECT} WHERE {filter} ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?"
            ))
            .context("Failed to prepare list_activities")?;
        let rows = stmt
            .query_map(params_from_iter(values.iter()), ActivityRow::read)
            .context("Failed to query activities")?;
        let mut activities = Vec::new();
        for row in rows {
            activities.push(row.context("Failed to read activity row")?.into_activity()?);
        }

        Ok(ActivityPage {
            has_more: query.offset + (activities.len() as i64) < total,
            activities,
            total,
            limit: query.limit,
            offset: query.offset,
        })
    }
}

/// Append an activity on `conn`, normally an open transaction.
pub fn insert_activity(conn: &Connection, entry: &NewActivity) -> Result<i64> {
    let metadata = entry
        .metadata
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .context("Failed to serialize activity metadata")?;
    conn.execute(
        "INSERT INTO activities (type, message, project_id, task_id, user_id, metadata)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            entry.kind.as_str(),
            entry.message,
            entry.project_id,
            entry.task_id,
            entry.user_id,
            metadata,
        ],
    )
    .context("Failed to insert activity")?;
    Ok(conn.last_insert_rowid())
}

// ── Validation helpers ────────────────────────────────────────────────

fn normalize_email(email: &str) -> Result<String> {
    let email = email.trim().to_lowercase();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(email),
        _ => Err(BoardError::Validation(format!("Invalid email address: {}", email)).into()),
    }
}

fn required_text(value: &str, what: &str) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(BoardError::Validation(format!("{} must not be empty", what)).into());
    }
    Ok(trimmed.to_string())
}

fn optional_text(value: Option<&str>) -> Option<String> {
    value.map(str::trim).filter(|v| !v.is_empty()).map(str::to_string)
}

fn validate_color(color: &str) -> Result<String> {
    let hex = color.strip_prefix('#').unwrap_or_default();
    if hex.len() == 6 && hex.chars().all(|c| c.is_ascii_hexdigit()) {
        Ok(color.to_ascii_lowercase())
    } else {
        Err(BoardError::Validation(format!("Invalid color '{}', expected #rrggbb", color)).into())
    }
}

/// Accepts a calendar date (`2024-05-01`) or an RFC 3339 timestamp.
fn validate_due_date(value: &str) -> Result<String> {
    let value = value.trim();
    let valid = chrono::NaiveDate::parse_from_str(value, "%Y-%m-%d").is_ok()
        || chrono::DateTime::parse_from_rfc3339(value).is_ok();
    if valid {
        Ok(value.to_string())
    } else {
        Err(BoardError::Validation(format!("Invalid due date '{}'", value)).into())
    }
}

fn ensure_assignable(conn: &Connection, project_id: i64, user_id: i64) -> Result<()> {
    let is_member: bool = conn
        .query_row(
            "SELECT COUNT(*) > 0 FROM project_members WHERE project_id = ?1 AND user_id = ?2",
            params![project_id, user_id],
            |row| row.get(0),
        )
        .context("Failed to check assignee membership")?;
    if !is_member {
        return Err(BoardError::Validation(format!(
            "User {} is not a member of project {}",
            user_id, project_id
        ))
        .into());
    }
    Ok(())
}

// ── Internal row helpers ──────────────────────────────────────────────

const TASK_SELECT: &str = "SELECT id, project_id, title, description, status, position, priority,
        assignee_id, due_date, created_at, updated_at FROM tasks";

const MEMBER_SELECT: &str = "SELECT m.id, m.project_id, m.role, m.joined_at,
        u.id, u.email, u.name, u.created_at
        FROM project_members m JOIN users u ON u.id = m.user_id";

const COMMENT_SELECT: &str = "SELECT c.id, c.task_id, c.content, c.created_at,
        u.id, u.email, u.name, u.created_at
        FROM comments c JOIN users u ON u.id = c.user_id";

const ACTIVITY_SELECT: &str = "SELECT id, type, message, project_id, task_id, user_id, metadata,
        created_at FROM activities";

fn read_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        email: row.get(1)?,
        name: row.get(2)?,
        created_at: row.get(3)?,
    })
}

fn load_task(conn: &Connection, id: i64) -> Result<Option<Task>> {
    let mut stmt = conn
        .prepare(&format!("{TASK_SELECT} WHERE id = ?1"))
        .context("Failed to prepare get_task")?;
    let mut rows = stmt
        .query_map(params![id], TaskRow::read)
        .context("Failed to query task")?;
    match rows.next() {
        Some(row) => Ok(Some(row.context("Failed to read task row")?.into_task()?)),
        None => Ok(None),
    }
}

fn load_project(conn: &Connection, id: i64) -> Result<Option<Project>> {
    let mut stmt = conn
        .prepare(
            "SELECT id, name, description, color, status, created_at, updated_at
             FROM projects WHERE id = ?1",
        )
        .context("Failed to prepare get_project")?;
    let mut rows = stmt
        .query_map(params![id], ProjectRow::read)
        .context("Failed to query project")?;
    match rows.next() {
        Some(row) => Ok(Some(row.context("Failed to read project row")?.into_project()?)),
        None => Ok(None),
    }
}

fn load_member(conn: &Connection, project_id: i64, member_id: i64) -> Result<Option<ProjectMember>> {
    let mut stmt = conn
        .prepare(&format!("{MEMBER_SELECT} WHERE m.id = ?1 AND m.project_id = ?2"))
        .context("Failed to prepare get_member")?;
    let mut rows = stmt
        .query_map(params![member_id, project_id], MemberRow::read)
        .context("Failed to query member")?;
    match rows.next() {
        Some(row) => Ok(Some(row.context("Failed to read member row")?.into_member()?)),
        None => Ok(None),
    }
}

fn load_comment(conn: &Connection, id: i64) -> Result<Option<Comment>> {
    let mut stmt = conn
        .prepare(&format!("{COMMENT_SELECT} WHERE c.id = ?1"))
        .context("Failed to prepare get_comment")?;
    let mut rows = stmt
        .query_map(params![id], CommentRow::read)
        .context("Failed to query comment")?;
    match rows.next() {
        Some(row) => Ok(Some(row.context("Failed to read comment row")?.into_comment())),
        None => Ok(None),
    }
}

/// Task row before status / priority strings become typed values.
struct TaskRow {
    id: i64,
    project_id: i64,
    title: String,
    description: Option<String>,
    status: String,
    position: f64,
    priority: String,
    assignee_id: Option<i64>,
    due_date: Option<String>,
    created_at: String,
    updated_at: String,
}

impl TaskRow {
    fn read(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            project_id: row.get(1)?,
            title: row.get(2)?,
            description: row.get(3)?,
            status: row.get(4)?,
            position: row.get(5)?,
            priority: row.get(6)?,
            assignee_id: row.get(7)?,
            due_date: row.get(8)?,
            created_at: row.get(9)?,
            updated_at: row.get(10)?,
        })
    }

    fn into_task(self) -> Result<Task> {
        let status = TaskStatus::from_str(&self.status).context("Failed to parse task status")?;
        let priority =
            TaskPriority::from_str(&self.priority).context("Failed to parse task priority")?;
        Ok(Task {
            id: self.id,
            project_id: self.project_id,
            title: self.title,
            description: self.description,
            status,
            position: self.position,
            priority,
            assignee_id: self.assignee_id,
            due_date: self.due_date,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

struct ProjectRow {
    id: i64,
    name: String,
    description: Option<String>,
    color: String,
    status: String,
    created_at: String,
    updated_at: String,
}

impl ProjectRow {
    fn read(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            description: row.get(2)?,
            color: row.get(3)?,
            status: row.get(4)?,
            created_at: row.get(5)?,
            updated_at: row.get(6)?,
        })
    }

    fn into_project(self) -> Result<Project> {
        let status =
            ProjectStatus::from_str(&self.status).context("Failed to parse project status")?;
        Ok(Project {
            id: self.id,
            name: self.name,
            description: self.description,
            color: self.color,
            status,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

struct MemberRow {
    id: i64,
    project_id: i64,
    role: String,
    joined_at: String,
    user: User,
}

impl MemberRow {
    fn read(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            project_id: row.get(1)?,
            role: row.get(2)?,
            joined_at: row.get(3)?,
            user: User {
                id: row.get(4)?,
                email: row.get(5)?,
                name: row.get(6)?,
                created_at: row.get(7)?,
            },
        })
    }

    fn into_member(self) -> Result<ProjectMember> {
        let role = ProjectRole::from_str(&self.role).context("Failed to parse member role")?;
        Ok(ProjectMember {
            id: self.id,
            project_id: self.project_id,
            role,
            user: self.user,
            joined_at: self.joined_at,
        })
    }
}

struct CommentRow {
    id: i64,
    task_id: i64,
    content: String,
    created_at: String,
    user: User,
}

impl CommentRow {
    fn read(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            task_id: row.get(1)?,
            content: row.get(2)?,
            created_at: row.get(3)?,
            user: User {
                id: row.get(4)?,
                email: row.get(5)?,
                name: row.get(6)?,
                created_at: row.get(7)?,
            },
        })
    }

    fn into_comment(self) -> Comment {
        Comment {
            id: self.id,
            task_id: self.task_id,
            content: self.content,
            user: self.user,
            created_at: self.created_at,
        }
    }
}

/// Activity row; `metadata` is stored as JSON text.
struct ActivityRow {
    id: i64,
    kind: String,
    message: String,
    project_id: i64,
    task_id: Option<i64>,
    user_id: i64,
    metadata: Option<String>,
    created_at: String,
}

impl ActivityRow {
    fn read(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            kind: row.get(1)?,
            message: row.get(2)?,
            project_id: row.get(3)?,
            task_id: row.get(4)?,
            user_id: row.get(5)?,
            metadata: row.get(6)?,
            created_at: row.get(7)?,
        })
    }

    fn into_activity(self) -> Result<Activity> {
        let kind = ActivityType::from_str(&self.kind).context("Failed to parse activity type")?;
        let metadata = self
            .metadata
            .as_deref()
            .map(serde_json::from_str::<ActivityMetadata>)
            .transpose()
            .context("Failed to parse activity metadata JSON")?;
        Ok(Activity {
            id: self.id,
            kind,
            message: self.message,
            project_id: self.project_id,
            task_id: self.task_id,
            user_id: self.user_id,
            metadata,
            created_at: self.created_at,
        })
    }
}
