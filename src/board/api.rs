use std::str::FromStr;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, patch, post},
};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use super::access;
use super::avatar;
use super::auth::{self, CurrentUser};
use super::db::{BoardDb, DbHandle};
use super::models::*;
use super::ws::{WsMessage, broadcast_message};
use crate::errors::BoardError;

pub const DEFAULT_ACTIVITY_LIMIT: i64 = 20;
pub const MAX_ACTIVITY_LIMIT: i64 = 100;

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub db: DbHandle,
    pub ws_tx: broadcast::Sender<String>,
    pub session_ttl_hours: u32,
}

pub type SharedState = Arc<AppState>;

// ── Request payload types ─────────────────────────────────────────────
//
// Enum-valued fields arrive as strings and are parsed in the handlers so a
// bad value is a 400 with a domain message, not a body rejection.

#[derive(Deserialize)]
pub struct SignupRequest {
    pub email: String,
    pub password: String,
    pub name: Option<String>,
}

#[derive(Deserialize)]
pub struct SigninRequest {
    pub email: String,
    pub password: String,
}

#[derive(Serialize)]
pub struct SessionResponse {
    pub token: String,
    pub user: User,
    pub expires_in_hours: u32,
}

#[derive(Deserialize)]
pub struct CreateProjectRequest {
    pub name: String,
    pub description: Option<String>,
    pub color: Option<String>,
}

#[derive(Deserialize)]
pub struct UpdateProjectRequest {
    pub name: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub description: Option<Option<String>>,
    pub color: Option<String>,
    pub status: Option<String>,
}

#[derive(Deserialize)]
pub struct AddMemberRequest {
    pub email: String,
    pub role: Option<String>,
}

#[derive(Deserialize)]
pub struct CreateTaskRequest {
    pub title: String,
    pub description: Option<String>,
    pub status: Option<String>,
    pub priority: Option<String>,
    pub assignee_id: Option<i64>,
    pub due_date: Option<String>,
}

/// Nullable fields distinguish "absent" (keep) from `null` (clear).
#[derive(Deserialize)]
pub struct UpdateTaskRequest {
    pub title: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub description: Option<Option<String>>,
    pub status: Option<String>,
    pub priority: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub assignee_id: Option<Option<i64>>,
    #[serde(default, deserialize_with = "double_option")]
    pub due_date: Option<Option<String>>,
    pub position: Option<f64>,
}

#[derive(Deserialize)]
pub struct MoveTaskRequest {
    pub status: String,
    pub index: Option<i64>,
}

#[derive(Deserialize)]
pub struct CreateCommentRequest {
    pub content: String,
}

#[derive(Deserialize)]
pub struct ActivitiesQuery {
    pub project_id: Option<i64>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

fn double_option<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

fn parse_opt<T>(value: Option<&str>) -> Result<Option<T>, BoardError>
where
    T: FromStr<Err = BoardError>,
{
    value.map(T::from_str).transpose()
}

impl CreateTaskRequest {
    fn into_new_task(self) -> Result<NewTask, BoardError> {
        Ok(NewTask {
            status: parse_opt(self.status.as_deref())?,
            priority: parse_opt(self.priority.as_deref())?,
            title: self.title,
            description: self.description,
            assignee_id: self.assignee_id,
            due_date: self.due_date,
        })
    }
}

impl UpdateTaskRequest {
    fn into_update(self) -> Result<TaskUpdate, BoardError> {
        Ok(TaskUpdate {
            status: parse_opt(self.status.as_deref())?,
            priority: parse_opt(self.priority.as_deref())?,
            title: self.title,
            description: self.description,
            assignee_id: self.assignee_id,
            due_date: self.due_date,
            position: self.position,
        })
    }
}

impl MoveTaskRequest {
    fn into_move(self) -> Result<MoveTask, BoardError> {
        let status = TaskStatus::from_str(&self.status)?;
        let index = match self.index {
            Some(i) => Some(
                usize::try_from(i)
                    .map_err(|_| BoardError::Validation(format!("Invalid index {}", i)))?,
            ),
            None => None,
        };
        Ok(MoveTask { status, index })
    }
}

// ── Error handling ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Unauthorized(String),
    Forbidden(String),
    Conflict(String),
    Internal(String),
}

impl From<BoardError> for ApiError {
    fn from(err: BoardError) -> Self {
        let msg = err.to_string();
        match err {
            BoardError::TaskNotFound { .. }
            | BoardError::ProjectNotFound { .. }
            | BoardError::MemberNotFound { .. }
            | BoardError::UserNotFound(_) => ApiError::NotFound(msg),
            BoardError::InvalidStatus(_)
            | BoardError::InvalidPriority(_)
            | BoardError::InvalidRole(_)
            | BoardError::Validation(_) => ApiError::BadRequest(msg),
            BoardError::Unauthorized => ApiError::Unauthorized(msg),
            BoardError::Forbidden => ApiError::Forbidden(msg),
            BoardError::Conflict(_) => ApiError::Conflict(msg),
            BoardError::Persistence(source) => internal(&source),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        match BoardError::find(&err) {
            Some(BoardError::Persistence(_)) | None => internal(&err),
            Some(board) => {
                let msg = board.to_string();
                match board {
                    BoardError::TaskNotFound { .. }
                    | BoardError::ProjectNotFound { .. }
                    | BoardError::MemberNotFound { .. }
                    | BoardError::UserNotFound(_) => ApiError::NotFound(msg),
                    BoardError::Unauthorized => ApiError::Unauthorized(msg),
                    BoardError::Forbidden => ApiError::Forbidden(msg),
                    BoardError::Conflict(_) => ApiError::Conflict(msg),
                    _ => ApiError::BadRequest(msg),
                }
            }
        }
    }
}

fn internal(err: &anyhow::Error) -> ApiError {
    tracing::error!(error = format!("{:#}", err), "request failed");
    ApiError::Internal("Internal server error".into())
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(serde_json::json!({"error": message}))).into_response()
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/auth/signup", post(signup))
        .route("/api/auth/signin", post(signin))
        .route("/api/auth/signout", post(signout))
        .route("/api/auth/me", get(me))
        .route("/api/avatar/{email}", get(avatar))
        .route("/api/projects", get(list_projects).post(create_project))
        .route(
            "/api/projects/{id}",
            get(get_project).put(update_project).delete(delete_project),
        )
        .route("/api/projects/{id}/board", get(get_board))
        .route("/api/projects/{id}/members", get(list_members).post(add_member))
        .route("/api/projects/{id}/members/{member_id}", axum::routing::delete(remove_member))
        .route("/api/projects/{id}/tasks", get(list_tasks).post(create_task))
        .route(
            "/api/projects/{id}/tasks/{task_id}",
            get(get_task).put(update_task).delete(delete_task),
        )
        .route("/api/projects/{id}/tasks/{task_id}/move", patch(move_task))
        .route(
            "/api/projects/{id}/tasks/{task_id}/comments",
            get(list_comments).post(add_comment),
        )
        .route("/api/activities", get(list_activities))
}

// ── Helpers ───────────────────────────────────────────────────────────

/// Check `user_id`'s role in a project against `required`.
fn authorized(db: &BoardDb, project_id: i64, user_id: i64, required: ProjectRole) -> anyhow::Result<ProjectRole> {
    let role = db.member_role(project_id, user_id)?;
    Ok(access::require_role(project_id, role, required)?)
}

/// Run a mutation and collect the activities it logged for `project_id`.
fn logged<R>(
    db: &BoardDb,
    project_id: i64,
    mutation: impl FnOnce(&BoardDb) -> anyhow::Result<R>,
) -> anyhow::Result<(R, Vec<Activity>)> {
    let mark = db.last_activity_id()?;
    let result = mutation(db)?;
    let activities = db.activities_after(project_id, mark)?;
    Ok((result, activities))
}

fn publish(state: &AppState, msg: WsMessage, activities: Vec<Activity>) {
    broadcast_message(&state.ws_tx, &msg);
    for activity in activities {
        broadcast_message(&state.ws_tx, &WsMessage::ActivityNew { activity });
    }
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check() -> &'static str {
    "ok"
}

async fn avatar(Path(email): Path<String>) -> Result<impl IntoResponse, ApiError> {
    let email = email.trim();
    if email.is_empty() {
        return Err(ApiError::BadRequest("Email is required".into()));
    }
    let svg = avatar::avatar_svg(email, avatar::AVATAR_SIZE);
    Ok((
        [
            (header::CONTENT_TYPE, "image/svg+xml"),
            (header::CACHE_CONTROL, "public, max-age=86400"),
        ],
        svg,
    ))
}

async fn signup(
    State(state): State<SharedState>,
    Json(req): Json<SignupRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let password_hash = auth::hash_password_blocking(req.password.clone()).await?;
    let token = auth::new_session_token();
    let digest = auth::token_digest(&token);
    let ttl = state.session_ttl_hours;
    let user = state
        .db
        .call(move |db| {
            let user = db.create_user(&req.email, req.name.as_deref(), &password_hash)?;
            db.create_session(user.id, &digest, ttl)?;
            Ok(user)
        })
        .await?;
    tracing::info!(user_id = user.id, "user signed up");
    Ok((
        StatusCode::CREATED,
        Json(SessionResponse {
            token,
            user,
            expires_in_hours: ttl,
        }),
    ))
}

async fn signin(
    State(state): State<SharedState>,
    Json(req): Json<SigninRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let email = req.email;
    let found = state.db.call(move |db| db.find_user_by_email(&email)).await?;
    let Some((user, hash)) = found else {
        return Err(ApiError::Unauthorized("Invalid email or password".into()));
    };
    if !auth::verify_password_blocking(req.password, hash).await? {
        return Err(ApiError::Unauthorized("Invalid email or password".into()));
    }

    let token = auth::new_session_token();
    let digest = auth::token_digest(&token);
    let ttl = state.session_ttl_hours;
    let user_id = user.id;
    state
        .db
        .call(move |db| {
            db.purge_expired_sessions()?;
            db.create_session(user_id, &digest, ttl)
        })
        .await?;
    Ok(Json(SessionResponse {
        token,
        user,
        expires_in_hours: ttl,
    }))
}

async fn signout(
    State(state): State<SharedState>,
    current: CurrentUser,
) -> Result<impl IntoResponse, ApiError> {
    let digest = current.token_digest;
    state.db.call(move |db| db.delete_session(&digest)).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn me(current: CurrentUser) -> Json<User> {
    Json(current.user)
}

async fn list_projects(
    State(state): State<SharedState>,
    current: CurrentUser,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = current.user.id;
    let projects = state.db.call(move |db| db.list_projects_for_user(user_id)).await?;
    Ok(Json(projects))
}

async fn create_project(
    State(state): State<SharedState>,
    current: CurrentUser,
    Json(req): Json<CreateProjectRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let new = NewProject {
        name: req.name,
        description: req.description,
        color: req.color,
    };
    let user_id = current.user.id;
    let project = state.db.call(move |db| db.create_project(&new, user_id)).await?;
    Ok((StatusCode::CREATED, Json(project)))
}

async fn get_project(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
    current: CurrentUser,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = current.user.id;
    let detail = state
        .db
        .call(move |db| {
            authorized(db, id, user_id, ProjectRole::Member)?;
            db.get_project_detail(id)
        })
        .await?;
    match detail {
        Some(detail) => Ok(Json(detail)),
        None => Err(BoardError::ProjectNotFound { id }.into()),
    }
}

async fn update_project(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
    current: CurrentUser,
    Json(req): Json<UpdateProjectRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let update = ProjectUpdate {
        status: parse_opt(req.status.as_deref())?,
        name: req.name,
        description: req.description,
        color: req.color,
    };
    let user_id = current.user.id;
    let (project, activities) = state
        .db
        .call(move |db| {
            authorized(db, id, user_id, ProjectRole::Admin)?;
            logged(db, id, |db| db.update_project(id, &update, user_id))
        })
        .await?;
    publish(
        &state,
        WsMessage::ProjectUpdated {
            project: project.clone(),
        },
        activities,
    );
    Ok(Json(project))
}

async fn delete_project(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
    current: CurrentUser,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = current.user.id;
    state
        .db
        .call(move |db| {
            authorized(db, id, user_id, ProjectRole::Owner)?;
            db.delete_project(id)
        })
        .await?;
    broadcast_message(&state.ws_tx, &WsMessage::ProjectDeleted { project_id: id });
    Ok(StatusCode::NO_CONTENT)
}

async fn get_board(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
    current: CurrentUser,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = current.user.id;
    let board = state
        .db
        .call(move |db| {
            authorized(db, id, user_id, ProjectRole::Member)?;
            db.get_board(id)
        })
        .await?;
    Ok(Json(board))
}

async fn list_members(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
    current: CurrentUser,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = current.user.id;
    let members = state
        .db
        .call(move |db| {
            authorized(db, id, user_id, ProjectRole::Member)?;
            db.list_members(id)
        })
        .await?;
    Ok(Json(members))
}

async fn add_member(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
    current: CurrentUser,
    Json(req): Json<AddMemberRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let role = parse_opt(req.role.as_deref())?.unwrap_or(ProjectRole::Member);
    let email = req.email;
    let user_id = current.user.id;
    let (member, activities) = state
        .db
        .call(move |db| {
            authorized(db, id, user_id, ProjectRole::Admin)?;
            logged(db, id, |db| db.add_member(id, &email, role, user_id))
        })
        .await?;
    publish(
        &state,
        WsMessage::MemberAdded {
            member: member.clone(),
        },
        activities,
    );
    Ok((StatusCode::CREATED, Json(member)))
}

async fn remove_member(
    State(state): State<SharedState>,
    Path((id, member_id)): Path<(i64, i64)>,
    current: CurrentUser,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = current.user.id;
    let (member, activities) = state
        .db
        .call(move |db| {
            authorized(db, id, user_id, ProjectRole::Admin)?;
            logged(db, id, |db| db.remove_member(id, member_id, user_id))
        })
        .await?;
    publish(
        &state,
        WsMessage::MemberRemoved {
            project_id: id,
            member_id,
            user_id: member.user.id,
        },
        activities,
    );
    Ok(StatusCode::NO_CONTENT)
}

async fn list_tasks(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
    current: CurrentUser,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = current.user.id;
    let tasks = state
        .db
        .call(move |db| {
            authorized(db, id, user_id, ProjectRole::Member)?;
            db.list_tasks(id)
        })
        .await?;
    Ok(Json(tasks))
}

async fn create_task(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
    current: CurrentUser,
    Json(req): Json<CreateTaskRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let new = req.into_new_task()?;
    let user_id = current.user.id;
    let (task, activities) = state
        .db
        .call(move |db| {
            authorized(db, id, user_id, ProjectRole::Member)?;
            logged(db, id, |db| db.create_task(id, &new, user_id))
        })
        .await?;
    publish(&state, WsMessage::TaskCreated { task: task.clone() }, activities);
    Ok((StatusCode::CREATED, Json(task)))
}

async fn get_task(
    State(state): State<SharedState>,
    Path((id, task_id)): Path<(i64, i64)>,
    current: CurrentUser,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = current.user.id;
    let task = state
        .db
        .call(move |db| {
            authorized(db, id, user_id, ProjectRole::Member)?;
            db.get_task_in_project(id, task_id)
        })
        .await?;
    Ok(Json(task))
}

async fn update_task(
    State(state): State<SharedState>,
    Path((id, task_id)): Path<(i64, i64)>,
    current: CurrentUser,
    Json(req): Json<UpdateTaskRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let update = req.into_update()?;
    let user_id = current.user.id;
    let (task, activities) = state
        .db
        .call(move |db| {
            authorized(db, id, user_id, ProjectRole::Member)?;
            db.get_task_in_project(id, task_id)?;
            logged(db, id, |db| db.update_task(task_id, &update, user_id))
        })
        .await?;
    publish(&state, WsMessage::TaskUpdated { task: task.clone() }, activities);
    Ok(Json(task))
}

async fn move_task(
    State(state): State<SharedState>,
    Path((id, task_id)): Path<(i64, i64)>,
    current: CurrentUser,
    Json(req): Json<MoveTaskRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let destination = req.into_move()?;
    let user_id = current.user.id;
    let (change, activities) = state
        .db
        .call(move |db| {
            authorized(db, id, user_id, ProjectRole::Member)?;
            db.get_task_in_project(id, task_id)?;
            logged(db, id, |db| db.move_task(task_id, &destination, user_id))
        })
        .await?;
    if change.moved() {
        publish(&state, WsMessage::moved(&change), activities);
    }
    Ok(Json(change.task))
}

async fn delete_task(
    State(state): State<SharedState>,
    Path((id, task_id)): Path<(i64, i64)>,
    current: CurrentUser,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = current.user.id;
    let (_, activities) = state
        .db
        .call(move |db| {
            authorized(db, id, user_id, ProjectRole::Member)?;
            db.get_task_in_project(id, task_id)?;
            logged(db, id, |db| db.delete_task(task_id, user_id))
        })
        .await?;
    publish(
        &state,
        WsMessage::TaskDeleted {
            task_id,
            project_id: id,
        },
        activities,
    );
    Ok(StatusCode::NO_CONTENT)
}

async fn list_comments(
    State(state): State<SharedState>,
    Path((id, task_id)): Path<(i64, i64)>,
    current: CurrentUser,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = current.user.id;
    let comments = state
        .db
        .call(move |db| {
            authorized(db, id, user_id, ProjectRole::Member)?;
            db.get_task_in_project(id, task_id)?;
            db.list_comments(task_id)
        })
        .await?;
    Ok(Json(comments))
}

async fn add_comment(
    State(state): State<SharedState>,
    Path((id, task_id)): Path<(i64, i64)>,
    current: CurrentUser,
    Json(req): Json<CreateCommentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = current.user.id;
    let (comment, activities) = state
        .db
        .call(move |db| {
            authorized(db, id, user_id, ProjectRole::Member)?;
            db.get_task_in_project(id, task_id)?;
            logged(db, id, |db| db.add_comment(task_id, &req.content, user_id))
        })
        .await?;
    publish(
        &state,
        WsMessage::CommentAdded {
            project_id: id,
            comment: comment.clone(),
        },
        activities,
    );
    Ok((StatusCode::CREATED, Json(comment)))
}

async fn list_activities(
    State(state): State<SharedState>,
    current: CurrentUser,
    Query(query): Query<ActivitiesQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let kind = parse_opt(query.kind.as_deref())?;
    let limit = query
        .limit
        .unwrap_or(DEFAULT_ACTIVITY_LIMIT)
        .clamp(1, MAX_ACTIVITY_LIMIT);
    let offset = query.offset.unwrap_or(0).max(0);
    let user_id = current.user.id;
    let page = state
        .db
        .call(move |db| {
            let project_ids = match query.project_id {
                Some(project_id) => {
                    authorized(db, project_id, user_id, ProjectRole::Member)?;
                    vec![project_id]
                }
                None => db.project_ids_for_user(user_id)?,
            };
            db.list_activities(&ActivityQuery {
                project_ids,
                kind,
                limit,
                offset,
            })
        })
        .await?;
    Ok(Json(page))
}

// ── Tests ─────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn test_app() -> (Router, broadcast::Receiver<String>) {
        let db = BoardDb::new_in_memory().unwrap();
        let (ws_tx, ws_rx) = broadcast::channel(64);
        let state = Arc::new(AppState {
            db: DbHandle::new(db),
            ws_tx,
            session_ttl_hours: 24,
        });
        (api_router().with_state(state), ws_rx)
    }

    async fn body_json(body: Body) -> serde_json::Value {
        let bytes = body.collect().await.unwrap().to_bytes();
        if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null)
        }
    }

    async fn send(
        app: &Router,
        method: &str,
        uri: &str,
        token: Option<&str>,
        body: Option<serde_json::Value>,
    ) -> (StatusCode, serde_json::Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {}", token));
        }
        let request = match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        (status, body_json(response.into_body()).await)
    }

    async fn signup_as(app: &Router, email: &str) -> String {
        let (status, body) = send(
            app,
            "POST",
            "/api/auth/signup",
            None,
            Some(serde_json::json!({"email": email, "password": "password123", "name": "Test"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED, "signup failed: {}", body);
        body["token"].as_str().unwrap().to_string()
    }

    async fn create_project_as(app: &Router, token: &str) -> i64 {
        let (status, body) = send(
            app,
            "POST",
            "/api/projects",
            Some(token),
            Some(serde_json::json!({"name": "Board"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        body["id"].as_i64().unwrap()
    }

    async fn create_task_as(app: &Router, token: &str, project_id: i64, title: &str) -> serde_json::Value {
        let (status, body) = send(
            app,
            "POST",
            &format!("/api/projects/{}/tasks", project_id),
            Some(token),
            Some(serde_json::json!({"title": title})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        body
    }

    #[tokio::test]
    async fn test_health_check() {
        let (app, _rx) = test_app();
        let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"ok");
    }

    #[tokio::test]
    async fn test_requests_without_session_are_unauthorized() {
        let (app, _rx) = test_app();
        let (status, body) = send(&app, "GET", "/api/projects", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body["error"].is_string());

        let (status, _) = send(&app, "GET", "/api/projects", Some("bogus"), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_signup_signin_signout() {
        let (app, _rx) = test_app();
        let token = signup_as(&app, "ada@example.com").await;

        let (status, me) = send(&app, "GET", "/api/auth/me", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(me["email"], "ada@example.com");
        assert!(me.get("password_hash").is_none());

        let (status, _) = send(
            &app,
            "POST",
            "/api/auth/signup",
            None,
            Some(serde_json::json!({"email": "ADA@example.com", "password": "password123"})),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, _) = send(
            &app,
            "POST",
            "/api/auth/signin",
            None,
            Some(serde_json::json!({"email": "ada@example.com", "password": "wrong-password"})),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, body) = send(
            &app,
            "POST",
            "/api/auth/signin",
            None,
            Some(serde_json::json!({"email": "ada@example.com", "password": "password123"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let second = body["token"].as_str().unwrap().to_string();

        let (status, _) = send(&app, "POST", "/api/auth/signout", Some(&token), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = send(&app, "GET", "/api/auth/me", Some(&token), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let (status, _) = send(&app, "GET", "/api/auth/me", Some(&second), None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_board_move_flow() {
        let (app, _rx) = test_app();
        let token = signup_as(&app, "owner@example.com").await;
        let project_id = create_project_as(&app, &token).await;

        let a = create_task_as(&app, &token, project_id, "A").await;
        create_task_as(&app, &token, project_id, "B").await;
        let c = create_task_as(&app, &token, project_id, "C").await;
        assert_eq!(a["position"], 0.0);
        assert_eq!(c["position"], 2.0);

        let (status, moved) = send(
            &app,
            "PATCH",
            &format!("/api/projects/{}/tasks/{}/move", project_id, c["id"]),
            Some(&token),
            Some(serde_json::json!({"status": "todo", "index": 0})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(moved["position"], -1.0);

        let (status, moved) = send(
            &app,
            "PATCH",
            &format!("/api/projects/{}/tasks/{}/move", project_id, a["id"]),
            Some(&token),
            Some(serde_json::json!({"status": "IN_PROGRESS"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(moved["status"], "in_progress");
        assert_eq!(moved["position"], 0.0);

        let (status, board) = send(
            &app,
            "GET",
            &format!("/api/projects/{}/board", project_id),
            Some(&token),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let columns = board["columns"].as_array().unwrap();
        assert_eq!(columns.len(), 4);
        let todo: Vec<_> = columns[0]["tasks"]
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["title"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(todo, ["C", "B"]);
        assert_eq!(columns[1]["status"], "in_progress");
    }

    #[tokio::test]
    async fn test_invalid_destination_is_bad_request() {
        let (app, _rx) = test_app();
        let token = signup_as(&app, "owner@example.com").await;
        let project_id = create_project_as(&app, &token).await;
        let a = create_task_as(&app, &token, project_id, "A").await;
        let uri = format!("/api/projects/{}/tasks/{}/move", project_id, a["id"]);

        let (status, body) = send(
            &app,
            "PATCH",
            &uri,
            Some(&token),
            Some(serde_json::json!({"status": "blocked"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("blocked"));

        let (status, _) = send(
            &app,
            "PATCH",
            &uri,
            Some(&token),
            Some(serde_json::json!({"status": "done", "index": -1})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(
            &app,
            "PATCH",
            &format!("/api/projects/{}/tasks/9999/move", project_id),
            Some(&token),
            Some(serde_json::json!({"status": "done"})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_access_policy() {
        let (app, _rx) = test_app();
        let owner = signup_as(&app, "owner@example.com").await;
        let member = signup_as(&app, "member@example.com").await;
        let outsider = signup_as(&app, "outsider@example.com").await;
        let project_id = create_project_as(&app, &owner).await;
        let project_uri = format!("/api/projects/{}", project_id);

        let (status, added) = send(
            &app,
            "POST",
            &format!("{}/members", project_uri),
            Some(&owner),
            Some(serde_json::json!({"email": "member@example.com"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(added["role"], "member");

        // Non-members cannot see the project at all
        let (status, _) = send(&app, "GET", &project_uri, Some(&outsider), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        // Members can work with tasks but not administer the project
        let (status, _) = send(&app, "GET", &format!("{}/board", project_uri), Some(&member), None).await;
        assert_eq!(status, StatusCode::OK);
        create_task_as(&app, &member, project_id, "By member").await;
        let (status, _) = send(
            &app,
            "PUT",
            &project_uri,
            Some(&member),
            Some(serde_json::json!({"name": "Renamed"})),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (status, _) = send(&app, "DELETE", &project_uri, Some(&member), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, updated) = send(
            &app,
            "PUT",
            &project_uri,
            Some(&owner),
            Some(serde_json::json!({"name": "Renamed", "status": "archived"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(updated["status"], "archived");

        let (status, _) = send(&app, "DELETE", &project_uri, Some(&owner), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = send(&app, "GET", &project_uri, Some(&owner), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_task_update_and_comments() {
        let (app, _rx) = test_app();
        let token = signup_as(&app, "owner@example.com").await;
        let project_id = create_project_as(&app, &token).await;
        let task = create_task_as(&app, &token, project_id, "A").await;
        let task_uri = format!("/api/projects/{}/tasks/{}", project_id, task["id"]);

        let (status, updated) = send(
            &app,
            "PUT",
            &task_uri,
            Some(&token),
            Some(serde_json::json!({"priority": "urgent", "description": "details", "status": "done"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(updated["priority"], "urgent");
        assert_eq!(updated["status"], "done");

        let (status, updated) = send(
            &app,
            "PUT",
            &task_uri,
            Some(&token),
            Some(serde_json::json!({"description": null})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(updated["description"].is_null());
        assert_eq!(updated["priority"], "urgent");

        let (status, _) = send(
            &app,
            "PUT",
            &task_uri,
            Some(&token),
            Some(serde_json::json!({"priority": "critical"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, comment) = send(
            &app,
            "POST",
            &format!("{}/comments", task_uri),
            Some(&token),
            Some(serde_json::json!({"content": "Looks good"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(comment["user"]["email"], "owner@example.com");

        let (status, comments) = send(&app, "GET", &format!("{}/comments", task_uri), Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(comments.as_array().unwrap().len(), 1);

        let (status, _) = send(&app, "DELETE", &task_uri, Some(&token), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = send(&app, "GET", &task_uri, Some(&token), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_activity_feed() {
        let (app, _rx) = test_app();
        let token = signup_as(&app, "owner@example.com").await;
        let project_id = create_project_as(&app, &token).await;
        let a = create_task_as(&app, &token, project_id, "A").await;
        send(
            &app,
            "PATCH",
            &format!("/api/projects/{}/tasks/{}/move", project_id, a["id"]),
            Some(&token),
            Some(serde_json::json!({"status": "done"})),
        )
        .await;

        let (status, page) = send(&app, "GET", "/api/activities?limit=2", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(page["total"], 3);
        assert_eq!(page["has_more"], true);
        assert_eq!(page["activities"][0]["type"], "task_completed");

        let (status, page) = send(
            &app,
            "GET",
            &format!("/api/activities?project_id={}&type=task_created", project_id),
            Some(&token),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(page["total"], 1);

        let other = signup_as(&app, "other@example.com").await;
        let (status, _) = send(
            &app,
            "GET",
            &format!("/api/activities?project_id={}", project_id),
            Some(&other),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (_, page) = send(&app, "GET", "/api/activities", Some(&other), None).await;
        assert_eq!(page["total"], 0);
    }

    #[tokio::test]
    async fn test_mutations_are_broadcast() {
        let (app, mut rx) = test_app();
        let token = signup_as(&app, "owner@example.com").await;
        let project_id = create_project_as(&app, &token).await;
        create_task_as(&app, &token, project_id, "A").await;

        let first: serde_json::Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(first["type"], "TaskCreated");
        assert_eq!(first["data"]["task"]["title"], "A");
        let second: serde_json::Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(second["type"], "ActivityNew");
        assert_eq!(second["data"]["activity"]["type"], "task_created");
    }

    #[tokio::test]
    async fn test_drop_into_own_slot_is_not_broadcast() {
        let (app, mut rx) = test_app();
        let token = signup_as(&app, "owner@example.com").await;
        let project_id = create_project_as(&app, &token).await;
        let task = create_task_as(&app, &token, project_id, "Lone").await;
        while rx.try_recv().is_ok() {}

        let uri = format!("/api/projects/{}/tasks/{}/move", project_id, task["id"]);
        let (status, body) = send(&app, "PATCH", &uri, Some(&token), Some(serde_json::json!({"status": "todo"}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["position"], 0.0);
        assert!(rx.try_recv().is_err());

        let (status, _) = send(&app, "PATCH", &uri, Some(&token), Some(serde_json::json!({"status": "done"}))).await;
        assert_eq!(status, StatusCode::OK);
        let moved: serde_json::Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(moved["type"], "TaskMoved");
        assert_eq!(moved["data"]["to_status"], "done");
    }

    #[tokio::test]
    async fn test_concurrent_signins() {
        let (app, _rx) = test_app();
        signup_as(&app, "ada@example.com").await;

        let attempts = (0..4).map(|i| {
            let app = app.clone();
            let password = if i % 2 == 0 { "password123" } else { "not-the-password" };
            tokio::spawn(async move {
                send(
                    &app,
                    "POST",
                    "/api/auth/signin",
                    None,
                    Some(serde_json::json!({"email": "ada@example.com", "password": password})),
                )
                .await
            })
        });
        let results: Vec<_> = futures_util::future::join_all(attempts).await;
        for (i, result) in results.into_iter().enumerate() {
            let (status, body) = result.unwrap();
            if i % 2 == 0 {
                assert_eq!(status, StatusCode::OK);
                assert_eq!(body["token"].as_str().unwrap().len(), 32);
            } else {
                assert_eq!(status, StatusCode::UNAUTHORIZED);
            }
        }
    }

    #[tokio::test]
    async fn test_avatar_is_public_svg() {
        let (app, _rx) = test_app();
        let request = Request::builder()
            .uri("/api/avatar/alice%40taskflow.com")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["content-type"], "image/svg+xml");
        assert_eq!(response.headers()["cache-control"], "public, max-age=86400");
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let svg = String::from_utf8(bytes.to_vec()).unwrap();
        assert_eq!(svg, avatar::avatar_svg("alice@taskflow.com", avatar::AVATAR_SIZE));
    }

    #[test]
    fn test_anyhow_error_mapping() {
        let err: anyhow::Error = BoardError::Forbidden.into();
        assert!(matches!(ApiError::from(err), ApiError::Forbidden(_)));
        let err = anyhow::anyhow!("disk full");
        assert!(matches!(ApiError::from(err), ApiError::Internal(_)));
        let err: anyhow::Error = BoardError::InvalidStatus("x".into()).into();
        assert!(matches!(ApiError::from(err.context("moving")), ApiError::BadRequest(_)));
    }
}
