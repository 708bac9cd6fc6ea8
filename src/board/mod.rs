//! TaskFlow board back-end.
//!
//! ## Module Map
//!
//! ```text
//! ┌──────────┐   HTTP   ┌──────────────────────────────────────────────────┐
//! │  Client  │ ───────> │  server.rs  (axum Router, ServerConfig)          │
//! │          │ <─────── │    └─ api.rs  (route handlers, AppState)         │
//! └──────────┘ WebSocket│         │  auth.rs    (CurrentUser extractor)     │
//!                       │         │  access.rs  (authorize / require_role)  │
//!                       │         v                                        │
//!                       │  db.rs  (BoardDb, one transaction per mutation)  │
//!                       │         │                                        │
//!                       │         ├─ ordering.rs  (position assignment)    │
//!                       │         └─ activity.rs  (activity log entries)   │
//!                       └──────────────────────────────────────────────────┘
//! ```
//!
//! ## Supporting Modules
//!
//! | Module       | Responsibility                                         |
//! |--------------|--------------------------------------------------------|
//! | `models`     | Shared types: `Task`, `TaskStatus`, `Activity`, ...    |
//! | `ws`         | `WsMessage` change feed + `broadcast_message()`        |
//! | `optimistic` | Client-side board with revert-on-failure moves         |
//! | `seed`       | Demo users, project and tasks                          |
//! | `avatar`     | Deterministic SVG initials avatars                     |
//!
//! ## Typical Request Flow (drag a card)
//!
//! 1. `PATCH /api/projects/{id}/tasks/{task_id}/move` → `api::move_task()`
//! 2. `CurrentUser` resolves the bearer session; `access::require_role`
//!    checks membership.
//! 3. `BoardDb::move_task()` opens a transaction, loads the task, asks
//!    `ordering::resolve_placement()` for the new `(status, position)`,
//!    writes it and, if the column changed, appends an activity.
//! 4. The handler broadcasts `TaskMoved` plus any new activities on the
//!    change feed.

pub mod access;
pub mod activity;
pub mod api;
pub mod auth;
pub mod avatar;
pub mod db;
pub mod models;
pub mod optimistic;
pub mod ordering;
pub mod seed;
pub mod server;
pub mod ws;
