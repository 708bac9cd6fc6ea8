//! Client-side optimistic board.
//!
//! A drag-end is applied to the local `view` at once and the server request
//! is issued afterwards. The board keeps the last server-confirmed snapshot
//! next to the view; a failed request replaces the view with that snapshot
//! wholesale instead of undoing the move step by step.
//!
//! ```text
//!   begin_move ──> view changed, pending = Some(move)
//!        │
//!        ├── confirm(task)  ──> confirmed := view with server task, pending = None
//!        └── revert()       ──> view := confirmed,                pending = None
//! ```

use super::models::{MoveTask, Task, TaskStatus};
use super::ordering::{self, Placement};
use crate::errors::BoardError;

/// A move applied locally and awaiting the server's answer.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingMove {
    pub task_id: i64,
    pub destination: MoveTask,
}

#[derive(Debug, Clone)]
pub struct OptimisticBoard {
    confirmed: Vec<Task>,
    view: Vec<Task>,
    pending: Option<PendingMove>,
}

impl OptimisticBoard {
    pub fn new(tasks: Vec<Task>) -> Self {
        Self {
            view: tasks.clone(),
            confirmed: tasks,
            pending: None,
        }
    }

    pub fn tasks(&self) -> &[Task] {
        &self.view
    }

    pub fn confirmed(&self) -> &[Task] {
        &self.confirmed
    }

    pub fn pending(&self) -> Option<&PendingMove> {
        self.pending.as_ref()
    }

    /// Tasks of one column as currently shown, in position order.
    pub fn column(&self, status: TaskStatus) -> Vec<&Task> {
        let mut tasks: Vec<&Task> = self.view.iter().filter(|t| t.status == status).collect();
        tasks.sort_by(|a, b| a.position.total_cmp(&b.position).then(a.id.cmp(&b.id)));
        tasks
    }

    /// Apply a drag-end locally.
    ///
    /// Returns the move to send to the server, or `None` when the task was
    /// dropped back into its own slot and nothing needs to be sent.
    pub fn begin_move(&mut self, task_id: i64, destination: MoveTask) -> Result<Option<MoveTask>, BoardError> {
        if self.pending.is_some() {
            return Err(BoardError::Conflict("A move is already in flight".into()));
        }
        let task = self
            .view
            .iter()
            .find(|t| t.id == task_id)
            .ok_or(BoardError::TaskNotFound { id: task_id })?;

        let siblings: Vec<f64> = self
            .column(destination.status)
            .into_iter()
            .filter(|t| t.id != task_id)
            .map(|t| t.position)
            .collect();

        let position = match Placement::for_move(task, &destination) {
            Placement::Unchanged => return Ok(None),
            Placement::AtIndex(index)
                if destination.status == task.status && self.index_of(task) == Some(index) =>
            {
                return Ok(None);
            }
            Placement::Append => {
                ordering::append_position(siblings.iter().copied().reduce(f64::max))
            }
            Placement::AtIndex(index) => ordering::assign_reorder_position(&siblings, index),
        };

        if let Some(task) = self.view.iter_mut().find(|t| t.id == task_id) {
            task.status = destination.status;
            task.position = position;
        }
        self.pending = Some(PendingMove {
            task_id,
            destination,
        });
        Ok(Some(destination))
    }

    /// The server accepted the pending move; its task becomes authoritative.
    pub fn confirm(&mut self, task: Task) {
        self.pending = None;
        upsert(&mut self.confirmed, task);
        self.view = self.confirmed.clone();
    }

    /// The server rejected the pending move.
    pub fn revert(&mut self) {
        if let Some(pending) = self.pending.take() {
            tracing::debug!(task_id = pending.task_id, "reverting optimistic move");
        }
        self.view = self.confirmed.clone();
    }

    /// Fold in a change made elsewhere (e.g. from the change feed).
    pub fn apply_remote(&mut self, task: Task) {
        upsert(&mut self.confirmed, task.clone());
        let pending_id = self.pending.as_ref().map(|p| p.task_id);
        if pending_id != Some(task.id) {
            upsert(&mut self.view, task);
        }
    }

    pub fn remove_remote(&mut self, task_id: i64) {
        self.confirmed.retain(|t| t.id != task_id);
        self.view.retain(|t| t.id != task_id);
    }

    fn index_of(&self, task: &Task) -> Option<usize> {
        self.column(task.status).iter().position(|t| t.id == task.id)
    }
}

fn upsert(tasks: &mut Vec<Task>, task: Task) {
    match tasks.iter_mut().find(|t| t.id == task.id) {
        Some(existing) => *existing = task,
        None => tasks.push(task),
    }
}
