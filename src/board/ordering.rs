//! Task ordering engine.
//!
//! A task's place on the board is the pair `(status, position)`. Within a
//! column (`project_id`, `status`) tasks are shown in ascending `position`
//! order. Positions are sparse `f64` sort keys, not dense indexes: every
//! operation here computes a position for the one task being written and
//! never renumbers its siblings, so deletions simply leave gaps.
//!
//! | Operation                        | Rule                                    |
//! |----------------------------------|-----------------------------------------|
//! | [`assign_create_position`]       | `max + 1` of the column, `0` if empty   |
//! | [`assign_status_change_position`]| same, excluding the moved task          |
//! | [`assign_reorder_position`]      | midpoint of neighbours, `±1` at edges   |
//!
//! The SQL helpers take a `&Connection` so callers can run them on an open
//! transaction and keep the read-then-write atomic.

use anyhow::{Context, Result};
use rusqlite::{Connection, params};

use super::models::{MoveTask, Task, TaskStatus};

/// Position for a task appended after `max_existing`.
pub fn append_position(max_existing: Option<f64>) -> f64 {
    match max_existing {
        Some(max) => max + 1.0,
        None => 0.0,
    }
}

/// Position for a task inserted at `destination_index` among `siblings`.
///
/// `siblings` are the positions already in the destination column, sorted
/// ascending, with the moved task excluded.
pub fn assign_reorder_position(siblings: &[f64], destination_index: usize) -> f64 {
    let (Some(first), Some(last)) = (siblings.first(), siblings.last()) else {
        return 0.0;
    };

    if destination_index == 0 {
        return first - 1.0;
    }
    if destination_index >= siblings.len() {
        return last + 1.0;
    }

    let before = siblings[destination_index - 1];
    let after = siblings[destination_index];
    let midpoint = (before + after) / 2.0;
    if !(before < midpoint && midpoint < after) {
        // No renumbering: the column keeps working, but these two neighbours
        // can no longer be told apart from a task dropped between them.
        tracing::warn!(
            before,
            after,
            destination_index,
            "position precision exhausted between neighbours"
        );
    }
    midpoint
}

/// Where a moved task lands, decided before anything is written.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Placement {
    /// Nothing to write: same column, no explicit index.
    Unchanged,
    /// Append to the end of the destination column.
    Append,
    /// Insert at an explicit index of the destination column.
    AtIndex(usize),
}

impl Placement {
    pub fn for_move(task: &Task, destination: &MoveTask) -> Self {
        match destination.index {
            Some(index) => Self::AtIndex(index),
            None if destination.status != task.status => Self::Append,
            None => Self::Unchanged,
        }
    }
}

/// Highest position in a column, optionally ignoring one task.
pub fn max_position(
    conn: &Connection,
    project_id: i64,
    status: TaskStatus,
    exclude_task_id: Option<i64>,
) -> Result<Option<f64>> {
    conn.query_row(
        "SELECT MAX(position) FROM tasks
         WHERE project_id = ?1 AND status = ?2 AND (?3 IS NULL OR id != ?3)",
        params![project_id, status.as_str(), exclude_task_id],
        |row| row.get::<_, Option<f64>>(0),
    )
    .context("Failed to query max task position")
}

/// Positions of a column in display order, optionally ignoring one task.
pub fn column_positions(
    conn: &Connection,
    project_id: i64,
    status: TaskStatus,
    exclude_task_id: Option<i64>,
) -> Result<Vec<f64>> {
    let mut stmt = conn
        .prepare(
            "SELECT position FROM tasks
             WHERE project_id = ?1 AND status = ?2 AND (?3 IS NULL OR id != ?3)
             ORDER BY position ASC, id ASC",
        )
        .context("Failed to prepare column_positions")?;
    let rows = stmt
        .query_map(params![project_id, status.as_str(), exclude_task_id], |row| {
            row.get::<_, f64>(0)
        })
        .context("Failed to query column positions")?;
    let mut positions = Vec::new();
    for row in rows {
        positions.push(row.context("Failed to read position row")?);
    }
    Ok(positions)
}

/// Position for a task created in `(project_id, status)`.
pub fn assign_create_position(conn: &Connection, project_id: i64, status: TaskStatus) -> Result<f64> {
    Ok(append_position(max_position(conn, project_id, status, None)?))
}

/// Position for a task whose status changes to `new_status` without an
/// explicit destination.
pub fn assign_status_change_position(
    conn: &Connection,
    project_id: i64,
    new_status: TaskStatus,
    exclude_task_id: i64,
) -> Result<f64> {
    Ok(append_position(max_position(
        conn,
        project_id,
        new_status,
        Some(exclude_task_id),
    )?))
}

/// Resolve a [`Placement`] for `task` into a concrete `(status, position)`.
pub fn resolve_placement(
    conn: &Connection,
    task: &Task,
    destination: &MoveTask,
) -> Result<(TaskStatus, f64)> {
    let position = match Placement::for_move(task, destination) {
        Placement::Unchanged => task.position,
        Placement::Append => {
            assign_status_change_position(conn, task.project_id, destination.status, task.id)?
        }
        Placement::AtIndex(index) => {
            let siblings =
                column_positions(conn, task.project_id, destination.status, Some(task.id))?;
            assign_reorder_position(&siblings, index)
        }
    };
    Ok((destination.status, position))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::models::TaskPriority;

    #[test]
    fn test_append_to_empty_column_is_zero() {
        assert_eq!(append_position(None), 0.0);
    }

    #[test]
    fn test_append_after_max() {
        assert_eq!(append_position(Some(1.0)), 2.0);
        assert_eq!(append_position(Some(-3.5)), -2.5);
    }

    #[test]
    fn test_reorder_into_empty_column() {
        assert_eq!(assign_reorder_position(&[], 0), 0.0);
        assert_eq!(assign_reorder_position(&[], 5), 0.0);
    }

    #[test]
    fn test_reorder_to_front() {
        // A(0), B(1), C(2) minus C; C dropped at index 0
        assert_eq!(assign_reorder_position(&[0.0, 1.0], 0), -1.0);
    }

    #[test]
    fn test_reorder_to_end_and_past_end() {
        assert_eq!(assign_reorder_position(&[0.0, 1.0], 2), 2.0);
        assert_eq!(assign_reorder_position(&[0.0, 1.0], 99), 2.0);
    }

    #[test]
    fn test_reorder_midpoint() {
        assert_eq!(assign_reorder_position(&[5.0, 10.0], 1), 7.5);
    }

    #[test]
    fn test_repeated_midpoints_stay_strictly_between() {
        let low = 0.0;
        let mut high = 1.0;
        for _ in 0..40 {
            let p = assign_reorder_position(&[low, high], 1);
            assert!(low < p && p < high);
            high = p;
        }
    }

    #[test]
    fn test_placement_for_move() {
        let task = Task {
            id: 1,
            project_id: 1,
            title: "A".into(),
            description: None,
            status: TaskStatus::Todo,
            position: 0.0,
            priority: TaskPriority::Medium,
            assignee_id: None,
            due_date: None,
            created_at: String::new(),
            updated_at: String::new(),
        };
        let same = MoveTask { status: TaskStatus::Todo, index: None };
        let across = MoveTask { status: TaskStatus::Done, index: None };
        let indexed = MoveTask { status: TaskStatus::Todo, index: Some(2) };
        assert_eq!(Placement::for_move(&task, &same), Placement::Unchanged);
        assert_eq!(Placement::for_move(&task, &across), Placement::Append);
        assert_eq!(Placement::for_move(&task, &indexed), Placement::AtIndex(2));
    }
}
