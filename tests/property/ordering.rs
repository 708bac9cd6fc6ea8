//! Property tests for task ordering.
//!
//! 1. A created task lands after every task already in its column.
//! 2. A status change without an index appends to the destination column.
//! 3. An interior drop lands strictly between its two neighbours.
//! 4. A drop at either edge lands before the first / after the last task.
//! 5. A move never changes any other task's position.
//! 6. After any sequence of moves, each column reads back in the order the
//!    moves describe.

use std::collections::HashMap;

use proptest::prelude::*;
use taskflow::board::db::BoardDb;
use taskflow::board::models::{MoveTask, NewProject, NewTask, TaskStatus};
use taskflow::board::ordering;

// --- Fixtures ---

struct Board {
    db: BoardDb,
    project_id: i64,
    user_id: i64,
}

fn board() -> Board {
    let db = BoardDb::new_in_memory().unwrap();
    let user = db.create_user("prop@example.com", Some("Prop"), "not-a-real-hash").unwrap();
    let project = db
        .create_project(
            &NewProject {
                name: "Properties".into(),
                ..NewProject::default()
            },
            user.id,
        )
        .unwrap();
    Board {
        db,
        project_id: project.id,
        user_id: user.id,
    }
}

impl Board {
    fn create(&self, status: TaskStatus) -> i64 {
        let new = NewTask::titled("task").in_status(status);
        self.db.create_task(self.project_id, &new, self.user_id).unwrap().id
    }

    fn positions(&self) -> HashMap<i64, f64> {
        self.db
            .list_tasks(self.project_id)
            .unwrap()
            .into_iter()
            .map(|t| (t.id, t.position))
            .collect()
    }

    fn column_ids(&self, status: TaskStatus) -> Vec<i64> {
        let board = self.db.get_board(self.project_id).unwrap();
        board
            .columns
            .into_iter()
            .find(|c| c.status == status)
            .map(|c| c.tasks.into_iter().map(|t| t.id).collect())
            .unwrap_or_default()
    }
}

// --- Strategies ---

fn arb_status() -> impl Strategy<Value = TaskStatus> {
    prop::sample::select(TaskStatus::ALL.to_vec())
}

/// Sorted, distinct sibling positions on a half-unit grid.
fn arb_siblings() -> impl Strategy<Value = Vec<f64>> {
    prop::collection::btree_set(-2000i32..2000, 1..24)
        .prop_map(|set| set.into_iter().map(|n| f64::from(n) / 2.0).collect())
}

/// (task slot, destination status, optional destination index)
fn arb_moves() -> impl Strategy<Value = Vec<(usize, TaskStatus, Option<usize>)>> {
    prop::collection::vec(
        (0usize..64, arb_status(), prop::option::of(0usize..12)),
        1..30,
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn created_task_appends_to_its_column(statuses in prop::collection::vec(arb_status(), 1..20)) {
        let b = board();
        for status in statuses {
            let before = b.db.get_board(b.project_id).unwrap();
            let existing: Vec<f64> = before
                .columns
                .iter()
                .filter(|c| c.status == status)
                .flat_map(|c| c.tasks.iter().map(|t| t.position))
                .collect();

            let id = b.create(status);
            let position = b.positions()[&id];
            if existing.is_empty() {
                prop_assert_eq!(position, 0.0);
            }
            prop_assert!(existing.iter().all(|p| *p < position));
            prop_assert_eq!(b.column_ids(status).last().copied(), Some(id));
        }
    }

    #[test]
    fn status_change_without_index_appends(
        from in arb_status(),
        to in arb_status(),
        occupants in 0usize..6,
    ) {
        prop_assume!(from != to);
        let b = board();
        let moved = b.create(from);
        for _ in 0..occupants {
            b.create(to);
        }

        let change = b
            .db
            .move_task(moved, &MoveTask { status: to, index: None }, b.user_id)
            .unwrap();
        prop_assert_eq!(change.task.status, to);
        let positions = b.positions();
        let others = b.column_ids(to).into_iter().filter(|id| *id != moved);
        for id in others {
            prop_assert!(positions[&id] < change.task.position);
        }
        prop_assert_eq!(b.column_ids(to).last().copied(), Some(moved));
    }

    #[test]
    fn interior_drop_lands_between_neighbours(siblings in arb_siblings(), pick in any::<prop::sample::Index>()) {
        prop_assume!(siblings.len() >= 2);
        let index = 1 + pick.index(siblings.len() - 1);
        let position = ordering::assign_reorder_position(&siblings, index);
        prop_assert!(siblings[index - 1] < position);
        prop_assert!(position < siblings[index]);
    }

    #[test]
    fn edge_drops_extend_the_column(siblings in arb_siblings(), overshoot in 0usize..5) {
        let first = siblings[0];
        let last = siblings[siblings.len() - 1];
        prop_assert_eq!(ordering::assign_reorder_position(&siblings, 0), first - 1.0);
        prop_assert_eq!(
            ordering::assign_reorder_position(&siblings, siblings.len() + overshoot),
            last + 1.0
        );
    }

    #[test]
    fn moves_leave_siblings_untouched(
        seed in prop::collection::vec(arb_status(), 2..12),
        moves in arb_moves(),
    ) {
        let b = board();
        let ids: Vec<i64> = seed.into_iter().map(|s| b.create(s)).collect();

        for (slot, status, index) in moves {
            let moved = ids[slot % ids.len()];
            let before = b.positions();
            b.db.move_task(moved, &MoveTask { status, index }, b.user_id).unwrap();
            let after = b.positions();
            for id in ids.iter().filter(|id| **id != moved) {
                prop_assert_eq!(before[id], after[id]);
            }
        }
    }

    #[test]
    fn column_order_follows_moves(
        seed in prop::collection::vec(arb_status(), 2..12),
        moves in arb_moves(),
    ) {
        let b = board();
        let mut expected: HashMap<TaskStatus, Vec<i64>> = HashMap::new();
        let mut ids = Vec::new();
        for status in seed {
            let id = b.create(status);
            expected.entry(status).or_default().push(id);
            ids.push(id);
        }

        for (slot, status, index) in moves {
            let moved = ids[slot % ids.len()];
            let from = TaskStatus::ALL
                .into_iter()
                .find(|s| expected.get(s).is_some_and(|col| col.contains(&moved)))
                .unwrap();
            if index.is_none() && from == status {
                // Same column without an index is a no-op
                b.db.move_task(moved, &MoveTask { status, index }, b.user_id).unwrap();
                continue;
            }

            if let Some(col) = expected.get_mut(&from) {
                col.retain(|id| *id != moved);
            }
            let column = expected.entry(status).or_default();
            let at = index.map_or(column.len(), |i| i.min(column.len()));
            column.insert(at, moved);

            b.db.move_task(moved, &MoveTask { status, index }, b.user_id).unwrap();
        }

        for status in TaskStatus::ALL {
            let want = expected.get(&status).cloned().unwrap_or_default();
            prop_assert_eq!(b.column_ids(status), want);
        }
    }
}
