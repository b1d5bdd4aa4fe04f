//! Task and staff persistence with pluggable backends.
//!
//! - `memory`: in-process maps, used by tests and `STORE_BACKEND=memory`
//! - `mongo`: the `tasks` and `staff` collections
//!
//! Writes that touch engine-owned fields are conditional: the caller states
//! what it read, and the store refuses with [`StoreError::Conflict`] if the
//! entity has moved on since.

mod memory;
mod mongo;

pub use memory::InMemoryStore;
pub use mongo::MongoStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use std::collections::HashSet;

use crate::error::{StoreError, StoreResult};
use crate::models::{Staff, Task};

#[async_trait]
pub trait Store: Send + Sync {
    async fn find_staff_by_id(&self, id: &str) -> StoreResult<Option<Staff>>;

    /// Every staff member, ordered by `(created_at, id)`.
    async fn find_all_staff(&self) -> StoreResult<Vec<Staff>>;

    /// Staff with `is_available == true`, ordered by `(created_at, id)`.
    async fn find_available_staff(&self) -> StoreResult<Vec<Staff>>;

    async fn find_task_by_id(&self, id: &str) -> StoreResult<Option<Task>>;

    /// Every task, in creation order.
    async fn find_all_tasks(&self) -> StoreResult<Vec<Task>>;

    /// Tasks whose assignee is `staff_id`, in creation order.
    async fn find_tasks_for_staff(&self, staff_id: &str) -> StoreResult<Vec<Task>>;

    /// Tasks without an assignee that are not completed, in creation order.
    async fn find_unassigned_tasks(&self) -> StoreResult<Vec<Task>>;

    /// Tasks that are not completed and were due before `now`.
    async fn find_overdue_tasks(&self, now: DateTime<Utc>) -> StoreResult<Vec<Task>>;

    /// The oldest pending task assigned to `staff_id`, other than `exclude_task_id`.
    async fn find_next_pending_task_for_staff(
        &self,
        staff_id: &str,
        exclude_task_id: &str,
    ) -> StoreResult<Option<Task>>;

    /// Inserts a batch. Either every task is stored or the call fails.
    async fn insert_tasks(&self, tasks: &[Task]) -> StoreResult<()>;

    /// Removes tasks by id; used to roll back a batch.
    async fn delete_tasks(&self, ids: &[String]) -> StoreResult<()>;

    /// Moves a staff member's current task from `expected` to `next`.
    ///
    /// `None` means "available". The write only happens if the stored
    /// `current_task_id` still equals `expected`; `is_available` is always
    /// written as `next.is_none()`.
    async fn update_staff_assignment(
        &self,
        staff_id: &str,
        expected: Option<&str>,
        next: Option<&str>,
    ) -> StoreResult<Staff>;

    /// Replaces the engine-owned fields of `expected` with those of `next`,
    /// provided the stored `assignee_id` and `status` still match `expected`.
    async fn update_task(&self, expected: &Task, next: &Task) -> StoreResult<Task>;
}

/// Rejects a batch that repeats an id.
pub(crate) fn ensure_distinct_ids(tasks: &[Task]) -> StoreResult<()> {
    let mut seen = HashSet::new();
    match tasks.iter().find(|t| !seen.insert(t.id.as_str())) {
        Some(dup) => Err(StoreError::Database(format!("Duplicate task id {}", dup.id))),
        None => Ok(()),
    }
}
