//! In-memory store (non-persistent).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{ensure_distinct_ids, Store};
use crate::error::{StoreError, StoreResult};
use crate::models::{Staff, Task, TaskStatus};

#[derive(Clone, Default)]
pub struct InMemoryStore {
    tasks: Arc<RwLock<HashMap<String, Task>>>,
    staff: Arc<RwLock<HashMap<String, Staff>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a staff record. Staff profiles are managed outside the
    /// engine; this is how they enter the in-memory backend.
    pub async fn put_staff(&self, staff: Staff) {
        self.staff.write().await.insert(staff.id.clone(), staff);
    }

    /// Adds or replaces a task record as-is, bypassing engine rules.
    #[cfg(test)]
    pub async fn put_task(&self, task: Task) {
        self.tasks.write().await.insert(task.id.clone(), task);
    }

    async fn tasks_where<F>(&self, pred: F) -> Vec<Task>
    where
        F: Fn(&Task) -> bool,
    {
        let mut tasks: Vec<Task> = self
            .tasks
            .read()
            .await
            .values()
            .filter(|t| pred(t))
            .cloned()
            .collect();
        tasks.sort_by(|a, b| a.order_key().cmp(&b.order_key()));
        tasks
    }

    async fn staff_where<F>(&self, pred: F) -> Vec<Staff>
    where
        F: Fn(&Staff) -> bool,
    {
        let mut staff: Vec<Staff> = self
            .staff
            .read()
            .await
            .values()
            .filter(|s| pred(s))
            .cloned()
            .collect();
        staff.sort_by(|a, b| a.order_key().cmp(&b.order_key()));
        staff
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn find_staff_by_id(&self, id: &str) -> StoreResult<Option<Staff>> {
        Ok(self.staff.read().await.get(id).cloned())
    }

    async fn find_all_staff(&self) -> StoreResult<Vec<Staff>> {
        Ok(self.staff_where(|_| true).await)
    }

    async fn find_available_staff(&self) -> StoreResult<Vec<Staff>> {
        Ok(self.staff_where(|s| s.is_available).await)
    }

    async fn find_task_by_id(&self, id: &str) -> StoreResult<Option<Task>> {
        Ok(self.tasks.read().await.get(id).cloned())
    }

    async fn find_all_tasks(&self) -> StoreResult<Vec<Task>> {
        Ok(self.tasks_where(|_| true).await)
    }

    async fn find_tasks_for_staff(&self, staff_id: &str) -> StoreResult<Vec<Task>> {
        Ok(self
            .tasks_where(|t| t.assignee_id.as_deref() == Some(staff_id))
            .await)
    }

    async fn find_unassigned_tasks(&self) -> StoreResult<Vec<Task>> {
        Ok(self
            .tasks_where(|t| t.is_unassigned() && t.status != TaskStatus::Completed)
            .await)
    }

    async fn find_overdue_tasks(&self, now: DateTime<Utc>) -> StoreResult<Vec<Task>> {
        Ok(self.tasks_where(|t| t.is_overdue(now)).await)
    }

    async fn find_next_pending_task_for_staff(
        &self,
        staff_id: &str,
        exclude_task_id: &str,
    ) -> StoreResult<Option<Task>> {
        Ok(self
            .tasks_where(|t| {
                t.assignee_id.as_deref() == Some(staff_id)
                    && t.status == TaskStatus::Pending
                    && t.id != exclude_task_id
            })
            .await
            .into_iter()
            .next())
    }

    async fn insert_tasks(&self, tasks: &[Task]) -> StoreResult<()> {
        ensure_distinct_ids(tasks)?;
        let mut stored = self.tasks.write().await;
        if let Some(dup) = tasks.iter().find(|t| stored.contains_key(&t.id)) {
            return Err(StoreError::Database(format!("Duplicate task id {}", dup.id)));
        }
        for task in tasks {
            stored.insert(task.id.clone(), task.clone());
        }
        Ok(())
    }

    async fn delete_tasks(&self, ids: &[String]) -> StoreResult<()> {
        let mut stored = self.tasks.write().await;
        for id in ids {
            stored.remove(id);
        }
        Ok(())
    }

    async fn update_staff_assignment(
        &self,
        staff_id: &str,
        expected: Option<&str>,
        next: Option<&str>,
    ) -> StoreResult<Staff> {
        let mut staff = self.staff.write().await;
        let member = staff.get_mut(staff_id).ok_or_else(|| StoreError::Missing {
            entity: "staff",
            id: staff_id.to_string(),
        })?;
        if member.current_task_id.as_deref() != expected || member.is_available != expected.is_none() {
            return Err(StoreError::Conflict {
                entity: "staff",
                id: staff_id.to_string(),
            });
        }
        member.current_task_id = next.map(str::to_string);
        member.is_available = next.is_none();
        Ok(member.clone())
    }

    async fn update_task(&self, expected: &Task, next: &Task) -> StoreResult<Task> {
        let mut tasks = self.tasks.write().await;
        let stored = tasks.get_mut(&expected.id).ok_or_else(|| StoreError::Missing {
            entity: "task",
            id: expected.id.clone(),
        })?;
        if stored.assignee_id != expected.assignee_id || stored.status != expected.status {
            return Err(StoreError::Conflict {
                entity: "task",
                id: expected.id.clone(),
            });
        }
        stored.assignee_id = next.assignee_id.clone();
        stored.status = next.status;
        stored.completed_at = next.completed_at;
        stored.due_date = next.due_date;
        stored.is_auto_assigned = next.is_auto_assigned;
        stored.updated_at = next.updated_at;
        Ok(stored.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Priority, TaskSpec};
    use chrono::Duration;

    fn staff(id: &str, created_at: DateTime<Utc>) -> Staff {
        Staff {
            id: id.to_string(),
            name: id.to_uppercase(),
            department: "ops".to_string(),
            email: None,
            phone: None,
            is_available: true,
            current_task_id: None,
            created_at,
        }
    }

    fn task(title: &str, now: DateTime<Utc>) -> Task {
        let spec = TaskSpec {
            title: title.to_string(),
            description: "d".to_string(),
            priority: "low".to_string(),
        };
        Task::new(None, None, &spec, Priority::Low, now, Duration::days(7))
    }

    #[tokio::test]
    async fn staff_assignment_is_compare_and_swap() {
        let store = InMemoryStore::new();
        store.put_staff(staff("a", Utc::now())).await;

        let updated = store.update_staff_assignment("a", None, Some("t1")).await.unwrap();
        assert!(!updated.is_available);
        assert_eq!(updated.current_task_id.as_deref(), Some("t1"));

        // a second claim expecting "available" must not overwrite
        let err = store.update_staff_assignment("a", None, Some("t2")).await.unwrap_err();
        assert!(err.is_conflict());

        let freed = store.update_staff_assignment("a", Some("t1"), None).await.unwrap();
        assert!(freed.is_available);
        assert!(freed.current_task_id.is_none());
    }

    #[tokio::test]
    async fn task_update_rejects_stale_expectation() {
        let store = InMemoryStore::new();
        let t = task("t", Utc::now());
        store.insert_tasks(&[t.clone()]).await.unwrap();

        let mut claimed = t.clone();
        claimed.assignee_id = Some("a".into());
        claimed.status = TaskStatus::InProgress;
        store.update_task(&t, &claimed).await.unwrap();

        let mut rival = t.clone();
        rival.assignee_id = Some("b".into());
        let err = store.update_task(&t, &rival).await.unwrap_err();
        assert!(err.is_conflict());
        let stored = store.find_task_by_id(&t.id).await.unwrap().unwrap();
        assert_eq!(stored.assignee_id.as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn queries_return_creation_order() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        let newer = task("newer", now);
        let older = task("older", now - Duration::hours(1));
        store.insert_tasks(&[newer.clone(), older.clone()]).await.unwrap();
        store.put_staff(staff("late", now)).await;
        store.put_staff(staff("early", now - Duration::hours(1))).await;

        let titles: Vec<String> = store
            .find_unassigned_tasks()
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.title)
            .collect();
        assert_eq!(titles, vec!["older", "newer"]);

        let ids: Vec<String> = store
            .find_available_staff()
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(ids, vec!["early", "late"]);
    }

    #[tokio::test]
    async fn next_pending_skips_excluded_and_non_pending() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        let mut first = task("first", now - Duration::minutes(3));
        let mut second = task("second", now - Duration::minutes(2));
        let mut third = task("third", now - Duration::minutes(1));
        for t in [&mut first, &mut second, &mut third] {
            t.assignee_id = Some("a".into());
        }
        second.status = TaskStatus::InProgress;
        store.insert_tasks(&[first.clone(), second, third.clone()]).await.unwrap();

        let next = store
            .find_next_pending_task_for_staff("a", &first.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(next.id, third.id);
    }

    #[tokio::test]
    async fn duplicate_insert_stores_nothing() {
        let store = InMemoryStore::new();
        let existing = task("existing", Utc::now());
        store.insert_tasks(&[existing.clone()]).await.unwrap();

        let fresh = task("fresh", Utc::now());
        let result = store.insert_tasks(&[fresh.clone(), existing]).await;
        assert!(result.is_err());
        assert!(store.find_task_by_id(&fresh.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn repeated_id_within_batch_stores_nothing() {
        let store = InMemoryStore::new();
        let first = task("first", Utc::now());
        let other = task("other", Utc::now());

        let result = store.insert_tasks(&[first.clone(), other.clone(), first.clone()]).await;
        assert!(result.is_err());
        assert!(store.find_all_tasks().await.unwrap().is_empty());
    }
}
