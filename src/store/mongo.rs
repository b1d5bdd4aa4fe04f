//! MongoDB-backed store over the `tasks` and `staff` collections.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::TryStreamExt;
use log::{error, warn};
use mongodb::bson::{doc, Bson, DateTime as BsonDateTime, Document};
use mongodb::options::ReturnDocument;
use mongodb::{Collection, Database};
use serde::{Deserialize, Serialize};

use super::{ensure_distinct_ids, Store};
use crate::error::{StoreError, StoreResult};
use crate::models::{Priority, Staff, Task, TaskStatus};

const TASKS: &str = "tasks";
const STAFF: &str = "staff";

fn to_bson_date(dt: DateTime<Utc>) -> BsonDateTime {
    BsonDateTime::from_millis(dt.timestamp_millis())
}

fn to_chrono(dt: BsonDateTime) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(dt.timestamp_millis()).unwrap_or_default()
}

/// Stored shape of a task. Dates are BSON dates so range queries work.
#[derive(Debug, Serialize, Deserialize)]
struct TaskDocument {
    #[serde(rename = "_id")]
    id: String,
    owner_id: Option<String>,
    assignee_id: Option<String>,
    title: String,
    description: String,
    status: TaskStatus,
    priority: Priority,
    due_date: BsonDateTime,
    completed_at: Option<BsonDateTime>,
    #[serde(default)]
    is_auto_assigned: bool,
    created_at: BsonDateTime,
    updated_at: BsonDateTime,
}

impl From<&Task> for TaskDocument {
    fn from(t: &Task) -> Self {
        TaskDocument {
            id: t.id.clone(),
            owner_id: t.owner_id.clone(),
            assignee_id: t.assignee_id.clone(),
            title: t.title.clone(),
            description: t.description.clone(),
            status: t.status,
            priority: t.priority,
            due_date: to_bson_date(t.due_date),
            completed_at: t.completed_at.map(to_bson_date),
            is_auto_assigned: t.is_auto_assigned,
            created_at: to_bson_date(t.created_at),
            updated_at: to_bson_date(t.updated_at),
        }
    }
}

impl From<TaskDocument> for Task {
    fn from(d: TaskDocument) -> Self {
        Task {
            id: d.id,
            owner_id: d.owner_id,
            assignee_id: d.assignee_id,
            title: d.title,
            description: d.description,
            status: d.status,
            priority: d.priority,
            due_date: to_chrono(d.due_date),
            completed_at: d.completed_at.map(to_chrono),
            is_auto_assigned: d.is_auto_assigned,
            created_at: to_chrono(d.created_at),
            updated_at: to_chrono(d.updated_at),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct StaffDocument {
    #[serde(rename = "_id")]
    id: String,
    name: String,
    #[serde(default)]
    department: String,
    email: Option<String>,
    phone: Option<String>,
    #[serde(default = "default_available")]
    is_available: bool,
    current_task_id: Option<String>,
    created_at: BsonDateTime,
}

fn default_available() -> bool {
    true
}

impl From<StaffDocument> for Staff {
    fn from(d: StaffDocument) -> Self {
        Staff {
            id: d.id,
            name: d.name,
            department: d.department,
            email: d.email,
            phone: d.phone,
            is_available: d.is_available,
            current_task_id: d.current_task_id,
            created_at: to_chrono(d.created_at),
        }
    }
}

pub struct MongoStore {
    tasks: Collection<TaskDocument>,
    staff: Collection<StaffDocument>,
}

impl MongoStore {
    pub fn new(db: &Database) -> Self {
        MongoStore {
            tasks: db.collection::<TaskDocument>(TASKS),
            staff: db.collection::<StaffDocument>(STAFF),
        }
    }

    fn creation_order() -> Document {
        doc! { "created_at": 1, "_id": 1 }
    }

    async fn find_tasks(&self, filter: Document) -> StoreResult<Vec<Task>> {
        let docs: Vec<TaskDocument> = self
            .tasks
            .find(filter)
            .sort(Self::creation_order())
            .await?
            .try_collect()
            .await?;
        Ok(docs.into_iter().map(Task::from).collect())
    }

    async fn find_staff(&self, filter: Document) -> StoreResult<Vec<Staff>> {
        let docs: Vec<StaffDocument> = self
            .staff
            .find(filter)
            .sort(Self::creation_order())
            .await?
            .try_collect()
            .await?;
        Ok(docs.into_iter().map(Staff::from).collect())
    }
}

/// Tells a lost conditional update apart from a missing document.
fn conflict_or_missing(entity: &'static str, id: &str, exists: bool) -> StoreError {
    if exists {
        StoreError::Conflict { entity, id: id.to_string() }
    } else {
        StoreError::Missing { entity, id: id.to_string() }
    }
}

#[async_trait]
impl Store for MongoStore {
    async fn find_staff_by_id(&self, id: &str) -> StoreResult<Option<Staff>> {
        Ok(self.staff.find_one(doc! { "_id": id }).await?.map(Staff::from))
    }

    async fn find_all_staff(&self) -> StoreResult<Vec<Staff>> {
        self.find_staff(doc! {}).await
    }

    async fn find_available_staff(&self) -> StoreResult<Vec<Staff>> {
        self.find_staff(doc! { "is_available": true }).await
    }

    async fn find_task_by_id(&self, id: &str) -> StoreResult<Option<Task>> {
        Ok(self.tasks.find_one(doc! { "_id": id }).await?.map(Task::from))
    }

    async fn find_all_tasks(&self) -> StoreResult<Vec<Task>> {
        self.find_tasks(doc! {}).await
    }

    async fn find_tasks_for_staff(&self, staff_id: &str) -> StoreResult<Vec<Task>> {
        self.find_tasks(doc! { "assignee_id": staff_id }).await
    }

    async fn find_unassigned_tasks(&self) -> StoreResult<Vec<Task>> {
        self.find_tasks(doc! {
            "assignee_id": Bson::Null,
            "status": { "$ne": TaskStatus::Completed.as_str() },
        })
        .await
    }

    async fn find_overdue_tasks(&self, now: DateTime<Utc>) -> StoreResult<Vec<Task>> {
        self.find_tasks(doc! {
            "status": { "$ne": TaskStatus::Completed.as_str() },
            "due_date": { "$lt": to_bson_date(now) },
        })
        .await
    }

    async fn find_next_pending_task_for_staff(
        &self,
        staff_id: &str,
        exclude_task_id: &str,
    ) -> StoreResult<Option<Task>> {
        let next = self
            .tasks
            .find_one(doc! {
                "assignee_id": staff_id,
                "status": TaskStatus::Pending.as_str(),
                "_id": { "$ne": exclude_task_id },
            })
            .sort(Self::creation_order())
            .await?;
        Ok(next.map(Task::from))
    }

    async fn insert_tasks(&self, tasks: &[Task]) -> StoreResult<()> {
        if tasks.is_empty() {
            return Ok(());
        }
        ensure_distinct_ids(tasks)?;
        let ids: Vec<String> = tasks.iter().map(|t| t.id.clone()).collect();
        if let Some(existing) = self
            .tasks
            .find_one(doc! { "_id": { "$in": ids.clone() } })
            .await?
        {
            return Err(StoreError::Database(format!("Duplicate task id {}", existing.id)));
        }

        let docs: Vec<TaskDocument> = tasks.iter().map(TaskDocument::from).collect();
        if let Err(e) = self.tasks.insert_many(docs).await {
            // none of these ids existed before the insert, so every match is ours
            if let Err(cleanup) = self.delete_tasks(&ids).await {
                error!("Failed to roll back partial task batch: {}", cleanup);
            }
            return Err(e.into());
        }
        Ok(())
    }

    async fn delete_tasks(&self, ids: &[String]) -> StoreResult<()> {
        if ids.is_empty() {
            return Ok(());
        }
        self.tasks
            .delete_many(doc! { "_id": { "$in": ids.to_vec() } })
            .await?;
        Ok(())
    }

    async fn update_staff_assignment(
        &self,
        staff_id: &str,
        expected: Option<&str>,
        next: Option<&str>,
    ) -> StoreResult<Staff> {
        let filter = doc! {
            "_id": staff_id,
            "current_task_id": expected,
            "is_available": expected.is_none(),
        };
        let update = doc! {
            "$set": {
                "current_task_id": next,
                "is_available": next.is_none(),
            }
        };
        match self
            .staff
            .find_one_and_update(filter, update)
            .return_document(ReturnDocument::After)
            .await?
        {
            Some(updated) => Ok(updated.into()),
            None => {
                let exists = self.staff.find_one(doc! { "_id": staff_id }).await?.is_some();
                warn!("Conditional staff update lost for {}", staff_id);
                Err(conflict_or_missing("staff", staff_id, exists))
            }
        }
    }

    async fn update_task(&self, expected: &Task, next: &Task) -> StoreResult<Task> {
        let filter = doc! {
            "_id": &expected.id,
            "assignee_id": expected.assignee_id.as_deref(),
            "status": expected.status.as_str(),
        };
        let update = doc! {
            "$set": {
                "assignee_id": next.assignee_id.as_deref(),
                "status": next.status.as_str(),
                "completed_at": next.completed_at.map(to_bson_date),
                "due_date": to_bson_date(next.due_date),
                "is_auto_assigned": next.is_auto_assigned,
                "updated_at": to_bson_date(next.updated_at),
            }
        };
        match self
            .tasks
            .find_one_and_update(filter, update)
            .return_document(ReturnDocument::After)
            .await?
        {
            Some(updated) => Ok(updated.into()),
            None => {
                let exists = self.tasks.find_one(doc! { "_id": &expected.id }).await?.is_some();
                Err(conflict_or_missing("task", &expected.id, exists))
            }
        }
    }
}
