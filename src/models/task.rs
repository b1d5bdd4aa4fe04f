use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle of a task. Declaration order is the forward order of the
/// state machine, so `Ord` tells whether a transition moves backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TaskStatus {
    #[serde(rename = "pending")]
    Pending,
    #[serde(rename = "in-progress")]
    InProgress,
    #[serde(rename = "completed")]
    Completed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in-progress",
            TaskStatus::Completed => "completed",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "in-progress" => Ok(TaskStatus::InProgress),
            "completed" => Ok(TaskStatus::Completed),
            other => Err(format!("Invalid status '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
        }
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Priority::Low),
            "medium" => Ok(Priority::Medium),
            "high" => Ok(Priority::High),
            other => Err(format!("Priority must be low, medium, or high (got '{}')", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub owner_id: Option<String>,
    pub assignee_id: Option<String>,
    pub title: String,
    pub description: String,
    pub status: TaskStatus,
    pub priority: Priority,
    pub due_date: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub is_auto_assigned: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// A fresh pending task due `due_in` from `now`.
    pub fn new(
        owner_id: Option<String>,
        assignee_id: Option<String>,
        spec: &TaskSpec,
        priority: Priority,
        now: DateTime<Utc>,
        due_in: Duration,
    ) -> Self {
        Task {
            id: Uuid::now_v7().to_string(),
            owner_id,
            assignee_id,
            title: spec.title.trim().to_string(),
            description: spec.description.trim().to_string(),
            status: TaskStatus::Pending,
            priority,
            due_date: now + due_in,
            completed_at: None,
            is_auto_assigned: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.status != TaskStatus::Completed && self.due_date < now
    }

    pub fn is_unassigned(&self) -> bool {
        self.assignee_id.is_none()
    }

    /// Key used wherever tasks are iterated "in creation order".
    pub fn order_key(&self) -> (DateTime<Utc>, &str) {
        (self.created_at, self.id.as_str())
    }
}

/// One entry of a bulk assignment request, as received from the caller.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TaskSpec {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub priority: String,
}

impl TaskSpec {
    /// Checks the required fields and returns the parsed priority.
    pub fn validate(&self, index: usize) -> Result<Priority, String> {
        if self.title.trim().is_empty() {
            return Err(format!("tasks[{}]: Title is required for each task", index));
        }
        if self.description.trim().is_empty() {
            return Err(format!("tasks[{}]: Description is required for each task", index));
        }
        self.priority
            .parse::<Priority>()
            .map_err(|e| format!("tasks[{}]: {}", index, e))
    }
}

/// A task together with its assignee's display name.
#[derive(Debug, Clone, Serialize)]
pub struct TaskWithAssignee {
    #[serde(flatten)]
    pub task: Task,
    pub assignee_name: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(title: &str, description: &str, priority: &str) -> TaskSpec {
        TaskSpec {
            title: title.to_string(),
            description: description.to_string(),
            priority: priority.to_string(),
        }
    }

    #[test]
    fn status_uses_hyphenated_wire_names() {
        assert_eq!(serde_json::to_string(&TaskStatus::InProgress).unwrap(), "\"in-progress\"");
        assert_eq!("in-progress".parse::<TaskStatus>().unwrap(), TaskStatus::InProgress);
        assert!("done".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn status_order_follows_lifecycle() {
        assert!(TaskStatus::Pending < TaskStatus::InProgress);
        assert!(TaskStatus::InProgress < TaskStatus::Completed);
    }

    #[test]
    fn validate_rejects_blank_fields_and_unknown_priority() {
        assert!(spec("", "d", "low").validate(0).is_err());
        assert!(spec("t", "   ", "low").validate(0).is_err());
        let err = spec("t", "d", "urgent").validate(3).unwrap_err();
        assert!(err.starts_with("tasks[3]"));
        assert_eq!(spec("t", "d", "high").validate(0).unwrap(), Priority::High);
    }

    #[test]
    fn overdue_ignores_completed_tasks() {
        let now = Utc::now();
        let mut task = Task::new(None, None, &spec("t", "d", "low"), Priority::Low, now, Duration::days(7));
        assert!(!task.is_overdue(now));
        task.due_date = now - Duration::minutes(1);
        assert!(task.is_overdue(now));
        task.status = TaskStatus::Completed;
        assert!(!task.is_overdue(now));
    }

    #[test]
    fn new_task_is_pending_and_due_after_window() {
        let now = Utc::now();
        let task = Task::new(
            Some("owner".into()),
            Some("staff".into()),
            &spec(" Fix pump ", "Replace seal", "medium"),
            Priority::Medium,
            now,
            Duration::days(7),
        );
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.title, "Fix pump");
        assert_eq!(task.due_date, now + Duration::days(7));
        assert!(!task.is_auto_assigned);
        assert!(task.completed_at.is_none());
    }
}
