use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::task::Task;

/// A staff member. Profile fields are owned by the employee-management side;
/// `is_available` and `current_task_id` only ever change through the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Staff {
    pub id: String,
    pub name: String,
    pub department: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    pub is_available: bool,
    pub current_task_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Staff {
    pub fn order_key(&self) -> (DateTime<Utc>, &str) {
        (self.created_at, self.id.as_str())
    }
}

/// A staff member with the current task resolved.
#[derive(Debug, Clone, Serialize)]
pub struct StaffWithCurrentTask {
    #[serde(flatten)]
    pub staff: Staff,
    pub current_task: Option<Task>,
}
