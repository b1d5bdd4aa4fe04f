pub mod staff;
pub mod task;

pub use staff::{Staff, StaffWithCurrentTask};
pub use task::{Priority, Task, TaskSpec, TaskStatus, TaskWithAssignee};
