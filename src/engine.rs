// src/engine.rs

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use log::{debug, error, info, warn};
use serde::Serialize;

use crate::error::{EngineError, EngineResult, MatchError, StoreError};
use crate::matcher::Matcher;
use crate::models::{
    Staff, StaffWithCurrentTask, Task, TaskSpec, TaskStatus, TaskWithAssignee,
};
use crate::store::Store;

#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// How far in the future a new or recovered task is due.
    pub task_due_window: Duration,
    /// Upper bound for a single matcher call.
    pub matcher_timeout: StdDuration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        EngineSettings {
            task_due_window: Duration::days(7),
            matcher_timeout: StdDuration::from_secs(5),
        }
    }
}

/// One staff member paired with one task by an auto-assignment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Pairing {
    pub staff_id: String,
    pub task_id: String,
}

#[derive(Debug, Default, Serialize)]
pub struct SweepReport {
    /// Overdue tasks put back into the pool.
    pub recovered: Vec<String>,
    /// Pairings made by the auto-assignment that follows the sweep.
    pub pairings: Vec<Pairing>,
}

/// Decides who works on what.
///
/// Every write to a staff member's availability or to a task's assignee and
/// status goes through a conditional store update, so concurrent callers
/// (request handlers and the scheduler) can never both win the same staff
/// member or the same task. A lost race shows up as
/// [`StoreError::Conflict`] and is either retried against the rest of the pool
/// or reported.
#[derive(Clone)]
pub struct AssignmentEngine {
    store: Arc<dyn Store>,
    matcher: Arc<dyn Matcher>,
    settings: EngineSettings,
}

impl AssignmentEngine {
    pub fn new(store: Arc<dyn Store>, matcher: Arc<dyn Matcher>, settings: EngineSettings) -> Self {
        AssignmentEngine { store, matcher, settings }
    }

    // ─── MANUAL ASSIGNMENT ───────────────────────────────────────────────────

    /// Creates one pending task per spec for `staff_id` and makes the first one
    /// the staff member's current task.
    ///
    /// Nothing is written unless every spec is valid. If the staff member is
    /// already busy the new tasks queue behind the current one.
    pub async fn assign_tasks(
        &self,
        requester_id: &str,
        staff_id: &str,
        specs: &[TaskSpec],
    ) -> EngineResult<Vec<Task>> {
        // 1) Validate the whole batch up front
        if staff_id.trim().is_empty() {
            return Err(EngineError::Validation("Staff ID is required".into()));
        }
        if specs.is_empty() {
            return Err(EngineError::Validation("Tasks must be a non-empty array".into()));
        }
        let priorities = specs
            .iter()
            .enumerate()
            .map(|(i, spec)| spec.validate(i))
            .collect::<Result<Vec<_>, _>>()
            .map_err(EngineError::Validation)?;

        // 2) Staff must exist
        let staff = self
            .store
            .find_staff_by_id(staff_id)
            .await?
            .ok_or_else(|| EngineError::NotFound("Staff member not found".into()))?;

        // 3) Persist the batch
        let now = Utc::now();
        let owner = (!requester_id.is_empty()).then(|| requester_id.to_string());
        let tasks: Vec<Task> = specs
            .iter()
            .zip(priorities)
            .map(|(spec, priority)| {
                Task::new(
                    owner.clone(),
                    Some(staff.id.clone()),
                    spec,
                    priority,
                    now,
                    self.settings.task_due_window,
                )
            })
            .collect();
        self.store.insert_tasks(&tasks).await?;
        info!("Created {} task(s) for staff {}", tasks.len(), staff.id);

        // 4) First task becomes current, unless the staff member is busy
        let first = &tasks[0];
        if !staff.is_available {
            info!(
                "Staff {} is busy with {:?}; new tasks queued",
                staff.id, staff.current_task_id
            );
            return Ok(tasks);
        }
        match self
            .store
            .update_staff_assignment(&staff.id, None, Some(&first.id))
            .await
        {
            Ok(_) => {
                info!("Task {} is now current for staff {}", first.id, staff.id);
                Ok(tasks)
            }
            Err(StoreError::Conflict { .. }) => {
                info!("Staff {} was claimed concurrently; new tasks queued", staff.id);
                Ok(tasks)
            }
            Err(e) => {
                error!("Failed to update staff {}: {}", staff.id, e);
                let ids: Vec<String> = tasks.iter().map(|t| t.id.clone()).collect();
                if let Err(cleanup) = self.store.delete_tasks(&ids).await {
                    error!("Failed to roll back task batch for {}: {}", staff.id, cleanup);
                }
                Err(e.into())
            }
        }
    }

    // ─── STATUS TRANSITIONS ──────────────────────────────────────────────────

    /// Moves a task forward through `pending → in-progress → completed`.
    ///
    /// Completing a staff member's current task promotes their oldest queued
    /// task, or frees them and pulls one from the unassigned pool.
    pub async fn update_status(&self, task_id: &str, status: &str) -> EngineResult<Task> {
        let new_status = status.parse::<TaskStatus>().map_err(EngineError::Validation)?;
        let task = self
            .store
            .find_task_by_id(task_id)
            .await?
            .ok_or_else(|| EngineError::NotFound("Task not found".into()))?;

        if task.status == new_status {
            return Ok(task);
        }
        if new_status < task.status {
            return Err(EngineError::Validation(format!(
                "Cannot move task from {} back to {}",
                task.status, new_status
            )));
        }

        if new_status == TaskStatus::InProgress {
            self.ensure_not_queued(&task).await?;
        }

        let now = Utc::now();
        let mut next = task.clone();
        next.status = new_status;
        next.updated_at = now;
        if new_status == TaskStatus::Completed {
            next.completed_at = Some(now);
        }
        let updated = self.store.update_task(&task, &next).await?;
        info!("Task {} moved {} -> {}", task.id, task.status, new_status);

        if new_status == TaskStatus::Completed {
            if let Err(e) = self.promote_next(&updated).await {
                error!("Promotion after completing {} failed: {}", updated.id, e);
                if let Err(undo) = self.store.update_task(&updated, &task).await {
                    error!("Failed to revert completion of {}: {}", task.id, undo);
                }
                return Err(e);
            }
        }
        Ok(updated)
    }

    /// An assigned task may only start once it is its assignee's current task.
    async fn ensure_not_queued(&self, task: &Task) -> EngineResult<()> {
        let Some(staff_id) = task.assignee_id.as_deref() else {
            return Ok(());
        };
        match self.store.find_staff_by_id(staff_id).await? {
            Some(staff) if staff.current_task_id.as_deref() != Some(task.id.as_str()) => {
                Err(EngineError::Validation(format!(
                    "Task {} is queued behind the current task of staff {}",
                    task.id, staff.id
                )))
            }
            _ => Ok(()),
        }
    }

    /// Hands the assignee of a just-completed task their next piece of work.
    async fn promote_next(&self, completed: &Task) -> EngineResult<()> {
        let Some(staff_id) = completed.assignee_id.as_deref() else {
            return Ok(());
        };
        let Some(staff) = self.store.find_staff_by_id(staff_id).await? else {
            warn!("Assignee {} of task {} no longer exists", staff_id, completed.id);
            return Ok(());
        };

        let holds_completed = staff.current_task_id.as_deref() == Some(completed.id.as_str());
        if !holds_completed && !staff.is_available {
            debug!(
                "Staff {} is working on {:?}; completing {} changes nothing",
                staff.id, staff.current_task_id, completed.id
            );
            return Ok(());
        }
        let expected = staff.current_task_id.as_deref();

        while let Some(next) = self
            .store
            .find_next_pending_task_for_staff(&staff.id, &completed.id)
            .await?
        {
            let mut started = next.clone();
            started.status = TaskStatus::InProgress;
            started.updated_at = Utc::now();
            match self.store.update_task(&next, &started).await {
                Ok(_) => {}
                Err(StoreError::Conflict { .. }) | Err(StoreError::Missing { .. }) => {
                    debug!("Queued task {} changed underneath; looking again", next.id);
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
            if let Err(e) = self
                .store
                .update_staff_assignment(&staff.id, expected, Some(&next.id))
                .await
            {
                if let Err(undo) = self.store.update_task(&started, &next).await {
                    error!("Failed to revert start of {}: {}", next.id, undo);
                }
                return Err(e.into());
            }
            info!("Promoted task {} for staff {}", next.id, staff.id);
            return Ok(());
        }

        let freed = if holds_completed {
            self.store
                .update_staff_assignment(&staff.id, Some(&completed.id), None)
                .await?
        } else {
            staff
        };
        info!("Staff {} is available; pulling from the unassigned pool", freed.id);
        self.assign_new_task_to_staff(&freed).await;
        Ok(())
    }

    // ─── AUTO ASSIGNMENT ─────────────────────────────────────────────────────

    /// One greedy pass pairing available staff with unassigned tasks.
    ///
    /// Staff are taken in creation order and each gets the matcher's pick of
    /// what is still left. Errors are logged, never returned.
    pub async fn auto_assign(&self) -> Vec<Pairing> {
        match self.run_auto_assign().await {
            Ok(pairings) => {
                if pairings.is_empty() {
                    debug!("Auto-assignment made no pairings");
                } else {
                    info!("Auto-assigned {} task(s)", pairings.len());
                }
                pairings
            }
            Err(e) => {
                error!("Error in auto-assigning tasks: {}", e);
                Vec::new()
            }
        }
    }

    async fn run_auto_assign(&self) -> EngineResult<Vec<Pairing>> {
        let available = self.store.find_available_staff().await?;
        let mut pool = self.store.find_unassigned_tasks().await?;
        let mut pairings = Vec::new();

        for staff in &available {
            if pool.is_empty() {
                break;
            }
            match self.assign_from_pool(staff, &mut pool).await {
                Ok(Some(pairing)) => pairings.push(pairing),
                Ok(None) => {}
                Err(e) => warn!("Skipping staff {} in this pass: {}", staff.id, e),
            }
        }
        Ok(pairings)
    }

    /// Single-staff variant used right after a staff member frees up: only
    /// unassigned tasks that are still `pending` are considered.
    async fn assign_new_task_to_staff(&self, staff: &Staff) -> Option<Pairing> {
        let mut pool = match self.store.find_unassigned_tasks().await {
            Ok(tasks) => tasks
                .into_iter()
                .filter(|t| t.status == TaskStatus::Pending)
                .collect::<Vec<_>>(),
            Err(e) => {
                error!("Error in assigning new task to staff {}: {}", staff.id, e);
                return None;
            }
        };
        match self.assign_from_pool(staff, &mut pool).await {
            Ok(Some(pairing)) => {
                info!("New task {} assigned to staff {}", pairing.task_id, staff.id);
                Some(pairing)
            }
            Ok(None) => {
                info!("No unassigned tasks available for staff {}", staff.id);
                None
            }
            Err(e) => {
                error!("Error in assigning new task to staff {}: {}", staff.id, e);
                None
            }
        }
    }

    /// Claims the matcher's pick from `pool` for `staff`.
    ///
    /// The chosen task leaves `pool` whether or not the claim succeeds, unless
    /// the staff member turns out to be taken, in which case the task is
    /// released and returned to the pool for the next staff member.
    async fn assign_from_pool(&self, staff: &Staff, pool: &mut Vec<Task>) -> EngineResult<Option<Pairing>> {
        loop {
            let Some(idx) = self.select(staff, pool).await else {
                return Ok(None);
            };
            let task = pool.remove(idx);

            let mut claimed = task.clone();
            claimed.assignee_id = Some(staff.id.clone());
            claimed.is_auto_assigned = true;
            claimed.status = TaskStatus::InProgress;
            claimed.updated_at = Utc::now();
            match self.store.update_task(&task, &claimed).await {
                Ok(_) => {}
                Err(StoreError::Conflict { .. }) | Err(StoreError::Missing { .. }) => {
                    debug!("Task {} was taken by another pass", task.id);
                    continue;
                }
                Err(e) => {
                    pool.insert(idx, task);
                    return Err(e.into());
                }
            }

            match self
                .store
                .update_staff_assignment(&staff.id, None, Some(&task.id))
                .await
            {
                Ok(_) => {
                    return Ok(Some(Pairing {
                        staff_id: staff.id.clone(),
                        task_id: task.id.clone(),
                    }))
                }
                Err(e) => {
                    if let Err(undo) = self.store.update_task(&claimed, &task).await {
                        error!("Failed to release task {}: {}", task.id, undo);
                    }
                    pool.insert(idx, task);
                    return match e {
                        StoreError::Conflict { .. } => {
                            debug!("Staff {} was claimed by another pass", staff.id);
                            Ok(None)
                        }
                        other => Err(other.into()),
                    };
                }
            }
        }
    }

    /// Asks the matcher, bounded by the configured timeout. Any failure falls
    /// back to the head of the pool.
    async fn select(&self, staff: &Staff, pool: &[Task]) -> Option<usize> {
        if pool.is_empty() {
            return None;
        }
        let timeout = self.settings.matcher_timeout;
        let outcome = tokio::time::timeout(timeout, self.matcher.select_best(staff, pool))
            .await
            .unwrap_or(Err(MatchError::Timeout(timeout)));
        match outcome {
            Ok(Some(idx)) if idx < pool.len() => Some(idx),
            Ok(Some(idx)) => {
                warn!(
                    "Matcher {} picked index {} from a pool of {}; using first in pool",
                    self.matcher.name(),
                    idx,
                    pool.len()
                );
                Some(0)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(
                    "Matcher {} failed for staff {}: {}; using first in pool",
                    self.matcher.name(),
                    staff.id,
                    e
                );
                Some(0)
            }
        }
    }

    // ─── RECONCILIATION ──────────────────────────────────────────────────────

    /// Puts every overdue task back into the pool, frees whoever was holding
    /// it, and then runs one auto-assignment pass.
    pub async fn check_task_status(&self) -> SweepReport {
        let now = Utc::now();
        let overdue = match self.store.find_overdue_tasks(now).await {
            Ok(tasks) => tasks,
            Err(e) => {
                error!("Error in checking task status: {}", e);
                Vec::new()
            }
        };

        let mut recovered = Vec::new();
        for task in &overdue {
            match self.recover_overdue(task, now).await {
                Ok(()) => recovered.push(task.id.clone()),
                Err(e) => warn!("Could not recover overdue task {}: {}", task.id, e),
            }
        }
        if !recovered.is_empty() {
            info!("Recovered {} overdue task(s)", recovered.len());
        }

        let pairings = self.auto_assign().await;
        SweepReport { recovered, pairings }
    }

    /// Frees the holder of an overdue task, then puts the task back in the pool.
    ///
    /// The staff write goes first so the task never reaches the pool while a
    /// staff member still holds it as current.
    async fn recover_overdue(&self, task: &Task, now: DateTime<Utc>) -> EngineResult<()> {
        let mut freed = None;
        if let Some(staff_id) = task.assignee_id.as_deref() {
            match self
                .store
                .update_staff_assignment(staff_id, Some(&task.id), None)
                .await
            {
                Ok(_) => freed = Some(staff_id),
                // claimed or promoted but not yet current; the next sweep sees it settled
                Err(e @ StoreError::Conflict { .. }) if task.status == TaskStatus::InProgress => {
                    return Err(e.into())
                }
                // queued behind another task, or the staff record is gone
                Err(StoreError::Conflict { .. }) | Err(StoreError::Missing { .. }) => {}
                Err(e) => return Err(e.into()),
            }
        }

        let mut reset = task.clone();
        reset.assignee_id = None;
        reset.is_auto_assigned = false;
        reset.due_date = now + self.settings.task_due_window;
        reset.updated_at = now;
        if reset.status == TaskStatus::InProgress {
            reset.status = TaskStatus::Pending;
        }
        if let Err(e) = self.store.update_task(task, &reset).await {
            if let Some(staff_id) = freed {
                self.restore_holder(staff_id, &task.id).await;
            }
            return Err(e.into());
        }

        if let Some(staff_id) = freed {
            info!("Freed staff {} from overdue task {}", staff_id, task.id);
        }
        Ok(())
    }

    /// Hands a task back to the staff member a failed recovery freed, unless
    /// the task has since moved on to someone else or been completed.
    async fn restore_holder(&self, staff_id: &str, task_id: &str) {
        let still_theirs = match self.store.find_task_by_id(task_id).await {
            Ok(Some(t)) => {
                t.assignee_id.as_deref() == Some(staff_id) && t.status != TaskStatus::Completed
            }
            Ok(None) => false,
            Err(e) => {
                error!("Could not re-read task {} to restore staff {}: {}", task_id, staff_id, e);
                return;
            }
        };
        if !still_theirs {
            debug!("Task {} moved on; staff {} stays available", task_id, staff_id);
            return;
        }
        if let Err(e) = self
            .store
            .update_staff_assignment(staff_id, None, Some(task_id))
            .await
        {
            error!("Failed to restore staff {} to task {}: {}", staff_id, task_id, e);
        }
    }

    // ─── READS ───────────────────────────────────────────────────────────────

    pub async fn get_staff_tasks(&self, staff_id: &str) -> EngineResult<Vec<Task>> {
        Ok(self.store.find_tasks_for_staff(staff_id).await?)
    }

    pub async fn get_all_tasks(&self) -> EngineResult<Vec<TaskWithAssignee>> {
        let names: HashMap<String, String> = self
            .store
            .find_all_staff()
            .await?
            .into_iter()
            .map(|s| (s.id, s.name))
            .collect();
        let tasks = self.store.find_all_tasks().await?;
        Ok(tasks
            .into_iter()
            .map(|task| {
                let assignee_name = task
                    .assignee_id
                    .as_ref()
                    .and_then(|id| names.get(id))
                    .cloned();
                TaskWithAssignee { task, assignee_name }
            })
            .collect())
    }

    pub async fn get_staff_details(&self) -> EngineResult<Vec<StaffWithCurrentTask>> {
        let mut tasks: HashMap<String, Task> = self
            .store
            .find_all_tasks()
            .await?
            .into_iter()
            .map(|t| (t.id.clone(), t))
            .collect();
        let staff = self.store.find_all_staff().await?;
        Ok(staff
            .into_iter()
            .map(|staff| {
                let current_task = staff
                    .current_task_id
                    .as_ref()
                    .and_then(|id| tasks.remove(id));
                StaffWithCurrentTask { staff, current_task }
            })
            .collect())
    }
}
