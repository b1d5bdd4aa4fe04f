use crate::engine::AssignmentEngine;
use crate::scheduler::ReconciliationScheduler;
use actix::Addr;

#[derive(Clone)]
pub struct AppState {
    pub engine: AssignmentEngine,
    pub scheduler: Addr<ReconciliationScheduler>,
}
