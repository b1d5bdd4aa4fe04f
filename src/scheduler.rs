// src/scheduler.rs

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use actix::prelude::*;
use log::{debug, info};

use crate::engine::{AssignmentEngine, Pairing, SweepReport};

/// Run the overdue sweep (followed by an auto-assignment pass) now.
#[derive(Message)]
#[rtype(result = "SweepReport")]
pub struct RunOverdueSweep;

/// Run one auto-assignment pass now.
#[derive(Message)]
#[rtype(result = "Vec<Pairing>")]
pub struct RunAutoAssign;

/// Drives the engine's periodic work.
///
/// Two timers: a short one for the overdue sweep and a long catch-all one for
/// auto-assignment. A tick is dropped if the previous run of the same job is
/// still going. Manual triggers arrive as messages and always run.
pub struct ReconciliationScheduler {
    engine: AssignmentEngine,
    overdue_sweep_interval: Duration,
    auto_assign_interval: Duration,
    sweep_running: Arc<AtomicBool>,
    assign_running: Arc<AtomicBool>,
}

impl ReconciliationScheduler {
    pub fn new(
        engine: AssignmentEngine,
        overdue_sweep_interval: Duration,
        auto_assign_interval: Duration,
    ) -> Self {
        ReconciliationScheduler {
            engine,
            overdue_sweep_interval,
            auto_assign_interval,
            sweep_running: Arc::new(AtomicBool::new(false)),
            assign_running: Arc::new(AtomicBool::new(false)),
        }
    }

    fn tick_sweep(&self) {
        if self.sweep_running.swap(true, Ordering::AcqRel) {
            debug!("Overdue sweep still running; skipping tick");
            return;
        }
        let engine = self.engine.clone();
        let running = self.sweep_running.clone();
        actix::spawn(async move {
            info!("Checking task status");
            engine.check_task_status().await;
            running.store(false, Ordering::Release);
        });
    }

    fn tick_auto_assign(&self) {
        if self.assign_running.swap(true, Ordering::AcqRel) {
            debug!("Auto-assignment still running; skipping tick");
            return;
        }
        let engine = self.engine.clone();
        let running = self.assign_running.clone();
        actix::spawn(async move {
            info!("Running scheduled auto task assignment");
            engine.auto_assign().await;
            running.store(false, Ordering::Release);
        });
    }
}

impl Actor for ReconciliationScheduler {
    type Context = Context<Self>;

    fn started(&mut self, ctx: &mut Context<Self>) {
        info!(
            "Reconciliation scheduler started (sweep every {:?}, auto-assign every {:?})",
            self.overdue_sweep_interval, self.auto_assign_interval
        );
        ctx.run_interval(self.overdue_sweep_interval, |act, _| act.tick_sweep());
        ctx.run_interval(self.auto_assign_interval, |act, _| act.tick_auto_assign());
    }
}

impl Handler<RunOverdueSweep> for ReconciliationScheduler {
    type Result = ResponseFuture<SweepReport>;

    fn handle(&mut self, _: RunOverdueSweep, _: &mut Context<Self>) -> Self::Result {
        let engine = self.engine.clone();
        Box::pin(async move { engine.check_task_status().await })
    }
}

impl Handler<RunAutoAssign> for ReconciliationScheduler {
    type Result = ResponseFuture<Vec<Pairing>>;

    fn handle(&mut self, _: RunAutoAssign, _: &mut Context<Self>) -> Self::Result {
        let engine = self.engine.clone();
        Box::pin(async move { engine.auto_assign().await })
    }
}
