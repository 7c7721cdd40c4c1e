//! Single-flight coordination of sync passes.
//!
//! ```text
//! Idle ──trigger──▶ Running ──done──▶ Idle
//!                     │  ▲
//!            trigger  │  │ done
//!                     ▼  │
//!                 RerunQueued
//! ```
//!
//! Passes for one calendar never overlap. A trigger that arrives while a
//! pass runs is not dropped: it leaves a rerun request on the lock and the
//! running pass performs exactly one more pass before releasing it.

use crate::engine::{PassOutcome, SyncEngine, SyncTrigger};
use crate::error::SyncResult;
use crate::lock::LockManager;
use crate::transport::SyncTransport;
use std::sync::Arc;

/// Coordinator state, derived from the lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    /// No pass is running.
    Idle,
    /// A pass is running.
    Running,
    /// A pass is running and another will follow.
    RerunQueued,
}

/// Passes run for one accepted trigger.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    /// Outcome of every pass, in order.
    pub passes: Vec<PassOutcome>,
}

impl RunSummary {
    /// Total events pushed.
    pub fn pushed(&self) -> usize {
        self.passes.iter().map(|p| p.pushed).sum()
    }

    /// Total remote events applied.
    pub fn pulled(&self) -> usize {
        self.passes.iter().map(|p| p.pulled).sum()
    }

    /// Passes started because of a deferred trigger.
    pub fn reruns(&self) -> usize {
        self.passes
            .iter()
            .filter(|p| p.trigger == SyncTrigger::Rerun)
            .count()
    }
}

/// Serializes passes of one engine through a named lock.
pub struct SyncCoordinator<T: SyncTransport> {
    engine: SyncEngine<T>,
    locks: Arc<LockManager>,
}

impl<T: SyncTransport> SyncCoordinator<T> {
    /// Creates a coordinator. Coordinators sharing `locks` and a lock name
    /// exclude each other.
    pub fn new(engine: SyncEngine<T>, locks: Arc<LockManager>) -> Self {
        Self { engine, locks }
    }

    /// Returns the engine.
    pub fn engine(&self) -> &SyncEngine<T> {
        &self.engine
    }

    /// Returns the current state.
    pub fn state(&self) -> CoordinatorState {
        let name = &self.engine.config().lock_name;
        if !self.locks.is_held(name) {
            CoordinatorState::Idle
        } else if self.locks.rerun_requested(name) {
            CoordinatorState::RerunQueued
        } else {
            CoordinatorState::Running
        }
    }

    /// Clears a stale lock for this calendar, then runs a pass.
    pub fn startup(&self) -> SyncResult<Option<RunSummary>> {
        self.locks.steal(&self.engine.config().lock_name);
        self.request(SyncTrigger::Startup)
    }

    /// Requests a pass.
    ///
    /// Blocks while passes run. Returns `Ok(None)` if another caller holds
    /// the lock; that caller will run one more pass on this request's
    /// behalf, even if its own pass fails. An error is returned only when
    /// the last pass of the run failed.
    pub fn request(&self, trigger: SyncTrigger) -> SyncResult<Option<RunSummary>> {
        let config = self.engine.config();
        let Some(mut guard) = self
            .locks
            .acquire_or_defer(&config.lock_name, config.lock_timeout)
        else {
            tracing::debug!(?trigger, "pass already running; deferred");
            return Ok(None);
        };

        let mut summary = RunSummary::default();
        let mut trigger = trigger;
        let mut followups = 0;
        loop {
            let outcome = match self.engine.run_pass(trigger) {
                Ok(outcome) => outcome,
                Err(err) => match guard.finish() {
                    Some(next) => {
                        tracing::warn!(?trigger, error = %err, "pass failed; running deferred rerun");
                        guard = next;
                        trigger = SyncTrigger::Rerun;
                        continue;
                    }
                    None => return Err(err),
                },
            };
            let more = outcome.more_pending;
            summary.passes.push(outcome);

            if more && followups < config.max_followup_passes {
                followups += 1;
                trigger = SyncTrigger::Backlog;
                continue;
            }
            match guard.finish() {
                Some(next) => {
                    guard = next;
                    trigger = SyncTrigger::Rerun;
                }
                None => break,
            }
        }
        Ok(Some(summary))
    }
}
