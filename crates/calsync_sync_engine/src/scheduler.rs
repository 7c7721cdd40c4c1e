//! Trigger sources for sync passes.
//!
//! The scheduler owns no sync logic. It turns local writes (debounced),
//! a periodic timer and explicit requests into [`SyncCoordinator::request`]
//! calls on the blocking pool.

use crate::config::SyncConfig;
use crate::coordinator::SyncCoordinator;
use crate::engine::SyncTrigger;
use crate::transport::SyncTransport;
use calsync_core::{ChangeOrigin, StoreChange, Table};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

const FORWARD_POLL: Duration = Duration::from_millis(200);
const FAR_FUTURE: Duration = Duration::from_secs(365 * 24 * 60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Signal {
    LocalChange,
    SyncNow,
    Shutdown,
}

/// Background trigger loop for one coordinator.
pub struct SyncScheduler {
    signals: UnboundedSender<Signal>,
    task: JoinHandle<()>,
    forwarder: Option<thread::JoinHandle<()>>,
}

impl SyncScheduler {
    /// Starts the trigger loop on the current tokio runtime.
    ///
    /// `changes` is a store subscription; only local writes to events
    /// trigger a pass.
    pub fn spawn<T>(
        coordinator: Arc<SyncCoordinator<T>>,
        changes: Receiver<StoreChange>,
        config: &SyncConfig,
    ) -> Self
    where
        T: SyncTransport + 'static,
    {
        let (signals, receiver) = mpsc::unbounded_channel();
        let forwarder = spawn_forwarder(changes, signals.clone());
        let task = tokio::spawn(run_loop(
            coordinator,
            receiver,
            config.debounce,
            config.sync_interval,
        ));
        Self {
            signals,
            task,
            forwarder: Some(forwarder),
        }
    }

    /// Notes a local write, as if it came from the change feed.
    pub fn notify_local_change(&self) {
        send_signal(&self.signals, Signal::LocalChange);
    }

    /// Requests an immediate pass.
    pub fn sync_now(&self) {
        send_signal(&self.signals, Signal::SyncNow);
    }

    /// Stops the loop and waits for it. A running pass completes on the
    /// blocking pool.
    pub async fn shutdown(mut self) {
        send_signal(&self.signals, Signal::Shutdown);
        if let Err(err) = (&mut self.task).await {
            tracing::warn!(error = %err, "scheduler task ended abnormally");
        }
        if let Some(forwarder) = self.forwarder.take() {
            match tokio::task::spawn_blocking(move || forwarder.join()).await {
                Ok(Ok(())) => {}
                Ok(Err(_)) => tracing::warn!("change forwarder panicked"),
                Err(err) => tracing::warn!(error = %err, "change forwarder join failed"),
            }
        }
    }
}

/// Returns false if the loop has already stopped.
fn send_signal(signals: &UnboundedSender<Signal>, signal: Signal) -> bool {
    let delivered = signals.send(signal).is_ok();
    if !delivered {
        tracing::debug!(?signal, "scheduler stopped; signal dropped");
    }
    delivered
}

fn spawn_forwarder(
    changes: Receiver<StoreChange>,
    signals: UnboundedSender<Signal>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || loop {
        match changes.recv_timeout(FORWARD_POLL) {
            Ok(change) => {
                if triggers_sync(&change) && signals.send(Signal::LocalChange).is_err() {
                    return;
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                if signals.is_closed() {
                    return;
                }
            }
            Err(RecvTimeoutError::Disconnected) => return,
        }
    })
}

fn triggers_sync(change: &StoreChange) -> bool {
    change.origin == ChangeOrigin::Local && change.table == Table::Events
}

async fn run_loop<T: SyncTransport + 'static>(
    coordinator: Arc<SyncCoordinator<T>>,
    mut signals: UnboundedReceiver<Signal>,
    debounce: Duration,
    interval: Option<Duration>,
) {
    let mut ticker = time::interval(interval.unwrap_or(FAR_FUTURE));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    let deadline = time::sleep(FAR_FUTURE);
    tokio::pin!(deadline);
    let mut pending = false;

    loop {
        tokio::select! {
            signal = signals.recv() => match signal {
                Some(Signal::LocalChange) => {
                    deadline.as_mut().reset(Instant::now() + debounce);
                    pending = true;
                }
                Some(Signal::SyncNow) => dispatch(&coordinator, SyncTrigger::Manual),
                Some(Signal::Shutdown) | None => break,
            },
            () = &mut deadline, if pending => {
                pending = false;
                dispatch(&coordinator, SyncTrigger::LocalChange);
            }
            _ = ticker.tick(), if interval.is_some() => {
                dispatch(&coordinator, SyncTrigger::Interval);
            }
        }
    }
    tracing::debug!("sync scheduler stopped");
}

fn dispatch<T: SyncTransport + 'static>(coordinator: &Arc<SyncCoordinator<T>>, trigger: SyncTrigger) {
    let coordinator = Arc::clone(coordinator);
    tokio::task::spawn_blocking(move || match coordinator.request(trigger) {
        Ok(Some(summary)) => {
            tracing::trace!(?trigger, passes = summary.passes.len(), "trigger handled");
        }
        Ok(None) => {}
        Err(err) => tracing::warn!(?trigger, error = %err, "triggered pass failed"),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use calsync_core::ChangeKind;

    fn change(table: Table, origin: ChangeOrigin) -> StoreChange {
        StoreChange {
            sequence: 1,
            table,
            key: "k".into(),
            kind: ChangeKind::Put,
            origin,
        }
    }

    #[test]
    fn signals_after_stop_are_dropped() {
        let (signals, mut receiver) = mpsc::unbounded_channel();
        assert!(send_signal(&signals, Signal::SyncNow));
        assert_eq!(receiver.try_recv().unwrap(), Signal::SyncNow);
        drop(receiver);
        assert!(!send_signal(&signals, Signal::LocalChange));
    }

    #[test]
    fn only_local_event_writes_trigger() {
        assert!(triggers_sync(&change(Table::Events, ChangeOrigin::Local)));
        assert!(!triggers_sync(&change(Table::Events, ChangeOrigin::Sync)));
        assert!(!triggers_sync(&change(Table::Drafts, ChangeOrigin::Local)));
        assert!(!triggers_sync(&change(Table::CalendarMetadata, ChangeOrigin::Sync)));
    }
}
