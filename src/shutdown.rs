//! Graceful shutdown gated on in-flight operations.
//!
//! States move one way: Running -> Draining -> Terminated.  A termination
//! signal starts the drain and stops the listener; the coordinator then
//! polls the operation counter and finishes as soon as it reads zero, or
//! gives up once the drain deadline passes.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::config::ShutdownConfig;
use crate::operations::OperationCounter;

/// Lifecycle state of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownState {
    /// Serving normally.
    Running,
    /// Listener stopped, waiting for in-flight operations.
    Draining,
    /// Drain finished (cleanly or not); the process is about to exit.
    Terminated,
}

/// How a drain ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// The counter reached zero.
    Drained,
    /// The deadline passed with operations still in flight.
    TimedOut { remaining: u64 },
}

impl DrainOutcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            DrainOutcome::Drained => 0,
            DrainOutcome::TimedOut { .. } => 1,
        }
    }
}

/// What to do with an uncaught fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultDisposition {
    /// Nothing in flight: exit immediately.
    Exit,
    /// Operations in flight: log and keep serving them.
    KeepAlive,
}

pub fn fault_disposition(active_operations: u64) -> FaultDisposition {
    if active_operations == 0 {
        FaultDisposition::Exit
    } else {
        FaultDisposition::KeepAlive
    }
}

/// Drives the Running -> Draining -> Terminated state machine.
pub struct ShutdownCoordinator {
    counter: Arc<dyn OperationCounter>,
    poll_interval: Duration,
    max_drain: Duration,
    state: watch::Sender<ShutdownState>,
}

impl ShutdownCoordinator {
    pub fn new(counter: Arc<dyn OperationCounter>, poll_interval: Duration, max_drain: Duration) -> Self {
        let (state, _) = watch::channel(ShutdownState::Running);
        Self {
            counter,
            poll_interval,
            max_drain,
            state,
        }
    }

    pub fn from_config(counter: Arc<dyn OperationCounter>, config: &ShutdownConfig) -> Self {
        Self::new(
            counter,
            Duration::from_secs(config.poll_interval_secs.max(1)),
            Duration::from_secs(config.max_drain_secs),
        )
    }

    pub fn state(&self) -> ShutdownState {
        *self.state.borrow()
    }

    pub fn is_running(&self) -> bool {
        self.state() == ShutdownState::Running
    }

    /// Running -> Draining.  Returns false if shutdown had already begun.
    pub fn begin_drain(&self) -> bool {
        let started = self.state.send_if_modified(|state| {
            if *state == ShutdownState::Running {
                *state = ShutdownState::Draining;
                true
            } else {
                false
            }
        });
        if started {
            info!(
                "Shutdown requested: draining {} active operations",
                self.counter.current()
            );
        }
        started
    }

    /// Resolves once shutdown has begun.  Used to stop the listener.
    pub async fn draining(&self) {
        let mut rx = self.state.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = rx.wait_for(|state| *state != ShutdownState::Running).await;
    }

    /// Wait for in-flight operations, rechecking every poll interval, until
    /// the counter reads zero or the drain deadline passes.
    pub async fn drain(&self) -> DrainOutcome {
        self.begin_drain();
        let started = Instant::now();

        loop {
            let active = self.counter.current();
            if active == 0 {
                self.state.send_replace(ShutdownState::Terminated);
                info!("All operations finished after {:?}", started.elapsed());
                return DrainOutcome::Drained;
            }

            let elapsed = started.elapsed();
            if elapsed >= self.max_drain {
                self.state.send_replace(ShutdownState::Terminated);
                error!(
                    "Drain deadline of {:?} passed with {} operations still active; forcing exit",
                    self.max_drain, active
                );
                return DrainOutcome::TimedOut { remaining: active };
            }

            info!("Waiting for {} active operations before exit", active);
            tokio::time::sleep(self.poll_interval.min(self.max_drain - elapsed)).await;
        }
    }
}

/// Apply [`fault_disposition`] to the live operation count, calling `exit`
/// with the failure code when nothing is in flight.
pub fn handle_fault(
    counter: &dyn OperationCounter,
    detail: &dyn std::fmt::Display,
    exit: impl FnOnce(i32),
) -> FaultDisposition {
    let active = counter.current();
    let disposition = fault_disposition(active);
    match disposition {
        FaultDisposition::Exit => {
            error!("Uncaught fault with no active operations, exiting: {}", detail);
            exit(1);
        }
        FaultDisposition::KeepAlive => {
            warn!(
                "Uncaught fault with {} active operations, staying up: {}",
                active, detail
            );
        }
    }
    disposition
}

/// Route uncaught panics through [`handle_fault`].
pub fn install_panic_hook(counter: Arc<dyn OperationCounter>) {
    std::panic::set_hook(Box::new(move |info| {
        handle_fault(counter.as_ref(), info, |code| std::process::exit(code));
    }));
}
