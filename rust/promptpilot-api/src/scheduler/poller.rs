//! Timer-driven poll loop.
//!
//! The poller owns its loop task: created stopped, `start` spawns one
//! tokio task that runs an execution cycle immediately and then once per
//! interval, `stop` signals shutdown and waits for any in-flight cycle to
//! finish. A cycle that overruns the interval delays the next tick
//! rather than overlapping it.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::PromptExecutor;

/// Background poller for due schedules.
#[derive(Debug)]
pub struct PromptPoller {
    executor: Arc<PromptExecutor>,
    poll_interval: Duration,
    state: Mutex<PollerState>,
}

#[derive(Debug, Default)]
struct PollerState {
    running: bool,
    handle: Option<JoinHandle<()>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl PromptPoller {
    #[must_use]
    pub fn new(executor: Arc<PromptExecutor>, poll_interval: Duration) -> Self {
        Self {
            executor,
            poll_interval,
            state: Mutex::new(PollerState::default()),
        }
    }

    /// Starts the loop. Returns `false` if it was already running.
    pub fn start(&self) -> bool {
        let mut state = self.state.lock();
        if state.running {
            return false;
        }

        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        let executor = Arc::clone(&self.executor);
        let poll_interval = self.poll_interval;

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(poll_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = &mut shutdown_rx => {
                        tracing::info!("Prompt poller shutting down");
                        break;
                    }
                    _ = interval.tick() => {
                        let outcome = executor.run_cycle().await;
                        if outcome.executed > 0 || outcome.failed > 0 {
                            tracing::info!(
                                executed = outcome.executed,
                                failed = outcome.failed,
                                "Poll cycle finished"
                            );
                        }
                    }
                }
            }
        });

        state.running = true;
        state.handle = Some(handle);
        state.shutdown_tx = Some(shutdown_tx);
        tracing::info!(
            "Prompt poller started (interval {}s)",
            self.poll_interval.as_secs()
        );
        true
    }

    /// Stops the loop and waits for any in-flight cycle to finish. Safe
    /// to call repeatedly; returns `false` if it was not running.
    pub async fn stop(&self) -> bool {
        let (shutdown_tx, handle) = {
            let mut state = self.state.lock();
            if !state.running {
                return false;
            }
            state.running = false;
            (state.shutdown_tx.take(), state.handle.take())
        };

        if let Some(tx) = shutdown_tx {
            let _ = tx.send(());
        }
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                tracing::warn!("Poller task ended abnormally: {}", err);
            }
        }
        true
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state.lock().running
    }

    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }
}
