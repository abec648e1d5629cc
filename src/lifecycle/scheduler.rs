// Background tick loop for a shared engine

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::lifecycle::engine::FederatedEngine;
use crate::reinforcement::Environment;

/// Handle to a running training loop. Dropping it cancels the loop.
#[derive(Debug)]
pub struct TrainingLoop {
    token: CancellationToken,
    handle: Option<JoinHandle<u64>>,
}

impl TrainingLoop {
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Token that stops the loop when cancelled
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Stop the loop and wait for it; returns the number of ticks it ran
    pub async fn stop(mut self) -> u64 {
        self.token.cancel();
        match self.handle.take() {
            Some(handle) => handle.await.unwrap_or(0),
            None => 0,
        }
    }
}

impl Drop for TrainingLoop {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Tick `engine` every `period` until cancelled.
///
/// Ticks outside training are no-ops, so the loop may keep running across
/// mode switches. A failing tick stops the loop.
pub fn spawn_training_loop<E>(
    engine: Arc<Mutex<FederatedEngine<E>>>,
    period: Duration,
) -> TrainingLoop
where
    E: Environment + 'static,
{
    let token = CancellationToken::new();
    let child = token.clone();

    let handle = tokio::spawn(async move {
        let mut ticker = interval(period.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut ticks = 0u64;

        loop {
            tokio::select! {
                _ = child.cancelled() => break,
                _ = ticker.tick() => {
                    let mut engine = engine.lock().await;
                    match engine.tick().await {
                        Ok(Some(report)) => {
                            ticks += 1;
                            if let Some(round) = report.round {
                                debug!(tick = report.tick, round = round.round, "Loop federated");
                            }
                        }
                        Ok(None) => {}
                        Err(e) => {
                            crate::log_error!(e, "Training tick failed");
                            break;
                        }
                    }
                }
            }
        }

        info!("Training loop stopped after {} ticks", ticks);
        ticks
    });

    TrainingLoop {
        token,
        handle: Some(handle),
    }
}

/// Tick `engine` at its configured `tick_interval_ms`
pub async fn spawn_configured_loop<E>(engine: Arc<Mutex<FederatedEngine<E>>>) -> TrainingLoop
where
    E: Environment + 'static,
{
    let period = engine.lock().await.tick_interval();
    spawn_training_loop(engine, period)
}
