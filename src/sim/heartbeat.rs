//! Shared engine handle and the periodic heartbeat task.
//!
//! The engine sits behind a `tokio::sync::Mutex`. Ticks and commands take the
//! lock for one synchronous engine call each, so they never interleave. The
//! latest [`EngineSnapshot`] is published on a `watch` channel and tick
//! failures go out on a `broadcast` channel.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::devices::{AccessoryId, NewAccessory};
use crate::error::{EngineError, Result};
use crate::forecast::{ForecastPoint, HealthLevel, TimeToEmpty, forecast_trajectory, time_to_empty};
use crate::store::Store;

use super::clock::Clock;
use super::engine::Engine;
use super::event::EventId;
use super::types::{EngineSnapshot, TickReport};

/// Capacity of the error broadcast channel.
pub const ERROR_CHANNEL_CAPACITY: usize = 64;

/// Cloneable handle to an engine shared between tasks.
pub struct EngineHandle<S: Store, C: Clock> {
    engine: Arc<Mutex<Engine<S, C>>>,
    snapshots: Arc<watch::Sender<EngineSnapshot>>,
    errors: broadcast::Sender<EngineError>,
}

impl<S: Store, C: Clock> Clone for EngineHandle<S, C> {
    fn clone(&self) -> Self {
        Self {
            engine: Arc::clone(&self.engine),
            snapshots: Arc::clone(&self.snapshots),
            errors: self.errors.clone(),
        }
    }
}

impl<S: Store, C: Clock> EngineHandle<S, C> {
    /// Wraps `engine`, publishing its current snapshot.
    ///
    /// # Errors
    ///
    /// Fails if the initial snapshot cannot be read from the store.
    pub fn new(engine: Engine<S, C>) -> Result<Self> {
        let snapshot = engine.snapshot()?;
        let (snapshots, _) = watch::channel(snapshot);
        let (errors, _) = broadcast::channel(ERROR_CHANNEL_CAPACITY);
        Ok(Self {
            engine: Arc::new(Mutex::new(engine)),
            snapshots: Arc::new(snapshots),
            errors,
        })
    }

    /// Receiver for the snapshot published after every successful tick or
    /// command.
    pub fn subscribe(&self) -> watch::Receiver<EngineSnapshot> {
        self.snapshots.subscribe()
    }

    /// Receiver for tick failures and orphaned events.
    pub fn subscribe_errors(&self) -> broadcast::Receiver<EngineError> {
        self.errors.subscribe()
    }

    /// Most recently published snapshot.
    pub fn latest(&self) -> EngineSnapshot {
        self.snapshots.borrow().clone()
    }

    /// Runs one tick and publishes its outcome.
    ///
    /// Orphaned events are reported as [`EngineError::InconsistentState`]
    /// on the error channel without failing the tick.
    ///
    /// # Errors
    ///
    /// Returns the tick failure after logging and broadcasting it.
    pub async fn tick(&self) -> Result<TickReport> {
        let mut engine = self.engine.lock().await;
        let outcome = engine.tick().and_then(|report| Ok((engine.snapshot()?, report)));
        drop(engine);

        match outcome {
            Ok((snapshot, report)) => {
                for orphan in &report.orphaned {
                    self.report(EngineError::InconsistentState {
                        event: orphan.id,
                        accessory: orphan.accessory,
                    });
                }
                self.snapshots.send_replace(snapshot);
                Ok(report)
            }
            Err(err) => {
                warn!(error = %err, "tick failed, retrying on next heartbeat");
                self.report(err.clone());
                Err(err)
            }
        }
    }

    /// Sets the generator output and publishes the new snapshot.
    pub async fn set_generator_output(&self, value_w: f64) -> Result<()> {
        self.command(|engine| engine.set_generator_output(value_w)).await
    }

    pub async fn schedule_power_change(
        &self,
        accessory: AccessoryId,
        target_on: bool,
        delay: Duration,
        duration: Option<Duration>,
    ) -> Result<Vec<EventId>> {
        self.command(|engine| engine.schedule_power_change(accessory, target_on, delay, duration))
            .await
    }

    pub async fn toggle_accessory(&self, id: AccessoryId) -> Result<bool> {
        self.command(|engine| engine.toggle_accessory(id)).await
    }

    pub async fn add_accessories(&self, accessories: Vec<NewAccessory>) -> Result<Vec<AccessoryId>> {
        self.command(|engine| engine.add_accessories(accessories)).await
    }

    /// Projected trajectory.
    ///
    /// The lock is held only while the input is captured; the projection
    /// itself runs without blocking ticks.
    pub async fn forecast(&self) -> Result<Vec<ForecastPoint>> {
        let (input, settings) = {
            let engine = self.engine.lock().await;
            (engine.forecast_input()?, engine.config().forecast)
        };
        Ok(forecast_trajectory(&input, &settings))
    }

    pub async fn time_to_empty(&self) -> Result<TimeToEmpty> {
        let input = self.engine.lock().await.forecast_input()?;
        Ok(time_to_empty(&input))
    }

    pub async fn health(&self) -> Result<HealthLevel> {
        Ok(HealthLevel::from_time_to_empty(self.time_to_empty().await?))
    }

    /// Runs `f` with shared access to the engine.
    pub async fn with_engine<R>(&self, f: impl FnOnce(&Engine<S, C>) -> R) -> R {
        f(&*self.engine.lock().await)
    }

    /// Runs a command under the lock and publishes the resulting snapshot.
    ///
    /// A snapshot read failure is logged; the command itself already
    /// succeeded and is not reported as failed.
    async fn command<R>(&self, f: impl FnOnce(&mut Engine<S, C>) -> Result<R>) -> Result<R> {
        let mut engine = self.engine.lock().await;
        let value = f(&mut *engine)?;
        let snapshot = engine.snapshot();
        drop(engine);

        match snapshot {
            Ok(snapshot) => {
                self.snapshots.send_replace(snapshot);
            }
            Err(err) => warn!(error = %err, "snapshot unavailable after command"),
        }
        Ok(value)
    }

    fn report(&self, err: EngineError) {
        if let EngineError::InconsistentState { event, accessory } = &err {
            warn!(%event, %accessory, "event references missing accessory");
        }
        // No subscribers is fine.
        let _ = self.errors.send(err);
    }
}

/// Periodic driver calling [`EngineHandle::tick`].
pub struct Heartbeat;

impl Heartbeat {
    /// Spawns the heartbeat loop on the current runtime.
    ///
    /// The period is the engine's configured `heartbeat_interval`, the same
    /// one its dedup window is built from. The first tick fires immediately.
    /// Missed ticks are skipped rather than bursted. The loop ends when `shutdown` receives a value or its sender
    /// is dropped, and the task yields the number of successful ticks.
    pub fn spawn<S, C>(
        handle: EngineHandle<S, C>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> JoinHandle<u64>
    where
        S: Store + Send + 'static,
        C: Clock + 'static,
    {
        tokio::spawn(async move {
            let interval = handle.with_engine(|e| e.config().heartbeat_interval).await;
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut completed = 0_u64;
            info!(interval_ms = interval.as_millis() as u64, "heartbeat started");

            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.recv() => break,
                    _ = ticker.tick() => {
                        if handle.tick().await.is_ok() {
                            completed += 1;
                        }
                    }
                }
            }

            debug!(completed, "heartbeat stopped");
            completed
        })
    }
}
