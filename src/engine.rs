use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, interval_at, sleep_until, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::error::EngineError;
use crate::executor::{ActionResult, Connector, HttpConnector};
use crate::scenario::{Scenario, MAX_TEST_DURATION};
use crate::scheduler::RampUp;
use crate::stats::{ProgressEvent, RunState};
use crate::worker::{run_user, WorkerEvent};

/// Default cadence of non-terminal snapshots.
pub const CLIENT_UPDATE_FREQUENCY: Duration = Duration::from_secs(5);

// =============================================================================
// Configuration
// =============================================================================

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How often a progress snapshot is emitted while the run is active.
    pub progress_interval: Duration,
    /// Capacity of the channel users report on. Kept minimal so a slow
    /// control loop throttles the users.
    pub event_buffer: usize,
    /// Snapshots the caller may fall behind by before new ones are dropped.
    pub progress_buffer: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            progress_interval: CLIENT_UPDATE_FREQUENCY,
            event_buffer: 1,
            progress_buffer: 16,
        }
    }
}

impl EngineConfig {
    fn validate(&self) -> Result<(), EngineError> {
        if self.progress_interval.is_zero() {
            return Err(EngineError::InvalidConfig(
                "progress interval must be greater than zero".to_string(),
            ));
        }
        if self.progress_interval > MAX_TEST_DURATION {
            return Err(EngineError::InvalidConfig(format!(
                "progress interval must not exceed {:?}",
                MAX_TEST_DURATION
            )));
        }
        if self.event_buffer == 0 || self.progress_buffer == 0 {
            return Err(EngineError::InvalidConfig(
                "channel capacities must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Engine
// =============================================================================

/// The two outbound streams of a run.
///
/// `progress` yields zero or more snapshots and closes once the run is over;
/// `completion` resolves exactly once with the terminal snapshot.
pub struct RunHandle {
    pub progress: mpsc::Receiver<ProgressEvent>,
    pub completion: oneshot::Receiver<ProgressEvent>,
}

pub struct Engine<C: Connector = HttpConnector> {
    config: EngineConfig,
    connector: Arc<C>,
    scenario: Option<Scenario>,
}

impl Engine<HttpConnector> {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        Self::with_connector(HttpConnector::default(), config)
    }
}

impl Default for Engine<HttpConnector> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Connector> Engine<C> {
    pub fn with_connector(connector: C, config: EngineConfig) -> Self {
        Self {
            config,
            connector: Arc::new(connector),
            scenario: None,
        }
    }

    /// Installs the run configuration. The first call wins: once a scenario
    /// exists, later calls return it untouched.
    pub fn create_scenario(
        &mut self,
        total_users: u32,
        base_address: &str,
        test_duration: Duration,
        pause_duration: Duration,
        timeout: Duration,
    ) -> Result<&mut Scenario, EngineError> {
        let scenario = match self.scenario.take() {
            Some(existing) => {
                debug!("Scenario already configured, ignoring new configuration");
                existing
            }
            None => Scenario::new(
                total_users,
                base_address,
                test_duration,
                pause_duration,
                timeout,
            )?,
        };
        Ok(self.scenario.insert(scenario))
    }

    pub fn scenario(&self) -> Option<&Scenario> {
        self.scenario.as_ref()
    }

    pub fn scenario_mut(&mut self) -> Option<&mut Scenario> {
        self.scenario.as_mut()
    }

    /// Starts the ramp-up and control loop in the background and returns at
    /// once. Must be called from within a tokio runtime.
    pub fn run(&self) -> Result<RunHandle, EngineError> {
        let scenario = self
            .scenario
            .clone()
            .ok_or(EngineError::ScenarioNotConfigured)?;
        self.config.validate()?;

        let (progress_tx, progress_rx) = mpsc::channel(self.config.progress_buffer);
        let (completion_tx, completion_rx) = oneshot::channel();
        let (events_tx, events_rx) = mpsc::channel(self.config.event_buffer);

        let control = ControlLoop {
            ramp: RampUp::new(scenario.total_users(), scenario.test_duration()),
            scenario: Arc::new(scenario),
            connector: Arc::clone(&self.connector),
            state: RunState::new()?,
            progress_interval: self.config.progress_interval,
            events_tx,
            events_rx,
            progress_tx,
            completion_tx,
        };
        tokio::spawn(control.run());

        Ok(RunHandle {
            progress: progress_rx,
            completion: completion_rx,
        })
    }
}

// =============================================================================
// Control loop
// =============================================================================

/// Sole owner of the run state. Every mutation happens inside `run`, driven
/// by one `select!` over the timers and the user event channel.
struct ControlLoop<C: Connector> {
    scenario: Arc<Scenario>,
    connector: Arc<C>,
    ramp: RampUp,
    state: RunState,
    progress_interval: Duration,
    events_tx: mpsc::Sender<WorkerEvent>,
    events_rx: mpsc::Receiver<WorkerEvent>,
    progress_tx: mpsc::Sender<ProgressEvent>,
    completion_tx: oneshot::Sender<ProgressEvent>,
}

impl<C: Connector> ControlLoop<C> {
    async fn run(mut self) {
        let start = Instant::now();

        // The first spawn tick fires immediately, so every spawn is scheduled
        // strictly before the deadline.
        let mut spawn_timer = Some(interval(self.ramp.interval()));
        let mut progress_timer = Some({
            let mut timer = interval_at(start + self.progress_interval, self.progress_interval);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            timer
        });
        let deadline = sleep_until(start + self.scenario.test_duration());
        tokio::pin!(deadline);
        let mut winding_down = false;

        info!(
            "Starting run: {} users over {:?}, one every {:?}, {} steps each",
            self.scenario.total_users(),
            self.scenario.test_duration(),
            self.ramp.interval(),
            self.scenario.steps().len()
        );

        loop {
            tokio::select! {
                _ = tick(&mut spawn_timer) => {
                    self.spawn_user();
                    if self.ramp.is_complete() {
                        debug!("All {} users spawned, stopping ramp-up", self.ramp.spawned());
                        spawn_timer = None;
                    }
                }

                _ = tick(&mut progress_timer) => {
                    let event = self.state.snapshot(start.elapsed());
                    match self.progress_tx.try_send(event) {
                        Ok(()) => {}
                        Err(TrySendError::Full(_)) => {
                            warn!("Progress consumer is lagging, snapshot dropped");
                        }
                        Err(TrySendError::Closed(_)) => {
                            debug!("Progress receiver dropped, snapshot discarded");
                        }
                    }
                }

                _ = &mut deadline, if !winding_down => {
                    info!(
                        "Test duration elapsed, waiting for {} active users to finish",
                        self.state.current_concurrent_users
                    );
                    winding_down = true;
                    // Every spawn is scheduled before the deadline, so any tick
                    // lost to timer resolution is owed now.
                    if !self.ramp.is_complete() {
                        debug!(
                            "Deadline reached with {} of {} users spawned, spawning the rest",
                            self.ramp.spawned(),
                            self.scenario.total_users()
                        );
                        while !self.ramp.is_complete() {
                            self.spawn_user();
                        }
                    }
                    spawn_timer = None;
                    progress_timer = None;
                }

                Some(event) = self.events_rx.recv() => match event {
                    WorkerEvent::Step(outcome) => {
                        let result = ActionResult::new(outcome, self.state.current_concurrent_users);
                        self.state.record(result);
                    }
                    WorkerEvent::Done { user } => {
                        self.state.current_concurrent_users =
                            self.state.current_concurrent_users.saturating_sub(1);
                        debug!(
                            "User {} finished, {} still active",
                            user, self.state.current_concurrent_users
                        );
                    }
                },
            }

            if winding_down && self.state.current_concurrent_users == 0 {
                break;
            }
        }

        let event = self.state.snapshot(start.elapsed());
        info!(
            "Run complete: {} users, {} requests in {:?}",
            event.total_users,
            event.total_requests(),
            event.elapsed
        );
        if self.completion_tx.send(event).is_err() {
            debug!("Completion receiver dropped before the final snapshot");
        }
        // Dropping self closes the progress stream and the user channel.
    }

    fn spawn_user(&mut self) {
        let Some(user) = self.ramp.next_user() else {
            return;
        };
        self.state.users_spawned = self.ramp.spawned();
        self.state.current_concurrent_users += 1;
        debug!(
            "Spawning user {} ({} active)",
            user, self.state.current_concurrent_users
        );

        tokio::spawn(run_user(
            user,
            Arc::clone(&self.scenario),
            Arc::clone(&self.connector),
            self.events_tx.clone(),
        ));
    }
}

/// Waits for the next tick, or forever once the timer has been halted.
async fn tick(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending().await,
    }
}
