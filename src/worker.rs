use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::executor::{execute, Connector, Outcome, StepOutcome};
use crate::scenario::Scenario;

/// Messages a simulated user sends to the control loop. Both travel on the
/// same channel so a user's `Done` can never overtake its own results.
#[derive(Debug)]
pub enum WorkerEvent {
    Step(StepOutcome),
    Done { user: u32 },
}

/// Drives one user through every step in order, then reports completion.
///
/// A failing step is reported like any other outcome and never stops the
/// remaining steps. The concurrency level is stamped by the control loop
/// when it accepts each result.
pub async fn run_user<C: Connector>(
    user: u32,
    scenario: Arc<Scenario>,
    connector: Arc<C>,
    events: mpsc::Sender<WorkerEvent>,
) {
    debug!("User {} started", user);

    let mut transport = match connector.connect(&scenario) {
        Ok(transport) => Some(transport),
        Err(e) => {
            warn!("User {} could not build its client: {}", user, e);
            None
        }
    };

    for step in scenario.steps() {
        let outcome = match transport.as_mut() {
            Some(transport) => execute(transport, step).await,
            None => StepOutcome {
                outcome: Outcome::TimedOut,
                response_time: Duration::ZERO,
            },
        };

        if events.send(WorkerEvent::Step(outcome)).await.is_err() {
            debug!("User {} stopping, control loop is gone", user);
            return;
        }
    }

    if events.send(WorkerEvent::Done { user }).await.is_err() {
        debug!("User {} finished after the control loop exited", user);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::executor::Transport;
    use crate::scenario::Step;
    use async_trait::async_trait;
    use reqwest::StatusCode;

    /// Later steps answer faster, so any overlap or reordering would show up
    /// in the order results are delivered.
    struct Shrinking;

    struct ShrinkingTransport {
        remaining: u64,
    }

    impl Connector for Shrinking {
        type Transport = ShrinkingTransport;

        fn connect(&self, scenario: &Scenario) -> Result<ShrinkingTransport, TransportError> {
            Ok(ShrinkingTransport {
                remaining: scenario.steps().len() as u64,
            })
        }
    }

    #[async_trait]
    impl Transport for ShrinkingTransport {
        async fn send(&mut self, _step: &Step) -> Result<StatusCode, TransportError> {
            tokio::time::sleep(Duration::from_millis(self.remaining * 10)).await;
            self.remaining -= 1;
            Ok(StatusCode::OK)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn results_arrive_in_step_order_then_done() {
        let mut scenario = Scenario::new(
            1,
            "http://localhost",
            Duration::from_secs(1),
            Duration::ZERO,
            Duration::ZERO,
        )
        .unwrap();
        for i in 0..3 {
            scenario
                .add_step(None, "GET", &format!("/step/{}", i), "")
                .unwrap();
        }

        let (tx, mut rx) = mpsc::channel(1);
        tokio::spawn(run_user(7, Arc::new(scenario), Arc::new(Shrinking), tx));

        let mut latencies = Vec::new();
        let mut done = None;
        while let Some(event) = rx.recv().await {
            match event {
                WorkerEvent::Step(outcome) => {
                    assert!(done.is_none(), "result after done");
                    latencies.push(outcome.response_time.as_millis() / 10);
                }
                WorkerEvent::Done { user } => done = Some(user),
            }
        }

        assert_eq!(latencies, vec![3, 2, 1]);
        assert_eq!(done, Some(7));
    }
}
