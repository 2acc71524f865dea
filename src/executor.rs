use async_trait::async_trait;
use reqwest::StatusCode;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use crate::error::TransportError;
use crate::scenario::{Scenario, Step};

// =============================================================================
// Outcomes
// =============================================================================

/// Mutually exclusive classification of one executed step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    /// The server answered with a 4xx status.
    ClientError,
    /// The server answered with a 5xx status.
    ServerError,
    /// The transport failed before a status was available.
    TimedOut,
}

impl Outcome {
    /// Transport failures win over any status, then 4xx, then 5xx.
    pub fn classify(result: &Result<StatusCode, TransportError>) -> Self {
        match result {
            Err(_) => Outcome::TimedOut,
            Ok(status) if status.is_client_error() => Outcome::ClientError,
            Ok(status) if status.as_u16() >= 500 => Outcome::ServerError,
            Ok(_) => Outcome::Success,
        }
    }

    pub fn is_success(self) -> bool {
        self == Outcome::Success
    }
}

/// What a user hands back after running a step, before the control loop
/// stamps it with the concurrency level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepOutcome {
    pub outcome: Outcome,
    pub response_time: Duration,
}

/// One step's outcome as recorded in the run log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActionResult {
    pub outcome: Outcome,
    pub response_time: Duration,
    /// Active users at the moment the result was accepted.
    pub concurrent_users: u32,
}

impl ActionResult {
    pub fn new(step: StepOutcome, concurrent_users: u32) -> Self {
        Self {
            outcome: step.outcome,
            response_time: step.response_time,
            concurrent_users,
        }
    }

    pub fn is_client_error(&self) -> bool {
        self.outcome == Outcome::ClientError
    }

    pub fn is_server_error(&self) -> bool {
        self.outcome == Outcome::ServerError
    }

    pub fn has_timed_out(&self) -> bool {
        self.outcome == Outcome::TimedOut
    }
}

// =============================================================================
// Transport
// =============================================================================

/// A per-user client able to perform a step and report the status code.
#[async_trait]
pub trait Transport: Send + 'static {
    async fn send(&mut self, step: &Step) -> Result<StatusCode, TransportError>;
}

/// Builds one [`Transport`] for every simulated user.
pub trait Connector: Send + Sync + 'static {
    type Transport: Transport;

    fn connect(&self, scenario: &Scenario) -> Result<Self::Transport, TransportError>;
}

/// Production connector: one `reqwest` client per user.
///
/// The scenario's pause duration becomes the client's total request timeout,
/// which starts before connecting and therefore covers connect, request write
/// and the wait for response headers (the body is never read). Proxies come
/// from the environment unless built with [`HttpConnector::direct`].
#[derive(Debug, Clone)]
pub struct HttpConnector {
    proxy_from_env: bool,
}

impl Default for HttpConnector {
    fn default() -> Self {
        Self {
            proxy_from_env: true,
        }
    }
}

impl HttpConnector {
    /// Connects straight to the target, ignoring proxy environment variables.
    pub fn direct() -> Self {
        Self {
            proxy_from_env: false,
        }
    }
}

impl Connector for HttpConnector {
    type Transport = HttpTransport;

    fn connect(&self, scenario: &Scenario) -> Result<HttpTransport, TransportError> {
        let mut builder = reqwest::Client::builder();
        if !self.proxy_from_env {
            builder = builder.no_proxy();
        }
        // A zero budget means no timeout at all.
        if !scenario.pause_duration().is_zero() {
            builder = builder.timeout(scenario.pause_duration());
        }
        Ok(HttpTransport {
            client: builder.build()?,
        })
    }
}

pub struct HttpTransport {
    client: reqwest::Client,
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&mut self, step: &Step) -> Result<StatusCode, TransportError> {
        let mut request = self
            .client
            .request(step.method().clone(), step.url().clone())
            .headers(step.headers().clone());
        if let Some(body) = step.body() {
            request = request.body(body.clone());
        }

        // Only the headers are awaited; the body is dropped unread.
        let response = request.send().await?;
        Ok(response.status())
    }
}

// =============================================================================
// Execution
// =============================================================================

/// Runs a single step, timing it from just before dispatch to just after the
/// transport returns, whatever the result.
pub async fn execute<T: Transport + ?Sized>(transport: &mut T, step: &Step) -> StepOutcome {
    let started = Instant::now();
    let result = transport.send(step).await;
    let response_time = started.elapsed();

    if let Err(e) = &result {
        debug!("{} {} failed: {}", step.method(), step.url(), e);
    }

    StepOutcome {
        outcome: Outcome::classify(&result),
        response_time,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(code: u16) -> Result<StatusCode, TransportError> {
        Ok(StatusCode::from_u16(code).unwrap())
    }

    #[test]
    fn classifies_by_status_range() {
        assert_eq!(Outcome::classify(&status(200)), Outcome::Success);
        assert_eq!(Outcome::classify(&status(204)), Outcome::Success);
        assert_eq!(Outcome::classify(&status(302)), Outcome::Success);
        assert_eq!(Outcome::classify(&status(400)), Outcome::ClientError);
        assert_eq!(Outcome::classify(&status(499)), Outcome::ClientError);
        assert_eq!(Outcome::classify(&status(500)), Outcome::ServerError);
        assert_eq!(Outcome::classify(&status(503)), Outcome::ServerError);
        assert_eq!(Outcome::classify(&status(599)), Outcome::ServerError);
    }

    #[test]
    fn transport_failure_is_a_timeout() {
        let failed = Err(TransportError::Unavailable("connection refused".to_string()));
        assert_eq!(Outcome::classify(&failed), Outcome::TimedOut);
    }

    #[test]
    fn action_result_flags_are_exclusive() {
        for outcome in [
            Outcome::Success,
            Outcome::ClientError,
            Outcome::ServerError,
            Outcome::TimedOut,
        ] {
            let result = ActionResult::new(
                StepOutcome {
                    outcome,
                    response_time: Duration::from_millis(5),
                },
                3,
            );
            let flags = [
                result.is_client_error(),
                result.is_server_error(),
                result.has_timed_out(),
            ];
            let raised = flags.iter().filter(|f| **f).count();
            assert_eq!(raised, if outcome.is_success() { 0 } else { 1 });
            assert_eq!(result.concurrent_users, 3);
        }
    }

    struct SlowOk;

    #[async_trait]
    impl Transport for SlowOk {
        async fn send(&mut self, _step: &Step) -> Result<StatusCode, TransportError> {
            tokio::time::sleep(Duration::from_millis(40)).await;
            Ok(StatusCode::OK)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn execute_measures_elapsed_time() {
        let mut scenario = Scenario::new(
            1,
            "http://localhost",
            Duration::from_secs(1),
            Duration::ZERO,
            Duration::ZERO,
        )
        .unwrap();
        scenario.add_step(None, "GET", "/", "").unwrap();

        let outcome = execute(&mut SlowOk, &scenario.steps()[0]).await;
        assert_eq!(outcome.outcome, Outcome::Success);
        assert!(outcome.response_time >= Duration::from_millis(40));
    }

    #[tokio::test]
    async fn pause_budget_bounds_a_silent_server() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let mut scenario = Scenario::new(
            1,
            format!("http://{}", addr),
            Duration::from_secs(1),
            Duration::from_millis(200),
            Duration::ZERO,
        )
        .unwrap();
        scenario.add_step(None, "GET", "/", "").unwrap();

        let mut transport = HttpConnector::direct().connect(&scenario).unwrap();
        let outcome = execute(&mut transport, &scenario.steps()[0]).await;

        assert_eq!(outcome.outcome, Outcome::TimedOut);
        assert!(outcome.response_time >= Duration::from_millis(200));
        assert!(outcome.response_time < Duration::from_secs(5));
    }

    #[test]
    fn http_connector_builds_a_client() {
        let scenario = Scenario::new(
            1,
            "http://localhost",
            Duration::from_secs(1),
            Duration::from_millis(250),
            Duration::ZERO,
        )
        .unwrap();
        assert!(HttpConnector::default().connect(&scenario).is_ok());
        assert!(HttpConnector::direct().connect(&scenario).is_ok());
    }
}
