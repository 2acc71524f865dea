use hdrhistogram::Histogram;
use serde::{Serialize, Serializer};
use std::time::Duration;

use crate::error::EngineError;
use crate::executor::{ActionResult, Outcome};

// =============================================================================
// Snapshots
// =============================================================================

/// Point-in-time aggregate of a run. Response times are in milliseconds and
/// only cover successful requests.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressEvent {
    #[serde(rename = "elapsed_secs", serialize_with = "as_secs_f64")]
    pub elapsed: Duration,
    pub total_users: u32,
    pub average_concurrent_users: f64,
    pub max_concurrent_users: u32,
    pub total_hits: u64,
    pub total_client_errors: u64,
    pub total_server_errors: u64,
    pub total_timeouts: u64,
    pub average_response_time: f64,
    pub p50_response_time: f64,
    pub p95_response_time: f64,
    pub p99_response_time: f64,
    pub max_response_time: f64,
    /// Results received per second of elapsed time.
    pub throughput: f64,
}

impl ProgressEvent {
    pub fn total_requests(&self) -> u64 {
        self.total_hits + self.total_client_errors + self.total_server_errors + self.total_timeouts
    }
}

fn as_secs_f64<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64())
}

/// Averages over a result log: `(avg concurrent users, avg response ms, max
/// concurrent users)`. Concurrency covers every result, latency only the
/// successful ones. Empty inputs yield zeros.
pub fn compute_averages(results: &[ActionResult]) -> (f64, f64, u32) {
    if results.is_empty() {
        return (0.0, 0.0, 0);
    }

    let mut concurrency_sum = 0u64;
    let mut max_concurrent = 0u32;
    let mut latency_nanos = 0u128;
    let mut successes = 0u64;

    for result in results {
        concurrency_sum += u64::from(result.concurrent_users);
        max_concurrent = max_concurrent.max(result.concurrent_users);
        if result.outcome.is_success() {
            latency_nanos += result.response_time.as_nanos();
            successes += 1;
        }
    }

    let average_concurrent = concurrency_sum as f64 / results.len() as f64;
    let average_response = if successes == 0 {
        0.0
    } else {
        latency_nanos as f64 / successes as f64 / 1_000_000.0
    };

    (average_concurrent, average_response, max_concurrent)
}

// =============================================================================
// Run state
// =============================================================================

/// Mutable aggregate of a run, owned by the control loop alone.
pub struct RunState {
    pub users_spawned: u32,
    pub current_concurrent_users: u32,
    hits: u64,
    client_errors: u64,
    server_errors: u64,
    timeouts: u64,
    results: Vec<ActionResult>,
    /// Successful response times in microseconds.
    latency: Histogram<u64>,
}

impl RunState {
    pub fn new() -> Result<Self, EngineError> {
        Ok(Self {
            users_spawned: 0,
            current_concurrent_users: 0,
            hits: 0,
            client_errors: 0,
            server_errors: 0,
            timeouts: 0,
            results: Vec::new(),
            latency: Histogram::<u64>::new_with_bounds(1, 3_600_000_000, 3)?,
        })
    }

    /// Appends a result and credits exactly one counter.
    pub fn record(&mut self, result: ActionResult) {
        match result.outcome {
            Outcome::Success => {
                self.hits += 1;
                let micros = u64::try_from(result.response_time.as_micros()).unwrap_or(u64::MAX);
                self.latency.saturating_record(micros.max(1));
            }
            Outcome::ClientError => self.client_errors += 1,
            Outcome::ServerError => self.server_errors += 1,
            Outcome::TimedOut => self.timeouts += 1,
        }
        self.results.push(result);
    }

    pub fn results(&self) -> &[ActionResult] {
        &self.results
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn client_errors(&self) -> u64 {
        self.client_errors
    }

    pub fn server_errors(&self) -> u64 {
        self.server_errors
    }

    pub fn timeouts(&self) -> u64 {
        self.timeouts
    }

    pub fn snapshot(&self, elapsed: Duration) -> ProgressEvent {
        let (average_concurrent_users, average_response_time, max_concurrent_users) =
            compute_averages(&self.results);

        let quantile_ms = |q: f64| {
            if self.latency.is_empty() {
                0.0
            } else {
                self.latency.value_at_quantile(q) as f64 / 1000.0
            }
        };
        let max_response_time = if self.latency.is_empty() {
            0.0
        } else {
            self.latency.max() as f64 / 1000.0
        };

        let secs = elapsed.as_secs_f64();
        let throughput = if secs > 0.0 {
            self.results.len() as f64 / secs
        } else {
            0.0
        };

        ProgressEvent {
            elapsed,
            total_users: self.users_spawned,
            average_concurrent_users,
            max_concurrent_users,
            total_hits: self.hits,
            total_client_errors: self.client_errors,
            total_server_errors: self.server_errors,
            total_timeouts: self.timeouts,
            average_response_time,
            p50_response_time: quantile_ms(0.50),
            p95_response_time: quantile_ms(0.95),
            p99_response_time: quantile_ms(0.99),
            max_response_time,
            throughput,
        }
    }
}
