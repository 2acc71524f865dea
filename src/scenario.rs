use base64::Engine as _;
use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Method;
use std::collections::HashMap;
use std::time::Duration;
use url::Url;

use crate::error::EngineError;

// =============================================================================
// Steps
// =============================================================================

/// One request a simulated user performs.
///
/// The body is kept as an immutable buffer, so every execution gets its own
/// fresh copy and concurrent users never share a half-consumed reader.
#[derive(Debug, Clone)]
pub struct Step {
    method: Method,
    url: Url,
    headers: HeaderMap,
    body: Option<Bytes>,
}

impl Step {
    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }
}

// =============================================================================
// Scenario
// =============================================================================

/// Upper bound for the test duration, keeping every deadline derived from it
/// representable as an `Instant`.
pub const MAX_TEST_DURATION: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// The load test execution plan: population size, ramp-up window and the
/// ordered steps each user runs once.
#[derive(Debug, Clone)]
pub struct Scenario {
    total_users: u32,
    base_address: String,
    test_duration: Duration,
    /// Per-step budget, enforced as the transport's response deadline.
    pause_duration: Duration,
    /// Carried for callers and reporting only; nothing enforces it.
    timeout: Duration,
    steps: Vec<Step>,
}

impl Scenario {
    pub fn new(
        total_users: u32,
        base_address: impl Into<String>,
        test_duration: Duration,
        pause_duration: Duration,
        timeout: Duration,
    ) -> Result<Self, EngineError> {
        if total_users == 0 {
            return Err(EngineError::InvalidScenario(
                "total users must be greater than zero".to_string(),
            ));
        }
        if test_duration.is_zero() {
            return Err(EngineError::InvalidScenario(
                "test duration must be greater than zero".to_string(),
            ));
        }
        if test_duration > MAX_TEST_DURATION {
            return Err(EngineError::InvalidScenario(format!(
                "test duration must not exceed {:?}",
                MAX_TEST_DURATION
            )));
        }

        Ok(Self {
            total_users,
            base_address: base_address.into(),
            test_duration,
            pause_duration,
            timeout,
            steps: Vec::new(),
        })
    }

    /// Appends a step. The method is upper-cased, the endpoint is appended
    /// verbatim to the base address and a non-empty body is base64-decoded.
    pub fn add_step(
        &mut self,
        headers: Option<&HashMap<String, String>>,
        method: &str,
        endpoint: &str,
        body: &str,
    ) -> Result<(), EngineError> {
        let method = method.to_uppercase();
        let method = Method::from_bytes(method.as_bytes())
            .map_err(|_| EngineError::InvalidMethod(method.clone()))?;

        let raw_url = format!("{}{}", self.base_address, endpoint);
        let url = Url::parse(&raw_url).map_err(|e| EngineError::InvalidUrl {
            url: raw_url.clone(),
            reason: e.to_string(),
        })?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(EngineError::InvalidUrl {
                url: raw_url,
                reason: format!("unsupported scheme '{}'", url.scheme()),
            });
        }

        let mut header_map = HeaderMap::new();
        for (name, value) in headers.into_iter().flatten() {
            let header_name =
                HeaderName::from_bytes(name.as_bytes()).map_err(|e| EngineError::InvalidHeader {
                    name: name.clone(),
                    reason: e.to_string(),
                })?;
            let header_value =
                HeaderValue::from_str(value).map_err(|e| EngineError::InvalidHeader {
                    name: name.clone(),
                    reason: e.to_string(),
                })?;
            header_map.insert(header_name, header_value);
        }

        let body = if body.is_empty() {
            None
        } else {
            let decoded = base64::engine::general_purpose::STANDARD.decode(body)?;
            Some(Bytes::from(decoded))
        };

        self.steps.push(Step {
            method,
            url,
            headers: header_map,
            body,
        });
        Ok(())
    }

    pub fn total_users(&self) -> u32 {
        self.total_users
    }

    pub fn base_address(&self) -> &str {
        &self.base_address
    }

    pub fn test_duration(&self) -> Duration {
        self.test_duration
    }

    pub fn pause_duration(&self) -> Duration {
        self.pause_duration
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scenario() -> Scenario {
        Scenario::new(
            10,
            "http://localhost:8080",
            Duration::from_secs(10),
            Duration::from_millis(500),
            Duration::from_millis(500),
        )
        .unwrap()
    }

    #[test]
    fn rejects_empty_population_and_zero_duration() {
        let no_users = Scenario::new(
            0,
            "http://localhost",
            Duration::from_secs(1),
            Duration::ZERO,
            Duration::ZERO,
        );
        assert!(matches!(no_users, Err(EngineError::InvalidScenario(_))));

        let forever = Scenario::new(
            1,
            "http://localhost",
            Duration::from_secs(u64::MAX),
            Duration::ZERO,
            Duration::ZERO,
        );
        assert!(matches!(forever, Err(EngineError::InvalidScenario(_))));

        let no_time = Scenario::new(
            1,
            "http://localhost",
            Duration::ZERO,
            Duration::ZERO,
            Duration::ZERO,
        );
        assert!(matches!(no_time, Err(EngineError::InvalidScenario(_))));
    }

    #[test]
    fn add_step_normalizes_method_and_joins_url() {
        let mut s = scenario();
        s.add_step(None, "post", "/api/items?x=1", "").unwrap();

        let step = &s.steps()[0];
        assert_eq!(*step.method(), Method::POST);
        assert_eq!(step.url().as_str(), "http://localhost:8080/api/items?x=1");
        assert!(step.body().is_none());
        assert!(step.headers().is_empty());
    }

    #[test]
    fn add_step_decodes_base64_body_and_sets_headers() {
        let mut s = scenario();
        let mut headers = HashMap::new();
        headers.insert("Content-Type".to_string(), "application/json".to_string());
        headers.insert("X-Trace".to_string(), "abc".to_string());

        s.add_step(Some(&headers), "put", "/items/1", "eyJuYW1lIjoid2lkZ2V0In0=")
            .unwrap();

        let step = &s.steps()[0];
        assert_eq!(step.body().unwrap().as_ref(), br#"{"name":"widget"}"#);
        assert_eq!(step.headers()["content-type"], "application/json");
        assert_eq!(step.headers()["x-trace"], "abc");
    }

    #[test]
    fn add_step_rejects_bad_input() {
        let mut s = scenario();
        assert!(matches!(
            s.add_step(None, "GET", "/ok", "%%%not-base64%%%"),
            Err(EngineError::InvalidBody(_))
        ));

        let mut bad_headers = HashMap::new();
        bad_headers.insert("bad header".to_string(), "v".to_string());
        assert!(matches!(
            s.add_step(Some(&bad_headers), "GET", "/", ""),
            Err(EngineError::InvalidHeader { .. })
        ));

        assert!(matches!(
            s.add_step(None, "GE T", "/", ""),
            Err(EngineError::InvalidMethod(_))
        ));

        let mut no_host = Scenario::new(
            1,
            "not a url",
            Duration::from_secs(1),
            Duration::ZERO,
            Duration::ZERO,
        )
        .unwrap();
        assert!(matches!(
            no_host.add_step(None, "GET", "", ""),
            Err(EngineError::InvalidUrl { .. })
        ));

        let mut ftp = Scenario::new(
            1,
            "ftp://files.example.com",
            Duration::from_secs(1),
            Duration::ZERO,
            Duration::ZERO,
        )
        .unwrap();
        assert!(matches!(
            ftp.add_step(None, "GET", "/", ""),
            Err(EngineError::InvalidUrl { .. })
        ));

        assert!(s.steps().is_empty());
    }
}
