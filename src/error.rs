use std::path::PathBuf;

/// Errors surfaced to the caller before or while starting a run.
///
/// Per-request failures never show up here: they are classified and
/// counted inside the emitted snapshots instead.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("a scenario has not been configured for this engine, call create_scenario first")]
    ScenarioNotConfigured,

    #[error("invalid scenario: {0}")]
    InvalidScenario(String),

    #[error("invalid engine configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid HTTP method: {0}")]
    InvalidMethod(String),

    #[error("invalid URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("invalid header {name}: {reason}")]
    InvalidHeader { name: String, reason: String },

    #[error("request body is not valid base64: {0}")]
    InvalidBody(#[from] base64::DecodeError),

    #[error("failed to create latency histogram: {0}")]
    Histogram(#[from] hdrhistogram::CreationError),

    #[error("failed to read scenario file {path:?}: {source}")]
    ScenarioFileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse scenario file {path:?}: {source}")]
    ScenarioFileParse {
        path: PathBuf,
        #[source]
        source: sonic_rs::Error,
    },
}

/// Failure of the transport itself: connection refused, deadline hit
/// before the response headers arrived, broken TLS and so on.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("transport unavailable: {0}")]
    Unavailable(String),
}
