//! Ramp-up HTTP load generation engine.

pub mod engine;
pub mod error;
pub mod executor;
pub mod scenario;
pub mod scenario_file;
pub mod scheduler;
pub mod stats;
pub mod worker;

pub use engine::{Engine, EngineConfig, RunHandle, CLIENT_UPDATE_FREQUENCY};
pub use error::{EngineError, TransportError};
pub use executor::{
    ActionResult, Connector, HttpConnector, HttpTransport, Outcome, StepOutcome, Transport,
};
pub use scenario::{Scenario, Step};
pub use scenario_file::ScenarioFile;
pub use stats::ProgressEvent;
