use anyhow::{bail, Context, Result};
use clap::Parser;
use http_benchmark::{Engine, EngineConfig, ProgressEvent, ScenarioFile};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

// =============================================================================
// Configuration
// =============================================================================

#[derive(Parser, Debug)]
#[command(name = "http-benchmark")]
#[command(about = "Ramp-up HTTP load benchmark", long_about = None)]
struct Config {
    /// Base address every step endpoint is appended to
    #[arg(long, env = "TARGET_URL", default_value = "http://localhost/")]
    url: String,

    /// Number of users to ramp up to
    #[arg(long, env = "NUM_USERS", default_value = "200")]
    users: u32,

    /// Test duration in seconds; users are spawned evenly across it
    #[arg(long, env = "TEST_DURATION", default_value = "60")]
    duration: u64,

    /// Per-step response deadline in milliseconds (0 disables it)
    #[arg(long, env = "PAUSE_DURATION", default_value = "3000")]
    pause_ms: u64,

    /// Request timeout in milliseconds, reported but not enforced
    #[arg(long, env = "TIMEOUT", default_value = "3000")]
    timeout_ms: u64,

    /// HTTP method of the single step
    #[arg(long, env = "METHOD", default_value = "GET")]
    method: String,

    /// Endpoint of the single step
    #[arg(long, env = "ENDPOINT", default_value = "")]
    endpoint: String,

    /// Request header as KEY:VALUE, may be repeated
    #[arg(long = "header", value_name = "KEY:VALUE")]
    headers: Vec<String>,

    /// Base64-encoded request body
    #[arg(long, env = "BODY", default_value = "")]
    body: String,

    /// JSON scenario file; overrides the single-step flags above
    #[arg(long, env = "SCENARIO_FILE")]
    scenario_file: Option<PathBuf>,

    /// Progress update interval in seconds
    #[arg(long, env = "PROGRESS_INTERVAL", default_value = "5")]
    progress_interval: u64,

    /// Print snapshots as JSON lines instead of log output
    #[arg(long)]
    json: bool,
}

fn parse_headers(raw: &[String]) -> Result<HashMap<String, String>> {
    let mut headers = HashMap::new();
    for entry in raw {
        let Some((key, value)) = entry.split_once(':') else {
            bail!("Invalid header '{}', expected KEY:VALUE", entry);
        };
        headers.insert(key.trim().to_string(), value.trim().to_string());
    }
    Ok(headers)
}

// =============================================================================
// Reporting
// =============================================================================

fn print_event(event: &ProgressEvent, completed: bool, json: bool) -> Result<()> {
    if json {
        let line = sonic_rs::to_string(event).context("Failed to serialize snapshot")?;
        println!("{}", line);
        return Ok(());
    }

    if completed {
        info!("╔════════════════════════════════════════════════════════════╗");
        info!("║                    SIMULATION COMPLETED                    ║");
        info!("╚════════════════════════════════════════════════════════════╝");
    } else {
        info!("Simulation progress:");
    }
    info!("  Total users:               {}", event.total_users);
    info!("  Elapsed:                   {:.2?}", event.elapsed);
    info!("  Max concurrent users:      {}", event.max_concurrent_users);
    info!(
        "  Avg concurrent users:      {:.2}",
        event.average_concurrent_users
    );
    info!("  Total hits:                {}", event.total_hits);
    info!("  Client errors:             {}", event.total_client_errors);
    info!("  Server errors:             {}", event.total_server_errors);
    info!("  Timeouts:                  {}", event.total_timeouts);
    info!("  Throughput (req/s):        {:.2}", event.throughput);
    info!("");
    info!("Response Time (ms, successful requests):");
    if event.total_hits > 0 {
        info!("  Mean:   {:.2}", event.average_response_time);
        info!("  p50:    {:.2}", event.p50_response_time);
        info!("  p95:    {:.2}", event.p95_response_time);
        info!("  p99:    {:.2}", event.p99_response_time);
        info!("  Max:    {:.2}", event.max_response_time);
    } else {
        info!("  No data");
    }
    info!("═══════════════════════════════════════════════════════════");
    Ok(())
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Config::parse();

    let mut engine = Engine::with_config(EngineConfig {
        progress_interval: Duration::from_secs(config.progress_interval),
        ..EngineConfig::default()
    });

    match &config.scenario_file {
        Some(path) => {
            let file = ScenarioFile::load_from_file(path)?;
            file.install(&mut engine)
                .context(format!("Invalid scenario file: {:?}", path))?;
        }
        None => {
            let headers = parse_headers(&config.headers)?;
            let scenario = engine.create_scenario(
                config.users,
                &config.url,
                Duration::from_secs(config.duration),
                Duration::from_millis(config.pause_ms),
                Duration::from_millis(config.timeout_ms),
            )?;
            scenario
                .add_step(
                    (!headers.is_empty()).then_some(&headers),
                    &config.method,
                    &config.endpoint,
                    &config.body,
                )
                .context("Failed to build request step")?;
        }
    }

    if let Some(scenario) = engine.scenario() {
        info!("════════════════════════════════════════════════════════════");
        info!("                 HTTP LOAD BENCHMARK (Rust)");
        info!("════════════════════════════════════════════════════════════");
        info!("Target: {}", scenario.base_address());
        info!("Users: {}", scenario.total_users());
        info!("Test Duration: {:?}", scenario.test_duration());
        info!("Pause Duration: {:?}", scenario.pause_duration());
        info!("Timeout: {:?}", scenario.timeout());
        for step in scenario.steps() {
            info!("Step: {} {}", step.method(), step.url());
        }
        info!("════════════════════════════════════════════════════════════");
    }

    let mut run = engine.run()?;

    let summary = loop {
        tokio::select! {
            Some(update) = run.progress.recv() => {
                print_event(&update, false, config.json)?;
            }
            done = &mut run.completion => {
                break done.context("Run ended without a final snapshot")?;
            }
        }
    };

    print_event(&summary, true, config.json)?;
    Ok(())
}
