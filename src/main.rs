//! outcome-breaker
//!
//! Command line driver for the outcome measures circuit breakers.
//!
//! ```text
//! outcome-breaker simulate      drive a breaker with injected failures and
//!                               print its events and final status
//! outcome-breaker check-config  validate a config file and print the
//!                               effective breaker settings
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde_json::json;

use outcome_breaker::config::{load_config, AppConfig};
use outcome_breaker::lifecycle::{signals, Shutdown};
use outcome_breaker::observability::{logging, metrics};
use outcome_breaker::resilience::{BreakerEvent, BreakerRegistry};

const OPERATION_TYPES: &[&str] = &[
    "database_query",
    "assessment_lookup",
    "ai_prediction",
    "quality_indicators",
    "cache_operation",
    "report_generation",
];

const INJECTED_ERRORS: &[&str] = &[
    "ETIMEDOUT: upstream did not answer",
    "ECONNREFUSED 10.0.0.12:5432",
    "database deadlock detected",
    "validation failed: score out of range",
    "model provider rate limit exceeded",
    "unexpected end of stream",
];

#[derive(Parser)]
#[command(name = "outcome-breaker")]
#[command(about = "Circuit breakers for outcome measures services", long_about = None)]
struct Cli {
    /// Path to a TOML config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run calls through one breaker with injected failures
    Simulate {
        /// Breaker to drive
        #[arg(short, long, default_value = "database")]
        service: String,

        /// Number of calls to make
        #[arg(short = 'n', long, default_value_t = 50)]
        calls: u32,

        /// Probability that a call fails, 0.0 to 1.0
        #[arg(short, long, default_value_t = 0.3)]
        failure_rate: f64,

        /// Simulated latency of each call
        #[arg(long, default_value_t = 20)]
        latency_ms: u64,

        /// Pause between calls
        #[arg(long, default_value_t = 100)]
        interval_ms: u64,

        /// Seed for reproducible runs
        #[arg(long)]
        seed: Option<u64>,

        /// Serve Prometheus metrics while running
        #[arg(long)]
        metrics: bool,
    },
    /// Validate the config file and print effective settings
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => AppConfig::default(),
    };

    match cli.command {
        Commands::CheckConfig => check_config(cli.config.as_deref(), &config)?,
        Commands::Simulate {
            service,
            calls,
            failure_rate,
            latency_ms,
            interval_ms,
            seed,
            metrics: serve_metrics,
        } => {
            logging::init(&config.observability)?;
            if serve_metrics || config.observability.metrics_enabled {
                let addr = config.observability.metrics_address.parse()?;
                metrics::init_metrics(addr)?;
            }
            if let Some(seed) = seed {
                fastrand::seed(seed);
            }

            let plan = Plan {
                calls,
                failure_rate: failure_rate.clamp(0.0, 1.0),
                latency: Duration::from_millis(latency_ms),
                interval: Duration::from_millis(interval_ms),
            };
            simulate(config, &service, plan).await?;
        }
    }

    Ok(())
}

fn check_config(path: Option<&Path>, config: &AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let mut effective = serde_json::Map::new();
    effective.insert(
        "default".into(),
        serde_json::to_value(config.breakers.default.to_breaker_config("default"))?,
    );
    for (name, settings) in &config.breakers.services {
        effective.insert(name.clone(), serde_json::to_value(settings.to_breaker_config(name))?);
    }

    let report = json!({
        "config": path.map(|p| p.display().to_string()),
        "valid": true,
        "observability": config.observability,
        "breakers": effective,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

struct Plan {
    calls: u32,
    failure_rate: f64,
    latency: Duration,
    interval: Duration,
}

async fn simulate(config: AppConfig, service: &str, plan: Plan) -> Result<(), Box<dyn std::error::Error>> {
    let shutdown = Arc::new(Shutdown::new());
    let _signals = signals::listen_for_termination(shutdown.clone());

    let registry = BreakerRegistry::from_config(config.breakers);
    let breaker = registry.get(service);
    let printer = tokio::spawn(print_events(breaker.subscribe(), shutdown.subscribe()));

    tracing::info!(
        service,
        calls = plan.calls,
        failure_rate = plan.failure_rate,
        "Simulation starting"
    );

    let mut stop = shutdown.subscribe();
    for call in 0..plan.calls {
        if shutdown.is_triggered() {
            break;
        }

        let operation_type = OPERATION_TYPES[call as usize % OPERATION_TYPES.len()];
        let fails = fastrand::f64() < plan.failure_rate;
        let error = INJECTED_ERRORS[fastrand::usize(..INJECTED_ERRORS.len())];
        let latency = plan.latency;

        let result: serde_json::Value = breaker
            .execute(
                move || async move {
                    tokio::time::sleep(latency).await;
                    if fails {
                        Err(error)
                    } else {
                        Ok(json!({ "call": call, "ok": true }))
                    }
                },
                operation_type,
                json!({ "patient_id": format!("p-{}", call % 7), "call": call }),
            )
            .await?;

        tracing::debug!(call, operation_type, result = %result, "Call finished");

        tokio::select! {
            _ = tokio::time::sleep(plan.interval) => {}
            _ = stop.recv() => break,
        }
    }

    let statuses = registry.all_status();
    println!("{}", serde_json::to_string_pretty(&json!({
        "health_score": registry.health_score(),
        "breakers": statuses,
    }))?);

    registry.destroy_all();
    shutdown.trigger();
    let _ = printer.await;

    tracing::info!("Simulation complete");
    Ok(())
}

async fn print_events(
    mut events: tokio::sync::broadcast::Receiver<BreakerEvent>,
    mut shutdown: tokio::sync::broadcast::Receiver<()>,
) {
    use tokio::sync::broadcast::error::RecvError;

    loop {
        tokio::select! {
            received = events.recv() => match received {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(line) => println!("{}", line),
                    Err(e) => tracing::warn!(error = %e, "Could not serialize event"),
                },
                Err(RecvError::Lagged(skipped)) => tracing::warn!(skipped, "Event printer lagged"),
                Err(RecvError::Closed) => break,
            },
            _ = shutdown.recv() => break,
        }
    }
}
