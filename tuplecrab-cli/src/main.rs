use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Result, bail};
use clap::Parser;
use tracing_subscriber::EnvFilter;
use tuplecrab_api::topology::{Submitter, Topology};
use tuplecrab_core::config::JobConfig;
use tuplecrab_core::execution::DirectProvider;
use tuplecrab_core::job::{Action, Job, State};
use tuplecrab_core::window::{WindowConfig, WindowPolicy};

#[derive(Parser, Debug)]
#[command(name = "tuplecrab")]
#[command(about = "Run a simulated sensor topology", long_about = None)]
struct Cli {
    /// JSON job config; unset fields keep their defaults.
    #[arg(long)]
    config: Option<PathBuf>,
    /// How long the job runs before it is closed.
    #[arg(long, default_value_t = 5000)]
    duration_ms: u64,
    /// Number of recent readings averaged per sensor.
    #[arg(long, default_value_t = 10)]
    window: usize,
    #[arg(long, default_value_t = 3)]
    sensors: u32,
    /// Interval between two polls of the sensor bank.
    #[arg(long, default_value_t = 100)]
    period_ms: u64,
}

#[derive(Debug, Clone, Copy)]
struct Reading {
    sensor: u32,
    celsius: f64,
}

#[derive(Debug, Clone, Copy)]
struct Average {
    sensor: u32,
    celsius: f64,
    readings: usize,
}

/// Round-robin over the sensors, each following its own slow wave.
fn sensor_bank(sensors: u32) -> impl FnMut() -> Option<Reading> + Send + 'static {
    let mut tick: u64 = 0;
    move || {
        let sensor = (tick % u64::from(sensors)) as u32;
        let phase = tick as f64 * 0.1 + f64::from(sensor);
        tick += 1;
        Some(Reading {
            sensor,
            celsius: 20.0 + 5.0 * phase.sin(),
        })
    }
}

fn build(cli: &Cli) -> Result<Topology> {
    let topology = Topology::new("sensors");
    let readings = topology
        .poll(
            Duration::from_millis(cli.period_ms),
            sensor_bank(cli.sensors),
        )
        .alias("readings")?;

    let averages = readings
        .window_by(
            WindowConfig::new(WindowPolicy::last_count(cli.window), false),
            |r: &Reading| r.sensor,
        )?
        .aggregate(|readings: &[Reading], sensor: &u32| {
            if readings.is_empty() {
                return None;
            }
            let total: f64 = readings.iter().map(|r| r.celsius).sum();
            Some(Average {
                sensor: *sensor,
                celsius: total / readings.len() as f64,
                readings: readings.len(),
            })
        })
        .tag(["averages"]);

    averages.sink(|avg: Average| -> Result<()> {
        tracing::info!(
            "sensor {} average {:.2}C over {} readings",
            avg.sensor,
            avg.celsius,
            avg.readings
        );
        Ok(())
    });
    Ok(topology)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    if cli.sensors == 0 {
        bail!("--sensors must be at least 1");
    }
    if cli.period_ms == 0 {
        bail!("--period-ms must be at least 1");
    }
    let config = match &cli.config {
        Some(path) => JobConfig::from_file(path)?,
        None => JobConfig::default(),
    };

    let topology = build(&cli)?;
    let provider = DirectProvider::new();
    let job = provider.submit_topology(&topology, &config, config.start_timeout())?;
    tracing::info!("job {} ({}) is running", job.id(), job.name());

    std::thread::sleep(Duration::from_millis(cli.duration_ms));

    job.state_change(Action::Close)?;
    if !job.wait_for_state(State::Closed, config.close_timeout()) {
        bail!("job {} did not close within {:?}", job.id(), config.close_timeout());
    }
    for entry in provider.job_registry().jobs() {
        println!("{}", serde_json::to_string_pretty(&entry)?);
    }
    Ok(())
}
