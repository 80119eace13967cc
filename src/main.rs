//! Junction console - headless client for the intersection simulator
//!
//! One subcommand per gateway operation, plus `watch`, which runs the live
//! polling loop against one intersection and prints every admitted snapshot
//! as a JSON line. Logs go to stderr; stdout carries command output only.
//!
//! Module structure:
//! - `domain/` - Entities, wire payloads and map projection
//! - `io/` - Gateway contract, HTTP client and mock server
//! - `services/` - Session state machine, poller, dispatcher, controller
//! - `render/` - Map scenes and metrics panel
//! - `infra/` - Config, metrics, logging

use anyhow::Context;
use clap::{Parser, Subcommand};
use junction_console::domain::types::{
    CityId, Direction, InjectVehicleRequest, IntersectionId, StartSimulationRequest, VehicleType,
};
use junction_console::infra::{logging, Config, Metrics};
use junction_console::io::{HttpGateway, SimulationGateway};
use junction_console::services::poller::{PollPayload, PollUpdate};
use junction_console::services::{Command, CommandDispatcher, CommandOutcome, PollingCoordinator, Refresh};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Interval between client metrics summaries while watching
const METRICS_LOG_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Parser, Debug)]
#[command(name = "junction-console", version, about = "Control client for the intersection simulator")]
struct Args {
    /// Path to TOML configuration file (falls back to CONFIG_FILE, then config/dev.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// Gateway origin, overrides JUNCTION_API_URL and the config file
    #[arg(long)]
    api_url: Option<String>,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// List cities
    Cities,
    /// List intersections, optionally for one city
    Intersections {
        #[arg(long)]
        city: Option<i64>,
    },
    /// Start a simulation run
    Start {
        intersection: i64,
        /// Run length in seconds (defaults to the configured value)
        #[arg(long)]
        duration: Option<u32>,
        #[arg(long)]
        speed: Option<f64>,
    },
    /// Stop a running simulation
    Stop { intersection: i64 },
    /// Recompute signal timings from current congestion
    Optimize { intersection: i64 },
    /// Inject one vehicle on a preset approach lane
    Inject {
        intersection: i64,
        /// CAR, BUS, TRUCK, TWO_WHEELER, AUTO, AMBULANCE, FIRE_ENGINE, POLICE
        #[arg(long, default_value = "CAR")]
        vehicle: String,
        /// NORTH, SOUTH, EAST or WEST
        #[arg(long, default_value = "NORTH")]
        direction: String,
        #[arg(long)]
        emergency: bool,
    },
    /// Advance a running simulation by one step
    Step {
        intersection: i64,
        #[arg(long)]
        dt: Option<f64>,
    },
    /// Poll vehicles and metrics until Ctrl+C
    Watch {
        intersection: i64,
        /// Start the simulation before polling
        #[arg(long)]
        start: bool,
        /// Poll period override in milliseconds
        #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
        interval_ms: Option<u64>,
    },
}

fn parse_direction(raw: &str) -> anyhow::Result<Direction> {
    Direction::ALL
        .into_iter()
        .find(|d| d.label().eq_ignore_ascii_case(raw.trim()))
        .with_context(|| format!("Unknown direction {raw}"))
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_outcome(outcome: &CommandOutcome) -> anyhow::Result<()> {
    match outcome {
        CommandOutcome::Started(ack) | CommandOutcome::Stopped(ack) | CommandOutcome::Stepped(ack) => {
            print_json(ack)
        }
        CommandOutcome::Optimized(report) => print_json(report),
        CommandOutcome::Injected(vehicle) => print_json(vehicle),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = Config::load(args.config.as_deref());
    logging::init_stderr(config.log_level());

    let base_url = config.resolve_api_base_url(args.api_url.as_deref());
    info!(
        config_file = %config.config_file(),
        api_base_url = %base_url,
        poll_interval_ms = %config.poll_interval_ms(),
        version = %env!("CARGO_PKG_VERSION"),
        git_hash = %env!("GIT_HASH"),
        "config_loaded"
    );

    let gateway: Arc<dyn SimulationGateway> = Arc::new(
        HttpGateway::new(&base_url, Duration::from_millis(config.api_timeout_ms()))
            .context("Failed to build gateway client")?,
    );
    let metrics = Arc::new(Metrics::new());
    let dispatcher = CommandDispatcher::new(gateway.clone(), metrics.clone());

    let command = match args.command {
        Cmd::Cities => return print_json(&gateway.list_cities().await?),
        Cmd::Intersections { city } => {
            return print_json(&gateway.list_intersections(city.map(CityId)).await?)
        }
        Cmd::Watch { intersection, start, interval_ms } => {
            let period = Duration::from_millis(interval_ms.unwrap_or(config.poll_interval_ms()));
            return watch(gateway, dispatcher, metrics, &config, IntersectionId(intersection), start, period)
                .await;
        }
        Cmd::Start { intersection, duration, speed } => Command::Start(StartSimulationRequest {
            intersection_id: IntersectionId(intersection),
            duration: duration.unwrap_or(config.sim_duration_secs()),
            speed_factor: speed.unwrap_or(config.sim_speed_factor()),
        }),
        Cmd::Stop { intersection } => Command::Stop(IntersectionId(intersection)),
        Cmd::Optimize { intersection } => Command::Optimize(IntersectionId(intersection)),
        Cmd::Inject { intersection, vehicle, direction, emergency } => {
            let vehicle_type = VehicleType::parse(&vehicle)
                .with_context(|| format!("Unknown vehicle type {vehicle}"))?;
            Command::Inject(InjectVehicleRequest {
                vehicle_type,
                intersection_id: IntersectionId(intersection),
                lane_id: parse_direction(&direction)?.preset_lane(),
                is_emergency: emergency,
            })
        }
        Cmd::Step { intersection, dt } => Command::Step { intersection: IntersectionId(intersection), dt },
    };

    let outcome = dispatcher
        .execute(&command)
        .await
        .with_context(|| format!("{} failed", command.name()))?;
    print_outcome(&outcome)
}

fn print_update(update: &PollUpdate) -> anyhow::Result<()> {
    let ticket = &update.ticket;
    let line = match &update.payload {
        PollPayload::Vehicles(Ok(vehicles)) => json!({
            "seq": ticket.seq,
            "intersection_id": ticket.intersection,
            "vehicles": vehicles,
        }),
        PollPayload::Metrics(Ok(metrics)) => json!({
            "seq": ticket.seq,
            "intersection_id": ticket.intersection,
            "metrics": metrics,
        }),
        // Failures are logged by the poller; the last good snapshot stands
        PollPayload::Vehicles(Err(_)) | PollPayload::Metrics(Err(_)) => return Ok(()),
    };
    println!("{}", serde_json::to_string(&line)?);
    Ok(())
}

async fn watch(
    gateway: Arc<dyn SimulationGateway>,
    dispatcher: CommandDispatcher,
    metrics: Arc<Metrics>,
    config: &Config,
    intersection: IntersectionId,
    start: bool,
    period: Duration,
) -> anyhow::Result<()> {
    if start {
        let command = Command::Start(StartSimulationRequest {
            intersection_id: intersection,
            duration: config.sim_duration_secs(),
            speed_factor: config.sim_speed_factor(),
        });
        dispatcher.execute(&command).await.context("start failed")?;
    }

    let (mut poller, mut updates) = PollingCoordinator::new(gateway, metrics.clone(), period);
    poller.start(intersection);
    poller.fetch_now(intersection, Refresh::Both);
    info!(intersection_id = %intersection, period_ms = %period.as_millis(), "watch_started");

    let mut report = tokio::time::interval(METRICS_LOG_INTERVAL);
    report.tick().await;
    let mut last_seq = [0u64; 2];

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown_signal_received");
                break;
            }
            _ = report.tick() => metrics.report().log(),
            update = updates.recv() => {
                let Some(update) = update else {
                    warn!("poll_channel_closed");
                    break;
                };
                let slot = match update.payload {
                    PollPayload::Vehicles(_) => 0,
                    PollPayload::Metrics(_) => 1,
                };
                if !poller.admits(&update.ticket) || update.ticket.seq <= last_seq[slot] {
                    metrics.record_stale_dropped();
                    continue;
                }
                let ok = matches!(
                    update.payload,
                    PollPayload::Vehicles(Ok(_)) | PollPayload::Metrics(Ok(_))
                );
                if ok {
                    last_seq[slot] = update.ticket.seq;
                }
                print_update(&update)?;
            }
        }
    }

    poller.cancel();
    metrics.report().log();
    Ok(())
}
