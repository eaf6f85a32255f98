//! Vehicle reading simulator
//!
//! Posts one batch per round to the gatekeeper: one reading for every
//! (vehicle, sensor) pair, drawn around each sensor's nominal value, with an
//! occasional out-of-range spike.
//!
//! Usage:
//!   simulator --url http://127.0.0.1:8000/sensor --vehicles CAR001,CAR002 --rounds 100

use std::time::Duration;

use clap::Parser;
use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde_json::json;
use tracing::{info, warn};

/// (sensor, nominal mean, spread, hard floor, hard ceiling, integer-valued)
const SENSORS: [(&str, f64, f64, f64, f64, bool); 9] = [
    ("Battery voltage", 13.2, 0.5, 12.0, 14.5, false),
    ("Fuel trim", 0.0, 2.0, -5.0, 5.0, false),
    ("Alternator output", 14.1, 0.3, 13.5, 14.8, false),
    ("Misfire count", 1.0, 1.2, 0.0, 5.0, true),
    ("Engine RPMs", 2100.0, 550.0, 800.0, 3500.0, true),
    ("Engine run time", 20000.0, 9000.0, 100.0, 50000.0, true),
    ("Coolant temperature", 88.0, 6.0, 70.0, 100.0, true),
    ("Engine oil temperature", 92.0, 10.0, 60.0, 110.0, true),
    ("Transmission oil temperature", 90.0, 12.0, 60.0, 120.0, true),
];

#[derive(Parser)]
#[command(name = "simulator")]
#[command(about = "Generate fake vehicle sensor readings and post them to the gatekeeper")]
struct Cli {
    /// Ingestion endpoint
    #[arg(short, long, default_value = "http://127.0.0.1:8000/sensor")]
    url: String,

    /// Vehicle ids (comma-separated)
    #[arg(short, long, default_value = "CAR001,CAR002", value_delimiter = ',')]
    vehicles: Vec<String>,

    /// Pause between rounds in milliseconds
    #[arg(short, long, default_value = "2000")]
    interval_ms: u64,

    /// Rounds to send (0 = run forever)
    #[arg(short, long, default_value = "0")]
    rounds: u64,

    /// Probability that a reading is replaced by an out-of-range spike
    #[arg(long, default_value = "0.02")]
    spike_rate: f64,
}

fn generate_value<R: Rng>(rng: &mut R, sensor: usize, spike_rate: f64) -> f64 {
    let (_, mean, spread, floor, ceiling, integer) = SENSORS[sensor];

    let value = if rng.random_bool(spike_rate.clamp(0.0, 1.0)) {
        // Well past the ceiling, like a failing sensor or an overheating engine
        ceiling + (ceiling - floor).abs() * rng.random_range(0.3..1.0)
    } else {
        match Normal::new(mean, spread) {
            Ok(dist) => dist.sample(rng).clamp(floor, ceiling),
            Err(_) => mean,
        }
    };

    if integer {
        value.round()
    } else {
        (value * 100.0).round() / 100.0
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    info!(url = %cli.url, vehicles = ?cli.vehicles, "Simulator starting");

    let client = reqwest::Client::new();
    let mut rng = rand::rng();
    let mut round = 0u64;
    let mut sent = 0usize;
    let mut failed = 0usize;

    loop {
        if cli.rounds > 0 && round >= cli.rounds {
            break;
        }
        round += 1;

        let mut batch = Vec::with_capacity(cli.vehicles.len() * SENSORS.len());
        for vehicle in &cli.vehicles {
            for (idx, (sensor, ..)) in SENSORS.iter().enumerate() {
                batch.push(json!({
                    "vehicle_id": vehicle,
                    "sensor": sensor,
                    "value": generate_value(&mut rng, idx, cli.spike_rate),
                    "timestamp": chrono::Utc::now(),
                }));
            }
        }

        match client.post(&cli.url).json(&batch).send().await {
            Ok(resp) if resp.status().is_success() => {
                sent += batch.len();
                info!(round, readings = batch.len(), "Batch sent successfully.");
            }
            Ok(resp) => {
                failed += batch.len();
                warn!(round, status = %resp.status(), "Batch rejected");
            }
            Err(e) => {
                failed += batch.len();
                warn!(round, error = %e, "Connection error");
            }
        }

        tokio::time::sleep(Duration::from_millis(cli.interval_ms)).await;
    }

    info!(rounds = round, sent, failed, "Simulator finished");
}
