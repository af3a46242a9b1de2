mod telemetry;

use clap::Parser;
use std::time::Duration;
use telemetry::{DeviceSettings, SimulatedRoom};
use tracing::{error, info, warn};

/// Emulates a fleet of room controllers posting reports to the ingestor.
#[derive(Debug, Parser)]
#[command(name = "room-simulator", version)]
struct Args {
    /// Base URL of the ingestor.
    #[arg(long, env = "INGESTOR_URL", default_value = "http://localhost:8080")]
    url: String,

    /// Number of simulated rooms (`room1`, `room2`, ...).
    #[arg(long, env = "DEVICES", default_value_t = 2)]
    devices: usize,

    /// Seconds between report rounds.
    #[arg(long, env = "INTERVAL_SECS", default_value_t = 10)]
    interval_secs: u64,

    #[arg(long, env = "TEMP_MIN", default_value_t = 20.0)]
    temp_min: f64,

    #[arg(long, env = "TEMP_MAX", default_value_t = 30.0)]
    temp_max: f64,

    /// Save the thresholds through /settings once and leave them out of reports.
    #[arg(long, env = "CONFIGURE")]
    configure: bool,

    /// Probability per tick that a room jumps out of its normal drift.
    #[arg(long, env = "EXCURSION_CHANCE", default_value_t = 0.05)]
    excursion_chance: f64,

    /// Stop after this many rounds (0 = run forever).
    #[arg(long, env = "ROUNDS", default_value_t = 0)]
    rounds: u64,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::fmt::init();

    info!("Starting room simulator");
    info!(
        "Ingestor: {}, Devices: {}, Interval: {}s",
        args.url, args.devices, args.interval_secs
    );

    let client = match reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
    {
        Ok(client) => client,
        Err(e) => {
            error!("Failed to build HTTP client: {}", e);
            std::process::exit(1);
        }
    };

    let mut rng = rand::thread_rng();
    let mut rooms: Vec<SimulatedRoom> = (1..=args.devices)
        .map(|i| SimulatedRoom::new(format!("room{}", i), &mut rng))
        .collect();

    if args.configure {
        for room in &rooms {
            configure(&client, &args, &room.device_id).await;
        }
    }

    let excursion_chance = args.excursion_chance.clamp(0.0, 1.0);
    let mut ticker = tokio::time::interval(Duration::from_secs(args.interval_secs.max(1)));
    let mut round = 0u64;

    loop {
        ticker.tick().await;
        round += 1;

        for room in rooms.iter_mut() {
            room.step(&mut rng, excursion_chance);
            let report = room.report(args.temp_min, args.temp_max, !args.configure);

            match client
                .post(format!("{}/report", args.url))
                .json(&report)
                .send()
                .await
            {
                Ok(response) if response.status().is_success() => {
                    info!(
                        "{} {:.1}°C {:.1}% {} -> {}",
                        report.device_id,
                        report.temperature,
                        report.humidity,
                        report.status,
                        response.status()
                    );
                }
                Ok(response) => {
                    let status = response.status();
                    let body = response.text().await.unwrap_or_default();
                    warn!("{} rejected with {}: {}", report.device_id, status, body);
                }
                Err(e) => {
                    warn!("Failed to post report for {}: {}", report.device_id, e);
                }
            }
        }

        if args.rounds > 0 && round >= args.rounds {
            info!("Completed {} rounds", round);
            break;
        }
    }
}

async fn configure(client: &reqwest::Client, args: &Args, device_id: &str) {
    let settings = DeviceSettings {
        device_id: device_id.to_string(),
        temp_min: args.temp_min,
        temp_max: args.temp_max,
    };

    match client
        .post(format!("{}/settings", args.url))
        .json(&settings)
        .send()
        .await
    {
        Ok(response) if response.status().is_success() => {
            info!(
                "Configured {} with {}..{}°C",
                device_id, args.temp_min, args.temp_max
            );
        }
        Ok(response) => warn!("Configuring {} failed: {}", device_id, response.status()),
        Err(e) => warn!("Configuring {} failed: {}", device_id, e),
    }
}
