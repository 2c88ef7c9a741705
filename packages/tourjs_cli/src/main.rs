//! TourJS command line
//!
//! ```bash
//! # Ride 60 simulated seconds at 220 W up a 4 % grade
//! tourjs ride --watts 220 --seconds 60 --slope 4
//!
//! # Ride a fake power meter in real time
//! tourjs fake --seconds 10
//!
//! # Create a battleship map, then shoot at it
//! tourjs battleship new --map-id alice --seed 3 > alice.json
//! echo '{"type":2,"params":{"ixCol":4,"ixRow":4}}' > shot.json
//! tourjs battleship apply --map alice.json --turn shot.json --out alice.json
//!
//! # Real hardware (built with --features ble-central)
//! tourjs connect --power --seconds 30
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use rand::rngs::StdRng;
use rand::SeedableRng;

use tourjs::battleship::{BattleshipGameMap, BattleshipMapCreate, Turn};
use tourjs::device::drivers::FakeDevice;
use tourjs::device::{DeviceFlags, LocalDevices, TelemetryRecipient, TelemetryRecorder};
use tourjs::physics::{ElevationMap, Rider, UserTypeFlags};
use tourjs::TourConfig;

/// Physics tick rate used by every riding command.
const TICKS_PER_SECOND: u32 = 4;

#[derive(Parser, Debug)]
#[command(name = "tourjs")]
#[command(version, about = "TourJS ride simulation and tools", long_about = None)]
struct Cli {
    /// JSON config file; defaults apply when omitted
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Simulate a rider holding constant power, in simulated time
    Ride {
        #[arg(long, default_value = "200")]
        watts: f64,

        /// Rider mass, kg
        #[arg(long, default_value = "75")]
        mass: f64,

        #[arg(long, default_value = "60")]
        seconds: u32,

        /// Course grade, percent
        #[arg(long, default_value = "0")]
        slope: f64,
    },

    /// Ride a fake power meter through the device registry in real time
    Fake {
        #[arg(long, default_value = "10")]
        seconds: u32,
    },

    /// Battleship map tools
    Battleship {
        #[command(subcommand)]
        action: BattleshipAction,
    },

    /// Discover a BLE device and log its telemetry
    #[cfg(feature = "ble-central")]
    Connect {
        /// Look for a heart-rate strap instead of a power source
        #[arg(long, conflicts_with = "power")]
        hrm: bool,

        #[arg(long)]
        power: bool,

        #[arg(long, default_value = "30")]
        seconds: u64,
    },
}

#[derive(Subcommand, Debug)]
enum BattleshipAction {
    /// Print a map with a randomly placed fleet
    New {
        #[arg(long)]
        map_id: String,

        /// Seed for reproducible placement
        #[arg(long)]
        seed: Option<u64>,

        /// Grid size; the config value when omitted
        #[arg(long)]
        grid: Option<i32>,
    },

    /// Apply a turn to a map and print the result
    Apply {
        /// Map snapshot JSON
        #[arg(long)]
        map: PathBuf,

        /// Turn JSON, e.g. {"type":2,"params":{"ixCol":1,"ixRow":0}}
        #[arg(long)]
        turn: PathBuf,

        /// Write the updated snapshot here
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => TourConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => TourConfig::default(),
    };

    match cli.command {
        Commands::Ride {
            watts,
            mass,
            seconds,
            slope,
        } => ride(&config, watts, mass, seconds, slope),
        Commands::Fake { seconds } => fake(&config, seconds).await,
        Commands::Battleship { action } => battleship(&config, action),
        #[cfg(feature = "ble-central")]
        Commands::Connect {
            hrm,
            power: _,
            seconds,
        } => connect(&config, hrm, seconds).await,
    }
}

fn tick_interval() -> chrono::Duration {
    chrono::Duration::milliseconds(1000 / i64::from(TICKS_PER_SECOND))
}

fn print_display(rider: &Rider) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string(&rider.display())?);
    Ok(())
}

fn ride(config: &TourConfig, watts: f64, mass: f64, seconds: u32, slope: f64) -> anyhow::Result<()> {
    let start: DateTime<Utc> = Utc::now();
    let recorder = Arc::new(TelemetryRecorder::new());
    recorder.notify_power(start, watts);

    let map = ElevationMap::constant_slope(100_000.0, slope / 100.0)
        .context("building course")?;
    let mut rider = Rider::new("Rider", mass, watts, UserTypeFlags::LOCAL, recorder, start)
        .with_constants(config.physics.clone());

    let mut now = start;
    for tick in 1..=seconds * TICKS_PER_SECOND {
        now += tick_interval();
        rider.tick(now, &map, &[]).context("physics tick")?;
        if tick % TICKS_PER_SECOND == 0 {
            print_display(&rider)?;
        }
    }
    Ok(())
}

async fn fake(config: &TourConfig, seconds: u32) -> anyhow::Result<()> {
    let recorder = Arc::new(TelemetryRecorder::new());
    let mut devices = LocalDevices::new(Arc::clone(&recorder));
    devices
        .set_local_user_device(FakeDevice::spawn(config.fake_device_config()), DeviceFlags::ALL)
        .await;

    let map = ElevationMap::flat(100_000.0).context("building course")?;
    let mut rider = Rider::new(
        "Rider",
        config.device.rider_mass_kg,
        config.device.fake_base_watts,
        UserTypeFlags::LOCAL,
        recorder,
        Utc::now(),
    )
    .with_constants(config.physics.clone());

    let mut ticker =
        tokio::time::interval(Duration::from_millis(1000 / u64::from(TICKS_PER_SECOND)));
    for tick in 0..=seconds * TICKS_PER_SECOND {
        ticker.tick().await;
        rider.tick(Utc::now(), &map, &[]).context("physics tick")?;
        if tick > 0 && tick % TICKS_PER_SECOND == 0 {
            print_display(&rider)?;
        }
    }

    devices.disconnect_all().await;
    Ok(())
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let data = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_slice(&data).with_context(|| format!("parsing {}", path.display()))
}

fn battleship(config: &TourConfig, action: BattleshipAction) -> anyhow::Result<()> {
    match action {
        BattleshipAction::New { map_id, seed, grid } => {
            let mut rng = match seed {
                Some(seed) => StdRng::seed_from_u64(seed),
                None => StdRng::from_entropy(),
            };
            let grid = grid.unwrap_or(config.battleship.grid_size);
            let map = BattleshipGameMap::random_fleet(map_id, grid, &mut rng)?;
            println!("{}", serde_json::to_string_pretty(&map.to_map_create())?);
        }
        BattleshipAction::Apply { map, turn, out } => {
            let create: BattleshipMapCreate = read_json(&map)?;
            let mut game_map = BattleshipGameMap::inflate(create)?;

            let turn_json = std::fs::read_to_string(&turn)
                .with_context(|| format!("reading {}", turn.display()))?;
            let turn = Turn::from_json(&turn_json)?;

            let result = game_map.apply_move(&turn)?;
            println!("{}", serde_json::to_string(&result)?);

            if let Some(out) = out {
                let snapshot = serde_json::to_string_pretty(&game_map.to_map_create())?;
                std::fs::write(&out, snapshot)
                    .with_context(|| format!("writing {}", out.display()))?;
            }
        }
    }
    Ok(())
}

#[cfg(feature = "ble-central")]
async fn connect(config: &TourConfig, hrm: bool, seconds: u64) -> anyhow::Result<()> {
    use tourjs::ble::btleplug_central::BtleplugCentral;
    use tourjs::device::DeviceFactory;

    let central = BtleplugCentral::new(Duration::from_secs(10), config.ble.notification_buffer)
        .await
        .context("opening Bluetooth adapter")?;
    let factory = DeviceFactory::new(
        Arc::new(central),
        config.session_config(),
        config.driver_options(),
    );

    let device = if hrm {
        factory.find_hrm().await?
    } else {
        factory.find_powermeter().await?
    };
    log::info!(
        "Connected to {} ({}, {})",
        device.name(),
        device.type_description(),
        device.device_id()
    );

    let mut events = device.telemetry().subscribe();
    let recorder = Arc::new(TelemetryRecorder::new());
    let mut devices = LocalDevices::new(recorder);
    let flags = if hrm {
        DeviceFlags::HRM
    } else {
        DeviceFlags::ALL_BUT_HRM
    };
    devices.set_local_user_device(device, flags).await;

    let deadline = tokio::time::sleep(Duration::from_secs(seconds));
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            _ = &mut deadline => break,
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(event) => log::info!("{:?}: {:.0}{}", event.kind, event.value, event.kind.unit()),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    log::warn!("Dropped {} telemetry events", n);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    devices.disconnect_all().await;
    Ok(())
}
