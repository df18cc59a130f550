use std::time::Duration;

use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand, ValueEnum};
use nordkapp_heater::{HeaterClient, HeaterSnapshot, RunMode, SessionConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Watch and control a Nordkapp diesel heater over Bluetooth Low Energy
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// Bluetooth address of the heater, e.g. AA:BB:CC:DD:EE:FF
    address: String,

    /// Seconds between refreshes
    #[arg(long, default_value_t = 15)]
    interval: u64,

    /// Seconds to wait for the link when connecting
    #[arg(long, default_value_t = 30)]
    connect_timeout: u64,

    #[command(subcommand)]
    command: Option<Action>,
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum Action {
    /// Keep the session alive and print every status update (default)
    Watch,
    On,
    Off,
    /// Set the target temperature in °C
    Temp { celsius: u8 },
    /// Set the manual gear, 1-10
    Gear { gear: u8 },
    Mode { mode: ModeArg },
    ClearError,
    Ventilate,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum ModeArg {
    Auto,
    Manual,
    StartStop,
}

impl From<ModeArg> for RunMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Auto => RunMode::Auto,
            ModeArg::Manual => RunMode::Manual,
            ModeArg::StartStop => RunMode::StartStop,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = SessionConfig::new(&cli.address)
        .with_connect_timeout(Duration::from_secs(cli.connect_timeout))
        .with_poll_interval(Duration::from_secs(cli.interval));
    let heater = HeaterClient::bluetooth(config).await?;

    let result = match cli.command.unwrap_or(Action::Watch) {
        Action::Watch => watch(&heater).await,
        action => run_once(&heater, action).await,
    };

    heater.shutdown().await;
    result
}

async fn watch(heater: &HeaterClient) -> anyhow::Result<()> {
    let mut updates = heater.subscribe();
    let mut ticker = tokio::time::interval(heater.config().poll_interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => heater.refresh().await,
            changed = updates.changed() => {
                changed?;
                print_snapshot(&updates.borrow_and_update());
            }
            _ = tokio::signal::ctrl_c() => return Ok(()),
        }
    }
}

async fn run_once(heater: &HeaterClient, action: Action) -> anyhow::Result<()> {
    heater.refresh().await;
    if !heater.is_connected() {
        return Err(anyhow!("Could not connect to {}", heater.config().address));
    }

    match action {
        Action::Watch => return watch(heater).await,
        Action::On => heater.power_on().await,
        Action::Off => heater.power_off().await,
        Action::Temp { celsius } => heater.set_temperature(celsius).await,
        Action::Gear { gear } => heater.set_gear(gear).await,
        Action::Mode { mode } => heater.set_mode(mode.into()).await,
        Action::ClearError => heater.clear_error().await,
        Action::Ventilate => heater.ventilation().await,
    }
    .with_context(|| format!("{action:?} failed"))?;

    info!(?action, "Command sent");
    // Give the heater a moment to act before the link goes away
    tokio::time::sleep(Duration::from_secs(1)).await;
    print_snapshot(&heater.snapshot());
    Ok(())
}

fn print_snapshot(snapshot: &HeaterSnapshot) {
    if !snapshot.available {
        println!("heater unavailable");
        return;
    }
    let status = snapshot.status().map_or("unknown", |s| s.name());
    let temp = |t: Option<f32>| t.map_or("n/a".to_string(), |t| format!("{t:.1} °C"));
    println!(
        "{status} mode={:?} gear={} target={} °C ambient={} shell={} {:.1} V fan={} rpm pump={:.1} Hz error={}",
        snapshot.mode(),
        snapshot.gear,
        snapshot.target_temp,
        temp(snapshot.ambient_temp),
        temp(snapshot.shell_temp),
        snapshot.voltage,
        snapshot.fan_rpm,
        snapshot.pump_freq,
        snapshot.error_code,
    );
}
