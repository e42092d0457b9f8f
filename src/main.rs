mod ble;
mod config;
mod device_scanner;
mod display;
mod error;
mod link;
mod measurement;
mod sample_channel;
mod session;
mod shutdown;
mod statistics;
mod stop_signal;

use ble::BleConnector;
use chrono::Local;
use config::Config;
use device_scanner::{
    describe_characteristic, list_notify_characteristics, pick_heart_rate_device, scan_devices,
};
use display::{format_state, format_statistics, format_summary, HeartRateDisplay};
use error::{ConfigError, ConnectionError};
use sample_channel::sample_channel;
use session::SessionManager;
use std::error::Error;
use uuid::Uuid;

const USAGE: &str = "usage: pulse-monitor [ADDRESS [CHARACTERISTIC_UUID]]
       pulse-monitor --list [ADDRESS]";

fn main() {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            log::warn!("{}, using defaults", e);
            Config::default()
        }
    };

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            log::error!("{}", ConnectionError::RuntimeCreation(e.to_string()));
            std::process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(run(config)) {
        log::error!("{}", e);
        std::process::exit(1);
    }
}

async fn run(config: Config) -> Result<(), Box<dyn Error>> {
    let mut args = std::env::args().skip(1);
    let address_arg = args.next();
    match address_arg.as_deref() {
        Some("-h") | Some("--help") => {
            println!("{}", USAGE);
            return Ok(());
        }
        Some("--list") => return list(&config, args.next()).await,
        _ => {}
    }

    let characteristic = match args.next() {
        Some(uuid) => Uuid::parse_str(uuid.trim()).map_err(ConfigError::InvalidCharacteristic)?,
        None => config.characteristic()?,
    };
    let address = match address_arg.or_else(|| config.device_address.clone()) {
        Some(address) => address,
        None => select_device(&config).await?,
    };

    let (sender, receiver) = sample_channel();
    let handle = SessionManager::new(BleConnector::new(), config.session(), sender)
        .start(address, characteristic)?;

    let mut interrupted = std::pin::pin!(async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::warn!("Ctrl+C handler unavailable: {}", e);
            std::future::pending::<()>().await;
        }
    });
    let mut poll = tokio::time::interval(config.poll_interval());
    let mut display = HeartRateDisplay::new();
    let mut last_state = handle.state();
    println!("{}", format_state(last_state));

    loop {
        tokio::select! {
            _ = &mut interrupted => break,
            _ = poll.tick() => {
                let state = handle.state();
                if state != last_state {
                    println!("{}", format_state(state));
                    last_state = state;
                }

                if let Some(line) = display.update(receiver.try_pop_all()) {
                    println!(
                        "[{}] {}    ({})",
                        Local::now().format("%H:%M:%S"),
                        line,
                        format_statistics(&handle.statistics())
                    );
                }

                if !handle.is_running() || receiver.is_closed() {
                    break;
                }
            }
        }
    }

    let stopping = handle.clone();
    let timeout = config.shutdown_timeout();
    let outcome = tokio::task::spawn_blocking(move || stopping.shutdown(timeout)).await?;
    if let Err(e) = outcome {
        log::warn!("{}, exiting anyway", e);
    }

    println!("Session summary: {}", format_summary(&handle.statistics()));
    Ok(())
}

/// Print nearby devices, or the notify characteristics of one device.
async fn list(config: &Config, address: Option<String>) -> Result<(), Box<dyn Error>> {
    match address {
        None => {
            let devices = scan_devices(config.scan_duration()).await?;
            if devices.is_empty() {
                println!("No devices found");
            }
            for device in &devices {
                println!("{}", device);
            }
        }
        Some(address) => {
            let characteristics =
                list_notify_characteristics(&address, config.scan_duration()).await?;
            println!("Notify characteristics of {}:", address);
            for uuid in characteristics {
                println!("  {}", describe_characteristic(uuid));
            }
        }
    }
    Ok(())
}

async fn select_device(config: &Config) -> Result<String, Box<dyn Error>> {
    let devices = scan_devices(config.scan_duration()).await?;
    for device in &devices {
        log::info!("Found {}", device);
    }

    let device = pick_heart_rate_device(&devices)
        .ok_or("No heart rate sensor found; run with --list and pass its address")?;
    println!("Using {} ({})", device.name, device.id);
    Ok(device.id.clone())
}
