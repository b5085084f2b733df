//! AAG CloudWatcher CLI
//!
//! Usage:
//!   aag read -c aag.yaml                # Print readings as JSON lines
//!   aag read -c aag.yaml -n 1           # Single reading
//!   aag read --port /dev/ttyUSB1 --store
//!   aag serve --db-file /var/lib/aag/weather.db  # Also serves /download-db
//!   aag serve -c aag.yaml               # Poll and serve JSON over HTTP
//!   aag ports                           # List serial ports

use aag_weather::http::{run_http_server, AppState};
use aag_weather::config::StoreConfig;
use aag_weather::{
    CaptureOptions, Config, CycleResult, DeviceState, FrameReader, Poller, SerialConnector,
    WeatherStore,
};
use argh::FromArgs;
use std::path::Path;
use std::time::Duration;
use tokio::sync::watch;

/// Reader and JSON server for the Lunatico AAG CloudWatcher
#[derive(FromArgs)]
struct Args {
    #[argh(subcommand)]
    command: Command,
}

#[derive(FromArgs)]
#[argh(subcommand)]
enum Command {
    Read(ReadArgs),
    Serve(ServeArgs),
    Ports(PortsArgs),
}

/// Read the device and print every reading as a JSON line
#[derive(FromArgs)]
#[argh(subcommand, name = "read")]
struct ReadArgs {
    /// path to the configuration file (optional, uses defaults)
    #[argh(option, short = 'c')]
    config: Option<String>,

    /// serial port, overrides device.port
    #[argh(option, short = 'p')]
    port: Option<String>,

    /// number of readings to take (default: run until Ctrl+C)
    #[argh(option, short = 'n')]
    count: Option<usize>,

    /// seconds between readings, overrides poll.interval_secs
    #[argh(option, short = 'd')]
    delay: Option<u64>,

    /// also append readings to the weather store
    #[argh(switch, short = 's')]
    store: bool,

    /// weather store file, overrides store.path and $DB_FILE
    #[argh(option)]
    db_file: Option<String>,
}

/// Poll the device and serve readings over HTTP
#[derive(FromArgs)]
#[argh(subcommand, name = "serve")]
struct ServeArgs {
    /// path to the configuration file (optional, uses defaults)
    #[argh(option, short = 'c')]
    config: Option<String>,

    /// serial port, overrides device.port
    #[argh(option, short = 'p')]
    port: Option<String>,

    /// listen address, overrides http.listen
    #[argh(option, short = 'l')]
    listen: Option<String>,

    /// weather store file, overrides store.path and $DB_FILE
    #[argh(option)]
    db_file: Option<String>,
}

/// List available serial ports
#[derive(FromArgs)]
#[argh(subcommand, name = "ports")]
struct PortsArgs {}

fn load_config(path: Option<&str>, port: Option<String>, db_file: Option<String>) -> Config {
    let mut config = match path {
        Some(path) => match Config::from_file(path) {
            Ok(c) => c,
            Err(e) => {
                log::error!("Failed to load config from '{}': {}", path, e);
                std::process::exit(1);
            }
        },
        None => {
            log::info!("No config file specified, using defaults");
            Config::default()
        }
    };
    if let Some(port) = port {
        config.device.port = port;
    }
    config
        .store
        .override_path(std::env::var(StoreConfig::DB_FILE_ENV).ok(), db_file);
    if let Err(e) = config.validate().and_then(|_| config.device.check_path()) {
        log::error!("{}", e);
        std::process::exit(1);
    }
    config
}

fn build_poller(config: &Config) -> (Poller<SerialConnector>, aag_weather::QueryService) {
    let (writer, query) = DeviceState::new(
        config.poll.history_size,
        Duration::from_secs(config.poll.stale_after_secs),
    );
    let reader = FrameReader::new(
        SerialConnector::from_config(&config.device),
        CaptureOptions::from(&config.device),
    );
    (Poller::new(reader, writer, config), query)
}

async fn run_read(args: ReadArgs, shutdown: watch::Receiver<()>) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = load_config(args.config.as_deref(), args.port, args.db_file);
    if let Some(delay) = args.delay {
        config.poll.interval_secs = delay.max(1);
        config.poll.max_backoff_secs = config.poll.max_backoff_secs.max(config.poll.interval_secs);
    }

    let (mut poller, _query) = build_poller(&config);
    if args.store || config.store.enabled {
        poller = poller.with_store(WeatherStore::open_shared(Path::new(&config.store.path))?);
    }

    let mut shutdown = shutdown;
    let mut taken = 0;
    loop {
        let (result, delay) = tokio::select! {
            outcome = poller.poll_once() => outcome,
            _ = shutdown.changed() => break,
        };
        match result {
            CycleResult::Published(reading) => {
                println!("{}", serde_json::to_string(&reading)?);
                taken += 1;
            }
            CycleResult::Failed(e) => log::warn!("No reading: {}", e),
        }
        if args.count.is_some_and(|n| taken >= n) {
            break;
        }
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.changed() => break,
        }
    }
    Ok(())
}

async fn run_serve(args: ServeArgs, shutdown: watch::Receiver<()>) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = load_config(args.config.as_deref(), args.port, args.db_file);
    if let Some(listen) = args.listen {
        config.http.listen = listen;
    }

    let (mut poller, query) = build_poller(&config);
    let store = if config.store.enabled {
        let store = WeatherStore::open_shared(Path::new(&config.store.path))?;
        poller = poller.with_store(store.clone());
        Some(store)
    } else {
        None
    };

    let poll_task = tokio::spawn(poller.run(shutdown.clone()));

    let state = AppState { query, store };
    let served = run_http_server(state, &config.http.listen, shutdown).await;
    if served.is_err() {
        poll_task.abort();
    }
    served.map_err(|e| e as Box<dyn std::error::Error>)?;

    poll_task.await?;
    Ok(())
}

fn list_ports() -> Result<(), Box<dyn std::error::Error>> {
    let ports = serialport::available_ports()?;
    if ports.is_empty() {
        println!("No serial ports found");
    }
    for port in ports {
        let kind = match port.port_type {
            serialport::SerialPortType::UsbPort(info) => format!(
                "USB {:04x}:{:04x} {}",
                info.vid,
                info.pid,
                info.product.unwrap_or_default()
            ),
            serialport::SerialPortType::PciPort => "PCI".to_string(),
            serialport::SerialPortType::BluetoothPort => "Bluetooth".to_string(),
            serialport::SerialPortType::Unknown => "unknown".to_string(),
        };
        println!("{}\t{}", port.port_name, kind);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Args = argh::from_env();

    // Create shutdown channel
    let (shutdown_tx, shutdown_rx) = watch::channel(());

    // Set up Ctrl+C handler
    ctrlc::set_handler(move || {
        log::info!("Received Ctrl+C, shutting down gracefully...");
        shutdown_tx.send(()).ok();
    })?;

    match args.command {
        Command::Read(args) => run_read(args, shutdown_rx).await?,
        Command::Serve(args) => run_serve(args, shutdown_rx).await?,
        Command::Ports(_) => list_ports()?,
    }

    Ok(())
}
