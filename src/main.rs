//! AETHERIS fleet ingestion service - Main Entry Point

use aetheris_fleet::commands::CommandPublisher;
use aetheris_fleet::config::FleetConfig;
use aetheris_fleet::error::{FleetError, FleetResult};
use aetheris_fleet::observability::{
    health::HealthServer, init_default_logging, init_logging, logging, LogFormat,
};
use aetheris_fleet::protocol::{Command, FaultType, Position, ScanType};
use aetheris_fleet::session::FleetSession;
use aetheris_fleet::transport::mqtt::MqttClient;
use aetheris_fleet::transport::{PublishOutcome, TransportError};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::RwLock;
use tracing::{error, info, warn, Instrument, Level};

const DEFAULT_CONFIG_PATHS: [&str; 2] = ["fleet.toml", "config/fleet.toml"];

/// Real-time telemetry ingestion for the AETHERIS inspection fleet
#[derive(Parser)]
#[command(name = "aetheris-fleet")]
#[command(about = "Fleet telemetry ingestion and command service for AETHERIS robots")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Verbose logging (-v debug, -vv trace); overrides LOG_LEVEL
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest fleet telemetry until interrupted
    Run,
    /// Validate configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
    /// Publish a single command and exit
    Command {
        #[command(flatten)]
        target: CommandTarget,

        #[command(subcommand)]
        action: CommandAction,
    },
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct CommandTarget {
    /// Robot to address, e.g. RV-001
    #[arg(long, value_name = "ROBOT_ID")]
    robot: Option<String>,

    /// Address every robot
    #[arg(long)]
    broadcast: bool,
}

#[derive(Subcommand)]
enum CommandAction {
    Stop,
    EmergencyStop,
    ReturnToBase,
    MoveTo {
        x: f64,
        y: f64,
        z: f64,
        /// Speed in m/s
        #[arg(long)]
        speed: Option<f64>,
    },
    Scan {
        #[arg(value_enum)]
        scan_type: ScanTypeArg,
    },
    Patrol {
        route_id: String,
    },
    Investigate {
        anomaly_id: String,
    },
    InjectFault {
        #[arg(value_enum)]
        fault_type: FaultTypeArg,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ScanTypeArg {
    Full,
    LeakDetection,
    Thermal,
    Ultrasonic,
    Visual,
}

#[derive(Clone, Copy, ValueEnum)]
enum FaultTypeArg {
    LowBattery,
    SensorFailure,
    CommDropout,
    MotorFailure,
    GpsDrift,
}

impl From<ScanTypeArg> for ScanType {
    fn from(arg: ScanTypeArg) -> Self {
        match arg {
            ScanTypeArg::Full => ScanType::Full,
            ScanTypeArg::LeakDetection => ScanType::LeakDetection,
            ScanTypeArg::Thermal => ScanType::Thermal,
            ScanTypeArg::Ultrasonic => ScanType::Ultrasonic,
            ScanTypeArg::Visual => ScanType::Visual,
        }
    }
}

impl From<FaultTypeArg> for FaultType {
    fn from(arg: FaultTypeArg) -> Self {
        match arg {
            FaultTypeArg::LowBattery => FaultType::LowBattery,
            FaultTypeArg::SensorFailure => FaultType::SensorFailure,
            FaultTypeArg::CommDropout => FaultType::CommDropout,
            FaultTypeArg::MotorFailure => FaultType::MotorFailure,
            FaultTypeArg::GpsDrift => FaultType::GpsDrift,
        }
    }
}

impl From<CommandAction> for Command {
    fn from(action: CommandAction) -> Self {
        match action {
            CommandAction::Stop => Command::Stop,
            CommandAction::EmergencyStop => Command::EmergencyStop,
            CommandAction::ReturnToBase => Command::ReturnToBase,
            CommandAction::MoveTo { x, y, z, speed } => Command::MoveTo {
                target: Position::new(x, y, z),
                speed,
            },
            CommandAction::Scan { scan_type } => Command::PerformScan {
                scan_type: scan_type.into(),
            },
            CommandAction::Patrol { route_id } => Command::StartPatrol { route_id },
            CommandAction::Investigate { anomaly_id } => Command::Investigate { anomaly_id },
            CommandAction::InjectFault { fault_type } => Command::InjectFault {
                fault_type: fault_type.into(),
            },
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_observability(cli.verbose);

    info!(
        "Starting AETHERIS fleet service v{}",
        env!("CARGO_PKG_VERSION")
    );

    let config = match load_configuration(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e.public_message());
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run => run_service(config).await,
        Commands::Config { show } => handle_config_command(&config, show),
        Commands::Command { target, action } => {
            send_single_command(config, target, action.into()).await
        }
    };

    if let Err(e) = result {
        error!("Command failed: {}", e.public_message());
        process::exit(1);
    }

    info!("Application shutdown complete");
}

fn init_observability(verbose: u8) {
    let level = match verbose {
        0 => return init_default_logging(),
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "json".to_string());
    init_logging(level, LogFormat::parse(&format), false);
}

fn load_configuration(config_path: Option<&Path>) -> FleetResult<FleetConfig> {
    if let Some(path) = config_path {
        info!("Loading configuration from: {}", path.display());
        return Ok(FleetConfig::load_from_file(path)?);
    }

    for path_str in DEFAULT_CONFIG_PATHS {
        let path = PathBuf::from(path_str);
        if path.exists() {
            info!("Loading configuration from: {}", path.display());
            return Ok(FleetConfig::load_from_file(&path)?);
        }
    }

    Err(FleetError::invalid_input(
        "No configuration file found. Provide one with -c/--config or create fleet.toml",
    ))
}

/// Transport factory for creating the broker connection
fn create_mqtt_transport(config: &FleetConfig) -> FleetResult<MqttClient> {
    Ok(MqttClient::new(
        &config.dashboard.client_id_prefix,
        config.mqtt.clone(),
    )?)
}

async fn run_service(config: FleetConfig) -> FleetResult<()> {
    let transport = create_mqtt_transport(&config)?;
    let api_port = config.api.port;
    let service_id = config.dashboard.client_id_prefix.clone();
    let mut session = FleetSession::new(config, transport);

    let health_handle = if api_port == 0 {
        info!("HTTP API disabled");
        None
    } else {
        let health_server = Arc::new(HealthServer::new(
            service_id,
            api_port,
            session.store().clone(),
        ));
        Some(tokio::spawn(health_server.start()))
    };

    session.start().await?;

    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())
        .map_err(|e| FleetError::invalid_input(format!("Cannot install SIGINT handler: {e}")))?;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
        .map_err(|e| FleetError::invalid_input(format!("Cannot install SIGTERM handler: {e}")))?;

    info!("Fleet session running, waiting for telemetry on MQTT...");

    let outcome = tokio::select! {
        _ = sigint.recv() => {
            info!("Received SIGINT, shutting down gracefully...");
            Ok(())
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down gracefully...");
            Ok(())
        }
        terminated = session.wait_for_termination() => {
            error!("MQTT connection permanently lost, shutting down...");
            match terminated {
                Ok(attempts) => Err(TransportError::PermanentlyDisconnected { attempts }.into()),
                Err(e) => Err(e.into()),
            }
        }
    };

    info!("Application shutdown initiated");
    if let Err(e) = session.shutdown().await {
        error!("Error during shutdown: {}", e);
    }
    if let Some(handle) = health_handle {
        handle.abort();
    }

    outcome
}

fn handle_config_command(config: &FleetConfig, show: bool) -> FleetResult<()> {
    if show {
        println!("Current configuration:");
        println!("{}", config.to_toml_string()?);
    }

    info!("Configuration validation complete");
    Ok(())
}

async fn send_single_command(
    config: FleetConfig,
    target: CommandTarget,
    command: Command,
) -> FleetResult<()> {
    let connect_timeout = Duration::from_millis(config.mqtt.connect_timeout_ms);
    let mut client = create_mqtt_transport(&config)?;

    client
        .connect()
        .instrument(logging::mqtt_span!(operation = "connect"))
        .await?;
    if let Err(e) = client.wait_until_connected(connect_timeout).await {
        let _ = client.disconnect().await;
        return Err(e.into());
    }

    let transport = Arc::new(RwLock::new(client));
    let publisher = CommandPublisher::new(Arc::clone(&transport), config.dashboard.source_id);

    let result = match target.robot {
        Some(robot_id) => publisher.send_command(&robot_id, command).await,
        None => publisher.broadcast_command(command).await,
    };

    if let Err(e) = transport.write().await.disconnect().await {
        warn!("Disconnect after command failed: {}", e);
    }

    match result? {
        PublishOutcome::Sent => {
            info!("Command published");
            Ok(())
        }
        PublishOutcome::NotConnected(status) => Err(FleetError::invalid_input(format!(
            "Command not sent, connection {status}"
        ))),
    }
}
