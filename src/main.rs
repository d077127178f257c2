use birdcam::config::{LogLevel, Settings};
use birdcam::error::AppError;
use birdcam::station::{run_console, Station};
use clap::Parser;
use tracing::{error, info, Level};

#[derive(Parser, Debug)]
#[command(author, version, about = "PTZ wildlife camera station", long_about = None)]
struct Args {
    /// Settings file, with or without extension
    #[arg(short, long, default_value = "config/birdcam")]
    config: String,

    /// Overrides the configured log level
    #[arg(short, long, value_enum)]
    log_level: Option<LogLevel>,

    /// Do not read operator commands from stdin
    #[arg(long)]
    no_console: bool,
}

fn init_logging(level: Level) -> Result<(), AppError> {
    tracing_subscriber::fmt()
        .with_max_level(level)
        .try_init()
        .map_err(|e| AppError::Logging(e.to_string()))
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let args = Args::parse();
    let settings = Settings::load(&args.config)?;
    init_logging(args.log_level.unwrap_or(settings.log_level).into())?;

    info!(
        camera = %settings.camera.address,
        detector = %settings.detector.endpoint(),
        "Starting birdcam"
    );
    let (station, handle) = Station::from_settings(&settings)?;

    let interrupt = handle.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Interrupted");
                interrupt.halt().await;
            }
            Err(e) => error!("Could not listen for interrupt: {}", e),
        }
    });

    if !args.no_console {
        tokio::spawn(run_console(handle));
    }

    station.run().await
}
