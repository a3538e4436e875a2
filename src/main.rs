use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use loqa_recorder::audio::DeviceFactory;
use loqa_recorder::config::DEFAULT_CONFIG_PATH;
use loqa_recorder::session::{EventSink, FanOutSink, MemorySink, TracingSink};
use loqa_recorder::{create_router, AppState, Config, SessionController, SessionStateMachine};
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "loqa-recorder", version, about = "Record microphone audio to a file on command")]
struct Cli {
    /// Config file (extension optional)
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP control API until Ctrl-C
    Serve,
    /// Record once for a fixed duration (Ctrl-C stops early)
    Record {
        #[arg(short, long, default_value_t = 10)]
        seconds: u64,
    },
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("loqa_recorder=info,warn"));

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();
}

#[cfg(feature = "microphone")]
fn device_factory() -> impl DeviceFactory + 'static {
    loqa_recorder::audio::MicrophoneDevice::factory()
}

#[cfg(not(feature = "microphone"))]
fn device_factory() -> impl DeviceFactory + 'static {
    use loqa_recorder::audio::{CaptureDevice, DeviceError, DeviceResult, DeviceStep, EncodingProfile};

    |_: &EncodingProfile| -> DeviceResult<Box<dyn CaptureDevice>> {
        Err(DeviceError::new(
            DeviceStep::Construct,
            "microphone support not compiled in (build with --features microphone)",
        ))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let cli = Cli::parse();
    let cfg = Config::load(&cli.config)?;

    info!("{} v{}", cfg.service.name, env!("CARGO_PKG_VERSION"));
    let session_config = cfg.session_config();
    match &session_config.storage_dir {
        Some(dir) => info!("Recordings directory: {}", dir.display()),
        None => warn!("No recordings directory could be resolved; starts will fail"),
    }

    let events = MemorySink::with_capacity(cfg.recorder.event_log_capacity);
    let sink: Arc<dyn EventSink> = Arc::new(FanOutSink::new().with(TracingSink).with(events.clone()));
    let machine = SessionStateMachine::new(session_config, device_factory(), sink);
    let (controller, worker) = SessionController::spawn(machine);

    let outcome = match cli.command {
        Command::Serve => serve(&cfg, controller.clone(), events).await,
        Command::Record { seconds } => record(&controller, seconds).await,
    };

    // Process is going away: never leave a device held
    if let Err(e) = controller.shutdown().await {
        warn!("Shutdown: {}", e);
    }
    worker.await.context("Session controller worker panicked")?;

    outcome
}

async fn serve(cfg: &Config, controller: SessionController, events: MemorySink) -> Result<()> {
    let addr = format!("{}:{}", cfg.service.http.bind, cfg.service.http.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("HTTP control API listening on {}", addr);

    let app = create_router(AppState::new(controller, events));
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Ctrl-C received, shutting down");
        })
        .await
        .context("HTTP server failed")
}

async fn record(controller: &SessionController, seconds: u64) -> Result<()> {
    let status = controller.start().await.context("Failed to start recording")?;
    if let Some(path) = &status.output_path {
        println!("Recording to {} for {}s (Ctrl-C to stop early)", path.display(), seconds);
    }

    tokio::select! {
        _ = sleep(Duration::from_secs(seconds)) => {}
        _ = tokio::signal::ctrl_c() => info!("Ctrl-C received, stopping"),
    }

    match controller.stop().await? {
        Some(report) => {
            match (report.bytes, report.kibibytes()) {
                (Some(bytes), Some(kib)) => println!(
                    "Saved {} ({} bytes, {:.2} KB, {:.1}s)",
                    report.output_path.display(),
                    bytes,
                    kib,
                    report.duration_secs
                ),
                _ => println!("Recording stopped but {} is missing", report.output_path.display()),
            }
            for warning in &report.warnings {
                println!("warning: {}", warning);
            }
        }
        None => println!("Recording was no longer active"),
    }

    Ok(())
}
