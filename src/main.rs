use face_attendance::{
    camera::{CameraBackend, CameraSession, CameraState, StillImageBackend},
    cli::{KeyMapper, KeyReader, RawModeGuard, TerminalView},
    common::{CameraConfig, Config},
    core::{self as capture, ActivityFeed, ActivityStatus, CaptureController, CaptureMode, Command},
    service::{HttpGateway, SubmissionGateway},
};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "attendance")]
#[command(about = "Face-recognition attendance capture client")]
struct Cli {
    /// Path to a config file (defaults to the per-user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging with source locations
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive capture session
    Capture {
        /// enroll or match
        #[arg(short, long)]
        mode: Option<CaptureMode>,
        #[arg(short, long)]
        user_id: Option<String>,
        /// Use a still image instead of a camera
        #[arg(long)]
        image: Option<PathBuf>,
        /// Camera index, i.e. /dev/video<N>
        #[arg(short, long)]
        device: Option<u32>,
    },
    /// Register a face in one unattended attempt
    Enroll {
        #[arg(short, long)]
        user_id: String,
        #[arg(long)]
        image: Option<PathBuf>,
    },
    /// Mark attendance in one unattended attempt
    Match {
        #[arg(long)]
        image: Option<PathBuf>,
    },
    /// Show recorded attendance for a user
    History {
        #[arg(short, long)]
        user_id: String,
    },
    /// List available capture devices
    #[cfg(feature = "v4l2")]
    Cameras,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose);

    let mut config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Capture {
            mode,
            user_id,
            image,
            device,
        } => {
            if let Some(index) = device {
                config.camera.device_index = index;
            }
            let backend = camera_backend(&config.camera, image)?;
            interactive(&config, backend, mode, user_id).await?;
        }
        Commands::Enroll { user_id, image } => {
            let backend = camera_backend(&config.camera, image)?;
            if !single_attempt(&config, backend, CaptureMode::Enroll, Some(user_id)).await? {
                std::process::exit(1);
            }
        }
        Commands::Match { image } => {
            let backend = camera_backend(&config.camera, image)?;
            if !single_attempt(&config, backend, CaptureMode::Match, None).await? {
                std::process::exit(1);
            }
        }
        Commands::History { user_id } => {
            let gateway = HttpGateway::new(&config.service)?;
            let entries = gateway
                .list_recent(&user_id)
                .await
                .with_context(|| format!("Could not load attendance for {}", user_id))?;

            let mut feed = ActivityFeed::new();
            feed.extend_history(&entries);
            if feed.is_empty() {
                println!("No attendance recorded for {}", user_id);
            }
            for record in feed.iter() {
                let status = match record.status {
                    ActivityStatus::Success => "present",
                    ActivityStatus::Failure => "failed",
                };
                println!("{}  {:<20} {}", record.timestamp.format("%Y-%m-%d %H:%M:%S"), record.subject_id, status);
            }
        }
        #[cfg(feature = "v4l2")]
        Commands::Cameras => {
            let cameras = face_attendance::camera::V4l2Backend::list_cameras()?;
            if cameras.is_empty() {
                println!("No cameras found. Check that /dev/video* exists and is readable.");
            }
            for camera in cameras {
                println!("/dev/video{}: {}", camera.index, camera.name);
                for format in &camera.formats {
                    println!("   - {}", format);
                }
            }
        }
    }

    Ok(())
}

fn camera_backend(config: &CameraConfig, image: Option<PathBuf>) -> Result<Box<dyn CameraBackend>> {
    match image {
        Some(path) => Ok(Box::new(StillImageBackend::new(path))),
        None => device_backend(config),
    }
}

#[cfg(feature = "v4l2")]
fn device_backend(config: &CameraConfig) -> Result<Box<dyn CameraBackend>> {
    Ok(Box::new(face_attendance::camera::V4l2Backend::new(config.clone())))
}

#[cfg(not(feature = "v4l2"))]
fn device_backend(_config: &CameraConfig) -> Result<Box<dyn CameraBackend>> {
    bail!("Built without camera support; rebuild with --features v4l2 or pass --image <PATH>")
}

async fn interactive(
    config: &Config,
    backend: Box<dyn CameraBackend>,
    mode: Option<CaptureMode>,
    user_id: Option<String>,
) -> Result<()> {
    let (event_tx, mut events) = mpsc::unbounded_channel();
    let session = CameraSession::new(backend, config.camera.jpeg_quality);
    let mut controller = CaptureController::new(session, &config.capture, event_tx);
    let gateway = HttpGateway::new(&config.service)?;

    if let Some(mode) = mode {
        controller.set_mode(mode)?;
    }
    if let Some(id) = &user_id {
        controller.set_subject_id(id.clone());
        capture::load_history(&mut controller, &gateway, id).await;
    }

    let (command_tx, mut commands) = mpsc::unbounded_channel();
    let _ = command_tx.send(Command::StartCamera);

    let editing = Arc::new(AtomicBool::new(false));
    let _raw = RawModeGuard::enable().context("Failed to set up terminal")?;
    let mut keys = KeyReader::spawn(KeyMapper::new(user_id.unwrap_or_default(), editing.clone()), command_tx);
    let mut view = TerminalView::new(editing);

    capture::run(&mut controller, &gateway, &mut commands, &mut events, &mut view).await;
    keys.stop();

    Ok(())
}

/// Returns false when the attempt ended with a failure message.
async fn single_attempt(
    config: &Config,
    backend: Box<dyn CameraBackend>,
    mode: CaptureMode,
    user_id: Option<String>,
) -> Result<bool> {
    let (event_tx, mut events) = mpsc::unbounded_channel();
    let session = CameraSession::new(backend, config.camera.jpeg_quality);
    let mut controller = CaptureController::new(session, &config.capture, event_tx);
    let gateway = HttpGateway::new(&config.service)?;

    controller.set_mode(mode)?;
    if let Some(id) = user_id {
        controller.set_subject_id(id);
    }

    println!("Using {}", controller.camera_description());
    if let CameraState::Errored(reason) = controller.start_camera() {
        bail!(reason);
    }

    println!("Look at the camera, capturing in {} seconds...", config.capture.countdown_seconds);
    let message = capture::capture_once(&mut controller, &gateway, &mut events).await?;
    controller.shutdown();

    println!("{}", message.text);
    Ok(!message.is_failure())
}

fn setup_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    // The interactive view owns stdout
    if verbose {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_file(true)
            .with_line_number(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}
