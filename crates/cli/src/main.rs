mod interactive;
mod stream;

use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use faceenroll_core::capture::domain::frame_sink::FrameSink;
use faceenroll_core::capture::domain::frame_source::FrameSourceOpener;
use faceenroll_core::capture::infrastructure::ffmpeg_camera_source::{
    available_devices, FfmpegCameraOpener,
};
use faceenroll_core::capture::infrastructure::image_sequence_source::ImageSequenceOpener;
use faceenroll_core::detection::domain::landmark_extractor::LandmarkExtractor;
use faceenroll_core::detection::infrastructure::model_resolver;
use faceenroll_core::detection::infrastructure::onnx_landmark_extractor::OnnxLandmarkExtractor;
use faceenroll_core::enrollment::capture_session::CaptureSession;
use faceenroll_core::enrollment::enrollment_config::EnrollmentConfig;
use faceenroll_core::enrollment::session_logger::LogSessionLogger;
use faceenroll_core::profile::infrastructure::json_profile_store::JsonProfileStore;
use faceenroll_core::shared::constants::{LANDMARK_MODEL_NAME, LANDMARK_MODEL_URL};

/// Guided multi-angle facial enrollment.
#[derive(Parser)]
#[command(name = "face-enroll")]
struct Cli {
    /// Configuration file (default: <config dir>/FaceEnroll/config.json).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Camera device index (overrides the configuration).
    #[arg(long, global = true)]
    device: Option<u32>,

    /// Replay a directory of images instead of opening a camera.
    #[arg(long, global = true)]
    replay: Option<PathBuf>,

    /// Loop the replay directory instead of ending after the last image.
    #[arg(long, global = true)]
    replay_loop: bool,

    /// Use this landmark model file instead of the cached download.
    #[arg(long, global = true)]
    model: Option<PathBuf>,

    /// Directory profiles are written to (overrides the configuration).
    #[arg(long, global = true)]
    profiles_dir: Option<PathBuf>,

    /// Debug-level logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Interactive enrollment in the terminal.
    Enroll {
        /// User name (prompted for when omitted).
        #[arg(long)]
        user: Option<String>,
    },
    /// JSON-lines protocol: commands on stdin, events on stdout.
    Stream,
    /// List camera devices.
    Devices,
}

fn main() {
    let cli = Cli::parse();
    let default_filter = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    if let Err(e) = run(cli) {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match &cli.command {
        Command::Devices => list_devices(),
        Command::Enroll { user } => {
            let (config, opener, extractor) = prepare(&cli)?;
            let sink = Arc::new(interactive::TerminalSink::new());
            let session = build_session(&config, opener, extractor, sink.clone())?;
            interactive::run(&session, &sink, config.device_index, user.as_deref())
        }
        Command::Stream => {
            let (config, opener, extractor) = prepare(&cli)?;
            let (sink, events) = stream::json_lines_sink();
            let session = build_session(&config, opener, extractor, Arc::new(sink))?;
            stream::run(session, events, &config)
        }
    }
}

type Collaborators = (
    EnrollmentConfig,
    Arc<dyn FrameSourceOpener>,
    Arc<dyn LandmarkExtractor>,
);

/// Loads configuration, applies command-line overrides and builds the
/// camera opener and landmark extractor.
fn prepare(cli: &Cli) -> Result<Collaborators, Box<dyn std::error::Error>> {
    let mut config = EnrollmentConfig::load(cli.config.as_deref())?;
    if let Some(device) = cli.device {
        config.device_index = device;
    }
    if let Some(dir) = &cli.profiles_dir {
        config.profiles_dir = dir.clone();
    }

    let opener = build_opener(cli, &config);
    let extractor = build_extractor(cli, &config)?;
    Ok((config, opener, extractor))
}

fn build_session(
    config: &EnrollmentConfig,
    opener: Arc<dyn FrameSourceOpener>,
    extractor: Arc<dyn LandmarkExtractor>,
    sink: Arc<dyn FrameSink>,
) -> Result<CaptureSession, Box<dyn std::error::Error>> {
    let store = Arc::new(JsonProfileStore::new(
        config.profiles_dir.clone(),
        config.jpeg_quality,
        config.existing_profile,
    ));
    let session = CaptureSession::new(config, opener, extractor, sink, store)?
        .with_logger(Box::new(LogSessionLogger::new()));
    log::info!("Profiles are stored in {}", config.profiles_dir.display());
    Ok(session)
}

fn build_opener(cli: &Cli, config: &EnrollmentConfig) -> Arc<dyn FrameSourceOpener> {
    match &cli.replay {
        Some(dir) => Arc::new(ImageSequenceOpener::new(dir.clone(), cli.replay_loop)),
        None => Arc::new(FfmpegCameraOpener::new(
            config.frame_width,
            config.frame_height,
            config.target_fps,
        )),
    }
}

fn build_extractor(
    cli: &Cli,
    config: &EnrollmentConfig,
) -> Result<Arc<dyn LandmarkExtractor>, Box<dyn std::error::Error>> {
    log::info!("Resolving model: {LANDMARK_MODEL_NAME}");
    let model_path = model_resolver::resolve(
        LANDMARK_MODEL_NAME,
        LANDMARK_MODEL_URL,
        cli.model.as_deref(),
        Some(Box::new(download_progress)),
    )?;
    let extractor = OnnxLandmarkExtractor::new(&model_path, config.detection_confidence)?;
    Ok(Arc::new(extractor))
}

fn list_devices() -> Result<(), Box<dyn std::error::Error>> {
    let devices = available_devices();
    if devices.is_empty() {
        println!("No camera devices found");
    }
    for device in devices {
        println!("{:>3}  {}", device.index, device.name);
    }
    Ok(())
}

fn download_progress(downloaded: u64, total: u64) {
    if total > 0 {
        let pct = (downloaded as f64 / total as f64 * 100.0) as u32;
        eprint!("\rDownloading landmark model... {pct}%");
        if downloaded >= total {
            eprintln!();
        }
    } else {
        eprint!("\rDownloading landmark model... {downloaded} bytes");
    }
}
