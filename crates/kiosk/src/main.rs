//! Booth Kiosk - Main Entry Point

use anyhow::Context;
use attendant::{Detectors, FrameAnalyzer, PresenceProbe};
use camera_capture::{CameraId, CameraReader, FfmpegGrabber, FrameSource};
use kiosk::{init_logging, install_metrics, run_server, AppState, FfmpegRecorder, Settings};
use ring_buffer::RingBuffer;
use session::{spawn_analysis, spawn_sampler, LogPromptSink, SessionOrchestrator, Sinks};
use std::path::Path;
use std::sync::Arc;
use storage::{ArchiveWriter, SessionRepository};
use tracing::{error, info, warn};

const DEFAULT_CONFIG_PATH: &str = "config/kiosk.toml";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let settings = Settings::load(&config_path)
        .with_context(|| format!("loading settings from {}", config_path))?;

    init_logging(&settings.log)?;

    info!("=== Booth Kiosk v{} ===", env!("CARGO_PKG_VERSION"));
    info!(
        "{} camera(s), {} protocol steps, {:.1} fps analysis",
        settings.cameras.len(),
        settings.protocol.steps.len(),
        settings.analysis.fps
    );

    let metrics = match install_metrics() {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!("Metrics exporter disabled: {}", e);
            None
        }
    };
    let protocol = Arc::new(settings.protocol()?);

    // Session archive
    ensure_database_dir(&settings.database.url)?;
    let repository = Arc::new(SessionRepository::connect(&settings.database.url).await?);
    let (archive, archive_writer) =
        ArchiveWriter::spawn(repository.clone(), settings.database.archive_capacity);

    // Cameras
    let mut readers = Vec::with_capacity(settings.cameras.len());
    for (index, camera) in settings.cameras.iter().enumerate() {
        let grabber = FfmpegGrabber::new(camera.clone());
        readers.push(CameraReader::spawn(CameraId(index as u8), grabber, camera.backoff())?);
    }
    let sources: Vec<Arc<dyn FrameSource>> = readers
        .iter()
        .map(|reader| reader.slot() as Arc<dyn FrameSource>)
        .collect();

    let recorder = Arc::new(FfmpegRecorder::spawn(
        settings.recorder.clone(),
        settings.cameras.clone(),
    )?);

    // Analysis
    let detectors = Detectors::unavailable();
    let probe = PresenceProbe::new(detectors.pose.clone(), settings.analysis.presence_max_side);
    let (orchestrator, snapshots) = SessionOrchestrator::new(
        protocol,
        settings.presence.clone(),
        probe,
        FrameAnalyzer::new(detectors),
        Sinks {
            prompts: Arc::new(LogPromptSink),
            recorder: recorder.clone(),
            archive: Arc::new(archive),
        },
    )?;

    let queue = Arc::new(RingBuffer::new(settings.analysis.queue_capacity));
    let analysis_thread = spawn_analysis(orchestrator, queue.clone())?;
    let mut analysis = tokio::task::spawn_blocking(move || analysis_thread.join());
    let sampler = spawn_sampler(sources, queue.clone(), settings.analysis_period());

    // Status server
    let state = Arc::new(AppState::new(snapshots, repository.clone(), metrics));
    let (stop_server, server_stopped) = tokio::sync::oneshot::channel::<()>();
    let bind = settings.server.bind.clone();
    let server = tokio::spawn(async move {
        let shutdown = async {
            let _ = server_stopped.await;
        };
        if let Err(e) = run_server(&bind, state, shutdown).await {
            error!("Status server failed: {}", e);
        }
    });

    let early_exit = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!("Shutdown requested");
            None
        }
        joined = &mut analysis => Some(joined),
    };

    // Closing the queue stops the sampler and lets the analysis thread drain
    queue.close();
    let joined = match early_exit {
        Some(joined) => joined,
        None => analysis.await,
    };
    match joined {
        Ok(Ok(Ok(batches))) => info!("Analysis finished after {} batches", batches),
        Ok(Ok(Err(e))) => error!("Analysis failed: {}", e),
        Ok(Err(_)) => error!("Analysis thread panicked"),
        Err(e) => error!("Analysis join failed: {}", e),
    }

    if let Err(e) = sampler.await {
        error!("Sampler task failed: {}", e);
    }
    recorder.shutdown();

    // The orchestrator held the last archive handle
    match archive_writer.await {
        Ok(written) => info!("{} sessions archived this run", written),
        Err(e) => error!("Archive writer failed: {}", e),
    }

    let _ = stop_server.send(());
    let _ = server.await;

    for reader in readers.iter_mut() {
        reader.stop();
    }
    repository.close().await;

    info!("Booth kiosk stopped");
    Ok(())
}

/// Create the parent directory of a file-backed SQLite URL
fn ensure_database_dir(url: &str) -> std::io::Result<()> {
    let path = url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:");
    let path = path.split('?').next().unwrap_or(path);
    if path.is_empty() || path.starts_with(":memory:") {
        return Ok(());
    }
    match Path::new(path).parent() {
        Some(parent) if !parent.as_os_str().is_empty() => std::fs::create_dir_all(parent),
        _ => Ok(()),
    }
}
