//! Session video recorder
//!
//! One ffmpeg process per camera copies the camera stream to disk while a
//! session is recording. Commands are handled by a worker thread so the
//! analysis thread never waits on process management.
//!
//! Layout: `{output_dir}/{YYYY-MM-DD}/{HH}/{MM}/{SS}/cam{n}.mp4`; the `{SS}`
//! directory is renamed to `{SS}_{duration}` when the segment ends.

use camera_capture::{CameraConfig, CameraId};
use chrono::{Local, NaiveDateTime};
use serde::{Deserialize, Serialize};
use session::RecordingSink;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc;
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Recorder settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecorderSettings {
    /// Record sessions at all
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Root of the recording tree
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_ffmpeg_bin")]
    pub ffmpeg_bin: String,
    /// A running recording is split into segments of this length
    #[serde(default = "default_segment_seconds")]
    pub segment_seconds: u64,
    /// Grace period for ffmpeg to finalize a file after `q`
    #[serde(default = "default_stop_timeout_secs")]
    pub stop_timeout_secs: u64,
}

fn default_enabled() -> bool {
    true
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("recordings")
}

fn default_ffmpeg_bin() -> String {
    "ffmpeg".to_string()
}

fn default_segment_seconds() -> u64 {
    300
}

fn default_stop_timeout_secs() -> u64 {
    10
}

impl Default for RecorderSettings {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            output_dir: default_output_dir(),
            ffmpeg_bin: default_ffmpeg_bin(),
            segment_seconds: default_segment_seconds(),
            stop_timeout_secs: default_stop_timeout_secs(),
        }
    }
}

/// Directory for a segment started at `started_at`
pub fn segment_dir(root: &Path, started_at: NaiveDateTime) -> PathBuf {
    root.join(started_at.format("%Y-%m-%d").to_string())
        .join(started_at.format("%H").to_string())
        .join(started_at.format("%M").to_string())
        .join(started_at.format("%S").to_string())
}

/// Final name of a segment directory: `{SS}` becomes `{SS}_{duration}`
pub fn finished_dir(segment_dir: &Path, duration: Duration) -> PathBuf {
    let seconds = duration.as_secs_f64().round() as u64;
    let name = segment_dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    segment_dir.with_file_name(format!("{}_{}", name, seconds))
}

/// Output file of one camera inside a segment directory
pub fn camera_file(segment_dir: &Path, camera: CameraId) -> PathBuf {
    segment_dir.join(format!("{}.mp4", camera))
}

enum RecorderCommand {
    Start(Uuid),
    Stop(Uuid),
    Shutdown,
}

/// [`RecordingSink`] backed by ffmpeg child processes
pub struct FfmpegRecorder {
    tx: mpsc::Sender<RecorderCommand>,
    worker: Mutex<Option<thread::JoinHandle<()>>>,
}

impl FfmpegRecorder {
    pub fn spawn(settings: RecorderSettings, cameras: Vec<CameraConfig>) -> std::io::Result<Self> {
        let (tx, rx) = mpsc::channel();
        let worker = Worker::new(settings, cameras);
        let handle = thread::Builder::new()
            .name("recorder".to_string())
            .spawn(move || worker.run(rx))?;

        Ok(Self {
            tx,
            worker: Mutex::new(Some(handle)),
        })
    }

    /// Finish any running recording and stop the worker
    pub fn shutdown(&self) {
        let _ = self.tx.send(RecorderCommand::Shutdown);
        let handle = self.worker.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                error!("Recorder worker panicked");
            }
        }
    }

    fn send(&self, command: RecorderCommand) {
        if self.tx.send(command).is_err() {
            warn!("Recorder worker is not running");
        }
    }
}

impl RecordingSink for FfmpegRecorder {
    fn start(&self, session_id: Uuid) {
        self.send(RecorderCommand::Start(session_id));
    }

    fn stop(&self, session_id: Uuid) {
        self.send(RecorderCommand::Stop(session_id));
    }
}

impl Drop for FfmpegRecorder {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct Recording {
    session_id: Uuid,
    dir: PathBuf,
    started: Instant,
    children: Vec<(CameraId, Child)>,
}

struct Worker {
    settings: RecorderSettings,
    cameras: Vec<CameraConfig>,
    active: Option<Recording>,
}

impl Worker {
    fn new(settings: RecorderSettings, cameras: Vec<CameraConfig>) -> Self {
        Self {
            settings,
            cameras,
            active: None,
        }
    }

    fn run(mut self, rx: mpsc::Receiver<RecorderCommand>) {
        info!("Recorder started ({} cameras)", self.cameras.len());
        loop {
            match rx.recv_timeout(Duration::from_secs(1)) {
                Ok(RecorderCommand::Start(id)) => self.start(id),
                Ok(RecorderCommand::Stop(id)) => self.stop(id),
                Ok(RecorderCommand::Shutdown) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
                Err(mpsc::RecvTimeoutError::Timeout) => {}
            }
            self.rotate_if_due();
        }
        self.finish();
        info!("Recorder stopped");
    }

    fn start(&mut self, session_id: Uuid) {
        if !self.settings.enabled {
            return;
        }
        match &self.active {
            Some(active) if active.session_id == session_id => {
                debug!(session = %session_id, "Already recording");
                return;
            }
            Some(active) => {
                warn!(
                    session = %active.session_id,
                    "Recording still running for a previous session, finishing it"
                );
                self.finish();
            }
            None => {}
        }

        let dir = segment_dir(&self.settings.output_dir, Local::now().naive_local());
        if let Err(e) = std::fs::create_dir_all(&dir) {
            error!("Failed to create recording directory {}: {}", dir.display(), e);
            return;
        }

        let mut children = Vec::with_capacity(self.cameras.len());
        for (index, camera) in self.cameras.iter().enumerate() {
            let id = CameraId(index as u8);
            let path = camera_file(&dir, id);
            match self.spawn_ffmpeg(camera, &path) {
                Ok(child) => children.push((id, child)),
                Err(e) => error!(camera = %id, "Failed to start ffmpeg: {}", e),
            }
        }

        info!(
            session = %session_id,
            dir = %dir.display(),
            processes = children.len(),
            "Recording started"
        );
        self.active = Some(Recording {
            session_id,
            dir,
            started: Instant::now(),
            children,
        });
    }

    fn stop(&mut self, session_id: Uuid) {
        match &self.active {
            Some(active) if active.session_id == session_id => self.finish(),
            _ => debug!(session = %session_id, "Not recording, stop ignored"),
        }
    }

    fn rotate_if_due(&mut self) {
        let segment = Duration::from_secs(self.settings.segment_seconds);
        let session_id = match &self.active {
            Some(active) if active.started.elapsed() >= segment => active.session_id,
            _ => return,
        };

        info!(
            session = %session_id,
            "Segment length {}s reached, starting new segment",
            self.settings.segment_seconds
        );
        self.finish();
        self.start(session_id);
    }

    fn spawn_ffmpeg(&self, camera: &CameraConfig, path: &Path) -> std::io::Result<Child> {
        Command::new(&self.settings.ffmpeg_bin)
            .args(recording_args(camera, path))
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
    }

    /// Stop every process of the active recording and rename its directory
    fn finish(&mut self) {
        let Some(mut recording) = self.active.take() else {
            return;
        };
        let duration = recording.started.elapsed();
        let timeout = Duration::from_secs(self.settings.stop_timeout_secs);

        stop_all(&mut recording.children, timeout);

        let target = finished_dir(&recording.dir, duration);
        match std::fs::rename(&recording.dir, &target) {
            Ok(()) => info!(
                session = %recording.session_id,
                dir = %target.display(),
                duration_secs = duration.as_secs(),
                "Recording saved"
            ),
            Err(e) => error!(
                "Failed to rename {} to {}: {}",
                recording.dir.display(),
                target.display(),
                e
            ),
        }
    }
}

fn recording_args(camera: &CameraConfig, path: &Path) -> Vec<String> {
    let mut args = vec!["-loglevel".to_string(), "error".to_string()];
    if camera.url.starts_with("rtsp://") {
        args.push("-rtsp_transport".to_string());
        args.push("tcp".to_string());
    }
    args.extend([
        "-i".to_string(),
        camera.url.clone(),
        "-c".to_string(),
        "copy".to_string(),
        "-y".to_string(),
        path.to_string_lossy().into_owned(),
    ]);
    args
}

/// Ask every ffmpeg to finish its file (`q` on stdin), then kill whatever is
/// still running once `timeout` has passed. All processes share one deadline.
fn stop_all(children: &mut [(CameraId, Child)], timeout: Duration) {
    for (camera, child) in children.iter_mut() {
        if let Some(stdin) = child.stdin.as_mut() {
            if let Err(e) = stdin.write_all(b"q").and_then(|_| stdin.flush()) {
                warn!(camera = %camera, "Could not write to ffmpeg stdin: {}", e);
            }
        }
    }

    let deadline = Instant::now() + timeout;
    let mut running: Vec<usize> = (0..children.len()).collect();
    loop {
        running.retain(|&index| {
            let (camera, child) = &mut children[index];
            match child.try_wait() {
                Ok(Some(_)) => false,
                Ok(None) => true,
                Err(e) => {
                    warn!(camera = %camera, "Failed to poll ffmpeg: {}", e);
                    kill(child);
                    false
                }
            }
        });
        if running.is_empty() || Instant::now() >= deadline {
            break;
        }
        thread::sleep(Duration::from_millis(100));
    }

    for index in running {
        let (camera, child) = &mut children[index];
        warn!(camera = %camera, "ffmpeg did not exit in time, killing it");
        kill(child);
    }
}

fn kill(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn scratch_dir() -> PathBuf {
        std::env::temp_dir().join(format!("kiosk-recorder-{}", Uuid::new_v4()))
    }

    fn worker(root: &Path) -> Worker {
        let settings = RecorderSettings {
            output_dir: root.to_path_buf(),
            ffmpeg_bin: "/nonexistent/ffmpeg".to_string(),
            stop_timeout_secs: 1,
            ..Default::default()
        };
        Worker::new(
            settings,
            vec![CameraConfig::rtsp("rtsp://cam1"), CameraConfig::rtsp("rtsp://cam2")],
        )
    }

    #[test]
    fn test_layout() {
        let started = NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(9, 4, 3)
            .unwrap();
        let dir = segment_dir(Path::new("/srv/rec"), started);
        assert_eq!(dir, PathBuf::from("/srv/rec/2024-05-01/09/04/03"));
        assert_eq!(
            finished_dir(&dir, Duration::from_millis(41_500)),
            PathBuf::from("/srv/rec/2024-05-01/09/04/03_42")
        );
        assert_eq!(
            camera_file(&dir, CameraId(1)),
            PathBuf::from("/srv/rec/2024-05-01/09/04/03/cam2.mp4")
        );
    }

    #[test]
    fn test_recording_args() {
        let args = recording_args(&CameraConfig::rtsp("rtsp://10.0.0.5/s1"), Path::new("/tmp/cam1.mp4"));
        assert_eq!(
            args,
            vec![
                "-loglevel", "error", "-rtsp_transport", "tcp", "-i", "rtsp://10.0.0.5/s1", "-c",
                "copy", "-y", "/tmp/cam1.mp4"
            ]
        );
        let webcam = recording_args(&CameraConfig::default(), Path::new("out.mp4"));
        assert!(!webcam.contains(&"-rtsp_transport".to_string()));
    }

    #[test]
    fn test_start_stop_is_idempotent() {
        let root = scratch_dir();
        let mut worker = worker(&root);
        let session = Uuid::new_v4();

        worker.start(session);
        let dir = worker.active.as_ref().unwrap().dir.clone();
        assert!(dir.starts_with(&root));
        assert!(dir.is_dir());

        worker.start(session);
        assert_eq!(worker.active.as_ref().unwrap().dir, dir);

        worker.stop(Uuid::new_v4());
        assert!(worker.active.is_some());

        worker.stop(session);
        assert!(worker.active.is_none());
        assert!(!dir.exists());
        assert!(finished_dir(&dir, Duration::ZERO).is_dir());

        worker.stop(session);
        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn test_rotation_starts_new_segment() {
        let root = scratch_dir();
        let mut worker = worker(&root);
        worker.settings.segment_seconds = 5;
        let session = Uuid::new_v4();

        worker.start(session);
        worker.rotate_if_due();
        let first = worker.active.as_ref().unwrap().dir.clone();
        assert!(first.is_dir());

        worker.active.as_mut().unwrap().started = Instant::now() - Duration::from_secs(6);
        worker.rotate_if_due();
        assert!(finished_dir(&first, Duration::from_secs(6)).is_dir());
        assert_eq!(worker.active.as_ref().unwrap().session_id, session);

        worker.finish();
        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn test_disabled_recorder_does_nothing() {
        let root = scratch_dir();
        let mut worker = worker(&root);
        worker.settings.enabled = false;
        worker.start(Uuid::new_v4());
        assert!(worker.active.is_none());
        assert!(!root.exists());
    }

    #[cfg(unix)]
    fn spawn_stub(program: &str, args: &[&str]) -> Child {
        Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .spawn()
            .unwrap()
    }

    #[cfg(unix)]
    #[test]
    fn test_stop_all_shares_one_deadline() {
        // Processes that ignore `q` entirely
        let mut children: Vec<_> = (0..4)
            .map(|i| (CameraId(i), spawn_stub("sleep", &["30"])))
            .collect();

        let started = Instant::now();
        stop_all(&mut children, Duration::from_secs(1));
        let elapsed = started.elapsed();

        assert!(elapsed >= Duration::from_secs(1));
        assert!(elapsed < Duration::from_secs(3), "took {:?}", elapsed);
        for (_, child) in children.iter_mut() {
            assert!(child.try_wait().unwrap().is_some());
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_stop_all_returns_once_processes_quit() {
        // `head -c 1` exits as soon as it reads the `q`
        let mut children: Vec<_> = (0..4)
            .map(|i| (CameraId(i), spawn_stub("head", &["-c", "1"])))
            .collect();

        let started = Instant::now();
        stop_all(&mut children, Duration::from_secs(10));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_sink_shutdown_joins_worker() {
        let root = scratch_dir();
        let settings = RecorderSettings {
            output_dir: root.clone(),
            ffmpeg_bin: "/nonexistent/ffmpeg".to_string(),
            ..Default::default()
        };
        let recorder = FfmpegRecorder::spawn(settings, vec![CameraConfig::default()]).unwrap();
        let session = Uuid::new_v4();
        recorder.start(session);
        recorder.shutdown();
        recorder.stop(session);

        assert!(recorder.worker.lock().unwrap().is_none());
        let _ = std::fs::remove_dir_all(&root);
    }
}
