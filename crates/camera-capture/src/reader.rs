//! Camera reader thread with reconnect-with-backoff

use crate::frame::VideoFrame;
use crate::slot::LatestFrame;
use crate::{CameraError, CameraId};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Blocking frame producer driven by a [`CameraReader`]
pub trait FrameGrabber: Send + 'static {
    /// Connect to the device or stream
    fn open(&mut self) -> Result<(), CameraError>;

    /// Block until the next frame; `Ok(None)` means end of stream
    fn grab(&mut self) -> Result<Option<VideoFrame>, CameraError>;

    /// Release the connection (called before every reconnect and on shutdown)
    fn close(&mut self);
}

/// Exponential reconnect delay
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        let initial = initial.max(Duration::from_millis(1));
        Self {
            initial,
            max: max.max(initial),
            current: initial,
        }
    }

    /// Delay to wait now; doubles the next one up to the cap
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    /// Back to the initial delay after a healthy frame
    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

/// Handle to a running camera reader thread
pub struct CameraReader {
    camera: CameraId,
    slot: Arc<LatestFrame>,
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl CameraReader {
    /// Spawn the reader thread; frames land in the returned reader's slot
    pub fn spawn<G: FrameGrabber>(camera: CameraId, grabber: G, backoff: Backoff) -> std::io::Result<Self> {
        let slot = Arc::new(LatestFrame::new());
        let shutdown = Arc::new(AtomicBool::new(false));

        let thread_slot = slot.clone();
        let thread_shutdown = shutdown.clone();
        let handle = std::thread::Builder::new()
            .name(format!("reader-{}", camera))
            .spawn(move || read_loop(camera, grabber, backoff, &thread_slot, &thread_shutdown))?;

        info!("Camera reader for {} started", camera);

        Ok(Self {
            camera,
            slot,
            shutdown,
            handle: Some(handle),
        })
    }

    pub fn camera(&self) -> CameraId {
        self.camera
    }

    /// Latest-frame slot fed by this reader
    pub fn slot(&self) -> Arc<LatestFrame> {
        self.slot.clone()
    }

    /// Ask the thread to stop and wait for it
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Camera reader for {} panicked", self.camera);
            }
        }
    }
}

impl Drop for CameraReader {
    fn drop(&mut self) {
        self.stop();
    }
}

fn read_loop<G: FrameGrabber>(
    camera: CameraId,
    mut grabber: G,
    mut backoff: Backoff,
    slot: &LatestFrame,
    shutdown: &AtomicBool,
) {
    let mut connected = false;

    while !shutdown.load(Ordering::SeqCst) {
        if !connected {
            match grabber.open() {
                Ok(()) => {
                    info!("{} connected", camera);
                    connected = true;
                }
                Err(e) => {
                    let delay = backoff.next_delay();
                    warn!("{} open failed: {} (retry in {:?})", camera, e, delay);
                    sleep_unless_shutdown(delay, shutdown);
                    continue;
                }
            }
        }

        match grabber.grab().and_then(check_complete) {
            Ok(Some(frame)) => {
                backoff.reset();
                slot.publish(frame);
            }
            Ok(None) => {
                debug!("{} stream ended", camera);
                connected = false;
            }
            Err(e) => {
                warn!("{} read failed: {}", camera, e);
                connected = false;
            }
        }

        if !connected {
            // Consumers must not keep analysing a frozen frame
            slot.clear();
            grabber.close();
            let delay = backoff.next_delay();
            info!("Reconnecting to {} in {:?}", camera, delay);
            sleep_unless_shutdown(delay, shutdown);
        }
    }

    grabber.close();
    slot.clear();
    info!("Camera reader for {} stopped", camera);
}

/// A short read means the decoder and the configured frame size disagree
fn check_complete(frame: Option<VideoFrame>) -> Result<Option<VideoFrame>, CameraError> {
    match frame {
        Some(frame) if !frame.is_complete() => Err(CameraError::Format(format!(
            "{} bytes for a {}x{} frame",
            frame.data.len(),
            frame.width,
            frame.height
        ))),
        frame => Ok(frame),
    }
}

fn sleep_unless_shutdown(delay: Duration, shutdown: &AtomicBool) {
    let deadline = Instant::now() + delay;
    while !shutdown.load(Ordering::SeqCst) {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        std::thread::sleep((deadline - now).min(Duration::from_millis(20)));
    }
}
