//! RTSP/webcam decoding through an ffmpeg child process
//!
//! ffmpeg decodes the stream and writes raw RGB24 frames of a fixed size to
//! stdout; the grabber reads exactly one frame worth of bytes per call.

use crate::frame::VideoFrame;
use crate::reader::FrameGrabber;
use crate::{CameraConfig, CameraError};
use std::io::{ErrorKind, Read};
use std::process::{Child, ChildStdout, Command, Stdio};
use std::time::Instant;
use tracing::{debug, warn};

/// Frame grabber backed by `ffmpeg -f rawvideo -pix_fmt rgb24`
pub struct FfmpegGrabber {
    config: CameraConfig,
    binary: String,
    child: Option<Child>,
    stdout: Option<ChildStdout>,
    started: Instant,
    sequence: u64,
}

impl FfmpegGrabber {
    pub fn new(config: CameraConfig) -> Self {
        Self::with_binary(config, "ffmpeg")
    }

    /// Use a specific ffmpeg executable
    pub fn with_binary(config: CameraConfig, binary: impl Into<String>) -> Self {
        Self {
            config,
            binary: binary.into(),
            child: None,
            stdout: None,
            started: Instant::now(),
            sequence: 0,
        }
    }

    /// ffmpeg arguments for decoding this camera
    pub fn args(&self) -> Vec<String> {
        let mut args: Vec<String> = vec!["-loglevel".into(), "error".into()];
        if self.config.url.starts_with("rtsp://") {
            args.extend(["-rtsp_transport".into(), "tcp".into()]);
        }
        if self.config.is_network() && self.config.read_timeout_ms > 0 {
            // A stalled stream makes ffmpeg exit, so the reader reconnects
            // instead of blocking on a frame that never arrives
            args.extend([
                "-rw_timeout".into(),
                (self.config.read_timeout_ms * 1_000).to_string(),
            ]);
        }
        args.extend([
            "-i".into(),
            self.config.url.clone(),
            "-an".into(),
            "-vf".into(),
            format!("scale={}:{}", self.config.width, self.config.height),
            "-f".into(),
            "rawvideo".into(),
            "-pix_fmt".into(),
            "rgb24".into(),
            "-".into(),
        ]);
        args
    }
}

impl FrameGrabber for FfmpegGrabber {
    fn open(&mut self) -> Result<(), CameraError> {
        self.close();

        let mut child = Command::new(&self.binary)
            .args(self.args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| CameraError::Open(format!("{}: {}", self.config.url, e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| CameraError::Open("ffmpeg stdout not captured".into()))?;

        debug!("Spawned ffmpeg (pid {}) for {}", child.id(), self.config.url);
        self.child = Some(child);
        self.stdout = Some(stdout);
        Ok(())
    }

    fn grab(&mut self) -> Result<Option<VideoFrame>, CameraError> {
        let stdout = self.stdout.as_mut().ok_or(CameraError::NotOpened)?;

        let mut data = vec![0u8; self.config.frame_len()];
        match stdout.read_exact(&mut data) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }

        self.sequence += 1;
        Ok(Some(VideoFrame::new(
            data,
            self.config.width,
            self.config.height,
            self.started.elapsed().as_nanos() as u64,
            self.sequence,
        )))
    }

    fn close(&mut self) {
        self.stdout = None;
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.kill() {
                // Already exited
                debug!("ffmpeg kill: {}", e);
            }
            if let Err(e) = child.wait() {
                warn!("Failed to reap ffmpeg for {}: {}", self.config.url, e);
            }
        }
    }
}

impl Drop for FfmpegGrabber {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rtsp_args_force_tcp() {
        let grabber = FfmpegGrabber::new(CameraConfig {
            url: "rtsp://10.0.0.2/ch1".into(),
            width: 640,
            height: 360,
            ..Default::default()
        });
        let args = grabber.args();
        assert!(args.windows(2).any(|w| w[0] == "-rtsp_transport" && w[1] == "tcp"));
        assert!(args.windows(2).any(|w| w[0] == "-rw_timeout" && w[1] == "5000000"));
        let input = args.iter().position(|a| a == "-i").unwrap();
        let timeout = args.iter().position(|a| a == "-rw_timeout").unwrap();
        assert!(timeout < input);
        assert!(args.contains(&"scale=640:360".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("-"));
    }

    #[test]
    fn test_device_args_skip_rtsp_flags() {
        let grabber = FfmpegGrabber::new(CameraConfig::default());
        assert!(!grabber.args().iter().any(|a| a == "-rtsp_transport"));
        assert!(!grabber.args().iter().any(|a| a == "-rw_timeout"));
    }

    #[test]
    fn test_grab_before_open_fails() {
        let mut grabber = FfmpegGrabber::new(CameraConfig::default());
        assert!(matches!(grabber.grab(), Err(CameraError::NotOpened)));
    }

    #[test]
    fn test_missing_binary_is_open_error() {
        let mut grabber =
            FfmpegGrabber::with_binary(CameraConfig::default(), "/nonexistent/ffmpeg-binary");
        assert!(matches!(grabber.open(), Err(CameraError::Open(_))));
    }
}
