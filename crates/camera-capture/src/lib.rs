//! Camera Capture Library for the Booth Kiosk
//!
//! Provides the frame-source side of the kiosk:
//! - Latest-frame slots with overwrite-on-write semantics
//! - One reader thread per camera with reconnect-with-backoff
//! - RTSP/webcam decoding through an ffmpeg child process
//! - Frame batches (one frame per camera per analysis tick)

pub mod ffmpeg;
pub mod frame;
pub mod reader;
pub mod slot;

pub use ffmpeg::FfmpegGrabber;
pub use frame::{FrameBatch, VideoFrame};
pub use reader::{Backoff, CameraReader, FrameGrabber};
pub use slot::{FrameSource, LatestFrame};

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Camera error types
#[derive(Error, Debug)]
pub enum CameraError {
    #[error("Failed to open camera: {0}")]
    Open(String),

    #[error("Invalid format: {0}")]
    Format(String),

    #[error("Streaming error: {0}")]
    Stream(String),

    #[error("Camera not opened")]
    NotOpened,
}

impl From<std::io::Error> for CameraError {
    fn from(err: std::io::Error) -> Self {
        CameraError::Stream(err.to_string())
    }
}

/// Position of a camera in the booth (0-based, matches the order of `cameras` in the settings)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CameraId(pub u8);

impl CameraId {
    /// Primary camera (booth-presence feed)
    pub const PRIMARY: CameraId = CameraId(0);

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for CameraId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Recordings and logs number cameras from 1
        write!(f, "cam{}", self.0 + 1)
    }
}

/// Camera configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraConfig {
    /// Stream URL or device path (e.g., "rtsp://..." or "/dev/video0")
    pub url: String,
    /// Decoded width
    #[serde(default = "default_width")]
    pub width: u32,
    /// Decoded height
    #[serde(default = "default_height")]
    pub height: u32,
    /// Initial reconnect delay (milliseconds)
    #[serde(default = "default_reconnect_initial_ms")]
    pub reconnect_initial_ms: u64,
    /// Upper bound for the reconnect delay (milliseconds)
    #[serde(default = "default_reconnect_max_ms")]
    pub reconnect_max_ms: u64,
    /// A network stream delivering nothing for this long is dropped and reopened (milliseconds)
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
}

fn default_width() -> u32 {
    1280
}

fn default_height() -> u32 {
    720
}

fn default_reconnect_initial_ms() -> u64 {
    500
}

fn default_reconnect_max_ms() -> u64 {
    10_000
}

fn default_read_timeout_ms() -> u64 {
    5_000
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            url: "/dev/video0".to_string(),
            width: default_width(),
            height: default_height(),
            reconnect_initial_ms: default_reconnect_initial_ms(),
            reconnect_max_ms: default_reconnect_max_ms(),
            read_timeout_ms: default_read_timeout_ms(),
        }
    }
}

impl CameraConfig {
    /// Create config for an RTSP camera
    pub fn rtsp(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Whether the source is read over the network (as opposed to a local device)
    pub fn is_network(&self) -> bool {
        ["rtsp://", "rtmp://", "http://", "https://", "tcp://", "udp://"]
            .iter()
            .any(|scheme| self.url.starts_with(scheme))
    }

    /// Size in bytes of one decoded RGB24 frame
    pub fn frame_len(&self) -> usize {
        self.width as usize * self.height as usize * 3
    }

    /// Reconnect backoff policy for this camera
    pub fn backoff(&self) -> Backoff {
        Backoff::new(
            std::time::Duration::from_millis(self.reconnect_initial_ms),
            std::time::Duration::from_millis(self.reconnect_max_ms),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_camera_id_display_is_one_based() {
        assert_eq!(CameraId(0).to_string(), "cam1");
        assert_eq!(CameraId(3).to_string(), "cam4");
    }

    #[test]
    fn test_frame_len() {
        let config = CameraConfig {
            width: 4,
            height: 2,
            ..Default::default()
        };
        assert_eq!(config.frame_len(), 24);
    }

    #[test]
    fn test_network_sources() {
        assert!(CameraConfig::rtsp("rtsp://10.0.0.2/ch1").is_network());
        assert!(CameraConfig::rtsp("http://10.0.0.2/mjpeg").is_network());
        assert!(!CameraConfig::default().is_network());
    }
}
