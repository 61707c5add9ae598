//! Camera access: device backends and the session that owns the live handle.

pub mod session;
pub mod still;
#[cfg(feature = "v4l2")]
pub mod v4l2;

use image::DynamicImage;
use thiserror::Error;

pub use session::{CameraSession, CameraState};
pub use still::StillImageBackend;
#[cfg(feature = "v4l2")]
pub use v4l2::V4l2Backend;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CameraError {
    #[error("camera is not ready")]
    NotReady,
    #[error("failed to open camera: {0}")]
    OpenFailed(String),
    #[error("failed to capture frame: {0}")]
    CaptureFailed(String),
    /// The device went away or access was revoked mid-session.
    #[error("camera device lost: {0}")]
    DeviceLost(String),
    #[error("failed to encode frame: {0}")]
    Encode(String),
}

/// Something that can hand out a live camera handle.
pub trait CameraBackend {
    fn open(&self) -> Result<Box<dyn CameraDevice>, CameraError>;

    fn describe(&self) -> String;

    /// Whether the device is still attached. Polled while a session is live.
    fn is_available(&self) -> bool {
        true
    }
}

/// A live, opened camera. Dropping the handle releases the device.
pub trait CameraDevice {
    fn grab(&mut self) -> Result<DynamicImage, CameraError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageEncoding {
    Jpeg,
}

impl ImageEncoding {
    pub fn mime_type(&self) -> &'static str {
        match self {
            ImageEncoding::Jpeg => "image/jpeg",
        }
    }
}

/// A single encoded still image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    bytes: Vec<u8>,
    encoding: ImageEncoding,
}

impl Frame {
    pub fn jpeg(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            encoding: ImageEncoding::Jpeg,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn encoding(&self) -> ImageEncoding {
        self.encoding
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn decode(&self) -> Result<DynamicImage, CameraError> {
        image::load_from_memory_with_format(&self.bytes, image::ImageFormat::Jpeg)
            .map_err(|e| CameraError::Encode(e.to_string()))
    }
}
