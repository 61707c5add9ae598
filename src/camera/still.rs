use image::DynamicImage;
use std::path::PathBuf;

use super::{CameraBackend, CameraDevice, CameraError};

/// Serves a fixed image file as the camera feed. Useful on machines without a
/// capture device and for scripted runs.
#[derive(Debug, Clone)]
pub struct StillImageBackend {
    path: PathBuf,
}

impl StillImageBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl CameraBackend for StillImageBackend {
    fn open(&self) -> Result<Box<dyn CameraDevice>, CameraError> {
        let image = image::open(&self.path).map_err(|e| {
            CameraError::OpenFailed(format!("{}: {}", self.path.display(), e))
        })?;
        tracing::debug!(
            "Loaded still image {} ({}x{})",
            self.path.display(),
            image.width(),
            image.height()
        );
        Ok(Box::new(StillImageDevice { image }))
    }

    fn describe(&self) -> String {
        format!("still image {}", self.path.display())
    }
}

struct StillImageDevice {
    image: DynamicImage,
}

impl CameraDevice for StillImageDevice {
    fn grab(&mut self) -> Result<DynamicImage, CameraError> {
        Ok(self.image.clone())
    }
}
