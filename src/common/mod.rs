pub mod config;
pub mod error;

pub use config::{CameraConfig, CaptureConfig, Config, ServiceConfig};
pub use error::{AttendanceError, Result};
