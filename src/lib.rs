pub mod camera;
pub mod cli;
pub mod common;
pub mod core;
pub mod service;

// Re-export commonly used types
pub use camera::{CameraBackend, CameraDevice, CameraError, CameraSession, CameraState, Frame};
pub use common::{AttendanceError, Config, Result};
pub use core::{
    ActivityFeed, ActivityRecord, ActivityStatus, CaptureController, CaptureEvent, CaptureMode,
    CapturePhase, CaptureRejected, Command, StatusMessage,
};
pub use service::{GatewayError, HttpGateway, SubmissionGateway, SubmissionOutcome};
