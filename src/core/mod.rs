pub mod controller;
pub mod countdown;
pub mod driver;
pub mod feed;

pub use controller::{
    CaptureController, CaptureEvent, CaptureMode, CapturePhase, CaptureRejected, ControllerView,
    MessageKind, PendingFrame, PhaseKind, StatusMessage, Submission,
};
pub use countdown::Countdown;
pub use driver::{capture_once, load_history, run, Command, Observer};
pub use feed::{ActivityFeed, ActivityRecord, ActivityStatus};
