pub mod client;
pub mod protocol;

pub use client::{
    Enrolled, GatewayError, HttpGateway, Recognized, SubmissionGateway, SubmissionOutcome,
};
pub use protocol::AttendanceEntry;
