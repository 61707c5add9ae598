use thiserror::Error;

/// Errors raised while setting the client up, before any capture runs.
#[derive(Error, Debug)]
pub enum AttendanceError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AttendanceError>;
