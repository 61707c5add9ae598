use serde::{Deserialize, Serialize};

// Endpoint paths, relative to the service base URL
pub const REGISTER_PATH: &str = "register";
pub const RECOGNIZE_PATH: &str = "recognize";
pub const ATTENDANCE_PATH: &str = "attendance";

// Multipart field names
pub const FILE_FIELD: &str = "file";
pub const USER_ID_FIELD: &str = "user_id";

pub const REGISTER_FILE_NAME: &str = "photo.jpg";
pub const RECOGNIZE_FILE_NAME: &str = "capture.jpg";

/// Token the service may embed in an error payload when no enrolled face
/// matched.
pub const NO_MATCH_MARKER: &str = "NO_MATCH";
/// Error text the service uses for an unmatched face.
pub const NO_MATCH_TEXT: &str = "No matching face";

/// Confidence reported for a successful enrollment.
pub const ENROLL_CONFIDENCE: f64 = 100.0;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RegisterResponse {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub face_id: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RecognizeResponse {
    pub user_id: String,
    pub confidence: f64,
    #[serde(default)]
    pub face_id: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ErrorResponse {
    pub error: String,
}

/// One row of `/attendance/{id}`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AttendanceEntry {
    pub user_id: String,
    pub timestamp: String,
    /// The service stores confidence as text; accept either form.
    #[serde(default)]
    pub confidence: Option<serde_json::Value>,
    #[serde(default)]
    pub status: Option<String>,
}

impl AttendanceEntry {
    pub fn confidence(&self) -> Option<f64> {
        match self.confidence.as_ref()? {
            serde_json::Value::Number(n) => n.as_f64(),
            serde_json::Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }
}
