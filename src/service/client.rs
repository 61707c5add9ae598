use reqwest::multipart::{Form, Part};
use reqwest::{StatusCode, Url};
use std::future::Future;
use thiserror::Error;

use crate::camera::Frame;
use crate::common::ServiceConfig;
use crate::service::protocol::{
    AttendanceEntry, ErrorResponse, RecognizeResponse, RegisterResponse, ATTENDANCE_PATH,
    ENROLL_CONFIDENCE, FILE_FIELD, NO_MATCH_MARKER, NO_MATCH_TEXT, RECOGNIZE_FILE_NAME,
    RECOGNIZE_PATH, REGISTER_FILE_NAME, REGISTER_PATH, USER_ID_FIELD,
};

/// Why a call to the attendance service did not produce a result.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum GatewayError {
    /// The service answered, but no enrolled face matched.
    #[error("no matching face found")]
    NoMatch,

    #[error("service unreachable: {0}")]
    Transport(String),

    #[error("{message} (HTTP {status})")]
    Status { status: u16, message: String },

    #[error("malformed response: {0}")]
    Malformed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Enrolled {
    pub subject_id: String,
    pub face_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Recognized {
    pub subject_id: String,
    /// Match strength in percent, within `[0, 100]`.
    pub confidence: f64,
}

/// Result of one submitted capture, as the controller sees it.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmissionOutcome {
    Success { subject_id: String, confidence: f64 },
    NoMatch,
    Failure(String),
}

impl SubmissionOutcome {
    pub fn from_enroll(result: Result<Enrolled, GatewayError>) -> Self {
        match result {
            Ok(enrolled) => SubmissionOutcome::Success {
                subject_id: enrolled.subject_id,
                confidence: ENROLL_CONFIDENCE,
            },
            Err(e) => e.into(),
        }
    }

    pub fn from_match(result: Result<Recognized, GatewayError>) -> Self {
        match result {
            Ok(recognized) => SubmissionOutcome::Success {
                subject_id: recognized.subject_id,
                confidence: recognized.confidence,
            },
            Err(e) => e.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, SubmissionOutcome::Success { .. })
    }
}

impl From<GatewayError> for SubmissionOutcome {
    fn from(error: GatewayError) -> Self {
        match error {
            GatewayError::NoMatch => SubmissionOutcome::NoMatch,
            other => SubmissionOutcome::Failure(other.to_string()),
        }
    }
}

/// The three operations the attendance service offers.
pub trait SubmissionGateway {
    fn enroll(
        &self,
        frame: &Frame,
        subject_id: &str,
    ) -> impl Future<Output = Result<Enrolled, GatewayError>> + Send;

    fn match_face(&self, frame: &Frame) -> impl Future<Output = Result<Recognized, GatewayError>> + Send;

    fn list_recent(
        &self,
        subject_id: &str,
    ) -> impl Future<Output = Result<Vec<AttendanceEntry>, GatewayError>> + Send;
}

/// Talks to the attendance service over HTTP.
#[derive(Debug, Clone)]
pub struct HttpGateway {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpGateway {
    pub fn new(config: &ServiceConfig) -> Result<Self, GatewayError> {
        let base_url = Url::parse(&config.base_url)
            .map_err(|e| GatewayError::Transport(format!("invalid base URL {}: {}", config.base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(GatewayError::Transport(format!(
                "base URL cannot carry paths: {}",
                config.base_url
            )));
        }

        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, GatewayError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| GatewayError::Transport(format!("base URL cannot carry paths: {}", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn post_frame(&self, path: &str, form: Form) -> Result<(StatusCode, String), GatewayError> {
        let url = self.endpoint(&[path])?;
        tracing::debug!("POST {}", url);

        let response = self
            .client
            .post(url)
            .multipart(form)
            .send()
            .await
            .map_err(transport_error)?;
        let status = response.status();
        let body = response.text().await.map_err(transport_error)?;
        Ok((status, body))
    }
}

impl SubmissionGateway for HttpGateway {
    async fn enroll(&self, frame: &Frame, subject_id: &str) -> Result<Enrolled, GatewayError> {
        let form = Form::new()
            .part(FILE_FIELD, file_part(frame, REGISTER_FILE_NAME)?)
            .text(USER_ID_FIELD, subject_id.to_string());

        let (status, body) = self.post_frame(REGISTER_PATH, form).await?;
        if !status.is_success() {
            let error = status_error(status, &body);
            tracing::warn!("Enrollment for {} rejected: {}", subject_id, error);
            return Err(error);
        }

        let parsed: RegisterResponse = serde_json::from_str(&body)
            .map_err(|e| GatewayError::Malformed(format!("register response: {}", e)))?;
        tracing::info!(
            "Enrolled {} ({})",
            subject_id,
            parsed.face_id.as_deref().unwrap_or("no face id")
        );

        Ok(Enrolled {
            subject_id: subject_id.to_string(),
            face_id: parsed.face_id,
        })
    }

    async fn match_face(&self, frame: &Frame) -> Result<Recognized, GatewayError> {
        let form = Form::new().part(FILE_FIELD, file_part(frame, RECOGNIZE_FILE_NAME)?);

        let (status, body) = self.post_frame(RECOGNIZE_PATH, form).await?;
        if !status.is_success() {
            let error = status_error(status, &body);
            if status == StatusCode::NOT_FOUND || signals_no_match(&error) {
                tracing::info!("Service found no matching face");
                return Err(GatewayError::NoMatch);
            }
            tracing::warn!("Recognition failed: {}", error);
            return Err(error);
        }

        // Some deployments answer 2xx with an error payload
        if let Ok(payload) = serde_json::from_str::<ErrorResponse>(&body) {
            let error = GatewayError::Status {
                status: status.as_u16(),
                message: payload.error,
            };
            if signals_no_match(&error) {
                tracing::info!("Service found no matching face");
                return Err(GatewayError::NoMatch);
            }
            tracing::warn!("Recognition failed: {}", error);
            return Err(error);
        }

        let parsed: RecognizeResponse = serde_json::from_str(&body)
            .map_err(|e| GatewayError::Malformed(format!("recognize response: {}", e)))?;
        if !parsed.confidence.is_finite() {
            return Err(GatewayError::Malformed("confidence is not a number".into()));
        }
        if !(0.0..=100.0).contains(&parsed.confidence) {
            tracing::warn!("Confidence {} outside [0, 100], clamping", parsed.confidence);
        }

        Ok(Recognized {
            subject_id: parsed.user_id,
            confidence: parsed.confidence.clamp(0.0, 100.0),
        })
    }

    async fn list_recent(&self, subject_id: &str) -> Result<Vec<AttendanceEntry>, GatewayError> {
        let url = self.endpoint(&[ATTENDANCE_PATH, subject_id])?;
        tracing::debug!("GET {}", url);

        let response = self.client.get(url).send().await.map_err(transport_error)?;
        let status = response.status();
        let body = response.text().await.map_err(transport_error)?;
        if !status.is_success() {
            return Err(status_error(status, &body));
        }

        serde_json::from_str(&body)
            .map_err(|e| GatewayError::Malformed(format!("attendance response: {}", e)))
    }
}

fn file_part(frame: &Frame, file_name: &'static str) -> Result<Part, GatewayError> {
    Part::bytes(frame.bytes().to_vec())
        .file_name(file_name)
        .mime_str(frame.encoding().mime_type())
        .map_err(|e| GatewayError::Transport(e.to_string()))
}

fn transport_error(e: reqwest::Error) -> GatewayError {
    GatewayError::Transport(e.to_string())
}

fn status_error(status: StatusCode, body: &str) -> GatewayError {
    let message = match serde_json::from_str::<ErrorResponse>(body) {
        Ok(parsed) => parsed.error,
        Err(_) if !body.trim().is_empty() => body.trim().to_string(),
        Err(_) => status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string(),
    };
    GatewayError::Status {
        status: status.as_u16(),
        message,
    }
}

fn signals_no_match(error: &GatewayError) -> bool {
    match error {
        GatewayError::NoMatch => true,
        GatewayError::Status { message, .. } => {
            message.contains(NO_MATCH_MARKER) || message.contains(NO_MATCH_TEXT)
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gateway(base: &str) -> HttpGateway {
        HttpGateway::new(&ServiceConfig {
            base_url: base.to_string(),
            timeout_seconds: 5,
        })
        .unwrap()
    }

    #[test]
    fn endpoints_join_under_base_path() {
        assert_eq!(
            gateway("http://127.0.0.1:5000").endpoint(&["register"]).unwrap().as_str(),
            "http://127.0.0.1:5000/register"
        );
        assert_eq!(
            gateway("http://svc.local/api/").endpoint(&["recognize"]).unwrap().as_str(),
            "http://svc.local/api/recognize"
        );
        assert_eq!(
            gateway("http://svc.local").endpoint(&["attendance", "jane smith/2"]).unwrap().as_str(),
            "http://svc.local/attendance/jane%20smith%2F2"
        );
    }

    #[test]
    fn rejects_unusable_base_urls() {
        let config = ServiceConfig {
            base_url: "mailto:ops@example.com".to_string(),
            timeout_seconds: 5,
        };
        assert!(matches!(HttpGateway::new(&config), Err(GatewayError::Transport(_))));
    }

    #[test]
    fn status_errors_prefer_json_error_field() {
        let error = status_error(StatusCode::BAD_REQUEST, r#"{"error": "User ID required"}"#);
        assert_eq!(
            error,
            GatewayError::Status {
                status: 400,
                message: "User ID required".into()
            }
        );
        assert_eq!(error.to_string(), "User ID required (HTTP 400)");

        let error = status_error(StatusCode::BAD_GATEWAY, "");
        assert_eq!(
            error,
            GatewayError::Status {
                status: 502,
                message: "Bad Gateway".into()
            }
        );
    }

    #[test]
    fn no_match_detection_uses_marker_or_text() {
        let marked = status_error(StatusCode::BAD_REQUEST, r#"{"error": "NO_MATCH: face not in collection"}"#);
        let worded = status_error(StatusCode::OK, r#"{"error": "No matching face found"}"#);
        let other = status_error(StatusCode::INTERNAL_SERVER_ERROR, r#"{"error": "throttled"}"#);
        assert!(signals_no_match(&marked));
        assert!(signals_no_match(&worded));
        assert!(!signals_no_match(&other));
        assert!(!signals_no_match(&GatewayError::Transport("NO_MATCH".into())));
    }

    #[test]
    fn outcomes_keep_no_match_distinct() {
        assert_eq!(SubmissionOutcome::from(GatewayError::NoMatch), SubmissionOutcome::NoMatch);
        assert_eq!(
            SubmissionOutcome::from(GatewayError::Transport("connection refused".into())),
            SubmissionOutcome::Failure("service unreachable: connection refused".into())
        );
        assert_eq!(
            SubmissionOutcome::from_enroll(Ok(Enrolled {
                subject_id: "john.doe".into(),
                face_id: None
            })),
            SubmissionOutcome::Success {
                subject_id: "john.doe".into(),
                confidence: 100.0
            }
        );
        assert!(SubmissionOutcome::from_match(Ok(Recognized {
            subject_id: "jane.smith".into(),
            confidence: 97.0
        }))
        .is_success());
    }
}
