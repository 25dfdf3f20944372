//! Error types for image-forge operations.
//!
//! One enum per pipeline stage:
//! - Reference encoding (degrades to "no reference")
//! - Remote generation calls (service faults)
//! - Artifact download and persistence (transfer faults)
//! - Batch setup (fatal, the only errors that abort a run)

use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

/// Errors that can occur while loading and encoding a reference image.
///
/// The task runner never propagates these: a failed encode means the task
/// proceeds without a reference payload.
#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("Reference file name is empty")]
    EmptyName,

    #[error("Reference file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Reference path '{0}' escapes the input root")]
    OutsideRoot(String),

    #[error("Failed to read reference file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to scan input directory {}: {message}", path.display())]
    Discovery { path: PathBuf, message: String },
}

/// Errors that can occur during a remote image generation call.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("Missing API key: ARK_API_KEY environment variable not set")]
    MissingApiKey,

    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("API error ({status}, {code}): {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
    },

    #[error("Failed to parse generation response: {0}")]
    ParseError(String),

    #[error("Generation response contained no result URL")]
    EmptyResponse,
}

/// Errors that can occur while downloading and persisting a generated artifact.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP client setup failed: {0}")]
    ClientSetup(String),

    #[error("Download request failed: {0}")]
    RequestFailed(String),

    #[error("Download of '{url}' returned status {status}")]
    HttpStatus { status: u16, url: String },

    #[error("Failed to create batch directory {}: {source}", path.display())]
    DirectoryCreationFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Artifact already exists: {}", .0.display())]
    ArtifactExists(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Setup-stage errors that abort a whole batch.
#[derive(Debug, Error)]
pub enum BatchError {
    #[error("Invalid batch tag '{tag}': {reason}")]
    InvalidBatchTag { tag: String, reason: String },

    #[error("Failed to build prompt for subject '{subject}': {message}")]
    Prompt { subject: String, message: String },

    #[error("Failed to create output directory {}: {source}", path.display())]
    OutputDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Classification of a failed task.
///
/// A missing reference is not in this list: the task still runs without it
/// and the outcome records the degradation separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The remote generation call failed or returned nothing usable.
    ServiceFault,
    /// Generation succeeded but downloading or writing the result failed.
    TransferFault,
    /// The task panicked; the batch carried on without it.
    Panicked,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::ServiceFault => write!(f, "service_fault"),
            FailureKind::TransferFault => write!(f, "transfer_fault"),
            FailureKind::Panicked => write!(f, "panicked"),
        }
    }
}

impl From<&GenerationError> for FailureKind {
    fn from(_: &GenerationError) -> Self {
        FailureKind::ServiceFault
    }
}

impl From<&FetchError> for FailureKind {
    fn from(_: &FetchError) -> Self {
        FailureKind::TransferFault
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_error_display() {
        let err = EncodeError::NotFound(PathBuf::from("input/missing.jpg"));
        assert_eq!(err.to_string(), "Reference file not found: input/missing.jpg");

        let err = EncodeError::OutsideRoot("../secret.png".to_string());
        assert!(err.to_string().contains("escapes the input root"));
    }

    #[test]
    fn test_generation_error_display() {
        let err = GenerationError::Api {
            status: 401,
            code: "AuthenticationError".to_string(),
            message: "invalid key".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "API error (401, AuthenticationError): invalid key"
        );
        assert!(GenerationError::EmptyResponse
            .to_string()
            .contains("no result URL"));
    }

    #[test]
    fn test_fetch_error_display() {
        let err = FetchError::HttpStatus {
            status: 404,
            url: "http://example.invalid/a.png".to_string(),
        };
        assert!(err.to_string().contains("404"));
        assert!(err.to_string().contains("a.png"));
    }

    #[test]
    fn test_failure_kind_classification() {
        assert_eq!(
            FailureKind::from(&GenerationError::EmptyResponse),
            FailureKind::ServiceFault
        );
        assert_eq!(
            FailureKind::from(&FetchError::RequestFailed("timeout".to_string())),
            FailureKind::TransferFault
        );
        assert_eq!(FailureKind::TransferFault.to_string(), "transfer_fault");
        assert_eq!(
            serde_json::to_string(&FailureKind::ServiceFault).expect("serialize"),
            "\"service_fault\""
        );
    }
}
