//! Storage-service error mapping.
//!
//! Every fault coming back from the storage service is normalized into a
//! [`StorageError`]: a stable kind, the service's error code when it sent
//! one, and a user-facing message.

use serde::Serialize;
use thiserror::Error;

/// Broad category of a storage fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StorageErrorKind {
    /// Input rejected before contacting the service.
    InvalidInput,
    NotFound,
    AccessDenied,
    InvalidAccessKey,
    BadSignature,
    NameCollision,
    NotEmpty,
    Unreachable,
    Timeout,
    Other,
}

/// A mapped storage-service fault.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct StorageError {
    pub kind: StorageErrorKind,
    /// Error code reported by the service, if any.
    pub code: Option<String>,
    pub message: String,
}

impl StorageError {
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self {
            kind: StorageErrorKind::InvalidInput,
            code: None,
            message: message.into(),
        }
    }

    /// True for faults that mean the credentials themselves are bad.
    pub fn is_credential_error(&self) -> bool {
        matches!(
            self.kind,
            StorageErrorKind::InvalidAccessKey
                | StorageErrorKind::BadSignature
                | StorageErrorKind::AccessDenied
        )
    }

    /// The service code, or a name for the kind when no code was sent.
    pub fn code(&self) -> &str {
        match &self.code {
            Some(code) => code,
            None => match self.kind {
                StorageErrorKind::InvalidInput => "InvalidInput",
                StorageErrorKind::NotFound => "NotFound",
                StorageErrorKind::AccessDenied => "AccessDenied",
                StorageErrorKind::InvalidAccessKey => "InvalidAccessKeyId",
                StorageErrorKind::BadSignature => "SignatureDoesNotMatch",
                StorageErrorKind::NameCollision => "BucketAlreadyExists",
                StorageErrorKind::NotEmpty => "BucketNotEmpty",
                StorageErrorKind::Unreachable => "NetworkUnreachable",
                StorageErrorKind::Timeout => "RequestTimeout",
                StorageErrorKind::Other => "StorageError",
            },
        }
    }
}

/// Markers of a failed DNS lookup in transport error chains.
const DNS_FAILURE_MARKERS: &[&str] = &[
    "dns error",
    "failed to lookup address",
    "name or service not known",
    "nodename nor servname",
    "enotfound",
];

/// Translate a service error code and raw message into a [`StorageError`].
///
/// Known codes get stable messages; unknown faults keep the raw message.
pub fn parse_storage_error(code: Option<&str>, raw_message: &str) -> StorageError {
    let (kind, message) = match code {
        Some("NoSuchBucket") => (
            StorageErrorKind::NotFound,
            "The specified bucket does not exist",
        ),
        Some("NoSuchKey") | Some("NotFound") => (
            StorageErrorKind::NotFound,
            "The specified object does not exist",
        ),
        Some("AccessDenied") => (
            StorageErrorKind::AccessDenied,
            "Access denied. Check the permissions of these credentials",
        ),
        Some("InvalidAccessKeyId") => (
            StorageErrorKind::InvalidAccessKey,
            "Invalid access key. The access key ID does not exist",
        ),
        Some("SignatureDoesNotMatch") => (
            StorageErrorKind::BadSignature,
            "Invalid secret key. The request signature does not match",
        ),
        Some("BucketAlreadyExists") | Some("BucketAlreadyOwnedByYou") => (
            StorageErrorKind::NameCollision,
            "A bucket with this name already exists",
        ),
        Some("BucketNotEmpty") => (
            StorageErrorKind::NotEmpty,
            "The bucket is not empty. Delete its objects first or use force delete",
        ),
        Some("RequestTimeout") => (
            StorageErrorKind::Timeout,
            "The storage service did not respond in time",
        ),
        _ => {
            let lowered = raw_message.to_ascii_lowercase();
            if DNS_FAILURE_MARKERS.iter().any(|m| lowered.contains(m)) {
                (
                    StorageErrorKind::Unreachable,
                    "Cannot reach the storage service. Check the region and network connectivity",
                )
            } else if lowered.contains("timed out") || lowered.contains("timeout") {
                (
                    StorageErrorKind::Timeout,
                    "The storage service did not respond in time",
                )
            } else {
                return StorageError {
                    kind: StorageErrorKind::Other,
                    code: code.map(str::to_string),
                    message: raw_message.to_string(),
                };
            }
        }
    };

    StorageError {
        kind,
        code: code.map(str::to_string),
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_codes() {
        let cases = [
            ("NoSuchBucket", StorageErrorKind::NotFound),
            ("AccessDenied", StorageErrorKind::AccessDenied),
            ("InvalidAccessKeyId", StorageErrorKind::InvalidAccessKey),
            ("SignatureDoesNotMatch", StorageErrorKind::BadSignature),
            ("BucketAlreadyExists", StorageErrorKind::NameCollision),
            ("BucketAlreadyOwnedByYou", StorageErrorKind::NameCollision),
            ("BucketNotEmpty", StorageErrorKind::NotEmpty),
        ];
        for (code, kind) in cases {
            let err = parse_storage_error(Some(code), "raw text");
            assert_eq!(err.kind, kind, "code {code}");
            assert_ne!(err.message, "raw text");
            assert_eq!(err.code(), code);
        }
    }

    #[test]
    fn test_dns_failure_detected_without_code() {
        let err = parse_storage_error(
            None,
            "dispatch failure: io error: error trying to connect: dns error: failed to lookup address information",
        );
        assert_eq!(err.kind, StorageErrorKind::Unreachable);
        assert_eq!(err.code(), "NetworkUnreachable");
    }

    #[test]
    fn test_unknown_error_passes_raw_message() {
        let err = parse_storage_error(Some("SlowDown"), "Please reduce your request rate.");
        assert_eq!(err.kind, StorageErrorKind::Other);
        assert_eq!(err.message, "Please reduce your request rate.");
        assert_eq!(err.code(), "SlowDown");
    }

    #[test]
    fn test_credential_errors() {
        assert!(parse_storage_error(Some("InvalidAccessKeyId"), "").is_credential_error());
        assert!(parse_storage_error(Some("SignatureDoesNotMatch"), "").is_credential_error());
        assert!(!parse_storage_error(Some("NoSuchBucket"), "").is_credential_error());
    }
}
