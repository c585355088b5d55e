//! Classifier module for encoder startup failures.
//!
//! Scans the tail of the encoder log for known error markers and maps them
//! to a reason with an actionable hint for the operator.

use serde::Serialize;

/// Why the encoder exited during the settle window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// The input server refused our credentials or signature.
    AuthorizationRejected,
    /// The input could not be found.
    InputNotFound,
    /// The input was reachable but not a decodable media container.
    MalformedInput,
    /// The broadcast endpoint refused the connection or the stream key.
    EndpointRejected,
    /// Network or file I/O failed.
    Io,
    /// None of the known markers matched.
    Unknown,
}

impl FailureReason {
    /// Operator-facing hint for this reason.
    pub fn hint(&self) -> &'static str {
        match self {
            FailureReason::AuthorizationRejected => {
                "source rejected authorization; re-check file-service credentials or use a fresh link"
            }
            FailureReason::InputNotFound => "source not found; the path or link may be stale",
            FailureReason::MalformedInput => {
                "source is not a readable media file; check the format or whether the link returns an error page"
            }
            FailureReason::EndpointRejected => {
                "broadcast endpoint refused the stream; check the endpoint and the active key"
            }
            FailureReason::Io => "network or I/O failure; check connectivity and retry",
            FailureReason::Unknown => "encoder exited early; see the log for details",
        }
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureReason::AuthorizationRejected => write!(f, "authorization_rejected"),
            FailureReason::InputNotFound => write!(f, "input_not_found"),
            FailureReason::MalformedInput => write!(f, "malformed_input"),
            FailureReason::EndpointRejected => write!(f, "endpoint_rejected"),
            FailureReason::Io => write!(f, "io"),
            FailureReason::Unknown => write!(f, "unknown"),
        }
    }
}

/// Markers checked in order; the first matching group wins.
const AUTH_MARKERS: &[&str] = &[
    "401 unauthorized",
    "403 forbidden",
    "server returned 401",
    "server returned 403",
];

const NOT_FOUND_MARKERS: &[&str] = &[
    "404 not found",
    "server returned 404",
    "no such file or directory",
];

const MALFORMED_MARKERS: &[&str] = &[
    "invalid data found when processing input",
    "moov atom not found",
    "could not find codec parameters",
    "end of file",
];

const ENDPOINT_MARKERS: &[&str] = &[
    "error opening output",
    "failed to update header",
    "rtmp_connect",
    "handshake",
];

const IO_MARKERS: &[&str] = &[
    "input/output error",
    "i/o error",
    "connection refused",
    "connection timed out",
    "connection reset",
    "broken pipe",
    "network is unreachable",
];

/// Classifies an encoder log tail.
///
/// Classification logic:
/// 1. Authorization markers -> AuthorizationRejected
/// 2. Missing-input markers -> InputNotFound
/// 3. Container/decoder markers -> MalformedInput
/// 4. Output/connect markers -> EndpointRejected
/// 5. Generic I/O markers -> Io
/// 6. Otherwise -> Unknown
pub fn classify_failure(log_tail: &str) -> FailureReason {
    let lower = log_tail.to_lowercase();

    if contains_any_marker(&lower, AUTH_MARKERS) {
        return FailureReason::AuthorizationRejected;
    }
    if contains_any_marker(&lower, NOT_FOUND_MARKERS) {
        return FailureReason::InputNotFound;
    }
    if contains_any_marker(&lower, MALFORMED_MARKERS) {
        return FailureReason::MalformedInput;
    }
    if contains_any_marker(&lower, ENDPOINT_MARKERS) {
        return FailureReason::EndpointRejected;
    }
    if contains_any_marker(&lower, IO_MARKERS) {
        return FailureReason::Io;
    }

    FailureReason::Unknown
}

/// Checks if the text contains any of the given markers.
fn contains_any_marker(text: &str, markers: &[&str]) -> bool {
    markers.iter().any(|m| text.contains(m))
}
