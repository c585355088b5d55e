//! Startup checks module for RelayBox
//!
//! Verifies the encoder executable can be run before the control API is
//! opened, and reports its version.

use std::process::Command;
use thiserror::Error;

/// Error types for startup checks
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("Encoder not available: {0}")]
    EncoderUnavailable(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Parse an FFmpeg version string and extract the version token
///
/// Handles various FFmpeg version formats:
/// - Standard: "ffmpeg version 6.1.1 ..."
/// - N-prefixed: "ffmpeg version n6.1-... ..."
/// - Distro builds: "ffmpeg version 4.4.2-0ubuntu0.22.04.1 ..."
///
/// Returns `(major, full_token)`.
pub fn parse_ffmpeg_version(version_output: &str) -> Option<(u32, String)> {
    // Look for "ffmpeg version" followed by the version string
    let version_line = version_output
        .lines()
        .find(|line| line.to_lowercase().contains("ffmpeg version"))?;

    let version_part = version_line
        .to_lowercase()
        .split("ffmpeg version")
        .nth(1)?
        .split_whitespace()
        .next()?
        .to_string();

    // Handle n-prefixed versions (e.g., "n6.1-...")
    let version_str = version_part.trim_start_matches('n');

    // Extract major version (before first '.' or '-')
    let major = version_str.split(['.', '-']).next()?.parse().ok()?;

    Some((major, version_part))
}

/// Check that `<binary> -version` runs and reports a parseable version
///
/// Returns the version token on success.
pub fn check_encoder_available(binary: &str) -> Result<String, StartupError> {
    let output = Command::new(binary).arg("-version").output().map_err(|e| {
        StartupError::EncoderUnavailable(format!(
            "{} -version failed; is it installed and in PATH? Error: {}",
            binary, e
        ))
    })?;

    if !output.status.success() {
        return Err(StartupError::EncoderUnavailable(format!(
            "{} -version exited with {}",
            binary, output.status
        )));
    }

    let version_output = String::from_utf8_lossy(&output.stdout);
    let (_, version) = parse_ffmpeg_version(&version_output).ok_or_else(|| {
        StartupError::EncoderUnavailable(format!(
            "Could not parse encoder version from output: {}",
            version_output.lines().next().unwrap_or("(empty)")
        ))
    })?;

    Ok(version)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_ffmpeg_version_parsing(
            major in 1u32..20,
            minor in 0u32..10,
            n_prefix in proptest::bool::ANY,
            suffix in "(-[a-z0-9.]{1,12})?",
        ) {
            let token = format!("{}{}.{}{}", if n_prefix { "n" } else { "" }, major, minor, suffix);
            let output = format!(
                "ffmpeg version {} Copyright (c) 2000-2024 the FFmpeg developers\nbuilt with gcc 13",
                token
            );

            let parsed = parse_ffmpeg_version(&output);
            prop_assert_eq!(parsed, Some((major, token)));
        }
    }

    #[test]
    fn test_parse_distro_version() {
        let output = "ffmpeg version 4.4.2-0ubuntu0.22.04.1 Copyright (c) 2000-2021";
        assert_eq!(
            parse_ffmpeg_version(output),
            Some((4, "4.4.2-0ubuntu0.22.04.1".to_string()))
        );
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert_eq!(parse_ffmpeg_version(""), None);
        assert_eq!(parse_ffmpeg_version("avconv version 9"), None);
        assert_eq!(parse_ffmpeg_version("ffmpeg version git-master"), None);
    }

    #[test]
    fn test_missing_binary_is_unavailable() {
        let result = check_encoder_available("/nonexistent/relaybox-test-encoder");
        assert!(matches!(result, Err(StartupError::EncoderUnavailable(_))));
    }
}
