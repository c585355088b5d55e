//! Source reference classification and resolution
//!
//! A raw reference is one of:
//! - an existing local path (used verbatim),
//! - a network URL (used verbatim, assumed to carry its own authorization),
//! - an absolute path on the remote file service, resolved through its
//!   metadata API to a fetchable URL.

use crate::auth::TokenResolver;
use crate::fileservice::FileServiceError;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

/// Schemes the encoder can open directly
const NETWORK_SCHEMES: &[&str] = &[
    "http://", "https://", "rtmp://", "rtmps://", "rtsp://", "srt://", "udp://", "tcp://",
];

/// Error type for source resolution
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("source reference is empty")]
    Empty,

    #[error("local file not found: {0}")]
    LocalFileMissing(String),

    #[error("'{0}' is not a local file and no remote file service is configured")]
    NoFileService(String),

    /// Rejected even after one re-authentication
    #[error("file service rejected credentials while resolving '{0}'")]
    Unauthorized(String),

    #[error("invalid file service base URL: {0}")]
    InvalidBaseUrl(String),
}

/// How a source reference was classified
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    LocalFile,
    NetworkUrl,
    RemotePath,
}

/// A source reference after resolution
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceDescriptor {
    /// Reference as given by the operator
    pub original: String,
    /// Path or URL handed to the encoder
    pub input: String,
    pub kind: SourceKind,
    /// The encoder must send the file-service Authorization header
    pub needs_auth_header: bool,
    /// Token to send when `needs_auth_header` is set
    #[serde(skip)]
    pub auth_token: Option<String>,
}

impl SourceDescriptor {
    pub fn is_local(&self) -> bool {
        self.kind == SourceKind::LocalFile
    }

    fn verbatim(raw: &str, kind: SourceKind) -> Self {
        Self {
            original: raw.to_string(),
            input: raw.to_string(),
            kind,
            needs_auth_header: false,
            auth_token: None,
        }
    }
}

/// True if `reference` starts with a scheme the encoder opens itself
pub fn is_network_url(reference: &str) -> bool {
    let lower = reference.to_ascii_lowercase();
    NETWORK_SCHEMES.iter().any(|scheme| lower.starts_with(scheme))
}

/// Fallback direct-download URL: service base + URL-escaped path
pub fn direct_download_url(base: &str, path: &str) -> Result<String, ResolveError> {
    let mut url = Url::parse(base).map_err(|e| ResolveError::InvalidBaseUrl(e.to_string()))?;
    let joined = format!("{}{}", url.path().trim_end_matches('/'), path);
    url.set_path(&joined);
    Ok(url.to_string())
}

/// Whether `candidate` points at the same host and port as `base`
///
/// Relative URLs are served by the base host.
fn same_host(candidate: &str, base: &Url) -> bool {
    match Url::parse(candidate) {
        Ok(url) => {
            url.host_str() == base.host_str()
                && url.port_or_known_default() == base.port_or_known_default()
        }
        Err(url::ParseError::RelativeUrlWithoutBase) => true,
        Err(_) => false,
    }
}

/// Resolves raw operator references into encoder inputs
pub struct SourceResolver {
    /// `None` when no remote file service is configured
    tokens: Option<TokenResolver>,
}

impl SourceResolver {
    pub fn new(tokens: Option<TokenResolver>) -> Self {
        Self { tokens }
    }

    /// Classify and resolve `raw`
    pub async fn resolve(&self, raw: &str) -> Result<SourceDescriptor, ResolveError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(ResolveError::Empty);
        }

        if tokio::fs::try_exists(raw).await.unwrap_or(false) {
            return Ok(SourceDescriptor::verbatim(raw, SourceKind::LocalFile));
        }

        if is_network_url(raw) {
            return Ok(SourceDescriptor::verbatim(raw, SourceKind::NetworkUrl));
        }

        // Remote-service paths are absolute; anything else was meant to be local
        if !raw.starts_with('/') {
            return Err(ResolveError::LocalFileMissing(raw.to_string()));
        }

        match &self.tokens {
            Some(tokens) => self.resolve_remote(tokens, raw).await,
            None => Err(ResolveError::NoFileService(raw.to_string())),
        }
    }

    /// Resolve an image argument: an existing local file or a network URL
    pub async fn resolve_image(&self, raw: &str) -> Result<String, ResolveError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(ResolveError::Empty);
        }
        if is_network_url(raw) || tokio::fs::try_exists(raw).await.unwrap_or(false) {
            return Ok(raw.to_string());
        }
        Err(ResolveError::LocalFileMissing(raw.to_string()))
    }

    async fn resolve_remote(
        &self,
        tokens: &TokenResolver,
        path: &str,
    ) -> Result<SourceDescriptor, ResolveError> {
        let service = tokens.service();
        let base = Url::parse(service.base_url())
            .map_err(|e| ResolveError::InvalidBaseUrl(e.to_string()))?;

        let mut token = tokens.resolve().await;
        let mut result = service
            .raw_url(path, token.as_ref().map(|t| t.value.as_str()))
            .await;

        if matches!(result, Err(FileServiceError::Unauthorized)) {
            warn!(path, "file service rejected token, re-authenticating once");
            tokens.invalidate();
            token = tokens.resolve().await;
            let Some(fresh) = &token else {
                return Err(ResolveError::Unauthorized(path.to_string()));
            };
            result = service.raw_url(path, Some(&fresh.value)).await;
            if matches!(result, Err(FileServiceError::Unauthorized)) {
                return Err(ResolveError::Unauthorized(path.to_string()));
            }
        }

        let (input, needs_auth_header) = match result {
            Ok(Some(raw_url)) => {
                let internal = same_host(&raw_url, &base);
                let input = if internal && Url::parse(&raw_url).is_err() {
                    base.join(&raw_url)
                        .map(|u| u.to_string())
                        .unwrap_or(raw_url)
                } else {
                    raw_url
                };
                debug!(path, internal, "file service resolved path");
                (input, internal)
            }
            Ok(None) => {
                warn!(path, "file service returned no raw URL, using direct download URL");
                (direct_download_url(service.base_url(), path)?, true)
            }
            Err(e) => {
                warn!(path, error = %e, "file service lookup failed, using direct download URL");
                (direct_download_url(service.base_url(), path)?, true)
            }
        };

        Ok(SourceDescriptor {
            original: path.to_string(),
            input,
            kind: SourceKind::RemotePath,
            needs_auth_header,
            auth_token: if needs_auth_header {
                token.map(|t| t.value)
            } else {
                None
            },
        })
    }
}
