//! HTTP client for the remote file service (media library)
//!
//! Two JSON-over-HTTP calls are used: login (credentials in, token out) and
//! path metadata (path in, direct fetch URL out). The service reports most
//! errors in the body as `{ "code": N, "message": ... }` with HTTP 200, so
//! both the HTTP status and the body code are checked for 401.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Errors returned by the remote file service
#[derive(Debug, Error)]
pub enum FileServiceError {
    /// Token missing, expired, or credentials rejected
    #[error("file service rejected the request as unauthorized")]
    Unauthorized,

    /// Service answered with a non-success code
    #[error("file service error {code}: {message}")]
    Api { code: i64, message: String },

    /// Response did not contain the expected payload
    #[error("file service returned an unusable response: {0}")]
    InvalidResponse(String),

    /// Transport failure or timeout
    #[error("file service request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

/// The two calls the core needs from the remote file service
#[async_trait]
pub trait FileService: Send + Sync {
    /// Public root of the service, used to build fallback download URLs
    fn base_url(&self) -> &str;

    /// Exchange credentials for an access token
    async fn login(&self, username: &str, password: &str) -> Result<String, FileServiceError>;

    /// Ask the service for a direct fetch URL for `path`
    ///
    /// `Ok(None)` means the call succeeded but carried no usable URL.
    async fn raw_url(
        &self,
        path: &str,
        token: Option<&str>,
    ) -> Result<Option<String>, FileServiceError>;
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    code: i64,
    #[serde(default)]
    message: String,
    data: Option<T>,
}

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
struct LoginData {
    token: String,
}

#[derive(Debug, Serialize)]
struct PathRequest<'a> {
    path: &'a str,
}

#[derive(Debug, Deserialize)]
struct PathData {
    #[serde(default)]
    raw_url: Option<String>,
}

/// reqwest-backed [`FileService`]
#[derive(Debug, Clone)]
pub struct FileServiceClient {
    base_url: String,
    client: reqwest::Client,
}

impl FileServiceClient {
    /// Create a client whose every request is bounded by `timeout`
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, FileServiceError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    async fn post<B: Serialize, T: DeserializeOwned>(
        &self,
        endpoint: &str,
        body: &B,
        token: Option<&str>,
    ) -> Result<T, FileServiceError> {
        let url = format!("{}{}", self.base_url, endpoint);
        let mut request = self.client.post(&url).json(body);
        if let Some(token) = token {
            request = request.header(reqwest::header::AUTHORIZATION, token);
        }

        let response = request.send().await?;
        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(FileServiceError::Unauthorized);
        }
        let envelope: Envelope<T> = response.json().await?;
        unwrap_envelope(envelope)
    }
}

fn unwrap_envelope<T>(envelope: Envelope<T>) -> Result<T, FileServiceError> {
    match envelope.code {
        200 => envelope.data.ok_or_else(|| {
            FileServiceError::InvalidResponse("missing data in success response".to_string())
        }),
        401 => Err(FileServiceError::Unauthorized),
        code => Err(FileServiceError::Api {
            code,
            message: envelope.message,
        }),
    }
}

#[async_trait]
impl FileService for FileServiceClient {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn login(&self, username: &str, password: &str) -> Result<String, FileServiceError> {
        let data: LoginData = self
            .post(
                "/api/auth/login",
                &LoginRequest { username, password },
                None,
            )
            .await?;
        if data.token.is_empty() {
            return Err(FileServiceError::InvalidResponse(
                "login returned an empty token".to_string(),
            ));
        }
        Ok(data.token)
    }

    async fn raw_url(
        &self,
        path: &str,
        token: Option<&str>,
    ) -> Result<Option<String>, FileServiceError> {
        let data: PathData = self.post("/api/fs/get", &PathRequest { path }, token).await?;
        Ok(data.raw_url.filter(|u| !u.is_empty()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse<T: DeserializeOwned>(json: &str) -> Result<T, FileServiceError> {
        let envelope: Envelope<T> = serde_json::from_str(json).expect("valid json");
        unwrap_envelope(envelope)
    }

    #[test]
    fn test_login_success_envelope() {
        let data: LoginData =
            parse(r#"{"code":200,"message":"success","data":{"token":"abc.def"}}"#).unwrap();
        assert_eq!(data.token, "abc.def");
    }

    #[test]
    fn test_body_code_401_is_unauthorized() {
        let result: Result<PathData, _> =
            parse(r#"{"code":401,"message":"token is expired","data":null}"#);
        assert!(matches!(result, Err(FileServiceError::Unauthorized)));
    }

    #[test]
    fn test_other_codes_are_api_errors() {
        let result: Result<PathData, _> =
            parse(r#"{"code":500,"message":"object not found","data":null}"#);
        match result {
            Err(FileServiceError::Api { code, message }) => {
                assert_eq!(code, 500);
                assert_eq!(message, "object not found");
            }
            other => panic!("expected Api error, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_raw_url_is_none() {
        let data: PathData =
            parse(r#"{"code":200,"message":"success","data":{"name":"a.mp3"}}"#).unwrap();
        assert_eq!(data.raw_url, None);
    }

    #[test]
    fn test_client_trims_trailing_slash() {
        let client =
            FileServiceClient::new("http://127.0.0.1:5244/", Duration::from_secs(1)).unwrap();
        assert_eq!(client.base_url(), "http://127.0.0.1:5244");
    }
}
