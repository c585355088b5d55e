//! In-process doubles shared by unit tests

use crate::fileservice::{FileService, FileServiceError};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Scripted file service that counts every call
pub struct MockFileService {
    pub base: String,
    /// Token handed out by a successful login; `None` makes login fail
    pub login_token: Option<String>,
    /// Tokens the metadata call accepts
    pub valid_tokens: Mutex<Vec<String>>,
    /// Raw URL returned for authorised metadata calls; `None` means no URL
    pub raw_url: Option<String>,
    /// Answer every metadata call with a transport-style failure
    pub metadata_down: bool,
    /// Delay before every metadata answer
    pub latency: Option<Duration>,
    pub login_calls: AtomicUsize,
    pub metadata_calls: AtomicUsize,
    pub tokens_seen: Mutex<Vec<Option<String>>>,
}

impl MockFileService {
    pub fn new(base: &str) -> Self {
        Self {
            base: base.to_string(),
            login_token: None,
            valid_tokens: Mutex::new(Vec::new()),
            raw_url: None,
            metadata_down: false,
            latency: None,
            login_calls: AtomicUsize::new(0),
            metadata_calls: AtomicUsize::new(0),
            tokens_seen: Mutex::new(Vec::new()),
        }
    }

    pub fn with_login(mut self, token: &str) -> Self {
        self.login_token = Some(token.to_string());
        self.valid_tokens.get_mut().unwrap().push(token.to_string());
        self
    }

    pub fn accepting(self, token: &str) -> Self {
        self.valid_tokens.lock().unwrap().push(token.to_string());
        self
    }

    pub fn with_raw_url(mut self, url: &str) -> Self {
        self.raw_url = Some(url.to_string());
        self
    }

    pub fn down(mut self) -> Self {
        self.metadata_down = true;
        self
    }

    pub fn slow(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn logins(&self) -> usize {
        self.login_calls.load(Ordering::SeqCst)
    }

    pub fn metadata(&self) -> usize {
        self.metadata_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FileService for MockFileService {
    fn base_url(&self) -> &str {
        &self.base
    }

    async fn login(&self, _username: &str, _password: &str) -> Result<String, FileServiceError> {
        self.login_calls.fetch_add(1, Ordering::SeqCst);
        self.login_token
            .clone()
            .ok_or(FileServiceError::Unauthorized)
    }

    async fn raw_url(
        &self,
        _path: &str,
        token: Option<&str>,
    ) -> Result<Option<String>, FileServiceError> {
        self.metadata_calls.fetch_add(1, Ordering::SeqCst);
        self.tokens_seen
            .lock()
            .unwrap()
            .push(token.map(String::from));

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        if self.metadata_down {
            return Err(FileServiceError::Api {
                code: 500,
                message: "storage offline".to_string(),
            });
        }

        let valid = self.valid_tokens.lock().unwrap();
        match token {
            Some(t) if valid.iter().any(|v| v == t) => Ok(self.raw_url.clone()),
            _ if valid.is_empty() => Ok(self.raw_url.clone()),
            _ => Err(FileServiceError::Unauthorized),
        }
    }
}
