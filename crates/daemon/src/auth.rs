//! Access-token resolution for the remote file service

use crate::fileservice::FileService;
use relaybox_config::ConfigStore;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Where a token came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenOrigin {
    Cached,
    Fresh,
}

/// A usable access token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthToken {
    pub value: String,
    pub origin: TokenOrigin,
}

/// Returns a usable access token, logging in at most once per call
///
/// Never fails: any problem is logged and reported as `None`.
pub struct TokenResolver {
    config: Arc<ConfigStore>,
    service: Arc<dyn FileService>,
}

impl TokenResolver {
    pub fn new(config: Arc<ConfigStore>, service: Arc<dyn FileService>) -> Self {
        Self { config, service }
    }

    pub fn service(&self) -> &Arc<dyn FileService> {
        &self.service
    }

    /// Cached token if present, otherwise one login attempt
    pub async fn resolve(&self) -> Option<AuthToken> {
        let settings = self.config.snapshot().file_service;

        if let Some(token) = settings.cached_token() {
            debug!("using cached file-service token");
            return Some(AuthToken {
                value: token.to_string(),
                origin: TokenOrigin::Cached,
            });
        }

        let (Some(username), Some(password)) = (
            settings.username.as_deref().filter(|u| !u.is_empty()),
            settings.password.as_deref().filter(|p| !p.is_empty()),
        ) else {
            debug!("no file-service credentials configured, continuing without a token");
            return None;
        };

        match self.service.login(username, password).await {
            Ok(token) => {
                info!(username, "logged in to file service");
                if let Err(e) = self.config.store_auth_token(Some(token.clone())) {
                    warn!(error = %e, "failed to persist refreshed file-service token");
                }
                Some(AuthToken {
                    value: token,
                    origin: TokenOrigin::Fresh,
                })
            }
            Err(e) => {
                warn!(username, error = %e, "file-service login failed");
                None
            }
        }
    }

    /// Drop the cached token after the service rejected it
    pub fn invalidate(&self) {
        if let Err(e) = self.config.store_auth_token(None) {
            warn!(error = %e, "failed to clear cached file-service token");
        }
    }
}
