//! Daemon startup and main loop for RelayBox
//!
//! Wires the config store, file-service client, session controller and
//! auxiliary service manager together and serves the control API.

use crate::auth::TokenResolver;
use crate::config::{ConfigError, ConfigStore};
use crate::control_server::{run_control_server, AppState, ServerError};
use crate::fileservice::{FileServiceClient, FileServiceError};
use crate::services::ServiceManager;
use crate::session::{SessionController, StopOutcome};
use crate::source::SourceResolver;
use crate::startup::{check_encoder_available, StartupError};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

/// Error type for daemon operations
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Startup check failed
    #[error("Startup check failed: {0}")]
    Startup(#[from] StartupError),

    /// The file-service client could not be built
    #[error("File service error: {0}")]
    FileService(#[from] FileServiceError),

    /// Server error
    #[error("Server error: {0}")]
    Server(#[from] ServerError),
}

/// Daemon state containing all runtime components
pub struct Daemon {
    /// Configuration loaded from file and environment
    pub config: Arc<ConfigStore>,
    pub session: Arc<SessionController>,
    pub services: Arc<ServiceManager>,
}

impl Daemon {
    /// Initialize the daemon with configuration from file
    ///
    /// Loads the config (with environment overrides) and checks that the
    /// encoder binary runs before anything is served.
    pub fn new<P: AsRef<Path>>(config_path: P) -> Result<Self, DaemonError> {
        let store = ConfigStore::open(config_path)?;

        let binary = store.snapshot().encoder.binary;
        let version = check_encoder_available(&binary)?;
        info!(binary = %binary, %version, "encoder available");

        Self::with_store(store)
    }

    /// Initialize the daemon without running startup checks
    ///
    /// Useful for testing when the encoder is not installed.
    pub fn new_without_checks(store: ConfigStore) -> Result<Self, DaemonError> {
        Self::with_store(store)
    }

    fn with_store(store: ConfigStore) -> Result<Self, DaemonError> {
        let config = Arc::new(store);
        let resolver = build_resolver(&config)?;

        Ok(Self {
            session: Arc::new(SessionController::new(config.clone(), resolver)),
            services: Arc::new(ServiceManager::new(config.clone())),
            config,
        })
    }

    /// Handler state for the control API
    pub fn app_state(&self) -> AppState {
        AppState {
            config: self.config.clone(),
            session: self.session.clone(),
            services: self.services.clone(),
        }
    }

    /// Serve the control API until ctrl-c or SIGTERM, then stop the session
    ///
    /// `bind` overrides `server.bind` from the config.
    pub async fn run(&self, bind: Option<&str>) -> Result<(), DaemonError> {
        let bind = bind
            .map(String::from)
            .unwrap_or_else(|| self.config.snapshot().server.bind);

        let served = run_control_server(self.app_state(), &bind, shutdown_signal()).await;

        match self.session.stop().await {
            StopOutcome::NothingToStop => {}
            outcome => info!(?outcome, "stopped stream session on shutdown"),
        }

        served.map_err(DaemonError::from)
    }
}

/// Remote paths are only resolvable when a file service is configured
fn build_resolver(config: &Arc<ConfigStore>) -> Result<SourceResolver, DaemonError> {
    let settings = config.snapshot().file_service;
    if !settings.is_enabled() {
        info!("remote file service disabled; only local files and URLs can be streamed");
        return Ok(SourceResolver::new(None));
    }

    let client = FileServiceClient::new(
        settings.base_url.clone(),
        Duration::from_secs(settings.timeout_secs),
    )?;
    if !settings.has_credentials() && settings.cached_token().is_none() {
        warn!(base_url = %settings.base_url, "file service has no token or credentials");
    }
    Ok(SourceResolver::new(Some(TokenResolver::new(
        config.clone(),
        Arc::new(client),
    ))))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown requested");
}
