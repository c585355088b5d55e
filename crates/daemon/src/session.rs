//! Stream session controller for RelayBox
//!
//! Owns the single encoder process. A session moves
//! `Idle -> Starting -> Running -> Idle`, or `Starting -> Failed -> Idle`
//! when the encoder dies inside the settle window. Starts are single-flight:
//! the check-and-set to `Starting` happens under one lock, so concurrent
//! callers see `AlreadyRunning` instead of racing to spawn.

use crate::classify::{classify_failure, FailureReason};
use crate::encode::{build_encoder_command, EncodeError, EncodeSettings, ModeKind, VideoInput};
use crate::log_tail::{describe_tail, read_tail};
use crate::playlist::PlaylistError;
use crate::process::send_terminate;
use crate::source::{ResolveError, SourceDescriptor, SourceResolver};
use relaybox_config::ConfigStore;
use serde::{Serialize, Serializer};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Bytes of log handed to the classifier after a fast exit
const FAILURE_TAIL_BYTES: u64 = 800;

/// Error type for session operations
#[derive(Debug, Error)]
pub enum SessionError {
    /// A session is already starting or running
    #[error("a stream session is already active")]
    AlreadyRunning,

    /// Missing or invalid configuration, detected before spawn
    #[error("Configuration error: {0}")]
    Config(String),

    /// The request itself is unusable (e.g. image mode without an image)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Source resolution failed: {0}")]
    Resolution(ResolveError),

    /// The file service rejected credentials even after re-authenticating
    #[error("Authorization failed: {0}")]
    Auth(ResolveError),

    #[error("Playlist generation failed: {0}")]
    Playlist(#[from] PlaylistError),

    /// The OS refused to start the encoder or open its log
    #[error("Failed to launch encoder: {0}")]
    Spawn(#[source] std::io::Error),

    /// The encoder exited inside the settle window
    #[error("Encoder exited during startup with code {exit_code:?} ({reason}): {}", .reason.hint())]
    StartupFailure {
        exit_code: Option<i32>,
        reason: FailureReason,
        log_tail: String,
    },

    /// `stop` ran while this start was still settling
    #[error("session was stopped during startup")]
    StoppedDuringStartup,
}

impl From<ResolveError> for SessionError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::Unauthorized(_) => SessionError::Auth(err),
            other => SessionError::Resolution(other),
        }
    }
}

impl From<EncodeError> for SessionError {
    fn from(err: EncodeError) -> Self {
        match err {
            EncodeError::Playlist(e) => SessionError::Playlist(e),
            other => SessionError::Config(other.to_string()),
        }
    }
}

/// Lifecycle state of the session slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Starting,
    Running,
    Failed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Starting => "starting",
            SessionState::Running => "running",
            SessionState::Failed => "failed",
        }
    }
}

/// What the operator asked for
#[derive(Debug, Clone)]
pub struct StartRequest {
    pub source: String,
    pub mode: ModeKind,
    /// Image references; the first is used in single-image mode
    pub images: Vec<String>,
    /// Replaces the configured broadcast endpoint for this session only
    pub endpoint: Option<String>,
}

impl StartRequest {
    pub fn plain(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            mode: ModeKind::PlainMedia,
            images: Vec::new(),
            endpoint: None,
        }
    }
}

/// Public description of a running session
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub id: Uuid,
    pub mode: ModeKind,
    pub source: SourceDescriptor,
    #[serde(serialize_with = "serialize_redacted")]
    pub output_endpoint: String,
    pub started_at_unix_ms: i64,
    pub pid: Option<u32>,
}

impl SessionInfo {
    /// One-line operator summary; the endpoint is redacted
    pub fn summary(&self) -> String {
        let name = Path::new(&self.source.original)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.source.original.clone());
        let pid = self
            .pid
            .map(|p| format!(", pid {}", p))
            .unwrap_or_default();
        format!(
            "streaming '{}' to {} ({}{})",
            name,
            redact_endpoint(&self.output_endpoint),
            self.mode,
            pid
        )
    }
}

/// Point-in-time view of the controller
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub state: SessionState,
    /// The encoder process is alive right now
    pub running: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionInfo>,
    /// The encoder exited on its own after startup; not yet cleared
    pub exited: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
}

impl SessionStatus {
    pub fn describe(&self) -> String {
        match (&self.session, self.exited) {
            (Some(session), false) if self.running => session.summary(),
            (Some(_), true) => match self.exit_code {
                Some(code) => format!("encoder exited with code {}", code),
                None => "encoder was terminated by a signal".to_string(),
            },
            _ => self.state.as_str().to_string(),
        }
    }
}

/// Result of a stop request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum StopOutcome {
    /// The encoder was terminated; `forced` if SIGTERM was not enough
    Stopped { id: Uuid, forced: bool },
    /// The encoder had already exited; its record was cleared
    AlreadyExited { id: Uuid, exit_code: Option<i32> },
    /// A start was still resolving its inputs; it will not launch
    Cancelled { id: Uuid },
    NothingToStop,
}

impl StopOutcome {
    /// A session record existed and is now gone
    pub fn stopped(&self) -> bool {
        !matches!(self, StopOutcome::NothingToStop)
    }
}

/// Shorten long endpoints so stream keys never appear in full
pub fn redact_endpoint(endpoint: &str) -> String {
    let chars: Vec<char> = endpoint.chars().collect();
    if chars.len() <= 30 {
        return endpoint.to_string();
    }
    let head: String = chars[..20].iter().collect();
    let tail: String = chars[chars.len() - 5..].iter().collect();
    format!("{}...{}", head, tail)
}

fn serialize_redacted<S: Serializer>(endpoint: &str, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&redact_endpoint(endpoint))
}

struct ActiveSession {
    info: SessionInfo,
    child: Child,
}

struct Slot {
    state: SessionState,
    /// Id of the start that owns the slot while `Starting`/`Running`
    owner: Option<Uuid>,
    active: Option<ActiveSession>,
}

impl Slot {
    fn reset(&mut self) {
        self.state = SessionState::Idle;
        self.owner = None;
        self.active = None;
    }
}

/// Single-session encoder supervisor
pub struct SessionController {
    config: Arc<ConfigStore>,
    resolver: SourceResolver,
    slot: Mutex<Slot>,
    /// Encoder processes spawned over the controller's lifetime
    launches: AtomicU64,
}

impl SessionController {
    pub fn new(config: Arc<ConfigStore>, resolver: SourceResolver) -> Self {
        Self {
            config,
            resolver,
            slot: Mutex::new(Slot {
                state: SessionState::Idle,
                owner: None,
                active: None,
            }),
            launches: AtomicU64::new(0),
        }
    }

    /// Number of encoder processes ever spawned
    pub fn launch_count(&self) -> u64 {
        self.launches.load(Ordering::SeqCst)
    }

    /// Start a session
    ///
    /// Everything that can be checked before spawning (endpoint, encoder
    /// settings, source and image resolution, playlist) is checked first, so
    /// those failures never launch a process. After launch the controller
    /// waits the settle window and reports a fast exit as `StartupFailure`.
    pub async fn start(&self, request: StartRequest) -> Result<SessionInfo, SessionError> {
        let id = self.claim().await?;
        info!(session = %id, mode = %request.mode, source = %request.source, "session starting");

        let result = self.launch(id, request).await;
        match &result {
            Ok(info) => info!(session = %id, pid = ?info.pid, "session running"),
            Err(SessionError::StoppedDuringStartup) => {
                info!(session = %id, "session stopped during startup")
            }
            Err(e) => {
                warn!(session = %id, error = %e, "session start failed");
                self.release(id).await;
            }
        }
        result
    }

    /// Atomically move `Idle -> Starting`
    async fn claim(&self) -> Result<Uuid, SessionError> {
        let mut slot = self.slot.lock().await;
        reap_exited(&mut slot);
        if slot.state != SessionState::Idle {
            return Err(SessionError::AlreadyRunning);
        }
        let id = Uuid::new_v4();
        slot.state = SessionState::Starting;
        slot.owner = Some(id);
        Ok(id)
    }

    /// Return the slot to `Idle` if start `id` still owns it
    async fn release(&self, id: Uuid) {
        let mut slot = self.slot.lock().await;
        if slot.owner != Some(id) {
            return;
        }
        if let Some(mut active) = slot.active.take() {
            let _ = active.child.start_kill();
        }
        slot.reset();
    }

    async fn owns(&self, id: Uuid) -> bool {
        self.slot.lock().await.owner == Some(id)
    }

    async fn launch(&self, id: Uuid, request: StartRequest) -> Result<SessionInfo, SessionError> {
        let config = self.config.snapshot();

        let output = config
            .output_endpoint(request.endpoint.as_deref())
            .ok_or_else(|| {
                SessionError::Config(
                    "no broadcast endpoint: set stream.output_base and an active key".to_string(),
                )
            })?;
        let settings = EncodeSettings::from_config(&config)?;

        let video = self.resolve_video(&request).await?;
        let source = self.resolver.resolve(&request.source).await?;
        let command = build_encoder_command(&settings, &source, &video, &output)?;

        if !self.owns(id).await {
            return Err(SessionError::StoppedDuringStartup);
        }

        let child = self.spawn_encoder(command, &config.encoder.log_file)?;
        let info = SessionInfo {
            id,
            mode: request.mode,
            source,
            output_endpoint: output,
            started_at_unix_ms: timestamp_ms(),
            pid: child.id(),
        };
        debug!(
            session = %id,
            pid = ?info.pid,
            endpoint = %redact_endpoint(&info.output_endpoint),
            "encoder launched"
        );

        {
            let mut slot = self.slot.lock().await;
            if slot.owner != Some(id) {
                let mut child = child;
                let _ = child.start_kill();
                return Err(SessionError::StoppedDuringStartup);
            }
            slot.active = Some(ActiveSession {
                info: info.clone(),
                child,
            });
        }

        tokio::time::sleep(Duration::from_millis(config.encoder.settle_ms)).await;

        let mut slot = self.slot.lock().await;
        if slot.owner != Some(id) {
            return Err(SessionError::StoppedDuringStartup);
        }
        let exit = match slot.active.as_mut() {
            Some(active) => active.child.try_wait(),
            None => return Err(SessionError::StoppedDuringStartup),
        };

        match exit {
            Ok(None) => {
                slot.state = SessionState::Running;
                Ok(info)
            }
            Ok(Some(status)) => {
                slot.state = SessionState::Failed;
                let log_tail = read_tail(&config.encoder.log_file, FAILURE_TAIL_BYTES)
                    .unwrap_or_default();
                let reason = classify_failure(&log_tail);
                warn!(
                    session = %id,
                    exit_code = ?status.code(),
                    %reason,
                    "encoder exited inside the settle window"
                );
                slot.reset();
                Err(SessionError::StartupFailure {
                    exit_code: status.code(),
                    reason,
                    log_tail,
                })
            }
            Err(e) => Err(SessionError::Spawn(e)),
        }
    }

    async fn resolve_video(&self, request: &StartRequest) -> Result<VideoInput, SessionError> {
        match request.mode {
            ModeKind::PlainMedia => Ok(VideoInput::Source),
            ModeKind::SingleImage => {
                let image = request.images.first().ok_or_else(|| {
                    SessionError::InvalidRequest("single-image mode needs an image".to_string())
                })?;
                if request.images.len() > 1 {
                    warn!(
                        ignored = request.images.len() - 1,
                        "single-image mode uses only the first image"
                    );
                }
                Ok(VideoInput::Image(self.resolver.resolve_image(image).await?))
            }
            ModeKind::Slideshow => {
                if request.images.is_empty() {
                    return Err(SessionError::InvalidRequest(
                        "slideshow mode needs at least one image".to_string(),
                    ));
                }
                let mut images = Vec::with_capacity(request.images.len());
                for image in &request.images {
                    images.push(PathBuf::from(self.resolver.resolve_image(image).await?));
                }
                Ok(VideoInput::Slideshow(images))
            }
        }
    }

    /// Launch with stdout and stderr sharing a freshly truncated log file
    fn spawn_encoder(
        &self,
        command: std::process::Command,
        log_file: &Path,
    ) -> Result<Child, SessionError> {
        let log = File::create(log_file).map_err(SessionError::Spawn)?;
        let log_err = log.try_clone().map_err(SessionError::Spawn)?;

        let mut command = Command::from(command);
        command
            .stdin(Stdio::null())
            .stdout(log)
            .stderr(log_err)
            .kill_on_drop(true);

        let child = command.spawn().map_err(|e| {
            error!(error = %e, "failed to spawn encoder");
            SessionError::Spawn(e)
        })?;
        self.launches.fetch_add(1, Ordering::SeqCst);
        Ok(child)
    }

    /// Stop the active session
    ///
    /// Sends SIGTERM, waits out the grace period, then kills. A start that
    /// has not launched yet is cancelled. Stopping with nothing active is a
    /// no-op. The slot lock is held throughout so a new
    /// start cannot overlap a dying encoder.
    pub async fn stop(&self) -> StopOutcome {
        let grace = Duration::from_millis(self.config.snapshot().encoder.stop_grace_ms);
        let mut slot = self.slot.lock().await;

        let Some(mut active) = slot.active.take() else {
            if let (SessionState::Starting, Some(id)) = (slot.state, slot.owner) {
                slot.reset();
                info!(session = %id, "start cancelled before launch");
                return StopOutcome::Cancelled { id };
            }
            debug!(state = slot.state.as_str(), "stop requested with no encoder process");
            return StopOutcome::NothingToStop;
        };
        slot.reset();
        let id = active.info.id;

        if let Ok(Some(status)) = active.child.try_wait() {
            info!(session = %id, exit_code = ?status.code(), "encoder had already exited");
            return StopOutcome::AlreadyExited {
                id,
                exit_code: status.code(),
            };
        }

        let forced = match terminate(&mut active.child, grace).await {
            Ok(forced) => forced,
            Err(e) => {
                error!(session = %id, error = %e, "failed to reap encoder");
                true
            }
        };
        info!(session = %id, forced, "session stopped");
        StopOutcome::Stopped { id, forced }
    }

    /// Whether the encoder process is alive; never changes state
    pub async fn is_running(&self) -> bool {
        let mut slot = self.slot.lock().await;
        slot.active
            .as_mut()
            .map(|active| matches!(active.child.try_wait(), Ok(None)))
            .unwrap_or(false)
    }

    pub async fn status(&self) -> SessionStatus {
        let mut slot = self.slot.lock().await;
        let state = slot.state;
        match slot.active.as_mut() {
            Some(active) => {
                let exit = active.child.try_wait().ok().flatten();
                SessionStatus {
                    state,
                    running: exit.is_none(),
                    session: Some(active.info.clone()),
                    exited: exit.is_some() && state == SessionState::Running,
                    exit_code: exit.and_then(|status| status.code()),
                }
            }
            None => SessionStatus {
                state,
                running: false,
                session: None,
                exited: false,
                exit_code: None,
            },
        }
    }

    /// Last `max_bytes` of the encoder log, or a placeholder message
    pub fn log_tail(&self, max_bytes: u64) -> String {
        describe_tail(&self.config.snapshot().encoder.log_file, max_bytes)
    }
}

/// Clear a `Running` slot whose encoder exited on its own
fn reap_exited(slot: &mut Slot) {
    if slot.state != SessionState::Running {
        return;
    }
    let exited = match slot.active.as_mut() {
        Some(active) => match active.child.try_wait() {
            Ok(Some(status)) => {
                warn!(session = %active.info.id, exit_code = ?status.code(), "encoder exited at runtime");
                true
            }
            _ => false,
        },
        None => true,
    };
    if exited {
        slot.reset();
    }
}

/// SIGTERM, wait up to `grace`, then SIGKILL; returns whether a kill was needed
async fn terminate(child: &mut Child, grace: Duration) -> std::io::Result<bool> {
    let signalled = child.id().map(send_terminate).unwrap_or(false);
    if !signalled {
        child.start_kill()?;
    }

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(result) => result.map(|_| false),
        Err(_) => {
            warn!(grace_ms = grace.as_millis() as u64, "encoder ignored SIGTERM, killing");
            child.kill().await?;
            Ok(true)
        }
    }
}

fn timestamp_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
