//! RelayBox
//!
//! Remote-controlled live-stream relay: resolves media sources, synthesizes
//! the encoder command line and supervises the single encoder session behind
//! a small HTTP control API.

pub mod auth;
pub mod classify;
pub mod control_server;
pub mod daemon;
pub mod encode;
pub mod env_report;
pub mod fileservice;
pub mod log_tail;
pub mod playlist;
pub mod process;
pub mod services;
pub mod session;
pub mod source;
pub mod startup;

#[cfg(test)]
mod test_support;

pub use relaybox_config as config;
pub use relaybox_config::{Config, ConfigStore};
pub use auth::{AuthToken, TokenOrigin, TokenResolver};
pub use classify::{classify_failure, FailureReason};
pub use control_server::{
    create_control_router, run_control_server, AppState, ServerError, StartBody, StartOutcome,
    StartResponse, StopResponse,
};
pub use daemon::{Daemon, DaemonError};
pub use encode::{build_encoder_command, BitrateLadder, EncodeError, EncodeSettings, ModeKind, VideoInput};
pub use env_report::{EnvReport, StreamReport, SystemUsage, ToolReport};
pub use fileservice::{FileService, FileServiceClient, FileServiceError};
pub use log_tail::{describe_tail, read_tail};
pub use playlist::{Playlist, PlaylistEntry, PlaylistError};
pub use services::{
    AuxService, ConfigFix, RepairReport, ServiceAction, ServiceError, ServiceManager, ServiceStatus,
};
pub use session::{
    redact_endpoint, SessionController, SessionError, SessionInfo, SessionState, SessionStatus,
    StartRequest, StopOutcome,
};
pub use source::{ResolveError, SourceDescriptor, SourceKind, SourceResolver};
pub use startup::{check_encoder_available, parse_ffmpeg_version, StartupError};
