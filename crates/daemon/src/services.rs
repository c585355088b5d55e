//! Auxiliary background services
//!
//! The relay box also hosts a file server, a tunnel client and a download
//! agent. They are found by process name, started detached and stopped with
//! SIGTERM; the daemon does not supervise them after launch.

use crate::process::{find_pids, send_kill, send_terminate};
use relaybox_config::{ConfigStore, ServicesConfig};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tracing::{info, warn};

/// Tunnel tokens shorter than this are treated as unset
const MIN_TUNNEL_TOKEN_LEN: usize = 20;

/// Linux truncates process names to 15 bytes
const PROC_NAME_LEN: usize = 15;

/// Listen address that makes the file server reachable from the LAN
const LAN_LISTEN_ADDRESS: &str = "0.0.0.0";

const REPAIR_STOP_POLLS: u32 = 10;
const REPAIR_STOP_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Error type for auxiliary service control
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("unknown service '{0}'")]
    Unknown(String),

    #[error("{service} is not configured: {reason}")]
    NotConfigured {
        service: AuxService,
        reason: &'static str,
    },

    #[error("{service} does not support {action}")]
    Unsupported {
        service: AuxService,
        action: &'static str,
    },

    #[error("failed to start {service}: {source}")]
    Spawn {
        service: AuxService,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuxService {
    FileServer,
    Tunnel,
    DownloadAgent,
}

impl AuxService {
    pub const ALL: [AuxService; 3] = [
        AuxService::FileServer,
        AuxService::Tunnel,
        AuxService::DownloadAgent,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AuxService::FileServer => "file_server",
            AuxService::Tunnel => "tunnel",
            AuxService::DownloadAgent => "download_agent",
        }
    }

    fn binary<'a>(&self, config: &'a ServicesConfig) -> &'a str {
        match self {
            AuxService::FileServer => &config.file_server_binary,
            AuxService::Tunnel => &config.tunnel_binary,
            AuxService::DownloadAgent => &config.download_agent_binary,
        }
    }

    /// Arguments that identify our instance among same-named processes
    fn marker_args(&self) -> &'static [&'static str] {
        match self {
            AuxService::FileServer => &["server"],
            AuxService::Tunnel => &["tunnel", "run"],
            AuxService::DownloadAgent => &[],
        }
    }

    /// Launch arguments
    pub fn launch_args(&self, config: &ServicesConfig) -> Result<Vec<String>, ServiceError> {
        match self {
            AuxService::FileServer => Ok(vec!["server".to_string()]),
            AuxService::Tunnel => {
                let token = config
                    .tunnel_token
                    .as_deref()
                    .map(str::trim)
                    .filter(|t| t.len() >= MIN_TUNNEL_TOKEN_LEN)
                    .ok_or(ServiceError::NotConfigured {
                        service: *self,
                        reason: "tunnel token missing or too short",
                    })?;
                Ok(vec![
                    "tunnel".to_string(),
                    "run".to_string(),
                    "--token".to_string(),
                    token.to_string(),
                ])
            }
            AuxService::DownloadAgent => Ok(match &config.download_agent_conf {
                Some(conf) => vec![format!("--conf-path={}", conf.display())],
                None => vec!["--enable-rpc".to_string()],
            }),
        }
    }
}

impl std::fmt::Display for AuxService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuxService {
    type Err = ServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AuxService::ALL
            .into_iter()
            .find(|service| service.as_str() == s)
            .ok_or_else(|| ServiceError::Unknown(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceStatus {
    pub service: AuxService,
    pub running: bool,
    pub pids: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ServiceAction {
    Started { pid: Option<u32> },
    AlreadyRunning { pids: Vec<u32> },
    Stopped { signalled: usize },
    NotRunning,
}

/// What the LAN repair did to one file-server config file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ConfigFix {
    Updated { path: PathBuf },
    Unchanged { path: PathBuf },
    Invalid { path: PathBuf, error: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepairReport {
    /// One entry per config file found; empty means the server starts with defaults
    pub fixes: Vec<ConfigFix>,
    pub restarted: ServiceAction,
}

/// Start/stop/status for the auxiliary services
pub struct ServiceManager {
    config: Arc<ConfigStore>,
}

impl ServiceManager {
    pub fn new(config: Arc<ConfigStore>) -> Self {
        Self { config }
    }

    fn pids(&self, service: AuxService, config: &ServicesConfig) -> Vec<u32> {
        find_pids(&process_name(service.binary(config)), service.marker_args())
    }

    pub fn status(&self, service: AuxService) -> ServiceStatus {
        let config = self.config.snapshot().services;
        let pids = self.pids(service, &config);
        ServiceStatus {
            service,
            running: !pids.is_empty(),
            pids,
        }
    }

    /// Launch detached unless an instance is already running
    pub fn start(&self, service: AuxService) -> Result<ServiceAction, ServiceError> {
        let config = self.config.snapshot().services;
        let args = service.launch_args(&config)?;

        let pids = self.pids(service, &config);
        if !pids.is_empty() {
            info!(%service, ?pids, "service already running");
            return Ok(ServiceAction::AlreadyRunning { pids });
        }

        let mut command = Command::new(service.binary(&config));
        command
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        // Own process group: a ctrl-c aimed at the daemon must not reach it
        #[cfg(unix)]
        command.process_group(0);

        let child = command
            .spawn()
            .map_err(|source| ServiceError::Spawn { service, source })?;
        let pid = child.id();
        info!(%service, ?pid, "service started");
        Ok(ServiceAction::Started { pid })
    }

    pub fn stop(&self, service: AuxService) -> ServiceAction {
        let config = self.config.snapshot().services;
        let pids = self.pids(service, &config);
        if pids.is_empty() {
            return ServiceAction::NotRunning;
        }

        let signalled = pids
            .iter()
            .filter(|pid| {
                let sent = send_terminate(**pid);
                if !sent {
                    warn!(%service, pid = **pid, "could not signal service process");
                }
                sent
            })
            .count();
        info!(%service, signalled, "service stop requested");
        ServiceAction::Stopped { signalled }
    }

    /// Make the file server listen on all interfaces
    ///
    /// Stops it (killing after ~5s), rewrites `scheme.address` in every
    /// config file found, then starts it again.
    pub async fn repair_file_server(&self) -> Result<RepairReport, ServiceError> {
        let service = AuxService::FileServer;
        let config = self.config.snapshot().services;

        if let ServiceAction::Stopped { .. } = self.stop(service) {
            let mut polls = 0;
            while !self.pids(service, &config).is_empty() && polls < REPAIR_STOP_POLLS {
                tokio::time::sleep(REPAIR_STOP_POLL_INTERVAL).await;
                polls += 1;
            }
            for pid in self.pids(service, &config) {
                warn!(%service, pid, "file server ignored SIGTERM, killing");
                send_kill(pid);
            }
        }

        let fixes: Vec<ConfigFix> = file_server_config_paths(&config)
            .into_iter()
            .filter(|path| path.exists())
            .map(|path| set_listen_address(&path))
            .collect();
        if fixes.is_empty() {
            warn!(%service, "no config file found; a default one is written on first start");
        }

        let restarted = self.start(service)?;
        Ok(RepairReport { fixes, restarted })
    }
}

/// Configured file-server config, or the working directory and home defaults
fn file_server_config_paths(config: &ServicesConfig) -> Vec<PathBuf> {
    if let Some(path) = &config.file_server_config {
        return vec![path.clone()];
    }
    let mut paths = Vec::new();
    if let Ok(cwd) = std::env::current_dir() {
        paths.push(cwd.join("data").join("config.json"));
    }
    if let Some(home) = std::env::var_os("HOME") {
        paths.push(PathBuf::from(home).join(".alist").join("data").join("config.json"));
    }
    paths
}

/// Set `scheme.address` to the LAN listen address, creating `scheme` if absent
pub fn set_listen_address(path: &Path) -> ConfigFix {
    let invalid = |error: String| ConfigFix::Invalid {
        path: path.to_path_buf(),
        error,
    };

    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) => return invalid(e.to_string()),
    };
    let mut root: Value = match serde_json::from_str(&text) {
        Ok(value) => value,
        Err(e) => return invalid(e.to_string()),
    };
    let Some(object) = root.as_object_mut() else {
        return invalid("top level is not an object".to_string());
    };

    let scheme = object
        .entry("scheme")
        .or_insert_with(|| Value::Object(Map::new()));
    let changed = match scheme.as_object_mut() {
        Some(scheme) if scheme.get("address").and_then(Value::as_str) != Some(LAN_LISTEN_ADDRESS) => {
            scheme.insert("address".to_string(), Value::from(LAN_LISTEN_ADDRESS));
            true
        }
        _ => false,
    };
    if !changed {
        return ConfigFix::Unchanged {
            path: path.to_path_buf(),
        };
    }

    let written = serde_json::to_string_pretty(&root)
        .map_err(|e| e.to_string())
        .and_then(|json| fs::write(path, json).map_err(|e| e.to_string()));
    match written {
        Ok(()) => {
            info!(path = %path.display(), "file server now listens on {}", LAN_LISTEN_ADDRESS);
            ConfigFix::Updated {
                path: path.to_path_buf(),
            }
        }
        Err(e) => invalid(e),
    }
}

/// Name the OS reports for a process started from `binary`
fn process_name(binary: &str) -> String {
    let name = Path::new(binary)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| binary.to_string());
    name.chars().take(PROC_NAME_LEN).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use relaybox_config::Config;
    use std::path::PathBuf;

    fn manager(services: ServicesConfig) -> ServiceManager {
        let mut config = Config::default();
        config.services = services;
        ServiceManager::new(Arc::new(ConfigStore::in_memory(config)))
    }

    #[test]
    fn test_parse_service_names() {
        for service in AuxService::ALL {
            assert_eq!(service.as_str().parse::<AuxService>().unwrap(), service);
        }
        assert!(matches!(
            "ssh".parse::<AuxService>(),
            Err(ServiceError::Unknown(name)) if name == "ssh"
        ));
    }

    #[test]
    fn test_file_server_args() {
        let args = AuxService::FileServer
            .launch_args(&ServicesConfig::default())
            .unwrap();
        assert_eq!(args, vec!["server"]);
    }

    #[test]
    fn test_tunnel_requires_long_token() {
        let mut config = ServicesConfig::default();
        assert!(matches!(
            AuxService::Tunnel.launch_args(&config),
            Err(ServiceError::NotConfigured { .. })
        ));

        config.tunnel_token = Some("short-token".to_string());
        assert!(AuxService::Tunnel.launch_args(&config).is_err());

        config.tunnel_token = Some("eyJhIjoiMTIzNDU2Nzg5MCJ9".to_string());
        let args = AuxService::Tunnel.launch_args(&config).unwrap();
        assert_eq!(
            args,
            vec!["tunnel", "run", "--token", "eyJhIjoiMTIzNDU2Nzg5MCJ9"]
        );
    }

    #[test]
    fn test_download_agent_args() {
        let mut config = ServicesConfig::default();
        assert_eq!(
            AuxService::DownloadAgent.launch_args(&config).unwrap(),
            vec!["--enable-rpc"]
        );

        config.download_agent_conf = Some(PathBuf::from("/data/aria2/aria2.conf"));
        assert_eq!(
            AuxService::DownloadAgent.launch_args(&config).unwrap(),
            vec!["--conf-path=/data/aria2/aria2.conf"]
        );
    }

    #[test]
    fn test_process_name_truncation() {
        assert_eq!(process_name("/usr/local/bin/alist"), "alist");
        assert_eq!(
            process_name("/opt/relaybox-file-server-daemon"),
            "relaybox-file-s"
        );
    }

    #[tokio::test]
    async fn test_missing_binary_reports_spawn_error() {
        let manager = manager(ServicesConfig {
            file_server_binary: "/nonexistent/relaybox-missing-fs".to_string(),
            ..ServicesConfig::default()
        });

        let status = manager.status(AuxService::FileServer);
        assert!(!status.running);
        assert!(matches!(
            manager.start(AuxService::FileServer),
            Err(ServiceError::Spawn { service: AuxService::FileServer, .. })
        ));
        assert_eq!(manager.stop(AuxService::FileServer), ServiceAction::NotRunning);
    }

    #[test]
    fn test_listen_address_is_set_once() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"scheme":{"address":"127.0.0.1","http_port":5244},"site_url":""}"#)
            .unwrap();

        assert!(matches!(set_listen_address(&path), ConfigFix::Updated { .. }));
        let value: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["scheme"]["address"], "0.0.0.0");
        assert_eq!(value["scheme"]["http_port"], 5244);
        assert_eq!(value["site_url"], "");

        assert!(matches!(set_listen_address(&path), ConfigFix::Unchanged { .. }));
    }

    #[test]
    fn test_listen_address_creates_scheme() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"force":false}"#).unwrap();

        assert!(matches!(set_listen_address(&path), ConfigFix::Updated { .. }));
        let value: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["scheme"]["address"], "0.0.0.0");
    }

    #[test]
    fn test_listen_address_reports_broken_json() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{not json").unwrap();

        assert!(matches!(set_listen_address(&path), ConfigFix::Invalid { .. }));
        assert_eq!(fs::read_to_string(&path).unwrap(), "{not json");
    }

    #[tokio::test]
    async fn test_repair_rewrites_config_before_restart() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"scheme":{"address":"127.0.0.1"}}"#).unwrap();
        let manager = manager(ServicesConfig {
            file_server_binary: "/nonexistent/relaybox-missing-fs".to_string(),
            file_server_config: Some(path.clone()),
            ..ServicesConfig::default()
        });

        // Restart fails on the missing binary, after the config was fixed
        assert!(matches!(
            manager.repair_file_server().await,
            Err(ServiceError::Spawn { service: AuxService::FileServer, .. })
        ));
        assert!(fs::read_to_string(&path).unwrap().contains("0.0.0.0"));
    }

    #[test]
    fn test_unconfigured_tunnel_does_not_spawn() {
        let manager = manager(ServicesConfig {
            tunnel_binary: "/nonexistent/relaybox-missing-tunnel".to_string(),
            ..ServicesConfig::default()
        });
        assert!(matches!(
            manager.start(AuxService::Tunnel),
            Err(ServiceError::NotConfigured { service: AuxService::Tunnel, .. })
        ));
    }
}
