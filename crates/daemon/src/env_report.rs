//! Environment self-check
//!
//! One snapshot of what the box can do right now: encoder and file-server
//! versions, file-server process, stream state, LAN address and load.

use crate::services::ServiceStatus;
use crate::session::{SessionState, SessionStatus};
use crate::startup::check_encoder_available;
use relaybox_config::Config;
use serde::Serialize;
use std::net::{IpAddr, Ipv4Addr};
use std::process::Command;
use sysinfo::{Networks, System, MINIMUM_CPU_UPDATE_INTERVAL};

/// Interfaces checked first, in order, before any other
const PREFERRED_INTERFACES: &[&str] = &["wlan0", "eth0", "wlan1"];

/// Tunnels, mobile data and container bridges are never the LAN address
const EXCLUDED_PREFIXES: &[&str] = &["tun", "ppp", "lo", "docker", "veth", "rmnet"];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolReport {
    pub binary: String,
    /// `None` when the tool is missing or unusable
    pub version: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamReport {
    pub state: SessionState,
    pub running: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemUsage {
    pub cpu_percent: f32,
    pub memory_used_bytes: u64,
    pub memory_total_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnvReport {
    pub lan_ip: IpAddr,
    pub encoder: ToolReport,
    pub file_server: ToolReport,
    pub file_server_pids: Vec<u32>,
    pub stream: StreamReport,
    pub system: SystemUsage,
}

impl EnvReport {
    /// Gather the report; blocks on child processes and a CPU sample
    pub fn collect(config: &Config, file_server: ServiceStatus, stream: &SessionStatus) -> Self {
        let encoder_binary = config.encoder.binary.clone();
        let file_server_binary = config.services.file_server_binary.clone();

        Self {
            lan_ip: pick_lan_ip(&interface_addresses()),
            encoder: ToolReport {
                version: check_encoder_available(&encoder_binary).ok(),
                binary: encoder_binary,
            },
            file_server: ToolReport {
                version: file_server_version(&file_server_binary),
                binary: file_server_binary,
            },
            file_server_pids: file_server.pids,
            stream: StreamReport {
                state: stream.state,
                running: stream.running,
            },
            system: system_usage(),
        }
    }

    /// Multi-line operator summary
    pub fn describe(&self) -> String {
        let tool = |report: &ToolReport| match &report.version {
            Some(version) => format!("{} {}", report.binary, version),
            None => format!("{} not installed", report.binary),
        };
        let file_server_state = match self.file_server_pids.first() {
            Some(pid) => format!("running (pid {})", pid),
            None => "stopped".to_string(),
        };
        let stream = if self.stream.running {
            "streaming"
        } else {
            self.stream.state.as_str()
        };

        format!(
            "lan ip: {}\nencoder: {}\nstream: {}\nfile server: {}, {}\ncpu: {:.1}%\nmemory: {}MB / {}MB",
            self.lan_ip,
            tool(&self.encoder),
            stream,
            tool(&self.file_server),
            file_server_state,
            self.system.cpu_percent,
            self.system.memory_used_bytes / (1024 * 1024),
            self.system.memory_total_bytes / (1024 * 1024),
        )
    }
}

/// `<binary> version`; the value after the colon on its `Version` line
fn file_server_version(binary: &str) -> Option<String> {
    let output = Command::new(binary).arg("version").output().ok()?;
    if !output.status.success() {
        return None;
    }
    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    text.push_str(&String::from_utf8_lossy(&output.stderr));
    Some(parse_file_server_version(&text))
}

/// Prefers a line starting with `Version` over `Go Version`/`Web Version`
pub fn parse_file_server_version(output: &str) -> String {
    let mut lines = output.lines();
    lines
        .clone()
        .find(|line| line.trim_start().starts_with("Version"))
        .or_else(|| lines.find(|line| line.contains("Version")))
        .and_then(|line| line.rsplit(':').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

fn interface_addresses() -> Vec<(String, IpAddr)> {
    let networks = Networks::new_with_refreshed_list();
    networks
        .iter()
        .flat_map(|(name, data)| {
            data.ip_networks()
                .iter()
                .map(move |network| (name.clone(), network.addr))
        })
        .collect()
}

/// Preferred interfaces first, then any non-loopback IPv4 outside the
/// excluded families; loopback when nothing qualifies
pub fn pick_lan_ip(addresses: &[(String, IpAddr)]) -> IpAddr {
    let ipv4 = |addr: &IpAddr| matches!(addr, IpAddr::V4(_));

    let preferred = PREFERRED_INTERFACES.iter().find_map(|wanted| {
        addresses
            .iter()
            .find(|(name, addr)| name.as_str() == *wanted && ipv4(addr))
            .map(|(_, addr)| *addr)
    });

    preferred
        .or_else(|| {
            addresses
                .iter()
                .filter(|(name, _)| {
                    let name = name.to_lowercase();
                    !EXCLUDED_PREFIXES.iter().any(|p| name.starts_with(p))
                })
                .find(|(_, addr)| ipv4(addr) && !addr.is_loopback())
                .map(|(_, addr)| *addr)
        })
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}

fn system_usage() -> SystemUsage {
    let mut sys = System::new();
    sys.refresh_cpu_usage();
    std::thread::sleep(MINIMUM_CPU_UPDATE_INTERVAL);
    sys.refresh_cpu_usage();
    sys.refresh_memory();

    SystemUsage {
        cpu_percent: sys.global_cpu_usage(),
        memory_used_bytes: sys.used_memory(),
        memory_total_bytes: sys.total_memory(),
    }
}
