//! Core configuration structures and loading logic

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Error type for configuration operations
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading or writing the config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
    /// TOML serialization error while persisting a refreshed token
    Serialize(toml::ser::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Failed to access config file: {}", e),
            ConfigError::Parse(e) => write!(f, "Failed to parse config: {}", e),
            ConfigError::Serialize(e) => write!(f, "Failed to serialize config: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

impl From<toml::ser::Error> for ConfigError {
    fn from(e: toml::ser::Error) -> Self {
        ConfigError::Serialize(e)
    }
}

/// A named broadcast key; the secret is appended to `output_base`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StreamKey {
    pub name: String,
    pub secret: String,
}

/// Broadcast destination configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct StreamConfig {
    /// Endpoint base, e.g. `rtmp://x.rtmp.t.me/s/`
    #[serde(default)]
    pub output_base: String,
    /// Index into `keys` of the key currently in use
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_key_index: Option<usize>,
    /// Full endpoint used when no key is selected
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub keys: Vec<StreamKey>,
}

impl StreamConfig {
    /// The key selected by `active_key_index`, if the index is valid
    ///
    /// An unset index selects the first key.
    pub fn active_key(&self) -> Option<&StreamKey> {
        self.keys.get(self.active_key_index.unwrap_or(0))
    }
}

/// Encoder process configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EncoderConfig {
    /// Encoder executable (name on PATH or absolute path)
    #[serde(default = "default_encoder_binary")]
    pub binary: String,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default = "default_framerate")]
    pub framerate: u32,
    /// `low`, `medium`, `high` or a literal rate such as `2500k`
    #[serde(default = "default_bitrate_preset")]
    pub bitrate_preset: String,
    /// x264 speed preset
    #[serde(default = "default_encoder_preset")]
    pub preset: String,
    #[serde(default = "default_threads")]
    pub threads: u32,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Encoder stdout/stderr, truncated at every session start
    #[serde(default = "default_log_file")]
    pub log_file: PathBuf,
    /// Delay between launch and the fast-exit check
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
    /// How long a stop waits after SIGTERM before killing
    #[serde(default = "default_stop_grace_ms")]
    pub stop_grace_ms: u64,
}

fn default_encoder_binary() -> String {
    "ffmpeg".to_string()
}

fn default_width() -> u32 {
    426
}

fn default_height() -> u32 {
    240
}

fn default_framerate() -> u32 {
    4
}

fn default_bitrate_preset() -> String {
    "low".to_string()
}

fn default_encoder_preset() -> String {
    "ultrafast".to_string()
}

fn default_threads() -> u32 {
    4
}

fn default_user_agent() -> String {
    "RelayBox".to_string()
}

fn default_log_file() -> PathBuf {
    PathBuf::from("ffmpeg.log")
}

fn default_settle_ms() -> u64 {
    3000
}

fn default_stop_grace_ms() -> u64 {
    5000
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            binary: default_encoder_binary(),
            width: default_width(),
            height: default_height(),
            framerate: default_framerate(),
            bitrate_preset: default_bitrate_preset(),
            preset: default_encoder_preset(),
            threads: default_threads(),
            user_agent: default_user_agent(),
            log_file: default_log_file(),
            settle_ms: default_settle_ms(),
            stop_grace_ms: default_stop_grace_ms(),
        }
    }
}

/// Image slideshow configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SlideshowConfig {
    /// Seconds each image stays on screen
    #[serde(default = "default_image_secs")]
    pub image_secs: u32,
    /// Minimum total playlist length in seconds
    #[serde(default = "default_target_secs")]
    pub target_secs: u64,
    #[serde(default = "default_playlist_file")]
    pub playlist_file: PathBuf,
}

fn default_image_secs() -> u32 {
    10
}

fn default_target_secs() -> u64 {
    14_400
}

fn default_playlist_file() -> PathBuf {
    PathBuf::from("slideshow_list.txt")
}

impl Default for SlideshowConfig {
    fn default() -> Self {
        Self {
            image_secs: default_image_secs(),
            target_secs: default_target_secs(),
            playlist_file: default_playlist_file(),
        }
    }
}

/// Remote file service (media library) configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileServiceConfig {
    /// Service root; an empty string disables remote paths
    #[serde(default = "default_file_service_url")]
    pub base_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Last known good access token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_file_service_url() -> String {
    "http://127.0.0.1:5244".to_string()
}

fn default_timeout_secs() -> u64 {
    5
}

impl Default for FileServiceConfig {
    fn default() -> Self {
        Self {
            base_url: default_file_service_url(),
            username: None,
            password: None,
            token: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl FileServiceConfig {
    pub fn is_enabled(&self) -> bool {
        !self.base_url.trim().is_empty()
    }

    /// Both a username and a password are present and non-empty
    pub fn has_credentials(&self) -> bool {
        matches!(
            (&self.username, &self.password),
            (Some(u), Some(p)) if !u.is_empty() && !p.is_empty()
        )
    }

    /// The cached token, ignoring empty strings
    pub fn cached_token(&self) -> Option<&str> {
        self.token.as_deref().filter(|t| !t.is_empty())
    }
}

/// Control API configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

fn default_bind() -> String {
    "127.0.0.1:7878".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

/// Auxiliary background services toggled from the control API
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServicesConfig {
    #[serde(default = "default_file_server_binary")]
    pub file_server_binary: String,
    #[serde(default = "default_tunnel_binary")]
    pub tunnel_binary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tunnel_token: Option<String>,
    #[serde(default = "default_download_agent_binary")]
    pub download_agent_binary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_agent_conf: Option<PathBuf>,
    /// File server's own JSON config; searched in the usual places when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_server_config: Option<PathBuf>,
}

fn default_file_server_binary() -> String {
    "alist".to_string()
}

fn default_tunnel_binary() -> String {
    "cloudflared".to_string()
}

fn default_download_agent_binary() -> String {
    "aria2c".to_string()
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            file_server_binary: default_file_server_binary(),
            tunnel_binary: default_tunnel_binary(),
            tunnel_token: None,
            download_agent_binary: default_download_agent_binary(),
            download_agent_conf: None,
            file_server_config: None,
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub encoder: EncoderConfig,
    #[serde(default)]
    pub slideshow: SlideshowConfig,
    #[serde(default)]
    pub file_service: FileServiceConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub services: ServicesConfig,
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Parses the config.toml file and handles missing optional fields with defaults.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Overrides the following values if environment variables are set:
    /// - RELAYBOX_OUTPUT_BASE -> stream.output_base
    /// - RELAYBOX_ACTIVE_KEY -> stream.active_key_index
    /// - RELAYBOX_ENCODER_BINARY -> encoder.binary
    /// - RELAYBOX_BIND -> server.bind
    /// - FILE_SERVICE_URL -> file_service.base_url
    /// - FILE_SERVICE_USERNAME -> file_service.username
    /// - FILE_SERVICE_PASSWORD -> file_service.password
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("RELAYBOX_OUTPUT_BASE") {
            self.stream.output_base = val;
        }

        if let Ok(val) = env::var("RELAYBOX_ACTIVE_KEY") {
            if let Ok(index) = val.parse::<usize>() {
                self.stream.active_key_index = Some(index);
            }
        }

        if let Ok(val) = env::var("RELAYBOX_ENCODER_BINARY") {
            if !val.is_empty() {
                self.encoder.binary = val;
            }
        }

        if let Ok(val) = env::var("RELAYBOX_BIND") {
            if !val.is_empty() {
                self.server.bind = val;
            }
        }

        if let Ok(val) = env::var("FILE_SERVICE_URL") {
            self.file_service.base_url = val;
        }

        if let Ok(val) = env::var("FILE_SERVICE_USERNAME") {
            self.file_service.username = Some(val);
        }

        if let Ok(val) = env::var("FILE_SERVICE_PASSWORD") {
            self.file_service.password = Some(val);
        }
    }

    /// Load configuration from file and apply environment overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Effective broadcast endpoint
    ///
    /// An explicit override wins, then `output_base` + active key secret,
    /// then the legacy full `endpoint`. `None` means nothing is configured.
    pub fn output_endpoint(&self, override_endpoint: Option<&str>) -> Option<String> {
        if let Some(endpoint) = override_endpoint.map(str::trim).filter(|e| !e.is_empty()) {
            return Some(endpoint.to_string());
        }

        if let Some(key) = self.stream.active_key() {
            if !self.stream.output_base.is_empty() && !key.secret.is_empty() {
                return Some(format!("{}{}", self.stream.output_base, key.secret));
            }
        }

        self.stream
            .endpoint
            .as_deref()
            .filter(|e| !e.is_empty())
            .map(String::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Mutex;

    // Mutex to ensure env var tests don't interfere with each other
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// Helper to clear all config-related env vars
    fn clear_env_vars() {
        env::remove_var("RELAYBOX_OUTPUT_BASE");
        env::remove_var("RELAYBOX_ACTIVE_KEY");
        env::remove_var("RELAYBOX_ENCODER_BINARY");
        env::remove_var("RELAYBOX_BIND");
        env::remove_var("FILE_SERVICE_URL");
        env::remove_var("FILE_SERVICE_USERNAME");
        env::remove_var("FILE_SERVICE_PASSWORD");
    }

    fn config_with_keys(base: &str, secrets: &[&str], active: Option<usize>) -> Config {
        let mut config = Config::default();
        config.stream.output_base = base.to_string();
        config.stream.keys = secrets
            .iter()
            .enumerate()
            .map(|(i, s)| StreamKey {
                name: format!("key-{}", i),
                secret: s.to_string(),
            })
            .collect();
        config.stream.active_key_index = active;
        config
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_config_parses_all_sections(
            width in 16u32..4096,
            height in 16u32..2160,
            framerate in 1u32..60,
            image_secs in 1u32..120,
            target_secs in 1u64..100_000,
            active in proptest::option::of(0usize..4),
            secret in "[a-zA-Z0-9_-]{1,24}",
        ) {
            let toml_str = format!(
                r#"
[stream]
output_base = "rtmp://example.test/live/"
{}

[[stream.keys]]
name = "main"
secret = "{}"

[encoder]
width = {}
height = {}
framerate = {}

[slideshow]
image_secs = {}
target_secs = {}
"#,
                active.map(|i| format!("active_key_index = {}", i)).unwrap_or_default(),
                secret,
                width,
                height,
                framerate,
                image_secs,
                target_secs,
            );

            let config = Config::parse_toml(&toml_str).expect("Valid TOML should parse");

            prop_assert_eq!(config.stream.active_key_index, active);
            prop_assert_eq!(config.stream.keys.len(), 1);
            prop_assert_eq!(&config.stream.keys[0].secret, &secret);
            prop_assert_eq!(config.encoder.width, width);
            prop_assert_eq!(config.encoder.height, height);
            prop_assert_eq!(config.encoder.framerate, framerate);
            prop_assert_eq!(config.slideshow.image_secs, image_secs);
            prop_assert_eq!(config.slideshow.target_secs, target_secs);
        }

        #[test]
        fn prop_env_overrides_active_key(
            initial in proptest::option::of(0usize..8),
            override_index in 0usize..16,
        ) {
            let _guard = ENV_MUTEX.lock().unwrap();
            clear_env_vars();

            let toml_str = format!(
                "[stream]\n{}\n",
                initial.map(|i| format!("active_key_index = {}", i)).unwrap_or_default()
            );

            let mut config = Config::parse_toml(&toml_str).expect("Valid TOML");

            env::set_var("RELAYBOX_ACTIVE_KEY", override_index.to_string());
            config.apply_env_overrides();
            clear_env_vars();

            prop_assert_eq!(config.stream.active_key_index, Some(override_index));
        }

        #[test]
        fn prop_endpoint_is_base_plus_active_secret(
            secrets in proptest::collection::vec("[a-z0-9]{1,12}", 1..5),
            pick in 0usize..5,
        ) {
            let active = pick % secrets.len();
            let refs: Vec<&str> = secrets.iter().map(String::as_str).collect();
            let config = config_with_keys("rtmp://host/app/", &refs, Some(active));

            let endpoint = config.output_endpoint(None);
            prop_assert_eq!(endpoint, Some(format!("rtmp://host/app/{}", secrets[active])));
        }
    }

    #[test]
    fn test_env_overrides_file_service_credentials() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env_vars();

        let mut config = Config::default();
        env::set_var("FILE_SERVICE_URL", "http://media.lan:5244");
        env::set_var("FILE_SERVICE_USERNAME", "admin");
        env::set_var("FILE_SERVICE_PASSWORD", "hunter2");
        env::set_var("RELAYBOX_ACTIVE_KEY", "not-a-number");
        config.apply_env_overrides();
        clear_env_vars();

        assert_eq!(config.file_service.base_url, "http://media.lan:5244");
        assert!(config.file_service.has_credentials());
        // Invalid value, keep existing
        assert_eq!(config.stream.active_key_index, None);
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::parse_toml("").expect("Empty TOML should parse");

        assert_eq!(config.encoder.binary, "ffmpeg");
        assert_eq!((config.encoder.width, config.encoder.height), (426, 240));
        assert_eq!(config.encoder.framerate, 4);
        assert_eq!(config.encoder.settle_ms, 3000);
        assert_eq!(config.slideshow.image_secs, 10);
        assert_eq!(config.slideshow.target_secs, 14_400);
        assert_eq!(config.file_service.base_url, "http://127.0.0.1:5244");
        assert_eq!(config.server.bind, "127.0.0.1:7878");
        assert!(config.stream.keys.is_empty());
        assert_eq!(config.output_endpoint(None), None);
    }

    #[test]
    fn test_override_endpoint_wins() {
        let config = config_with_keys("rtmp://host/app/", &["abc"], Some(0));
        assert_eq!(
            config.output_endpoint(Some("rtmp://other/live/xyz")),
            Some("rtmp://other/live/xyz".to_string())
        );
        // Blank override falls through to the configured key
        assert_eq!(
            config.output_endpoint(Some("  ")),
            Some("rtmp://host/app/abc".to_string())
        );
    }

    #[test]
    fn test_invalid_active_index_falls_back_to_legacy_endpoint() {
        let mut config = config_with_keys("rtmp://host/app/", &["abc"], Some(3));
        assert_eq!(config.output_endpoint(None), None);

        config.stream.endpoint = Some("rtmp://legacy/full".to_string());
        assert_eq!(
            config.output_endpoint(None),
            Some("rtmp://legacy/full".to_string())
        );
    }

    #[test]
    fn test_missing_active_index_selects_first_key() {
        let config = Config::parse_toml(
            "[stream]\noutput_base = \"rtmp://h/app/\"\n\n[[stream.keys]]\nname = \"main\"\nsecret = \"abc\"\n",
        )
        .expect("valid TOML");

        assert_eq!(config.stream.active_key_index, None);
        assert_eq!(config.output_endpoint(None), Some("rtmp://h/app/abc".to_string()));

        let empty = config_with_keys("rtmp://h/app/", &[], None);
        assert_eq!(empty.stream.active_key(), None);
    }

    #[test]
    fn test_key_without_base_is_not_an_endpoint() {
        let config = config_with_keys("", &["abc"], Some(0));
        assert_eq!(config.output_endpoint(None), None);
    }

    #[test]
    fn test_cached_token_ignores_empty() {
        let mut fs = FileServiceConfig::default();
        assert_eq!(fs.cached_token(), None);
        fs.token = Some(String::new());
        assert_eq!(fs.cached_token(), None);
        fs.token = Some("tok".to_string());
        assert_eq!(fs.cached_token(), Some("tok"));
    }

    #[test]
    fn test_config_serializes_back_to_toml() {
        let mut config = config_with_keys("rtmp://host/app/", &["abc", "def"], Some(1));
        config.file_service.token = Some("tok-123".to_string());

        let text = toml::to_string_pretty(&config).expect("serializable");
        let parsed = Config::parse_toml(&text).expect("parses back");
        assert_eq!(parsed, config);
    }
}
