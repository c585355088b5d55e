//! FFmpeg command synthesis for RelayBox
//!
//! Builds the full encoder argv for one of three modes: plain media, a
//! single looped image over an audio track, or an image slideshow over an
//! audio track. In every mode the video input is nominally infinite and the
//! audio input decides when the session ends.

use crate::playlist::{Playlist, PlaylistError};
use crate::source::SourceDescriptor;
use relaybox_config::Config;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::Command;
use thiserror::Error;

/// Audio is always re-encoded; live endpoints reject many source formats
const AUDIO_ARGS: &[&str] = &[
    "-c:a", "aac", "-ar", "44100", "-ac", "2", "-b:a", "128k", "-af", "aresample=async=1",
];

/// Longest slideshow a single session may generate (one week)
pub const MAX_SLIDESHOW_TARGET_SECS: u64 = 7 * 24 * 3600;

/// Concat entries may be URLs; the demuxer only opens whitelisted protocols
const CONCAT_PROTOCOLS: &str = "file,http,https,tcp,tls";

/// Indefinite live FLV feed: no duration/filesize header rewrite
const OUTPUT_ARGS: &[&str] = &[
    "-f", "flv", "-flvflags", "no_duration_filesize", "-max_interleave_delta", "0",
];

/// Network inputs: reconnect on drop and probe generously
const NETWORK_INPUT_ARGS: &[&str] = &[
    "-reconnect", "1",
    "-reconnect_at_eof", "1",
    "-reconnect_streamed", "1",
    "-reconnect_delay_max", "5",
    "-rw_timeout", "20000000",
    "-probesize", "50M",
    "-analyzeduration", "50M",
];

/// Error type for command synthesis
#[derive(Debug, Error)]
pub enum EncodeError {
    /// Bitrate preset is neither a named ladder nor a literal rate
    #[error("unknown bitrate preset '{0}'")]
    UnknownBitratePreset(String),

    /// Resolution or framerate cannot be encoded
    #[error("invalid encoder settings: {0}")]
    InvalidSettings(String),

    /// Slideshow playlist could not be produced
    #[error("slideshow playlist failed: {0}")]
    Playlist(#[from] PlaylistError),
}

/// Video bitrate, peak rate and VBV buffer as encoder strings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitrateLadder {
    pub bitrate: String,
    pub maxrate: String,
    pub bufsize: String,
}

impl BitrateLadder {
    /// Named presets, or a literal rate like `2500k` (maxrate = rate, bufsize = 2x)
    pub fn from_preset(preset: &str) -> Option<Self> {
        let ladder = |b: &str, m: &str, s: &str| Self {
            bitrate: b.to_string(),
            maxrate: m.to_string(),
            bufsize: s.to_string(),
        };

        match preset.trim().to_ascii_lowercase().as_str() {
            "low" => Some(ladder("200k", "300k", "600k")),
            "medium" => Some(ladder("1000k", "1500k", "2000k")),
            "high" => Some(ladder("4000k", "4000k", "8000k")),
            literal => {
                let kbps: u32 = literal.strip_suffix('k')?.parse().ok()?;
                if kbps == 0 {
                    return None;
                }
                let rate = format!("{}k", kbps);
                Some(ladder(&rate, &rate, &format!("{}k", kbps.saturating_mul(2))))
            }
        }
    }
}

/// Everything from the config that shapes the encoder invocation
#[derive(Debug, Clone)]
pub struct EncodeSettings {
    pub binary: String,
    pub width: u32,
    pub height: u32,
    pub framerate: u32,
    pub bitrate: BitrateLadder,
    pub preset: String,
    pub threads: u32,
    pub user_agent: String,
    pub slideshow_image_secs: u32,
    pub slideshow_target_secs: u64,
    pub playlist_file: PathBuf,
}

impl EncodeSettings {
    /// Validate and extract encoder settings from a config snapshot
    pub fn from_config(config: &Config) -> Result<Self, EncodeError> {
        let enc = &config.encoder;
        let bitrate = BitrateLadder::from_preset(&enc.bitrate_preset)
            .ok_or_else(|| EncodeError::UnknownBitratePreset(enc.bitrate_preset.clone()))?;

        if enc.width == 0 || enc.height == 0 {
            return Err(EncodeError::InvalidSettings(format!(
                "resolution {}x{}",
                enc.width, enc.height
            )));
        }
        if enc.framerate == 0 {
            return Err(EncodeError::InvalidSettings("framerate 0".to_string()));
        }
        if config.slideshow.target_secs > MAX_SLIDESHOW_TARGET_SECS {
            return Err(EncodeError::InvalidSettings(format!(
                "slideshow target {}s exceeds {}s",
                config.slideshow.target_secs, MAX_SLIDESHOW_TARGET_SECS
            )));
        }

        Ok(Self {
            binary: enc.binary.clone(),
            width: enc.width,
            height: enc.height,
            framerate: enc.framerate,
            bitrate,
            preset: enc.preset.clone(),
            threads: enc.threads,
            user_agent: enc.user_agent.clone(),
            slideshow_image_secs: config.slideshow.image_secs,
            slideshow_target_secs: config.slideshow.target_secs,
            playlist_file: config.slideshow.playlist_file.clone(),
        })
    }

    /// Aspect-preserving scale plus letterbox padding to the target size
    fn scale_filter(&self) -> String {
        let (w, h) = (self.width, self.height);
        format!(
            "scale={w}:{h}:force_original_aspect_ratio=decrease,pad={w}:{h}:(ow-iw)/2:(oh-ih)/2"
        )
    }

    fn gop(&self) -> String {
        (self.framerate * 2).to_string()
    }
}

/// Where the video track comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VideoInput {
    /// The source media carries its own video
    Source,
    /// One static image, looped
    Image(String),
    /// Several images shown in turn
    Slideshow(Vec<PathBuf>),
}

impl VideoInput {
    pub fn kind(&self) -> ModeKind {
        match self {
            VideoInput::Source => ModeKind::PlainMedia,
            VideoInput::Image(_) => ModeKind::SingleImage,
            VideoInput::Slideshow(_) => ModeKind::Slideshow,
        }
    }
}

/// Session mode as requested and reported
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModeKind {
    #[serde(alias = "plain")]
    PlainMedia,
    SingleImage,
    Slideshow,
}

impl std::fmt::Display for ModeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModeKind::PlainMedia => write!(f, "plain_media"),
            ModeKind::SingleImage => write!(f, "single_image"),
            ModeKind::Slideshow => write!(f, "slideshow"),
        }
    }
}

/// Input options for the source, placed right before its `-i`
fn push_source_input(cmd: &mut Command, settings: &EncodeSettings, source: &SourceDescriptor) {
    if !source.is_local() {
        match source.auth_token.as_deref() {
            Some(token) if source.needs_auth_header => {
                cmd.arg("-headers").arg(format!(
                    "Authorization: {}\r\nUser-Agent: {}\r\n",
                    token, settings.user_agent
                ));
            }
            _ => {
                cmd.arg("-user_agent").arg(&settings.user_agent);
            }
        }
        cmd.args(NETWORK_INPUT_ARGS);
    }

    // Read at native pace; the output is a live feed
    cmd.arg("-re").arg("-i").arg(&source.input);
}

fn push_video_rate(cmd: &mut Command, settings: &EncodeSettings) {
    cmd.arg("-g").arg(settings.gop());
    cmd.arg("-b:v").arg(&settings.bitrate.bitrate);
    cmd.arg("-maxrate").arg(&settings.bitrate.maxrate);
    cmd.arg("-bufsize").arg(&settings.bitrate.bufsize);
}

/// Image video from input 0, audio from input 1, stop with the audio
fn push_still_image_tail(cmd: &mut Command, settings: &EncodeSettings, filter: String) {
    cmd.arg("-map").arg("0:v:0").arg("-map").arg("1:a:0");
    cmd.arg("-c:v").arg("libx264");
    cmd.arg("-preset").arg(&settings.preset);
    cmd.arg("-tune").arg("stillimage");
    cmd.arg("-vf").arg(filter);
    cmd.arg("-r").arg(settings.framerate.to_string());
    push_video_rate(cmd, settings);
    cmd.args(AUDIO_ARGS);
    cmd.arg("-shortest");
    cmd.arg("-max_muxing_queue_size").arg("9999");
}

/// Build the encoder command for `video` over `source`, streaming to `output`
///
/// For slideshows the playlist file is generated and written first; any
/// failure there aborts the whole build so the encoder never sees a partial
/// playlist.
pub fn build_encoder_command(
    settings: &EncodeSettings,
    source: &SourceDescriptor,
    video: &VideoInput,
    output: &str,
) -> Result<Command, EncodeError> {
    let mut cmd = Command::new(&settings.binary);
    cmd.arg("-y").arg("-hide_banner");
    cmd.arg("-threads").arg(settings.threads.to_string());

    match video {
        VideoInput::Source => {
            push_source_input(&mut cmd, settings, source);
            cmd.arg("-c:v").arg("libx264");
            cmd.arg("-preset").arg(&settings.preset);
            cmd.arg("-tune").arg("zerolatency");
            cmd.arg("-vf")
                .arg(format!("{},format=yuv420p", settings.scale_filter()));
            cmd.arg("-r").arg(settings.framerate.to_string());
            push_video_rate(&mut cmd, settings);
            cmd.args(AUDIO_ARGS);
        }
        VideoInput::Image(image) => {
            cmd.arg("-loop").arg("1");
            cmd.arg("-framerate").arg(settings.framerate.to_string());
            cmd.arg("-i").arg(image);
            push_source_input(&mut cmd, settings, source);
            let filter = format!("{},format=yuv420p", settings.scale_filter());
            push_still_image_tail(&mut cmd, settings, filter);
        }
        VideoInput::Slideshow(images) => {
            let playlist = Playlist::generate(
                images,
                settings.slideshow_image_secs,
                settings.slideshow_target_secs,
            )?;
            playlist.write_to(&settings.playlist_file)?;

            cmd.arg("-f").arg("concat").arg("-safe").arg("0");
            cmd.arg("-protocol_whitelist").arg(CONCAT_PROTOCOLS);
            cmd.arg("-i").arg(&settings.playlist_file);
            push_source_input(&mut cmd, settings, source);
            let filter = format!(
                "{},fps={},format=yuv420p",
                settings.scale_filter(),
                settings.framerate
            );
            push_still_image_tail(&mut cmd, settings, filter);
        }
    }

    cmd.args(OUTPUT_ARGS);
    cmd.arg(output);
    Ok(cmd)
}
