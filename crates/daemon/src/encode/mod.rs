//! Encoder command synthesis for RelayBox

pub mod ffmpeg;

pub use ffmpeg::{
    build_encoder_command, BitrateLadder, EncodeError, EncodeSettings, ModeKind, VideoInput,
};
