//! Slideshow playlist generation
//!
//! Produces an ordered (image, duration) sequence long enough to outlast the
//! audio track, and writes it in the encoder's concat-demuxer format.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Upper bound on generated entries, guard included
pub const MAX_ENTRIES: u64 = 1_000_000;

/// Error type for playlist generation
#[derive(Debug, Error)]
pub enum PlaylistError {
    #[error("slideshow needs at least one image")]
    NoImages,

    #[error("per-image duration must be positive")]
    ZeroDuration,

    #[error("slideshow would need more than {max} entries; lower the target duration")]
    TooLong { max: u64 },

    #[error("failed to write playlist {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// One image and how long it stays on screen
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaylistEntry {
    pub image: PathBuf,
    pub duration_secs: u32,
}

/// Generated slideshow sequence
///
/// The last entry repeats the final image as a guard: the concat demuxer
/// ignores the duration of the last listed file, so the real final entry
/// would otherwise be cut short at the loop boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Playlist {
    entries: Vec<PlaylistEntry>,
}

impl Playlist {
    /// Loop `images` until the total reaches `target_secs`
    pub fn generate(
        images: &[PathBuf],
        per_image_secs: u32,
        target_secs: u64,
    ) -> Result<Self, PlaylistError> {
        let Some(last) = images.last() else {
            return Err(PlaylistError::NoImages);
        };
        if per_image_secs == 0 {
            return Err(PlaylistError::ZeroDuration);
        }

        let cycle_secs = images.len() as u64 * per_image_secs as u64;
        let loops = target_secs / cycle_secs + 1;

        let total = loops
            .checked_mul(images.len() as u64)
            .and_then(|n| n.checked_add(1))
            .filter(|&n| n <= MAX_ENTRIES)
            .ok_or(PlaylistError::TooLong { max: MAX_ENTRIES })?;

        let mut entries = Vec::with_capacity(total as usize);
        for _ in 0..loops {
            entries.extend(images.iter().map(|image| PlaylistEntry {
                image: image.clone(),
                duration_secs: per_image_secs,
            }));
        }
        entries.push(PlaylistEntry {
            image: last.clone(),
            duration_secs: per_image_secs,
        });

        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[PlaylistEntry] {
        &self.entries
    }

    /// Seconds covered by the looped entries, excluding the trailing guard
    pub fn total_secs(&self) -> u64 {
        let covered = self.entries.len().saturating_sub(1);
        self.entries[..covered]
            .iter()
            .map(|e| e.duration_secs as u64)
            .sum()
    }

    /// Concat-demuxer text: `file`/`duration` pairs, guard entry without duration
    pub fn render(&self) -> String {
        let mut out = String::new();
        let guard = self.entries.len().saturating_sub(1);
        for (i, entry) in self.entries.iter().enumerate() {
            out.push_str(&format!("file '{}'\n", escape_path(&entry.image)));
            if i < guard {
                out.push_str(&format!("duration {}\n", entry.duration_secs));
            }
        }
        out
    }

    /// Write the playlist, replacing `path` only once the whole file is on disk
    pub fn write_to(&self, path: &Path) -> Result<(), PlaylistError> {
        let tmp = path.with_extension("tmp");
        let result = fs::write(&tmp, self.render()).and_then(|()| fs::rename(&tmp, path));
        result.map_err(|source| {
            let _ = fs::remove_file(&tmp);
            PlaylistError::Write {
                path: path.to_path_buf(),
                source,
            }
        })
    }
}

/// Quote a path for a single-quoted concat `file` line
fn escape_path(path: &Path) -> String {
    path.to_string_lossy().replace('\'', "'\\''")
}
