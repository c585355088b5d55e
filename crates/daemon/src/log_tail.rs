//! Bounded reads of the encoder log

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

pub const LOG_NOT_CREATED: &str = "log file not created yet";
pub const LOG_EMPTY: &str = "log is empty (encoder may have just started)";

/// Last `max_bytes` bytes of `path` as text
///
/// Starts on a UTF-8 boundary when the window cuts a character; invalid
/// sequences inside the window are replaced.
pub fn read_tail(path: &Path, max_bytes: u64) -> io::Result<String> {
    let mut file = File::open(path)?;
    let len = file.metadata()?.len();
    let start = len.saturating_sub(max_bytes);
    file.seek(SeekFrom::Start(start))?;

    let mut buf = Vec::with_capacity((len - start) as usize);
    file.read_to_end(&mut buf)?;

    // Skip continuation bytes of a character split by the window
    let skip = if start > 0 {
        buf.iter().take(3).take_while(|b| (**b & 0xC0) == 0x80).count()
    } else {
        0
    };

    Ok(String::from_utf8_lossy(&buf[skip..]).into_owned())
}

/// Operator-facing log tail; never fails
pub fn describe_tail(path: &Path, max_bytes: u64) -> String {
    match read_tail(path, max_bytes) {
        Ok(text) if text.trim().is_empty() => LOG_EMPTY.to_string(),
        Ok(text) => text,
        Err(e) if e.kind() == io::ErrorKind::NotFound => LOG_NOT_CREATED.to_string(),
        Err(e) => format!("failed to read log: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_tail_returns_last_bytes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ffmpeg.log");
        fs::write(&path, "line one\nline two\nline three\n").unwrap();

        assert_eq!(read_tail(&path, 11).unwrap(), "line three\n");
        assert_eq!(
            read_tail(&path, 1000).unwrap(),
            "line one\nline two\nline three\n"
        );
    }

    #[test]
    fn test_tail_skips_split_character() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ffmpeg.log");
        // "推流" is 6 bytes; a 5-byte window starts mid-character
        fs::write(&path, "推流").unwrap();

        assert_eq!(read_tail(&path, 5).unwrap(), "流");
        assert_eq!(read_tail(&path, 3).unwrap(), "流");
    }

    #[test]
    fn test_describe_missing_and_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ffmpeg.log");
        assert_eq!(describe_tail(&path, 100), LOG_NOT_CREATED);

        fs::write(&path, "  \n").unwrap();
        assert_eq!(describe_tail(&path, 100), LOG_EMPTY);

        fs::write(&path, "Error opening output\n").unwrap();
        assert_eq!(describe_tail(&path, 100), "Error opening output\n");
    }
}
