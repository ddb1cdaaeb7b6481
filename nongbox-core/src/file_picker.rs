use async_trait::async_trait;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Audio containers the player can decode. Everything else is rejected at
/// the door instead of failing later at playback time.
pub const AUDIO_EXTENSIONS: [&str; 4] = ["mp3", "ogg", "wav", "flac"];

#[derive(Error, Debug, PartialEq)]
pub enum PickError {
    #[error("File does not exist: {0}")]
    Missing(PathBuf),
    #[error("File has no extension: {0}")]
    NoExtension(PathBuf),
    #[error("Unsupported audio format: {0}")]
    UnsupportedExtension(String),
}

/// Trait for asking the user for a local audio file
///
/// Implemented by the embedding UI with a native file dialog; tests use a
/// canned implementation. Returning `None` means the user cancelled, which is
/// not an error.
#[async_trait]
pub trait FilePicker: Send + Sync {
    async fn pick_audio_file(&self) -> Option<PathBuf>;
}

/// Check that a picked path exists and carries a supported audio extension.
///
/// Extension matching is case-insensitive. This is the only content check
/// applied to local files.
pub fn validate_audio_path(path: &Path) -> Result<(), PickError> {
    if !path.exists() {
        return Err(PickError::Missing(path.to_path_buf()));
    }
    let Some(extension) = path.extension().and_then(|e| e.to_str()) else {
        return Err(PickError::NoExtension(path.to_path_buf()));
    };
    let extension = extension.to_ascii_lowercase();
    if !AUDIO_EXTENSIONS.contains(&extension.as_str()) {
        return Err(PickError::UnsupportedExtension(extension));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(dir: &TempDir, name: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, b"audio").unwrap();
        path
    }

    #[test]
    fn test_accepts_supported_extensions() {
        let tmp = TempDir::new().unwrap();
        for name in ["a.mp3", "b.ogg", "c.wav", "d.flac", "e.MP3"] {
            let path = touch(&tmp, name);
            assert!(validate_audio_path(&path).is_ok(), "{name} should pass");
        }
    }

    #[test]
    fn test_rejects_missing_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("ghost.mp3");
        assert_eq!(
            validate_audio_path(&path),
            Err(PickError::Missing(path.clone()))
        );
    }

    #[test]
    fn test_rejects_missing_and_unknown_extensions() {
        let tmp = TempDir::new().unwrap();
        let bare = touch(&tmp, "noext");
        assert_eq!(
            validate_audio_path(&bare),
            Err(PickError::NoExtension(bare.clone()))
        );

        let exe = touch(&tmp, "song.exe");
        assert_eq!(
            validate_audio_path(&exe),
            Err(PickError::UnsupportedExtension("exe".to_string()))
        );
    }
}
