//! Filesystem helpers for staging media files.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use tokio::fs;

use crate::error::{MediaError, MediaResult};

/// Sibling of `dest` that a download or copy writes before renaming into
/// place: the full file name plus `.part`, so `a.wav` and `a.mp3` never share one.
pub fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().map(OsString::from).unwrap_or_default();
    name.push(".part");
    dest.with_file_name(name)
}

/// Copy `src` to `dst` through a temporary sibling, so readers never see a
/// partial file at `dst`. Returns the number of bytes copied.
pub async fn copy_atomic(src: impl AsRef<Path>, dst: impl AsRef<Path>) -> MediaResult<u64> {
    let src = src.as_ref();
    let dst = dst.as_ref();

    if !fs::try_exists(src).await? {
        return Err(MediaError::FileNotFound(src.to_path_buf()));
    }
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent).await?;
    }

    let tmp_dst = partial_path(dst);
    let bytes = match fs::copy(src, &tmp_dst).await {
        Ok(bytes) => bytes,
        Err(e) => {
            let _ = fs::remove_file(&tmp_dst).await;
            return Err(e.into());
        }
    };

    if let Err(e) = fs::rename(&tmp_dst, dst).await {
        let _ = fs::remove_file(&tmp_dst).await;
        tracing::error!(
            "Failed to move {} into place at {}: {}",
            tmp_dst.display(),
            dst.display(),
            e
        );
        return Err(e.into());
    }

    tracing::debug!("Copied {} bytes: {} -> {}", bytes, src.display(), dst.display());
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn copies_into_new_directory() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("m1.wav");
        std::fs::write(&src, b"RIFF....WAVE").unwrap();
        let dst = dir.path().join("media").join("m1").join("m1.wav");

        let bytes = copy_atomic(&src, &dst).await.unwrap();
        assert_eq!(bytes, 12);
        assert_eq!(std::fs::read(&dst).unwrap(), b"RIFF....WAVE");
        assert!(!partial_path(&dst).exists());
        assert!(src.exists());
    }

    #[test]
    fn partial_path_keeps_the_whole_file_name() {
        let dir = Path::new("/media/m1");
        assert_eq!(partial_path(&dir.join("a.wav")), dir.join("a.wav.part"));
        assert_eq!(partial_path(&dir.join("a.mp3")), dir.join("a.mp3.part"));
        assert_eq!(partial_path(&dir.join("clip")), dir.join("clip.part"));
    }

    #[tokio::test]
    async fn sibling_copies_differing_by_extension_do_not_collide() {
        let dir = tempdir().unwrap();
        let wav = dir.path().join("in.wav");
        let mp3 = dir.path().join("in.mp3");
        std::fs::write(&wav, b"wav").unwrap();
        std::fs::write(&mp3, b"mp3").unwrap();
        let out = dir.path().join("out");

        let (a, b) = tokio::join!(
            copy_atomic(&wav, out.join("m1.wav")),
            copy_atomic(&mp3, out.join("m1.mp3"))
        );
        a.unwrap();
        b.unwrap();
        assert_eq!(std::fs::read(out.join("m1.wav")).unwrap(), b"wav");
        assert_eq!(std::fs::read(out.join("m1.mp3")).unwrap(), b"mp3");
    }

    #[tokio::test]
    async fn missing_source_is_not_found() {
        let dir = tempdir().unwrap();
        let err = copy_atomic(dir.path().join("nope.wav"), dir.path().join("out.wav"))
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::FileNotFound(_)));
    }
}
