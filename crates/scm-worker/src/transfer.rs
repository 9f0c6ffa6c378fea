//! Fetching media files from the VPS.

use std::ffi::OsString;
use std::path::Path;
use std::process::Stdio;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;
use url::Url;

use crate::config::TransferBackend;
use crate::error::{WorkerError, WorkerResult};

impl TransferBackend {
    /// Fetch `remote` into `dest`, returning the bytes written.
    pub async fn fetch(&self, remote: &str, dest: &Path) -> WorkerResult<u64> {
        match self {
            TransferBackend::Local => scm_media::copy_atomic(remote, dest)
                .await
                .map_err(|e| WorkerError::transfer_failed(format!("{}: {}", remote, e))),
            TransferBackend::Ftp {
                host,
                port,
                user,
                password,
            } => {
                let url = ftp_url(host, *port, remote)?;
                curl_fetch(&url, user, password, dest).await
            }
        }
    }
}

/// `ftp://host:port/<remote>` with `remote` taken relative to the FTP root.
pub fn ftp_url(host: &str, port: u16, remote: &str) -> WorkerResult<Url> {
    if host.is_empty() {
        return Err(WorkerError::config_error("FTP_HOST is not set"));
    }
    let mut url = Url::parse(&format!("ftp://{}:{}/", host, port))
        .map_err(|e| WorkerError::config_error(format!("invalid FTP host '{}': {}", host, e)))?;
    url.set_path(remote.trim_start_matches('/'));
    Ok(url)
}

/// curl options that stay on the command line. Credentials are not among
/// them; they go through [`curl_config`] on stdin.
fn curl_args(url: &Url, partial: &Path) -> Vec<OsString> {
    vec![
        "--fail".into(),
        "--silent".into(),
        "--show-error".into(),
        "--config".into(),
        "-".into(),
        "-o".into(),
        partial.as_os_str().to_owned(),
        url.as_str().into(),
    ]
}

/// curl config file setting the FTP login.
fn curl_config(user: &str, password: &str) -> String {
    let quote = |s: &str| s.replace('\\', "\\\\").replace('"', "\\\"");
    format!("user = \"{}:{}\"\n", quote(user), quote(password))
}

async fn curl_fetch(url: &Url, user: &str, password: &str, dest: &Path) -> WorkerResult<u64> {
    which::which("curl").map_err(|_| WorkerError::config_error("curl not found in PATH"))?;

    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let partial = scm_media::partial_path(dest);

    debug!("Fetching {} -> {}", url, dest.display());
    let mut child = Command::new("curl")
        .args(curl_args(url, &partial))
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(curl_config(user, password).as_bytes()).await?;
    }
    let output = child.wait_with_output().await?;

    if !output.status.success() {
        let _ = tokio::fs::remove_file(&partial).await;
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(WorkerError::transfer_failed(format!(
            "curl exited with {}: {}",
            output.status,
            stderr.trim()
        )));
    }

    tokio::fs::rename(&partial, dest).await?;
    Ok(tokio::fs::metadata(dest).await?.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn ftp_url_is_relative_to_root_and_encoded() {
        let url = ftp_url("vps.example.com", 2121, "/uploads/my clip.wav").unwrap();
        assert_eq!(url.as_str(), "ftp://vps.example.com:2121/uploads/my%20clip.wav");
    }

    #[test]
    fn ftp_url_requires_host() {
        assert!(matches!(
            ftp_url("", 21, "/a.wav"),
            Err(WorkerError::ConfigError(_))
        ));
    }

    #[test]
    fn credentials_stay_off_the_command_line() {
        let url = ftp_url("vps.example.com", 21, "/uploads/m1.wav").unwrap();
        let partial = Path::new("/media/m1/m1.wav.part");
        let args = curl_args(&url, partial);

        assert!(!args.iter().any(|a| a == "--user" || a == "-u"));
        assert!(args.windows(2).any(|w| w[0] == "--config" && w[1] == "-"));
        assert!(args.iter().any(|a| a == partial.as_os_str()));
    }

    #[test]
    fn curl_config_quotes_the_login() {
        assert_eq!(curl_config("media", "s3cret"), "user = \"media:s3cret\"\n");
        assert_eq!(
            curl_config("media", r#"pa"ss\word"#),
            "user = \"media:pa\\\"ss\\\\word\"\n"
        );
    }

    #[tokio::test]
    async fn local_backend_copies_file() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("m1.wav");
        std::fs::write(&src, vec![0u8; 64]).unwrap();
        let dest = dir.path().join("media/m1/m1.wav");

        let bytes = TransferBackend::Local
            .fetch(src.to_str().unwrap(), &dest)
            .await
            .unwrap();
        assert_eq!(bytes, 64);
        assert!(dest.exists());
    }

    #[tokio::test]
    async fn local_backend_missing_source_is_transfer_error() {
        let dir = tempdir().unwrap();
        let err = TransferBackend::Local
            .fetch("/nonexistent/m1.wav", &dir.path().join("m1.wav"))
            .await
            .unwrap_err();
        assert!(matches!(err, WorkerError::TransferFailed(_)));
    }
}
