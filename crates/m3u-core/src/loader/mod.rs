mod http;

pub use http::{HttpLoader, RetryPolicy};

use std::path::Path;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("HTTP error {status} fetching {url}: {message}")]
    Http {
        url: String,
        status: u16,
        message: String,
        is_last_retry: bool,
    },
    #[error("Network error fetching {url}: {reason}")]
    Network {
        url: String,
        reason: String,
        is_last_retry: bool,
    },
    #[error("Timeout fetching {url}")]
    Timeout { url: String, is_last_retry: bool },
    #[error("Cannot read {path}: {reason}")]
    Io { path: String, reason: String },
    #[error("{location} is not a playlist: {message}")]
    Parse { location: String, message: String },
}

impl LoadError {
    pub fn is_last_retry(&self) -> bool {
        match self {
            Self::Http { is_last_retry, .. } => *is_last_retry,
            Self::Network { is_last_retry, .. } => *is_last_retry,
            Self::Timeout { is_last_retry, .. } => *is_last_retry,
            Self::Io { .. } | Self::Parse { .. } => true,
        }
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Fetches raw playlist text from a remote location.
///
/// Object-safe and `Send + Sync` so one loader can be shared by every source
/// refresh running in the worker pool.
#[async_trait]
pub trait PlaylistLoader: Send + Sync {
    async fn load(&self, uri: &str) -> Result<String, LoadError>;
}

/// Read a playlist from disk. Invalid UTF-8 is replaced rather than rejected.
pub async fn read_local(path: &Path) -> Result<String, LoadError> {
    let bytes = tokio::fs::read(path).await.map_err(|e| LoadError::Io {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    debug!(path = %path.display(), bytes = bytes.len(), "Read local playlist");
    let text = String::from_utf8_lossy(&bytes).into_owned();
    check_playlist_text(&path.display().to_string(), text)
}

/// Reject bodies that are obviously not playlists, such as an HTML error
/// page or a JSON auth failure served with a 200.
pub(crate) fn check_playlist_text(location: &str, text: String) -> Result<String, LoadError> {
    let text = match text.strip_prefix('\u{feff}') {
        Some(rest) => rest.to_string(),
        None => text,
    };
    let first = text.lines().map(str::trim).find(|l| !l.is_empty());
    if let Some(line) = first {
        let kind = match line.chars().next() {
            Some('<') => Some("markup"),
            Some('{') | Some('[') => Some("JSON"),
            _ => None,
        };
        if let Some(kind) = kind {
            return Err(LoadError::Parse {
                location: location.to_string(),
                message: format!("{kind} document instead of M3U"),
            });
        }
    }
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn read_local_strips_bom() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("list.m3u");
        std::fs::write(&path, "\u{feff}#EXTM3U\n#EXTINF:-1,A\nhttp://a\n").unwrap();
        let text = read_local(&path).await.unwrap();
        assert!(text.starts_with("#EXTM3U"));
    }

    #[tokio::test]
    async fn read_local_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_local(&dir.path().join("nope.m3u")).await.unwrap_err();
        assert!(matches!(err, LoadError::Io { .. }));
        assert!(err.is_last_retry());
    }

    #[test]
    fn html_body_is_rejected() {
        let err = check_playlist_text("http://x", "\n<!DOCTYPE html><html>".into()).unwrap_err();
        assert!(matches!(err, LoadError::Parse { .. }));
        assert!(check_playlist_text("http://x", String::new()).is_ok());

        let err = check_playlist_text("http://x", r#"{"user_info":{"auth":0}}"#.into()).unwrap_err();
        assert!(err.to_string().contains("JSON document"));
    }
}
