//! Bounded-concurrency attachment and avatar downloader.
//!
//! Downloads run in a fixed window of five in-flight streams: futures are
//! collected until the window fills, then the whole batch is awaited
//! before the next one is admitted. Failures never reach the caller; every
//! skipped or failed file is logged and its siblings continue.

use std::path::{Path, PathBuf};
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use futures_util::future::join_all;
use futures_util::StreamExt;
use rand::RngCore;
use reqwest::{header, Client, StatusCode};
use tokio::io::AsyncWriteExt;
use tokio::time::sleep;

use crate::config::Config;
use crate::mime;
use crate::session::{ExportSession, AVATARS_DIR};
use crate::types::{Attachment, DialogKind, ExportError, Message, User};

// In-flight download window.
const WINDOW: usize = 5;

const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(120);
const MAX_RETRIES: u32 = 3;
const RETRY_DELAY: Duration = Duration::from_millis(500);

const RANDOM_NAME_LEN: usize = 12;

pub struct Downloader {
    http: Client,
    token: String,
    file_size_limit: u64,
    root: PathBuf,
}

impl Downloader {
    pub fn new(config: &Config, session: &ExportSession) -> Result<Self, ExportError> {
        let mut headers = header::HeaderMap::new();
        headers.insert(header::CACHE_CONTROL, header::HeaderValue::from_static("no-cache"));
        headers.insert(header::PRAGMA, header::HeaderValue::from_static("no-cache"));

        let http = Client::builder()
            .timeout(DOWNLOAD_TIMEOUT)
            .default_headers(headers)
            .build()?;

        Ok(Self {
            http,
            token: config.token.clone(),
            file_size_limit: config.file_size_limit,
            root: session.root().to_path_buf(),
        })
    }

    /// Download every eligible attachment referenced by `messages` into
    /// the dialog's `files/` directory.
    pub async fn download_attachments(
        &self,
        messages: &[Message],
        kind: DialogKind,
        dialog_id: &str,
    ) {
        let rel_dir = Path::new(kind.collection()).join(dialog_id).join("files");
        let mut window = Vec::new();

        for message in messages {
            for file in message.attachments() {
                if let Some(reason) = skip_reason(&file, self.file_size_limit) {
                    tracing::warn!("File [{}] {}. Just skipped.", file.id, reason);
                    continue;
                }

                let Some(url) = file.url_private_download.clone() else {
                    tracing::warn!("File [{}] has no download url. Just skipped.", file.id);
                    continue;
                };

                let extension = declared_extension(&file);
                window.push(self.fetch(url, rel_dir.clone(), file.id.clone(), extension, true));

                if window.len() >= WINDOW {
                    join_all(window.drain(..)).await;
                }
            }
        }

        join_all(window).await;
    }

    /// Download every avatar variant of every user into `avatars/`.
    /// Avatar URLs are public, no token is attached.
    pub async fn download_avatars(&self, users: &[User]) {
        let mut window = Vec::new();

        for user in users {
            for (key, url) in user.avatar_images() {
                let extension = url_extension(&url)
                    .map(|ext| format!(".{}", ext))
                    .unwrap_or_default();
                let name = format!("{}_{}", user.name(), key);

                window.push(self.fetch(url, PathBuf::from(AVATARS_DIR), name, extension, false));

                if window.len() >= WINDOW {
                    join_all(window.drain(..)).await;
                }
            }
        }

        join_all(window).await;
    }

    /// One window slot: download, then log the outcome either way.
    async fn fetch(
        &self,
        url: String,
        rel_dir: PathBuf,
        name: String,
        extension: String,
        use_token: bool,
    ) {
        match self
            .download_file(&url, &rel_dir, &name, &extension, use_token)
            .await
        {
            Ok(file_name) => tracing::info!(
                "File ({}) successfully downloaded!",
                rel_dir.join(&file_name).display()
            ),
            Err(e) => tracing::warn!(
                "File ({}) something went wrong: {}",
                rel_dir.join(format!("{}{}", name, extension)).display(),
                e
            ),
        }
    }

    /// Bounded retry around one streaming download. HTTP 400, reset
    /// connections and timeouts are retried; 404 is a permanent skip.
    async fn download_file(
        &self,
        url: &str,
        rel_dir: &Path,
        name: &str,
        extension: &str,
        use_token: bool,
    ) -> Result<String, ExportError> {
        let mut attempt = 0u32;

        loop {
            match self
                .try_download(url, rel_dir, name, extension, use_token)
                .await
            {
                Ok(file_name) => return Ok(file_name),
                Err(e) if attempt < MAX_RETRIES && is_retryable(&e) => {
                    attempt += 1;
                    tracing::warn!(
                        "File [{}] download failed ({}), try again. Attempt: [{}/{}]",
                        url,
                        e,
                        attempt,
                        MAX_RETRIES
                    );
                    sleep(RETRY_DELAY).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn try_download(
        &self,
        url: &str,
        rel_dir: &Path,
        name: &str,
        extension: &str,
        use_token: bool,
    ) -> Result<String, ExportError> {
        let mut request = self.http.get(url);
        if use_token {
            request = request.bearer_auth(&self.token);
        }

        let response = match request.send().await?.error_for_status() {
            Ok(response) => response,
            Err(e) => {
                if e.status() == Some(StatusCode::NOT_FOUND) {
                    tracing::warn!("File [{}] is missed. Status code: 404", url);
                }
                return Err(e.into());
            }
        };

        let name = if name.is_empty() {
            url_basename(url).unwrap_or_else(random_name)
        } else {
            name.to_string()
        };

        let mut extension = extension.to_string();
        if extension.is_empty() {
            extension = url_extension(url)
                .map(|ext| format!(".{}", ext))
                .unwrap_or_default();

            if extension.is_empty() {
                let content_type = response
                    .headers()
                    .get(header::CONTENT_TYPE)
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or_default();

                match mime::extension_for(content_type) {
                    Some(ext) => extension = format!(".{}", ext),
                    None => tracing::warn!(
                        "Extension [{}] is missed in the MIME dictionary!",
                        content_type
                    ),
                }
            }
        }
        if !extension.is_empty() && !extension.starts_with('.') {
            extension = format!(".{}", extension);
        }

        let file_name = format!("{}{}", name, extension);
        let dest_dir = self.root.join(rel_dir);
        tokio::fs::create_dir_all(&dest_dir).await?;
        let dest = dest_dir.join(&file_name);

        // The handle closes on every exit path, including stream errors,
        // so no partially written file outlives this call.
        let mut out = tokio::fs::File::create(&dest).await?;
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            out.write_all(&chunk?).await?;
        }
        out.flush().await?;

        Ok(file_name)
    }
}

/// HTTP 400, reset connections (surfacing as connect or body errors) and
/// timeouts get another attempt; everything else is final.
fn is_retryable(err: &ExportError) -> bool {
    match err {
        ExportError::Http(e) => {
            e.is_timeout()
                || e.is_connect()
                || e.is_body()
                || e.status() == Some(StatusCode::BAD_REQUEST)
        }
        _ => false,
    }
}

/// Why an attachment is ineligible for download, if it is.
fn skip_reason(file: &Attachment, size_limit: u64) -> Option<String> {
    if file.mode.as_deref() == Some("tombstone") {
        return Some("has been removed".to_string());
    }

    if file.mode.as_deref() == Some("file_access")
        && file.file_access.as_deref() == Some("access_denied")
    {
        return Some("has access denied".to_string());
    }

    if file.size > size_limit {
        return Some(format!(
            "{} size is bigger than parameter fileSizeLimit",
            file.name.as_deref().unwrap_or_default()
        ));
    }

    if file.is_external {
        return Some(format!(
            "{} is external [{}]",
            file.name.as_deref().unwrap_or_default(),
            file.external_type.as_deref().unwrap_or_default()
        ));
    }

    None
}

/// Extension declared on the attachment itself: the filetype field first,
/// then whatever the display name carries.
fn declared_extension(file: &Attachment) -> String {
    if let Some(filetype) = file.filetype.as_deref().filter(|f| !f.is_empty()) {
        return format!(".{}", filetype);
    }

    file.name
        .as_deref()
        .and_then(|name| Path::new(name).extension()?.to_str())
        .map(|ext| format!(".{}", ext))
        .unwrap_or_default()
}

fn url_path(url: &str) -> &str {
    url.split(['?', '#']).next().unwrap_or(url)
}

fn url_basename(url: &str) -> Option<String> {
    let segment = url_path(url).rsplit('/').next()?;
    let stem = Path::new(segment).file_stem()?.to_str()?;

    (!stem.is_empty()).then(|| stem.to_string())
}

fn url_extension(url: &str) -> Option<String> {
    let segment = url_path(url).rsplit('/').next()?;

    Path::new(segment)
        .extension()?
        .to_str()
        .map(String::from)
}

/// Fallback file name when neither the record nor the URL provides one.
fn random_name() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);

    STANDARD
        .encode(bytes)
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .take(RANDOM_NAME_LEN)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn attachment(value: serde_json::Value) -> Attachment {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_skip_tombstoned() {
        let file = attachment(json!({"id": "F1", "mode": "tombstone"}));
        assert!(skip_reason(&file, 1000).unwrap().contains("removed"));
    }

    #[test]
    fn test_skip_access_denied() {
        let file = attachment(json!({
            "id": "F2", "mode": "file_access", "file_access": "access_denied"
        }));
        assert!(skip_reason(&file, 1000).unwrap().contains("access denied"));
    }

    #[test]
    fn test_skip_oversized() {
        let file = attachment(json!({"id": "F3", "name": "video.mp4", "size": 2048}));
        assert!(skip_reason(&file, 1024).unwrap().contains("fileSizeLimit"));
    }

    #[test]
    fn test_skip_external() {
        let file = attachment(json!({
            "id": "F4", "name": "doc", "is_external": true, "external_type": "gdrive"
        }));
        assert!(skip_reason(&file, 1024).unwrap().contains("gdrive"));
    }

    #[test]
    fn test_eligible_attachment_not_skipped() {
        let file = attachment(json!({
            "id": "F5", "name": "notes.txt", "size": 10,
            "url_private_download": "https://files.example/F5/notes.txt"
        }));
        assert!(skip_reason(&file, 1024).is_none());
    }

    #[test]
    fn test_declared_extension_prefers_filetype() {
        let file = attachment(json!({"id": "F1", "filetype": "png", "name": "shot.jpeg"}));
        assert_eq!(declared_extension(&file), ".png");
    }

    #[test]
    fn test_declared_extension_falls_back_to_name() {
        let file = attachment(json!({"id": "F1", "name": "shot.jpeg"}));
        assert_eq!(declared_extension(&file), ".jpeg");
    }

    #[test]
    fn test_declared_extension_empty_when_unknown() {
        let file = attachment(json!({"id": "F1", "name": "README"}));
        assert_eq!(declared_extension(&file), "");
    }

    #[test]
    fn test_url_extension_ignores_query() {
        assert_eq!(
            url_extension("https://files.example/a/b/avatar.png?t=123"),
            Some("png".to_string())
        );
        assert_eq!(url_extension("https://files.example/a/b/avatar"), None);
    }

    #[test]
    fn test_url_basename() {
        assert_eq!(
            url_basename("https://files.example/a/b/avatar.png?t=1"),
            Some("avatar".to_string())
        );
        assert_eq!(url_basename("https://files.example/a/"), None);
    }

    #[test]
    fn test_random_name_shape() {
        let name = random_name();
        assert_eq!(name.len(), RANDOM_NAME_LEN);
        assert!(name.chars().all(|c| c.is_ascii_alphanumeric()));
    }
}
