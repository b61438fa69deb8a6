//! Paginated conversation history export.
//!
//! Walks one dialog's history newest-to-oldest in fixed-size pages until
//! the API reports the end or the page reaches the incremental cutoff.
//! The collected history is persisted before being handed back, and any
//! failure degrades the dialog to an empty result so the run continues.

use std::time::Duration;

use tokio::time::sleep;

use crate::api::{ApiClient, HistoryPage};
use crate::storage::Storage;
use crate::types::{Dialog, ExportError, Message};

// Pause between history pages to respect API pacing.
const PAGE_SLEEP: Duration = Duration::from_millis(200);

const MAX_PAGE_RETRIES: u32 = 3;
const PAGE_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Export a dialog's messages newer than `cutoff` (0 means everything).
///
/// Never fails the caller: errors are logged and yield an empty list.
pub async fn fetch_history(
    api: &ApiClient,
    storage: &Storage,
    dialog: &Dialog,
    cutoff: f64,
) -> Vec<Message> {
    tracing::info!(
        "Preparing to export chat history [{}] {}",
        dialog.id,
        dialog.label()
    );

    match fetch_and_persist(api, storage, dialog, cutoff).await {
        Ok(messages) => {
            tracing::info!(
                "Successfully exported chat history [{}] {}",
                dialog.id,
                dialog.label()
            );
            messages
        }
        Err(e) => {
            tracing::error!(
                "Export of chat history [{}] {} failed: {}",
                dialog.id,
                dialog.label(),
                e
            );
            Vec::new()
        }
    }
}

async fn fetch_and_persist(
    api: &ApiClient,
    storage: &Storage,
    dialog: &Dialog,
    cutoff: f64,
) -> Result<Vec<Message>, ExportError> {
    let mut messages: Vec<Message> = Vec::new();
    let mut latest: Option<String> = None;

    loop {
        let page = page_with_retry(api, &dialog.id, latest.as_deref()).await?;

        if page.messages.is_empty() {
            break;
        }

        // The page is newest-first; its last entry is the oldest and
        // becomes the upper bound of the next page.
        latest = page.messages.last().map(|m| m.ts.clone());

        let (batch, stop) = trim_to_cutoff(page.messages, cutoff);
        messages.extend(batch);

        if stop || !page.has_more {
            break;
        }

        sleep(PAGE_SLEEP).await;
        tracing::info!(
            "[Conversation] export progress [{}]: latest - {}; total items - {}",
            dialog.id,
            latest.as_deref().unwrap_or("-"),
            messages.len()
        );
    }

    storage
        .write_messages(dialog.kind, &dialog.id, &messages)
        .await?;

    Ok(messages)
}

/// Drop everything at or before the cutoff. Returns the surviving batch
/// and whether pagination should stop because the cutoff was reached.
fn trim_to_cutoff(messages: Vec<Message>, cutoff: f64) -> (Vec<Message>, bool) {
    if cutoff <= 0.0 {
        return (messages, false);
    }

    let oldest = messages.last().and_then(Message::ts_num);
    match oldest {
        Some(ts) if ts <= cutoff => {
            let kept = messages
                .into_iter()
                .filter(|m| m.ts_num().map(|ts| ts > cutoff).unwrap_or(false))
                .collect();
            (kept, true)
        }
        _ => (messages, false),
    }
}

/// Retry transient transport aborts between the client's own retry layer
/// and the per-dialog error boundary.
async fn page_with_retry(
    api: &ApiClient,
    channel: &str,
    latest: Option<&str>,
) -> Result<HistoryPage, ExportError> {
    let mut attempt = 0u32;

    loop {
        match api.history_page(channel, latest).await {
            Ok(page) => return Ok(page),
            Err(ExportError::Http(e))
                if attempt < MAX_PAGE_RETRIES && (e.is_connect() || e.is_body()) =>
            {
                attempt += 1;
                tracing::warn!(
                    "Api [conversations.history] request aborted, trying again. Attempt: [{}/{}]",
                    attempt,
                    MAX_PAGE_RETRIES
                );
                sleep(PAGE_RETRY_DELAY).await;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn message(ts: &str) -> Message {
        Message::from_value(json!({"ts": ts})).unwrap()
    }

    #[test]
    fn test_zero_cutoff_keeps_everything() {
        let (kept, stop) = trim_to_cutoff(vec![message("600.0"), message("450.0")], 0.0);
        assert_eq!(kept.len(), 2);
        assert!(!stop);
    }

    #[test]
    fn test_page_above_cutoff_continues() {
        // oldest entry (1000) is still newer than the cutoff
        let (kept, stop) = trim_to_cutoff(vec![message("1200.0"), message("1000.0")], 500.0);
        assert_eq!(kept.len(), 2);
        assert!(!stop);
    }

    #[test]
    fn test_page_reaching_cutoff_trims_and_stops() {
        let page = vec![message("600.0"), message("450.0"), message("400.0")];
        let (kept, stop) = trim_to_cutoff(page, 500.0);

        assert!(stop);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].ts, "600.0");
    }

    #[test]
    fn test_cutoff_boundary_is_exclusive() {
        // a message exactly at the cutoff is already persisted
        let page = vec![message("500.000000"), message("400.000000")];
        let (kept, stop) = trim_to_cutoff(page, 500.0);

        assert!(stop);
        assert!(kept.is_empty());
    }

    #[test]
    fn test_empty_page_passes_through() {
        let (kept, stop) = trim_to_cutoff(Vec::new(), 500.0);
        assert!(kept.is_empty());
        assert!(!stop);
    }
}
