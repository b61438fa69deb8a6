//! Rate-limited Slack Web API client.
//!
//! Single entry point for all remote calls. A call succeeds only when the
//! decoded body carries `ok: true`; everything else is an error. Timeouts
//! and HTTP 429 are retried a bounded number of times, all other failures
//! propagate to the caller untouched.

use std::time::Duration;

use reqwest::{header, Client, Method, StatusCode};
use serde_json::Value;
use tokio::time::sleep;

use crate::types::{Dialog, DialogKind, ExportError, Message, User};

const API_BASE: &str = "https://slack.com/api";
const CALL_TIMEOUT: Duration = Duration::from_secs(120);
const LIST_LIMIT: &str = "1000";

const MAX_RETRIES: u32 = 3;
const TIMEOUT_RETRY_DELAY: Duration = Duration::from_millis(50);
// Fallback when a 429 response carries no retry-after header. Inherited
// from the original deployment; very coarse next to the other timeouts.
const DEFAULT_RETRY_AFTER_SECS: u64 = 3600;

/// One page of `conversations.history`.
#[derive(Debug)]
pub struct HistoryPage {
    pub messages: Vec<Message>,
    pub has_more: bool,
}

pub struct ApiClient {
    http: Client,
    token: String,
}

impl ApiClient {
    pub fn new(token: String) -> Result<Self, ExportError> {
        let http = Client::builder().timeout(CALL_TIMEOUT).build()?;

        Ok(Self { http, token })
    }

    /// Issue one authenticated API call with bounded retry.
    ///
    /// The original call counts as attempt 0; timeouts and 429s get up to
    /// three more attempts, then the last error propagates unchanged.
    pub async fn call(
        &self,
        endpoint: &str,
        method: Method,
        params: &[(&str, String)],
    ) -> Result<Value, ExportError> {
        let mut attempt = 0u32;

        loop {
            match self.request(endpoint, method.clone(), params).await {
                Ok(body) => {
                    tracing::debug!("[{}] data retrieved OK (attempt {})", endpoint, attempt);
                    return Ok(body);
                }
                Err(err) => {
                    let delay = match retry_delay(&err) {
                        Some(delay) if attempt < MAX_RETRIES => delay,
                        _ => {
                            tracing::error!(
                                "[Api -> {}] giving up after attempt {}: {}",
                                endpoint,
                                attempt,
                                err
                            );
                            return Err(err);
                        }
                    };

                    attempt += 1;
                    tracing::warn!(
                        "[Api -> {}] {}, trying again. Attempt: [{}/{}]",
                        endpoint,
                        err,
                        attempt,
                        MAX_RETRIES
                    );
                    sleep(delay).await;
                }
            }
        }
    }

    async fn request(
        &self,
        endpoint: &str,
        method: Method,
        params: &[(&str, String)],
    ) -> Result<Value, ExportError> {
        let response = self
            .http
            .request(method, format!("{}/{}", API_BASE, endpoint))
            .bearer_auth(&self.token)
            .query(params)
            .send()
            .await?;

        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(header::RETRY_AFTER)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.parse().ok());

            return Err(ExportError::RateLimited {
                endpoint: endpoint.to_string(),
                retry_after,
            });
        }

        let body: Value = response.json().await?;

        if body["ok"].as_bool().unwrap_or(false) {
            Ok(body)
        } else {
            let code = body["error"].as_str().unwrap_or("unknown_error").to_string();
            Err(ExportError::Api {
                endpoint: endpoint.to_string(),
                code,
            })
        }
    }

    /// Validate the bearer token. Fails with `ExportError::Auth` when the
    /// workspace rejects it, so a run never silently produces nothing.
    pub async fn auth_test(&self) -> Result<(), ExportError> {
        let body = self
            .call("auth.test", Method::POST, &[])
            .await
            .map_err(|err| match err {
                ExportError::Api { code, .. } => ExportError::Auth(code),
                other => other,
            })?;

        tracing::info!(
            "Successfully authenticated for team {} (ID {}) and user {} (ID {})",
            body["team"].as_str().unwrap_or_default(),
            body["team_id"].as_str().unwrap_or_default(),
            body["user"].as_str().unwrap_or_default(),
            body["user_id"].as_str().unwrap_or_default()
        );

        Ok(())
    }

    /// Fetch the full user directory.
    pub async fn users_list(&self) -> Result<Vec<User>, ExportError> {
        let body = self.call("users.list", Method::GET, &[]).await?;

        let members = body["members"].as_array().cloned().unwrap_or_default();
        let mut users = Vec::with_capacity(members.len());

        for member in members {
            match User::from_value(member) {
                Ok(user) => users.push(user),
                Err(e) => tracing::warn!("Skipping malformed user record: {}", e),
            }
        }

        Ok(users)
    }

    /// List all dialogs of one kind. A record whose flags match no known
    /// kind is a hard error; listing is a workspace-wide operation.
    pub async fn conversations_list(&self, kind: DialogKind) -> Result<Vec<Dialog>, ExportError> {
        let body = self
            .call(
                "conversations.list",
                Method::GET,
                &[
                    ("limit", LIST_LIMIT.to_string()),
                    ("types", kind.list_types().to_string()),
                ],
            )
            .await?;

        body["channels"]
            .as_array()
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .map(Dialog::from_value)
            .collect()
    }

    /// Fetch one history page for a dialog, newest first. `latest` bounds
    /// the page from above; `None` starts at the most recent message.
    pub async fn history_page(
        &self,
        channel: &str,
        latest: Option<&str>,
    ) -> Result<HistoryPage, ExportError> {
        let mut params = vec![
            ("limit", LIST_LIMIT.to_string()),
            ("channel", channel.to_string()),
        ];

        if let Some(ts) = latest {
            params.push(("latest", ts.to_string()));
        }

        let body = self
            .call("conversations.history", Method::GET, &params)
            .await?;

        let raw_messages = body["messages"].as_array().cloned().unwrap_or_default();
        let mut messages = Vec::with_capacity(raw_messages.len());

        for raw in raw_messages {
            match Message::from_value(raw) {
                Ok(message) => messages.push(message),
                Err(e) => tracing::warn!("Skipping malformed message in [{}]: {}", channel, e),
            }
        }

        Ok(HistoryPage {
            messages,
            has_more: body["has_more"].as_bool().unwrap_or(false),
        })
    }
}

/// Backoff for a retryable call failure, `None` when the error is final.
fn retry_delay(err: &ExportError) -> Option<Duration> {
    match err {
        ExportError::Http(e) if e.is_timeout() => Some(TIMEOUT_RETRY_DELAY),
        ExportError::RateLimited { retry_after, .. } => Some(Duration::from_secs(
            retry_after.unwrap_or(DEFAULT_RETRY_AFTER_SECS),
        )),
        _ => None,
    }
}
