//! Export orchestration: one full pass over the workspace.
//!
//! Drives the user directory export, then the four dialog kinds in fixed
//! order, fanning avatar downloads, attachment downloads and persistence
//! writes out into one task set that is drained before the run returns.

use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::api::ApiClient;
use crate::config::{Config, DialogFilter};
use crate::download::Downloader;
use crate::history;
use crate::storage::{Record, Storage};
use crate::types::{Dialog, DialogKind, ExportError, User};

/// Every asynchronous unit of work spawned during a run. Individual
/// failures are logged where the task is created; the set only exists so
/// the run can wait for all of them.
pub type TaskSet = Vec<JoinHandle<()>>;

pub async fn drain_tasks(tasks: TaskSet) {
    for task in tasks {
        if let Err(e) = task.await {
            tracing::error!("Task join error: {}", e);
        }
    }
}

pub struct Orchestrator {
    pub(crate) api: ApiClient,
    pub(crate) storage: Arc<Storage>,
    pub(crate) downloader: Arc<Downloader>,
    pub(crate) config: Arc<Config>,
}

impl Orchestrator {
    pub fn new(
        api: ApiClient,
        storage: Arc<Storage>,
        downloader: Arc<Downloader>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            api,
            storage,
            downloader,
            config,
        }
    }

    /// One full export pass. Fails fast on authentication and on
    /// workspace-wide listing errors; per-dialog and per-file failures are
    /// contained downstream.
    pub async fn run(&self, incremental: bool) -> Result<(), ExportError> {
        self.api.auth_test().await?;

        let mut tasks: TaskSet = Vec::new();

        let users = self.api.users_list().await?;
        self.spawn_write(&mut tasks, "users", user_records(&users));

        if self.config.download_avatars {
            self.spawn_avatars(&mut tasks, users);
        }

        self.export_dialogs(incremental, &mut tasks).await?;

        drain_tasks(tasks).await;
        Ok(())
    }

    /// Export the four dialog kinds in fixed order, spawning downloads
    /// and persistence into `tasks`.
    pub(crate) async fn export_dialogs(
        &self,
        incremental: bool,
        tasks: &mut TaskSet,
    ) -> Result<(), ExportError> {
        for kind in DialogKind::ALL {
            let filter = self.config.filter.for_kind(kind);
            if !filter.enabled {
                continue;
            }

            tracing::info!("Started processing export of {}.", kind.collection());

            let dialogs = self.api.conversations_list(kind).await?;
            let filtered: Vec<Dialog> = dialogs
                .into_iter()
                .filter(|dialog| dialog_passes(dialog, filter))
                .collect();

            let records = filtered
                .iter()
                .map(|dialog| (dialog.id.clone(), dialog.raw.clone()))
                .collect();
            self.spawn_write(tasks, kind.collection(), records);

            for dialog in filtered {
                let cutoff = if incremental {
                    self.storage.last_cursor(&dialog.id).await?
                } else {
                    filter.time_stamp_limit
                };

                let messages =
                    history::fetch_history(&self.api, &self.storage, &dialog, cutoff).await;

                if filter.download_files {
                    let downloader = self.downloader.clone();
                    let dialog_id = dialog.id.clone();
                    tasks.push(tokio::spawn(async move {
                        downloader
                            .download_attachments(&messages, kind, &dialog_id)
                            .await;
                    }));
                }
            }
        }

        Ok(())
    }

    fn spawn_write(&self, tasks: &mut TaskSet, collection: &str, records: Vec<Record>) {
        let storage = self.storage.clone();
        let collection = collection.to_string();

        tasks.push(tokio::spawn(async move {
            if let Err(e) = storage.write_collection(&collection, &records).await {
                tracing::error!("Failed to persist collection [{}]: {}", collection, e);
            }
        }));
    }

    fn spawn_avatars(&self, tasks: &mut TaskSet, users: Vec<User>) {
        let downloader = self.downloader.clone();

        tasks.push(tokio::spawn(async move {
            downloader.download_avatars(&users).await;
        }));
    }
}

pub(crate) fn user_records(users: &[User]) -> Vec<Record> {
    users
        .iter()
        .map(|user| (user.id.clone(), user.raw.clone()))
        .collect()
}

/// Include wins when non-empty; otherwise exclude removes matches;
/// otherwise everything passes.
fn dialog_passes(dialog: &Dialog, filter: &DialogFilter) -> bool {
    if !filter.include.is_empty() {
        return filter.include.iter().any(|id| id == &dialog.id);
    }

    if !filter.exclude.is_empty() {
        return !filter.exclude.iter().any(|id| id == &dialog.id);
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn dialog(id: &str) -> Dialog {
        Dialog::from_value(json!({"id": id, "is_channel": true})).unwrap()
    }

    fn filter(include: &[&str], exclude: &[&str]) -> DialogFilter {
        DialogFilter {
            include: include.iter().map(|s| s.to_string()).collect(),
            exclude: exclude.iter().map(|s| s.to_string()).collect(),
            ..DialogFilter::default()
        }
    }

    #[test]
    fn test_include_list_wins() {
        let f = filter(&["C1", "C2"], &["C1"]);

        assert!(dialog_passes(&dialog("C1"), &f));
        assert!(dialog_passes(&dialog("C2"), &f));
        assert!(!dialog_passes(&dialog("C3"), &f));
    }

    #[test]
    fn test_exclude_removes_matches() {
        let f = filter(&[], &["C3"]);

        assert!(dialog_passes(&dialog("C1"), &f));
        assert!(!dialog_passes(&dialog("C3"), &f));
    }

    #[test]
    fn test_empty_filters_pass_everything() {
        let f = filter(&[], &[]);
        assert!(dialog_passes(&dialog("C1"), &f));
    }

    #[test]
    fn test_listing_filtered_to_include() {
        let listed = vec![dialog("C1"), dialog("C2")];
        let f = filter(&["C1"], &[]);

        let filtered: Vec<&Dialog> = listed.iter().filter(|d| dialog_passes(d, &f)).collect();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].id, "C1");
    }
}
