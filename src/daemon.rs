//! Timer-driven incremental sync.
//!
//! Wraps the orchestrator in a fixed-interval loop. At most one cycle is
//! in flight: the state cell flips Idle -> Running atomically and a tick
//! that finds it Running is dropped. Cycle failures are logged and the
//! daemon returns to Idle for the next tick.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::export::{drain_tasks, user_records, Orchestrator, TaskSet};
use crate::types::{ExportError, User};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonState {
    Idle,
    Running,
}

/// Atomic Idle/Running cell gating cycle re-entrancy.
struct StateCell(AtomicBool);

impl StateCell {
    fn new() -> Self {
        Self(AtomicBool::new(false))
    }

    /// Transition Idle -> Running; false when already Running.
    fn try_begin(&self) -> bool {
        self.0
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    fn finish(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    fn state(&self) -> DaemonState {
        if self.0.load(Ordering::SeqCst) {
            DaemonState::Running
        } else {
            DaemonState::Idle
        }
    }
}

pub struct Daemon {
    orchestrator: Orchestrator,
    refresh: Duration,
    state: StateCell,
}

impl Daemon {
    /// Daemon mode requires the auto-update block and the document-store
    /// backend; flat files have no cross-run cursors to resume from.
    pub fn new(orchestrator: Orchestrator) -> Result<Self, ExportError> {
        let config = &orchestrator.config;

        if !config.auto_update.enabled {
            return Err(ExportError::Unsupported(
                "daemon was disabled in config, check property [autoUpdate.enabled]",
            ));
        }

        if !orchestrator.storage.is_store() {
            return Err(ExportError::Unsupported(
                "daemon mode currently supports only the document store backend",
            ));
        }

        let refresh = Duration::from_millis(config.auto_update.refresh.max(1));

        Ok(Self {
            orchestrator,
            refresh,
            state: StateCell::new(),
        })
    }

    pub fn state(&self) -> DaemonState {
        self.state.state()
    }

    /// Run forever: one immediate cycle, then one per timer tick.
    pub async fn run(self: Arc<Self>) {
        tracing::info!(
            "[Daemon] started with refresh interval {}ms",
            self.refresh.as_millis()
        );

        let daemon = self.clone();
        tokio::spawn(async move { daemon.tick().await });

        let mut timer = tokio::time::interval(self.refresh);
        timer.tick().await; // consume the immediate first tick

        loop {
            timer.tick().await;
            let daemon = self.clone();
            tokio::spawn(async move { daemon.tick().await });
        }
    }

    async fn tick(&self) {
        if !self.state.try_begin() {
            tracing::warn!("[Daemon] previous cycle still in flight, tick dropped");
            return;
        }

        let started = Instant::now();
        tracing::info!("[Daemon] started processing...");

        match self.cycle().await {
            Ok(()) => tracing::info!(
                "[Daemon] successfully finished processing. Time in work [{}]ms",
                started.elapsed().as_millis()
            ),
            Err(e) => tracing::error!("[Daemon] something went wrong: {}", e),
        }

        self.state.finish();
    }

    async fn cycle(&self) -> Result<(), ExportError> {
        self.orchestrator.api.auth_test().await?;

        let mut tasks = TaskSet::new();

        self.reconcile_users(&mut tasks).await?;
        self.orchestrator.export_dialogs(true, &mut tasks).await?;

        tracing::info!("[Daemon] at last, waiting all async tasks to complete.");
        drain_tasks(tasks).await;

        Ok(())
    }

    /// Diff the remote user directory against the stored set: new users
    /// are inserted as one batch, changed users upserted, and avatars
    /// re-downloaded only when the avatar image itself changed.
    async fn reconcile_users(&self, tasks: &mut TaskSet) -> Result<(), ExportError> {
        let remote = self.orchestrator.api.users_list().await?;
        let stored = self.orchestrator.storage.list_users().await?;

        let diff = diff_users(remote, &stored);
        tracing::info!(
            "[Daemon] user reconciliation: {} new, {} changed, {} avatar downloads",
            diff.inserts.len(),
            diff.updates.len(),
            diff.avatars.len()
        );

        for user in diff.updates {
            let storage = self.orchestrator.storage.clone();
            tasks.push(tokio::spawn(async move {
                if let Err(e) = storage.upsert_user(&user).await {
                    tracing::error!("Failed to update user [{}]: {}", user.id, e);
                }
            }));
        }

        if !diff.inserts.is_empty() {
            let records = user_records(&diff.inserts);
            let storage = self.orchestrator.storage.clone();
            tasks.push(tokio::spawn(async move {
                if let Err(e) = storage.write_collection("users", &records).await {
                    tracing::error!("Failed to persist new users: {}", e);
                }
            }));
        }

        if self.orchestrator.config.download_avatars && !diff.avatars.is_empty() {
            let downloader = self.orchestrator.downloader.clone();
            let users = diff.avatars;
            tasks.push(tokio::spawn(async move {
                downloader.download_avatars(&users).await;
            }));
        }

        Ok(())
    }
}

struct UserDiff {
    inserts: Vec<User>,
    updates: Vec<User>,
    avatars: Vec<User>,
}

fn diff_users(remote: Vec<User>, stored: &[User]) -> UserDiff {
    let mut diff = UserDiff {
        inserts: Vec::new(),
        updates: Vec::new(),
        avatars: Vec::new(),
    };

    for user in remote {
        match stored.iter().find(|s| s.id == user.id) {
            None => {
                diff.avatars.push(user.clone());
                diff.inserts.push(user);
            }
            Some(known) if known.raw != user.raw => {
                if user.image_original() != known.image_original() {
                    diff.avatars.push(user.clone());
                }
                diff.updates.push(user);
            }
            Some(_) => {}
        }
    }

    diff
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn user(value: serde_json::Value) -> User {
        User::from_value(value).unwrap()
    }

    #[test]
    fn test_state_cell_gates_reentry() {
        let cell = StateCell::new();
        assert_eq!(cell.state(), DaemonState::Idle);

        assert!(cell.try_begin());
        assert_eq!(cell.state(), DaemonState::Running);
        assert!(!cell.try_begin());

        cell.finish();
        assert_eq!(cell.state(), DaemonState::Idle);
        assert!(cell.try_begin());
    }

    #[test]
    fn test_diff_new_user_inserted_with_avatar() {
        let remote = vec![user(json!({"id": "U1", "profile": {"image_original": "x"}}))];
        let diff = diff_users(remote, &[]);

        assert_eq!(diff.inserts.len(), 1);
        assert_eq!(diff.avatars.len(), 1);
        assert!(diff.updates.is_empty());
    }

    #[test]
    fn test_diff_changed_avatar_triggers_redownload() {
        let remote = vec![user(json!({"id": "U1", "profile": {"image_original": "x"}}))];
        let stored = vec![user(json!({"id": "U1", "profile": {"image_original": "y"}}))];

        let diff = diff_users(remote, &stored);

        assert!(diff.inserts.is_empty());
        assert_eq!(diff.updates.len(), 1);
        assert_eq!(diff.avatars.len(), 1);
        assert_eq!(diff.updates[0].id, "U1");
    }

    #[test]
    fn test_diff_changed_fields_without_avatar_change() {
        let remote = vec![user(json!({
            "id": "U1", "name": "alice-renamed",
            "profile": {"image_original": "x"}
        }))];
        let stored = vec![user(json!({
            "id": "U1", "name": "alice",
            "profile": {"image_original": "x"}
        }))];

        let diff = diff_users(remote, &stored);

        assert_eq!(diff.updates.len(), 1);
        assert!(diff.avatars.is_empty());
        assert!(diff.inserts.is_empty());
    }

    #[test]
    fn test_diff_identical_user_untouched() {
        let snapshot = json!({"id": "U1", "profile": {"image_original": "x"}});
        let diff = diff_users(vec![user(snapshot.clone())], &[user(snapshot)]);

        assert!(diff.inserts.is_empty());
        assert!(diff.updates.is_empty());
        assert!(diff.avatars.is_empty());
    }
}
