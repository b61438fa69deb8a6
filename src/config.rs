//! Settings file loading with per-field defaults.
//!
//! The settings file mirrors the original `settings.json` layout: camelCase
//! keys, one filter block per dialog kind, a global size limit and avatar
//! toggle, an auto-update block for daemon mode and a store block for the
//! document-store backend. A missing or malformed file logs an error and
//! falls back to the defaults.

use std::path::Path;

use serde::Deserialize;

use crate::types::DialogKind;

const DEFAULT_FILE_SIZE_LIMIT: u64 = 10_485_760;
const DEFAULT_REFRESH_MS: u64 = 300_000;
const DEFAULT_STORE_PATH: &str = "data/export.db";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    /// Slack user name, used to label the export session.
    pub user_name: String,
    /// Slack OAuth bearer token.
    pub token: String,
    /// Attachments above this many bytes are skipped.
    pub file_size_limit: u64,
    /// Download user avatars (original uploads only).
    pub download_avatars: bool,
    pub filter: FilterConfig,
    pub auto_update: AutoUpdateConfig,
    pub store: StoreConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            user_name: String::new(),
            token: String::new(),
            file_size_limit: DEFAULT_FILE_SIZE_LIMIT,
            download_avatars: true,
            filter: FilterConfig::default(),
            auto_update: AutoUpdateConfig::default(),
            store: StoreConfig::default(),
        }
    }
}

impl Config {
    /// Load settings from `path`, falling back to defaults when the file
    /// is absent or does not parse.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(config) => {
                    tracing::info!("[Config] {} successfully loaded.", path.display());
                    config
                }
                Err(e) => {
                    tracing::error!(
                        "[Config] {} did not parse, using defaults: {}",
                        path.display(),
                        e
                    );
                    Self::default()
                }
            },
            Err(e) => {
                tracing::error!(
                    "[Config] {} could not be read, using defaults: {}",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FilterConfig {
    pub public_channels: DialogFilter,
    pub private_channels: DialogFilter,
    pub mpims: DialogFilter,
    pub ims: DialogFilter,
}

impl FilterConfig {
    pub fn for_kind(&self, kind: DialogKind) -> &DialogFilter {
        match kind {
            DialogKind::PublicChannel => &self.public_channels,
            DialogKind::PrivateChannel => &self.private_channels,
            DialogKind::Group => &self.mpims,
            DialogKind::DirectMessage => &self.ims,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DialogFilter {
    pub enabled: bool,
    /// Floor timestamp for one-shot exports; 0 means full history.
    pub time_stamp_limit: f64,
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    pub download_files: bool,
}

impl Default for DialogFilter {
    fn default() -> Self {
        Self {
            enabled: true,
            time_stamp_limit: 0.0,
            include: Vec::new(),
            exclude: Vec::new(),
            download_files: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AutoUpdateConfig {
    pub enabled: bool,
    /// Refresh interval in milliseconds.
    pub refresh: u64,
}

impl Default for AutoUpdateConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            refresh: DEFAULT_REFRESH_MS,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StoreConfig {
    pub enabled: bool,
    pub path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: DEFAULT_STORE_PATH.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.file_size_limit, 10_485_760);
        assert!(config.download_avatars);
        assert!(!config.auto_update.enabled);
        assert!(!config.store.enabled);

        for kind in DialogKind::ALL {
            let filter = config.filter.for_kind(kind);
            assert!(filter.enabled);
            assert_eq!(filter.time_stamp_limit, 0.0);
            assert!(filter.include.is_empty());
            assert!(filter.exclude.is_empty());
            assert!(filter.download_files);
        }
    }

    #[test]
    fn test_partial_settings_keep_defaults() {
        let config: Config = serde_json::from_str(
            r#"{
                "token": "xoxp-test",
                "filter": {
                    "publicChannels": {"enabled": false, "exclude": ["C9"]}
                }
            }"#,
        )
        .unwrap();

        assert_eq!(config.token, "xoxp-test");
        assert_eq!(config.file_size_limit, 10_485_760);
        assert!(!config.filter.public_channels.enabled);
        assert_eq!(config.filter.public_channels.exclude, vec!["C9"]);
        // untouched blocks stay at defaults
        assert!(config.filter.ims.enabled);
        assert!(config.filter.public_channels.download_files);
    }

    #[test]
    fn test_camel_case_keys() {
        let config: Config = serde_json::from_str(
            r#"{
                "userName": "backup-bot",
                "fileSizeLimit": 1024,
                "downloadAvatars": false,
                "autoUpdate": {"enabled": true, "refresh": 60000},
                "store": {"enabled": true, "path": "out/slack.db"}
            }"#,
        )
        .unwrap();

        assert_eq!(config.user_name, "backup-bot");
        assert_eq!(config.file_size_limit, 1024);
        assert!(!config.download_avatars);
        assert!(config.auto_update.enabled);
        assert_eq!(config.auto_update.refresh, 60_000);
        assert!(config.store.enabled);
        assert_eq!(config.store.path, "out/slack.db");
    }

    #[test]
    fn test_load_missing_file_falls_back() {
        let config = Config::load(Path::new("does/not/exist.json"));
        assert_eq!(config.token, "");
        assert!(config.filter.mpims.enabled);
    }
}
