//! Export data types and error definitions

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error on [{endpoint}]: {code}")]
    Api { endpoint: String, code: String },

    #[error("rate limited on [{endpoint}]")]
    RateLimited {
        endpoint: String,
        retry_after: Option<u64>,
    },

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("undefined dialog type for [{0}]")]
    UnknownDialogKind(String),

    #[error("record is missing required field [{0}]")]
    MalformedRecord(&'static str),

    #[error("unsupported storage operation: {0}")]
    Unsupported(&'static str),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// The four conversation container types Slack exposes.
///
/// Derived from the capability flags on a `conversations.list` entry; a
/// combination that matches none of them is an error, never a default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DialogKind {
    PublicChannel,
    PrivateChannel,
    Group,
    DirectMessage,
}

impl DialogKind {
    /// Export processing order: channels first, DMs last.
    pub const ALL: [DialogKind; 4] = [
        DialogKind::PublicChannel,
        DialogKind::PrivateChannel,
        DialogKind::Group,
        DialogKind::DirectMessage,
    ];

    pub fn classify(raw: &Value) -> Result<Self, ExportError> {
        let flag = |key: &str| raw[key].as_bool().unwrap_or(false);

        if flag("is_channel") {
            if flag("is_private") {
                Ok(DialogKind::PrivateChannel)
            } else {
                Ok(DialogKind::PublicChannel)
            }
        } else if flag("is_mpim") || flag("is_group") {
            Ok(DialogKind::Group)
        } else if flag("is_im") {
            Ok(DialogKind::DirectMessage)
        } else {
            let id = raw["id"].as_str().unwrap_or("unknown");
            let label = match raw["name"].as_str() {
                Some(name) => format!("{} ({})", id, name),
                None => id.to_string(),
            };
            Err(ExportError::UnknownDialogKind(label))
        }
    }

    /// `types` parameter value for `conversations.list`.
    pub fn list_types(self) -> &'static str {
        match self {
            DialogKind::PublicChannel => "public_channel",
            DialogKind::PrivateChannel => "private_channel",
            DialogKind::Group => "mpim",
            DialogKind::DirectMessage => "im",
        }
    }

    /// Collection name in the document store; also the per-kind
    /// subdirectory of a file-mode session.
    pub fn collection(self) -> &'static str {
        match self {
            DialogKind::PublicChannel => "public_channels",
            DialogKind::PrivateChannel => "private_channels",
            DialogKind::Group => "mpims",
            DialogKind::DirectMessage => "ims",
        }
    }
}

/// One conversation container, snapshotted for the duration of a run.
///
/// `raw` carries the full API record so nothing is lost on export; the
/// typed fields are only what the engine itself needs.
#[derive(Debug, Clone)]
pub struct Dialog {
    pub id: String,
    pub kind: DialogKind,
    pub name: Option<String>,
    pub raw: Value,
}

impl Dialog {
    pub fn from_value(raw: Value) -> Result<Self, ExportError> {
        let id = raw["id"]
            .as_str()
            .ok_or(ExportError::MalformedRecord("id"))?
            .to_string();
        let kind = DialogKind::classify(&raw)?;
        let name = raw["name"].as_str().map(String::from);

        Ok(Self {
            id,
            kind,
            name,
            raw,
        })
    }

    /// `(name)` suffix for log lines, empty when the dialog has no name.
    pub fn label(&self) -> String {
        match &self.name {
            Some(name) => format!("({})", name),
            None => String::new(),
        }
    }
}

/// Workspace member, kept opaque so every profile field survives export.
#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub id: String,
    pub raw: Value,
}

impl User {
    pub fn from_value(raw: Value) -> Result<Self, ExportError> {
        let id = raw["id"]
            .as_str()
            .ok_or(ExportError::MalformedRecord("id"))?
            .to_string();

        Ok(Self { id, raw })
    }

    pub fn name(&self) -> &str {
        self.raw["name"].as_str().unwrap_or(&self.id)
    }

    /// All original-size avatar variants in the profile, as (key, url).
    pub fn avatar_images(&self) -> Vec<(String, String)> {
        let Some(profile) = self.raw["profile"].as_object() else {
            return Vec::new();
        };

        profile
            .iter()
            .filter(|(key, _)| key.contains(AVATAR_IMAGE_KEY))
            .filter_map(|(key, value)| Some((key.clone(), value.as_str()?.to_string())))
            .collect()
    }

    pub fn image_original(&self) -> Option<&str> {
        self.raw["profile"][AVATAR_IMAGE_KEY].as_str()
    }
}

/// Profile key for the uncropped avatar upload.
pub const AVATAR_IMAGE_KEY: &str = "image_original";

/// One conversation entry. `ts` doubles as ordering key and per-dialog id.
#[derive(Debug, Clone)]
pub struct Message {
    pub ts: String,
    pub raw: Value,
}

impl Message {
    pub fn from_value(raw: Value) -> Result<Self, ExportError> {
        let ts = raw["ts"]
            .as_str()
            .ok_or(ExportError::MalformedRecord("ts"))?
            .to_string();

        Ok(Self { ts, raw })
    }

    pub fn ts_num(&self) -> Option<f64> {
        self.ts.parse().ok()
    }

    /// Attachment descriptors from the message's `files` array; entries
    /// that fail to decode are dropped with a warning.
    pub fn attachments(&self) -> Vec<Attachment> {
        let Some(files) = self.raw["files"].as_array() else {
            return Vec::new();
        };

        files
            .iter()
            .filter_map(|file| match serde_json::from_value(file.clone()) {
                Ok(attachment) => Some(attachment),
                Err(e) => {
                    tracing::warn!("Skipping undecodable file entry on message [{}]: {}", self.ts, e);
                    None
                }
            })
            .collect()
    }
}

/// File reference inside a message.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Attachment {
    pub id: String,
    pub name: Option<String>,
    pub filetype: Option<String>,
    pub size: u64,
    pub mode: Option<String>,
    pub file_access: Option<String>,
    pub is_external: bool,
    pub external_type: Option<String>,
    pub url_private_download: Option<String>,
}
