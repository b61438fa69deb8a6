//! Export session identity and output directory scaffolding.

use std::io;
use std::path::{Path, PathBuf};

use crate::types::DialogKind;

pub const AVATARS_DIR: &str = "avatars";

/// Namespacing identity for one export run.
///
/// The label is `<name>_<millis>`, where the name comes from the settings
/// file, then the command line, then a `noname` fallback. All output for
/// the run lands under `<base>/<label>/`.
#[derive(Debug, Clone)]
pub struct ExportSession {
    label: String,
    root: PathBuf,
}

impl ExportSession {
    pub fn new(base: &Path, configured_name: &str, arg_name: Option<&str>) -> Self {
        let name = if !configured_name.is_empty() {
            configured_name
        } else {
            arg_name.filter(|n| !n.is_empty()).unwrap_or("noname")
        };

        let label = format!("{}_{}", name, chrono::Utc::now().timestamp_millis());
        let root = base.join(&label);

        Self { label, root }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the session root with its avatars directory and one
    /// directory per dialog kind.
    pub fn scaffold(&self) -> io::Result<()> {
        std::fs::create_dir_all(&self.root)?;
        std::fs::create_dir_all(self.root.join(AVATARS_DIR))?;

        for kind in DialogKind::ALL {
            std::fs::create_dir_all(self.root.join(kind.collection()))?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_prefers_configured_name() {
        let session = ExportSession::new(Path::new("data"), "alice", Some("bob"));
        assert!(session.label().starts_with("alice_"));
    }

    #[test]
    fn test_label_falls_back_to_argument() {
        let session = ExportSession::new(Path::new("data"), "", Some("bob"));
        assert!(session.label().starts_with("bob_"));
    }

    #[test]
    fn test_label_defaults_to_noname() {
        let session = ExportSession::new(Path::new("data"), "", None);
        assert!(session.label().starts_with("noname_"));

        let session = ExportSession::new(Path::new("data"), "", Some(""));
        assert!(session.label().starts_with("noname_"));
    }

    #[test]
    fn test_scaffold_creates_layout() {
        let dir = tempfile::tempdir().unwrap();
        let session = ExportSession::new(dir.path(), "test", None);
        session.scaffold().unwrap();

        assert!(session.root().join(AVATARS_DIR).is_dir());
        for kind in DialogKind::ALL {
            assert!(session.root().join(kind.collection()).is_dir());
        }
    }
}
