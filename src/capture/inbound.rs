//! The inbound text slot written by the external capture process

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::state::{read_cell, write_cell, StoreError};

/// Single-slot text file. The capture process overwrites it; the bridge
/// claims it by renaming it away, so a claimed text can never be read twice.
#[derive(Debug, Clone)]
pub struct InboundChannel {
    path: PathBuf,
    claim_path: PathBuf,
}

impl InboundChannel {
    pub fn new(path: PathBuf) -> Self {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let claim_path = path.with_file_name(format!(".{file_name}.claimed"));

        Self { path, claim_path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Claim the pending text, leaving the slot empty. `None` when nothing
    /// is pending.
    pub fn take(&self) -> Result<Option<String>, StoreError> {
        match std::fs::rename(&self.path, &self.claim_path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(StoreError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        }

        let text = read_cell(&self.claim_path);
        if let Err(e) = std::fs::remove_file(&self.claim_path) {
            warn!(error = %e, path = ?self.claim_path, "failed to remove claimed input");
        }
        text
    }

    /// Drop whatever is pending, e.g. text left over from a previous run
    pub fn clear(&self) -> Result<(), StoreError> {
        write_cell(&self.path, "")
    }
}
