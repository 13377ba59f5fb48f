//! File-backed state cells shared with the capture and presentation processes
//!
//! Every cell has exactly one writer. Writes go to a sibling temp file that is
//! renamed over the cell, so a reader in another process sees either the old
//! value or the new one, never a partial write.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::warn;

use super::AssistantState;

/// Errors reading or writing a state cell
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to access {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unexpected value in {}: {value:?}", path.display())]
    InvalidValue { path: PathBuf, value: String },
}

/// The status and microphone-gate cells
#[derive(Debug, Clone)]
pub struct StateStore {
    status_path: PathBuf,
    mic_path: PathBuf,
}

impl StateStore {
    pub fn new(status_path: PathBuf, mic_path: PathBuf) -> Self {
        Self {
            status_path,
            mic_path,
        }
    }

    pub fn write_status(&self, state: AssistantState) -> Result<(), StoreError> {
        write_cell(&self.status_path, &state.to_string())
    }

    pub fn read_status(&self) -> Result<Option<AssistantState>, StoreError> {
        let Some(value) = read_cell(&self.status_path)? else {
            return Ok(None);
        };

        value
            .parse()
            .map(Some)
            .map_err(|_| StoreError::InvalidValue {
                path: self.status_path.clone(),
                value,
            })
    }

    pub fn write_microphone(&self, open: bool) -> Result<(), StoreError> {
        write_cell(&self.mic_path, if open { "1" } else { "0" })
    }

    /// `None` when the cell has never been written
    pub fn read_microphone(&self) -> Result<Option<bool>, StoreError> {
        match read_cell(&self.mic_path)?.as_deref() {
            None => Ok(None),
            Some("1") => Ok(Some(true)),
            Some("0") => Ok(Some(false)),
            Some(other) => Err(StoreError::InvalidValue {
                path: self.mic_path.clone(),
                value: other.to_string(),
            }),
        }
    }

    /// Best-effort gate read: an unreadable or unset cell counts as open
    pub fn microphone_open(&self) -> bool {
        match self.read_microphone() {
            Ok(open) => open.unwrap_or(true),
            Err(e) => {
                warn!(error = %e, "microphone cell unreadable, assuming open");
                true
            }
        }
    }
}

/// Replace a cell's whole content
pub(crate) fn write_cell(path: &Path, value: &str) -> Result<(), StoreError> {
    let io_err = |source| StoreError::Io {
        path: path.to_owned(),
        source,
    };

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(io_err)?;
    }

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!(".{file_name}.tmp"));

    std::fs::write(&tmp, value).map_err(io_err)?;
    std::fs::rename(&tmp, path).map_err(io_err)
}

/// Read a cell, returning `None` when it is missing or blank
pub(crate) fn read_cell(path: &Path) -> Result<Option<String>, StoreError> {
    match std::fs::read_to_string(path) {
        Ok(content) => {
            let value = content.trim();
            Ok((!value.is_empty()).then(|| value.to_string()))
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(source) => Err(StoreError::Io {
            path: path.to_owned(),
            source,
        }),
    }
}
