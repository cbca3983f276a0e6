//! Transcript persistence: one pretty-printed JSON file per history key.
//!
//! Single-user store with no locking. Writes go to a temporary sibling and are renamed
//! into place so a crash mid-write leaves the previous file intact.

use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::session::{Message, Transcript};

/// Key used when all models share one transcript.
pub const GLOBAL_KEY: &str = "global";

/// Key used when no model is selected.
pub const DEFAULT_KEY: &str = "default";

/// Subdirectory holding transcripts set aside by "new session".
const ARCHIVE_DIR: &str = "archive";

/// Which transcript file applies: `global`, or the sanitized model name.
///
/// Sanitizing is lossy: `llama3:8b` and `llama3_8b` map to the same key, and a model
/// literally named `global` shares the global transcript.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HistoryKey(String);

impl HistoryKey {
    pub fn new(model: Option<&str>, global: bool) -> Self {
        if global {
            return HistoryKey(GLOBAL_KEY.to_string());
        }
        let model = model.map(str::trim).filter(|m| !m.is_empty());
        match model {
            Some(m) => HistoryKey(sanitize(m)),
            None => HistoryKey(DEFAULT_KEY.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn file_name(&self) -> String {
        format!("{}.json", self.0)
    }
}

impl fmt::Display for HistoryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Replace characters that are unsafe in file names.
fn sanitize(model: &str) -> String {
    model
        .chars()
        .map(|c| match c {
            ':' | '/' | '\\' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect()
}

#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("serializing transcript: {0}")]
    Serialize(#[from] serde_json::Error),
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> HistoryError + '_ {
    move |source| HistoryError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Directory of per-key transcript files.
#[derive(Debug, Clone)]
pub struct HistoryStore {
    dir: PathBuf,
}

impl HistoryStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, key: &HistoryKey) -> PathBuf {
        self.dir.join(key.file_name())
    }

    /// Read the key's transcript. Missing, unreadable, or corrupt files give an empty transcript.
    pub fn load(&self, key: &HistoryKey) -> Transcript {
        let path = self.path(key);
        let s = match std::fs::read_to_string(&path) {
            Ok(s) => s,
            Err(e) if e.kind() == ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                log::warn!("reading history {}: {}", path.display(), e);
                return Vec::new();
            }
        };
        match serde_json::from_str::<Vec<Message>>(&s) {
            Ok(messages) => messages,
            Err(e) => {
                log::warn!("parsing history {}: {}", path.display(), e);
                Vec::new()
            }
        }
    }

    /// Overwrite the key's file with the full transcript.
    pub fn save(&self, key: &HistoryKey, transcript: &[Message]) -> Result<(), HistoryError> {
        std::fs::create_dir_all(&self.dir).map_err(io_err(&self.dir))?;
        let path = self.path(key);
        let tmp = self.dir.join(format!(".{}.tmp", key.file_name()));
        let json = serde_json::to_string_pretty(transcript)?;
        std::fs::write(&tmp, json).map_err(io_err(&tmp))?;
        std::fs::rename(&tmp, &path).map_err(io_err(&path))?;
        log::debug!("saved {} messages to {}", transcript.len(), path.display());
        Ok(())
    }

    /// Delete the key's file. A missing file is not an error.
    pub fn clear(&self, key: &HistoryKey) -> Result<(), HistoryError> {
        let path = self.path(key);
        match std::fs::remove_file(&path) {
            Ok(()) => {
                log::info!("removed history {}", path.display());
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_err(&path)(e)),
        }
    }

    /// Move the key's file to `archive/<key>-<timestamp>.json`. Returns the new path, or
    /// `None` if there was nothing to archive.
    pub fn archive(&self, key: &HistoryKey) -> Result<Option<PathBuf>, HistoryError> {
        let path = self.path(key);
        if !path.exists() {
            return Ok(None);
        }
        let archive_dir = self.dir.join(ARCHIVE_DIR);
        std::fs::create_dir_all(&archive_dir).map_err(io_err(&archive_dir))?;
        let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
        let mut target = archive_dir.join(format!("{}-{}.json", key.as_str(), stamp));
        let mut n = 1;
        while target.exists() {
            target = archive_dir.join(format!("{}-{}-{}.json", key.as_str(), stamp, n));
            n += 1;
        }
        std::fs::rename(&path, &target).map_err(io_err(&target))?;
        log::info!("archived history {} to {}", path.display(), target.display());
        Ok(Some(target))
    }
}
