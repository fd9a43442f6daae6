//! Saved sessions: one JSON document per file, metadata plus the inputs.

use std::cmp::Reverse;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::error::SessionError;
use crate::model::RestaurantInput;

pub const FORMAT_VERSION: &str = "1.0";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMetadata {
    pub session_name: String,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    pub version: String,
    #[serde(default)]
    pub description: String,
}

impl SessionMetadata {
    pub fn is_current_format(&self) -> bool {
        self.version == FORMAT_VERSION
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionDocument {
    pub metadata: SessionMetadata,
    pub inputs: RestaurantInput,
}

impl SessionDocument {
    pub fn new(inputs: RestaurantInput) -> Self {
        let now = Utc::now();
        Self {
            metadata: SessionMetadata {
                session_name: inputs.session_name.clone(),
                created_at: now,
                modified_at: now,
                version: FORMAT_VERSION.to_string(),
                description: format!("Session for a {} restaurant", inputs.restaurant_theme.as_str()),
            },
            inputs,
        }
    }
}

/// Listing entry: where a session lives and what it says about itself.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionEntry {
    pub path: PathBuf,
    pub metadata: SessionMetadata,
}

#[derive(Debug, Clone)]
pub struct SessionStore {
    dir: PathBuf,
}

impl SessionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Saves under a generated name (sanitized session name plus timestamp).
    pub fn save(&self, inputs: &RestaurantInput) -> Result<PathBuf, SessionError> {
        let file_name = format!(
            "{}_{}.json",
            sanitize_file_name(&inputs.session_name),
            Utc::now().format("%Y%m%d_%H%M%S_%3f")
        );
        self.save_as(inputs, &file_name)
    }

    /// Saves under `file_name` in the store directory, adding `.json` when
    /// missing. An existing file with that name is replaced.
    #[instrument(skip(self, inputs), fields(session = %inputs.session_name))]
    pub fn save_as(&self, inputs: &RestaurantInput, file_name: &str) -> Result<PathBuf, SessionError> {
        let mut name = file_name.to_string();
        if !name.to_ascii_lowercase().ends_with(".json") {
            name.push_str(".json");
        }
        self.ensure_dir()?;
        let path = self.dir.join(name);
        write_document(&path, &SessionDocument::new(inputs.clone()))?;
        debug!(path = %path.display(), "session saved");
        Ok(path)
    }

    /// Writes a session document to an arbitrary path, creating parents.
    pub fn export(&self, inputs: &RestaurantInput, path: &Path) -> Result<PathBuf, SessionError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| SessionError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        write_document(path, &SessionDocument::new(inputs.clone()))?;
        Ok(path.to_path_buf())
    }

    pub fn load(&self, path: &Path) -> Result<RestaurantInput, SessionError> {
        Ok(read_document(path)?.inputs)
    }

    /// Every readable session, newest modification first. Unreadable or
    /// corrupted files are skipped.
    #[instrument(skip(self), fields(dir = %self.dir.display()))]
    pub fn list(&self) -> Result<Vec<SessionEntry>, SessionError> {
        let mut entries = Vec::new();
        for path in self.session_files()? {
            match read_document(&path) {
                Ok(doc) => entries.push(SessionEntry {
                    path,
                    metadata: doc.metadata,
                }),
                Err(e) => warn!(error = %e, "skipping unreadable session file"),
            }
        }
        entries.sort_by_key(|e| Reverse(e.metadata.modified_at));
        Ok(entries)
    }

    /// Removes a session file; a file that is already gone is not an error.
    pub fn delete(&self, path: &Path) -> Result<(), SessionError> {
        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(SessionError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// Number of `.json` files in the store, readable or not.
    pub fn count(&self) -> Result<usize, SessionError> {
        Ok(self.session_files()?.len())
    }

    fn session_files(&self) -> Result<Vec<PathBuf>, SessionError> {
        let read_dir = match std::fs::read_dir(&self.dir) {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(SessionError::Io {
                    path: self.dir.clone(),
                    source,
                })
            }
        };
        Ok(read_dir
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|p| {
                p.is_file()
                    && p.extension()
                        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
            })
            .collect())
    }

    fn ensure_dir(&self) -> Result<(), SessionError> {
        std::fs::create_dir_all(&self.dir).map_err(|source| SessionError::Io {
            path: self.dir.clone(),
            source,
        })
    }
}

fn write_document(path: &Path, doc: &SessionDocument) -> Result<(), SessionError> {
    let json = serde_json::to_string_pretty(doc).map_err(|source| SessionError::Format {
        path: path.to_path_buf(),
        source,
    })?;
    std::fs::write(path, json).map_err(|source| SessionError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn read_document(path: &Path) -> Result<SessionDocument, SessionError> {
    let text = std::fs::read_to_string(path).map_err(|source| {
        if source.kind() == std::io::ErrorKind::NotFound {
            SessionError::NotFound(path.to_path_buf())
        } else {
            SessionError::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    })?;
    let doc: SessionDocument = serde_json::from_str(&text).map_err(|source| SessionError::Format {
        path: path.to_path_buf(),
        source,
    })?;
    if !doc.metadata.is_current_format() {
        warn!(
            path = %path.display(),
            version = %doc.metadata.version,
            expected = FORMAT_VERSION,
            "session written by a different format version"
        );
    }
    Ok(doc)
}

/// Replaces characters that are unsafe in file names and caps the length at
/// 50 characters. Blank names become `Session`.
pub fn sanitize_file_name(name: &str) -> String {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return "Session".to_string();
    }
    trimmed
        .chars()
        .map(|c| {
            if c.is_control() || crate::validate::FORBIDDEN_NAME_CHARS.contains(&c) {
                '_'
            } else {
                c
            }
        })
        .take(50)
        .collect()
}
