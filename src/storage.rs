use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

use crate::error::AssistantError;

/// Writes `contents` to a temporary file next to `path` and renames it into place,
/// so readers see either the previous file or the complete new one.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), AssistantError> {
    let dir = path.parent().ok_or_else(|| AssistantError::IoError {
        message: format!("{} has no parent directory", path.display()),
    })?;
    fs::create_dir_all(dir)?;

    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| AssistantError::IoError {
        message: format!("Failed to persist {}: {}", path.display(), e.error),
    })?;

    Ok(())
}

pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), AssistantError> {
    let mut bytes = serde_json::to_vec_pretty(value)?;
    bytes.push(b'\n');
    write_atomic(path, &bytes)
}

pub fn read_to_string_if_exists(path: &Path) -> Result<Option<String>, AssistantError> {
    match fs::read_to_string(path) {
        Ok(contents) => Ok(Some(contents)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Reads a JSON file, returning `None` when it does not exist.
pub fn read_json_if_exists<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, AssistantError> {
    let contents = match read_to_string_if_exists(path)? {
        Some(contents) => contents,
        None => return Ok(None),
    };

    serde_json::from_str(&contents)
        .map(Some)
        .map_err(|e| AssistantError::SnapshotParse {
            path: path.display().to_string(),
            message: e.to_string(),
        })
}

/// Reads a JSON file that a previous step must have produced.
pub fn read_required_json<T: DeserializeOwned>(path: &Path) -> Result<T, AssistantError> {
    read_json_if_exists(path)?.ok_or_else(|| AssistantError::MissingPrerequisite {
        path: path.display().to_string(),
    })
}
