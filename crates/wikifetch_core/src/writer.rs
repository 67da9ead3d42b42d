use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WriteOutcome {
    pub path: PathBuf,
    pub changed: bool,
    pub bytes: usize,
    pub hash: String,
}

/// Pretty JSON with a trailing newline. Field order comes from the struct
/// definitions, so equal values always produce equal bytes.
pub fn serialize_artifact<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    let mut bytes =
        serde_json::to_vec_pretty(value).context("failed to serialize artifact to JSON")?;
    bytes.push(b'\n');
    Ok(bytes)
}

/// Serialize `value` and write it to `path` unless the file already holds
/// identical content.
pub fn write_if_changed<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<WriteOutcome> {
    let bytes = serialize_artifact(value)?;
    write_bytes_if_changed(path, &bytes)
}

pub fn write_bytes_if_changed(path: &Path, bytes: &[u8]) -> Result<WriteOutcome> {
    ensure_parent_dir(path)?;
    let hash = content_hash(bytes);

    let changed = match fs::read(path) {
        Ok(existing) => content_hash(&existing) != hash,
        Err(error) if error.kind() == ErrorKind::NotFound => true,
        Err(error) => {
            warn!(path = %path.display(), "failed to read existing artifact, rewriting: {error}");
            true
        }
    };

    if changed {
        write_atomically(path, bytes)?;
        debug!(path = %path.display(), bytes = bytes.len(), "artifact written");
    } else {
        debug!(path = %path.display(), "artifact unchanged");
    }

    Ok(WriteOutcome {
        path: path.to_path_buf(),
        changed,
        bytes: bytes.len(),
        hash,
    })
}

pub fn content_hash(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut output = String::with_capacity(64);
    for byte in digest.iter() {
        output.push_str(&format!("{byte:02x}"));
    }
    output
}

fn write_atomically(path: &Path, bytes: &[u8]) -> Result<()> {
    let temp_path = temp_sibling(path);
    fs::write(&temp_path, bytes)
        .with_context(|| format!("failed to write {}", temp_path.display()))?;
    if let Err(error) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(error).with_context(|| format!("failed to replace {}", path.display()));
    }
    Ok(())
}

fn temp_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "artifact".to_string());
    path.with_file_name(format!(".{name}.tmp"))
}

fn ensure_parent_dir(path: &Path) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("path has no parent: {}", path.display()))?;
    fs::create_dir_all(parent)
        .with_context(|| format!("failed to create parent directory {}", parent.display()))
}
