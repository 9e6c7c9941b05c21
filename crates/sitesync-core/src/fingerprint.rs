//! Content fingerprinting of the local site tree
//!
//! Walks the source directory and produces one [`LocalFileEntry`] per regular
//! file. Digests depend only on file bytes, never on timestamps, permissions
//! or traversal order, so two walks of the same tree always agree.
//!
//! ## Symlinks
//!
//! Links are followed as long as their target resolves inside the source
//! directory. A link that escapes it, or a link cycle, is a configuration
//! error: publishing files from outside the declared directory is never
//! intended.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::{Component, Path, PathBuf};

use crate::error::{Error, Result};

/// Fallback content type for unknown extensions
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// A BLAKE3-256 content digest
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Digest([u8; 32]);

impl Digest {
    /// Hash arbitrary bytes
    #[must_use]
    pub fn of_bytes(data: &[u8]) -> Self {
        Self(*blake3::hash(data).as_bytes())
    }

    /// Hash a file by streaming its contents
    pub fn of_file(path: &Path) -> Result<Self> {
        let mut file = File::open(path).map_err(|e| Error::io(path, e))?;
        let mut hasher = blake3::Hasher::new();
        let mut buffer = [0u8; 64 * 1024];

        loop {
            let read = file.read(&mut buffer).map_err(|e| Error::io(path, e))?;
            if read == 0 {
                break;
            }
            hasher.update(&buffer[..read]);
        }

        Ok(Self(*hasher.finalize().as_bytes()))
    }

    /// Convert to hex string
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse a hex string
    pub fn from_hex(s: &str) -> Result<Self> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s, &mut bytes)
            .map_err(|e| Error::Other(format!("Invalid digest '{}': {}", s, e)))?;
        Ok(Self(bytes))
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex = self.to_hex();
        write!(f, "Digest({})", &hex[..16])
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for Digest {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Digest::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// One local file, keyed by its path relative to the source directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFileEntry {
    /// Relative path with forward-slash separators
    pub relative_key: String,
    /// Content digest
    pub content_hash: Digest,
    /// File size in bytes
    pub size_bytes: u64,
    /// MIME type inferred from the extension
    pub content_type: String,
    /// Where the bytes are read from at upload time
    pub source_path: PathBuf,
}

/// Local tree, keyed by relative key
pub type LocalTree = BTreeMap<String, LocalFileEntry>;

/// Infer a content type from a key's extension
pub fn content_type_for(key: &str) -> String {
    mime_guess::from_path(key)
        .first_raw()
        .unwrap_or(DEFAULT_CONTENT_TYPE)
        .to_string()
}

/// Fingerprint every regular file under `root` matching one of `included`
///
/// Blocking: callers on an async runtime should run it via
/// `tokio::task::spawn_blocking`. Any unreadable file aborts the whole walk.
pub fn fingerprint_directory(root: &Path, included: &[String]) -> Result<LocalTree> {
    let patterns = included
        .iter()
        .map(|p| {
            glob::Pattern::new(p)
                .map_err(|e| Error::config(format!("Invalid includedFiles pattern '{}': {}", p, e)))
        })
        .collect::<Result<Vec<_>>>()?;

    let canonical_root = root.canonicalize().map_err(|e| {
        Error::config(format!(
            "staticDirectory cannot be resolved: {}: {}",
            root.display(),
            e
        ))
    })?;

    let mut tree = LocalTree::new();

    for entry in walkdir::WalkDir::new(&canonical_root).follow_links(true) {
        let entry = entry.map_err(|e| {
            if e.loop_ancestor().is_some() {
                return Error::config(format!(
                    "Symlink cycle under staticDirectory: {}",
                    e.path().map(|p| p.display().to_string()).unwrap_or_default()
                ));
            }
            let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| canonical_root.clone());
            match e.into_io_error() {
                Some(io) => Error::io(path, io),
                None => Error::Other(format!("Failed to walk {}", path.display())),
            }
        })?;

        if entry.path_is_symlink() {
            let target = entry
                .path()
                .canonicalize()
                .map_err(|e| Error::io(entry.path(), e))?;
            if !target.starts_with(&canonical_root) {
                return Err(Error::config(format!(
                    "Symlink escapes staticDirectory: {} -> {}",
                    entry.path().display(),
                    target.display()
                )));
            }
        }

        if !entry.file_type().is_file() {
            continue;
        }

        let relative = entry
            .path()
            .strip_prefix(&canonical_root)
            .map_err(|e| Error::Other(format!("Failed to derive key: {}", e)))?;
        let key = relative_key(relative)?;

        if !patterns.iter().any(|p| p.matches(&key)) {
            tracing::trace!("Skipping {} (not included)", key);
            continue;
        }

        let content_hash = Digest::of_file(entry.path())?;
        let size_bytes = entry
            .metadata()
            .map_err(|e| match e.into_io_error() {
                Some(io) => Error::io(entry.path(), io),
                None => Error::Other(format!("Failed to stat {}", entry.path().display())),
            })?
            .len();

        tree.insert(
            key.clone(),
            LocalFileEntry {
                content_type: content_type_for(&key),
                relative_key: key,
                content_hash,
                size_bytes,
                source_path: entry.path().to_path_buf(),
            },
        );
    }

    tracing::debug!(
        "Fingerprinted {} file(s) under {}",
        tree.len(),
        root.display()
    );
    Ok(tree)
}

/// Join path components with forward slashes
fn relative_key(relative: &Path) -> Result<String> {
    let mut segments = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(segment) => {
                let segment = segment.to_str().ok_or_else(|| {
                    Error::config(format!(
                        "File name is not valid UTF-8: {}",
                        relative.display()
                    ))
                })?;
                segments.push(segment);
            }
            _ => {
                return Err(Error::config(format!(
                    "Unexpected path component in {}",
                    relative.display()
                )));
            }
        }
    }
    Ok(segments.join("/"))
}
