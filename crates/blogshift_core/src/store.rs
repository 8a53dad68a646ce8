use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use anyhow::{Context, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tempfile::NamedTempFile;

use crate::metadata::MetadataMap;

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("failed to parse {}", path.display()))
}

/// Replace `path` with the pretty-printed JSON of `value` via a sibling temp
/// file and rename, so readers never observe a half-written file.
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let parent = parent_dir(path);
    fs::create_dir_all(&parent)
        .with_context(|| format!("failed to create parent directory {}", parent.display()))?;
    let mut rendered = serde_json::to_string_pretty(value)
        .with_context(|| format!("failed to serialize {}", path.display()))?;
    rendered.push('\n');

    let mut temp = NamedTempFile::new_in(&parent)
        .with_context(|| format!("failed to create temp file in {}", parent.display()))?;
    temp.write_all(rendered.as_bytes())
        .with_context(|| format!("failed to write temp file for {}", path.display()))?;
    temp.as_file()
        .sync_all()
        .with_context(|| format!("failed to sync temp file for {}", path.display()))?;
    temp.persist(path)
        .with_context(|| format!("failed to replace {}", path.display()))?;
    Ok(())
}

pub fn load_metadata(path: &Path) -> Result<MetadataMap> {
    if !path.exists() {
        anyhow::bail!(
            "{} does not exist; run `blogshift migrate` first",
            path.display()
        );
    }
    read_json(path)
}

fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Identifier to description cache persisted as one JSON object.
///
/// Entries are only ever added. Every insert rewrites the whole file atomically
/// while the map lock is held, so concurrent workers serialize their flushes
/// and a crash leaves the last completed flush on disk.
#[derive(Debug)]
pub struct DescriptionStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl DescriptionStore {
    /// Open the cache, creating an empty `{}` file when none exists.
    pub fn open(path: &Path) -> Result<Self> {
        let entries = if path.exists() {
            read_json(path)?
        } else {
            let empty = BTreeMap::new();
            write_json_atomic(path, &empty)?;
            empty
        };
        Ok(Self {
            path: path.to_path_buf(),
            entries: Mutex::new(entries),
        })
    }

    /// Read-only view of an existing cache; a missing file reads as empty.
    pub fn load_snapshot(path: &Path) -> Result<BTreeMap<String, String>> {
        if path.exists() {
            read_json(path)
        } else {
            Ok(BTreeMap::new())
        }
    }

    pub fn contains(&self, post_id: &str) -> bool {
        self.lock().contains_key(post_id)
    }

    /// Record a description and flush the whole cache. The in-memory map only
    /// changes once the flush has succeeded.
    pub fn insert(&self, post_id: &str, description: &str) -> Result<()> {
        let mut entries = self.lock();
        let mut updated = entries.clone();
        updated.insert(post_id.to_string(), description.to_string());
        write_json_atomic(&self.path, &updated)?;
        *entries = updated;
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, String>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
