//! Filesystem-backed image store.
//!
//! Images land under `<root>/<folder>/image_<N>.jpg`, numbered from 1 per
//! folder. Sequence numbers come from an in-memory per-folder counter seeded
//! from the highest number already on disk, so two images arriving close
//! together can never collide on a name the way a list-then-write scheme can.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use regex::Regex;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use thiserror::Error;

static STORED_IMAGE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^image_(\d+)\.jpg$").expect("valid pattern"));
static GALLERY_IMAGE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\.(jpg|jpeg|png|gif)$").expect("valid pattern"));

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("folder directive {0:?} contains no usable characters")]
    InvalidFolder(String),
    #[error("image store I/O failed at {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl StoreError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// One gallery folder as reported by `GET /api/images`.
#[derive(Debug, Clone, Serialize)]
pub struct FolderListing {
    pub folder: String,
    pub images: Vec<String>,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
}

pub struct ImageStore {
    root: PathBuf,
    /// Last sequence number handed out per (sanitized) folder name.
    counters: Mutex<HashMap<String, u64>>,
}

impl ImageStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            counters: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Persist `bytes` as the next numbered image of `folder`, returning the
    /// written path.
    pub async fn save(&self, folder: &str, bytes: &[u8]) -> Result<PathBuf, StoreError> {
        let folder = sanitize_folder_name(folder)?;
        let dir = self.root.join(&folder);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| StoreError::io(&dir, e))?;

        let seq = self.next_sequence(&folder, &dir).await?;
        let path = dir.join(format!("image_{seq}.jpg"));
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| StoreError::io(&path, e))?;
        Ok(path)
    }

    /// List gallery folders newest-first, excluding any directory without at
    /// least one qualifying image file.
    pub async fn list_folders(&self) -> Result<Vec<FolderListing>, StoreError> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| StoreError::io(&self.root, e))?;

        let mut listings = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.root)
            .await
            .map_err(|e| StoreError::io(&self.root, e))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StoreError::io(&self.root, e))?
        {
            let meta = entry.metadata().await.map_err(|e| StoreError::io(&entry.path(), e))?;
            if !meta.is_dir() {
                continue;
            }
            let images = list_folder_images(&entry.path()).await?;
            if images.is_empty() {
                continue;
            }
            // Creation time where the platform tracks it, else mtime.
            let created = meta
                .created()
                .or_else(|_| meta.modified())
                .map_err(|e| StoreError::io(&entry.path(), e))?;
            listings.push(FolderListing {
                folder: entry.file_name().to_string_lossy().into_owned(),
                images,
                created_at: DateTime::<Utc>::from(created),
            });
        }

        listings.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(listings)
    }

    /// Next sequence number for `folder`, seeding the counter from disk the
    /// first time the folder is seen in this process.
    async fn next_sequence(&self, folder: &str, dir: &Path) -> Result<u64, StoreError> {
        let cached = {
            let mut counters = self.counters.lock();
            counters.get_mut(folder).map(|n| {
                *n += 1;
                *n
            })
        };
        if let Some(n) = cached {
            return Ok(n);
        }

        let seeded = highest_sequence_on_disk(dir).await?;
        let mut counters = self.counters.lock();
        // Another task may have seeded concurrently; entry() keeps whichever
        // value landed first and both callers increment under the lock.
        let counter = counters.entry(folder.to_string()).or_insert(seeded);
        *counter += 1;
        Ok(*counter)
    }
}

/// Highest `image_<N>.jpg` number currently on disk, so a counter seeded here
/// never collides even when earlier files were deleted.
async fn highest_sequence_on_disk(dir: &Path) -> Result<u64, StoreError> {
    let mut max = 0u64;
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| StoreError::io(dir, e))?;
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| StoreError::io(dir, e))?
    {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if let Some(caps) = STORED_IMAGE_RE.captures(name) {
            if let Ok(n) = caps[1].parse::<u64>() {
                max = max.max(n);
            }
        }
    }
    Ok(max)
}

async fn list_folder_images(dir: &Path) -> Result<Vec<String>, StoreError> {
    let mut images = Vec::new();
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| StoreError::io(dir, e))?;
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| StoreError::io(dir, e))?
    {
        let name = entry.file_name().to_string_lossy().into_owned();
        if GALLERY_IMAGE_RE.is_match(&name) {
            images.push(name);
        }
    }
    images.sort();
    Ok(images)
}

/// Reduce a folder directive to a filesystem-safe name: path separators and
/// control characters become underscores, leading/trailing dots and spaces
/// are trimmed. A directive with nothing usable left is rejected.
pub fn sanitize_folder_name(raw: &str) -> Result<String, StoreError> {
    let mut out = String::with_capacity(raw.len().min(128));
    for ch in raw.trim().chars().take(128) {
        if ch.is_alphanumeric() || matches!(ch, ' ' | '.' | '_' | '-') {
            out.push(ch);
        } else {
            out.push('_');
        }
    }
    let trimmed = out.trim_matches(|c: char| c == '.' || c.is_whitespace());
    if trimmed.is_empty() || trimmed.chars().all(|c| c == '_') {
        return Err(StoreError::InvalidFolder(raw.to_string()));
    }
    Ok(trimmed.to_string())
}
