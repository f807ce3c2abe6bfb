//! Per-sender filing state machine.
//!
//! Each sender is either idle (no folder declared yet) or collecting into a
//! declared folder. A non-empty text message (re)declares the folder and
//! resets the tally; images are filed under the current folder or discarded
//! when none is set. State is created lazily per sender and lives for the
//! process lifetime.

use crate::store::{sanitize_folder_name, ImageStore, StoreError};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Default)]
struct UserFilingState {
    current_folder: Option<String>,
    pending_count: u64,
}

/// Tally of the folder a sender was collecting into before a new directive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderTally {
    pub folder: String,
    pub images: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilingOutcome {
    /// A folder directive took effect; `previous` reports what the sender was
    /// collecting into before, if anything.
    FolderSet {
        folder: String,
        previous: Option<FolderTally>,
    },
    /// Whitespace-only text; nothing changed.
    Ignored,
    /// The directive had no usable characters after sanitization; the
    /// sender's prior folder, if any, stays in effect.
    Rejected,
    /// An image arrived before any folder directive and was dropped.
    Discarded,
    /// An image was persisted; `count` is the sender's tally for this folder.
    Saved {
        folder: String,
        path: PathBuf,
        count: u64,
    },
}

pub struct FilingEngine {
    store: Arc<ImageStore>,
    states: Mutex<HashMap<String, UserFilingState>>,
}

impl FilingEngine {
    pub fn new(store: Arc<ImageStore>) -> Self {
        Self {
            store,
            states: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<ImageStore> {
        &self.store
    }

    /// Apply a text message from `sender` as a folder directive. The stored
    /// and reported name is the sanitized one, so logs, the gallery, and the
    /// filesystem all agree.
    pub fn set_folder(&self, sender: &str, text: &str) -> FilingOutcome {
        if text.trim().is_empty() {
            return FilingOutcome::Ignored;
        }
        let Ok(folder) = sanitize_folder_name(text) else {
            return FilingOutcome::Rejected;
        };

        let mut states = self.states.lock();
        let state = states.entry(sender.to_string()).or_default();
        let prior_folder = state.current_folder.take();
        let previous = prior_folder.map(|folder| FolderTally {
            folder,
            images: state.pending_count,
        });
        state.current_folder = Some(folder.clone());
        state.pending_count = 0;

        FilingOutcome::FolderSet { folder, previous }
    }

    /// File an image from `sender` under their current folder, if any.
    pub async fn file_image(
        &self,
        sender: &str,
        bytes: &[u8],
    ) -> Result<FilingOutcome, StoreError> {
        // Snapshot the folder without holding the lock across the write.
        let folder = {
            let mut states = self.states.lock();
            states
                .entry(sender.to_string())
                .or_default()
                .current_folder
                .clone()
        };
        let Some(folder) = folder else {
            return Ok(FilingOutcome::Discarded);
        };

        let path = self.store.save(&folder, bytes).await?;

        let count = {
            let mut states = self.states.lock();
            let state = states.entry(sender.to_string()).or_default();
            state.pending_count += 1;
            state.pending_count
        };

        Ok(FilingOutcome::Saved {
            folder,
            path,
            count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine(root: &std::path::Path) -> FilingEngine {
        FilingEngine::new(Arc::new(ImageStore::new(root)))
    }

    #[tokio::test]
    async fn text_then_images_files_in_arrival_order() {
        let temp = tempfile::tempdir().unwrap();
        let engine = engine(temp.path());

        let set = engine.set_folder("u1", "trip2024");
        assert_eq!(
            set,
            FilingOutcome::FolderSet {
                folder: "trip2024".into(),
                previous: None
            }
        );

        let first = engine.file_image("u1", b"img-a").await.unwrap();
        let second = engine.file_image("u1", b"img-b").await.unwrap();

        assert!(temp.path().join("trip2024/image_1.jpg").exists());
        assert!(temp.path().join("trip2024/image_2.jpg").exists());
        match (first, second) {
            (
                FilingOutcome::Saved { count: 1, .. },
                FilingOutcome::Saved { count: 2, .. },
            ) => {}
            other => panic!("unexpected outcomes: {other:?}"),
        }
    }

    #[tokio::test]
    async fn image_before_any_directive_is_discarded() {
        let temp = tempfile::tempdir().unwrap();
        let engine = engine(temp.path());

        let outcome = engine.file_image("u1", b"img").await.unwrap();
        assert_eq!(outcome, FilingOutcome::Discarded);
        assert!(std::fs::read_dir(temp.path()).unwrap().next().is_none());
    }

    #[tokio::test]
    async fn new_directive_reports_previous_tally_and_resets_count() {
        let temp = tempfile::tempdir().unwrap();
        let engine = engine(temp.path());

        engine.set_folder("u1", "first");
        engine.file_image("u1", b"a").await.unwrap();
        engine.file_image("u1", b"b").await.unwrap();

        let outcome = engine.set_folder("u1", "second");
        assert_eq!(
            outcome,
            FilingOutcome::FolderSet {
                folder: "second".into(),
                previous: Some(FolderTally {
                    folder: "first".into(),
                    images: 2
                }),
            }
        );

        let saved = engine.file_image("u1", b"c").await.unwrap();
        match saved {
            FilingOutcome::Saved { folder, count, .. } => {
                assert_eq!(folder, "second");
                assert_eq!(count, 1);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn directive_text_is_trimmed_and_blank_text_is_ignored() {
        let temp = tempfile::tempdir().unwrap();
        let engine = engine(temp.path());

        match engine.set_folder("u1", "  padded  ") {
            FilingOutcome::FolderSet { folder, .. } => assert_eq!(folder, "padded"),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(engine.set_folder("u1", "   "), FilingOutcome::Ignored);

        // The blank message must not have cleared the folder.
        let saved = engine.file_image("u1", b"x").await.unwrap();
        assert!(matches!(saved, FilingOutcome::Saved { folder, .. } if folder == "padded"));
    }

    #[tokio::test]
    async fn unusable_directive_is_rejected_and_keeps_the_prior_folder() {
        let temp = tempfile::tempdir().unwrap();
        let engine = engine(temp.path());

        assert_eq!(engine.set_folder("u1", "///"), FilingOutcome::Rejected);
        let dropped = engine.file_image("u1", b"img").await.unwrap();
        assert_eq!(dropped, FilingOutcome::Discarded);

        engine.set_folder("u1", "kept");
        assert_eq!(engine.set_folder("u1", ".."), FilingOutcome::Rejected);
        let saved = engine.file_image("u1", b"img").await.unwrap();
        assert!(matches!(saved, FilingOutcome::Saved { folder, .. } if folder == "kept"));
    }

    #[tokio::test]
    async fn reported_folder_name_matches_the_directory_on_disk() {
        let temp = tempfile::tempdir().unwrap();
        let engine = engine(temp.path());

        match engine.set_folder("u1", "my/trip") {
            FilingOutcome::FolderSet { folder, .. } => assert_eq!(folder, "my_trip"),
            other => panic!("unexpected outcome: {other:?}"),
        }
        let saved = engine.file_image("u1", b"img").await.unwrap();
        match saved {
            FilingOutcome::Saved { folder, path, .. } => {
                assert_eq!(folder, "my_trip");
                assert!(path.ends_with("my_trip/image_1.jpg"));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn senders_do_not_share_state() {
        let temp = tempfile::tempdir().unwrap();
        let engine = engine(temp.path());

        engine.set_folder("u1", "mine");
        let other = engine.file_image("u2", b"img").await.unwrap();
        assert_eq!(other, FilingOutcome::Discarded);

        let mine = engine.file_image("u1", b"img").await.unwrap();
        assert!(matches!(mine, FilingOutcome::Saved { count: 1, .. }));
    }
}
