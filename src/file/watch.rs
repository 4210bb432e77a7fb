//! Best-effort invalidation on external edits.
//!
//! The data directory is watched for filesystem change notifications; when a
//! known collection file changes on disk (for example because an operator
//! edited it with another tool), the matching cache entry is dropped so the
//! next read picks up the external content.
//!
//! The watch callback runs on notify's own thread and only forwards events
//! into a channel; a tokio task consumes the channel and performs the
//! invalidation, so the watcher never touches collection state directly. If
//! the platform cannot establish a watch the backend proceeds unwatched —
//! correctness is unaffected, reads are just potentially stale until the next
//! write-triggered invalidation.

use std::path::{Path, PathBuf};

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::{cache::CollectionCache, Collection};

/// Holds the live watcher and its consumer task. Dropping stops both.
pub(crate) struct DirWatcher {
    _watcher: RecommendedWatcher,
    task: tokio::task::JoinHandle<()>,
}

impl DirWatcher {
    /// Watch `data_dir`, invalidating `cache` entries for changed collection
    /// files. Returns `None` (after logging) when the watch cannot be
    /// established.
    pub(crate) fn spawn(data_dir: &Path, cache: CollectionCache) -> Option<Self> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Vec<PathBuf>>();

        let mut watcher = match notify::recommended_watcher(
            move |res: Result<notify::Event, notify::Error>| match res {
                Ok(event) => {
                    let _ = tx.send(event.paths);
                }
                Err(err) => warn!("file watch event error: {err}"),
            },
        ) {
            Ok(w) => w,
            Err(err) => {
                warn!("file watch unavailable, proceeding unwatched: {err}");
                return None;
            }
        };

        if let Err(err) = watcher.watch(data_dir, RecursiveMode::NonRecursive) {
            warn!(
                dir = %data_dir.display(),
                "failed to watch data directory, proceeding unwatched: {err}"
            );
            return None;
        }

        let task = tokio::spawn(async move {
            while let Some(paths) = rx.recv().await {
                for path in paths {
                    let Some(collection) = collection_for_path(&path) else {
                        continue;
                    };
                    debug!(file = %path.display(), "collection file changed, invalidating cache");
                    cache.invalidate(collection);
                }
            }
        });

        Some(Self {
            _watcher: watcher,
            task,
        })
    }
}

impl Drop for DirWatcher {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Map a changed path to its collection. Temp siblings and unknown files are
/// ignored.
fn collection_for_path(path: &Path) -> Option<Collection> {
    let name = path.file_name()?.to_str()?;
    Collection::ALL
        .iter()
        .copied()
        .find(|c| c.file_name() == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collection_for_path() {
        assert_eq!(
            collection_for_path(Path::new("/data/users.json")),
            Some(Collection::Users)
        );
        assert_eq!(
            collection_for_path(Path::new("/data/chat.json")),
            Some(Collection::Chat)
        );
        assert_eq!(collection_for_path(Path::new("/data/users.json.tmp")), None);
        assert_eq!(collection_for_path(Path::new("/data/unrelated.txt")), None);
    }
}
