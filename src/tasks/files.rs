use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc::{self, Sender};
use tracing::{debug, info, instrument, warn};
use walkdir::WalkDir;

use crate::events::{ImageRef, SessionCommand};
use crate::settings::{SettingsStore, Subscription};

/// Recursively collects image files under `root`.
///
/// Symlinks are followed, so a linked image is indexed under the link's name.
/// Unreadable subtrees and link loops contribute nothing and are only logged;
/// a missing or unreadable root yields an empty result. Order is unspecified.
#[instrument(skip(extensions), fields(root = %root.display()))]
pub fn scan(root: &Path, extensions: &[String]) -> Vec<ImageRef> {
    let mut found = Vec::new();
    let mut skipped = 0usize;
    for entry in WalkDir::new(root).follow_links(true) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                skipped += 1;
                warn!(path = ?err.path(), "skipping unreadable entry: {err}");
                continue;
            }
        };
        if !entry.file_type().is_file() || !is_image(entry.path(), extensions) {
            continue;
        }
        let Some(directory) = entry.path().parent() else {
            continue;
        };
        found.push(ImageRef {
            directory: directory.to_path_buf(),
            file_name: entry.file_name().to_os_string(),
        });
    }
    info!(discovered = found.len(), skipped, "directory scan complete");
    found
}

/// [`scan`] on the blocking pool.
pub async fn scan_async(root: PathBuf, extensions: Arc<[String]>) -> Vec<ImageRef> {
    let shown = root.display().to_string();
    match tokio::task::spawn_blocking(move || scan(&root, &extensions)).await {
        Ok(found) => found,
        Err(err) => {
            warn!(root = %shown, "scan task failed: {err}");
            Vec::new()
        }
    }
}

#[inline]
pub fn is_image(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(OsStr::to_str)
        .map(str::to_ascii_lowercase)
        .is_some_and(|ext| extensions.iter().any(|allowed| *allowed == ext))
}

/// Turns changes of the persisted directory into rescan commands.
///
/// Only reacts once settings are loaded and only when the directory actually
/// differs from the last one forwarded. Changes are queued without bound and
/// handed to `commands` in order by a forwarding task, so a busy controller
/// delays a rescan but never loses it. Must be called within a tokio runtime.
pub fn follow_last_directory(
    settings: &SettingsStore,
    commands: Sender<SessionCommand>,
) -> Subscription {
    let (changed_tx, mut changed_rx) = mpsc::unbounded_channel::<Option<PathBuf>>();
    tokio::spawn(async move {
        while let Some(dir) = changed_rx.recv().await {
            if commands
                .send(SessionCommand::DirectoryChanged(dir))
                .await
                .is_err()
            {
                debug!("controller gone; ignoring directory changes");
                break;
            }
        }
    });

    let last_seen: Mutex<Option<PathBuf>> = Mutex::new(None);
    settings.subscribe(move |snapshot| {
        if !snapshot.loaded {
            return;
        }
        let mut last = last_seen.lock().unwrap_or_else(PoisonError::into_inner);
        if *last == snapshot.last_opened_directory {
            return;
        }
        let dir = snapshot.last_opened_directory.clone();
        debug!(directory = ?dir, "last opened directory changed");
        match changed_tx.send(dir) {
            Ok(()) => last.clone_from(&snapshot.last_opened_directory),
            Err(_) => debug!("directory forwarder gone; change not delivered"),
        }
    })
}
