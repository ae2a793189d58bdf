use std::ffi::OsString;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use image::ImageFormat;

/// One discoverable image file, as produced by a directory scan.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageRef {
    pub directory: PathBuf,
    pub file_name: OsString,
}

impl ImageRef {
    pub fn path(&self) -> PathBuf {
        self.directory.join(&self.file_name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ImageId(pub u64);

/// An image that has been loaded for display.
#[derive(Debug, Clone)]
pub struct DisplayedImage {
    pub id: ImageId,
    pub source: ImageRef,
    pub bytes: Arc<[u8]>,
    /// Sniffed from the bytes; `None` when the format is not recognised.
    pub format: Option<ImageFormat>,
    pub shown_at: DateTime<Utc>,
    elapsed_on_exit: Option<Duration>,
}

impl DisplayedImage {
    pub fn new(id: ImageId, source: ImageRef, bytes: Arc<[u8]>) -> Self {
        let format = image::guess_format(&bytes).ok();
        Self {
            id,
            source,
            bytes,
            format,
            shown_at: Utc::now(),
            elapsed_on_exit: None,
        }
    }

    /// Time spent on this image, set once it has been replaced.
    pub fn elapsed_on_exit(&self) -> Option<Duration> {
        self.elapsed_on_exit
    }

    pub(crate) fn retire(mut self, elapsed: Duration) -> Self {
        debug_assert!(self.elapsed_on_exit.is_none(), "image retired twice");
        if self.elapsed_on_exit.is_none() {
            self.elapsed_on_exit = Some(elapsed);
        }
        self
    }
}

/// Commands accepted by the session controller.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionCommand {
    /// Result of the directory picker; `None` means the user cancelled.
    OpenDirectory(Option<PathBuf>),
    /// Emitted when the persisted directory changes; triggers a fresh scan.
    DirectoryChanged(Option<PathBuf>),
    Advance { skip: bool },
    ToggleAutoplay,
    TogglePlay,
    Play,
    Pause,
    ResetClock,
    ToggleView,
    ChangeDuration(Duration),
    ToggleMute,
    ClearHistory,
}
