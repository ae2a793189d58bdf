use std::time::Duration;

use crate::events::DisplayedImage;

/// Append-only record of the images shown this session.
#[derive(Debug, Default, Clone)]
pub struct HistoryLedger {
    entries: Vec<DisplayedImage>,
}

impl HistoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `image` with the time spent on it.
    pub fn append(&mut self, image: DisplayedImage, elapsed: Duration) {
        self.entries.push(image.retire(elapsed));
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn total(&self) -> Duration {
        self.entries
            .iter()
            .filter_map(DisplayedImage::elapsed_on_exit)
            .sum()
    }

    pub fn entries(&self) -> &[DisplayedImage] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
