use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::debug;

use crate::error::Error;
use crate::events::{DisplayedImage, ImageId, ImageRef};

/// Reads the bytes behind `source` into a displayable image.
pub async fn load(source: ImageRef, id: ImageId) -> Result<DisplayedImage, Error> {
    let path = source.path();
    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|source| Error::ImageRead {
            path: path.clone(),
            source,
        })?;
    let image = DisplayedImage::new(id, source, Arc::from(bytes));
    debug!(
        path = %path.display(),
        bytes = image.bytes.len(),
        format = ?image.format,
        "image loaded"
    );
    Ok(image)
}

/// Counts `steps` down to 1, calling `on_step` before each `step`-long pause.
pub async fn intermission<F>(steps: u8, step: Duration, mut on_step: F)
where
    F: FnMut(u8),
{
    for remaining in (1..=steps).rev() {
        on_step(remaining);
        sleep(step).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;
    use tokio::time::Instant;

    #[tokio::test]
    async fn load_reads_bytes_and_sniffs_format() {
        let tmp = tempdir().unwrap();
        // PNG signature is enough for format sniffing.
        let png = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0];
        fs::write(tmp.path().join("a.png"), png).unwrap();
        let source = ImageRef {
            directory: tmp.path().to_path_buf(),
            file_name: "a.png".into(),
        };

        let image = load(source.clone(), ImageId(9)).await.unwrap();
        assert_eq!(image.id, ImageId(9));
        assert_eq!(image.source, source);
        assert_eq!(&image.bytes[..], &png[..]);
        assert_eq!(image.format, Some(image::ImageFormat::Png));
        assert_eq!(image.elapsed_on_exit(), None);
    }

    #[tokio::test]
    async fn missing_file_is_an_error() {
        let tmp = tempdir().unwrap();
        let source = ImageRef {
            directory: tmp.path().to_path_buf(),
            file_name: "gone.jpg".into(),
        };
        let err = load(source, ImageId(1)).await.unwrap_err();
        assert!(matches!(err, Error::ImageRead { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn intermission_counts_down_one_step_at_a_time() {
        let start = Instant::now();
        let mut seen = Vec::new();
        intermission(3, Duration::from_secs(1), |n| {
            seen.push((n, start.elapsed().as_secs()))
        })
        .await;
        assert_eq!(seen, vec![(3, 0), (2, 1), (1, 2)]);
        assert_eq!(start.elapsed(), Duration::from_secs(3));
    }
}
