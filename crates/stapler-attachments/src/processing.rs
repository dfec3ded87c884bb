//! Image processing
//!
//! Styles with a dimension spec are rendered by an [`ImageProcessor`]; the
//! engine only asks it to process uploads it [`accepts`](ImageProcessor::accepts).

use std::path::Path;

use async_trait::async_trait;
use thiserror::Error;

use crate::model::DimensionSpec;

/// Image processing errors
#[derive(Debug, Error)]
pub enum ProcessingError {
    #[error("Failed to decode image: {0}")]
    Decode(String),
    #[error("Failed to encode image: {0}")]
    Encode(String),
    #[error("Invalid dimensions: {0:?}")]
    InvalidDimensions(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Processing task failed: {0}")]
    Join(String),
}

/// Renders one style of an image upload
#[async_trait]
pub trait ImageProcessor: Send + Sync {
    /// Whether the file starting with `head` is an image this processor handles
    fn accepts(&self, head: &[u8]) -> bool;

    /// Render `source` at `spec` into `target`, leaving `source` untouched
    async fn process(
        &self,
        source: &Path,
        target: &Path,
        spec: &DimensionSpec,
    ) -> Result<(), ProcessingError>;
}

/// Number of leading bytes needed to recognise an image format
pub const SNIFF_LEN: usize = 16;

#[cfg(feature = "image")]
pub use resizer::ImageResizer;

#[cfg(feature = "image")]
mod resizer {
    use std::path::{Path, PathBuf};

    use async_trait::async_trait;
    use image::imageops::FilterType;
    use image::{DynamicImage, ImageFormat, ImageReader};
    use tracing::{debug, instrument};

    use super::{ImageProcessor, ProcessingError};
    use crate::model::DimensionSpec;

    /// Resizer backed by the `image` crate; handles JPEG, PNG and GIF
    #[derive(Debug, Clone)]
    pub struct ImageResizer {
        filter: FilterType,
    }

    impl Default for ImageResizer {
        fn default() -> Self {
            Self {
                filter: FilterType::Lanczos3,
            }
        }
    }

    impl ImageResizer {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_filter(mut self, filter: FilterType) -> Self {
            self.filter = filter;
            self
        }

        fn render(
            source: &Path,
            target: &Path,
            spec: DimensionSpec,
            filter: FilterType,
        ) -> Result<(), ProcessingError> {
            let reader = ImageReader::open(source)?
                .with_guessed_format()
                .map_err(ProcessingError::Io)?;
            let source_format = reader.format();
            let img = reader
                .decode()
                .map_err(|e| ProcessingError::Decode(e.to_string()))?;

            let resized = match spec {
                DimensionSpec::Original => img,
                DimensionSpec::Width(w) => img.resize(w, u32::MAX, filter),
                DimensionSpec::Height(h) => img.resize(u32::MAX, h, filter),
                DimensionSpec::Auto(w, h) => img.resize(w, h, filter),
                DimensionSpec::Crop(w, h) => img.resize_to_fill(w, h, filter),
                DimensionSpec::Exact(w, h) => img.resize_exact(w, h, filter),
            };

            let format = ImageFormat::from_path(target)
                .ok()
                .or(source_format)
                .ok_or_else(|| {
                    ProcessingError::Encode(format!("unknown output format for {}", target.display()))
                })?;

            // JPEG has no alpha channel
            let resized = if format == ImageFormat::Jpeg {
                DynamicImage::ImageRgb8(resized.to_rgb8())
            } else {
                resized
            };

            resized
                .save_with_format(target, format)
                .map_err(|e| ProcessingError::Encode(e.to_string()))
        }
    }

    #[async_trait]
    impl ImageProcessor for ImageResizer {
        fn accepts(&self, head: &[u8]) -> bool {
            matches!(
                image::guess_format(head),
                Ok(ImageFormat::Jpeg | ImageFormat::Png | ImageFormat::Gif)
            )
        }

        #[instrument(skip(self, spec), fields(spec = %spec))]
        async fn process(
            &self,
            source: &Path,
            target: &Path,
            spec: &DimensionSpec,
        ) -> Result<(), ProcessingError> {
            let source: PathBuf = source.to_path_buf();
            let target_path: PathBuf = target.to_path_buf();
            let spec = *spec;
            let filter = self.filter;

            tokio::task::spawn_blocking(move || Self::render(&source, &target_path, spec, filter))
                .await
                .map_err(|e| ProcessingError::Join(e.to_string()))??;

            debug!(target = ?target, "Style rendered");
            Ok(())
        }
    }

}
