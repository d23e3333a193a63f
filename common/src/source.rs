//! The target bitmap, sampled as RGBA.

use crate::{Coordinate, Rgb};
use image::ImageError;
use std::{
    io,
    path::{Path, PathBuf},
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ImageLoadError {
    #[error("{} was not found", .0.display())]
    NotFound(PathBuf),
    #[error("failed to read {}", path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: ImageError,
    },
    #[error("expected {expected} samples for the image, got {actual}")]
    Dimensions { expected: usize, actual: usize },
}

/// Immutable RGBA grid. Samples with alpha 0 are transparent and never painted.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SourceImage {
    width: u32,
    height: u32,
    // layout: row-major, idx = x + y * width
    samples: Vec<[u8; 4]>,
}

impl SourceImage {
    pub fn from_rgba(width: u32, height: u32, samples: Vec<[u8; 4]>) -> Result<Self, ImageLoadError> {
        let expected = width as usize * height as usize;
        if samples.len() != expected {
            return Err(ImageLoadError::Dimensions {
                expected,
                actual: samples.len(),
            });
        }

        Ok(Self {
            width,
            height,
            samples,
        })
    }

    /// Decode any format the `image` crate understands.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ImageLoadError> {
        let path = path.as_ref();
        let image = image::open(path).map_err(|error| match error {
            ImageError::IoError(error) if error.kind() == io::ErrorKind::NotFound => {
                ImageLoadError::NotFound(path.to_path_buf())
            }
            source => ImageLoadError::Decode {
                path: path.to_path_buf(),
                source,
            },
        })?;

        let rgba = image.to_rgba8();
        let (width, height) = rgba.dimensions();
        let samples = rgba.pixels().map(|pixel| pixel.0).collect();

        Self::from_rgba(width, height, samples)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn sample(&self, at: Coordinate) -> Option<[u8; 4]> {
        if at.x < self.width && at.y < self.height {
            Some(self.samples[at.x as usize + at.y as usize * self.width as usize])
        } else {
            None
        }
    }

    /// Color at `at`, or `None` when the sample is transparent or outside the image.
    pub fn opaque(&self, at: Coordinate) -> Option<Rgb> {
        self.sample(at)
            .filter(|[_, _, _, alpha]| *alpha > 0)
            .map(|[r, g, b, _]| Rgb(r, g, b))
    }

    pub fn opaque_count(&self) -> usize {
        self.samples.iter().filter(|[_, _, _, alpha]| *alpha > 0).count()
    }

    /// Opaque pixels among the given coordinates.
    pub fn opaque_among<'a>(&self, coordinates: impl IntoIterator<Item = &'a Coordinate>) -> usize {
        coordinates
            .into_iter()
            .filter(|at| self.opaque(**at).is_some())
            .count()
    }
}
