//! Decoding of gallery photos, with EXIF orientation applied.

use image::{DynamicImage, ImageDecoder, ImageReader, RgbImage};
use image::metadata::Orientation;
use std::io::Cursor;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("image is empty")]
    Empty,
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("decode: {0}")]
    Decode(#[from] image::ImageError),
}

/// Decode encoded image bytes (JPEG, PNG, ...) into upright RGB.
///
/// The EXIF orientation tag, when present, is applied so that the face
/// detector sees the photo the way it was taken.
pub fn decode_upright(bytes: &[u8]) -> Result<RgbImage, GalleryError> {
    if bytes.is_empty() {
        return Err(GalleryError::Empty);
    }
    let mut decoder = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()?
        .into_decoder()?;
    let orientation = decoder.orientation().unwrap_or(Orientation::NoTransforms);
    let mut image = DynamicImage::from_decoder(decoder)?;
    if orientation != Orientation::NoTransforms {
        tracing::debug!(?orientation, "applying EXIF orientation");
        image.apply_orientation(orientation);
    }
    Ok(image.into_rgb8())
}
