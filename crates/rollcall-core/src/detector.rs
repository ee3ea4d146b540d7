//! Face detection seam.
//!
//! Detection itself is provided by the host platform; this module defines
//! the contract and the glue that turns a detection into a
//! [`ProcessedImage`].

use crate::types::{BoundingBox, ProcessedImage};
use image::imageops;
use image::RgbImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DetectionError {
    #[error("detection failed: {0}")]
    Failed(String),
}

/// A detected face: the crop fed to the embedder and where it came from.
#[derive(Debug, Clone)]
pub struct DetectedFace {
    pub crop: RgbImage,
    pub bounding_box: BoundingBox,
}

/// External face detector. Returns the primary face, if any.
pub trait FaceDetector: Send + Sync {
    fn detect(&self, image: &RgbImage) -> Result<Option<DetectedFace>, DetectionError>;
}

/// Treats the whole image as an already-cropped face.
///
/// Used for enrollment and recognition from pre-cropped portrait photos.
/// Images with a zero dimension yield no face.
#[derive(Debug, Clone, Copy, Default)]
pub struct WholeImageDetector;

impl FaceDetector for WholeImageDetector {
    fn detect(&self, image: &RgbImage) -> Result<Option<DetectedFace>, DetectionError> {
        let (w, h) = image.dimensions();
        if w == 0 || h == 0 {
            return Ok(None);
        }
        Ok(Some(DetectedFace {
            crop: image.clone(),
            bounding_box: BoundingBox {
                x: 0.0,
                y: 0.0,
                width: w as f32,
                height: h as f32,
                confidence: 1.0,
            },
        }))
    }
}

/// Crop `bbox` out of `image`, clamped to the image bounds.
///
/// Returns `None` when the clamped box is empty. Helper for detector
/// implementations that only report boxes.
pub fn crop_face(image: &RgbImage, bbox: &BoundingBox) -> Option<RgbImage> {
    let (w, h) = image.dimensions();
    let x0 = bbox.x.max(0.0).floor() as u32;
    let y0 = bbox.y.max(0.0).floor() as u32;
    let x1 = ((bbox.x + bbox.width).ceil().max(0.0) as u32).min(w);
    let y1 = ((bbox.y + bbox.height).ceil().max(0.0) as u32).min(h);
    if x0 >= x1 || y0 >= y1 {
        return None;
    }
    Some(imageops::crop_imm(image, x0, y0, x1 - x0, y1 - y0).to_image())
}

/// Run `detector` over `image` and package the result.
pub fn process_image(
    image: RgbImage,
    detector: &dyn FaceDetector,
) -> Result<ProcessedImage, DetectionError> {
    let face = detector.detect(&image)?;
    Ok(ProcessedImage::new(image, face))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn make_bbox(x: f32, y: f32, w: f32, h: f32) -> BoundingBox {
        BoundingBox {
            x,
            y,
            width: w,
            height: h,
            confidence: 0.9,
        }
    }

    #[test]
    fn test_whole_image_detector() {
        let img = RgbImage::from_pixel(30, 40, Rgb([1, 2, 3]));
        let face = WholeImageDetector.detect(&img).unwrap().unwrap();
        assert_eq!(face.crop.dimensions(), (30, 40));
        assert_eq!(face.bounding_box.height, 40.0);
    }

    #[test]
    fn test_whole_image_detector_empty_image() {
        assert!(WholeImageDetector.detect(&RgbImage::new(0, 0)).unwrap().is_none());
    }

    #[test]
    fn test_crop_face_inside() {
        let mut img = RgbImage::new(20, 20);
        img.put_pixel(5, 6, Rgb([255, 0, 0]));
        let crop = crop_face(&img, &make_bbox(5.0, 6.0, 4.0, 3.0)).unwrap();
        assert_eq!(crop.dimensions(), (4, 3));
        assert_eq!(crop.get_pixel(0, 0), &Rgb([255, 0, 0]));
    }

    #[test]
    fn test_crop_face_clamped_to_bounds() {
        let img = RgbImage::new(20, 20);
        let crop = crop_face(&img, &make_bbox(-5.0, 15.0, 10.0, 10.0)).unwrap();
        assert_eq!(crop.dimensions(), (5, 5));
    }

    #[test]
    fn test_crop_face_outside() {
        let img = RgbImage::new(20, 20);
        assert!(crop_face(&img, &make_bbox(30.0, 30.0, 5.0, 5.0)).is_none());
    }

    #[test]
    fn test_process_image_without_face() {
        struct NoFace;
        impl FaceDetector for NoFace {
            fn detect(&self, _: &RgbImage) -> Result<Option<DetectedFace>, DetectionError> {
                Ok(None)
            }
        }
        let processed = process_image(RgbImage::new(8, 8), &NoFace).unwrap();
        assert!(!processed.has_face());
        assert_eq!(processed.original().dimensions(), (8, 8));
    }
}
