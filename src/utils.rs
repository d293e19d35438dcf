// SPDX-License-Identifier: MIT OR Apache-2.0

//! Image loading helpers and small Mat utilities shared by the pipeline.

use crate::InspectError;
use opencv::core::{AlgorithmHint, Mat, Point2f, Size, Vector};
use opencv::{imgcodecs, imgproc, prelude::*};
use std::path::Path;

/// Safe wrapper around OpenCV's `imread` with proper error handling.
///
/// This exists because:
/// 1. OpenCV's API requires a `&str` path rather than standard Rust `Path` types
/// 2. Paths might contain non-Unicode characters that need proper error handling
///
/// # Errors
/// Returns `InspectError::InvalidPathEncoding` if the path contains invalid
/// Unicode characters, and `InspectError::OpenCvError` for unreadable or
/// corrupted image data.
#[inline(always)]
pub fn imread<P: AsRef<Path>>(path: P, flags: i32) -> Result<Mat, InspectError> {
    let path_str = path
        .as_ref()
        .to_str()
        .ok_or_else(|| InspectError::InvalidPathEncoding(path.as_ref().to_path_buf()))?;
    Ok(imgcodecs::imread(path_str, flags)?)
}

/// Loads a color image, failing with `ImageLoad` when the file is missing or
/// not decodable (`imread` yields an empty Mat in that case).
pub fn load_image<P: AsRef<Path>>(path: P, role: &'static str) -> Result<Mat, InspectError> {
    let img = imread(&path, imgcodecs::IMREAD_COLOR)?;
    if img.empty() {
        return Err(InspectError::ImageLoad {
            role,
            path: path.as_ref().to_path_buf(),
        });
    }
    Ok(img)
}

/// Loads the single-channel region-of-interest mask and checks that it covers
/// exactly the template's pixel grid.
pub fn load_roi_mask<P: AsRef<Path>>(path: P, template_size: Size) -> Result<Mat, InspectError> {
    let mask = imread(&path, imgcodecs::IMREAD_GRAYSCALE)?;
    if mask.empty() {
        return Err(InspectError::ImageLoad {
            role: "ROI mask",
            path: path.as_ref().to_path_buf(),
        });
    }
    ensure_size("ROI mask", template_size, mask.size()?)?;
    Ok(mask)
}

pub(crate) fn ensure_size(
    role: &'static str,
    expected: Size,
    actual: Size,
) -> Result<(), InspectError> {
    if expected != actual {
        return Err(InspectError::SizeMismatch {
            role,
            expected: format!("{}x{}", expected.width, expected.height),
            actual: format!("{}x{}", actual.width, actual.height),
        });
    }
    Ok(())
}

/// Returns a grayscale view of `img`; single-channel input passes through.
pub(crate) fn to_gray(img: &Mat) -> Result<Mat, InspectError> {
    if img.channels() == 1 {
        return Ok(img.clone());
    }
    let mut gray = Mat::default();
    imgproc::cvt_color(
        img,
        &mut gray,
        imgproc::COLOR_BGR2GRAY,
        0,
        AlgorithmHint::ALGO_HINT_DEFAULT,
    )?;
    Ok(gray)
}

/// A q&d hack allowing `opencv::Vector<Point2f>` polygons to be `Sync`.
/// Only use this on immutable polygon vectors.
pub(crate) struct UnsafePolygonSyncWrapper(pub(crate) Vector<Point2f>);
unsafe impl Sync for UnsafePolygonSyncWrapper {}
