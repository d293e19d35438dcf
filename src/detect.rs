// SPDX-License-Identifier: MIT OR Apache-2.0

//! Multi-channel defect detection between the template and a registered
//! capture.
//!
//! Four independent difference signals are extracted: darker-than-template
//! on the equalized grayscale pair, and yellow/blue/red shifts on the LAB
//! chrominance channels. The dark signal additionally passes a
//! morphological-gradient test so smooth ambient shadows are rejected while
//! sharp-edged ink and material defects survive.

use crate::InspectError;
use crate::params::{DetectionParams, normalized_kernel_size};
use crate::utils::{ensure_size, to_gray};
use opencv::core::{AlgorithmHint, Mat, Point, Size, Vector};
use opencv::{core, imgproc, prelude::*};

// Equalization constants matching the tuned inspection setup: lighting is
// not perfectly repeatable between capture sessions, so both images are
// normalized with clip-limited tile-based histogram equalization.
const CLAHE_CLIP_LIMIT: f64 = 3.0;
const CLAHE_TILE_GRID: i32 = 4;
const BLUR_KERNEL_SIZE: i32 = 3;
/// Structuring element size for the shadow-suppression gradient.
const GRADIENT_KERNEL_SIZE: i32 = 5;

/// Output of [`detect_defects`]: the fused defect mask, the surviving
/// contours and the per-signal masks for diagnostic display.
pub struct DefectReport {
    /// Union of all cleaned signal masks, gated by the ROI mask.
    pub final_mask: Mat,
    /// External contours of `final_mask` with area >= `min_defect_area`.
    pub contours: Vector<Vector<Point>>,
    /// Gradient-filtered darker-than-template mask (pre-cleaning).
    pub dark_mask: Mat,
    /// Raw binarized yellow-shift mask (pre-cleaning).
    pub yellow_mask: Mat,
    /// Raw binarized blue-shift mask (pre-cleaning).
    pub blue_mask: Mat,
    /// Raw binarized red-shift mask (pre-cleaning).
    pub red_mask: Mat,
}

impl DefectReport {
    pub fn defect_count(&self) -> usize {
        self.contours.len()
    }
}

/// Compares `template` against the registered `aligned` image inside
/// `roi_mask` and returns the surviving defect contours.
///
/// The call is a pure function of its inputs: identical images, mask and
/// parameters yield a bit-identical `final_mask` and contour list. An empty
/// result is not an error; it means no defects were found.
///
/// # Errors
/// Fails with [`InspectError::SizeMismatch`] when `aligned` or `roi_mask`
/// does not share the template's dimensions, and with
/// [`InspectError::InvalidParams`] for out-of-domain parameter values.
pub fn detect_defects(
    template: &Mat,
    aligned: &Mat,
    roi_mask: &Mat,
    params: &DetectionParams,
) -> Result<DefectReport, InspectError> {
    params.validate()?;
    let size = template.size()?;
    ensure_size("aligned image", size, aligned.size()?)?;
    ensure_size("ROI mask", size, roi_mask.size()?)?;

    let start = std::time::Instant::now();

    let template_eq = equalized_gray(template)?;
    let aligned_eq = equalized_gray(aligned)?;
    let (template_a, template_b) = lab_channels(template)?;
    let (aligned_a, aligned_b) = lab_channels(aligned)?;

    // One-directional saturating differences, binarized per signal. Only one
    // shift direction matters per mask, so negative differences clamp to 0.
    let darker = diff_mask(&template_eq, &aligned_eq, params.dark_threshold)?;
    let yellow_mask = diff_mask(&aligned_b, &template_b, params.bright_threshold)?;
    let blue_mask = diff_mask(&template_b, &aligned_b, params.blue_threshold)?;
    let red_mask = diff_mask(&aligned_a, &template_a, params.red_threshold)?;

    let dark_mask = suppress_shadows(&darker, &aligned_eq, params.dark_gradient_threshold)?;

    let darker_clean = clean_mask(
        &dark_mask,
        params.dark_morph_kernel_size,
        params.dark_morph_iterations,
    )?;
    let yellow_clean = clean_mask(
        &yellow_mask,
        params.bright_morph_kernel_size,
        params.bright_morph_iterations,
    )?;
    let blue_clean = clean_mask(
        &blue_mask,
        params.bright_morph_kernel_size,
        params.bright_morph_iterations,
    )?;
    let red_clean = clean_mask(
        &red_mask,
        params.bright_morph_kernel_size,
        params.bright_morph_iterations,
    )?;

    let mut combined = Mat::default();
    core::bitwise_or(&darker_clean, &yellow_clean, &mut combined, &core::no_array())?;
    let mut with_blue = Mat::default();
    core::bitwise_or(&combined, &blue_clean, &mut with_blue, &core::no_array())?;
    let mut fused = Mat::default();
    core::bitwise_or(&with_blue, &red_clean, &mut fused, &core::no_array())?;

    // Defect signal outside the inspection area is discarded regardless of
    // its strength.
    let mut final_mask = Mat::default();
    core::bitwise_and(&fused, &fused, &mut final_mask, roi_mask)?;

    let mut all_contours = Vector::<Vector<Point>>::new();
    imgproc::find_contours(
        &final_mask,
        &mut all_contours,
        imgproc::RETR_EXTERNAL,
        imgproc::CHAIN_APPROX_SIMPLE,
        Point::default(),
    )?;

    let mut contours = Vector::<Vector<Point>>::new();
    for contour in all_contours.iter() {
        if imgproc::contour_area(&contour, false)? >= params.min_defect_area as f64 {
            contours.push(contour);
        }
    }

    log::debug!(
        "detect_defects found {} defect(s) in {:?}",
        contours.len(),
        start.elapsed()
    );

    Ok(DefectReport {
        final_mask,
        contours,
        dark_mask,
        yellow_mask,
        blue_mask,
        red_mask,
    })
}

/// Grayscale conversion, light blur against sensor noise, then clip-limited
/// local histogram equalization.
fn equalized_gray(img: &Mat) -> Result<Mat, InspectError> {
    let gray = to_gray(img)?;
    let mut blurred = Mat::default();
    imgproc::gaussian_blur_def(
        &gray,
        &mut blurred,
        Size::new(BLUR_KERNEL_SIZE, BLUR_KERNEL_SIZE),
        0.0,
    )?;
    let mut clahe = imgproc::create_clahe(
        CLAHE_CLIP_LIMIT,
        Size::new(CLAHE_TILE_GRID, CLAHE_TILE_GRID),
    )?;
    let mut equalized = Mat::default();
    clahe.apply(&blurred, &mut equalized)?;
    Ok(equalized)
}

/// The A (green-red) and B (blue-yellow) channels of the image in LAB space.
/// Color channels stay unequalized; equalization would distort the
/// directional color-difference semantics.
fn lab_channels(img: &Mat) -> Result<(Mat, Mat), InspectError> {
    let mut lab = Mat::default();
    imgproc::cvt_color(
        img,
        &mut lab,
        imgproc::COLOR_BGR2Lab,
        0,
        AlgorithmHint::ALGO_HINT_DEFAULT,
    )?;
    let mut a = Mat::default();
    let mut b = Mat::default();
    core::extract_channel(&lab, &mut a, 1)?;
    core::extract_channel(&lab, &mut b, 2)?;
    Ok((a, b))
}

/// Saturating `minuend - subtrahend`, binarized at `threshold`.
fn diff_mask(minuend: &Mat, subtrahend: &Mat, threshold: i32) -> Result<Mat, InspectError> {
    let mut diff = Mat::default();
    core::subtract(minuend, subtrahend, &mut diff, &core::no_array(), -1)?;
    let mut mask = Mat::default();
    imgproc::threshold(&diff, &mut mask, threshold as f64, 255.0, imgproc::THRESH_BINARY)?;
    Ok(mask)
}

/// Keeps only dark pixels whose neighbourhood shows a strong local intensity
/// transition. True ink/material defects have sharp edges; ambient shadows
/// are smooth gradients and fail the test.
fn suppress_shadows(
    darker_mask: &Mat,
    aligned_eq: &Mat,
    gradient_threshold: i32,
) -> Result<Mat, InspectError> {
    let kernel = ones_kernel(GRADIENT_KERNEL_SIZE)?;
    let mut gradient = Mat::default();
    imgproc::morphology_ex(
        aligned_eq,
        &mut gradient,
        imgproc::MORPH_GRADIENT,
        &kernel,
        Point::new(-1, -1),
        1,
        core::BORDER_CONSTANT,
        imgproc::morphology_default_border_value()?,
    )?;
    let mut gradient_mask = Mat::default();
    imgproc::threshold(
        &gradient,
        &mut gradient_mask,
        gradient_threshold as f64,
        255.0,
        imgproc::THRESH_BINARY,
    )?;
    let mut filtered = Mat::default();
    core::bitwise_and(darker_mask, &gradient_mask, &mut filtered, &core::no_array())?;
    Ok(filtered)
}

/// Opening (speckle removal) then closing (gap filling) with a square kernel
/// of the normalized size.
fn clean_mask(mask: &Mat, kernel_size: i32, iterations: i32) -> Result<Mat, InspectError> {
    let kernel = ones_kernel(normalized_kernel_size(kernel_size))?;
    let mut opened = Mat::default();
    imgproc::morphology_ex(
        mask,
        &mut opened,
        imgproc::MORPH_OPEN,
        &kernel,
        Point::new(-1, -1),
        iterations,
        core::BORDER_CONSTANT,
        imgproc::morphology_default_border_value()?,
    )?;
    let mut closed = Mat::default();
    imgproc::morphology_ex(
        &opened,
        &mut closed,
        imgproc::MORPH_CLOSE,
        &kernel,
        Point::new(-1, -1),
        iterations,
        core::BORDER_CONSTANT,
        imgproc::morphology_default_border_value()?,
    )?;
    Ok(closed)
}

fn ones_kernel(size: i32) -> Result<Mat, InspectError> {
    Ok(Mat::ones(size, size, core::CV_8U)?.to_mat()?)
}
