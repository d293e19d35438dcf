// SPDX-License-Identifier: MIT OR Apache-2.0

//! Registration of a captured sheet photo onto the template's pixel grid.

use crate::InspectError;
use crate::params::AlignmentParams;
use crate::utils::to_gray;
use opencv::core::{DMatch, KeyPoint, Mat, Point2f, Scalar, Vector};
use opencv::features2d::{BFMatcher, ORB, ORB_ScoreType};
use opencv::{calib3d, core, imgproc, prelude::*};
use ordered_float::OrderedFloat;

/// A projective homography needs at least four point correspondences.
pub const MIN_GOOD_MATCHES: usize = 4;

/// Result of registering a captured image against the template.
pub struct Registration {
    /// The captured image warped into the template's coordinate frame,
    /// same width/height as the template. Areas with no corresponding
    /// source pixel are black.
    pub image: Mat,
    /// The 3x3 homography mapping captured-image points to template points.
    pub homography: Mat,
}

/// Aligns `captured` onto `template` using ORB keypoints and a RANSAC
/// homography.
///
/// Descriptors are matched one-to-one with a Hamming-distance brute-force
/// matcher with cross-check enabled, so only mutual nearest neighbours
/// survive; the best `good_match_percent` fraction (by descriptor distance)
/// is handed to the RANSAC estimator.
///
/// # Errors
/// Returns [`InspectError::InsufficientMatches`] when fewer than
/// [`MIN_GOOD_MATCHES`] good correspondences remain, or when the estimated
/// homography is degenerate. A caller may fall back to the raw captured
/// image for best-effort display, but must do so explicitly.
pub fn align(
    captured: &Mat,
    template: &Mat,
    params: &AlignmentParams,
) -> Result<Registration, InspectError> {
    params.validate()?;

    let template_gray = to_gray(template)?;
    let captured_gray = to_gray(captured)?;

    let (template_kp, template_des) = orb_detect_and_compute(&template_gray, params.max_features)?;
    let (captured_kp, captured_des) = orb_detect_and_compute(&captured_gray, params.max_features)?;

    // A blank or featureless frame yields no descriptors; OpenCV rejects
    // empty descriptor sets, so bail out before matching.
    if template_des.empty()
        || captured_des.empty()
        || template_kp.len() < MIN_GOOD_MATCHES
        || captured_kp.len() < MIN_GOOD_MATCHES
    {
        return Err(InspectError::InsufficientMatches {
            found: 0,
            needed: MIN_GOOD_MATCHES,
        });
    }

    let matcher = BFMatcher::create(core::NORM_HAMMING, true)?;
    let mut matches = Vector::<DMatch>::new();
    matcher.train_match(&template_des, &captured_des, &mut matches, &Mat::default())?;

    let mut matches = matches.to_vec();
    matches.sort_by(|a, b| OrderedFloat(a.distance).cmp(&OrderedFloat(b.distance)));
    let num_good = (matches.len() as f32 * params.good_match_percent).floor() as usize;
    matches.truncate(num_good);

    if matches.len() < MIN_GOOD_MATCHES {
        return Err(InspectError::InsufficientMatches {
            found: matches.len(),
            needed: MIN_GOOD_MATCHES,
        });
    }

    let mut template_pts: Vector<Point2f> = Vector::with_capacity(matches.len());
    let mut captured_pts: Vector<Point2f> = Vector::with_capacity(matches.len());
    for m in &matches {
        template_pts.push(template_kp.get(m.query_idx as usize)?.pt());
        captured_pts.push(captured_kp.get(m.train_idx as usize)?.pt());
    }

    let homography = calib3d::find_homography(
        &captured_pts,
        &template_pts,
        &mut Mat::default(),
        calib3d::RANSAC,
        params.ransac_reproj_threshold,
    )?;

    // RANSAC can fail to reach a usable consensus even with enough input
    // correspondences; an empty or near-singular matrix is unusable.
    if homography.empty()
        || homography.rows() != 3
        || homography.cols() != 3
        || core::determinant(&homography)?.abs() < 1e-6
    {
        return Err(InspectError::InsufficientMatches {
            found: matches.len(),
            needed: MIN_GOOD_MATCHES,
        });
    }

    let mut image = Mat::default();
    imgproc::warp_perspective(
        captured,
        &mut image,
        &homography,
        template_gray.size()?,
        imgproc::INTER_LINEAR,
        core::BORDER_CONSTANT,
        Scalar::default(),
    )?;

    log::debug!("registered captured image with {} good matches", matches.len());

    Ok(Registration { image, homography })
}

/// Detects up to `max_features` oriented keypoints with binary descriptors.
fn orb_detect_and_compute(
    img: &Mat,
    max_features: i32,
) -> Result<(Vector<KeyPoint>, Mat), InspectError> {
    let mut orb = ORB::create(
        max_features,
        1.2,
        8,
        31,
        0,
        2,
        ORB_ScoreType::HARRIS_SCORE,
        31,
        20,
    )?;
    let mut keypoints = Vector::<KeyPoint>::new();
    let mut descriptors = Mat::default();
    orb.detect_and_compute(img, &Mat::default(), &mut keypoints, &mut descriptors, false)?;
    Ok((keypoints, descriptors))
}
