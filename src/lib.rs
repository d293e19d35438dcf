// SPDX-License-Identifier: MIT OR Apache-2.0

//! Visual inspection of litho-printed can sheets,
//! based on OpenCV <https://crates.io/crates/opencv>.
//!
//! A sheet carries a grid of printed cans ("latas"). The crate compares a
//! freshly captured photo of a sheet against a fixed reference template and
//! reports localized print defects per can:
//!
//! 1. [`align`] registers the captured image onto the template's pixel grid
//!    with ORB feature matching and a RANSAC homography.
//! 2. [`detect_defects`] compares template and registered image in equalized
//!    grayscale (darkening) and LAB color space (yellow/blue/red shifts),
//!    suppresses smooth shadows with a morphological-gradient criterion,
//!    cleans each signal mask with opening/closing, fuses the masks, gates
//!    them by a region-of-interest mask and extracts the surviving defect
//!    contours.
//! 3. [`attribute_defects`] maps each defect contour to the can polygon that
//!    contains its centroid, yielding a per-can defect list.
//!
//! Every stage is a pure function of its inputs and the parameter structs in
//! [`params`]; the pipeline holds no cross-invocation state. Persistence of
//! the parameter files is a plain load/save adapter invoked by the caller,
//! never by the pipeline itself.

pub mod align;
pub mod detect;
pub mod layout;
pub mod params;
pub mod utils;

pub use opencv;

use std::path::PathBuf;
use thiserror::Error;

pub use align::{Registration, align};
pub use detect::{DefectReport, detect_defects};
pub use layout::{Attribution, BaseShape, Placement, attribute_defects};
pub use params::{AlignmentParams, DetectionParams};

#[derive(Error, Debug)]
pub enum InspectError {
    #[error(transparent)]
    OpenCvError(#[from] opencv::Error),
    #[error(transparent)]
    IoError(#[from] std::io::Error),
    #[error(transparent)]
    JsonError(#[from] serde_json::Error),
    #[error("Invalid path encoding {0}")]
    InvalidPathEncoding(PathBuf),
    #[error("Could not load {role} image from {path}")]
    ImageLoad { role: &'static str, path: PathBuf },
    #[error("{role} dimensions {actual} do not match template dimensions {expected}")]
    SizeMismatch {
        role: &'static str,
        expected: String,
        actual: String,
    },
    #[error(
        "Insufficient feature matches for alignment: {found} good matches, at least {needed} required"
    )]
    InsufficientMatches { found: usize, needed: usize },
    #[error("Invalid parameter(s) {0}")]
    InvalidParams(String),
    #[error("Invalid layout data at line {line}: {reason}")]
    LayoutParse { line: usize, reason: String },
}

pub mod prelude {
    pub use super::{
        AlignmentParams, Attribution, BaseShape, DefectReport, DetectionParams, InspectError,
        Placement, Registration, align, attribute_defects, detect_defects,
    };
}
