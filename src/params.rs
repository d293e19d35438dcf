// SPDX-License-Identifier: MIT OR Apache-2.0

//! Tunable parameter bundles for registration and defect detection.
//!
//! Both structs are plain values passed into every core call; the JSON
//! load/save adapters below are the only place the files are touched, and a
//! save always rewrites the whole file so a parameter set is replaced
//! atomically rather than patched field by field.

use crate::InspectError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Parameters for keypoint matching and homography estimation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AlignmentParams {
    /// Maximum number of ORB keypoints detected per image.
    pub max_features: i32,

    /// Fraction of matches kept after sorting by descriptor distance,
    /// in (0, 1]. The count is floor-rounded.
    pub good_match_percent: f32,

    /// Reprojection threshold for RANSAC in `find_homography()`.
    /// A lower value makes RANSAC stricter (fewer matches kept), while a
    /// higher value is more lenient.
    #[serde(default = "default_ransac_reproj_threshold")]
    pub ransac_reproj_threshold: f64,
}

fn default_ransac_reproj_threshold() -> f64 {
    3.0
}

impl Default for AlignmentParams {
    fn default() -> Self {
        Self {
            max_features: 1000,
            good_match_percent: 0.2,
            ransac_reproj_threshold: default_ransac_reproj_threshold(),
        }
    }
}

impl AlignmentParams {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, InspectError> {
        let params: Self = serde_json::from_str(&fs::read_to_string(path)?)?;
        params.validate()?;
        Ok(params)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), InspectError> {
        self.validate()?;
        Ok(fs::write(path, serde_json::to_string_pretty(self)?)?)
    }

    pub fn validate(&self) -> Result<(), InspectError> {
        if self.max_features <= 0 {
            return Err(InspectError::InvalidParams(format!(
                "max_features must be positive, got {}",
                self.max_features
            )));
        }
        if !(self.good_match_percent > 0.0 && self.good_match_percent <= 1.0) {
            return Err(InspectError::InvalidParams(format!(
                "good_match_percent must be in (0, 1], got {}",
                self.good_match_percent
            )));
        }
        if self.ransac_reproj_threshold <= 0.0 {
            return Err(InspectError::InvalidParams(format!(
                "ransac_reproj_threshold must be positive, got {}",
                self.ransac_reproj_threshold
            )));
        }
        Ok(())
    }
}

/// Thresholds and morphology settings for the defect-detection pipeline.
///
/// All four thresholds live in `[0, 255]`. Kernel sizes are normalized to the
/// nearest odd value >= 1 before use ([`normalized_kernel_size`]); an even
/// size is a tolerated coercion, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectionParams {
    /// Darker-than-template threshold on the equalized grayscale difference.
    pub dark_threshold: i32,
    /// Yellow-shift threshold on the LAB B-channel difference.
    pub bright_threshold: i32,
    /// Blue-shift threshold on the LAB B-channel difference.
    pub blue_threshold: i32,
    /// Red-shift threshold on the LAB A-channel difference.
    pub red_threshold: i32,
    /// Square kernel size for cleaning the dark mask.
    pub dark_morph_kernel_size: i32,
    /// Opening/closing iterations for the dark mask.
    pub dark_morph_iterations: i32,
    /// Square kernel size shared by the three color masks.
    pub bright_morph_kernel_size: i32,
    /// Opening/closing iterations shared by the three color masks.
    pub bright_morph_iterations: i32,
    /// Minimum local morphological-gradient magnitude for a dark pixel to
    /// count as a defect rather than a shadow.
    pub dark_gradient_threshold: i32,
    /// Minimum contour area (px) for a defect to survive filtering.
    #[serde(rename = "detect_area")]
    pub min_defect_area: i32,
}

impl Default for DetectionParams {
    fn default() -> Self {
        Self {
            dark_threshold: 30,
            bright_threshold: 30,
            blue_threshold: 25,
            red_threshold: 25,
            dark_morph_kernel_size: 3,
            dark_morph_iterations: 1,
            bright_morph_kernel_size: 3,
            bright_morph_iterations: 1,
            dark_gradient_threshold: 10,
            min_defect_area: 1,
        }
    }
}

impl DetectionParams {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, InspectError> {
        let params: Self = serde_json::from_str(&fs::read_to_string(path)?)?;
        params.validate()?;
        Ok(params)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), InspectError> {
        self.validate()?;
        Ok(fs::write(path, serde_json::to_string_pretty(self)?)?)
    }

    pub fn validate(&self) -> Result<(), InspectError> {
        check_threshold("dark_threshold", self.dark_threshold)?;
        check_threshold("bright_threshold", self.bright_threshold)?;
        check_threshold("blue_threshold", self.blue_threshold)?;
        check_threshold("red_threshold", self.red_threshold)?;
        check_threshold("dark_gradient_threshold", self.dark_gradient_threshold)?;
        check_positive("dark_morph_kernel_size", self.dark_morph_kernel_size)?;
        check_positive("bright_morph_kernel_size", self.bright_morph_kernel_size)?;
        check_positive("dark_morph_iterations", self.dark_morph_iterations)?;
        check_positive("bright_morph_iterations", self.bright_morph_iterations)?;
        check_positive("detect_area", self.min_defect_area)?;
        Ok(())
    }
}

fn check_threshold(name: &str, value: i32) -> Result<(), InspectError> {
    if !(0..=255).contains(&value) {
        return Err(InspectError::InvalidParams(format!(
            "{name} must be in [0, 255], got {value}"
        )));
    }
    Ok(())
}

fn check_positive(name: &str, value: i32) -> Result<(), InspectError> {
    if value < 1 {
        return Err(InspectError::InvalidParams(format!(
            "{name} must be at least 1, got {value}"
        )));
    }
    Ok(())
}

/// Normalizes a morphology kernel size to the nearest odd value >= 1,
/// so a size of 4 behaves exactly like a size of 5.
pub fn normalized_kernel_size(size: i32) -> i32 {
    let size = if size % 2 == 0 { size + 1 } else { size };
    size.max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kernel_size_normalizes_to_odd() {
        assert_eq!(normalized_kernel_size(1), 1);
        assert_eq!(normalized_kernel_size(3), 3);
        assert_eq!(normalized_kernel_size(4), 5);
        assert_eq!(normalized_kernel_size(0), 1);
        assert_eq!(normalized_kernel_size(-2), 1);
    }

    #[test]
    fn alignment_params_load_without_ransac_field() {
        let params: AlignmentParams =
            serde_json::from_str(r#"{"max_features": 800, "good_match_percent": 0.15}"#).unwrap();
        assert_eq!(params.max_features, 800);
        assert_eq!(params.good_match_percent, 0.15);
        assert_eq!(params.ransac_reproj_threshold, 3.0);
    }

    #[test]
    fn alignment_params_reject_out_of_domain_values() {
        let bad = AlignmentParams {
            max_features: 0,
            ..Default::default()
        };
        assert!(matches!(
            bad.validate(),
            Err(InspectError::InvalidParams(_))
        ));

        let bad = AlignmentParams {
            good_match_percent: 1.5,
            ..Default::default()
        };
        assert!(bad.validate().is_err());

        let bad = AlignmentParams {
            good_match_percent: 0.0,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn detection_params_json_uses_detect_area_name() {
        let json = r#"{
            "dark_threshold": 30,
            "bright_threshold": 30,
            "blue_threshold": 25,
            "red_threshold": 25,
            "dark_morph_kernel_size": 3,
            "dark_morph_iterations": 1,
            "bright_morph_kernel_size": 3,
            "bright_morph_iterations": 1,
            "dark_gradient_threshold": 10,
            "detect_area": 12
        }"#;
        let params: DetectionParams = serde_json::from_str(json).unwrap();
        assert_eq!(params.min_defect_area, 12);

        let text = serde_json::to_string(&params).unwrap();
        assert!(text.contains("\"detect_area\":12"));
        let roundtrip: DetectionParams = serde_json::from_str(&text).unwrap();
        assert_eq!(roundtrip, params);
    }

    #[test]
    fn detection_params_reject_out_of_domain_values() {
        let bad = DetectionParams {
            dark_threshold: 256,
            ..Default::default()
        };
        assert!(bad.validate().is_err());

        let bad = DetectionParams {
            red_threshold: -1,
            ..Default::default()
        };
        assert!(bad.validate().is_err());

        let bad = DetectionParams {
            dark_morph_iterations: 0,
            ..Default::default()
        };
        assert!(bad.validate().is_err());

        let bad = DetectionParams {
            min_defect_area: 0,
            ..Default::default()
        };
        assert!(bad.validate().is_err());

        // An even kernel size is coerced, never rejected.
        let even = DetectionParams {
            dark_morph_kernel_size: 4,
            ..Default::default()
        };
        assert!(even.validate().is_ok());
    }

    #[test]
    fn params_save_and_load_roundtrip() {
        let dir = std::env::temp_dir().join("litoscan_params_test");
        std::fs::create_dir_all(&dir).unwrap();

        let path = dir.join("alignment.json");
        let params = AlignmentParams {
            max_features: 500,
            good_match_percent: 0.25,
            ransac_reproj_threshold: 5.0,
        };
        params.save(&path).unwrap();
        assert_eq!(AlignmentParams::load(&path).unwrap(), params);

        let path = dir.join("inspection.json");
        let params = DetectionParams {
            min_defect_area: 40,
            ..Default::default()
        };
        params.save(&path).unwrap();
        assert_eq!(DetectionParams::load(&path).unwrap(), params);
    }
}
