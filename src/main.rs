// SPDX-License-Identifier: MIT OR Apache-2.0

//! Command-line driver: one on-demand inspection of a captured sheet.

use clap::Parser;
use litoscan::prelude::*;
use litoscan::{layout, utils};
use opencv::core::{Mat, Point, Scalar};
use opencv::{core, imgcodecs, imgproc, prelude::*};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "litoscan", version)]
#[command(about = "Inspect a captured sheet of litho-printed cans against a reference template")]
struct Cli {
    /// Reference template image (BGR).
    #[arg(long)]
    template: PathBuf,

    /// Freshly captured sheet image to inspect.
    #[arg(long)]
    captured: PathBuf,

    /// Region-of-interest mask (single channel, template dimensions).
    #[arg(long)]
    roi_mask: PathBuf,

    /// Alignment parameter file (JSON).
    #[arg(long, default_value = "config/alignment_params.json")]
    alignment_params: PathBuf,

    /// Detection parameter file (JSON).
    #[arg(long, default_value = "config/inspection_params.json")]
    detection_params: PathBuf,

    /// Can base shape: JSON array of [x, y] offsets around the origin.
    #[arg(long, requires = "placements")]
    base_shape: Option<PathBuf>,

    /// Can placements, one `index:center_x,center_y,scale,cell_id` per line.
    #[arg(long, requires = "base_shape")]
    placements: Option<PathBuf>,

    /// Write the final defect mask to this path.
    #[arg(long)]
    out_mask: Option<PathBuf>,

    /// Write the aligned image with defect contours drawn to this path.
    #[arg(long)]
    out_overlay: Option<PathBuf>,
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();
    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            match &err {
                InspectError::InsufficientMatches { .. } => {
                    eprintln!("alignment failed - {err}; re-capture the sheet and retry")
                }
                _ => eprintln!("error: {err}"),
            }
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<(), InspectError> {
    let template = utils::load_image(&cli.template, "template")?;
    let captured = utils::load_image(&cli.captured, "captured")?;
    let roi_mask = utils::load_roi_mask(&cli.roi_mask, template.size()?)?;
    let alignment_params = AlignmentParams::load(&cli.alignment_params)?;
    let detection_params = DetectionParams::load(&cli.detection_params)?;

    let registration = align(&captured, &template, &alignment_params)?;
    let report = detect_defects(&template, &registration.image, &roi_mask, &detection_params)?;
    println!("defects found: {}", report.defect_count());

    if let (Some(base_path), Some(placement_path)) = (&cli.base_shape, &cli.placements) {
        let base_shape = BaseShape::load(base_path)?;
        let placements = layout::load_placements(placement_path)?;
        let attribution = attribute_defects(&report.contours, &base_shape, &placements)?;
        for (cell, defects) in &attribution.per_cell {
            println!("can {cell}: {} defect(s)", defects.len());
        }
        if !attribution.unattributed.is_empty() {
            println!("outside any can: {}", attribution.unattributed.len());
        }
    }

    if let Some(path) = &cli.out_mask {
        write_image(path, &report.final_mask)?;
    }
    if let Some(path) = &cli.out_overlay {
        let mut overlay = registration.image.clone();
        imgproc::draw_contours(
            &mut overlay,
            &report.contours,
            -1,
            Scalar::new(0.0, 255.0, 0.0, 0.0),
            2,
            imgproc::LINE_8,
            &core::no_array(),
            i32::MAX,
            Point::default(),
        )?;
        write_image(path, &overlay)?;
    }

    Ok(())
}

fn write_image(path: &Path, img: &Mat) -> Result<(), InspectError> {
    let path_str = path
        .to_str()
        .ok_or_else(|| InspectError::InvalidPathEncoding(path.to_path_buf()))?;
    imgcodecs::imwrite_def(path_str, img)?;
    Ok(())
}
