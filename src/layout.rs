// SPDX-License-Identifier: MIT OR Apache-2.0

//! Sheet layout: the canonical can outline, its placements across the sheet
//! and the attribution of defect contours to individual cans.
//!
//! A layout is defined once per sheet design by an external drawing tool and
//! consumed here as data: a base shape (vertex offsets around an implicit
//! center) plus one placement instance per can. The actual polygon of a can
//! is the base shape scaled by the instance's factor and translated to its
//! center.

use crate::InspectError;
use crate::utils::UnsafePolygonSyncWrapper;
use opencv::core::{CV_8UC1, Mat, Point, Point2f, Scalar, Size, Vector};
use opencv::{imgproc, prelude::*};
use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

/// Canonical can outline: vertex offsets relative to an implicit center.
#[derive(Debug, Clone, PartialEq)]
pub struct BaseShape {
    offsets: Vec<[f32; 2]>,
}

impl BaseShape {
    /// A closed outline needs at least a triangle.
    pub fn new(offsets: Vec<[f32; 2]>) -> Result<Self, InspectError> {
        if offsets.len() < 3 {
            return Err(InspectError::InvalidParams(format!(
                "base shape needs at least 3 points, got {}",
                offsets.len()
            )));
        }
        Ok(Self { offsets })
    }

    /// Loads the outline from a JSON array of `[x, y]` pairs.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, InspectError> {
        Self::new(serde_json::from_str(&fs::read_to_string(path)?)?)
    }

    pub fn offsets(&self) -> &[[f32; 2]] {
        &self.offsets
    }
}

/// One can position on the sheet.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placement {
    /// Center of the can polygon in template coordinates.
    pub center: (f32, f32),
    /// Scale factor applied to the base shape offsets.
    pub scale: f32,
    /// Can id, unique within a layout.
    pub id: u32,
}

impl Placement {
    /// The can polygon: `center + offset * scale` per base-shape vertex.
    pub fn polygon(&self, base: &BaseShape) -> Vector<Point2f> {
        base.offsets()
            .iter()
            .map(|&[dx, dy]| {
                Point2f::new(self.center.0 + dx * self.scale, self.center.1 + dy * self.scale)
            })
            .collect()
    }
}

/// Parses placement instances from line-oriented text, one instance per
/// line: `index:center_x,center_y,scale,cell_id`. Blank lines are skipped.
pub fn parse_placements(text: &str) -> Result<Vec<Placement>, InspectError> {
    let mut placements = Vec::new();
    let mut seen_ids = BTreeSet::new();

    for (idx, raw) in text.lines().enumerate() {
        let line = idx + 1;
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            continue;
        }

        let (index, rest) = trimmed.split_once(':').ok_or_else(|| InspectError::LayoutParse {
            line,
            reason: "missing ':' after the instance index".to_string(),
        })?;
        index.trim().parse::<usize>().map_err(|_| InspectError::LayoutParse {
            line,
            reason: format!("instance index {:?} is not an integer", index.trim()),
        })?;

        let fields: Vec<&str> = rest.split(',').map(str::trim).collect();
        if fields.len() != 4 {
            return Err(InspectError::LayoutParse {
                line,
                reason: format!(
                    "expected center_x,center_y,scale,cell_id, got {} field(s)",
                    fields.len()
                ),
            });
        }

        let center_x = parse_field::<f32>(line, "center_x", fields[0])?;
        let center_y = parse_field::<f32>(line, "center_y", fields[1])?;
        let scale = parse_field::<f32>(line, "scale", fields[2])?;
        let id = parse_field::<u32>(line, "cell_id", fields[3])?;

        if !(scale > 0.0) {
            return Err(InspectError::LayoutParse {
                line,
                reason: format!("scale must be positive, got {scale}"),
            });
        }
        if !seen_ids.insert(id) {
            return Err(InspectError::LayoutParse {
                line,
                reason: format!("duplicate cell id {id}"),
            });
        }

        placements.push(Placement {
            center: (center_x, center_y),
            scale,
            id,
        });
    }

    Ok(placements)
}

/// Loads placement instances from a file, see [`parse_placements`].
pub fn load_placements<P: AsRef<Path>>(path: P) -> Result<Vec<Placement>, InspectError> {
    parse_placements(&fs::read_to_string(path)?)
}

fn parse_field<T: std::str::FromStr>(
    line: usize,
    name: &str,
    value: &str,
) -> Result<T, InspectError> {
    value.parse().map_err(|_| InspectError::LayoutParse {
        line,
        reason: format!("could not parse {name} from {value:?}"),
    })
}

/// Mapping from can id to the defect contours it contains.
///
/// Indices refer to the contour list handed to [`attribute_defects`]; every
/// index appears exactly once, either under a can id or in `unattributed`.
#[derive(Debug, Clone, Default)]
pub struct Attribution {
    pub per_cell: BTreeMap<u32, Vec<usize>>,
    pub unattributed: Vec<usize>,
    pub total: usize,
}

impl Attribution {
    /// Ids of cans with at least one attributed defect, ascending.
    pub fn defective_cells(&self) -> Vec<u32> {
        self.per_cell.keys().copied().collect()
    }
}

/// Attributes each defect contour to the first placement (in slice order)
/// whose polygon contains the contour's area-weighted centroid.
///
/// The placement slice comes from a line-numbered layout file, so "first
/// match wins" is deterministic; overlapping polygons resolve to the earlier
/// line. Contours with zero area have no centroid and are counted as
/// unattributed, as are contours contained in no polygon.
pub fn attribute_defects(
    contours: &Vector<Vector<Point>>,
    base: &BaseShape,
    placements: &[Placement],
) -> Result<Attribution, InspectError> {
    let polygons: Vec<UnsafePolygonSyncWrapper> = placements
        .iter()
        .map(|p| UnsafePolygonSyncWrapper(p.polygon(base)))
        .collect();

    let mut centroids = Vec::with_capacity(contours.len());
    for contour in contours.iter() {
        centroids.push(centroid(&contour)?);
    }

    let assigned = centroids
        .par_iter()
        .map(|center| -> Result<Option<u32>, InspectError> {
            let Some(center) = center else {
                return Ok(None);
            };
            for (placement, polygon) in placements.iter().zip(&polygons) {
                // Boundary counts as inside.
                if imgproc::point_polygon_test(&polygon.0, *center, false)? >= 0.0 {
                    return Ok(Some(placement.id));
                }
            }
            Ok(None)
        })
        .collect::<Result<Vec<_>, InspectError>>()?;

    let mut attribution = Attribution {
        total: contours.len(),
        ..Attribution::default()
    };
    for (index, cell) in assigned.into_iter().enumerate() {
        match cell {
            Some(id) => attribution.per_cell.entry(id).or_default().push(index),
            None => attribution.unattributed.push(index),
        }
    }
    Ok(attribution)
}

/// Area-weighted contour centroid via image moments; `None` for
/// zero-area contours.
fn centroid(contour: &Vector<Point>) -> Result<Option<Point2f>, InspectError> {
    let m = imgproc::moments(contour, false)?;
    if m.m00 == 0.0 {
        return Ok(None);
    }
    Ok(Some(Point2f::new(
        (m.m10 / m.m00) as f32,
        (m.m01 / m.m00) as f32,
    )))
}

/// Renders the region-of-interest mask for a layout: every placement polygon
/// filled with 255 on a black canvas of the template's size.
pub fn render_roi_mask(
    size: Size,
    base: &BaseShape,
    placements: &[Placement],
) -> Result<Mat, InspectError> {
    let mut mask = Mat::zeros(size.height, size.width, CV_8UC1)?.to_mat()?;
    let mut polygons = Vector::<Vector<Point>>::new();
    for placement in placements {
        let polygon: Vector<Point> = placement
            .polygon(base)
            .iter()
            .map(|p| Point::new(p.x.round() as i32, p.y.round() as i32))
            .collect();
        polygons.push(polygon);
    }
    imgproc::fill_poly_def(&mut mask, &polygons, Scalar::all(255.0))?;
    Ok(mask)
}

#[cfg(test)]
mod tests {
    use super::*;
    use opencv::prelude::*;

    fn unit_square() -> BaseShape {
        BaseShape::new(vec![[-1.0, -1.0], [1.0, -1.0], [1.0, 1.0], [-1.0, 1.0]]).unwrap()
    }

    /// A filled axis-aligned square contour, counter-clockwise.
    fn square_contour(x: i32, y: i32, side: i32) -> Vector<Point> {
        Vector::from_iter([
            Point::new(x, y),
            Point::new(x, y + side),
            Point::new(x + side, y + side),
            Point::new(x + side, y),
        ])
    }

    #[test]
    fn base_shape_rejects_degenerate_outlines() {
        assert!(BaseShape::new(vec![[0.0, 0.0], [1.0, 1.0]]).is_err());
        assert!(BaseShape::new(vec![[0.0, 0.0], [1.0, 0.0], [0.0, 1.0]]).is_ok());
    }

    #[test]
    fn placements_parse_the_line_format() {
        let text = "0:100.5,200.0,30.0,1\n\n1:400,200,30,2\n";
        let placements = parse_placements(text).unwrap();
        assert_eq!(placements.len(), 2);
        assert_eq!(placements[0].center, (100.5, 200.0));
        assert_eq!(placements[0].scale, 30.0);
        assert_eq!(placements[0].id, 1);
        assert_eq!(placements[1].id, 2);
    }

    #[test]
    fn placements_report_the_offending_line() {
        let err = parse_placements("0:1,2,3,4\nbogus\n").unwrap_err();
        match err {
            InspectError::LayoutParse { line, .. } => assert_eq!(line, 2),
            other => panic!("unexpected error {other:?}"),
        }

        assert!(parse_placements("0:1,2,3\n").is_err());
        assert!(parse_placements("x:1,2,3,4\n").is_err());
        assert!(parse_placements("0:1,2,0.0,4\n").is_err());
        // duplicate id
        assert!(parse_placements("0:1,2,3,4\n1:5,6,7,4\n").is_err());
    }

    #[test]
    fn placement_polygon_scales_and_translates() {
        let base = unit_square();
        let placement = Placement {
            center: (10.0, 20.0),
            scale: 3.0,
            id: 1,
        };
        let polygon = placement.polygon(&base);
        assert_eq!(polygon.len(), 4);
        assert_eq!(polygon.get(0).unwrap(), Point2f::new(7.0, 17.0));
        assert_eq!(polygon.get(2).unwrap(), Point2f::new(13.0, 23.0));
    }

    #[test]
    fn defects_map_to_the_containing_cell() {
        let base = unit_square();
        let placements = [
            Placement {
                center: (50.0, 50.0),
                scale: 20.0,
                id: 3,
            },
            Placement {
                center: (150.0, 50.0),
                scale: 20.0,
                id: 7,
            },
        ];

        let mut contours = Vector::<Vector<Point>>::new();
        contours.push(square_contour(45, 45, 10)); // centroid (50, 50) -> cell 3
        contours.push(square_contour(145, 45, 10)); // centroid (150, 50) -> cell 7
        contours.push(square_contour(146, 46, 6)); // centroid (149, 49) -> cell 7
        contours.push(square_contour(300, 300, 10)); // outside every cell

        let attribution = attribute_defects(&contours, &base, &placements).unwrap();
        assert_eq!(attribution.total, 4);
        assert_eq!(attribution.per_cell[&3], vec![0]);
        assert_eq!(attribution.per_cell[&7], vec![1, 2]);
        assert_eq!(attribution.unattributed, vec![3]);
        assert_eq!(attribution.defective_cells(), vec![3, 7]);
    }

    #[test]
    fn attribution_partitions_the_contour_list() {
        let base = unit_square();
        let placements = [Placement {
            center: (50.0, 50.0),
            scale: 30.0,
            id: 1,
        }];

        let mut contours = Vector::<Vector<Point>>::new();
        contours.push(square_contour(40, 40, 8));
        contours.push(square_contour(200, 200, 8));
        // Degenerate contour with zero enclosed area.
        contours.push(Vector::from_iter([Point::new(5, 5), Point::new(9, 5)]));

        let attribution = attribute_defects(&contours, &base, &placements).unwrap();
        let mut indices: Vec<usize> = attribution
            .per_cell
            .values()
            .flatten()
            .copied()
            .chain(attribution.unattributed.iter().copied())
            .collect();
        indices.sort_unstable();
        assert_eq!(indices, vec![0, 1, 2]);
        // The zero-area contour is counted but attributed to no cell.
        assert!(attribution.unattributed.contains(&2));
    }

    #[test]
    fn overlapping_cells_resolve_to_the_earlier_placement() {
        let base = unit_square();
        let placements = [
            Placement {
                center: (50.0, 50.0),
                scale: 25.0,
                id: 9,
            },
            Placement {
                center: (55.0, 50.0),
                scale: 25.0,
                id: 4,
            },
        ];

        let mut contours = Vector::<Vector<Point>>::new();
        contours.push(square_contour(48, 48, 6)); // inside both polygons

        let attribution = attribute_defects(&contours, &base, &placements).unwrap();
        assert_eq!(attribution.per_cell[&9], vec![0]);
        assert!(!attribution.per_cell.contains_key(&4));
    }

    #[test]
    fn rendered_roi_mask_covers_the_placements() {
        use opencv::core::count_non_zero;

        let base = unit_square();
        let placements = [Placement {
            center: (30.0, 30.0),
            scale: 10.0,
            id: 1,
        }];
        let mask = render_roi_mask(Size::new(100, 100), &base, &placements).unwrap();
        let painted = count_non_zero(&mask).unwrap();
        // A 20x20 filled square, give or take rasterization of the border.
        assert!((350..=500).contains(&painted), "painted {painted} pixels");
        assert_eq!(
            *mask.at_2d::<u8>(30, 30).unwrap(),
            255,
            "placement center must be inside the mask"
        );
        assert_eq!(*mask.at_2d::<u8>(80, 80).unwrap(), 0);
    }
}
