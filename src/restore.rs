use geo::Coord;
use nalgebra::{Rotation2, Vector2};
use ndarray::{s, Array2, Array3, ArrayView2, ArrayView3};
use tracing::instrument;

use crate::{error::Error, quad::Quad, Result};

/// Downsampling factor between the network input and its output maps.
pub const OUTPUT_STRIDE: usize = 4;
/// Four edge distances followed by the rotation angle.
pub const GEOMETRY_CHANNELS: usize = 5;

/// Score and geometry maps produced by the detection network for one image.
#[derive(Debug, Clone)]
pub struct DetectionMaps {
    score: Array2<f32>,
    geometry: Array3<f32>,
}

impl DetectionMaps {
    /// `score` is `(rows, cols)`, `geometry` is `(rows, cols, 5)`.
    pub fn new(score: Array2<f32>, geometry: Array3<f32>) -> Result<Self> {
        let (rows, cols) = score.dim();
        let (geo_rows, geo_cols, channels) = geometry.dim();
        if channels != GEOMETRY_CHANNELS {
            return Err(Error::MapShape(format!(
                "geometry map has {channels} channels, expected {GEOMETRY_CHANNELS}"
            )));
        }
        if (geo_rows, geo_cols) != (rows, cols) {
            return Err(Error::MapShape(format!(
                "geometry map is {geo_rows}x{geo_cols} but score map is {rows}x{cols}"
            )));
        }
        Ok(Self { score, geometry })
    }

    pub fn score(&self) -> ArrayView2<'_, f32> {
        self.score.view()
    }

    pub fn geometry(&self) -> ArrayView3<'_, f32> {
        self.geometry.view()
    }

    pub fn rows(&self) -> usize {
        self.score.nrows()
    }

    pub fn cols(&self) -> usize {
        self.score.ncols()
    }
}

/// A per-cell box hypothesis: restored vertices plus the cell's raw score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CandidateBox {
    pub quad: Quad,
    pub score: f32,
}

/// Distances from a cell to the four edges of its text box, in input pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EdgeDistances {
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
    pub left: f32,
}

impl EdgeDistances {
    fn width(&self) -> f32 {
        self.left + self.right
    }

    fn height(&self) -> f32 {
        self.top + self.bottom
    }
}

/// Rotation of a restored box. The sign decides which corner of the upright frame is the pivot:
/// bottom-left for non-negative angles, bottom-right for negative ones.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Rotation {
    Positive(f32),
    Negative(f32),
}

impl Rotation {
    pub fn from_angle(angle: f32) -> Self {
        if angle >= 0.0 {
            Rotation::Positive(angle)
        } else {
            Rotation::Negative(angle)
        }
    }

    pub fn angle(self) -> f32 {
        match self {
            Rotation::Positive(angle) | Rotation::Negative(angle) => angle,
        }
    }

    /// Corners of the upright box with the pivot at the frame origin, and the position of the
    /// originating cell inside that frame.
    fn frame(self, d: EdgeDistances) -> ([Vector2<f32>; 4], Vector2<f32>) {
        let (w, h) = (d.width(), d.height());
        match self {
            Rotation::Positive(_) => (
                [
                    Vector2::new(0.0, -h),
                    Vector2::new(w, -h),
                    Vector2::new(w, 0.0),
                    Vector2::new(0.0, 0.0),
                ],
                Vector2::new(d.left, -d.bottom),
            ),
            Rotation::Negative(_) => (
                [
                    Vector2::new(-w, -h),
                    Vector2::new(0.0, -h),
                    Vector2::new(0.0, 0.0),
                    Vector2::new(-w, 0.0),
                ],
                Vector2::new(-d.right, -d.bottom),
            ),
        }
    }

    /// Rebuilds the box around the cell at `origin` (input-pixel coordinates).
    pub fn restore(self, origin: Coord<f32>, distances: EdgeDistances) -> Quad {
        let (corners, cell) = self.frame(distances);
        // Image y grows downwards, so a positive angle turns the box counter-clockwise on screen.
        let rotation = Rotation2::new(-self.angle());
        let offset = Vector2::new(origin.x, origin.y) - rotation * cell;
        corners.map(|corner| {
            let p = rotation * corner + offset;
            Coord { x: p.x, y: p.y }
        })
    }
}

/// Restores one candidate box for every cell scoring above `score_map_thresh`.
///
/// Candidates come out in row-major scan order; the locality merge depends on it.
#[instrument(level = "debug", skip(maps))]
pub fn restore_candidates(maps: &DetectionMaps, score_map_thresh: f32) -> Vec<CandidateBox> {
    let mut cells = maps
        .score
        .indexed_iter()
        .filter(|(_, score)| **score > score_map_thresh)
        .map(|((row, col), score)| (row, col, *score))
        .collect::<Vec<_>>();
    cells.sort_by_key(|&(row, _, _)| row);

    let candidates = cells
        .into_iter()
        .map(|(row, col, score)| {
            let geo = maps.geometry.slice(s![row, col, ..]);
            let distances = EdgeDistances {
                top: geo[0],
                right: geo[1],
                bottom: geo[2],
                left: geo[3],
            };
            let origin = Coord {
                x: (col * OUTPUT_STRIDE) as f32,
                y: (row * OUTPUT_STRIDE) as f32,
            };
            CandidateBox {
                quad: Rotation::from_angle(geo[4]).restore(origin, distances),
                score,
            }
        })
        .collect::<Vec<_>>();
    log::debug!("{} text boxes before nms", candidates.len());
    candidates
}
