use image::{GrayImage, Luma};
use imageproc::{drawing::draw_polygon_mut, point::Point};
use ndarray::ArrayView2;
use tracing::instrument;

use crate::{nms::MergedBox, quad::Quad, restore::OUTPUT_STRIDE};

/// Fills `points` into `mask`. Unlike `draw_polygon_mut` this accepts repeated and collapsed
/// vertices; a polygon that collapses to a single point marks that pixel.
pub(crate) fn fill_polygon(mask: &mut GrayImage, points: &[Point<i32>]) {
    let mut ring: Vec<Point<i32>> = Vec::with_capacity(points.len());
    for &p in points {
        if ring.last() != Some(&p) {
            ring.push(p);
        }
    }
    while ring.len() > 1 && ring.first() == ring.last() {
        ring.pop();
    }

    match ring.as_slice() {
        [] => {}
        [p] => {
            if p.x >= 0 && p.y >= 0 && (p.x as u32) < mask.width() && (p.y as u32) < mask.height()
            {
                mask.put_pixel(p.x as u32, p.y as u32, Luma([255]));
            }
        }
        _ => draw_polygon_mut(mask, &ring, Luma([255])),
    }
}

/// Projects a map-space quad onto the score map grid: truncate to integers, then floor-divide by
/// the output stride.
pub(crate) fn to_score_grid(quad: &Quad) -> [Point<i32>; 4] {
    let stride = OUTPUT_STRIDE as i32;
    quad.map(|c| Point::new((c.x as i32).div_euclid(stride), (c.y as i32).div_euclid(stride)))
}

/// Mean of the score map over the pixels covered by `quad`. Empty coverage scores `0.0`.
pub fn mean_score(score_map: ArrayView2<f32>, quad: &Quad) -> f32 {
    let (rows, cols) = score_map.dim();
    if rows == 0 || cols == 0 {
        return 0.0;
    }
    let points = to_score_grid(quad);

    let clamp_x = |x: i32| x.clamp(0, cols as i32 - 1);
    let clamp_y = |y: i32| y.clamp(0, rows as i32 - 1);
    let min_x = clamp_x(points.iter().map(|p| p.x).min().unwrap_or(0));
    let max_x = clamp_x(points.iter().map(|p| p.x).max().unwrap_or(0));
    let min_y = clamp_y(points.iter().map(|p| p.y).min().unwrap_or(0));
    let max_y = clamp_y(points.iter().map(|p| p.y).max().unwrap_or(0));

    let mut mask = GrayImage::new((max_x - min_x + 1) as u32, (max_y - min_y + 1) as u32);
    let local = points.map(|p| Point::new(p.x - min_x, p.y - min_y));
    fill_polygon(&mut mask, &local);

    let (sum, count) = mask
        .enumerate_pixels()
        .filter(|(_, _, pixel)| pixel[0] > 0)
        .fold((0.0f64, 0usize), |(sum, count), (x, y, _)| {
            let value = score_map[[(y as i32 + min_y) as usize, (x as i32 + min_x) as usize]];
            (sum + value as f64, count + 1)
        });
    if count == 0 {
        0.0
    } else {
        (sum / count as f64) as f32
    }
}

/// Replaces each box's score with its mean over the score map and keeps those above `box_thresh`.
#[instrument(level = "debug", skip(boxes, score_map), fields(boxes = boxes.len()))]
pub fn rescore(boxes: Vec<MergedBox>, score_map: ArrayView2<f32>, box_thresh: f32) -> Vec<MergedBox> {
    let kept = boxes
        .into_iter()
        .map(|mut b| {
            b.score = mean_score(score_map, &b.quad);
            b
        })
        .filter(|b| b.score > box_thresh)
        .collect::<Vec<_>>();
    log::debug!("{} text boxes above box threshold {box_thresh}", kept.len());
    kept
}

/// True if any two adjacent vertices are closer than `min_edge_len`.
pub fn is_degenerate(points: &[Point<i32>; 4], min_edge_len: f32) -> bool {
    (0..4).any(|i| {
        let (a, b) = (points[i], points[(i + 1) % 4]);
        let (dx, dy) = ((a.x - b.x) as f32, (a.y - b.y) as f32);
        dx.hypot(dy) < min_edge_len
    })
}
