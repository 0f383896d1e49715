use float_ord::FloatOrd;
use geo::{Area, Coord, LineString, Polygon};
use geo_clipper::Clipper;

/// Clipper intersects on an integer grid; coordinates are scaled by this factor first.
const CLIP_PRECISION: f64 = 10_000.0;

/// Four vertices of a text box in map-pixel space, in restore order
/// (top-left, top-right, bottom-right, bottom-left of the unrotated frame).
pub type Quad = [Coord<f32>; 4];

pub(crate) fn to_geo_poly(quad: &Quad) -> Polygon<f64> {
    let points = quad
        .iter()
        .map(|c| Coord {
            x: c.x as f64,
            y: c.y as f64,
        })
        .collect();
    Polygon::new(LineString::new(points), vec![])
}

fn is_finite(quad: &Quad) -> bool {
    quad.iter().all(|c| c.x.is_finite() && c.y.is_finite())
}

fn order_key(quad: &Quad) -> [FloatOrd<f32>; 8] {
    let mut key = [FloatOrd(0.0); 8];
    for (i, c) in quad.iter().enumerate() {
        key[2 * i] = FloatOrd(c.x);
        key[2 * i + 1] = FloatOrd(c.y);
    }
    key
}

pub fn area(quad: &Quad) -> f64 {
    to_geo_poly(quad).unsigned_area()
}

/// Intersection over union of two quadrilaterals, using exact polygon clipping.
///
/// Non-finite or zero-area inputs yield `0.0`. The result is clamped to `[0, 1]`, which absorbs
/// the small inconsistencies that slightly self-intersecting quads produce between the shoelace
/// area and the clipped area.
pub fn iou(a: &Quad, b: &Quad) -> f64 {
    if !is_finite(a) || !is_finite(b) {
        return 0.0;
    }
    // Clip in a fixed argument order so iou(a, b) and iou(b, a) are bit-identical.
    let (first, second) = if order_key(a) <= order_key(b) {
        (a, b)
    } else {
        (b, a)
    };
    let first = to_geo_poly(first);
    let second = to_geo_poly(second);

    let inter = first.intersection(&second, CLIP_PRECISION).unsigned_area();
    let union = first.unsigned_area() + second.unsigned_area() - inter;
    if union <= f64::EPSILON {
        0.0
    } else {
        (inter / union).clamp(0.0, 1.0)
    }
}

#[cfg(test)]
pub(crate) fn rect(x0: f32, y0: f32, x1: f32, y1: f32) -> Quad {
    [
        Coord { x: x0, y: y0 },
        Coord { x: x1, y: y0 },
        Coord { x: x1, y: y1 },
        Coord { x: x0, y: y1 },
    ]
}
