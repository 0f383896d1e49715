use imageproc::point::Point;

/// A detected text quadrilateral in original-image pixels, vertices in canonical order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextPolygon {
    pub points: [Point<i32>; 4],
    pub score: f32,
}

impl TextPolygon {
    pub fn xs(&self) -> impl Iterator<Item = i32> + '_ {
        self.points.iter().map(|p| p.x)
    }

    pub fn ys(&self) -> impl Iterator<Item = i32> + '_ {
        self.points.iter().map(|p| p.y)
    }
}

fn is_horizontal(a: Point<i32>, b: Point<i32>) -> bool {
    (a.x - b.x).abs() > (a.y - b.y).abs()
}

/// Twice the signed area; positive when the vertices run clockwise on screen (y down).
fn signed_area(points: &[Point<i32>; 4]) -> i64 {
    (0..4)
        .map(|i| {
            let (a, b) = (points[i], points[(i + 1) % 4]);
            a.x as i64 * b.y as i64 - b.x as i64 * a.y as i64
        })
        .sum()
}

/// Puts the vertex with the smallest `x + y` first, keeps the walk direction whose first edge is
/// horizontal and otherwise reverses it.
///
/// When neither edge at the first vertex is horizontal (a 45° diamond, say) the clockwise walk is
/// used instead of unconditionally reversing. Reversing there would flip the order again on every
/// call; picking by winding makes `canonicalize(canonicalize(p)) == canonicalize(p)` hold. So
/// `[(0, 20), (20, 0), (40, 20), (20, 40)]` comes back unchanged rather than as
/// `[(0, 20), (20, 40), (40, 20), (20, 0)]`.
pub fn canonicalize(points: [Point<i32>; 4]) -> [Point<i32>; 4] {
    let mut start = 0;
    for (i, p) in points.iter().enumerate() {
        let best = points[start];
        if (p.x as i64 + p.y as i64) < (best.x as i64 + best.y as i64) {
            start = i;
        }
    }
    let forward = [0, 1, 2, 3].map(|k| points[(start + k) % 4]);
    let backward = [forward[0], forward[3], forward[2], forward[1]];

    if is_horizontal(forward[0], forward[1]) {
        forward
    } else if is_horizontal(backward[0], backward[1]) || signed_area(&forward) < 0 {
        backward
    } else {
        forward
    }
}
