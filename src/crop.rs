use image::{imageops::FilterType, GrayImage, Rgb, RgbImage};
use imageproc::{
    geometric_transformations::{warp_into, Interpolation, Projection},
    point::Point,
    rect::Rect,
};
use tracing::instrument;

use crate::{filter::fill_polygon, polygon::TextPolygon};

const BACKGROUND: Rgb<u8> = Rgb([0, 0, 0]);

/// How a detected region is cut out of the source image before normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CropMode {
    /// Bounding-rectangle crop with everything outside the polygon blacked out.
    #[default]
    Masked,
    /// Perspective warp of the quadrilateral onto an upright rectangle.
    Rectified,
}

#[derive(Debug, Clone)]
pub struct RegionCrop {
    /// Bounding rectangle of the polygon, clipped to the image.
    pub rect: Rect,
    /// The bounding rectangle as-is.
    pub raw: RgbImage,
    /// The bounding rectangle with pixels outside the polygon set to black.
    pub masked: RgbImage,
}

/// Axis-aligned bounds of `polygon` clipped to a `width` x `height` image; `None` if empty.
pub fn bounding_rect(polygon: &TextPolygon, width: u32, height: u32) -> Option<Rect> {
    let clip_x = |x: i32| x.clamp(0, width as i32);
    let clip_y = |y: i32| y.clamp(0, height as i32);
    let min_x = clip_x(polygon.xs().min()?);
    let max_x = clip_x(polygon.xs().max()?);
    let min_y = clip_y(polygon.ys().min()?);
    let max_y = clip_y(polygon.ys().max()?);
    if max_x <= min_x || max_y <= min_y {
        return None;
    }
    Some(Rect::at(min_x, min_y).of_size((max_x - min_x) as u32, (max_y - min_y) as u32))
}

pub fn poly_crop(image: &RgbImage, polygon: &TextPolygon) -> Option<RegionCrop> {
    let rect = bounding_rect(polygon, image.width(), image.height())?;
    let raw = image::imageops::crop_imm(
        image,
        rect.left() as u32,
        rect.top() as u32,
        rect.width(),
        rect.height(),
    )
    .to_image();

    let mut mask = GrayImage::new(rect.width(), rect.height());
    let local = polygon
        .points
        .map(|p| Point::new(p.x - rect.left(), p.y - rect.top()));
    fill_polygon(&mut mask, &local);

    let mut masked = raw.clone();
    for (x, y, pixel) in masked.enumerate_pixels_mut() {
        if mask.get_pixel(x, y)[0] == 0 {
            *pixel = BACKGROUND;
        }
    }
    Some(RegionCrop { rect, raw, masked })
}

fn distance(a: Point<i32>, b: Point<i32>) -> f32 {
    ((a.x - b.x) as f32).hypot((a.y - b.y) as f32)
}

/// Warps the quadrilateral onto an upright rectangle sized by its longer opposing edges.
pub fn rectify(image: &RgbImage, polygon: &TextPolygon) -> Option<RgbImage> {
    let [p0, p1, p2, p3] = polygon.points;
    let width = distance(p0, p1).max(distance(p2, p3)) as u32;
    let height = distance(p0, p3).max(distance(p1, p2)) as u32;
    if width == 0 || height == 0 {
        return None;
    }

    let from = polygon.points.map(|p| (p.x as f32, p.y as f32));
    let (w, h) = (width as f32, height as f32);
    let to = [(0.0, 0.0), (w, 0.0), (w, h), (0.0, h)];
    let projection = Projection::from_control_points(from, to)?;

    let mut out = RgbImage::new(width, height);
    warp_into(image, &projection, Interpolation::Bilinear, BACKGROUND, &mut out);
    Some(out)
}

/// Scales `image` to fit inside `(height, width)` without distortion and centers it on a black
/// canvas of exactly that size.
pub fn fit_to_aspect(image: &RgbImage, (target_height, target_width): (u32, u32)) -> RgbImage {
    let mut canvas = RgbImage::from_pixel(target_width, target_height, BACKGROUND);
    if image.width() == 0 || image.height() == 0 || target_width == 0 || target_height == 0 {
        return canvas;
    }

    let scale = (target_width as f32 / image.width() as f32)
        .min(target_height as f32 / image.height() as f32);
    let width = ((image.width() as f32 * scale).round() as u32).clamp(1, target_width);
    let height = ((image.height() as f32 * scale).round() as u32).clamp(1, target_height);
    let scaled = image::imageops::resize(image, width, height, FilterType::Triangle);

    let x = (target_width - width) / 2;
    let y = (target_height - height) / 2;
    image::imageops::overlay(&mut canvas, &scaled, x as i64, y as i64);
    canvas
}

/// Crops `polygon` out of `image` and normalizes it to `patch_size` (height, width).
#[instrument(level = "trace", skip(image))]
pub fn normalize_region(
    image: &RgbImage,
    polygon: &TextPolygon,
    mode: CropMode,
    patch_size: (u32, u32),
) -> Option<RgbImage> {
    let region = match mode {
        CropMode::Masked => poly_crop(image, polygon).map(|crop| crop.masked),
        CropMode::Rectified => rectify(image, polygon),
    };
    match region {
        Some(region) => Some(fit_to_aspect(&region, patch_size)),
        None => {
            log::trace!("Skipping empty region {:?}", polygon.points);
            None
        }
    }
}
