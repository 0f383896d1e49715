use geo::Coord;
use image::{imageops::FilterType, RgbImage};
use tracing::instrument;

/// Images whose scaled height is at or below this are sent at the fixed fallback size instead.
const MIN_SCALED_HEIGHT: u32 = 64;
const FALLBACK_SIZE: (u32, u32) = (128, 64);
const SIZE_MULTIPLE: u32 = 32;

/// How an image was resized for the network, and how to map detections back.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scale {
    /// `target_height / source_height`
    pub ratio_h: f32,
    /// `target_width / source_width`
    pub ratio_w: f32,
    pub target_width: u32,
    pub target_height: u32,
    pub source_width: u32,
    pub source_height: u32,
}

impl Scale {
    /// Caps the longer side at `max_side_len`, then floors both sides to a multiple of 32.
    pub fn compute(width: u32, height: u32, max_side_len: u32) -> Self {
        let longer = width.max(height);
        let ratio = if longer > max_side_len {
            max_side_len as f32 / longer as f32
        } else {
            1.0
        };
        let scaled_width = (width as f32 * ratio) as u32;
        let scaled_height = (height as f32 * ratio) as u32;

        let (target_width, target_height) = if scaled_height > MIN_SCALED_HEIGHT {
            (floor_to_multiple(scaled_width), floor_to_multiple(scaled_height))
        } else {
            log::debug!(
                "Scaled height {scaled_height} is too small, using fallback size {FALLBACK_SIZE:?}."
            );
            FALLBACK_SIZE
        };

        let ratio_w = target_width as f32 / width.max(1) as f32;
        let ratio_h = target_height as f32 / height.max(1) as f32;
        log::debug!("Resize will change image dimensions from (w: {width}, h: {height}) to (w: {target_width}, h: {target_height}) with ratio ({ratio_w}, {ratio_h}).");
        Self {
            ratio_h,
            ratio_w,
            target_width,
            target_height,
            source_width: width,
            source_height: height,
        }
    }

    /// Maps a point from resized-image space back to the source image.
    pub fn to_original(&self, c: Coord<f32>) -> Coord<f32> {
        Coord {
            x: c.x / self.ratio_w,
            y: c.y / self.ratio_h,
        }
    }

    pub fn is_identity(&self) -> bool {
        self.target_width == self.source_width && self.target_height == self.source_height
    }
}

fn floor_to_multiple(side: u32) -> u32 {
    if side % SIZE_MULTIPLE == 0 {
        side.max(SIZE_MULTIPLE)
    } else {
        let floored = (side / SIZE_MULTIPLE * SIZE_MULTIPLE).max(SIZE_MULTIPLE);
        log::debug!("Side of {side} wasn't a multiple of {SIZE_MULTIPLE}, flooring to {floored}.");
        floored
    }
}

/// Resizes `image` to network-friendly dimensions.
#[instrument(level = "debug", skip(image))]
pub fn resize_for_network(image: &RgbImage, max_side_len: u32) -> (RgbImage, Scale) {
    let scale = Scale::compute(image.width(), image.height(), max_side_len);
    let resized = if scale.is_identity() {
        image.clone()
    } else {
        image::imageops::resize(
            image,
            scale.target_width,
            scale.target_height,
            FilterType::Triangle,
        )
    };
    (resized, scale)
}
