use std::time::Duration;

use image::RgbImage;

use crate::polygon::TextPolygon;

#[derive(Debug, Clone)]
pub struct TextRegion {
    pub polygon: TextPolygon,
    /// The region cropped and normalized to the configured patch size.
    pub patch: RgbImage,
}

/// Wall-clock time spent in each stage of one detection.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Timings {
    pub net: Duration,
    pub restore: Duration,
    pub nms: Duration,
}

#[derive(Debug, Clone, Default)]
pub struct DetectionOutput {
    pub regions: Vec<TextRegion>,
    pub timings: Timings,
}

impl DetectionOutput {
    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    pub fn patches(&self) -> impl Iterator<Item = &RgbImage> {
        self.regions.iter().map(|region| &region.patch)
    }
}
