use std::{
    path::{Path, PathBuf},
    time::Instant,
};

use geo::Coord;
use image::{imageops::FilterType, DynamicImage, RgbImage};
use imageproc::point::Point;
use tracing::instrument;

pub mod crop;
mod east_net;
mod error;
pub mod filter;
pub mod nms;
pub mod polygon;
pub mod quad;
pub mod restore;
mod result;
pub mod save;
pub mod util;

pub use crop::CropMode;
pub use east_net::{EastNet, TensorLayout, TextDetectionModel};
pub use error::{Error, Result};
pub use polygon::TextPolygon;
pub use restore::DetectionMaps;
pub use result::*;
pub use util::Scale;

pub use ort as runtime;

pub struct EastDetectorBuilder {
    threads: usize,
    model_path: Option<PathBuf>,
    layout: TensorLayout,
    mean: [f32; 3],
}

impl EastDetectorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    pub fn model(mut self, path: impl Into<PathBuf>) -> Self {
        self.model_path = Some(path.into());
        self
    }

    pub fn layout(mut self, layout: TensorLayout) -> Self {
        self.layout = layout;
        self
    }

    /// Per-channel RGB mean subtracted from raw pixel values before inference.
    pub fn mean(mut self, mean: [f32; 3]) -> Self {
        self.mean = mean;
        self
    }

    #[instrument(skip(self))]
    pub fn build(mut self) -> Result<EastDetector<EastNet>> {
        let model_path = self
            .model_path
            .take()
            .unwrap_or_else(|| "models/east_icdar2015.onnx".into());
        let model = EastNet::init(model_path, self.threads, self.layout, self.mean)?;
        Ok(EastDetector::with_model(model))
    }
}

impl Default for EastDetectorBuilder {
    fn default() -> Self {
        Self {
            threads: 4,
            model_path: None,
            layout: TensorLayout::default(),
            mean: [0.0; 3],
        }
    }
}

/// Runs detection with `M` and turns its maps into normalized text patches.
pub struct EastDetector<M = EastNet> {
    model: M,
}

impl<M: TextDetectionModel> EastDetector<M> {
    pub fn with_model(model: M) -> Self {
        Self { model }
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    #[instrument(skip(self, image))]
    pub fn detect(&self, image: &DynamicImage, options: DetectionOptions) -> Result<DetectionOutput> {
        // Alpha and other extra channels are dropped here.
        let mut image = image.to_rgb8();
        if let Some((max_height, max_width)) = options.halve_above {
            if image.height() > max_height || image.width() > max_width {
                let (width, height) = ((image.width() / 2).max(1), (image.height() / 2).max(1));
                log::debug!("Halving oversized image to (w: {width}, h: {height}).");
                image = image::imageops::resize(&image, width, height, FilterType::Triangle);
            }
        }

        let (resized, scale) = util::resize_for_network(&image, options.max_side_len);
        let start = Instant::now();
        let maps = self.model.infer(&resized)?;
        let net = start.elapsed();

        let (polygons, mut timings) = decode_maps(&maps, &scale, &options);
        timings.net = net;
        log::debug!(
            "net {:.0}ms, restore {:.0}ms, nms {:.0}ms",
            timings.net.as_secs_f64() * 1000.0,
            timings.restore.as_secs_f64() * 1000.0,
            timings.nms.as_secs_f64() * 1000.0
        );

        let regions = crop_regions(&image, polygons, &options);
        Ok(DetectionOutput { regions, timings })
    }

    /// Detects text in the image at `source` and writes every patch to `out_dir`.
    pub fn detect_and_save(
        &self,
        source: &Path,
        out_dir: &Path,
        options: DetectionOptions,
    ) -> Result<Vec<PathBuf>> {
        let image = image::open(source)?;
        let output = self.detect(&image, options)?;
        save::save_patches(out_dir, source, output.patches())
    }
}

fn crop_regions(
    image: &RgbImage,
    polygons: Vec<TextPolygon>,
    options: &DetectionOptions,
) -> Vec<TextRegion> {
    polygons
        .into_iter()
        .filter_map(|polygon| {
            let patch =
                crop::normalize_region(image, &polygon, options.crop_mode, options.patch_size)?;
            Some(TextRegion { polygon, patch })
        })
        .collect()
}

/// Turns score and geometry maps of a resized image into text polygons in source-image pixels.
///
/// `scale` is the one used to produce the resized image. The returned timings cover restore and
/// NMS only.
#[instrument(level = "debug", skip(maps, options))]
pub fn decode_maps(
    maps: &DetectionMaps,
    scale: &Scale,
    options: &DetectionOptions,
) -> (Vec<TextPolygon>, Timings) {
    let mut timings = Timings::default();

    let start = Instant::now();
    let candidates = restore::restore_candidates(maps, options.score_map_thresh);
    timings.restore = start.elapsed();
    if candidates.is_empty() {
        return (Vec::new(), timings);
    }

    let start = Instant::now();
    let merged = nms::merge_quadrangles(&candidates, options.nms_thresh);
    timings.nms = start.elapsed();

    // Boxes crossing the border keep their true shape; rescoring and cropping clip to the image.
    let scored = filter::rescore(merged, maps.score(), options.box_thresh);

    let polygons = scored
        .into_iter()
        .filter_map(|b| {
            let points = b.quad.map(|c| {
                let Coord { x, y } = scale.to_original(c);
                Point::new(x as i32, y as i32)
            });
            let points = polygon::canonicalize(points);
            if filter::is_degenerate(&points, options.min_edge_len) {
                log::trace!("Dropping degenerate box {points:?}");
                return None;
            }
            Some(TextPolygon {
                points,
                score: b.score,
            })
        })
        .collect();
    (polygons, timings)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectionOptions {
    /// Cells scoring at or below this produce no candidate.
    pub score_map_thresh: f32,
    /// Boxes whose mean score is at or below this are dropped.
    pub box_thresh: f32,
    /// IoU above which two boxes are merged or suppressed.
    pub nms_thresh: f32,
    pub max_side_len: u32,
    /// Minimum edge length of a final polygon, in source-image pixels.
    pub min_edge_len: f32,
    /// Output patch size as (height, width).
    pub patch_size: (u32, u32),
    pub crop_mode: CropMode,
    /// Halve images taller or wider than (height, width) before resizing.
    pub halve_above: Option<(u32, u32)>,
}

impl Default for DetectionOptions {
    fn default() -> Self {
        Self {
            score_map_thresh: 0.8,
            box_thresh: 0.1,
            nms_thresh: 0.2,
            max_side_len: 2400,
            min_edge_len: 5.0,
            patch_size: (60, 180),
            crop_mode: CropMode::Masked,
            halve_above: None,
        }
    }
}
