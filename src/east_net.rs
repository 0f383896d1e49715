use std::path::PathBuf;

use image::RgbImage;
use ndarray::{Array4, ArrayView4, ArrayViewD, Axis, Ix4};
use ort::{inputs, GraphOptimizationLevel, Session};
use tracing::instrument;

use crate::{
    error::Error,
    restore::{DetectionMaps, GEOMETRY_CHANNELS},
    Result,
};

/// Produces score and geometry maps for a network-sized image.
pub trait TextDetectionModel {
    fn infer(&self, image: &RgbImage) -> Result<DetectionMaps>;
}

/// Tensor layout the exported model uses for its input and both outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TensorLayout {
    /// `[1, H, W, C]`, as exported from TensorFlow.
    #[default]
    Nhwc,
    /// `[1, C, H, W]`.
    Nchw,
}

pub struct EastNet {
    session: Session,
    layout: TensorLayout,
    mean: [f32; 3],
}

impl EastNet {
    #[instrument(level = "debug")]
    pub fn init(
        path: PathBuf,
        num_threads: usize,
        layout: TensorLayout,
        mean: [f32; 3],
    ) -> Result<Self> {
        if !path.is_file() {
            return Err(Error::MissingCheckpoint(path));
        }
        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_inter_threads(num_threads)?
            .with_intra_threads(num_threads)?
            .commit_from_file(path)?;

        Ok(Self {
            session,
            layout,
            mean,
        })
    }
}

impl TextDetectionModel for EastNet {
    #[instrument(skip(self, image), level = "debug")]
    fn infer(&self, image: &RgbImage) -> Result<DetectionMaps> {
        let input_values = to_input_tensor(image, &self.mean, self.layout);
        let input_name = self
            .session
            .inputs
            .first()
            .map(|input| input.name.as_str())
            .ok_or_else(|| Error::MapShape("model declares no inputs".to_string()))?;
        let (score_name, geometry_name) = match self.session.outputs.as_slice() {
            [score, geometry, ..] => (score.name.as_str(), geometry.name.as_str()),
            _ => {
                return Err(Error::MapShape(
                    "model must declare score and geometry outputs".to_string(),
                ))
            }
        };

        let outputs = self.session.run(inputs![input_name => input_values]?)?;
        let output = |name: &str| {
            outputs
                .get(name)
                .ok_or_else(|| Error::MapShape(format!("missing output {name}")))
        };
        let score = output(score_name)?.try_extract_tensor::<f32>()?;
        let geometry = output(geometry_name)?.try_extract_tensor::<f32>()?;
        extract_maps(score, geometry, self.layout)
    }
}

/// Raw RGB values minus the per-channel mean, batched in `layout`.
pub(crate) fn to_input_tensor(
    image: &RgbImage,
    mean: &[f32; 3],
    layout: TensorLayout,
) -> Array4<f32> {
    let (width, height) = (image.width() as usize, image.height() as usize);
    let value = |x: usize, y: usize, ch: usize| {
        image.get_pixel(x as u32, y as u32)[ch] as f32 - mean[ch]
    };
    match layout {
        TensorLayout::Nhwc => {
            Array4::from_shape_fn((1, height, width, 3), |(_, y, x, ch)| value(x, y, ch))
        }
        TensorLayout::Nchw => {
            Array4::from_shape_fn((1, 3, height, width), |(_, ch, y, x)| value(x, y, ch))
        }
    }
}

fn expect_4d<'a>(tensor: ArrayViewD<'a, f32>, what: &str) -> Result<ArrayView4<'a, f32>> {
    let tensor = tensor
        .into_dimensionality::<Ix4>()
        .map_err(|e| Error::MapShape(format!("{what} output: {e}")))?;
    if tensor.len_of(Axis(0)) != 1 {
        return Err(Error::MapShape(format!(
            "{what} output has batch size {}, expected 1",
            tensor.len_of(Axis(0))
        )));
    }
    Ok(tensor)
}

pub(crate) fn extract_maps(
    score: ArrayViewD<'_, f32>,
    geometry: ArrayViewD<'_, f32>,
    layout: TensorLayout,
) -> Result<DetectionMaps> {
    let score = expect_4d(score, "score")?;
    let geometry = expect_4d(geometry, "geometry")?.index_axis_move(Axis(0), 0);
    let (score_axis, geometry) = match layout {
        TensorLayout::Nhwc => (Axis(3), geometry),
        TensorLayout::Nchw => (Axis(1), geometry.permuted_axes([1, 2, 0])),
    };
    if score.len_of(score_axis) != 1 || geometry.len_of(Axis(2)) != GEOMETRY_CHANNELS {
        return Err(Error::MapShape(format!(
            "unexpected output shapes {:?} and {:?} for {layout:?}",
            score.shape(),
            geometry.shape()
        )));
    }
    let score = score
        .index_axis_move(score_axis, 0)
        .index_axis_move(Axis(0), 0)
        .to_owned();
    DetectionMaps::new(score, geometry.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use ndarray::{Array, IxDyn};

    #[test]
    fn input_tensor_follows_layout() {
        let mut image = RgbImage::new(3, 2);
        image.put_pixel(2, 1, Rgb([10, 20, 30]));
        let mean = [1.0, 2.0, 3.0];

        let nhwc = to_input_tensor(&image, &mean, TensorLayout::Nhwc);
        assert_eq!(nhwc.shape(), &[1, 2, 3, 3]);
        assert_eq!(nhwc[[0, 1, 2, 1]], 18.0);
        assert_eq!(nhwc[[0, 0, 0, 2]], -3.0);

        let nchw = to_input_tensor(&image, &mean, TensorLayout::Nchw);
        assert_eq!(nchw.shape(), &[1, 3, 2, 3]);
        assert_eq!(nchw[[0, 2, 1, 2]], 27.0);
    }

    #[test]
    fn nchw_outputs_are_transposed_to_cell_major() {
        let score = Array::from_shape_fn(IxDyn(&[1, 1, 2, 3]), |idx| (idx[2] * 3 + idx[3]) as f32);
        let geometry = Array::from_shape_fn(IxDyn(&[1, 5, 2, 3]), |idx| {
            (idx[1] * 100 + idx[2] * 10 + idx[3]) as f32
        });
        let maps = extract_maps(score.view(), geometry.view(), TensorLayout::Nchw).unwrap();
        assert_eq!((maps.rows(), maps.cols()), (2, 3));
        assert_eq!(maps.score()[[1, 2]], 5.0);
        assert_eq!(maps.geometry()[[1, 2, 4]], 412.0);
    }

    #[test]
    fn nhwc_outputs_keep_their_layout() {
        let score = Array::from_elem(IxDyn(&[1, 4, 2, 1]), 0.5f32);
        let geometry = Array::from_shape_fn(IxDyn(&[1, 4, 2, 5]), |idx| idx[3] as f32);
        let maps = extract_maps(score.view(), geometry.view(), TensorLayout::Nhwc).unwrap();
        assert_eq!((maps.rows(), maps.cols()), (4, 2));
        assert_eq!(maps.geometry()[[3, 1, 4]], 4.0);
    }

    #[test]
    fn wrong_layout_is_reported() {
        let score = Array::from_elem(IxDyn(&[1, 1, 4, 4]), 0.5f32);
        let geometry = Array::from_elem(IxDyn(&[1, 5, 4, 4]), 0.0f32);
        assert!(matches!(
            extract_maps(score.view(), geometry.view(), TensorLayout::Nhwc),
            Err(Error::MapShape(_))
        ));
    }

    #[test]
    fn missing_model_file_is_fatal() {
        let missing = PathBuf::from("models/does-not-exist.onnx");
        assert!(matches!(
            EastNet::init(missing, 1, TensorLayout::Nhwc, [0.0; 3]),
            Err(Error::MissingCheckpoint(_))
        ));
    }
}
