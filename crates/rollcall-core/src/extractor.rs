//! Embedding extraction boundary.
//!
//! The recognition model is an external collaborator: an opaque ONNX file
//! that maps one face image to one fixed-length float vector. Everything
//! above this module only sees the [`Extractor`] trait.

use crate::types::Embedding;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const PIXEL_SCALE: f32 = 255.0;

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("image decode failed: {0}")]
    Decode(#[from] image::ImageError),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("model produced an empty embedding")]
    EmptyEmbedding,
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// One probe image in, one embedding out.
///
/// Implementations own whatever session state inference needs; the daemon
/// engine drives a single extractor from its own thread.
pub trait Extractor: Send {
    fn extract(&mut self, image_bytes: &[u8]) -> Result<Embedding, ExtractError>;
}

/// ONNX-backed extractor for VGG-Face-style recognition models.
///
/// Decodes the image, resizes it to the model's square input edge, and feeds
/// an RGB NCHW tensor scaled to [0, 1]. The first output tensor, flattened,
/// is the embedding; its length is whatever the model produces.
pub struct OnnxExtractor {
    session: Session,
    input_edge: usize,
}

impl OnnxExtractor {
    /// Load the recognition model from the given path.
    pub fn load(model_path: &str, input_edge: usize) -> Result<Self, ExtractError> {
        if !Path::new(model_path).exists() {
            return Err(ExtractError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)
            .map_err(ort::Error::from)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = model_path,
            input_edge,
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded recognition model"
        );

        Ok(Self {
            session,
            input_edge,
        })
    }

    /// Resize a decoded image to the model input and lay it out as NCHW floats.
    fn preprocess(rgb: &image::RgbImage, edge: usize) -> Array4<f32> {
        let mut tensor = Array4::<f32>::zeros((1, 3, edge, edge));

        for y in 0..edge {
            for x in 0..edge {
                let pixel = rgb.get_pixel(x as u32, y as u32);
                for c in 0..3 {
                    tensor[[0, c, y, x]] = pixel[c] as f32 / PIXEL_SCALE;
                }
            }
        }

        tensor
    }
}

impl Extractor for OnnxExtractor {
    fn extract(&mut self, image_bytes: &[u8]) -> Result<Embedding, ExtractError> {
        let decoded = image::load_from_memory(image_bytes)?;
        let edge = self.input_edge;
        let rgb = decoded
            .resize_exact(edge as u32, edge as u32, image::imageops::FilterType::Triangle)
            .to_rgb8();

        let input = Self::preprocess(&rgb, edge);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw_data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| ExtractError::InferenceFailed(format!("embedding extraction: {e}")))?;

        let values: Vec<f32> = raw_data.to_vec();
        if values.is_empty() {
            return Err(ExtractError::EmptyEmbedding);
        }

        Ok(Embedding::new(values))
    }
}
