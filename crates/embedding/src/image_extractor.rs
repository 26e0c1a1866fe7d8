//! Pixel preprocessing for image samples.

use std::path::Path;

use candle_core::{DType, Device, Tensor};
use image::imageops::FilterType;
use image::DynamicImage;
use serde::{Deserialize, Serialize};

use crate::config::ExtractionParams;
use crate::error::EmbeddingError;
use crate::features::{FeatureBatch, FeatureExtractor, Payload};

/// Target resolution as written in `preprocessor_config.json`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ImageSize {
    Square(u32),
    Exact { height: u32, width: u32 },
    /// Scale the short side to this length, then center crop a square.
    ShortestEdge { shortest_edge: u32 },
}

impl ImageSize {
    /// `(width, height)` of the produced pixel grid.
    pub fn dimensions(self) -> (u32, u32) {
        match self {
            Self::Square(side) | Self::ShortestEdge { shortest_edge: side } => (side, side),
            Self::Exact { height, width } => (width, height),
        }
    }
}

fn default_size() -> ImageSize {
    ImageSize::Square(224)
}

fn default_true() -> bool {
    true
}

fn default_rescale_factor() -> f64 {
    1.0 / 255.0
}

fn default_mean() -> [f32; 3] {
    [0.5, 0.5, 0.5]
}

fn default_std() -> [f32; 3] {
    [0.5, 0.5, 0.5]
}

/// The subset of an image processor configuration needed to produce `pixel_values`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageProcessorConfig {
    #[serde(default = "default_size")]
    pub size: ImageSize,
    /// Pillow resampling filter id.
    #[serde(default)]
    pub resample: Option<usize>,
    #[serde(default = "default_true")]
    pub do_rescale: bool,
    #[serde(default = "default_rescale_factor")]
    pub rescale_factor: f64,
    #[serde(default = "default_true")]
    pub do_normalize: bool,
    #[serde(default = "default_mean")]
    pub image_mean: [f32; 3],
    #[serde(default = "default_std")]
    pub image_std: [f32; 3],
}

impl Default for ImageProcessorConfig {
    fn default() -> Self {
        Self {
            size: default_size(),
            resample: None,
            do_rescale: true,
            rescale_factor: default_rescale_factor(),
            do_normalize: true,
            image_mean: default_mean(),
            image_std: default_std(),
        }
    }
}

impl ImageProcessorConfig {
    fn filter(&self) -> Result<FilterType, EmbeddingError> {
        match self.resample {
            Some(0 | 4) => Ok(FilterType::Nearest),
            Some(1) => Ok(FilterType::Lanczos3),
            Some(2) | None => Ok(FilterType::Triangle),
            Some(3) => Ok(FilterType::CatmullRom),
            Some(other) => Err(EmbeddingError::ModelLoad(format!(
                "resampling filter {other} not supported"
            ))),
        }
    }
}

/// Resizes, rescales and normalizes images into a `[batch, 3, height, width]` tensor.
#[derive(Debug, Clone)]
pub struct ImageFeatureExtractor {
    config: ImageProcessorConfig,
    filter: FilterType,
}

impl ImageFeatureExtractor {
    pub fn new(config: ImageProcessorConfig) -> Result<Self, EmbeddingError> {
        let filter = config.filter()?;
        Ok(Self { config, filter })
    }

    /// Loads a `preprocessor_config.json`.
    pub fn from_file(path: &Path) -> Result<Self, EmbeddingError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| EmbeddingError::ModelLoad(format!("reading {}: {e}", path.display())))?;
        let config: ImageProcessorConfig = serde_json::from_str(&raw)
            .map_err(|e| EmbeddingError::ModelLoad(format!("parsing {}: {e}", path.display())))?;
        Self::new(config)
    }

    pub fn config(&self) -> &ImageProcessorConfig {
        &self.config
    }

    fn pixels(&self, image: &DynamicImage) -> candle_core::Result<Tensor> {
        let (width, height) = self.config.size.dimensions();
        let resized = match self.config.size {
            ImageSize::ShortestEdge { .. } => image.resize_to_fill(width, height, self.filter),
            ImageSize::Square(_) | ImageSize::Exact { .. } => {
                image.resize_exact(width, height, self.filter)
            }
        };
        let data = resized.to_rgb8().into_raw();
        let mut pixels = Tensor::from_vec(data, (height as usize, width as usize, 3), &Device::Cpu)?
            .permute((2, 0, 1))?
            .to_dtype(DType::F32)?;
        if self.config.do_rescale {
            pixels = pixels.affine(self.config.rescale_factor, 0.0)?;
        }
        if self.config.do_normalize {
            let mean = Tensor::new(&self.config.image_mean, &Device::Cpu)?.reshape((3, 1, 1))?;
            let std = Tensor::new(&self.config.image_std, &Device::Cpu)?.reshape((3, 1, 1))?;
            pixels = pixels.broadcast_sub(&mean)?.broadcast_div(&std)?;
        }
        Ok(pixels)
    }
}

impl FeatureExtractor for ImageFeatureExtractor {
    /// Token limits do not apply to pixels, so `params` is unused.
    fn extract(
        &self,
        data: &[Payload],
        _params: &ExtractionParams,
    ) -> Result<FeatureBatch, EmbeddingError> {
        if data.is_empty() {
            return Ok(FeatureBatch::new());
        }
        let images = data
            .iter()
            .map(|p| {
                let image = p.as_image().ok_or_else(|| {
                    EmbeddingError::InvalidInput(format!(
                        "image processor received a {} payload",
                        p.kind()
                    ))
                })?;
                self.pixels(image)
                    .map_err(|e| EmbeddingError::ImageDecode(format!("preprocessing image: {e}")))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let pixel_values = Tensor::stack(&images, 0)
            .map_err(|e| EmbeddingError::ImageDecode(format!("stacking pixel values: {e}")))?;
        Ok(FeatureBatch::new().with("pixel_values", pixel_values))
    }
}
