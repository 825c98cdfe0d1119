use image::DynamicImage;
use ndarray::Array3;
use std::path::Path;
use tch::{Device, Tensor};

use super::config::PreprocessingConfig;
use super::PipelineError;

/// Normalized CHW image ready to be fed to the classifier.
#[derive(Debug, Clone)]
pub struct PreprocessedTensor {
    data: Array3<f32>,
}

impl PreprocessedTensor {
    pub fn shape(&self) -> (usize, usize, usize) {
        self.data.dim()
    }

    #[cfg(test)]
    pub fn as_array(&self) -> &Array3<f32> {
        &self.data
    }

    /// Batch-of-one tensor, shape `[1, C, H, W]`.
    pub fn to_tensor(&self, device: Device) -> Tensor {
        let (c, h, w) = self.data.dim();
        let values: Vec<f32> = self.data.iter().copied().collect();
        Tensor::from_slice(&values)
            .view([1, c as i64, h as i64, w as i64])
            .to_device(device)
    }
}

pub fn preprocess_file(
    path: &Path,
    config: &PreprocessingConfig,
) -> Result<PreprocessedTensor, PipelineError> {
    if !path.exists() {
        return Err(PipelineError::NotFound(format!(
            "Image file not found: {}",
            path.display()
        )));
    }
    let bytes = std::fs::read(path)?;
    preprocess_bytes(&bytes, config)
}

pub fn preprocess_bytes(
    bytes: &[u8],
    config: &PreprocessingConfig,
) -> Result<PreprocessedTensor, PipelineError> {
    // Format is sniffed from the content, the extension was only a whitelist gate.
    let image = image::load_from_memory(bytes)?;
    Ok(normalize(&image, config))
}

fn normalize(image: &DynamicImage, config: &PreprocessingConfig) -> PreprocessedTensor {
    let (height, width) = (config.height(), config.width());
    let rgb = image
        .resize_exact(width, height, config.image.resize_method.filter())
        .to_rgb8();

    let mean = &config.normalization.mean;
    let std = &config.normalization.std;
    let data = Array3::from_shape_fn(
        (3, height as usize, width as usize),
        |(c, y, x)| {
            let value = rgb.get_pixel(x as u32, y as u32)[c] as f32 / 255.0;
            (value - mean[c]) / std[c]
        },
    );
    PreprocessedTensor { data }
}
