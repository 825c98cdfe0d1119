use std::collections::HashMap;
use std::path::Path;
use tch::nn;
use tch::{Device, Kind, TchError, Tensor};

use shared::Condition;

use super::config::{PreprocessingConfig, POOL_STAGES};
use super::preprocess::PreprocessedTensor;
use super::PipelineError;

const INPUT_CHANNELS: i64 = 3;

/// conv -> relu -> conv -> relu -> maxpool(2)
///
/// Variables live under `<block>.0` and `<block>.2` so a PyTorch
/// `nn.Sequential` state dict maps one to one.
#[derive(Debug)]
struct ConvBlock {
    first: nn::Conv2D,
    second: nn::Conv2D,
}

impl ConvBlock {
    fn new(p: nn::Path, in_channels: i64, hidden: i64) -> Self {
        let cfg = nn::ConvConfig {
            padding: 1,
            ..Default::default()
        };
        Self {
            first: nn::conv2d(&p / 0, in_channels, hidden, 3, cfg),
            second: nn::conv2d(&p / 2, hidden, hidden, 3, cfg),
        }
    }
}

/// 3x3 convolution, stride 1, padding 1.
fn conv3x3(xs: &Tensor, conv: &nn::Conv2D) -> Result<Tensor, TchError> {
    xs.f_conv2d(&conv.ws, conv.bs.as_ref(), [1, 1], [1, 1], [1, 1], 1)
}

impl ConvBlock {
    fn f_forward(&self, xs: &Tensor) -> Result<Tensor, TchError> {
        conv3x3(xs, &self.first)?
            .f_relu()
            .and_then(|t| conv3x3(&t, &self.second))?
            .f_relu()?
            .f_max_pool2d([2, 2], [2, 2], [0, 0], [1, 1], false)
    }
}

/// Three conv blocks and a linear head over the flattened feature map.
#[derive(Debug)]
pub struct TinyVgg {
    blocks: [ConvBlock; 3],
    classifier: nn::Linear,
}

impl TinyVgg {
    pub fn new(root: &nn::Path, config: &PreprocessingConfig) -> Self {
        let hidden = config.model.hidden_units;
        let blocks = [
            ConvBlock::new(root / "conv_block_1", INPUT_CHANNELS, hidden),
            ConvBlock::new(root / "conv_block_2", hidden, hidden),
            ConvBlock::new(root / "conv_block_3", hidden, hidden),
        ];
        let classifier = nn::linear(
            root / "classifier" / 1,
            Self::flattened_features(config),
            config.model.num_classes,
            Default::default(),
        );
        Self { blocks, classifier }
    }

    /// Width of the linear layer input; each pool halves the spatial dims (floor).
    pub fn flattened_features(config: &PreprocessingConfig) -> i64 {
        let h = (config.height() >> POOL_STAGES) as i64;
        let w = (config.width() >> POOL_STAGES) as i64;
        config.model.hidden_units * h * w
    }
}

impl TinyVgg {
    /// Forward pass that reports libtorch failures instead of panicking.
    pub fn f_forward(&self, xs: &Tensor) -> Result<Tensor, TchError> {
        let mut features = xs.shallow_clone();
        for block in &self.blocks {
            features = block.f_forward(&features)?;
        }
        features
            .f_flatten(1, -1)?
            .f_linear(&self.classifier.ws, self.classifier.bs.as_ref())
    }
}

/// A `TinyVgg` bound to trained weights.
pub struct EyeClassifier {
    vs: nn::VarStore,
    net: TinyVgg,
    config: PreprocessingConfig,
}

impl std::fmt::Debug for EyeClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EyeClassifier")
            .field("device", &self.device())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl EyeClassifier {
    pub fn load(
        weights_path: &Path,
        config: PreprocessingConfig,
        device: Device,
    ) -> Result<Self, PipelineError> {
        if !weights_path.exists() {
            return Err(PipelineError::NotFound(format!(
                "Model file not found: {}",
                weights_path.display()
            )));
        }
        let vs = nn::VarStore::new(device);
        let net = TinyVgg::new(&vs.root(), &config);
        let blob = read_weights(weights_path)?;
        copy_weights(&vs, blob)?;
        log::info!(
            "Loaded {} tensors from {} onto {:?}",
            vs.len(),
            weights_path.display(),
            device
        );
        Ok(Self { vs, net, config })
    }

    /// Randomly initialised network, used to produce weights files in tests.
    #[cfg(test)]
    pub fn untrained(config: PreprocessingConfig) -> Self {
        let vs = nn::VarStore::new(Device::Cpu);
        let net = TinyVgg::new(&vs.root(), &config);
        Self { vs, net, config }
    }

    #[cfg(test)]
    pub fn save(&self, path: &Path) -> Result<(), tch::TchError> {
        self.vs.save(path)
    }

    pub fn config(&self) -> &PreprocessingConfig {
        &self.config
    }

    pub fn device(&self) -> Device {
        self.vs.device()
    }

    /// Raw output scores of a single forward pass in inference mode.
    pub fn scores(&self, input: &PreprocessedTensor) -> Result<Vec<f32>, PipelineError> {
        let expected = (
            INPUT_CHANNELS as usize,
            self.config.height() as usize,
            self.config.width() as usize,
        );
        if input.shape() != expected {
            return Err(PipelineError::Inference(format!(
                "input shape {:?} does not match model input {:?}",
                input.shape(),
                expected
            )));
        }

        self.forward_scores(&input.to_tensor(self.device()))
    }

    fn forward_scores(&self, xs: &Tensor) -> Result<Vec<f32>, PipelineError> {
        let output = tch::no_grad(|| self.net.f_forward(xs))
            .map_err(|e| PipelineError::Inference(format!("forward pass failed: {}", e)))?;
        let num_classes = self.config.model.num_classes;
        if output.size() != [1, num_classes] {
            return Err(PipelineError::Inference(format!(
                "unexpected output shape {:?}",
                output.size()
            )));
        }

        let output_flat = output
            .f_to_kind(Kind::Float)
            .and_then(|t| t.f_to_device(Device::Cpu))
            .and_then(|t| t.f_view([-1]))
            .map_err(|e| PipelineError::Inference(format!("cannot read scores: {}", e)))?;
        let num_elements = output_flat.size()[0] as usize;
        let mut output_vec = vec![0.0f32; num_elements];
        output_flat
            .f_copy_data(&mut output_vec, num_elements)
            .map_err(|e| PipelineError::Inference(format!("cannot read scores: {}", e)))?;
        Ok(output_vec)
    }

    /// Index of the highest score.
    pub fn predict(&self, input: &PreprocessedTensor) -> Result<usize, PipelineError> {
        let scores = self.scores(input)?;
        argmax(&scores).ok_or_else(|| {
            PipelineError::Inference(format!("no usable score in output {:?}", scores))
        })
    }

    pub fn predict_condition(&self, input: &PreprocessedTensor) -> Result<Condition, PipelineError> {
        let index = self.predict(input)?;
        Ok(Condition::from_index(index as i64)?)
    }
}

/// Ties resolve to the lowest index; NaN never wins.
pub fn argmax(scores: &[f32]) -> Option<usize> {
    scores
        .iter()
        .enumerate()
        .fold(None, |best: Option<(usize, f32)>, (i, &s)| {
            if s.is_nan() {
                return best;
            }
            match best {
                Some((_, b)) if b >= s => best,
                _ => Some((i, s)),
            }
        })
        .map(|(i, _)| i)
}

fn read_weights(path: &Path) -> Result<HashMap<String, Tensor>, PipelineError> {
    let is_safetensors = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("safetensors"));
    let named = if is_safetensors {
        Tensor::read_safetensors(path)
    } else {
        Tensor::load_multi(path)
    }
    .map_err(|e| {
        PipelineError::ModelLoad(format!("cannot read weights {}: {}", path.display(), e))
    })?;
    Ok(named.into_iter().collect())
}

/// Strict load: every variable must be present with the exact shape, and the
/// blob must not carry tensors the topology does not know about.
fn copy_weights(vs: &nn::VarStore, mut blob: HashMap<String, Tensor>) -> Result<(), PipelineError> {
    for (name, mut var) in vs.variables() {
        let src = blob
            .remove(&name)
            .ok_or_else(|| PipelineError::ModelLoad(format!("missing tensor '{}'", name)))?;
        if src.size() != var.size() {
            return Err(PipelineError::ModelLoad(format!(
                "shape mismatch for '{}': weights have {:?}, model expects {:?}",
                name,
                src.size(),
                var.size()
            )));
        }
        tch::no_grad(|| var.f_copy_(&src))
            .map_err(|e| PipelineError::ModelLoad(format!("cannot copy '{}': {}", name, e)))?;
    }
    if !blob.is_empty() {
        let mut extra: Vec<_> = blob.into_keys().collect();
        extra.sort();
        return Err(PipelineError::ModelLoad(format!(
            "unexpected tensors in weights: {}",
            extra.join(", ")
        )));
    }
    Ok(())
}
