use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use candle_core::utils::{cuda_is_available, metal_is_available};
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::vit;
use hf_hub::{Repo, RepoType, api::tokio::Api};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::engine::Engine;
use crate::preprocess::ImageProcessorConfig;

pub struct VitEngine {
    model: vit::Model,
    processor: ImageProcessorConfig,
    device: Device,
    id2label: HashMap<u32, String>,
}

#[derive(Debug, Clone)]
pub struct VitConfig {
    pub model_id: Option<String>,
    pub model_path: Option<PathBuf>,
    pub revision: String,
    pub use_pth: bool,
    pub cpu: bool,
    pub id2label: Option<HashMap<u32, String>>,
}

impl Default for VitConfig {
    fn default() -> Self {
        Self {
            model_id: Some("google/vit-base-patch16-224".to_string()),
            model_path: None,
            revision: "main".to_string(),
            use_pth: false,
            cpu: false,
            id2label: None,
        }
    }
}

/// The part of the Hub `config.json` this engine reads.
#[derive(Debug, Deserialize)]
struct HubModelConfig {
    #[serde(default)]
    id2label: HashMap<String, String>,
}

struct ModelFiles {
    config: PathBuf,
    preprocessor: Option<PathBuf>,
    weights: PathBuf,
}

impl VitEngine {
    fn device(cpu: bool) -> Result<Device> {
        if cpu {
            Ok(Device::Cpu)
        } else if metal_is_available() {
            tracing::info!("Using metal acceleration");
            Ok(Device::new_metal(0)?)
        } else if cuda_is_available() {
            tracing::info!("Using CUDA GPU acceleration");
            Ok(Device::new_cuda(0)?)
        } else {
            tracing::info!(
                "CUDA not available, running on CPU. To run on GPU, build with `--features cuda`"
            );
            Ok(Device::Cpu)
        }
    }

    fn weights_name(use_pth: bool) -> &'static str {
        if use_pth {
            "pytorch_model.bin"
        } else {
            "model.safetensors"
        }
    }

    // Local directories take precedence over the Hub.
    async fn resolve_files(config: &VitConfig) -> Result<ModelFiles> {
        let weights_name = Self::weights_name(config.use_pth);

        if let Some(base_path) = &config.model_path {
            if !base_path.is_dir() {
                bail!("Model path {} is not a directory.", base_path.display());
            }
            let preprocessor = base_path.join("preprocessor_config.json");
            return Ok(ModelFiles {
                config: base_path.join("config.json"),
                preprocessor: preprocessor.is_file().then_some(preprocessor),
                weights: base_path.join(weights_name),
            });
        }

        let Some(model_id) = config.model_id.clone() else {
            bail!("Either model_id or model_path must be specified");
        };

        let repo = Repo::with_revision(model_id, RepoType::Model, config.revision.clone());
        let api = Api::new()?.repo(repo);
        let config_file = api.get("config.json").await?;
        let preprocessor = match api.get("preprocessor_config.json").await {
            Ok(path) => Some(path),
            Err(e) => {
                tracing::warn!(error = %e, "preprocessor_config.json unavailable");
                None
            }
        };
        let weights = api.get(weights_name).await?;

        Ok(ModelFiles {
            config: config_file,
            preprocessor,
            weights,
        })
    }

    #[tracing::instrument(skip(config), fields(model_id = ?config.model_id, cpu = config.cpu))]
    pub async fn new(config: VitConfig) -> Result<Self> {
        let device = Self::device(config.cpu)?;
        let files = Self::resolve_files(&config).await?;

        let model_config = std::fs::read_to_string(&files.config)
            .with_context(|| format!("reading {}", files.config.display()))?;
        let model_config: HubModelConfig = serde_json::from_str(&model_config)?;

        // Command-line id2label takes precedence. Otherwise, use model config's id2label.
        let id2label = match config.id2label {
            Some(id2label) => id2label,
            None => parse_hub_labels(&model_config.id2label)?,
        };
        if id2label.is_empty() {
            bail!("Id2Label not found in the model configuration nor specified as a parameter");
        }

        let processor = match &files.preprocessor {
            Some(path) => ImageProcessorConfig::from_file(path)?,
            None => ImageProcessorConfig::default(),
        };

        let vit_config = vit::Config::vit_base_patch16_224();
        if processor.image_size() as usize != vit_config.image_size {
            bail!(
                "Preprocessor resizes to {} but the model expects {}x{} inputs",
                processor.image_size(),
                vit_config.image_size,
                vit_config.image_size
            );
        }

        let vb = if config.use_pth {
            VarBuilder::from_pth(&files.weights, DType::F32, &device)?
        } else {
            unsafe { VarBuilder::from_mmaped_safetensors(&[&files.weights], DType::F32, &device)? }
        };
        let model = vit::Model::new(&vit_config, num_labels(&id2label), vb)?;

        tracing::info!(
            num_labels = id2label.len(),
            image_size = processor.image_size(),
            "ViT classifier ready"
        );

        Ok(Self {
            model,
            processor,
            device,
            id2label,
        })
    }
}

#[async_trait]
impl Engine for VitEngine {
    #[tracing::instrument(skip(self))]
    async fn classify(&self, image_path: &Path) -> Result<String> {
        let processor = self.processor.clone();
        let path = image_path.to_path_buf();
        let pixels = tokio::task::spawn_blocking(move || processor.load(&path)).await??;

        let size = self.processor.image_size() as usize;
        let input = Tensor::from_vec(pixels, (1, 3, size, size), &self.device)?;

        let logits = self.model.forward(&input).context("forward pass")?;
        let predictions = logits.argmax(1)?.to_vec1::<u32>()?;
        let Some(&prediction) = predictions.first() else {
            bail!("Model returned no predictions");
        };

        let label = label_for(&self.id2label, prediction);
        tracing::debug!(prediction, %label, "Image classified");
        Ok(label)
    }
}

fn parse_hub_labels(raw: &HashMap<String, String>) -> Result<HashMap<u32, String>> {
    raw.iter()
        .map(|(id, label)| {
            let id = id
                .parse::<u32>()
                .with_context(|| format!("invalid id2label key {id:?}"))?;
            Ok((id, label.clone()))
        })
        .collect()
}

fn num_labels(id2label: &HashMap<u32, String>) -> usize {
    id2label.keys().max().map_or(0, |max| *max as usize + 1)
}

fn label_for(id2label: &HashMap<u32, String>, prediction: u32) -> String {
    id2label
        .get(&prediction)
        .cloned()
        .unwrap_or_else(|| format!("LABEL_{prediction}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels() -> HashMap<u32, String> {
        HashMap::from([
            (0, "patio, terrace".to_string()),
            (2, "harvester, reaper".to_string()),
        ])
    }

    #[test]
    fn hub_labels_use_numeric_keys() {
        let raw = HashMap::from([
            ("0".to_string(), "tench, Tinca tinca".to_string()),
            ("999".to_string(), "toilet tissue".to_string()),
        ]);
        let parsed = parse_hub_labels(&raw).unwrap();
        assert_eq!(parsed[&999], "toilet tissue");
        assert_eq!(num_labels(&parsed), 1000);
    }

    #[test]
    fn hub_labels_reject_non_numeric_keys() {
        let raw = HashMap::from([("zero".to_string(), "x".to_string())]);
        assert!(parse_hub_labels(&raw).is_err());
    }

    #[test]
    fn head_size_covers_sparse_ids() {
        assert_eq!(num_labels(&labels()), 3);
        assert_eq!(num_labels(&HashMap::new()), 0);
    }

    #[test]
    fn unknown_index_renders_placeholder() {
        assert_eq!(label_for(&labels(), 2), "harvester, reaper");
        assert_eq!(label_for(&labels(), 1), "LABEL_1");
    }

    #[test]
    fn hub_config_without_labels_parses_empty() {
        let config: HubModelConfig =
            serde_json::from_str(r#"{"hidden_size": 768, "image_size": 224}"#).unwrap();
        assert!(config.id2label.is_empty());
    }

    #[tokio::test]
    async fn missing_model_directory_is_rejected() {
        let config = VitConfig {
            model_path: Some(PathBuf::from("/nonexistent/vit-model")),
            cpu: true,
            ..Default::default()
        };
        let err = VitEngine::new(config).await.err().unwrap();
        assert!(err.to_string().contains("is not a directory"));
    }
}
