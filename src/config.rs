use clap::Parser;
use std::collections::HashMap;
use std::path::PathBuf;

#[derive(Debug, Clone, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Server host to bind to
    #[arg(long, env = "HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Server port to bind to
    #[arg(long, env = "PORT", default_value = "8000")]
    pub port: u16,

    /// Model ID from Hugging Face Hub
    #[arg(long, env = "MODEL_ID", default_value = "google/vit-base-patch16-224")]
    pub model_id: Option<String>,

    /// Local path to model directory (takes precedence over --model-id)
    #[arg(long, env = "MODEL_PATH")]
    pub model_path: Option<PathBuf>,

    /// Model revision/branch on Hugging Face
    #[arg(long, env = "MODEL_REVISION", default_value = "main")]
    pub model_revision: String,

    /// Use PyTorch weights instead of safetensors
    #[arg(long, env = "USE_PTH")]
    pub use_pth: bool,

    /// Run on CPU instead of GPU
    #[arg(long, env = "CPU_ONLY")]
    pub cpu_only: bool,

    /// Labels mapping in format "0=patio,1=reaper"
    #[arg(long, env = "ID2LABEL")]
    pub id2label: Option<String>,

    /// Directory uploaded images are written to while they are classified
    #[arg(long, env = "SCRATCH_DIR", default_value = "uploads")]
    pub scratch_dir: PathBuf,

    /// Maximum accepted request body size in bytes
    #[arg(long, env = "MAX_UPLOAD_BYTES", default_value = "10485760")]
    pub max_upload_bytes: usize,

    /// Answer failed requests with 200 OK and an error body
    #[arg(long, env = "LEGACY_ERROR_STATUS")]
    pub legacy_error_status: bool,
}

impl Config {
    pub fn parse_id2label(&self) -> Option<HashMap<u32, String>> {
        self.id2label.as_deref().map(parse_label_pairs)
    }

    pub fn server_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_label_pairs(labels: &str) -> HashMap<u32, String> {
    labels
        .split(',')
        .filter_map(|pair| {
            let (id, label) = pair.split_once('=')?;
            let id = id.trim().parse().ok()?;
            Some((id, label.trim().to_string()))
        })
        .collect()
}
