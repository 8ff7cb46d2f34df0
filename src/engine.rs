use anyhow::Result;
use async_trait::async_trait;
use std::path::Path;

#[async_trait]
pub trait Engine {
    /// Classifies the image stored at `image_path` and returns the model's label.
    async fn classify(&self, image_path: &Path) -> Result<String>;
}
