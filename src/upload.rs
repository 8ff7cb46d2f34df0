use std::io;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use uuid::Uuid;

/// Directory uploaded images live in while they are being classified.
#[derive(Debug, Clone)]
pub struct ScratchDir {
    path: PathBuf,
}

impl ScratchDir {
    /// Creates the directory (and parents) if it does not exist yet.
    pub fn create(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        std::fs::create_dir_all(&path)?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Opens a fresh file named after the request id.
    ///
    /// The client filename only contributes its extension, so two uploads
    /// carrying the same name never share a path.
    pub fn create_file(&self, request_id: Uuid, client_filename: &str) -> io::Result<ScratchFile> {
        let prefix = request_id.simple().to_string();
        let file = tempfile::Builder::new()
            .prefix(&prefix)
            .suffix(&extension_suffix(client_filename))
            .rand_bytes(0)
            .tempfile_in(&self.path)?;
        Ok(ScratchFile { file })
    }
}

/// An uploaded image on disk. The file is deleted when this value is dropped.
#[derive(Debug)]
pub struct ScratchFile {
    file: NamedTempFile,
}

impl ScratchFile {
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Async handle for streaming the upload body into the file.
    pub fn writer(&self) -> io::Result<tokio::fs::File> {
        Ok(tokio::fs::File::from_std(self.file.as_file().try_clone()?))
    }

    /// Deletes the file now, reporting failures instead of swallowing them on drop.
    pub fn remove(self) -> io::Result<()> {
        self.file.close()
    }
}

fn extension_suffix(client_filename: &str) -> String {
    Path::new(client_filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty() && ext.len() <= 8)
        .filter(|ext| ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|ext| format!(".{}", ext.to_ascii_lowercase()))
        .unwrap_or_default()
}
