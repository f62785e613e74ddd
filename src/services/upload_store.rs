use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};

pub struct SavedFile {
    pub path: PathBuf,
    pub size: u64,
}

/// Writes uploads into the directory the OCR worker reads its input from.
pub struct UploadStore {
    dir: PathBuf,
}

impl UploadStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, file_name: &str) -> PathBuf {
        self.dir.join(file_name)
    }

    /// Streams `reader` to `<dir>/<file_name>`, replacing an existing file of
    /// the same name. `file_name` must already be sanitized.
    pub async fn save<R>(&self, file_name: &str, mut reader: R) -> Result<SavedFile>
    where
        R: AsyncRead + Unpin + Send,
    {
        fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create upload dir {}", self.dir.display()))?;

        let path = self.path_for(file_name);
        let mut file = fs::File::create(&path)
            .await
            .with_context(|| format!("Failed to create {}", path.display()))?;

        let chunk_size = 64 * 1024;
        let mut buffer = vec![0u8; chunk_size];
        let mut size = 0u64;

        loop {
            let n = reader.read(&mut buffer).await?;
            if n == 0 {
                break;
            }
            file.write_all(&buffer[..n]).await?;
            size += n as u64;
        }

        file.flush().await?;

        Ok(SavedFile { path, size })
    }

    pub async fn remove(&self, file_name: &str) -> Result<()> {
        fs::remove_file(self.path_for(file_name)).await?;
        Ok(())
    }

    /// Size of a file already in the upload dir.
    pub async fn size_of(&self, file_name: &str) -> Result<u64> {
        let path = self.path_for(file_name);
        let meta = fs::metadata(&path)
            .await
            .with_context(|| format!("Input file {} not found", path.display()))?;
        Ok(meta.len())
    }
}
