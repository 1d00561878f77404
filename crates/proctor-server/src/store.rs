use std::path::PathBuf;

/// Filesystem-backed store for uploaded test executables.
///
/// Layout is one directory per task under the media root, as the upload
/// side leaves them. The relay only ever reads: grading agents fetch their
/// test binaries through the download endpoint.
pub struct TestStore {
    media_root: PathBuf,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("invalid file name")]
    InvalidName,
    #[error("test not found")]
    NotFound,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl TestStore {
    pub fn new(media_root: PathBuf) -> Self {
        Self { media_root }
    }

    pub async fn read(&self, task_id: &str, filename: &str) -> Result<Vec<u8>, StoreError> {
        let path = self
            .media_root
            .join(sanitize(task_id)?)
            .join(sanitize(filename)?);

        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Err(StoreError::NotFound),
            Err(err) => Err(err.into()),
        }
    }
}

/// Path components come straight from the URL; nothing that could step
/// outside the media root is allowed through.
fn sanitize(component: &str) -> Result<&str, StoreError> {
    if component.is_empty()
        || component == "."
        || component == ".."
        || component.contains(['/', '\\'])
    {
        return Err(StoreError::InvalidName);
    }
    Ok(component)
}
