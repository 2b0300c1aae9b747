use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use crossbeam::channel::{bounded, Receiver};
use tracing::{debug, info};

use crate::metadata::gallery::GalleryMetadata;
use crate::metadata::MetadataError;

/// Where gallery metadata comes from.
pub trait MetadataSource: Send + Sync {
    fn fetch(&self, gid: i64, token: &str) -> Result<GalleryMetadata, MetadataError>;
}

/// Reads a saved gallery API `gdata` response from disk.
pub struct JsonFileSource {
    path: PathBuf,
}

impl JsonFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl MetadataSource for JsonFileSource {
    fn fetch(&self, gid: i64, token: &str) -> Result<GalleryMetadata, MetadataError> {
        debug!("Reading gallery {} ({}) from {:?}", gid, token, self.path);
        let body = fs::read_to_string(&self.path)?;
        let meta = GalleryMetadata::from_gdata_response(&body, gid)?;
        if meta.token != token {
            return Err(MetadataError::Invalid(format!(
                "token mismatch: expected {}, got {}",
                token, meta.token
            )));
        }
        Ok(meta)
    }
}

/// A metadata fetch running on its own thread.
///
/// Dropping the task discards the result; nothing is written on its behalf.
pub struct FetchTask {
    rx: Receiver<Result<GalleryMetadata, MetadataError>>,
}

impl FetchTask {
    pub fn spawn(source: Arc<dyn MetadataSource>, gid: i64, token: String) -> Self {
        let (tx, rx) = bounded(1);
        thread::spawn(move || {
            let result = source.fetch(gid, &token);
            if tx.send(result).is_err() {
                info!("Metadata fetch for gallery {} finished after its task was dropped", gid);
            }
        });
        Self { rx }
    }

    /// Blocks until the fetch completes.
    pub fn wait(self) -> Result<GalleryMetadata, MetadataError> {
        self.rx.recv().unwrap_or(Err(MetadataError::Cancelled))
    }
}
