use crate::data::Cache;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Default cache root, relative to the working directory.
pub const DEFAULT_CACHE_DIR: &str = ".patchcrew/cache";

/// FileCache stores agent turn outputs as files.
///
/// Layout: `{folder}/{instructions_model_hash}/{key}.cache`, where
/// `instructions_model_hash = sha256(instructions + ":" + model)` so that
/// changing a persona prompt or its model starts a fresh folder.
#[derive(Debug, Clone)]
pub struct FileCache {
    folder: PathBuf,
    instructions_model_hash: String,
}

impl FileCache {
    /// `folder` defaults to `.patchcrew/cache`.
    pub fn new(folder: Option<&Path>, instructions_model_hash: String) -> Self {
        Self {
            folder: folder
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CACHE_DIR)),
            instructions_model_hash,
        }
    }

    /// Keys are hex digests, so they are safe as file names.
    fn get_cache_path(&self, key: &str) -> PathBuf {
        self.get_cache_dir().join(format!("{}.cache", key))
    }

    fn get_cache_dir(&self) -> PathBuf {
        self.folder.join(&self.instructions_model_hash)
    }
}

impl Cache for FileCache {
    fn get(&self, key: &str) -> Option<String> {
        let path = self.get_cache_path(key);
        match fs::read_to_string(&path) {
            Ok(contents) => {
                debug!(path = %path.display(), "cache hit");
                Some(contents)
            }
            Err(_) => None,
        }
    }

    fn set(&self, key: &str, value: &str) {
        let path = self.get_cache_path(key);
        let dir = self.get_cache_dir();

        if let Err(e) = fs::create_dir_all(&dir) {
            warn!(dir = %dir.display(), error = %e, "failed to create cache directory");
            return;
        }
        if let Err(e) = fs::write(&path, value) {
            warn!(path = %path.display(), error = %e, "failed to write cache file");
        }
    }
}
