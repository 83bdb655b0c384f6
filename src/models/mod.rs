//! Model artifact downloading and caching via hf-hub.

use crate::error::{ChatError, Result};
use std::path::{Path, PathBuf};
use tracing::info;

/// Fetches HuggingFace repo files into a fixed cache directory.
///
/// `cache_dir` has `HF_HOME` layout: repo files live under `cache_dir/hub`,
/// shared with anything else reading `HF_HOME`.
#[derive(Debug, Clone)]
pub struct ModelStore {
    hub_dir: PathBuf,
}

impl ModelStore {
    /// Create a store rooted at `cache_dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache directory cannot be created.
    pub fn new(cache_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(cache_dir)?;
        info!("model cache directory: {}", cache_dir.display());
        Ok(Self {
            hub_dir: cache_dir.join("hub"),
        })
    }

    /// Path of `filename` in the local cache, without touching the network.
    pub fn cached_path(&self, repo_id: &str, filename: &str) -> Option<PathBuf> {
        hf_hub::Cache::new(self.hub_dir.clone())
            .model(repo_id.to_owned())
            .get(filename)
    }

    fn api(&self) -> Result<hf_hub::api::sync::Api> {
        hf_hub::api::sync::ApiBuilder::new()
            .with_cache_dir(self.hub_dir.clone())
            .with_progress(false)
            .build()
            .map_err(|e| ChatError::Model(format!("failed to create HF API: {e}")))
    }

    /// Get the path to a cached repo file, downloading it if necessary.
    ///
    /// Blocking; call from a blocking-capable context.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be downloaded.
    pub fn get_file(&self, repo_id: &str, filename: &str) -> Result<PathBuf> {
        if let Some(path) = self.cached_path(repo_id, filename) {
            return Ok(path);
        }
        info!("downloading {repo_id}/{filename}");
        self.api()?
            .model(repo_id.to_owned())
            .get(filename)
            .map_err(|e| {
                ChatError::Model(format!("failed to download {filename} from {repo_id}: {e}"))
            })
    }

    /// Download `filenames` and return the snapshot directory holding them.
    ///
    /// # Errors
    ///
    /// Returns an error if any download fails or the list is empty.
    pub fn get_repo_dir(&self, repo_id: &str, filenames: &[&str]) -> Result<PathBuf> {
        let mut snapshot_dir = None;
        for filename in filenames {
            let path = self.get_file(repo_id, filename)?;
            snapshot_dir = path.parent().map(Path::to_path_buf);
        }
        snapshot_dir.ok_or_else(|| {
            ChatError::Model(format!("could not determine repo directory for {repo_id}"))
        })
    }

    /// Download the config, tokenizer and safetensors weights of a
    /// transformers model repo and return its local snapshot directory.
    ///
    /// Blocking; call from a blocking-capable context.
    ///
    /// # Errors
    ///
    /// Returns an error if the repo listing or any download fails, or the
    /// repo has no loadable files.
    pub fn get_model_repo(&self, repo_id: &str) -> Result<PathBuf> {
        let info = self
            .api()?
            .model(repo_id.to_owned())
            .info()
            .map_err(|e| ChatError::Model(format!("failed to list {repo_id}: {e}")))?;
        let files: Vec<&str> = info
            .siblings
            .iter()
            .map(|s| s.rfilename.as_str())
            .filter(|name| is_model_file(name))
            .collect();
        if !files.iter().any(|name| name.ends_with(".safetensors")) {
            return Err(ChatError::Model(format!(
                "{repo_id} has no safetensors weights"
            )));
        }
        info!("fetching {} files for {repo_id}", files.len());
        self.get_repo_dir(repo_id, &files)
    }
}

/// Top-level repo files a transformers checkpoint needs at load time.
///
/// Original-format `consolidated*` checkpoints duplicate the sharded weights
/// and are skipped.
fn is_model_file(name: &str) -> bool {
    if name.contains('/') || name.starts_with("consolidated") {
        return false;
    }
    name.ends_with(".safetensors")
        || name.ends_with(".json")
        || name.ends_with(".jinja")
        || name == "tokenizer.model"
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    #[test]
    fn new_creates_cache_dir() {
        let dir = tempfile::tempdir().unwrap();
        let cache = dir.path().join("hf");
        ModelStore::new(&cache).unwrap();
        assert!(cache.is_dir());
    }

    #[test]
    fn cached_path_is_none_for_empty_cache() {
        let dir = tempfile::tempdir().unwrap();
        let store = ModelStore::new(dir.path()).unwrap();
        assert!(store.cached_path("nonexistent-org/model", "tokenizer.json").is_none());
    }

    #[test]
    fn model_file_filter_keeps_checkpoint_files() {
        for name in [
            "config.json",
            "generation_config.json",
            "model-00001-of-00003.safetensors",
            "model.safetensors.index.json",
            "tokenizer.json",
            "tokenizer_config.json",
            "tokenizer.model",
        ] {
            assert!(is_model_file(name), "{name}");
        }
        for name in [
            "consolidated.safetensors",
            "pytorch_model-00001-of-00002.bin",
            "original/params.json",
            "README.md",
            ".gitattributes",
        ] {
            assert!(!is_model_file(name), "{name}");
        }
    }

    #[test]
    fn repo_dir_needs_at_least_one_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = ModelStore::new(dir.path()).unwrap();
        assert!(matches!(
            store.get_repo_dir("org/model", &[]),
            Err(ChatError::Model(_))
        ));
    }
}
