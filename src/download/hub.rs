//! Hugging Face hub fetcher.
//!
//! Files come down through `hf-hub`'s blocking API into a cache directory.
//! The manifest query that carries file sizes uses `ureq` directly, since
//! the hub only includes sizes when asked with `?blobs=true`.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use hf_hub::api::sync::ApiBuilder;
use hf_hub::{Cache, Repo};
use log::{debug, info};
use serde::Deserialize;

use super::coordinator::{ArtifactFetcher, DownloadTask};

const DEFAULT_ENDPOINT: &str = "https://huggingface.co";
const MANIFEST_TIMEOUT: Duration = Duration::from_secs(30);

/// `<target>/<model_id with '/' replaced by '_'>`.
pub fn local_dir(target_dir: &Path, model_id: &str) -> PathBuf {
    target_dir.join(model_id.replace('/', "_"))
}

/// Directory the hub fetcher will write into for this task.
pub fn cache_dir(target_dir: Option<&Path>, model_id: &str) -> PathBuf {
    match target_dir {
        Some(target) => local_dir(target, model_id),
        None => Cache::default().path().clone(),
    }
}

/// Directory whose growth tracks download progress: the whole local dir
/// when a target is given, otherwise the repository's folder inside the
/// shared cache (`models--<org>--<name>`).
pub fn monitored_dir(target_dir: Option<&Path>, model_id: &str) -> PathBuf {
    match target_dir {
        Some(target) => local_dir(target, model_id),
        None => cache_dir(None, model_id).join(Repo::model(model_id.to_string()).folder_name()),
    }
}

#[derive(Debug, Deserialize)]
struct Manifest {
    #[serde(default)]
    siblings: Vec<ManifestFile>,
}

#[derive(Debug, Deserialize)]
struct ManifestFile {
    #[serde(default)]
    size: Option<u64>,
}

/// Sum of the sizes listed in a `/api/models/<id>?blobs=true` response.
fn manifest_total(reader: impl std::io::Read) -> anyhow::Result<u64> {
    let manifest: Manifest = serde_json::from_reader(reader).context("Invalid model manifest")?;
    Ok(manifest.siblings.iter().filter_map(|f| f.size).sum())
}

/// Downloads every file of a model repository from the hub.
#[derive(Debug, Clone)]
pub struct HubFetcher {
    endpoint: String,
    token: Option<String>,
}

impl HubFetcher {
    /// Endpoint and token come from `HF_ENDPOINT` / `HF_TOKEN` when set.
    pub fn from_env() -> Self {
        Self {
            endpoint: env::var("HF_ENDPOINT")
                .ok()
                .filter(|e| !e.is_empty())
                .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()),
            token: env::var("HF_TOKEN").ok().filter(|t| !t.is_empty()),
        }
    }

    fn manifest_url(&self, model_id: &str) -> String {
        format!(
            "{}/api/models/{}?blobs=true",
            self.endpoint.trim_end_matches('/'),
            model_id
        )
    }
}

impl ArtifactFetcher for HubFetcher {
    fn total_size(&self, model_id: &str) -> anyhow::Result<u64> {
        let url = self.manifest_url(model_id);
        debug!("[DOWNLOAD] Querying manifest: {url}");

        let mut request = ureq::get(&url).timeout(MANIFEST_TIMEOUT);
        if let Some(token) = &self.token {
            request = request.set("Authorization", &format!("Bearer {token}"));
        }
        let response = request
            .call()
            .with_context(|| format!("Manifest request failed for {model_id}"))?;
        manifest_total(response.into_reader())
    }

    fn download(&self, task: &DownloadTask) -> anyhow::Result<PathBuf> {
        let cache_dir = cache_dir(task.target_dir.as_deref(), &task.model_id);
        std::fs::create_dir_all(&cache_dir)
            .with_context(|| format!("Cannot create {}", cache_dir.display()))?;

        let api = ApiBuilder::new()
            .with_progress(false)
            .with_cache_dir(cache_dir.clone())
            .with_token(self.token.clone())
            .build()?;
        let repo = Repo::model(task.model_id.clone());
        let api_repo = api.repo(repo.clone());

        let info = api_repo.info()?;
        info!(
            "[DOWNLOAD] {} has {} files at revision {}",
            task.model_id,
            info.siblings.len(),
            info.sha
        );

        for file in &info.siblings {
            debug!("[DOWNLOAD] Fetching {}", file.rfilename);
            api_repo
                .get(&file.rfilename)
                .with_context(|| format!("Failed to download {}", file.rfilename))?;
        }

        Ok(cache_dir
            .join(repo.folder_name())
            .join("snapshots")
            .join(&info.sha))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_dir_flattens_model_id() {
        assert_eq!(
            local_dir(Path::new("/models"), "Qwen/Qwen2.5-7B-Instruct"),
            PathBuf::from("/models/Qwen_Qwen2.5-7B-Instruct")
        );
    }

    #[test]
    fn test_monitored_dir_with_target() {
        assert_eq!(
            monitored_dir(Some(Path::new("/data")), "org/name"),
            PathBuf::from("/data/org_name")
        );
    }

    #[test]
    fn test_monitored_dir_in_shared_cache() {
        let dir = monitored_dir(None, "org/name");
        assert!(dir.ends_with("models--org--name"), "{}", dir.display());
    }

    #[test]
    fn test_manifest_total_skips_unsized_files() {
        let body = br#"{
            "id": "org/name",
            "siblings": [
                {"rfilename": "config.json", "size": 700},
                {"rfilename": "model.safetensors", "size": 5000000},
                {"rfilename": "README.md"}
            ]
        }"#;
        assert_eq!(manifest_total(&body[..]).unwrap(), 5_000_700);
    }

    #[test]
    fn test_manifest_without_siblings_is_zero() {
        assert_eq!(manifest_total(&b"{\"id\":\"x\"}"[..]).unwrap(), 0);
        assert!(manifest_total(&b"not json"[..]).is_err());
    }

    #[test]
    fn test_manifest_url() {
        let fetcher = HubFetcher {
            endpoint: "https://mirror.example/".to_string(),
            token: None,
        };
        assert_eq!(
            fetcher.manifest_url("org/name"),
            "https://mirror.example/api/models/org/name?blobs=true"
        );
    }
}
