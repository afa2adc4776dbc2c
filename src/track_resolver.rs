//! Materialises track payloads, fetching each `(path, subsong)` at most once.

use std::{
    collections::HashMap,
    io::{ErrorKind, Read},
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    time::Duration,
};

use log::{debug, info, trace, warn};
use tokio::sync::OnceCell;

use crate::{
    config::FetchConfig,
    error::FetchError,
    track::{CacheKey, TrackDescriptor},
};

/// Blocking transport used to fetch track files.
pub trait TrackFetcher: Send + Sync {
    fn fetch(&self, path: &str) -> Result<Vec<u8>, FetchError>;
}

/// Resolves descriptors into descriptors carrying bytes.
///
/// Concurrent resolutions of the same uncached key share one in-flight fetch.
/// Failed fetches are not cached.
pub struct TrackResolver {
    fetcher: Arc<dyn TrackFetcher>,
    cache: Mutex<HashMap<CacheKey, Arc<OnceCell<Arc<[u8]>>>>>,
}

impl TrackResolver {
    pub fn new(fetcher: Arc<dyn TrackFetcher>) -> Self {
        Self {
            fetcher,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub async fn resolve(&self, track: &TrackDescriptor) -> Result<TrackDescriptor, FetchError> {
        if track.has_data() {
            return Ok(track.clone());
        }

        let key = track.cache_key();
        let entry = {
            let mut cache = self.cache.lock().expect("track cache lock poisoned");
            Arc::clone(cache.entry(key).or_default())
        };

        if let Some(bytes) = entry.get() {
            trace!("TrackResolver: cache hit for {}", track.path);
            return Ok(with_payload(track, Arc::clone(bytes)));
        }

        let bytes = entry
            .get_or_try_init(|| self.fetch(track.path.clone()))
            .await?;
        Ok(with_payload(track, Arc::clone(bytes)))
    }

    async fn fetch(&self, path: String) -> Result<Arc<[u8]>, FetchError> {
        debug!("TrackResolver: fetching {}", path);
        let fetcher = Arc::clone(&self.fetcher);
        let task_path = path.clone();
        let bytes = tokio::task::spawn_blocking(move || fetcher.fetch(&task_path))
            .await
            .map_err(|err| FetchError::transport(&path, format!("fetch task failed: {err}")))??;
        info!("Fetched {} ({} bytes)", path, bytes.len());
        Ok(Arc::from(bytes))
    }

    /// Drops every cached payload; later resolutions fetch again.
    pub fn clear_cache(&self) {
        warn!("TrackResolver: cache cleared");
        self.cache
            .lock()
            .expect("track cache lock poisoned")
            .clear();
    }

    pub fn cached_entries(&self) -> usize {
        self.cache
            .lock()
            .expect("track cache lock poisoned")
            .values()
            .filter(|entry| entry.initialized())
            .count()
    }
}

fn with_payload(track: &TrackDescriptor, bytes: Arc<[u8]>) -> TrackDescriptor {
    TrackDescriptor {
        data: Some(bytes),
        ..track.clone()
    }
}

/// Fetches track files over HTTP or from a local asset directory.
pub struct AssetFetcher {
    http_client: ureq::Agent,
    base_url: Option<String>,
    asset_dir: Option<PathBuf>,
}

impl AssetFetcher {
    pub fn new(config: &FetchConfig) -> Self {
        let http_client = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(config.connect_timeout_secs))
            .timeout_read(Duration::from_secs(config.read_timeout_secs))
            .build();
        Self {
            http_client,
            base_url: config
                .base_url
                .as_deref()
                .map(str::trim)
                .filter(|url| !url.is_empty())
                .map(ToOwned::to_owned),
            asset_dir: config.asset_dir.clone(),
        }
    }

    fn is_remote(path: &str) -> bool {
        path.starts_with("http://") || path.starts_with("https://")
    }

    fn relative_segments(path: &str) -> Vec<&str> {
        path.trim_start_matches("./")
            .split('/')
            .filter(|segment| !segment.is_empty() && *segment != ".")
            .collect()
    }

    fn join_url(base_url: &str, path: &str) -> String {
        let encoded: Vec<String> = Self::relative_segments(path)
            .into_iter()
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect();
        format!("{}/{}", base_url.trim_end_matches('/'), encoded.join("/"))
    }

    fn request_url(&self, path: &str) -> Option<String> {
        if Self::is_remote(path) {
            return Some(path.to_string());
        }
        self.base_url
            .as_deref()
            .map(|base_url| Self::join_url(base_url, path))
    }

    fn local_path(&self, path: &str) -> PathBuf {
        let root = self
            .asset_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("."));
        Self::relative_segments(path)
            .into_iter()
            .fold(root, |joined, segment| joined.join(segment))
    }

    fn fetch_http(&self, url: &str, path: &str) -> Result<Vec<u8>, FetchError> {
        let response = match self.http_client.get(url).call() {
            Ok(response) => response,
            Err(ureq::Error::Status(code, _)) => return Err(FetchError::status(path, code)),
            Err(ureq::Error::Transport(transport)) => {
                return Err(FetchError::transport(path, transport.to_string()))
            }
        };
        let mut bytes = Vec::new();
        response
            .into_reader()
            .read_to_end(&mut bytes)
            .map_err(|err| FetchError::transport(path, format!("body read failed: {err}")))?;
        Ok(bytes)
    }

    fn read_local(file: &Path, path: &str) -> Result<Vec<u8>, FetchError> {
        std::fs::read(file).map_err(|err| match err.kind() {
            ErrorKind::NotFound => FetchError::status(path, 404),
            _ => FetchError::transport(path, err.to_string()),
        })
    }
}

impl TrackFetcher for AssetFetcher {
    fn fetch(&self, path: &str) -> Result<Vec<u8>, FetchError> {
        match self.request_url(path) {
            Some(url) => self.fetch_http(&url, path),
            None => Self::read_local(&self.local_path(path), path),
        }
    }
}
