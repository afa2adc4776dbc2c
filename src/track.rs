//! Track descriptors and the cache key derived from them.

use std::sync::Arc;

/// Sub-song value the engine understands as "play the file's default tune".
pub const DEFAULT_SUBSONG: i32 = -1;

/// One playable unit of a playlist.
///
/// Descriptors are never mutated once placed in a playlist; resolving one
/// produces a new value that shares the fetched payload.
#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct TrackDescriptor {
    /// Locator of the SID file, relative or absolute.
    #[serde(default)]
    pub path: String,
    /// Tune inside a multi-tune file. Absent or negative selects the default.
    #[serde(default)]
    pub subsong: Option<i32>,
    /// Raw file bytes. When present no fetch happens.
    #[serde(skip)]
    pub data: Option<Arc<[u8]>>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub year: Option<i32>,
}

impl TrackDescriptor {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    pub fn with_subsong(mut self, subsong: i32) -> Self {
        self.subsong = Some(subsong);
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_data(mut self, data: impl Into<Arc<[u8]>>) -> Self {
        self.data = Some(data.into());
        self
    }

    /// Sub-song index to hand to the engine, with the default sentinel.
    pub fn subsong_or_default(&self) -> i32 {
        match self.subsong {
            Some(subsong) if subsong >= 0 => subsong,
            _ => DEFAULT_SUBSONG,
        }
    }

    pub fn has_data(&self) -> bool {
        self.data.is_some()
    }

    /// Name used in logs and errors: the title, else the path.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.path)
    }

    /// File name used when the payload is handed to the engine as a virtual file.
    pub fn virtual_file_name(&self) -> String {
        match self.name.as_deref() {
            Some(name) => format!("{name}.sid"),
            None => "track.sid".to_string(),
        }
    }

    pub fn cache_key(&self) -> CacheKey {
        CacheKey {
            path: self.path.clone(),
            subsong: self.subsong_or_default(),
        }
    }
}

/// Identity of a cached payload.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub path: String,
    pub subsong: i32,
}
