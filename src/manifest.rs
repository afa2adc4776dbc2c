//! Composer manifest (`manifest.json`) and the wrapping composer rotation.

use std::path::Path;

use log::{info, warn};

use crate::{error::ManifestError, track::TrackDescriptor};

const FALLBACK_COMPOSER_NAME: &str = "Wave Set";

#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Manifest {
    #[serde(default)]
    pub composers: Vec<ComposerEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct ComposerEntry {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub tracks: Vec<TrackDescriptor>,
}

impl ComposerEntry {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(FALLBACK_COMPOSER_NAME)
    }

    /// Tracks ready for the sequencer; tracks without an author credit the composer.
    pub fn playlist(&self) -> Vec<TrackDescriptor> {
        self.tracks
            .iter()
            .map(|track| {
                let mut track = track.clone();
                if track.author.is_none() {
                    track.author = self.name.clone();
                }
                track
            })
            .collect()
    }
}

impl Manifest {
    pub fn from_json(json: &str) -> Result<Self, ManifestError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        let content = std::fs::read_to_string(path).map_err(|source| ManifestError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let manifest = Self::from_json(&content)?;
        if manifest.composers.is_empty() {
            warn!("No composers in manifest {}", path.display());
        } else {
            info!(
                "Loaded manifest {} ({} composers)",
                path.display(),
                manifest.composers.len()
            );
        }
        Ok(manifest)
    }
}

/// Cursor over the manifest's composers that wraps in both directions.
#[derive(Debug, Clone)]
pub struct ComposerRotation {
    manifest: Manifest,
    index: usize,
}

impl ComposerRotation {
    pub fn new(manifest: Manifest) -> Self {
        Self { manifest, index: 0 }
    }

    pub fn is_empty(&self) -> bool {
        self.manifest.composers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.manifest.composers.len()
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn current(&self) -> Option<&ComposerEntry> {
        self.manifest.composers.get(self.index)
    }

    /// Wraps any index, negative ones included, onto the composer list.
    pub fn wrap(&self, index: i64) -> Option<usize> {
        let len = i64::try_from(self.len()).ok().filter(|len| *len > 0)?;
        usize::try_from(index.rem_euclid(len)).ok()
    }

    pub fn select(&mut self, index: i64) -> Option<&ComposerEntry> {
        self.index = self.wrap(index)?;
        self.current()
    }

    pub fn advance(&mut self, offset: i64) -> Option<&ComposerEntry> {
        let index = i64::try_from(self.index).ok()?.checked_add(offset)?;
        self.select(index)
    }
}

/// First track to play for a freshly selected playlist.
pub fn start_index(track_count: usize, random: bool) -> usize {
    if random {
        random_index(track_count)
    } else {
        0
    }
}

/// Uniform-ish pick in `0..len`, `0` for empty lists or when no entropy is available.
pub fn random_index(len: usize) -> usize {
    if len <= 1 {
        return 0;
    }
    let mut bytes = [0u8; 8];
    if let Err(err) = getrandom::fill(&mut bytes) {
        warn!("Random start unavailable, using first track: {}", err);
        return 0;
    }
    (u64::from_le_bytes(bytes) % len as u64) as usize
}
