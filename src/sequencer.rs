//! Playlist sequencing: what should be playing and the legal transitions.

use std::sync::Arc;

use log::{debug, error, info, warn};
use tokio::sync::broadcast;

use crate::{
    backend_adapter::PlaybackAdapter,
    error::PlayerError,
    protocol::{Message, SequencerEvent},
    spectrum,
    track::TrackDescriptor,
    track_resolver::TrackResolver,
};

/// Single source of truth for the playlist and its transport state.
///
/// `pending_index` is what the next explicit `play()` loads while nothing is
/// loaded; `current_index` is what the engine actually holds. Track changes
/// made while paused only move `pending_index`.
pub struct PlaylistSequencer {
    adapter: Arc<PlaybackAdapter>,
    resolver: Arc<TrackResolver>,
    bus_producer: broadcast::Sender<Message>,
    playlist: Vec<TrackDescriptor>,
    current_index: Option<usize>,
    pending_index: usize,
    is_playing: bool,
    load_generation: u64,
    magnitudes: Vec<u8>,
    level_bucket_count: usize,
}

impl PlaylistSequencer {
    pub fn new(
        adapter: Arc<PlaybackAdapter>,
        resolver: Arc<TrackResolver>,
        bus_producer: broadcast::Sender<Message>,
        level_bucket_count: usize,
    ) -> Self {
        Self {
            adapter,
            resolver,
            bus_producer,
            playlist: Vec::new(),
            current_index: None,
            pending_index: 0,
            is_playing: false,
            load_generation: 0,
            magnitudes: Vec::new(),
            level_bucket_count: level_bucket_count.max(1),
        }
    }

    pub fn playlist(&self) -> &[TrackDescriptor] {
        &self.playlist
    }

    pub fn current_index(&self) -> Option<usize> {
        self.current_index
    }

    pub fn pending_index(&self) -> usize {
        self.pending_index
    }

    pub fn is_playing(&self) -> bool {
        self.is_playing
    }

    fn publish(&self, event: SequencerEvent) {
        let _ = self.bus_producer.send(Message::Sequencer(event));
    }

    fn base_index(&self) -> usize {
        self.current_index.unwrap_or(self.pending_index)
    }

    /// Replaces the playlist without loading anything.
    pub fn set_tracks(&mut self, tracks: Vec<TrackDescriptor>, start_index: usize) {
        self.playlist = tracks;
        self.current_index = None;
        if self.playlist.is_empty() {
            self.pending_index = 0;
            self.is_playing = false;
            debug!("PlaylistSequencer: playlist cleared");
            return;
        }

        self.pending_index = start_index.min(self.playlist.len() - 1);
        debug!(
            "PlaylistSequencer: set_tracks length={} pending_index={}",
            self.playlist.len(),
            self.pending_index
        );
    }

    /// Loads the pending track when nothing is loaded, otherwise resumes.
    pub async fn play(&mut self) -> Result<(), PlayerError> {
        if self.playlist.is_empty() {
            warn!("PlaylistSequencer: play() called with empty playlist");
            return Ok(());
        }

        if self.current_index.is_none() {
            self.load_track_at_index(self.pending_index, true).await?;
            return Ok(());
        }

        self.adapter.play().await?;
        self.is_playing = true;
        Ok(())
    }

    /// Pauses transport; the loaded track stays loaded.
    pub async fn stop(&mut self) -> Result<(), PlayerError> {
        self.is_playing = false;
        self.adapter.pause().await
    }

    pub async fn next(&mut self) -> Result<(), PlayerError> {
        self.advance_to_next_internal(false).await
    }

    /// Auto-advance after the engine reported the natural end of a track.
    pub async fn handle_track_end(&mut self) -> Result<(), PlayerError> {
        self.advance_to_next_internal(true).await
    }

    pub async fn previous(&mut self) -> Result<(), PlayerError> {
        if self.playlist.is_empty() {
            return Ok(());
        }

        let Some(previous_index) = self.base_index().checked_sub(1) else {
            self.pending_index = 0;
            if !self.is_playing {
                self.current_index = None;
            }
            return Ok(());
        };

        if self.is_playing {
            self.load_track_at_index(previous_index, true).await?;
        } else {
            self.pending_index = previous_index;
            self.current_index = None;
        }
        Ok(())
    }

    /// Loads a track directly, e.g. a random pick or a lane change.
    pub async fn play_track_at_index(
        &mut self,
        index: usize,
        auto_play: bool,
    ) -> Result<(), PlayerError> {
        if self.playlist.is_empty() {
            warn!("PlaylistSequencer: play_track_at_index() with empty playlist");
            return Ok(());
        }

        let index = index.min(self.playlist.len() - 1);
        self.load_track_at_index(index, auto_play).await?;
        Ok(())
    }

    async fn advance_to_next_internal(&mut self, auto_triggered: bool) -> Result<(), PlayerError> {
        if self.playlist.is_empty() {
            return Ok(());
        }

        let base_index = self.base_index();
        if base_index + 1 >= self.playlist.len() {
            info!("PlaylistSequencer: playlist finished");
            self.is_playing = false;
            self.publish(SequencerEvent::PlaylistEnded);
            return Ok(());
        }

        let next_index = base_index + 1;
        if self.is_playing || auto_triggered {
            self.load_track_at_index(next_index, true).await?;
            if auto_triggered {
                self.publish(SequencerEvent::AutoAdvanced);
            }
        } else {
            self.pending_index = next_index;
            self.current_index = None;
        }
        Ok(())
    }

    /// Resolves and loads the track at `index`.
    ///
    /// Returns `Ok(false)` for an out-of-range index. A failed load leaves the
    /// sequencer stopped with nothing loaded and is reported both as the
    /// returned error and as a bus event.
    pub async fn load_track_at_index(
        &mut self,
        index: usize,
        auto_play: bool,
    ) -> Result<bool, PlayerError> {
        if index >= self.playlist.len() {
            warn!(
                "PlaylistSequencer: load_track_at_index() out of range index={} length={}",
                index,
                self.playlist.len()
            );
            return Ok(false);
        }

        self.pending_index = index;
        self.current_index = Some(index);
        self.load_generation += 1;
        let generation = self.load_generation;

        let outcome = self.load_resolved(index, auto_play, generation).await;
        match outcome {
            Ok(track) => {
                if auto_play {
                    self.is_playing = true;
                }
                self.publish(SequencerEvent::TrackStarted { track, index });
                Ok(true)
            }
            Err(err) => {
                error!(
                    "PlaylistSequencer: load #{} of index {} failed: {}",
                    generation, index, err
                );
                self.is_playing = false;
                self.current_index = None;
                self.publish(SequencerEvent::Error {
                    index,
                    error: err.clone(),
                });
                Err(err)
            }
        }
    }

    async fn load_resolved(
        &self,
        index: usize,
        auto_play: bool,
        generation: u64,
    ) -> Result<TrackDescriptor, PlayerError> {
        let track = self.resolver.resolve(&self.playlist[index]).await?;
        info!(
            "PlaylistSequencer: load #{} index={} auto_play={} track={} has_data={}",
            generation,
            index,
            auto_play,
            track.display_name(),
            track.has_data()
        );
        self.adapter.load_track(&track, auto_play).await?;
        Ok(track)
    }

    pub async fn dispose(&self) {
        self.adapter.dispose().await;
    }

    pub fn clear_cache(&self) {
        self.resolver.clear_cache();
    }

    /// Energy histogram of the current output, empty when no analyser exists.
    pub fn frequency_buckets(&mut self, bucket_count: usize) -> Vec<f32> {
        if bucket_count == 0 {
            return Vec::new();
        }
        let Some(analyser) = self.adapter.analyser() else {
            return Vec::new();
        };

        let bin_count = analyser.frequency_bin_count();
        if bin_count == 0 {
            return Vec::new();
        }
        self.magnitudes.resize(bin_count, 0);
        analyser.byte_frequency_data(&mut self.magnitudes);
        spectrum::frequency_buckets(&self.magnitudes, bucket_count)
    }

    /// Coarse loudness in `[0, 1]`, `0.0` when no analyser exists.
    pub fn current_level(&mut self) -> f32 {
        let buckets = self.frequency_buckets(self.level_bucket_count);
        spectrum::level(&buckets)
    }
}
