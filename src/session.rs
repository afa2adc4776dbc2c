//! Session driver: feeds bus events into the sequencer and rotates composers.

use std::{future::Future, sync::Arc, time::Duration};

use log::{debug, info, warn};
use tokio::sync::broadcast::{
    self,
    error::{RecvError, TryRecvError},
};

use crate::{
    backend_adapter::PlaybackAdapter,
    config::{Config, SessionConfig},
    engine::headless::{HeadlessEngine, HeadlessRuntime},
    error::PlayerError,
    manifest::{self, ComposerRotation, Manifest},
    protocol::{EngineEvent, Message, SequencerEvent},
    runtime_loader::RuntimeLoader,
    sequencer::PlaylistSequencer,
    track_resolver::{TrackFetcher, TrackResolver},
};

/// Plays composers from the manifest one after another.
///
/// Load failures returned by the sequencer skip to the following track, or to
/// the next composer when none is left. Runtime and backend failures end the
/// session.
pub struct Session {
    sequencer: PlaylistSequencer,
    bus_consumer: broadcast::Receiver<Message>,
    rotation: ComposerRotation,
    random_start: bool,
    max_composers: usize,
    composers_started: usize,
    finished: bool,
}

impl Session {
    pub fn new(
        sequencer: PlaylistSequencer,
        bus_consumer: broadcast::Receiver<Message>,
        manifest: Manifest,
        config: &SessionConfig,
    ) -> Self {
        Self {
            sequencer,
            bus_consumer,
            rotation: ComposerRotation::new(manifest),
            random_start: config.random_start,
            max_composers: config.max_composers,
            composers_started: 0,
            finished: false,
        }
    }

    /// Wires the full playback stack over the in-process headless engine.
    pub fn headless(config: &Config, fetcher: Arc<dyn TrackFetcher>, manifest: Manifest) -> Self {
        let (bus_producer, bus_consumer) = broadcast::channel(config.session.bus_capacity);
        let loader = Arc::new(RuntimeLoader::from_config(
            Arc::new(HeadlessRuntime),
            &config.runtime,
        ));
        let adapter = Arc::new(PlaybackAdapter::new(
            loader,
            Arc::new(HeadlessEngine::from_config(&config.headless)),
            &config.engine,
            &config.analysis,
            bus_producer.clone(),
        ));
        let resolver = Arc::new(TrackResolver::new(fetcher));
        let sequencer = PlaylistSequencer::new(
            adapter,
            resolver,
            bus_producer,
            config.analysis.level_bucket_count,
        );
        Self::new(sequencer, bus_consumer, manifest, &config.session)
    }

    pub fn sequencer(&self) -> &PlaylistSequencer {
        &self.sequencer
    }

    pub fn sequencer_mut(&mut self) -> &mut PlaylistSequencer {
        &mut self.sequencer
    }

    pub fn rotation(&self) -> &ComposerRotation {
        &self.rotation
    }

    pub fn composers_started(&self) -> usize {
        self.composers_started
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    fn composer_limit_reached(&self) -> bool {
        self.max_composers > 0 && self.composers_started >= self.max_composers
    }

    /// Starts the composer at `index` (wrapping), skipping composers without
    /// tracks and composers whose first track fails to load.
    ///
    /// Returns `Ok(false)` and marks the session finished when nothing could
    /// be started.
    pub async fn start_composer(&mut self, index: i64) -> Result<bool, PlayerError> {
        if self.rotation.is_empty() {
            warn!("Session: no composers in manifest");
            self.finished = true;
            return Ok(false);
        }

        for attempt in 0..self.rotation.len() as i64 {
            if self.composer_limit_reached() {
                info!(
                    "Session: composer limit reached after {}",
                    self.composers_started
                );
                self.finished = true;
                return Ok(false);
            }

            let Some(composer) = self.rotation.select(index.saturating_add(attempt)) else {
                break;
            };
            let name = composer.display_name().to_string();
            let playlist = composer.playlist();
            if playlist.is_empty() {
                warn!("Session: {} has no tracks", name);
                continue;
            }

            self.composers_started += 1;
            let start = manifest::start_index(playlist.len(), self.random_start);
            info!(
                "Session: composer #{} {} ({} tracks, starting at {})",
                self.rotation.index() + 1,
                name,
                playlist.len(),
                start
            );
            self.sequencer.set_tracks(playlist, start);
            match self.sequencer.play().await {
                Ok(()) => return Ok(true),
                Err(err) if err.is_session_fatal() => return Err(err),
                Err(err) => warn!("Session: failed to start composer {}: {}", name, err),
            }
        }

        warn!("Session: no playable composer left");
        self.finished = true;
        Ok(false)
    }

    pub async fn next_composer(&mut self) -> Result<bool, PlayerError> {
        let next = self.rotation.index() as i64 + 1;
        self.start_composer(next).await
    }

    async fn recover(&mut self, err: PlayerError) -> Result<(), PlayerError> {
        if err.is_session_fatal() {
            return Err(err);
        }
        let mut failed = self.sequencer.pending_index();
        warn!("Session: skipping track {}: {}", failed, err);

        loop {
            let next = failed + 1;
            if next >= self.sequencer.playlist().len() {
                self.next_composer().await?;
                return Ok(());
            }
            match self.sequencer.play_track_at_index(next, true).await {
                Ok(()) => return Ok(()),
                Err(err) if err.is_session_fatal() => return Err(err),
                Err(err) => {
                    warn!("Session: skipping track {}: {}", next, err);
                    failed = next;
                }
            }
        }
    }

    pub async fn handle_message(&mut self, message: Message) -> Result<(), PlayerError> {
        match message {
            Message::Engine(EngineEvent::TrackEnded) => {
                if let Err(err) = self.sequencer.handle_track_end().await {
                    self.recover(err).await?;
                }
            }
            Message::Engine(event) => debug!("Session: engine event {:?}", event),
            Message::Sequencer(SequencerEvent::TrackStarted { track, index }) => {
                info!(
                    "Now playing {} by {} ({}/{})",
                    track.display_name(),
                    track.author.as_deref().unwrap_or("Unknown Composer"),
                    index + 1,
                    self.sequencer.playlist().len()
                );
            }
            Message::Sequencer(SequencerEvent::PlaylistEnded) => {
                info!("Session: playlist finished");
                self.next_composer().await?;
            }
            Message::Sequencer(SequencerEvent::AutoAdvanced) => {
                debug!("Session: auto-advanced");
            }
            // Already handled through the result of the failing call.
            Message::Sequencer(SequencerEvent::Error { index, error }) => {
                debug!("Session: load error at {}: {}", index, error);
            }
        }
        Ok(())
    }

    /// Handles every message already queued on the bus, including the ones
    /// published while handling. Returns how many were handled.
    pub async fn process_pending(&mut self) -> Result<usize, PlayerError> {
        let mut handled = 0;
        loop {
            let message = match self.bus_consumer.try_recv() {
                Ok(message) => message,
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!("Session: bus lagged, {} messages dropped", skipped);
                    continue;
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return Ok(handled),
            };
            self.handle_message(message).await?;
            handled += 1;
        }
    }

    /// Runs until `shutdown` resolves, the bus closes, or no composer is left.
    /// Starts the first composer when none was started yet, and disposes the
    /// sequencer on the way out.
    pub async fn run_until<F>(&mut self, shutdown: F) -> Result<(), PlayerError>
    where
        F: Future<Output = ()>,
    {
        let result = self.drive(shutdown).await;
        self.sequencer.dispose().await;
        info!(
            "Session: ended after {} composers",
            self.composers_started
        );
        result
    }

    async fn drive<F>(&mut self, shutdown: F) -> Result<(), PlayerError>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        if self.composers_started == 0 && !self.finished {
            self.start_composer(0).await?;
        }

        while !self.finished {
            let received = tokio::select! {
                _ = &mut shutdown => {
                    info!("Session: shutdown requested");
                    return Ok(());
                }
                received = self.bus_consumer.recv() => received,
            };
            match received {
                Ok(message) => self.handle_message(message).await?,
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Session: bus lagged, {} messages dropped", skipped);
                }
                Err(RecvError::Closed) => {
                    warn!("Session: bus closed");
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    pub async fn run_for(&mut self, duration: Duration) -> Result<(), PlayerError> {
        self.run_until(tokio::time::sleep(duration)).await
    }

    /// Runs until Ctrl-C.
    pub async fn run_until_shutdown(&mut self) -> Result<(), PlayerError> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!("Session: cannot listen for Ctrl-C: {}", err);
                std::future::pending::<()>().await;
            }
        })
        .await
    }
}
