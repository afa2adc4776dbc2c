//! Future-based facade over the callback-driven playback engine.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};

use log::{debug, error, info, warn};
use tokio::sync::{broadcast, oneshot, OnceCell};

use crate::{
    config::{AnalysisConfig, EngineConfig},
    engine::{
        AnalyserSettings, AnalyserTap, EngineCallbacks, EngineInstance, InstanceOptions,
        LoadCallback, LoadOptions, PlaybackEngine, TrackSource, VirtualFile,
    },
    error::{BackendUnavailableError, PlayerError, TrackLoadError},
    protocol::{EngineEvent, Message},
    runtime_loader::RuntimeLoader,
    track::TrackDescriptor,
};

const VIRTUAL_FILE_CONTENT_TYPE: &str = "application/octet-stream";

/// Construction progress of the engine instance. `Ready` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterState {
    Uninitialized,
    Initializing,
    Ready,
    Failed,
}

/// Sender half of a one-shot completion that ignores every call after the first.
struct CompletionSlot<T> {
    sender: Mutex<Option<oneshot::Sender<T>>>,
}

impl<T> CompletionSlot<T> {
    fn new(sender: oneshot::Sender<T>) -> Self {
        Self {
            sender: Mutex::new(Some(sender)),
        }
    }

    fn complete(&self, value: T) -> bool {
        let sender = self
            .sender
            .lock()
            .expect("completion slot lock poisoned")
            .take();
        match sender {
            Some(sender) => {
                let _ = sender.send(value);
                true
            }
            None => false,
        }
    }
}

/// Wraps the single engine instance behind load/play/pause/analyse futures.
pub struct PlaybackAdapter {
    loader: Arc<RuntimeLoader>,
    engine: Arc<dyn PlaybackEngine>,
    instance_options: InstanceOptions,
    load_base_path: String,
    analyser_settings: AnalyserSettings,
    bus_producer: broadcast::Sender<Message>,
    ready: OnceCell<Result<(), BackendUnavailableError>>,
    initializing: AtomicBool,
    analyser: Mutex<Option<Arc<dyn AnalyserTap>>>,
}

impl PlaybackAdapter {
    pub fn new(
        loader: Arc<RuntimeLoader>,
        engine: Arc<dyn PlaybackEngine>,
        engine_config: &EngineConfig,
        analysis_config: &AnalysisConfig,
        bus_producer: broadcast::Sender<Message>,
    ) -> Self {
        Self {
            loader,
            engine,
            instance_options: InstanceOptions {
                base_path: engine_config.base_path.clone(),
            },
            load_base_path: engine_config.base_path.clone(),
            analyser_settings: analysis_config.analyser_settings(),
            bus_producer,
            ready: OnceCell::new(),
            initializing: AtomicBool::new(false),
            analyser: Mutex::new(None),
        }
    }

    pub fn state(&self) -> AdapterState {
        match self.ready.get() {
            Some(Ok(())) => return AdapterState::Ready,
            Some(Err(_)) => return AdapterState::Failed,
            None => {}
        }
        if self.initializing.load(Ordering::Acquire) {
            AdapterState::Initializing
        } else {
            AdapterState::Uninitialized
        }
    }

    /// Loads the runtime, then constructs the engine instance exactly once.
    pub async fn ensure_ready(&self) -> Result<(), PlayerError> {
        self.loader.ensure_loaded().await?;
        self.ready
            .get_or_init(|| self.construct_instance())
            .await
            .clone()?;
        Ok(())
    }

    async fn construct_instance(&self) -> Result<(), BackendUnavailableError> {
        self.initializing.store(true, Ordering::Release);
        let (ready_tx, ready_rx) = oneshot::channel();
        let ready_slot = Arc::new(CompletionSlot::new(ready_tx));

        let ready_bus = self.bus_producer.clone();
        let track_ready_bus = self.bus_producer.clone();
        let track_end_bus = self.bus_producer.clone();
        let callbacks = EngineCallbacks {
            on_ready: Arc::new(move || {
                if ready_slot.complete(()) {
                    let _ = ready_bus.send(Message::Engine(EngineEvent::PlayerReady));
                }
            }),
            on_track_ready: Arc::new(move || {
                let _ = track_ready_bus.send(Message::Engine(EngineEvent::TrackReady));
            }),
            on_track_end: Arc::new(move || {
                debug!("PlaybackAdapter: engine reported track end");
                let _ = track_end_bus.send(Message::Engine(EngineEvent::TrackEnded));
            }),
        };

        self.engine
            .create_instance(self.instance_options.clone(), callbacks)
            .map_err(|reason| {
                error!("PlaybackAdapter: engine construction failed: {}", reason);
                BackendUnavailableError::new(reason)
            })?;

        ready_rx
            .await
            .map_err(|_| BackendUnavailableError::new("engine dropped the ready callback"))?;

        if self.engine.instance().is_none() {
            return Err(BackendUnavailableError::new(
                "engine reported ready without an instance",
            ));
        }

        info!("Playback engine instance ready");
        Ok(())
    }

    fn instance(&self) -> Option<Arc<dyn EngineInstance>> {
        self.engine.instance()
    }

    /// Hands a track to the engine and waits for its load callback.
    ///
    /// Tracks carrying bytes are passed as a virtual file, others by URL.
    /// The caller must not overlap loads; the engine is single-stream.
    pub async fn load_track(
        &self,
        track: &TrackDescriptor,
        auto_play: bool,
    ) -> Result<(), PlayerError> {
        self.ensure_ready().await?;
        let Some(instance) = self.instance() else {
            warn!(
                "PlaybackAdapter: no engine instance, ignoring load of {}",
                track.display_name()
            );
            return Ok(());
        };

        let options = LoadOptions {
            subsong: track.subsong_or_default(),
            base_path: self.load_base_path.clone(),
        };
        let source = match &track.data {
            Some(bytes) => TrackSource::File(VirtualFile {
                name: track.virtual_file_name(),
                content_type: VIRTUAL_FILE_CONTENT_TYPE.to_string(),
                bytes: Arc::clone(bytes),
            }),
            None => TrackSource::Url(track.path.clone()),
        };

        let (done_tx, done_rx) = oneshot::channel::<Result<(), String>>();
        let done_slot = Arc::new(CompletionSlot::new(done_tx));
        let success_slot = Arc::clone(&done_slot);
        let on_success: LoadCallback = Arc::new(move || {
            success_slot.complete(Ok(()));
        });
        let on_failure: LoadCallback = Arc::new(move || {
            done_slot.complete(Err("engine rejected the track".to_string()));
        });

        let started = match source {
            TrackSource::File(file) => {
                instance.load_from_file(file, options, on_success, on_failure)
            }
            TrackSource::Url(url) => instance.load_from_url(&url, options, on_success, on_failure),
        };

        let outcome = match started {
            Ok(()) => done_rx
                .await
                .unwrap_or_else(|_| Err("engine dropped the load callbacks".to_string())),
            Err(reason) => Err(reason),
        };

        if let Err(reason) = outcome {
            let err = TrackLoadError {
                track: track.display_name().to_string(),
                reason,
            };
            error!("PlaybackAdapter: {}", err);
            return Err(err.into());
        }

        if auto_play {
            self.play().await?;
        }
        Ok(())
    }

    pub async fn play(&self) -> Result<(), PlayerError> {
        self.ensure_ready().await?;
        match self.instance() {
            Some(instance) => instance.play().map_err(|reason| {
                PlayerError::from(BackendUnavailableError::new(format!(
                    "play failed: {reason}"
                )))
            }),
            None => {
                debug!("PlaybackAdapter: play() without engine instance");
                Ok(())
            }
        }
    }

    pub async fn pause(&self) -> Result<(), PlayerError> {
        self.ensure_ready().await?;
        match self.instance() {
            Some(instance) => instance.pause().map_err(|reason| {
                PlayerError::from(BackendUnavailableError::new(format!(
                    "pause failed: {reason}"
                )))
            }),
            None => {
                debug!("PlaybackAdapter: pause() without engine instance");
                Ok(())
            }
        }
    }

    /// Shared analyser on the engine output, created on first successful request.
    pub fn analyser(&self) -> Option<Arc<dyn AnalyserTap>> {
        let mut analyser = self.analyser.lock().expect("analyser lock poisoned");
        if let Some(tap) = analyser.as_ref() {
            return Some(Arc::clone(tap));
        }

        let tap = self
            .instance()?
            .create_analyser(&self.analyser_settings)?;
        debug!(
            "PlaybackAdapter: analyser attached ({} bins)",
            tap.frequency_bin_count()
        );
        *analyser = Some(Arc::clone(&tap));
        Some(tap)
    }

    /// Best-effort teardown; failures are logged and swallowed.
    pub async fn dispose(&self) {
        if let Some(instance) = self.instance() {
            if let Err(err) = instance.pause() {
                debug!("PlaybackAdapter: ignoring pause failure on dispose: {}", err);
            }
        }

        let tap = self.analyser.lock().expect("analyser lock poisoned").take();
        if let Some(tap) = tap {
            if let Err(err) = tap.disconnect() {
                debug!(
                    "PlaybackAdapter: ignoring analyser disconnect failure: {}",
                    err
                );
            }
        }
    }
}
