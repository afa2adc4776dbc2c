//! Scripted engine, runtime host and fetch doubles shared by unit tests.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use tokio::sync::broadcast::{self, error::TryRecvError, Receiver, Sender};

use crate::{
    backend_adapter::PlaybackAdapter,
    config::{AnalysisConfig, EngineConfig},
    engine::{
        AnalyserSettings, AnalyserTap, BackendReadiness, EngineCallbacks, EngineInstance,
        InstanceOptions, LoadCallback, LoadOptions, ModuleLoaded, Notify, PlaybackEngine,
        RuntimeHost, TrackSource, VirtualFile,
    },
    error::FetchError,
    protocol::{Message, SequencerEvent},
    runtime_loader::RuntimeLoader,
    sequencer::PlaylistSequencer,
    track::TrackDescriptor,
    track_resolver::{TrackFetcher, TrackResolver},
};

pub(crate) struct ScriptedRuntimeHost {
    loaded: Mutex<Vec<String>>,
    failing_module: Option<String>,
    capabilities: bool,
    pending_readiness: bool,
    readiness_callback: Mutex<Option<Notify>>,
}

impl ScriptedRuntimeHost {
    pub(crate) fn new() -> Self {
        Self {
            loaded: Mutex::new(Vec::new()),
            failing_module: None,
            capabilities: true,
            pending_readiness: false,
            readiness_callback: Mutex::new(None),
        }
    }

    pub(crate) fn failing_module(mut self, module: &str) -> Self {
        self.failing_module = Some(module.to_string());
        self
    }

    pub(crate) fn without_capabilities(mut self) -> Self {
        self.capabilities = false;
        self
    }

    pub(crate) fn with_pending_readiness(mut self) -> Self {
        self.pending_readiness = true;
        self
    }

    pub(crate) fn loaded_modules(&self) -> Vec<String> {
        self.loaded.lock().unwrap().clone()
    }

    pub(crate) fn has_pending_readiness_callback(&self) -> bool {
        self.readiness_callback.lock().unwrap().is_some()
    }

    pub(crate) fn signal_backend_ready(&self) {
        let callback = self.readiness_callback.lock().unwrap().take();
        if let Some(callback) = callback {
            callback();
        }
    }

    pub(crate) fn drop_readiness_callback(&self) {
        self.readiness_callback.lock().unwrap().take();
    }
}

impl RuntimeHost for ScriptedRuntimeHost {
    fn load_module(&self, module: &str, done: ModuleLoaded) {
        self.loaded.lock().unwrap().push(module.to_string());
        if self.failing_module.as_deref() == Some(module) {
            done(Err("404 Not Found".to_string()));
        } else {
            done(Ok(()));
        }
    }

    fn backend_readiness(&self, on_ready: Notify) -> BackendReadiness {
        if !self.pending_readiness {
            return BackendReadiness::Ready;
        }
        *self.readiness_callback.lock().unwrap() = Some(on_ready);
        BackendReadiness::Pending
    }

    fn has_capabilities(&self) -> bool {
        self.capabilities
    }
}

pub(crate) struct StaticAnalyser {
    spectrum: Mutex<Vec<u8>>,
    disconnects: AtomicUsize,
    fail_disconnect: AtomicBool,
}

impl AnalyserTap for StaticAnalyser {
    fn frequency_bin_count(&self) -> usize {
        self.spectrum.lock().unwrap().len()
    }

    fn byte_frequency_data(&self, out: &mut [u8]) {
        let spectrum = self.spectrum.lock().unwrap();
        let len = out.len().min(spectrum.len());
        out[..len].copy_from_slice(&spectrum[..len]);
    }

    fn disconnect(&self) -> Result<(), String> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        if self.fail_disconnect.load(Ordering::SeqCst) {
            return Err("node already disconnected".to_string());
        }
        Ok(())
    }
}

pub(crate) struct ScriptedInstance {
    loads: Mutex<Vec<(TrackSource, LoadOptions)>>,
    plays: AtomicUsize,
    pauses: AtomicUsize,
    rejected_names: Mutex<Vec<String>>,
    throw_on_load: AtomicBool,
    repeat_callbacks: AtomicBool,
    fail_transport: AtomicBool,
    analysers_created: AtomicUsize,
    analyser: Arc<StaticAnalyser>,
}

impl ScriptedInstance {
    fn new() -> Self {
        Self {
            loads: Mutex::new(Vec::new()),
            plays: AtomicUsize::new(0),
            pauses: AtomicUsize::new(0),
            rejected_names: Mutex::new(Vec::new()),
            throw_on_load: AtomicBool::new(false),
            repeat_callbacks: AtomicBool::new(false),
            fail_transport: AtomicBool::new(false),
            analysers_created: AtomicUsize::new(0),
            analyser: Arc::new(StaticAnalyser {
                spectrum: Mutex::new(vec![0; 1024]),
                disconnects: AtomicUsize::new(0),
                fail_disconnect: AtomicBool::new(false),
            }),
        }
    }

    pub(crate) fn loads(&self) -> Vec<(TrackSource, LoadOptions)> {
        self.loads.lock().unwrap().clone()
    }

    pub(crate) fn play_count(&self) -> usize {
        self.plays.load(Ordering::SeqCst)
    }

    pub(crate) fn pause_count(&self) -> usize {
        self.pauses.load(Ordering::SeqCst)
    }

    pub(crate) fn analysers_created(&self) -> usize {
        self.analysers_created.load(Ordering::SeqCst)
    }

    pub(crate) fn analyser_disconnects(&self) -> usize {
        self.analyser.disconnects.load(Ordering::SeqCst)
    }

    /// Rejects loads whose virtual file name or URL equals `label`.
    pub(crate) fn reject_loads_named(&self, label: &str) {
        self.rejected_names.lock().unwrap().push(label.to_string());
    }

    pub(crate) fn throw_on_load(&self) {
        self.throw_on_load.store(true, Ordering::SeqCst);
    }

    /// Fires every load callback more than once.
    pub(crate) fn repeat_callbacks(&self) {
        self.repeat_callbacks.store(true, Ordering::SeqCst);
    }

    pub(crate) fn fail_transport(&self) {
        self.fail_transport.store(true, Ordering::SeqCst);
        self.analyser.fail_disconnect.store(true, Ordering::SeqCst);
    }

    pub(crate) fn set_spectrum(&self, spectrum: Vec<u8>) {
        *self.analyser.spectrum.lock().unwrap() = spectrum;
    }

    fn load(
        &self,
        source: TrackSource,
        options: LoadOptions,
        on_success: LoadCallback,
        on_failure: LoadCallback,
    ) -> Result<(), String> {
        if self.throw_on_load.load(Ordering::SeqCst) {
            return Err("decoder threw while starting the load".to_string());
        }

        let label = match &source {
            TrackSource::File(file) => file.name.clone(),
            TrackSource::Url(url) => url.clone(),
        };
        self.loads.lock().unwrap().push((source, options));

        let rejected = self.rejected_names.lock().unwrap().contains(&label);
        let repeat = self.repeat_callbacks.load(Ordering::SeqCst);
        if rejected {
            on_failure();
            if repeat {
                on_success();
            }
        } else {
            on_success();
            if repeat {
                on_success();
                on_failure();
            }
        }
        Ok(())
    }

    fn transport(&self, counter: &AtomicUsize) -> Result<(), String> {
        if self.fail_transport.load(Ordering::SeqCst) {
            return Err("audio context closed".to_string());
        }
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl EngineInstance for ScriptedInstance {
    fn load_from_file(
        &self,
        file: VirtualFile,
        options: LoadOptions,
        on_success: LoadCallback,
        on_failure: LoadCallback,
    ) -> Result<(), String> {
        self.load(TrackSource::File(file), options, on_success, on_failure)
    }

    fn load_from_url(
        &self,
        url: &str,
        options: LoadOptions,
        on_success: LoadCallback,
        on_failure: LoadCallback,
    ) -> Result<(), String> {
        self.load(
            TrackSource::Url(url.to_string()),
            options,
            on_success,
            on_failure,
        )
    }

    fn play(&self) -> Result<(), String> {
        self.transport(&self.plays)
    }

    fn pause(&self) -> Result<(), String> {
        self.transport(&self.pauses)
    }

    fn create_analyser(&self, _settings: &AnalyserSettings) -> Option<Arc<dyn AnalyserTap>> {
        self.analysers_created.fetch_add(1, Ordering::SeqCst);
        let analyser: Arc<dyn AnalyserTap> = self.analyser.clone();
        Some(analyser)
    }
}

pub(crate) struct ScriptedEngine {
    instance: Arc<ScriptedInstance>,
    callbacks: Mutex<Option<EngineCallbacks>>,
    created: AtomicUsize,
    ready: AtomicBool,
    fail_construction: bool,
}

impl ScriptedEngine {
    pub(crate) fn new() -> Self {
        Self {
            instance: Arc::new(ScriptedInstance::new()),
            callbacks: Mutex::new(None),
            created: AtomicUsize::new(0),
            ready: AtomicBool::new(false),
            fail_construction: false,
        }
    }

    pub(crate) fn failing_construction(mut self) -> Self {
        self.fail_construction = true;
        self
    }

    pub(crate) fn created_instances(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub(crate) fn instance_handle(&self) -> Arc<ScriptedInstance> {
        Arc::clone(&self.instance)
    }

    /// Fires the engine's track-end callback.
    pub(crate) fn finish_track(&self) {
        let callbacks = self.callbacks.lock().unwrap().clone();
        if let Some(callbacks) = callbacks {
            (callbacks.on_track_end)();
        }
    }
}

impl PlaybackEngine for ScriptedEngine {
    fn create_instance(
        &self,
        _options: InstanceOptions,
        callbacks: EngineCallbacks,
    ) -> Result<(), String> {
        self.created.fetch_add(1, Ordering::SeqCst);
        if self.fail_construction {
            return Err("SIDBackendAdapter missing".to_string());
        }
        *self.callbacks.lock().unwrap() = Some(callbacks.clone());
        self.ready.store(true, Ordering::SeqCst);
        (callbacks.on_ready)();
        Ok(())
    }

    fn instance(&self) -> Option<Arc<dyn EngineInstance>> {
        if !self.ready.load(Ordering::SeqCst) {
            return None;
        }
        let instance: Arc<dyn EngineInstance> = self.instance.clone();
        Some(instance)
    }
}

pub(crate) struct CountingFetcher {
    responses: Mutex<HashMap<String, Result<Vec<u8>, u16>>>,
    calls: AtomicUsize,
}

impl CountingFetcher {
    pub(crate) fn new() -> Self {
        Self {
            responses: Mutex::new(HashMap::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn serving(self, path: &str, bytes: Vec<u8>) -> Self {
        self.responses
            .lock()
            .unwrap()
            .insert(path.to_string(), Ok(bytes));
        self
    }

    pub(crate) fn failing_with_status(self, path: &str, code: u16) -> Self {
        self.set_status(path, code);
        self
    }

    pub(crate) fn set_status(&self, path: &str, code: u16) {
        self.responses
            .lock()
            .unwrap()
            .insert(path.to_string(), Err(code));
    }

    pub(crate) fn fetch_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl TrackFetcher for CountingFetcher {
    fn fetch(&self, path: &str) -> Result<Vec<u8>, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.responses.lock().unwrap().get(path) {
            Some(Ok(bytes)) => Ok(bytes.clone()),
            Some(Err(code)) => Err(FetchError::status(path, *code)),
            None => Err(FetchError::transport(path, "connection refused")),
        }
    }
}

/// Minimal PSID v2 image with `songs` tunes starting at `start_song`.
pub(crate) fn psid_image(songs: u16, start_song: u16) -> Vec<u8> {
    let mut image = vec![0u8; 0x7c];
    image[..4].copy_from_slice(b"PSID");
    image[4..6].copy_from_slice(&2u16.to_be_bytes());
    image[6..8].copy_from_slice(&0x7cu16.to_be_bytes());
    image[0x0e..0x10].copy_from_slice(&songs.to_be_bytes());
    image[0x10..0x12].copy_from_slice(&start_song.to_be_bytes());
    image.extend_from_slice(&[0x00, 0x10, 0x60]);
    image
}

pub(crate) fn track_paths(names: &[&str]) -> Vec<TrackDescriptor> {
    names
        .iter()
        .map(|name| TrackDescriptor::new(format!("sid/{name}.sid")).with_name(*name))
        .collect()
}

pub(crate) fn adapter_with(
    host: ScriptedRuntimeHost,
    engine: Arc<ScriptedEngine>,
) -> (Arc<PlaybackAdapter>, Receiver<Message>) {
    let (bus_sender, bus_receiver) = broadcast::channel(256);
    let adapter = build_adapter(host, engine, bus_sender);
    (adapter, bus_receiver)
}

fn build_adapter(
    host: ScriptedRuntimeHost,
    engine: Arc<ScriptedEngine>,
    bus_sender: Sender<Message>,
) -> Arc<PlaybackAdapter> {
    let loader = Arc::new(RuntimeLoader::new(
        Arc::new(host),
        vec!["player.js".to_string(), "backend.js".to_string()],
    ));
    Arc::new(PlaybackAdapter::new(
        loader,
        engine,
        &EngineConfig::default(),
        &AnalysisConfig::default(),
        bus_sender,
    ))
}

pub(crate) struct SequencerHarness {
    pub(crate) sequencer: PlaylistSequencer,
    pub(crate) engine: Arc<ScriptedEngine>,
    pub(crate) fetcher: Arc<CountingFetcher>,
    pub(crate) tracks: Vec<TrackDescriptor>,
    pub(crate) bus: Receiver<Message>,
}

/// Sequencer over scripted doubles; every named track is served as `sid/<name>.sid`.
pub(crate) fn sequencer_harness(names: &[&str]) -> SequencerHarness {
    let (bus_sender, bus) = broadcast::channel(256);
    let tracks = track_paths(names);
    let fetcher = tracks.iter().fold(CountingFetcher::new(), |fetcher, track| {
        fetcher.serving(&track.path, psid_image(1, 1))
    });
    let fetcher = Arc::new(fetcher);
    let engine = Arc::new(ScriptedEngine::new());
    let adapter = build_adapter(
        ScriptedRuntimeHost::new(),
        Arc::clone(&engine),
        bus_sender.clone(),
    );
    let resolver = Arc::new(TrackResolver::new(fetcher.clone()));
    let sequencer = PlaylistSequencer::new(adapter, resolver, bus_sender, 32);

    SequencerHarness {
        sequencer,
        engine,
        fetcher,
        tracks,
        bus,
    }
}

/// Sequencer events currently queued on `receiver`, engine events skipped.
pub(crate) fn drain_sequencer_events(receiver: &mut Receiver<Message>) -> Vec<SequencerEvent> {
    let mut events = Vec::new();
    loop {
        match receiver.try_recv() {
            Ok(Message::Sequencer(event)) => events.push(event),
            Ok(Message::Engine(_)) => {}
            Err(TryRecvError::Empty) => break,
            Err(TryRecvError::Lagged(_)) => continue,
            Err(TryRecvError::Closed) => break,
        }
    }
    events
}
