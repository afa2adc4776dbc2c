//! Seams between the playback core and the external SID engine.
//!
//! The engine is callback driven: module loads, instance construction and
//! track loads all report back through closures. The loader and the adapter
//! bridge these callbacks into futures.

pub mod headless;

use std::sync::Arc;

/// Completion callback for a runtime module load.
pub type ModuleLoaded = Box<dyn FnOnce(Result<(), String>) + Send>;

/// One-shot notification callback.
pub type Notify = Box<dyn FnOnce() + Send>;

/// Repeatable notification callback.
pub type Listener = Arc<dyn Fn() + Send + Sync>;

/// Track load outcome callback. Engines may call these more than once; the
/// adapter only honours the first call.
pub type LoadCallback = Arc<dyn Fn() + Send + Sync>;

/// Backend readiness as reported by the runtime host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendReadiness {
    /// Ready now; the readiness callback is dropped without being called.
    Ready,
    /// The host keeps the callback and calls it once the backend is ready.
    Pending,
}

/// Process-wide host of the engine runtime modules.
pub trait RuntimeHost: Send + Sync {
    /// Starts loading one module; `done` is called when it finished or failed.
    fn load_module(&self, module: &str, done: ModuleLoaded);
    /// Reports readiness, keeping `on_ready` when the backend is still pending.
    fn backend_readiness(&self, on_ready: Notify) -> BackendReadiness;
    /// Whether the loaded modules registered the player and adapter capabilities.
    fn has_capabilities(&self) -> bool;
}

/// Parameters of the one-time engine instance construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceOptions {
    pub base_path: String,
}

/// Callback slots handed to the engine at construction.
#[derive(Clone)]
pub struct EngineCallbacks {
    pub on_ready: Listener,
    pub on_track_ready: Listener,
    pub on_track_end: Listener,
}

/// Factory for the single engine instance.
pub trait PlaybackEngine: Send + Sync {
    /// Starts asynchronous construction; `callbacks.on_ready` fires when done.
    fn create_instance(
        &self,
        options: InstanceOptions,
        callbacks: EngineCallbacks,
    ) -> Result<(), String>;
    /// The constructed instance, once ready.
    fn instance(&self) -> Option<Arc<dyn EngineInstance>>;
}

/// Track bytes packaged as a named in-memory file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualFile {
    pub name: String,
    pub content_type: String,
    pub bytes: Arc<[u8]>,
}

/// Where the engine should take a track from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackSource {
    File(VirtualFile),
    Url(String),
}

/// Options of a single track load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadOptions {
    /// Sub-song index, `-1` for the file's default.
    pub subsong: i32,
    pub base_path: String,
}

/// Frequency analyser configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalyserSettings {
    pub fft_size: usize,
    pub min_decibels: f32,
    pub max_decibels: f32,
    pub smoothing: f32,
}

/// The constructed, single-stream engine instance.
pub trait EngineInstance: Send + Sync {
    fn load_from_file(
        &self,
        file: VirtualFile,
        options: LoadOptions,
        on_success: LoadCallback,
        on_failure: LoadCallback,
    ) -> Result<(), String>;
    fn load_from_url(
        &self,
        url: &str,
        options: LoadOptions,
        on_success: LoadCallback,
        on_failure: LoadCallback,
    ) -> Result<(), String>;
    fn play(&self) -> Result<(), String>;
    fn pause(&self) -> Result<(), String>;
    /// Attaches an analyser to the engine output, `None` when no audio graph exists yet.
    fn create_analyser(&self, settings: &AnalyserSettings) -> Option<Arc<dyn AnalyserTap>>;
}

/// Frequency-analysis tap attached to the engine output.
pub trait AnalyserTap: Send + Sync {
    fn frequency_bin_count(&self) -> usize;
    /// Writes current byte magnitudes into `out`, one per bin.
    fn byte_frequency_data(&self, out: &mut [u8]);
    fn disconnect(&self) -> Result<(), String>;
}
