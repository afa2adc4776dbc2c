//! In-process engine that validates SID files and simulates transport timing.
//!
//! No audio is produced. A loaded track "plays" for a fixed length, then the
//! track-end callback fires, which is enough to drive the sequencer and the
//! session end to end.

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use log::{debug, info, warn};
use tokio::{task::JoinHandle, time::Instant};

use super::{
    AnalyserSettings, AnalyserTap, BackendReadiness, EngineCallbacks, EngineInstance,
    InstanceOptions, LoadCallback, LoadOptions, ModuleLoaded, Notify, PlaybackEngine,
    RuntimeHost, VirtualFile,
};

const PSID_MAGIC: &[u8; 4] = b"PSID";
const RSID_MAGIC: &[u8; 4] = b"RSID";
const SONG_COUNT_OFFSET: usize = 0x0e;
const START_SONG_OFFSET: usize = 0x10;
const MIN_HEADER_LEN: usize = 0x76;

/// Runtime host whose modules are always present.
#[derive(Debug, Default)]
pub struct HeadlessRuntime;

impl RuntimeHost for HeadlessRuntime {
    fn load_module(&self, module: &str, done: ModuleLoaded) {
        debug!("HeadlessRuntime: module {} is built in", module);
        done(Ok(()));
    }

    fn backend_readiness(&self, _on_ready: Notify) -> BackendReadiness {
        BackendReadiness::Ready
    }

    fn has_capabilities(&self) -> bool {
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SidFormat {
    Psid,
    Rsid,
}

/// The fields of a PSID/RSID header the engine needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SidHeader {
    pub format: SidFormat,
    pub version: u16,
    pub songs: u16,
    /// 1-based default tune.
    pub start_song: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SidHeaderError {
    #[error("file too short for a SID header ({0} bytes)")]
    Truncated(usize),
    #[error("missing PSID/RSID magic")]
    BadMagic,
    #[error("header declares no songs")]
    NoSongs,
    #[error("start song {start_song} outside 1..={songs}")]
    StartSongOutOfRange { start_song: u16, songs: u16 },
    #[error("subsong {subsong} outside 0..{songs}")]
    SubsongOutOfRange { subsong: i32, songs: u16 },
}

fn read_u16_be(bytes: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([bytes[offset], bytes[offset + 1]])
}

impl SidHeader {
    pub fn parse(bytes: &[u8]) -> Result<Self, SidHeaderError> {
        if bytes.len() < MIN_HEADER_LEN {
            return Err(SidHeaderError::Truncated(bytes.len()));
        }
        let format = match &bytes[..4] {
            magic if magic == PSID_MAGIC => SidFormat::Psid,
            magic if magic == RSID_MAGIC => SidFormat::Rsid,
            _ => return Err(SidHeaderError::BadMagic),
        };

        let songs = read_u16_be(bytes, SONG_COUNT_OFFSET);
        if songs == 0 {
            return Err(SidHeaderError::NoSongs);
        }
        // Some rips store 0 for "first song".
        let start_song = read_u16_be(bytes, START_SONG_OFFSET).max(1);
        if start_song > songs {
            return Err(SidHeaderError::StartSongOutOfRange { start_song, songs });
        }

        Ok(Self {
            format,
            version: read_u16_be(bytes, 4),
            songs,
            start_song,
        })
    }

    /// Checks a zero-based sub-song request; `-1` selects the start song.
    pub fn check_subsong(&self, subsong: i32) -> Result<(), SidHeaderError> {
        if subsong < 0 || subsong < i32::from(self.songs) {
            return Ok(());
        }
        Err(SidHeaderError::SubsongOutOfRange {
            subsong,
            songs: self.songs,
        })
    }
}

#[derive(Default)]
struct Transport {
    loaded: Option<String>,
    remaining: Duration,
    started_at: Option<Instant>,
    timer: Option<JoinHandle<()>>,
    // Bumped whenever a running timer is invalidated.
    epoch: u64,
}

impl Transport {
    fn halt(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        if let Some(started_at) = self.started_at.take() {
            self.remaining = self.remaining.saturating_sub(started_at.elapsed());
        }
        self.epoch += 1;
    }
}

/// Engine factory backed by [`HeadlessInstance`].
pub struct HeadlessEngine {
    track_length: Duration,
    instance: Mutex<Option<Arc<HeadlessInstance>>>,
}

impl HeadlessEngine {
    pub fn new(track_length: Duration) -> Self {
        Self {
            track_length,
            instance: Mutex::new(None),
        }
    }

    pub fn from_config(config: &crate::config::HeadlessConfig) -> Self {
        Self::new(Duration::from_secs(config.track_seconds))
    }
}

impl PlaybackEngine for HeadlessEngine {
    fn create_instance(
        &self,
        options: InstanceOptions,
        callbacks: EngineCallbacks,
    ) -> Result<(), String> {
        let mut slot = self.instance.lock().expect("headless instance lock poisoned");
        if slot.is_some() {
            return Err("engine instance already constructed".to_string());
        }
        debug!(
            "HeadlessEngine: constructing instance base_path={}",
            options.base_path
        );
        *slot = Some(Arc::new(HeadlessInstance {
            track_length: self.track_length,
            on_track_ready: Arc::clone(&callbacks.on_track_ready),
            on_track_end: Arc::clone(&callbacks.on_track_end),
            transport: Arc::new(Mutex::new(Transport::default())),
            analyser: Mutex::new(None),
        }));
        drop(slot);

        (callbacks.on_ready)();
        Ok(())
    }

    fn instance(&self) -> Option<Arc<dyn EngineInstance>> {
        let slot = self.instance.lock().expect("headless instance lock poisoned");
        slot.as_ref()
            .map(|instance| Arc::clone(instance) as Arc<dyn EngineInstance>)
    }
}

pub struct HeadlessInstance {
    track_length: Duration,
    on_track_ready: super::Listener,
    on_track_end: super::Listener,
    transport: Arc<Mutex<Transport>>,
    analyser: Mutex<Option<Arc<SilentAnalyser>>>,
}

impl HeadlessInstance {
    fn transport(&self) -> std::sync::MutexGuard<'_, Transport> {
        self.transport
            .lock()
            .expect("headless transport lock poisoned")
    }

    fn start_timer(&self, transport: &mut Transport) -> Result<(), String> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|err| format!("no async runtime for the track timer: {err}"))?;

        let remaining = transport.remaining;
        let epoch = transport.epoch;
        let track_length = self.track_length;
        let shared = Arc::clone(&self.transport);
        let on_track_end = Arc::clone(&self.on_track_end);
        transport.started_at = Some(Instant::now());
        transport.timer = Some(runtime.spawn(async move {
            tokio::time::sleep(remaining).await;
            {
                let mut transport = shared.lock().expect("headless transport lock poisoned");
                if transport.epoch != epoch {
                    return;
                }
                transport.timer = None;
                transport.started_at = None;
                transport.remaining = track_length;
            }
            on_track_end();
        }));
        Ok(())
    }
}

impl EngineInstance for HeadlessInstance {
    fn load_from_file(
        &self,
        file: VirtualFile,
        options: LoadOptions,
        on_success: LoadCallback,
        on_failure: LoadCallback,
    ) -> Result<(), String> {
        let checked = SidHeader::parse(&file.bytes)
            .and_then(|header| header.check_subsong(options.subsong).map(|()| header));
        let header = match checked {
            Ok(header) => header,
            Err(err) => {
                warn!("HeadlessEngine: rejecting {}: {}", file.name, err);
                on_failure();
                return Ok(());
            }
        };

        {
            let mut transport = self.transport();
            transport.halt();
            transport.loaded = Some(file.name.clone());
            transport.remaining = self.track_length;
        }
        info!(
            "HeadlessEngine: loaded {} ({:?} v{}, {} songs, subsong {})",
            file.name, header.format, header.version, header.songs, options.subsong
        );
        on_success();
        (self.on_track_ready)();
        Ok(())
    }

    fn load_from_url(
        &self,
        url: &str,
        _options: LoadOptions,
        _on_success: LoadCallback,
        on_failure: LoadCallback,
    ) -> Result<(), String> {
        warn!("HeadlessEngine: cannot stream {}, resolve it to bytes first", url);
        on_failure();
        Ok(())
    }

    fn play(&self) -> Result<(), String> {
        let mut transport = self.transport();
        if transport.loaded.is_none() {
            debug!("HeadlessEngine: play() with nothing loaded");
            return Ok(());
        }
        if transport.timer.is_some() {
            return Ok(());
        }
        self.start_timer(&mut transport)
    }

    fn pause(&self) -> Result<(), String> {
        let mut transport = self.transport();
        transport.halt();
        Ok(())
    }

    fn create_analyser(&self, settings: &AnalyserSettings) -> Option<Arc<dyn AnalyserTap>> {
        let mut analyser = self.analyser.lock().expect("headless analyser lock poisoned");
        let tap = analyser.get_or_insert_with(|| {
            Arc::new(SilentAnalyser {
                bins: settings.fft_size / 2,
            })
        });
        Some(Arc::clone(tap) as Arc<dyn AnalyserTap>)
    }
}

/// Analyser over an output that never makes a sound.
pub struct SilentAnalyser {
    bins: usize,
}

impl AnalyserTap for SilentAnalyser {
    fn frequency_bin_count(&self) -> usize {
        self.bins
    }

    fn byte_frequency_data(&self, out: &mut [u8]) {
        out.fill(0);
    }

    fn disconnect(&self) -> Result<(), String> {
        Ok(())
    }
}
