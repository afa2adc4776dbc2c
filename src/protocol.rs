//! Event-bus protocol shared by the playback components.
//!
//! The sequencer publishes its outward signals here and the adapter forwards
//! engine callbacks here; the session driver and any presentation layer
//! subscribe to the same channel.

use crate::{error::PlayerError, track::TrackDescriptor};

/// Top-level envelope for all bus traffic.
#[derive(Debug, Clone)]
pub enum Message {
    Engine(EngineEvent),
    Sequencer(SequencerEvent),
}

/// Notifications raised by the playback engine callbacks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// The engine instance finished construction.
    PlayerReady,
    /// A loaded track is decoded and ready to play.
    TrackReady,
    /// The playing track reached its natural end.
    TrackEnded,
}

/// Signals emitted by the playlist sequencer.
#[derive(Debug, Clone)]
pub enum SequencerEvent {
    /// A track was loaded into the engine. `track` carries its payload.
    TrackStarted {
        track: TrackDescriptor,
        index: usize,
    },
    /// The last track finished or was skipped; the playlist does not wrap.
    PlaylistEnded,
    /// The previous track ended on its own and the next one was loaded.
    AutoAdvanced,
    /// Loading the track at `index` failed.
    Error { index: usize, error: PlayerError },
}
