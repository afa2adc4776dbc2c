//! Playback core of the SID Surfer chiptune arcade game: runtime loading, the
//! engine adapter, track resolution, playlist sequencing and the session driver.

pub mod backend_adapter;
pub mod config;
pub mod engine;
pub mod error;
pub mod manifest;
pub mod protocol;
pub mod runtime_loader;
pub mod sequencer;
pub mod session;
pub mod spectrum;
pub mod track;
pub mod track_resolver;

#[cfg(test)]
mod test_support;
