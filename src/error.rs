use std::path::PathBuf;

use thiserror::Error;

/// A track's source could not be obtained or did not describe playable notes.
///
/// Only the affected track is excluded from playback.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed MIDI data: {0}")]
    Midi(#[from] midly::Error),

    #[error("unsupported MIDI timing: {0}")]
    UnsupportedTiming(&'static str),

    #[error("track `{track}` event {index}: {reason}")]
    InvalidEvent {
        track: String,
        index: usize,
        reason: &'static str,
    },

    #[error("track `{track}` declares an unusable tempo ({bpm} BPM)")]
    InvalidTempo { track: String, bpm: f64 },
}

/// Failure reported by a synthesis backend for a single command.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SynthError {
    #[error("synth event queue is full")]
    QueueFull,

    #[error("synth output unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to access project file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid project file: {0}")]
    Parse(#[from] ron::error::SpannedError),

    #[error("failed to serialize project: {0}")]
    Serialize(#[from] ron::Error),
}
