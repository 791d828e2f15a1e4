pub mod audio;
pub mod controller;
pub mod engine;
pub mod error;
pub mod events;
pub mod midi;
pub mod project;
pub mod timing;
pub mod tracks;

pub use audio::{LogSynth, Synth};
pub use controller::{PlaybackController, PlaybackState, TickOutcome};
pub use engine::{
    EngineCommand, EngineHandle, EngineUpdate, load_project, spawn_controller, spawn_engine,
};
pub use error::{ConfigError, LoadError, SynthError};
pub use events::ScheduledTrigger;
pub use project::{Project, TrackSource};
pub use timing::{Clock, ManualClock, SessionId, SystemClock, TransportState};
pub use tracks::{Track, TrackStore};
