mod clock;
pub mod pitch;
mod scheduler;
mod sequence;

pub use clock::{
    Clock, DEFAULT_TEMPO, MAX_KEY_SHIFT, MAX_TEMPO, MIN_TEMPO, ManualClock, SystemClock,
    TransportClock, TransportState,
};
pub use pitch::{note_name, shift};
pub use scheduler::{DispatchReport, PlaybackSession, SessionId, build_triggers};
pub use sequence::{NoteEvent, ParsedTrack};
