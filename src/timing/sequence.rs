use serde::{Deserialize, Serialize};

use crate::error::LoadError;

/// A single parsed note. Offsets and durations are seconds relative to the
/// start of its track at the track's declared tempo.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NoteEvent {
    pub pitch: u8,
    pub start_offset: f64,
    pub duration: f64,
    /// 0.0 -> 1.0
    pub velocity: f32,
}

impl NoteEvent {
    pub fn new(pitch: u8, start_offset: f64, duration: f64, velocity: f32) -> Self {
        Self {
            pitch,
            start_offset,
            duration,
            velocity,
        }
    }

    pub fn end(&self) -> f64 {
        self.start_offset + self.duration
    }

    fn check(&self) -> Result<(), &'static str> {
        if self.pitch > 127 {
            return Err("pitch above 127");
        }
        if !self.start_offset.is_finite() || self.start_offset < 0.0 {
            return Err("start offset must be finite and non-negative");
        }
        if !self.duration.is_finite() || self.duration < 0.0 {
            return Err("duration must be finite and non-negative");
        }
        if !self.velocity.is_finite() || !(0.0..=1.0).contains(&self.velocity) {
            return Err("velocity outside 0.0..=1.0");
        }
        Ok(())
    }
}

/// Output of the parsing collaborator for one track.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParsedTrack {
    pub events: Vec<NoteEvent>,
    pub declared_tempo: Option<f64>,
}

impl ParsedTrack {
    pub fn new(events: Vec<NoteEvent>) -> Self {
        Self {
            events,
            declared_tempo: None,
        }
    }

    pub fn with_tempo(mut self, bpm: f64) -> Self {
        self.declared_tempo = Some(bpm);
        self
    }

    /// Seconds until the last note ends.
    pub fn duration(&self) -> f64 {
        self.events.iter().map(NoteEvent::end).fold(0.0, f64::max)
    }

    pub fn validate(&self, track_id: &str) -> Result<(), LoadError> {
        for (index, event) in self.events.iter().enumerate() {
            event.check().map_err(|reason| LoadError::InvalidEvent {
                track: track_id.to_string(),
                index,
                reason,
            })?;
        }

        if let Some(bpm) = self.declared_tempo {
            if !bpm.is_finite() || bpm <= 0.0 {
                return Err(LoadError::InvalidTempo {
                    track: track_id.to_string(),
                    bpm,
                });
            }
        }

        Ok(())
    }
}
