use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::LoadError;
use crate::timing::{NoteEvent, ParsedTrack};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    id: String,
    events: Vec<NoteEvent>,
    enabled: bool,
    declared_tempo: Option<f64>,
    available: bool,
}

impl Track {
    pub fn new(id: impl Into<String>, parsed: ParsedTrack) -> Self {
        Self {
            id: id.into(),
            events: parsed.events,
            enabled: false,
            declared_tempo: parsed.declared_tempo,
            available: true,
        }
    }

    fn unavailable(id: &str) -> Self {
        Self {
            id: id.to_string(),
            events: Vec::new(),
            enabled: false,
            declared_tempo: None,
            available: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn events(&self) -> &[NoteEvent] {
        &self.events
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// False when the track's source failed to load.
    pub fn is_available(&self) -> bool {
        self.available
    }

    pub fn declared_tempo(&self) -> Option<f64> {
        self.declared_tempo
    }
}

/// Named tracks in registration order. Tracks are never removed; a reload
/// replaces the events in place and keeps the position.
#[derive(Debug, Clone, Default)]
pub struct TrackStore {
    tracks: Vec<Track>,
}

impl TrackStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install or replace a track's notes. A malformed track is kept as an
    /// unavailable placeholder and the error is returned.
    pub fn load(&mut self, id: &str, parsed: ParsedTrack) -> Result<(), LoadError> {
        if let Err(err) = parsed.validate(id) {
            self.mark_unavailable(id, &err);
            return Err(err);
        }

        let enabled = self.get(id).is_some_and(Track::is_enabled);
        let mut track = Track::new(id, parsed);
        track.enabled = enabled;
        info!(track = id, notes = track.events.len(), "track loaded");
        self.upsert(track);
        Ok(())
    }

    pub fn mark_unavailable(&mut self, id: &str, err: &LoadError) {
        warn!(track = id, error = %err, "track unavailable, excluded from playback");
        self.upsert(Track::unavailable(id));
    }

    /// Returns false for unknown tracks and for enabling an unavailable one.
    pub fn set_enabled(&mut self, id: &str, enabled: bool) -> bool {
        let Some(track) = self.tracks.iter_mut().find(|t| t.id == id) else {
            debug!(track = id, "unknown track, ignoring");
            return false;
        };
        if enabled && !track.available {
            debug!(track = id, "track unavailable, cannot enable");
            return false;
        }
        track.enabled = enabled;
        true
    }

    /// Flip the enabled flag, returning the new value.
    pub fn toggle(&mut self, id: &str) -> Option<bool> {
        let target = !self.get(id)?.enabled;
        self.set_enabled(id, target).then_some(target)
    }

    pub fn enabled_tracks(&self) -> Vec<&Track> {
        self.tracks.iter().filter(|t| t.enabled).collect()
    }

    pub fn get(&self, id: &str) -> Option<&Track> {
        self.tracks.iter().find(|t| t.id == id)
    }

    pub fn ids(&self) -> Vec<&str> {
        self.tracks.iter().map(Track::id).collect()
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    fn upsert(&mut self, track: Track) {
        match self.tracks.iter_mut().find(|t| t.id == track.id) {
            Some(slot) => *slot = track,
            None => self.tracks.push(track),
        }
    }
}
