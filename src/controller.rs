use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::audio::Synth;
use crate::error::LoadError;
use crate::events::ScheduledTrigger;
use crate::midi;
use crate::timing::{
    Clock, DispatchReport, ParsedTrack, PlaybackSession, SessionId, TransportClock,
    TransportState,
};
use crate::tracks::{Track, TrackStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlaybackState {
    Idle,
    Playing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Idle,
    Dispatched(DispatchReport),
    /// A looping session reached its end and was queued again.
    Looped {
        session: SessionId,
        cycle: u32,
        report: DispatchReport,
    },
    /// The session's last voice was released; the controller is idle again.
    Finished {
        session: SessionId,
        report: DispatchReport,
    },
}

/// Owns the tracks, the transport and at most one live session.
///
/// Every operation is synchronous. Notes only fire from [`tick`], which the
/// host calls on its own schedule.
///
/// [`tick`]: PlaybackController::tick
pub struct PlaybackController<S: Synth> {
    tracks: TrackStore,
    transport: TransportClock,
    synth: S,
    session: Option<PlaybackSession>,
    next_session: u64,
    lead_in: f64,
    looping: bool,
}

impl<S: Synth> PlaybackController<S> {
    pub fn new(synth: S, clock: Arc<dyn Clock>) -> Self {
        Self {
            tracks: TrackStore::new(),
            transport: TransportClock::new(clock),
            synth,
            session: None,
            next_session: 1,
            lead_in: 0.0,
            looping: false,
        }
    }

    /// Delay between `start()` and the first possible note.
    pub fn with_lead_in(mut self, seconds: f64) -> Self {
        self.lead_in = if seconds.is_finite() { seconds.max(0.0) } else { 0.0 };
        self
    }

    pub fn with_looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }

    /// A looping session restarts from its first note once its last note
    /// has released, instead of finishing. Applies to the live session too.
    pub fn set_looping(&mut self, looping: bool) {
        self.looping = looping;
    }

    pub fn is_looping(&self) -> bool {
        self.looping
    }

    pub fn load_track(&mut self, id: &str, parsed: ParsedTrack) -> Result<(), LoadError> {
        self.tracks.load(id, parsed)?;
        let declared = self.tracks.get(id).and_then(Track::declared_tempo);
        if self.transport.seed_base_tempo(declared) {
            info!(track = id, bpm = self.transport.snapshot().base_tempo, "base tempo seeded");
        }
        Ok(())
    }

    pub fn load_track_file(&mut self, id: &str, path: &Path) -> Result<(), LoadError> {
        match midi::load_file(path) {
            Ok(parsed) => self.load_track(id, parsed),
            Err(err) => {
                self.tracks.mark_unavailable(id, &err);
                Err(err)
            }
        }
    }

    /// Tear down any live session, then schedule the enabled tracks with the
    /// current tempo and key shift.
    pub fn start(&mut self) -> SessionId {
        self.teardown("restart");

        let transport = self.transport.snapshot();
        let start_epoch = self.transport.now() + self.lead_in;
        let enabled = self.tracks.enabled_tracks();
        let id = SessionId(self.next_session);
        self.next_session += 1;

        let session = PlaybackSession::new(id, start_epoch, &enabled, &transport);
        info!(
            session = %id,
            tracks = ?enabled.iter().map(|t| t.id()).collect::<Vec<_>>(),
            triggers = session.triggers().len(),
            tempo_ratio = session.tempo_ratio(),
            key_shift = transport.key_shift,
            "playback started"
        );
        self.session = Some(session);
        id
    }

    /// Returns false if nothing was playing.
    pub fn stop(&mut self) -> bool {
        if self.session.is_none() {
            debug!("stop while idle, ignoring");
            return false;
        }
        self.teardown("stop");
        true
    }

    fn teardown(&mut self, reason: &'static str) {
        if let Some(mut session) = self.session.take() {
            let cancelled = session.pending_count();
            let released = session.dispose(&mut self.synth);
            info!(session = %session.id(), reason, cancelled, released, "playback stopped");
        }
    }

    /// Fire whatever is due now.
    pub fn tick(&mut self) -> TickOutcome {
        let now = self.transport.now();
        let Some(session) = self.session.as_mut() else {
            return TickOutcome::Idle;
        };

        let mut report = session.dispatch_due(now, &mut self.synth);
        if !session.is_finished() {
            return TickOutcome::Dispatched(report);
        }

        if self.looping && session.repeat() {
            report.merge(session.dispatch_due(now, &mut self.synth));
            debug!(session = %session.id(), cycle = session.cycle(), "loop restarted");
            return TickOutcome::Looped {
                session: session.id(),
                cycle: session.cycle(),
                report,
            };
        }

        let id = session.id();
        self.session = None;
        info!(session = %id, "playback finished");
        TickOutcome::Finished { session: id, report }
    }

    /// Affects the next `start()` only.
    pub fn toggle_track(&mut self, id: &str) -> Option<bool> {
        self.tracks.toggle(id)
    }

    pub fn enable_track(&mut self, id: &str) -> bool {
        self.tracks.set_enabled(id, true)
    }

    pub fn disable_track(&mut self, id: &str) -> bool {
        self.tracks.set_enabled(id, false)
    }

    pub fn set_base_tempo(&mut self, bpm: f64) {
        self.transport.set_base_tempo(bpm);
    }

    pub fn set_tempo(&mut self, bpm: f64) -> f64 {
        self.transport.set_tempo(bpm)
    }

    pub fn set_tempo_ratio(&mut self, ratio: f64) -> f64 {
        self.transport.set_tempo_ratio(ratio)
    }

    pub fn set_key_shift(&mut self, semitones: i32) -> i32 {
        self.transport.set_key_shift(semitones)
    }

    /// Applied to the output immediately, whether or not a session is live.
    pub fn set_gain(&mut self, gain: f32) -> f32 {
        let applied = self.transport.set_gain(gain);
        if let Err(err) = self.synth.set_master_gain(applied) {
            warn!(gain = applied, error = %err, "failed to apply master gain");
        }
        applied
    }

    pub fn state(&self) -> PlaybackState {
        match self.session {
            Some(_) => PlaybackState::Playing,
            None => PlaybackState::Idle,
        }
    }

    pub fn session_id(&self) -> Option<SessionId> {
        self.session.as_ref().map(PlaybackSession::id)
    }

    /// Attacks and releases of the live session not yet fired.
    pub fn active_trigger_count(&self) -> usize {
        self.session.as_ref().map_or(0, PlaybackSession::pending_count)
    }

    pub fn active_voice_count(&self) -> usize {
        self.session
            .as_ref()
            .map_or(0, PlaybackSession::active_voice_count)
    }

    pub fn scheduled_triggers(&self) -> &[ScheduledTrigger] {
        match &self.session {
            Some(session) => session.triggers(),
            None => &[],
        }
    }

    pub fn transport(&self) -> TransportState {
        self.transport.snapshot()
    }

    pub fn now(&self) -> f64 {
        self.transport.now()
    }

    pub fn tracks(&self) -> &TrackStore {
        &self.tracks
    }

    pub fn synth(&self) -> &S {
        &self.synth
    }
}

impl<S: Synth> Drop for PlaybackController<S> {
    fn drop(&mut self) {
        self.teardown("shutdown");
    }
}
