use std::collections::{BTreeMap, BinaryHeap};
use std::fmt;

use tracing::{debug, trace, warn};

use super::{TransportState, pitch};
use crate::audio::Synth;
use crate::events::{NoteMessage, ScheduledEvent, ScheduledTrigger};
use crate::tracks::Track;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Resolve every note of `tracks` against `transport`.
///
/// Triggers are appended track by track in source order and are not sorted
/// by time; that append order is the tie-break for equal fire times.
pub fn build_triggers(
    start_epoch: f64,
    tracks: &[&Track],
    transport: &TransportState,
) -> Vec<ScheduledTrigger> {
    let ratio = transport.tempo_ratio();
    let mut triggers = Vec::with_capacity(tracks.iter().map(|t| t.events().len()).sum());
    let mut clamped = 0;

    for (track_index, track) in tracks.iter().enumerate() {
        for event in track.events() {
            if pitch::is_clamped(event.pitch, transport.key_shift) {
                clamped += 1;
            }
            triggers.push(ScheduledTrigger {
                fire_time: start_epoch + event.start_offset * ratio,
                pitch: pitch::shift(event.pitch, transport.key_shift),
                duration: event.duration * ratio,
                velocity: event.velocity,
                track: track_index,
            });
        }
    }

    if clamped > 0 {
        debug!(clamped, key_shift = transport.key_shift, "pitches clamped to MIDI range");
    }
    triggers
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchReport {
    pub note_ons: usize,
    pub note_offs: usize,
    pub failures: usize,
}

impl DispatchReport {
    pub fn is_empty(&self) -> bool {
        self.note_ons == 0 && self.note_offs == 0 && self.failures == 0
    }

    pub fn merge(&mut self, other: DispatchReport) {
        self.note_ons += other.note_ons;
        self.note_offs += other.note_offs;
        self.failures += other.failures;
    }
}

/// One start-to-stop playback lifecycle.
///
/// Triggers are fixed when the session is built. Their attacks and releases
/// wait in a min-heap until `dispatch_due` reaches them; `dispose` drops
/// whatever is still pending and releases every sounding voice.
///
/// A voice whose release fails stays tracked and is released again on the
/// next `dispatch_due` or `dispose`.
pub struct PlaybackSession {
    id: SessionId,
    start_epoch: f64,
    tempo_ratio: f64,
    triggers: Vec<ScheduledTrigger>,
    pending: BinaryHeap<ScheduledEvent>,
    // trigger index -> sounding pitch
    voices: BTreeMap<usize, u8>,
    // trigger indices whose release was due but failed
    stranded: Vec<usize>,
    cycle: u32,
    disposed: bool,
}

impl PlaybackSession {
    pub fn new(
        id: SessionId,
        start_epoch: f64,
        tracks: &[&Track],
        transport: &TransportState,
    ) -> Self {
        let triggers = build_triggers(start_epoch, tracks, transport);
        let pending = seed(&triggers);

        Self {
            id,
            start_epoch,
            tempo_ratio: transport.tempo_ratio(),
            triggers,
            pending,
            voices: BTreeMap::new(),
            stranded: Vec::new(),
            cycle: 0,
            disposed: false,
        }
    }

    /// Queue every trigger again, one loop length later. The loop length is
    /// `end_time() - start_epoch()`. Only a finished session with a non-empty
    /// loop repeats; returns whether it did.
    pub fn repeat(&mut self) -> bool {
        let length = self.end_time() - self.start_epoch;
        if self.disposed || !self.is_finished() || length <= 0.0 {
            return false;
        }
        for trigger in &mut self.triggers {
            trigger.fire_time += length;
        }
        self.start_epoch += length;
        self.pending = seed(&self.triggers);
        self.cycle += 1;
        true
    }

    /// Completed repeats; 0 during the first pass.
    pub fn cycle(&self) -> u32 {
        self.cycle
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn start_epoch(&self) -> f64 {
        self.start_epoch
    }

    pub fn tempo_ratio(&self) -> f64 {
        self.tempo_ratio
    }

    pub fn triggers(&self) -> &[ScheduledTrigger] {
        &self.triggers
    }

    /// Attacks and releases not yet fired.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn active_voice_count(&self) -> usize {
        self.voices.len()
    }

    /// Clock time at which the last note releases.
    pub fn end_time(&self) -> f64 {
        self.triggers
            .iter()
            .map(ScheduledTrigger::release_time)
            .fold(self.start_epoch, f64::max)
    }

    pub fn is_finished(&self) -> bool {
        self.pending.is_empty() && self.voices.is_empty()
    }

    /// Fire every pending event due at or before `now`, earliest first.
    pub fn dispatch_due<S: Synth + ?Sized>(&mut self, now: f64, synth: &mut S) -> DispatchReport {
        let mut report = DispatchReport::default();
        for index in std::mem::take(&mut self.stranded) {
            self.release(index, synth, &mut report);
        }
        while self.pending.peek().is_some_and(|event| event.time <= now) {
            if let Some(event) = self.pending.pop() {
                self.fire(event, synth, &mut report);
            }
        }
        report
    }

    fn fire<S: Synth + ?Sized>(
        &mut self,
        event: ScheduledEvent,
        synth: &mut S,
        report: &mut DispatchReport,
    ) {
        let trigger = self.triggers[event.trigger];
        match event.message {
            NoteMessage::NoteOn => {
                match synth.note_on(
                    trigger.pitch,
                    trigger.velocity,
                    trigger.duration,
                    trigger.fire_time,
                ) {
                    Ok(()) => {
                        trace!(session = %self.id, pitch = trigger.pitch, at = trigger.fire_time, "note on");
                        self.voices.insert(event.trigger, trigger.pitch);
                        report.note_ons += 1;
                    }
                    Err(err) => {
                        warn!(session = %self.id, pitch = trigger.pitch, error = %err, "note on failed, voice dropped");
                        report.failures += 1;
                    }
                }
            }
            NoteMessage::NoteOff => self.release(event.trigger, synth, report),
        }
    }

    fn release<S: Synth + ?Sized>(
        &mut self,
        index: usize,
        synth: &mut S,
        report: &mut DispatchReport,
    ) {
        let Some(&pitch) = self.voices.get(&index) else {
            return;
        };
        match synth.note_off(pitch) {
            Ok(()) => {
                trace!(session = %self.id, pitch, "note off");
                self.voices.remove(&index);
                report.note_offs += 1;
            }
            Err(err) => {
                warn!(session = %self.id, pitch, error = %err, "note off failed, will retry");
                self.stranded.push(index);
                report.failures += 1;
            }
        }
    }

    /// Cancel everything still pending and release every sounding voice.
    /// Release failures are logged per voice and do not stop the others.
    /// Returns the number of voices released; calling it again is a no-op.
    pub fn dispose<S: Synth + ?Sized>(&mut self, synth: &mut S) -> usize {
        let cancelled = self.pending.len();
        self.pending.clear();
        self.stranded.clear();

        let mut released = 0;
        for (_, pitch) in std::mem::take(&mut self.voices) {
            match synth.note_off(pitch) {
                Ok(()) => released += 1,
                Err(err) => {
                    warn!(session = %self.id, pitch, error = %err, "voice release failed");
                }
            }
        }

        if !self.disposed {
            debug!(session = %self.id, cancelled, released, "session disposed");
            self.disposed = true;
        }
        released
    }
}

fn seed(triggers: &[ScheduledTrigger]) -> BinaryHeap<ScheduledEvent> {
    triggers
        .iter()
        .enumerate()
        .flat_map(|(index, trigger)| {
            [
                ScheduledEvent::note_on(index, trigger),
                ScheduledEvent::note_off(index, trigger),
            ]
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SynthError;
    use crate::timing::{NoteEvent, ParsedTrack};

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        On(u8),
        Off(u8),
    }

    #[derive(Default)]
    struct Recorder {
        calls: Vec<Call>,
        fail_off: Option<u8>,
        // fails the first release of this pitch only
        flaky_off: Option<u8>,
        fail_on: Option<u8>,
    }

    impl Synth for Recorder {
        fn note_on(&mut self, pitch: u8, _: f32, _: f64, _: f64) -> Result<(), SynthError> {
            if self.fail_on == Some(pitch) {
                return Err(SynthError::Unavailable("test".into()));
            }
            self.calls.push(Call::On(pitch));
            Ok(())
        }

        fn note_off(&mut self, pitch: u8) -> Result<(), SynthError> {
            if self.fail_off == Some(pitch) {
                return Err(SynthError::Unavailable("test".into()));
            }
            if self.flaky_off == Some(pitch) {
                self.flaky_off = None;
                return Err(SynthError::QueueFull);
            }
            self.calls.push(Call::Off(pitch));
            Ok(())
        }

        fn set_master_gain(&mut self, _: f32) -> Result<(), SynthError> {
            Ok(())
        }
    }

    fn track(id: &str, events: Vec<NoteEvent>) -> Track {
        Track::new(id, ParsedTrack::new(events))
    }

    fn transport(ratio: f64, key_shift: i32) -> TransportState {
        TransportState {
            base_tempo: 120.0,
            current_tempo: 120.0 / ratio,
            key_shift,
            gain: 1.0,
        }
    }

    fn bass() -> Track {
        track("bass", vec![NoteEvent::new(50, 0.0, 1.0, 0.8)])
    }

    #[test]
    fn single_bass_note_at_unity() {
        let bass = bass();
        let triggers = build_triggers(10.0, &[&bass], &transport(1.0, 0));
        assert_eq!(triggers.len(), 1);
        assert_eq!(triggers[0].pitch, 50);
        assert_eq!(triggers[0].fire_time, 10.0);
        assert_eq!(triggers[0].duration, 1.0);
        assert_eq!(triggers[0].velocity, 0.8);
    }

    #[test]
    fn key_shift_transposes() {
        let bass = bass();
        let triggers = build_triggers(0.0, &[&bass], &transport(1.0, 5));
        assert_eq!(triggers[0].pitch, 55);
    }

    #[test]
    fn double_speed_halves_timing() {
        let melody = track(
            "arp",
            vec![
                NoteEvent::new(62, 0.0, 1.0, 0.8),
                NoteEvent::new(61, 0.5, 0.25, 0.8),
            ],
        );
        let triggers = build_triggers(2.0, &[&melody], &transport(0.5, 0));
        assert_eq!(triggers[0].duration, 0.5);
        assert_eq!(triggers[1].fire_time, 2.25);
        assert_eq!(triggers[1].duration, 0.125);
    }

    #[test]
    fn timing_formula_holds_across_ratios() {
        let melody = track(
            "bells",
            (0..16)
                .map(|i| NoteEvent::new(64, i as f64 * 0.27, 0.13 + i as f64 * 0.01, 0.5))
                .collect(),
        );
        for ratio in [0.25, 0.5, 0.9, 1.0, 1.3, 2.0, 4.0] {
            let state = transport(ratio, 0);
            let r = state.tempo_ratio();
            let triggers = build_triggers(3.5, &[&melody], &state);
            for (trigger, event) in triggers.iter().zip(melody.events()) {
                assert!((trigger.fire_time - (3.5 + event.start_offset * r)).abs() < 1e-9);
                assert!((trigger.duration - event.duration * r).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn triggers_follow_track_then_event_order() {
        let a = track("a", vec![NoteEvent::new(70, 1.0, 0.5, 1.0), NoteEvent::new(71, 0.0, 0.5, 1.0)]);
        let b = track("b", vec![NoteEvent::new(40, 0.0, 0.5, 1.0)]);
        let triggers = build_triggers(0.0, &[&a, &b], &transport(1.0, 0));
        let pitches: Vec<u8> = triggers.iter().map(|t| t.pitch).collect();
        assert_eq!(pitches, vec![70, 71, 40]);
        assert_eq!(triggers[2].track, 1);
    }

    #[test]
    fn dispatches_in_time_order_with_append_tie_break() {
        let a = track("a", vec![NoteEvent::new(62, 0.0, 1.0, 1.0), NoteEvent::new(66, 0.5, 0.1, 1.0)]);
        let b = track("b", vec![NoteEvent::new(50, 0.0, 1.0, 1.0)]);
        let mut session = PlaybackSession::new(SessionId(1), 0.0, &[&a, &b], &transport(1.0, 0));
        let mut synth = Recorder::default();

        let report = session.dispatch_due(0.0, &mut synth);
        assert_eq!(report.note_ons, 2);
        assert_eq!(synth.calls, vec![Call::On(62), Call::On(50)]);

        session.dispatch_due(2.0, &mut synth);
        assert_eq!(
            synth.calls[2..],
            [Call::On(66), Call::Off(66), Call::Off(62), Call::Off(50)]
        );
        assert!(session.is_finished());
    }

    #[test]
    fn nothing_fires_early() {
        let bass = bass();
        let mut session = PlaybackSession::new(SessionId(1), 5.0, &[&bass], &transport(1.0, 0));
        let mut synth = Recorder::default();
        assert!(session.dispatch_due(4.999, &mut synth).is_empty());
        assert_eq!(session.pending_count(), 2);
        assert_eq!(session.end_time(), 6.0);
    }

    #[test]
    fn back_to_back_same_pitch_retriggers() {
        let repeated = track(
            "bass",
            vec![NoteEvent::new(50, 0.0, 1.0, 1.0), NoteEvent::new(50, 1.0, 1.0, 1.0)],
        );
        let mut session = PlaybackSession::new(SessionId(1), 0.0, &[&repeated], &transport(1.0, 0));
        let mut synth = Recorder::default();
        session.dispatch_due(1.0, &mut synth);
        assert_eq!(synth.calls, vec![Call::On(50), Call::Off(50), Call::On(50)]);
        assert_eq!(session.active_voice_count(), 1);
    }

    #[test]
    fn zero_length_note_still_releases() {
        let blip = track("bells", vec![NoteEvent::new(80, 0.5, 0.0, 1.0)]);
        let mut session = PlaybackSession::new(SessionId(1), 0.0, &[&blip], &transport(1.0, 0));
        let mut synth = Recorder::default();
        session.dispatch_due(0.5, &mut synth);
        assert_eq!(synth.calls, vec![Call::On(80), Call::Off(80)]);
        assert!(session.is_finished());
    }

    #[test]
    fn dispose_cancels_pending_and_releases_voices() {
        let chords = track(
            "chords",
            vec![
                NoteEvent::new(62, 0.0, 4.0, 1.0),
                NoteEvent::new(66, 0.0, 4.0, 1.0),
                NoteEvent::new(69, 4.0, 4.0, 1.0),
            ],
        );
        let mut session = PlaybackSession::new(SessionId(1), 0.0, &[&chords], &transport(1.0, 0));
        let mut synth = Recorder::default();
        session.dispatch_due(1.0, &mut synth);
        assert_eq!(session.active_voice_count(), 2);

        assert_eq!(session.dispose(&mut synth), 2);
        assert_eq!(session.pending_count(), 0);
        assert_eq!(session.active_voice_count(), 0);
        assert!(synth.calls.ends_with(&[Call::Off(62), Call::Off(66)]));

        let calls = synth.calls.len();
        assert_eq!(session.dispose(&mut synth), 0);
        session.dispatch_due(100.0, &mut synth);
        assert_eq!(synth.calls.len(), calls);
    }

    #[test]
    fn failed_release_does_not_block_others() {
        let chords = track(
            "chords",
            vec![
                NoteEvent::new(61, 0.0, 4.0, 1.0),
                NoteEvent::new(64, 0.0, 4.0, 1.0),
                NoteEvent::new(69, 0.0, 4.0, 1.0),
            ],
        );
        let mut session = PlaybackSession::new(SessionId(1), 0.0, &[&chords], &transport(1.0, 0));
        let mut synth = Recorder {
            fail_off: Some(64),
            ..Default::default()
        };
        session.dispatch_due(0.0, &mut synth);
        assert_eq!(session.dispose(&mut synth), 2);
        assert_eq!(session.active_voice_count(), 0);
        assert!(synth.calls.contains(&Call::Off(61)));
        assert!(synth.calls.contains(&Call::Off(69)));
    }

    #[test]
    fn failed_attack_is_not_tracked() {
        let bass = bass();
        let mut session = PlaybackSession::new(SessionId(1), 0.0, &[&bass], &transport(1.0, 0));
        let mut synth = Recorder {
            fail_on: Some(50),
            ..Default::default()
        };
        let report = session.dispatch_due(5.0, &mut synth);
        assert_eq!(report.failures, 1);
        assert_eq!(report.note_offs, 0);
        assert!(synth.calls.is_empty());
        assert!(session.is_finished());
    }

    #[test]
    fn sub_ulp_duration_still_releases() {
        let grace = track("bells", vec![NoteEvent::new(80, 1.0, 1e-20, 1.0)]);
        let mut session = PlaybackSession::new(SessionId(1), 0.0, &[&grace], &transport(1.0, 0));
        assert_eq!(session.triggers()[0].release_time(), session.triggers()[0].fire_time);

        let mut synth = Recorder::default();
        session.dispatch_due(100.0, &mut synth);
        assert_eq!(synth.calls, vec![Call::On(80), Call::Off(80)]);
        assert_eq!(session.active_voice_count(), 0);
        assert!(session.is_finished());
    }

    #[test]
    fn failed_scheduled_release_is_kept_for_dispose() {
        let bass = bass();
        let mut session = PlaybackSession::new(SessionId(1), 0.0, &[&bass], &transport(1.0, 0));
        let mut synth = Recorder::default();
        session.dispatch_due(0.0, &mut synth);

        synth.flaky_off = Some(50);
        let report = session.dispatch_due(1.0, &mut synth);
        assert_eq!(report.failures, 1);
        assert_eq!(session.active_voice_count(), 1);
        assert!(!session.is_finished());

        assert_eq!(session.dispose(&mut synth), 1);
        assert_eq!(synth.calls, vec![Call::On(50), Call::Off(50)]);
    }

    #[test]
    fn failed_scheduled_release_is_retried_on_next_dispatch() {
        let bass = bass();
        let mut session = PlaybackSession::new(SessionId(1), 0.0, &[&bass], &transport(1.0, 0));
        let mut synth = Recorder {
            flaky_off: Some(50),
            ..Default::default()
        };
        session.dispatch_due(1.0, &mut synth);
        assert_eq!(session.active_voice_count(), 1);

        let report = session.dispatch_due(1.01, &mut synth);
        assert_eq!(report.note_offs, 1);
        assert_eq!(synth.calls, vec![Call::On(50), Call::Off(50)]);
        assert!(session.is_finished());
    }

    #[test]
    fn repeat_requeues_one_loop_later() {
        let riff = track(
            "arp",
            vec![NoteEvent::new(62, 0.0, 0.5, 1.0), NoteEvent::new(66, 0.5, 1.5, 1.0)],
        );
        let mut session = PlaybackSession::new(SessionId(1), 1.0, &[&riff], &transport(1.0, 0));
        let mut synth = Recorder::default();
        assert!(!session.repeat());

        session.dispatch_due(3.0, &mut synth);
        assert!(session.is_finished());
        assert!(session.repeat());
        assert_eq!(session.cycle(), 1);
        assert_eq!(session.start_epoch(), 3.0);
        assert_eq!(session.triggers()[0].fire_time, 3.0);
        assert_eq!(session.end_time(), 5.0);
        assert_eq!(session.pending_count(), 4);

        session.dispatch_due(3.0, &mut synth);
        assert_eq!(synth.calls[4..], [Call::On(62)]);
    }

    #[test]
    fn empty_or_disposed_session_does_not_repeat() {
        let mut empty = PlaybackSession::new(SessionId(1), 0.0, &[], &transport(1.0, 0));
        assert!(!empty.repeat());

        let bass = bass();
        let mut session = PlaybackSession::new(SessionId(2), 0.0, &[&bass], &transport(1.0, 0));
        session.dispose(&mut Recorder::default());
        assert!(!session.repeat());
    }
}
