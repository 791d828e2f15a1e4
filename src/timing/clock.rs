use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const DEFAULT_TEMPO: f64 = 111.0;
pub const MIN_TEMPO: f64 = 20.0;
pub const MAX_TEMPO: f64 = 400.0;
pub const MAX_KEY_SHIFT: i32 = 127;

/// Monotonic time source, in seconds.
pub trait Clock: Send + Sync {
    fn now(&self) -> f64;
}

impl<C: Clock + ?Sized> Clock for Arc<C> {
    fn now(&self) -> f64 {
        (**self).now()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}

/// A clock that only moves when told to. Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<Mutex<f64>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, seconds: f64) {
        *self.now.lock() = seconds;
    }

    pub fn advance(&self, seconds: f64) {
        *self.now.lock() += seconds;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> f64 {
        *self.now.lock()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TransportState {
    /// BPM the track timings were authored at.
    pub base_tempo: f64,
    pub current_tempo: f64,
    pub key_shift: i32,
    /// Linear, >= 0.0
    pub gain: f32,
}

impl Default for TransportState {
    fn default() -> Self {
        Self {
            base_tempo: DEFAULT_TEMPO,
            current_tempo: DEFAULT_TEMPO,
            key_shift: 0,
            gain: 1.0,
        }
    }
}

impl TransportState {
    /// Scale factor applied to every note offset and duration of a session.
    pub fn tempo_ratio(&self) -> f64 {
        self.base_tempo / self.current_tempo
    }
}

/// Owns the live transport parameters and the time source.
///
/// Tempo and key shift are only read when a session is built; gain is
/// forwarded to the output stage by the controller as soon as it changes.
pub struct TransportClock {
    clock: Arc<dyn Clock>,
    state: TransportState,
    base_seeded: bool,
}

impl TransportClock {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            state: TransportState::default(),
            base_seeded: false,
        }
    }

    pub fn now(&self) -> f64 {
        self.clock.now()
    }

    pub fn snapshot(&self) -> TransportState {
        self.state
    }

    /// Seed base and current tempo from the first loaded track. Only the
    /// first call has any effect; returns whether a tempo was taken.
    pub fn seed_base_tempo(&mut self, declared: Option<f64>) -> bool {
        if self.base_seeded {
            return false;
        }
        self.base_seeded = true;
        match declared {
            Some(bpm) if bpm.is_finite() && bpm > 0.0 => {
                self.set_base_tempo(bpm);
                true
            }
            _ => false,
        }
    }

    /// Force the base tempo, resetting the current tempo to match.
    pub fn set_base_tempo(&mut self, bpm: f64) {
        if !bpm.is_finite() || bpm <= 0.0 {
            debug!(bpm, "ignoring unusable base tempo");
            return;
        }
        let bpm = clamp_tempo(bpm);
        self.state.base_tempo = bpm;
        self.state.current_tempo = bpm;
        self.base_seeded = true;
    }

    pub fn set_tempo(&mut self, bpm: f64) -> f64 {
        if !bpm.is_finite() {
            debug!(bpm, "ignoring non-finite tempo");
            return self.state.current_tempo;
        }
        self.state.current_tempo = clamp_tempo(bpm);
        self.state.current_tempo
    }

    /// Set the tempo through its ratio to the base tempo (`base / current`):
    /// 0.5 plays twice as fast, 2.0 half as fast.
    pub fn set_tempo_ratio(&mut self, ratio: f64) -> f64 {
        if !ratio.is_finite() || ratio <= 0.0 {
            debug!(ratio, "ignoring unusable tempo ratio");
            return self.state.current_tempo;
        }
        self.set_tempo(self.state.base_tempo / ratio)
    }

    pub fn set_key_shift(&mut self, semitones: i32) -> i32 {
        let clamped = semitones.clamp(-MAX_KEY_SHIFT, MAX_KEY_SHIFT);
        if clamped != semitones {
            debug!(requested = semitones, applied = clamped, "key shift clamped");
        }
        self.state.key_shift = clamped;
        clamped
    }

    pub fn set_gain(&mut self, gain: f32) -> f32 {
        if !gain.is_finite() {
            debug!(gain, "ignoring non-finite gain");
            return self.state.gain;
        }
        if gain < 0.0 {
            debug!(requested = gain, "gain clamped to silence");
        }
        self.state.gain = gain.max(0.0);
        self.state.gain
    }
}

fn clamp_tempo(bpm: f64) -> f64 {
    let clamped = bpm.clamp(MIN_TEMPO, MAX_TEMPO);
    if clamped != bpm {
        debug!(requested = bpm, applied = clamped, "tempo clamped");
    }
    clamped
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transport() -> (ManualClock, TransportClock) {
        let clock = ManualClock::new();
        let transport = TransportClock::new(Arc::new(clock.clone()));
        (clock, transport)
    }

    #[test]
    fn manual_clock_is_shared_between_clones() {
        let (clock, transport) = transport();
        clock.set(1.5);
        clock.advance(0.25);
        assert_eq!(transport.now(), 1.75);
    }

    #[test]
    fn defaults_to_111_bpm_at_unity() {
        let (_, transport) = transport();
        let state = transport.snapshot();
        assert_eq!(state.base_tempo, DEFAULT_TEMPO);
        assert_eq!(state.tempo_ratio(), 1.0);
        assert_eq!(state.gain, 1.0);
    }

    #[test]
    fn only_first_declared_tempo_seeds_base() {
        let (_, mut transport) = transport();
        assert!(transport.seed_base_tempo(Some(120.0)));
        assert!(!transport.seed_base_tempo(Some(90.0)));
        assert_eq!(transport.snapshot().base_tempo, 120.0);
        assert_eq!(transport.snapshot().current_tempo, 120.0);
    }

    #[test]
    fn first_track_without_tempo_keeps_default() {
        let (_, mut transport) = transport();
        assert!(!transport.seed_base_tempo(None));
        assert!(!transport.seed_base_tempo(Some(90.0)));
        assert_eq!(transport.snapshot().base_tempo, DEFAULT_TEMPO);
    }

    #[test]
    fn tempo_ratio_round_trips() {
        let (_, mut transport) = transport();
        transport.set_base_tempo(100.0);
        transport.set_tempo_ratio(0.5);
        assert_eq!(transport.snapshot().current_tempo, 200.0);
        assert!((transport.snapshot().tempo_ratio() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn out_of_range_values_are_clamped_or_ignored() {
        let (_, mut transport) = transport();
        assert_eq!(transport.set_tempo(1_000.0), MAX_TEMPO);
        assert_eq!(transport.set_tempo(f64::NAN), MAX_TEMPO);
        assert_eq!(transport.set_tempo(1.0), MIN_TEMPO);
        assert_eq!(transport.set_tempo_ratio(-1.0), MIN_TEMPO);
        assert_eq!(transport.set_key_shift(500), MAX_KEY_SHIFT);
        assert_eq!(transport.set_gain(-2.0), 0.0);
        assert_eq!(transport.set_gain(f32::INFINITY), 0.0);
        assert_eq!(transport.set_gain(0.7), 0.7);
    }
}
