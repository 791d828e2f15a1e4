#[cfg(feature = "cpal")]
mod device;
mod output;
mod voice;

#[cfg(feature = "cpal")]
pub use device::{default_output_config, start_stream};
pub use output::{RingSynth, SampleClock, SynthEvent, VoiceBank, VoiceBankConfig, ring_synth};
pub use voice::{AdsrConfig, EnvelopeState, Voice, Wave};

use tracing::info;

use crate::error::SynthError;
use crate::timing::note_name;

/// Output boundary of the engine. Implementations produce (or record) sound;
/// the scheduler only ever talks to this trait.
pub trait Synth {
    /// Start a note. `at` is the absolute clock time the note was scheduled
    /// for and `duration` the length the scheduler will release it after.
    fn note_on(&mut self, pitch: u8, velocity: f32, duration: f64, at: f64)
    -> Result<(), SynthError>;

    fn note_off(&mut self, pitch: u8) -> Result<(), SynthError>;

    fn set_master_gain(&mut self, gain: f32) -> Result<(), SynthError>;
}

impl<S: Synth + ?Sized> Synth for Box<S> {
    fn note_on(
        &mut self,
        pitch: u8,
        velocity: f32,
        duration: f64,
        at: f64,
    ) -> Result<(), SynthError> {
        (**self).note_on(pitch, velocity, duration, at)
    }

    fn note_off(&mut self, pitch: u8) -> Result<(), SynthError> {
        (**self).note_off(pitch)
    }

    fn set_master_gain(&mut self, gain: f32) -> Result<(), SynthError> {
        (**self).set_master_gain(gain)
    }
}

/// Writes every command to the log instead of making sound.
#[derive(Debug, Default)]
pub struct LogSynth;

impl Synth for LogSynth {
    fn note_on(
        &mut self,
        pitch: u8,
        velocity: f32,
        duration: f64,
        at: f64,
    ) -> Result<(), SynthError> {
        info!(note = %note_name(pitch), velocity, duration, at, "note on");
        Ok(())
    }

    fn note_off(&mut self, pitch: u8) -> Result<(), SynthError> {
        info!(note = %note_name(pitch), "note off");
        Ok(())
    }

    fn set_master_gain(&mut self, gain: f32) -> Result<(), SynthError> {
        info!(gain, db = linear_to_db(gain), "master gain");
        Ok(())
    }
}

pub fn midi_to_freq(note: u8) -> f32 {
    440.0 * 2.0_f32.powf((note as f32 - 69.0) / 12.0)
}

pub fn linear_to_db(gain: f32) -> f32 {
    if gain <= 0.0 {
        f32::NEG_INFINITY
    } else {
        20.0 * gain.log10()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a4_is_440() {
        assert_eq!(midi_to_freq(69), 440.0);
        assert!((midi_to_freq(81) - 880.0).abs() < 1e-3);
    }

    #[test]
    fn gain_to_decibels() {
        assert_eq!(linear_to_db(1.0), 0.0);
        assert!((linear_to_db(0.5) + 6.0206).abs() < 1e-3);
        assert_eq!(linear_to_db(0.0), f32::NEG_INFINITY);
    }
}
