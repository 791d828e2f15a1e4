use serde::{Deserialize, Serialize};

use super::midi_to_freq;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Wave {
    Sine,
    Square,
    Saw,
    Triangle,
}

impl Wave {
    /// `phase` in 0.0..1.0
    fn sample(self, phase: f32) -> f32 {
        match self {
            Wave::Sine => (phase * 2.0 * std::f32::consts::PI).sin(),
            Wave::Square => {
                if phase < 0.5 {
                    -1.0
                } else {
                    1.0
                }
            }
            Wave::Saw => phase * 2.0 - 1.0,
            Wave::Triangle => 1.0 - 4.0 * (phase - 0.5).abs(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AdsrConfig {
    /// Seconds
    pub attack: f32,
    /// Seconds
    pub decay: f32,
    /// 0.0 -> 1.0
    pub sustain: f32,
    /// Seconds
    pub release: f32,
}

impl Default for AdsrConfig {
    fn default() -> Self {
        Self {
            attack: 0.005,
            decay: 0.1,
            sustain: 0.3,
            release: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EnvelopeState {
    Attack { time: f32 },
    Decay { time: f32 },
    Sustain,
    Release { time: f32, from: f32 },
    Done,
}

/// One sounding note in the voice bank.
#[derive(Debug, Clone)]
pub struct Voice {
    pub pitch: u8,
    velocity: f32,
    freq: f32,
    phase: f32,
    envelope_state: EnvelopeState,
    envelope_level: f32,
}

impl Voice {
    pub fn new(pitch: u8, velocity: f32) -> Self {
        Self {
            pitch,
            velocity,
            freq: midi_to_freq(pitch),
            phase: 0.0,
            envelope_state: EnvelopeState::Attack { time: 0.0 },
            envelope_level: 0.0,
        }
    }

    pub fn envelope_state(&self) -> EnvelopeState {
        self.envelope_state
    }

    pub fn is_releasing(&self) -> bool {
        matches!(
            self.envelope_state,
            EnvelopeState::Release { .. } | EnvelopeState::Done
        )
    }

    pub fn is_done(&self) -> bool {
        self.envelope_state == EnvelopeState::Done
    }

    pub fn release(&mut self) {
        if !self.is_releasing() {
            self.envelope_state = EnvelopeState::Release {
                time: 0.0,
                from: self.envelope_level,
            };
        }
    }

    pub fn next_sample(&mut self, wave: Wave, adsr: &AdsrConfig, sample_rate: f32) -> f32 {
        let envelope = self.advance_envelope(adsr, 1.0 / sample_rate);
        let sample = wave.sample(self.phase);

        self.phase += self.freq / sample_rate;
        if self.phase >= 1.0 {
            self.phase -= 1.0;
        }

        sample * envelope * self.velocity
    }

    fn advance_envelope(&mut self, adsr: &AdsrConfig, dt: f32) -> f32 {
        self.envelope_level = match self.envelope_state {
            EnvelopeState::Attack { time } => {
                let time = time + dt;
                if time >= adsr.attack {
                    self.envelope_state = EnvelopeState::Decay { time: 0.0 };
                    1.0
                } else {
                    self.envelope_state = EnvelopeState::Attack { time };
                    time / adsr.attack
                }
            }
            EnvelopeState::Decay { time } => {
                let time = time + dt;
                if time >= adsr.decay {
                    self.envelope_state = EnvelopeState::Sustain;
                    adsr.sustain
                } else {
                    self.envelope_state = EnvelopeState::Decay { time };
                    1.0 - (1.0 - adsr.sustain) * (time / adsr.decay)
                }
            }
            EnvelopeState::Sustain => adsr.sustain,
            EnvelopeState::Release { time, from } => {
                let time = time + dt;
                if time >= adsr.release {
                    self.envelope_state = EnvelopeState::Done;
                    0.0
                } else {
                    self.envelope_state = EnvelopeState::Release { time, from };
                    from * (1.0 - time / adsr.release)
                }
            }
            EnvelopeState::Done => 0.0,
        };
        self.envelope_level
    }
}
