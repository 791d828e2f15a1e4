use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use ringbuf::{
    HeapCons, HeapProd, HeapRb,
    traits::{Consumer, Producer, Split},
};

use super::{AdsrConfig, Synth, Voice, Wave};
use crate::error::SynthError;
use crate::timing::Clock;

// Keeps a full chord of the four demo parts below clipping.
const VOICE_HEADROOM: f32 = 0.25;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SynthEvent {
    NoteOn { pitch: u8, velocity: f32 },
    NoteOff { pitch: u8 },
}

#[derive(Debug, Clone)]
pub struct VoiceBankConfig {
    pub sample_rate: f32,
    pub channels: usize,
    /// Ring buffer slots between the control and render side.
    pub capacity: usize,
    pub max_voices: usize,
    pub wave: Wave,
    pub adsr: AdsrConfig,
}

impl Default for VoiceBankConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44_100.0,
            channels: 2,
            capacity: 4096,
            max_voices: 32,
            wave: Wave::Triangle,
            adsr: AdsrConfig::default(),
        }
    }
}

/// Control side: pushes note commands into a lock-free queue.
pub struct RingSynth {
    producer: HeapProd<SynthEvent>,
    gain: Arc<AtomicU32>,
}

/// Render side: a small polyphonic synth fed by a [`RingSynth`]. Safe to
/// run inside an audio callback; `render` only allocates when voices are
/// added.
pub struct VoiceBank {
    consumer: HeapCons<SynthEvent>,
    gain: Arc<AtomicU32>,
    frames: Arc<AtomicU64>,
    // oldest first
    voices: VecDeque<Voice>,
    config: VoiceBankConfig,
}

/// Clock driven by the number of frames a [`VoiceBank`] has rendered.
#[derive(Debug, Clone)]
pub struct SampleClock {
    frames: Arc<AtomicU64>,
    sample_rate: f64,
}

pub fn ring_synth(config: VoiceBankConfig) -> (RingSynth, VoiceBank) {
    let (producer, consumer) = HeapRb::<SynthEvent>::new(config.capacity).split();
    let gain = Arc::new(AtomicU32::new(1.0_f32.to_bits()));

    let synth = RingSynth {
        producer,
        gain: gain.clone(),
    };
    let bank = VoiceBank {
        consumer,
        gain,
        frames: Arc::new(AtomicU64::new(0)),
        voices: VecDeque::with_capacity(config.max_voices),
        config,
    };
    (synth, bank)
}

impl Synth for RingSynth {
    fn note_on(
        &mut self,
        pitch: u8,
        velocity: f32,
        _duration: f64,
        _at: f64,
    ) -> Result<(), SynthError> {
        self.producer
            .try_push(SynthEvent::NoteOn { pitch, velocity })
            .map_err(|_| SynthError::QueueFull)
    }

    fn note_off(&mut self, pitch: u8) -> Result<(), SynthError> {
        self.producer
            .try_push(SynthEvent::NoteOff { pitch })
            .map_err(|_| SynthError::QueueFull)
    }

    fn set_master_gain(&mut self, gain: f32) -> Result<(), SynthError> {
        self.gain.store(gain.to_bits(), Ordering::Relaxed);
        Ok(())
    }
}

impl VoiceBank {
    pub fn clock(&self) -> SampleClock {
        SampleClock {
            frames: self.frames.clone(),
            sample_rate: f64::from(self.config.sample_rate),
        }
    }

    pub fn config(&self) -> &VoiceBankConfig {
        &self.config
    }

    pub fn active_voices(&self) -> usize {
        self.voices.len()
    }

    pub fn master_gain(&self) -> f32 {
        f32::from_bits(self.gain.load(Ordering::Relaxed))
    }

    /// Fill an interleaved buffer. Queued events apply at the start of the
    /// buffer.
    pub fn render(&mut self, output: &mut [f32]) {
        while let Some(event) = self.consumer.try_pop() {
            self.apply(event);
        }

        let gain = self.master_gain() * VOICE_HEADROOM;
        let channels = self.config.channels.max(1);
        let mut frames = 0;

        for frame in output.chunks_mut(channels) {
            let mut mix = 0.0;
            for voice in &mut self.voices {
                mix += voice.next_sample(self.config.wave, &self.config.adsr, self.config.sample_rate);
            }
            frame.fill(mix * gain);
            frames += 1;
        }

        self.voices.retain(|voice| !voice.is_done());
        self.frames.fetch_add(frames, Ordering::Relaxed);
    }

    fn apply(&mut self, event: SynthEvent) {
        match event {
            SynthEvent::NoteOn { pitch, velocity } => {
                if self.voices.len() >= self.config.max_voices {
                    self.voices.pop_front();
                }
                self.voices.push_back(Voice::new(pitch, velocity));
            }
            SynthEvent::NoteOff { pitch } => {
                if let Some(voice) = self
                    .voices
                    .iter_mut()
                    .find(|v| v.pitch == pitch && !v.is_releasing())
                {
                    voice.release();
                }
            }
        }
    }
}

impl Clock for SampleClock {
    fn now(&self) -> f64 {
        self.frames.load(Ordering::Relaxed) as f64 / self.sample_rate
    }
}
