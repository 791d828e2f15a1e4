//! Standard MIDI File loading.
//!
//! Every track of the file is merged into one [`ParsedTrack`]. Tick positions
//! are converted to seconds through the file's tempo map, so offsets are
//! already expressed at the declared tempo.

use std::collections::{BTreeMap, VecDeque};
use std::fs;
use std::path::Path;

use midly::{MetaMessage, MidiMessage, Smf, Timing, TrackEvent, TrackEventKind};
use tracing::debug;

use crate::error::LoadError;
use crate::timing::{NoteEvent, ParsedTrack};

/// 120 BPM, the SMF default until the first tempo event.
pub const DEFAULT_MICROS_PER_QUARTER: u32 = 500_000;

pub fn load_file(path: &Path) -> Result<ParsedTrack, LoadError> {
    let bytes = fs::read(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_smf(&bytes)
}

pub fn parse_smf(bytes: &[u8]) -> Result<ParsedTrack, LoadError> {
    let smf = Smf::parse(bytes)?;
    let tempo_map = TempoMap::new(&smf)?;

    let mut events = Vec::new();
    for track in &smf.tracks {
        collect_notes(track, &tempo_map, &mut events);
    }
    events.sort_by(|a, b| a.start_offset.total_cmp(&b.start_offset));

    debug!(
        tracks = smf.tracks.len(),
        notes = events.len(),
        declared_tempo = ?tempo_map.declared_tempo,
        "parsed MIDI file"
    );

    Ok(ParsedTrack {
        events,
        declared_tempo: tempo_map.declared_tempo,
    })
}

#[derive(Debug, Clone, Copy)]
struct TempoChange {
    tick: u64,
    micros_per_quarter: u32,
    seconds: f64,
}

#[derive(Debug)]
enum TickScale {
    Metrical {
        ticks_per_quarter: f64,
        changes: Vec<TempoChange>,
    },
    Timecode {
        seconds_per_tick: f64,
    },
}

#[derive(Debug)]
struct TempoMap {
    scale: TickScale,
    declared_tempo: Option<f64>,
}

impl TempoMap {
    fn new(smf: &Smf<'_>) -> Result<Self, LoadError> {
        let mut tempos: Vec<(u64, u32)> = Vec::new();
        for track in &smf.tracks {
            let mut tick = 0u64;
            for event in track {
                tick += u64::from(event.delta.as_int());
                if let TrackEventKind::Meta(MetaMessage::Tempo(micros)) = event.kind {
                    let micros = micros.as_int();
                    if micros > 0 {
                        tempos.push((tick, micros));
                    }
                }
            }
        }
        tempos.sort_by_key(|(tick, _)| *tick);

        let declared_tempo = tempos
            .first()
            .map(|(_, micros)| 60_000_000.0 / f64::from(*micros));

        let scale = match smf.header.timing {
            Timing::Metrical(ticks) => {
                let ticks_per_quarter = f64::from(ticks.as_int());
                if ticks_per_quarter == 0.0 {
                    return Err(LoadError::UnsupportedTiming("zero ticks per quarter note"));
                }
                TickScale::Metrical {
                    ticks_per_quarter,
                    changes: tempo_changes(&tempos, ticks_per_quarter),
                }
            }
            Timing::Timecode(fps, ticks_per_frame) => {
                if ticks_per_frame == 0 {
                    return Err(LoadError::UnsupportedTiming("zero ticks per frame"));
                }
                TickScale::Timecode {
                    seconds_per_tick: 1.0 / (f64::from(fps.as_f32()) * f64::from(ticks_per_frame)),
                }
            }
        };

        Ok(Self {
            scale,
            declared_tempo,
        })
    }

    fn seconds_at(&self, tick: u64) -> f64 {
        match &self.scale {
            TickScale::Metrical {
                ticks_per_quarter,
                changes,
            } => {
                // changes[0] is always at tick 0
                let index = changes.partition_point(|c| c.tick <= tick).saturating_sub(1);
                let change = changes[index];
                change.seconds
                    + seconds_for_ticks(
                        tick - change.tick,
                        change.micros_per_quarter,
                        *ticks_per_quarter,
                    )
            }
            TickScale::Timecode { seconds_per_tick } => tick as f64 * seconds_per_tick,
        }
    }
}

fn tempo_changes(tempos: &[(u64, u32)], ticks_per_quarter: f64) -> Vec<TempoChange> {
    let mut changes = vec![TempoChange {
        tick: 0,
        micros_per_quarter: DEFAULT_MICROS_PER_QUARTER,
        seconds: 0.0,
    }];

    for &(tick, micros_per_quarter) in tempos {
        let Some(last) = changes.last_mut() else {
            continue;
        };
        if tick == last.tick {
            last.micros_per_quarter = micros_per_quarter;
            continue;
        }
        let last = *last;
        changes.push(TempoChange {
            tick,
            micros_per_quarter,
            seconds: last.seconds
                + seconds_for_ticks(tick - last.tick, last.micros_per_quarter, ticks_per_quarter),
        });
    }
    changes
}

fn seconds_for_ticks(ticks: u64, micros_per_quarter: u32, ticks_per_quarter: f64) -> f64 {
    ticks as f64 * f64::from(micros_per_quarter) / 1_000_000.0 / ticks_per_quarter
}

fn collect_notes(track: &[TrackEvent<'_>], tempo_map: &TempoMap, out: &mut Vec<NoteEvent>) {
    // (channel, key) -> note-ons waiting for their note-off, oldest first
    let mut open: BTreeMap<(u8, u8), VecDeque<(u64, u8)>> = BTreeMap::new();
    let mut tick = 0u64;

    for event in track {
        tick += u64::from(event.delta.as_int());
        let TrackEventKind::Midi { channel, message } = event.kind else {
            continue;
        };
        let channel = channel.as_int();

        match message {
            MidiMessage::NoteOn { key, vel } if vel.as_int() > 0 => {
                open.entry((channel, key.as_int()))
                    .or_default()
                    .push_back((tick, vel.as_int()));
            }
            MidiMessage::NoteOn { key, .. } | MidiMessage::NoteOff { key, .. } => {
                let started = open
                    .get_mut(&(channel, key.as_int()))
                    .and_then(VecDeque::pop_front);
                if let Some((start, vel)) = started {
                    out.push(note(tempo_map, key.as_int(), start, tick, vel));
                }
            }
            _ => {}
        }
    }

    // notes still held at the end of the track stop there
    for ((_, key), starts) in open {
        for (start, vel) in starts {
            out.push(note(tempo_map, key, start, tick, vel));
        }
    }
}

fn note(tempo_map: &TempoMap, key: u8, start: u64, end: u64, vel: u8) -> NoteEvent {
    let start_offset = tempo_map.seconds_at(start);
    let end_offset = tempo_map.seconds_at(end);
    NoteEvent {
        pitch: key,
        start_offset,
        duration: (end_offset - start_offset).max(0.0),
        velocity: f32::from(vel) / 127.0,
    }
}
