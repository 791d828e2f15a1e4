pub const MIN_PITCH: u8 = 0;
pub const MAX_PITCH: u8 = 127;

const NOTE_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// Transpose `pitch` by `semitones`, collapsing out-of-range results onto the
/// nearest valid MIDI pitch instead of wrapping.
pub fn shift(pitch: u8, semitones: i32) -> u8 {
    i32::from(pitch)
        .saturating_add(semitones)
        .clamp(i32::from(MIN_PITCH), i32::from(MAX_PITCH)) as u8
}

/// Whether `shift(pitch, semitones)` had to clamp.
pub fn is_clamped(pitch: u8, semitones: i32) -> bool {
    let raw = i32::from(pitch).saturating_add(semitones);
    !(i32::from(MIN_PITCH)..=i32::from(MAX_PITCH)).contains(&raw)
}

/// Scientific pitch name, with middle C (60) as `C4`.
pub fn note_name(pitch: u8) -> String {
    let octave = i32::from(pitch / 12) - 1;
    format!("{}{}", NOTE_NAMES[usize::from(pitch % 12)], octave)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shifts_within_range() {
        assert_eq!(shift(50, 5), 55);
        assert_eq!(shift(50, -12), 38);
        assert_eq!(shift(60, 0), 60);
    }

    #[test]
    fn clamps_at_boundaries() {
        assert_eq!(shift(120, 12), 127);
        assert_eq!(shift(3, -12), 0);
        assert_eq!(shift(0, i32::MIN), 0);
        assert_eq!(shift(127, i32::MAX), 127);
        assert!(is_clamped(120, 12));
        assert!(!is_clamped(115, 12));
    }

    #[test]
    fn always_in_range_and_exact_when_representable() {
        for pitch in MIN_PITCH..=MAX_PITCH {
            for semitones in -200..=200 {
                let shifted = shift(pitch, semitones);
                assert!(shifted <= MAX_PITCH);
                let raw = i32::from(pitch) + semitones;
                if (0..=127).contains(&raw) {
                    assert_eq!(i32::from(shifted), raw);
                    assert_eq!(shift(shifted, 0), shifted);
                }
            }
        }
    }

    #[test]
    fn names_notes() {
        assert_eq!(note_name(60), "C4");
        assert_eq!(note_name(61), "C#4");
        assert_eq!(note_name(69), "A4");
        assert_eq!(note_name(0), "C-1");
        assert_eq!(note_name(127), "G9");
    }
}
