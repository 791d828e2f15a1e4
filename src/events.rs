use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

/// One note of a session, resolved against the transport snapshot the session
/// was built with. Times are absolute clock seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScheduledTrigger {
    pub fire_time: f64,
    pub pitch: u8,
    pub duration: f64,
    pub velocity: f32,
    /// Index into the session's enabled-track list.
    pub track: usize,
}

impl ScheduledTrigger {
    pub fn release_time(&self) -> f64 {
        self.fire_time + self.duration
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoteMessage {
    NoteOn,
    NoteOff,
}

// Releases sort ahead of attacks at the same instant so back-to-back notes of
// one pitch retrigger. A zero-length note releases after its own attack.
const RANK_RELEASE: u8 = 0;
const RANK_ATTACK: u8 = 1;
const RANK_LATE_RELEASE: u8 = 2;

/// A pending edge (attack or release) of a trigger.
///
/// `Ord` is reversed so that `BinaryHeap<ScheduledEvent>` pops the earliest
/// event first; equal times fall back to rank, then trigger index.
#[derive(Debug, Clone, Copy)]
pub struct ScheduledEvent {
    pub time: f64,
    pub trigger: usize,
    pub message: NoteMessage,
    rank: u8,
}

impl ScheduledEvent {
    pub fn note_on(index: usize, trigger: &ScheduledTrigger) -> Self {
        Self {
            time: trigger.fire_time,
            trigger: index,
            message: NoteMessage::NoteOn,
            rank: RANK_ATTACK,
        }
    }

    pub fn note_off(index: usize, trigger: &ScheduledTrigger) -> Self {
        // a tiny duration can round away; compare the times actually queued
        let rank = if trigger.release_time() > trigger.fire_time {
            RANK_RELEASE
        } else {
            RANK_LATE_RELEASE
        };
        Self {
            time: trigger.release_time(),
            trigger: index,
            message: NoteMessage::NoteOff,
            rank,
        }
    }
}

impl Ord for ScheduledEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .time
            .total_cmp(&self.time)
            .then_with(|| other.rank.cmp(&self.rank))
            .then_with(|| other.trigger.cmp(&self.trigger))
    }
}

impl PartialOrd for ScheduledEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for ScheduledEvent {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ScheduledEvent {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BinaryHeap;

    fn trigger(fire_time: f64, duration: f64) -> ScheduledTrigger {
        ScheduledTrigger {
            fire_time,
            pitch: 60,
            duration,
            velocity: 1.0,
            track: 0,
        }
    }

    #[test]
    fn heap_pops_earliest_first() {
        let a = trigger(2.0, 1.0);
        let b = trigger(0.5, 1.0);
        let mut heap = BinaryHeap::new();
        heap.push(ScheduledEvent::note_on(0, &a));
        heap.push(ScheduledEvent::note_on(1, &b));
        heap.push(ScheduledEvent::note_off(1, &b));

        let order: Vec<(usize, NoteMessage)> = std::iter::from_fn(|| heap.pop())
            .map(|e| (e.trigger, e.message))
            .collect();
        assert_eq!(
            order,
            vec![
                (1, NoteMessage::NoteOn),
                (1, NoteMessage::NoteOff),
                (0, NoteMessage::NoteOn),
            ]
        );
    }

    #[test]
    fn release_precedes_attack_at_same_instant() {
        let first = trigger(0.0, 1.0);
        let second = trigger(1.0, 1.0);
        let mut heap = BinaryHeap::new();
        heap.push(ScheduledEvent::note_on(1, &second));
        heap.push(ScheduledEvent::note_off(0, &first));

        let popped = heap.pop().unwrap();
        assert_eq!(popped.trigger, 0);
        assert_eq!(popped.message, NoteMessage::NoteOff);
    }

    #[test]
    fn zero_length_note_releases_after_its_attack() {
        let blip = trigger(1.0, 0.0);
        let mut heap = BinaryHeap::new();
        heap.push(ScheduledEvent::note_off(0, &blip));
        heap.push(ScheduledEvent::note_on(0, &blip));

        assert_eq!(heap.pop().unwrap().message, NoteMessage::NoteOn);
        assert_eq!(heap.pop().unwrap().message, NoteMessage::NoteOff);
    }

    #[test]
    fn equal_attacks_follow_append_order() {
        let chord = trigger(0.0, 1.0);
        let mut heap = BinaryHeap::new();
        for index in [3, 0, 2, 1] {
            heap.push(ScheduledEvent::note_on(index, &chord));
        }
        let order: Vec<usize> = std::iter::from_fn(|| heap.pop()).map(|e| e.trigger).collect();
        assert_eq!(order, vec![0, 1, 2, 3]);
    }
}
