use super::{TickEvent, TimedEvent, Timeline, stamp_ticks};
use crate::error::Result;
use crate::song::{EventKind, RawEvent, Song};

/// 120 BPM.
pub const DEFAULT_TEMPO_US_PER_BEAT: u32 = 500_000;
pub const DEFAULT_BEATS_PER_BAR: f64 = 4.0;

/// Ordering of events that share a tick. Note-offs go first so a voice is
/// released before a note-on at the same tick can retrigger it; meta events
/// go last since they never reach the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TypeRank {
    NoteOff,
    NoteOn,
    ControlChange,
    Other,
    Meta,
}

impl TypeRank {
    pub fn of(event: &RawEvent) -> Self {
        if event.is_note_off_class() {
            return TypeRank::NoteOff;
        }
        match event.kind {
            EventKind::NoteOn => TypeRank::NoteOn,
            EventKind::ControlChange => TypeRank::ControlChange,
            EventKind::Meta => TypeRank::Meta,
            EventKind::NoteOff | EventKind::Other => TypeRank::Other,
        }
    }
}

/// Merges every track of `song` into one time-ordered timeline, resolving
/// tempo and time signature changes into microsecond and bar positions.
pub fn build_timeline(song: &Song) -> Result<Timeline> {
    let ticks_per_beat = song.validate()? as f64;

    let mut merged: Vec<TickEvent> = Vec::new();
    for track in &song.tracks {
        merged.extend(stamp_ticks(track)?);
    }
    // Stable sort keeps track order, then in-track order, for exact ties.
    merged.sort_by_key(|e| (e.ticks, TypeRank::of(&e.raw)));

    // Positions are measured from the start of the current tempo (or meter)
    // segment so rounding never accumulates across events.
    let mut tempo_us_per_beat = DEFAULT_TEMPO_US_PER_BEAT as f64;
    let mut tempo_segment_tick = 0u64;
    let mut tempo_segment_us = 0.0f64;

    let mut beats_per_bar = DEFAULT_BEATS_PER_BAR;
    let mut meter_segment_tick = 0u64;
    let mut meter_segment_bar = 0.0f64;

    let mut events = Vec::with_capacity(merged.len());
    for TickEvent { raw, ticks } in merged {
        let timestamp_us = tempo_segment_us
            + (ticks - tempo_segment_tick) as f64 * tempo_us_per_beat / ticks_per_beat;
        let bar = meter_segment_bar
            + (ticks - meter_segment_tick) as f64 / (ticks_per_beat * beats_per_bar);

        if let Some(us) = raw.tempo_us_per_beat() {
            tempo_us_per_beat = us as f64;
            tempo_segment_tick = ticks;
            tempo_segment_us = timestamp_us;
        }
        if let Some(beats) = raw.beats_per_bar() {
            beats_per_bar = beats;
            meter_segment_tick = ticks;
            meter_segment_bar = bar;
        }

        events.push(TimedEvent {
            raw,
            ticks,
            timestamp_us,
            bar,
        });
    }

    tracing::debug!(
        events = events.len(),
        tracks = song.tracks.len(),
        "Timeline merged"
    );

    Timeline::new(events, ticks_per_beat as u16, song.tracks.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PlayerError;
    use crate::song::{META_TEMPO, META_TIME_SIGNATURE};

    fn note_on(track: usize, delta: i64, key: u8) -> RawEvent {
        RawEvent::channel(track, delta, vec![0x90, key, 100])
    }

    fn note_off(track: usize, delta: i64, key: u8) -> RawEvent {
        RawEvent::channel(track, delta, vec![0x80, key, 0])
    }

    fn song(tracks: Vec<Vec<RawEvent>>) -> Song {
        Song {
            format_type: 1,
            time_division: 480,
            tracks,
        }
    }

    #[test]
    fn test_two_track_half_way_timestamp() {
        let track_a = vec![note_on(0, 0, 60), note_off(0, 480, 60)];
        let track_b = vec![note_on(1, 240, 64)];
        let timeline = build_timeline(&song(vec![track_a, track_b])).unwrap();

        let a_off = timeline
            .events()
            .iter()
            .find(|e| e.raw.track == 0 && e.raw.is_note_off_class())
            .unwrap();
        let b_on = timeline.events().iter().find(|e| e.raw.track == 1).unwrap();

        assert_eq!(a_off.timestamp_us, 500_000.0);
        assert_eq!(b_on.timestamp_us, a_off.timestamp_us / 2.0);
    }

    #[test]
    fn test_note_off_sorts_before_note_on_at_same_tick() {
        // Track 0 retriggers the same key that track 1 releases at tick 480.
        let track_a = vec![note_on(0, 480, 60)];
        let track_b = vec![note_on(1, 0, 60), note_off(1, 480, 60)];
        let timeline = build_timeline(&song(vec![track_a, track_b])).unwrap();

        let at_480: Vec<_> = timeline.events().iter().filter(|e| e.ticks == 480).collect();
        assert_eq!(at_480.len(), 2);
        assert!(at_480[0].raw.is_note_off_class());
        assert!(at_480[1].raw.is_note_on_class());
    }

    #[test]
    fn test_type_rank_total_order() {
        let cc = RawEvent::channel(0, 0, vec![0xB0, 64, 0]);
        let program = RawEvent::channel(0, 0, vec![0xC0, 5]);
        let tempo = RawEvent::meta(0, 0, META_TEMPO, vec![0x07, 0xA1, 0x20]);
        let silent_on = RawEvent::channel(0, 0, vec![0x90, 60, 0]);

        assert!(TypeRank::of(&silent_on) < TypeRank::of(&note_on(0, 0, 60)));
        assert!(TypeRank::of(&note_on(0, 0, 60)) < TypeRank::of(&cc));
        assert!(TypeRank::of(&cc) < TypeRank::of(&program));
        assert!(TypeRank::of(&program) < TypeRank::of(&tempo));
    }

    #[test]
    fn test_tempo_change_applies_from_its_tick() {
        // 60 BPM from beat 1 onwards.
        let conductor = vec![RawEvent::meta(0, 480, META_TEMPO, vec![0x0F, 0x42, 0x40])];
        let notes = vec![note_on(1, 480, 60), note_on(1, 480, 62)];
        let timeline = build_timeline(&song(vec![conductor, notes])).unwrap();

        let stamps: Vec<(u64, f64)> = timeline
            .events()
            .iter()
            .filter(|e| e.raw.is_note_on_class())
            .map(|e| (e.ticks, e.timestamp_us))
            .collect();
        assert_eq!(stamps, vec![(480, 500_000.0), (960, 1_500_000.0)]);
        assert!(
            timeline
                .events()
                .windows(2)
                .all(|w| w[0].timestamp_us <= w[1].timestamp_us)
        );
    }

    #[test]
    fn test_bars_follow_time_signature() {
        // Two bars of 4/4, then 3/4.
        let conductor = vec![RawEvent::meta(0, 3840, META_TIME_SIGNATURE, vec![3, 2, 24, 8])];
        let notes = vec![note_on(1, 1920, 60), note_on(1, 1920, 62), note_on(1, 1440, 64)];
        let timeline = build_timeline(&song(vec![conductor, notes])).unwrap();

        let bars: Vec<f64> = timeline
            .events()
            .iter()
            .filter(|e| e.raw.is_note_on_class())
            .map(|e| e.bar)
            .collect();
        assert_eq!(bars, vec![1.0, 2.0, 3.0]);
        assert_eq!(timeline.bars(), 3.0);
    }

    #[test]
    fn test_smpte_division_fails_before_timeline() {
        let mut smpte = song(vec![vec![note_on(0, 0, 60)]]);
        smpte.time_division = 0xE250;
        let err = build_timeline(&smpte).unwrap_err();
        assert!(err.is_format_error());
        assert!(matches!(err, PlayerError::SmpteTimeDivision(_)));
    }
}
