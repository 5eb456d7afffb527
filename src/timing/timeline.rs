use std::collections::BTreeMap;

use super::TypeRank;
use crate::error::{PlayerError, Result};
use crate::song::RawEvent;

#[derive(Debug, Clone, PartialEq)]
pub struct TimedEvent {
    pub raw: RawEvent,
    pub ticks: u64,
    /// Microseconds from song start at the file's own tempo map.
    pub timestamp_us: f64,
    /// Fractional bar position, starting at 0.
    pub bar: f64,
}

/// Immutable, globally ordered event sequence of one loaded song.
#[derive(Debug, Clone)]
pub struct Timeline {
    events: Vec<TimedEvent>,
    ticks_per_beat: u16,
    track_count: usize,
    track_channels: BTreeMap<usize, u8>,
    note_tracks: Vec<usize>,
}

impl Timeline {
    pub fn new(events: Vec<TimedEvent>, ticks_per_beat: u16, track_count: usize) -> Result<Self> {
        for (i, pair) in events.windows(2).enumerate() {
            let (a, b) = (&pair[0], &pair[1]);
            let ordered = a.ticks <= b.ticks
                && a.timestamp_us <= b.timestamp_us
                && a.bar <= b.bar
                && (a.ticks < b.ticks || TypeRank::of(&a.raw) <= TypeRank::of(&b.raw));
            if !ordered {
                return Err(PlayerError::InternalConsistency(format!(
                    "events {} and {} are out of order (ticks {} -> {})",
                    i,
                    i + 1,
                    a.ticks,
                    b.ticks
                )));
            }
        }

        let mut track_channels = BTreeMap::new();
        let mut note_tracks = Vec::new();
        for event in &events {
            if let Some(channel) = event.raw.channel_nibble() {
                track_channels.entry(event.raw.track).or_insert(channel);
            }
            if event.raw.is_note_on_class() && !note_tracks.contains(&event.raw.track) {
                note_tracks.push(event.raw.track);
            }
        }
        note_tracks.sort_unstable();

        Ok(Self {
            events,
            ticks_per_beat,
            track_count,
            track_channels,
            note_tracks,
        })
    }

    pub fn events(&self) -> &[TimedEvent] {
        &self.events
    }

    pub fn get(&self, index: usize) -> Option<&TimedEvent> {
        self.events.get(index)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn ticks_per_beat(&self) -> u16 {
        self.ticks_per_beat
    }

    pub fn track_count(&self) -> usize {
        self.track_count
    }

    pub fn duration_us(&self) -> f64 {
        self.events.last().map_or(0.0, |e| e.timestamp_us)
    }

    pub fn bars(&self) -> f64 {
        self.events.last().map_or(0.0, |e| e.bar)
    }

    /// Tracks that contain at least one sounding note-on.
    pub fn note_tracks(&self) -> &[usize] {
        &self.note_tracks
    }

    /// Channel used for direct controls aimed at `track`: the first channel
    /// the track plays on, else the low nibble of the track id.
    pub fn channel_for_track(&self, track: usize) -> u8 {
        self.track_channels
            .get(&track)
            .copied()
            .unwrap_or((track & 0x0F) as u8)
    }

    /// Lowest index whose timestamp is at or after `time_us`, clamped to
    /// the last event.
    pub fn index_at_or_after_time(&self, time_us: f64) -> usize {
        self.clamp_index(self.events.partition_point(|e| e.timestamp_us < time_us))
    }

    /// Lowest index whose bar is at or after `bar`, clamped to the last event.
    pub fn index_at_or_after_bar(&self, bar: f64) -> usize {
        self.clamp_index(self.events.partition_point(|e| e.bar < bar))
    }

    fn clamp_index(&self, index: usize) -> usize {
        index.min(self.events.len().saturating_sub(1))
    }

    /// Song time at a fractional bar. Tempo and meter only change on
    /// events, so both positions are linear between neighbours.
    pub fn time_at_bar(&self, bar: f64) -> f64 {
        if bar <= 0.0 {
            return 0.0;
        }
        let next = self.events.partition_point(|e| e.bar < bar);
        let Some(after) = self.events.get(next) else {
            return self.duration_us();
        };
        let (bar0, time0) = match next.checked_sub(1) {
            Some(prev) => (self.events[prev].bar, self.events[prev].timestamp_us),
            None => (0.0, 0.0),
        };
        if after.bar <= bar0 {
            return after.timestamp_us;
        }
        time0 + (bar - bar0) / (after.bar - bar0) * (after.timestamp_us - time0)
    }

    /// Bar position at a song time, the inverse of [`Timeline::time_at_bar`].
    pub fn bar_at_time(&self, time_us: f64) -> f64 {
        if time_us <= 0.0 {
            return 0.0;
        }
        let next = self.events.partition_point(|e| e.timestamp_us < time_us);
        let Some(after) = self.events.get(next) else {
            return self.bars();
        };
        let (time0, bar0) = match next.checked_sub(1) {
            Some(prev) => (self.events[prev].timestamp_us, self.events[prev].bar),
            None => (0.0, 0.0),
        };
        if after.timestamp_us <= time0 {
            return after.bar;
        }
        bar0 + (time_us - time0) / (after.timestamp_us - time0) * (after.bar - bar0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::song::{RawEvent, Song};
    use crate::timing::build_timeline;

    /// One quarter note per beat on track 0, `beats` beats long, at 120 BPM.
    fn steady(beats: usize) -> Timeline {
        let mut track = Vec::new();
        for i in 0..beats {
            track.push(RawEvent::channel(0, if i == 0 { 0 } else { 240 }, vec![0x90, 60, 90]));
            track.push(RawEvent::channel(0, 240, vec![0x80, 60, 0]));
        }
        build_timeline(&Song {
            format_type: 0,
            time_division: 480,
            tracks: vec![track],
        })
        .unwrap()
    }

    #[test]
    fn test_time_lookup_is_tight_lower_bound() {
        let timeline = steady(8);
        for query in [0.0, 1.0, 249_999.0, 250_000.0, 250_001.0, 1_234_567.0] {
            let index = timeline.index_at_or_after_time(query);
            let events = timeline.events();
            assert!(events[index].timestamp_us >= query);
            assert!(events[..index].iter().all(|e| e.timestamp_us < query));
        }
    }

    #[test]
    fn test_bar_lookup_is_tight_lower_bound() {
        let timeline = steady(16);
        for query in [0.0, 0.25, 0.5, 1.0, 1.1, 3.0] {
            let index = timeline.index_at_or_after_bar(query);
            let events = timeline.events();
            assert!(events[index].bar >= query);
            assert!(events[..index].iter().all(|e| e.bar < query));
        }
    }

    #[test]
    fn test_lookup_edges() {
        let timeline = steady(4);
        assert_eq!(timeline.index_at_or_after_time(-10.0), 0);
        assert_eq!(timeline.index_at_or_after_time(1e12), timeline.len() - 1);
        assert_eq!(timeline.index_at_or_after_bar(100.0), timeline.len() - 1);

        let empty = Timeline::new(Vec::new(), 480, 0).unwrap();
        assert_eq!(empty.index_at_or_after_time(5.0), 0);
        assert_eq!(empty.duration_us(), 0.0);
    }

    #[test]
    fn test_time_and_bar_interpolate() {
        let timeline = steady(8);
        // One 4/4 bar at 120 BPM lasts two seconds.
        assert_eq!(timeline.time_at_bar(1.0), 2_000_000.0);
        assert_eq!(timeline.time_at_bar(0.5), 1_000_000.0);
        assert_eq!(timeline.bar_at_time(3_000_000.0), 1.5);
        assert_eq!(timeline.time_at_bar(50.0), timeline.duration_us());
    }

    #[test]
    fn test_out_of_order_events_are_rejected() {
        let event = |ticks: u64, timestamp_us: f64| TimedEvent {
            raw: RawEvent::channel(0, 0, vec![0x90, 60, 90]),
            ticks,
            timestamp_us,
            bar: 0.0,
        };
        let result = Timeline::new(vec![event(10, 10.0), event(5, 5.0)], 480, 1);
        assert!(matches!(result, Err(PlayerError::InternalConsistency(_))));
    }

    #[test]
    fn test_track_channels_and_note_tracks() {
        let song = Song {
            format_type: 1,
            time_division: 96,
            tracks: vec![
                vec![RawEvent::meta(0, 0, crate::song::META_TEMPO, vec![0x07, 0xA1, 0x20])],
                vec![RawEvent::channel(1, 0, vec![0x93, 40, 70])],
                vec![RawEvent::channel(2, 0, vec![0xB5, 7, 100])],
            ],
        };
        let timeline = build_timeline(&song).unwrap();
        assert_eq!(timeline.note_tracks(), &[1]);
        assert_eq!(timeline.channel_for_track(1), 3);
        assert_eq!(timeline.channel_for_track(2), 5);
        assert_eq!(timeline.channel_for_track(0), 0);
        assert_eq!(timeline.track_count(), 3);
    }
}
