use crate::error::{PlayerError, Result};
use crate::song::RawEvent;

#[derive(Debug, Clone, PartialEq)]
pub struct TickEvent {
    pub raw: RawEvent,
    /// Absolute tick within the owning track.
    pub ticks: u64,
}

/// Turns a track's delta-timed events into absolute tick positions.
pub fn stamp_ticks(track: &[RawEvent]) -> Result<Vec<TickEvent>> {
    let mut ticks: u64 = 0;
    track
        .iter()
        .enumerate()
        .map(|(index, raw)| {
            if raw.tick_delta < 0 {
                return Err(PlayerError::NegativeTickDelta {
                    track: raw.track,
                    index,
                    delta: raw.tick_delta,
                });
            }
            ticks += raw.tick_delta as u64;
            Ok(TickEvent {
                raw: raw.clone(),
                ticks,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note(delta: i64) -> RawEvent {
        RawEvent::channel(3, delta, vec![0x90, 60, 100])
    }

    #[test]
    fn test_ticks_are_prefix_sums() {
        let deltas = [0, 120, 0, 360, 15];
        let track: Vec<RawEvent> = deltas.iter().map(|&d| note(d)).collect();
        let stamped = stamp_ticks(&track).unwrap();

        assert_eq!(stamped.len(), deltas.len());
        let mut sum = 0u64;
        for (event, delta) in stamped.iter().zip(deltas) {
            sum += delta as u64;
            assert_eq!(event.ticks, sum);
        }
        assert!(stamped.windows(2).all(|w| w[0].ticks <= w[1].ticks));
    }

    #[test]
    fn test_negative_delta_is_rejected() {
        let track = vec![note(10), note(-5)];
        match stamp_ticks(&track) {
            Err(PlayerError::NegativeTickDelta { track, index, delta }) => {
                assert_eq!((track, index, delta), (3, 1, -5));
            }
            other => panic!("expected negative delta error, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_track() {
        assert!(stamp_ticks(&[]).unwrap().is_empty());
    }
}
