//! Per-event dispatch decision for the real-time loop.

use std::collections::BTreeMap;

use crate::song::{EventKind, RawEvent};

/// Mute flags and solo selection, always read as one snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackMuteState {
    muted: BTreeMap<usize, bool>,
    solo: Option<usize>,
}

impl TrackMuteState {
    /// Creates an entry, unmuted, for every track that carries note-ons.
    pub fn for_tracks(tracks: &[usize]) -> Self {
        Self {
            muted: tracks.iter().map(|&track| (track, false)).collect(),
            solo: None,
        }
    }

    pub fn knows(&self, track: usize) -> bool {
        self.muted.contains_key(&track)
    }

    pub fn is_muted(&self, track: usize) -> bool {
        self.muted.get(&track).copied().unwrap_or(false)
    }

    pub fn solo(&self) -> Option<usize> {
        self.solo
    }

    pub fn with_mute(&self, track: usize, muted: bool) -> Self {
        let mut next = self.clone();
        next.muted.insert(track, muted);
        next
    }

    pub fn with_solo(&self, solo: Option<usize>) -> Self {
        Self {
            muted: self.muted.clone(),
            solo,
        }
    }
}

pub fn is_dispatchable(event: &RawEvent, state: &TrackMuteState) -> bool {
    if event.kind == EventKind::Meta {
        return false;
    }
    if event.is_note_on_class() {
        return !state.is_muted(event.track)
            && state.solo.is_none_or(|solo| solo == event.track);
    }
    // Volume and pan belong to the live controls, not the recorded stream.
    if event.is_volume_or_pan() {
        return false;
    }
    true
}
