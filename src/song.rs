//! Parsed song model handed over by the MIDI file parser.
//!
//! Channel events carry their full wire message in `data` (status byte
//! first). Meta events carry only their payload, the meta type lives in
//! `meta`.

use crate::error::{PlayerError, Result};

pub const META_TEMPO: u8 = 0x51;
pub const META_TIME_SIGNATURE: u8 = 0x58;
pub const META_END_OF_TRACK: u8 = 0x2F;
pub const META_TRACK_NAME: u8 = 0x03;

pub const CC_VOLUME: u8 = 7;
pub const CC_PAN: u8 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    NoteOff,
    NoteOn,
    ControlChange,
    Meta,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetaKind {
    Tempo,
    TimeSignature,
    EndOfTrack,
    TrackName,
    Other(u8),
}

impl MetaKind {
    pub fn from_type_byte(meta_type: u8) -> Self {
        match meta_type {
            META_TEMPO => MetaKind::Tempo,
            META_TIME_SIGNATURE => MetaKind::TimeSignature,
            META_END_OF_TRACK => MetaKind::EndOfTrack,
            META_TRACK_NAME => MetaKind::TrackName,
            other => MetaKind::Other(other),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawEvent {
    pub track: usize,
    /// Ticks since the previous event of the same track.
    pub tick_delta: i64,
    pub kind: EventKind,
    pub data: Vec<u8>,
    pub meta: Option<MetaKind>,
}

impl RawEvent {
    /// Builds a channel event from its wire bytes, classifying it by the
    /// status nibble.
    pub fn channel(track: usize, tick_delta: i64, data: Vec<u8>) -> Self {
        let kind = match data.first().map(|status| status & 0xF0) {
            Some(0x80) => EventKind::NoteOff,
            Some(0x90) => EventKind::NoteOn,
            Some(0xB0) => EventKind::ControlChange,
            _ => EventKind::Other,
        };
        Self {
            track,
            tick_delta,
            kind,
            data,
            meta: None,
        }
    }

    pub fn meta(track: usize, tick_delta: i64, meta_type: u8, payload: Vec<u8>) -> Self {
        Self {
            track,
            tick_delta,
            kind: EventKind::Meta,
            data: payload,
            meta: Some(MetaKind::from_type_byte(meta_type)),
        }
    }

    /// Note-offs, and note-ons with velocity zero.
    pub fn is_note_off_class(&self) -> bool {
        match self.kind {
            EventKind::NoteOff => true,
            EventKind::NoteOn => self.data.get(2).copied().unwrap_or(0) == 0,
            _ => false,
        }
    }

    pub fn is_note_on_class(&self) -> bool {
        self.kind == EventKind::NoteOn && !self.is_note_off_class()
    }

    pub fn channel_nibble(&self) -> Option<u8> {
        match self.kind {
            EventKind::Meta => None,
            _ => self
                .data
                .first()
                .filter(|status| (0x80..0xF0).contains(*status))
                .map(|status| status & 0x0F),
        }
    }

    pub fn is_volume_or_pan(&self) -> bool {
        self.kind == EventKind::ControlChange
            && matches!(self.data.get(1).copied(), Some(CC_VOLUME) | Some(CC_PAN))
    }

    /// Microseconds per quarter note carried by a tempo meta event.
    pub fn tempo_us_per_beat(&self) -> Option<u32> {
        if self.meta != Some(MetaKind::Tempo) || self.data.len() < 3 {
            return None;
        }
        let us = ((self.data[0] as u32) << 16) | ((self.data[1] as u32) << 8) | self.data[2] as u32;
        (us > 0).then_some(us)
    }

    /// Quarter-note beats per bar carried by a time signature meta event.
    pub fn beats_per_bar(&self) -> Option<f64> {
        if self.meta != Some(MetaKind::TimeSignature) || self.data.len() < 2 {
            return None;
        }
        let numerator = self.data[0] as f64;
        let denominator = 2f64.powi(self.data[1] as i32);
        (numerator > 0.0).then(|| numerator * 4.0 / denominator)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Song {
    pub format_type: u16,
    pub time_division: u16,
    pub tracks: Vec<Vec<RawEvent>>,
}

impl Song {
    /// Checks the header fields and returns the ticks-per-beat resolution.
    pub fn validate(&self) -> Result<u16> {
        // Format 2 holds independent sequences that must not be merged.
        if self.format_type > 1 {
            return Err(PlayerError::UnsupportedFormat(self.format_type));
        }
        if self.time_division & 0x8000 != 0 {
            return Err(PlayerError::SmpteTimeDivision(self.time_division));
        }
        if self.time_division == 0 {
            return Err(PlayerError::ZeroTimeDivision);
        }
        Ok(self.time_division)
    }
}
