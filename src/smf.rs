//! Bridge from a `midly` parse to the player's [`Song`] model.

use std::path::Path;

use midly::{Format, MetaMessage, MidiMessage, Smf, Timing, TrackEventKind};

use crate::error::{PlayerError, Result};
use crate::events::status_byte;
use crate::song::{RawEvent, Song};

pub fn load_song(path: &Path) -> Result<Song> {
    let data = std::fs::read(path)?;
    let smf = Smf::parse(&data).map_err(|e| PlayerError::Parse(e.to_string()))?;
    Ok(song_from_smf(&smf))
}

pub fn song_from_smf(smf: &Smf) -> Song {
    let format_type = match smf.header.format {
        Format::SingleTrack => 0,
        Format::Parallel => 1,
        Format::Sequential => 2,
    };
    // SMPTE headers keep their wire encoding, negative frame rate in the
    // high byte, so validation can reject them.
    let time_division = match smf.header.timing {
        Timing::Metrical(ticks_per_beat) => ticks_per_beat.as_int(),
        Timing::Timecode(fps, subframes) => {
            let frames = (-(fps.as_int() as i8)) as u8;
            ((frames as u16) << 8) | subframes as u16
        }
    };

    let tracks = smf
        .tracks
        .iter()
        .enumerate()
        .map(|(track, events)| {
            events
                .iter()
                .map(|event| convert(track, event.delta.as_int() as i64, &event.kind))
                .collect()
        })
        .collect();

    Song {
        format_type,
        time_division,
        tracks,
    }
}

fn convert(track: usize, delta: i64, kind: &TrackEventKind) -> RawEvent {
    match kind {
        TrackEventKind::Midi { channel, message } => {
            RawEvent::channel(track, delta, encode_midi(channel.as_int(), message))
        }
        TrackEventKind::SysEx(payload) => {
            let mut data = vec![0xF0];
            data.extend_from_slice(payload);
            RawEvent::channel(track, delta, data)
        }
        TrackEventKind::Escape(payload) => RawEvent::channel(track, delta, payload.to_vec()),
        TrackEventKind::Meta(meta) => {
            let (meta_type, payload) = encode_meta(meta);
            RawEvent::meta(track, delta, meta_type, payload)
        }
    }
}

fn encode_midi(channel: u8, message: &MidiMessage) -> Vec<u8> {
    match *message {
        MidiMessage::NoteOff { key, vel } => vec![status_byte(0x80, channel), key.as_int(), vel.as_int()],
        MidiMessage::NoteOn { key, vel } => vec![status_byte(0x90, channel), key.as_int(), vel.as_int()],
        MidiMessage::Aftertouch { key, vel } => vec![status_byte(0xA0, channel), key.as_int(), vel.as_int()],
        MidiMessage::Controller { controller, value } => {
            vec![status_byte(0xB0, channel), controller.as_int(), value.as_int()]
        }
        MidiMessage::ProgramChange { program } => vec![status_byte(0xC0, channel), program.as_int()],
        MidiMessage::ChannelAftertouch { vel } => vec![status_byte(0xD0, channel), vel.as_int()],
        MidiMessage::PitchBend { bend } => {
            let raw = bend.0.as_int();
            vec![status_byte(0xE0, channel), (raw & 0x7F) as u8, (raw >> 7) as u8]
        }
    }
}

fn encode_meta(meta: &MetaMessage) -> (u8, Vec<u8>) {
    match *meta {
        MetaMessage::TrackNumber(number) => (
            0x00,
            number.map(|n| n.to_be_bytes().to_vec()).unwrap_or_default(),
        ),
        MetaMessage::Text(text) => (0x01, text.to_vec()),
        MetaMessage::Copyright(text) => (0x02, text.to_vec()),
        MetaMessage::TrackName(name) => (0x03, name.to_vec()),
        MetaMessage::InstrumentName(name) => (0x04, name.to_vec()),
        MetaMessage::Lyric(text) => (0x05, text.to_vec()),
        MetaMessage::Marker(text) => (0x06, text.to_vec()),
        MetaMessage::CuePoint(text) => (0x07, text.to_vec()),
        MetaMessage::ProgramName(name) => (0x08, name.to_vec()),
        MetaMessage::DeviceName(name) => (0x09, name.to_vec()),
        MetaMessage::MidiChannel(channel) => (0x20, vec![channel.as_int()]),
        MetaMessage::MidiPort(port) => (0x21, vec![port.as_int()]),
        MetaMessage::EndOfTrack => (0x2F, Vec::new()),
        MetaMessage::Tempo(us_per_beat) => {
            let us = us_per_beat.as_int();
            (0x51, vec![(us >> 16) as u8, (us >> 8) as u8, us as u8])
        }
        MetaMessage::TimeSignature(numerator, denominator, clocks, notes) => {
            (0x58, vec![numerator, denominator, clocks, notes])
        }
        MetaMessage::SmpteOffset(_) => (0x54, Vec::new()),
        MetaMessage::KeySignature(sharps, minor) => (0x59, vec![sharps as u8, minor as u8]),
        MetaMessage::SequencerSpecific(data) => (0x7F, data.to_vec()),
        MetaMessage::Unknown(meta_type, data) => (meta_type, data.to_vec()),
    }
}
