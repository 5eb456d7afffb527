//! Outbound channel messages, encoded as `[status, data...]`.

use crate::song::{CC_PAN, CC_VOLUME};

pub const CONTROL_CHANGE: u8 = 0xB0;
pub const CC_ALL_SOUND_OFF: u8 = 120;
pub const CHANNELS: u8 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MidiMessage {
    ControlChange { controller: u8, value: u8 },
    AllSoundOff,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutboundEvent {
    pub channel: u8,
    pub message: MidiMessage,
}

impl OutboundEvent {
    pub fn volume(channel: u8, value: u8) -> Self {
        Self {
            channel,
            message: MidiMessage::ControlChange {
                controller: CC_VOLUME,
                value: value.min(127),
            },
        }
    }

    pub fn pan(channel: u8, value: u8) -> Self {
        Self {
            channel,
            message: MidiMessage::ControlChange {
                controller: CC_PAN,
                value: value.min(127),
            },
        }
    }

    pub fn all_sound_off(channel: u8) -> Self {
        Self {
            channel,
            message: MidiMessage::AllSoundOff,
        }
    }

    pub fn encode(&self) -> [u8; 3] {
        let (controller, value) = match self.message {
            MidiMessage::ControlChange { controller, value } => (controller, value),
            MidiMessage::AllSoundOff => (CC_ALL_SOUND_OFF, 0),
        };
        [
            status_byte(CONTROL_CHANGE, self.channel),
            controller & 0x7F,
            value & 0x7F,
        ]
    }
}

/// Packs a message-type nibble and a channel nibble into one status byte.
pub fn status_byte(message_type: u8, channel: u8) -> u8 {
    (message_type & 0xF0) | (channel & 0x0F)
}

pub fn silence_all() -> impl Iterator<Item = OutboundEvent> {
    (0..CHANNELS).map(OutboundEvent::all_sound_off)
}
