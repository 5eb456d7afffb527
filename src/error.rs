use thiserror::Error;

pub type Result<T> = std::result::Result<T, PlayerError>;

#[derive(Error, Debug)]
pub enum PlayerError {
    #[error("Unsupported MIDI format type {0}")]
    UnsupportedFormat(u16),

    #[error("SMPTE time division 0x{0:04X} is not supported, expected ticks per beat")]
    SmpteTimeDivision(u16),

    #[error("Time division of zero ticks per beat")]
    ZeroTimeDivision,

    #[error("Negative tick delta {delta} at event {index} of track {track}")]
    NegativeTickDelta { track: usize, index: usize, delta: i64 },

    #[error("MIDI parse error: {0}")]
    Parse(String),

    #[error("Output send failed: {0}")]
    Send(String),

    #[error("Timeline consistency violated: {0}")]
    InternalConsistency(String),

    #[error("MIDI output port error: {0}")]
    Port(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl PlayerError {
    /// Errors that must be reported before any playback state is built.
    pub fn is_format_error(&self) -> bool {
        matches!(
            self,
            PlayerError::UnsupportedFormat(_)
                | PlayerError::SmpteTimeDivision(_)
                | PlayerError::ZeroTimeDivision
                | PlayerError::NegativeTickDelta { .. }
        )
    }
}
