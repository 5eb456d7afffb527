//! Real-time playback of multitrack MIDI songs.
//!
//! A parsed [`Song`] is turned once into an immutable [`Timeline`]: per-track
//! tick deltas become absolute ticks, all tracks are merged in tick order and
//! the tempo map resolves every event to microseconds and bars. A
//! [`PlaybackEngine`] then walks that timeline on its own thread, driven by
//! [`EngineCommand`]s and reporting [`EngineUpdate`]s.

pub mod config;
pub mod control;
pub mod engine;
pub mod error;
pub mod events;
pub mod filter;
pub mod sink;
pub mod smf;
pub mod song;
pub mod timing;

pub use config::PlayerConfig;
pub use control::{Controls, ProgressListener, pump_updates};
pub use engine::{
    EngineCommand, EngineHandle, EngineOptions, EngineUpdate, PlaybackEngine, PlaybackState,
    spawn_engine,
};
pub use error::{PlayerError, Result};
pub use filter::{TrackMuteState, is_dispatchable};
pub use sink::{LogSink, MemorySink, MidirSink, OutputSink};
pub use song::{EventKind, MetaKind, RawEvent, Song};
pub use timing::{TimedEvent, Timeline, build_timeline};
