mod tempo_map;
mod ticks;
mod timeline;

pub use tempo_map::{DEFAULT_BEATS_PER_BAR, DEFAULT_TEMPO_US_PER_BEAT, TypeRank, build_timeline};
pub use ticks::{TickEvent, stamp_ticks};
pub use timeline::{TimedEvent, Timeline};
