//! Callback surface for a UI. Every control forwards its raw value as one
//! command on the engine's ordered channel.

use crossbeam::channel::{Receiver, Sender};

use crate::engine::{EngineCommand, EngineUpdate, PlaybackState};

#[derive(Debug, Clone)]
pub struct Controls {
    command_tx: Sender<EngineCommand>,
}

impl Controls {
    pub fn new(command_tx: Sender<EngineCommand>) -> Self {
        Self { command_tx }
    }

    fn forward(&self, command: EngineCommand) {
        if self.command_tx.send(command).is_err() {
            tracing::debug!("Engine gone, control ignored");
        }
    }

    pub fn on_seek_time(&self, time_us: f64) {
        self.forward(EngineCommand::SeekTime(time_us));
    }

    pub fn on_seek_bar(&self, bar: f64) {
        self.forward(EngineCommand::SeekBar(bar));
    }

    pub fn on_tempo(&self, factor: f64) {
        self.forward(EngineCommand::SetTempoScale(factor));
    }

    pub fn on_pause_toggle(&self) {
        self.forward(EngineCommand::TogglePause);
    }

    pub fn on_track_volume(&self, track: usize, value: u8) {
        self.forward(EngineCommand::SetTrackVolume { track, value });
    }

    pub fn on_track_pan(&self, track: usize, value: u8) {
        self.forward(EngineCommand::SetTrackPan { track, value });
    }

    pub fn on_mute_toggle(&self, track: usize) {
        self.forward(EngineCommand::ToggleMute(track));
    }

    pub fn on_solo_toggle(&self, track: usize) {
        self.forward(EngineCommand::ToggleSolo(track));
    }

    pub fn on_loop_start(&self, bar: f64) {
        self.forward(EngineCommand::SetLoopStart(bar));
    }

    pub fn on_loop_end(&self, bar: f64) {
        self.forward(EngineCommand::SetLoopEnd(bar));
    }

    pub fn on_loop_active(&self, active: bool) {
        self.forward(EngineCommand::SetLoopActive(active));
    }

    pub fn on_repeat(&self, repeat: bool) {
        self.forward(EngineCommand::SetRepeatOnEnd(repeat));
    }
}

/// Receives what the engine reports back.
pub trait ProgressListener {
    fn on_progress(&mut self, elapsed_us: f64, bar: f64);

    fn on_state(&mut self, _state: PlaybackState) {}

    fn on_loaded(&mut self, _duration_us: f64, _bars: f64, _tracks: &[usize]) {}

    fn on_error(&mut self, message: &str) {
        tracing::error!("{}", message);
    }
}

/// Hands every pending update to `listener` without blocking. Returns
/// false once the engine has reported a fatal error.
pub fn pump_updates(update_rx: &Receiver<EngineUpdate>, listener: &mut impl ProgressListener) -> bool {
    let mut alive = true;
    while let Ok(update) = update_rx.try_recv() {
        match update {
            EngineUpdate::Progress { elapsed_us, bar } => listener.on_progress(elapsed_us, bar),
            EngineUpdate::State(state) => listener.on_state(state),
            EngineUpdate::TimelineLoaded {
                duration_us,
                bars,
                tracks,
            } => listener.on_loaded(duration_us, bars, &tracks),
            EngineUpdate::Looped => tracing::debug!("Playback looped"),
            EngineUpdate::Finished => listener.on_state(PlaybackState::Stopped),
            EngineUpdate::Error { message } => {
                listener.on_error(&message);
                alive = false;
            }
        }
    }
    alive
}
