use crate::config::PlayerConfig;
use crate::error::{PlayerError, Result};
use crate::events::{self, OutboundEvent};
use crate::filter::{self, TrackMuteState};
use crate::sink::OutputSink;
use crate::timing::Timeline;
use arc_swap::ArcSwap;
use crossbeam::channel::{Receiver, RecvTimeoutError, Sender};
use std::ops::ControlFlow;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

pub const MIN_TEMPO_SCALE: f64 = 0.1;
pub const MAX_TEMPO_SCALE: f64 = 4.0;

/// Slack allowed when comparing the cursor event against elapsed time.
const TIME_EPSILON_US: f64 = 1e-3;

/// Seeks and loop jumps are instantaneous relocations within these states;
/// a loop is reported through [`EngineUpdate::Looped`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    /// Cursor at the first event, nothing pending.
    Stopped,
    Playing,
    Paused,
}

#[derive(Debug, Clone)]
pub enum EngineCommand {
    Play,
    Pause,
    TogglePause,
    SeekTime(f64),
    SeekBar(f64),
    SetTempoScale(f64),
    SetMute { track: usize, muted: bool },
    ToggleMute(usize),
    SetSolo(Option<usize>),
    ToggleSolo(usize),
    SetTrackVolume { track: usize, value: u8 },
    SetTrackPan { track: usize, value: u8 },
    SetLoopStart(f64),
    SetLoopEnd(f64),
    SetLoopBounds { start: f64, end: f64 },
    SetLoopActive(bool),
    SetRepeatOnEnd(bool),
    LoadTimeline(Timeline),
    Shutdown,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EngineUpdate {
    Progress { elapsed_us: f64, bar: f64 },
    State(PlaybackState),
    TimelineLoaded { duration_us: f64, bars: f64, tracks: Vec<usize> },
    Looped,
    Finished,
    Error { message: String },
}

#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub tempo_scale: f64,
    pub repeat_on_end: bool,
    pub loop_bounds: (f64, f64),
    pub loop_active: bool,
    pub progress_interval: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self::from(&PlayerConfig::default())
    }
}

impl From<&PlayerConfig> for EngineOptions {
    fn from(config: &PlayerConfig) -> Self {
        Self {
            tempo_scale: config.tempo_scale,
            repeat_on_end: config.repeat_on_end,
            loop_bounds: config.loop_bars.unwrap_or((0.0, 0.0)),
            loop_active: config.loop_active && config.loop_bars.is_some(),
            progress_interval: Duration::from_millis(config.progress_interval_ms),
        }
    }
}

/// Real-time duration of `dt_us` song microseconds at `tempo_scale`.
/// Zero or negative song time means "now".
pub fn scaled_wait(dt_us: f64, tempo_scale: f64) -> Duration {
    if dt_us <= 0.0 {
        return Duration::ZERO;
    }
    Duration::from_nanos((dt_us / tempo_scale * 1_000.0).round() as u64)
}

enum Step {
    Dispatch,
    Loop,
}

/// Walks a [`Timeline`] in real time. All mutable playback state lives here
/// and is touched only by the thread driving the engine.
///
/// Wall-clock deadlines are derived from an anchor, the instant at which
/// song time was exactly `elapsed_us`, so per-event scheduling jitter never
/// accumulates. The anchor is only set while playing.
pub struct PlaybackEngine<S: OutputSink> {
    timeline: Timeline,
    sink: S,
    state: PlaybackState,
    index: usize,
    elapsed_us: f64,
    anchor: Option<Instant>,
    tempo_scale: f64,
    loop_start_bar: f64,
    loop_end_bar: f64,
    loop_active: bool,
    repeat_on_end: bool,
    mute_state: Arc<ArcSwap<TrackMuteState>>,
    progress_interval: Duration,
    last_progress: Option<Instant>,
    updates: Vec<EngineUpdate>,
}

impl<S: OutputSink> PlaybackEngine<S> {
    pub fn new(timeline: Timeline, sink: S, options: EngineOptions) -> Self {
        let mute_state = Arc::new(ArcSwap::from_pointee(TrackMuteState::for_tracks(
            timeline.note_tracks(),
        )));
        Self {
            timeline,
            sink,
            state: PlaybackState::Paused,
            index: 0,
            elapsed_us: 0.0,
            anchor: None,
            tempo_scale: clamp_tempo_scale(options.tempo_scale).unwrap_or(1.0),
            loop_start_bar: options.loop_bounds.0,
            loop_end_bar: options.loop_bounds.1,
            loop_active: options.loop_active,
            repeat_on_end: options.repeat_on_end,
            mute_state,
            progress_interval: options.progress_interval,
            last_progress: None,
            updates: Vec::new(),
        }
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn timeline(&self) -> &Timeline {
        &self.timeline
    }

    pub fn cursor(&self) -> usize {
        self.index
    }

    pub fn elapsed_us(&self) -> f64 {
        self.elapsed_us
    }

    pub fn tempo_scale(&self) -> f64 {
        self.tempo_scale
    }

    pub fn loop_bounds(&self) -> (f64, f64) {
        (self.loop_start_bar, self.loop_end_bar)
    }

    pub fn mute_state(&self) -> Arc<ArcSwap<TrackMuteState>> {
        self.mute_state.clone()
    }

    /// Elapsed song time and the bar of the event under the cursor.
    pub fn progress(&self) -> (f64, f64) {
        let bar = self.timeline.get(self.index).map_or(0.0, |e| e.bar);
        (self.elapsed_us, bar)
    }

    pub fn drain_updates(&mut self) -> Vec<EngineUpdate> {
        std::mem::take(&mut self.updates)
    }

    pub fn handle_command(&mut self, command: EngineCommand, now: Instant) -> ControlFlow<()> {
        if !matches!(command, EngineCommand::LoadTimeline(_)) {
            tracing::debug!(?command, "Engine command");
        }
        match command {
            EngineCommand::Play => self.play_at(now),
            EngineCommand::Pause => self.pause_at(now),
            EngineCommand::TogglePause => self.toggle_pause_at(now),
            EngineCommand::SeekTime(time_us) => self.seek_to_time_at(time_us, now),
            EngineCommand::SeekBar(bar) => self.seek_to_bar_at(bar, now),
            EngineCommand::SetTempoScale(factor) => self.set_tempo_scale_at(factor, now),
            EngineCommand::SetMute { track, muted } => self.set_mute(track, muted),
            EngineCommand::ToggleMute(track) => self.toggle_mute(track),
            EngineCommand::SetSolo(track) => self.set_solo(track),
            EngineCommand::ToggleSolo(track) => self.toggle_solo(track),
            EngineCommand::SetTrackVolume { track, value } => self.set_track_volume(track, value),
            EngineCommand::SetTrackPan { track, value } => self.set_track_pan(track, value),
            EngineCommand::SetLoopStart(bar) => self.set_loop_bounds(bar, self.loop_end_bar),
            EngineCommand::SetLoopEnd(bar) => self.set_loop_bounds(self.loop_start_bar, bar),
            EngineCommand::SetLoopBounds { start, end } => self.set_loop_bounds(start, end),
            EngineCommand::SetLoopActive(active) => self.set_loop_active(active),
            EngineCommand::SetRepeatOnEnd(repeat) => self.set_repeat_on_end(repeat),
            EngineCommand::LoadTimeline(timeline) => self.load_timeline(timeline),
            EngineCommand::Shutdown => {
                self.silence();
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    pub fn play(&mut self) {
        self.play_at(Instant::now());
    }

    pub fn play_at(&mut self, now: Instant) {
        match self.state {
            PlaybackState::Playing => return,
            PlaybackState::Stopped => {
                self.index = 0;
                self.elapsed_us = 0.0;
            }
            PlaybackState::Paused => {}
        }
        self.anchor = Some(now);
        self.set_state(PlaybackState::Playing);
    }

    pub fn pause(&mut self) {
        self.pause_at(Instant::now());
    }

    pub fn pause_at(&mut self, now: Instant) {
        if self.state != PlaybackState::Playing {
            return;
        }
        // Keep the part of the current wait that already went by.
        self.elapsed_us = self.song_time_at(now);
        self.anchor = None;
        self.silence();
        self.set_state(PlaybackState::Paused);
        let bar = self.timeline.bar_at_time(self.elapsed_us);
        self.updates.push(EngineUpdate::Progress {
            elapsed_us: self.elapsed_us,
            bar,
        });
    }

    pub fn toggle_pause_at(&mut self, now: Instant) {
        if self.state == PlaybackState::Playing {
            self.pause_at(now);
        } else {
            self.play_at(now);
        }
    }

    pub fn seek_to_time(&mut self, time_us: f64) {
        self.seek_to_time_at(time_us, Instant::now());
    }

    /// Moves the cursor to the first event at or after `time_us`. Elapsed
    /// time becomes the requested time itself, not the event's timestamp.
    pub fn seek_to_time_at(&mut self, time_us: f64, now: Instant) {
        if !time_us.is_finite() {
            tracing::warn!(time_us, "Ignoring seek to non-finite time");
            return;
        }
        let time_us = time_us.clamp(0.0, self.timeline.duration_us());
        let index = self.timeline.index_at_or_after_time(time_us);
        self.relocate(index, time_us, now);
        tracing::debug!(time_us, index, "Seeked by time");
    }

    pub fn seek_to_bar(&mut self, bar: f64) {
        self.seek_to_bar_at(bar, Instant::now());
    }

    pub fn seek_to_bar_at(&mut self, bar: f64, now: Instant) {
        if !bar.is_finite() {
            tracing::warn!(bar, "Ignoring seek to non-finite bar");
            return;
        }
        let index = self.timeline.index_at_or_after_bar(bar);
        let mut time_us = self.timeline.time_at_bar(bar);
        if let Some(event) = self.timeline.get(index) {
            time_us = time_us.min(event.timestamp_us);
        }
        self.relocate(index, time_us, now);
        tracing::debug!(bar, index, time_us, "Seeked by bar");
    }

    fn relocate(&mut self, index: usize, time_us: f64, now: Instant) {
        self.silence();
        self.index = index;
        self.elapsed_us = time_us;
        match self.state {
            PlaybackState::Playing => self.anchor = Some(now),
            PlaybackState::Stopped => self.set_state(PlaybackState::Paused),
            PlaybackState::Paused => {}
        }
        self.push_progress();
    }

    /// Changes the real-time rate. Song time already played is kept; the
    /// remainder of the current wait runs at the new rate.
    pub fn set_tempo_scale_at(&mut self, factor: f64, now: Instant) {
        let Some(factor) = clamp_tempo_scale(factor) else {
            tracing::warn!(factor, "Ignoring invalid tempo scale");
            return;
        };
        if self.anchor.is_some() {
            self.elapsed_us = self.song_time_at(now);
            self.anchor = Some(now);
        }
        self.tempo_scale = factor;
        tracing::debug!(factor, "Tempo scale changed");
    }

    pub fn set_tempo_scale(&mut self, factor: f64) {
        self.set_tempo_scale_at(factor, Instant::now());
    }

    pub fn set_loop_bounds(&mut self, start_bar: f64, end_bar: f64) {
        self.loop_start_bar = start_bar.max(0.0);
        self.loop_end_bar = end_bar.max(0.0);
        if self.loop_active && self.loop_window().is_none() {
            tracing::warn!(start_bar, end_bar, "Loop bounds enclose no time, loop is inert");
        }
    }

    pub fn set_loop_active(&mut self, active: bool) {
        self.loop_active = active;
    }

    pub fn set_repeat_on_end(&mut self, repeat: bool) {
        self.repeat_on_end = repeat;
    }

    pub fn set_mute(&mut self, track: usize, muted: bool) {
        let current = self.mute_state.load();
        if !current.knows(track) {
            tracing::warn!(track, "Mute ignored, track has no notes");
            return;
        }
        self.mute_state.store(Arc::new(current.with_mute(track, muted)));
    }

    pub fn toggle_mute(&mut self, track: usize) {
        let muted = self.mute_state.load().is_muted(track);
        self.set_mute(track, !muted);
    }

    pub fn set_solo(&mut self, track: Option<usize>) {
        let current = self.mute_state.load();
        if let Some(track) = track.filter(|&track| !current.knows(track)) {
            tracing::warn!(track, "Solo ignored, track has no notes");
            return;
        }
        self.mute_state.store(Arc::new(current.with_solo(track)));
    }

    pub fn toggle_solo(&mut self, track: usize) {
        let solo = self.mute_state.load().solo();
        self.set_solo(if solo == Some(track) { None } else { Some(track) });
    }

    pub fn set_track_volume(&mut self, track: usize, value: u8) {
        let channel = self.timeline.channel_for_track(track);
        self.send_or_log(&OutboundEvent::volume(channel, value).encode());
    }

    pub fn set_track_pan(&mut self, track: usize, value: u8) {
        let channel = self.timeline.channel_for_track(track);
        self.send_or_log(&OutboundEvent::pan(channel, value).encode());
    }

    /// Replaces the song. The engine returns to its initial paused state.
    pub fn load_timeline(&mut self, timeline: Timeline) {
        self.silence();
        self.mute_state
            .store(Arc::new(TrackMuteState::for_tracks(timeline.note_tracks())));
        self.timeline = timeline;
        self.index = 0;
        self.elapsed_us = 0.0;
        self.anchor = None;
        tracing::info!(
            events = self.timeline.len(),
            duration_us = self.timeline.duration_us(),
            "Timeline loaded"
        );
        self.updates.push(EngineUpdate::TimelineLoaded {
            duration_us: self.timeline.duration_us(),
            bars: self.timeline.bars(),
            tracks: self.timeline.note_tracks().to_vec(),
        });
        self.set_state(PlaybackState::Paused);
        self.push_progress();
    }

    /// Sends all-sound-off on every channel.
    pub fn silence(&mut self) {
        for event in events::silence_all() {
            self.send_or_log(&event.encode());
        }
    }

    /// Performs everything due at `now` and returns the deadline of the next
    /// step, or `None` when nothing is scheduled until a command arrives.
    pub fn poll(&mut self, now: Instant) -> Result<Option<Instant>> {
        loop {
            let Some((target_us, step)) = self.next_target() else {
                return Ok(None);
            };
            let Some(anchor) = self.anchor else {
                return Ok(None);
            };
            let deadline = anchor + scaled_wait(target_us - self.elapsed_us, self.tempo_scale);
            if deadline > now {
                return Ok(Some(deadline));
            }
            match step {
                Step::Dispatch => self.dispatch_current(deadline, now)?,
                Step::Loop => {
                    tracing::debug!(bar = self.loop_start_bar, "Looping");
                    self.seek_to_bar_at(self.loop_start_bar, now);
                    self.updates.push(EngineUpdate::Looped);
                }
            }
        }
    }

    fn next_target(&self) -> Option<(f64, Step)> {
        if self.state != PlaybackState::Playing {
            return None;
        }
        let event = self.timeline.get(self.index)?;
        if let Some(loop_end_us) = self.loop_window() {
            if event.bar >= self.loop_end_bar {
                return Some((loop_end_us.max(self.elapsed_us), Step::Loop));
            }
        }
        Some((event.timestamp_us, Step::Dispatch))
    }

    /// End time of the active loop, if the bounds enclose any song time.
    fn loop_window(&self) -> Option<f64> {
        if !self.loop_active || self.loop_end_bar <= self.loop_start_bar {
            return None;
        }
        let end_us = self.timeline.time_at_bar(self.loop_end_bar);
        (end_us > self.timeline.time_at_bar(self.loop_start_bar)).then_some(end_us)
    }

    fn dispatch_current(&mut self, deadline: Instant, now: Instant) -> Result<()> {
        let Some(event) = self.timeline.get(self.index) else {
            return Ok(());
        };
        if event.timestamp_us + TIME_EPSILON_US < self.elapsed_us {
            return Err(PlayerError::InternalConsistency(format!(
                "event {} at {}us is behind elapsed time {}us",
                self.index, event.timestamp_us, self.elapsed_us
            )));
        }

        let timestamp_us = event.timestamp_us;
        let bar = event.bar;
        if filter::is_dispatchable(&event.raw, &self.mute_state.load()) {
            tracing::trace!(index = self.index, track = event.raw.track, "Dispatch {:02X?}", event.raw.data);
            let data = event.raw.data.clone();
            self.send_or_log(&data);
        }

        self.elapsed_us = timestamp_us;
        self.anchor = Some(deadline);
        self.index += 1;

        let due = self
            .last_progress
            .is_none_or(|last| now.saturating_duration_since(last) >= self.progress_interval);
        if due {
            self.last_progress = Some(now);
            self.updates.push(EngineUpdate::Progress {
                elapsed_us: timestamp_us,
                bar,
            });
        }

        if self.index >= self.timeline.len() {
            self.end_of_timeline(now);
        }
        Ok(())
    }

    fn end_of_timeline(&mut self, now: Instant) {
        if self.loop_window().is_some() {
            self.seek_to_bar_at(self.loop_start_bar, now);
            self.updates.push(EngineUpdate::Looped);
        } else if self.repeat_on_end && self.timeline.duration_us() > 0.0 {
            tracing::debug!("End of song, repeating");
            self.relocate(0, 0.0, now);
            self.updates.push(EngineUpdate::Looped);
        } else {
            tracing::info!("End of song");
            self.silence();
            self.index = 0;
            self.elapsed_us = 0.0;
            self.anchor = None;
            self.set_state(PlaybackState::Stopped);
            self.push_progress();
            self.updates.push(EngineUpdate::Finished);
        }
    }

    /// Song time reached at `now`, never past the cursor event.
    fn song_time_at(&self, now: Instant) -> f64 {
        let Some(anchor) = self.anchor else {
            return self.elapsed_us;
        };
        let played_us = now.saturating_duration_since(anchor).as_nanos() as f64 / 1_000.0;
        let time_us = self.elapsed_us + played_us * self.tempo_scale;
        match self.timeline.get(self.index) {
            Some(event) => time_us.min(event.timestamp_us.max(self.elapsed_us)),
            None => self.elapsed_us,
        }
    }

    fn send_or_log(&mut self, message: &[u8]) {
        if let Err(e) = self.sink.send(message) {
            tracing::warn!(error = %e, "Dropped outbound message {:02X?}", message);
        }
    }

    fn set_state(&mut self, state: PlaybackState) {
        if self.state != state {
            tracing::info!(?state, "Playback state");
            self.state = state;
        }
        self.updates.push(EngineUpdate::State(state));
    }

    fn push_progress(&mut self) {
        let (elapsed_us, bar) = self.progress();
        self.updates.push(EngineUpdate::Progress { elapsed_us, bar });
    }
}

fn clamp_tempo_scale(factor: f64) -> Option<f64> {
    (factor.is_finite() && factor > 0.0).then(|| factor.clamp(MIN_TEMPO_SCALE, MAX_TEMPO_SCALE))
}

pub struct EngineHandle {
    pub command_tx: Sender<EngineCommand>,
    pub update_rx: Receiver<EngineUpdate>,
    pub mute_state: Arc<ArcSwap<TrackMuteState>>,
    thread: Option<JoinHandle<()>>,
}

impl EngineHandle {
    /// Asks the engine to stop and waits for its thread.
    pub fn shutdown(mut self) {
        let _ = self.command_tx.send(EngineCommand::Shutdown);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

pub fn spawn_engine<S: OutputSink + 'static>(
    timeline: Timeline,
    sink: S,
    options: EngineOptions,
) -> EngineHandle {
    let (command_tx, command_rx) = crossbeam::channel::unbounded();
    let (update_tx, update_rx) = crossbeam::channel::unbounded();

    let engine = PlaybackEngine::new(timeline, sink, options);
    let mute_state = engine.mute_state();

    let thread = std::thread::spawn(move || {
        engine_thread(engine, command_rx, update_tx);
    });

    EngineHandle {
        command_tx,
        update_rx,
        mute_state,
        thread: Some(thread),
    }
}

/// Drives the engine. Every wait is a channel receive, so any command cuts
/// an inter-event wait or a pause short immediately.
fn engine_thread<S: OutputSink>(
    mut engine: PlaybackEngine<S>,
    command_rx: Receiver<EngineCommand>,
    update_tx: Sender<EngineUpdate>,
) {
    let forward = |engine: &mut PlaybackEngine<S>| {
        for update in engine.drain_updates() {
            let _ = update_tx.send(update);
        }
    };

    loop {
        let deadline = match engine.poll(Instant::now()) {
            Ok(deadline) => deadline,
            Err(e) => {
                tracing::error!(error = %e, "Playback aborted");
                engine.silence();
                forward(&mut engine);
                let _ = update_tx.send(EngineUpdate::Error {
                    message: e.to_string(),
                });
                return;
            }
        };
        forward(&mut engine);

        let command = match deadline {
            Some(deadline) => match command_rx.recv_deadline(deadline) {
                Ok(command) => command,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            },
            None => match command_rx.recv() {
                Ok(command) => command,
                Err(_) => break,
            },
        };

        if engine.handle_command(command, Instant::now()).is_break() {
            forward(&mut engine);
            return;
        }
        forward(&mut engine);
    }

    engine.silence();
}
