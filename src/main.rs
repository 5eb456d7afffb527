use clap::Parser;
use crossbeam::channel::Sender;
use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use crossterm::terminal;
use midicue::engine::{MAX_TEMPO_SCALE, MIN_TEMPO_SCALE};
use midicue::{
    Controls, EngineCommand, EngineHandle, EngineOptions, LogSink, MidirSink, OutputSink,
    PlaybackState, PlayerConfig, ProgressListener, build_timeline, pump_updates, smf,
    spawn_engine,
};
use notify::{Config, RecommendedWatcher, RecursiveMode, Watcher};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

const SOLO_KEYS: &str = "qwertyuio";
const SEEK_STEP_US: f64 = 5_000_000.0;
const TEMPO_STEP: f64 = 0.1;

#[derive(Parser, Debug)]
#[command(name = "midicue", about = "Play a MIDI file through a MIDI output port")]
struct Args {
    /// MIDI file to play
    file: Option<PathBuf>,

    /// RON config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Output port name (substring match)
    #[arg(short, long)]
    port: Option<String>,

    /// Playback speed multiplier
    #[arg(short, long)]
    tempo: Option<f64>,

    /// Stop at the end of the song instead of starting over
    #[arg(long)]
    no_repeat: bool,

    /// Log outgoing messages instead of opening a port
    #[arg(long)]
    dry_run: bool,

    /// List output ports and exit
    #[arg(long)]
    list_ports: bool,

    /// Reload the file when it changes on disk
    #[arg(long)]
    watch: bool,

    /// Start paused
    #[arg(long)]
    paused: bool,

    /// Write the effective settings to this RON file and exit
    #[arg(long, value_name = "PATH")]
    save_config: Option<PathBuf>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => PlayerConfig::load(path)?,
        None => PlayerConfig::default(),
    };
    if let Some(port) = &args.port {
        config.port = Some(port.clone());
    }
    if let Some(tempo) = args.tempo {
        config.tempo_scale = tempo;
    }
    if args.no_repeat {
        config.repeat_on_end = false;
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Some(out) = &args.save_config {
        config.save(out)?;
        println!("Settings written to {}", out.display());
        return Ok(());
    }

    if args.list_ports {
        for (i, name) in MidirSink::list_ports()?.iter().enumerate() {
            println!("  {}: {}", i, name);
        }
        return Ok(());
    }

    let path = args.file.ok_or("no MIDI file given")?;
    let timeline = match smf::load_song(&path).and_then(|song| build_timeline(&song)) {
        Ok(timeline) => timeline,
        Err(e) if e.is_format_error() => {
            eprintln!("{}: unsupported MIDI file: {}", path.display(), e);
            std::process::exit(2);
        }
        Err(e) => return Err(e.into()),
    };
    tracing::info!(
        file = %path.display(),
        events = timeline.len(),
        tracks = timeline.track_count(),
        ticks_per_beat = timeline.ticks_per_beat(),
        "Song ready"
    );

    let sink: Box<dyn OutputSink> = if args.dry_run {
        println!("Output: log only");
        Box::new(LogSink)
    } else {
        let sink = MidirSink::connect(config.port.as_deref())?;
        println!("Output: {}", sink.port_name());
        Box::new(sink)
    };

    let mut status = StatusLine {
        duration_us: timeline.duration_us(),
        bars: timeline.bars(),
        tracks: timeline.note_tracks().to_vec(),
        tempo_scale: config.tempo_scale.clamp(MIN_TEMPO_SCALE, MAX_TEMPO_SCALE),
        loop_active: config.loop_active,
        repeat_on_end: config.repeat_on_end,
        ..StatusLine::default()
    };

    let handle = spawn_engine(timeline, sink, EngineOptions::from(&config));
    let controls = Controls::new(handle.command_tx.clone());

    let _watcher = if args.watch {
        Some(watch_file(&path, handle.command_tx.clone())?)
    } else {
        None
    };

    if !args.paused {
        handle.command_tx.send(EngineCommand::Play)?;
    }

    println!("space: pause  left/right: seek  [ ]: bar  up/down: tempo  1-9: mute  q-o: solo");
    println!(", .: loop start/end  l: loop  r: repeat  esc: quit");

    terminal::enable_raw_mode()?;
    let result = key_loop(&handle, &controls, &mut status);
    terminal::disable_raw_mode()?;
    println!();

    handle.shutdown();
    result?;
    Ok(())
}

fn watch_file(path: &Path, command_tx: Sender<EngineCommand>) -> notify::Result<RecommendedWatcher> {
    let watched = path.to_path_buf();
    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<notify::Event>| match res {
            Ok(event) if event.kind.is_modify() => {
                match smf::load_song(&watched).and_then(|song| build_timeline(&song)) {
                    Ok(timeline) => {
                        tracing::info!(file = %watched.display(), "File changed, reloading");
                        let _ = command_tx.send(EngineCommand::LoadTimeline(timeline));
                    }
                    Err(e) => tracing::warn!(error = %e, "Reload failed"),
                }
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "Watch error"),
        },
        Config::default(),
    )?;
    watcher.watch(path, RecursiveMode::NonRecursive)?;
    Ok(watcher)
}

#[derive(Debug, Default)]
struct StatusLine {
    state: Option<PlaybackState>,
    elapsed_us: f64,
    bar: f64,
    duration_us: f64,
    bars: f64,
    tracks: Vec<usize>,
    tempo_scale: f64,
    loop_active: bool,
    repeat_on_end: bool,
}

impl ProgressListener for StatusLine {
    fn on_progress(&mut self, elapsed_us: f64, bar: f64) {
        self.elapsed_us = elapsed_us;
        self.bar = bar;
    }

    fn on_state(&mut self, state: PlaybackState) {
        self.state = Some(state);
    }

    fn on_loaded(&mut self, duration_us: f64, bars: f64, tracks: &[usize]) {
        self.duration_us = duration_us;
        self.bars = bars;
        self.tracks = tracks.to_vec();
    }
}

impl StatusLine {
    fn render(&self, handle: &EngineHandle) -> std::io::Result<()> {
        let mixer = handle.mute_state.load();
        let tracks: String = self
            .tracks
            .iter()
            .map(|&track| {
                if mixer.solo() == Some(track) {
                    'S'
                } else if mixer.is_muted(track) {
                    'm'
                } else {
                    '.'
                }
            })
            .collect();
        let state = match self.state {
            Some(PlaybackState::Playing) => "play ",
            Some(PlaybackState::Paused) | None => "pause",
            Some(PlaybackState::Stopped) => "stop ",
        };

        let mut stdout = std::io::stdout();
        write!(
            stdout,
            "\r{} {} / {}  bar {:>6.2} / {:.0}  x{:.1}  loop:{}  repeat:{}  [{}]   ",
            state,
            format_time(self.elapsed_us),
            format_time(self.duration_us),
            self.bar + 1.0,
            self.bars.ceil(),
            self.tempo_scale,
            if self.loop_active { "on " } else { "off" },
            if self.repeat_on_end { "on " } else { "off" },
            tracks,
        )?;
        stdout.flush()
    }
}

fn format_time(us: f64) -> String {
    let total_ms = (us / 1_000.0) as u64;
    format!("{}:{:02}.{:03}", total_ms / 60_000, (total_ms / 1_000) % 60, total_ms % 1_000)
}

fn key_loop(handle: &EngineHandle, controls: &Controls, status: &mut StatusLine) -> std::io::Result<()> {
    loop {
        if !pump_updates(&handle.update_rx, status) {
            return Ok(());
        }
        status.render(handle)?;

        if !event::poll(Duration::from_millis(30))? {
            continue;
        }
        let Event::Key(key) = event::read()? else {
            continue;
        };
        if key.kind != KeyEventKind::Press {
            continue;
        }

        match key.code {
            KeyCode::Esc => return Ok(()),
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => return Ok(()),
            KeyCode::Char(' ') => controls.on_pause_toggle(),
            KeyCode::Left => controls.on_seek_time((status.elapsed_us - SEEK_STEP_US).max(0.0)),
            KeyCode::Right => controls.on_seek_time(status.elapsed_us + SEEK_STEP_US),
            KeyCode::Char('[') => controls.on_seek_bar((status.bar.floor() - 1.0).max(0.0)),
            KeyCode::Char(']') => controls.on_seek_bar(status.bar.floor() + 1.0),
            KeyCode::Up | KeyCode::Down => {
                let step = if key.code == KeyCode::Up { TEMPO_STEP } else { -TEMPO_STEP };
                status.tempo_scale = (status.tempo_scale + step).clamp(MIN_TEMPO_SCALE, MAX_TEMPO_SCALE);
                controls.on_tempo(status.tempo_scale);
            }
            KeyCode::Char(',') => controls.on_loop_start(status.bar.floor()),
            KeyCode::Char('.') => controls.on_loop_end(status.bar.floor() + 1.0),
            KeyCode::Char('l') => {
                status.loop_active = !status.loop_active;
                controls.on_loop_active(status.loop_active);
            }
            KeyCode::Char('r') => {
                status.repeat_on_end = !status.repeat_on_end;
                controls.on_repeat(status.repeat_on_end);
            }
            KeyCode::Char(c @ '1'..='9') => {
                let slot = c as usize - '1' as usize;
                if let Some(&track) = status.tracks.get(slot) {
                    controls.on_mute_toggle(track);
                }
            }
            KeyCode::Char(c) => {
                if let Some(&track) = SOLO_KEYS.find(c).and_then(|slot| status.tracks.get(slot)) {
                    controls.on_solo_toggle(track);
                }
            }
            _ => {}
        }
    }
}
