use std::io::BufRead;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use crossbeam::channel::Receiver;
use stemdeck::{EngineCommand, EngineHandle, EngineUpdate, Project, spawn_engine};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const HELP: &str = "commands: start | stop | toggle <id> | enable <id> | disable <id> | \
tempo <bpm> | ratio <r> | key <semitones> | gain <g> | loop on|off | tracks | quit";

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("stemdeck=info")),
        )
        .init();

    let project_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));

    let project = match Project::load(&project_path) {
        Ok(project) => project,
        Err(err) => {
            error!(path = %project_path.display(), error = %err, "failed to load project");
            return ExitCode::FAILURE;
        }
    };
    info!(name = %project.name, tracks = project.tracks.len(), "project loaded");

    let Some((engine, _output)) = start_engine(&project) else {
        return ExitCode::FAILURE;
    };

    println!("{HELP}");
    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        drain_updates(&engine.update_rx);

        match parse_command(&line, &project) {
            Ok(Some(command)) => {
                let quit = command == EngineCommand::Shutdown;
                if quit || !engine.send(command) {
                    break;
                }
            }
            Ok(None) => {}
            Err(message) => warn!("{message}"),
        }
    }

    engine.shutdown();
    ExitCode::SUCCESS
}

#[cfg(not(feature = "cpal"))]
fn start_engine(project: &Project) -> Option<(EngineHandle, ())> {
    use stemdeck::{LogSynth, SystemClock};

    let engine = spawn_engine(project, LogSynth, Arc::new(SystemClock::new()));
    Some((engine, ()))
}

/// The returned stream must outlive the engine.
#[cfg(feature = "cpal")]
fn start_engine(project: &Project) -> Option<(EngineHandle, cpal::Stream)> {
    use stemdeck::audio::{VoiceBankConfig, default_output_config, ring_synth, start_stream};

    let stream_config = match default_output_config() {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "no audio output");
            return None;
        }
    };
    let (synth, bank) = ring_synth(VoiceBankConfig {
        sample_rate: stream_config.sample_rate as f32,
        channels: usize::from(stream_config.channels),
        ..VoiceBankConfig::default()
    });
    let clock = bank.clock();
    let stream = match start_stream(&stream_config, bank) {
        Ok(stream) => stream,
        Err(err) => {
            error!(error = %err, "failed to start audio stream");
            return None;
        }
    };

    Some((spawn_engine(project, synth, Arc::new(clock)), stream))
}

fn parse_command(line: &str, project: &Project) -> Result<Option<EngineCommand>, String> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Ok(None);
    };
    let arg = words.next();

    let command = match (verb, arg) {
        ("start" | "play", _) => EngineCommand::Start,
        ("stop", _) => EngineCommand::Stop,
        ("quit" | "exit", _) => EngineCommand::Shutdown,
        ("toggle", Some(id)) => EngineCommand::ToggleTrack(id.to_string()),
        ("enable", Some(id)) => EngineCommand::EnableTrack(id.to_string()),
        ("disable", Some(id)) => EngineCommand::DisableTrack(id.to_string()),
        ("tempo", Some(v)) => EngineCommand::SetTempo(parse_number(v)?),
        ("ratio", Some(v)) => EngineCommand::SetTempoRatio(parse_number(v)?),
        ("key", Some(v)) => EngineCommand::SetKeyShift(parse_number(v)?),
        ("gain", Some(v)) => EngineCommand::SetGain(parse_number(v)?),
        ("loop", Some("on")) => EngineCommand::SetLooping(true),
        ("loop", Some("off")) => EngineCommand::SetLooping(false),
        ("tracks", _) => {
            for source in &project.tracks {
                println!("{} ({})", source.id, source.path.display());
            }
            return Ok(None);
        }
        ("help", _) => {
            println!("{HELP}");
            return Ok(None);
        }
        _ => return Err(format!("unrecognised command '{}'", line.trim())),
    };
    Ok(Some(command))
}

fn parse_number<T: std::str::FromStr>(value: &str) -> Result<T, String> {
    value
        .parse()
        .map_err(|_| format!("'{value}' is not a valid number"))
}

fn drain_updates(update_rx: &Receiver<EngineUpdate>) {
    for update in update_rx.try_iter() {
        match update {
            EngineUpdate::TrackLoaded { id, notes } => info!(track = %id, notes, "track ready"),
            EngineUpdate::TrackUnavailable { id, message } => {
                warn!(track = %id, %message, "track unavailable")
            }
            EngineUpdate::TrackEnabled { id, enabled } => info!(track = %id, enabled),
            EngineUpdate::TransportChanged(state) => info!(
                base = state.base_tempo,
                tempo = state.current_tempo,
                key = state.key_shift,
                gain = state.gain,
                "transport"
            ),
            EngineUpdate::PlaybackState { playing, session } => {
                info!(playing, session = ?session, "playback")
            }
            EngineUpdate::SessionFinished { session } => info!(%session, "session finished"),
            EngineUpdate::Error { message } => warn!("{message}"),
        }
    }
}
