use crate::audio::Synth;
use crate::controller::{PlaybackController, TickOutcome};
use crate::project::Project;
use crate::timing::{Clock, SessionId, TransportState};
use crossbeam::channel::{Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{error, info};

#[derive(Debug, Clone, PartialEq)]
pub enum EngineCommand {
    EnableTrack(String),
    DisableTrack(String),
    ToggleTrack(String),
    SetTempo(f64),
    /// `base / current`; 0.5 plays twice as fast.
    SetTempoRatio(f64),
    SetKeyShift(i32),
    SetGain(f32),
    SetLooping(bool),
    Start,
    Stop,
    Shutdown,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EngineUpdate {
    TrackLoaded { id: String, notes: usize },
    TrackUnavailable { id: String, message: String },
    TrackEnabled { id: String, enabled: bool },
    TransportChanged(TransportState),
    PlaybackState { playing: bool, session: Option<SessionId> },
    SessionFinished { session: SessionId },
    Error { message: String },
}

pub struct EngineHandle {
    pub command_tx: Sender<EngineCommand>,
    pub update_rx: Receiver<EngineUpdate>,
    thread: Option<JoinHandle<()>>,
}

impl EngineHandle {
    /// Returns false once the engine thread has exited.
    pub fn send(&self, command: EngineCommand) -> bool {
        self.command_tx.send(command).is_ok()
    }

    /// Stop playback, end the engine thread and wait for it.
    pub fn shutdown(mut self) {
        let _ = self.command_tx.send(EngineCommand::Shutdown);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("engine thread panicked");
            }
        }
    }
}

/// Build a controller for `project`, loading every track. Tracks that fail to
/// load are reported and stay disabled.
pub fn load_project<S: Synth>(
    project: &Project,
    synth: S,
    clock: Arc<dyn Clock>,
) -> (PlaybackController<S>, Vec<EngineUpdate>) {
    let mut controller = PlaybackController::new(synth, clock)
        .with_lead_in(project.lead_in_secs)
        .with_looping(project.looping);
    let mut updates = Vec::with_capacity(project.tracks.len());

    for source in &project.tracks {
        match controller.load_track_file(&source.id, &project.resolve(source)) {
            Ok(()) => {
                let notes = controller
                    .tracks()
                    .get(&source.id)
                    .map_or(0, |t| t.events().len());
                updates.push(EngineUpdate::TrackLoaded {
                    id: source.id.clone(),
                    notes,
                });
                if source.enabled && controller.enable_track(&source.id) {
                    updates.push(EngineUpdate::TrackEnabled {
                        id: source.id.clone(),
                        enabled: true,
                    });
                }
            }
            Err(err) => updates.push(EngineUpdate::TrackUnavailable {
                id: source.id.clone(),
                message: err.to_string(),
            }),
        }
    }

    if let Some(bpm) = project.tempo {
        controller.set_base_tempo(bpm);
    }
    updates.push(EngineUpdate::TransportChanged(controller.transport()));

    (controller, updates)
}

pub fn spawn_engine<S: Synth + Send + 'static>(
    project: &Project,
    synth: S,
    clock: Arc<dyn Clock>,
) -> EngineHandle {
    let (controller, initial) = load_project(project, synth, clock);
    spawn_controller(controller, project.tick_interval(), initial)
}

/// Run an already configured controller on its own thread. `initial` updates
/// are delivered before anything else.
pub fn spawn_controller<S: Synth + Send + 'static>(
    controller: PlaybackController<S>,
    tick_interval: Duration,
    initial: Vec<EngineUpdate>,
) -> EngineHandle {
    let (command_tx, command_rx) = crossbeam::channel::unbounded();
    let (update_tx, update_rx) = crossbeam::channel::unbounded();

    for update in initial {
        let _ = update_tx.send(update);
    }

    let thread = std::thread::spawn(move || {
        engine_thread(controller, command_rx, update_tx, tick_interval);
    });

    EngineHandle {
        command_tx,
        update_rx,
        thread: Some(thread),
    }
}

fn engine_thread<S: Synth>(
    mut controller: PlaybackController<S>,
    command_rx: Receiver<EngineCommand>,
    update_tx: Sender<EngineUpdate>,
    tick_interval: Duration,
) {
    info!(?tick_interval, "engine running");

    loop {
        match command_rx.recv_timeout(tick_interval) {
            Ok(EngineCommand::Shutdown) => break,
            Ok(command) => apply_command(&mut controller, command, &update_tx),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }

        if let TickOutcome::Finished { session, .. } = controller.tick() {
            let _ = update_tx.send(EngineUpdate::SessionFinished { session });
            let _ = update_tx.send(EngineUpdate::PlaybackState {
                playing: false,
                session: None,
            });
        }
    }

    controller.stop();
    info!("engine stopped");
}

fn apply_command<S: Synth>(
    controller: &mut PlaybackController<S>,
    command: EngineCommand,
    update_tx: &Sender<EngineUpdate>,
) {
    match command {
        EngineCommand::EnableTrack(id) => {
            let update = if controller.enable_track(&id) {
                EngineUpdate::TrackEnabled { id, enabled: true }
            } else {
                track_error(&id, "cannot be enabled")
            };
            let _ = update_tx.send(update);
        }
        EngineCommand::DisableTrack(id) => {
            let update = if controller.disable_track(&id) {
                EngineUpdate::TrackEnabled { id, enabled: false }
            } else {
                track_error(&id, "is not loaded")
            };
            let _ = update_tx.send(update);
        }
        EngineCommand::ToggleTrack(id) => {
            let update = match controller.toggle_track(&id) {
                Some(enabled) => EngineUpdate::TrackEnabled { id, enabled },
                None => track_error(&id, "cannot be toggled"),
            };
            let _ = update_tx.send(update);
        }
        EngineCommand::SetTempo(bpm) => {
            controller.set_tempo(bpm);
            let _ = update_tx.send(EngineUpdate::TransportChanged(controller.transport()));
        }
        EngineCommand::SetTempoRatio(ratio) => {
            controller.set_tempo_ratio(ratio);
            let _ = update_tx.send(EngineUpdate::TransportChanged(controller.transport()));
        }
        EngineCommand::SetKeyShift(semitones) => {
            controller.set_key_shift(semitones);
            let _ = update_tx.send(EngineUpdate::TransportChanged(controller.transport()));
        }
        EngineCommand::SetGain(gain) => {
            controller.set_gain(gain);
            let _ = update_tx.send(EngineUpdate::TransportChanged(controller.transport()));
        }
        EngineCommand::SetLooping(looping) => {
            controller.set_looping(looping);
            info!(looping, "looping changed");
        }
        EngineCommand::Start => {
            let session = controller.start();
            let _ = update_tx.send(EngineUpdate::PlaybackState {
                playing: true,
                session: Some(session),
            });
        }
        EngineCommand::Stop => {
            if controller.stop() {
                let _ = update_tx.send(EngineUpdate::PlaybackState {
                    playing: false,
                    session: None,
                });
            }
        }
        EngineCommand::Shutdown => {}
    }
}

fn track_error(id: &str, what: &str) -> EngineUpdate {
    EngineUpdate::Error {
        message: format!("track '{id}' {what}"),
    }
}
