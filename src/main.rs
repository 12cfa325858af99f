mod audio_device;
mod audio_engine;
mod audio_io;
mod controller;
mod error;
mod pads;
mod sample_store;
mod settings;
mod transport;

use std::io::{BufRead, Write};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::controller::EngineController;
use crate::error::EngineErrorKind;
use crate::transport::{Command, Event};

/// Event pump cadence, roughly one UI frame.
const POLL_INTERVAL: Duration = Duration::from_millis(16);

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let settings = settings::load_settings();
    // Materialize (and normalize) the settings file on first run.
    settings::save_settings(&settings);

    let (mut controller, engine) = EngineController::new(&settings);

    if let Err(err) = controller.start_audio(engine) {
        error!(%err, "failed to start audio output");
        let host_id = audio_device::select_host(settings.host_name.as_deref());
        let outputs = audio_device::get_output_devices(host_id)
            .map(|devices| {
                devices
                    .into_iter()
                    .map(|(name, _)| name)
                    .collect::<Vec<_>>()
                    .join(", ")
            })
            .unwrap_or_default();
        emit(&Event::EngineError {
            kind: EngineErrorKind::DeviceUnavailable,
            detail: format!("{err}; available outputs: [{outputs}]"),
        });
    }

    // The control surface speaks newline-delimited JSON over stdio.
    let (line_tx, line_rx) = mpsc::channel::<String>();
    thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            match line {
                Ok(line) => {
                    if line_tx.send(line).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    });

    info!("drumpad engine ready, reading commands from stdin");
    loop {
        while let Ok(line) = line_rx.try_recv() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<Command>(line) {
                Ok(command) => controller.handle_command(command),
                Err(err) => emit(&Event::EngineError {
                    kind: EngineErrorKind::InvalidCommand,
                    detail: format!("unparseable command: {err}"),
                }),
            }
        }
        for event in controller.poll_events() {
            emit(&event);
        }
        if controller.should_exit() {
            break;
        }
        thread::sleep(POLL_INTERVAL);
    }

    info!("shutdown complete");
    Ok(())
}

fn emit(event: &Event) {
    match serde_json::to_string(event) {
        Ok(json) => {
            let mut stdout = std::io::stdout().lock();
            let _ = writeln!(stdout, "{json}");
            let _ = stdout.flush();
        }
        Err(err) => error!(%err, "failed to serialize event"),
    }
}
