//! runhub: supervise a set of shell commands from a terminal dashboard.
//!
//! This is the entry point of the application. It parses command-line arguments,
//! loads configuration, starts every command and runs the single control loop
//! that serializes keyboard input, process completions and redraws.

mod app;
mod config;
mod events;
mod logging;
mod output;
mod process;
mod tui;
mod view;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::app::Supervisor;
use crate::events::Event;

const EVENT_QUEUE_CAPACITY: usize = 256;
const TICK_RATE: Duration = Duration::from_millis(150);

/// Command-line interface definition.
#[derive(Debug, Parser)]
#[command(name = "runhub", version, about = "Run and watch a set of commands in one terminal")]
struct Cli {
    /// Path to the runhub.toml configuration file.
    #[arg(long)]
    config: Option<PathBuf>,
    /// End the session as soon as any command fails.
    #[arg(long)]
    exit_on_completion: bool,
    /// Write diagnostic logs to this file.
    #[arg(long)]
    log_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(config::DEFAULT_CONFIG_PATH));
    let config = config::load_config(&config_path)?;
    let specs = config.process_specs()?;
    let exit_on_completion = cli.exit_on_completion || config.exit_on_completion;

    if let Some(path) = cli.log_file.as_ref().or(config.log_file.as_ref()) {
        logging::init_file_logging(path)?;
    }

    let (event_tx, mut event_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
    let mut supervisor = Supervisor::new(specs, exit_on_completion, event_tx.clone());
    info!(
        config = %config_path.display(),
        commands = supervisor.handles().len(),
        exit_on_completion,
        "starting"
    );
    supervisor.start_all().await;

    let mut terminal = tui::init_terminal().context("failed to initialize terminal")?;
    if let Ok(size) = terminal.size() {
        supervisor.resize(size.width, size.height);
    }
    spawn_input_listener(event_tx.clone());
    spawn_signal_listener(event_tx);

    let mut ticker = tokio::time::interval(TICK_RATE);
    let mut result = Ok(());

    loop {
        tokio::select! {
            Some(event) = event_rx.recv() => {
                supervisor.handle_event(event).await;
            }
            _ = ticker.tick() => {}
        }

        supervisor.reorder().await;
        let view = supervisor.view().await;
        if let Err(err) = tui::draw(&view, &mut terminal) {
            result = Err(err).context("failed to draw dashboard");
            break;
        }

        if supervisor.quit_requested() {
            break;
        }
    }

    tui::restore_terminal(terminal).context("failed to restore terminal")?;
    if let Some(report) = supervisor.final_report() {
        println!("{}", report);
    }
    debug!("dashboard closed");
    result
}

fn spawn_input_listener(tx: mpsc::Sender<Event>) {
    std::thread::spawn(move || loop {
        if crossterm::event::poll(Duration::from_millis(100)).unwrap_or(false) {
            let event = match crossterm::event::read() {
                Ok(crossterm::event::Event::Key(key)) => Event::Key(key),
                Ok(crossterm::event::Event::Mouse(mouse)) => Event::Mouse(mouse),
                Ok(crossterm::event::Event::Resize(width, height)) => Event::Resize { width, height },
                _ => continue,
            };
            if tx.blocking_send(event).is_err() {
                break;
            }
        }
    });
}

fn spawn_signal_listener(tx: mpsc::Sender<Event>) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut sigterm = match signal(SignalKind::terminate()) {
                Ok(signal) => signal,
                Err(_) => return,
            };
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
        }
        let _ = tx.send(Event::Shutdown).await;
    });
}
