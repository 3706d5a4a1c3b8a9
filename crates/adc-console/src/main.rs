mod config;
mod forms;
mod logging;
mod runtime;
mod state;
mod theme;
mod ui;

use adc_api::{ApiClient, ApiClientConfig};
use adc_core::SessionStore;
use adc_storage::CredentialVault;
use anyhow::{Context, Result};
use clap::Parser;
use config::{Args, ConsoleConfig};
use crossterm::{
    event::{DisableMouseCapture, EnableMouseCapture, Event, EventStream, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use futures_util::StreamExt;
use ratatui::{backend::CrosstermBackend, Terminal};
use runtime::Runtime;
use state::{App, AppEvent};
use std::{io, path::Path, time::Duration};
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tracing::{error, info, warn};

const TICK_MS: u64 = 250;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = ConsoleConfig::load(&args).context("invalid configuration")?;
    let log_path = logging::init_logging(&config);
    info!(
        event = "console_starting",
        api = %config.api_base_url,
        config = %config.config_path.display(),
        log = ?log_path
    );

    let session = open_session_store(&config);
    let api = ApiClient::new(
        ApiClientConfig::new(config.api_base_url.clone()).with_timeout(config.request_timeout_secs),
    )
    .context("failed to build http client")?;

    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let mut runtime = Runtime::new(api, event_tx.clone(), config.idle_timeout_minutes);
    let mut app = App::new(config, session, event_tx);
    app.start();

    let mut terminal = setup_terminal()?;
    let result = run_app(&mut terminal, &mut app, &mut runtime, event_rx).await;
    runtime.shutdown();
    restore_terminal(&mut terminal)?;

    if let Err(err) = result {
        eprintln!("adc-console: {err}");
    }
    info!(event = "console_stopped");
    Ok(())
}

/// The vault is optional: when it cannot be opened the session lives in memory
/// and any credential left in the file is purged.
fn open_session_store(config: &ConsoleConfig) -> SessionStore {
    if !config.remember_session {
        return SessionStore::in_memory();
    }
    let path = config.vault_path();
    if let Some(parent) = path.parent() {
        if let Err(err) = std::fs::create_dir_all(parent) {
            warn!(event = "vault_dir_unavailable", path = %parent.display(), error = %err);
            return SessionStore::in_memory();
        }
    }
    let vault = match CredentialVault::open(&path) {
        Ok(vault) => vault,
        Err(err) => {
            warn!(event = "vault_open_failed", path = %path.display(), error = %err);
            purge_vault(&path);
            return SessionStore::in_memory();
        }
    };
    match SessionStore::with_backend(Box::new(vault)) {
        Ok(store) => store,
        Err(err) => {
            warn!(event = "vault_load_failed", error = %err);
            purge_vault(&path);
            SessionStore::in_memory()
        }
    }
}

fn purge_vault(path: &Path) {
    match CredentialVault::purge(path) {
        Ok(true) => info!(event = "vault_purged", path = %path.display()),
        Ok(false) => {}
        Err(err) => error!(event = "vault_purge_failed", path = %path.display(), error = %err),
    }
}

fn setup_terminal() -> Result<Terminal<CrosstermBackend<io::Stdout>>> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;
    terminal.clear()?;
    Ok(terminal)
}

fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<io::Stdout>>) -> Result<()> {
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;
    Ok(())
}

async fn run_app(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut App,
    runtime: &mut Runtime,
    mut event_rx: UnboundedReceiver<AppEvent>,
) -> Result<()> {
    let mut events = EventStream::new();
    let mut ticker = tokio::time::interval(Duration::from_millis(TICK_MS));

    loop {
        for effect in app.take_effects() {
            runtime.execute(effect, app.session());
        }
        if app.should_quit() {
            break;
        }

        terminal.draw(|frame| ui::render(frame, app))?;
        tokio::select! {
            _ = ticker.tick() => {
                app.on_tick();
            }
            Some(event) = event_rx.recv() => {
                app.handle_event(event);
            }
            maybe_event = events.next() => {
                match maybe_event {
                    Some(Ok(event)) => handle_input(event, app, runtime),
                    Some(Err(err)) => return Err(err.into()),
                    None => break,
                }
            }
        }
    }

    Ok(())
}

fn handle_input(event: Event, app: &mut App, runtime: &Runtime) {
    if app.is_shell_mounted() {
        runtime.notify_activity(&event);
    }
    if let Event::Key(key) = event {
        if matches!(key.kind, KeyEventKind::Press | KeyEventKind::Repeat) {
            app.handle_key(key);
        }
    }
}
