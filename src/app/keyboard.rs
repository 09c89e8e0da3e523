use super::types::{ShutdownReason, ShutdownTrigger};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use std::io::IsTerminal;
use std::time::Duration;
use tokio::task::{self, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// What a key press asks for
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum KeyAction {
    Shutdown(ShutdownReason),
    Ignore,
}

/// Map a key press to an action. Raw mode swallows the terminal's SIGINT,
/// so Ctrl+C arrives here as a key.
pub(crate) fn classify_key(key: &KeyEvent) -> KeyAction {
    if key.kind != KeyEventKind::Press {
        return KeyAction::Ignore;
    }

    match key.code {
        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
            KeyAction::Shutdown(ShutdownReason::Signal("SIGINT".to_string()))
        }
        KeyCode::Char('q') | KeyCode::Esc => KeyAction::Shutdown(ShutdownReason::UserRequest),
        _ => KeyAction::Ignore,
    }
}

/// Stops the application when q or Esc is pressed on the controlling terminal
pub struct KeyboardShutdown {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl KeyboardShutdown {
    /// Start listening for keys. Fails when stdin is not a terminal.
    pub fn start(trigger: ShutdownTrigger) -> std::io::Result<Self> {
        if !std::io::stdin().is_terminal() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::Unsupported,
                "stdin is not a terminal",
            ));
        }

        info!("Keyboard stop enabled - press q or Esc to shut down");

        let cancel = CancellationToken::new();
        let token = cancel.clone();

        // Spawn a blocking task to handle keyboard input
        let task = task::spawn_blocking(move || {
            if let Err(e) = enable_raw_mode() {
                error!("Failed to enable raw mode for keyboard input: {}", e);
                return;
            }

            while !token.is_cancelled() {
                match event::poll(Duration::from_millis(100)) {
                    Ok(true) => {
                        if let Ok(Event::Key(key)) = event::read() {
                            match classify_key(&key) {
                                KeyAction::Shutdown(reason) => {
                                    info!("Shutdown requested from keyboard ({:?})", reason);
                                    trigger.fire(reason);
                                    break;
                                }
                                KeyAction::Ignore => debug!("Key pressed: {:?}", key.code),
                            }
                        }
                    }
                    Ok(false) => {}
                    Err(e) => {
                        warn!("Error polling for keyboard events: {}", e);
                    }
                }
            }

            if let Err(e) = disable_raw_mode() {
                error!("Failed to disable raw mode: {}", e);
            }
            debug!("Keyboard handler task exited");
        });

        Ok(Self { cancel, task })
    }

    /// Stop listening and restore the terminal
    pub async fn stop(self) {
        self.cancel.cancel();

        if tokio::time::timeout(Duration::from_millis(500), self.task)
            .await
            .is_err()
        {
            warn!("Keyboard handler did not exit in time");
        }

        // raw mode must not outlive the process
        let _ = disable_raw_mode();
    }
}
