//! Executes decoded commands against the engine.
//!
//! Every call here may block (synthesis, `sync`), so callers run it on a
//! blocking thread. Rejections are logged and the command is dropped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use omnivox_core::{VoxEngine, VoxError};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::commands::{decode_line, Command, CommandError};

/// Whether the connection (or the process) should keep reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

pub struct Dispatcher {
    engine: Arc<VoxEngine>,
    sync_timeout: Duration,
    split_caps: AtomicBool,
    punctuation_mode: Mutex<String>,
}

impl Dispatcher {
    pub fn new(engine: Arc<VoxEngine>, sync_timeout: Duration) -> Self {
        Self {
            engine,
            sync_timeout,
            split_caps: AtomicBool::new(false),
            punctuation_mode: Mutex::new("some".into()),
        }
    }

    /// Decode and run one raw input line.
    pub fn handle_line(&self, line: &str) -> Flow {
        for decoded in decode_line(line) {
            if self.run(decoded) == Flow::Quit {
                return Flow::Quit;
            }
        }
        Flow::Continue
    }

    /// Execute a decoded command, or log why it could not be decoded.
    pub fn run(&self, decoded: Result<Command, CommandError>) -> Flow {
        match decoded {
            Ok(cmd) => self.execute(cmd),
            Err(e) => {
                warn!("{e}");
                Flow::Continue
            }
        }
    }

    pub fn execute(&self, cmd: Command) -> Flow {
        debug!(?cmd, "dispatching command");
        let outcome = match cmd {
            Command::Say(text) => self.engine.submit_text(&text).map(drop),
            Command::Letter(text) => self.engine.submit_letter(&text).map(drop),
            Command::Tone {
                frequency,
                duration_ms,
            } => self.engine.submit_tone(frequency, duration_ms).map(drop),
            Command::Silence { duration_ms } => self.engine.submit_silence(duration_ms).map(drop),
            Command::Play(path) => self.engine.submit_file(&path).map(drop),
            Command::Rate(wpm) => self.engine.set_rate(wpm),
            Command::Sync => self.engine.sync(self.sync_timeout),
            Command::Stop => {
                self.engine.stop();
                Ok(())
            }
            Command::SplitCaps(flag) => {
                self.split_caps.store(flag, Ordering::Relaxed);
                info!(split_caps = flag, "split caps set");
                Ok(())
            }
            Command::Punctuations(mode) => {
                info!(mode = mode.as_str(), "punctuation mode set");
                *self.punctuation_mode.lock() = mode;
                Ok(())
            }
            Command::Quit => {
                info!("quit requested");
                return Flow::Quit;
            }
        };

        match outcome {
            Ok(()) => {}
            Err(VoxError::QueueFull) => warn!("audio queue full, dropping request"),
            Err(e) if e.is_recoverable() => warn!("request rejected: {e}"),
            Err(e) => tracing::error!("request failed: {e}"),
        }
        Flow::Continue
    }

    pub fn split_caps(&self) -> bool {
        self.split_caps.load(Ordering::Relaxed)
    }

    pub fn punctuation_mode(&self) -> String {
        self.punctuation_mode.lock().clone()
    }
}
