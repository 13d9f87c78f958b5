//! Persistent worker loop.
//!
//! Reads one JSON command per line, handles it to completion, writes the
//! tagged response line(s), then reads the next. Only a failed startup load
//! ends the process with an error; every per-command failure becomes a
//! response and the loop keeps going.

use std::io::{BufRead, Write};
use std::panic::{self, AssertUnwindSafe};

use log::{debug, error, info, warn};

use super::ipc_types::{Command, ResponseLine};
use crate::detector::DetectorLoader;
use crate::error::{WorkerError, WorkerResult};
use crate::model_manager::ModelManager;
use crate::predict::predict_response;

pub const STARTUP_MESSAGE: &str = "Loading YOLO detection model...";
pub const SHUTDOWN_MESSAGE: &str = "Shutting down inference server...";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Starting,
    Ready,
    Processing,
    ShuttingDown,
    Terminated,
}

/// Why `serve` returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    Shutdown,
    EndOfInput,
}

enum Flow {
    Continue,
    Stop,
}

pub struct CommandLoop<L: DetectorLoader> {
    manager: ModelManager<L>,
    output_suffix: String,
    state: LoopState,
}

impl<L: DetectorLoader> CommandLoop<L> {
    pub fn new(manager: ModelManager<L>, output_suffix: impl Into<String>) -> Self {
        Self {
            manager,
            output_suffix: output_suffix.into(),
            state: LoopState::Starting,
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn manager(&self) -> &ModelManager<L> {
        &self.manager
    }

    fn transition(&mut self, next: LoopState) {
        if self.state != next {
            debug!("Worker state {:?} -> {next:?}", self.state);
            self.state = next;
        }
    }

    /// Startup then serve until shutdown or end of input.
    pub fn run<R: BufRead, W: Write>(&mut self, input: R, out: &mut W) -> WorkerResult<ExitReason> {
        self.start(out)?;
        self.serve(input, out)
    }

    /// Eager load of the default model. Failure here is fatal.
    pub fn start<W: Write>(&mut self, out: &mut W) -> WorkerResult<()> {
        self.transition(LoopState::Starting);
        write_line(out, &ResponseLine::Plain(STARTUP_MESSAGE.to_string()))?;

        match self.manager.ensure_loaded(None) {
            Ok(handle) => {
                info!("Startup model ready: {}", handle.source);
                write_line(out, &ResponseLine::Ready("Model loaded successfully".to_string()))?;
                self.transition(LoopState::Ready);
                Ok(())
            }
            Err(e) => {
                error!("Startup load failed: {e}");
                write_line(out, &ResponseLine::Error(e.to_string()))?;
                self.transition(LoopState::Terminated);
                Err(WorkerError::StartupLoad(e.to_string()))
            }
        }
    }

    /// Process commands until `shutdown` or end of input. Returns an error
    /// only when the response stream itself can no longer be read or written.
    pub fn serve<R: BufRead, W: Write>(&mut self, mut input: R, out: &mut W) -> WorkerResult<ExitReason> {
        let mut buf = Vec::new();
        loop {
            buf.clear();
            if input.read_until(b'\n', &mut buf)? == 0 {
                info!("Input closed, exiting");
                self.transition(LoopState::Terminated);
                return Ok(ExitReason::EndOfInput);
            }

            let line = String::from_utf8_lossy(&buf);
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            self.transition(LoopState::Processing);
            match self.handle_line(line, out)? {
                Flow::Continue => self.transition(LoopState::Ready),
                Flow::Stop => {
                    self.transition(LoopState::Terminated);
                    return Ok(ExitReason::Shutdown);
                }
            }
        }
    }

    fn handle_line<W: Write>(&mut self, line: &str, out: &mut W) -> WorkerResult<Flow> {
        let command = match Command::decode(line) {
            Ok(command) => command,
            Err(e) => {
                warn!("{e}");
                write_line(out, &ResponseLine::Error("Invalid JSON command".to_string()))?;
                return Ok(Flow::Continue);
            }
        };

        let (response, flow) =
            match panic::catch_unwind(AssertUnwindSafe(|| self.dispatch(command))) {
                Ok(outcome) => outcome,
                Err(panic_info) => {
                    let msg = panic_message(panic_info.as_ref());
                    error!("Command handler panicked: {msg}");
                    self.manager.reclaim();
                    (ResponseLine::Error(format!("Internal error: {msg}")), Flow::Continue)
                }
            };

        write_line(out, &response)?;
        Ok(flow)
    }

    fn dispatch(&mut self, command: Command) -> (ResponseLine, Flow) {
        match command {
            Command::Predict(request) => {
                let response = predict_response(&mut self.manager, &request, &self.output_suffix);
                (ResponseLine::Result(response), Flow::Continue)
            }
            Command::Reload { model_path } => {
                let line = match self.manager.ensure_loaded(model_path.as_deref()) {
                    Ok(handle) => {
                        info!("Reload complete, resident model: {}", handle.source);
                        ResponseLine::Ready("Model reloaded".to_string())
                    }
                    Err(e) => {
                        warn!("Reload failed: {e}");
                        ResponseLine::Error(e.to_string())
                    }
                };
                (line, Flow::Continue)
            }
            Command::Shutdown => {
                info!("Shutdown requested");
                self.transition(LoopState::ShuttingDown);
                (ResponseLine::Plain(SHUTDOWN_MESSAGE.to_string()), Flow::Stop)
            }
            Command::Unknown(action) => {
                let err = WorkerError::UnknownAction(action.unwrap_or_else(|| "<missing>".to_string()));
                warn!("{err}");
                (ResponseLine::Error(err.to_string()), Flow::Continue)
            }
        }
    }
}

fn panic_message(panic_info: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic_info.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic_info.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Write one response line and flush so the caller sees it immediately.
pub fn write_line<W: Write>(out: &mut W, line: &ResponseLine) -> WorkerResult<()> {
    writeln!(out, "{line}")?;
    out.flush()?;
    Ok(())
}
