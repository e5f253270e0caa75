//! Running a single command line to completion.
//!
//! [`CommandExecution`] spawns the command through the configured
//! interpreter, starts a reader thread that streams the merged output into a
//! [`StreamBuffer`], and waits for the exit code. A non-zero exit code is an
//! ordinary result here; deciding what it means is up to the caller.

use std::io::{ErrorKind, Read};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use eashell_core::execution::CommandResult;

use crate::buffer::StreamBuffer;
use crate::config::ExecutionSettings;
use crate::error::{EngineError, EngineResult};
use crate::process::{self, ChildProcess};

/// One command of a script, ready to be spawned.
pub struct CommandExecution<'a> {
    command: &'a str,
    working_dir: &'a Path,
    settings: &'a ExecutionSettings,
}

/// A spawned command whose output is being streamed.
pub struct RunningCommand {
    command: String,
    process: Arc<ChildProcess>,
    reader: JoinHandle<()>,
    reader_done: mpsc::Receiver<()>,
    buffer: Arc<StreamBuffer>,
    started: Instant,
}

impl<'a> CommandExecution<'a> {
    pub fn new(command: &'a str, working_dir: &'a Path, settings: &'a ExecutionSettings) -> Self {
        Self {
            command,
            working_dir,
            settings,
        }
    }

    /// Spawn the process and its output reader.
    ///
    /// `active` is the owning execution's running flag: the reader stops
    /// once it is cleared and then treats read errors as expected.
    pub fn spawn(
        self,
        buffer: Arc<StreamBuffer>,
        active: Arc<AtomicBool>,
    ) -> EngineResult<RunningCommand> {
        let (process, pipe) =
            ChildProcess::spawn(&self.settings.interpreter, self.command, self.working_dir)?;
        let process = Arc::new(process);
        tracing::debug!(command = %self.command, pid = process.pid(), "Command spawned");

        let (done_tx, reader_done) = mpsc::sync_channel(1);
        let chunk_size = self.settings.read_chunk_size;
        let reader_buffer = Arc::clone(&buffer);
        let reader = std::thread::Builder::new()
            .name(format!("eashell-reader-{}", process.pid()))
            .spawn(move || {
                pump_output(pipe, &reader_buffer, &active, chunk_size);
                let _ = done_tx.send(());
            })
            .map_err(|e| {
                // Without a reader the child could block on a full pipe forever.
                process.terminate(self.settings.stop_timeout, self.settings.exit_poll_interval);
                EngineError::Io(e)
            })?;

        Ok(RunningCommand {
            command: self.command.to_string(),
            process,
            reader,
            reader_done,
            buffer,
            started: Instant::now(),
        })
    }

    /// Spawn and wait in one step.
    pub fn run(
        self,
        buffer: Arc<StreamBuffer>,
        active: Arc<AtomicBool>,
    ) -> EngineResult<CommandResult> {
        let settings = self.settings;
        self.spawn(buffer, active)?.wait(settings)
    }
}

impl RunningCommand {
    /// Handle used to terminate the process from another thread.
    pub fn process(&self) -> Arc<ChildProcess> {
        Arc::clone(&self.process)
    }

    /// Block until the process exits, then give the reader a bounded window
    /// to drain trailing output and flush whatever it left behind.
    pub fn wait(self, settings: &ExecutionSettings) -> EngineResult<CommandResult> {
        let status = loop {
            if let Some(status) = self.process.try_wait()? {
                break status;
            }
            self.buffer.flush_if_due();
            std::thread::sleep(settings.exit_poll_interval);
        };

        match self.reader_done.recv_timeout(settings.reader_join_timeout) {
            Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => {
                let _ = self.reader.join();
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {
                // A background process still holds the pipe open.
                tracing::debug!(
                    command = %self.command,
                    join_timeout_ms = settings.reader_join_timeout.as_millis() as u64,
                    "Output reader still busy after exit, detaching",
                );
            }
        }
        self.buffer.flush();

        let exit_code = process::exit_code(status);
        tracing::debug!(
            command = %self.command,
            exit_code,
            elapsed_ms = self.started.elapsed().as_millis() as u64,
            "Command finished",
        );
        Ok(CommandResult {
            command: self.command,
            exit_code,
        })
    }
}

/// Reader thread body: forward pipe contents into the buffer until EOF or
/// until the execution is no longer meant to be running.
fn pump_output<R: Read>(mut pipe: R, buffer: &StreamBuffer, active: &AtomicBool, chunk_size: usize) {
    let mut chunk = vec![0u8; chunk_size];
    let mut decoder = Utf8Decoder::default();

    while active.load(Ordering::SeqCst) {
        match pipe.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => buffer.append(&decoder.decode(&chunk[..n])),
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                if active.load(Ordering::SeqCst) {
                    tracing::warn!(error = %e, "Error reading command output");
                    buffer.append(&format!("\n>>> Error reading output: {e}\n"));
                } else {
                    tracing::debug!(error = %e, "Read error after stop, ignoring");
                }
                break;
            }
        }
    }

    buffer.append(&decoder.finish());
    buffer.flush();
}

/// Incremental UTF-8 decoding across read boundaries.
///
/// A multi-byte character split between two reads is held back until its
/// remaining bytes arrive; invalid sequences become U+FFFD.
#[derive(Debug, Default)]
struct Utf8Decoder {
    carry: Vec<u8>,
}

impl Utf8Decoder {
    fn decode(&mut self, bytes: &[u8]) -> String {
        self.carry.extend_from_slice(bytes);
        let mut out = String::with_capacity(self.carry.len());
        let mut rest: &[u8] = &self.carry;

        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    out.push_str(valid);
                    rest = &[];
                    break;
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    if let Ok(valid) = std::str::from_utf8(valid) {
                        out.push_str(valid);
                    }
                    match e.error_len() {
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[bad..];
                        }
                        // Incomplete sequence at the end: wait for more bytes.
                        None => {
                            rest = after;
                            break;
                        }
                    }
                }
            }
        }

        let remaining = rest.to_vec();
        self.carry = remaining;
        out
    }

    /// Flush a trailing incomplete sequence at end of stream.
    fn finish(&mut self) -> String {
        let out = String::from_utf8_lossy(&self.carry).into_owned();
        self.carry.clear();
        out
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
