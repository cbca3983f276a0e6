//! Command execution worker: run a shell command on a background thread and stream its
//! combined stdout/stderr line by line.
//!
//! Commands go through the host shell unfiltered; the user is trusted with their own machine.

use std::io::{BufRead, BufReader, Read};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc;
use std::time::Duration;

use crate::cancel::CancelToken;

/// Ollama lifecycle commands offered in the command palette.
pub const OLLAMA_COMMANDS: &[&str] = &[
    "ollama serve",
    "ollama create",
    "ollama show",
    "ollama run",
    "ollama stop",
    "ollama pull",
    "ollama push",
    "ollama signin",
    "ollama signout",
    "ollama list",
    "ollama ps",
    "ollama cp",
    "ollama rm",
    "ollama help",
    "systemctl restart ollama",
    "systemctl stop ollama",
    "systemctl start ollama",
];

/// How often a silent command re-checks its stop flag.
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Event from a command worker, in output order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandEvent {
    /// One line of output (newline stripped), or a diagnostic if the command failed to run.
    Line(String),
    /// The command was killed on request; no further lines follow.
    Stopped,
    /// Always last.
    Finished,
}

/// Controller-side handle to a running command.
pub struct CommandHandle {
    command: String,
    stop: CancelToken,
    events: mpsc::Receiver<CommandEvent>,
}

/// Spawn `command` through the host shell on a new thread.
pub fn spawn_command(command: impl Into<String>) -> CommandHandle {
    let command = command.into();
    let stop = CancelToken::new();
    let (tx, rx) = mpsc::channel();
    let worker_command = command.clone();
    let worker_stop = stop.clone();
    std::thread::spawn(move || {
        if let Err(e) = run_command(&worker_command, &worker_stop, &tx) {
            log::warn!("command `{}` failed: {}", worker_command, e);
            let _ = tx.send(CommandEvent::Line(format!(
                "Error running command `{}`: {}",
                worker_command, e
            )));
        }
        let _ = tx.send(CommandEvent::Finished);
    });
    CommandHandle {
        command,
        stop,
        events: rx,
    }
}

impl CommandHandle {
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Ask the worker to kill the command before its next line.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    /// Next event if one is ready; never blocks.
    pub fn try_next(&self) -> Option<CommandEvent> {
        self.events.try_recv().ok()
    }

    /// Block up to `timeout` for the next event.
    pub fn next_timeout(&self, timeout: Duration) -> Option<CommandEvent> {
        self.events.recv_timeout(timeout).ok()
    }
}

/// Host shell invocation for a command string.
fn shell_command(command: &str) -> Command {
    if cfg!(windows) {
        let mut c = Command::new("cmd");
        c.args(["/C", command]);
        c
    } else {
        let mut c = Command::new("sh");
        c.args(["-c", command]);
        c
    }
}

fn run_command(
    command: &str,
    stop: &CancelToken,
    tx: &mpsc::Sender<CommandEvent>,
) -> std::io::Result<()> {
    // Both streams share one pipe so lines keep the order the command wrote them in.
    let (reader, writer) = std::io::pipe()?;
    let writer_err = writer.try_clone()?;
    let mut cmd = shell_command(command);
    cmd.stdin(Stdio::null())
        .stdout(Stdio::from(writer))
        .stderr(Stdio::from(writer_err));
    let spawned = cmd.spawn();
    // Drop the parent's write ends, or the reader never sees end of file.
    drop(cmd);
    let mut child = spawned?;
    log::info!("started command `{}` (pid {})", command, child.id());

    let (line_tx, line_rx) = mpsc::channel::<std::io::Result<String>>();
    forward_lines(reader, line_tx);

    let outcome = pump_lines(&mut child, &line_rx, stop, tx);
    let status = child.wait();
    outcome?;
    let status = status?;
    log::info!("command `{}` exited with {}", command, status);
    Ok(())
}

/// Relay output until the pipe closes, the stop flag is set, or a read fails.
fn pump_lines(
    child: &mut Child,
    lines: &mpsc::Receiver<std::io::Result<String>>,
    stop: &CancelToken,
    tx: &mpsc::Sender<CommandEvent>,
) -> std::io::Result<()> {
    loop {
        match lines.recv_timeout(STOP_POLL_INTERVAL) {
            Ok(Ok(line)) => {
                if stop.is_cancelled() {
                    return kill(child, tx);
                }
                let _ = tx.send(CommandEvent::Line(line));
            }
            Ok(Err(e)) => {
                let _ = child.kill();
                return Err(e);
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {
                if stop.is_cancelled() {
                    return kill(child, tx);
                }
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => return Ok(()),
        }
    }
}

fn kill(child: &mut Child, tx: &mpsc::Sender<CommandEvent>) -> std::io::Result<()> {
    if let Err(e) = child.kill() {
        // Already exited between the last line and the stop request.
        log::debug!("kill pid {}: {}", child.id(), e);
    }
    let _ = tx.send(CommandEvent::Stopped);
    Ok(())
}

/// Read `pipe` line by line on its own thread, forwarding each line without its terminator.
fn forward_lines<R: Read + Send + 'static>(pipe: R, tx: mpsc::Sender<std::io::Result<String>>) {
    std::thread::spawn(move || {
        let mut reader = BufReader::new(pipe);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf);
                    let line = line.trim_end_matches(['\n', '\r']).to_string();
                    if tx.send(Ok(line)).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    let _ = tx.send(Err(e));
                    break;
                }
            }
        }
    });
}
