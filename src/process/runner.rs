//! External process runner - launches one command and streams its output as lines

use crate::core::{HarnessError, LineBus};
use std::collections::BTreeMap;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// How long reader tasks may keep draining after a proactive termination.
/// Grandchildren that inherited the pipes can hold them open past the kill.
const READER_DRAIN_GRACE: Duration = Duration::from_secs(1);

/// How long a process may take to honor SIGTERM before it is killed
const TERMINATE_GRACE: Duration = Duration::from_secs(3);

/// Launch progress of a runner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerPhase {
    /// Not launched yet
    Idle,
    /// Process launched, or readers still draining
    Running,
    /// Process exited and both readers joined (or the launch was skipped)
    Exited,
}

/// Runs one external process and publishes every output line
///
/// stdout and stderr lines go to their own buses; both buses are piped into the
/// combined `output` bus at construction.
#[derive(Debug)]
pub struct ProcessRunner {
    /// Executable followed by its arguments
    command: Vec<String>,

    /// Environment overrides applied on top of the inherited environment
    environment: BTreeMap<String, String>,

    stdout: LineBus,
    stderr: LineBus,
    output: LineBus,

    phase: watch::Sender<RunnerPhase>,
    /// Set once by `terminate`; the launch, the kill and the reader drain all observe it
    terminated: watch::Sender<bool>,
    kill_attempts: AtomicUsize,
    exit_code: Mutex<Option<i32>>,
}

impl ProcessRunner {
    /// Create a runner
    ///
    /// # Arguments
    /// * `command` - Executable and arguments, in order
    /// * `environment` - Variables to set for the child, already merged with the
    ///   inherited values (see `Configuration::child_environment`)
    pub fn new(command: Vec<String>, environment: BTreeMap<String, String>) -> Self {
        let stdout = LineBus::new();
        let stderr = LineBus::new();
        let output = LineBus::new();
        stdout.pipe(&output);
        stderr.pipe(&output);

        let (phase, _) = watch::channel(RunnerPhase::Idle);
        let (terminated, _) = watch::channel(false);

        Self {
            command,
            environment,
            stdout,
            stderr,
            output,
            phase,
            terminated,
            kill_attempts: AtomicUsize::new(0),
            exit_code: Mutex::new(None),
        }
    }

    /// Lines written to stdout
    pub fn stdout(&self) -> &LineBus {
        &self.stdout
    }

    /// Lines written to stderr
    pub fn stderr(&self) -> &LineBus {
        &self.stderr
    }

    /// Lines from either stream
    pub fn output(&self) -> &LineBus {
        &self.output
    }

    pub fn command(&self) -> &[String] {
        &self.command
    }

    /// The command as a single printable line
    pub fn display_command(&self) -> String {
        self.command.join(" ")
    }

    pub fn phase(&self) -> RunnerPhase {
        *self.phase.borrow()
    }

    /// Exit code once the process has exited; `None` while running, if the launch
    /// was skipped, or if the process was killed by a signal
    pub fn exit_code(&self) -> Option<i32> {
        *self
            .exit_code
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn was_terminated_proactively(&self) -> bool {
        *self.terminated.borrow()
    }

    /// Number of times a running process was actually signalled to stop (never
    /// more than one; escalating to a kill is part of the same attempt)
    pub fn kill_attempts(&self) -> usize {
        self.kill_attempts.load(Ordering::SeqCst)
    }

    /// Launch the process and wait for it to exit and for its output to drain
    ///
    /// # Errors
    /// Returns `HarnessError` if:
    /// - the runner was already launched (`ComponentAlreadyStarted`)
    /// - the executable cannot be spawned (`SpawnFailed`)
    /// - the process exits non-zero without a prior `terminate()` (`ProcessExitNonZero`)
    /// - reading an output stream fails without a prior `terminate()` (`StreamReadError`)
    pub async fn run(&self) -> Result<(), HarnessError> {
        let command_line = self.display_command();

        let claimed = self.phase.send_if_modified(|phase| {
            if *phase == RunnerPhase::Idle {
                *phase = RunnerPhase::Running;
                true
            } else {
                false
            }
        });
        if !claimed {
            return Err(HarnessError::ComponentAlreadyStarted(command_line));
        }
        let _exited = ExitOnDrop(&self.phase);

        if self.was_terminated_proactively() {
            info!("Not launching '{}': terminated before launch", command_line);
            return Ok(());
        }

        let program = self.command.first().ok_or_else(|| HarnessError::SpawnFailed {
            command: command_line.clone(),
            message: "empty command".to_string(),
        })?;

        info!("Starting command: {}", command_line);
        for (key, value) in &self.environment {
            debug!("Setting environment: {}={}", key, value);
        }

        let mut child = Command::new(program)
            .args(&self.command[1..])
            .envs(&self.environment)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| HarnessError::SpawnFailed {
                command: command_line.clone(),
                message: e.to_string(),
            })?;

        let readers: Vec<JoinHandle<Result<(), HarnessError>>> = [
            child
                .stdout
                .take()
                .map(|stream| self.spawn_reader(stream, "stdout", self.stdout.clone())),
            child
                .stderr
                .take()
                .map(|stream| self.spawn_reader(stream, "stderr", self.stderr.clone())),
        ]
        .into_iter()
        .flatten()
        .collect();

        let waited = tokio::select! {
            status = child.wait() => status,
            _ = termination_requested(self.terminated.subscribe()) => {
                self.stop(&mut child, &command_line).await
            }
        };
        let status = waited.map_err(|e| HarnessError::SpawnFailed {
            command: command_line.clone(),
            message: format!("failed to wait for process: {}", e),
        })?;

        let read_error = self.join_readers(readers, &command_line).await;

        let code = status.code();
        *self
            .exit_code
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = code;

        let proactive = self.was_terminated_proactively();
        let exit = HarnessError::ProcessExitNonZero {
            command: command_line.clone(),
            code,
        };
        if !status.success() && !proactive {
            warn!("{}", exit);
            return Err(exit);
        }
        info!("{}", exit);

        match read_error {
            Some(error) if !proactive => Err(error),
            _ => Ok(()),
        }
    }

    /// Request termination; safe to call at any time, any number of times
    ///
    /// A running process receives SIGTERM (a kill on platforms without signals)
    /// and is killed if it is still alive after a grace period. A request that
    /// arrives before the launch prevents the launch.
    pub fn terminate(&self) {
        self.terminated.send_if_modified(|terminated| {
            if *terminated {
                return false;
            }
            *terminated = true;
            true
        });
    }

    /// Wait until the process has exited and its output has drained
    ///
    /// Returns immediately if the runner was never launched.
    pub async fn wait(&self) {
        let mut phase = self.phase.subscribe();
        let _ = phase
            .wait_for(|phase| *phase != RunnerPhase::Running)
            .await;
    }

    /// Ask the child to stop, escalating to a kill once `TERMINATE_GRACE` elapses
    async fn stop(&self, child: &mut Child, command_line: &str) -> std::io::Result<ExitStatus> {
        self.kill_attempts.fetch_add(1, Ordering::SeqCst);

        if send_terminate(child, command_line) {
            match tokio::time::timeout(TERMINATE_GRACE, child.wait()).await {
                Ok(status) => return status,
                Err(_) => warn!(
                    "'{}' still running {:?} after SIGTERM, killing",
                    command_line, TERMINATE_GRACE
                ),
            }
        }

        if let Err(e) = child.start_kill() {
            // Already exited between the request and the kill
            debug!("Kill of '{}' failed: {}", command_line, e);
        }
        child.wait().await
    }

    fn spawn_reader<R>(
        &self,
        stream: R,
        name: &'static str,
        bus: LineBus,
    ) -> JoinHandle<Result<(), HarnessError>>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let command = self.display_command();
        let terminated = self.terminated.subscribe();

        tokio::spawn(async move {
            let mut reader = BufReader::new(stream);
            let mut buf = Vec::new();
            loop {
                buf.clear();
                match reader.read_until(b'\n', &mut buf).await {
                    Ok(0) => return Ok(()),
                    Ok(_) => bus.publish(decode_line(&buf)),
                    Err(e) => {
                        if *terminated.borrow() {
                            debug!("{} closed for '{}' after termination: {}", name, command, e);
                            return Ok(());
                        }
                        return Err(HarnessError::StreamReadError {
                            command,
                            stream: name.to_string(),
                            message: e.to_string(),
                        });
                    }
                }
            }
        })
    }

    /// Join both readers, returning the first read error
    ///
    /// Once termination is requested, whether before or during the join, the
    /// readers share one `READER_DRAIN_GRACE` window and are abandoned after it.
    async fn join_readers(
        &self,
        readers: Vec<JoinHandle<Result<(), HarnessError>>>,
        command_line: &str,
    ) -> Option<HarnessError> {
        let mut drain_deadline: Option<Instant> = None;
        let mut first_error = None;
        for mut reader in readers {
            let joined = tokio::select! {
                joined = &mut reader => joined,
                _ = termination_requested(self.terminated.subscribe()) => {
                    let deadline = *drain_deadline
                        .get_or_insert_with(|| Instant::now() + READER_DRAIN_GRACE);
                    match tokio::time::timeout_at(deadline, &mut reader).await {
                        Ok(joined) => joined,
                        Err(_) => {
                            debug!(
                                "Output of '{}' still open after termination, abandoning",
                                command_line
                            );
                            reader.abort();
                            reader.await
                        }
                    }
                }
            };

            match joined {
                Ok(Ok(())) => {}
                Ok(Err(error)) => {
                    first_error.get_or_insert(error);
                }
                Err(e) if e.is_cancelled() => {}
                Err(e) => {
                    first_error.get_or_insert(HarnessError::StreamReadError {
                        command: command_line.to_string(),
                        stream: "output".to_string(),
                        message: e.to_string(),
                    });
                }
            }
        }
        first_error
    }
}

/// Resolve once `terminate` has been called
async fn termination_requested(mut terminated: watch::Receiver<bool>) {
    let _ = terminated.wait_for(|requested| *requested).await;
}

/// Send SIGTERM; false if no signal could be delivered
#[cfg(unix)]
fn send_terminate(child: &Child, command_line: &str) -> bool {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Some(pid) = child.id() else {
        return false;
    };
    debug!("Sending SIGTERM to '{}' (pid {})", command_line, pid);
    match kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
        Ok(()) => true,
        Err(e) => {
            debug!("SIGTERM to '{}' failed: {}", command_line, e);
            false
        }
    }
}

#[cfg(not(unix))]
fn send_terminate(_child: &Child, _command_line: &str) -> bool {
    false
}

/// Marks the runner as exited when `run` returns or its future is dropped
struct ExitOnDrop<'a>(&'a watch::Sender<RunnerPhase>);

impl Drop for ExitOnDrop<'_> {
    fn drop(&mut self) {
        self.0.send_replace(RunnerPhase::Exited);
    }
}

/// Decode one raw line, dropping the line terminator
fn decode_line(raw: &[u8]) -> String {
    let mut end = raw.len();
    if end > 0 && raw[end - 1] == b'\n' {
        end -= 1;
    }
    if end > 0 && raw[end - 1] == b'\r' {
        end -= 1;
    }
    String::from_utf8_lossy(&raw[..end]).into_owned()
}
