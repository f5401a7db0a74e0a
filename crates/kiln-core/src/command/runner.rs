use std::io;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Mutex;
use std::time::Duration;

use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;

use crate::command::cancel::CancelSignal;
use crate::command::error::CommandError;
use crate::command::sink::{OutputSink, OutputTail, Stream};
use crate::kernel::constants::DEFAULT_TAIL_LINES;

/// How long output is still read once the child itself has exited
const OUTPUT_DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Description of one child process invocation
#[derive(Debug, Clone)]
pub struct CommandSpec {
    program: String,
    args: Vec<String>,
    env: Vec<(String, String)>,
    cwd: Option<PathBuf>,
    timeout: Option<Duration>,
    tail_lines: usize,
    label: Option<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            cwd: None,
            timeout: None,
            tail_lines: DEFAULT_TAIL_LINES,
            label: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Add an environment variable on top of the inherited environment
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env.extend(vars.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Number of lines per stream kept for diagnostics
    pub fn tail_lines(mut self, lines: usize) -> Self {
        self.tail_lines = lines;
        self
    }

    /// Short name used in logs and error messages instead of the program name
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn get_env(&self) -> &[(String, String)] {
        &self.env
    }

    pub fn get_timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn get_label(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.program)
    }

    /// Shell-like rendering for logs and dry-run output
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// What a finished (or killed) child left behind
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// `None` when the child was killed by a signal or timed out
    pub exit_code: Option<i32>,
    /// Tail of standard output
    pub stdout: String,
    /// Tail of standard error
    pub stderr: String,
    pub timed_out: bool,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }

    /// Output tail suitable for an error report
    pub fn diagnostics(&self) -> String {
        let mut out = String::new();
        if !self.stderr.is_empty() {
            out.push_str("--- stderr (tail) ---\n");
            out.push_str(&self.stderr);
        }
        if !self.stdout.is_empty() {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str("--- stdout (tail) ---\n");
            out.push_str(&self.stdout);
        }
        out
    }
}

enum Outcome {
    Exited(io::Result<ExitStatus>),
    TimedOut,
    Cancelled,
}

/// Runs external programs with streamed output, timeouts and cancellation.
///
/// Every child is placed in its own process group so a timeout or a fired
/// [`CancelSignal`] takes down the whole tree it started.
#[derive(Debug, Clone, Default)]
pub struct CommandRunner {
    cancel: CancelSignal,
}

impl CommandRunner {
    pub fn new(cancel: CancelSignal) -> Self {
        Self { cancel }
    }

    /// Locate `program` on `PATH`
    pub fn probe(program: &str) -> Option<PathBuf> {
        which::which(program).ok()
    }

    /// Run `spec` to completion. A non-zero exit is returned as `Ok`.
    pub async fn run(&self, spec: &CommandSpec, sink: &dyn OutputSink) -> Result<CommandOutput, CommandError> {
        if self.cancel.is_cancelled() {
            return Err(CommandError::Interrupted { program: spec.program.clone() });
        }

        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true);
        if let Some(dir) = &spec.cwd {
            command.current_dir(dir);
        }

        log::debug!("Running [{}]: {}", spec.get_label(), spec.display());
        let mut child = command.spawn().map_err(|source| spawn_error(spec, source))?;
        let pid = child.id();

        let stdout_tail = Mutex::new(OutputTail::new(spec.tail_lines));
        let stderr_tail = Mutex::new(OutputTail::new(spec.tail_lines));

        let outcome = {
            let stdout = child.stdout.take();
            let stderr = child.stderr.take();
            let work = async {
                let pumps = async {
                    tokio::join!(
                        pump(stdout, Stream::Stdout, sink, &stdout_tail),
                        pump(stderr, Stream::Stderr, sink, &stderr_tail),
                    );
                };
                tokio::pin!(pumps);
                let wait = child.wait();
                tokio::pin!(wait);

                let mut drained = false;
                let status = loop {
                    tokio::select! {
                        status = &mut wait => break status,
                        _ = &mut pumps, if !drained => drained = true,
                    }
                };
                // A detached grandchild may hold the pipes open long after the child exited
                if !drained && tokio::time::timeout(OUTPUT_DRAIN_GRACE, &mut pumps).await.is_err() {
                    log::debug!("[{}] output still open after exit, no longer reading it", spec.get_label());
                }
                status
            };
            let deadline = async {
                match spec.timeout {
                    Some(limit) => tokio::time::sleep(limit).await,
                    None => std::future::pending::<()>().await,
                }
            };
            tokio::select! {
                status = work => Outcome::Exited(status),
                _ = deadline => Outcome::TimedOut,
                _ = self.cancel.cancelled() => Outcome::Cancelled,
            }
        };

        let (exit_code, timed_out) = match outcome {
            Outcome::Exited(status) => {
                let status = status.map_err(|source| CommandError::Wait { program: spec.program.clone(), source })?;
                (status.code(), false)
            }
            Outcome::Cancelled => {
                terminate(pid, &mut child).await;
                log::warn!("Interrupted [{}], child process group killed", spec.get_label());
                return Err(CommandError::Interrupted { program: spec.program.clone() });
            }
            Outcome::TimedOut => {
                terminate(pid, &mut child).await;
                log::warn!(
                    "[{}] timed out after {:?}, child process group killed",
                    spec.get_label(),
                    spec.timeout.unwrap_or_default()
                );
                (None, true)
            }
        };

        let output = CommandOutput {
            exit_code,
            stdout: take_tail(&stdout_tail),
            stderr: take_tail(&stderr_tail),
            timed_out,
        };
        log::debug!("[{}] finished with exit code {:?}", spec.get_label(), output.exit_code);
        Ok(output)
    }
}

fn spawn_error(spec: &CommandSpec, source: io::Error) -> CommandError {
    let cwd_missing = spec.cwd.as_deref().is_some_and(|dir| !dir.is_dir());
    if source.kind() == io::ErrorKind::NotFound && !cwd_missing {
        CommandError::ExecutableNotFound { program: spec.program.clone() }
    } else {
        CommandError::Spawn { program: spec.program.clone(), source }
    }
}

/// Kill the child's whole process group, then reap the child.
async fn terminate(pid: Option<u32>, child: &mut tokio::process::Child) {
    if let Some(pid) = pid.and_then(|p| i32::try_from(p).ok()) {
        if let Err(e) = killpg(Pid::from_raw(pid), Signal::SIGKILL) {
            log::debug!("killpg({}) failed: {}", pid, e);
        }
    }
    let _ = child.kill().await;
}

async fn pump<R>(reader: Option<R>, stream: Stream, sink: &dyn OutputSink, tail: &Mutex<OutputTail>)
where
    R: AsyncRead + Unpin,
{
    let Some(reader) = reader else { return };
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim_end_matches(['\n', '\r']);
                sink.line(stream, line);
                tail.lock().unwrap_or_else(|p| p.into_inner()).push(line.to_string());
            }
            Err(e) => {
                log::debug!("Stopped reading child {}: {}", stream, e);
                break;
            }
        }
    }
}

fn take_tail(tail: &Mutex<OutputTail>) -> String {
    tail.lock().unwrap_or_else(|p| p.into_inner()).render()
}

