use std::io::{self, Read};
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::config::HarnessConfig;
use crate::error::TrialError;

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Captured streams and status of one evaluator invocation.
#[derive(Debug, Clone)]
pub struct RunResult {
    pub stdout: String,
    pub stderr: String,
    pub status: ExitStatus,
    pub elapsed: Duration,
}

impl RunResult {
    pub fn success(&self) -> bool {
        self.status.success()
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.status.code()
    }

    pub fn status_label(&self) -> String {
        status_label(&self.status)
    }

    /// Last non-empty stderr line.
    pub fn stderr_tail(&self) -> Option<&str> {
        self.stderr
            .lines()
            .rev()
            .map(str::trim)
            .find(|l| !l.is_empty())
    }
}

pub fn status_label(status: &ExitStatus) -> String {
    if let Some(code) = status.code() {
        return code.to_string();
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return format!("signal {}", signal);
        }
    }
    "signal".to_string()
}

/// Produces one evaluator result per call. `trial` is 1-based.
pub trait Runner: Sync {
    fn run(&self, trial: usize) -> Result<RunResult, TrialError>;
}

#[derive(Debug, Clone)]
pub struct ProcessRunner {
    program: PathBuf,
    args: Vec<String>,
    timeout: Option<Duration>,
}

impl ProcessRunner {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            timeout: None,
        }
    }

    pub fn from_config(config: &HarnessConfig) -> Self {
        Self {
            program: config.evaluator.clone(),
            args: config.args.clone(),
            timeout: config.timeout(),
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd
    }

    fn spawn(&self) -> Result<Child, TrialError> {
        self.command().spawn().map_err(|source| TrialError::Launch {
            program: self.program.clone(),
            source,
        })
    }
}

impl Runner for ProcessRunner {
    fn run(&self, trial: usize) -> Result<RunResult, TrialError> {
        let started = Instant::now();
        let child = self.spawn()?;
        debug!(trial, pid = child.id(), program = %self.program.display(), "evaluator started");

        let (status, stdout, stderr) = match self.timeout {
            None => {
                let output = child.wait_with_output().map_err(TrialError::Capture)?;
                (output.status, output.stdout, output.stderr)
            }
            Some(limit) => wait_with_deadline(child, limit, trial)?,
        };

        Ok(RunResult {
            stdout: String::from_utf8_lossy(&stdout).to_string(),
            stderr: String::from_utf8_lossy(&stderr).to_string(),
            status,
            elapsed: started.elapsed(),
        })
    }
}

#[derive(Debug, Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

type Drained = (Stream, io::Result<Vec<u8>>);

fn drain<R: Read + Send + 'static>(stream: Option<R>, which: Stream, tx: mpsc::Sender<Drained>) {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let result = match stream {
            Some(mut stream) => stream.read_to_end(&mut buf).map(|_| buf),
            None => Ok(buf),
        };
        let _ = tx.send((which, result));
    });
}

/// Both the exit and the end of both output streams must land before `limit`;
/// a background grandchild holding the pipes open counts against it too.
fn wait_with_deadline(
    mut child: Child,
    limit: Duration,
    trial: usize,
) -> Result<(ExitStatus, Vec<u8>, Vec<u8>), TrialError> {
    let (tx, rx) = mpsc::channel();
    drain(child.stdout.take(), Stream::Stdout, tx.clone());
    drain(child.stderr.take(), Stream::Stderr, tx);
    let deadline = Instant::now() + limit;

    let status = loop {
        if let Some(status) = child.try_wait().map_err(TrialError::Capture)? {
            break status;
        }
        if Instant::now() >= deadline {
            warn!(trial, limit_ms = limit.as_millis() as u64, "evaluator timed out, killing");
            let _ = child.kill();
            let _ = child.wait();
            return Err(TrialError::Timeout { after: limit });
        }
        thread::sleep(POLL_INTERVAL);
    };

    let mut stdout = None;
    let mut stderr = None;
    while stdout.is_none() || stderr.is_none() {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match rx.recv_timeout(remaining) {
            Ok((Stream::Stdout, result)) => stdout = Some(result.map_err(TrialError::Capture)?),
            Ok((Stream::Stderr, result)) => stderr = Some(result.map_err(TrialError::Capture)?),
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    trial,
                    limit_ms = limit.as_millis() as u64,
                    "evaluator exited but its output streams are still open"
                );
                return Err(TrialError::Timeout { after: limit });
            }
            Err(RecvTimeoutError::Disconnected) => {
                return Err(TrialError::Capture(io::Error::new(
                    io::ErrorKind::Other,
                    "output reader thread panicked",
                )));
            }
        }
    }

    Ok((status, stdout.unwrap_or_default(), stderr.unwrap_or_default()))
}
