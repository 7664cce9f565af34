use async_trait::async_trait;
use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::io;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio::time::{timeout_at, Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::ExecutorConfig;
use crate::error::{ExecutorError, Result};
use crate::resources::{ResourceSampler, UsageStats};
use crate::runtimes::Executor;
use crate::verdict::{classify, ExecutionResult};

/// Signal sent to a run that exceeds its timeout
pub const TIMEOUT_SIGNAL: Signal = Signal::SIGKILL;

/// What `run` actually spawns once a build has succeeded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunTarget {
    pub program: PathBuf,
    pub args: Vec<OsString>,
}

impl RunTarget {
    pub fn new<P, I, S>(program: P, args: I) -> Self
    where
        P: Into<PathBuf>,
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// A freshly built executable taking no arguments
    pub fn executable(path: impl Into<PathBuf>) -> Self {
        Self::new(path, Vec::<OsString>::new())
    }
}

/// Why a process could not be started
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchError {
    pub kind: io::ErrorKind,
    pub message: String,
}

impl LaunchError {
    pub fn name(&self) -> String {
        format!("{:?}", self.kind)
    }
}

impl From<&io::Error> for LaunchError {
    fn from(err: &io::Error) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// Raw result of one run, before classification
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutcome {
    /// Set when the process never ran
    pub launch_error: Option<LaunchError>,
    /// Exit status, if the process exited on its own
    pub status: Option<i32>,
    /// Terminating signal, if the process was killed
    pub signal: Option<Signal>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// Sampler pid of the run
    pub pid: Option<u32>,
    pub usage: UsageStats,
}

impl ProcessOutcome {
    pub fn launch_failed(err: &io::Error) -> Self {
        Self {
            launch_error: Some(err.into()),
            ..Self::default()
        }
    }

    pub fn exited(status: i32, stdout: impl Into<Vec<u8>>, stderr: impl Into<Vec<u8>>) -> Self {
        Self {
            status: Some(status),
            stdout: stdout.into(),
            stderr: stderr.into(),
            ..Self::default()
        }
    }

    pub fn signaled(signal: Signal, stdout: impl Into<Vec<u8>>, stderr: impl Into<Vec<u8>>) -> Self {
        Self {
            signal: Some(signal),
            stdout: stdout.into(),
            stderr: stderr.into(),
            ..Self::default()
        }
    }

    pub fn with_usage(mut self, usage: UsageStats) -> Self {
        self.usage = usage;
        self
    }

    fn from_status(status: ExitStatus, stdout: Vec<u8>, stderr: Vec<u8>, pid: u32, usage: UsageStats) -> Self {
        Self {
            launch_error: None,
            status: status.code(),
            signal: status.signal().and_then(|sig| Signal::try_from(sig).ok()),
            stdout,
            stderr,
            pid: Some(pid),
            usage,
        }
    }
}

/// Where an executor is in its build/run/cleanup lifecycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Lifecycle {
    #[default]
    Fresh,
    Built,
    CleanedUp,
}

/// The build/run/cleanup capability every language strategy provides.
///
/// `build` is called once, `run` any number of times afterwards, and
/// `cleanup` once at the end. `run` is shared by all strategies; they only
/// differ in how they build, what they run and what they clean up.
#[async_trait]
pub trait LanguageExecutor: Send + Sync {
    /// Registry tag of this language
    fn language(&self) -> &'static str;

    fn src_file(&self) -> &Path;

    /// Build artifact, if this strategy produced one
    fn exec_file(&self) -> Option<&Path>;

    fn config(&self) -> &ExecutorConfig;

    /// Produce or validate the run target
    async fn build(&mut self) -> Result<RunTarget>;

    /// The run target of a completed build
    fn run_target(&self) -> Result<RunTarget>;

    /// Remove whatever `build` created
    async fn cleanup(&mut self) -> Result<()>;

    /// Run the built target once with `input` on stdin
    async fn run(&self, input: &str) -> Result<ProcessOutcome> {
        let target = self.run_target()?;
        Ok(run_process(&target, input, self.config()).await)
    }

    /// Run once and classify the outcome
    async fn evaluate(&self, input: &str) -> Result<ExecutionResult> {
        let outcome = self.run(input).await?;
        Ok(classify(&outcome))
    }
}

/// Spawn `target`, feed it `input` and wait for it under the configured timeout.
///
/// The child leads its own process group. Resource sampling runs alongside
/// it. On timeout a final sample is taken and the whole group gets
/// [`TIMEOUT_SIGNAL`], so helpers the program started cannot hold the call
/// open past the deadline.
pub async fn run_process(target: &RunTarget, input: &str, config: &ExecutorConfig) -> ProcessOutcome {
    let mut command = Command::new(&target.program);
    command
        .args(&target.args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0)
        .kill_on_drop(true);

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(err) => {
            warn!("Failed to spawn {:?}: {}", target.program, err);
            return ProcessOutcome::launch_failed(&err);
        }
    };
    let deadline = Instant::now() + config.timeout;

    let pid = match child.id() {
        Some(pid) => pid,
        None => {
            let err = io::Error::new(io::ErrorKind::Other, "process exited before its pid was read");
            return ProcessOutcome::launch_failed(&err);
        }
    };
    debug!("Spawned {:?} as process {}", target.program, pid);

    let sampler = ResourceSampler::new(config.sample_interval).start(pid);

    let stdin_task = child.stdin.take().map(|mut stdin| {
        let input = input.as_bytes().to_vec();
        tokio::spawn(async move {
            // The program may exit without reading everything
            if let Err(e) = stdin.write_all(&input).await {
                if e.kind() != io::ErrorKind::BrokenPipe {
                    debug!("Failed to write stdin: {}", e);
                }
            }
        })
    });
    let stdout_task = child.stdout.take().map(|out| tokio::spawn(drain(out)));
    let stderr_task = child.stderr.take().map(|err| tokio::spawn(drain(err)));

    let (status, usage) = match timeout_at(deadline, child.wait()).await {
        Ok(status) => (status, sampler.finish().await),
        Err(_) => {
            info!(
                "Process {} exceeded the {}ms timeout, sending {}",
                pid,
                config.timeout.as_millis(),
                TIMEOUT_SIGNAL
            );
            let usage = sampler.finish().await;
            kill_group(pid, TIMEOUT_SIGNAL);
            (child.wait().await, usage)
        }
    };

    // Anything the program left running in its group goes too
    kill_group(pid, Signal::SIGKILL);

    // Pipes inherited by a process that escaped the group stay open; stop
    // reading them shortly after the deadline
    let drain_deadline = deadline.max(Instant::now()) + DRAIN_GRACE;
    join_by(stdin_task, drain_deadline).await;
    let stdout = join_by(stdout_task, drain_deadline).await.unwrap_or_default();
    let stderr = join_by(stderr_task, drain_deadline).await.unwrap_or_default();

    match status {
        Ok(status) => {
            debug!("Process {} finished with {}", pid, status);
            ProcessOutcome::from_status(status, stdout, stderr, pid, usage)
        }
        Err(err) => {
            warn!("Failed to wait for process {}: {}", pid, err);
            ProcessOutcome {
                pid: Some(pid),
                usage,
                ..ProcessOutcome::launch_failed(&err)
            }
        }
    }
}

/// How long output is still collected after the deadline or the exit
const DRAIN_GRACE: Duration = Duration::from_millis(200);

fn kill_group(pgid: u32, signal: Signal) {
    match signal::kill(Pid::from_raw(-(pgid as i32)), signal) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => warn!("Failed to signal process group {}: {}", pgid, e),
    }
}

async fn drain<R: AsyncRead + Unpin>(mut reader: R) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Err(e) = reader.read_to_end(&mut buf).await {
        debug!("Failed to read process output: {}", e);
    }
    buf
}

/// Join `task` unless `deadline` passes first, in which case it is aborted
async fn join_by<T>(task: Option<JoinHandle<T>>, deadline: Instant) -> Option<T> {
    let mut task = task?;
    match timeout_at(deadline, &mut task).await {
        Ok(joined) => joined.ok(),
        Err(_) => {
            debug!("Abandoning a process pipe still held open");
            task.abort();
            None
        }
    }
}

/// Language tag of a source file, taken from its extension
pub fn language_tag(src_file: &Path) -> Option<&str> {
    src_file.extension().and_then(|ext| ext.to_str())
}

/// Builds an executor for one source file
pub type ExecutorFactory = fn(PathBuf, ExecutorConfig) -> Executor;

/// Language tag to executor factory. Filled once at startup, read-only afterwards.
#[derive(Debug, Default)]
pub struct ExecutorRegistry {
    factories: BTreeMap<&'static str, ExecutorFactory>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tag: &'static str, factory: ExecutorFactory) -> Result<()> {
        if self.factories.contains_key(tag) {
            return Err(ExecutorError::DuplicateLanguage(tag.to_string()));
        }
        self.factories.insert(tag, factory);
        Ok(())
    }

    pub fn resolve(&self, tag: &str) -> Result<ExecutorFactory> {
        self.factories
            .get(tag)
            .copied()
            .ok_or_else(|| ExecutorError::UnknownLanguage(tag.to_string()))
    }

    /// Resolve by the file extension of `src_file`
    pub fn resolve_for_file(&self, src_file: &Path) -> Result<ExecutorFactory> {
        match language_tag(src_file) {
            Some(tag) => self.resolve(tag),
            None => Err(ExecutorError::UnknownLanguage(src_file.display().to_string())),
        }
    }

    pub fn language_tags(&self) -> Vec<&'static str> {
        self.factories.keys().copied().collect()
    }
}
