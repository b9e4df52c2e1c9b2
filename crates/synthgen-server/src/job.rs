//! Generator process supervision.
//!
//! [`JobRunner::run`] spawns the generator and hands back a [`JobHandle`]
//! right away; a detached supervisor task reads stdout and stderr, sequences
//! every line into the job's [`EventRelay`] and records the outcome. The
//! supervisor owns the child, so subscribers coming and going never affect
//! the process.
//!
//! The [`Job`] record is created in `Pending` before the spawn and moves to
//! `Running` once the child exists, so handles only ever observe `Running`
//! or a terminal state.

use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::sync::{Mutex, MutexGuard, mpsc, watch};
use uuid::Uuid;

use synthgen_core::{
    EventRelay, Job, JobState, LogLine, LogStream, OutputCatalog, RelayEvent, RelayPayload,
};

use crate::config::AppConfig;

/// Lines buffered between the pipe readers and the sequencer.
const LINE_BUFFER: usize = 256;

#[derive(Debug, Error)]
pub enum SpawnError {
    #[error("Generator command is empty")]
    EmptyCommand,

    #[error("Failed to start generator `{program}`: {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Generator `{program}` started without output pipes")]
    MissingPipe { program: String },
}

#[derive(Debug, Error)]
#[error("A generation job is already running ({job_id})")]
pub struct JobInProgress {
    pub job_id: Uuid,
}

/// Generator outcome other than success. Reported on the log stream only.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ProcessExitError {
    #[error("Process failed with exit code {0}")]
    ExitCode(i32),

    #[error("Process terminated without an exit code")]
    Terminated,
}

impl ProcessExitError {
    pub fn from_code(code: Option<i32>) -> Option<Self> {
        match code {
            Some(0) => None,
            Some(c) => Some(Self::ExitCode(c)),
            None => Some(Self::Terminated),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunnerSettings {
    pub stderr_noise_prefixes: Vec<String>,
    pub channel_capacity: usize,
    pub replay_lines: usize,
}

impl From<&AppConfig> for RunnerSettings {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            stderr_noise_prefixes: cfg.generator.stderr_noise_prefixes.clone(),
            channel_capacity: cfg.relay.channel_capacity,
            replay_lines: cfg.relay.replay_lines,
        }
    }
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

/// Shared view of a running or finished job.
#[derive(Debug, Clone)]
pub struct JobHandle {
    job: Arc<RwLock<Job>>,
    relay: EventRelay,
    state: watch::Receiver<JobState>,
}

impl JobHandle {
    pub fn id(&self) -> Uuid {
        self.job.read().id
    }

    pub fn snapshot(&self) -> Job {
        self.job.read().clone()
    }

    pub fn state(&self) -> JobState {
        self.job.read().state
    }

    pub fn is_terminal(&self) -> bool {
        self.state().is_terminal()
    }

    pub fn relay(&self) -> &EventRelay {
        &self.relay
    }

    /// Wait until the job reaches a terminal state.
    pub async fn wait(&self) -> JobState {
        let mut rx = self.state.clone();
        let result = rx.wait_for(|s| s.is_terminal()).await.map(|s| *s);
        result.unwrap_or_else(|_| self.state())
    }
}

#[derive(Debug, Clone)]
pub struct JobRunner {
    catalog: OutputCatalog,
    settings: Arc<RunnerSettings>,
}

impl JobRunner {
    pub fn new(catalog: OutputCatalog, settings: RunnerSettings) -> Self {
        Self {
            catalog,
            settings: Arc::new(settings),
        }
    }

    /// Spawn `command` in `working_dir`.
    ///
    /// Spawn failures are returned before any output is read. Must be called
    /// from within a tokio runtime.
    pub fn run(&self, command: Vec<String>, working_dir: &Path) -> Result<JobHandle, SpawnError> {
        let Some((program, args)) = command.split_first() else {
            return Err(SpawnError::EmptyCommand);
        };
        let mut job = Job::new(command.clone());

        let mut child = Command::new(program)
            .args(args)
            .current_dir(working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(false)
            .spawn()
            .map_err(|source| SpawnError::Launch {
                program: program.clone(),
                source,
            })?;

        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            let _ = child.start_kill();
            return Err(SpawnError::MissingPipe {
                program: program.clone(),
            });
        };

        job.mark_running();
        tracing::info!(
            job_id = %job.id,
            pid = ?child.id(),
            command = %job.command_line(),
            "generator started"
        );

        let relay = EventRelay::with_capacity(
            self.settings.channel_capacity,
            self.settings.replay_lines,
        );
        let mut publisher = Publisher::new(relay.clone());
        publisher.system(format!("Running command: {}", job.command_line()));

        let job = Arc::new(RwLock::new(job));
        let (state_tx, state_rx) = watch::channel(JobState::Running);

        let supervisor = Supervisor {
            job: job.clone(),
            catalog: self.catalog.clone(),
            noise_prefixes: self.settings.stderr_noise_prefixes.clone(),
            publisher,
            state_tx,
        };
        tokio::spawn(supervisor.run(child, stdout, stderr));

        Ok(JobHandle {
            job,
            relay,
            state: state_rx,
        })
    }
}

/// Assigns sequence numbers and publishes to the relay.
struct Publisher {
    relay: EventRelay,
    last_sequence: u64,
}

impl Publisher {
    fn new(relay: EventRelay) -> Self {
        Self {
            relay,
            last_sequence: 0,
        }
    }

    fn next_sequence(&mut self) -> u64 {
        self.last_sequence += 1;
        self.last_sequence
    }

    fn line(&mut self, stream: LogStream, text: impl Into<String>) {
        let sequence = self.next_sequence();
        self.relay.publish(RelayEvent {
            sequence,
            payload: RelayPayload::Line(LogLine {
                sequence,
                text: text.into(),
                stream,
            }),
        });
    }

    fn system(&mut self, text: impl Into<String>) {
        self.line(LogStream::System, text);
    }

    fn refresh_files(&mut self) {
        let sequence = self.next_sequence();
        self.relay.publish(RelayEvent {
            sequence,
            payload: RelayPayload::RefreshFiles,
        });
    }

    fn end(&mut self, state: JobState) {
        let sequence = self.next_sequence();
        self.relay.publish(RelayEvent {
            sequence,
            payload: RelayPayload::End { state },
        });
    }
}

struct Supervisor {
    job: Arc<RwLock<Job>>,
    catalog: OutputCatalog,
    noise_prefixes: Vec<String>,
    publisher: Publisher,
    state_tx: watch::Sender<JobState>,
}

impl Supervisor {
    async fn run(mut self, mut child: Child, stdout: ChildStdout, stderr: ChildStderr) {
        let job_id = self.job.read().id;
        let (tx, mut rx) = mpsc::channel::<(LogStream, String)>(LINE_BUFFER);
        let out_reader = tokio::spawn(forward_lines(stdout, LogStream::Stdout, tx.clone(), Vec::new()));
        let err_reader = tokio::spawn(forward_lines(
            stderr,
            LogStream::Stderr,
            tx,
            self.noise_prefixes.clone(),
        ));

        // Ends once both readers hit EOF and drop their senders.
        while let Some((stream, text)) = rx.recv().await {
            self.publisher.line(stream, text);
        }
        let _ = out_reader.await;
        let _ = err_reader.await;

        let exit_code = match child.wait().await {
            Ok(status) => status.code(),
            Err(e) => {
                tracing::error!(job_id = %job_id, error = %e, "failed waiting for generator");
                None
            }
        };

        let state = match ProcessExitError::from_code(exit_code) {
            None => {
                self.report_files().await;
                JobState::Succeeded
            }
            Some(failure) => {
                tracing::warn!(job_id = %job_id, error = %failure, "generator failed");
                self.publisher.system(format!("Error: {failure}"));
                JobState::Failed
            }
        };

        self.job.write().finish(exit_code);
        tracing::info!(job_id = %job_id, state = %state, exit_code = ?exit_code, "generator finished");
        let _ = self.state_tx.send(state);
        self.publisher.end(state);
    }

    async fn report_files(&mut self) {
        let catalog = self.catalog.clone();
        let files = match tokio::task::spawn_blocking(move || catalog.list()).await {
            Ok(Ok(files)) => files,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "could not list generated files");
                Vec::new()
            }
            Err(e) => {
                tracing::error!(error = %e, "file listing task failed");
                Vec::new()
            }
        };

        if files.is_empty() {
            self.publisher.system("Warning: No files were generated");
            return;
        }
        self.publisher.system("Generated files:");
        for file in &files {
            self.publisher.system(format!("- {}", file.relative_path));
        }
        self.publisher.system("Generation complete");
        self.publisher.refresh_files();
    }
}

async fn forward_lines<R>(
    pipe: R,
    stream: LogStream,
    tx: mpsc::Sender<(LogStream, String)>,
    noise_prefixes: Vec<String>,
) where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(pipe);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = normalize_line(&buf);
                if line.trim().is_empty() || is_noise(&line, &noise_prefixes) {
                    continue;
                }
                if tx.send((stream, line)).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                tracing::warn!(stream = ?stream, error = %e, "failed reading generator output");
                break;
            }
        }
    }
}

/// Decode a raw line lossily and strip line terminators.
fn normalize_line(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw)
        .trim_end_matches(['\r', '\n'])
        .replace('\r', "")
}

fn is_noise(line: &str, prefixes: &[String]) -> bool {
    let line = line.trim_start();
    prefixes
        .iter()
        .any(|p| !p.is_empty() && line.starts_with(p.as_str()))
}

/// The single job slot for the output directory.
#[derive(Debug, Clone, Default)]
pub struct JobSlot {
    current: Arc<Mutex<Option<JobHandle>>>,
}

impl JobSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Exclusive access to the slot. Held while a new job is prepared so two
    /// requests cannot both pass the idle check.
    pub async fn lock(&self) -> SlotGuard<'_> {
        SlotGuard {
            guard: self.current.lock().await,
        }
    }

    /// Latest job, running or finished.
    pub async fn current(&self) -> Option<JobHandle> {
        self.current.lock().await.clone()
    }
}

pub struct SlotGuard<'a> {
    guard: MutexGuard<'a, Option<JobHandle>>,
}

impl SlotGuard<'_> {
    pub fn ensure_idle(&self) -> Result<(), JobInProgress> {
        match self.guard.as_ref() {
            Some(handle) if !handle.is_terminal() => Err(JobInProgress {
                job_id: handle.id(),
            }),
            _ => Ok(()),
        }
    }

    pub fn install(&mut self, handle: JobHandle) {
        *self.guard = Some(handle);
    }
}
