//! Execution engine: runs a job graph under a concurrency cap using tokio

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};

use testbay_core::tools::default_job_count;

use crate::cancel::CancelToken;
use crate::graph::JobGraph;
use crate::job::{CommandStage, Job, JobEnv, JobId, JobStatus, Stage, StageError};
use crate::reporter::{EventSink, ExecutionEvent};

/// Failures of the engine itself, as opposed to job failures
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    /// A job task panicked or could not be joined
    #[error("Job task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    /// Jobs remain that can never become ready
    #[error("{0} jobs could not be scheduled")]
    Stalled(usize),
}

/// Runs a [`JobGraph`], reporting progress to an event sink.
///
/// Returns `Ok(true)` when every job succeeded, `Ok(false)` when any job did
/// not succeed or the run was cancelled.
#[async_trait]
pub trait ExecutionEngine: Send + Sync {
    async fn execute(
        &self,
        graph: JobGraph,
        events: EventSink,
        cancel: CancelToken,
    ) -> Result<bool, ExecutorError>;
}

/// Options for the executor
#[derive(Debug, Clone)]
pub struct ExecutorOptions {
    /// Maximum number of jobs running at once
    pub max_toplevel_jobs: usize,
    /// Directory receiving `<job>/<stage>.log` files
    pub log_root: Option<PathBuf>,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self {
            max_toplevel_jobs: default_job_count(),
            log_root: None,
        }
    }
}

/// Dependency-driven job executor
#[derive(Debug, Clone, Default)]
pub struct Executor {
    options: ExecutorOptions,
}

type JobOutcome = (JobId, JobStatus, Duration);

impl Executor {
    /// Create a new executor
    pub fn new(options: ExecutorOptions) -> Self {
        Self { options }
    }

}

/// First dependency that reached a non-success terminal state
fn blocked_by(job: &Job, statuses: &HashMap<JobId, JobStatus>) -> Option<JobId> {
    job.deps
        .iter()
        .find(|dep| statuses.get(*dep).is_some_and(|s| !s.is_success()))
        .cloned()
}

fn is_ready(job: &Job, statuses: &HashMap<JobId, JobStatus>) -> bool {
    job.deps
        .iter()
        .all(|dep| statuses.get(dep).is_some_and(JobStatus::is_success))
}

#[async_trait]
impl ExecutionEngine for Executor {
    #[instrument(skip_all, fields(jobs = graph.len(), max_jobs = self.options.max_toplevel_jobs))]
    async fn execute(
        &self,
        graph: JobGraph,
        events: EventSink,
        cancel: CancelToken,
    ) -> Result<bool, ExecutorError> {
        let start = Instant::now();
        let max_jobs = self.options.max_toplevel_jobs.max(1);
        let total = graph.len();

        let mut pending: VecDeque<Job> = graph.into_jobs().into();
        for job in &pending {
            events.emit(ExecutionEvent::JobQueued {
                id: job.id.clone(),
                deps: job.deps.clone(),
            });
        }

        let mut statuses: HashMap<JobId, JobStatus> = HashMap::new();
        let mut running: JoinSet<JobOutcome> = JoinSet::new();
        let mut active: HashSet<JobId> = HashSet::new();

        let finish = |statuses: &mut HashMap<JobId, JobStatus>, outcome: JobOutcome| {
            let (id, status, duration) = outcome;
            events.emit(ExecutionEvent::JobFinished {
                id: id.clone(),
                status: status.clone(),
                duration,
            });
            statuses.insert(id, status);
        };

        loop {
            if !cancel.is_cancelled() {
                let mut index = 0;
                while index < pending.len() {
                    let job = &pending[index];
                    if let Some(blocker) = blocked_by(job, &statuses) {
                        if let Some(job) = pending.remove(index) {
                            debug!(job = %job.id, blocked_by = %blocker, "skipping job");
                            finish(
                                &mut statuses,
                                (job.id, JobStatus::Skipped { blocked_by: blocker }, Duration::ZERO),
                            );
                        }
                        continue;
                    }
                    if running.len() < max_jobs && is_ready(job, &statuses) {
                        if let Some(job) = pending.remove(index) {
                            active.insert(job.id.clone());
                            running.spawn(run_job(
                                job,
                                events.clone(),
                                self.options.log_root.clone(),
                            ));
                        }
                        continue;
                    }
                    index += 1;
                }
            } else if !running.is_empty() {
                running.abort_all();
            }

            if running.is_empty() {
                break;
            }

            tokio::select! {
                joined = running.join_next() => match joined {
                    Some(Ok(outcome)) => {
                        active.remove(&outcome.0);
                        finish(&mut statuses, outcome);
                    }
                    // Aborted by cancellation; the job stays in `active` and is abandoned below
                    Some(Err(e)) if e.is_cancelled() => {}
                    Some(Err(e)) => {
                        running.abort_all();
                        return Err(e.into());
                    }
                    None => {}
                },
                _ = cancel.cancelled(), if !cancel.is_cancelled() => {
                    warn!(running = running.len(), "cancelling run");
                    running.abort_all();
                }
            }
        }

        if cancel.is_cancelled() {
            for job in pending.drain(..) {
                active.insert(job.id);
            }
            let mut abandoned: Vec<JobId> = active.into_iter().collect();
            abandoned.sort();
            for id in abandoned {
                finish(&mut statuses, (id, JobStatus::Abandoned, Duration::ZERO));
            }
        } else if !pending.is_empty() {
            return Err(ExecutorError::Stalled(pending.len()));
        }

        let count = |f: fn(&JobStatus) -> bool| statuses.values().filter(|s| f(s)).count();
        let succeeded = count(JobStatus::is_success);
        let failed = count(|s| matches!(s, JobStatus::Failed(_)));
        let skipped = count(|s| matches!(s, JobStatus::Skipped { .. }));
        let abandoned = count(|s| matches!(s, JobStatus::Abandoned));

        events.emit(ExecutionEvent::AllCompleted {
            total,
            succeeded,
            failed,
            skipped,
            abandoned,
            duration: start.elapsed(),
        });
        info!(succeeded, failed, skipped, abandoned, "execution finished");

        Ok(!cancel.is_cancelled() && succeeded == total)
    }
}

/// Run every stage of one job in order, stopping at the first failure
async fn run_job(job: Job, events: EventSink, log_root: Option<PathBuf>) -> JobOutcome {
    let start = Instant::now();
    let Job {
        id, stages, env, ..
    } = job;
    let mut env = env;

    events.emit(ExecutionEvent::JobStarted { id: id.clone() });

    for stage in &stages {
        let label = stage.label().to_string();
        let stage_start = Instant::now();
        events.emit(ExecutionEvent::StageStarted {
            id: id.clone(),
            stage: label.clone(),
            command: match stage {
                Stage::Command(c) => Some(c.command_line()),
                Stage::Function(_) => None,
            },
        });

        let result = match stage {
            Stage::Function(f) => f.func.apply(&mut env).await,
            Stage::Command(c) => run_command(&id, c, &env, log_root.as_deref(), &events).await,
        };

        events.emit(ExecutionEvent::StageFinished {
            id: id.clone(),
            stage: label.clone(),
            succeeded: result.is_ok(),
            duration: stage_start.elapsed(),
        });

        if let Err(e) = result {
            debug!(job = %id, stage = %label, error = %e, "stage failed");
            return (id, JobStatus::Failed(format!("{}: {}", label, e)), start.elapsed());
        }
    }

    (id, JobStatus::Succeeded, start.elapsed())
}

async fn open_log(log_root: &Path, id: &JobId, stage: &str) -> Result<File, StageError> {
    let dir = log_root.join(id.as_str());
    tokio::fs::create_dir_all(&dir).await?;
    Ok(File::create(dir.join(format!("{}.log", stage))).await?)
}

/// Decode one raw output line, dropping the line terminator
fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\n").unwrap_or(raw);
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}

/// Run an external command, streaming its output line by line
async fn run_command(
    id: &JobId,
    stage: &CommandStage,
    env: &JobEnv,
    log_root: Option<&Path>,
    events: &EventSink,
) -> Result<(), StageError> {
    let program = stage
        .program
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| stage.program.display().to_string());

    let mut log = match log_root {
        Some(root) => {
            let mut file = open_log(root, id, &stage.label).await?;
            file.write_all(format!("$ {}\n", stage.command_line()).as_bytes())
                .await?;
            Some(file)
        }
        None => None,
    };

    let mut child = Command::new(&stage.program)
        .args(&stage.args)
        .current_dir(&stage.cwd)
        .env_clear()
        .envs(env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| StageError::Spawn {
            program: program.clone(),
            source,
        })?;

    let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
        return Err(StageError::Io(std::io::Error::other(
            "child output was not captured",
        )));
    };
    let mut stdout = BufReader::new(stdout);
    let mut stderr = BufReader::new(stderr);
    let mut stdout_buf = Vec::new();
    let mut stderr_buf = Vec::new();
    let mut stdout_open = true;
    let mut stderr_open = true;

    // Partial reads stay in the buffers when the other stream wins the select
    while stdout_open || stderr_open {
        let (read, is_stderr) = tokio::select! {
            read = stdout.read_until(b'\n', &mut stdout_buf), if stdout_open => (read, false),
            read = stderr.read_until(b'\n', &mut stderr_buf), if stderr_open => (read, true),
        };
        let buf = if is_stderr {
            &mut stderr_buf
        } else {
            &mut stdout_buf
        };
        if read? == 0 {
            if is_stderr {
                stderr_open = false;
            } else {
                stdout_open = false;
            }
            continue;
        }
        let line = decode_line(buf);
        buf.clear();

        if let Some(file) = log.as_mut() {
            file.write_all(line.as_bytes()).await?;
            file.write_all(b"\n").await?;
        }
        events.emit(ExecutionEvent::StageOutput {
            id: id.clone(),
            stage: stage.label.clone(),
            line,
            is_stderr,
        });
    }

    let status = child.wait().await?;
    if let Some(file) = log.as_mut() {
        file.flush().await?;
    }

    if status.success() {
        Ok(())
    } else {
        Err(StageError::Exited {
            program,
            code: status.code(),
        })
    }
}
