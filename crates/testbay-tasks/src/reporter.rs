//! Job lifecycle events and their consumers

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::job::{JobId, JobStatus};

/// Events emitted while a job graph runs
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    /// A job was accepted by the engine
    JobQueued { id: JobId, deps: Vec<JobId> },
    /// A job is starting execution
    JobStarted { id: JobId },
    /// A stage is starting
    StageStarted {
        id: JobId,
        stage: String,
        command: Option<String>,
    },
    /// A stage produced a line of output
    StageOutput {
        id: JobId,
        stage: String,
        line: String,
        is_stderr: bool,
    },
    /// A stage finished
    StageFinished {
        id: JobId,
        stage: String,
        succeeded: bool,
        duration: Duration,
    },
    /// A job reached a terminal state
    JobFinished {
        id: JobId,
        status: JobStatus,
        duration: Duration,
    },
    /// All jobs reached a terminal state
    AllCompleted {
        total: usize,
        succeeded: usize,
        failed: usize,
        skipped: usize,
        abandoned: usize,
        duration: Duration,
    },
    /// Tells the status consumer to stop
    Shutdown,
}

/// Sending half of the event stream
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<ExecutionEvent>,
}

impl EventSink {
    /// Emit an event; events sent after the consumer stopped are dropped
    pub fn emit(&self, event: ExecutionEvent) {
        let _ = self.tx.send(event);
    }
}

/// Create a connected event sink and receiver
pub fn event_channel() -> (EventSink, mpsc::UnboundedReceiver<ExecutionEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSink { tx }, rx)
}

/// Trait for consuming job lifecycle events
pub trait JobReporter: Send + Sync {
    /// Handle an event
    fn report(&self, event: &ExecutionEvent);

    /// Called once after the last event
    fn finish(&self) {}
}

/// Simple reporter that logs to tracing
#[derive(Debug, Default)]
pub struct TracingReporter;

impl JobReporter for TracingReporter {
    fn report(&self, event: &ExecutionEvent) {
        match event {
            ExecutionEvent::JobQueued { id, deps } => {
                tracing::debug!("Queued {} ({} deps)", id, deps.len());
            }
            ExecutionEvent::JobStarted { id } => {
                tracing::info!("Starting {}", id);
            }
            ExecutionEvent::StageStarted { id, stage, command } => match command {
                Some(command) => tracing::debug!("[{}] {}: {}", id, stage, command),
                None => tracing::debug!("[{}] {}", id, stage),
            },
            ExecutionEvent::StageOutput {
                id,
                line,
                is_stderr,
                ..
            } => {
                // Output reaches the terminal through the console reporter
                let stream = if *is_stderr { "stderr" } else { "stdout" };
                tracing::trace!(stream, "[{}] {}", id, line);
            }
            ExecutionEvent::StageFinished {
                id,
                stage,
                succeeded,
                duration,
            } => {
                tracing::debug!(
                    "[{}] {} {} in {:.1}s",
                    id,
                    stage,
                    if *succeeded { "finished" } else { "failed" },
                    duration.as_secs_f64()
                );
            }
            ExecutionEvent::JobFinished {
                id,
                status,
                duration,
            } => match status {
                JobStatus::Succeeded => {
                    tracing::info!("{} succeeded in {:.1}s", id, duration.as_secs_f64());
                }
                JobStatus::Failed(error) => {
                    tracing::info!("{} failed after {:.1}s: {}", id, duration.as_secs_f64(), error);
                }
                JobStatus::Skipped { blocked_by } => {
                    tracing::info!("{} skipped: dependency {} did not succeed", id, blocked_by);
                }
                JobStatus::Abandoned => {
                    tracing::info!("{} abandoned", id);
                }
            },
            ExecutionEvent::AllCompleted {
                total,
                succeeded,
                failed,
                skipped,
                abandoned,
                duration,
            } => {
                tracing::info!(
                    "All jobs complete: {}/{} succeeded, {} failed, {} skipped, {} abandoned ({:.1}s)",
                    succeeded,
                    total,
                    failed,
                    skipped,
                    abandoned,
                    duration.as_secs_f64()
                );
            }
            ExecutionEvent::Shutdown => {}
        }
    }
}

/// Reporter that collects events for later inspection (useful for testing)
#[derive(Debug, Default)]
pub struct CollectingReporter {
    events: Mutex<Vec<ExecutionEvent>>,
}

impl CollectingReporter {
    /// Get all collected events
    pub fn events(&self) -> Vec<ExecutionEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Ids of jobs that were started, in order
    pub fn started(&self) -> Vec<JobId> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                ExecutionEvent::JobStarted { id } => Some(id),
                _ => None,
            })
            .collect()
    }

    /// Terminal status of a job, if reported
    pub fn status_of(&self, id: &str) -> Option<JobStatus> {
        self.events().into_iter().find_map(|e| match e {
            ExecutionEvent::JobFinished { id: job, status, .. } if job.as_str() == id => {
                Some(status)
            }
            _ => None,
        })
    }
}

impl JobReporter for CollectingReporter {
    fn report(&self, event: &ExecutionEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}

/// Fan-out of reporters
pub struct ReporterRegistry {
    reporters: Vec<Arc<dyn JobReporter>>,
}

impl ReporterRegistry {
    /// Registry holding only the tracing reporter
    pub fn new() -> Self {
        Self {
            reporters: vec![Arc::new(TracingReporter)],
        }
    }

    /// Registry with no reporters
    pub fn empty() -> Self {
        Self {
            reporters: Vec::new(),
        }
    }

    /// Add a reporter
    pub fn register(&mut self, reporter: Arc<dyn JobReporter>) {
        self.reporters.push(reporter);
    }

    /// Registered reporters
    pub fn all(&self) -> &[Arc<dyn JobReporter>] {
        &self.reporters
    }
}

impl Default for ReporterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl JobReporter for ReporterRegistry {
    fn report(&self, event: &ExecutionEvent) {
        for reporter in &self.reporters {
            reporter.report(event);
        }
    }

    fn finish(&self) {
        for reporter in &self.reporters {
            reporter.finish();
        }
    }
}

/// Background task that drains the event stream into a reporter
pub struct StatusController {
    handle: JoinHandle<()>,
}

impl StatusController {
    /// Start consuming `events`
    pub fn spawn(
        mut events: mpsc::UnboundedReceiver<ExecutionEvent>,
        reporter: Arc<dyn JobReporter>,
    ) -> Self {
        let handle = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if matches!(event, ExecutionEvent::Shutdown) {
                    break;
                }
                reporter.report(&event);
            }
            reporter.finish();
            debug!("status controller stopped");
        });

        Self { handle }
    }

    /// Wait up to `timeout` for the controller to finish.
    ///
    /// Returns `false` if it had to be aborted.
    pub async fn join(self, timeout: Duration) -> bool {
        let mut handle = self.handle;
        match tokio::time::timeout(timeout, &mut handle).await {
            Ok(_) => true,
            Err(_) => {
                warn!(timeout_ms = timeout.as_millis() as u64, "status output did not finish in time");
                handle.abort();
                false
            }
        }
    }
}
