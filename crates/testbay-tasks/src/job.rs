//! Job and stage types

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use testbay_core::ConfigError;

/// Environment captured by a job
pub type JobEnv = HashMap<String, String>;

/// Unique identifier for a job within a graph
#[derive(Debug, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobId(String);

impl JobId {
    /// Create a new job ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The raw identifier
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Errors raised while running a stage
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    /// Workspace configuration does not allow this stage
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The process could not be started
    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The process exited unsuccessfully
    #[error("{program} exited with code {}", exit_code_label(.code))]
    Exited { program: String, code: Option<i32> },

    /// Loading a result space environment failed
    #[error("Failed to load environment from {path}: {reason}")]
    Environment { path: PathBuf, reason: String },

    /// IO failure while running the stage
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn exit_code_label(code: &Option<i32>) -> String {
    code.map(|c| c.to_string())
        .unwrap_or_else(|| "<signal>".to_string())
}

/// A step that enriches a job's captured environment
#[async_trait]
pub trait EnvironmentMutation: Send + Sync + fmt::Debug {
    /// Apply the mutation to `env`
    async fn apply(&self, env: &mut JobEnv) -> Result<(), StageError>;
}

/// Environment-mutation stage
#[derive(Debug, Clone)]
pub struct FunctionStage {
    /// Stage label (used for events and log file names)
    pub label: String,
    /// The mutation to run
    pub func: Arc<dyn EnvironmentMutation>,
}

/// External process stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandStage {
    /// Stage label (used for events and log file names)
    pub label: String,
    /// Program to execute
    pub program: PathBuf,
    /// Program arguments
    pub args: Vec<String>,
    /// Working directory
    pub cwd: PathBuf,
}

impl CommandStage {
    /// Human-readable command line
    pub fn command_line(&self) -> String {
        let mut line = self.program.display().to_string();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

/// One sequential step of a job
#[derive(Debug, Clone)]
pub enum Stage {
    /// Mutate the job environment
    Function(FunctionStage),
    /// Run an external command
    Command(CommandStage),
}

impl Stage {
    /// Stage label
    pub fn label(&self) -> &str {
        match self {
            Self::Function(s) => &s.label,
            Self::Command(s) => &s.label,
        }
    }
}

/// A unit of work with declared dependencies and ordered stages
#[derive(Debug, Clone)]
pub struct Job {
    /// Job identifier
    pub id: JobId,
    /// Jobs that must succeed before this one starts
    pub deps: Vec<JobId>,
    /// Environment the job's stages run with
    pub env: JobEnv,
    /// Stages, run strictly in order
    pub stages: Vec<Stage>,
}

impl Job {
    /// Create a job with no dependencies and no stages
    pub fn new(id: impl Into<String>, env: JobEnv) -> Self {
        Self {
            id: JobId::new(id),
            deps: Vec::new(),
            env,
            stages: Vec::new(),
        }
    }

    /// Add a dependency
    pub fn with_dep(mut self, dep: JobId) -> Self {
        self.deps.push(dep);
        self
    }

    /// Append a stage
    pub fn with_stage(mut self, stage: Stage) -> Self {
        self.stages.push(stage);
        self
    }
}

/// Terminal state of a job
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum JobStatus {
    /// Every stage succeeded
    Succeeded,
    /// A stage failed
    Failed(String),
    /// Never started because a dependency did not succeed
    Skipped { blocked_by: JobId },
    /// Never finished because the run was interrupted
    Abandoned,
}

impl JobStatus {
    /// Check if this status represents success
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_id_display() {
        let id = JobId::new("foo_driver");
        assert_eq!(id.to_string(), "foo_driver");
        assert_eq!(JobId::from("x").as_str(), "x");
    }

    #[test]
    fn test_job_builder() {
        let job = Job::new("agg", JobEnv::new())
            .with_dep(JobId::new("a"))
            .with_dep(JobId::new("b"));
        assert_eq!(job.deps.len(), 2);
        assert!(job.stages.is_empty());
    }

    #[test]
    fn test_command_line() {
        let stage = CommandStage {
            label: "make".to_string(),
            program: PathBuf::from("/usr/bin/make"),
            args: vec!["run_tests_a_t".to_string(), "-j2".to_string()],
            cwd: PathBuf::from("/ws/build/a"),
        };
        assert_eq!(stage.command_line(), "/usr/bin/make run_tests_a_t -j2");
        assert_eq!(Stage::Command(stage).label(), "make");
    }

    #[test]
    fn test_status_is_success() {
        assert!(JobStatus::Succeeded.is_success());
        assert!(!JobStatus::Failed("x".to_string()).is_success());
        assert!(!JobStatus::Skipped {
            blocked_by: JobId::new("a")
        }
        .is_success());
        assert!(!JobStatus::Abandoned.is_success());
    }

    #[test]
    fn test_exit_error_message() {
        let err = StageError::Exited {
            program: "make".to_string(),
            code: Some(2),
        };
        assert_eq!(err.to_string(), "make exited with code 2");
        let err = StageError::Exited {
            program: "make".to_string(),
            code: None,
        };
        assert!(err.to_string().contains("<signal>"));
    }
}
