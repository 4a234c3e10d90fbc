//! testbay Tasks - job graph construction and execution
//!
//! This crate turns resolved test targets into a job graph, runs it under a
//! concurrency cap with dependency-failure propagation, and streams
//! lifecycle events to reporters.

pub mod cancel;
pub mod environment;
pub mod executor;
pub mod graph;
pub mod job;
pub mod orchestrator;
pub mod reporter;

pub use cancel::{cancel_pair, CancelHandle, CancelToken};
pub use environment::{test_environment, EnvCache, EnvironmentResolver, LoadEnv, TestEnvError};
pub use executor::{ExecutionEngine, Executor, ExecutorError, ExecutorOptions};
pub use graph::{GraphBuilder, GraphError, JobGraph, RESULTS_CHECK_JOB};
pub use job::{
    CommandStage, EnvironmentMutation, FunctionStage, Job, JobEnv, JobId, JobStatus, Stage,
    StageError,
};
pub use orchestrator::{
    Mode, Orchestrator, OrchestratorError, RunOutcome, RunStatus, TestOptions,
};
pub use reporter::{
    event_channel, CollectingReporter, EventSink, ExecutionEvent, JobReporter, ReporterRegistry,
    StatusController, TracingReporter,
};
