//! Test run orchestration: scan, resolve, build the job graph, execute

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, instrument, warn};

use testbay_core::{
    packages_to_test, resolve_all, BuildContext, ConfigError, ExecutableCache, Resolution,
    ResolveError, TestbayError,
};

use crate::cancel::cancel_pair;
use crate::environment::{test_environment, EnvironmentResolver, TestEnvError};
use crate::executor::{ExecutionEngine, ExecutorError};
use crate::graph::{GraphBuilder, GraphError, JobGraph};
use crate::job::JobEnv;
use crate::reporter::{event_channel, ExecutionEvent, JobReporter, ReporterRegistry, StatusController};

/// Grace period for the engine and status output after an interrupt
pub const DEFAULT_JOIN_TIMEOUT: Duration = Duration::from_secs(1);

/// What a run does once targets are resolved
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Mode {
    /// Build the job graph and run it
    #[default]
    Test,
    /// Print configured targets and stop
    List,
}

/// Options for one run
#[derive(Debug, Clone, Default)]
pub struct TestOptions {
    /// Explicit package names (empty = whole workspace)
    pub packages: Vec<String>,
    /// Only run these target names (empty = all)
    pub tests: Vec<String>,
    /// Run mode
    pub mode: Mode,
    /// Build tool job count
    pub jobs: Option<usize>,
}

/// Orchestrator phases, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Scanning,
    Resolving,
    GraphBuilding,
    Executing,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Scanning => "scanning",
            Self::Resolving => "resolving",
            Self::GraphBuilding => "graph-building",
            Self::Executing => "executing",
        };
        f.write_str(name)
    }
}

/// Final state of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Succeeded,
    Failed,
    Interrupted,
}

impl RunStatus {
    /// Process exit code for this status
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Succeeded => 0,
            Self::Failed => 1,
            Self::Interrupted => 130,
        }
    }
}

/// Result of a completed run
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// Final state
    pub status: RunStatus,
    /// Sorted `(package, targets)` listing (list mode only)
    pub listing: Vec<(String, Vec<String>)>,
    /// Problems to surface to the user
    pub errors: Vec<String>,
}

impl RunOutcome {
    fn new(status: RunStatus) -> Self {
        Self {
            status,
            listing: Vec::new(),
            errors: Vec::new(),
        }
    }
}

/// Errors that stop a run before any job starts
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// Workspace could not be scanned
    #[error(transparent)]
    Workspace(#[from] TestbayError),

    /// The workspace layout does not allow testing
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Some packages could not be resolved
    #[error("{}", resolve_summary(.0))]
    Resolve(Vec<ResolveError>),

    /// The job graph could not be built
    #[error(transparent)]
    Graph(#[from] GraphError),
}

fn resolve_summary(errors: &[ResolveError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("\n")
}

impl OrchestratorError {
    /// Whether the user has to fix the workspace before retrying
    pub fn is_configuration(&self) -> bool {
        match self {
            Self::Config(_) => true,
            Self::Workspace(e) => e.is_configuration(),
            Self::Resolve(errors) => errors
                .iter()
                .any(|e| matches!(e, ResolveError::Unconfigured { .. })),
            Self::Graph(
                GraphError::MissingMakefile { .. }
                | GraphError::ReservedPackageName(_)
                | GraphError::Config(_),
            ) => true,
            Self::Graph(_) => false,
        }
    }
}

/// Render an error with its full source chain
pub fn error_chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

/// Drives one invocation through its phases
pub struct Orchestrator {
    ctx: BuildContext,
    engine: Arc<dyn ExecutionEngine>,
    executables: Arc<ExecutableCache>,
    env_resolver: EnvironmentResolver,
    reporter: Arc<dyn JobReporter>,
    base_env: Option<JobEnv>,
    join_timeout: Duration,
}

impl Orchestrator {
    /// Orchestrator with a fresh executable cache and tracing reporter
    pub fn new(ctx: BuildContext, engine: Arc<dyn ExecutionEngine>) -> Self {
        let env_resolver = EnvironmentResolver::for_context(&ctx);
        Self {
            ctx,
            engine,
            executables: Arc::new(ExecutableCache::new()),
            env_resolver,
            reporter: Arc::new(ReporterRegistry::new()),
            base_env: None,
            join_timeout: DEFAULT_JOIN_TIMEOUT,
        }
    }

    /// Share an executable cache
    pub fn with_executables(mut self, executables: Arc<ExecutableCache>) -> Self {
        self.executables = executables;
        self
    }

    /// Receive execution events
    pub fn with_reporter(mut self, reporter: Arc<dyn JobReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Environment jobs start from instead of the process environment
    pub fn with_base_env(mut self, env: JobEnv) -> Self {
        self.base_env = Some(env);
        self
    }

    /// Grace period for shutdown
    pub fn with_join_timeout(mut self, timeout: Duration) -> Self {
        self.join_timeout = timeout;
        self
    }

    /// The build context
    pub fn context(&self) -> &BuildContext {
        &self.ctx
    }

    /// Environment the tests of one package would run with
    pub async fn package_env(&self, package: &str) -> Result<Vec<String>, TestEnvError> {
        test_environment(&self.ctx, package, self.env_resolver.clone()).await
    }

    /// Scan the workspace and resolve test targets
    fn resolve(&self, options: &TestOptions) -> Result<Resolution, OrchestratorError> {
        info!(phase = %Phase::Scanning);
        let packages = packages_to_test(&self.ctx, &options.packages)?;
        if packages.is_empty() {
            warn!(
                source = %self.ctx.source_space.display(),
                "no packages to test were found"
            );
        }

        info!(phase = %Phase::Resolving);
        Ok(resolve_all(&self.ctx, &packages).filter_targets(&options.tests))
    }

    fn build_graph(
        &self,
        options: &TestOptions,
        resolution: Resolution,
    ) -> Result<JobGraph, OrchestratorError> {
        if !resolution.is_complete() {
            return Err(OrchestratorError::Resolve(resolution.errors));
        }

        info!(phase = %Phase::GraphBuilding);
        let mut builder =
            GraphBuilder::new(&self.ctx, self.executables.clone(), self.env_resolver.clone())
                .with_jobs(options.jobs);
        if let Some(env) = &self.base_env {
            builder = builder.with_base_env(env.clone());
        }
        Ok(builder.build(&resolution.sets)?)
    }

    /// The job graph a test run would execute, without running it
    pub fn plan(&self, options: &TestOptions) -> Result<JobGraph, OrchestratorError> {
        if self.ctx.install {
            return Err(ConfigError::InstallSpaceUnsupported.into());
        }
        let resolution = self.resolve(options)?;
        self.build_graph(options, resolution)
    }

    /// Run the workspace tests.
    ///
    /// `interrupt` resolves when the user asks to stop; the run then stops
    /// starting jobs and returns [`RunStatus::Interrupted`] within the join
    /// timeout.
    #[instrument(skip_all, fields(mode = ?options.mode))]
    pub async fn run<F>(
        &self,
        options: &TestOptions,
        interrupt: F,
    ) -> Result<RunOutcome, OrchestratorError>
    where
        F: Future<Output = ()> + Send,
    {
        if options.mode == Mode::Test && self.ctx.install {
            return Err(ConfigError::InstallSpaceUnsupported.into());
        }

        let resolution = self.resolve(options)?;

        if options.mode == Mode::List {
            let mut outcome = RunOutcome::new(RunStatus::Succeeded);
            outcome.listing = resolution.listing();
            for e in &resolution.errors {
                error!(package = e.package(), "{}", e);
                outcome.errors.push(e.to_string());
            }
            if !resolution.is_complete() {
                outcome.status = RunStatus::Failed;
            }
            return Ok(outcome);
        }

        let graph = self.build_graph(options, resolution)?;

        info!(phase = %Phase::Executing, jobs = graph.len());
        let (events, rx) = event_channel();
        let controller = StatusController::spawn(rx, self.reporter.clone());
        let (cancel, token) = cancel_pair();

        let mut outcome = RunOutcome::new(RunStatus::Failed);
        let execution = self.engine.execute(graph, events.clone(), token);
        tokio::pin!(execution);

        let status = tokio::select! {
            result = &mut execution => self.finish_execution(result, &mut outcome),
            _ = interrupt => {
                warn!("interrupt received, no new jobs will be started");
                cancel.cancel();
                match tokio::time::timeout(self.join_timeout, &mut execution).await {
                    Ok(Err(e)) => error!(error = %error_chain(&e), "engine failed while stopping"),
                    Ok(Ok(_)) => {}
                    Err(_) => warn!("running jobs did not stop within the grace period"),
                }
                RunStatus::Interrupted
            }
        };
        outcome.status = status;

        events.emit(ExecutionEvent::Shutdown);
        drop(events);
        if !controller.join(self.join_timeout).await {
            warn!("status output was cut short");
        }

        info!(status = ?outcome.status, "run finished");
        Ok(outcome)
    }

    fn finish_execution(
        &self,
        result: Result<bool, ExecutorError>,
        outcome: &mut RunOutcome,
    ) -> RunStatus {
        match result {
            Ok(true) => RunStatus::Succeeded,
            Ok(false) => RunStatus::Failed,
            Err(e) => {
                let chain = error_chain(&e);
                error!(error = %chain, "execution engine failed");
                outcome.errors.push(chain);
                RunStatus::Failed
            }
        }
    }
}
