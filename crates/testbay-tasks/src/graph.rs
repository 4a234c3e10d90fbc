//! Job graph construction

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info, instrument};

use testbay_core::config::ROOT_MAKEFILE;
use testbay_core::{
    handle_make_arguments, BuildContext, ConfigError, ConfiguredTestSet, ExecutableCache,
    MAKE_EXEC,
};

use crate::environment::{EnvironmentResolver, LoadEnv};
use crate::job::{CommandStage, FunctionStage, Job, JobEnv, JobId, Stage};

/// Identifier of the aggregation job that closes every graph
pub const RESULTS_CHECK_JOB: &str = "check_test_results";

/// Errors during graph construction
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    /// Two jobs share an identifier
    #[error("Duplicate job '{0}'")]
    DuplicateJob(JobId),

    /// A dependency does not name an earlier job
    #[error("Job '{job}' depends on '{dependency}', which is not defined before it")]
    UnknownDependency { job: JobId, dependency: JobId },

    /// The package build space has no root makefile
    #[error("Package '{package}' has no {} at {}; configure the package first", ROOT_MAKEFILE, .path.display())]
    MissingMakefile { package: String, path: PathBuf },

    /// A package name collides with the aggregation job
    #[error("Package '{0}' uses the name reserved for the results check job; rename the package")]
    ReservedPackageName(String),

    /// The graph does not end with the aggregation job
    #[error("Job graph must end with the '{}' job", RESULTS_CHECK_JOB)]
    MissingAggregation,

    /// Configuration prevents building jobs
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// The full ordered set of jobs for one run.
///
/// Every dependency names a job that appears earlier, so the order is a
/// topological order and the graph is acyclic.
#[derive(Debug, Clone)]
pub struct JobGraph {
    jobs: Vec<Job>,
    waves: Vec<Vec<JobId>>,
}

impl JobGraph {
    /// Validate and wrap an ordered job list
    pub fn new(jobs: Vec<Job>) -> Result<Self, GraphError> {
        let mut defined: HashSet<&JobId> = HashSet::new();
        for job in &jobs {
            for dep in &job.deps {
                if !defined.contains(dep) {
                    return Err(GraphError::UnknownDependency {
                        job: job.id.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
            if !defined.insert(&job.id) {
                return Err(GraphError::DuplicateJob(job.id.clone()));
            }
        }

        match jobs.last() {
            Some(last) if last.id.as_str() == RESULTS_CHECK_JOB => {}
            _ => return Err(GraphError::MissingAggregation),
        }

        let waves = compute_waves(&jobs);
        Ok(Self { jobs, waves })
    }

    /// Jobs in graph order
    pub fn jobs(&self) -> &[Job] {
        &self.jobs
    }

    /// Consume the graph, returning its jobs
    pub fn into_jobs(self) -> Vec<Job> {
        self.jobs
    }

    /// Get a job by id
    pub fn get(&self, id: &JobId) -> Option<&Job> {
        self.jobs.iter().find(|j| &j.id == id)
    }

    /// The aggregation job
    pub fn aggregation(&self) -> Option<&Job> {
        self.jobs.last()
    }

    /// Package jobs (everything except the aggregation job)
    pub fn package_jobs(&self) -> &[Job] {
        &self.jobs[..self.jobs.len().saturating_sub(1)]
    }

    /// Groups of jobs that may run in parallel
    pub fn waves(&self) -> &[Vec<JobId>] {
        &self.waves
    }

    /// Get the total number of jobs
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    /// Check if the graph is empty
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Get a human-readable summary of the execution plan
    pub fn execution_plan(&self) -> String {
        let mut plan = String::new();
        for (i, wave) in self.waves.iter().enumerate() {
            plan.push_str(&format!("Wave {} ({} jobs):\n", i, wave.len()));
            for id in wave {
                let Some(job) = self.get(id) else {
                    continue;
                };
                let commands: Vec<String> = job
                    .stages
                    .iter()
                    .map(|s| match s {
                        Stage::Command(c) => c.command_line(),
                        Stage::Function(f) => format!("<{}>", f.label),
                    })
                    .collect();
                let commands = if commands.is_empty() {
                    "<no stages>".to_string()
                } else {
                    commands.join(" && ")
                };
                if job.deps.is_empty() {
                    plan.push_str(&format!("  {} -> {}\n", id, commands));
                } else {
                    plan.push_str(&format!(
                        "  {} -> {} (after {} jobs)\n",
                        id,
                        commands,
                        job.deps.len()
                    ));
                }
            }
        }
        plan
    }
}

/// Compute execution waves (groups of jobs whose dependencies are all in
/// earlier waves)
fn compute_waves(jobs: &[Job]) -> Vec<Vec<JobId>> {
    let mut wave_map: HashMap<&JobId, usize> = HashMap::new();

    for job in jobs {
        let wave = job
            .deps
            .iter()
            .filter_map(|dep| wave_map.get(dep))
            .max()
            .map(|w| w + 1)
            .unwrap_or(0);
        wave_map.insert(&job.id, wave);
    }

    let max_wave = wave_map.values().max().copied().unwrap_or(0);
    let mut waves: Vec<Vec<JobId>> = vec![Vec::new(); max_wave + 1];
    for job in jobs {
        if let Some(&wave) = wave_map.get(&job.id) {
            waves[wave].push(job.id.clone());
        }
    }
    waves
}

/// Turns resolved test sets into a [`JobGraph`]
#[derive(Debug, Clone)]
pub struct GraphBuilder<'a> {
    ctx: &'a BuildContext,
    executables: Arc<ExecutableCache>,
    env_resolver: EnvironmentResolver,
    jobs: Option<usize>,
    makeflags: Option<String>,
    base_env: JobEnv,
}

impl<'a> GraphBuilder<'a> {
    /// Create a builder seeded with the process environment
    pub fn new(
        ctx: &'a BuildContext,
        executables: Arc<ExecutableCache>,
        env_resolver: EnvironmentResolver,
    ) -> Self {
        Self {
            ctx,
            executables,
            env_resolver,
            jobs: None,
            makeflags: std::env::var("MAKEFLAGS").ok(),
            base_env: std::env::vars().collect(),
        }
    }

    /// Build tool job count (`-j`)
    pub fn with_jobs(mut self, jobs: Option<usize>) -> Self {
        self.jobs = jobs;
        self
    }

    /// Override the environment every job starts from
    pub fn with_base_env(mut self, env: JobEnv) -> Self {
        self.makeflags = env.get("MAKEFLAGS").cloned();
        self.base_env = env;
        self
    }

    /// Job that runs every configured test target of one package
    pub fn package_job(&self, set: &ConfiguredTestSet) -> Result<Job, GraphError> {
        let name = set.name();
        if name == RESULTS_CHECK_JOB {
            return Err(GraphError::ReservedPackageName(name.to_string()));
        }
        let build_space = self.ctx.package_build_space(name);
        let makefile = build_space.join(ROOT_MAKEFILE);
        if !makefile.is_file() {
            return Err(GraphError::MissingMakefile {
                package: name.to_string(),
                path: makefile,
            });
        }

        let loadenv = FunctionStage {
            label: "loadenv".to_string(),
            func: Arc::new(LoadEnv::for_package(
                self.ctx,
                name,
                self.env_resolver.clone(),
            )),
        };

        let mut args = self.ctx.build_tool_args();
        args.extend(set.build_targets());
        let args = handle_make_arguments(args, self.jobs, self.makeflags.as_deref());

        let make = CommandStage {
            label: "make".to_string(),
            program: self.executables.resolve(MAKE_EXEC)?,
            args,
            cwd: build_space,
        };

        debug!(package = name, targets = set.targets.len(), "built package job");
        Ok(Job::new(name, self.base_env.clone())
            .with_stage(Stage::Function(loadenv))
            .with_stage(Stage::Command(make)))
    }

    /// Aggregation job depending on every package job; has no stages
    pub fn results_check_job(&self, package_jobs: &[JobId]) -> Job {
        let mut job = Job::new(RESULTS_CHECK_JOB, self.base_env.clone());
        job.deps = package_jobs.to_vec();
        job
    }

    /// Build the whole graph; any failing package aborts construction
    #[instrument(skip_all, fields(packages = sets.len()))]
    pub fn build(&self, sets: &[ConfiguredTestSet]) -> Result<JobGraph, GraphError> {
        let mut jobs = sets
            .iter()
            .map(|set| self.package_job(set))
            .collect::<Result<Vec<_>, _>>()?;

        let ids: Vec<JobId> = jobs.iter().map(|j| j.id.clone()).collect();
        jobs.push(self.results_check_job(&ids));

        let graph = JobGraph::new(jobs)?;
        info!(
            job_count = graph.len(),
            wave_count = graph.waves().len(),
            "job graph built"
        );
        Ok(graph)
    }
}
