//! Console status output for test runs

use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;
use std::time::Duration;

use console::style;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

use testbay_tasks::{ExecutionEvent, JobId, JobReporter, JobStatus};

use super::output;

/// How job output reaches the terminal
#[derive(Debug, Clone)]
pub struct StatusOptions {
    /// Print stage events and buffered stdout
    pub verbose: bool,
    /// Print command output as it arrives instead of per job
    pub interleave: bool,
    /// Active status line refresh rate in Hz (`Some(0.0)` = unlimited,
    /// `None` = no status line)
    pub status_rate: Option<f64>,
}

#[derive(Default)]
struct Buffered {
    stdout: Vec<String>,
    stderr: Vec<String>,
}

#[derive(Default)]
struct State {
    total: usize,
    finished: usize,
    active: BTreeSet<JobId>,
    buffers: HashMap<JobId, Buffered>,
}

/// Reporter printing job progress, buffered output and a live status line
pub struct ConsoleReporter {
    options: StatusOptions,
    bar: Option<ProgressBar>,
    state: Mutex<State>,
}

/// Convert a status rate to an indicatif refresh rate
fn refresh_hz(rate: f64) -> u8 {
    if rate <= 0.0 {
        u8::MAX
    } else {
        rate.round().clamp(1.0, f64::from(u8::MAX)) as u8
    }
}

impl ConsoleReporter {
    pub fn new(options: StatusOptions) -> Self {
        let bar = options.status_rate.map(|rate| {
            let bar = ProgressBar::with_draw_target(
                None,
                ProgressDrawTarget::stderr_with_hz(refresh_hz(rate)),
            );
            if let Ok(template) = ProgressStyle::with_template("{spinner:.cyan} [{elapsed}] {msg}") {
                bar.set_style(template);
            }
            bar.enable_steady_tick(Duration::from_millis(100));
            bar
        });

        Self {
            options,
            bar,
            state: Mutex::new(State::default()),
        }
    }

    /// Print a line without tearing the status line
    fn print(&self, line: String) {
        match &self.bar {
            Some(bar) => bar.suspend(|| println!("{}", line)),
            None => println!("{}", line),
        }
    }

    fn refresh(&self, state: &State) {
        let Some(bar) = &self.bar else {
            return;
        };
        let active: Vec<&str> = state.active.iter().map(JobId::as_str).collect();
        bar.set_message(format!(
            "[{}/{} complete] [{} active] {}",
            state.finished,
            state.total,
            active.len(),
            active.join(", ")
        ));
    }

    fn job_finished(&self, state: &mut State, id: &JobId, status: &JobStatus, duration: Duration) {
        state.active.remove(id);
        state.finished += 1;
        let buffered = state.buffers.remove(id).unwrap_or_default();

        let elapsed = output::duration(duration);
        match status {
            JobStatus::Succeeded => {
                self.print(format!(
                    "{} {} {}",
                    style("Finished  <<<").green(),
                    style(id).bold(),
                    style(format!("[ {} ]", elapsed)).dim()
                ));
            }
            JobStatus::Failed(reason) => {
                self.print(format!(
                    "{} {} {} {}",
                    style("Failed    <<<").red().bold(),
                    style(id).bold(),
                    style(format!("[ {} ]", elapsed)).dim(),
                    style(reason).red()
                ));
            }
            JobStatus::Skipped { blocked_by } => {
                self.print(format!(
                    "{} {} {}",
                    style("Skipped   ---").yellow(),
                    style(id).bold(),
                    style(format!("(dependency {} did not succeed)", blocked_by)).dim()
                ));
            }
            JobStatus::Abandoned => {
                self.print(format!(
                    "{} {}",
                    style("Abandoned ---").yellow(),
                    style(id).bold()
                ));
            }
        }

        if self.options.verbose || !status.is_success() {
            for line in &buffered.stdout {
                self.print(format!("    {}", line));
            }
        }
        for line in &buffered.stderr {
            self.print(format!("    {}", style(line).red()));
        }
    }
}

impl JobReporter for ConsoleReporter {
    fn report(&self, event: &ExecutionEvent) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };

        match event {
            ExecutionEvent::JobQueued { .. } => {
                state.total += 1;
            }
            ExecutionEvent::JobStarted { id } => {
                state.active.insert(id.clone());
                self.print(format!("{} {}", style("Starting  >>>").cyan(), style(id).bold()));
            }
            ExecutionEvent::StageStarted { id, stage, command } => {
                if self.options.verbose {
                    let detail = command.as_deref().unwrap_or("");
                    self.print(format!(
                        "  {} {} {}",
                        style(format!("[{}:{}]", id, stage)).dim(),
                        style("started").dim(),
                        detail
                    ));
                }
            }
            ExecutionEvent::StageOutput {
                id,
                line,
                is_stderr,
                ..
            } => {
                if self.options.interleave {
                    let prefix = format!("[{}]", id);
                    if *is_stderr {
                        self.print(format!("{} {}", style(prefix).red().dim(), line));
                    } else {
                        self.print(format!("{} {}", style(prefix).dim(), line));
                    }
                } else {
                    let buffer = state.buffers.entry(id.clone()).or_default();
                    if *is_stderr {
                        buffer.stderr.push(line.clone());
                    } else {
                        buffer.stdout.push(line.clone());
                    }
                }
            }
            ExecutionEvent::StageFinished {
                id,
                stage,
                succeeded,
                duration,
            } => {
                if self.options.verbose {
                    self.print(format!(
                        "  {} {} {}",
                        style(format!("[{}:{}]", id, stage)).dim(),
                        if *succeeded {
                            style("finished").dim()
                        } else {
                            style("failed").red()
                        },
                        style(output::duration(*duration)).dim()
                    ));
                }
            }
            ExecutionEvent::JobFinished {
                id,
                status,
                duration,
            } => {
                self.job_finished(&mut state, id, status, *duration);
            }
            ExecutionEvent::AllCompleted {
                total,
                succeeded,
                failed,
                skipped,
                abandoned,
                duration,
            } => {
                if let Some(bar) = &self.bar {
                    bar.finish_and_clear();
                }
                let mark = if *failed == 0 && *abandoned == 0 && *skipped == 0 {
                    style("✓").green().bold()
                } else {
                    style("✗").red().bold()
                };
                println!();
                println!(
                    "{} {}/{} jobs succeeded, {} failed, {} skipped, {} abandoned [{}]",
                    mark,
                    succeeded,
                    total,
                    failed,
                    skipped,
                    abandoned,
                    output::duration(*duration)
                );
            }
            ExecutionEvent::Shutdown => {}
        }

        self.refresh(&state);
    }

    fn finish(&self) {
        if let Some(bar) = &self.bar {
            bar.finish_and_clear();
        }
    }
}
