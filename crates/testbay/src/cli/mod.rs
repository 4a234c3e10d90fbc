//! CLI definition and command registry

pub mod commands;
pub mod output;
pub mod status;

use std::ffi::OsString;
use std::path::PathBuf;

use anyhow::Context;
use clap::{ArgMatches, Args, Command, CommandFactory, FromArgMatches, Parser};

use testbay_core::config::{load_workspace, WorkspaceConfig};
use testbay_core::BuildContext;

use commands::{CompletionsCommand, EnvCommand, InitCommand, ListCommand, TestCommand};

/// testbay - run the tests of a configured multi-package workspace
#[derive(Debug, Parser)]
#[command(name = "testbay")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Show stage events and buffered command output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Output format
    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// Workspace directory (defaults to the current directory)
    #[arg(short, long, global = true, env = "TESTBAY_WORKSPACE")]
    pub workspace: Option<PathBuf>,
}

/// Output format for CLI
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output
    #[default]
    Text,
    /// JSON output
    Json,
}

impl Cli {
    /// Directory the workspace search starts from
    pub fn workspace_dir(&self) -> anyhow::Result<PathBuf> {
        match &self.workspace {
            Some(dir) => Ok(dir.clone()),
            None => Ok(std::env::current_dir()?),
        }
    }

    /// Load the workspace configuration and build context
    pub fn load_workspace(&self) -> anyhow::Result<(WorkspaceConfig, BuildContext)> {
        let dir = self.workspace_dir()?;
        let (config, root) = load_workspace(&dir)
            .with_context(|| format!("Failed to load workspace at {}", dir.display()))?;
        let ctx = BuildContext::from_config(&config, &root);
        Ok((config, ctx))
    }

    /// Whether human-readable progress should be printed
    pub fn shows_text(&self) -> bool {
        !self.quiet && self.format == OutputFormat::Text
    }
}

/// A command that can be registered in the [`CommandRegistry`]
pub trait RunCommand: Args + FromArgMatches {
    /// Execute the command, returning the process exit code
    fn run(&self, cli: &Cli) -> anyhow::Result<i32>;
}

/// Entry point of a registered command
pub type CommandEntry = fn(&Cli, &ArgMatches) -> anyhow::Result<i32>;

fn entry<C: RunCommand>(cli: &Cli, matches: &ArgMatches) -> anyhow::Result<i32> {
    let command = C::from_arg_matches(matches)?;
    command.run(cli)
}

/// Name, argument schema and entry point of one command
#[derive(Clone, Copy)]
pub struct CommandSpec {
    pub name: &'static str,
    pub about: &'static str,
    pub args: fn(Command) -> Command,
    pub entry: CommandEntry,
}

impl CommandSpec {
    /// Spec for a command type
    pub fn of<C: RunCommand>(name: &'static str, about: &'static str) -> Self {
        Self {
            name,
            about,
            args: C::augment_args,
            entry: entry::<C>,
        }
    }

    fn command(&self) -> Command {
        (self.args)(Command::new(self.name).about(self.about))
    }
}

/// Static table of the commands this binary provides
pub struct CommandRegistry {
    commands: Vec<CommandSpec>,
}

impl CommandRegistry {
    /// Registry with every built-in command
    pub fn builtin() -> Self {
        Self {
            commands: vec![
                CommandSpec::of::<TestCommand>("test", "Build and run the tests of workspace packages"),
                CommandSpec::of::<ListCommand>("list", "List the configured tests of workspace packages"),
                CommandSpec::of::<EnvCommand>("env", "Print the environment a package's tests run with"),
                CommandSpec::of::<InitCommand>("init", "Write a default workspace configuration"),
                CommandSpec::of::<CompletionsCommand>("completions", "Generate shell completions"),
            ],
        }
    }

    /// Look up a command by name
    pub fn get(&self, name: &str) -> Option<&CommandSpec> {
        self.commands.iter().find(|c| c.name == name)
    }

    /// Registered command names, in registration order
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.commands.iter().map(|c| c.name)
    }

    /// Full clap command tree
    pub fn command(&self) -> Command {
        self.commands.iter().fold(
            Cli::command()
                .subcommand_required(true)
                .arg_required_else_help(true),
            |cmd, spec| cmd.subcommand(spec.command()),
        )
    }

    /// Parse `args` and run the selected command.
    ///
    /// Help, version and usage errors are printed by clap, which exits.
    pub fn dispatch<I, T>(&self, args: I) -> anyhow::Result<i32>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let matches = self.command().get_matches_from(args);
        self.run_matches(&matches)
    }

    fn run_matches(&self, matches: &ArgMatches) -> anyhow::Result<i32> {
        let cli = Cli::from_arg_matches(matches)?;
        let (name, sub) = matches
            .subcommand()
            .ok_or_else(|| anyhow::anyhow!("No command given"))?;
        let spec = self
            .get(name)
            .ok_or_else(|| anyhow::anyhow!("Unknown command '{}'", name))?;
        (spec.entry)(&cli, sub)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> ArgMatches {
        CommandRegistry::builtin()
            .command()
            .try_get_matches_from(args)
            .unwrap()
    }

    #[test]
    fn test_registry_is_consistent() {
        CommandRegistry::builtin().command().debug_assert();
    }

    #[test]
    fn test_registry_names() {
        let registry = CommandRegistry::builtin();
        let names: Vec<_> = registry.names().collect();
        assert_eq!(names, vec!["test", "list", "env", "init", "completions"]);
        assert!(registry.get("test").is_some());
        assert!(registry.get("build").is_none());
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let matches = parse(&["testbay", "test", "-v", "--workspace", "/ws", "pkg_a"]);
        let cli = Cli::from_arg_matches(&matches).unwrap();
        assert!(cli.verbose);
        assert_eq!(cli.workspace, Some(PathBuf::from("/ws")));

        let (name, sub) = matches.subcommand().unwrap();
        assert_eq!(name, "test");
        let cmd = TestCommand::from_arg_matches(sub).unwrap();
        assert_eq!(cmd.packages, vec!["pkg_a"]);
    }

    #[test]
    fn test_subcommand_required() {
        let result = CommandRegistry::builtin()
            .command()
            .try_get_matches_from(["testbay"]);
        assert!(result.is_err());
    }
}
