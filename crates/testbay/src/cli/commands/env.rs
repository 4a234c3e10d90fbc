//! Env command - print the environment a package's tests run with

use clap::Args;

use crate::cli::{Cli, RunCommand};

use super::TestCommand;

/// Print the environment a package's tests run with
#[derive(Debug, Args)]
pub struct EnvCommand {
    /// Package to load the environment for
    #[arg(value_name = "PKGNAME")]
    pub package: String,
}

impl RunCommand for EnvCommand {
    fn run(&self, cli: &Cli) -> anyhow::Result<i32> {
        TestCommand {
            get_env: Some(self.package.clone()),
            ..Default::default()
        }
        .run(cli)
    }
}
