//! List command - show configured tests without running them

use clap::Args;

use crate::cli::{Cli, RunCommand};

use super::TestCommand;

/// List the configured tests of workspace packages
#[derive(Debug, Args)]
pub struct ListCommand {
    /// Workspace packages to list (default: every package)
    #[arg(value_name = "PKGNAME")]
    pub packages: Vec<String>,

    /// List the package containing the current directory
    #[arg(long)]
    pub this: bool,

    /// Only list these tests
    #[arg(short, long, num_args = 1..)]
    pub tests: Vec<String>,
}

impl ListCommand {
    fn as_test_command(&self) -> TestCommand {
        TestCommand {
            packages: self.packages.clone(),
            this: self.this,
            tests: self.tests.clone(),
            list: true,
            ..Default::default()
        }
    }
}

impl RunCommand for ListCommand {
    fn run(&self, cli: &Cli) -> anyhow::Result<i32> {
        self.as_test_command().run(cli)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_is_test_in_list_mode() {
        let cmd = ListCommand {
            packages: vec!["a".to_string()],
            this: false,
            tests: vec!["unit".to_string()],
        }
        .as_test_command();
        assert!(cmd.list);
        assert!(cmd.get_env.is_none());
        assert_eq!(cmd.packages, vec!["a"]);
        assert_eq!(cmd.tests, vec!["unit"]);
    }
}
