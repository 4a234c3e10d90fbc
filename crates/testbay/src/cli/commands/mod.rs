//! CLI commands

mod completions;
mod env;
mod init;
mod list;

pub use completions::CompletionsCommand;
pub use env::EnvCommand;
pub use init::InitCommand;
pub use list::ListCommand;
pub use test::TestCommand;
