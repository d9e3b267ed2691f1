//! CLI commands

mod completions;
mod init;
mod plan;
mod run;
mod validate;

pub use completions::CompletionsCommand;
pub use init::InitCommand;
pub use plan::PlanCommand;
pub use run::{RunCommand, TasksFailed};
pub use validate::ValidateCommand;
