//! CLI commands

mod cache;
mod init;
mod run;

pub use cache::CacheCommand;
pub use init::InitCommand;
pub use run::RunCommand;
