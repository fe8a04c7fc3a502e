// CLI subcommands

pub mod groups;
pub mod maintenance;
pub mod tasks;
