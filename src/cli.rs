use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use clap_verbosity_flag::{InfoLevel, Verbosity};

use crate::config;

#[derive(Debug, Args)]
pub struct Paths {
    /// Configuration file declaring the provider and its resources
    #[arg(long, default_value = config::get_default_config_file_path().into_os_string())]
    pub config_file: PathBuf,
    /// State file recording the managed resources, their IDs and tokens.
    /// It is created on the first `apply`
    #[arg(long, default_value = config::get_default_state_file_path().into_os_string(), verbatim_doc_comment)]
    pub state_file: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ResourceKind {
    /// A runner, imported by its numeric ID
    Runner,
    /// A runner enabled in a project, imported by `project_id:runner_id`
    ProjectRunner,
}

#[derive(Debug, Args)]
pub struct ImportOptions {
    /// The kind of resource to import
    pub kind: ResourceKind,
    /// The name to record the resource under, matching its config section
    pub name: String,
    /// The ID of the existing resource
    pub id: String,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Creates an example configuration file
    CreateExampleConfig,
    /// Prints the example configuration
    ShowExampleConfig,
    /// Checks the configuration for validity
    CheckConfig,
    /// Lists the attributes of all resource types
    ShowSchema,
    /// Prints the recorded state, secrets are masked
    ShowState,
    /// Creates, updates and deletes resources until they match the configuration
    Apply,
    /// Re-reads all recorded resources from GitLab
    Refresh,
    /// Deletes all recorded resources
    Destroy,
    /// Adds an existing resource to the state
    Import(ImportOptions),
}

#[derive(Parser, Debug)]
pub struct CliOptions {
    #[command(subcommand)]
    pub command: Command,
    /// Config file paths
    #[command(flatten)]
    pub paths: Paths,
    #[command(flatten)]
    pub verbose: Verbosity<InfoLevel>,
}
