use clap::Parser;

/// Reconciliation of the declared resources against the recorded state
mod apply;
/// Tools to check configuration validity and inspect schemas and state
mod check_config;
/// All CLI arguments
mod cli;
/// All config structs read from the provider configuration file
mod config;
/// In-memory GitLab for tests
#[cfg(test)]
mod fake_gitlab;
/// All functions related to the GitLab API
mod gitlab_wrap;
/// The runner-in-project association resource
mod project_runner;
/// Types shared by all resources
mod resource;
/// The runner resource
mod runner;
/// Attribute schemas of all resource types
mod schema;
/// Persistence of the managed resources
mod state;
/// All functions related to variable expansion
mod template;

fn main() -> anyhow::Result<()> {
    let cli = cli::CliOptions::parse();
    simple_logger::SimpleLogger::new()
        .with_level(cli.verbose.log_level_filter())
        .init()?;
    match cli.command {
        cli::Command::CreateExampleConfig => config::write_example_config(&cli.paths.config_file),
        cli::Command::ShowExampleConfig => config::print_example_config_highlighted(),
        cli::Command::CheckConfig => check_config::check(&cli.paths),
        cli::Command::ShowSchema => check_config::show_schema(),
        cli::Command::ShowState => check_config::show_state(&cli.paths),
        cli::Command::Apply => apply::apply(&cli.paths),
        cli::Command::Refresh => apply::refresh(&cli.paths),
        cli::Command::Destroy => apply::destroy(&cli.paths),
        cli::Command::Import(options) => apply::import(&cli.paths, &options),
    }
}
