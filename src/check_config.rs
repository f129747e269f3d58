use anyhow::Context;
use colored::Colorize;
use itertools::Itertools;
use log::info;

use crate::{
    cli,
    config::read_config,
    schema::{project_runner_schema, runner_schema, Attribute, AttributeType, ResourceSchema},
    state::read_state,
};

pub fn check(paths: &cli::Paths) -> anyhow::Result<()> {
    let config = read_config(&paths.config_file).context(format!(
        "Failed reading config file {:?}",
        paths.config_file
    ))?;
    info!(
        "Config check successful, {} runners and {} project runners declared",
        config.runners.len(),
        config.project_runners.len()
    );
    Ok(())
}

fn describe_attribute(attribute: &Attribute, indent: usize) -> String {
    let mut lines = vec![format!(
        "{:indent$}{} {} ({})",
        "",
        attribute.name.bold(),
        attribute.kind.to_string().cyan(),
        attribute.flags().join(", "),
        indent = indent
    )];
    if let AttributeType::List(fields) = &attribute.kind {
        lines.extend(fields.iter().map(|f| describe_attribute(f, indent + 4)));
    }
    lines.join("\n")
}

fn describe_schema(schema: &ResourceSchema) -> String {
    format!(
        "{}\n{}",
        schema.type_name.green(),
        schema
            .attributes
            .iter()
            .map(|a| describe_attribute(a, 2))
            .join("\n")
    )
}

pub fn show_schema() -> anyhow::Result<()> {
    for schema in [runner_schema(), project_runner_schema()] {
        println!("{}", describe_schema(&schema));
    }
    Ok(())
}

pub fn show_state(paths: &cli::Paths) -> anyhow::Result<()> {
    let state = read_state(&paths.state_file).context(format!(
        "Failed reading state file {:?}",
        paths.state_file
    ))?;
    if state.is_empty() {
        info!("No resources recorded in {:?}", paths.state_file);
        return Ok(());
    }
    for (name, runner) in &state.runners {
        println!("{}", format!("runner {}", name).green());
        println!("{:#?}", runner);
    }
    for (name, project_runner) in &state.project_runners {
        println!("{}", format!("project runner {}", name).green());
        println!("{:#?}", project_runner);
    }
    Ok(())
}
