use anyhow::Context;
use documented::DocumentedFields;
use inkjet::{
    formatter::Terminal,
    theme::{vendored, Theme},
    Highlighter, Language,
};
use itertools::Itertools;
use log::warn;
use std::{
    collections::{BTreeMap, BTreeSet},
    fs::read_to_string,
    io::Write,
    path::{Path, PathBuf},
};
use struct_field_names_as_array::FieldNamesAsArray;
use termcolor::{ColorChoice, StandardStream};
use toml_edit::{DocumentMut, RawString};

use serde_derive::{Deserialize, Serialize};

use crate::{resource::Sensitive, schema, template::expand_provider_config};

pub const CONFIG_FILE_NAME: &str = "gitlab-runner-provider.toml";
pub const DATA_DIR_NAME: &str = "gitlab-runner-provider";
pub const STATE_FILE_NAME: &str = "gitlab-runner-provider.state.toml";

pub fn get_default_config_file_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(CONFIG_FILE_NAME)
}

pub fn get_default_state_file_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(DATA_DIR_NAME)
        .join(STATE_FILE_NAME)
}

pub fn get_token_placeholder() -> String {
    "enter-your-token-here".into()
}

#[derive(Debug, Clone, Default, PartialEq, DocumentedFields, FieldNamesAsArray, Deserialize, Serialize)]
pub struct RunnerConfig {
    /// Token used to register the runner with its project, group or instance, will be variable-expanded.
    /// Changing it registers a new runner
    pub registration_token: Sensitive,
    /// Free-form description of the runner, will be variable-expanded
    pub description: Option<String>,
    /// Which jobs the runner accepts: "not_protected" or "ref_protected" (case-insensitive)
    pub access_level: Option<String>,
    /// Whether the runner is locked to its current projects
    pub locked: Option<bool>,
    /// Whether the runner picks up jobs, inactive runners are paused
    pub active: Option<bool>,
    /// Whether the runner picks up jobs without tags
    pub run_untagged: Option<bool>,
    /// Maximum job timeout in seconds, at least 600
    pub maximum_timeout: Option<u64>,
    /// Tags of jobs the runner picks up.
    /// Leaving this out or setting it to an empty list keeps the tags configured in GitLab
    pub tags: Option<BTreeSet<String>>,
}

#[derive(Debug, Clone, PartialEq, DocumentedFields, FieldNamesAsArray, Deserialize, Serialize)]
pub struct ProjectRunnerConfig {
    /// ID of the project to enable the runner in, changing it re-creates the assignment
    pub project_id: u64,
    /// ID of an existing runner, mutually exclusive with `runner`
    pub runner_id: Option<u64>,
    /// Name of a runner declared in the [runners] section, mutually exclusive with `runner_id`
    pub runner: Option<String>,
}

#[derive(Debug, Clone, DocumentedFields, FieldNamesAsArray, Deserialize, Serialize)]
pub struct ProviderConfig {
    /// GitLab hostname, will be variable-expanded
    pub hostname: String,
    /// GitLab access token with the api scope (or create_runner, manage_runner), will be variable-expanded
    pub token: Sensitive,
    /// Runners to register, keyed by their resource name
    #[serde(default)]
    pub runners: BTreeMap<String, RunnerConfig>,
    /// Runners to enable in projects, keyed by their resource name
    #[serde(default)]
    pub project_runners: BTreeMap<String, ProjectRunnerConfig>,
}

fn strs_to_strings(strs: &[&str]) -> BTreeSet<String> {
    strs.iter().map(|&s| s.into()).collect()
}

pub fn get_example_config() -> ProviderConfig {
    ProviderConfig {
        hostname: "gitlab.com".into(),
        token: Sensitive::new(get_token_placeholder()),
        runners: [(
            "docker".to_owned(),
            RunnerConfig {
                registration_token: Sensitive::new("$GITLAB_REGISTRATION_TOKEN"),
                description: Some("$NAME runner".into()),
                access_level: Some("not_protected".into()),
                locked: Some(false),
                active: Some(true),
                run_untagged: Some(false),
                maximum_timeout: Some(3600),
                tags: Some(strs_to_strings(&["docker", "shared"])),
            },
        )]
        .into_iter()
        .collect(),
        project_runners: [(
            "docker-in-tools".to_owned(),
            ProjectRunnerConfig {
                project_id: 7,
                runner_id: None,
                runner: Some("docker".into()),
            },
        )]
        .into_iter()
        .collect(),
    }
}

/// Reads the configuration, validates every resource block against its schema
/// and expands variables
pub fn read_config(filename: &Path) -> anyhow::Result<ProviderConfig> {
    let content = read_to_string(filename)?;
    parse_config(&content)
}

pub fn parse_config(content: &str) -> anyhow::Result<ProviderConfig> {
    let table: toml::Table = content.parse()?;
    schema::validate_config_table(&table)?;
    let parsed: ProviderConfig = toml::from_str(content)?;
    if parsed.token.expose() == get_token_placeholder() {
        warn!("token uses placeholder value, API operations will fail")
    }
    schema::validate_config(&parsed)?;
    expand_provider_config(&parsed)
}

fn annotate_toml_table<T: DocumentedFields>(table: &mut toml_edit::Table) {
    for (mut key, value) in table.iter_mut() {
        let key_name = key.get().to_owned();
        let comments = T::get_field_docs(key_name).map_or("".into(), |comment| {
            format!("# {}\n", comment.lines().join("\n# "))
        });
        match value {
            toml_edit::Item::None => (),
            toml_edit::Item::Value(_) => {
                key.leaf_decor_mut().set_prefix(comments);
            }
            toml_edit::Item::Table(table) => {
                let original_decor = table
                    .decor()
                    .prefix()
                    .map_or(RawString::default(), |v| v.to_owned());
                table.decor_mut().set_prefix(format!(
                    "{}{}",
                    original_decor.as_str().unwrap_or(""),
                    comments
                ));
            }
            // doesn't appear in our configuration
            toml_edit::Item::ArrayOfTables(_) => (),
        };
    }
}

fn annotate_named_tables<T: DocumentedFields>(document: &mut DocumentMut, section: &str) {
    if let Some(tables) = document.get_mut(section).and_then(|v| v.as_table_mut()) {
        tables.set_implicit(false);
        for (_, table) in tables.iter_mut() {
            if let Some(table) = table.as_table_mut() {
                annotate_toml_table::<T>(table);
            }
        }
    }
}

pub fn get_example_config_str() -> anyhow::Result<String> {
    let config = get_example_config();
    let mut document = toml::to_string_pretty(&config)?.parse::<DocumentMut>()?;
    annotate_toml_table::<ProviderConfig>(document.as_table_mut());
    annotate_named_tables::<RunnerConfig>(&mut document, "runners");
    annotate_named_tables::<ProjectRunnerConfig>(&mut document, "project_runners");
    Ok(document.to_string())
}

pub fn print_example_config_highlighted() -> anyhow::Result<()> {
    let config = get_example_config_str()?;
    let mut highlighter = Highlighter::new();
    let language = Language::Toml;
    let theme: Theme = Theme::from_helix(vendored::BASE16_TERMINAL)?;
    let stream = StandardStream::stdout(ColorChoice::Auto);
    let formatter = Terminal::new(theme, stream);
    highlighter.highlight_to_writer(language, &formatter, &config, &mut std::io::sink())?;
    println!();
    Ok(())
}

pub fn write_example_config(filename: &Path) -> anyhow::Result<()> {
    let mut file = std::fs::File::create_new(filename)
        .context(format!("Failed creating config file {:?}", filename))?;
    file.write_all(get_example_config_str()?.as_bytes())?;
    Ok(())
}
