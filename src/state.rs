use std::{collections::BTreeMap, fs::read_to_string, io::Write, path::Path};

use anyhow::Context;
use log::debug;
use serde_derive::{Deserialize, Serialize};

use crate::{project_runner::ProjectRunnerState, runner::RunnerState};

/// Everything known about the managed resources, keyed by resource name
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct ProviderState {
    #[serde(default)]
    pub runners: BTreeMap<String, RunnerState>,
    #[serde(default)]
    pub project_runners: BTreeMap<String, ProjectRunnerState>,
}

impl ProviderState {
    pub fn is_empty(&self) -> bool {
        self.runners.is_empty() && self.project_runners.is_empty()
    }
}

pub fn read_state(filename: &Path) -> anyhow::Result<ProviderState> {
    let content = match read_to_string(filename) {
        Ok(str) => str,
        Err(e) => match e.kind() {
            // no state file means no managed resources
            std::io::ErrorKind::NotFound => String::new(),
            // everything else is a true error
            _ => Err(e)?,
        },
    };
    Ok(toml::from_str(&content)?)
}

#[cfg(unix)]
fn create_private_file(filename: &Path) -> std::io::Result<std::fs::File> {
    use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
    let file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(filename)?;
    // a leftover file keeps its old mode
    file.set_permissions(std::fs::Permissions::from_mode(0o600))?;
    Ok(file)
}

#[cfg(not(unix))]
fn create_private_file(filename: &Path) -> std::io::Result<std::fs::File> {
    std::fs::File::create(filename)
}

/// Writes the state next to its final location first, so a crash never leaves a truncated state file
pub fn write_state(filename: &Path, state: &ProviderState) -> anyhow::Result<()> {
    if let Some(parent) = filename.parent() {
        std::fs::create_dir_all(parent)
            .context(format!("Failed creating state directory {:?}", parent))?;
    }
    let content = format!(
        "# autogenerated by gitlab-runner-provider, contains secrets\n{}",
        toml::to_string(state)?
    );
    let tmp_filename = filename.with_extension("toml.tmp");
    // the state holds tokens, only the owner may read it
    let mut file = create_private_file(&tmp_filename)
        .context(format!("Failed creating {:?}", tmp_filename))?;
    file.write_all(content.as_bytes())?;
    file.sync_all()?;
    debug!("Renaming {:?} to {:?}", tmp_filename, filename);
    std::fs::rename(&tmp_filename, filename)
        .context(format!("Renaming {:?} to {:?}", tmp_filename, filename))?;
    Ok(())
}
