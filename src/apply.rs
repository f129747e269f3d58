use std::{fmt::Display, path::Path};

use anyhow::{anyhow, Context};
use futures::future::join_all;
use log::{error, info, warn};

use crate::{
    cli::{ImportOptions, Paths, ResourceKind},
    config::{read_config, ProjectRunnerConfig, ProviderConfig, RunnerConfig},
    gitlab_wrap::{init_client, RunnerApi},
    project_runner::{self, encode_id, ProjectRunnerState},
    resource::ReadOutcome,
    runner::{self, CreateError, RunnerState},
    state::{read_state, write_state, ProviderState},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Change {
    Created,
    Updated,
    Replaced,
    Unchanged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Removal {
    Deleted,
    /// already gone on the server
    Cleared,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Summary {
    pub created: usize,
    pub updated: usize,
    pub replaced: usize,
    pub unchanged: usize,
    pub deleted: usize,
    pub cleared: usize,
}

impl Summary {
    fn count(&mut self, change: Change) {
        match change {
            Change::Created => self.created += 1,
            Change::Updated => self.updated += 1,
            Change::Replaced => self.replaced += 1,
            Change::Unchanged => self.unchanged += 1,
        }
    }

    fn count_removal(&mut self, removal: Removal) {
        match removal {
            Removal::Deleted => self.deleted += 1,
            Removal::Cleared => self.cleared += 1,
        }
    }
}

impl Display for Summary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} created, {} updated, {} replaced, {} unchanged, {} deleted, {} already gone",
            self.created, self.updated, self.replaced, self.unchanged, self.deleted, self.cleared
        )
    }
}

/// The new state after a batch of operations, failed operations keep their prior state entry
pub struct Outcome {
    pub state: ProviderState,
    pub summary: Summary,
    pub errors: Vec<anyhow::Error>,
}

async fn apply_runner<C: RunnerApi>(
    client: &C,
    name: &str,
    config: &RunnerConfig,
    prior: Option<&RunnerState>,
) -> Result<(Change, RunnerState), CreateError> {
    let Some(prior) = prior else {
        return Ok((Change::Created, runner::create(client, config).await?));
    };
    let current = match runner::read(client, prior).await? {
        ReadOutcome::Confirmed(current) => current,
        ReadOutcome::Cleared => {
            warn!("Runner {} is missing, will recreate it", name);
            return Ok((Change::Created, runner::create(client, config).await?));
        }
    };
    if runner::requires_replacement(config, &current) {
        info!("Registration token of runner {} changed, replacing it", name);
        runner::delete(client, &current).await?;
        return Ok((Change::Replaced, runner::create(client, config).await?));
    }
    if !runner::has_changes(config, &current) {
        let current = RunnerState {
            registration_token: config.registration_token.clone(),
            ..current
        };
        return Ok((Change::Unchanged, current));
    }
    match runner::update(client, &current, config).await? {
        ReadOutcome::Confirmed(updated) => Ok((Change::Updated, updated)),
        ReadOutcome::Cleared => {
            warn!("Runner {} vanished during its update, will recreate it", name);
            Ok((Change::Created, runner::create(client, config).await?))
        }
    }
}

async fn remove_runner<C: RunnerApi>(client: &C, state: &RunnerState) -> anyhow::Result<Removal> {
    match runner::read(client, state).await? {
        ReadOutcome::Confirmed(current) => {
            runner::delete(client, &current).await?;
            Ok(Removal::Deleted)
        }
        ReadOutcome::Cleared => Ok(Removal::Cleared),
    }
}

async fn apply_project_runner<C: RunnerApi>(
    client: &C,
    name: &str,
    project_id: u64,
    runner_id: u64,
    prior: Option<&ProjectRunnerState>,
) -> anyhow::Result<(Change, ProjectRunnerState)> {
    let mut change = Change::Created;
    if let Some(prior) = prior {
        match project_runner::read(client, &prior.id).await? {
            ReadOutcome::Confirmed(current) if current.id == encode_id(project_id, runner_id) => {
                return Ok((Change::Unchanged, current))
            }
            ReadOutcome::Confirmed(current) => {
                info!("Project runner {} changed, replacing it", name);
                project_runner::delete(client, &current.id).await?;
                change = Change::Replaced;
            }
            ReadOutcome::Cleared => warn!("Project runner {} is missing, will recreate it", name),
        }
    }
    match project_runner::create(client, project_id, runner_id).await? {
        ReadOutcome::Confirmed(state) => Ok((change, state)),
        ReadOutcome::Cleared => Err(anyhow!(
            "Runner {} is not listed in project {} after enabling it",
            runner_id,
            project_id
        )),
    }
}

async fn remove_project_runner<C: RunnerApi>(
    client: &C,
    state: &ProjectRunnerState,
) -> anyhow::Result<Removal> {
    match project_runner::read(client, &state.id).await? {
        ReadOutcome::Confirmed(current) => {
            project_runner::delete(client, &current.id).await?;
            Ok(Removal::Deleted)
        }
        ReadOutcome::Cleared => Ok(Removal::Cleared),
    }
}

fn resolve_runner_id(config: &ProjectRunnerConfig, runners: &ProviderState) -> anyhow::Result<u64> {
    match (config.runner_id, &config.runner) {
        (Some(runner_id), _) => Ok(runner_id),
        (None, Some(name)) => runners
            .runners
            .get(name)
            .map(|runner| runner.runner_id)
            .ok_or_else(|| anyhow!("Runner {} is not available", name)),
        (None, None) => Err(anyhow!("No runner given")),
    }
}

/// Bring the server in line with the configuration.
/// Removed project runners are disabled before runners change, and runners exist before
/// they are enabled in projects.
pub async fn reconcile<C: RunnerApi>(
    client: &C,
    config: &ProviderConfig,
    prior: &ProviderState,
) -> Outcome {
    let mut state = ProviderState::default();
    let mut summary = Summary::default();
    let mut errors = Vec::new();

    // first disable project runners that are no longer declared
    let to_disable: Vec<_> = prior
        .project_runners
        .iter()
        .filter(|(name, _)| !config.project_runners.contains_key(*name))
        .collect();
    let disable_results = join_all(
        to_disable
            .iter()
            .map(|(_, prior)| remove_project_runner(client, prior)),
    )
    .await;
    for ((name, prior), result) in to_disable.into_iter().zip(disable_results) {
        match result {
            Ok(removal) => summary.count_removal(removal),
            Err(e) => {
                error!(
                    "Disabling project runner {} failed, keeping it in the state: {:#}",
                    name, e
                );
                state.project_runners.insert(name.clone(), prior.clone());
                errors.push(e);
            }
        }
    }

    // then create, update or replace all declared runners
    let runner_results = join_all(config.runners.iter().map(|(name, runner)| {
        apply_runner(client, name, runner, prior.runners.get(name))
    }))
    .await;
    for ((name, _), result) in config.runners.iter().zip(runner_results) {
        match result {
            Ok((change, runner)) => {
                summary.count(change);
                state.runners.insert(name.clone(), runner);
            }
            Err(CreateError { registered, error }) => {
                error!("Applying runner {} failed: {:#}", name, error);
                // a runner registered before the failure replaces the prior one
                if let Some(runner) = registered.or_else(|| prior.runners.get(name).cloned()) {
                    state.runners.insert(name.clone(), runner);
                }
                errors.push(error);
            }
        }
    }

    // delete runners that are no longer declared
    let to_delete: Vec<_> = prior
        .runners
        .iter()
        .filter(|(name, _)| !config.runners.contains_key(*name))
        .collect();
    let delete_results =
        join_all(to_delete.iter().map(|(_, prior)| remove_runner(client, prior))).await;
    for ((name, prior), result) in to_delete.into_iter().zip(delete_results) {
        match result {
            Ok(removal) => summary.count_removal(removal),
            Err(e) => {
                error!(
                    "Deletion of runner {} failed, keeping it in the state: {:#}",
                    name, e
                );
                state.runners.insert(name.clone(), prior.clone());
                errors.push(e);
            }
        }
    }

    // finally enable the declared project runners
    let targets: Vec<_> = config
        .project_runners
        .iter()
        .map(|(name, project_runner)| {
            (
                name,
                project_runner.project_id,
                resolve_runner_id(project_runner, &state),
            )
        })
        .collect();
    let enable_results = join_all(targets.iter().map(|(name, project_id, runner_id)| async move {
        let runner_id = match runner_id {
            Ok(runner_id) => *runner_id,
            Err(e) => return Err(anyhow!("{}", e)),
        };
        apply_project_runner(
            client,
            name,
            *project_id,
            runner_id,
            prior.project_runners.get(*name),
        )
        .await
    }))
    .await;
    for ((name, _, _), result) in targets.into_iter().zip(enable_results) {
        match result {
            Ok((change, project_runner)) => {
                summary.count(change);
                state.project_runners.insert(name.clone(), project_runner);
            }
            Err(e) => {
                error!("Applying project runner {} failed: {:#}", name, e);
                if let Some(prior) = prior.project_runners.get(name) {
                    state.project_runners.insert(name.clone(), prior.clone());
                }
                errors.push(e);
            }
        }
    }

    Outcome {
        state,
        summary,
        errors,
    }
}

/// Re-read every resource in the state, dropping the ones that no longer exist
pub async fn refresh_state<C: RunnerApi>(client: &C, prior: &ProviderState) -> Outcome {
    let mut state = ProviderState::default();
    let mut summary = Summary::default();
    let mut errors = Vec::new();
    let runner_results =
        join_all(prior.runners.values().map(|runner| runner::read(client, runner))).await;
    for ((name, prior), result) in prior.runners.iter().zip(runner_results) {
        match result {
            Ok(ReadOutcome::Confirmed(runner)) => {
                summary.count(Change::Unchanged);
                state.runners.insert(name.clone(), runner);
            }
            Ok(ReadOutcome::Cleared) => {
                warn!("Runner {} no longer exists, removing it from the state", name);
                summary.count_removal(Removal::Cleared);
            }
            Err(e) => {
                error!("Refreshing runner {} failed: {:#}", name, e);
                state.runners.insert(name.clone(), prior.clone());
                errors.push(e);
            }
        }
    }
    let project_runner_results = join_all(
        prior
            .project_runners
            .values()
            .map(|project_runner| project_runner::read(client, &project_runner.id)),
    )
    .await;
    for ((name, prior), result) in prior.project_runners.iter().zip(project_runner_results) {
        match result {
            Ok(ReadOutcome::Confirmed(project_runner)) => {
                summary.count(Change::Unchanged);
                state.project_runners.insert(name.clone(), project_runner);
            }
            Ok(ReadOutcome::Cleared) => {
                warn!(
                    "Project runner {} no longer exists, removing it from the state",
                    name
                );
                summary.count_removal(Removal::Cleared);
            }
            Err(e) => {
                error!("Refreshing project runner {} failed: {:#}", name, e);
                state.project_runners.insert(name.clone(), prior.clone());
                errors.push(e);
            }
        }
    }
    Outcome {
        state,
        summary,
        errors,
    }
}

/// Add an existing resource to the state
pub async fn import_resource<C: RunnerApi>(
    client: &C,
    state: &mut ProviderState,
    options: &ImportOptions,
) -> anyhow::Result<()> {
    let name = options.name.clone();
    match options.kind {
        ResourceKind::Runner => {
            if state.runners.contains_key(&name) {
                return Err(anyhow!("Runner {} is already managed", name));
            }
            match runner::import(client, &options.id).await? {
                ReadOutcome::Confirmed(runner) => state.runners.insert(name, runner),
                ReadOutcome::Cleared => return Err(anyhow!("Runner {} does not exist", options.id)),
            };
        }
        ResourceKind::ProjectRunner => {
            if state.project_runners.contains_key(&name) {
                return Err(anyhow!("Project runner {} is already managed", name));
            }
            match project_runner::import(client, &options.id).await? {
                ReadOutcome::Confirmed(project_runner) => {
                    state.project_runners.insert(name, project_runner)
                }
                ReadOutcome::Cleared => {
                    return Err(anyhow!("Project runner {} does not exist", options.id))
                }
            };
        }
    }
    Ok(())
}

fn finish(state_file: &Path, outcome: Outcome) -> anyhow::Result<()> {
    write_state(state_file, &outcome.state)
        .context(format!("Failed writing state file {:?}", state_file))?;
    eprintln!("API requests done, {}", outcome.summary);
    // report the first error we found
    if let Some(err) = outcome.errors.into_iter().next() {
        Err(err)?
    }
    Ok(())
}

fn read_inputs(paths: &Paths) -> anyhow::Result<(ProviderConfig, ProviderState)> {
    let config = read_config(&paths.config_file).context(format!(
        "Failed reading config file {:?}",
        paths.config_file
    ))?;
    let state = read_state(&paths.state_file).context(format!(
        "Failed reading state file {:?}",
        paths.state_file
    ))?;
    Ok((config, state))
}

#[tokio::main]
pub async fn apply(paths: &Paths) -> anyhow::Result<()> {
    let (config, state) = read_inputs(paths)?;
    let client = init_client(&config.hostname, &config.token)
        .await
        .context("Failed initializing GitLab client")?;
    let outcome = reconcile(&client, &config, &state).await;
    finish(&paths.state_file, outcome)
}

#[tokio::main]
pub async fn refresh(paths: &Paths) -> anyhow::Result<()> {
    let (config, state) = read_inputs(paths)?;
    let client = init_client(&config.hostname, &config.token)
        .await
        .context("Failed initializing GitLab client")?;
    let outcome = refresh_state(&client, &state).await;
    finish(&paths.state_file, outcome)
}

#[tokio::main]
pub async fn destroy(paths: &Paths) -> anyhow::Result<()> {
    let (config, state) = read_inputs(paths)?;
    let client = init_client(&config.hostname, &config.token)
        .await
        .context("Failed initializing GitLab client")?;
    let nothing = ProviderConfig {
        runners: Default::default(),
        project_runners: Default::default(),
        ..config
    };
    let outcome = reconcile(&client, &nothing, &state).await;
    finish(&paths.state_file, outcome)
}

#[tokio::main]
pub async fn import(paths: &Paths, options: &ImportOptions) -> anyhow::Result<()> {
    let (config, mut state) = read_inputs(paths)?;
    let client = init_client(&config.hostname, &config.token)
        .await
        .context("Failed initializing GitLab client")?;
    import_resource(&client, &mut state, options).await?;
    write_state(&paths.state_file, &state)
        .context(format!("Failed writing state file {:?}", paths.state_file))?;
    eprintln!("Imported {:?} {} as {}", options.kind, options.id, options.name);
    Ok(())
}
