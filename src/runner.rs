use std::collections::BTreeSet;

use anyhow::{anyhow, Context};
use log::{debug, error, info, warn};
use serde_derive::{Deserialize, Serialize};

use crate::{
    config::RunnerConfig,
    gitlab_wrap::{
        AccessLevel, RunnerApi, RunnerDetails, RunnerGroup, RunnerParameters, RunnerProject,
        RunnerStatus,
    },
    resource::{ReadOutcome, Sensitive},
};

/// Runner as recorded in the state file.
/// Apart from the identity and the write-only registration token,
/// every field is replaced by the server's value on each read.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct RunnerState {
    /// The runner ID as a decimal string
    pub id: String,
    pub runner_id: u64,
    pub registration_token: Sensitive,
    pub token: Option<Sensitive>,
    pub description: String,
    pub access_level: String,
    pub locked: bool,
    pub active: bool,
    pub run_untagged: bool,
    pub maximum_timeout: Option<u64>,
    pub tags: BTreeSet<String>,
    pub revision: Option<String>,
    pub version: Option<String>,
    pub ip_address: Option<String>,
    pub contacted_at: Option<String>,
    pub online: Option<bool>,
    pub status: bool,
    pub architecture: Option<String>,
    pub name: Option<String>,
    pub is_shared: bool,
    pub projects: Vec<RunnerProject>,
    pub groups: Vec<RunnerGroup>,
}

pub fn parse_id(id: &str) -> anyhow::Result<u64> {
    id.parse()
        .context(format!("Invalid runner ID {:?} in state", id))
}

fn runner_parameters(config: &RunnerConfig) -> anyhow::Result<RunnerParameters> {
    Ok(RunnerParameters {
        description: config.description.clone(),
        run_untagged: config.run_untagged,
        active: config.active,
        locked: config.locked,
        access_level: config
            .access_level
            .as_deref()
            .map(str::parse::<AccessLevel>)
            .transpose()?,
        tags: config.tags.clone(),
        maximum_timeout: config.maximum_timeout,
    })
}

fn state_from_details(details: RunnerDetails, prior: &RunnerState) -> RunnerState {
    let active = details.is_active();
    RunnerState {
        id: details.id.to_string(),
        runner_id: details.id,
        registration_token: prior.registration_token.clone(),
        // newer GitLab versions only return the token on registration
        token: details.token.or_else(|| prior.token.clone()),
        description: details.description.unwrap_or_default(),
        access_level: details.access_level.unwrap_or_default(),
        locked: details.locked.unwrap_or_default(),
        active,
        run_untagged: details.run_untagged.unwrap_or_default(),
        maximum_timeout: details.maximum_timeout,
        tags: details.tag_list.into_iter().collect(),
        revision: details.revision,
        version: details.version,
        ip_address: details.ip_address,
        contacted_at: details.contacted_at,
        online: details.online,
        status: details.status.as_ref().is_some_and(RunnerStatus::is_up),
        architecture: details.architecture,
        name: details.name,
        is_shared: details.is_shared.unwrap_or_default(),
        projects: details.projects,
        groups: details.groups,
    }
}

/// Whether applying the configuration needs a new registration
pub fn requires_replacement(config: &RunnerConfig, state: &RunnerState) -> bool {
    // imported runners have no known registration token, adopt the declared one
    !state.registration_token.is_empty() && state.registration_token != config.registration_token
}

/// Whether any declared attribute differs from the recorded one
pub fn has_changes(config: &RunnerConfig, state: &RunnerState) -> bool {
    fn differs<T: PartialEq>(declared: &Option<T>, current: &T) -> bool {
        declared.as_ref().is_some_and(|v| v != current)
    }
    differs(&config.description, &state.description)
        || config
            .access_level
            .as_ref()
            .is_some_and(|v| !v.eq_ignore_ascii_case(&state.access_level))
        || differs(&config.locked, &state.locked)
        || differs(&config.active, &state.active)
        || differs(&config.run_untagged, &state.run_untagged)
        || config.maximum_timeout.is_some() && config.maximum_timeout != state.maximum_timeout
        || config
            .tags
            .as_ref()
            .is_some_and(|tags| !tags.is_empty() && *tags != state.tags)
}

/// Failed runner creation.
/// A runner registered before the failure exists on the server and must stay in the state.
#[derive(Debug, thiserror::Error)]
#[error("{error}")]
pub struct CreateError {
    /// Only identity and tokens are known
    pub registered: Option<RunnerState>,
    pub error: anyhow::Error,
}

impl From<anyhow::Error> for CreateError {
    fn from(error: anyhow::Error) -> Self {
        CreateError {
            registered: None,
            error,
        }
    }
}

/// Register a new runner, then apply the full configuration
pub async fn create<C: RunnerApi>(
    client: &C,
    config: &RunnerConfig,
) -> Result<RunnerState, CreateError> {
    // the access level can only be set by an update
    let params = RunnerParameters {
        access_level: None,
        ..runner_parameters(config)?
    };
    debug!("create gitlab runner");
    let registration = client
        .register_runner(&config.registration_token, &params)
        .await
        .map_err(anyhow::Error::from)?;
    info!("Registered runner {}", registration.id);
    let state = RunnerState {
        id: registration.id.to_string(),
        runner_id: registration.id,
        registration_token: config.registration_token.clone(),
        token: Some(registration.token),
        ..Default::default()
    };
    match update(client, &state, config).await {
        Ok(ReadOutcome::Confirmed(state)) => Ok(state),
        Ok(ReadOutcome::Cleared) => Err(anyhow!(
            "Runner {} disappeared right after its registration",
            registration.id
        )
        .into()),
        Err(error) => {
            error!(
                "Runner {} was registered, but applying its configuration failed",
                registration.id
            );
            Err(CreateError {
                registered: Some(state),
                error,
            })
        }
    }
}

/// Refresh the runner from the server, clearing it if it no longer exists
pub async fn read<C: RunnerApi>(
    client: &C,
    state: &RunnerState,
) -> anyhow::Result<ReadOutcome<RunnerState>> {
    let runner_id = parse_id(&state.id)?;
    debug!("read gitlab runner {}", runner_id);
    match client.get_runner(runner_id).await {
        Ok(details) => {
            for project in &details.projects {
                debug!("read gitlab runner {} project {}", runner_id, project.id);
            }
            for group in &details.groups {
                debug!("read gitlab runner {} group {}", runner_id, group.id);
            }
            Ok(ReadOutcome::Confirmed(state_from_details(details, state)))
        }
        Err(e) if C::is_not_found(&e) => {
            warn!("Runner {} no longer exists", runner_id);
            Ok(ReadOutcome::Cleared)
        }
        Err(e) => Err(e.into()),
    }
}

/// Submit all declared mutable attributes, then refresh the runner
pub async fn update<C: RunnerApi>(
    client: &C,
    state: &RunnerState,
    config: &RunnerConfig,
) -> anyhow::Result<ReadOutcome<RunnerState>> {
    let runner_id = parse_id(&state.id)?;
    let params = runner_parameters(config)?;
    debug!("update gitlab runner {}", runner_id);
    client.update_runner(runner_id, &params).await?;
    let state = RunnerState {
        registration_token: config.registration_token.clone(),
        ..state.clone()
    };
    read(client, &state).await
}

pub async fn delete<C: RunnerApi>(client: &C, state: &RunnerState) -> anyhow::Result<()> {
    let runner_id = parse_id(&state.id)?;
    debug!("delete gitlab runner {}", runner_id);
    client.delete_runner(runner_id).await?;
    info!("Deleted runner {}", runner_id);
    Ok(())
}

/// Adopt an existing runner by its ID, its registration token stays unknown
pub async fn import<C: RunnerApi>(
    client: &C,
    id: &str,
) -> anyhow::Result<ReadOutcome<RunnerState>> {
    let state = RunnerState {
        id: id.trim().to_owned(),
        ..Default::default()
    };
    read(client, &state).await
}
