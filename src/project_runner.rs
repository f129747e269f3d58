use std::num::ParseIntError;

use log::{debug, info, warn};
use serde_derive::{Deserialize, Serialize};

use crate::{gitlab_wrap::RunnerApi, resource::ReadOutcome};

pub const ID_SEPARATOR: char = ':';

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum IdError {
    #[error("unexpected format of ID ({0:?}), expected project_id{sep}runner_id", sep = ID_SEPARATOR)]
    Format(String),
    #[error("failed to get project: {0}")]
    Project(ParseIntError),
    #[error("failed to get runner: {0}")]
    Runner(ParseIntError),
}

pub fn encode_id(project_id: u64, runner_id: u64) -> String {
    format!("{}{}{}", project_id, ID_SEPARATOR, runner_id)
}

pub fn decode_id(id: &str) -> Result<(u64, u64), IdError> {
    let (project, runner) = id
        .split_once(ID_SEPARATOR)
        .ok_or_else(|| IdError::Format(id.to_owned()))?;
    let project_id = project.parse().map_err(IdError::Project)?;
    let runner_id = runner.parse().map_err(IdError::Runner)?;
    Ok((project_id, runner_id))
}

/// A runner enabled in a project, recorded in the state file
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ProjectRunnerState {
    /// `project_id:runner_id`
    pub id: String,
    pub project_id: u64,
    pub runner_id: u64,
}

impl ProjectRunnerState {
    fn new(project_id: u64, runner_id: u64) -> Self {
        ProjectRunnerState {
            id: encode_id(project_id, runner_id),
            project_id,
            runner_id,
        }
    }
}

pub async fn create<C: RunnerApi>(
    client: &C,
    project_id: u64,
    runner_id: u64,
) -> anyhow::Result<ReadOutcome<ProjectRunnerState>> {
    debug!("enable gitlab runner {} in project {}", runner_id, project_id);
    client.enable_project_runner(project_id, runner_id).await?;
    info!("Enabled runner {} in project {}", runner_id, project_id);
    read(client, &encode_id(project_id, runner_id)).await
}

/// Check that the runner is still enabled in the project
pub async fn read<C: RunnerApi>(
    client: &C,
    id: &str,
) -> anyhow::Result<ReadOutcome<ProjectRunnerState>> {
    let (project_id, runner_id) = decode_id(id)?;
    debug!(
        "checking gitlab runner {} is enabled in project {}",
        runner_id, project_id
    );
    let runners = client.list_project_runners(project_id).await?;
    if runners.iter().any(|runner| runner.id == runner_id) {
        Ok(ReadOutcome::Confirmed(ProjectRunnerState::new(
            project_id, runner_id,
        )))
    } else {
        warn!(
            "Runner {} is no longer enabled in project {}",
            runner_id, project_id
        );
        Ok(ReadOutcome::Cleared)
    }
}

pub async fn delete<C: RunnerApi>(client: &C, id: &str) -> anyhow::Result<()> {
    let (project_id, runner_id) = decode_id(id)?;
    debug!(
        "disabling gitlab runner {} in project {}",
        runner_id, project_id
    );
    client.disable_project_runner(project_id, runner_id).await?;
    info!("Disabled runner {} in project {}", runner_id, project_id);
    Ok(())
}

pub async fn import<C: RunnerApi>(
    client: &C,
    id: &str,
) -> anyhow::Result<ReadOutcome<ProjectRunnerState>> {
    read(client, id.trim()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        fake_gitlab::{empty_details, FakeGitlab, Request},
        resource::Sensitive,
    };

    #[test]
    fn id_round_trip() {
        for (project_id, runner_id) in [(0, 0), (7, 42), (u64::MAX, 1), (123456, u64::MAX)] {
            let id = encode_id(project_id, runner_id);
            assert_eq!(decode_id(&id), Ok((project_id, runner_id)));
        }
        assert_eq!(encode_id(7, 42), "7:42");
    }

    #[test]
    fn malformed_ids() {
        assert_eq!(decode_id("742"), Err(IdError::Format("742".into())));
        assert!(matches!(decode_id("seven:42"), Err(IdError::Project(_))));
        assert!(matches!(decode_id("7:"), Err(IdError::Runner(_))));
        assert!(matches!(decode_id("7:42:1"), Err(IdError::Runner(_))));
        assert!(matches!(decode_id("-7:42"), Err(IdError::Project(_))));
        let message = decode_id("7:x").unwrap_err().to_string();
        assert!(message.starts_with("failed to get runner: "), "{}", message);
        let message = decode_id("x:7").unwrap_err().to_string();
        assert!(message.starts_with("failed to get project: "), "{}", message);
    }

    async fn registered_runner(client: &FakeGitlab) -> u64 {
        client
            .register_runner(&Sensitive::new("abc123"), &Default::default())
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn create_enables_and_confirms() {
        let client = FakeGitlab::new();
        client.insert_runner(empty_details(42));
        let state = create(&client, 7, 42).await.unwrap().confirmed().unwrap();
        assert_eq!(
            state,
            ProjectRunnerState {
                id: "7:42".into(),
                project_id: 7,
                runner_id: 42,
            }
        );
        assert_eq!(
            client.requests(),
            vec![Request::Enable(7, 42), Request::List(7)]
        );
    }

    #[tokio::test]
    async fn create_failure_is_surfaced() {
        let client = FakeGitlab::new();
        let error = create(&client, 7, 42).await.unwrap_err();
        assert_eq!(error.to_string(), "404 Runner Not Found");
        assert_eq!(client.requests(), vec![Request::Enable(7, 42)]);
    }

    #[tokio::test]
    async fn read_clears_missing_assignment() {
        let client = FakeGitlab::new();
        let other = registered_runner(&client).await;
        client.enable_project_runner(7, other).await.unwrap();
        let outcome = read(&client, &encode_id(7, other + 1)).await.unwrap();
        assert!(outcome.is_cleared());
        let outcome = read(&client, &encode_id(7, other)).await.unwrap();
        assert!(!outcome.is_cleared());
    }

    #[tokio::test]
    async fn read_malformed_id_fails_without_requests() {
        let client = FakeGitlab::new();
        assert!(read(&client, "7-42").await.is_err());
        assert!(client.requests().is_empty());
    }

    #[tokio::test]
    async fn read_list_failure_is_surfaced() {
        let client = FakeGitlab::new();
        client.fail_next("Internal Server Error");
        assert!(read(&client, "7:42").await.is_err());
    }

    #[tokio::test]
    async fn delete_disables() {
        let client = FakeGitlab::new();
        let runner_id = registered_runner(&client).await;
        let state = create(&client, 7, runner_id)
            .await
            .unwrap()
            .confirmed()
            .unwrap();
        delete(&client, &state.id).await.unwrap();
        assert!(client.project_runner_ids(7).is_empty());
        assert!(client.runner(runner_id).is_some());
        assert!(read(&client, &state.id).await.unwrap().is_cleared());
        assert!(delete(&client, &state.id).await.is_err());
    }

    #[tokio::test]
    async fn import_by_id() {
        let client = FakeGitlab::new();
        let runner_id = registered_runner(&client).await;
        client.enable_project_runner(3, runner_id).await.unwrap();
        let id = format!(" 3:{} ", runner_id);
        let state = import(&client, &id).await.unwrap().confirmed().unwrap();
        assert_eq!(state.project_id, 3);
        assert_eq!(state.runner_id, runner_id);
        assert!(import(&client, "3").await.is_err());
    }
}
