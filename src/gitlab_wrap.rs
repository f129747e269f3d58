use std::{borrow::Cow, collections::BTreeSet, fmt::Display, str::FromStr};

use anyhow::anyhow;
use futures::TryFutureExt;
use gitlab::{
    api::{
        ignore, paged, runners, ApiError, AsyncQuery, BodyError, Endpoint, FormParams, Pageable,
        Pagination,
    },
    AsyncGitlab, Gitlab, GitlabError, RestError,
};
use http::{Method, StatusCode};
use log::debug;
use serde_derive::{Deserialize, Serialize};

use crate::resource::Sensitive;

#[derive(Debug, thiserror::Error)]
pub enum GitlabApiError {
    #[error(transparent)]
    Api(#[from] ApiError<RestError>),
    #[error("Failed building request: {0}")]
    Request(String),
}

type ApiResult<T> = Result<T, GitlabApiError>;

/// Which branches a runner picks up jobs from
#[derive(Debug, Copy, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessLevel {
    /// Jobs from any branch
    NotProtected,
    /// Jobs from protected branches only
    RefProtected,
}

impl AccessLevel {
    pub const VALUES: [&'static str; 2] = ["not_protected", "ref_protected"];

    pub fn as_str(&self) -> &'static str {
        match self {
            AccessLevel::NotProtected => "not_protected",
            AccessLevel::RefProtected => "ref_protected",
        }
    }
}

impl FromStr for AccessLevel {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "not_protected" => Ok(AccessLevel::NotProtected),
            "ref_protected" => Ok(AccessLevel::RefProtected),
            _ => Err(anyhow!(
                "Invalid access level {:?}, expected one of {:?}",
                s,
                AccessLevel::VALUES
            )),
        }
    }
}

impl Display for AccessLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<AccessLevel> for runners::RunnerAccessLevel {
    fn from(value: AccessLevel) -> Self {
        match value {
            AccessLevel::NotProtected => runners::RunnerAccessLevel::NotProtected,
            AccessLevel::RefProtected => runners::RunnerAccessLevel::RefProtected,
        }
    }
}

/// Runner attributes sent on registration and update.
/// Every field left at `None` is omitted from the request, so the server keeps its own value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunnerParameters {
    pub description: Option<String>,
    pub run_untagged: Option<bool>,
    pub active: Option<bool>,
    pub locked: Option<bool>,
    pub access_level: Option<AccessLevel>,
    pub tags: Option<BTreeSet<String>>,
    pub maximum_timeout: Option<u64>,
}

impl RunnerParameters {
    /// Tags are only sent when at least one is present
    pub fn sent_tags(&self) -> Option<&BTreeSet<String>> {
        self.tags.as_ref().filter(|tags| !tags.is_empty())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RunnerRegistration {
    /// The runner ID
    pub id: u64,
    /// The runner API token
    pub token: Sensitive,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RunnerProject {
    pub id: u64,
    pub name: String,
    pub name_with_namespace: String,
    pub path: String,
    pub path_with_namespace: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RunnerGroup {
    pub id: u64,
    pub name: String,
    pub web_url: String,
}

/// Older GitLab versions report a boolean status, newer ones a status name
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RunnerStatus {
    Bool(bool),
    String(String),
}

impl RunnerStatus {
    pub fn is_up(&self) -> bool {
        match self {
            RunnerStatus::Bool(b) => *b,
            RunnerStatus::String(s) => matches!(s.as_str(), "online" | "active"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RunnerDetails {
    pub id: u64,
    pub token: Option<Sensitive>,
    pub description: Option<String>,
    pub access_level: Option<String>,
    pub active: Option<bool>,
    pub paused: Option<bool>,
    pub is_shared: Option<bool>,
    pub locked: Option<bool>,
    pub run_untagged: Option<bool>,
    pub maximum_timeout: Option<u64>,
    #[serde(default)]
    pub tag_list: Vec<String>,
    pub revision: Option<String>,
    pub version: Option<String>,
    pub ip_address: Option<String>,
    pub contacted_at: Option<String>,
    pub online: Option<bool>,
    pub status: Option<RunnerStatus>,
    pub architecture: Option<String>,
    pub name: Option<String>,
    #[serde(default)]
    pub projects: Vec<RunnerProject>,
    #[serde(default)]
    pub groups: Vec<RunnerGroup>,
}

impl RunnerDetails {
    /// `active` was replaced by `paused` in newer API versions
    pub fn is_active(&self) -> bool {
        self.active
            .or(self.paused.map(|paused| !paused))
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RunnerSummary {
    pub id: u64,
}

/// The GitLab API calls needed to manage runners and their project assignments
#[allow(async_fn_in_trait)]
pub trait RunnerApi {
    type Error: std::error::Error + Send + Sync + 'static;

    fn is_not_found(error: &Self::Error) -> bool;

    async fn register_runner(
        &self,
        registration_token: &Sensitive,
        params: &RunnerParameters,
    ) -> Result<RunnerRegistration, Self::Error>;

    async fn get_runner(&self, runner_id: u64) -> Result<RunnerDetails, Self::Error>;

    async fn update_runner(
        &self,
        runner_id: u64,
        params: &RunnerParameters,
    ) -> Result<(), Self::Error>;

    async fn delete_runner(&self, runner_id: u64) -> Result<(), Self::Error>;

    async fn enable_project_runner(&self, project_id: u64, runner_id: u64)
        -> Result<(), Self::Error>;

    async fn list_project_runners(&self, project_id: u64)
        -> Result<Vec<RunnerSummary>, Self::Error>;

    async fn disable_project_runner(
        &self,
        project_id: u64,
        runner_id: u64,
    ) -> Result<(), Self::Error>;
}

pub async fn init_client(host: &str, token: &Sensitive) -> Result<AsyncGitlab, GitlabError> {
    Ok(Gitlab::builder(host, token.expose()).build_async().await?)
}

fn is_error_not_found(error: &GitlabApiError) -> bool {
    match error {
        GitlabApiError::Api(ApiError::GitlabService {
            status: StatusCode::NOT_FOUND,
            data: _,
        }) => true,
        GitlabApiError::Api(ApiError::GitlabWithStatus { status, msg: _ }) => {
            *status == StatusCode::NOT_FOUND
        }
        _ => false,
    }
}

/// Registration request, the access level is left to the following update
fn create_runner_endpoint<'a>(
    registration_token: &'a Sensitive,
    params: &'a RunnerParameters,
) -> ApiResult<runners::CreateRunner<'a>> {
    let mut builder = runners::CreateRunner::builder();
    builder.token(registration_token.expose());
    if let Some(description) = &params.description {
        builder.description(description.as_str());
    }
    if let Some(active) = params.active {
        builder.paused(!active);
    }
    if let Some(locked) = params.locked {
        builder.locked(locked);
    }
    if let Some(run_untagged) = params.run_untagged {
        builder.run_untagged(run_untagged);
    }
    if let Some(access_level) = params.access_level {
        builder.access_level(access_level.into());
    }
    if let Some(tags) = params.sent_tags() {
        builder.tags(tags.iter());
    }
    if let Some(maximum_timeout) = params.maximum_timeout {
        builder.maximum_timeout(maximum_timeout);
    }
    builder
        .build()
        .map_err(|e| GitlabApiError::Request(e.to_string()))
}

fn edit_runner_endpoint(
    runner_id: u64,
    params: &RunnerParameters,
) -> ApiResult<runners::EditRunner<'_>> {
    let mut builder = runners::EditRunner::builder();
    builder.runner(runner_id);
    if let Some(description) = &params.description {
        builder.description(description.as_str());
    }
    if let Some(active) = params.active {
        builder.paused(!active);
    }
    if let Some(locked) = params.locked {
        builder.locked(locked);
    }
    if let Some(run_untagged) = params.run_untagged {
        builder.run_untagged(run_untagged);
    }
    if let Some(access_level) = params.access_level {
        builder.access_level(access_level.into());
    }
    if let Some(tags) = params.sent_tags() {
        builder.tags(tags.iter());
    }
    if let Some(maximum_timeout) = params.maximum_timeout {
        builder.maximum_timeout(maximum_timeout);
    }
    builder
        .build()
        .map_err(|e| GitlabApiError::Request(e.to_string()))
}

/// Enable an existing runner in a project
struct EnableProjectRunner {
    project: u64,
    runner: u64,
}

impl Endpoint for EnableProjectRunner {
    fn method(&self) -> Method {
        Method::POST
    }

    fn endpoint(&self) -> Cow<'static, str> {
        format!("projects/{}/runners", self.project).into()
    }

    fn body(&self) -> Result<Option<(&'static str, Vec<u8>)>, BodyError> {
        let mut params = FormParams::default();
        params.push("runner_id", self.runner);
        params.into_body()
    }
}

/// Disable a runner in a project, the runner itself is kept
struct DisableProjectRunner {
    project: u64,
    runner: u64,
}

impl Endpoint for DisableProjectRunner {
    fn method(&self) -> Method {
        Method::DELETE
    }

    fn endpoint(&self) -> Cow<'static, str> {
        format!("projects/{}/runners/{}", self.project, self.runner).into()
    }
}

/// All runners available in a project
struct ProjectRunners {
    project: u64,
}

impl Endpoint for ProjectRunners {
    fn method(&self) -> Method {
        Method::GET
    }

    fn endpoint(&self) -> Cow<'static, str> {
        format!("projects/{}/runners", self.project).into()
    }
}

impl Pageable for ProjectRunners {}

impl RunnerApi for AsyncGitlab {
    type Error = GitlabApiError;

    fn is_not_found(error: &GitlabApiError) -> bool {
        is_error_not_found(error)
    }

    async fn register_runner(
        &self,
        registration_token: &Sensitive,
        params: &RunnerParameters,
    ) -> ApiResult<RunnerRegistration> {
        let endpoint = create_runner_endpoint(registration_token, params)?;
        Ok(endpoint
            .query_async(self)
            .and_then(|v: RunnerRegistration| async move {
                debug!("Registered runner {}", v.id);
                Ok(v)
            })
            .or_else(|e| async move {
                debug!("Failed registering runner with {:?}: {:?}", params, e);
                Err(e)
            })
            .await?)
    }

    async fn get_runner(&self, runner_id: u64) -> ApiResult<RunnerDetails> {
        let endpoint = runners::Runner::builder()
            .runner(runner_id)
            .build()
            .map_err(|e| GitlabApiError::Request(e.to_string()))?;
        Ok(endpoint
            .query_async(self)
            .and_then(|v: RunnerDetails| async move {
                debug!("Fetched runner {}: {:?}", runner_id, v);
                Ok(v)
            })
            .or_else(|e| async move {
                debug!("Failed fetching runner {}: {:?}", runner_id, e);
                Err(e)
            })
            .await?)
    }

    async fn update_runner(&self, runner_id: u64, params: &RunnerParameters) -> ApiResult<()> {
        let endpoint = edit_runner_endpoint(runner_id, params)?;
        Ok(ignore(endpoint)
            .query_async(self)
            .and_then(|v| async move {
                debug!("Updated runner {}: {:?}", runner_id, params);
                Ok(v)
            })
            .or_else(|e| async move {
                debug!(
                    "Failed updating runner {} with {:?}: {:?}",
                    runner_id, params, e
                );
                Err(e)
            })
            .await?)
    }

    async fn delete_runner(&self, runner_id: u64) -> ApiResult<()> {
        let endpoint = runners::DeleteRunner::builder()
            .runner(runner_id)
            .build()
            .map_err(|e| GitlabApiError::Request(e.to_string()))?;
        Ok(ignore(endpoint)
            .query_async(self)
            .and_then(|()| async move {
                debug!("Deleted runner {}", runner_id);
                Ok(())
            })
            .or_else(|e| async move {
                debug!("Failed deleting runner {}: {:?}", runner_id, e);
                Err(e)
            })
            .await?)
    }

    async fn enable_project_runner(&self, project_id: u64, runner_id: u64) -> ApiResult<()> {
        let endpoint = EnableProjectRunner {
            project: project_id,
            runner: runner_id,
        };
        Ok(ignore(endpoint)
            .query_async(self)
            .and_then(|()| async move {
                debug!("Enabled runner {} in project {}", runner_id, project_id);
                Ok(())
            })
            .or_else(|e| async move {
                debug!(
                    "Failed enabling runner {} in project {}: {:?}",
                    runner_id, project_id, e
                );
                Err(e)
            })
            .await?)
    }

    async fn list_project_runners(&self, project_id: u64) -> ApiResult<Vec<RunnerSummary>> {
        let endpoint = ProjectRunners {
            project: project_id,
        };
        Ok(paged(endpoint, Pagination::All)
            .query_async(self)
            .and_then(|v: Vec<RunnerSummary>| async move {
                debug!("Fetched project runners for {}: {:?}", project_id, v);
                Ok(v)
            })
            .or_else(|e| async move {
                debug!("Failed fetching project runners for {}: {:?}", project_id, e);
                Err(e)
            })
            .await?)
    }

    async fn disable_project_runner(&self, project_id: u64, runner_id: u64) -> ApiResult<()> {
        let endpoint = DisableProjectRunner {
            project: project_id,
            runner: runner_id,
        };
        Ok(ignore(endpoint)
            .query_async(self)
            .and_then(|()| async move {
                debug!("Disabled runner {} in project {}", runner_id, project_id);
                Ok(())
            })
            .or_else(|e| async move {
                debug!(
                    "Failed disabling runner {} in project {}: {:?}",
                    runner_id, project_id, e
                );
                Err(e)
            })
            .await?)
    }
}
