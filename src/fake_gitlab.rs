use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Mutex,
};

use crate::{
    gitlab_wrap::{
        RunnerApi, RunnerDetails, RunnerParameters, RunnerRegistration, RunnerStatus,
        RunnerSummary,
    },
    resource::Sensitive,
};

#[derive(Debug, thiserror::Error)]
pub enum FakeError {
    #[error("404 {0} Not Found")]
    NotFound(&'static str),
    #[error("500 {0}")]
    Server(String),
}

/// API call as seen by the server, tokens are left out
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Register(RunnerParameters),
    Get(u64),
    Update(u64, RunnerParameters),
    Delete(u64),
    Enable(u64, u64),
    List(u64),
    Disable(u64, u64),
}

#[derive(Default)]
struct FakeState {
    next_id: u64,
    runners: BTreeMap<u64, RunnerDetails>,
    project_runners: BTreeMap<u64, Vec<u64>>,
    requests: Vec<Request>,
    fail_next: Option<String>,
    failing: Option<fn(&Request) -> bool>,
}

/// In-memory GitLab instance
#[derive(Default)]
pub struct FakeGitlab {
    state: Mutex<FakeState>,
}

pub fn empty_details(id: u64) -> RunnerDetails {
    RunnerDetails {
        id,
        token: None,
        description: None,
        access_level: None,
        active: None,
        paused: None,
        is_shared: None,
        locked: None,
        run_untagged: None,
        maximum_timeout: None,
        tag_list: Vec::new(),
        revision: None,
        version: None,
        ip_address: None,
        contacted_at: None,
        online: None,
        status: None,
        architecture: None,
        name: None,
        projects: Vec::new(),
        groups: Vec::new(),
    }
}

fn apply_parameters(details: &mut RunnerDetails, params: &RunnerParameters) {
    if let Some(description) = &params.description {
        details.description = Some(description.clone());
    }
    if let Some(active) = params.active {
        details.active = Some(active);
        details.paused = Some(!active);
    }
    if let Some(locked) = params.locked {
        details.locked = Some(locked);
    }
    if let Some(run_untagged) = params.run_untagged {
        details.run_untagged = Some(run_untagged);
    }
    if let Some(access_level) = params.access_level {
        details.access_level = Some(access_level.to_string());
    }
    if let Some(tags) = params.sent_tags() {
        details.tag_list = tags.iter().cloned().collect();
    }
    if let Some(maximum_timeout) = params.maximum_timeout {
        details.maximum_timeout = Some(maximum_timeout);
    }
}

impl FakeGitlab {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a runner registered out-of-band, returns its ID
    pub fn insert_runner(&self, details: RunnerDetails) -> u64 {
        let mut state = self.state.lock().unwrap();
        let id = details.id;
        state.next_id = state.next_id.max(id);
        state.runners.insert(id, details);
        id
    }

    /// Modify a runner out-of-band
    pub fn edit_runner(&self, id: u64, edit: impl FnOnce(&mut RunnerDetails)) {
        let mut state = self.state.lock().unwrap();
        edit(state.runners.get_mut(&id).unwrap());
    }

    pub fn runner(&self, id: u64) -> Option<RunnerDetails> {
        self.state.lock().unwrap().runners.get(&id).cloned()
    }

    pub fn project_runner_ids(&self, project_id: u64) -> Vec<u64> {
        self.state
            .lock()
            .unwrap()
            .project_runners
            .get(&project_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Make the next API call fail with a server error
    pub fn fail_next(&self, message: &str) {
        self.state.lock().unwrap().fail_next = Some(message.to_owned());
    }

    /// Make every matching API call fail with a server error
    pub fn fail_matching(&self, matcher: fn(&Request) -> bool) {
        self.state.lock().unwrap().failing = Some(matcher);
    }

    pub fn runner_ids(&self) -> Vec<u64> {
        self.state.lock().unwrap().runners.keys().copied().collect()
    }

    pub fn requests(&self) -> Vec<Request> {
        self.state.lock().unwrap().requests.clone()
    }

    pub fn clear_requests(&self) {
        self.state.lock().unwrap().requests.clear();
    }

    fn record(&self, request: Request) -> Result<std::sync::MutexGuard<'_, FakeState>, FakeError> {
        let mut state = self.state.lock().unwrap();
        let matched = state.failing.is_some_and(|matches| matches(&request));
        state.requests.push(request);
        match state.fail_next.take() {
            Some(message) => Err(FakeError::Server(message)),
            None if matched => Err(FakeError::Server("Internal Server Error".into())),
            None => Ok(state),
        }
    }
}

impl RunnerApi for FakeGitlab {
    type Error = FakeError;

    fn is_not_found(error: &FakeError) -> bool {
        matches!(error, FakeError::NotFound(_))
    }

    async fn register_runner(
        &self,
        registration_token: &Sensitive,
        params: &RunnerParameters,
    ) -> Result<RunnerRegistration, FakeError> {
        let mut state = self.record(Request::Register(params.clone()))?;
        if registration_token.is_empty() {
            return Err(FakeError::Server("403 Forbidden".into()));
        }
        state.next_id += 1;
        let id = state.next_id;
        let token = Sensitive::new(format!("glrt-{}-{}", id, registration_token.expose()));
        let mut details = empty_details(id);
        details.token = Some(token.clone());
        details.access_level = Some("not_protected".into());
        details.active = Some(true);
        details.paused = Some(false);
        details.is_shared = Some(false);
        details.locked = Some(false);
        details.run_untagged = Some(true);
        details.online = None;
        details.status = Some(RunnerStatus::String("never_contacted".into()));
        apply_parameters(&mut details, params);
        state.runners.insert(id, details);
        Ok(RunnerRegistration { id, token })
    }

    async fn get_runner(&self, runner_id: u64) -> Result<RunnerDetails, FakeError> {
        let state = self.record(Request::Get(runner_id))?;
        state
            .runners
            .get(&runner_id)
            .cloned()
            .ok_or(FakeError::NotFound("Runner"))
    }

    async fn update_runner(
        &self,
        runner_id: u64,
        params: &RunnerParameters,
    ) -> Result<(), FakeError> {
        let mut state = self.record(Request::Update(runner_id, params.clone()))?;
        let details = state
            .runners
            .get_mut(&runner_id)
            .ok_or(FakeError::NotFound("Runner"))?;
        apply_parameters(details, params);
        Ok(())
    }

    async fn delete_runner(&self, runner_id: u64) -> Result<(), FakeError> {
        let mut state = self.record(Request::Delete(runner_id))?;
        state
            .runners
            .remove(&runner_id)
            .ok_or(FakeError::NotFound("Runner"))?;
        for runners in state.project_runners.values_mut() {
            runners.retain(|id| *id != runner_id);
        }
        Ok(())
    }

    async fn enable_project_runner(&self, project_id: u64, runner_id: u64) -> Result<(), FakeError> {
        let mut state = self.record(Request::Enable(project_id, runner_id))?;
        if !state.runners.contains_key(&runner_id) {
            return Err(FakeError::NotFound("Runner"));
        }
        let runners = state.project_runners.entry(project_id).or_default();
        if runners.contains(&runner_id) {
            return Err(FakeError::Server(
                "400 Runner has already been taken".into(),
            ));
        }
        runners.push(runner_id);
        Ok(())
    }

    async fn list_project_runners(&self, project_id: u64) -> Result<Vec<RunnerSummary>, FakeError> {
        let state = self.record(Request::List(project_id))?;
        let ids = state
            .project_runners
            .get(&project_id)
            .cloned()
            .unwrap_or_default();
        Ok(ids.into_iter().map(|id| RunnerSummary { id }).collect())
    }

    async fn disable_project_runner(
        &self,
        project_id: u64,
        runner_id: u64,
    ) -> Result<(), FakeError> {
        let mut state = self.record(Request::Disable(project_id, runner_id))?;
        let runners = state
            .project_runners
            .get_mut(&project_id)
            .ok_or(FakeError::NotFound("Project"))?;
        let before = runners.len();
        runners.retain(|id| *id != runner_id);
        if runners.len() == before {
            return Err(FakeError::NotFound("Runner"));
        }
        Ok(())
    }
}

/// Shorthand for tag sets in tests
pub fn tags(tags: &[&str]) -> BTreeSet<String> {
    tags.iter().map(|&t| t.to_owned()).collect()
}
