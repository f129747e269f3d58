use std::collections::{BTreeMap, HashMap};

use crate::config::{ProjectRunnerConfig, ProviderConfig, RunnerConfig};
use crate::resource::Sensitive;
use anyhow::anyhow;
use anyhow::Context;

fn string_expand_impl<'a, F: Fn(&str) -> Option<&'a str>>(
    string: &str,
    resource_name: &str,
    env_vars: &'a F,
) -> anyhow::Result<String> {
    let home_dir = dirs::home_dir()
        .ok_or(anyhow!("Can't determine home directory"))?
        .to_str()
        .ok_or(anyhow!("Home directory path can't be converted to string"))?
        .to_owned();
    shellexpand::full_with_context(
        string,
        || Some(&home_dir),
        |v| match v {
            // special case: NAME expands to the resource name
            "NAME" => Ok(Some(resource_name)),
            v => env_vars(v)
                .map(Some)
                .ok_or(anyhow!("Undefined variable")),
        },
    )
    .map_err(|v| anyhow!(v))
    .map(|v| v.to_string())
}

fn expand_runner_config<'a, F: Fn(&str) -> Option<&'a str>>(
    config: &RunnerConfig,
    name: &str,
    env_vars: &'a F,
) -> anyhow::Result<RunnerConfig> {
    let string_expand = |s: &str| string_expand_impl(s, name, env_vars);
    Ok(RunnerConfig {
        registration_token: Sensitive::new(
            string_expand(config.registration_token.expose()).context("registration_token")?,
        ),
        description: config
            .description
            .as_deref()
            .map(string_expand)
            .transpose()
            .context("description")?,
        ..config.clone()
    })
}

fn expand_provider_config_impl<'a, F: Fn(&str) -> Option<&'a str>>(
    config: &ProviderConfig,
    env_vars: &'a F,
) -> anyhow::Result<ProviderConfig> {
    let runners: BTreeMap<String, RunnerConfig> = config
        .runners
        .iter()
        .map(|(name, runner)| {
            Ok((
                name.clone(),
                expand_runner_config(runner, name, env_vars)
                    .context(format!("Failed expanding [runners.{}]", name))?,
            ))
        })
        .collect::<anyhow::Result<_>>()?;
    let project_runners: BTreeMap<String, ProjectRunnerConfig> = config.project_runners.clone();
    Ok(ProviderConfig {
        hostname: string_expand_impl(&config.hostname, "", env_vars).context("hostname")?,
        token: Sensitive::new(
            string_expand_impl(config.token.expose(), "", env_vars).context("token")?,
        ),
        runners,
        project_runners,
    })
}

/// Expands `~`, `$NAME` and environment variables in the token, hostname, registration_token and description values
pub fn expand_provider_config(config: &ProviderConfig) -> anyhow::Result<ProviderConfig> {
    let env_vars: HashMap<_, String> = std::env::vars().collect();
    let lookup = |v: &str| env_vars.get(v).map(String::as_str);
    expand_provider_config_impl(config, &lookup)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn get_home() -> String {
        dirs::home_dir().unwrap().to_str().unwrap().to_owned()
    }

    #[test]
    fn string_expand() {
        let home = get_home();
        let text = "~/ $NAME uses ${TOKEN} from $HOME";
        let result = string_expand_impl(text, "docker", &|v| match v {
            "TOKEN" => Some("abc123"),
            "HOME" => Some("/somewhere"),
            _ => None,
        });
        assert!(result.is_ok(), "{:?}", result);
        assert_eq!(
            result.unwrap(),
            format!("{}/ docker uses abc123 from /somewhere", home)
        );
    }

    #[test]
    fn string_expand_undefined() {
        let result = string_expand_impl("$MISSING", "docker", &|_| None);
        assert!(result.is_err());
    }

    #[test]
    fn provider_expand() {
        let config = ProviderConfig {
            hostname: "$HOST".into(),
            token: Sensitive::new("$GITLAB_TOKEN"),
            runners: [(
                "docker".to_owned(),
                RunnerConfig {
                    registration_token: Sensitive::new("$REGISTRATION_TOKEN"),
                    description: Some("$NAME runner on $HOST".into()),
                    maximum_timeout: Some(3600),
                    ..Default::default()
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
        };
        let expanded = expand_provider_config_impl(&config, &|v| match v {
            "HOST" => Some("gitlab.example.com"),
            "GITLAB_TOKEN" => Some("glpat-secret"),
            "REGISTRATION_TOKEN" => Some("abc123"),
            _ => None,
        });
        assert!(expanded.is_ok(), "{:?}", expanded);
        let expanded = expanded.unwrap();
        assert_eq!(expanded.hostname, "gitlab.example.com");
        assert_eq!(expanded.token.expose(), "glpat-secret");
        let runner = &expanded.runners["docker"];
        assert_eq!(runner.registration_token.expose(), "abc123");
        assert_eq!(
            runner.description,
            Some("docker runner on gitlab.example.com".into())
        );
        assert_eq!(runner.maximum_timeout, Some(3600));
        assert_eq!(expanded.project_runners, config.project_runners);
    }

    #[test]
    fn provider_expand_reports_location() {
        let config = ProviderConfig {
            hostname: "gitlab.com".into(),
            token: Sensitive::new("token"),
            runners: [(
                "docker".to_owned(),
                RunnerConfig {
                    registration_token: Sensitive::new("$MISSING"),
                    ..Default::default()
                },
            )]
            .into_iter()
            .collect(),
            project_runners: BTreeMap::new(),
        };
        let error = expand_provider_config_impl(&config, &|_| None).unwrap_err();
        assert_eq!(error.to_string(), "Failed expanding [runners.docker]");
    }
}
