use std::fmt::Display;

use anyhow::anyhow;
use itertools::Itertools;
use struct_field_names_as_array::FieldNamesAsArray;

use crate::{config::ProviderConfig, gitlab_wrap::AccessLevel};

pub const RUNNER_TYPE_NAME: &str = "gitlab_runner";
pub const PROJECT_RUNNER_TYPE_NAME: &str = "gitlab_project_runner";

#[derive(Debug, Clone, PartialEq)]
pub enum AttributeType {
    String,
    Int,
    Bool,
    StringSet,
    List(Vec<Attribute>),
}

impl Display for AttributeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttributeType::String => write!(f, "string"),
            AttributeType::Int => write!(f, "int"),
            AttributeType::Bool => write!(f, "bool"),
            AttributeType::StringSet => write!(f, "set(string)"),
            AttributeType::List(attributes) => write!(
                f,
                "list(object({}))",
                attributes
                    .iter()
                    .map(|a| format!("{}: {}", a.name, a.kind))
                    .join(", ")
            ),
        }
    }
}

/// Who provides the value of an attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    /// Must be declared
    Required,
    /// May be declared, unset otherwise
    Optional,
    /// May be declared, reported by the server otherwise
    OptionalComputed,
    /// Only reported by the server
    Computed,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Validation {
    OneOfIgnoreCase(&'static [&'static str]),
    AtLeast(i64),
}

impl Validation {
    fn check(&self, value: &toml::Value) -> Result<(), String> {
        match (self, value) {
            (Validation::OneOfIgnoreCase(allowed), toml::Value::String(s)) => {
                if allowed.iter().any(|a| a.eq_ignore_ascii_case(s)) {
                    Ok(())
                } else {
                    Err(format!("expected one of {:?}, got {:?}", allowed, s))
                }
            }
            (Validation::AtLeast(minimum), toml::Value::Integer(i)) => {
                if i >= minimum {
                    Ok(())
                } else {
                    Err(format!("expected at least {}, got {}", minimum, i))
                }
            }
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub name: &'static str,
    pub kind: AttributeType,
    pub presence: Presence,
    /// Never displayed in plain text
    pub sensitive: bool,
    /// Changing the value replaces the resource
    pub force_new: bool,
    pub validation: Option<Validation>,
}

impl Attribute {
    fn new(name: &'static str, kind: AttributeType, presence: Presence) -> Self {
        Attribute {
            name,
            kind,
            presence,
            sensitive: false,
            force_new: false,
            validation: None,
        }
    }

    pub fn required(name: &'static str, kind: AttributeType) -> Self {
        Self::new(name, kind, Presence::Required)
    }

    pub fn optional(name: &'static str, kind: AttributeType) -> Self {
        Self::new(name, kind, Presence::Optional)
    }

    pub fn optional_computed(name: &'static str, kind: AttributeType) -> Self {
        Self::new(name, kind, Presence::OptionalComputed)
    }

    pub fn computed(name: &'static str, kind: AttributeType) -> Self {
        Self::new(name, kind, Presence::Computed)
    }

    pub fn sensitive(mut self) -> Self {
        self.sensitive = true;
        self
    }

    pub fn force_new(mut self) -> Self {
        self.force_new = true;
        self
    }

    pub fn validated(mut self, validation: Validation) -> Self {
        self.validation = Some(validation);
        self
    }

    pub fn is_settable(&self) -> bool {
        self.presence != Presence::Computed
    }

    fn check_type(&self, value: &toml::Value) -> Result<(), String> {
        let matches = match (&self.kind, value) {
            (AttributeType::String, toml::Value::String(_)) => true,
            (AttributeType::Int, toml::Value::Integer(_)) => true,
            (AttributeType::Bool, toml::Value::Boolean(_)) => true,
            (AttributeType::StringSet, toml::Value::Array(values)) => {
                values.iter().all(toml::Value::is_str)
            }
            _ => false,
        };
        if matches {
            Ok(())
        } else {
            Err(format!("expected {}, got {}", self.kind, value.type_str()))
        }
    }

    fn check(&self, value: &toml::Value) -> Result<(), String> {
        if !self.is_settable() {
            return Err("attribute is read-only".into());
        }
        self.check_type(value)?;
        self.validation.map_or(Ok(()), |v| v.check(value))
    }

    pub fn flags(&self) -> Vec<&'static str> {
        let presence = match self.presence {
            Presence::Required => "required",
            Presence::Optional => "optional",
            Presence::OptionalComputed => "optional, computed",
            Presence::Computed => "computed",
        };
        let mut flags = vec![presence];
        if self.sensitive {
            flags.push("sensitive");
        }
        if self.force_new {
            flags.push("forces replacement");
        }
        flags
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResourceSchema {
    pub type_name: &'static str,
    pub attributes: Vec<Attribute>,
}

impl ResourceSchema {
    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.name == name)
    }

    /// Check a declared block, returning one message per invalid attribute
    pub fn validate_block(&self, block: &toml::Table) -> Vec<String> {
        let mut errors: Vec<String> = block
            .iter()
            .filter_map(|(key, value)| match self.attribute(key) {
                None => Some(format!("{}: unknown attribute", key)),
                Some(attribute) => attribute
                    .check(value)
                    .err()
                    .map(|e| format!("{}: {}", key, e)),
            })
            .collect();
        errors.extend(
            self.attributes
                .iter()
                .filter(|a| a.presence == Presence::Required && !block.contains_key(a.name))
                .map(|a| format!("{}: required attribute is missing", a.name)),
        );
        errors
    }
}

pub fn runner_schema() -> ResourceSchema {
    use AttributeType::*;
    ResourceSchema {
        type_name: RUNNER_TYPE_NAME,
        attributes: vec![
            Attribute::required("registration_token", String)
                .sensitive()
                .force_new(),
            Attribute::computed("token", String).sensitive(),
            Attribute::computed("runner_id", Int),
            Attribute::optional("description", String),
            Attribute::optional_computed("access_level", String)
                .validated(Validation::OneOfIgnoreCase(&AccessLevel::VALUES)),
            Attribute::optional_computed("locked", Bool),
            Attribute::optional_computed("active", Bool),
            Attribute::optional_computed("run_untagged", Bool),
            Attribute::optional_computed("maximum_timeout", Int)
                .validated(Validation::AtLeast(10 * 60)),
            Attribute::optional("tags", StringSet),
            Attribute::computed("revision", String),
            Attribute::computed("version", String),
            Attribute::computed("is_shared", Bool),
            Attribute::computed("ip_address", String),
            Attribute::computed("contacted_at", String),
            Attribute::computed("online", Bool),
            Attribute::computed("status", Bool),
            Attribute::computed("architecture", String),
            Attribute::computed("name", String),
            Attribute::computed(
                "projects",
                List(vec![
                    Attribute::computed("id", Int),
                    Attribute::computed("name", String),
                    Attribute::computed("name_with_namespace", String),
                    Attribute::computed("path", String),
                    Attribute::computed("path_with_namespace", String),
                ]),
            ),
            Attribute::computed(
                "groups",
                List(vec![
                    Attribute::computed("id", Int),
                    Attribute::computed("name", String),
                    Attribute::computed("web_url", String),
                ]),
            ),
        ],
    }
}

pub fn project_runner_schema() -> ResourceSchema {
    use AttributeType::*;
    ResourceSchema {
        type_name: PROJECT_RUNNER_TYPE_NAME,
        attributes: vec![
            Attribute::required("project_id", Int).force_new(),
            Attribute::optional_computed("runner_id", Int).force_new(),
            // resolved to runner_id before any API call
            Attribute::optional("runner", String).force_new(),
        ],
    }
}

fn validate_section(
    table: &toml::Table,
    section: &str,
    schema: &ResourceSchema,
    errors: &mut Vec<String>,
) {
    let Some(value) = table.get(section) else {
        return;
    };
    let Some(blocks) = value.as_table() else {
        errors.push(format!("[{}]: expected a table", section));
        return;
    };
    for (name, block) in blocks {
        match block.as_table() {
            Some(block) => errors.extend(
                schema
                    .validate_block(block)
                    .into_iter()
                    .map(|e| format!("[{}.{}] {}", section, name, e)),
            ),
            None => errors.push(format!("[{}.{}]: expected a table", section, name)),
        }
    }
}

/// Validate the top-level settings and every declared resource block against its schema
pub fn validate_config_table(table: &toml::Table) -> anyhow::Result<()> {
    let mut errors: Vec<String> = table
        .keys()
        .filter(|key| !ProviderConfig::FIELD_NAMES_AS_ARRAY.contains(&key.as_str()))
        .map(|key| format!("{}: unknown setting", key))
        .collect();
    validate_section(table, "runners", &runner_schema(), &mut errors);
    validate_section(
        table,
        "project_runners",
        &project_runner_schema(),
        &mut errors,
    );
    if errors.is_empty() {
        Ok(())
    } else {
        Err(anyhow!("Invalid configuration:\n{}", errors.join("\n")))
    }
}

/// Validate references between resources
pub fn validate_config(config: &ProviderConfig) -> anyhow::Result<()> {
    let errors: Vec<String> = config
        .project_runners
        .iter()
        .filter_map(|(name, project_runner)| {
            match (&project_runner.runner_id, &project_runner.runner) {
                (Some(_), None) => None,
                (None, Some(runner)) if config.runners.contains_key(runner) => None,
                (None, Some(runner)) => Some(format!(
                    "[project_runners.{}] runner: no runner named {:?} is declared",
                    name, runner
                )),
                _ => Some(format!(
                    "[project_runners.{}] exactly one of runner_id and runner must be set",
                    name
                )),
            }
        })
        .collect();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(anyhow!("Invalid configuration:\n{}", errors.join("\n")))
    }
}
