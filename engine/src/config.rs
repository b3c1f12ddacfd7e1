use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{env, fs, io};

use lemmaloop_providers::retry::RetryConfig;
use lemmaloop_providers::{
    ApiKey, ChatGateway, ChatGatewayError, DEFAULT_STREAM_IDLE_TIMEOUT_SECS, Endpoint,
    EndpointError,
};
use lemmaloop_types::{Budgets, Role};

use crate::aggregator::PolicyKind;
use crate::call::{CallPolicy, DEFAULT_CALL_TIMEOUT_SECS};
use crate::controller::EngineSettings;
use crate::prompts::PromptTemplates;

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LemmaloopConfig {
    #[serde(default)]
    pub budgets: Budgets,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub roles: RolesConfig,
    #[serde(default)]
    pub prompts: PromptsConfig,
    #[serde(default)]
    pub aggregation: AggregationConfig,
    #[serde(default)]
    pub problem: ProblemConfig,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config at {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse config at {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("no {field} configured for the {role} role (set roles.{role} or roles.default)")]
    MissingRole { role: Role, field: &'static str },
    #[error("invalid endpoint for the {role} role: {source}")]
    Endpoint {
        role: Role,
        #[source]
        source: EndpointError,
    },
    #[error("failed to read prompt template {}: {source}", path.display())]
    Prompt {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Client(#[from] ChatGatewayError),
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Deadline for one role call, including the full response stream.
    pub call_timeout_secs: u64,
    pub stream: bool,
    /// Maximum silence between stream events.
    pub idle_timeout_secs: u64,
    /// Retries inside one HTTP request for retryable statuses.
    pub http_retries: u32,
    /// First delay between call-level retries; doubles up to `backoff_max_ms`.
    pub backoff_initial_ms: u64,
    pub backoff_max_ms: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            call_timeout_secs: DEFAULT_CALL_TIMEOUT_SECS,
            stream: true,
            idle_timeout_secs: DEFAULT_STREAM_IDLE_TIMEOUT_SECS,
            http_retries: RetryConfig::default().max_retries,
            backoff_initial_ms: 2_000,
            backoff_max_ms: 60_000,
        }
    }
}

/// Per-role endpoints. Unset fields fall back to `default`; the evaluate role
/// falls back to `verify` first.
#[derive(Debug, Default, Deserialize)]
pub struct RolesConfig {
    pub default: Option<RoleConfig>,
    pub propose: Option<RoleConfig>,
    pub verify: Option<RoleConfig>,
    pub refine: Option<RoleConfig>,
    pub evaluate: Option<RoleConfig>,
}

#[derive(Clone, Default, Deserialize)]
pub struct RoleConfig {
    pub base_url: Option<String>,
    pub model: Option<String>,
    /// Supports `${VAR}` expansion.
    pub api_key: Option<String>,
    pub temperature: Option<f32>,
}

// Manual Debug impl to prevent leaking API keys in logs.
impl std::fmt::Debug for RoleConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoleConfig")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field(
                "api_key",
                &if self.api_key.is_some() { "[REDACTED]" } else { "None" },
            )
            .field("temperature", &self.temperature)
            .finish()
    }
}

impl RoleConfig {
    /// Fill unset fields from `fallback`.
    fn or(mut self, fallback: &RoleConfig) -> Self {
        self.base_url = self.base_url.or_else(|| fallback.base_url.clone());
        self.model = self.model.or_else(|| fallback.model.clone());
        self.api_key = self.api_key.or_else(|| fallback.api_key.clone());
        self.temperature = self.temperature.or(fallback.temperature);
        self
    }
}

/// Optional template overrides, one file per role.
#[derive(Debug, Default, Deserialize)]
pub struct PromptsConfig {
    pub propose: Option<PathBuf>,
    pub verify: Option<PathBuf>,
    pub refine: Option<PathBuf>,
    pub evaluate: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AggregationConfig {
    #[serde(default)]
    pub policy: PolicyKind,
}

#[derive(Debug, Default, Deserialize)]
pub struct ProblemConfig {
    pub hint: Option<String>,
}

pub fn expand_env_vars(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let var = &after[..end];
                if !var.is_empty() {
                    out.push_str(&env::var(var).unwrap_or_default());
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }

    out.push_str(rest);
    out
}

impl LemmaloopConfig {
    /// Load `~/.lemmaloop/config.toml` if it exists.
    pub fn load() -> Result<Option<Self>, ConfigError> {
        let path = match config_path() {
            Some(path) => path,
            None => return Ok(None),
        };
        if !path.exists() {
            return Ok(None);
        }
        Self::load_from(&path).map(Some)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| {
            tracing::warn!("Failed to read config at {:?}: {}", path, source);
            ConfigError::Read {
                path: path.to_path_buf(),
                source,
            }
        })?;
        Self::parse(&content, path)
    }

    /// Parse TOML content; `path` is only used in error messages.
    pub fn parse(content: &str, path: &Path) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|source| {
            tracing::warn!("Failed to parse config at {:?}: {}", path, source);
            ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            }
        })
    }

    fn role_config(&self, role: Role) -> RoleConfig {
        let roles = &self.roles;
        let chain = match role {
            Role::Propose => vec![roles.propose.as_ref(), roles.default.as_ref()],
            Role::Verify => vec![roles.verify.as_ref(), roles.default.as_ref()],
            Role::Refine => vec![roles.refine.as_ref(), roles.default.as_ref()],
            Role::Evaluate => vec![
                roles.evaluate.as_ref(),
                roles.verify.as_ref(),
                roles.default.as_ref(),
            ],
        };
        chain
            .into_iter()
            .flatten()
            .fold(RoleConfig::default(), |merged, layer| merged.or(layer))
    }

    pub fn endpoint(&self, role: Role) -> Result<Endpoint, ConfigError> {
        let config = self.role_config(role);
        let base_url = config.base_url.ok_or(ConfigError::MissingRole {
            role,
            field: "base_url",
        })?;
        let model = config.model.ok_or(ConfigError::MissingRole {
            role,
            field: "model",
        })?;

        let mut endpoint = Endpoint::new(&expand_env_vars(&base_url), model)
            .map_err(|source| ConfigError::Endpoint { role, source })?;
        if let Some(key) = config
            .api_key
            .map(|key| expand_env_vars(&key))
            .filter(|key| !key.trim().is_empty())
        {
            endpoint = endpoint.with_api_key(ApiKey::new(key));
        }
        if let Some(temperature) = config.temperature {
            endpoint = endpoint.with_temperature(temperature);
        }
        Ok(endpoint)
    }

    pub fn endpoints(&self) -> Result<HashMap<Role, Endpoint>, ConfigError> {
        Role::ALL
            .iter()
            .map(|role| self.endpoint(*role).map(|endpoint| (*role, endpoint)))
            .collect()
    }

    pub fn gateway(&self) -> Result<ChatGateway, ConfigError> {
        Ok(ChatGateway::new(self.endpoints()?)?
            .with_retry(RetryConfig {
                max_retries: self.gateway.http_retries,
                ..RetryConfig::default()
            })
            .with_idle_timeout(Duration::from_secs(self.gateway.idle_timeout_secs)))
    }

    pub fn engine_settings(&self) -> Result<EngineSettings, ConfigError> {
        let gateway = &self.gateway;
        Ok(EngineSettings {
            budgets: self.budgets,
            calls: CallPolicy {
                retries: self.budgets.call_retries,
                timeout: Duration::from_secs(gateway.call_timeout_secs),
                streaming: gateway.stream,
                backoff: RetryConfig {
                    initial_delay: Duration::from_millis(gateway.backoff_initial_ms),
                    max_delay: Duration::from_millis(gateway.backoff_max_ms),
                    ..RetryConfig::default()
                },
            },
            policy: self.aggregation.policy.policy(),
            templates: self.templates()?,
            hint: self.problem.hint.clone(),
        })
    }

    fn templates(&self) -> Result<PromptTemplates, ConfigError> {
        let mut templates = PromptTemplates::default();
        let overrides = [
            (&self.prompts.propose, &mut templates.propose),
            (&self.prompts.verify, &mut templates.verify),
            (&self.prompts.refine, &mut templates.refine),
            (&self.prompts.evaluate, &mut templates.evaluate),
        ];
        for (path, slot) in overrides {
            if let Some(path) = path {
                *slot = fs::read_to_string(path).map_err(|source| ConfigError::Prompt {
                    path: path.clone(),
                    source,
                })?;
            }
        }
        Ok(templates)
    }
}

pub fn config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".lemmaloop").join("config.toml"))
}
