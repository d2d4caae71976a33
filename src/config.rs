use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::backend;
use crate::interaction::FailurePolicy;

const DEFAULT_ENV_PREFIX: &str = "SNAPGRAM";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Config {
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub interaction: InteractionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackendConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default)]
    pub project_id: String,
    #[serde(default)]
    pub database_id: String,
    #[serde(default = "default_posts_collection")]
    pub posts_collection_id: String,
    #[serde(default = "default_users_collection")]
    pub users_collection_id: String,
    #[serde(default = "default_saves_collection")]
    pub saves_collection_id: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub jwt: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            project_id: String::new(),
            database_id: String::new(),
            posts_collection_id: default_posts_collection(),
            users_collection_id: default_users_collection(),
            saves_collection_id: default_saves_collection(),
            api_key: String::new(),
            jwt: String::new(),
            user_agent: default_user_agent(),
            timeout: default_timeout(),
        }
    }
}

impl BackendConfig {
    pub fn credentials(&self) -> backend::Credentials {
        if !self.jwt.is_empty() {
            backend::Credentials::Jwt(self.jwt.clone())
        } else if !self.api_key.is_empty() {
            backend::Credentials::ApiKey(self.api_key.clone())
        } else {
            backend::Credentials::Anonymous
        }
    }

    pub fn client_config(&self) -> backend::ClientConfig {
        backend::ClientConfig {
            endpoint: self.endpoint.clone(),
            project_id: self.project_id.clone(),
            database_id: self.database_id.clone(),
            collections: backend::Collections {
                posts: self.posts_collection_id.clone(),
                users: self.users_collection_id.clone(),
                saves: self.saves_collection_id.clone(),
            },
            credentials: self.credentials(),
            user_agent: self.user_agent.clone(),
            timeout: Some(self.timeout),
        }
    }
}

fn default_endpoint() -> String {
    backend::DEFAULT_ENDPOINT.to_string()
}

fn default_posts_collection() -> String {
    "posts".into()
}

fn default_users_collection() -> String {
    "users".into()
}

fn default_saves_collection() -> String {
    "saves".into()
}

fn default_user_agent() -> String {
    format!("snapgram/{}", crate::VERSION)
}

fn default_timeout() -> Duration {
    Duration::from_secs(20)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InteractionConfig {
    #[serde(default)]
    pub failure_policy: FailurePolicy,
    #[serde(default = "default_settle_timeout", with = "humantime_serde")]
    pub settle_timeout: Duration,
}

impl Default for InteractionConfig {
    fn default() -> Self {
        Self {
            failure_policy: FailurePolicy::default(),
            settle_timeout: default_settle_timeout(),
        }
    }
}

fn default_settle_timeout() -> Duration {
    Duration::from_secs(10)
}

#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    pub config_file: Option<PathBuf>,
    pub env_prefix: Option<String>,
}

pub fn load(options: LoadOptions) -> Result<Config> {
    let mut cfg = Config::default();

    if let Some(path) = options.config_file.as_ref() {
        if path.exists() {
            let from_file = read_config_file(path)?;
            cfg = merge_config(cfg, from_file);
        }
    } else if let Some(default_path) = default_config_path() {
        if default_path.exists() {
            let from_file = read_config_file(&default_path)?;
            cfg = merge_config(cfg, from_file);
        }
    }

    let prefix = options.env_prefix.as_deref().unwrap_or(DEFAULT_ENV_PREFIX);
    apply_env(&mut cfg, prefix);

    Ok(cfg)
}

fn read_config_file(path: &Path) -> Result<Config> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file at {}", path.display()))?;
    let config: Config = serde_yaml::from_str(&data)
        .with_context(|| format!("Failed to parse config file at {}", path.display()))?;
    Ok(config)
}

fn merge_config(mut base: Config, other: Config) -> Config {
    let incoming = other.backend;
    if !incoming.endpoint.is_empty() {
        base.backend.endpoint = incoming.endpoint;
    }
    if !incoming.project_id.is_empty() {
        base.backend.project_id = incoming.project_id;
    }
    if !incoming.database_id.is_empty() {
        base.backend.database_id = incoming.database_id;
    }
    if !incoming.posts_collection_id.is_empty() {
        base.backend.posts_collection_id = incoming.posts_collection_id;
    }
    if !incoming.users_collection_id.is_empty() {
        base.backend.users_collection_id = incoming.users_collection_id;
    }
    if !incoming.saves_collection_id.is_empty() {
        base.backend.saves_collection_id = incoming.saves_collection_id;
    }
    if !incoming.api_key.is_empty() {
        base.backend.api_key = incoming.api_key;
    }
    if !incoming.jwt.is_empty() {
        base.backend.jwt = incoming.jwt;
    }
    if !incoming.user_agent.is_empty() {
        base.backend.user_agent = incoming.user_agent;
    }
    if !incoming.timeout.is_zero() {
        base.backend.timeout = incoming.timeout;
    }

    base.interaction.failure_policy = other.interaction.failure_policy;
    if !other.interaction.settle_timeout.is_zero() {
        base.interaction.settle_timeout = other.interaction.settle_timeout;
    }

    base
}

fn apply_env(cfg: &mut Config, prefix: &str) {
    let mut map: HashMap<String, String> = HashMap::new();
    let upper_prefix = format!("{}_", prefix.to_uppercase());

    for (key, value) in env::vars() {
        if let Some(stripped) = key.strip_prefix(&upper_prefix) {
            let normalized = stripped.to_ascii_lowercase().replace("__", ".");
            map.insert(normalized, value);
        }
    }

    for (key, value) in map {
        apply_env_value(cfg, &key, value);
    }
}

fn apply_env_value(cfg: &mut Config, key: &str, value: String) {
    match key {
        "backend.endpoint" => cfg.backend.endpoint = value,
        "backend.project_id" => cfg.backend.project_id = value,
        "backend.database_id" => cfg.backend.database_id = value,
        "backend.posts_collection_id" => cfg.backend.posts_collection_id = value,
        "backend.users_collection_id" => cfg.backend.users_collection_id = value,
        "backend.saves_collection_id" => cfg.backend.saves_collection_id = value,
        "backend.api_key" => cfg.backend.api_key = value,
        "backend.jwt" => cfg.backend.jwt = value,
        "backend.user_agent" => cfg.backend.user_agent = value,
        "backend.timeout" => {
            if let Ok(duration) = humantime::parse_duration(&value) {
                cfg.backend.timeout = duration;
            }
        }
        "interaction.failure_policy" => match value.trim().to_ascii_lowercase().as_str() {
            "retain" => cfg.interaction.failure_policy = FailurePolicy::Retain,
            "rollback" => cfg.interaction.failure_policy = FailurePolicy::Rollback,
            _ => {}
        },
        "interaction.settle_timeout" => {
            if let Ok(duration) = humantime::parse_duration(&value) {
                cfg.interaction.settle_timeout = duration;
            }
        }
        _ => {}
    }
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("snapgram").join("config.yaml"))
}
