use std::{collections::HashMap, path::Path};

use anyhow::Context;
use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;

pub const DEFAULT_CONFIG_PATH: &str = "relay.toml";
const ENV_PREFIX: &str = "RELAY";
const PASSWORD_PROMPT: &str = "prompt";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub eth: EthSettings,
    pub matrix: MatrixSettings,
    pub server: ServerSettings,
    pub storage: StorageSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EthSettings {
    pub endpoint: String,
    pub account: Option<String>,
    pub password: Option<String>,
}

impl Default for EthSettings {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8545".into(),
            account: None,
            password: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PasswordSource {
    None,
    Prompt,
    Configured(String),
}

impl EthSettings {
    pub fn password_source(&self) -> PasswordSource {
        match self.password.as_deref().map(str::trim) {
            None | Some("") => PasswordSource::None,
            Some(PASSWORD_PROMPT) => PasswordSource::Prompt,
            Some(_) => PasswordSource::Configured(self.password.clone().unwrap_or_default()),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MatrixSettings {
    pub server: String,
    pub rooms: Vec<String>,
    /// Credentials keyed by account address, imported when the store has none.
    pub users: HashMap<String, SeededIdentity>,
}

impl Default for MatrixSettings {
    fn default() -> Self {
        Self {
            server: "http://127.0.0.1:8008".into(),
            rooms: Vec::new(),
            users: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SeededIdentity {
    pub user_id: String,
    pub access_token: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8000,
        }
    }
}

impl ServerSettings {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub database_url: String,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            database_url: "sqlite://./data/relay.db".into(),
        }
    }
}

/// Defaults, then the TOML file, then `RELAY__*` environment variables.
///
/// An explicitly requested file must exist; the default `relay.toml` is optional.
pub fn load_settings(path: Option<&Path>) -> anyhow::Result<Settings> {
    load_settings_with_env(path, None)
}

pub fn load_settings_with_env(
    path: Option<&Path>,
    env: Option<HashMap<String, String>>,
) -> anyhow::Result<Settings> {
    let (file, required) = match path {
        Some(path) => (path.to_string_lossy().into_owned(), true),
        None => (DEFAULT_CONFIG_PATH.to_string(), false),
    };

    let config = Config::builder()
        .add_source(File::new(&file, FileFormat::Toml).required(required))
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("matrix.rooms")
                .try_parsing(true)
                .source(env),
        )
        .build()
        .with_context(|| format!("failed to load configuration from {file}"))?;

    let mut settings: Settings = config
        .try_deserialize()
        .context("invalid relay configuration")?;
    settings.storage.database_url = normalize_database_url(&settings.storage.database_url);
    Ok(settings)
}

pub fn normalize_database_url(raw_database_url: &str) -> String {
    let raw_database_url = raw_database_url.trim();

    if raw_database_url.is_empty() {
        return StorageSettings::default().database_url;
    }

    if raw_database_url.starts_with("sqlite::memory:")
        || raw_database_url.starts_with("sqlite://")
        || raw_database_url.contains("://")
    {
        return raw_database_url.to_string();
    }

    if let Some(path) = raw_database_url.strip_prefix("sqlite:") {
        let path = path.replace('\\', "/");
        return format!("sqlite://{path}");
    }

    format!("sqlite://{}", raw_database_url.replace('\\', "/"))
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
