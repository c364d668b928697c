use crate::core::{GatewayError, Result};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variables that override the `[database]` table.
pub const ENV_HOST: &str = "PORTAL_DB_HOST";
pub const ENV_NAME: &str = "PORTAL_DB_NAME";
pub const ENV_USER: &str = "PORTAL_DB_USER";
pub const ENV_PASSWORD: &str = "PORTAL_DB_PASSWORD";
pub const ENV_CHARSET: &str = "PORTAL_DB_CHARSET";

static ENV_REFERENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid env reference pattern")
});

/// Top-level configuration structure parsed from a TOML file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: ConnectionConfig,
    #[serde(default)]
    pub pool: PoolSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Connection parameters for the gateway.
///
/// The store is an embedded SQLite database: `database` is the file path
/// (or `:memory:` / a `file:` URI) and `host` must name the local machine.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub host: String,
    #[serde(alias = "name")]
    pub database: String,
    #[serde(alias = "user")]
    pub username: String,
    pub password: String,
    pub charset: String,
    /// How long a statement waits on a locked database before failing
    pub busy_timeout_ms: u64,
    /// Deadline applied to every statement; none when absent
    pub statement_timeout_ms: Option<u64>,
    /// Create the database file when it does not exist
    pub create_if_missing: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            database: String::new(),
            username: String::new(),
            password: String::new(),
            charset: "utf8mb4".to_string(),
            busy_timeout_ms: 5_000,
            statement_timeout_ms: None,
            create_if_missing: true,
        }
    }
}

impl ConnectionConfig {
    /// Local database at `database` with default settings
    pub fn new(database: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            ..Self::default()
        }
    }

    /// In-memory database, mostly useful for tests
    pub fn in_memory() -> Self {
        Self::new(":memory:")
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }

    pub fn with_charset(mut self, charset: impl Into<String>) -> Self {
        self.charset = charset.into();
        self
    }

    pub fn with_statement_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.statement_timeout_ms = Some(timeout_ms);
        self
    }

    pub fn with_create_if_missing(mut self, create: bool) -> Self {
        self.create_if_missing = create;
        self
    }

    /// Applies `PORTAL_DB_*` overrides from the process environment
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Applies `PORTAL_DB_*` overrides using `lookup` as the environment
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let fields: [(&str, &mut String); 5] = [
            (ENV_HOST, &mut self.host),
            (ENV_NAME, &mut self.database),
            (ENV_USER, &mut self.username),
            (ENV_PASSWORD, &mut self.password),
            (ENV_CHARSET, &mut self.charset),
        ];
        for (key, field) in fields {
            if let Some(value) = lookup(key) {
                *field = value;
            }
        }
    }
}

impl std::fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("host", &self.host)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("charset", &self.charset)
            .field("busy_timeout_ms", &self.busy_timeout_ms)
            .field("statement_timeout_ms", &self.statement_timeout_ms)
            .field("create_if_missing", &self.create_if_missing)
            .finish()
    }
}

/// Connection pool sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PoolSettings {
    /// Maximum number of pooled connections
    pub max_size: u32,
    /// How long `checkout` waits for a free connection, in milliseconds
    pub connection_timeout_ms: u64,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_size: 8,
            connection_timeout_ms: 30_000,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing_subscriber::EnvFilter` directive used when `RUST_LOG` is unset
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

/// Default configuration file location, `<config dir>/portal-db/config.toml`.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("portal-db").join("config.toml"))
}

/// Loads configuration from a TOML file at the given path.
///
/// `${VAR}` references in string values are expanded from the environment
/// and `PORTAL_DB_*` variables override the `[database]` table afterwards.
///
/// # Arguments
///
/// * `path` - The file path to the TOML configuration file.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let content = fs::read_to_string(path.as_ref()).map_err(|e| {
        GatewayError::Config(format!("cannot read {}: {}", path.as_ref().display(), e))
    })?;
    let mut config = parse_config(&content, |key| std::env::var(key).ok())?;
    config.database.apply_env_overrides();
    Ok(config)
}

/// Configuration from the environment alone, for deployments without a file.
pub fn config_from_env() -> Config {
    let mut config = Config::default();
    config.database.apply_env_overrides();
    config
}

/// Parses TOML content, then expands `${VAR}` references through `lookup`.
///
/// Expansion runs on the parsed string values, so substituted text is never
/// read as TOML and references inside comments are ignored.
pub fn parse_config<F>(content: &str, lookup: F) -> Result<Config>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config: Config =
        toml::from_str(content).map_err(|e| GatewayError::Config(e.to_string()))?;

    let mut missing = Vec::new();
    let db = &mut config.database;
    for field in [
        &mut db.host,
        &mut db.database,
        &mut db.username,
        &mut db.password,
        &mut db.charset,
        &mut config.logging.filter,
    ] {
        *field = expand_into(field.as_str(), &lookup, &mut missing);
    }

    if missing.is_empty() {
        Ok(config)
    } else {
        Err(unset_variables(missing))
    }
}

/// Replaces every `${VAR}` in `input`; an unset variable is an error.
pub fn expand_env_refs<F>(input: &str, lookup: F) -> Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    let mut missing = Vec::new();
    let expanded = expand_into(input, &lookup, &mut missing);
    if missing.is_empty() {
        Ok(expanded)
    } else {
        Err(unset_variables(missing))
    }
}

fn expand_into<F>(input: &str, lookup: &F, missing: &mut Vec<String>) -> String
where
    F: Fn(&str) -> Option<String>,
{
    ENV_REFERENCE
        .replace_all(input, |caps: &Captures| {
            let key = &caps[1];
            lookup(key).unwrap_or_else(|| {
                missing.push(key.to_string());
                String::new()
            })
        })
        .into_owned()
}

fn unset_variables(missing: Vec<String>) -> GatewayError {
    GatewayError::Config(format!(
        "unset environment variable(s): {}",
        missing.join(", ")
    ))
}
