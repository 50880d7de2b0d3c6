//! System configuration parsing.

use crate::{ConfigError, ConfigResult};
use kdl::{KdlDocument, KdlNode};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// System-wide configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SystemConfig {
    pub server: ServerConfig,
    /// PostgreSQL job store. Without it the server keeps jobs in memory.
    pub database: Option<DatabaseConfig>,
    pub orchestrator: OrchestratorSettings,
    pub conversion: Option<ServiceConfig>,
    pub generation: Option<GenerationConfig>,
    pub github: Option<GitHubConfig>,
    pub compile: Option<CompileConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub bind: String,
    /// Upper bound for uploaded archives and JSON bodies.
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:3000".to_string(),
            max_body_bytes: 64 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

/// Retry, timeout and concurrency policy of the orchestrator loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorSettings {
    pub workers: usize,
    /// Attempts a stage gets before a retryable error becomes fatal.
    pub retry_ceiling: u32,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
    /// Jitter applied to each backoff delay, in percent either way.
    pub jitter_pct: u32,
    pub stage_timeout: Duration,
    pub poll_interval: Duration,
    /// Measured from job creation; exceeding it fails the job.
    pub job_deadline: Duration,
    pub lease_ttl: Duration,
    pub scan_interval: Duration,
    /// How long a succeeded job answers duplicate requests.
    pub freshness_window: Duration,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            workers: 4,
            retry_ceiling: 3,
            backoff_base: Duration::from_secs(2),
            backoff_cap: Duration::from_secs(60),
            jitter_pct: 20,
            stage_timeout: Duration::from_secs(120),
            poll_interval: Duration::from_secs(5),
            job_deadline: Duration::from_secs(20 * 60),
            lease_ttl: Duration::from_secs(30),
            scan_interval: Duration::from_secs(1),
            freshness_window: Duration::from_secs(60 * 60),
        }
    }
}

/// A plain HTTP collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    pub url: String,
    pub api_key_env: String,
}

impl GenerationConfig {
    pub fn api_key(&self) -> Option<String> {
        read_secret(&self.api_key_env)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubConfig {
    pub api_url: String,
    /// Account that owns published repositories.
    pub owner: String,
    /// Publish under this organization instead of the token's user.
    pub org: Option<String>,
    pub token_env: String,
    pub private_repos: bool,
}

impl GitHubConfig {
    pub fn token(&self) -> Option<String> {
        read_secret(&self.token_env)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompileConfig {
    pub url: String,
    pub token_env: Option<String>,
    pub callback_secret_env: Option<String>,
}

impl CompileConfig {
    pub fn token(&self) -> Option<String> {
        self.token_env.as_deref().and_then(read_secret)
    }

    pub fn callback_secret(&self) -> Option<String> {
        self.callback_secret_env.as_deref().and_then(read_secret)
    }
}

fn read_secret(var: &str) -> Option<String> {
    std::env::var(var).ok().filter(|v| !v.trim().is_empty())
}

/// Load the configuration file, falling back to defaults when it does not
/// exist. `DATABASE_URL` and `MOBILIZE_BIND` override the file.
pub fn load_system_config(path: &Path) -> ConfigResult<SystemConfig> {
    let mut config = if path.exists() {
        let content = std::fs::read_to_string(path)?;
        parse_system_config(&content)?
    } else {
        info!(path = %path.display(), "No configuration file, using defaults");
        SystemConfig::default()
    };

    if let Ok(url) = std::env::var("DATABASE_URL") {
        let max_connections = config
            .database
            .as_ref()
            .map(|db| db.max_connections)
            .unwrap_or(10);
        config.database = Some(DatabaseConfig {
            url,
            max_connections,
        });
    }
    if let Ok(bind) = std::env::var("MOBILIZE_BIND") {
        config.server.bind = bind;
    }

    Ok(config)
}

/// Parse system configuration from KDL text.
pub fn parse_system_config(kdl: &str) -> ConfigResult<SystemConfig> {
    let doc: KdlDocument = kdl.parse()?;
    let mut config = SystemConfig::default();
    let mut seen = HashSet::new();

    for node in doc.nodes() {
        let name = node.name().value();
        if !seen.insert(name.to_string()) {
            return Err(ConfigError::Duplicate(name.to_string()));
        }
        match name {
            "server" => config.server = parse_server(node)?,
            "database" => config.database = Some(parse_database(node)?),
            "orchestrator" => config.orchestrator = parse_orchestrator(node)?,
            "conversion" => {
                config.conversion = Some(ServiceConfig {
                    url: required_child_string(node, "url")?,
                })
            }
            "generation" => config.generation = Some(parse_generation(node)?),
            "github" => config.github = Some(parse_github(node)?),
            "compile" => config.compile = Some(parse_compile(node)?),
            _ => {} // Ignore unknown nodes
        }
    }

    Ok(config)
}

fn parse_server(node: &KdlNode) -> ConfigResult<ServerConfig> {
    let defaults = ServerConfig::default();
    Ok(ServerConfig {
        bind: child_string(node, "bind").unwrap_or(defaults.bind),
        max_body_bytes: child_u64(node, "max-body-bytes")?
            .map(|v| v as usize)
            .unwrap_or(defaults.max_body_bytes),
    })
}

fn parse_database(node: &KdlNode) -> ConfigResult<DatabaseConfig> {
    Ok(DatabaseConfig {
        url: required_child_string(node, "url")?,
        max_connections: child_u64(node, "max-connections")?
            .map(|v| v as u32)
            .unwrap_or(10),
    })
}

fn parse_orchestrator(node: &KdlNode) -> ConfigResult<OrchestratorSettings> {
    let mut settings = OrchestratorSettings::default();

    if let Some(workers) = child_u64(node, "workers")? {
        if workers == 0 {
            return Err(invalid("workers", "must be at least 1"));
        }
        settings.workers = workers as usize;
    }
    if let Some(ceiling) = child_u64(node, "retry-ceiling")? {
        if ceiling == 0 {
            return Err(invalid("retry-ceiling", "must be at least 1"));
        }
        settings.retry_ceiling = ceiling as u32;
    }
    if let Some(backoff) = find_child(node, "backoff") {
        if let Some(ms) = u64_prop(backoff, "base-ms")? {
            settings.backoff_base = Duration::from_millis(ms);
        }
        if let Some(ms) = u64_prop(backoff, "cap-ms")? {
            settings.backoff_cap = Duration::from_millis(ms);
        }
        if let Some(pct) = u64_prop(backoff, "jitter-pct")? {
            if pct > 100 {
                return Err(invalid("backoff jitter-pct", "must be between 0 and 100"));
            }
            settings.jitter_pct = pct as u32;
        }
        if settings.backoff_cap < settings.backoff_base {
            return Err(invalid("backoff", "cap-ms must not be below base-ms"));
        }
    }

    let durations: [(&str, &mut Duration, fn(u64) -> Duration); 6] = [
        ("stage-timeout-secs", &mut settings.stage_timeout, Duration::from_secs),
        ("poll-interval-secs", &mut settings.poll_interval, Duration::from_secs),
        ("job-deadline-secs", &mut settings.job_deadline, Duration::from_secs),
        ("lease-ttl-secs", &mut settings.lease_ttl, Duration::from_secs),
        ("scan-interval-ms", &mut settings.scan_interval, Duration::from_millis),
        (
            "freshness-window-secs",
            &mut settings.freshness_window,
            Duration::from_secs,
        ),
    ];
    for (name, slot, unit) in durations {
        if let Some(value) = child_u64(node, name)? {
            if value == 0 && name != "freshness-window-secs" {
                return Err(invalid(name, "must be greater than zero"));
            }
            *slot = unit(value);
        }
    }

    Ok(settings)
}

fn parse_generation(node: &KdlNode) -> ConfigResult<GenerationConfig> {
    Ok(GenerationConfig {
        url: required_child_string(node, "url")?,
        api_key_env: child_string(node, "api-key-env")
            .unwrap_or_else(|| "MOBILIZE_GENERATION_API_KEY".to_string()),
    })
}

fn parse_github(node: &KdlNode) -> ConfigResult<GitHubConfig> {
    Ok(GitHubConfig {
        api_url: child_string(node, "api-url")
            .unwrap_or_else(|| "https://api.github.com".to_string()),
        owner: required_child_string(node, "owner")?,
        org: child_string(node, "org"),
        token_env: child_string(node, "token-env").unwrap_or_else(|| "GITHUB_TOKEN".to_string()),
        private_repos: child_string(node, "visibility")
            .map(|v| v != "public")
            .unwrap_or(true),
    })
}

fn parse_compile(node: &KdlNode) -> ConfigResult<CompileConfig> {
    Ok(CompileConfig {
        url: required_child_string(node, "url")?,
        token_env: child_string(node, "token-env"),
        callback_secret_env: child_string(node, "callback-secret-env"),
    })
}

// Helper functions for extracting values from KDL nodes

fn invalid(field: &str, message: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        message: message.to_string(),
    }
}

fn find_child<'a>(node: &'a KdlNode, name: &str) -> Option<&'a KdlNode> {
    node.children()?
        .nodes()
        .iter()
        .find(|child| child.name().value() == name)
}

fn first_arg(node: &KdlNode) -> Option<&kdl::KdlValue> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .map(|e| e.value())
}

fn child_string(node: &KdlNode, name: &str) -> Option<String> {
    find_child(node, name)
        .and_then(first_arg)
        .and_then(|v| v.as_string())
        .map(|s| s.to_string())
}

fn required_child_string(node: &KdlNode, name: &str) -> ConfigResult<String> {
    child_string(node, name).ok_or_else(|| {
        ConfigError::MissingField(format!("{} in {}", name, node.name().value()))
    })
}

fn child_u64(node: &KdlNode, name: &str) -> ConfigResult<Option<u64>> {
    match find_child(node, name).and_then(first_arg) {
        Some(value) => as_u64(value, name).map(Some),
        None => Ok(None),
    }
}

fn u64_prop(node: &KdlNode, name: &str) -> ConfigResult<Option<u64>> {
    match node.get(name) {
        Some(value) => as_u64(value, name).map(Some),
        None => Ok(None),
    }
}

fn as_u64(value: &kdl::KdlValue, field: &str) -> ConfigResult<u64> {
    value
        .as_integer()
        .and_then(|v| u64::try_from(v).ok())
        .ok_or_else(|| invalid(field, "expected a non-negative integer"))
}
