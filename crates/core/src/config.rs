use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::task::Category;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub pipeline: PipelineConfig,
    pub routing: RoutingConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PipelineConfig {
    pub max_input_chars: usize,
    pub review_threshold: f64,
    pub confidence_floor: f64,
    pub fast_path_confidence: f64,
    pub classifier_attempts: u32,
    pub classifier_timeout_ms: u64,
    pub retry_base_delay_ms: u64,
    pub retry_backoff_factor: f64,
    pub max_retry_delay_ms: u64,
    pub urgency_keywords: Vec<String>,
    pub entity_systems: Vec<String>,
}

impl PipelineConfig {
    pub fn classifier_timeout(&self) -> Duration {
        Duration::from_millis(self.classifier_timeout_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            base_delay_ms: self.retry_base_delay_ms,
            backoff_factor: self.retry_backoff_factor,
            max_delay_ms: self.max_retry_delay_ms,
        }
    }

    /// Delay before retry number `attempt` (1-based, counting failed attempts so far).
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        self.retry_policy().delay(attempt)
    }
}

/// Capped exponential backoff between classifier attempts.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RetryPolicy {
    pub base_delay_ms: u64,
    pub backoff_factor: f64,
    pub max_delay_ms: u64,
}

impl RetryPolicy {
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16) as i32;
        let raw = self.base_delay_ms as f64 * self.backoff_factor.powi(exponent);
        let capped = raw.min(self.max_delay_ms as f64).max(0.0);
        Duration::from_millis(capped as u64)
    }
}

/// Category to candidate team ids.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoutingConfig {
    pub it: Vec<String>,
    pub hr: Vec<String>,
    pub operations: Vec<String>,
}

impl RoutingConfig {
    pub fn teams_for(&self, category: Category) -> &[String] {
        match category {
            Category::It => &self.it,
            Category::Hr => &self.hr,
            Category::Operations => &self.operations,
            Category::Unknown => &[],
        }
    }
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub review_threshold: Option<f64>,
    pub classifier_attempts: Option<u32>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

pub const DEFAULT_URGENCY_KEYWORDS: &[&str] = &[
    "urgent",
    "asap",
    "down",
    "blocked",
    "critical",
    "emergency",
    "outage",
    "immediately",
    "broken",
    "not working",
];

pub const DEFAULT_ENTITY_SYSTEMS: &[&str] = &[
    "vpn",
    "email",
    "server",
    "database",
    "laptop",
    "printer",
    "wifi",
    "payroll",
    "jira",
    "sap",
    "salesforce",
];

fn owned(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| (*value).to_string()).collect()
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_input_chars: 4000,
            review_threshold: 0.6,
            confidence_floor: 0.5,
            fast_path_confidence: 0.95,
            classifier_attempts: 3,
            classifier_timeout_ms: 5_000,
            retry_base_delay_ms: 200,
            retry_backoff_factor: 2.0,
            max_retry_delay_ms: 2_000,
            urgency_keywords: owned(DEFAULT_URGENCY_KEYWORDS),
            entity_systems: owned(DEFAULT_ENTITY_SYSTEMS),
        }
    }
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            it: owned(&["it-devops", "it-networkops"]),
            hr: owned(&["hr-people-ops"]),
            operations: owned(&["ops-facilities", "ops-procurement"]),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://routedesk.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            pipeline: PipelineConfig::default(),
            routing: RoutingConfig::default(),
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("routedesk.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(pipeline) = patch.pipeline {
            let target = &mut self.pipeline;
            if let Some(value) = pipeline.max_input_chars {
                target.max_input_chars = value;
            }
            if let Some(value) = pipeline.review_threshold {
                target.review_threshold = value;
            }
            if let Some(value) = pipeline.confidence_floor {
                target.confidence_floor = value;
            }
            if let Some(value) = pipeline.fast_path_confidence {
                target.fast_path_confidence = value;
            }
            if let Some(value) = pipeline.classifier_attempts {
                target.classifier_attempts = value;
            }
            if let Some(value) = pipeline.classifier_timeout_ms {
                target.classifier_timeout_ms = value;
            }
            if let Some(value) = pipeline.retry_base_delay_ms {
                target.retry_base_delay_ms = value;
            }
            if let Some(value) = pipeline.retry_backoff_factor {
                target.retry_backoff_factor = value;
            }
            if let Some(value) = pipeline.max_retry_delay_ms {
                target.max_retry_delay_ms = value;
            }
            if let Some(value) = pipeline.urgency_keywords {
                target.urgency_keywords = value;
            }
            if let Some(value) = pipeline.entity_systems {
                target.entity_systems = value;
            }
        }

        if let Some(routing) = patch.routing {
            if let Some(it) = routing.it {
                self.routing.it = it;
            }
            if let Some(hr) = routing.hr {
                self.routing.hr = hr;
            }
            if let Some(operations) = routing.operations {
                self.routing.operations = operations;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("ROUTEDESK_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("ROUTEDESK_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_u32("ROUTEDESK_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("ROUTEDESK_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("ROUTEDESK_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("ROUTEDESK_PIPELINE_MAX_INPUT_CHARS") {
            self.pipeline.max_input_chars =
                parse_u64("ROUTEDESK_PIPELINE_MAX_INPUT_CHARS", &value)? as usize;
        }
        if let Some(value) = read_env("ROUTEDESK_PIPELINE_REVIEW_THRESHOLD") {
            self.pipeline.review_threshold =
                parse_f64("ROUTEDESK_PIPELINE_REVIEW_THRESHOLD", &value)?;
        }
        if let Some(value) = read_env("ROUTEDESK_PIPELINE_CONFIDENCE_FLOOR") {
            self.pipeline.confidence_floor =
                parse_f64("ROUTEDESK_PIPELINE_CONFIDENCE_FLOOR", &value)?;
        }
        if let Some(value) = read_env("ROUTEDESK_PIPELINE_FAST_PATH_CONFIDENCE") {
            self.pipeline.fast_path_confidence =
                parse_f64("ROUTEDESK_PIPELINE_FAST_PATH_CONFIDENCE", &value)?;
        }
        if let Some(value) = read_env("ROUTEDESK_PIPELINE_CLASSIFIER_ATTEMPTS") {
            self.pipeline.classifier_attempts =
                parse_u32("ROUTEDESK_PIPELINE_CLASSIFIER_ATTEMPTS", &value)?;
        }
        if let Some(value) = read_env("ROUTEDESK_PIPELINE_CLASSIFIER_TIMEOUT_MS") {
            self.pipeline.classifier_timeout_ms =
                parse_u64("ROUTEDESK_PIPELINE_CLASSIFIER_TIMEOUT_MS", &value)?;
        }
        if let Some(value) = read_env("ROUTEDESK_PIPELINE_RETRY_BASE_DELAY_MS") {
            self.pipeline.retry_base_delay_ms =
                parse_u64("ROUTEDESK_PIPELINE_RETRY_BASE_DELAY_MS", &value)?;
        }
        if let Some(value) = read_env("ROUTEDESK_PIPELINE_MAX_RETRY_DELAY_MS") {
            self.pipeline.max_retry_delay_ms =
                parse_u64("ROUTEDESK_PIPELINE_MAX_RETRY_DELAY_MS", &value)?;
        }

        let log_level =
            read_env("ROUTEDESK_LOGGING_LEVEL").or_else(|| read_env("ROUTEDESK_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("ROUTEDESK_LOGGING_FORMAT").or_else(|| read_env("ROUTEDESK_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(review_threshold) = overrides.review_threshold {
            self.pipeline.review_threshold = review_threshold;
        }
        if let Some(classifier_attempts) = overrides.classifier_attempts {
            self.pipeline.classifier_attempts = classifier_attempts;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_pipeline(&self.pipeline)?;
        validate_routing(&self.routing)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

pub fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("routedesk.toml"), PathBuf::from("config/routedesk.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_unit_interval(key: &str, value: f64) -> Result<(), ConfigError> {
    if !(0.0..=1.0).contains(&value) {
        return Err(ConfigError::Validation(format!("{key} must be in range 0.0..=1.0")));
    }
    Ok(())
}

fn validate_pipeline(pipeline: &PipelineConfig) -> Result<(), ConfigError> {
    if pipeline.max_input_chars == 0 {
        return Err(ConfigError::Validation(
            "pipeline.max_input_chars must be greater than zero".to_string(),
        ));
    }

    validate_unit_interval("pipeline.review_threshold", pipeline.review_threshold)?;
    validate_unit_interval("pipeline.confidence_floor", pipeline.confidence_floor)?;
    validate_unit_interval("pipeline.fast_path_confidence", pipeline.fast_path_confidence)?;

    if pipeline.classifier_attempts == 0 {
        return Err(ConfigError::Validation(
            "pipeline.classifier_attempts must be greater than zero".to_string(),
        ));
    }

    if pipeline.classifier_timeout_ms == 0 {
        return Err(ConfigError::Validation(
            "pipeline.classifier_timeout_ms must be greater than zero".to_string(),
        ));
    }

    if !pipeline.retry_backoff_factor.is_finite() || pipeline.retry_backoff_factor < 1.0 {
        return Err(ConfigError::Validation(
            "pipeline.retry_backoff_factor must be a finite number >= 1.0".to_string(),
        ));
    }

    if pipeline.max_retry_delay_ms < pipeline.retry_base_delay_ms {
        return Err(ConfigError::Validation(
            "pipeline.max_retry_delay_ms must not be lower than pipeline.retry_base_delay_ms"
                .to_string(),
        ));
    }

    if pipeline.urgency_keywords.iter().any(|keyword| keyword.trim().is_empty()) {
        return Err(ConfigError::Validation(
            "pipeline.urgency_keywords must not contain blank entries".to_string(),
        ));
    }

    Ok(())
}

fn validate_routing(routing: &RoutingConfig) -> Result<(), ConfigError> {
    for category in Category::ROUTABLE {
        let teams = routing.teams_for(category);
        if teams.is_empty() || teams.iter().any(|team| team.trim().is_empty()) {
            return Err(ConfigError::Validation(format!(
                "routing.{} must list at least one non-empty team id",
                category.as_str().to_ascii_lowercase()
            )));
        }
    }
    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_f64(key: &str, value: &str) -> Result<f64, ConfigError> {
    value.trim().parse::<f64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    pipeline: Option<PipelinePatch>,
    routing: Option<RoutingPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct PipelinePatch {
    max_input_chars: Option<usize>,
    review_threshold: Option<f64>,
    confidence_floor: Option<f64>,
    fast_path_confidence: Option<f64>,
    classifier_attempts: Option<u32>,
    classifier_timeout_ms: Option<u64>,
    retry_base_delay_ms: Option<u64>,
    retry_backoff_factor: Option<f64>,
    max_retry_delay_ms: Option<u64>,
    urgency_keywords: Option<Vec<String>>,
    entity_systems: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
struct RoutingPatch {
    it: Option<Vec<String>>,
    hr: Option<Vec<String>>,
    operations: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;
    use std::io;
    use std::sync::{Mutex, OnceLock};
    use std::time::Duration;

    use tempfile::TempDir;

    use super::{
        AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat, PipelineConfig,
        RetryPolicy,
    };
    use crate::domain::task::Category;

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    fn env_lock() -> &'static Mutex<()> {
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn clear_vars(vars: &[&str]) {
        for var in vars {
            env::remove_var(var);
        }
    }

    fn ensure(condition: bool, message: &'static str) -> Result<(), String> {
        if condition {
            Ok(())
        } else {
            Err(message.to_string())
        }
    }

    #[test]
    fn defaults_are_valid() -> Result<(), String> {
        let config = AppConfig::default();
        config.validate().map_err(|err| err.to_string())?;
        ensure(config.pipeline.classifier_attempts == 3, "three classifier attempts by default")?;
        ensure(
            config.routing.teams_for(Category::It) == ["it-devops", "it-networkops"],
            "it routing defaults",
        )?;
        ensure(config.routing.teams_for(Category::Unknown).is_empty(), "unknown is unrouted")
    }

    #[test]
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TEST_ROUTEDESK_DB_PATH", "/tmp/routedesk-interp.db");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("routedesk.toml");
            fs::write(
                &path,
                r#"
[database]
url = "sqlite://${TEST_ROUTEDESK_DB_PATH}"

[routing]
hr = ["hr-benefits", "hr-people-ops"]
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.database.url == "sqlite:///tmp/routedesk-interp.db",
                "database url should be interpolated from environment",
            )?;
            ensure(config.routing.hr.len() == 2, "hr routing should come from the file")?;
            ensure(config.routing.it.len() == 2, "it routing should keep its default")?;
            Ok(())
        })();

        clear_vars(&["TEST_ROUTEDESK_DB_PATH"]);
        result
    }

    #[test]
    fn missing_interpolation_variable_is_reported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;
        clear_vars(&["TEST_ROUTEDESK_UNSET"]);

        let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
        let path = dir.path().join("routedesk.toml");
        fs::write(&path, "[database]\nurl = \"${TEST_ROUTEDESK_UNSET}\"\n")
            .map_err(|err| err.to_string())?;

        let error =
            match AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
            {
                Ok(_) => return Err("expected interpolation failure".to_string()),
                Err(error) => error,
            };
        ensure(
            matches!(error, ConfigError::MissingEnvInterpolation { ref var } if var == "TEST_ROUTEDESK_UNSET"),
            "missing variable should be named in the error",
        )
    }

    #[test]
    fn logging_env_aliases_are_supported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("ROUTEDESK_LOG_LEVEL", "warn");
        env::set_var("ROUTEDESK_LOG_FORMAT", "json");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.logging.level == "warn", "warning log level should be set from env var")?;
            ensure(
                matches!(config.logging.format, LogFormat::Json),
                "json logging format should be set from env var",
            )?;
            Ok(())
        })();

        clear_vars(&["ROUTEDESK_LOG_LEVEL", "ROUTEDESK_LOG_FORMAT"]);
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("ROUTEDESK_DATABASE_URL", "sqlite://from-env.db");
        env::set_var("ROUTEDESK_PIPELINE_REVIEW_THRESHOLD", "0.7");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("routedesk.toml");
            fs::write(
                &path,
                r#"
[database]
url = "sqlite://from-file.db"

[pipeline]
review_threshold = 0.8
classifier_attempts = 5

[logging]
level = "warn"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config = AppConfig::load(LoadOptions {
                config_path: Some(path),
                overrides: ConfigOverrides {
                    database_url: Some("sqlite://from-override.db".to_string()),
                    log_level: Some("debug".to_string()),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.database.url == "sqlite://from-override.db",
                "override database url should win",
            )?;
            ensure(config.logging.level == "debug", "overridden log level should be debug")?;
            ensure(
                (config.pipeline.review_threshold - 0.7).abs() < f64::EPSILON,
                "env review threshold should win over file",
            )?;
            ensure(config.pipeline.classifier_attempts == 5, "file attempts should win over default")?;
            Ok(())
        })();

        clear_vars(&["ROUTEDESK_DATABASE_URL", "ROUTEDESK_PIPELINE_REVIEW_THRESHOLD"]);
        result
    }

    #[test]
    fn validation_rejects_out_of_range_threshold() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("ROUTEDESK_PIPELINE_REVIEW_THRESHOLD", "1.5");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => {
                    return Err("expected validation failure but config load succeeded".to_string())
                }
                Err(error) => error,
            };
            let has_message = matches!(
                error,
                ConfigError::Validation(ref message) if message.contains("pipeline.review_threshold")
            );
            ensure(has_message, "validation failure should mention pipeline.review_threshold")
        })();

        clear_vars(&["ROUTEDESK_PIPELINE_REVIEW_THRESHOLD"]);
        result
    }

    #[test]
    fn invalid_numeric_env_override_is_rejected() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("ROUTEDESK_PIPELINE_CLASSIFIER_ATTEMPTS", "three");
        let result = ensure(
            matches!(
                AppConfig::load(LoadOptions::default()),
                Err(ConfigError::InvalidEnvOverride { .. })
            ),
            "non-numeric attempts should be rejected",
        );
        clear_vars(&["ROUTEDESK_PIPELINE_CLASSIFIER_ATTEMPTS"]);
        result
    }

    #[test]
    fn zero_attempts_and_empty_routing_fail_validation() -> Result<(), String> {
        let mut config = AppConfig::default();
        config.pipeline.classifier_attempts = 0;
        ensure(config.validate().is_err(), "zero attempts must be rejected")?;

        let mut config = AppConfig::default();
        config.routing.operations.clear();
        let error = match config.validate() {
            Ok(()) => return Err("expected routing validation failure".to_string()),
            Err(error) => error.to_string(),
        };
        ensure(error.contains("routing.operations"), "error should name the routing list")
    }

    #[test]
    fn retry_delay_grows_and_is_capped() {
        let pipeline = PipelineConfig {
            retry_base_delay_ms: 100,
            retry_backoff_factor: 2.0,
            max_retry_delay_ms: 300,
            ..PipelineConfig::default()
        };

        assert_eq!(pipeline.retry_delay(1), Duration::from_millis(100));
        assert_eq!(pipeline.retry_delay(2), Duration::from_millis(200));
        assert_eq!(pipeline.retry_delay(3), Duration::from_millis(300));
        assert_eq!(pipeline.retry_delay(10), Duration::from_millis(300));
    }

    #[test]
    fn retry_policy_carries_only_backoff_settings() {
        let pipeline = PipelineConfig {
            retry_base_delay_ms: 50,
            retry_backoff_factor: 3.0,
            max_retry_delay_ms: 400,
            ..PipelineConfig::default()
        };
        let policy = pipeline.retry_policy();

        assert_eq!(
            policy,
            RetryPolicy { base_delay_ms: 50, backoff_factor: 3.0, max_delay_ms: 400 }
        );
        assert_eq!(policy.delay(2), Duration::from_millis(150));
        assert_eq!(policy.delay(3), Duration::from_millis(400));
    }
}
