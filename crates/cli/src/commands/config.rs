use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use routedesk_core::config::{resolve_config_path, AppConfig, LoadOptions};
use toml::Value;

pub fn run(options: &LoadOptions) -> String {
    let config = match AppConfig::load(options.clone()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = resolve_config_path(options.config_path.as_deref());
    let sources = Sources {
        doc: load_config_file_doc(config_file_path.as_deref()),
        path: config_file_path,
        options,
    };
    let pipeline = &config.pipeline;

    let mut lines = vec![
        "effective config (source precedence: override > env > file > default):".to_string()
    ];
    let mut push = |key: &str, value: String, env_keys: &[&str]| {
        lines.push(render_line(key, &value, sources.field_source(key, env_keys)));
    };

    push("database.url", redact_url(&config.database.url), &["ROUTEDESK_DATABASE_URL"]);
    push(
        "database.max_connections",
        config.database.max_connections.to_string(),
        &["ROUTEDESK_DATABASE_MAX_CONNECTIONS"],
    );
    push(
        "database.timeout_secs",
        config.database.timeout_secs.to_string(),
        &["ROUTEDESK_DATABASE_TIMEOUT_SECS"],
    );
    push(
        "pipeline.max_input_chars",
        pipeline.max_input_chars.to_string(),
        &["ROUTEDESK_PIPELINE_MAX_INPUT_CHARS"],
    );
    push(
        "pipeline.review_threshold",
        pipeline.review_threshold.to_string(),
        &["ROUTEDESK_PIPELINE_REVIEW_THRESHOLD"],
    );
    push(
        "pipeline.confidence_floor",
        pipeline.confidence_floor.to_string(),
        &["ROUTEDESK_PIPELINE_CONFIDENCE_FLOOR"],
    );
    push(
        "pipeline.fast_path_confidence",
        pipeline.fast_path_confidence.to_string(),
        &["ROUTEDESK_PIPELINE_FAST_PATH_CONFIDENCE"],
    );
    push(
        "pipeline.classifier_attempts",
        pipeline.classifier_attempts.to_string(),
        &["ROUTEDESK_PIPELINE_CLASSIFIER_ATTEMPTS"],
    );
    push(
        "pipeline.classifier_timeout_ms",
        pipeline.classifier_timeout_ms.to_string(),
        &["ROUTEDESK_PIPELINE_CLASSIFIER_TIMEOUT_MS"],
    );
    push(
        "pipeline.retry_base_delay_ms",
        pipeline.retry_base_delay_ms.to_string(),
        &["ROUTEDESK_PIPELINE_RETRY_BASE_DELAY_MS"],
    );
    push("pipeline.retry_backoff_factor", pipeline.retry_backoff_factor.to_string(), &[]);
    push(
        "pipeline.max_retry_delay_ms",
        pipeline.max_retry_delay_ms.to_string(),
        &["ROUTEDESK_PIPELINE_MAX_RETRY_DELAY_MS"],
    );
    push("pipeline.urgency_keywords", pipeline.urgency_keywords.join(", "), &[]);
    push("pipeline.entity_systems", pipeline.entity_systems.join(", "), &[]);
    push("routing.it", config.routing.it.join(", "), &[]);
    push("routing.hr", config.routing.hr.join(", "), &[]);
    push("routing.operations", config.routing.operations.join(", "), &[]);
    push(
        "logging.level",
        config.logging.level.clone(),
        &["ROUTEDESK_LOGGING_LEVEL", "ROUTEDESK_LOG_LEVEL"],
    );
    push(
        "logging.format",
        format!("{:?}", config.logging.format).to_ascii_lowercase(),
        &["ROUTEDESK_LOGGING_FORMAT", "ROUTEDESK_LOG_FORMAT"],
    );

    lines.join("\n")
}

struct Sources<'a> {
    doc: Option<Value>,
    path: Option<PathBuf>,
    options: &'a LoadOptions,
}

impl Sources<'_> {
    fn field_source(&self, key_path: &str, env_keys: &[&str]) -> String {
        if self.overridden(key_path) {
            return "override".to_string();
        }

        if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
            return format!("env ({env_key})");
        }

        if let Some(doc) = &self.doc {
            if contains_path(doc, key_path) {
                let file_path = self
                    .path
                    .as_ref()
                    .map(|path| path.display().to_string())
                    .unwrap_or_else(|| "config file".to_string());
                return format!("file ({file_path})");
            }
        }

        "default".to_string()
    }

    fn overridden(&self, key_path: &str) -> bool {
        let overrides = &self.options.overrides;
        match key_path {
            "database.url" => overrides.database_url.is_some(),
            "logging.level" => overrides.log_level.is_some(),
            "pipeline.review_threshold" => overrides.review_threshold.is_some(),
            "pipeline.classifier_attempts" => overrides.classifier_attempts.is_some(),
            _ => false,
        }
    }
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

/// Hides a `user:password@` segment if the URL carries one.
fn redact_url(url: &str) -> String {
    let Some((scheme, rest)) = url.split_once("://") else {
        return url.to_string();
    };
    match rest.split_once('@') {
        Some((_, host)) => format!("{scheme}://<redacted>@{host}"),
        None => url.to_string(),
    }
}
