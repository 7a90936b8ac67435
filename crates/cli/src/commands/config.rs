use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use shelfgap_core::config::{AppConfig, LoadOptions};
use toml::Value;

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());
    let thresholds_key = format!("thresholds.{}", config.analysis.granularity.as_str());
    let thresholds = config.active_thresholds();

    let fields = vec![
        field(
            "analysis.granularity",
            config.analysis.granularity.to_string(),
            &["SHELFGAP_GRANULARITY"],
        ),
        field(
            "analysis.strict_mode",
            config.analysis.strict_mode.to_string(),
            &["SHELFGAP_STRICT_MODE"],
        ),
        field(format!("{thresholds_key}.min_adoption"), thresholds.min_adoption.to_string(), &[]),
        field(
            format!("{thresholds_key}.min_cluster_sales"),
            thresholds.min_cluster_sales.to_string(),
            &[],
        ),
        field(
            format!("{thresholds_key}.min_opportunity_value"),
            thresholds.min_opportunity_value.to_string(),
            &[],
        ),
        field(
            format!("{thresholds_key}.max_expected_sales"),
            thresholds
                .max_expected_sales
                .map(|value| value.to_string())
                .unwrap_or_else(|| "<none>".to_string()),
            &[],
        ),
        field("period.data_days", config.period.data_days.to_string(), &["SHELFGAP_DATA_DAYS"]),
        field(
            "period.target_days",
            config.period.target_days.to_string(),
            &["SHELFGAP_TARGET_DAYS"],
        ),
        field(
            "sell_through.validator",
            config.sell_through.validator.as_str(),
            &["SHELFGAP_SELL_THROUGH_VALIDATOR"],
        ),
        field(
            "sell_through.min_predicted_sell_through",
            config.sell_through.min_predicted_sell_through.to_string(),
            &["SHELFGAP_MIN_PREDICTED_SELL_THROUGH"],
        ),
        field("roi.enabled", config.roi.enabled.to_string(), &["SHELFGAP_ROI_ENABLED"]),
        field("roi.min_roi", config.roi.min_roi.to_string(), &["SHELFGAP_ROI_MIN"]),
        field("database.url", config.database.url.as_str(), &["SHELFGAP_DATABASE_URL"]),
        field(
            "database.max_connections",
            config.database.max_connections.to_string(),
            &["SHELFGAP_DATABASE_MAX_CONNECTIONS"],
        ),
        field(
            "database.timeout_secs",
            config.database.timeout_secs.to_string(),
            &["SHELFGAP_DATABASE_TIMEOUT_SECS"],
        ),
        field(
            "logging.level",
            config.logging.level.as_str(),
            &["SHELFGAP_LOGGING_LEVEL", "SHELFGAP_LOG_LEVEL"],
        ),
        field(
            "logging.format",
            format!("{:?}", config.logging.format).to_ascii_lowercase(),
            &["SHELFGAP_LOGGING_FORMAT", "SHELFGAP_LOG_FORMAT"],
        ),
    ];

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for field in fields {
        let source = field_source(
            &field.key,
            field.env_keys,
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        );
        lines.push(render_line(&field.key, &field.value, source));
    }

    lines.join("\n")
}

struct Field {
    key: String,
    value: String,
    env_keys: &'static [&'static str],
}

fn field(
    key: impl Into<String>,
    value: impl Into<String>,
    env_keys: &'static [&'static str],
) -> Field {
    Field { key: key.into(), value: value.into(), env_keys }
}

fn detect_config_path() -> Option<PathBuf> {
    let root = PathBuf::from("shelfgap.toml");
    if root.exists() {
        return Some(root);
    }

    let nested = PathBuf::from("config/shelfgap.toml");
    if nested.exists() {
        return Some(nested);
    }

    None
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
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
