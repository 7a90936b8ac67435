use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::sales::Granularity;

#[derive(Clone, Debug, PartialEq)]
pub struct AppConfig {
    pub analysis: AnalysisConfig,
    pub thresholds: ThresholdConfig,
    pub estimation: EstimationConfig,
    pub period: PeriodConfig,
    pub sell_through: SellThroughConfig,
    pub roi: RoiConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct AnalysisConfig {
    pub granularity: Granularity,
    /// Forbid synthesized prices and margins.
    pub strict_mode: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ThresholdConfig {
    pub subcategory: ThresholdPreset,
    pub sku: ThresholdPreset,
}

/// Well-selling and opportunity-value floors for one granularity.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ThresholdPreset {
    pub min_adoption: f64,
    pub min_cluster_sales: f64,
    pub min_opportunity_value: f64,
    /// Absolute ceiling on expected sales per store, applied after the
    /// percentile cap.
    pub max_expected_sales: Option<f64>,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct EstimationConfig {
    pub trim_lower_percentile: f64,
    pub trim_upper_percentile: f64,
    pub cap_percentile: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PeriodConfig {
    pub data_days: u32,
    pub target_days: u32,
}

impl PeriodConfig {
    pub fn scaling_factor(&self) -> f64 {
        f64::from(self.target_days) / f64::from(self.data_days)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidatorPolicy {
    Disabled,
    Optional,
    Required,
}

impl ValidatorPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::Optional => "optional",
            Self::Required => "required",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SellThroughConfig {
    pub lower_bound: f64,
    pub upper_bound: f64,
    pub steepness: f64,
    pub min_stores_selling: usize,
    pub min_adoption: f64,
    pub min_predicted_sell_through: f64,
    /// Comparable-store count at which blended signals get their full weight.
    pub full_confidence_comparables: usize,
    pub validator: ValidatorPolicy,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RoiConfig {
    pub enabled: bool,
    pub min_roi: f64,
    pub min_margin_uplift: f64,
    pub min_comparables: usize,
    pub default_margin_rate: f64,
    pub max_margin_rate: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug, PartialEq)]
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

/// Immutable per-run view of the analytical settings. Built once and handed
/// to every engine component.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub granularity: Granularity,
    pub strict_mode: bool,
    pub thresholds: ThresholdPreset,
    pub estimation: EstimationConfig,
    pub period: PeriodConfig,
    pub sell_through: SellThroughConfig,
    pub roi: RoiConfig,
}

impl EngineConfig {
    /// Checks the cross-field constraints the engine relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_preset(self.granularity.as_str(), &self.thresholds)?;
        validate_estimation(&self.estimation)?;
        validate_period(&self.period)?;
        validate_sell_through(&self.sell_through)?;
        validate_roi(&self.roi)?;
        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        AppConfig::default().engine_config()
    }
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub granularity: Option<Granularity>,
    pub roi_enabled: Option<bool>,
    pub validator: Option<ValidatorPolicy>,
    pub database_url: Option<String>,
    pub log_level: Option<String>,
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

pub const SUBCATEGORY_PRESET: ThresholdPreset = ThresholdPreset {
    min_adoption: 0.70,
    min_cluster_sales: 100.0,
    min_opportunity_value: 50.0,
    max_expected_sales: None,
};

pub const SKU_PRESET: ThresholdPreset = ThresholdPreset {
    min_adoption: 0.80,
    min_cluster_sales: 1500.0,
    min_opportunity_value: 100.0,
    max_expected_sales: Some(2500.0),
};

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            analysis: AnalysisConfig { granularity: Granularity::Subcategory, strict_mode: true },
            thresholds: ThresholdConfig { subcategory: SUBCATEGORY_PRESET, sku: SKU_PRESET },
            estimation: EstimationConfig {
                trim_lower_percentile: 10.0,
                trim_upper_percentile: 90.0,
                cap_percentile: 80.0,
            },
            period: PeriodConfig { data_days: 90, target_days: 90 },
            sell_through: SellThroughConfig {
                lower_bound: 0.10,
                upper_bound: 0.70,
                steepness: 8.0,
                min_stores_selling: 3,
                min_adoption: 0.60,
                min_predicted_sell_through: 0.40,
                full_confidence_comparables: 10,
                validator: ValidatorPolicy::Disabled,
            },
            roi: RoiConfig {
                enabled: false,
                min_roi: 0.25,
                min_margin_uplift: 0.0,
                min_comparables: 3,
                default_margin_rate: 0.45,
                max_margin_rate: 0.95,
            },
            database: DatabaseConfig {
                url: "sqlite://shelfgap.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
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

impl std::str::FromStr for ValidatorPolicy {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "disabled" | "off" => Ok(Self::Disabled),
            "optional" => Ok(Self::Optional),
            "required" => Ok(Self::Required),
            other => Err(ConfigError::Validation(format!(
                "unsupported validator policy `{other}` (expected disabled|optional|required)"
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
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("shelfgap.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    /// Threshold preset for the configured granularity.
    pub fn active_thresholds(&self) -> ThresholdPreset {
        match self.analysis.granularity {
            Granularity::Subcategory => self.thresholds.subcategory,
            Granularity::Sku => self.thresholds.sku,
        }
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            granularity: self.analysis.granularity,
            strict_mode: self.analysis.strict_mode,
            thresholds: self.active_thresholds(),
            estimation: self.estimation,
            period: self.period,
            sell_through: self.sell_through,
            roi: self.roi,
        }
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(analysis) = patch.analysis {
            if let Some(granularity) = analysis.granularity {
                self.analysis.granularity = granularity;
            }
            if let Some(strict_mode) = analysis.strict_mode {
                self.analysis.strict_mode = strict_mode;
            }
        }

        if let Some(thresholds) = patch.thresholds {
            if let Some(subcategory) = thresholds.subcategory {
                subcategory.apply(&mut self.thresholds.subcategory);
            }
            if let Some(sku) = thresholds.sku {
                sku.apply(&mut self.thresholds.sku);
            }
        }

        if let Some(estimation) = patch.estimation {
            if let Some(value) = estimation.trim_lower_percentile {
                self.estimation.trim_lower_percentile = value;
            }
            if let Some(value) = estimation.trim_upper_percentile {
                self.estimation.trim_upper_percentile = value;
            }
            if let Some(value) = estimation.cap_percentile {
                self.estimation.cap_percentile = value;
            }
        }

        if let Some(period) = patch.period {
            if let Some(data_days) = period.data_days {
                self.period.data_days = data_days;
            }
            if let Some(target_days) = period.target_days {
                self.period.target_days = target_days;
            }
        }

        if let Some(sell_through) = patch.sell_through {
            if let Some(value) = sell_through.lower_bound {
                self.sell_through.lower_bound = value;
            }
            if let Some(value) = sell_through.upper_bound {
                self.sell_through.upper_bound = value;
            }
            if let Some(value) = sell_through.steepness {
                self.sell_through.steepness = value;
            }
            if let Some(value) = sell_through.min_stores_selling {
                self.sell_through.min_stores_selling = value;
            }
            if let Some(value) = sell_through.min_adoption {
                self.sell_through.min_adoption = value;
            }
            if let Some(value) = sell_through.min_predicted_sell_through {
                self.sell_through.min_predicted_sell_through = value;
            }
            if let Some(value) = sell_through.full_confidence_comparables {
                self.sell_through.full_confidence_comparables = value;
            }
            if let Some(value) = sell_through.validator {
                self.sell_through.validator = value;
            }
        }

        if let Some(roi) = patch.roi {
            if let Some(enabled) = roi.enabled {
                self.roi.enabled = enabled;
            }
            if let Some(value) = roi.min_roi {
                self.roi.min_roi = value;
            }
            if let Some(value) = roi.min_margin_uplift {
                self.roi.min_margin_uplift = value;
            }
            if let Some(value) = roi.min_comparables {
                self.roi.min_comparables = value;
            }
            if let Some(value) = roi.default_margin_rate {
                self.roi.default_margin_rate = value;
            }
            if let Some(value) = roi.max_margin_rate {
                self.roi.max_margin_rate = value;
            }
        }

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
        if let Some(value) = read_env("SHELFGAP_GRANULARITY") {
            self.analysis.granularity = value.parse().map_err(|_| {
                ConfigError::InvalidEnvOverride { key: "SHELFGAP_GRANULARITY".to_string(), value }
            })?;
        }
        if let Some(value) = read_env("SHELFGAP_STRICT_MODE") {
            self.analysis.strict_mode = parse_bool("SHELFGAP_STRICT_MODE", &value)?;
        }

        if let Some(value) = read_env("SHELFGAP_DATA_DAYS") {
            self.period.data_days = parse_u32("SHELFGAP_DATA_DAYS", &value)?;
        }
        if let Some(value) = read_env("SHELFGAP_TARGET_DAYS") {
            self.period.target_days = parse_u32("SHELFGAP_TARGET_DAYS", &value)?;
        }

        if let Some(value) = read_env("SHELFGAP_SELL_THROUGH_VALIDATOR") {
            self.sell_through.validator = value.parse()?;
        }
        if let Some(value) = read_env("SHELFGAP_MIN_PREDICTED_SELL_THROUGH") {
            self.sell_through.min_predicted_sell_through =
                parse_f64("SHELFGAP_MIN_PREDICTED_SELL_THROUGH", &value)?;
        }

        if let Some(value) = read_env("SHELFGAP_ROI_ENABLED") {
            self.roi.enabled = parse_bool("SHELFGAP_ROI_ENABLED", &value)?;
        }
        if let Some(value) = read_env("SHELFGAP_ROI_MIN") {
            self.roi.min_roi = parse_f64("SHELFGAP_ROI_MIN", &value)?;
        }

        if let Some(value) = read_env("SHELFGAP_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("SHELFGAP_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_u32("SHELFGAP_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("SHELFGAP_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("SHELFGAP_DATABASE_TIMEOUT_SECS", &value)?;
        }

        let log_level =
            read_env("SHELFGAP_LOGGING_LEVEL").or_else(|| read_env("SHELFGAP_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("SHELFGAP_LOGGING_FORMAT").or_else(|| read_env("SHELFGAP_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(granularity) = overrides.granularity {
            self.analysis.granularity = granularity;
        }
        if let Some(enabled) = overrides.roi_enabled {
            self.roi.enabled = enabled;
        }
        if let Some(validator) = overrides.validator {
            self.sell_through.validator = validator;
        }
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_preset("subcategory", &self.thresholds.subcategory)?;
        validate_preset("sku", &self.thresholds.sku)?;
        validate_estimation(&self.estimation)?;
        validate_period(&self.period)?;
        validate_sell_through(&self.sell_through)?;
        validate_roi(&self.roi)?;
        validate_database(&self.database)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("shelfgap.toml"), PathBuf::from("config/shelfgap.toml")]
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

fn is_unit_interval(value: f64) -> bool {
    value.is_finite() && (0.0..=1.0).contains(&value)
}

fn is_non_negative(value: f64) -> bool {
    value.is_finite() && value >= 0.0
}

fn validate_preset(name: &str, preset: &ThresholdPreset) -> Result<(), ConfigError> {
    if !is_unit_interval(preset.min_adoption) {
        return Err(ConfigError::Validation(format!(
            "thresholds.{name}.min_adoption must be in range 0..=1"
        )));
    }
    if !is_non_negative(preset.min_cluster_sales) {
        return Err(ConfigError::Validation(format!(
            "thresholds.{name}.min_cluster_sales must be zero or greater"
        )));
    }
    if !is_non_negative(preset.min_opportunity_value) {
        return Err(ConfigError::Validation(format!(
            "thresholds.{name}.min_opportunity_value must be zero or greater"
        )));
    }
    if let Some(max) = preset.max_expected_sales {
        if !max.is_finite() || max <= 0.0 {
            return Err(ConfigError::Validation(format!(
                "thresholds.{name}.max_expected_sales must be greater than zero"
            )));
        }
        if max < preset.min_opportunity_value {
            return Err(ConfigError::Validation(format!(
                "thresholds.{name}.max_expected_sales is below min_opportunity_value; no opportunity could pass"
            )));
        }
    }
    Ok(())
}

fn validate_estimation(estimation: &EstimationConfig) -> Result<(), ConfigError> {
    let lower = estimation.trim_lower_percentile;
    let upper = estimation.trim_upper_percentile;
    let ordered = lower.is_finite() && upper.is_finite() && 0.0 <= lower && lower < upper;
    if !ordered || upper > 100.0 {
        return Err(ConfigError::Validation(
            "estimation trim percentiles must satisfy 0 <= lower < upper <= 100".to_string(),
        ));
    }
    let cap = estimation.cap_percentile;
    if !cap.is_finite() || !(0.0..=100.0).contains(&cap) {
        return Err(ConfigError::Validation(
            "estimation.cap_percentile must be in range 0..=100".to_string(),
        ));
    }
    Ok(())
}

fn validate_period(period: &PeriodConfig) -> Result<(), ConfigError> {
    if period.data_days == 0 || period.target_days == 0 {
        return Err(ConfigError::Validation(
            "period.data_days and period.target_days must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

fn validate_sell_through(sell_through: &SellThroughConfig) -> Result<(), ConfigError> {
    let lower = sell_through.lower_bound;
    let upper = sell_through.upper_bound;
    if !is_unit_interval(lower) || !is_unit_interval(upper) || lower >= upper {
        return Err(ConfigError::Validation(
            "sell_through bounds must satisfy 0 <= lower_bound < upper_bound <= 1".to_string(),
        ));
    }
    if !sell_through.steepness.is_finite() || sell_through.steepness <= 0.0 {
        return Err(ConfigError::Validation(
            "sell_through.steepness must be greater than zero".to_string(),
        ));
    }
    if !is_unit_interval(sell_through.min_adoption) {
        return Err(ConfigError::Validation(
            "sell_through.min_adoption must be in range 0..=1".to_string(),
        ));
    }
    if !is_unit_interval(sell_through.min_predicted_sell_through) {
        return Err(ConfigError::Validation(
            "sell_through.min_predicted_sell_through must be in range 0..=1".to_string(),
        ));
    }
    if sell_through.full_confidence_comparables == 0 {
        return Err(ConfigError::Validation(
            "sell_through.full_confidence_comparables must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

fn validate_roi(roi: &RoiConfig) -> Result<(), ConfigError> {
    let max = roi.max_margin_rate;
    if !max.is_finite() || max <= 0.0 || max >= 1.0 {
        return Err(ConfigError::Validation(
            "roi.max_margin_rate must be in range (0, 1)".to_string(),
        ));
    }
    if !is_unit_interval(roi.default_margin_rate) || roi.default_margin_rate > max {
        return Err(ConfigError::Validation(
            "roi.default_margin_rate must be in range 0..=roi.max_margin_rate".to_string(),
        ));
    }
    if !is_non_negative(roi.min_roi) {
        return Err(ConfigError::Validation("roi.min_roi must be zero or greater".to_string()));
    }
    if !is_non_negative(roi.min_margin_uplift) {
        return Err(ConfigError::Validation(
            "roi.min_margin_uplift must be zero or greater".to_string(),
        ));
    }
    Ok(())
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
    value.parse::<f64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    value.parse::<bool>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    analysis: Option<AnalysisPatch>,
    thresholds: Option<ThresholdsPatch>,
    estimation: Option<EstimationPatch>,
    period: Option<PeriodPatch>,
    sell_through: Option<SellThroughPatch>,
    roi: Option<RoiPatch>,
    database: Option<DatabasePatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct AnalysisPatch {
    granularity: Option<Granularity>,
    strict_mode: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct ThresholdsPatch {
    subcategory: Option<PresetPatch>,
    sku: Option<PresetPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct PresetPatch {
    min_adoption: Option<f64>,
    min_cluster_sales: Option<f64>,
    min_opportunity_value: Option<f64>,
    max_expected_sales: Option<f64>,
}

impl PresetPatch {
    fn apply(self, preset: &mut ThresholdPreset) {
        if let Some(value) = self.min_adoption {
            preset.min_adoption = value;
        }
        if let Some(value) = self.min_cluster_sales {
            preset.min_cluster_sales = value;
        }
        if let Some(value) = self.min_opportunity_value {
            preset.min_opportunity_value = value;
        }
        if let Some(value) = self.max_expected_sales {
            preset.max_expected_sales = Some(value);
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct EstimationPatch {
    trim_lower_percentile: Option<f64>,
    trim_upper_percentile: Option<f64>,
    cap_percentile: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct PeriodPatch {
    data_days: Option<u32>,
    target_days: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct SellThroughPatch {
    lower_bound: Option<f64>,
    upper_bound: Option<f64>,
    steepness: Option<f64>,
    min_stores_selling: Option<usize>,
    min_adoption: Option<f64>,
    min_predicted_sell_through: Option<f64>,
    full_confidence_comparables: Option<usize>,
    validator: Option<ValidatorPolicy>,
}

#[derive(Debug, Default, Deserialize)]
struct RoiPatch {
    enabled: Option<bool>,
    min_roi: Option<f64>,
    min_margin_uplift: Option<f64>,
    min_comparables: Option<usize>,
    default_margin_rate: Option<f64>,
    max_margin_rate: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
