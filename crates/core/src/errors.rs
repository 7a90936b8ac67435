use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::ConfigError;

/// Fatal engine failures. Any of these aborts the run.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum EngineError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("external validator `{policy}` is required but none was supplied")]
    ValidatorUnavailable { policy: String },
    #[error(
        "external validator `{validator}` returned the constant score {score} for {samples} opportunities with varied adoption rates"
    )]
    SuspiciousValidator { validator: String, score: f64, samples: usize },
    #[error("engine invariant violation: {0}")]
    InvariantViolation(String),
}

/// Why a candidate was dropped for missing data. Recovered locally; the run
/// continues and the skip is counted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    MissingPrice,
    BelowMinimumValue,
    MissingMargin,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MissingPrice => "missing_price",
            Self::BelowMinimumValue => "below_minimum_value",
            Self::MissingMargin => "missing_margin",
        }
    }
}

/// Ordinary business-rule rejection. Not an error.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    ValidatorRejected,
    TooFewStoresSelling,
    AdoptionBelowMinimum,
    SellThroughBelowMinimum,
    RoiBelowMinimum,
    MarginUpliftBelowMinimum,
    TooFewComparables,
}

impl RejectionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ValidatorRejected => "validator_rejected",
            Self::TooFewStoresSelling => "too_few_stores_selling",
            Self::AdoptionBelowMinimum => "adoption_below_minimum",
            Self::SellThroughBelowMinimum => "sell_through_below_minimum",
            Self::RoiBelowMinimum => "roi_below_minimum",
            Self::MarginUpliftBelowMinimum => "margin_uplift_below_minimum",
            Self::TooFewComparables => "too_few_comparables",
        }
    }
}

#[derive(Debug, Error)]
pub enum ApplicationError {
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Configuration(#[from] ConfigError),
    #[error("input failure: {0}")]
    Input(String),
    #[error("persistence failure: {0}")]
    Persistence(String),
}

impl ApplicationError {
    pub fn error_class(&self) -> &'static str {
        match self {
            Self::Engine(EngineError::Configuration(_))
            | Self::Engine(EngineError::ValidatorUnavailable { .. })
            | Self::Configuration(_) => "config_validation",
            Self::Engine(EngineError::SuspiciousValidator { .. }) => "validator_integrity",
            Self::Engine(EngineError::InvariantViolation(_)) => "engine_invariant",
            Self::Input(_) => "input",
            Self::Persistence(_) => "persistence",
        }
    }

    pub fn exit_code(&self) -> u8 {
        match self.error_class() {
            "config_validation" => 2,
            "input" => 4,
            _ => 5,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ApplicationError, EngineError, RejectionReason, SkipReason};
    use crate::config::ConfigError;

    #[test]
    fn missing_required_validator_is_a_configuration_failure() {
        let error = ApplicationError::from(EngineError::ValidatorUnavailable {
            policy: "required".to_owned(),
        });

        assert_eq!(error.error_class(), "config_validation");
        assert_eq!(error.exit_code(), 2);
    }

    #[test]
    fn constant_validator_maps_to_integrity_class() {
        let error = ApplicationError::from(EngineError::SuspiciousValidator {
            validator: "legacy".to_owned(),
            score: 0.6,
            samples: 3,
        });

        assert_eq!(error.error_class(), "validator_integrity");
        assert_eq!(error.exit_code(), 5);
        assert!(error.to_string().contains("constant score 0.6"));
    }

    #[test]
    fn config_errors_keep_their_message() {
        let error = ApplicationError::from(ConfigError::Validation(
            "thresholds.sku.min_adoption must be in range 0..=1".to_owned(),
        ));

        assert_eq!(error.error_class(), "config_validation");
        assert!(error.to_string().contains("thresholds.sku.min_adoption"));
    }

    #[test]
    fn reason_labels_are_stable() {
        assert_eq!(SkipReason::MissingPrice.as_str(), "missing_price");
        assert_eq!(RejectionReason::TooFewComparables.as_str(), "too_few_comparables");
    }
}
