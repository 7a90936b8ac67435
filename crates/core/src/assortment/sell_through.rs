//! Sell-through prediction and the approval gate

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use tracing::{info, warn};

use crate::assortment::{CONSTANT_VALIDATOR_MIN_SAMPLES, DEFAULT_BLEND_WEIGHTS};
use crate::config::{SellThroughConfig, ValidatorPolicy};
use crate::domain::opportunity::{Opportunity, SellThroughDecision};
use crate::domain::sales::{FeatureId, SellThroughSignal};
use crate::domain::store::StoreId;
use crate::errors::{EngineError, RejectionReason};

/// Optional richer signals keyed by (store, feature).
pub type SignalIndex = BTreeMap<(StoreId, FeatureId), SellThroughSignal>;

pub fn index_signals(signals: &[SellThroughSignal]) -> SignalIndex {
    signals
        .iter()
        .map(|signal| ((signal.store_id.clone(), signal.feature_id.clone()), signal.clone()))
        .collect()
}

/// Base weights of the blended estimate. Non-adoption weights shrink with
/// the comparable-store count; the adoption estimate absorbs the rest.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlendWeights {
    pub adoption: f64,
    pub cluster_p50: f64,
    pub store_baseline: f64,
    pub seasonal: f64,
}

impl Default for BlendWeights {
    fn default() -> Self {
        DEFAULT_BLEND_WEIGHTS
    }
}

/// Closed-form sell-through predictor. Not trained.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SellThroughModel {
    lower_bound: f64,
    upper_bound: f64,
    steepness: f64,
    full_confidence_comparables: usize,
    weights: BlendWeights,
}

impl SellThroughModel {
    pub fn new(config: &SellThroughConfig) -> Self {
        Self {
            lower_bound: config.lower_bound,
            upper_bound: config.upper_bound,
            steepness: config.steepness,
            full_confidence_comparables: config.full_confidence_comparables.max(1),
            weights: BlendWeights::default(),
        }
    }

    pub fn with_weights(mut self, weights: BlendWeights) -> Self {
        self.weights = weights;
        self
    }

    /// Bounded logistic transform of adoption, rescaled so adoption 0 and 1
    /// land exactly on the bounds and 0.5 on their midpoint.
    pub fn adoption_estimate(&self, adoption_rate: f64) -> f64 {
        let adoption = if adoption_rate.is_finite() { adoption_rate.clamp(0.0, 1.0) } else { 0.0 };
        let half = self.steepness / 2.0;
        let floor = sigmoid(-half);
        let span = sigmoid(half) - floor;
        let normalised = (sigmoid(self.steepness * (adoption - 0.5)) - floor) / span;

        self.lower_bound + (self.upper_bound - self.lower_bound) * normalised.clamp(0.0, 1.0)
    }

    /// Weighted blend of the adoption estimate with whatever signals exist.
    /// With no signal this is exactly the adoption estimate.
    pub fn blended_estimate(
        &self,
        adoption_rate: f64,
        signal: Option<&SellThroughSignal>,
        comparables: usize,
    ) -> f64 {
        let base = self.adoption_estimate(adoption_rate);
        let Some(signal) = signal else {
            return base;
        };

        let confidence =
            (comparables as f64 / self.full_confidence_comparables as f64).min(1.0);
        let parts = [
            (usable_rate(signal.cluster_p50), self.weights.cluster_p50),
            (usable_rate(signal.store_baseline), self.weights.store_baseline),
            (usable_rate(signal.seasonal_adjustment), self.weights.seasonal),
        ];

        let mut blended = 0.0;
        let mut used_weight = 0.0;
        for (value, weight) in parts {
            if let Some(value) = value {
                let scaled = weight * confidence;
                blended += value * scaled;
                used_weight += scaled;
            }
        }
        blended += base * (1.0 - used_weight).max(0.0);

        blended.clamp(self.lower_bound, self.upper_bound)
    }
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

fn usable_rate(value: Option<f64>) -> Option<f64> {
    value.filter(|rate| rate.is_finite() && (0.0..=1.0).contains(rate))
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValidatorVerdict {
    pub approved: bool,
    pub score: f64,
}

/// Domain validator consulted as the first approval gate.
pub trait ExternalValidator: Send + Sync {
    fn name(&self) -> &str;

    fn predict(&self, opportunity: &Opportunity) -> ValidatorVerdict;
}

#[derive(Clone)]
pub struct SellThroughValidator {
    config: SellThroughConfig,
    model: SellThroughModel,
    validator: Option<Arc<dyn ExternalValidator>>,
}

impl fmt::Debug for SellThroughValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SellThroughValidator")
            .field("config", &self.config)
            .field("model", &self.model)
            .field("validator", &self.validator.as_ref().map(|validator| validator.name().to_owned()))
            .finish()
    }
}

impl SellThroughValidator {
    /// Fails when the policy and the supplied validator disagree: a required
    /// validator must be present, a disabled one must not be.
    pub fn new(
        config: SellThroughConfig,
        validator: Option<Arc<dyn ExternalValidator>>,
    ) -> Result<Self, EngineError> {
        match (config.validator, &validator) {
            (ValidatorPolicy::Required, None) => {
                return Err(EngineError::ValidatorUnavailable {
                    policy: config.validator.as_str().to_owned(),
                });
            }
            (ValidatorPolicy::Disabled, Some(supplied)) => {
                return Err(EngineError::Configuration(format!(
                    "external validator `{}` supplied while sell_through.validator is disabled",
                    supplied.name()
                )));
            }
            _ => {}
        }

        Ok(Self { model: SellThroughModel::new(&config), config, validator })
    }

    pub fn model(&self) -> &SellThroughModel {
        &self.model
    }

    /// Four-gate AND. The first failing gate names the rejection.
    pub fn validate(
        &self,
        opportunity: &Opportunity,
        signal: Option<&SellThroughSignal>,
    ) -> SellThroughDecision {
        let predicted = self.model.blended_estimate(
            opportunity.adoption_rate,
            signal,
            opportunity.stores_selling,
        );
        let baseline = signal.and_then(|signal| usable_rate(signal.store_baseline)).unwrap_or(0.0);
        let verdict = self.validator.as_ref().map(|validator| validator.predict(opportunity));

        let rejection = if verdict.is_some_and(|verdict| !verdict.approved) {
            Some(RejectionReason::ValidatorRejected)
        } else if opportunity.stores_selling < self.config.min_stores_selling {
            Some(RejectionReason::TooFewStoresSelling)
        } else if opportunity.adoption_rate < self.config.min_adoption {
            Some(RejectionReason::AdoptionBelowMinimum)
        } else if predicted < self.config.min_predicted_sell_through {
            Some(RejectionReason::SellThroughBelowMinimum)
        } else {
            None
        };

        SellThroughDecision {
            predicted_sell_through: predicted,
            sell_through_improvement: predicted - baseline,
            validator_score: verdict.map(|verdict| verdict.score),
            approved: rejection.is_none(),
            rejection,
        }
    }

    /// Validates every opportunity in place, then checks the external
    /// validator for constant output across varied inputs.
    pub fn validate_all(
        &self,
        opportunities: &mut [Opportunity],
        signals: &SignalIndex,
    ) -> Result<(), EngineError> {
        for opportunity in opportunities.iter_mut() {
            let key = (opportunity.store_id.clone(), opportunity.feature_id.clone());
            let decision = self.validate(opportunity, signals.get(&key));
            opportunity.record_sell_through(decision);
        }

        if let Some(validator) = &self.validator {
            detect_constant_validator(validator.name(), opportunities)?;
        }

        let approved = opportunities.iter().filter(|opportunity| opportunity.approved).count();
        info!(
            event_name = "engine.sell_through.validated",
            validated = opportunities.len(),
            approved,
            rejected = opportunities.len() - approved,
            validator = self.validator.as_ref().map_or("none", |validator| validator.name()),
            "sell-through gate applied"
        );

        Ok(())
    }
}

/// A validator that returns one score for every opportunity while adoption
/// rates differ is not predicting anything.
fn detect_constant_validator(name: &str, opportunities: &[Opportunity]) -> Result<(), EngineError> {
    let samples: Vec<(f64, f64)> = opportunities
        .iter()
        .filter_map(|opportunity| {
            opportunity.validator_score.map(|score| (opportunity.adoption_rate, score))
        })
        .collect();
    if samples.len() < CONSTANT_VALIDATOR_MIN_SAMPLES {
        return Ok(());
    }

    let (first_adoption, first_score) = samples[0];
    let varied_inputs = samples.iter().any(|(adoption, _)| (adoption - first_adoption).abs() > 1e-12);
    let constant_output = samples.iter().all(|(_, score)| score.to_bits() == first_score.to_bits());

    if varied_inputs && constant_output {
        warn!(
            event_name = "engine.sell_through.constant_validator",
            validator = name,
            score = first_score,
            samples = samples.len(),
            "external validator returned a constant score"
        );
        return Err(EngineError::SuspiciousValidator {
            validator: name.to_owned(),
            score: first_score,
            samples: samples.len(),
        });
    }

    Ok(())
}
