use serde::{Deserialize, Serialize};

use crate::domain::PredictionMethod;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalTier {
    HighValue,
    HighConfidence,
    MediumValue,
    MediumConfidence,
    ValueBet,
    LowConfidence,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Strength {
    High,
    Medium,
    Low,
}

impl SignalTier {
    pub const ALL: [SignalTier; 6] = [
        SignalTier::HighValue,
        SignalTier::HighConfidence,
        SignalTier::MediumValue,
        SignalTier::MediumConfidence,
        SignalTier::ValueBet,
        SignalTier::LowConfidence,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SignalTier::HighValue => "HIGH_VALUE",
            SignalTier::HighConfidence => "HIGH_CONFIDENCE",
            SignalTier::MediumValue => "MEDIUM_VALUE",
            SignalTier::MediumConfidence => "MEDIUM_CONFIDENCE",
            SignalTier::ValueBet => "VALUE_BET",
            SignalTier::LowConfidence => "LOW_CONFIDENCE",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == raw.trim())
    }

    pub fn strength(self) -> Strength {
        match self {
            SignalTier::HighValue | SignalTier::HighConfidence => Strength::High,
            SignalTier::MediumValue | SignalTier::MediumConfidence | SignalTier::ValueBet => {
                Strength::Medium
            }
            SignalTier::LowConfidence => Strength::Low,
        }
    }
}

/// First matching row wins.
pub fn classify(confidence: f64, ev: f64) -> SignalTier {
    if confidence >= 0.80 && ev > 0.20 {
        SignalTier::HighValue
    } else if confidence >= 0.75 {
        SignalTier::HighConfidence
    } else if confidence >= 0.65 && ev > 0.10 {
        SignalTier::MediumValue
    } else if confidence >= 0.60 {
        SignalTier::MediumConfidence
    } else if ev > 0.30 {
        SignalTier::ValueBet
    } else {
        SignalTier::LowConfidence
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GateConfig {
    pub min_confidence: f64,
    pub min_ev: f64,
    pub rule_based_min_confidence: f64,
    pub rule_based_min_ev: f64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.65,
            min_ev: 0.05,
            rule_based_min_confidence: 0.75,
            rule_based_min_ev: 0.10,
        }
    }
}

impl GateConfig {
    fn thresholds(&self, method: PredictionMethod) -> (f64, f64) {
        match method {
            PredictionMethod::Ensemble => (self.min_confidence, self.min_ev),
            PredictionMethod::RuleBased => (self.rule_based_min_confidence, self.rule_based_min_ev),
        }
    }

    /// `None` when both confidence and EV miss their minimum; otherwise the tier.
    pub fn evaluate(&self, confidence: f64, ev: f64, method: PredictionMethod) -> Option<SignalTier> {
        let (min_conf, min_ev) = self.thresholds(method);
        if confidence < min_conf && ev < min_ev {
            return None;
        }
        Some(classify(confidence, ev))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_table_is_order_sensitive() {
        assert_eq!(classify(0.82, 0.25), SignalTier::HighValue);
        assert_eq!(classify(0.82, 0.10), SignalTier::HighConfidence);
        assert_eq!(classify(0.70, 0.15), SignalTier::MediumValue);
        assert_eq!(classify(0.70, 0.00), SignalTier::MediumConfidence);
        assert_eq!(classify(0.50, 0.35), SignalTier::ValueBet);
        assert_eq!(classify(0.50, 0.02), SignalTier::LowConfidence);
    }

    #[test]
    fn rejection_needs_both_minimums_to_fail() {
        let gate = GateConfig::default();
        assert_eq!(gate.evaluate(0.50, 0.02, PredictionMethod::Ensemble), None);
        assert_eq!(
            gate.evaluate(0.50, 0.06, PredictionMethod::Ensemble),
            Some(SignalTier::LowConfidence)
        );
        assert_eq!(
            gate.evaluate(0.70, 0.00, PredictionMethod::Ensemble),
            Some(SignalTier::MediumConfidence)
        );
    }

    #[test]
    fn rule_based_faces_stricter_bar() {
        let gate = GateConfig::default();
        assert!(gate.evaluate(0.70, 0.07, PredictionMethod::Ensemble).is_some());
        assert!(gate.evaluate(0.70, 0.07, PredictionMethod::RuleBased).is_none());
        assert!(gate.evaluate(0.70, 0.12, PredictionMethod::RuleBased).is_some());
    }

    #[test]
    fn strength_groups_tiers() {
        assert_eq!(SignalTier::HighConfidence.strength(), Strength::High);
        assert_eq!(SignalTier::ValueBet.strength(), Strength::Medium);
        assert_eq!(SignalTier::LowConfidence.strength(), Strength::Low);
        assert_eq!(SignalTier::parse("VALUE_BET"), Some(SignalTier::ValueBet));
    }
}
