//! Configuration for the opcode mapper.

use crate::mapping::ScoringWeights;

/// Thresholds and weights used when resolving opcode profiles.
#[derive(Debug, Clone, PartialEq)]
pub struct MappingConfig {
    /// Minimum score for an assignment (default: 0.8).
    pub confidence_threshold: f64,

    /// Scores closer than this are treated as a tie (default: 0.02).
    pub tie_margin: f64,

    /// Opcodes seen fewer times are reported without evidence (default: 1).
    pub min_occurrences: u64,

    /// Weights of the structural scoring terms.
    pub weights: ScoringWeights,
}

impl Default for MappingConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.8,
            tie_margin: 0.02,
            min_occurrences: 1,
            weights: ScoringWeights::default(),
        }
    }
}

impl MappingConfig {
    /// Creates a new configuration with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a "strict" configuration that only accepts well supported assignments.
    ///
    /// This configuration uses:
    /// - A 0.9 confidence threshold
    /// - A wider 0.05 tie margin
    /// - At least 3 occurrences per opcode
    #[must_use]
    pub fn strict() -> Self {
        Self {
            confidence_threshold: 0.9,
            tie_margin: 0.05,
            min_occurrences: 3,
            ..Self::default()
        }
    }

    /// Creates a "lenient" configuration that resolves more opcodes on weaker evidence.
    #[must_use]
    pub fn lenient() -> Self {
        Self {
            confidence_threshold: 0.6,
            tie_margin: 0.01,
            ..Self::default()
        }
    }

    /// Sets the confidence threshold.
    #[must_use]
    pub fn with_confidence_threshold(mut self, threshold: f64) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    /// Sets the tie margin.
    #[must_use]
    pub fn with_tie_margin(mut self, margin: f64) -> Self {
        self.tie_margin = margin;
        self
    }

    /// Sets the minimum number of occurrences.
    #[must_use]
    pub fn with_min_occurrences(mut self, min: u64) -> Self {
        self.min_occurrences = min;
        self
    }

    /// Sets the scoring weights.
    #[must_use]
    pub fn with_weights(mut self, weights: ScoringWeights) -> Self {
        self.weights = weights;
        self
    }
}
