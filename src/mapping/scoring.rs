//! Compatibility scoring between observed opcode profiles and canonical signatures.
//!
//! Scoring is pluggable through [`CompatibilityScorer`], because the weight of each kind of
//! evidence differs between obfuscator builds. The default [`StructuralScorer`] combines
//! four terms, each in `[0, 1]`:
//!
//! | Term   | Evidence                                                              |
//! |--------|-----------------------------------------------------------------------|
//! | shape  | share of occurrences whose operand shape matches the signature        |
//! | flow   | whether the opcode falls through like the signature does             |
//! | region | the signature's [`RegionRequirement`], or no region exits for unconstrained branches |
//! | stack  | no pops at empty-stack points, no conditional branch fed by an opcode that pushes nothing |
//!
//! Terms that do not apply to a signature are left out and the remaining weights are
//! renormalized.

use std::collections::BTreeMap;

use crate::{
    disassembler::OperandShape,
    mapping::{
        profile::{ratio, OpcodeProfile, ProfileSet},
        CanonicalSignature, RegionRequirement,
    },
};

/// Relative weights of the structural terms.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoringWeights {
    /// Operand shape agreement
    pub shape: f64,
    /// Fallthrough agreement
    pub flow: f64,
    /// Region agreement
    pub region: f64,
    /// Stack effect agreement
    pub stack: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        ScoringWeights {
            shape: 0.40,
            flow: 0.30,
            region: 0.15,
            stack: 0.15,
        }
    }
}

/// Normalized features of one opcode, derived from its profile and its neighbours'.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileFeatures {
    /// The opcode id
    pub opcode: u8,
    /// Number of occurrences
    pub occurrences: u64,
    /// Share of occurrences per operand shape
    pub shapes: BTreeMap<OperandShape, f64>,
    /// Share of occurrences without a regular successor
    pub no_fallthrough: f64,
    /// Share of occurrences leaving a region
    pub exits_region: f64,
    /// Share of occurrences inside a handler
    pub in_handler: f64,
    /// Share of occurrences at empty-stack points
    pub empty_stack: f64,
    /// Share of successors that behave like conditional branches
    pub conditional_successors: f64,
}

impl ProfileFeatures {
    /// Derive the features of `profile` within `set`.
    #[must_use]
    pub fn new(profile: &OpcodeProfile, set: &ProfileSet) -> Self {
        let shapes = profile
            .shapes
            .iter()
            .map(|(&shape, &count)| (shape, ratio(count, profile.occurrences)))
            .collect();

        let total_successors: u64 = profile.successors.values().sum();
        let conditional: u64 = profile
            .successors
            .iter()
            .filter(|(&opcode, _)| set.is_conditional_branch_like(opcode))
            .map(|(_, &count)| count)
            .sum();

        ProfileFeatures {
            opcode: profile.opcode,
            occurrences: profile.occurrences,
            shapes,
            no_fallthrough: profile.no_fallthrough_ratio(),
            exits_region: ratio(profile.exits_region, profile.occurrences),
            in_handler: ratio(profile.in_handler, profile.occurrences),
            empty_stack: ratio(profile.empty_stack, profile.occurrences),
            conditional_successors: ratio(conditional, total_successors),
        }
    }

    /// Share of occurrences decoded with `shape`.
    #[must_use]
    pub fn shape_ratio(&self, shape: OperandShape) -> f64 {
        self.shapes.get(&shape).copied().unwrap_or(0.0)
    }
}

/// Scores how well an opcode's observed behaviour matches a canonical signature.
///
/// Implementations must be deterministic: the same features and signature always give the
/// same score, in `[0, 1]`.
pub trait CompatibilityScorer: Send + Sync {
    /// Score `features` against `signature`.
    fn score(&self, features: &ProfileFeatures, signature: &CanonicalSignature) -> f64;
}

/// Weighted combination of structural agreement terms.
#[derive(Debug, Clone, Default)]
pub struct StructuralScorer {
    weights: ScoringWeights,
}

impl StructuralScorer {
    /// Create a scorer with explicit weights.
    #[must_use]
    pub fn new(weights: ScoringWeights) -> Self {
        StructuralScorer { weights }
    }

    /// The configured weights.
    #[must_use]
    pub fn weights(&self) -> &ScoringWeights {
        &self.weights
    }

    fn flow_term(features: &ProfileFeatures, signature: &CanonicalSignature) -> f64 {
        if signature.flow.falls_through() {
            1.0 - features.no_fallthrough
        } else {
            features.no_fallthrough
        }
    }

    fn region_term(features: &ProfileFeatures, signature: &CanonicalSignature) -> Option<f64> {
        match signature.region {
            RegionRequirement::ExitsProtectedRegion => Some(features.exits_region),
            RegionRequirement::InsideHandler => Some(features.in_handler),
            RegionRequirement::None if signature.shape.is_branch() => {
                Some(1.0 - features.exits_region)
            }
            RegionRequirement::None => None,
        }
    }

    fn stack_term(features: &ProfileFeatures, signature: &CanonicalSignature) -> Option<f64> {
        let stack = signature.stack?;

        let mut parts = Vec::with_capacity(2);
        if stack.pops > 0 {
            parts.push(1.0 - features.empty_stack);
        }
        if stack.pushes == 0 {
            parts.push(1.0 - features.conditional_successors);
        }

        if parts.is_empty() {
            None
        } else {
            Some(parts.iter().sum::<f64>() / parts.len() as f64)
        }
    }
}

impl CompatibilityScorer for StructuralScorer {
    fn score(&self, features: &ProfileFeatures, signature: &CanonicalSignature) -> f64 {
        let terms = [
            (self.weights.shape, Some(features.shape_ratio(signature.shape))),
            (self.weights.flow, Some(Self::flow_term(features, signature))),
            (self.weights.region, Self::region_term(features, signature)),
            (self.weights.stack, Self::stack_term(features, signature)),
        ];

        let (weighted, total) = terms
            .iter()
            .filter_map(|&(weight, term)| term.map(|value| (weight * value, weight)))
            .fold((0.0, 0.0), |(sum, total), (value, weight)| {
                (sum + value, total + weight)
            });

        if total <= 0.0 {
            0.0
        } else {
            (weighted / total).clamp(0.0, 1.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::{FlowType, SignatureTable, StackBehavior};

    fn features(shape: OperandShape, no_fallthrough: f64, exits_region: f64) -> ProfileFeatures {
        ProfileFeatures {
            opcode: 0x07,
            occurrences: 10,
            shapes: [(shape, 1.0)].into_iter().collect(),
            no_fallthrough,
            exits_region,
            in_handler: 0.0,
            empty_stack: 0.0,
            conditional_successors: 0.0,
        }
    }

    #[test]
    fn unconditional_jump_prefers_br() {
        let table = SignatureTable::cil();
        let scorer = StructuralScorer::default();
        let jump = features(OperandShape::Branch, 1.0, 0.0);

        let br = scorer.score(&jump, table.get("br").unwrap());
        let brtrue = scorer.score(&jump, table.get("brtrue").unwrap());
        let leave = scorer.score(&jump, table.get("leave").unwrap());
        let ret = scorer.score(&jump, table.get("ret").unwrap());

        assert!((br - 1.0).abs() < 1e-9);
        assert!((brtrue - 0.70).abs() < 1e-9);
        assert!((leave - 0.85).abs() < 1e-9);
        assert!(ret < 0.5);
    }

    #[test]
    fn region_exit_prefers_leave() {
        let table = SignatureTable::cil();
        let scorer = StructuralScorer::default();
        let exit = features(OperandShape::Branch, 1.0, 1.0);

        let br = scorer.score(&exit, table.get("br").unwrap());
        let leave = scorer.score(&exit, table.get("leave").unwrap());
        assert!(leave > br);
        assert!((leave - 1.0).abs() < 1e-9);
    }

    #[test]
    fn region_requirement_of_custom_table() {
        let exit_jump = CanonicalSignature {
            mnemonic: "jmp.out",
            shape: OperandShape::Branch,
            flow: FlowType::UnconditionalBranch,
            stack: Some(StackBehavior::new(0, 0)),
            region: RegionRequirement::ExitsProtectedRegion,
            unique: true,
        };
        let handler_op = CanonicalSignature {
            mnemonic: "rethrow.h",
            shape: OperandShape::None,
            flow: FlowType::Sequential,
            stack: None,
            region: RegionRequirement::InsideHandler,
            unique: true,
        };
        let table = SignatureTable::new(2, vec![exit_jump, handler_op]);
        let scorer = StructuralScorer::default();

        let exits = features(OperandShape::Branch, 1.0, 1.0);
        let stays = features(OperandShape::Branch, 1.0, 0.0);
        let jump = table.get("jmp.out").unwrap();
        assert!((scorer.score(&exits, jump) - 1.0).abs() < 1e-9);
        assert!((scorer.score(&stays, jump) - 0.85).abs() < 1e-9);

        let mut inside = features(OperandShape::None, 0.0, 0.0);
        inside.in_handler = 1.0;
        let outside = features(OperandShape::None, 0.0, 0.0);
        let handler = table.get("rethrow.h").unwrap();
        assert!((scorer.score(&inside, handler) - 1.0).abs() < 1e-9);
        assert!(scorer.score(&outside, handler) < scorer.score(&inside, handler));
    }

    #[test]
    fn scores_are_bounded() {
        let table = SignatureTable::cil();
        let scorer = StructuralScorer::new(ScoringWeights {
            shape: 1.0,
            flow: 0.0,
            region: 0.0,
            stack: 0.0,
        });
        let observed = features(OperandShape::Token, 0.3, 0.0);
        for signature in table.signatures() {
            let score = scorer.score(&observed, signature);
            assert!((0.0..=1.0).contains(&score), "{} -> {}", signature, score);
        }
        assert!((scorer.score(&observed, table.get("ldstr").unwrap()) - 1.0).abs() < 1e-9);
    }
}
