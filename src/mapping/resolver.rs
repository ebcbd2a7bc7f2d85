//! Greedy constraint resolution of opcode profiles against canonical signatures.
//!
//! Each round assigns the single most confident unambiguous pairing, then rescores what is
//! left against the signatures still available. An assignment needs a score of at least
//! the confidence threshold and a lead of at least the tie margin over the runner-up.
//! Unique signatures are claimed by the first opcode assigned to them. When two opcodes
//! want the same unique signature with scores inside the tie margin, neither gets it and
//! both are reported as a conflict.
//!
//! Every decision depends only on scores, opcode ids and table order, so the result is
//! identical for identical profiles no matter how they were accumulated.

use std::collections::{BTreeMap, BTreeSet};

use crate::mapping::{
    Candidate, CompatibilityScorer, MappingConfig, OpcodeMapping, ProfileFeatures, ProfileSet,
    Resolution, SignatureTable, UnresolvedReason,
};

#[derive(Debug, Clone, Copy)]
struct Scored {
    signature: usize,
    score: f64,
}

/// Resolves a [`ProfileSet`] into an [`OpcodeMapping`].
pub struct Resolver<'a> {
    signatures: &'a SignatureTable,
    scorer: &'a dyn CompatibilityScorer,
    config: &'a MappingConfig,
}

impl<'a> Resolver<'a> {
    /// Create a resolver.
    #[must_use]
    pub fn new(
        signatures: &'a SignatureTable,
        scorer: &'a dyn CompatibilityScorer,
        config: &'a MappingConfig,
    ) -> Self {
        Resolver {
            signatures,
            scorer,
            config,
        }
    }

    /// Resolve every observed opcode plus every opcode in `known`.
    ///
    /// Opcodes in `known` that were never observed end up as
    /// [`UnresolvedReason::NoEvidence`].
    #[must_use]
    pub fn resolve(&self, profiles: &ProfileSet, known: &BTreeSet<u8>) -> OpcodeMapping {
        let opcodes: BTreeSet<u8> = profiles.opcodes().chain(known.iter().copied()).collect();

        let mut entries = BTreeMap::new();
        let mut pending: BTreeMap<u8, Vec<Scored>> = BTreeMap::new();

        for opcode in opcodes {
            let occurrences = profiles.get(opcode).map_or(0, |profile| profile.occurrences);
            match profiles.get(opcode) {
                Some(profile) if occurrences > 0 && occurrences >= self.config.min_occurrences => {
                    let features = ProfileFeatures::new(profile, profiles);
                    pending.insert(opcode, self.rank(&features));
                }
                _ => {
                    entries.insert(
                        opcode,
                        Resolution::Unresolved(UnresolvedReason::NoEvidence { occurrences }),
                    );
                }
            }
        }

        let mut taken = vec![false; self.signatures.len()];
        while !pending.is_empty() {
            let mut chosen: Option<(u8, Scored)> = None;
            let mut finished = Vec::new();

            for (&opcode, ranked) in &pending {
                let mut available = self.available(ranked, &taken);
                let Some(best) = available.next() else {
                    finished.push((opcode, UnresolvedReason::LowConfidence { best: None }));
                    continue;
                };
                if best.score < self.config.confidence_threshold {
                    finished.push((
                        opcode,
                        UnresolvedReason::LowConfidence {
                            best: Some(self.candidate(best)),
                        },
                    ));
                    continue;
                }
                if available
                    .next()
                    .is_some_and(|runner_up| best.score - runner_up.score < self.config.tie_margin)
                {
                    continue;
                }
                if chosen.map_or(true, |(_, current)| best.score > current.score) {
                    chosen = Some((opcode, best));
                }
            }

            for (opcode, reason) in finished {
                pending.remove(&opcode);
                entries.insert(opcode, Resolution::Unresolved(reason));
            }

            let Some((opcode, best)) = chosen else {
                break;
            };
            let signature = &self.signatures.signatures()[best.signature];

            if signature.unique {
                let mut rivals: Vec<u8> = pending
                    .iter()
                    .filter(|(&other, _)| other != opcode)
                    .filter(|(_, ranked)| {
                        self.available(ranked, &taken).next().is_some_and(|other_best| {
                            other_best.signature == best.signature
                                && best.score - other_best.score < self.config.tie_margin
                        })
                    })
                    .map(|(&other, _)| other)
                    .collect();

                taken[best.signature] = true;
                if !rivals.is_empty() {
                    rivals.push(opcode);
                    rivals.sort_unstable();
                    log::debug!(
                        "{} contested by {} opcodes, leaving all unresolved",
                        signature.mnemonic,
                        rivals.len()
                    );
                    for &rival in &rivals {
                        pending.remove(&rival);
                        entries.insert(
                            rival,
                            Resolution::Unresolved(UnresolvedReason::Conflict {
                                mnemonic: signature.mnemonic,
                                opcodes: rivals.clone(),
                            }),
                        );
                    }
                    continue;
                }
            }

            pending.remove(&opcode);
            entries.insert(opcode, Resolution::Resolved(self.candidate(best)));
        }

        for (opcode, ranked) in pending {
            let mut available = self.available(&ranked, &taken).peekable();
            let top = available.peek().map_or(0.0, |best| best.score);
            let candidates = available
                .take_while(|scored| top - scored.score < self.config.tie_margin)
                .map(|scored| self.candidate(scored))
                .collect();
            entries.insert(
                opcode,
                Resolution::Unresolved(UnresolvedReason::Ambiguous { candidates }),
            );
        }

        OpcodeMapping::new(self.signatures.version(), entries)
    }

    /// All signatures scored against `features`, best first, ties in table order.
    fn rank(&self, features: &ProfileFeatures) -> Vec<Scored> {
        let mut ranked: Vec<Scored> = self
            .signatures
            .signatures()
            .iter()
            .enumerate()
            .map(|(signature, canonical)| {
                let score = self.scorer.score(features, canonical);
                Scored {
                    signature,
                    score: if score.is_nan() {
                        0.0
                    } else {
                        score.clamp(0.0, 1.0)
                    },
                }
            })
            .collect();

        ranked.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then(a.signature.cmp(&b.signature))
        });
        ranked
    }

    fn available<'r>(
        &'r self,
        ranked: &'r [Scored],
        taken: &'r [bool],
    ) -> impl Iterator<Item = Scored> + 'r {
        ranked.iter().copied().filter(move |scored| {
            !taken[scored.signature] || !self.signatures.signatures()[scored.signature].unique
        })
    }

    fn candidate(&self, scored: Scored) -> Candidate {
        Candidate {
            mnemonic: self.signatures.signatures()[scored.signature].mnemonic,
            score: scored.score,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::{CanonicalSignature, OpcodeProfile};

    /// Scores from a fixed table, zero for everything else.
    struct FixedScorer(BTreeMap<(u8, &'static str), f64>);

    impl FixedScorer {
        fn new(scores: &[(u8, &'static str, f64)]) -> Self {
            FixedScorer(
                scores
                    .iter()
                    .map(|&(opcode, mnemonic, score)| ((opcode, mnemonic), score))
                    .collect(),
            )
        }
    }

    impl CompatibilityScorer for FixedScorer {
        fn score(&self, features: &ProfileFeatures, signature: &CanonicalSignature) -> f64 {
            self.0
                .get(&(features.opcode, signature.mnemonic))
                .copied()
                .unwrap_or(0.0)
        }
    }

    fn profiles(opcodes: &[(u8, u64)]) -> ProfileSet {
        opcodes
            .iter()
            .map(|&(opcode, occurrences)| OpcodeProfile {
                occurrences,
                methods: 1,
                ..OpcodeProfile::new(opcode)
            })
            .collect()
    }

    fn resolve(
        set: &ProfileSet,
        scores: &[(u8, &'static str, f64)],
        known: &[u8],
        config: &MappingConfig,
    ) -> OpcodeMapping {
        let table = SignatureTable::cil();
        let scorer = FixedScorer::new(scores);
        Resolver::new(&table, &scorer, config).resolve(set, &known.iter().copied().collect())
    }

    #[test]
    fn assigns_best_candidates() {
        let set = profiles(&[(0x07, 5), (0x2A, 5)]);
        let mapping = resolve(
            &set,
            &[
                (0x07, "br", 1.0),
                (0x07, "leave", 0.85),
                (0x2A, "ret", 0.95),
                (0x2A, "throw", 0.5),
            ],
            &[],
            &MappingConfig::default(),
        );

        assert_eq!(mapping.mnemonic(0x07), Some("br"));
        assert_eq!(mapping.mnemonic(0x2A), Some("ret"));
        assert_eq!(mapping.resolved_count(), 2);
        assert_eq!(mapping.signature_version(), 1);
    }

    #[test]
    fn claimed_signature_moves_runner_up() {
        // 0x07 claims br first, 0x09 falls back to leave.
        let set = profiles(&[(0x07, 5), (0x09, 5)]);
        let mapping = resolve(
            &set,
            &[
                (0x07, "br", 1.0),
                (0x09, "br", 0.9),
                (0x09, "leave", 0.85),
            ],
            &[],
            &MappingConfig::default(),
        );

        assert_eq!(mapping.mnemonic(0x07), Some("br"));
        assert_eq!(mapping.mnemonic(0x09), Some("leave"));
        assert!(mapping
            .injectivity_violations(&SignatureTable::cil())
            .is_empty());
    }

    #[test]
    fn tied_rivals_conflict() {
        let set = profiles(&[(0x07, 5), (0x09, 5)]);
        let mapping = resolve(
            &set,
            &[(0x07, "br", 0.95), (0x09, "br", 0.94)],
            &[],
            &MappingConfig::default(),
        );

        let expected = Resolution::Unresolved(UnresolvedReason::Conflict {
            mnemonic: "br",
            opcodes: vec![0x07, 0x09],
        });
        assert_eq!(mapping.get(0x07), Some(&expected));
        assert_eq!(mapping.get(0x09), Some(&expected));
        assert_eq!(mapping.opcodes_for("br"), Vec::<u8>::new());
    }

    #[test]
    fn close_candidates_are_ambiguous() {
        let set = profiles(&[(0x10, 5)]);
        let mapping = resolve(
            &set,
            &[(0x10, "add", 0.91), (0x10, "sub", 0.90), (0x10, "mul", 0.5)],
            &[],
            &MappingConfig::default(),
        );

        match mapping.get(0x10) {
            Some(Resolution::Unresolved(UnresolvedReason::Ambiguous { candidates })) => {
                let names: Vec<_> = candidates.iter().map(|c| c.mnemonic).collect();
                assert_eq!(names, vec!["add", "sub"]);
            }
            other => panic!("expected ambiguity, got {other:?}"),
        }
    }

    #[test]
    fn weak_scores_are_low_confidence() {
        let set = profiles(&[(0x10, 5)]);
        let mapping = resolve(
            &set,
            &[(0x10, "add", 0.7)],
            &[],
            &MappingConfig::default(),
        );
        assert_eq!(
            mapping.get(0x10),
            Some(&Resolution::Unresolved(UnresolvedReason::LowConfidence {
                best: Some(Candidate {
                    mnemonic: "add",
                    score: 0.7
                })
            }))
        );

        let lenient = resolve(&set, &[(0x10, "add", 0.7)], &[], &MappingConfig::lenient());
        assert_eq!(lenient.mnemonic(0x10), Some("add"));
    }

    #[test]
    fn unseen_and_rare_opcodes_have_no_evidence() {
        let set = profiles(&[(0x10, 2)]);
        let mapping = resolve(
            &set,
            &[(0x10, "add", 1.0)],
            &[0x20],
            &MappingConfig::strict(),
        );

        assert_eq!(mapping.len(), 2);
        assert_eq!(
            mapping.get(0x10),
            Some(&Resolution::Unresolved(UnresolvedReason::NoEvidence {
                occurrences: 2
            }))
        );
        assert_eq!(
            mapping.get(0x20),
            Some(&Resolution::Unresolved(UnresolvedReason::NoEvidence {
                occurrences: 0
            }))
        );
    }

    #[test]
    fn shared_signatures_accept_many_opcodes() {
        let set = profiles(&[(0x01, 5), (0x02, 5)]);
        let mapping = resolve(
            &set,
            &[(0x01, "nop", 1.0), (0x02, "nop", 1.0)],
            &[],
            &MappingConfig::default(),
        );
        assert_eq!(mapping.opcodes_for("nop"), vec![0x01, 0x02]);
    }

    #[test]
    fn equal_scores_break_by_opcode() {
        // Both pick their own signature; the lower opcode is assigned first.
        let set = profiles(&[(0x30, 5), (0x31, 5)]);
        let scores = [(0x30, "add", 0.9), (0x31, "sub", 0.9)];
        let first = resolve(&set, &scores, &[], &MappingConfig::default());
        let second = resolve(&set, &scores, &[], &MappingConfig::default());

        assert_eq!(first, second);
        assert_eq!(first.mnemonic(0x30), Some("add"));
        assert_eq!(first.mnemonic(0x31), Some("sub"));
    }
}
