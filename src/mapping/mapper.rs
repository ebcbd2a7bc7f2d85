use std::{collections::BTreeSet, sync::Arc};

use rayon::prelude::*;

use crate::{
    disassembler::DisassembledMethod,
    mapping::{
        CompatibilityScorer, MappingConfig, OpcodeMapping, ProfileSet, Resolver, SignatureTable,
        StructuralScorer,
    },
    progress::{ProgressEvent, ProgressObserver},
};

/// Recovers the meaning of virtual opcode ids from disassembled methods.
///
/// Mapping runs in two phases. [`OpcodeMapper::profile`] folds every method into per-opcode
/// evidence in parallel and merges the partial results; the merge is a plain sum, so the
/// profiles do not depend on how methods were split across threads. [`OpcodeMapper::resolve`]
/// then assigns canonical instructions on a single thread.
///
/// # Examples
///
/// ```rust
/// use vmscope::mapping::{MappingConfig, OpcodeMapper, SignatureTable};
/// use vmscope::progress::NullProgress;
///
/// let mapper = OpcodeMapper::new(SignatureTable::cil(), MappingConfig::default())
///     .with_expected_opcodes([0x2A]);
/// let mapping = mapper.map_opcodes(&[], &NullProgress);
/// assert_eq!(mapping.len(), 1);
/// assert_eq!(mapping.resolved_count(), 0);
/// ```
pub struct OpcodeMapper {
    signatures: SignatureTable,
    config: MappingConfig,
    scorer: Box<dyn CompatibilityScorer>,
    expected: BTreeSet<u8>,
}

impl OpcodeMapper {
    /// Create a mapper with the default structural scorer, weighted per `config`.
    #[must_use]
    pub fn new(signatures: SignatureTable, config: MappingConfig) -> Self {
        let scorer = Box::new(StructuralScorer::new(config.weights));
        OpcodeMapper {
            signatures,
            config,
            scorer,
            expected: BTreeSet::new(),
        }
    }

    /// Replace the scorer.
    #[must_use]
    pub fn with_scorer(mut self, scorer: Box<dyn CompatibilityScorer>) -> Self {
        self.scorer = scorer;
        self
    }

    /// Opcodes that must appear in the mapping even when never observed, typically the ones
    /// declared in the operand shape table.
    #[must_use]
    pub fn with_expected_opcodes(mut self, opcodes: impl IntoIterator<Item = u8>) -> Self {
        self.expected.extend(opcodes);
        self
    }

    /// The signature table.
    #[must_use]
    pub fn signatures(&self) -> &SignatureTable {
        &self.signatures
    }

    /// The configuration.
    #[must_use]
    pub fn config(&self) -> &MappingConfig {
        &self.config
    }

    /// Accumulate the profiles of `methods`.
    ///
    /// Profiling runs in parallel; the `MethodProfiled` events follow afterwards, in the
    /// order of `methods`.
    pub fn profile(
        &self,
        methods: &[Arc<DisassembledMethod>],
        observer: &dyn ProgressObserver,
    ) -> ProfileSet {
        let set = methods
            .par_iter()
            .fold(ProfileSet::new, |mut set, method| {
                set.accumulate(method);
                set
            })
            .reduce(ProfileSet::new, ProfileSet::merge);

        for method in methods {
            observer.on_event(&ProgressEvent::MethodProfiled {
                key: method.key(),
                instructions: method.len(),
            });
        }
        set
    }

    /// Resolve accumulated profiles into a mapping.
    #[must_use]
    pub fn resolve(&self, profiles: &ProfileSet) -> OpcodeMapping {
        Resolver::new(&self.signatures, self.scorer.as_ref(), &self.config)
            .resolve(profiles, &self.expected)
    }

    /// Profile `methods`, resolve, and report the outcome.
    pub fn map_opcodes(
        &self,
        methods: &[Arc<DisassembledMethod>],
        observer: &dyn ProgressObserver,
    ) -> OpcodeMapping {
        let profiles = self.profile(methods, observer);
        let mapping = self.resolve(&profiles);

        let unresolved = mapping.unresolved();
        for warning in &unresolved {
            log::warn!("{warning}");
        }
        log::info!(
            "mapped {} of {} opcodes from {} methods ({} instructions)",
            mapping.resolved_count(),
            mapping.len(),
            profiles.method_count(),
            profiles.instruction_count()
        );

        observer.on_event(&ProgressEvent::MappingComplete {
            resolved: mapping.resolved_count(),
            unresolved: unresolved.len(),
        });
        mapping
    }
}
