use std::{collections::BTreeSet, sync::Arc};

use rayon::prelude::*;

use crate::{
    attack::{
        AttackConfig, DevirtualizationResult, ResourceMagicMatcher, SignatureMatcher,
        VirtualMachineType, VmAttack,
    },
    disassembler::{DisassembledMethod, Disassembler, MethodFailure, OperandShapeTable},
    mapping::{CompatibilityScorer, OpcodeMapper, SignatureTable},
    progress::{LogProgress, ProgressEvent, ProgressObserver},
    stream::{MethodKey, Resource, StreamExtractor},
    Error, Result,
};

enum Outcome {
    Decoded {
        method: Arc<DisassembledMethod>,
        bytes: usize,
    },
    Failed {
        failure: MethodFailure,
        bytes: Option<usize>,
    },
}

impl Outcome {
    fn failed(key: MethodKey, bytes: Option<usize>, error: &Error) -> Self {
        let message = match error {
            Error::MethodFailed { message, .. } => message.clone(),
            other => other.to_string(),
        };
        Outcome::Failed {
            failure: MethodFailure { key, message },
            bytes,
        }
    }

    fn events(&self) -> Vec<ProgressEvent> {
        match self {
            Outcome::Decoded { method, bytes } => vec![
                ProgressEvent::MethodExtracted {
                    key: method.key(),
                    bytes: *bytes,
                },
                ProgressEvent::MethodDisassembled {
                    key: method.key(),
                    instructions: method.len(),
                },
            ],
            Outcome::Failed { failure, bytes } => bytes
                .map(|bytes| ProgressEvent::MethodExtracted {
                    key: failure.key,
                    bytes,
                })
                .into_iter()
                .chain(std::iter::once(ProgressEvent::MethodFailed {
                    key: failure.key,
                    message: failure.message.clone(),
                }))
                .collect(),
        }
    }
}

/// Devirtualization of assemblies protected by the Eziriz virtual machine.
///
/// Extraction and disassembly of all requested methods fan out over a dedicated rayon pool.
/// Once every method has been decoded (or has failed), the opcode mapping is computed over
/// the whole population in a single pass.
///
/// Malformed methods are reported and skipped; they never reach the mapper. A cache
/// invariant violation aborts the run.
///
/// # Example
///
/// ```rust
/// use vmscope::attack::{AttackConfig, EzirizAttack, VmAttack};
/// use vmscope::disassembler::{MethodBodyBuilder, OperandShape, OperandShapeTable};
/// use vmscope::progress::NullProgress;
/// use vmscope::stream::{FormatVersion, MethodKey, Resource, ResourceBuilder};
/// use std::sync::Arc;
///
/// let mut body = MethodBodyBuilder::new();
/// body.branch(0x07, 5).op(0x2A);
/// let blob = ResourceBuilder::new(FormatVersion::V2)
///     .method(MethodKey::new(0x0600_0001, 0x1234), body.build())
///     .build();
///
/// let table = OperandShapeTable::new(1)
///     .with(0x07, OperandShape::Branch)
///     .with(0x2A, OperandShape::None);
///
/// let attack = EzirizAttack::new(Resource::from_mem(blob)?, table, AttackConfig::default())?
///     .with_observer(Arc::new(NullProgress));
/// let result = attack.devirtualize()?;
/// assert_eq!(result.methods.len(), 1);
/// assert_eq!(result.mapping.mnemonic(0x07), Some("br"));
/// # Ok::<(), vmscope::Error>(())
/// ```
pub struct EzirizAttack {
    extractor: StreamExtractor,
    disassembler: Disassembler,
    mapper: OpcodeMapper,
    config: AttackConfig,
    matcher: Box<dyn SignatureMatcher>,
    observer: Arc<dyn ProgressObserver>,
}

impl EzirizAttack {
    /// Prepare an attack on `resource`.
    ///
    /// Opcodes declared in `table` are always part of the resulting mapping, observed or not.
    ///
    /// # Errors
    /// Returns an error if the resource header or method directory is malformed.
    pub fn new(resource: Resource, table: OperandShapeTable, config: AttackConfig) -> Result<Self> {
        let extractor = StreamExtractor::new(resource)?;
        let mapper = OpcodeMapper::new(SignatureTable::cil(), config.mapping.clone())
            .with_expected_opcodes(table.declared_opcodes());

        Ok(EzirizAttack {
            extractor,
            disassembler: Disassembler::new(table),
            mapper,
            config,
            matcher: Box::new(ResourceMagicMatcher),
            observer: Arc::new(LogProgress),
        })
    }

    /// Replace the canonical signature table. Resets the scorer to the default.
    #[must_use]
    pub fn with_signatures(mut self, signatures: SignatureTable) -> Self {
        let expected = self.disassembler.shape_table().declared_opcodes();
        self.mapper = OpcodeMapper::new(signatures, self.config.mapping.clone())
            .with_expected_opcodes(expected);
        self
    }

    /// Replace the scorer used by the opcode mapper.
    #[must_use]
    pub fn with_scorer(mut self, scorer: Box<dyn CompatibilityScorer>) -> Self {
        self.mapper = self.mapper.with_scorer(scorer);
        self
    }

    /// Replace the signature matcher.
    #[must_use]
    pub fn with_matcher(mut self, matcher: Box<dyn SignatureMatcher>) -> Self {
        self.matcher = matcher;
        self
    }

    /// Replace the progress observer.
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn ProgressObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// The stream extractor.
    #[must_use]
    pub fn extractor(&self) -> &StreamExtractor {
        &self.extractor
    }

    /// The disassembly cache, shared by all runs of this attack.
    #[must_use]
    pub fn disassembler(&self) -> &Disassembler {
        &self.disassembler
    }

    /// The configuration.
    #[must_use]
    pub fn config(&self) -> &AttackConfig {
        &self.config
    }

    /// Devirtualize the methods named by `keys`, e.g. as found by a module explorer.
    ///
    /// Duplicate keys are processed once; results are ordered by key.
    ///
    /// # Errors
    /// Returns [`Error::ThreadPool`] if the worker pool cannot be created and
    /// [`Error::CacheInvariantViolation`] if a cached method diverges from its stream.
    pub fn devirtualize_methods(
        &self,
        keys: impl IntoIterator<Item = MethodKey>,
    ) -> Result<DevirtualizationResult> {
        let keys: Vec<MethodKey> = keys.into_iter().collect::<BTreeSet<_>>().into_iter().collect();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.threads)
            .build()?;

        log::info!(
            "devirtualizing {} methods on {} threads",
            keys.len(),
            pool.current_num_threads()
        );

        let outcomes = pool.install(|| {
            keys.par_iter()
                .map(|&key| self.process(key))
                .collect::<Result<Vec<_>>>()
        })?;

        let mut methods = Vec::with_capacity(outcomes.len());
        let mut failures = Vec::new();
        for outcome in outcomes {
            for event in outcome.events() {
                self.observer.on_event(&event);
            }
            match outcome {
                Outcome::Decoded { method, .. } => methods.push(method),
                Outcome::Failed { failure, .. } => failures.push(failure),
            }
        }

        let mapping = pool.install(|| self.mapper.map_opcodes(&methods, self.observer.as_ref()));

        log::info!(
            "devirtualized {} methods, {} failed, {} of {} opcodes resolved",
            methods.len(),
            failures.len(),
            mapping.resolved_count(),
            mapping.len()
        );

        Ok(DevirtualizationResult {
            methods,
            failures,
            mapping,
        })
    }

    fn process(&self, key: MethodKey) -> Result<Outcome> {
        let raw = match self.extractor.extract(&key) {
            Ok(raw) => raw,
            Err(error) if error.is_fatal() => return Err(error),
            Err(error) => return Ok(Outcome::failed(key, None, &error)),
        };

        match self.disassembler.get_or_create(key, &raw) {
            Ok(method) => {
                if self.config.verify_cache {
                    self.disassembler.verify(key, &raw)?;
                }
                Ok(Outcome::Decoded {
                    method,
                    bytes: raw.len(),
                })
            }
            Err(error) if error.is_fatal() => Err(error),
            Err(error) => Ok(Outcome::failed(key, Some(raw.len()), &error)),
        }
    }
}

impl VmAttack for EzirizAttack {
    fn target(&self) -> VirtualMachineType {
        VirtualMachineType::Eziriz
    }

    fn matches_signature(&self, assembly: &[u8]) -> bool {
        self.matcher.matches(assembly)
    }

    fn devirtualize(&self) -> Result<DevirtualizationResult> {
        let keys: Vec<MethodKey> = self
            .extractor
            .method_entries()
            .map(|entry| entry.key)
            .collect();
        self.devirtualize_methods(keys)
    }
}
