//! Configuration for a devirtualization run.

use crate::mapping::MappingConfig;

/// Settings of one devirtualization run.
///
/// # Example
///
/// ```rust
/// use vmscope::attack::AttackConfig;
///
/// let config = AttackConfig::strict().with_threads(4);
/// assert!(config.verify_cache);
/// assert_eq!(config.threads, 4);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct AttackConfig {
    /// Worker threads for extraction and disassembly, 0 for one per core (default: 0).
    pub threads: usize,

    /// Re-decode every method after the run and compare with the cached result
    /// (default: false).
    pub verify_cache: bool,

    /// Opcode mapping settings.
    pub mapping: MappingConfig,
}

impl Default for AttackConfig {
    fn default() -> Self {
        Self {
            threads: 0,
            verify_cache: false,
            mapping: MappingConfig::default(),
        }
    }
}

impl AttackConfig {
    /// Creates a new configuration with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a "strict" configuration: strict mapping thresholds and cache verification.
    #[must_use]
    pub fn strict() -> Self {
        Self {
            verify_cache: true,
            mapping: MappingConfig::strict(),
            ..Self::default()
        }
    }

    /// Creates a "lenient" configuration that resolves more opcodes on weaker evidence.
    #[must_use]
    pub fn lenient() -> Self {
        Self {
            mapping: MappingConfig::lenient(),
            ..Self::default()
        }
    }

    /// Sets the number of worker threads.
    #[must_use]
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    /// Enables or disables cache verification.
    #[must_use]
    pub fn with_verify_cache(mut self, enabled: bool) -> Self {
        self.verify_cache = enabled;
        self
    }

    /// Sets the mapping configuration.
    #[must_use]
    pub fn with_mapping(mut self, mapping: MappingConfig) -> Self {
        self.mapping = mapping;
        self
    }
}
