//! Progress reporting for long devirtualization runs.
//!
//! The pipeline publishes one [`ProgressEvent`] per processed method and one when the
//! mapping is complete. Observers only watch; nothing they do can influence the result.
//!
//! - [`LogProgress`] forwards every event to the `log` facade at info level
//! - [`NullProgress`] drops everything
//! - [`ProgressLog`] keeps all events in a lock-free append-only list, for tests and for
//!   callers that render their own report

use std::fmt;

use crate::stream::MethodKey;

/// One step of a devirtualization run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    /// A method stream was extracted from the resource
    MethodExtracted {
        /// The method
        key: MethodKey,
        /// Decoded stream size
        bytes: usize,
    },
    /// A method was disassembled
    MethodDisassembled {
        /// The method
        key: MethodKey,
        /// Number of instructions
        instructions: usize,
    },
    /// A method failed to extract or decode and is excluded from mapping
    MethodFailed {
        /// The method
        key: MethodKey,
        /// Rendered error
        message: String,
    },
    /// A method's instructions were added to the opcode profiles
    MethodProfiled {
        /// The method
        key: MethodKey,
        /// Number of instructions
        instructions: usize,
    },
    /// The opcode mapping was published
    MappingComplete {
        /// Opcodes mapped to a canonical instruction
        resolved: usize,
        /// Opcodes left unresolved
        unresolved: usize,
    },
}

impl fmt::Display for ProgressEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProgressEvent::MethodExtracted { key, bytes } => {
                write!(f, "extracted {key} ({bytes} bytes)")
            }
            ProgressEvent::MethodDisassembled { key, instructions } => {
                write!(f, "disassembled {key} ({instructions} instructions)")
            }
            ProgressEvent::MethodFailed { key, message } => write!(f, "failed {key}: {message}"),
            ProgressEvent::MethodProfiled { key, instructions } => {
                write!(f, "profiled {key} ({instructions} instructions)")
            }
            ProgressEvent::MappingComplete {
                resolved,
                unresolved,
            } => write!(f, "mapping complete: {resolved} resolved, {unresolved} unresolved"),
        }
    }
}

/// Receives progress events.
///
/// Events of one run arrive one at a time and in a fixed order: extraction and disassembly
/// per method by key, then profiling per method by key, then the mapping summary.
pub trait ProgressObserver: Send + Sync {
    /// Handle one event.
    fn on_event(&self, event: &ProgressEvent);
}

/// Writes every event to `log::info!`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogProgress;

impl ProgressObserver for LogProgress {
    fn on_event(&self, event: &ProgressEvent) {
        match event {
            ProgressEvent::MethodFailed { .. } => log::warn!("{event}"),
            _ => log::info!("{event}"),
        }
    }
}

/// Ignores all events.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullProgress;

impl ProgressObserver for NullProgress {
    fn on_event(&self, _event: &ProgressEvent) {}
}

/// Records every event in arrival order.
#[derive(Debug)]
pub struct ProgressLog {
    events: boxcar::Vec<ProgressEvent>,
}

impl Default for ProgressLog {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressLog {
    /// Create an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self {
            events: boxcar::Vec::new(),
        }
    }

    /// Iterate over all recorded events.
    pub fn events(&self) -> impl Iterator<Item = &ProgressEvent> {
        (0..self.events.count()).filter_map(|i| self.events.get(i))
    }

    /// Recorded events rendered as progress lines.
    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        self.events().map(ToString::to_string).collect()
    }

    /// Number of recorded events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.count()
    }

    /// Returns `true` if nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.count() == 0
    }
}

impl ProgressObserver for ProgressLog {
    fn on_event(&self, event: &ProgressEvent) {
        self.events.push(event.clone());
    }
}
