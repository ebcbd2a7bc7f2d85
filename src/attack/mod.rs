//! Devirtualization drivers for specific virtual machines.
//!
//! An attack ties the pipeline together for one protection scheme: it enumerates the
//! virtualized methods, extracts and disassembles each of them, and maps the virtual
//! opcode ids over the complete set of methods.
//!
//! # Architecture
//!
//! - [`VmAttack`] - Trait implemented by every supported virtual machine
//! - [`SignatureMatcher`] - Pluggable detection, [`NoMatch`] by default for custom setups
//! - [`AttackConfig`] - Thread count, cache verification and mapping thresholds
//! - [`DevirtualizationResult`] - Methods, failures and the opcode mapping of one run
//!
//! # Supported Virtual Machines
//!
//! - [`EzirizAttack`] - Eziriz .NET Reactor code virtualization

mod config;
mod eziriz;
mod matcher;

pub use config::AttackConfig;
pub use eziriz::EzirizAttack;
pub use matcher::{NoMatch, ResourceMagicMatcher, SignatureMatcher};

use std::sync::Arc;

use strum::{Display, EnumString};

use crate::{
    disassembler::{DisassembledMethod, MethodFailure},
    mapping::OpcodeMapping,
    stream::MethodKey,
    Result,
};

/// Virtual machines this crate knows how to attack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
pub enum VirtualMachineType {
    /// Eziriz .NET Reactor
    Eziriz,
}

/// A devirtualization strategy for one virtual machine.
pub trait VmAttack: Send + Sync {
    /// The virtual machine this attack handles.
    fn target(&self) -> VirtualMachineType;

    /// Returns `true` if `assembly` looks protected by [`VmAttack::target`].
    fn matches_signature(&self, assembly: &[u8]) -> bool;

    /// Devirtualize every method of the protected resource.
    ///
    /// # Errors
    /// Returns an error only for failures that invalidate the whole run; malformed methods
    /// are reported in [`DevirtualizationResult::failures`].
    fn devirtualize(&self) -> Result<DevirtualizationResult>;
}

/// Output of a devirtualization run.
#[derive(Debug, Clone)]
pub struct DevirtualizationResult {
    /// Successfully disassembled methods, ordered by key
    pub methods: Vec<Arc<DisassembledMethod>>,
    /// Methods that failed to extract or decode, ordered by key
    pub failures: Vec<MethodFailure>,
    /// Opcode mapping over all disassembled methods
    pub mapping: OpcodeMapping,
}

impl DevirtualizationResult {
    /// The disassembled method for `key`.
    #[must_use]
    pub fn method(&self, key: &MethodKey) -> Option<&Arc<DisassembledMethod>> {
        self.methods
            .binary_search_by(|method| method.key().cmp(key))
            .ok()
            .map(|index| &self.methods[index])
    }

    /// Returns `true` if no method failed and every opcode was resolved.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty() && self.mapping.resolved_count() == self.mapping.len()
    }
}
