//! # vmscope Prelude
//!
//! The types needed for a typical devirtualization run, importable with a single glob.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all vmscope operations
pub use crate::Error;

/// The result type used throughout vmscope
pub use crate::Result;

/// Metadata token referenced from virtualized code
pub use crate::Token;

// ================================================================================================
// Resource and Streams
// ================================================================================================

pub use crate::stream::{
    FormatVersion, MethodKey, RawInstructionStream, Resource, ResourceBuilder, StreamExtractor,
};

// ================================================================================================
// Disassembly
// ================================================================================================

pub use crate::disassembler::{
    AbstractInstruction, DisassembledMethod, Disassembler, MethodBodyBuilder, Operand,
    OperandShape, OperandShapeTable,
};

// ================================================================================================
// Opcode Mapping
// ================================================================================================

pub use crate::mapping::{
    CompatibilityScorer, MappingConfig, OpcodeMapper, OpcodeMapping, Resolution,
    SignatureTable, UnresolvedOpcodeWarning, UnresolvedReason,
};

// ================================================================================================
// Orchestration and Progress
// ================================================================================================

pub use crate::attack::{
    AttackConfig, DevirtualizationResult, EzirizAttack, SignatureMatcher, VirtualMachineType,
    VmAttack,
};

pub use crate::progress::{LogProgress, NullProgress, ProgressEvent, ProgressLog, ProgressObserver};
