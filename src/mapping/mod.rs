//! Recovery of opcode semantics from structural evidence.
//!
//! The disassembler knows where instructions start and what their operands look like, but
//! not what they do. This module observes every opcode id across all methods, compares the
//! evidence against a table of canonical CIL signatures and assigns each id the instruction
//! it most plausibly implements.
//!
//! # Pipeline
//!
//! 1. [`ProfileSet`] - per-opcode counters (operand shapes, fallthrough, region placement,
//!    neighbours), accumulated per method and merged across threads
//! 2. [`CompatibilityScorer`] - scores a profile against one [`CanonicalSignature`]
//! 3. [`Resolver`] - greedy assignment under uniqueness, confidence and tie constraints
//! 4. [`OpcodeMapping`] - the published result, with an [`UnresolvedReason`] for every id
//!    that could not be named
//!
//! [`OpcodeMapper`] runs all of it.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use vmscope::disassembler::{decode_method, MethodBodyBuilder, OperandShape, OperandShapeTable};
//! use vmscope::mapping::{MappingConfig, OpcodeMapper, SignatureTable};
//! use vmscope::progress::NullProgress;
//! use vmscope::stream::{MethodKey, RawInstructionStream};
//!
//! let table = OperandShapeTable::new(1)
//!     .with(0x07, OperandShape::Branch)
//!     .with(0x2A, OperandShape::None);
//!
//! let mut body = MethodBodyBuilder::new();
//! body.branch(0x07, 5).op(0x2A);
//! let key = MethodKey::new(0x0600_0001, 1);
//! let method = decode_method(&RawInstructionStream::new(key, body.build()), &table)?;
//!
//! let mapper = OpcodeMapper::new(SignatureTable::cil(), MappingConfig::default());
//! let mapping = mapper.map_opcodes(&[Arc::new(method)], &NullProgress);
//! assert_eq!(mapping.mnemonic(0x07), Some("br"));
//! # Ok::<(), vmscope::Error>(())
//! ```

mod config;
mod mapper;
mod profile;
mod resolver;
mod result;
mod scoring;
mod signature;

pub use config::MappingConfig;
pub use mapper::OpcodeMapper;
pub use profile::{OpcodeProfile, ProfileSet};
pub use resolver::Resolver;
pub use result::{Candidate, OpcodeMapping, Resolution, UnresolvedOpcodeWarning, UnresolvedReason};
pub use scoring::{CompatibilityScorer, ProfileFeatures, ScoringWeights, StructuralScorer};
pub use signature::{
    CanonicalSignature, FlowType, RegionRequirement, SignatureTable, StackBehavior,
};
