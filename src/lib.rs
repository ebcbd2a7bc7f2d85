// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![deny(unsafe_code)]
// - 'file/physical.rs' maps the resource file into memory

//! # vmscope
//!
//! Opcode semantic recovery for .NET methods protected by code virtualization.
//!
//! Virtualizing obfuscators replace a method's CIL body with a stream of custom bytecode and
//! an interpreter call. The bytecode uses a private, per-build opcode numbering, so the first
//! step of any devirtualization is learning which virtual opcode id implements which CIL
//! instruction. `vmscope` recovers that mapping from structure alone: instruction lengths,
//! branch targets, exception regions and the way opcodes are used across all methods.
//!
//! ## Features
//!
//! - **📦 Versioned resource decoding** - Header, method directory and per-method keystreams
//! - **🔍 Structural disassembly** - Declared and inferred operand shapes, absolute branch targets
//! - **⚡ Concurrent caching** - Each method is decoded once, no matter how many threads ask
//! - **🧩 Pluggable scoring** - Swap the heuristics that compare opcodes against CIL signatures
//! - **🛡️ Fault isolation** - A damaged method fails alone, the run carries on
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use vmscope::prelude::*;
//!
//! let table = OperandShapeTable::new(1)
//!     .with(0x07, OperandShape::Branch)
//!     .with(0x2A, OperandShape::None);
//!
//! let resource = Resource::from_file("resource.bin")?;
//! let attack = EzirizAttack::new(resource, table, AttackConfig::default())?;
//! let result = attack.devirtualize()?;
//!
//! for warning in result.mapping.unresolved() {
//!     println!("{warning}");
//! }
//! print!("{}", result.mapping);
//! # Ok::<(), vmscope::Error>(())
//! ```
//!
//! ## Architecture
//!
//! - [`stream`] - Resource parsing and per-method stream extraction
//! - [`disassembler`] - Structural decoding and the get-or-create method cache
//! - [`mapping`] - Opcode profiles, compatibility scoring and constraint resolution
//! - [`attack`] - Per-VM drivers wiring the stages together on a worker pool
//! - [`progress`] - Observers for the human-readable progress stream
//! - [`Error`] and [`Result`] - Error handling
//!
//! ## Error Handling
//!
//! Malformed input of a single method is isolated and reported; only pipeline invariant
//! violations abort a run:
//!
//! ```rust,no_run
//! use vmscope::{prelude::*, Error};
//!
//! # fn run(attack: &EzirizAttack) -> vmscope::Result<()> {
//! match attack.devirtualize() {
//!     Ok(result) => println!("{} methods, {} failed", result.methods.len(), result.failures.len()),
//!     Err(Error::CacheInvariantViolation { key, message }) => eprintln!("{key}: {message}"),
//!     Err(e) => eprintln!("Other error: {e}"),
//! }
//! # Ok(())
//! # }
//! ```

#[macro_use]
pub(crate) mod error;

/// Low-level byte access and input backends.
pub mod file;

/// Convenient re-exports of the most commonly used types and traits.
///
/// ```rust,no_run
/// use vmscope::prelude::*;
///
/// let extractor = StreamExtractor::new(Resource::from_file("resource.bin")?)?;
/// println!("{} virtualized methods", extractor.len());
/// # Ok::<(), vmscope::Error>(())
/// ```
pub mod prelude;

/// Devirtualization drivers.
pub mod attack;

/// Structural disassembly of virtualized methods.
pub mod disassembler;

/// Opcode mapping.
pub mod mapping;

/// Progress reporting.
pub mod progress;

/// Protected resource parsing and method stream extraction.
pub mod stream;

/// Metadata tokens.
pub mod token;

/// `vmscope` Result type
///
/// A type alias for `std::result::Result<T, Error>` where the error type is always [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// `vmscope` Error type
///
/// The main error type for all operations in this crate.
pub use error::Error;

/// Bounds-checked byte cursor used by all decoders.
pub use file::parser::Parser;

/// A 32-bit metadata token.
pub use token::Token;
