//! Structural disassembly of virtualized methods over an unknown opcode numbering.
//!
//! The virtual machine's opcode ids are obfuscator specific, so this module does not try to
//! name instructions. It only recovers structure: instruction boundaries, operand shapes,
//! absolute branch targets and exception regions. Naming is left to the
//! [`crate::mapping`] stage.
//!
//! # Key Types
//! - [`Disassembler`] - Concurrent get-or-create cache of decoded methods
//! - [`DisassembledMethod`] - Decoded instructions and regions of one method
//! - [`AbstractInstruction`] - One instruction: opcode id, offset, size and operand
//! - [`OperandShapeTable`] - Declared operand shapes per opcode id
//! - [`ShapeRegistry`] - Shapes inferred while decoding, for reporting
//!
//! # Main Functions
//! - [`decode_method`] - Decode a method stream including its header
//! - [`decode_stream`] - Decode a bare code section
//!
//! # Example
//! ```rust
//! use vmscope::disassembler::{
//!     Disassembler, MethodBodyBuilder, Operand, OperandShape, OperandShapeTable,
//! };
//! use vmscope::stream::{MethodKey, RawInstructionStream};
//!
//! let table = OperandShapeTable::new(1)
//!     .with(0x07, OperandShape::Branch)
//!     .with(0x2A, OperandShape::None);
//!
//! let key = MethodKey::new(0x0600_0001, 7);
//! let mut body = MethodBodyBuilder::new();
//! body.branch(0x07, 6).op(0x2A).op(0x2A);
//!
//! let disassembler = Disassembler::new(table);
//! let method = disassembler.get_or_create(key, &RawInstructionStream::new(key, body.build()))?;
//! assert_eq!(method.instructions()[0].operand, Operand::Branch(6));
//! # Ok::<(), vmscope::Error>(())
//! ```

mod builder;
mod cache;
mod decoder;
mod instruction;
mod method;
mod offsetmap;
mod shapes;

pub use builder::MethodBodyBuilder;
pub use cache::{Disassembler, MethodFailure};
pub use decoder::{decode_method, decode_stream, LOOKAHEAD};
pub use instruction::{AbstractInstruction, Operand, OperandShape, ShapeSource};
pub use method::{DisassembledMethod, ExceptionRegion, RegionKind};
pub use offsetmap::OffsetMap;
pub use shapes::{OperandShapeTable, ShapeRegistry, ShapeVote};
