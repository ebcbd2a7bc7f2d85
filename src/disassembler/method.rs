use std::fmt;

use strum::{Display, FromRepr};

use crate::{
    disassembler::{AbstractInstruction, OffsetMap},
    stream::MethodKey,
};

/// Kind of an exception region, as encoded in the method header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, FromRepr)]
#[repr(u8)]
pub enum RegionKind {
    /// Typed catch clause
    Catch = 0,
    /// Filter clause
    Filter = 1,
    /// Finally clause
    Finally = 2,
    /// Fault clause
    Fault = 3,
}

/// A protected range and its handler, in code offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionRegion {
    /// Clause kind
    pub kind: RegionKind,
    /// Start of the protected range
    pub try_start: usize,
    /// Length of the protected range
    pub try_len: usize,
    /// Start of the handler
    pub handler_start: usize,
    /// Length of the handler
    pub handler_len: usize,
}

impl ExceptionRegion {
    /// Returns `true` if `offset` lies inside the protected range.
    #[must_use]
    pub fn in_try(&self, offset: usize) -> bool {
        offset >= self.try_start && offset < self.try_start + self.try_len
    }

    /// Returns `true` if `offset` lies inside the handler.
    #[must_use]
    pub fn in_handler(&self, offset: usize) -> bool {
        offset >= self.handler_start && offset < self.handler_start + self.handler_len
    }

    /// Returns `true` if the handler is entered with an empty evaluation stack.
    ///
    /// Catch and filter handlers receive the exception object.
    #[must_use]
    pub fn handler_starts_empty(&self) -> bool {
        matches!(self.kind, RegionKind::Finally | RegionKind::Fault)
    }
}

/// The decoded form of one virtualized method.
///
/// Created once per [`MethodKey`] by the [`crate::disassembler::Disassembler`] and never
/// modified afterwards. Instructions are ordered by offset and tile the code without gaps.
#[derive(Debug, Clone, PartialEq)]
pub struct DisassembledMethod {
    key: MethodKey,
    code_size: usize,
    instructions: Vec<AbstractInstruction>,
    regions: Vec<ExceptionRegion>,
    leaders: OffsetMap,
}

impl DisassembledMethod {
    pub(crate) fn new(
        key: MethodKey,
        code_size: usize,
        instructions: Vec<AbstractInstruction>,
        regions: Vec<ExceptionRegion>,
    ) -> Self {
        let mut leaders = OffsetMap::new(code_size);
        if let Some(first) = instructions.first() {
            leaders.set(first.offset, true);
        }
        for instruction in &instructions {
            for &target in instruction.targets() {
                leaders.set(target, true);
            }
        }
        for region in &regions {
            leaders.set(region.try_start, true);
            leaders.set(region.handler_start, true);
        }

        DisassembledMethod {
            key,
            code_size,
            instructions,
            regions,
            leaders,
        }
    }

    /// The method this disassembly belongs to.
    #[must_use]
    pub fn key(&self) -> MethodKey {
        self.key
    }

    /// Size of the code section in bytes.
    #[must_use]
    pub fn code_size(&self) -> usize {
        self.code_size
    }

    /// The decoded instructions, ordered by offset.
    #[must_use]
    pub fn instructions(&self) -> &[AbstractInstruction] {
        &self.instructions
    }

    /// Exception regions in header order.
    #[must_use]
    pub fn regions(&self) -> &[ExceptionRegion] {
        &self.regions
    }

    /// Number of instructions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    /// Returns `true` for a method without code.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Index of the instruction starting exactly at `offset`.
    #[must_use]
    pub fn index_of(&self, offset: usize) -> Option<usize> {
        self.instructions
            .binary_search_by_key(&offset, |instruction| instruction.offset)
            .ok()
    }

    /// The instruction starting exactly at `offset`.
    #[must_use]
    pub fn instruction_at(&self, offset: usize) -> Option<&AbstractInstruction> {
        self.index_of(offset).map(|index| &self.instructions[index])
    }

    /// Returns `true` if `offset` starts a basic block: the method entry, a branch target
    /// or the start of a protected range or handler.
    #[must_use]
    pub fn is_leader(&self, offset: usize) -> bool {
        self.leaders.get(offset)
    }

    /// All block leaders in ascending order.
    pub fn leaders(&self) -> impl Iterator<Item = usize> + '_ {
        self.leaders.iter()
    }

    /// Returns `true` if `offset` lies inside any protected range.
    #[must_use]
    pub fn in_try(&self, offset: usize) -> bool {
        self.regions.iter().any(|region| region.in_try(offset))
    }

    /// Returns `true` if `offset` lies inside any handler.
    #[must_use]
    pub fn in_handler(&self, offset: usize) -> bool {
        self.regions.iter().any(|region| region.in_handler(offset))
    }

    /// Returns `true` if the evaluation stack is known to be empty at `offset`: the method
    /// entry, the start of a protected range, or the start of a finally or fault handler.
    #[must_use]
    pub fn is_empty_stack_point(&self, offset: usize) -> bool {
        offset == 0
            || self.regions.iter().any(|region| {
                region.try_start == offset
                    || (region.handler_start == offset && region.handler_starts_empty())
            })
    }

    /// Returns `true` if control leaves a protected range or handler that contains the
    /// instruction at `offset` when transferring to `target`.
    #[must_use]
    pub fn leaves_region(&self, offset: usize, target: usize) -> bool {
        self.regions.iter().any(|region| {
            (region.in_try(offset) && !region.in_try(target))
                || (region.in_handler(offset) && !region.in_handler(target))
        })
    }
}

impl fmt::Display for DisassembledMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "method {} ({} bytes)", self.key, self.code_size)?;
        for region in &self.regions {
            writeln!(
                f,
                "  .try IL_{:04X} to IL_{:04X} {} handler IL_{:04X} to IL_{:04X}",
                region.try_start,
                region.try_start + region.try_len,
                region.kind,
                region.handler_start,
                region.handler_start + region.handler_len
            )?;
        }
        for instruction in &self.instructions {
            writeln!(f, "  {instruction}")?;
        }
        Ok(())
    }
}
