//! Linear decoding of virtualized method streams.
//!
//! A decoded method stream starts with a small header (a flags byte and optional exception
//! regions), followed by the code. The code is decoded front to back: every instruction is
//! an opcode byte followed by an operand whose shape comes from the
//! [`crate::disassembler::OperandShapeTable`] or, for opcodes the table does not know, is
//! inferred from the layout of the bytes that follow.
//!
//! # Shape inference
//!
//! For an undeclared opcode the decoder tries the operand widths 0, 4, 1 and 8. Each
//! candidate is scored by how many following instructions of known shape decode cleanly
//! after it, up to [`LOOKAHEAD`] instructions; reaching the exact end of the code counts as
//! full support. The best supported width wins, ties going to the earlier candidate. The
//! result is remembered for the rest of the method only, so decoding never depends on other
//! methods or on processing order.
//!
//! Four byte operands of inferred opcodes are classified once the whole method is decoded.
//! An opcode is a branch when it has at least one non-zero operand and every non-zero
//! operand, read as a relative offset, lands on an instruction boundary. Otherwise a value
//! shaped like a metadata token becomes a token and anything else stays a plain integer.
//!
//! # Example
//!
//! ```rust
//! use vmscope::disassembler::{decode_stream, Operand, OperandShape, OperandShapeTable};
//!
//! let table = OperandShapeTable::new(1)
//!     .with(0x07, OperandShape::Branch)
//!     .with(0x2A, OperandShape::None);
//!
//! // op_07 +1 ; op_2A ; op_2A
//! let code = [0x07, 0x01, 0x00, 0x00, 0x00, 0x2A, 0x2A];
//! let instructions = decode_stream(&code, &table)?;
//! assert_eq!(instructions[0].operand, Operand::Branch(6));
//! # Ok::<(), vmscope::Error>(())
//! ```

use crate::{
    disassembler::{
        AbstractInstruction, DisassembledMethod, ExceptionRegion, OffsetMap, Operand,
        OperandShape, OperandShapeTable, RegionKind, ShapeSource,
    },
    file::parser::Parser,
    stream::RawInstructionStream,
    token::Token,
    Result,
};

/// Maximum number of following instructions inspected when inferring an operand width.
pub const LOOKAHEAD: usize = 4;

/// Candidate operand widths for undeclared opcodes, in order of preference.
const CANDIDATE_WIDTHS: [usize; 4] = [0, 4, 1, 8];

/// Method header flag: exception regions follow.
const FLAG_REGIONS: u8 = 0x01;

/// Encoded size of one exception region.
const REGION_SIZE: usize = 17;

struct Decoder<'a> {
    parser: Parser<'a>,
    table: &'a OperandShapeTable,
    inferred: [Option<usize>; 256],
    instructions: Vec<AbstractInstruction>,
}

impl<'a> Decoder<'a> {
    fn new(code: &'a [u8], table: &'a OperandShapeTable) -> Self {
        Decoder {
            parser: Parser::new(code),
            table,
            inferred: [None; 256],
            instructions: Vec::new(),
        }
    }

    /// Decode all instructions, then resolve and validate branch targets.
    fn decode(mut self) -> Result<Vec<AbstractInstruction>> {
        while self.parser.has_more_data() {
            let offset = self.parser.pos();
            let opcode = self.parser.read_le::<u8>()?;

            let (operand, source) = match self.table.get(opcode) {
                Some(shape) => (
                    self.read_declared(opcode, offset, shape)?,
                    ShapeSource::Declared,
                ),
                None => (self.read_inferred(opcode, offset)?, ShapeSource::Inferred),
            };

            self.instructions.push(AbstractInstruction {
                offset,
                size: self.parser.pos() - offset,
                opcode,
                operand,
                source,
            });
        }

        self.finish()
    }

    fn read_declared(&mut self, opcode: u8, offset: usize, shape: OperandShape) -> Result<Operand> {
        match shape {
            OperandShape::None => Ok(Operand::None),
            OperandShape::Byte => {
                self.ensure(opcode, offset, 1)?;
                Ok(Operand::Byte(self.parser.read_le::<u8>()?))
            }
            OperandShape::Int32 => {
                self.ensure(opcode, offset, 4)?;
                Ok(Operand::Int32(self.parser.read_le::<i32>()?))
            }
            OperandShape::Int64 => {
                self.ensure(opcode, offset, 8)?;
                Ok(Operand::Int64(self.parser.read_le::<i64>()?))
            }
            OperandShape::Token => {
                self.ensure(opcode, offset, 4)?;
                Ok(Operand::Token(Token::new(self.parser.read_le::<u32>()?)))
            }
            OperandShape::Branch => {
                self.ensure(opcode, offset, 4)?;
                let relative = self.parser.read_le::<i32>()?;
                let target = self.resolve_target(opcode, offset, self.parser.pos(), relative)?;
                Ok(Operand::Branch(target))
            }
            OperandShape::Switch => {
                self.ensure(opcode, offset, 4)?;
                let count = self.parser.read_le::<u32>()? as usize;
                let Some(table_size) = count.checked_mul(4) else {
                    return Err(format_error!(
                        "Switch at IL_{:04X} declares {} targets",
                        offset,
                        count
                    ));
                };
                self.ensure(opcode, offset, table_size)?;

                let end = self.parser.pos() + table_size;
                let mut targets = Vec::with_capacity(count);
                for _ in 0..count {
                    let relative = self.parser.read_le::<i32>()?;
                    targets.push(self.resolve_target(opcode, offset, end, relative)?);
                }
                Ok(Operand::Switch(targets))
            }
        }
    }

    fn read_inferred(&mut self, opcode: u8, offset: usize) -> Result<Operand> {
        let width = match self.inferred[usize::from(opcode)] {
            Some(width) => width,
            None => {
                let width = self.infer_width(self.parser.pos());
                self.inferred[usize::from(opcode)] = Some(width);
                width
            }
        };
        self.ensure(opcode, offset, width)?;

        match width {
            0 => Ok(Operand::None),
            1 => Ok(Operand::Byte(self.parser.read_le::<u8>()?)),
            4 => Ok(Operand::Int32(self.parser.read_le::<i32>()?)),
            _ => Ok(Operand::Int64(self.parser.read_le::<i64>()?)),
        }
    }

    /// Pick the operand width best supported by the bytes after `operand_start`.
    fn infer_width(&self, operand_start: usize) -> usize {
        let code_size = self.parser.len();
        let mut best = (0, 0);

        for width in CANDIDATE_WIDTHS {
            match operand_start.checked_add(width) {
                Some(end) if end <= code_size => {
                    let support = self.support(end);
                    if support > best.0 {
                        best = (support, width);
                    }
                }
                _ => {}
            }
        }

        best.1
    }

    /// Number of known instructions that decode cleanly from `position`.
    fn support(&self, mut position: usize) -> usize {
        let code = self.parser.data();

        for step in 0..LOOKAHEAD {
            if position == code.len() {
                return LOOKAHEAD;
            }

            let Some(operand_size) = self.known_operand_size(code, position) else {
                return step;
            };
            match position.checked_add(1 + operand_size) {
                Some(end) if end <= code.len() => position = end,
                _ => return step,
            }
        }

        LOOKAHEAD
    }

    fn known_operand_size(&self, code: &[u8], position: usize) -> Option<usize> {
        let opcode = code[position];
        match self.table.get(opcode) {
            Some(OperandShape::Switch) => {
                let mut parser = Parser::new(code);
                parser.seek(position + 1).ok()?;
                let count = parser.read_le::<u32>().ok()? as usize;
                count.checked_mul(4)?.checked_add(4)
            }
            Some(shape) => shape.fixed_size(),
            None => self.inferred[usize::from(opcode)],
        }
    }

    fn ensure(&self, opcode: u8, offset: usize, needed: usize) -> Result<()> {
        if self.parser.remaining() < needed {
            return Err(format_error!(
                "Operand of op_{:02X} at IL_{:04X} needs {} bytes, {} remaining",
                opcode,
                offset,
                needed,
                self.parser.remaining()
            ));
        }
        Ok(())
    }

    fn resolve_target(&self, opcode: u8, offset: usize, end: usize, relative: i32) -> Result<usize> {
        let target = end as i64 + i64::from(relative);
        match usize::try_from(target) {
            Ok(target) if target < self.parser.len() => Ok(target),
            _ => Err(format_error!(
                "Branch target {} of op_{:02X} at IL_{:04X} outside code of {} bytes",
                target,
                opcode,
                offset,
                self.parser.len()
            )),
        }
    }

    fn finish(mut self) -> Result<Vec<AbstractInstruction>> {
        let mut boundaries = OffsetMap::new(self.parser.len());
        for instruction in &self.instructions {
            boundaries.set(instruction.offset, true);
        }

        let branches = branch_opcodes(&self.instructions, &boundaries);
        for instruction in &mut self.instructions {
            if instruction.source == ShapeSource::Inferred {
                if let Operand::Int32(value) = instruction.operand {
                    let branch = branches[usize::from(instruction.opcode)];
                    instruction.operand = classify(value, instruction.end(), branch, &boundaries);
                }
            } else if let Some(target) = instruction
                .targets()
                .iter()
                .find(|&&target| !boundaries.get(target))
            {
                return Err(format_error!(
                    "Branch of op_{:02X} at IL_{:04X} targets IL_{:04X}, inside an instruction",
                    instruction.opcode,
                    instruction.offset,
                    target
                ));
            }
        }

        Ok(self.instructions)
    }
}

/// Relative target of a four byte operand, if it lands on an instruction boundary.
fn boundary_target(value: i32, end: usize, boundaries: &OffsetMap) -> Option<usize> {
    let target = usize::try_from(end as i64 + i64::from(value)).ok()?;
    boundaries.get(target).then_some(target)
}

/// Inferred opcodes whose four byte operands behave like branch offsets.
///
/// The verdict covers every occurrence of the opcode in the method. A zero offset names
/// the next instruction whatever the operand means, so only non-zero values count, and
/// all of them must land on a boundary.
fn branch_opcodes(instructions: &[AbstractInstruction], boundaries: &OffsetMap) -> [bool; 256] {
    let mut landed = [0_usize; 256];
    let mut missed = [false; 256];

    for instruction in instructions {
        if instruction.source != ShapeSource::Inferred {
            continue;
        }
        let Operand::Int32(value) = instruction.operand else {
            continue;
        };
        if value == 0 {
            continue;
        }

        let opcode = usize::from(instruction.opcode);
        if boundary_target(value, instruction.end(), boundaries).is_some() {
            landed[opcode] += 1;
        } else {
            missed[opcode] = true;
        }
    }

    std::array::from_fn(|opcode| landed[opcode] > 0 && !missed[opcode])
}

/// Classify an inferred four byte operand of an instruction ending at `end`.
fn classify(value: i32, end: usize, branch: bool, boundaries: &OffsetMap) -> Operand {
    if branch {
        if let Some(target) = boundary_target(value, end, boundaries) {
            return Operand::Branch(target);
        }
    }

    let token = Token::new(value as u32);
    if token.is_plausible_reference() {
        Operand::Token(token)
    } else {
        Operand::Int32(value)
    }
}

/// Decode a bare code section without a method header.
///
/// # Errors
/// Returns [`crate::Error::Format`] if an operand runs past the end of the code or a branch
/// target lies outside the code or inside another instruction.
pub fn decode_stream(
    code: &[u8],
    table: &OperandShapeTable,
) -> Result<Vec<AbstractInstruction>> {
    Decoder::new(code, table).decode()
}

/// Decode a complete method stream: header, exception regions and code.
///
/// # Errors
/// Returns [`crate::Error::Format`] for an empty stream, unknown header flags, malformed or
/// out-of-range exception regions, and everything [`decode_stream`] rejects.
pub fn decode_method(
    raw: &RawInstructionStream,
    table: &OperandShapeTable,
) -> Result<DisassembledMethod> {
    let mut parser = Parser::new(raw.data());

    let flags = parser
        .read_le::<u8>()
        .map_err(|_| format_error!("Empty method stream"))?;
    if flags & !FLAG_REGIONS != 0 {
        return Err(format_error!("Unknown method flags - 0x{:02X}", flags));
    }

    let mut regions = Vec::new();
    let mut encoded_regions = Vec::new();
    if flags & FLAG_REGIONS != 0 {
        let count = parser.read_7bit_encoded_int()? as usize;
        match count.checked_mul(REGION_SIZE) {
            Some(size) if size <= parser.remaining() => {}
            _ => {
                return Err(format_error!(
                    "{} exception regions exceed the stream of {} bytes",
                    count,
                    raw.len()
                ))
            }
        }

        for _ in 0..count {
            encoded_regions.push((
                parser.read_le::<u8>()?,
                parser.read_le::<u32>()? as usize,
                parser.read_le::<u32>()? as usize,
                parser.read_le::<u32>()? as usize,
                parser.read_le::<u32>()? as usize,
            ));
        }
    }

    let code = &raw.data()[parser.pos()..];
    for (kind, try_start, try_len, handler_start, handler_len) in encoded_regions {
        let Some(kind) = RegionKind::from_repr(kind) else {
            return Err(format_error!("Unknown exception region kind - {}", kind));
        };

        let fits = |start: usize, len: usize| start.checked_add(len).is_some_and(|end| end <= code.len());
        if !fits(try_start, try_len) || !fits(handler_start, handler_len) {
            return Err(format_error!(
                "Exception region outside code of {} bytes - try IL_{:04X}+{}, handler IL_{:04X}+{}",
                code.len(),
                try_start,
                try_len,
                handler_start,
                handler_len
            ));
        }

        regions.push(ExceptionRegion {
            kind,
            try_start,
            try_len,
            handler_start,
            handler_len,
        });
    }

    let instructions = decode_stream(code, table)?;
    Ok(DisassembledMethod::new(
        raw.key(),
        code.len(),
        instructions,
        regions,
    ))
}
