//! Abstract instruction representation over an unknown opcode numbering.
//!
//! The virtual machine's opcode ids carry no meaning on their own, so an
//! [`AbstractInstruction`] only records what can be read off the stream: the opcode id, where
//! the instruction sits, how long it is and its decoded operand. Whether the operand layout
//! came from a declared table or was inferred is kept as well, since inferred shapes are
//! weaker evidence for the opcode mapper.

use std::fmt;

use strum::{Display, EnumIter};

use crate::token::Token;

/// Operand layout classes an opcode can carry.
///
/// Ordered so that histograms keyed by shape iterate deterministically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, EnumIter)]
pub enum OperandShape {
    /// No operand
    None,
    /// 8-bit immediate
    Byte,
    /// 32-bit immediate
    Int32,
    /// 64-bit immediate
    Int64,
    /// 32-bit metadata token
    Token,
    /// 32-bit offset relative to the end of the instruction
    Branch,
    /// 32-bit count followed by as many relative offsets
    Switch,
}

impl OperandShape {
    /// Encoded operand size for shapes with a fixed layout, `None` for [`OperandShape::Switch`].
    #[must_use]
    pub fn fixed_size(self) -> Option<usize> {
        match self {
            OperandShape::None => Some(0),
            OperandShape::Byte => Some(1),
            OperandShape::Int32 | OperandShape::Token | OperandShape::Branch => Some(4),
            OperandShape::Int64 => Some(8),
            OperandShape::Switch => None,
        }
    }

    /// Returns `true` for shapes that encode control-flow targets.
    #[must_use]
    pub fn is_branch(self) -> bool {
        matches!(self, OperandShape::Branch | OperandShape::Switch)
    }
}

/// Where the operand shape of an instruction came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum ShapeSource {
    /// Taken from the [`crate::disassembler::OperandShapeTable`]
    Declared,
    /// Inferred from the stream layout
    Inferred,
}

/// A decoded operand. Branch targets are absolute offsets into the method's code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operand {
    /// No operand
    None,
    /// 8-bit immediate
    Byte(u8),
    /// 32-bit immediate
    Int32(i32),
    /// 64-bit immediate
    Int64(i64),
    /// Metadata token
    Token(Token),
    /// Absolute target offset
    Branch(usize),
    /// Absolute target offsets, in table order
    Switch(Vec<usize>),
}

impl Operand {
    /// The shape class of this operand.
    #[must_use]
    pub fn shape(&self) -> OperandShape {
        match self {
            Operand::None => OperandShape::None,
            Operand::Byte(_) => OperandShape::Byte,
            Operand::Int32(_) => OperandShape::Int32,
            Operand::Int64(_) => OperandShape::Int64,
            Operand::Token(_) => OperandShape::Token,
            Operand::Branch(_) => OperandShape::Branch,
            Operand::Switch(_) => OperandShape::Switch,
        }
    }

    /// All absolute branch targets encoded in this operand.
    #[must_use]
    pub fn targets(&self) -> &[usize] {
        match self {
            Operand::Branch(target) => std::slice::from_ref(target),
            Operand::Switch(targets) => targets,
            _ => &[],
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::None => Ok(()),
            Operand::Byte(value) => write!(f, "0x{value:02X}"),
            Operand::Int32(value) => write!(f, "{value}"),
            Operand::Int64(value) => write!(f, "{value}L"),
            Operand::Token(token) => write!(f, "{token}"),
            Operand::Branch(target) => write!(f, "IL_{target:04X}"),
            Operand::Switch(targets) => {
                write!(f, "(")?;
                for (index, target) in targets.iter().enumerate() {
                    if index > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "IL_{target:04X}")?;
                }
                write!(f, ")")
            }
        }
    }
}

/// One decoded instruction of a virtualized method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AbstractInstruction {
    /// Offset of the opcode byte, relative to the code start
    pub offset: usize,
    /// Encoded size including the opcode byte
    pub size: usize,
    /// Obfuscator-local opcode id
    pub opcode: u8,
    /// Decoded operand
    pub operand: Operand,
    /// Whether the operand shape was declared or inferred
    pub source: ShapeSource,
}

impl AbstractInstruction {
    /// The operand shape class.
    #[must_use]
    pub fn shape(&self) -> OperandShape {
        self.operand.shape()
    }

    /// Offset of the following instruction.
    #[must_use]
    pub fn end(&self) -> usize {
        self.offset + self.size
    }

    /// Absolute branch targets of this instruction, empty for non-branches.
    #[must_use]
    pub fn targets(&self) -> &[usize] {
        self.operand.targets()
    }
}

impl fmt::Display for AbstractInstruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IL_{:04X}: op_{:02X}", self.offset, self.opcode)?;
        if self.operand != Operand::None {
            write!(f, " {}", self.operand)?;
        }
        if self.source == ShapeSource::Inferred {
            write!(f, " ; inferred")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shape_sizes() {
        assert_eq!(OperandShape::None.fixed_size(), Some(0));
        assert_eq!(OperandShape::Byte.fixed_size(), Some(1));
        assert_eq!(OperandShape::Token.fixed_size(), Some(4));
        assert_eq!(OperandShape::Int64.fixed_size(), Some(8));
        assert_eq!(OperandShape::Switch.fixed_size(), None);
        assert!(OperandShape::Switch.is_branch());
        assert!(!OperandShape::Int32.is_branch());
    }

    #[test]
    fn display() {
        let instruction = AbstractInstruction {
            offset: 0x10,
            size: 5,
            opcode: 0x07,
            operand: Operand::Branch(0x20),
            source: ShapeSource::Inferred,
        };
        assert_eq!(instruction.to_string(), "IL_0010: op_07 IL_0020 ; inferred");
        assert_eq!(instruction.end(), 0x15);
        assert_eq!(instruction.targets(), &[0x20]);

        let switch = Operand::Switch(vec![1, 2]);
        assert_eq!(switch.to_string(), "(IL_0001, IL_0002)");
        assert_eq!(switch.shape(), OperandShape::Switch);
    }
}
