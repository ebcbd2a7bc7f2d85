//! Canonical instruction signatures the opcode mapper assigns opcode ids to.
//!
//! A [`CanonicalSignature`] describes what can be observed about an instruction without
//! knowing its encoding: operand shape, control-flow class, stack effect and where it may
//! appear relative to exception regions. [`SignatureTable`] groups them under a version, so
//! tables for different obfuscator builds can coexist.

use std::fmt;

use strum::Display;

use crate::disassembler::OperandShape::{
    self, Byte, Int32, Int64, None as NoOperand, Token,
};

/// How an instruction affects control flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum FlowType {
    /// Normal execution continues to next instruction
    Sequential,
    /// Conditional branch to another location
    ConditionalBranch,
    /// Always branches to another location (unconditional jump)
    UnconditionalBranch,
    /// Call to another method
    Call,
    /// Returns from current method
    Return,
    /// Multi-way branch (switch statement)
    Switch,
    /// Exception throwing
    Throw,
    /// End of finally block
    EndFinally,
    /// Leave protected region (try/catch/finally)
    Leave,
}

impl FlowType {
    /// Returns `true` if execution can continue with the next instruction.
    #[must_use]
    pub fn falls_through(self) -> bool {
        matches!(
            self,
            FlowType::Sequential | FlowType::ConditionalBranch | FlowType::Call | FlowType::Switch
        )
    }
}

/// Stack effect of an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackBehavior {
    /// Number of items popped from stack
    pub pops: u8,
    /// Number of items pushed to stack
    pub pushes: u8,
    /// Net effect on stack depth (pushes - pops)
    pub net_effect: i8,
}

impl StackBehavior {
    /// Create a fixed stack effect.
    #[must_use]
    #[allow(clippy::cast_possible_wrap)]
    pub const fn new(pops: u8, pushes: u8) -> Self {
        StackBehavior {
            pops,
            pushes,
            net_effect: pushes as i8 - pops as i8,
        }
    }
}

/// Where an instruction may appear relative to exception regions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum RegionRequirement {
    /// No constraint
    None,
    /// Transfers control out of a protected range or handler
    ExitsProtectedRegion,
    /// Only valid inside a handler
    InsideHandler,
}

/// Observable properties of one canonical instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CanonicalSignature {
    /// Canonical mnemonic
    pub mnemonic: &'static str,
    /// Operand shape
    pub shape: OperandShape,
    /// Control-flow class
    pub flow: FlowType,
    /// Fixed stack effect, `None` when it depends on the operand (calls, `ret`)
    pub stack: Option<StackBehavior>,
    /// Region constraint
    pub region: RegionRequirement,
    /// At most one opcode id may map to this instruction
    pub unique: bool,
}

impl CanonicalSignature {
    const fn new(
        mnemonic: &'static str,
        shape: OperandShape,
        flow: FlowType,
        stack: Option<StackBehavior>,
    ) -> Self {
        CanonicalSignature {
            mnemonic,
            shape,
            flow,
            stack,
            region: RegionRequirement::None,
            unique: true,
        }
    }

    const fn with_region(mut self, region: RegionRequirement) -> Self {
        self.region = region;
        self
    }

    const fn duplicable(mut self) -> Self {
        self.unique = false;
        self
    }
}

impl fmt::Display for CanonicalSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.mnemonic)
    }
}

const fn seq(mnemonic: &'static str, shape: OperandShape, pops: u8, pushes: u8) -> CanonicalSignature {
    CanonicalSignature::new(
        mnemonic,
        shape,
        FlowType::Sequential,
        Some(StackBehavior::new(pops, pushes)),
    )
}

const fn cond(mnemonic: &'static str, pops: u8) -> CanonicalSignature {
    CanonicalSignature::new(
        mnemonic,
        OperandShape::Branch,
        FlowType::ConditionalBranch,
        Some(StackBehavior::new(pops, 0)),
    )
}

const fn call(mnemonic: &'static str) -> CanonicalSignature {
    CanonicalSignature::new(mnemonic, OperandShape::Token, FlowType::Call, None)
}

/// The CIL subset shipped as signature table version 1.
static CIL_SIGNATURES: [CanonicalSignature; 66] = [
    seq("nop", NoOperand, 0, 0).duplicable(),
    // arguments, locals and constants
    seq("ldarg", Byte, 0, 1),
    seq("ldarga", Byte, 0, 1),
    seq("starg", Byte, 1, 0),
    seq("ldloc", Byte, 0, 1),
    seq("ldloca", Byte, 0, 1),
    seq("stloc", Byte, 1, 0),
    seq("ldnull", NoOperand, 0, 1),
    seq("ldc.i4", Int32, 0, 1),
    seq("ldc.i8", Int64, 0, 1),
    seq("dup", NoOperand, 1, 2),
    seq("pop", NoOperand, 1, 0),
    // object model
    call("call"),
    call("callvirt"),
    call("newobj"),
    seq("ldstr", Token, 0, 1),
    seq("ldfld", Token, 1, 1),
    seq("stfld", Token, 2, 0),
    seq("ldsfld", Token, 0, 1),
    seq("stsfld", Token, 1, 0),
    seq("castclass", Token, 1, 1),
    seq("isinst", Token, 1, 1),
    seq("newarr", Token, 1, 1),
    seq("box", Token, 1, 1),
    seq("unbox.any", Token, 1, 1),
    seq("ldtoken", Token, 0, 1),
    seq("ldftn", Token, 0, 1),
    seq("ldelema", Token, 2, 1),
    seq("initobj", Token, 1, 0),
    seq("sizeof", Token, 0, 1),
    // arithmetic, logic and comparison
    seq("add", NoOperand, 2, 1),
    seq("sub", NoOperand, 2, 1),
    seq("mul", NoOperand, 2, 1),
    seq("div", NoOperand, 2, 1),
    seq("rem", NoOperand, 2, 1),
    seq("and", NoOperand, 2, 1),
    seq("or", NoOperand, 2, 1),
    seq("xor", NoOperand, 2, 1),
    seq("shl", NoOperand, 2, 1),
    seq("shr", NoOperand, 2, 1),
    seq("neg", NoOperand, 1, 1),
    seq("not", NoOperand, 1, 1),
    seq("conv.i4", NoOperand, 1, 1),
    seq("conv.i8", NoOperand, 1, 1),
    seq("ceq", NoOperand, 2, 1),
    seq("cgt", NoOperand, 2, 1),
    seq("clt", NoOperand, 2, 1),
    // arrays and indirection
    seq("ldlen", NoOperand, 1, 1),
    seq("ldelem.ref", NoOperand, 2, 1),
    seq("stelem.ref", NoOperand, 3, 0),
    seq("ldind.i4", NoOperand, 1, 1),
    seq("stind.i4", NoOperand, 2, 0),
    // control flow
    CanonicalSignature::new("ret", NoOperand, FlowType::Return, None),
    CanonicalSignature::new(
        "br",
        OperandShape::Branch,
        FlowType::UnconditionalBranch,
        Some(StackBehavior::new(0, 0)),
    ),
    cond("brfalse", 1),
    cond("brtrue", 1),
    cond("beq", 2),
    cond("bge", 2),
    cond("bgt", 2),
    cond("ble", 2),
    cond("blt", 2),
    cond("bne.un", 2),
    CanonicalSignature::new(
        "switch",
        OperandShape::Switch,
        FlowType::Switch,
        Some(StackBehavior::new(1, 0)),
    ),
    CanonicalSignature::new(
        "throw",
        NoOperand,
        FlowType::Throw,
        Some(StackBehavior::new(1, 0)),
    ),
    CanonicalSignature::new(
        "leave",
        OperandShape::Branch,
        FlowType::Leave,
        Some(StackBehavior::new(0, 0)),
    )
    .with_region(RegionRequirement::ExitsProtectedRegion),
    CanonicalSignature::new(
        "endfinally",
        NoOperand,
        FlowType::EndFinally,
        Some(StackBehavior::new(0, 0)),
    )
    .with_region(RegionRequirement::InsideHandler),
];

/// A versioned set of canonical signatures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureTable {
    version: u32,
    signatures: Vec<CanonicalSignature>,
}

impl SignatureTable {
    /// Create a table from explicit signatures.
    #[must_use]
    pub fn new(version: u32, signatures: Vec<CanonicalSignature>) -> Self {
        SignatureTable {
            version,
            signatures,
        }
    }

    /// The built-in CIL subset, version 1.
    #[must_use]
    pub fn cil() -> Self {
        Self::new(1, CIL_SIGNATURES.to_vec())
    }

    /// Table version.
    #[must_use]
    pub fn version(&self) -> u32 {
        self.version
    }

    /// All signatures in table order.
    #[must_use]
    pub fn signatures(&self) -> &[CanonicalSignature] {
        &self.signatures
    }

    /// Look up a signature by mnemonic.
    #[must_use]
    pub fn get(&self, mnemonic: &str) -> Option<&CanonicalSignature> {
        self.signatures
            .iter()
            .find(|signature| signature.mnemonic == mnemonic)
    }

    /// Number of signatures.
    #[must_use]
    pub fn len(&self) -> usize {
        self.signatures.len()
    }

    /// Returns `true` for an empty table.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.signatures.is_empty()
    }
}

impl Default for SignatureTable {
    fn default() -> Self {
        Self::cil()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn cil_table() {
        let table = SignatureTable::cil();
        assert_eq!(table.version(), 1);
        assert_eq!(table.len(), 66);

        let mnemonics: HashSet<_> = table.signatures().iter().map(|s| s.mnemonic).collect();
        assert_eq!(mnemonics.len(), table.len());

        let br = table.get("br").unwrap();
        assert_eq!(br.flow, FlowType::UnconditionalBranch);
        assert_eq!(br.shape, OperandShape::Branch);
        assert!(!br.flow.falls_through());

        assert!(!table.get("nop").unwrap().unique);
        assert_eq!(
            table.get("leave").unwrap().region,
            RegionRequirement::ExitsProtectedRegion
        );
        assert_eq!(table.get("call").unwrap().stack, None);
        assert_eq!(table.get("stelem.ref").unwrap().stack.unwrap().net_effect, -3);
        assert!(table.get("calli").is_none());
    }
}
