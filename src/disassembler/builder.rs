use crate::{
    disassembler::RegionKind,
    file::parser::write_7bit_encoded_int,
};

/// Assembles decoded method streams in the layout [`crate::disassembler::decode_method`]
/// reads.
///
/// Offsets passed to [`MethodBodyBuilder::branch`] and [`MethodBodyBuilder::switch`] are
/// absolute code offsets; the builder encodes them relative to the end of the instruction.
///
/// # Examples
///
/// ```rust
/// use vmscope::disassembler::MethodBodyBuilder;
///
/// let mut body = MethodBodyBuilder::new();
/// let start = body.pos();
/// body.op(0x01).branch(0x07, start);
/// assert_eq!(body.build(), vec![0x00, 0x01, 0x07, 0xFA, 0xFF, 0xFF, 0xFF]);
/// ```
#[derive(Debug, Clone, Default)]
pub struct MethodBodyBuilder {
    regions: Vec<(RegionKind, u32, u32, u32, u32)>,
    code: Vec<u8>,
}

impl MethodBodyBuilder {
    /// Start an empty method.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current code offset, i.e. the offset of the next instruction.
    #[must_use]
    pub fn pos(&self) -> usize {
        self.code.len()
    }

    /// Add an exception region.
    pub fn region(
        &mut self,
        kind: RegionKind,
        try_start: u32,
        try_len: u32,
        handler_start: u32,
        handler_len: u32,
    ) -> &mut Self {
        self.regions
            .push((kind, try_start, try_len, handler_start, handler_len));
        self
    }

    /// Instruction without operand.
    pub fn op(&mut self, opcode: u8) -> &mut Self {
        self.code.push(opcode);
        self
    }

    /// Instruction with an 8-bit operand.
    pub fn op_u8(&mut self, opcode: u8, value: u8) -> &mut Self {
        self.code.push(opcode);
        self.code.push(value);
        self
    }

    /// Instruction with a 32-bit operand, also used for tokens.
    pub fn op_i32(&mut self, opcode: u8, value: i32) -> &mut Self {
        self.code.push(opcode);
        self.code.extend_from_slice(&value.to_le_bytes());
        self
    }

    /// Instruction with a metadata token operand.
    pub fn op_token(&mut self, opcode: u8, token: u32) -> &mut Self {
        self.code.push(opcode);
        self.code.extend_from_slice(&token.to_le_bytes());
        self
    }

    /// Instruction with a 64-bit operand.
    pub fn op_i64(&mut self, opcode: u8, value: i64) -> &mut Self {
        self.code.push(opcode);
        self.code.extend_from_slice(&value.to_le_bytes());
        self
    }

    /// Branch to the absolute code offset `target`.
    pub fn branch(&mut self, opcode: u8, target: usize) -> &mut Self {
        let end = self.pos() + 5;
        self.op_i32(opcode, relative(end, target))
    }

    /// Switch over the absolute code offsets `targets`.
    pub fn switch(&mut self, opcode: u8, targets: &[usize]) -> &mut Self {
        let end = self.pos() + 5 + targets.len() * 4;
        self.code.push(opcode);
        self.code
            .extend_from_slice(&u32::try_from(targets.len()).unwrap_or(u32::MAX).to_le_bytes());
        for &target in targets {
            self.code
                .extend_from_slice(&relative(end, target).to_le_bytes());
        }
        self
    }

    /// Raw bytes appended to the code, for malformed streams.
    pub fn raw(&mut self, bytes: &[u8]) -> &mut Self {
        self.code.extend_from_slice(bytes);
        self
    }

    /// Serialize header, regions and code.
    #[must_use]
    pub fn build(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + self.regions.len() * 17 + self.code.len());
        if self.regions.is_empty() {
            out.push(0x00);
        } else {
            out.push(0x01);
            write_7bit_encoded_int(
                &mut out,
                u32::try_from(self.regions.len()).unwrap_or(u32::MAX),
            );
            for (kind, try_start, try_len, handler_start, handler_len) in &self.regions {
                out.push(*kind as u8);
                for value in [try_start, try_len, handler_start, handler_len] {
                    out.extend_from_slice(&value.to_le_bytes());
                }
            }
        }
        out.extend_from_slice(&self.code);
        out
    }
}

fn relative(end: usize, target: usize) -> i32 {
    let delta = target as i64 - end as i64;
    i32::try_from(delta).unwrap_or(i32::MAX)
}
