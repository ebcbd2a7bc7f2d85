use std::fmt;

use crate::token::Token;

/// Identifies one virtualized method inside the protected resource.
///
/// The token is the method's identifier in the protected assembly, the seed is the
/// per-method decoding key stored next to it in the resource directory. Both are needed
/// to decode the stream, and together they are unique within one resource.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MethodKey {
    /// Method identifier (a MethodDef token in the protected assembly)
    pub token: Token,
    /// Decoding key / keystream seed
    pub seed: u32,
}

impl MethodKey {
    /// Create a new key from a raw token value and a seed.
    #[must_use]
    pub fn new(token: u32, seed: u32) -> Self {
        MethodKey {
            token: Token::new(token),
            seed,
        }
    }
}

impl fmt::Debug for MethodKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MethodKey({}, seed: 0x{:08x})", self.token, self.seed)
    }
}

impl fmt::Display for MethodKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{:08x}", self.token, self.seed)
    }
}

/// One directory entry: a method and where its encoded body starts, relative to the body
/// section of the resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodEntry {
    /// The method this entry belongs to
    pub key: MethodKey,
    /// Offset of the encoded body, relative to the start of the body section
    pub offset: usize,
}

/// The decoded instruction stream of one method.
///
/// Produced by [`crate::stream::StreamExtractor::extract`]; never modified afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawInstructionStream {
    key: MethodKey,
    data: Vec<u8>,
}

impl RawInstructionStream {
    /// Wrap already decoded bytes.
    #[must_use]
    pub fn new(key: MethodKey, data: Vec<u8>) -> Self {
        RawInstructionStream { key, data }
    }

    /// The method this stream belongs to.
    #[must_use]
    pub fn key(&self) -> MethodKey {
        self.key
    }

    /// The decoded bytes.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Length of the decoded stream.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` for an empty stream.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
