//! Metadata tokens referenced from virtualized code.
//!
//! Virtualized methods keep referring to the protected assembly's metadata: call targets,
//! field accesses, type operands and the virtualized method itself are all identified by
//! ECMA-335 tokens (`table << 24 | row`). [`Token`] wraps the raw value and offers the
//! plausibility check the operand-shape heuristics use to tell tokens from plain integers.

use std::fmt;

/// Metadata table ids that virtualized code commonly references.
const REFERENCED_TABLES: [u8; 9] = [
    0x01, // TypeRef
    0x02, // TypeDef
    0x04, // Field
    0x06, // MethodDef
    0x0A, // MemberRef
    0x11, // StandAloneSig
    0x1B, // TypeSpec
    0x2B, // MethodSpec
    0x70, // UserString
];

/// A 32-bit metadata token.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Token(pub u32);

impl Token {
    /// Create a token from its raw value.
    #[must_use]
    pub fn new(value: u32) -> Self {
        Token(value)
    }

    /// The raw 32-bit value.
    #[must_use]
    pub fn value(&self) -> u32 {
        self.0
    }

    /// The table id (upper 8 bits).
    #[must_use]
    pub fn table(&self) -> u8 {
        (self.0 >> 24) as u8
    }

    /// The row index (lower 24 bits).
    #[must_use]
    pub fn row(&self) -> u32 {
        self.0 & 0x00FF_FFFF
    }

    /// Returns `true` for the null token.
    #[must_use]
    pub fn is_null(&self) -> bool {
        self.0 == 0
    }

    /// Returns `true` if the value is shaped like a reference into a metadata table that
    /// instruction operands point to: a known table id and a non-zero row.
    #[must_use]
    pub fn is_plausible_reference(&self) -> bool {
        self.row() != 0 && REFERENCED_TABLES.contains(&self.table())
    }
}

impl From<u32> for Token {
    fn from(value: u32) -> Self {
        Token(value)
    }
}

impl From<Token> for u32 {
    fn from(token: Token) -> Self {
        token.0
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Token(0x{:08x}, table: 0x{:02x}, row: {})",
            self.0,
            self.table(),
            self.row()
        )
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_parts() {
        let token = Token::new(0x0600_0001);
        assert_eq!(token.table(), 0x06);
        assert_eq!(token.row(), 1);
        assert!(!token.is_null());
        assert_eq!(u32::from(token), 0x0600_0001);
        assert_eq!(format!("{token}"), "0x06000001");
    }

    #[test]
    fn plausible_references() {
        assert!(Token(0x0A00_0010).is_plausible_reference());
        assert!(Token(0x7000_0001).is_plausible_reference());
        assert!(!Token(0x0600_0000).is_plausible_reference());
        assert!(!Token(0x0000_0042).is_plausible_reference());
        assert!(!Token(0xFFFF_FFFF).is_plausible_reference());
    }
}
