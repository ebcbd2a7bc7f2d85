//! Cursor-based byte stream parser for resource and instruction decoding.
//!
//! This module provides the [`crate::file::parser::Parser`] type, a bounds-checked cursor over a
//! byte slice. Both the resource directory walk in [`crate::stream`] and the instruction decoder
//! in [`crate::disassembler`] are built on it, so every overrun surfaces as an
//! [`crate::Error::OutOfBounds`] rather than a panic.
//!
//! # Key Components
//!
//! - [`crate::file::parser::Parser::seek`] / [`crate::file::parser::Parser::advance_by`] - Navigation
//! - [`crate::file::parser::Parser::read_le`] - Read primitive integers (little-endian)
//! - [`crate::file::parser::Parser::read_7bit_encoded_int`] - Read 7-bit encoded lengths and counts
//! - [`crate::file::parser::Parser::read_bytes`] - Borrow a raw byte range
//!
//! # Usage Examples
//!
//! ```rust
//! use vmscope::Parser;
//!
//! let data = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08];
//! let mut parser = Parser::new(&data);
//!
//! let first = parser.read_le::<u32>()?;
//! assert_eq!(first, 0x04030201);
//!
//! parser.seek(6)?;
//! let last_bytes = parser.read_le::<u16>()?;
//! assert_eq!(last_bytes, 0x0807);
//! # Ok::<(), vmscope::Error>(())
//! ```

use crate::{
    file::io::{read_le_at, VmIO},
    Result,
};

/// A bounds-checked binary cursor.
///
/// `Parser` keeps an internal position and refuses any read that would cross the end of
/// the underlying slice. It never owns the data, so it can be created cheaply for every
/// method stream.
pub struct Parser<'a> {
    /// The binary data being parsed
    data: &'a [u8],
    /// Current position within the data buffer
    position: usize,
}

impl<'a> Parser<'a> {
    /// Create a new `Parser` positioned at the start of `data`.
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Parser { data, position: 0 }
    }

    /// Total length of the underlying data.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if the underlying data is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns `true` while the cursor has not reached the end of the data.
    #[must_use]
    pub fn has_more_data(&self) -> bool {
        self.position < self.data.len()
    }

    /// Move the cursor to `pos`.
    ///
    /// Seeking to exactly `len()` is allowed and leaves the parser at end-of-data.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if `pos` lies past the end of the data.
    pub fn seek(&mut self, pos: usize) -> Result<()> {
        if pos > self.data.len() {
            return Err(out_of_bounds_error!());
        }

        self.position = pos;
        Ok(())
    }

    /// Advance the cursor by `step` bytes.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the step would cross the end of the data.
    pub fn advance_by(&mut self, step: usize) -> Result<()> {
        match self.position.checked_add(step) {
            Some(end) if end <= self.data.len() => {
                self.position = end;
                Ok(())
            }
            _ => Err(out_of_bounds_error!()),
        }
    }

    /// Current cursor position.
    #[must_use]
    pub fn pos(&self) -> usize {
        self.position
    }

    /// The complete underlying data.
    #[must_use]
    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    /// Number of bytes between the cursor and the end of the data.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.position)
    }

    /// Read a `T` in little-endian order and advance past it.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if not enough bytes remain.
    pub fn read_le<T: VmIO>(&mut self) -> Result<T> {
        read_le_at::<T>(self.data, &mut self.position)
    }

    /// Borrow the next `len` bytes and advance past them.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if fewer than `len` bytes remain.
    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        let start = self.position;
        self.advance_by(len)?;
        Ok(&self.data[start..self.position])
    }

    /// Read a 7-bit encoded unsigned integer (`BinaryWriter.Write7BitEncodedInt` layout).
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] on truncation and [`crate::Error::Format`] if the
    /// encoding does not fit into 32 bits.
    pub fn read_7bit_encoded_int(&mut self) -> Result<u32> {
        let mut value = 0u32;
        let mut shift = 0;

        loop {
            let byte = self.read_le::<u8>()?;

            if shift == 28 && (byte & 0xF0) != 0 {
                return Err(format_error!(
                    "7-bit encoded integer overflow at offset {}",
                    self.position - 1
                ));
            }

            value |= u32::from(byte & 0x7F) << shift;
            shift += 7;

            if (byte & 0x80) == 0 {
                break;
            }
        }

        Ok(value)
    }
}

/// Append `value` as a 7-bit encoded integer, the inverse of
/// [`Parser::read_7bit_encoded_int`].
pub fn write_7bit_encoded_int(out: &mut Vec<u8>, mut value: u32) {
    while value >= 0x80 {
        // Truncation is the point: keep the low seven bits and set the continuation flag.
        #[allow(clippy::cast_possible_truncation)]
        out.push((value as u8) | 0x80);
        value >>= 7;
    }
    #[allow(clippy::cast_possible_truncation)]
    out.push(value as u8);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn navigation() {
        let data = [0x00, 0x01, 0x02, 0x03];
        let mut parser = Parser::new(&data);

        assert_eq!(parser.len(), 4);
        assert!(parser.has_more_data());
        parser.advance_by(3).unwrap();
        assert_eq!(parser.remaining(), 1);

        parser.seek(4).unwrap();
        assert!(!parser.has_more_data());
        assert!(parser.seek(5).is_err());
        assert!(parser.advance_by(1).is_err());
    }

    #[test]
    fn read_bytes_bounds() {
        let data = [0xAA, 0xBB, 0xCC];
        let mut parser = Parser::new(&data);

        assert_eq!(parser.read_bytes(2).unwrap(), &[0xAA, 0xBB]);
        assert!(parser.read_bytes(2).is_err());
        assert_eq!(parser.pos(), 2);
    }

    #[test]
    fn seven_bit_int() {
        for value in [0_u32, 1, 0x7F, 0x80, 0x3FFF, 0x4000, 0x0FFF_FFFF, u32::MAX] {
            let mut buffer = Vec::new();
            write_7bit_encoded_int(&mut buffer, value);
            let mut parser = Parser::new(&buffer);
            assert_eq!(parser.read_7bit_encoded_int().unwrap(), value);
            assert!(!parser.has_more_data());
        }
    }

    #[test]
    fn seven_bit_int_errors() {
        let mut parser = Parser::new(&[0x80, 0x80]);
        assert!(parser.read_7bit_encoded_int().is_err());

        let mut parser = Parser::new(&[0xFF, 0xFF, 0xFF, 0xFF, 0x7F]);
        assert!(matches!(
            parser.read_7bit_encoded_int(),
            Err(crate::Error::Format { .. })
        ));
    }
}
