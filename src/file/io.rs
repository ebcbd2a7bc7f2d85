//! Bounds-checked little-endian reads over byte buffers.
//!
//! Every integer in the protected resource and in decoded method streams is stored
//! little-endian. This module provides the [`crate::file::io::VmIO`] trait for the primitive
//! integer types used by those layouts and the cursor-advancing helper
//! [`crate::file::io::read_le_at`] that the [`crate::file::parser::Parser`] is built on.
//!
//! # Examples
//!
//! ```rust
//! use vmscope::file::io::read_le_at;
//!
//! let data = [0x01, 0x00, 0x00, 0x00, 0xFF];
//! let mut offset = 0;
//! let value: u32 = read_le_at(&data, &mut offset)?;
//! assert_eq!(value, 1);
//! assert_eq!(offset, 4);
//! # Ok::<(), vmscope::Error>(())
//! ```

use crate::Result;

/// Primitive integer types that can be decoded from little-endian bytes.
///
/// Each implementation names the fixed-size array it is decoded from via `Bytes`,
/// so [`read_le_at`] can slice exactly `size_of::<T>()` bytes and convert them.
pub trait VmIO: Sized {
    /// Byte array representation of this type
    type Bytes: Sized + for<'a> TryFrom<&'a [u8]>;

    /// Read T from a byte buffer in little-endian
    fn from_le_bytes(bytes: Self::Bytes) -> Self;
}

macro_rules! impl_vm_io {
    ($($ty:ty),*) => {
        $(
            impl VmIO for $ty {
                type Bytes = [u8; std::mem::size_of::<$ty>()];

                fn from_le_bytes(bytes: Self::Bytes) -> Self {
                    <$ty>::from_le_bytes(bytes)
                }
            }
        )*
    };
}

impl_vm_io!(u8, i8, u16, i16, u32, i32, u64, i64);

/// Reads a `T` at `offset` and advances the offset past it.
///
/// # Errors
///
/// Returns [`crate::Error::OutOfBounds`] if fewer than `size_of::<T>()` bytes remain; the
/// offset is left untouched in that case.
pub fn read_le_at<T: VmIO>(data: &[u8], offset: &mut usize) -> Result<T> {
    let type_len = std::mem::size_of::<T>();
    let Some(end) = offset.checked_add(type_len) else {
        return Err(out_of_bounds_error!());
    };
    if end > data.len() {
        return Err(out_of_bounds_error!());
    }

    let Ok(read) = data[*offset..end].try_into() else {
        return Err(out_of_bounds_error!());
    };

    *offset = end;

    Ok(T::from_le_bytes(read))
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_BUFFER: [u8; 8] = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08];

    fn read<T: VmIO>(data: &[u8]) -> T {
        read_le_at(data, &mut 0).unwrap()
    }

    #[test]
    fn read_widths() {
        assert_eq!(read::<u8>(&TEST_BUFFER), 0x01);
        assert_eq!(read::<u16>(&TEST_BUFFER), 0x0201);
        assert_eq!(read::<u32>(&TEST_BUFFER), 0x0403_0201);
        assert_eq!(read::<u64>(&TEST_BUFFER), 0x0807_0605_0403_0201);
    }

    #[test]
    fn read_signed() {
        let data = [0xFE, 0xFF, 0xFF, 0xFF];
        assert_eq!(read::<i8>(&data), -2);
        assert_eq!(read::<i16>(&data), -2);
        assert_eq!(read::<i32>(&data), -2);
    }

    #[test]
    fn read_at_advances() {
        let mut offset = 2;
        let value = read_le_at::<u32>(&TEST_BUFFER, &mut offset).unwrap();
        assert_eq!(value, 0x0605_0403);
        assert_eq!(offset, 6);
    }

    #[test]
    fn read_out_of_bounds_keeps_offset() {
        let mut offset = 6;
        assert!(read_le_at::<u32>(&TEST_BUFFER, &mut offset).is_err());
        assert_eq!(offset, 6);

        let mut offset = usize::MAX;
        assert!(read_le_at::<u8>(&TEST_BUFFER, &mut offset).is_err());
    }
}
