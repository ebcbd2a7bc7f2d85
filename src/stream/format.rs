//! Versioned layout constants and the per-method decoding transform.
//!
//! The resource layout is specific to the obfuscator release that produced it. Everything
//! version dependent lives here so the extractor itself stays layout agnostic:
//!
//! - [`FormatVersion`] selects the decoding transform,
//! - [`ResourceFlags`] carries optional layout features,
//! - [`Keystream`] derives the per-method XOR stream from the method seed,
//! - [`checksum`] computes the integrity value stored with each body.

use bitflags::bitflags;
use sha1::{Digest, Sha1};

use crate::{Error, Result};

/// Resource magic, the first four bytes of every protected resource.
pub const MAGIC: [u8; 4] = *b"EZVM";

/// Size of one directory entry: token, seed and body offset.
pub const DIRECTORY_ENTRY_SIZE: usize = 12;

const KEY_SALT: u32 = 0x9E37_79B9;
const ZERO_SEED_STATE: u32 = 0x2545_F491;

bitflags! {
    /// Optional layout features announced in the resource header.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ResourceFlags: u16 {
        /// Each method body carries a checksum of its decoded payload
        const CHECKSUM = 0x0001;
    }
}

/// Layout version of the protected resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumIter, strum::FromRepr)]
#[repr(u16)]
pub enum FormatVersion {
    /// Keystream XOR
    V1 = 1,
    /// Keystream XOR followed by a seed-dependent bit rotation
    V2 = 2,
}

impl FormatVersion {
    /// Resolve a raw header version.
    ///
    /// # Errors
    /// Returns [`crate::Error::UnsupportedVersion`] for unknown versions.
    pub fn from_raw(raw: u16) -> Result<Self> {
        FormatVersion::from_repr(raw).ok_or(Error::UnsupportedVersion(raw))
    }

    /// The raw value written to the header.
    #[must_use]
    pub fn raw(self) -> u16 {
        self as u16
    }

    /// Decode an encoded method payload with the method's seed.
    #[must_use]
    pub fn decode(self, seed: u32, encoded: &[u8]) -> Vec<u8> {
        let rotation = Self::rotation(seed);
        encoded
            .iter()
            .zip(Keystream::new(seed))
            .map(|(&byte, key)| match self {
                FormatVersion::V1 => byte ^ key,
                FormatVersion::V2 => byte.rotate_right(rotation) ^ key,
            })
            .collect()
    }

    /// Encode a plain method payload with the method's seed; inverse of [`Self::decode`].
    #[must_use]
    pub fn encode(self, seed: u32, plain: &[u8]) -> Vec<u8> {
        let rotation = Self::rotation(seed);
        plain
            .iter()
            .zip(Keystream::new(seed))
            .map(|(&byte, key)| match self {
                FormatVersion::V1 => byte ^ key,
                FormatVersion::V2 => (byte ^ key).rotate_left(rotation),
            })
            .collect()
    }

    fn rotation(seed: u32) -> u32 {
        (seed >> 29) & 7
    }
}

/// Per-method keystream: xorshift32 seeded from the method seed.
///
/// The stream is infinite; callers zip it against the payload.
#[derive(Debug, Clone)]
pub struct Keystream {
    state: u32,
}

impl Keystream {
    /// Create the keystream for `seed`.
    #[must_use]
    pub fn new(seed: u32) -> Self {
        let state = seed ^ KEY_SALT;
        Keystream {
            state: if state == 0 { ZERO_SEED_STATE } else { state },
        }
    }
}

impl Iterator for Keystream {
    type Item = u8;

    fn next(&mut self) -> Option<u8> {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.state = x;
        Some((x >> 8) as u8)
    }
}

/// Integrity value of a decoded payload: the first four bytes of its SHA-1, little-endian.
#[must_use]
pub fn checksum(plain: &[u8]) -> u32 {
    let digest = Sha1::digest(plain);
    u32::from_le_bytes([digest[0], digest[1], digest[2], digest[3]])
}
