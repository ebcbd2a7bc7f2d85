//! Input backends and low-level byte access.
//!
//! The protected resource is read through the [`Backend`] trait so the same decoding code
//! works over an owned buffer ([`memory::Memory`]) or a memory-mapped dump on disk
//! ([`physical::Physical`]). Parsing itself happens through [`parser::Parser`], built on the
//! little-endian helpers in [`io`].

pub mod io;
pub mod parser;

pub(crate) mod memory;
pub(crate) mod physical;

/// Read access to the raw bytes of a resource blob.
///
/// Implementations must be `Send + Sync`; the extractor hands out slices to worker
/// threads concurrently.
pub trait Backend: Send + Sync {
    /// Returns the complete data.
    fn data(&self) -> &[u8];

    /// Total data length in bytes.
    fn len(&self) -> usize;
}
