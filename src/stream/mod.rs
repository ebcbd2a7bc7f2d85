//! Extraction of per-method instruction streams from the protected resource.
//!
//! Virtualized methods are stored in a single embedded resource: a small header, a directory
//! that maps every method to its decoding seed and body offset, and the encoded bodies. This
//! module turns that blob into independent [`RawInstructionStream`]s, one per method, which
//! the [`crate::disassembler`] consumes.
//!
//! # Architecture
//!
//! - [`Resource`] owns the blob (memory or memory-mapped file)
//! - [`StreamExtractor`] validates the header and directory once, then decodes methods on
//!   demand; it is immutable after construction and freely shareable between threads
//! - [`FormatVersion`] holds the version dependent decoding transform
//! - [`ResourceBuilder`] writes the same layout, for fixtures and round trips
//!
//! # Layout
//!
//! | Field        | Encoding                                                          |
//! |--------------|-------------------------------------------------------------------|
//! | magic        | `"EZVM"`                                                          |
//! | version      | `u16`                                                             |
//! | flags        | `u16`, see [`ResourceFlags`]                                      |
//! | count        | 7-bit encoded                                                     |
//! | directory    | `count` × (`token: u32`, `seed: u32`, `offset: u32`)              |
//! | body         | 7-bit length, optional `u32` checksum, encoded payload            |
//!
//! # Examples
//!
//! ```rust,no_run
//! use vmscope::stream::{Resource, StreamExtractor};
//!
//! let extractor = StreamExtractor::new(Resource::from_file("resource.bin")?)?;
//! for entry in extractor.method_entries() {
//!     let stream = extractor.extract(&entry.key)?;
//!     println!("{}: {} bytes", entry.key, stream.len());
//! }
//! # Ok::<(), vmscope::Error>(())
//! ```

mod builder;
mod extractor;
mod format;
mod key;
mod resource;

pub use builder::ResourceBuilder;
pub use extractor::{MethodEntries, ResourceHeader, StreamExtractor};
pub use format::{checksum, FormatVersion, Keystream, ResourceFlags, DIRECTORY_ENTRY_SIZE, MAGIC};
pub use key::{MethodEntry, MethodKey, RawInstructionStream};
pub use resource::Resource;
