//! Memory-mapped file backend.
//!
//! Resource dumps extracted from a protected assembly can be large; mapping them keeps the
//! initial load cheap and lets every worker thread slice into the same pages. After the map
//! is created no further I/O happens, which is what the rest of the pipeline relies on.

use std::{fs, path::Path};

use memmap2::Mmap;

use super::Backend;
use crate::{Error, Result};

/// A read-only memory map over a resource file.
#[derive(Debug)]
pub struct Physical {
    data: Mmap,
}

impl Physical {
    /// Open and map the file at `path`.
    ///
    /// # Errors
    /// Returns [`crate::Error::FileError`] if the file cannot be opened, or
    /// [`crate::Error::Error`] if mapping fails.
    pub fn new(path: impl AsRef<Path>) -> Result<Physical> {
        let file = fs::File::open(path)?;

        #[allow(unsafe_code)]
        // SAFETY: the map is read-only and the file handle is kept alive by the map.
        let mmap = unsafe { Mmap::map(&file) }.map_err(|error| Error::Error(error.to_string()))?;

        Ok(Physical { data: mmap })
    }
}

impl Backend for Physical {
    fn data(&self) -> &[u8] {
        self.data.as_ref()
    }

    fn len(&self) -> usize {
        self.data.len()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn physical_maps_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"EZVM\x01\x00").unwrap();
        file.flush().unwrap();

        let physical = Physical::new(file.path()).unwrap();
        assert_eq!(physical.len(), 6);
        assert_eq!(&physical.data()[..4], b"EZVM");
    }

    #[test]
    fn physical_missing_file() {
        let result = Physical::new("/nonexistent/vmscope/resource.bin");
        assert!(matches!(result, Err(Error::FileError(_))));
    }
}
