use std::path::Path;

use crate::{
    file::{memory::Memory, physical::Physical, Backend},
    Error, Result,
};

/// The protected resource blob, backed by memory or a mapped file.
///
/// Loading is the only I/O the pipeline performs; everything after works on the bytes
/// exposed by [`Resource::data`].
pub struct Resource {
    data: Box<dyn Backend>,
}

impl Resource {
    /// Map a resource dump from disk.
    ///
    /// # Errors
    /// Returns [`crate::Error::FileError`] if the file cannot be read and
    /// [`crate::Error::Empty`] for an empty file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Resource> {
        Self::load(Physical::new(path)?)
    }

    /// Take ownership of a resource already in memory.
    ///
    /// # Errors
    /// Returns [`crate::Error::Empty`] for an empty buffer.
    pub fn from_mem(data: Vec<u8>) -> Result<Resource> {
        Self::load(Memory::new(data))
    }

    fn load<T: Backend + 'static>(data: T) -> Result<Resource> {
        if data.len() == 0 {
            return Err(Error::Empty);
        }

        Ok(Resource {
            data: Box::new(data),
        })
    }

    /// The complete resource bytes.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        self.data.data()
    }

    /// Resource size in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Always `false`; empty resources are rejected on load.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.len() == 0
    }
}

impl std::fmt::Debug for Resource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resource")
            .field("len", &self.len())
            .finish()
    }
}
