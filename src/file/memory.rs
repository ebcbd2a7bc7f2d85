//! In-memory backend for resource blobs that are already loaded.

use super::Backend;

/// Owns a resource blob in memory.
#[derive(Debug)]
pub struct Memory {
    data: Vec<u8>,
}

impl Memory {
    /// Wrap an owned buffer.
    pub fn new(data: Vec<u8>) -> Memory {
        Memory { data }
    }
}

impl Backend for Memory {
    fn data(&self) -> &[u8] {
        self.data.as_slice()
    }

    fn len(&self) -> usize {
        self.data.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_holds_buffer() {
        let mut data = vec![0xCC_u8; 64];
        data[10..14].copy_from_slice(&[0xBB; 4]);

        let memory = Memory::new(data);

        assert_eq!(memory.len(), 64);
        assert_eq!(&memory.data()[10..14], &[0xBB; 4]);
    }
}
