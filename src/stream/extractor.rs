use std::collections::HashMap;

use crate::{
    file::parser::Parser,
    stream::{
        format::{checksum, FormatVersion, ResourceFlags, DIRECTORY_ENTRY_SIZE, MAGIC},
        MethodEntry, MethodKey, RawInstructionStream, Resource,
    },
    token::Token,
    Result,
};

/// Parsed resource header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceHeader {
    /// Layout version, selects the decoding transform
    pub version: FormatVersion,
    /// Optional layout features
    pub flags: ResourceFlags,
    /// Number of methods in the directory
    pub method_count: usize,
    /// Absolute offset of the first directory entry
    pub directory_start: usize,
    /// Absolute offset of the body section
    pub body_start: usize,
}

/// Decodes the obfuscator's resource into per-method instruction streams.
///
/// Construction validates the header and the directory once; afterwards the extractor is
/// immutable and can be shared across worker threads. [`StreamExtractor::method_entries`]
/// walks the directory lazily and can be restarted any number of times, always yielding
/// the entries in resource order.
pub struct StreamExtractor {
    resource: Resource,
    header: ResourceHeader,
    index: HashMap<MethodKey, usize>,
}

impl StreamExtractor {
    /// Parse the header and directory of `resource`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Format`] for a bad magic, unknown flag bits, a directory that
    /// does not fit into the resource, or duplicate method keys, and
    /// [`crate::Error::UnsupportedVersion`] for unknown layout versions.
    pub fn new(resource: Resource) -> Result<StreamExtractor> {
        let header = Self::parse_header(resource.data())?;

        let mut extractor = StreamExtractor {
            resource,
            header,
            index: HashMap::with_capacity(header.method_count),
        };

        let mut index = HashMap::with_capacity(header.method_count);
        for entry in extractor.method_entries() {
            if index.insert(entry.key, entry.offset).is_some() {
                return Err(format_error!("Duplicate directory entry for {}", entry.key));
            }
        }
        extractor.index = index;

        log::debug!(
            "resource {} with {} methods, checksums: {}",
            header.version,
            header.method_count,
            header.flags.contains(ResourceFlags::CHECKSUM)
        );

        Ok(extractor)
    }

    fn parse_header(data: &[u8]) -> Result<ResourceHeader> {
        let mut parser = Parser::new(data);

        let magic = parser
            .read_bytes(MAGIC.len())
            .map_err(|_| format_error!("Resource too short for header - {} bytes", data.len()))?;
        if magic != MAGIC {
            return Err(format_error!("Invalid resource magic - {:02X?}", magic));
        }

        let version = FormatVersion::from_raw(
            parser
                .read_le::<u16>()
                .map_err(|_| format_error!("Truncated resource header"))?,
        )?;

        let raw_flags = parser
            .read_le::<u16>()
            .map_err(|_| format_error!("Truncated resource header"))?;
        let Some(flags) = ResourceFlags::from_bits(raw_flags) else {
            return Err(format_error!("Unknown resource flags - 0x{:04X}", raw_flags));
        };

        let method_count = parser
            .read_7bit_encoded_int()
            .map_err(|_| format_error!("Invalid method count prefix"))? as usize;

        let directory_start = parser.pos();
        let Some(directory_len) = method_count.checked_mul(DIRECTORY_ENTRY_SIZE) else {
            return Err(format_error!("Method count overflow - {}", method_count));
        };
        if directory_len > parser.remaining() {
            return Err(format_error!(
                "Directory of {} methods exceeds resource size {}",
                method_count,
                data.len()
            ));
        }

        Ok(ResourceHeader {
            version,
            flags,
            method_count,
            directory_start,
            body_start: directory_start + directory_len,
        })
    }

    /// The parsed header.
    #[must_use]
    pub fn header(&self) -> &ResourceHeader {
        &self.header
    }

    /// Number of methods in the resource.
    #[must_use]
    pub fn len(&self) -> usize {
        self.header.method_count
    }

    /// Returns `true` if the directory is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.header.method_count == 0
    }

    /// Returns `true` if the resource contains `key`.
    #[must_use]
    pub fn contains(&self, key: &MethodKey) -> bool {
        self.index.contains_key(key)
    }

    /// Lazily enumerate all `(MethodKey, offset)` pairs in resource order.
    ///
    /// Every call starts a fresh walk over the directory.
    #[must_use]
    pub fn method_entries(&self) -> MethodEntries<'_> {
        MethodEntries {
            directory: &self.resource.data()[self.header.directory_start..self.header.body_start],
            position: 0,
        }
    }

    /// Decode the instruction stream of `key`.
    ///
    /// The same `(resource, key)` always yields the same bytes.
    ///
    /// # Errors
    /// Returns [`crate::Error::Format`] if the key is not in the directory, the length prefix
    /// is invalid, the body is truncated or the checksum does not match.
    pub fn extract(&self, key: &MethodKey) -> Result<RawInstructionStream> {
        let Some(&offset) = self.index.get(key) else {
            return Err(format_error!("Method {} not present in resource", key));
        };

        self.extract_entry(&MethodEntry { key: *key, offset })
    }

    /// Decode the instruction stream at a directory entry.
    ///
    /// # Errors
    /// See [`StreamExtractor::extract`].
    pub fn extract_entry(&self, entry: &MethodEntry) -> Result<RawInstructionStream> {
        let data = self.resource.data();
        let Some(start) = self.header.body_start.checked_add(entry.offset) else {
            return Err(format_error!("Body offset overflow for {}", entry.key));
        };

        let mut parser = Parser::new(data);
        parser.seek(start).map_err(|_| {
            format_error!(
                "Body offset 0x{:X} of {} outside resource",
                entry.offset,
                entry.key
            )
        })?;

        let length = parser
            .read_7bit_encoded_int()
            .map_err(|_| format_error!("Invalid length prefix for {}", entry.key))?
            as usize;

        let expected = if self.header.flags.contains(ResourceFlags::CHECKSUM) {
            Some(
                parser
                    .read_le::<u32>()
                    .map_err(|_| format_error!("Truncated checksum for {}", entry.key))?,
            )
        } else {
            None
        };

        let encoded = parser.read_bytes(length).map_err(|_| {
            format_error!(
                "Truncated stream for {} - declared {} bytes, {} available",
                entry.key,
                length,
                parser.remaining()
            )
        })?;

        let plain = self.header.version.decode(entry.key.seed, encoded);

        if let Some(expected) = expected {
            let actual = checksum(&plain);
            if actual != expected {
                return Err(format_error!(
                    "Checksum mismatch for {} - expected 0x{:08X}, got 0x{:08X}",
                    entry.key,
                    expected,
                    actual
                ));
            }
        }

        Ok(RawInstructionStream::new(entry.key, plain))
    }
}

impl std::fmt::Debug for StreamExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamExtractor")
            .field("header", &self.header)
            .finish_non_exhaustive()
    }
}

/// Restartable directory walk, see [`StreamExtractor::method_entries`].
#[derive(Debug, Clone)]
pub struct MethodEntries<'a> {
    directory: &'a [u8],
    position: usize,
}

impl Iterator for MethodEntries<'_> {
    type Item = MethodEntry;

    fn next(&mut self) -> Option<MethodEntry> {
        let mut parser = Parser::new(self.directory);
        parser.seek(self.position).ok()?;

        // The directory length was validated against the resource on construction.
        let token = parser.read_le::<u32>().ok()?;
        let seed = parser.read_le::<u32>().ok()?;
        let offset = parser.read_le::<u32>().ok()?;
        self.position = parser.pos();

        Some(MethodEntry {
            key: MethodKey {
                token: Token::new(token),
                seed,
            },
            offset: offset as usize,
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.directory.len() - self.position) / DIRECTORY_ENTRY_SIZE;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for MethodEntries<'_> {}

#[cfg(test)]
mod tests {
    use crate::{
        stream::{FormatVersion, MethodKey, Resource, ResourceBuilder, StreamExtractor},
        Error,
    };

    fn sample(version: FormatVersion, checksums: bool) -> (Vec<MethodKey>, Vec<u8>) {
        let keys = vec![
            MethodKey::new(0x0600_0010, 0x0000_0001),
            MethodKey::new(0x0600_0002, 0xDEAD_BEEF),
            MethodKey::new(0x0600_0007, 0xE123_4567),
        ];
        let blob = ResourceBuilder::new(version)
            .with_checksums(checksums)
            .method(keys[0], vec![0x00, 0x11, 0x22, 0x33])
            .method(keys[1], vec![])
            .method(keys[2], (0..200).collect())
            .build();
        (keys, blob)
    }

    #[test]
    fn enumerates_in_resource_order() {
        let (keys, blob) = sample(FormatVersion::V1, false);
        let extractor = StreamExtractor::new(Resource::from_mem(blob).unwrap()).unwrap();

        assert_eq!(extractor.len(), 3);
        let first: Vec<MethodKey> = extractor.method_entries().map(|e| e.key).collect();
        let second: Vec<MethodKey> = extractor.method_entries().map(|e| e.key).collect();
        assert_eq!(first, keys);
        assert_eq!(first, second);
        assert_eq!(extractor.method_entries().len(), 3);
        assert_eq!(extractor.method_entries().next().unwrap().offset, 0);
    }

    #[test]
    fn extracts_all_versions() {
        for version in [FormatVersion::V1, FormatVersion::V2] {
            for checksums in [false, true] {
                let (keys, blob) = sample(version, checksums);
                let extractor = StreamExtractor::new(Resource::from_mem(blob).unwrap()).unwrap();

                assert_eq!(
                    extractor.extract(&keys[0]).unwrap().data(),
                    &[0x00, 0x11, 0x22, 0x33]
                );
                assert!(extractor.extract(&keys[1]).unwrap().is_empty());
                let long = extractor.extract(&keys[2]).unwrap();
                assert_eq!(long.len(), 200);
                assert_eq!(long.data()[199], 199);
                assert_eq!(long.key(), keys[2]);
            }
        }
    }

    #[test]
    fn extraction_is_deterministic() {
        let (keys, blob) = sample(FormatVersion::V2, true);
        let extractor = StreamExtractor::new(Resource::from_mem(blob).unwrap()).unwrap();
        assert_eq!(
            extractor.extract(&keys[2]).unwrap(),
            extractor.extract(&keys[2]).unwrap()
        );
    }

    #[test]
    fn unknown_key() {
        let (_, blob) = sample(FormatVersion::V1, false);
        let extractor = StreamExtractor::new(Resource::from_mem(blob).unwrap()).unwrap();
        let missing = MethodKey::new(0x0600_0010, 0x0000_0002);
        assert!(!extractor.contains(&missing));
        assert!(matches!(
            extractor.extract(&missing),
            Err(Error::Format { .. })
        ));
    }

    #[test]
    fn bad_magic_and_version() {
        let (_, mut blob) = sample(FormatVersion::V1, false);
        blob[0] = b'X';
        assert!(matches!(
            StreamExtractor::new(Resource::from_mem(blob).unwrap()),
            Err(Error::Format { .. })
        ));

        let (_, mut blob) = sample(FormatVersion::V1, false);
        blob[4] = 9;
        assert!(matches!(
            StreamExtractor::new(Resource::from_mem(blob).unwrap()),
            Err(Error::UnsupportedVersion(9))
        ));

        assert!(matches!(
            StreamExtractor::new(Resource::from_mem(b"EZ".to_vec()).unwrap()),
            Err(Error::Format { .. })
        ));
        assert!(matches!(Resource::from_mem(Vec::new()), Err(Error::Empty)));
    }

    #[test]
    fn unknown_flags_rejected() {
        let (_, mut blob) = sample(FormatVersion::V1, false);
        blob[6] = 0x80;
        assert!(matches!(
            StreamExtractor::new(Resource::from_mem(blob).unwrap()),
            Err(Error::Format { .. })
        ));
    }

    #[test]
    fn truncated_directory() {
        let (_, blob) = sample(FormatVersion::V1, false);
        // header (8) + count (1) + one and a half directory entries
        let truncated = blob[..8 + 1 + 18].to_vec();
        assert!(matches!(
            StreamExtractor::new(Resource::from_mem(truncated).unwrap()),
            Err(Error::Format { .. })
        ));
    }

    #[test]
    fn truncated_body_only_affects_its_method() {
        let (keys, blob) = sample(FormatVersion::V1, false);
        let truncated = blob[..blob.len() - 10].to_vec();
        let extractor = StreamExtractor::new(Resource::from_mem(truncated).unwrap()).unwrap();

        assert!(extractor.extract(&keys[0]).is_ok());
        assert!(extractor.extract(&keys[1]).is_ok());
        assert!(matches!(
            extractor.extract(&keys[2]),
            Err(Error::Format { .. })
        ));
    }

    #[test]
    fn checksum_mismatch() {
        let (keys, mut blob) = sample(FormatVersion::V2, true);
        let last = blob.len() - 1;
        blob[last] ^= 0xFF;
        let extractor = StreamExtractor::new(Resource::from_mem(blob).unwrap()).unwrap();

        let error = extractor.extract(&keys[2]).unwrap_err();
        assert!(error.to_string().contains("Checksum mismatch"));
        assert!(extractor.extract(&keys[0]).is_ok());
    }

    #[test]
    fn duplicate_keys_rejected() {
        let key = MethodKey::new(0x0600_0001, 5);
        let blob = ResourceBuilder::new(FormatVersion::V1)
            .method(key, vec![0x00])
            .method(key, vec![0x01])
            .build();
        assert!(matches!(
            StreamExtractor::new(Resource::from_mem(blob).unwrap()),
            Err(Error::Format { .. })
        ));
    }
}
