use crate::{
    file::parser::write_7bit_encoded_int,
    stream::{
        format::{checksum, FormatVersion, ResourceFlags, DIRECTORY_ENTRY_SIZE, MAGIC},
        MethodKey,
    },
};

/// Produces protected resources in the layout [`crate::stream::StreamExtractor`] reads.
///
/// Methods are written in insertion order, which is also the order the extractor
/// enumerates them in.
///
/// # Examples
///
/// ```rust
/// use vmscope::stream::{FormatVersion, MethodKey, Resource, ResourceBuilder, StreamExtractor};
///
/// let key = MethodKey::new(0x0600_0001, 0x1337);
/// let blob = ResourceBuilder::new(FormatVersion::V2)
///     .with_checksums(true)
///     .method(key, vec![0x00, 0x2A])
///     .build();
///
/// let extractor = StreamExtractor::new(Resource::from_mem(blob)?)?;
/// assert_eq!(extractor.extract(&key)?.data(), &[0x00, 0x2A]);
/// # Ok::<(), vmscope::Error>(())
/// ```
#[derive(Debug, Clone)]
pub struct ResourceBuilder {
    version: FormatVersion,
    flags: ResourceFlags,
    methods: Vec<(MethodKey, Vec<u8>)>,
}

impl ResourceBuilder {
    /// Start an empty resource of the given layout version.
    #[must_use]
    pub fn new(version: FormatVersion) -> Self {
        ResourceBuilder {
            version,
            flags: ResourceFlags::empty(),
            methods: Vec::new(),
        }
    }

    /// Toggle per-method checksums.
    #[must_use]
    pub fn with_checksums(mut self, enabled: bool) -> Self {
        self.flags.set(ResourceFlags::CHECKSUM, enabled);
        self
    }

    /// Append a method with its plain (decoded) stream.
    #[must_use]
    pub fn method(mut self, key: MethodKey, plain: Vec<u8>) -> Self {
        self.methods.push((key, plain));
        self
    }

    /// Serialize the resource.
    #[must_use]
    pub fn build(&self) -> Vec<u8> {
        let mut bodies = Vec::new();
        let mut directory = Vec::with_capacity(self.methods.len() * DIRECTORY_ENTRY_SIZE);

        for (key, plain) in &self.methods {
            directory.extend_from_slice(&key.token.value().to_le_bytes());
            directory.extend_from_slice(&key.seed.to_le_bytes());
            directory.extend_from_slice(&len_u32(bodies.len()).to_le_bytes());

            write_7bit_encoded_int(&mut bodies, len_u32(plain.len()));
            if self.flags.contains(ResourceFlags::CHECKSUM) {
                bodies.extend_from_slice(&checksum(plain).to_le_bytes());
            }
            bodies.extend_from_slice(&self.version.encode(key.seed, plain));
        }

        let mut out = Vec::with_capacity(16 + directory.len() + bodies.len());
        out.extend_from_slice(&MAGIC);
        out.extend_from_slice(&self.version.raw().to_le_bytes());
        out.extend_from_slice(&self.flags.bits().to_le_bytes());
        write_7bit_encoded_int(&mut out, len_u32(self.methods.len()));
        out.extend_from_slice(&directory);
        out.extend_from_slice(&bodies);
        out
    }
}

fn len_u32(len: usize) -> u32 {
    u32::try_from(len).unwrap_or(u32::MAX)
}
