use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, OnceLock,
};

use crossbeam_skiplist::SkipMap;
use dashmap::DashMap;
use sha1::{Digest, Sha1};

use crate::{
    disassembler::{
        decode_method, DisassembledMethod, OperandShapeTable, ShapeRegistry, ShapeSource,
        ShapeVote,
    },
    stream::{MethodKey, RawInstructionStream},
    Error, Result,
};

/// A method that failed to decode. Failures are final for the lifetime of a
/// [`Disassembler`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodFailure {
    /// The method that failed
    pub key: MethodKey,
    /// The rendered decode error
    pub message: String,
}

type Slot = std::result::Result<Arc<DisassembledMethod>, MethodFailure>;

struct CacheEntry {
    fingerprint: [u8; 20],
    cell: OnceLock<Slot>,
}

/// Decodes virtualized methods at most once per [`MethodKey`].
///
/// The cache maps every key to a single-initialization cell. The first caller for a key
/// decodes the stream, concurrent callers for the same key block until that decode is done,
/// and all later callers get the identical [`Arc`]. Failed decodes are cached the same way.
///
/// Each cell also remembers a SHA-1 of the stream it was created from. A later call that
/// passes different bytes for the same key means the extraction is not deterministic, and
/// is reported as [`crate::Error::CacheInvariantViolation`].
///
/// # Examples
///
/// ```rust
/// use std::sync::Arc;
/// use vmscope::{
///     disassembler::{Disassembler, MethodBodyBuilder, OperandShapeTable},
///     stream::{MethodKey, RawInstructionStream},
/// };
///
/// let key = MethodKey::new(0x0600_0001, 42);
/// let mut body = MethodBodyBuilder::new();
/// body.op(0x2A);
/// let raw = RawInstructionStream::new(key, body.build());
///
/// let disassembler = Disassembler::new(OperandShapeTable::default());
/// let first = disassembler.get_or_create(key, &raw)?;
/// let second = disassembler.get_or_create(key, &raw)?;
/// assert!(Arc::ptr_eq(&first, &second));
/// assert_eq!(disassembler.decode_count(), 1);
/// # Ok::<(), vmscope::Error>(())
/// ```
pub struct Disassembler {
    table: OperandShapeTable,
    entries: DashMap<MethodKey, Arc<CacheEntry>>,
    failures: SkipMap<MethodKey, MethodFailure>,
    registry: ShapeRegistry,
    decodes: AtomicUsize,
}

impl Disassembler {
    /// Create an empty cache decoding with `table`.
    #[must_use]
    pub fn new(table: OperandShapeTable) -> Self {
        Disassembler {
            table,
            entries: DashMap::new(),
            failures: SkipMap::new(),
            registry: ShapeRegistry::new(),
            decodes: AtomicUsize::new(0),
        }
    }

    /// Return the disassembly of `key`, decoding `raw` if this is the first request.
    ///
    /// # Errors
    /// - The decode error itself, for the call that performed a failing decode
    /// - [`crate::Error::MethodFailed`] for every later call on a failed key
    /// - [`crate::Error::CacheInvariantViolation`] if `raw` differs from the stream the key
    ///   was first decoded from
    pub fn get_or_create(
        &self,
        key: MethodKey,
        raw: &RawInstructionStream,
    ) -> Result<Arc<DisassembledMethod>> {
        let fingerprint = fingerprint(raw.data());
        // Clone the cell out so the shard lock is not held while decoding.
        let entry = self
            .entries
            .entry(key)
            .or_insert_with(|| {
                Arc::new(CacheEntry {
                    fingerprint,
                    cell: OnceLock::new(),
                })
            })
            .clone();

        if entry.fingerprint != fingerprint {
            return Err(Error::CacheInvariantViolation {
                key,
                message: "stream differs from the one first decoded".to_string(),
            });
        }

        let mut fresh_error = None;
        let slot = entry.cell.get_or_init(|| match self.decode(key, raw) {
            Ok(method) => Ok(Arc::new(method)),
            Err(error) => {
                let failure = MethodFailure {
                    key,
                    message: error.to_string(),
                };
                log::warn!("method {} failed to decode - {}", key, failure.message);
                self.failures.insert(key, failure.clone());
                fresh_error = Some(error);
                Err(failure)
            }
        });

        if let Some(error) = fresh_error {
            return Err(error);
        }

        match slot {
            Ok(method) => Ok(method.clone()),
            Err(failure) => Err(Error::MethodFailed {
                key,
                message: failure.message.clone(),
            }),
        }
    }

    fn decode(&self, key: MethodKey, raw: &RawInstructionStream) -> Result<DisassembledMethod> {
        self.decodes.fetch_add(1, Ordering::Relaxed);

        if raw.key() != key {
            return Err(format_error!(
                "Stream of {} passed for method {}",
                raw.key(),
                key
            ));
        }

        let method = decode_method(raw, &self.table)?;
        for instruction in method.instructions() {
            if instruction.source == ShapeSource::Inferred {
                self.registry.record(instruction.opcode, instruction.shape());
            }
        }

        log::debug!(
            "decoded {} - {} instructions, {} regions",
            key,
            method.len(),
            method.regions().len()
        );
        Ok(method)
    }

    /// Decode `raw` again and compare against the cached result.
    ///
    /// The re-decode is not counted by [`Disassembler::decode_count`].
    ///
    /// # Errors
    /// Returns [`crate::Error::CacheInvariantViolation`] if the results differ and
    /// [`crate::Error::Error`] if `key` was never requested.
    pub fn verify(&self, key: MethodKey, raw: &RawInstructionStream) -> Result<()> {
        let Some(slot) = self
            .entries
            .get(&key)
            .and_then(|entry| entry.cell.get().cloned())
        else {
            return Err(Error::Error(format!("Method {key} is not cached")));
        };

        let fresh = decode_method(raw, &self.table);
        let consistent = match (&slot, &fresh) {
            (Ok(cached), Ok(fresh)) => **cached == *fresh,
            (Err(cached), Err(fresh)) => cached.message == fresh.to_string(),
            _ => false,
        };

        if consistent {
            Ok(())
        } else {
            Err(Error::CacheInvariantViolation {
                key,
                message: "re-decoding produced a different result".to_string(),
            })
        }
    }

    /// The cached disassembly of `key`, if it was decoded successfully.
    #[must_use]
    pub fn get(&self, key: &MethodKey) -> Option<Arc<DisassembledMethod>> {
        self.entries
            .get(key)
            .and_then(|entry| entry.cell.get().and_then(|slot| slot.as_ref().ok().cloned()))
    }

    /// All successfully decoded methods, ordered by key.
    #[must_use]
    pub fn methods(&self) -> Vec<Arc<DisassembledMethod>> {
        let mut methods: Vec<_> = self
            .entries
            .iter()
            .filter_map(|entry| entry.cell.get().and_then(|slot| slot.as_ref().ok().cloned()))
            .collect();
        methods.sort_by_key(|method| method.key());
        methods
    }

    /// All failed methods, ordered by key.
    #[must_use]
    pub fn failures(&self) -> Vec<MethodFailure> {
        self.failures
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Number of decodes performed through [`Disassembler::get_or_create`].
    #[must_use]
    pub fn decode_count(&self) -> usize {
        self.decodes.load(Ordering::Relaxed)
    }

    /// Number of keys seen so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no key was requested yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The declared operand-shape table.
    #[must_use]
    pub fn shape_table(&self) -> &OperandShapeTable {
        &self.table
    }

    /// Shapes inferred across all decoded methods.
    #[must_use]
    pub fn inferred_shapes(&self) -> Vec<ShapeVote> {
        self.registry.votes()
    }

    /// The inference registry, e.g. to promote inferred shapes into a new table.
    #[must_use]
    pub fn registry(&self) -> &ShapeRegistry {
        &self.registry
    }
}

impl std::fmt::Debug for Disassembler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Disassembler")
            .field("methods", &self.entries.len())
            .field("failures", &self.failures.len())
            .field("decodes", &self.decode_count())
            .finish_non_exhaustive()
    }
}

fn fingerprint(data: &[u8]) -> [u8; 20] {
    let digest = Sha1::digest(data);
    let mut out = [0_u8; 20];
    out.copy_from_slice(&digest);
    out
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread};

    use super::*;
    use crate::disassembler::{MethodBodyBuilder, OperandShape};

    fn table() -> OperandShapeTable {
        OperandShapeTable::new(1)
            .with(0x01, OperandShape::None)
            .with(0x02, OperandShape::Int32)
            .with(0x2A, OperandShape::None)
    }

    fn stream(key: MethodKey) -> RawInstructionStream {
        let mut body = MethodBodyBuilder::new();
        body.op(0x01).op_i32(0x02, 5).op(0x2A);
        RawInstructionStream::new(key, body.build())
    }

    #[test]
    fn decodes_once() {
        let disassembler = Disassembler::new(table());
        let key = MethodKey::new(0x0600_0001, 1);
        let raw = stream(key);

        let first = disassembler.get_or_create(key, &raw).unwrap();
        let second = disassembler.get_or_create(key, &raw).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(disassembler.decode_count(), 1);
        assert_eq!(first.len(), 3);
        assert!(disassembler.verify(key, &raw).is_ok());
        assert_eq!(disassembler.decode_count(), 1);
    }

    #[test]
    fn failures_are_cached() {
        let disassembler = Disassembler::new(table());
        let key = MethodKey::new(0x0600_0002, 1);
        let mut body = MethodBodyBuilder::new();
        body.op(0x01).raw(&[0x02, 0x00]);
        let raw = RawInstructionStream::new(key, body.build());

        assert!(matches!(
            disassembler.get_or_create(key, &raw),
            Err(Error::Format { .. })
        ));
        assert!(matches!(
            disassembler.get_or_create(key, &raw),
            Err(Error::MethodFailed { .. })
        ));
        assert_eq!(disassembler.decode_count(), 1);
        assert_eq!(disassembler.failures().len(), 1);
        assert_eq!(disassembler.failures()[0].key, key);
        assert!(disassembler.get(&key).is_none());
        assert!(disassembler.methods().is_empty());
        assert!(disassembler.verify(key, &raw).is_ok());
    }

    #[test]
    fn diverging_stream_is_fatal() {
        let disassembler = Disassembler::new(table());
        let key = MethodKey::new(0x0600_0003, 1);
        disassembler.get_or_create(key, &stream(key)).unwrap();

        let mut body = MethodBodyBuilder::new();
        body.op(0x2A);
        let other = RawInstructionStream::new(key, body.build());

        let error = disassembler.get_or_create(key, &other).unwrap_err();
        assert!(error.is_fatal());
        assert!(disassembler.verify(key, &other).unwrap_err().is_fatal());
    }

    #[test]
    fn concurrent_first_access() {
        let disassembler = Arc::new(Disassembler::new(table()));
        let key = MethodKey::new(0x0600_0004, 9);
        let raw = Arc::new(stream(key));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let disassembler = disassembler.clone();
                let raw = raw.clone();
                thread::spawn(move || disassembler.get_or_create(key, &raw).unwrap())
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(results.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        assert_eq!(disassembler.decode_count(), 1);
    }

    #[test]
    fn inferred_shapes_are_recorded() {
        let disassembler = Disassembler::new(table());
        let key = MethodKey::new(0x0600_0005, 2);
        let mut body = MethodBodyBuilder::new();
        body.op(0x66).op(0x01).op(0x2A);
        disassembler
            .get_or_create(key, &RawInstructionStream::new(key, body.build()))
            .unwrap();

        let votes = disassembler.inferred_shapes();
        assert_eq!(votes.len(), 1);
        assert_eq!(votes[0].opcode, 0x66);
        assert_eq!(votes[0].shape, OperandShape::None);
    }
}
