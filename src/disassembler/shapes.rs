//! Operand-shape knowledge: declared tables and inferred votes.
//!
//! The decoder needs to know how many operand bytes follow each opcode id. Some of that is
//! known up front, typically recovered from the interpreter's handler table, and goes into
//! an [`OperandShapeTable`]. Everything else is inferred per method by the decoder; the
//! inferred shapes are collected in a [`ShapeRegistry`] so an operator can promote them to
//! declared entries for the next run.

use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_skiplist::SkipMap;

use crate::disassembler::OperandShape;

/// Declared operand shapes per opcode id.
///
/// Tables are versioned because opcode numberings differ between obfuscator builds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperandShapeTable {
    version: u32,
    shapes: [Option<OperandShape>; 256],
}

impl OperandShapeTable {
    /// Create an empty table. Every opcode will be inferred.
    #[must_use]
    pub fn new(version: u32) -> Self {
        OperandShapeTable {
            version,
            shapes: [None; 256],
        }
    }

    /// Declare the shape of `opcode`, replacing an earlier declaration.
    pub fn declare(&mut self, opcode: u8, shape: OperandShape) {
        self.shapes[usize::from(opcode)] = Some(shape);
    }

    /// Builder form of [`OperandShapeTable::declare`].
    #[must_use]
    pub fn with(mut self, opcode: u8, shape: OperandShape) -> Self {
        self.declare(opcode, shape);
        self
    }

    /// The declared shape of `opcode`.
    #[must_use]
    pub fn get(&self, opcode: u8) -> Option<OperandShape> {
        self.shapes[usize::from(opcode)]
    }

    /// Table version.
    #[must_use]
    pub fn version(&self) -> u32 {
        self.version
    }

    /// All declared opcode ids, ascending.
    pub fn declared_opcodes(&self) -> impl Iterator<Item = u8> + '_ {
        (0..=u8::MAX).filter(|&opcode| self.get(opcode).is_some())
    }

    /// Number of declared opcodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shapes.iter().filter(|shape| shape.is_some()).count()
    }

    /// Returns `true` if nothing is declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.shapes.iter().all(Option::is_none)
    }
}

impl Default for OperandShapeTable {
    fn default() -> Self {
        Self::new(1)
    }
}

/// How often an opcode was inferred with a given shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShapeVote {
    /// Opcode id
    pub opcode: u8,
    /// Inferred shape
    pub shape: OperandShape,
    /// Number of instructions decoded with this shape
    pub count: usize,
}

/// Thread-safe, ordered collection of inferred shapes.
///
/// Votes are only recorded and never read back by the decoder, so the registry cannot make
/// decoding depend on the order in which methods are processed.
#[derive(Default)]
pub struct ShapeRegistry {
    votes: SkipMap<(u8, OperandShape), AtomicUsize>,
}

impl ShapeRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one inferred occurrence.
    pub fn record(&self, opcode: u8, shape: OperandShape) {
        self.votes
            .get_or_insert((opcode, shape), AtomicUsize::new(0))
            .value()
            .fetch_add(1, Ordering::Relaxed);
    }

    /// All votes ordered by opcode, then shape.
    #[must_use]
    pub fn votes(&self) -> Vec<ShapeVote> {
        self.votes
            .iter()
            .map(|entry| ShapeVote {
                opcode: entry.key().0,
                shape: entry.key().1,
                count: entry.value().load(Ordering::Relaxed),
            })
            .collect()
    }

    /// The most frequently inferred shape of `opcode`, ties going to the lower shape.
    #[must_use]
    pub fn dominant(&self, opcode: u8) -> Option<OperandShape> {
        self.votes
            .range((opcode, OperandShape::None)..=(opcode, OperandShape::Switch))
            .fold(None, |best: Option<(OperandShape, usize)>, entry| {
                let count = entry.value().load(Ordering::Relaxed);
                match best {
                    Some((_, best_count)) if best_count >= count => best,
                    _ => Some((entry.key().1, count)),
                }
            })
            .map(|(shape, _)| shape)
    }

    /// Promote the dominant inferred shape of every opcode not yet declared in `table`.
    #[must_use]
    pub fn promote(&self, table: &OperandShapeTable) -> OperandShapeTable {
        let mut promoted = table.clone();
        for opcode in 0..=u8::MAX {
            if promoted.get(opcode).is_none() {
                if let Some(shape) = self.dominant(opcode) {
                    promoted.declare(opcode, shape);
                }
            }
        }
        promoted
    }

    /// Returns `true` if nothing was inferred.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.votes.is_empty()
    }
}

impl std::fmt::Debug for ShapeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.votes()).finish()
    }
}
