use std::{collections::BTreeMap, fmt};

use crate::mapping::SignatureTable;

/// A canonical instruction and its compatibility score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    /// Canonical mnemonic
    pub mnemonic: &'static str,
    /// Score in `[0, 1]`
    pub score: f64,
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:.2})", self.mnemonic, self.score)
    }
}

/// Why an opcode was left unresolved.
#[derive(Debug, Clone, PartialEq)]
pub enum UnresolvedReason {
    /// The opcode was declared or expected but never observed, or observed less often than
    /// the configured minimum
    NoEvidence {
        /// Number of occurrences seen
        occurrences: u64,
    },
    /// No remaining candidate reached the confidence threshold
    LowConfidence {
        /// Best remaining candidate, if any
        best: Option<Candidate>,
    },
    /// The best candidates scored within the tie margin of each other
    Ambiguous {
        /// The competing candidates, best first
        candidates: Vec<Candidate>,
    },
    /// Several opcodes competed for the same unique canonical instruction
    Conflict {
        /// The contested instruction
        mnemonic: &'static str,
        /// All opcodes involved, ascending
        opcodes: Vec<u8>,
    },
}

impl fmt::Display for UnresolvedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnresolvedReason::NoEvidence { occurrences } => {
                write!(f, "no evidence ({occurrences} occurrences)")
            }
            UnresolvedReason::LowConfidence { best: Some(best) } => {
                write!(f, "low confidence, best {best}")
            }
            UnresolvedReason::LowConfidence { best: None } => {
                write!(f, "low confidence, no candidate left")
            }
            UnresolvedReason::Ambiguous { candidates } => {
                write!(f, "ambiguous between ")?;
                for (index, candidate) in candidates.iter().enumerate() {
                    if index > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{candidate}")?;
                }
                Ok(())
            }
            UnresolvedReason::Conflict { mnemonic, opcodes } => {
                write!(f, "conflict over {mnemonic} between")?;
                for opcode in opcodes {
                    write!(f, " 0x{opcode:02X}")?;
                }
                Ok(())
            }
        }
    }
}

/// The outcome for one opcode id.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Mapped to a canonical instruction
    Resolved(Candidate),
    /// Left unresolved
    Unresolved(UnresolvedReason),
}

impl Resolution {
    /// The mapped mnemonic, if resolved.
    #[must_use]
    pub fn mnemonic(&self) -> Option<&'static str> {
        match self {
            Resolution::Resolved(candidate) => Some(candidate.mnemonic),
            Resolution::Unresolved(_) => None,
        }
    }

    /// Returns `true` if resolved.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        matches!(self, Resolution::Resolved(_))
    }
}

/// An opcode the mapper could not resolve, surfaced at the end of a mapping run.
#[derive(Debug, Clone, PartialEq)]
pub struct UnresolvedOpcodeWarning {
    /// The opcode id
    pub opcode: u8,
    /// Why it stayed unresolved
    pub reason: UnresolvedReason,
}

impl fmt::Display for UnresolvedOpcodeWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "opcode 0x{:02X} unresolved: {}", self.opcode, self.reason)
    }
}

/// The final opcode id to canonical instruction assignment.
///
/// Covers every observed and every declared opcode. Immutable once published.
#[derive(Debug, Clone, PartialEq)]
pub struct OpcodeMapping {
    signature_version: u32,
    entries: BTreeMap<u8, Resolution>,
}

impl OpcodeMapping {
    pub(crate) fn new(signature_version: u32, entries: BTreeMap<u8, Resolution>) -> Self {
        OpcodeMapping {
            signature_version,
            entries,
        }
    }

    /// Version of the signature table the mapping was built against.
    #[must_use]
    pub fn signature_version(&self) -> u32 {
        self.signature_version
    }

    /// Outcome for `opcode`.
    #[must_use]
    pub fn get(&self, opcode: u8) -> Option<&Resolution> {
        self.entries.get(&opcode)
    }

    /// The mnemonic `opcode` was mapped to.
    #[must_use]
    pub fn mnemonic(&self, opcode: u8) -> Option<&'static str> {
        self.get(opcode).and_then(Resolution::mnemonic)
    }

    /// All opcodes mapped to `mnemonic`, ascending.
    #[must_use]
    pub fn opcodes_for(&self, mnemonic: &str) -> Vec<u8> {
        self.entries
            .iter()
            .filter(|(_, resolution)| resolution.mnemonic() == Some(mnemonic))
            .map(|(&opcode, _)| opcode)
            .collect()
    }

    /// All outcomes ordered by opcode.
    pub fn iter(&self) -> impl Iterator<Item = (u8, &Resolution)> {
        self.entries.iter().map(|(&opcode, resolution)| (opcode, resolution))
    }

    /// Resolved opcodes ordered by opcode.
    pub fn resolved(&self) -> impl Iterator<Item = (u8, &Candidate)> {
        self.entries
            .iter()
            .filter_map(|(&opcode, resolution)| match resolution {
                Resolution::Resolved(candidate) => Some((opcode, candidate)),
                Resolution::Unresolved(_) => None,
            })
    }

    /// Warnings for every unresolved opcode, ordered by opcode.
    #[must_use]
    pub fn unresolved(&self) -> Vec<UnresolvedOpcodeWarning> {
        self.entries
            .iter()
            .filter_map(|(&opcode, resolution)| match resolution {
                Resolution::Unresolved(reason) => Some(UnresolvedOpcodeWarning {
                    opcode,
                    reason: reason.clone(),
                }),
                Resolution::Resolved(_) => None,
            })
            .collect()
    }

    /// Number of resolved opcodes.
    #[must_use]
    pub fn resolved_count(&self) -> usize {
        self.entries.values().filter(|r| r.is_resolved()).count()
    }

    /// Number of opcodes covered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no opcode is covered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Unique canonical instructions claimed by more than one opcode, with their opcodes.
    ///
    /// Empty for every mapping the resolver produces.
    #[must_use]
    pub fn injectivity_violations(&self, table: &SignatureTable) -> Vec<(&'static str, Vec<u8>)> {
        let mut claims: BTreeMap<&'static str, Vec<u8>> = BTreeMap::new();
        for (opcode, candidate) in self.resolved() {
            claims.entry(candidate.mnemonic).or_default().push(opcode);
        }

        claims
            .into_iter()
            .filter(|(mnemonic, opcodes)| {
                opcodes.len() > 1 && table.get(mnemonic).map_or(true, |signature| signature.unique)
            })
            .collect()
    }
}

impl fmt::Display for OpcodeMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (opcode, resolution) in &self.entries {
            match resolution {
                Resolution::Resolved(candidate) => writeln!(f, "0x{opcode:02X} => {candidate}")?,
                Resolution::Unresolved(reason) => writeln!(f, "0x{opcode:02X} => ? {reason}")?,
            }
        }
        Ok(())
    }
}
