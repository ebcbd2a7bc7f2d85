//! Per-opcode evidence accumulated over all disassembled methods.
//!
//! Every counter is a plain sum, so profiles built from disjoint sets of methods can be
//! merged in any order and always produce the same totals.

use std::collections::BTreeMap;

use crate::disassembler::{DisassembledMethod, OperandShape};

/// Evidence gathered for one opcode id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OpcodeProfile {
    /// The opcode id
    pub opcode: u8,
    /// Number of instructions with this opcode
    pub occurrences: u64,
    /// Number of methods the opcode appears in
    pub methods: u64,
    /// Operand shape histogram
    pub shapes: BTreeMap<OperandShape, u64>,
    /// Occurrences as the first instruction of a method
    pub method_entry: u64,
    /// Occurrences as the last instruction of a method
    pub method_exit: u64,
    /// Occurrences directly followed by a block leader
    pub next_leader: u64,
    /// Occurrences that are themselves branch targets
    pub branch_target: u64,
    /// Occurrences inside a protected range
    pub in_try: u64,
    /// Occurrences inside a handler
    pub in_handler: u64,
    /// Occurrences whose branch targets leave the enclosing region
    pub exits_region: u64,
    /// Occurrences at a point where the evaluation stack is known to be empty
    pub empty_stack: u64,
    /// Histogram of the opcode of the following instruction
    pub successors: BTreeMap<u8, u64>,
    /// Histogram of the opcode of the preceding instruction
    pub predecessors: BTreeMap<u8, u64>,
}

impl OpcodeProfile {
    /// Create an empty profile for `opcode`.
    #[must_use]
    pub fn new(opcode: u8) -> Self {
        OpcodeProfile {
            opcode,
            ..Self::default()
        }
    }

    /// Add all counters of `other`.
    pub fn merge(&mut self, other: &OpcodeProfile) {
        self.occurrences += other.occurrences;
        self.methods += other.methods;
        merge_histogram(&mut self.shapes, &other.shapes);
        self.method_entry += other.method_entry;
        self.method_exit += other.method_exit;
        self.next_leader += other.next_leader;
        self.branch_target += other.branch_target;
        self.in_try += other.in_try;
        self.in_handler += other.in_handler;
        self.exits_region += other.exits_region;
        self.empty_stack += other.empty_stack;
        merge_histogram(&mut self.successors, &other.successors);
        merge_histogram(&mut self.predecessors, &other.predecessors);
    }

    /// The most frequent operand shape, ties going to the lower shape.
    #[must_use]
    pub fn dominant_shape(&self) -> Option<OperandShape> {
        self.shapes
            .iter()
            .fold(None, |best: Option<(OperandShape, u64)>, (&shape, &count)| match best {
                Some((_, best_count)) if best_count >= count => best,
                _ => Some((shape, count)),
            })
            .map(|(shape, _)| shape)
    }

    /// Share of occurrences that do not fall through to a regular successor: the method
    /// ends after them or the next instruction starts a new block.
    #[must_use]
    pub fn no_fallthrough_ratio(&self) -> f64 {
        ratio(self.method_exit + self.next_leader, self.occurrences)
    }
}

fn merge_histogram<K: Ord + Copy>(into: &mut BTreeMap<K, u64>, from: &BTreeMap<K, u64>) {
    for (&key, &count) in from {
        *into.entry(key).or_insert(0) += count;
    }
}

pub(crate) fn ratio(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        (part as f64 / total as f64).min(1.0)
    }
}

/// Profiles of all observed opcodes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileSet {
    profiles: BTreeMap<u8, OpcodeProfile>,
    methods: u64,
    instructions: u64,
}

impl ProfileSet {
    /// Create an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add the evidence of one method.
    pub fn accumulate(&mut self, method: &DisassembledMethod) {
        self.methods += 1;
        let instructions = method.instructions();
        self.instructions += instructions.len() as u64;

        let mut seen = [false; 256];
        for (index, instruction) in instructions.iter().enumerate() {
            let profile = self
                .profiles
                .entry(instruction.opcode)
                .or_insert_with(|| OpcodeProfile::new(instruction.opcode));

            profile.occurrences += 1;
            if !seen[usize::from(instruction.opcode)] {
                seen[usize::from(instruction.opcode)] = true;
                profile.methods += 1;
            }
            *profile.shapes.entry(instruction.shape()).or_insert(0) += 1;

            if index == 0 {
                profile.method_entry += 1;
            }
            if method.is_leader(instruction.offset) && index != 0 {
                profile.branch_target += 1;
            }
            if method.in_try(instruction.offset) {
                profile.in_try += 1;
            }
            if method.in_handler(instruction.offset) {
                profile.in_handler += 1;
            }
            if instruction
                .targets()
                .iter()
                .any(|&target| method.leaves_region(instruction.offset, target))
            {
                profile.exits_region += 1;
            }
            if method.is_empty_stack_point(instruction.offset) {
                profile.empty_stack += 1;
            }

            match instructions.get(index + 1) {
                Some(next) => {
                    if method.is_leader(next.offset) {
                        profile.next_leader += 1;
                    }
                    *profile.successors.entry(next.opcode).or_insert(0) += 1;
                }
                None => profile.method_exit += 1,
            }
            if let Some(previous) = index.checked_sub(1).map(|i| &instructions[i]) {
                *profile.predecessors.entry(previous.opcode).or_insert(0) += 1;
            }
        }
    }

    /// Combine two sets built from disjoint methods.
    #[must_use]
    pub fn merge(mut self, other: ProfileSet) -> ProfileSet {
        self.methods += other.methods;
        self.instructions += other.instructions;
        for (opcode, profile) in other.profiles {
            match self.profiles.get_mut(&opcode) {
                Some(existing) => existing.merge(&profile),
                None => {
                    self.profiles.insert(opcode, profile);
                }
            }
        }
        self
    }

    /// Profile of `opcode`, if it was observed.
    #[must_use]
    pub fn get(&self, opcode: u8) -> Option<&OpcodeProfile> {
        self.profiles.get(&opcode)
    }

    /// All profiles ordered by opcode.
    pub fn iter(&self) -> impl Iterator<Item = &OpcodeProfile> {
        self.profiles.values()
    }

    /// Observed opcode ids, ascending.
    pub fn opcodes(&self) -> impl Iterator<Item = u8> + '_ {
        self.profiles.keys().copied()
    }

    /// Number of observed opcodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    /// Returns `true` if nothing was observed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    /// Number of methods accumulated.
    #[must_use]
    pub fn method_count(&self) -> u64 {
        self.methods
    }

    /// Number of instructions accumulated.
    #[must_use]
    pub fn instruction_count(&self) -> u64 {
        self.instructions
    }

    /// Returns `true` if `opcode` behaves like a conditional branch: mostly branch-shaped
    /// operands, and usually followed by a regular successor.
    #[must_use]
    pub fn is_conditional_branch_like(&self, opcode: u8) -> bool {
        self.get(opcode).is_some_and(|profile| {
            profile.dominant_shape() == Some(OperandShape::Branch)
                && profile.no_fallthrough_ratio() < 0.5
        })
    }
}

impl FromIterator<OpcodeProfile> for ProfileSet {
    /// Build a set from prepared profiles, e.g. ones saved from an earlier run. Profiles
    /// for the same opcode are merged.
    fn from_iter<I: IntoIterator<Item = OpcodeProfile>>(iter: I) -> Self {
        let mut set = ProfileSet::new();
        for profile in iter {
            set.instructions += profile.occurrences;
            set.methods = set.methods.max(profile.methods);
            match set.profiles.get_mut(&profile.opcode) {
                Some(existing) => existing.merge(&profile),
                None => {
                    set.profiles.insert(profile.opcode, profile);
                }
            }
        }
        set
    }
}
