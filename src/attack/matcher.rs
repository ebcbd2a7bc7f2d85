use crate::stream::MAGIC;

/// Decides whether an assembly is protected by a particular virtual machine.
///
/// Matching is kept separate from the attack itself so detection heuristics can be swapped
/// without touching the devirtualization pipeline.
pub trait SignatureMatcher: Send + Sync {
    /// Returns `true` if `assembly` carries the protection this matcher looks for.
    fn matches(&self, assembly: &[u8]) -> bool;
}

/// Never matches.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoMatch;

impl SignatureMatcher for NoMatch {
    fn matches(&self, _assembly: &[u8]) -> bool {
        false
    }
}

/// Matches assemblies that embed a virtualization resource, recognized by its magic.
#[derive(Debug, Default, Clone, Copy)]
pub struct ResourceMagicMatcher;

impl SignatureMatcher for ResourceMagicMatcher {
    fn matches(&self, assembly: &[u8]) -> bool {
        assembly.windows(MAGIC.len()).any(|window| window == MAGIC)
    }
}
