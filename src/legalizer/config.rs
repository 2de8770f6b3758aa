//! Legalizer configuration.

/// Limits and verification switches of a legalizer table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LegalizerConfig {
    /// Resolutions allowed per instruction (and per query) before the
    /// table is considered cyclic.
    pub max_iterations: usize,

    /// How many generations of instructions a rewrite may spawn from one
    /// original instruction.
    pub max_depth: usize,

    /// Require every rule set to end with an always-matching rule.
    pub require_fallback: bool,

    /// Check every mutation against probe queries during `verify`.
    pub probe_mutations: bool,
}

impl Default for LegalizerConfig {
    fn default() -> Self {
        Self {
            max_iterations: 32,
            max_depth: 16,
            require_fallback: false,
            probe_mutations: true,
        }
    }
}

impl LegalizerConfig {
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_require_fallback(mut self, require_fallback: bool) -> Self {
        self.require_fallback = require_fallback;
        self
    }
}
