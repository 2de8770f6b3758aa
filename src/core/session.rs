// This module provides arena-based legalization session management using the bumpalo
// crate. LegalizerSession owns a reference to the arena and tracks the statistics of a
// legalization run with a unified lifetime: function names are interned in the arena,
// and per-opcode and per-action counters live behind RefCell so the driver can record
// progress through a shared reference. Sessions are per worker; the parallel driver
// gives every rayon task its own arena and merges the resulting LegalizerStats at the
// end. LegalizerStats is plain data that can be cloned out of the session, merged and
// printed by the command line tool.

//! Arena-based legalization session management.
//!
//! All interned strings are tied to the session lifetime, so statistics and
//! diagnostics can refer to function names without cloning them.

use bumpalo::Bump;
use hashbrown::HashMap;
use std::cell::RefCell;
use std::fmt;

use super::opcode::Opcode;

/// Arena-based legalization session.
pub struct LegalizerSession<'arena> {
    /// Arena allocator for session objects.
    arena: &'arena Bump,

    /// Statistics of this session.
    stats: RefCell<LegalizerStats>,

    /// String interning for function names.
    interned_strings: RefCell<HashMap<String, &'arena str>>,

    /// Function currently being legalized.
    current_function: RefCell<Option<&'arena str>>,
}

impl<'arena> LegalizerSession<'arena> {
    pub fn new(arena: &'arena Bump) -> Self {
        Self {
            arena,
            stats: RefCell::new(LegalizerStats::default()),
            interned_strings: RefCell::new(HashMap::new()),
            current_function: RefCell::new(None),
        }
    }

    /// Intern a string in the arena.
    pub fn intern_str(&self, s: &str) -> &'arena str {
        let mut strings = self.interned_strings.borrow_mut();
        if let Some(&interned) = strings.get(s) {
            return interned;
        }

        let interned = self.arena.alloc_str(s);
        strings.insert(s.to_string(), interned);
        interned
    }

    /// Set the function being legalized.
    pub fn set_current_function(&self, name: &str) {
        let name = self.intern_str(name);
        *self.current_function.borrow_mut() = Some(name);
    }

    pub fn current_function(&self) -> Option<&'arena str> {
        *self.current_function.borrow()
    }

    /// Record that a function was legalized, or failed to.
    pub fn record_function(&self, name: &str, succeeded: bool, instructions: usize) {
        let mut stats = self.stats.borrow_mut();
        if succeeded {
            stats.functions_legalized += 1;
        } else {
            stats.functions_failed += 1;
        }
        if stats.largest_function_size < instructions {
            stats.largest_function_size = instructions;
            stats.largest_function_name = name.to_string();
        }
        *self.current_function.borrow_mut() = None;
    }

    /// Record one instruction reaching its terminal outcome.
    pub fn record_instruction(&self, opcode: Opcode) {
        let mut stats = self.stats.borrow_mut();
        stats.instructions_visited += 1;
        *stats.opcode_counts.entry(opcode.name().to_string()).or_insert(0) += 1;
    }

    /// Record one applied action.
    pub fn record_action(&self, action: &'static str) {
        let mut stats = self.stats.borrow_mut();
        stats.actions_applied += 1;
        *stats.action_counts.entry(action.to_string()).or_insert(0) += 1;
    }

    /// Record instructions emitted by rewrites.
    pub fn record_created(&self, count: usize) {
        self.stats.borrow_mut().instructions_created += count;
    }

    pub fn stats(&self) -> LegalizerStats {
        self.stats.borrow().clone()
    }
}

/// Legalization statistics.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LegalizerStats {
    /// Functions legalized completely.
    pub functions_legalized: usize,

    /// Functions that hit a fatal error.
    pub functions_failed: usize,

    /// Instructions that reached a terminal outcome.
    pub instructions_visited: usize,

    /// Instructions emitted by lowering, splitting and custom hooks.
    pub instructions_created: usize,

    /// Non-terminal and lowering actions applied.
    pub actions_applied: usize,

    pub opcode_counts: HashMap<String, usize>,

    pub action_counts: HashMap<String, usize>,

    /// Largest function seen, by instruction count.
    pub largest_function_size: usize,

    pub largest_function_name: String,
}

impl LegalizerStats {
    /// Fold the counters of another session into this one.
    pub fn merge(&mut self, other: &LegalizerStats) {
        self.functions_legalized += other.functions_legalized;
        self.functions_failed += other.functions_failed;
        self.instructions_visited += other.instructions_visited;
        self.instructions_created += other.instructions_created;
        self.actions_applied += other.actions_applied;
        for (name, count) in &other.opcode_counts {
            *self.opcode_counts.entry(name.clone()).or_insert(0) += count;
        }
        for (name, count) in &other.action_counts {
            *self.action_counts.entry(name.clone()).or_insert(0) += count;
        }
        if other.largest_function_size > self.largest_function_size {
            self.largest_function_size = other.largest_function_size;
            self.largest_function_name = other.largest_function_name.clone();
        }
    }
}

impl fmt::Display for LegalizerStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Legalizer Statistics:")?;
        writeln!(f, "  Functions legalized: {}", self.functions_legalized)?;
        writeln!(f, "  Functions failed: {}", self.functions_failed)?;
        writeln!(f, "  Instructions visited: {}", self.instructions_visited)?;
        writeln!(f, "  Instructions created: {}", self.instructions_created)?;
        writeln!(f, "  Actions applied: {}", self.actions_applied)?;

        if !self.largest_function_name.is_empty() {
            writeln!(
                f,
                "  Largest function: {} ({} instructions)",
                self.largest_function_name, self.largest_function_size
            )?;
        }

        if !self.action_counts.is_empty() {
            writeln!(f, "  Action breakdown:")?;
            let mut sorted: Vec<_> = self.action_counts.iter().collect();
            sorted.sort_by(|a, b| b.1.cmp(a.1).then(a.0.cmp(b.0)));
            for (action, count) in sorted {
                writeln!(f, "    {}: {}", action, count)?;
            }
        }

        if !self.opcode_counts.is_empty() {
            writeln!(f, "  Opcode breakdown:")?;
            let mut sorted: Vec<_> = self.opcode_counts.iter().collect();
            sorted.sort_by(|a, b| b.1.cmp(a.1).then(a.0.cmp(b.0)));
            for (opcode, count) in sorted.into_iter().take(10) {
                writeln!(f, "    {}: {}", opcode, count)?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_creation() {
        let arena = Bump::new();
        let session = LegalizerSession::new(&arena);

        let stats = session.stats();
        assert_eq!(stats.functions_legalized, 0);
        assert_eq!(stats.instructions_visited, 0);
        assert!(session.current_function().is_none());
    }

    #[test]
    fn test_string_interning() {
        let arena = Bump::new();
        let session = LegalizerSession::new(&arena);

        let s1 = session.intern_str("kernel");
        let s2 = session.intern_str("kernel");
        let s3 = session.intern_str("other");

        assert_eq!(s1.as_ptr(), s2.as_ptr());
        assert_ne!(s1.as_ptr(), s3.as_ptr());
    }

    #[test]
    fn test_session_statistics() {
        let arena = Bump::new();
        let session = LegalizerSession::new(&arena);

        session.set_current_function("kernel");
        assert_eq!(session.current_function(), Some("kernel"));
        session.record_instruction(Opcode::Add);
        session.record_instruction(Opcode::Add);
        session.record_instruction(Opcode::Load);
        session.record_action("WidenScalar");
        session.record_created(3);
        session.record_function("kernel", true, 5);

        let stats = session.stats();
        assert_eq!(stats.functions_legalized, 1);
        assert_eq!(stats.instructions_visited, 3);
        assert_eq!(stats.opcode_counts["G_ADD"], 2);
        assert_eq!(stats.action_counts["WidenScalar"], 1);
        assert_eq!(stats.instructions_created, 3);
        assert!(session.current_function().is_none());
    }

    #[test]
    fn test_merge_and_display() {
        let mut total = LegalizerStats::default();
        let mut part = LegalizerStats::default();
        part.functions_legalized = 2;
        part.largest_function_size = 10;
        part.largest_function_name = "big".to_string();
        part.action_counts.insert("Lower".to_string(), 4);
        total.merge(&part);
        total.merge(&part);

        assert_eq!(total.functions_legalized, 4);
        assert_eq!(total.action_counts["Lower"], 8);

        let output = total.to_string();
        assert!(output.contains("Functions legalized: 4"));
        assert!(output.contains("big (10 instructions)"));
        assert!(output.contains("Lower: 8"));
    }
}
