// This module defines what a rule can decide about a type query. ActionKind is the
// tag stored in a rule; Action is the resolved decision handed back by the resolver,
// where every non-terminal kind carries the type index to change and the new type the
// rule's mutation computed for the concrete query. Terminal actions end the fixpoint
// loop: Legal accepts the instruction, Lower and Custom hand it to the helper or the
// target hook, and Unsupported is fatal. LegalizationOutcome is the classification an
// instruction ends with once the loop stops successfully.

//! Legalization actions and outcomes.

use std::fmt;

use crate::core::LowLevelType;

/// Kind of decision a rule makes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    Legal,
    Lower,
    Custom,
    Unsupported,
    WidenScalar,
    NarrowScalar,
    MoreElements,
    FewerElements,
    Scalarize,
    Bitcast,
}

impl ActionKind {
    pub const fn name(self) -> &'static str {
        match self {
            ActionKind::Legal => "Legal",
            ActionKind::Lower => "Lower",
            ActionKind::Custom => "Custom",
            ActionKind::Unsupported => "Unsupported",
            ActionKind::WidenScalar => "WidenScalar",
            ActionKind::NarrowScalar => "NarrowScalar",
            ActionKind::MoreElements => "MoreElements",
            ActionKind::FewerElements => "FewerElements",
            ActionKind::Scalarize => "Scalarize",
            ActionKind::Bitcast => "Bitcast",
        }
    }

    /// Whether rules of this kind need a mutation.
    pub const fn needs_mutation(self) -> bool {
        !matches!(
            self,
            ActionKind::Legal | ActionKind::Lower | ActionKind::Custom | ActionKind::Unsupported
        )
    }

    /// The action of a terminal kind.
    pub const fn as_terminal(self) -> Option<Action> {
        match self {
            ActionKind::Legal => Some(Action::Legal),
            ActionKind::Lower => Some(Action::Lower),
            ActionKind::Custom => Some(Action::Custom),
            ActionKind::Unsupported => Some(Action::Unsupported),
            _ => None,
        }
    }

    pub(crate) fn with_mutation(self, type_idx: usize, new_type: LowLevelType) -> Action {
        match self {
            ActionKind::Legal => Action::Legal,
            ActionKind::Lower => Action::Lower,
            ActionKind::Custom => Action::Custom,
            ActionKind::Unsupported => Action::Unsupported,
            ActionKind::WidenScalar => Action::WidenScalar { type_idx, new_type },
            ActionKind::NarrowScalar => Action::NarrowScalar { type_idx, new_type },
            ActionKind::MoreElements => Action::MoreElements { type_idx, new_type },
            ActionKind::FewerElements => Action::FewerElements { type_idx, new_type },
            ActionKind::Scalarize => Action::Scalarize { type_idx, new_type },
            ActionKind::Bitcast => Action::Bitcast { type_idx, new_type },
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Resolved decision for one query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Legal,
    Lower,
    Custom,
    Unsupported,
    WidenScalar { type_idx: usize, new_type: LowLevelType },
    NarrowScalar { type_idx: usize, new_type: LowLevelType },
    MoreElements { type_idx: usize, new_type: LowLevelType },
    FewerElements { type_idx: usize, new_type: LowLevelType },
    Scalarize { type_idx: usize, new_type: LowLevelType },
    Bitcast { type_idx: usize, new_type: LowLevelType },
}

impl Action {
    pub const fn kind(self) -> ActionKind {
        match self {
            Action::Legal => ActionKind::Legal,
            Action::Lower => ActionKind::Lower,
            Action::Custom => ActionKind::Custom,
            Action::Unsupported => ActionKind::Unsupported,
            Action::WidenScalar { .. } => ActionKind::WidenScalar,
            Action::NarrowScalar { .. } => ActionKind::NarrowScalar,
            Action::MoreElements { .. } => ActionKind::MoreElements,
            Action::FewerElements { .. } => ActionKind::FewerElements,
            Action::Scalarize { .. } => ActionKind::Scalarize,
            Action::Bitcast { .. } => ActionKind::Bitcast,
        }
    }

    pub const fn name(self) -> &'static str {
        self.kind().name()
    }

    /// Whether the fixpoint loop stops at this action.
    pub const fn is_terminal(self) -> bool {
        !self.kind().needs_mutation()
    }

    /// Type index and new type of a non-terminal action.
    pub const fn mutation(self) -> Option<(usize, LowLevelType)> {
        match self {
            Action::WidenScalar { type_idx, new_type }
            | Action::NarrowScalar { type_idx, new_type }
            | Action::MoreElements { type_idx, new_type }
            | Action::FewerElements { type_idx, new_type }
            | Action::Scalarize { type_idx, new_type }
            | Action::Bitcast { type_idx, new_type } => Some((type_idx, new_type)),
            _ => None,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.mutation() {
            Some((type_idx, new_type)) => write!(f, "{}({}, {})", self.name(), type_idx, new_type),
            None => f.write_str(self.name()),
        }
    }
}

/// How a successfully legalized instruction ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LegalizationOutcome {
    /// The instruction (possibly retyped) is executable as is.
    Legal,
    /// The instruction was replaced by a synthesized sequence.
    Lowered,
    /// The target hook took care of the instruction.
    Custom,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_display() {
        let s32 = LowLevelType::scalar(32);
        assert_eq!(Action::Legal.to_string(), "Legal");
        assert_eq!(
            Action::WidenScalar { type_idx: 0, new_type: s32 }.to_string(),
            "WidenScalar(0, s32)"
        );
    }

    #[test]
    fn test_terminal_actions() {
        assert!(Action::Legal.is_terminal());
        assert!(Action::Unsupported.is_terminal());
        assert!(Action::Custom.is_terminal());
        let widen = ActionKind::WidenScalar.with_mutation(1, LowLevelType::scalar(64));
        assert!(!widen.is_terminal());
        assert_eq!(widen.mutation(), Some((1, LowLevelType::scalar(64))));
        assert_eq!(ActionKind::Legal.with_mutation(0, LowLevelType::scalar(8)), Action::Legal);
    }
}
