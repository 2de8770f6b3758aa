// This module implements rules and rule sets together with the fluent construction API
// target descriptions use to fill them. A rule pairs a predicate with an action kind
// and, for non-terminal kinds, the mutation computing the new type. A rule set is the
// ordered rule list of one opcode (or of a group of opcodes sharing it); resolution
// walks it front to back and the first matching rule wins, so the order of builder
// calls is the tie-break contract. Every builder method appends rules and returns
// &mut Self so calls chain. Compound helpers such as clamp_scalar expand into several
// plain rules exactly in the order they are listed.

//! Rules, rule sets and the builder API.

use crate::core::{LowLevelType, TypeQuery};

use super::action::{Action, ActionKind};
use super::mutation::Mutation;
use super::predicate::{Predicate, Shape};

/// One predicate → action mapping.
#[derive(Debug, Clone)]
pub struct Rule {
    pub predicate: Predicate,
    pub kind: ActionKind,
    pub mutation: Option<Mutation>,
}

impl Rule {
    pub fn new(predicate: Predicate, kind: ActionKind, mutation: Option<Mutation>) -> Self {
        Self { predicate, kind, mutation }
    }

    pub fn matches(&self, q: &TypeQuery) -> bool {
        self.predicate.evaluate(q)
    }

    /// The action for a query this rule matched.
    pub fn action(&self, q: &TypeQuery) -> Action {
        if let Some(action) = self.kind.as_terminal() {
            return action;
        }
        match &self.mutation {
            Some(m) => {
                let (type_idx, new_type) = m.apply(q);
                self.kind.with_mutation(type_idx, new_type)
            }
            None => Action::Unsupported,
        }
    }

    /// Type indices read by the predicate and the mutation.
    pub fn type_indices(&self) -> Vec<usize> {
        let mut indices = self.predicate.type_indices();
        if let Some(m) = &self.mutation {
            indices.extend(m.type_indices());
        }
        indices
    }
}

/// Ordered rules of one opcode or opcode group.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<Rule>,
}

impl RuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// First matching rule and its index.
    pub fn find(&self, q: &TypeQuery) -> Option<(usize, &Rule)> {
        self.rules.iter().enumerate().find(|(_, r)| r.matches(q))
    }

    /// Action of the first matching rule, `Unsupported` if none matches.
    pub fn resolve(&self, q: &TypeQuery) -> Action {
        self.find(q).map_or(Action::Unsupported, |(_, rule)| rule.action(q))
    }

    /// Whether the last rule matches every query.
    pub fn has_fallback(&self) -> bool {
        self.rules.last().is_some_and(|r| r.predicate.is_always())
    }

    /// Append a raw rule.
    pub fn add_rule(&mut self, rule: Rule) -> &mut Self {
        self.rules.push(rule);
        self
    }

    fn terminal(&mut self, kind: ActionKind, predicate: Predicate) -> &mut Self {
        self.add_rule(Rule::new(predicate, kind, None))
    }

    fn mutating(&mut self, kind: ActionKind, predicate: Predicate, mutation: Mutation) -> &mut Self {
        self.add_rule(Rule::new(predicate, kind, Some(mutation)))
    }

    fn terminal_for<S: Into<Shape>>(
        &mut self,
        kind: ActionKind,
        shapes: impl IntoIterator<Item = S>,
    ) -> &mut Self {
        for shape in shapes {
            self.terminal(kind, Predicate::Shape(shape.into()));
        }
        self
    }

    // Terminal rules.

    /// One Legal rule per exact shape.
    pub fn legal_for<S: Into<Shape>>(&mut self, shapes: impl IntoIterator<Item = S>) -> &mut Self {
        self.terminal_for(ActionKind::Legal, shapes)
    }

    /// One Legal rule per pair of `a` × `b`.
    pub fn legal_for_cartesian_product(
        &mut self,
        a: &[LowLevelType],
        b: &[LowLevelType],
    ) -> &mut Self {
        for &t0 in a {
            for &t1 in b {
                self.terminal(ActionKind::Legal, Predicate::Shape((t0, t1).into()));
            }
        }
        self
    }

    /// Legal for `(type0, type1, mem_size, min_align)` entries of memory opcodes.
    pub fn legal_for_types_with_mem_desc(
        &mut self,
        descs: &[(LowLevelType, LowLevelType, u32, u32)],
    ) -> &mut Self {
        for &(t0, t1, mem_size, min_align) in descs {
            self.terminal(
                ActionKind::Legal,
                Predicate::ShapeWithMem { shape: (t0, t1).into(), mem_size, min_align },
            );
        }
        self
    }

    pub fn legal_if(&mut self, predicate: Predicate) -> &mut Self {
        self.terminal(ActionKind::Legal, predicate)
    }

    pub fn legal(&mut self) -> &mut Self {
        self.terminal(ActionKind::Legal, Predicate::Always)
    }

    pub fn lower_for<S: Into<Shape>>(&mut self, shapes: impl IntoIterator<Item = S>) -> &mut Self {
        self.terminal_for(ActionKind::Lower, shapes)
    }

    pub fn lower_if(&mut self, predicate: Predicate) -> &mut Self {
        self.terminal(ActionKind::Lower, predicate)
    }

    pub fn lower(&mut self) -> &mut Self {
        self.terminal(ActionKind::Lower, Predicate::Always)
    }

    pub fn custom_for<S: Into<Shape>>(&mut self, shapes: impl IntoIterator<Item = S>) -> &mut Self {
        self.terminal_for(ActionKind::Custom, shapes)
    }

    pub fn custom_if(&mut self, predicate: Predicate) -> &mut Self {
        self.terminal(ActionKind::Custom, predicate)
    }

    pub fn custom(&mut self) -> &mut Self {
        self.terminal(ActionKind::Custom, Predicate::Always)
    }

    pub fn unsupported_if(&mut self, predicate: Predicate) -> &mut Self {
        self.terminal(ActionKind::Unsupported, predicate)
    }

    pub fn unsupported(&mut self) -> &mut Self {
        self.terminal(ActionKind::Unsupported, Predicate::Always)
    }

    pub fn unsupported_if_mem_size_not_pow2(&mut self) -> &mut Self {
        self.terminal(ActionKind::Unsupported, Predicate::MemSizeNotPow2(0))
    }

    // Mutating rules.

    pub fn widen_scalar_if(&mut self, predicate: Predicate, mutation: Mutation) -> &mut Self {
        self.mutating(ActionKind::WidenScalar, predicate, mutation)
    }

    pub fn narrow_scalar_if(&mut self, predicate: Predicate, mutation: Mutation) -> &mut Self {
        self.mutating(ActionKind::NarrowScalar, predicate, mutation)
    }

    pub fn more_elements_if(&mut self, predicate: Predicate, mutation: Mutation) -> &mut Self {
        self.mutating(ActionKind::MoreElements, predicate, mutation)
    }

    pub fn fewer_elements_if(&mut self, predicate: Predicate, mutation: Mutation) -> &mut Self {
        self.mutating(ActionKind::FewerElements, predicate, mutation)
    }

    pub fn bitcast_if(&mut self, predicate: Predicate, mutation: Mutation) -> &mut Self {
        self.mutating(ActionKind::Bitcast, predicate, mutation)
    }

    /// Widen scalars narrower than `ty` to `ty`.
    pub fn min_scalar(&mut self, type_idx: usize, ty: LowLevelType) -> &mut Self {
        self.widen_scalar_if(
            Predicate::ScalarNarrowerThan(type_idx, ty.size_in_bits()),
            Mutation::ChangeTo(type_idx, ty),
        )
    }

    /// Narrow scalars wider than `ty` to `ty`.
    pub fn max_scalar(&mut self, type_idx: usize, ty: LowLevelType) -> &mut Self {
        self.narrow_scalar_if(
            Predicate::ScalarWiderThan(type_idx, ty.size_in_bits()),
            Mutation::ChangeTo(type_idx, ty),
        )
    }

    /// Keep scalar widths of `type_idx` within `[min, max]`.
    pub fn clamp_scalar(&mut self, type_idx: usize, min: LowLevelType, max: LowLevelType) -> &mut Self {
        self.min_scalar(type_idx, min).max_scalar(type_idx, max)
    }

    pub fn min_scalar_or_elt(&mut self, type_idx: usize, ty: LowLevelType) -> &mut Self {
        self.widen_scalar_if(
            Predicate::ScalarOrEltNarrowerThan(type_idx, ty.size_in_bits()),
            Mutation::ChangeElementTo(type_idx, ty),
        )
    }

    pub fn max_scalar_or_elt(&mut self, type_idx: usize, ty: LowLevelType) -> &mut Self {
        self.narrow_scalar_if(
            Predicate::ScalarOrEltWiderThan(type_idx, ty.size_in_bits()),
            Mutation::ChangeElementTo(type_idx, ty),
        )
    }

    /// Like `clamp_scalar`, applied to vector elements as well.
    pub fn clamp_scalar_or_elt(
        &mut self,
        type_idx: usize,
        min: LowLevelType,
        max: LowLevelType,
    ) -> &mut Self {
        self.min_scalar_or_elt(type_idx, min).max_scalar_or_elt(type_idx, max)
    }

    /// Round scalar widths that are not a power of two up, to at least `min` bits.
    pub fn widen_scalar_to_next_pow2(&mut self, type_idx: usize, min: u32) -> &mut Self {
        self.widen_scalar_if(
            Predicate::SizeNotPow2(type_idx),
            Mutation::WidenScalarOrEltToNextPow2 { type_idx, min },
        )
    }

    /// Widen the element of `type_idx` to the element size of `large_idx`.
    pub fn min_scalar_same_as(&mut self, type_idx: usize, large_idx: usize) -> &mut Self {
        self.widen_scalar_if(
            Predicate::ScalarSizeSmallerThan(type_idx, large_idx),
            Mutation::ChangeElementToSizeOf { type_idx, from: large_idx },
        )
    }

    /// Reduce a vector at `type_idx` to its element type.
    pub fn scalarize(&mut self, type_idx: usize) -> &mut Self {
        self.mutating(
            ActionKind::Scalarize,
            Predicate::IsVector(type_idx),
            Mutation::ChangeToElement(type_idx),
        )
    }

    /// Split vectors of `elem` with more than `max` elements.
    pub fn clamp_max_num_elements(&mut self, type_idx: usize, elem: LowLevelType, max: u32) -> &mut Self {
        self.fewer_elements_if(
            Predicate::ElementCountAbove { type_idx, elem, max },
            Mutation::ChangeElementCount { type_idx, count: max },
        )
    }

    /// Pad vectors of `elem` with fewer than `min` elements.
    pub fn clamp_min_num_elements(&mut self, type_idx: usize, elem: LowLevelType, min: u32) -> &mut Self {
        self.more_elements_if(
            Predicate::ElementCountBelow { type_idx, elem, min },
            Mutation::ChangeElementCount { type_idx, count: min },
        )
    }

    /// Keep element counts of vectors of the element type of `min` within the
    /// counts of `min` and `max`.
    pub fn clamp_num_elements(
        &mut self,
        type_idx: usize,
        min: LowLevelType,
        max: LowLevelType,
    ) -> &mut Self {
        let elem = min.scalar_type();
        self.clamp_min_num_elements(type_idx, elem, min.num_elements())
            .clamp_max_num_elements(type_idx, elem, max.num_elements())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const S16: LowLevelType = LowLevelType::scalar(16);
    const S32: LowLevelType = LowLevelType::scalar(32);
    const S64: LowLevelType = LowLevelType::scalar(64);

    #[test]
    fn test_first_match_wins() {
        let mut rs = RuleSet::new();
        rs.legal_for([S32]).clamp_scalar(0, S32, S64).legal();
        assert_eq!(rs.len(), 4);
        assert_eq!(rs.resolve(&TypeQuery::new([S32])), Action::Legal);
        assert_eq!(
            rs.resolve(&TypeQuery::new([S16])),
            Action::WidenScalar { type_idx: 0, new_type: S32 }
        );
        assert_eq!(
            rs.resolve(&TypeQuery::new([LowLevelType::scalar(128)])),
            Action::NarrowScalar { type_idx: 0, new_type: S64 }
        );
        assert_eq!(rs.resolve(&TypeQuery::new([S64])), Action::Legal);
        assert!(rs.has_fallback());
    }

    #[test]
    fn test_no_match_is_unsupported() {
        let mut rs = RuleSet::new();
        rs.legal_for([(S32, S64)]);
        assert_eq!(rs.resolve(&TypeQuery::new([S64, S64])), Action::Unsupported);
        assert!(!rs.has_fallback());
    }

    #[test]
    fn test_cartesian_product_order() {
        let p1 = LowLevelType::pointer(1, 64);
        let mut rs = RuleSet::new();
        rs.legal_for_cartesian_product(&[S64], &[p1, S32]);
        let shapes: Vec<_> = rs
            .rules()
            .iter()
            .flat_map(|r| r.predicate.shapes())
            .map(|(s, _)| s.clone())
            .collect();
        assert_eq!(shapes, vec![Shape(vec![S64, p1]), Shape(vec![S64, S32])]);
    }

    #[test]
    fn test_clamp_num_elements() {
        let mut rs = RuleSet::new();
        rs.clamp_num_elements(0, LowLevelType::vector(2, 64), LowLevelType::vector(8, 64));
        assert_eq!(
            rs.resolve(&TypeQuery::new([LowLevelType::vector(12, 64)])),
            Action::FewerElements { type_idx: 0, new_type: LowLevelType::vector(8, 64) }
        );
        assert_eq!(rs.resolve(&TypeQuery::new([LowLevelType::vector(4, 64)])), Action::Unsupported);
        assert_eq!(rs.resolve(&TypeQuery::new([LowLevelType::vector(12, 32)])), Action::Unsupported);
    }

    #[test]
    fn test_scalarize() {
        let mut rs = RuleSet::new();
        rs.scalarize(0);
        assert_eq!(
            rs.resolve(&TypeQuery::new([LowLevelType::vector(2, 16)])),
            Action::Scalarize { type_idx: 0, new_type: S16 }
        );
    }
}
