// This module defines legalization mutations: given the query a rule matched, compute
// which type index to change and the type it becomes. As with predicates, the common
// cases are enum variants the verifier can inspect, and arbitrary logic goes through a
// shared closure declaring the type indices it reads and writes.

//! Type mutations applied by non-terminal rules.

use std::fmt;
use std::sync::Arc;

use crate::core::{LowLevelType, TypeQuery};

/// Shared closure behind `Mutation::Custom`.
pub type MutationFn = Arc<dyn Fn(&TypeQuery) -> (usize, LowLevelType) + Send + Sync>;

/// Computes the new type of one type index.
#[derive(Clone)]
pub enum Mutation {
    /// Replace the type outright.
    ChangeTo(usize, LowLevelType),
    /// Replace a vector by its element type.
    ChangeToElement(usize),
    /// Keep the element count, use `elem` as element (or scalar) type.
    ChangeElementTo(usize, LowLevelType),
    /// Use a scalar of the element size of `from` as element type of `type_idx`.
    ChangeElementToSizeOf { type_idx: usize, from: usize },
    /// Use a scalar of the total size of `from`.
    ScalarSizeOf { type_idx: usize, from: usize },
    /// Round the scalar or element width up to a power of two, at least `min`.
    WidenScalarOrEltToNextPow2 { type_idx: usize, min: u32 },
    /// Keep the element type, use `count` elements.
    ChangeElementCount { type_idx: usize, count: u32 },
    /// Add one vector element.
    OneMoreElement(usize),
    /// Split a vector into pieces of at most `size` bits.
    FewerElementsToSize { type_idx: usize, size: u32 },
    Custom { type_indices: Vec<usize>, f: MutationFn },
}

impl Mutation {
    /// Wrap a closure reading (and changing one of) the given type indices.
    pub fn custom<F>(type_indices: &[usize], f: F) -> Self
    where
        F: Fn(&TypeQuery) -> (usize, LowLevelType) + Send + Sync + 'static,
    {
        Mutation::Custom { type_indices: type_indices.to_vec(), f: Arc::new(f) }
    }

    pub fn apply(&self, q: &TypeQuery) -> (usize, LowLevelType) {
        let ty = |idx: usize| q.types[idx];
        match self {
            Mutation::ChangeTo(idx, t) => (*idx, *t),
            Mutation::ChangeToElement(idx) => (*idx, ty(*idx).scalar_type()),
            Mutation::ChangeElementTo(idx, elem) => (*idx, ty(*idx).change_element_type(*elem)),
            Mutation::ChangeElementToSizeOf { type_idx, from } => {
                let elem = LowLevelType::scalar(ty(*from).scalar_size_in_bits());
                (*type_idx, ty(*type_idx).change_element_type(elem))
            }
            Mutation::ScalarSizeOf { type_idx, from } => {
                (*type_idx, LowLevelType::scalar(ty(*from).size_in_bits()))
            }
            Mutation::WidenScalarOrEltToNextPow2 { type_idx, min } => {
                let t = ty(*type_idx);
                let bits = t.scalar_size_in_bits().next_power_of_two().max(*min);
                (*type_idx, t.change_element_type(LowLevelType::scalar(bits)))
            }
            Mutation::ChangeElementCount { type_idx, count } => {
                (*type_idx, ty(*type_idx).change_element_count(*count))
            }
            Mutation::OneMoreElement(idx) => {
                let t = ty(*idx);
                (*idx, LowLevelType::vector_of(t.num_elements() + 1, t.scalar_type()))
            }
            Mutation::FewerElementsToSize { type_idx, size } => {
                let t = ty(*type_idx);
                let pieces = t.size_in_bits().div_ceil(*size).max(1);
                let count = ((t.num_elements() + 1) / pieces).max(1);
                (*type_idx, t.change_element_count(count))
            }
            Mutation::Custom { f, .. } => f(q),
        }
    }

    /// Type indices the mutation reads or writes.
    pub fn type_indices(&self) -> Vec<usize> {
        match self {
            Mutation::ChangeTo(idx, _)
            | Mutation::ChangeToElement(idx)
            | Mutation::ChangeElementTo(idx, _)
            | Mutation::OneMoreElement(idx)
            | Mutation::WidenScalarOrEltToNextPow2 { type_idx: idx, .. }
            | Mutation::ChangeElementCount { type_idx: idx, .. }
            | Mutation::FewerElementsToSize { type_idx: idx, .. } => vec![*idx],
            Mutation::ChangeElementToSizeOf { type_idx, from }
            | Mutation::ScalarSizeOf { type_idx, from } => vec![*type_idx, *from],
            Mutation::Custom { type_indices, .. } => type_indices.clone(),
        }
    }

    /// Types the mutation names explicitly.
    pub fn collect_types(&self, out: &mut Vec<LowLevelType>) {
        match self {
            Mutation::ChangeTo(_, t) => super::predicate::push_unique(out, *t),
            Mutation::ChangeElementTo(_, t) => super::predicate::push_unique(out, *t),
            _ => {}
        }
    }
}

impl fmt::Debug for Mutation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mutation::ChangeTo(idx, t) => write!(f, "ChangeTo({idx}, {t})"),
            Mutation::ChangeToElement(idx) => write!(f, "ChangeToElement({idx})"),
            Mutation::ChangeElementTo(idx, t) => write!(f, "ChangeElementTo({idx}, {t})"),
            Mutation::ChangeElementToSizeOf { type_idx, from } => {
                write!(f, "ChangeElementToSizeOf({type_idx}, {from})")
            }
            Mutation::ScalarSizeOf { type_idx, from } => write!(f, "ScalarSizeOf({type_idx}, {from})"),
            Mutation::WidenScalarOrEltToNextPow2 { type_idx, min } => {
                write!(f, "WidenScalarOrEltToNextPow2({type_idx}, {min})")
            }
            Mutation::ChangeElementCount { type_idx, count } => {
                write!(f, "ChangeElementCount({type_idx}, {count})")
            }
            Mutation::OneMoreElement(idx) => write!(f, "OneMoreElement({idx})"),
            Mutation::FewerElementsToSize { type_idx, size } => {
                write!(f, "FewerElementsToSize({type_idx}, {size})")
            }
            Mutation::Custom { type_indices, .. } => write!(f, "Custom({type_indices:?})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fewer_elements_to_size() {
        let m = Mutation::FewerElementsToSize { type_idx: 0, size: 64 };
        let apply = |t: LowLevelType| m.apply(&TypeQuery::new([t])).1;
        assert_eq!(apply(LowLevelType::vector(4, 32)), LowLevelType::vector(2, 32));
        assert_eq!(apply(LowLevelType::vector(3, 32)), LowLevelType::vector(2, 32));
        assert_eq!(apply(LowLevelType::vector(8, 16)), LowLevelType::vector(4, 16));
        assert_eq!(apply(LowLevelType::vector(3, 64)), LowLevelType::scalar(64));
        assert_eq!(apply(LowLevelType::vector(16, 32)), LowLevelType::vector(2, 32));
    }

    #[test]
    fn test_widen_to_next_pow2() {
        let m = Mutation::WidenScalarOrEltToNextPow2 { type_idx: 0, min: 16 };
        let apply = |t: LowLevelType| m.apply(&TypeQuery::new([t])).1;
        assert_eq!(apply(LowLevelType::scalar(1)), LowLevelType::scalar(16));
        assert_eq!(apply(LowLevelType::scalar(24)), LowLevelType::scalar(32));
        assert_eq!(apply(LowLevelType::vector(3, 8)), LowLevelType::vector(3, 16));
    }

    #[test]
    fn test_element_changes() {
        let q = TypeQuery::new([LowLevelType::vector(3, 16), LowLevelType::scalar(8)]);
        assert_eq!(Mutation::OneMoreElement(0).apply(&q), (0, LowLevelType::vector(4, 16)));
        assert_eq!(Mutation::ChangeToElement(0).apply(&q), (0, LowLevelType::scalar(16)));
        assert_eq!(
            Mutation::ChangeElementToSizeOf { type_idx: 1, from: 0 }.apply(&q),
            (1, LowLevelType::scalar(16))
        );
        assert_eq!(
            Mutation::ScalarSizeOf { type_idx: 1, from: 0 }.apply(&q),
            (1, LowLevelType::scalar(48))
        );
        assert_eq!(Mutation::ChangeElementCount { type_idx: 0, count: 1 }.apply(&q).1, LowLevelType::scalar(16));
    }
}
