// This module defines legality predicates: pure, deterministic functions from a type
// query to bool. Common predicates are small enum variants over type indices so the
// table verifier can inspect which indices and types a rule mentions; arbitrary logic
// uses the Custom variant, a shared closure that must declare the type indices it
// reads. Predicates compose through All, Any and Not. Everything is Clone and
// Send + Sync so a frozen table can be read by many workers at once.

//! Legality predicates over type queries.

use std::fmt;
use std::sync::Arc;

use crate::core::{LowLevelType, TypeQuery};

/// Exact types of every type index of a query.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Shape(pub Vec<LowLevelType>);

impl Shape {
    pub fn arity(&self) -> usize {
        self.0.len()
    }

    pub fn types(&self) -> &[LowLevelType] {
        &self.0
    }
}

impl From<LowLevelType> for Shape {
    fn from(ty: LowLevelType) -> Self {
        Shape(vec![ty])
    }
}

impl From<(LowLevelType, LowLevelType)> for Shape {
    fn from((a, b): (LowLevelType, LowLevelType)) -> Self {
        Shape(vec![a, b])
    }
}

impl From<(LowLevelType, LowLevelType, LowLevelType)> for Shape {
    fn from((a, b, c): (LowLevelType, LowLevelType, LowLevelType)) -> Self {
        Shape(vec![a, b, c])
    }
}

impl<const N: usize> From<[LowLevelType; N]> for Shape {
    fn from(types: [LowLevelType; N]) -> Self {
        Shape(types.to_vec())
    }
}

impl From<Vec<LowLevelType>> for Shape {
    fn from(types: Vec<LowLevelType>) -> Self {
        Shape(types)
    }
}

/// Shared closure behind `Predicate::Custom`.
pub type PredicateFn = Arc<dyn Fn(&TypeQuery) -> bool + Send + Sync>;

/// A legality predicate.
#[derive(Clone)]
pub enum Predicate {
    Always,
    /// The query has exactly these types.
    Shape(Shape),
    /// Exact types plus a minimum alignment and exact size of the first
    /// memory operand.
    ShapeWithMem { shape: Shape, mem_size: u32, min_align: u32 },
    TypeIs(usize, LowLevelType),
    TypeInSet(usize, Vec<LowLevelType>),
    IsScalar(usize),
    IsPointer(usize),
    IsVector(usize),
    /// Scalar narrower than the given width.
    ScalarNarrowerThan(usize, u32),
    /// Scalar wider than the given width.
    ScalarWiderThan(usize, u32),
    /// Scalar, or vector of scalars, whose element is narrower than the width.
    ScalarOrEltNarrowerThan(usize, u32),
    ScalarOrEltWiderThan(usize, u32),
    /// Scalar whose width is not a power of two.
    SizeNotPow2(usize),
    SameSize(usize, usize),
    /// Total size of the first index is smaller than the second's.
    SmallerThan(usize, usize),
    LargerThan(usize, usize),
    /// Element size of the first index is smaller than the element size of the second.
    ScalarSizeSmallerThan(usize, usize),
    VectorWiderThan(usize, u32),
    NumElementsNotEven(usize),
    /// Vector with an odd element count and elements narrower than the width.
    SmallOddVector(usize, u32),
    /// Vector of `elem` with more than `max` elements.
    ElementCountAbove { type_idx: usize, elem: LowLevelType, max: u32 },
    /// Vector of `elem` with fewer than `min` elements.
    ElementCountBelow { type_idx: usize, elem: LowLevelType, min: u32 },
    /// Size of the memory operand is not a power of two.
    MemSizeNotPow2(usize),
    All(Vec<Predicate>),
    Any(Vec<Predicate>),
    Not(Box<Predicate>),
    Custom { type_indices: Vec<usize>, f: PredicateFn },
}

impl Predicate {
    /// Wrap a closure reading the given type indices.
    pub fn custom<F>(type_indices: &[usize], f: F) -> Self
    where
        F: Fn(&TypeQuery) -> bool + Send + Sync + 'static,
    {
        Predicate::Custom { type_indices: type_indices.to_vec(), f: Arc::new(f) }
    }

    pub fn all(preds: impl IntoIterator<Item = Predicate>) -> Self {
        Predicate::All(preds.into_iter().collect())
    }

    pub fn any(preds: impl IntoIterator<Item = Predicate>) -> Self {
        Predicate::Any(preds.into_iter().collect())
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(pred: Predicate) -> Self {
        Predicate::Not(Box::new(pred))
    }

    pub fn evaluate(&self, q: &TypeQuery) -> bool {
        let ty = |idx: usize| q.types[idx];
        match self {
            Predicate::Always => true,
            Predicate::Shape(shape) => q.types == shape.0,
            Predicate::ShapeWithMem { shape, mem_size, min_align } => {
                q.types == shape.0
                    && q.mem
                        .first()
                        .is_some_and(|m| m.size_in_bits == *mem_size && m.align_in_bits >= *min_align)
            }
            Predicate::TypeIs(idx, t) => ty(*idx) == *t,
            Predicate::TypeInSet(idx, set) => set.contains(&ty(*idx)),
            Predicate::IsScalar(idx) => ty(*idx).is_scalar(),
            Predicate::IsPointer(idx) => ty(*idx).is_pointer(),
            Predicate::IsVector(idx) => ty(*idx).is_vector(),
            Predicate::ScalarNarrowerThan(idx, bits) => {
                ty(*idx).is_scalar() && ty(*idx).size_in_bits() < *bits
            }
            Predicate::ScalarWiderThan(idx, bits) => {
                ty(*idx).is_scalar() && ty(*idx).size_in_bits() > *bits
            }
            Predicate::ScalarOrEltNarrowerThan(idx, bits) => {
                ty(*idx).scalar_type().is_scalar() && ty(*idx).scalar_size_in_bits() < *bits
            }
            Predicate::ScalarOrEltWiderThan(idx, bits) => {
                ty(*idx).scalar_type().is_scalar() && ty(*idx).scalar_size_in_bits() > *bits
            }
            Predicate::SizeNotPow2(idx) => {
                ty(*idx).is_scalar() && !ty(*idx).size_in_bits().is_power_of_two()
            }
            Predicate::SameSize(a, b) => ty(*a).size_in_bits() == ty(*b).size_in_bits(),
            Predicate::SmallerThan(a, b) => ty(*a).size_in_bits() < ty(*b).size_in_bits(),
            Predicate::LargerThan(a, b) => ty(*a).size_in_bits() > ty(*b).size_in_bits(),
            Predicate::ScalarSizeSmallerThan(a, b) => {
                ty(*a).scalar_size_in_bits() < ty(*b).scalar_size_in_bits()
            }
            Predicate::VectorWiderThan(idx, bits) => {
                ty(*idx).is_vector() && ty(*idx).size_in_bits() > *bits
            }
            Predicate::NumElementsNotEven(idx) => {
                ty(*idx).is_vector() && ty(*idx).num_elements() % 2 != 0
            }
            Predicate::SmallOddVector(idx, bits) => {
                let t = ty(*idx);
                t.is_vector() && t.num_elements() % 2 != 0 && t.scalar_size_in_bits() < *bits
            }
            Predicate::ElementCountAbove { type_idx, elem, max } => {
                let t = ty(*type_idx);
                t.is_vector() && t.scalar_type() == *elem && t.num_elements() > *max
            }
            Predicate::ElementCountBelow { type_idx, elem, min } => {
                let t = ty(*type_idx);
                t.is_vector() && t.scalar_type() == *elem && t.num_elements() < *min
            }
            Predicate::MemSizeNotPow2(mem_idx) => q
                .mem
                .get(*mem_idx)
                .is_some_and(|m| !m.size_in_bits.is_power_of_two()),
            Predicate::All(preds) => preds.iter().all(|p| p.evaluate(q)),
            Predicate::Any(preds) => preds.iter().any(|p| p.evaluate(q)),
            Predicate::Not(pred) => !pred.evaluate(q),
            Predicate::Custom { f, .. } => f(q),
        }
    }

    /// Whether the predicate matches every query.
    pub fn is_always(&self) -> bool {
        match self {
            Predicate::Always => true,
            Predicate::All(preds) => preds.iter().all(Predicate::is_always),
            Predicate::Any(preds) => preds.iter().any(Predicate::is_always),
            _ => false,
        }
    }

    /// Type indices the predicate reads.
    pub fn type_indices(&self) -> Vec<usize> {
        let mut out = Vec::new();
        self.collect_type_indices(&mut out);
        out
    }

    fn collect_type_indices(&self, out: &mut Vec<usize>) {
        match self {
            Predicate::Always | Predicate::MemSizeNotPow2(_) => {}
            Predicate::Shape(shape) | Predicate::ShapeWithMem { shape, .. } => {
                out.extend(0..shape.arity())
            }
            Predicate::TypeIs(idx, _)
            | Predicate::TypeInSet(idx, _)
            | Predicate::IsScalar(idx)
            | Predicate::IsPointer(idx)
            | Predicate::IsVector(idx)
            | Predicate::ScalarNarrowerThan(idx, _)
            | Predicate::ScalarWiderThan(idx, _)
            | Predicate::ScalarOrEltNarrowerThan(idx, _)
            | Predicate::ScalarOrEltWiderThan(idx, _)
            | Predicate::SizeNotPow2(idx)
            | Predicate::VectorWiderThan(idx, _)
            | Predicate::NumElementsNotEven(idx)
            | Predicate::SmallOddVector(idx, _)
            | Predicate::ElementCountAbove { type_idx: idx, .. }
            | Predicate::ElementCountBelow { type_idx: idx, .. } => out.push(*idx),
            Predicate::SameSize(a, b)
            | Predicate::SmallerThan(a, b)
            | Predicate::LargerThan(a, b)
            | Predicate::ScalarSizeSmallerThan(a, b) => {
                out.push(*a);
                out.push(*b);
            }
            Predicate::All(preds) | Predicate::Any(preds) => {
                preds.iter().for_each(|p| p.collect_type_indices(out))
            }
            Predicate::Not(pred) => pred.collect_type_indices(out),
            Predicate::Custom { type_indices, .. } => out.extend(type_indices.iter().copied()),
        }
    }

    /// Exact shapes the predicate accepts, with their memory descriptor if any.
    pub fn shapes(&self) -> Vec<(&Shape, Option<(u32, u32)>)> {
        match self {
            Predicate::Shape(shape) => vec![(shape, None)],
            Predicate::ShapeWithMem { shape, mem_size, min_align } => {
                vec![(shape, Some((*mem_size, *min_align)))]
            }
            Predicate::All(preds) | Predicate::Any(preds) => {
                preds.iter().flat_map(Predicate::shapes).collect()
            }
            _ => Vec::new(),
        }
    }

    /// Types the predicate names explicitly.
    pub fn collect_types(&self, out: &mut Vec<LowLevelType>) {
        match self {
            Predicate::Shape(shape) | Predicate::ShapeWithMem { shape, .. } => {
                shape.0.iter().for_each(|t| push_unique(out, *t))
            }
            Predicate::TypeIs(_, t) => push_unique(out, *t),
            Predicate::TypeInSet(_, set) => set.iter().for_each(|t| push_unique(out, *t)),
            Predicate::All(preds) | Predicate::Any(preds) => {
                preds.iter().for_each(|p| p.collect_types(out))
            }
            Predicate::Not(pred) => pred.collect_types(out),
            _ => {}
        }
    }
}

pub(crate) fn push_unique(out: &mut Vec<LowLevelType>, ty: LowLevelType) {
    if !out.contains(&ty) {
        out.push(ty);
    }
}

impl fmt::Debug for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::Always => write!(f, "Always"),
            Predicate::Shape(shape) => write!(f, "Shape({:?})", shape.0),
            Predicate::ShapeWithMem { shape, mem_size, min_align } => {
                write!(f, "ShapeWithMem({:?}, {}, {})", shape.0, mem_size, min_align)
            }
            Predicate::TypeIs(idx, t) => write!(f, "TypeIs({idx}, {t})"),
            Predicate::TypeInSet(idx, set) => write!(f, "TypeInSet({idx}, {set:?})"),
            Predicate::IsScalar(idx) => write!(f, "IsScalar({idx})"),
            Predicate::IsPointer(idx) => write!(f, "IsPointer({idx})"),
            Predicate::IsVector(idx) => write!(f, "IsVector({idx})"),
            Predicate::ScalarNarrowerThan(idx, b) => write!(f, "ScalarNarrowerThan({idx}, {b})"),
            Predicate::ScalarWiderThan(idx, b) => write!(f, "ScalarWiderThan({idx}, {b})"),
            Predicate::ScalarOrEltNarrowerThan(idx, b) => {
                write!(f, "ScalarOrEltNarrowerThan({idx}, {b})")
            }
            Predicate::ScalarOrEltWiderThan(idx, b) => write!(f, "ScalarOrEltWiderThan({idx}, {b})"),
            Predicate::SizeNotPow2(idx) => write!(f, "SizeNotPow2({idx})"),
            Predicate::SameSize(a, b) => write!(f, "SameSize({a}, {b})"),
            Predicate::SmallerThan(a, b) => write!(f, "SmallerThan({a}, {b})"),
            Predicate::LargerThan(a, b) => write!(f, "LargerThan({a}, {b})"),
            Predicate::ScalarSizeSmallerThan(a, b) => write!(f, "ScalarSizeSmallerThan({a}, {b})"),
            Predicate::VectorWiderThan(idx, b) => write!(f, "VectorWiderThan({idx}, {b})"),
            Predicate::NumElementsNotEven(idx) => write!(f, "NumElementsNotEven({idx})"),
            Predicate::SmallOddVector(idx, b) => write!(f, "SmallOddVector({idx}, {b})"),
            Predicate::ElementCountAbove { type_idx, elem, max } => {
                write!(f, "ElementCountAbove({type_idx}, {elem}, {max})")
            }
            Predicate::ElementCountBelow { type_idx, elem, min } => {
                write!(f, "ElementCountBelow({type_idx}, {elem}, {min})")
            }
            Predicate::MemSizeNotPow2(idx) => write!(f, "MemSizeNotPow2({idx})"),
            Predicate::All(preds) => f.debug_tuple("All").field(preds).finish(),
            Predicate::Any(preds) => f.debug_tuple("Any").field(preds).finish(),
            Predicate::Not(pred) => f.debug_tuple("Not").field(pred).finish(),
            Predicate::Custom { type_indices, .. } => write!(f, "Custom({type_indices:?})"),
        }
    }
}
