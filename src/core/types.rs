// This module defines LowLevelType, the representation-only type attached to every
// virtual value of generic machine IR. A low-level type only knows its shape: a plain
// scalar of some bit width, a pointer into an address space with a target defined
// width, or a fixed-length vector of scalars or pointers. It deliberately carries no
// notion of integer vs floating point, signedness or aggregate structure, because the
// legalizer only reasons about what registers the target can hold. The helpers mirror
// the queries rule predicates and mutations need: total and element sizes, element
// counts, element replacement and scalar-or-vector construction.

//! Low-level types for generic machine IR.

use std::fmt;

/// Element of a vector type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementType {
    Scalar(u32),
    Pointer { addr_space: u32, bits: u32 },
}

impl ElementType {
    pub const fn size_in_bits(self) -> u32 {
        match self {
            ElementType::Scalar(bits) => bits,
            ElementType::Pointer { bits, .. } => bits,
        }
    }

    /// The element viewed as a standalone type.
    pub const fn to_type(self) -> LowLevelType {
        match self {
            ElementType::Scalar(bits) => LowLevelType::Scalar(bits),
            ElementType::Pointer { addr_space, bits } => LowLevelType::Pointer { addr_space, bits },
        }
    }

    /// Element type of `ty`; vectors yield their own element.
    pub const fn of(ty: LowLevelType) -> Self {
        match ty {
            LowLevelType::Scalar(bits) => ElementType::Scalar(bits),
            LowLevelType::Pointer { addr_space, bits } => ElementType::Pointer { addr_space, bits },
            LowLevelType::Vector { elem, .. } => elem,
        }
    }
}

/// Shape of a value: scalar, pointer or vector.
///
/// Invariants: every bit width is non-zero and every vector has at least one
/// element. The constructors enforce both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LowLevelType {
    Scalar(u32),
    Pointer { addr_space: u32, bits: u32 },
    Vector { count: u32, elem: ElementType },
}

impl LowLevelType {
    pub const fn scalar(bits: u32) -> Self {
        assert!(bits > 0, "scalar width must be non-zero");
        LowLevelType::Scalar(bits)
    }

    pub const fn pointer(addr_space: u32, bits: u32) -> Self {
        assert!(bits > 0, "pointer width must be non-zero");
        LowLevelType::Pointer { addr_space, bits }
    }

    /// Vector of `count` scalars of `elem_bits` each.
    pub const fn vector(count: u32, elem_bits: u32) -> Self {
        assert!(count >= 1, "vector needs at least one element");
        assert!(elem_bits > 0, "element width must be non-zero");
        LowLevelType::Vector { count, elem: ElementType::Scalar(elem_bits) }
    }

    /// Vector of `count` elements of type `elem` (its scalar type if `elem` is a vector).
    pub const fn vector_of(count: u32, elem: LowLevelType) -> Self {
        assert!(count >= 1, "vector needs at least one element");
        LowLevelType::Vector { count, elem: ElementType::of(elem) }
    }

    /// A vector of `count` elements, or the element itself when `count == 1`.
    pub const fn scalar_or_vector(count: u32, elem: LowLevelType) -> Self {
        if count == 1 {
            elem.scalar_type()
        } else {
            Self::vector_of(count, elem)
        }
    }

    pub const fn is_scalar(self) -> bool {
        matches!(self, LowLevelType::Scalar(_))
    }

    pub const fn is_pointer(self) -> bool {
        matches!(self, LowLevelType::Pointer { .. })
    }

    pub const fn is_vector(self) -> bool {
        matches!(self, LowLevelType::Vector { .. })
    }

    /// Number of elements; scalars and pointers count as one.
    pub const fn num_elements(self) -> u32 {
        match self {
            LowLevelType::Vector { count, .. } => count,
            _ => 1,
        }
    }

    pub const fn size_in_bits(self) -> u32 {
        match self {
            LowLevelType::Scalar(bits) => bits,
            LowLevelType::Pointer { bits, .. } => bits,
            LowLevelType::Vector { count, elem } => count * elem.size_in_bits(),
        }
    }

    /// Element type for vectors, the type itself otherwise.
    pub const fn scalar_type(self) -> LowLevelType {
        ElementType::of(self).to_type()
    }

    pub const fn scalar_size_in_bits(self) -> u32 {
        ElementType::of(self).size_in_bits()
    }

    /// Address space of a pointer or of a vector of pointers.
    pub const fn address_space(self) -> Option<u32> {
        match ElementType::of(self) {
            ElementType::Pointer { addr_space, .. } => Some(addr_space),
            ElementType::Scalar(_) => None,
        }
    }

    /// Replace the element type, keeping the element count.
    pub const fn change_element_type(self, elem: LowLevelType) -> LowLevelType {
        match self {
            LowLevelType::Vector { count, .. } => LowLevelType::vector_of(count, elem),
            _ => elem.scalar_type(),
        }
    }

    /// Keep the element type, use `count` elements.
    pub const fn change_element_count(self, count: u32) -> LowLevelType {
        LowLevelType::scalar_or_vector(count, self.scalar_type())
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElementType::Scalar(bits) => write!(f, "s{bits}"),
            ElementType::Pointer { addr_space, .. } => write!(f, "p{addr_space}"),
        }
    }
}

impl fmt::Display for LowLevelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LowLevelType::Vector { count, elem } => write!(f, "<{count} x {elem}>"),
            other => write!(f, "{}", ElementType::of(*other)),
        }
    }
}
