use std::convert::TryFrom;
use std::fmt::{self, Display, Formatter};

use enumn::N;
use num_complex::Complex;

/// Category of an element type as the foreign runtime sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, N)]
#[repr(u8)]
pub enum ElementKind {
    Int = 0,
    UInt = 1,
    Float = 2,
    Bool = 3,
    Complex = 4,
}

impl From<ElementKind> for u8 {
    fn from(kind: ElementKind) -> Self {
        kind as u8
    }
}

impl TryFrom<u8> for ElementKind {
    type Error = u8;
    fn try_from(code: u8) -> Result<Self, Self::Error> {
        ElementKind::n(code).ok_or(code)
    }
}

/// Element type tag: a kind and its total width in bits.
///
/// ## Example
///
/// ```
/// use jltensor::ElementType;
/// let c = ElementType::complex(128);
/// assert_eq!(c.size(), 16);
/// assert_eq!(c.to_string(), "ComplexF64");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ElementType {
    pub kind: ElementKind,
    pub bits: u8,
}

impl ElementType {
    pub const fn new(kind: ElementKind, bits: u8) -> ElementType {
        ElementType { kind, bits }
    }

    /// Rebuilds a tag from its raw `(code, bits)` encoding.
    pub fn from_code(code: u8, bits: u8) -> Option<ElementType> {
        ElementKind::n(code).map(|kind| ElementType { kind, bits })
    }

    pub const fn code(&self) -> u8 {
        self.kind as u8
    }

    /// Size of one element in bytes.
    pub const fn size(&self) -> usize {
        self.bits as usize / 8
    }

    pub const fn int(bits: u8) -> ElementType {
        ElementType::new(ElementKind::Int, bits)
    }

    pub const fn uint(bits: u8) -> ElementType {
        ElementType::new(ElementKind::UInt, bits)
    }

    pub const fn float(bits: u8) -> ElementType {
        ElementType::new(ElementKind::Float, bits)
    }

    pub const fn bool() -> ElementType {
        ElementType::new(ElementKind::Bool, 8)
    }

    /// Complex number of `bits` total width (both parts).
    pub const fn complex(bits: u8) -> ElementType {
        ElementType::new(ElementKind::Complex, bits)
    }
}

impl Display for ElementType {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self.kind {
            ElementKind::Int => write!(f, "Int{}", self.bits),
            ElementKind::UInt => write!(f, "UInt{}", self.bits),
            ElementKind::Float => write!(f, "Float{}", self.bits),
            ElementKind::Bool => write!(f, "Bool"),
            ElementKind::Complex => write!(f, "ComplexF{}", self.bits / 2),
        }
    }
}

/// How an element buffer handed out by the foreign runtime is read natively.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageStrategy {
    /// Plain bits type, same layout on both sides.
    Bits { size: usize },
    /// Foreign `Complex{T}` struct of two `part` fields, read as `num_complex::Complex`.
    Complex { part: ElementType },
}

impl StorageStrategy {
    pub const fn of(ty: ElementType) -> StorageStrategy {
        match ty.kind {
            ElementKind::Complex => StorageStrategy::Complex {
                part: ElementType::float(ty.bits / 2),
            },
            _ => StorageStrategy::Bits { size: ty.size() },
        }
    }

    /// Foreign element size this strategy expects.
    pub const fn element_size(&self) -> usize {
        match self {
            StorageStrategy::Bits { size } => *size,
            StorageStrategy::Complex { part } => 2 * part.size(),
        }
    }
}

/// Element types that can live in a foreign array.
///
/// # Safety
///
/// Implementors must have the same size and field layout as the foreign element type named by
/// `ELEMENT_TYPE`, and the all-zero bit pattern must be a valid value.
pub unsafe trait Element: Copy + Default + 'static {
    const ELEMENT_TYPE: ElementType;

    fn strategy() -> StorageStrategy {
        StorageStrategy::of(Self::ELEMENT_TYPE)
    }
}

macro_rules! impl_element {
    ( $( $ty:ty => $elem:expr ),+ $(,)? ) => {
        $(
            unsafe impl Element for $ty {
                const ELEMENT_TYPE: ElementType = $elem;
            }
        )+
    };
}

impl_element!(
    bool => ElementType::bool(),
    i8 => ElementType::int(8),
    i16 => ElementType::int(16),
    i32 => ElementType::int(32),
    i64 => ElementType::int(64),
    u8 => ElementType::uint(8),
    u16 => ElementType::uint(16),
    u32 => ElementType::uint(32),
    u64 => ElementType::uint(64),
    f32 => ElementType::float(32),
    f64 => ElementType::float(64),
    Complex<f32> => ElementType::complex(64),
    Complex<f64> => ElementType::complex(128),
);

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem;

    #[test]
    fn element_sizes_match_rust_layout() {
        fn check<T: Element>() {
            assert_eq!(T::ELEMENT_TYPE.size(), mem::size_of::<T>());
            assert_eq!(T::strategy().element_size(), mem::size_of::<T>());
        }
        check::<bool>();
        check::<i16>();
        check::<u64>();
        check::<f32>();
        check::<Complex<f32>>();
        check::<Complex<f64>>();
    }

    #[test]
    fn complex_selects_its_own_strategy() {
        assert_eq!(
            <Complex<f64>>::strategy(),
            StorageStrategy::Complex {
                part: ElementType::float(64)
            }
        );
        assert_eq!(f64::strategy(), StorageStrategy::Bits { size: 8 });
    }

    #[test]
    fn kind_codes() {
        let c = ElementType::complex(64);
        assert_eq!(ElementType::from_code(c.code(), c.bits), Some(c));
        assert_eq!(ElementKind::try_from(9u8), Err(9));
        assert_eq!(u8::from(ElementKind::Float), 2);
        assert_eq!(ElementType::uint(16).to_string(), "UInt16");
    }
}
