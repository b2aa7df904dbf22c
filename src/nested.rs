//! Nested literal lists as tensor initialisers.
//!
//! A `Vec<Vec<f64>>`, `[[f64; 3]; 2]` or `&[[f64; 3]]` of depth `N` describes a rank-`N` tensor:
//! the outermost list runs along the first index and the innermost along the last, so
//! `list[i][j]` becomes element `[i, j]`.

use num_complex::Complex;

use crate::errors::{Error, Result};

pub trait Nested<T> {
    /// Nesting depth; scalars have depth 0.
    const DEPTH: usize;

    /// Records the length of every level at and below `level`, rejecting ragged lists.
    fn extents(&self, level: usize, extents: &mut [Option<usize>]) -> Result<()>;

    /// Visits the scalars with the last index varying fastest.
    fn for_each(&self, f: &mut dyn FnMut(T));
}

/// Shape described by `list`. Levels below an empty list have extent 0.
pub fn shape_of<T, L: Nested<T> + ?Sized>(list: &L) -> Result<Vec<usize>> {
    let mut extents = vec![None; L::DEPTH];
    list.extents(0, &mut extents)?;
    Ok(extents.into_iter().map(|e| e.unwrap_or(0)).collect())
}

fn slice_extents<T, U: Nested<T>>(
    items: &[U],
    level: usize,
    extents: &mut [Option<usize>],
) -> Result<()> {
    match extents[level] {
        None => extents[level] = Some(items.len()),
        Some(len) if len != items.len() => return Err(Error::RaggedList { level }),
        Some(_) => {}
    }
    items
        .iter()
        .try_for_each(|item| item.extents(level + 1, extents))
}

impl<T, U: Nested<T>> Nested<T> for Vec<U> {
    const DEPTH: usize = U::DEPTH + 1;

    fn extents(&self, level: usize, extents: &mut [Option<usize>]) -> Result<()> {
        slice_extents(self, level, extents)
    }

    fn for_each(&self, f: &mut dyn FnMut(T)) {
        self.iter().for_each(|item| item.for_each(f))
    }
}

impl<T, U: Nested<T>, const M: usize> Nested<T> for [U; M] {
    const DEPTH: usize = U::DEPTH + 1;

    fn extents(&self, level: usize, extents: &mut [Option<usize>]) -> Result<()> {
        slice_extents(self, level, extents)
    }

    fn for_each(&self, f: &mut dyn FnMut(T)) {
        self.iter().for_each(|item| item.for_each(f))
    }
}

impl<'a, T, U: Nested<T>> Nested<T> for &'a [U] {
    const DEPTH: usize = U::DEPTH + 1;

    fn extents(&self, level: usize, extents: &mut [Option<usize>]) -> Result<()> {
        slice_extents(self, level, extents)
    }

    fn for_each(&self, f: &mut dyn FnMut(T)) {
        self.iter().for_each(|item| item.for_each(f))
    }
}

macro_rules! impl_leaf {
    ( $( $ty:ty ),+ $(,)? ) => {
        $(
            impl Nested<$ty> for $ty {
                const DEPTH: usize = 0;

                fn extents(&self, _level: usize, _extents: &mut [Option<usize>]) -> Result<()> {
                    Ok(())
                }

                fn for_each(&self, f: &mut dyn FnMut($ty)) {
                    f(*self)
                }
            }
        )+
    };
}

impl_leaf!(bool, i8, i16, i32, i64, u8, u16, u32, u64, f32, f64, Complex<f32>, Complex<f64>);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shape_from_depth() {
        let list = vec![vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]];
        assert_eq!(<Vec<Vec<f64>> as Nested<f64>>::DEPTH, 2);
        assert_eq!(shape_of(&list).unwrap(), vec![2, 3]);

        let cube = [[[0i32; 4]; 3]; 2];
        assert_eq!(shape_of(&cube).unwrap(), vec![2, 3, 4]);
    }

    #[test]
    fn leaves_in_row_major_order() {
        let list = [[1u8, 2], [3, 4], [5, 6]];
        let mut seen = Vec::new();
        list.for_each(&mut |v| seen.push(v));
        assert_eq!(seen, vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn ragged_lists_are_rejected() {
        let list = vec![vec![1i64, 2], vec![3]];
        assert!(matches!(shape_of(&list), Err(Error::RaggedList { level: 1 })));
    }

    #[test]
    fn empty_levels() {
        let list: Vec<Vec<f32>> = vec![];
        assert_eq!(shape_of(&list).unwrap(), vec![0, 0]);
        let rows: &[[f32; 2]] = &[];
        assert_eq!(shape_of(&rows).unwrap(), vec![0, 0]);
    }
}
