//! Column-major shape bookkeeping.

use crate::errors::{Error, Result};

/// Column-major strides and backstrides of `shape`, in elements.
///
/// Dimensions of extent 1 get a zero stride so they broadcast; the backstride of a dimension is
/// `stride * (extent - 1)`.
///
/// ```
/// let (strides, backstrides) = jltensor::layout::compute_strides(&[2, 3, 4]);
/// assert_eq!(strides, [1, 2, 6]);
/// assert_eq!(backstrides, [1, 4, 18]);
/// ```
pub fn compute_strides<const N: usize>(shape: &[usize; N]) -> ([isize; N], [isize; N]) {
    let mut strides = [0isize; N];
    let mut backstrides = [0isize; N];
    let mut step = 1isize;
    for k in 0..N {
        let extent = shape[k] as isize;
        if extent != 1 {
            strides[k] = step;
        }
        backstrides[k] = strides[k] * (extent - 1).max(0);
        step *= extent;
    }
    (strides, backstrides)
}

/// Element count of `shape`.
pub fn checked_len(shape: &[usize]) -> Result<usize> {
    shape
        .iter()
        .try_fold(1usize, |acc, d| acc.checked_mul(*d))
        .ok_or(Error::ShapeOverflow)
}

/// Fixes a dynamically sized shape to rank `N`.
pub fn fixed_shape<const N: usize>(shape: &[usize]) -> Result<[usize; N]> {
    if shape.len() != N {
        return Err(Error::RankMismatch {
            expected: N,
            found: shape.len(),
        });
    }
    let mut fixed = [0usize; N];
    fixed.copy_from_slice(shape);
    Ok(fixed)
}

/// Offset of `index` in column-major storage, or `None` when out of bounds.
pub fn offset<const N: usize>(
    shape: &[usize; N],
    strides: &[isize; N],
    index: &[usize; N],
) -> Option<usize> {
    let mut offset = 0isize;
    for k in 0..N {
        if index[k] >= shape[k] {
            return None;
        }
        offset += index[k] as isize * strides[k];
    }
    Some(offset as usize)
}
