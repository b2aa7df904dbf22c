use std::fmt;
use std::marker::PhantomData;
use std::mem;
use std::os::raw::c_void;
use std::ptr::NonNull;
use std::slice;

use crate::{
    datatype::{Element, StorageStrategy},
    errors::{Error, Result},
};

/// Non-owning view of a foreign element buffer.
///
/// The buffer belongs to the foreign array held by the same [`JlTensor`](crate::JlTensor);
/// a `Storage` on its own keeps nothing alive.
pub struct Storage<T> {
    ptr: NonNull<T>,
    len: usize,
    strategy: StorageStrategy,
    _marker: PhantomData<T>,
}

impl StorageStrategy {
    /// Reinterprets `len` foreign elements of `elsize` bytes at `data` as native `T`s.
    ///
    /// # Safety
    ///
    /// `data` must point to `len` initialised elements that stay alive and unaliased by other
    /// mutable views for as long as the returned storage is used.
    pub unsafe fn bind<T: Element>(
        &self,
        data: *mut c_void,
        len: usize,
        elsize: usize,
    ) -> Result<Storage<T>> {
        let expected = self.element_size();
        if elsize != expected {
            return Err(Error::ElementSizeMismatch {
                expected,
                found: elsize,
            });
        }
        match self {
            StorageStrategy::Bits { size } => debug_assert_eq!(*size, mem::size_of::<T>()),
            // `Complex{T}` is two consecutive parts, which is `num_complex::Complex`'s repr(C)
            StorageStrategy::Complex { part } => {
                debug_assert_eq!(2 * part.size(), mem::size_of::<T>())
            }
        }
        let ptr = NonNull::new(data as *mut T).ok_or(Error::Misaligned)?;
        if ptr.as_ptr() as usize % mem::align_of::<T>() != 0 {
            return Err(Error::Misaligned);
        }
        Ok(Storage {
            ptr,
            len,
            strategy: *self,
            _marker: PhantomData,
        })
    }
}

impl<T> Storage<T> {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn strategy(&self) -> StorageStrategy {
        self.strategy
    }

    pub fn as_ptr(&self) -> *const T {
        self.ptr.as_ptr()
    }

    pub fn as_mut_ptr(&mut self) -> *mut T {
        self.ptr.as_ptr()
    }

    pub fn as_slice(&self) -> &[T] {
        unsafe { slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        unsafe { slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

impl<T: fmt::Debug> fmt::Debug for Storage<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Storage")
            .field("strategy", &self.strategy)
            .field("data", &self.as_slice())
            .finish()
    }
}
