//! C layout of the foreign array objects exchanged by `jltensor`.
//!
//! These mirror the array header of the embedded Julia runtime: a data pointer, the element
//! count, packed flags holding the dimension count, the element size and the extents stored
//! contiguously starting at `nrows`. Values of these types are only ever created by the
//! foreign runtime; Rust code reads them through the accessor functions below.
#![allow(non_camel_case_types)]

use std::os::raw::c_void;
use std::slice;

pub const JLTENSOR_VERSION_MAJOR: u32 = 0;
pub const JLTENSOR_VERSION_MINOR: u32 = 10;
pub const JLTENSOR_VERSION_PATCH: u32 = 2;

// `jl_array_flags_t` packs, from the least significant bit: how:2, ndims:9, pooled:1,
// ptrarray:1, hasptr:1, isshared:1, isaligned:1.

/// Bits of `jl_array_t::flags` that hold the storage kind (`how`).
pub const JL_ARRAY_HOW_MASK: u16 = 0x0003;
/// Offset of the dimension count within `jl_array_t::flags`.
pub const JL_ARRAY_NDIMS_SHIFT: u16 = 2;
/// Width mask of the dimension count, applied after shifting.
pub const JL_ARRAY_NDIMS_MASK: u16 = 0x01ff;
/// Set when the data pointer is 16-byte aligned.
pub const JL_ARRAY_ISALIGNED: u16 = 1 << 15;

/// Packs `how` and `ndims` into the `flags` field.
pub const fn jl_array_flags(how: u16, ndims: u16) -> u16 {
    (how & JL_ARRAY_HOW_MASK) | ((ndims & JL_ARRAY_NDIMS_MASK) << JL_ARRAY_NDIMS_SHIFT)
}

/// Opaque boxed foreign value.
#[repr(C)]
pub struct jl_value_t {
    _private: [u8; 0],
}

/// Opaque foreign type descriptor.
#[repr(C)]
pub struct jl_datatype_t {
    _private: [u8; 0],
}

/// Foreign array header. `ndims - 1` further extents follow `nrows` in memory.
#[repr(C)]
#[derive(Debug)]
pub struct jl_array_t {
    pub data: *mut c_void,
    pub length: usize,
    pub flags: u16,
    pub elsize: u16,
    pub offset: u32,
    pub nrows: usize,
}

/// Number of machine words taken by a header with `ndims` extents.
pub const fn jl_array_header_words(ndims: usize) -> usize {
    let extents = if ndims == 0 { 1 } else { ndims };
    4 + extents - 1
}

/// Dimension count of `a`.
///
/// # Safety
/// `a` must point to a live array header.
pub unsafe fn jl_array_ndims(a: *const jl_array_t) -> usize {
    (((*a).flags >> JL_ARRAY_NDIMS_SHIFT) & JL_ARRAY_NDIMS_MASK) as usize
}

/// Storage kind of `a`: 0 inline, 1 runtime-allocated buffer, 2 malloc'd, 3 owned by another
/// object.
///
/// # Safety
/// `a` must point to a live array header.
pub unsafe fn jl_array_how(a: *const jl_array_t) -> u16 {
    (*a).flags & JL_ARRAY_HOW_MASK
}

/// Per-dimension extents of `a`.
///
/// # Safety
/// `a` must point to a live array header that outlives the returned slice.
pub unsafe fn jl_array_dims<'a>(a: *const jl_array_t) -> &'a [usize] {
    let first = std::ptr::addr_of!((*a).nrows);
    slice::from_raw_parts(first, jl_array_ndims(a))
}

/// Pointer to the first element of `a`.
///
/// # Safety
/// `a` must point to a live array header.
pub unsafe fn jl_array_data(a: *const jl_array_t) -> *mut c_void {
    (*a).data
}

/// Element count of `a`.
///
/// # Safety
/// `a` must point to a live array header.
pub unsafe fn jl_array_len(a: *const jl_array_t) -> usize {
    (*a).length
}

/// Size in bytes of one element of `a`.
///
/// # Safety
/// `a` must point to a live array header.
pub unsafe fn jl_array_elsize(a: *const jl_array_t) -> usize {
    (*a).elsize as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_follow_runtime_bitfield_order() {
        // 3x4 array in a runtime-allocated buffer (how = 1)
        let mut words = [0usize; jl_array_header_words(2)];
        let a = words.as_mut_ptr() as *mut jl_array_t;
        unsafe {
            (*a).length = 12;
            (*a).flags = 1 | (2 << 2) | JL_ARRAY_ISALIGNED;
            (*a).elsize = 8;
            (*a).nrows = 3;
            std::ptr::addr_of_mut!((*a).nrows).add(1).write(4);

            assert_eq!(jl_array_ndims(a), 2);
            assert_eq!(jl_array_how(a), 1);
            assert_eq!(jl_array_dims(a), &[3, 4]);
            assert_eq!(jl_array_len(a), 12);
        }
    }

    #[test]
    fn packed_flags() {
        assert_eq!(jl_array_flags(1, 2), 1 | (2 << 2));
        assert_eq!(jl_array_flags(2, 0), 2);
        assert_eq!(jl_array_flags(0, 0x1ff) >> JL_ARRAY_NDIMS_SHIFT, 0x1ff);
    }
}
