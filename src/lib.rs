//! [![crates.io](https://img.shields.io/crates/v/jltensor.svg)](https://crates.io/crates/jltensor)
//! [![docs.rs](https://docs.rs/jltensor/badge.svg)](https://docs.rs/jltensor)
//!
//! <br>
//!
//! This crate lets Rust code operate on arrays owned by an embedded Julia runtime through
//! [ndarray](https://docs.rs/ndarray/latest/ndarray/) views, without copying the element buffer in
//! either direction. A [`JlTensor`] is a fixed-rank, column-major tensor whose storage *is* the
//! foreign array: handing a tensor back to the runtime passes the same array it wraps, and wrapping
//! an array received from the runtime reads and writes its buffer in place.
//!
//! The Minimum Supported Rust Version (MSRV) is the stable toolchain **1.63.0**.
//!
//! ## Usage
//!
//! The runtime is reached through the [`Runtime`] trait, installed once per process with
//! [`runtime::install`]. Embedders implement it over the real runtime's C API; the
//! `local-runtime` feature (on by default) provides [`LocalRuntime`], a self-contained collector
//! with the same array layout, for tests and standalone use.
//!
//! ### Owned-by-runtime tensors
//!
//! Tensors allocated from Rust ([`JlTensor::allocate`], [`JlTensor::from_nested`],
//! [`JlTensor::from_expr`]) create a new foreign array and keep it protected from collection for as
//! long as the tensor lives.
//!
//! ### Wrapped tensors
//!
//! Arrays created by the runtime are adopted with [`JlTensor::wrap`] or
//! [`FromForeign::from_foreign`]; rank and element size are checked before any element is read.
//!
//! <br>
//!
//! ## Example
//!
//! ```
//! use jltensor::{FromForeign, IntoForeign, JlTensor, LocalRuntime};
//! use ndarray::array;
//!
//! LocalRuntime::install_global().unwrap();
//!
//! let mut t = JlTensor::<f64, 2>::from_expr(&array![[1.0, 2.0], [3.0, 4.0]]).unwrap();
//! t.view_mut().mapv_inplace(|x| x * 10.0);
//!
//! let handle = t.into_foreign();
//! let back = unsafe { JlTensor::<f64, 2>::from_foreign(handle.as_non_null()) }.unwrap();
//! assert_eq!(back[[1, 0]], 30.0);
//! assert_eq!(back.as_slice(), &[10.0, 30.0, 20.0, 40.0]);
//! ```
//!
//! See the complete [demos/sample](https://github.com/ehsanmok/jltensor/blob/main/demos/sample/src/main.rs)
//! for a round trip through the conversion registry.

pub mod ffi {
    #![allow(non_camel_case_types, non_snake_case, non_upper_case_globals, unused)]
    pub use jltensor_sys::*;
}

pub mod convert;
pub mod datatype;
pub mod errors;
pub mod layout;
#[cfg(feature = "local-runtime")]
pub mod local;
pub mod nested;
pub mod registry;
pub mod runtime;
pub mod storage;
pub mod tensor;

pub use convert::{register, register_tensor, ForeignType, FromForeign, IntoForeign, Marshaller, TypeMapping};
pub use datatype::{Element, ElementKind, ElementType, StorageStrategy};
pub use errors::{Error, Result, RuntimeError};
#[cfg(feature = "local-runtime")]
pub use local::{LocalRuntime, LocalRuntimeBuilder};
pub use nested::Nested;
pub use registry::TypeRegistry;
pub use runtime::{ArrayHandle, GcFrame, Runtime, TypeRef};
pub use storage::Storage;
pub use tensor::JlTensor;

/// Version of the array interface, as `(major, minor, patch)`.
pub fn version() -> (u32, u32, u32) {
    (
        ffi::JLTENSOR_VERSION_MAJOR,
        ffi::JLTENSOR_VERSION_MINOR,
        ffi::JLTENSOR_VERSION_PATCH,
    )
}

#[cfg(test)]
mod tests {
    #[test]
    fn version_matches_package() {
        let (major, minor, patch) = super::version();
        assert_eq!(
            format!("{}.{}.{}", major, minor, patch),
            env!("CARGO_PKG_VERSION")
        );
    }
}
