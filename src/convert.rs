//! Boundary conversions consumed by the embedding bridge's marshalling layer.
//!
//! A native type that crosses the boundary declares its foreign representation and descriptor
//! through [`ForeignType`], and how to move values each way through [`IntoForeign`] and
//! [`FromForeign`]. [`register`] bundles the three into a [`TypeMapping`] and hands it to the
//! bridge's [`Marshaller`].

use std::any::{type_name, Any, TypeId};
use std::fmt;
use std::ptr::NonNull;

use log::debug;

use crate::{
    datatype::Element,
    errors::{Error, Result},
    ffi::jl_array_t,
    registry::TypeRegistry,
    runtime::{self, ArrayHandle, TypeRef},
    tensor::JlTensor,
};

/// Static mapping of a native type to its foreign array type.
pub trait ForeignType {
    /// Descriptor of the foreign type values of `Self` are represented by, created lazily.
    fn foreign_type() -> Result<TypeRef>;
}

pub trait IntoForeign: ForeignType {
    fn into_foreign(self) -> ArrayHandle;
}

pub trait FromForeign: ForeignType + Sized {
    /// # Safety
    ///
    /// `ptr` must be a live foreign array, rooted for the duration of the call.
    unsafe fn from_foreign(ptr: NonNull<jl_array_t>) -> Result<Self>;
}

impl<T: Element, const N: usize> ForeignType for JlTensor<T, N> {
    fn foreign_type() -> Result<TypeRef> {
        let rt = runtime::installed()?;
        TypeRegistry::global().array_type(rt, T::ELEMENT_TYPE, N)
    }
}

impl<T: Element, const N: usize> IntoForeign for JlTensor<T, N> {
    fn into_foreign(self) -> ArrayHandle {
        self.into_handle()
    }
}

impl<T: Element, const N: usize> FromForeign for JlTensor<T, N> {
    unsafe fn from_foreign(ptr: NonNull<jl_array_t>) -> Result<Self> {
        JlTensor::from_raw(ptr)
    }
}

/// Type-erased conversion pair for one native type.
pub struct TypeMapping {
    pub native_id: TypeId,
    pub native_name: &'static str,
    pub foreign_type: TypeRef,
    pub to_native: unsafe fn(NonNull<jl_array_t>) -> Result<Box<dyn Any>>,
    pub to_foreign: fn(Box<dyn Any>) -> Result<ArrayHandle>,
}

impl fmt::Debug for TypeMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeMapping")
            .field("native_name", &self.native_name)
            .field("foreign_type", &self.foreign_type)
            .finish()
    }
}

/// The registration surface of the marshalling layer.
pub trait Marshaller {
    fn add_type_mapping(&mut self, mapping: TypeMapping) -> Result<()>;
}

unsafe fn to_native<T: FromForeign + 'static>(ptr: NonNull<jl_array_t>) -> Result<Box<dyn Any>> {
    Ok(Box::new(T::from_foreign(ptr)?))
}

fn to_foreign<T: IntoForeign + 'static>(value: Box<dyn Any>) -> Result<ArrayHandle> {
    value
        .downcast::<T>()
        .map(|value| value.into_foreign())
        .map_err(|_| Error::NativeTypeMismatch(type_name::<T>()))
}

/// Registers the conversion pair of `T` with `marshaller`.
pub fn register<T>(marshaller: &mut dyn Marshaller) -> Result<()>
where
    T: FromForeign + IntoForeign + 'static,
{
    let mapping = TypeMapping {
        native_id: TypeId::of::<T>(),
        native_name: type_name::<T>(),
        foreign_type: T::foreign_type()?,
        to_native: to_native::<T>,
        to_foreign: to_foreign::<T>,
    };
    debug!("registering conversion for {}", mapping.native_name);
    marshaller.add_type_mapping(mapping)
}

/// Registers `JlTensor<T, N>`.
pub fn register_tensor<T: Element, const N: usize>(marshaller: &mut dyn Marshaller) -> Result<()> {
    register::<JlTensor<T, N>>(marshaller)
}
