//! The services `jltensor` consumes from the embedded foreign runtime.
//!
//! A process embeds exactly one foreign runtime. The embedding layer implements [`Runtime`] on
//! top of the interpreter's C API and hands it to [`install`] once, before any tensor is created.
//! Every adapter operation then reaches the runtime through [`installed`].
//!
//! Two rooting mechanisms keep foreign memory reachable while native code uses it:
//!
//! - [`GcFrame`] is scoped. It roots every pointer passed to [`GcFrame::root`] until the frame
//!   is dropped, and brackets every region of code that holds bare foreign pointers.
//! - [`ArrayHandle`] is long-lived. It preserves one array for as long as the handle exists and
//!   is what a [`JlTensor`](crate::JlTensor) holds to keep its buffer alive.

use std::fmt;
use std::marker::PhantomData;
use std::os::raw::c_void;
use std::ptr::NonNull;

use log::{debug, trace};
use once_cell::sync::OnceCell;

use crate::{
    datatype::ElementType,
    errors::{Error, Result, RuntimeError},
    ffi::{self, jl_array_t, jl_datatype_t, jl_value_t},
};

/// Reference to a foreign type descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct TypeRef(NonNull<jl_datatype_t>);

// Type descriptors live in the foreign type table, which is never collected.
unsafe impl Send for TypeRef {}
unsafe impl Sync for TypeRef {}

impl TypeRef {
    pub fn new(ptr: NonNull<jl_datatype_t>) -> Self {
        TypeRef(ptr)
    }

    pub fn as_ptr(&self) -> *mut jl_datatype_t {
        self.0.as_ptr()
    }
}

/// Foreign runtime services.
///
/// # Safety
///
/// `alloc_array` must return a live header whose `data` points to `length` elements of
/// `elsize` bytes each, aligned for the element type, with the extents laid out as described in
/// `jltensor-sys`. An array must not be reclaimed while it is rooted by an open frame or
/// preserved.
pub unsafe trait Runtime: Send + Sync {
    /// Returns the descriptor of an element type, registering it on first use.
    fn element_type(&self, ty: ElementType) -> std::result::Result<TypeRef, RuntimeError>;

    /// Returns the `Array{elem, rank}` descriptor.
    fn apply_array_type(
        &self,
        element: TypeRef,
        rank: usize,
    ) -> std::result::Result<TypeRef, RuntimeError>;

    /// Allocates a column-major array of `array_type` with extents `dims`.
    fn alloc_array(
        &self,
        array_type: TypeRef,
        dims: &[usize],
    ) -> std::result::Result<NonNull<jl_array_t>, RuntimeError>;

    /// Returns the `Array{elem, rank}` descriptor `array` was allocated with (`jl_typeof`).
    fn array_type_of(
        &self,
        array: NonNull<jl_array_t>,
    ) -> std::result::Result<TypeRef, RuntimeError>;

    fn push_frame(&self);

    /// Roots `value` in the innermost frame of the calling thread.
    fn root(&self, value: NonNull<jl_value_t>) -> std::result::Result<(), RuntimeError>;

    fn pop_frame(&self);

    fn preserve(&self, value: NonNull<jl_value_t>);

    fn release(&self, value: NonNull<jl_value_t>);

    /// Tears the runtime down. Owned by the host process.
    fn at_exit(&self, status: i32);
}

static RUNTIME: OnceCell<&'static dyn Runtime> = OnceCell::new();

fn same_runtime(a: &'static dyn Runtime, b: &'static dyn Runtime) -> bool {
    std::ptr::eq(
        a as *const dyn Runtime as *const u8,
        b as *const dyn Runtime as *const u8,
    )
}

/// Installs the process-wide runtime. Installing the same runtime again is a no-op.
pub fn install(runtime: &'static dyn Runtime) -> Result<()> {
    let current = RUNTIME.get_or_init(|| {
        debug!("installing foreign runtime");
        runtime
    });
    if same_runtime(*current, runtime) {
        Ok(())
    } else {
        Err(Error::RuntimeAlreadyInstalled)
    }
}

pub fn installed() -> Result<&'static dyn Runtime> {
    RUNTIME.get().copied().ok_or(Error::RuntimeNotInstalled)
}

/// Forwards the host's exit hook to the installed runtime.
pub fn at_exit(status: i32) -> Result<()> {
    let rt = installed()?;
    debug!("foreign runtime exiting with status {}", status);
    rt.at_exit(status);
    Ok(())
}

/// Scoped root set. Everything rooted through it stays reachable until it is dropped.
pub struct GcFrame<'rt> {
    runtime: &'rt dyn Runtime,
    rooted: usize,
    // frames are per thread
    _marker: PhantomData<*mut ()>,
}

impl<'rt> GcFrame<'rt> {
    pub fn open(runtime: &'rt dyn Runtime) -> Self {
        runtime.push_frame();
        trace!("gc frame pushed");
        GcFrame {
            runtime,
            rooted: 0,
            _marker: PhantomData,
        }
    }

    /// Roots `value` for the rest of this frame and hands it back.
    pub fn root<P>(&mut self, value: NonNull<P>) -> Result<NonNull<P>> {
        self.runtime.root(value.cast())?;
        self.rooted += 1;
        Ok(value)
    }

    pub fn rooted(&self) -> usize {
        self.rooted
    }
}

impl fmt::Debug for GcFrame<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GcFrame")
            .field("rooted", &self.rooted)
            .finish()
    }
}

impl Drop for GcFrame<'_> {
    fn drop(&mut self) {
        self.runtime.pop_frame();
        trace!("gc frame popped ({} roots)", self.rooted);
    }
}

/// Runs `f` inside a fresh [`GcFrame`].
pub fn scope<'rt, R, F>(runtime: &'rt dyn Runtime, f: F) -> Result<R>
where
    F: FnOnce(&mut GcFrame<'rt>) -> Result<R>,
{
    let mut frame = GcFrame::open(runtime);
    f(&mut frame)
}

/// Owned reference to a foreign array that keeps it preserved until dropped.
///
/// A handle is the unique native owner of its array's elements, which is what lets
/// [`JlTensor::wrap`](crate::JlTensor::wrap) be safe. It therefore cannot be cloned:
///
/// ```compile_fail
/// fn duplicate(handle: &jltensor::ArrayHandle) -> jltensor::ArrayHandle {
///     handle.clone()
/// }
/// ```
pub struct ArrayHandle {
    ptr: NonNull<jl_array_t>,
    runtime: &'static dyn Runtime,
}

impl ArrayHandle {
    /// Preserves `ptr` and takes ownership of that preservation.
    ///
    /// # Safety
    ///
    /// `ptr` must be a live array of `runtime` that is rooted for the duration of the call. No
    /// other handle or tensor may access the array's elements while the returned handle, or a
    /// tensor wrapping it, is borrowed mutably.
    pub unsafe fn preserve(runtime: &'static dyn Runtime, ptr: NonNull<jl_array_t>) -> Self {
        runtime.preserve(ptr.cast());
        ArrayHandle { ptr, runtime }
    }

    /// Preserves `ptr` in the installed runtime.
    ///
    /// # Safety
    ///
    /// Same as [`ArrayHandle::preserve`].
    pub unsafe fn from_raw(ptr: NonNull<jl_array_t>) -> Result<Self> {
        Ok(Self::preserve(installed()?, ptr))
    }

    /// Gives up the preservation and returns the bare pointer. The caller is responsible for
    /// rooting it before the collector can run again.
    pub fn into_raw(self) -> NonNull<jl_array_t> {
        let ptr = self.ptr;
        drop(self);
        ptr
    }

    pub fn as_ptr(&self) -> *mut jl_array_t {
        self.ptr.as_ptr()
    }

    pub fn as_non_null(&self) -> NonNull<jl_array_t> {
        self.ptr
    }

    pub fn runtime(&self) -> &'static dyn Runtime {
        self.runtime
    }

    pub fn ndims(&self) -> usize {
        unsafe { ffi::jl_array_ndims(self.ptr.as_ptr()) }
    }

    pub fn dims(&self) -> &[usize] {
        unsafe { ffi::jl_array_dims(self.ptr.as_ptr()) }
    }

    pub fn len(&self) -> usize {
        unsafe { ffi::jl_array_len(self.ptr.as_ptr()) }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn elsize(&self) -> usize {
        unsafe { ffi::jl_array_elsize(self.ptr.as_ptr()) }
    }

    pub fn data(&self) -> *mut c_void {
        unsafe { ffi::jl_array_data(self.ptr.as_ptr()) }
    }
}

impl PartialEq for ArrayHandle {
    fn eq(&self, other: &Self) -> bool {
        self.ptr == other.ptr
    }
}

impl Eq for ArrayHandle {}

impl fmt::Debug for ArrayHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArrayHandle")
            .field("ptr", &self.ptr)
            .field("dims", &self.dims())
            .finish()
    }
}

impl Drop for ArrayHandle {
    fn drop(&mut self) {
        self.runtime.release(self.ptr.cast());
    }
}

#[cfg(all(test, feature = "local-runtime"))]
mod tests {
    use super::*;
    use crate::local::LocalRuntime;

    #[test]
    fn install_is_idempotent() {
        let rt = LocalRuntime::install_global().unwrap();
        assert!(install(rt).is_ok());
        assert!(installed().is_ok());

        let other: &'static LocalRuntime = Box::leak(Box::new(LocalRuntime::new()));
        assert!(matches!(install(other), Err(Error::RuntimeAlreadyInstalled)));
    }

    #[test]
    fn frame_roots_until_dropped() {
        let rt = LocalRuntime::new();
        let ty = rt.element_type(ElementType::float(64)).unwrap();
        let arr_ty = rt.apply_array_type(ty, 1).unwrap();

        let id = {
            let mut frame = GcFrame::open(&rt);
            let arr = rt.alloc_array(arr_ty, &[4]).unwrap();
            let arr = frame.root(arr).unwrap();
            assert_eq!(frame.rooted(), 1);
            rt.collect();
            let id = rt.object_id(arr).unwrap();
            assert!(rt.is_live(id));
            id
        };
        rt.collect();
        assert!(!rt.is_live(id));
    }
}
