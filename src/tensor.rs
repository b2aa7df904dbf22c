use std::fmt;
use std::ops::{Index, IndexMut};
use std::ptr::NonNull;

use log::debug;
use ndarray::{ArrayBase, ArrayView, ArrayViewMut, Data, Dim, Dimension, Ix, ShapeBuilder};

use crate::{
    datatype::Element,
    errors::{Error, Result},
    ffi::{self, jl_array_t},
    layout,
    nested::{self, Nested},
    registry::TypeRegistry,
    runtime::{self, ArrayHandle},
    storage::Storage,
};

/// Rank-`N` column-major tensor whose elements live in a foreign array.
///
/// A `JlTensor` either wraps an array the foreign runtime already owns ([`JlTensor::wrap`]) or
/// allocates a fresh one ([`JlTensor::allocate`] and friends). Either way the elements are never
/// copied into Rust memory: [`view`](JlTensor::view) and [`view_mut`](JlTensor::view_mut) hand
/// out `ndarray` views straight over the foreign buffer, and the held [`ArrayHandle`] keeps that
/// buffer alive for as long as the tensor exists.
///
/// ## Example
///
/// ```
/// use jltensor::{JlTensor, LocalRuntime};
/// use ndarray::array;
///
/// LocalRuntime::install_global().unwrap();
/// let mut t = JlTensor::<f64, 2>::from_expr(&array![[1., 2., 3.], [4., 5., 6.]]).unwrap();
/// assert_eq!(t.shape(), &[2, 3]);
/// assert_eq!(t.strides(), &[1, 2]);
/// t.view_mut()[[1, 2]] = 60.;
/// assert_eq!(t.as_slice(), &[1., 4., 2., 5., 3., 60.]);
/// ```
pub struct JlTensor<T: Element, const N: usize> {
    shape: [usize; N],
    strides: [isize; N],
    backstrides: [isize; N],
    storage: Storage<T>,
    handle: ArrayHandle,
}

impl<T: Element, const N: usize> JlTensor<T, N> {
    /// Allocates a tensor with extent 1 in every dimension holding `T::default()`.
    pub fn new() -> Result<Self> {
        let mut tensor = Self::allocate([1; N])?;
        tensor.storage.as_mut_slice()[0] = T::default();
        Ok(tensor)
    }

    /// Allocates a foreign array of `shape`. Elements are whatever the foreign allocator yields.
    pub fn allocate(shape: [usize; N]) -> Result<Self> {
        Self::init_tensor(shape)
    }

    /// Allocates a foreign array of `shape` with every element set to `value`.
    pub fn filled(shape: [usize; N], value: T) -> Result<Self> {
        let mut tensor = Self::allocate(shape)?;
        tensor.fill(value);
        Ok(tensor)
    }

    /// [`allocate`](JlTensor::allocate) from any shape-like sequence.
    pub fn from_shape<S: AsRef<[usize]>>(shape: S) -> Result<Self> {
        Self::allocate(layout::fixed_shape(shape.as_ref())?)
    }

    /// Binds to the array behind `handle` without copying.
    ///
    /// The array must be column-major with exactly `N` dimensions, hold `T` elements, and carry
    /// as many elements as its extents describe.
    pub fn wrap(handle: ArrayHandle) -> Result<Self> {
        let found = handle.ndims();
        if found != N {
            return Err(Error::DimensionMismatch { expected: N, found });
        }
        let shape: [usize; N] = layout::fixed_shape(handle.dims())?;
        let expected = layout::checked_len(&shape)?;
        if expected != handle.len() {
            return Err(Error::LengthMismatch {
                expected,
                found: handle.len(),
            });
        }
        let storage = unsafe { T::strategy().bind(handle.data(), handle.len(), handle.elsize())? };

        // same width is not enough: a byte of `UInt8` is not necessarily a valid `Bool`
        let rt = handle.runtime();
        let array_type = TypeRegistry::global().array_type(rt, T::ELEMENT_TYPE, N)?;
        if rt.array_type_of(handle.as_non_null())? != array_type {
            return Err(Error::ElementTypeMismatch(T::ELEMENT_TYPE));
        }

        let (strides, backstrides) = layout::compute_strides(&shape);
        Ok(JlTensor {
            shape,
            strides,
            backstrides,
            storage,
            handle,
        })
    }

    /// Wraps a bare foreign array pointer, preserving it in the installed runtime.
    ///
    /// # Safety
    ///
    /// `ptr` must be a live array of the installed runtime, rooted for the duration of the call,
    /// and must not be accessed through another tensor while the result is borrowed mutably.
    pub unsafe fn from_raw(ptr: NonNull<jl_array_t>) -> Result<Self> {
        let found = ffi::jl_array_ndims(ptr.as_ptr());
        if found != N {
            return Err(Error::DimensionMismatch { expected: N, found });
        }
        Self::wrap(ArrayHandle::from_raw(ptr)?)
    }

    fn init_tensor(shape: [usize; N]) -> Result<Self> {
        layout::checked_len(&shape)?;
        let rt = runtime::installed()?;
        let handle = runtime::scope(rt, |frame| {
            let array_type = TypeRegistry::global().array_type(rt, T::ELEMENT_TYPE, N)?;
            let array = frame.root(rt.alloc_array(array_type, &shape)?)?;
            Ok(unsafe { ArrayHandle::preserve(rt, array) })
        })?;
        debug!(
            "allocated Array{{{}, {}}} of shape {:?}",
            T::ELEMENT_TYPE,
            N,
            shape
        );
        Self::wrap(handle)
    }

    /// Deep copy into a newly allocated foreign array.
    pub fn try_clone(&self) -> Result<Self> {
        let mut copy = Self::allocate(self.shape)?;
        copy.storage
            .as_mut_slice()
            .copy_from_slice(self.storage.as_slice());
        Ok(copy)
    }

    /// Copy assignment. On failure `self` is left exactly as it was.
    pub fn assign_from(&mut self, other: &Self) -> Result<()> {
        let copy = other.try_clone()?;
        *self = copy;
        Ok(())
    }

    /// Reallocates to `shape` unless the tensor already has it.
    pub fn resize(&mut self, shape: [usize; N]) -> Result<()> {
        if shape != self.shape {
            *self = Self::allocate(shape)?;
        }
        Ok(())
    }

    pub fn fill(&mut self, value: T) {
        self.storage.as_mut_slice().fill(value);
    }

    pub fn shape(&self) -> &[usize; N] {
        &self.shape
    }

    pub fn strides(&self) -> &[isize; N] {
        &self.strides
    }

    pub fn backstrides(&self) -> &[isize; N] {
        &self.backstrides
    }

    pub fn storage(&self) -> &Storage<T> {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut Storage<T> {
        &mut self.storage
    }

    /// Elements in memory (column-major) order.
    pub fn as_slice(&self) -> &[T] {
        self.storage.as_slice()
    }

    pub fn as_slice_mut(&mut self) -> &mut [T] {
        self.storage.as_mut_slice()
    }

    pub fn len(&self) -> usize {
        self.storage.len()
    }

    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }

    pub fn handle(&self) -> &ArrayHandle {
        &self.handle
    }

    /// The foreign array this tensor is a view of.
    pub fn wrapped(&self) -> *mut jl_array_t {
        self.handle.as_ptr()
    }

    pub fn into_handle(self) -> ArrayHandle {
        self.handle
    }

    pub fn get(&self, index: [usize; N]) -> Option<&T> {
        let offset = layout::offset(&self.shape, &self.strides, &index)?;
        self.storage.as_slice().get(offset)
    }

    pub fn get_mut(&mut self, index: [usize; N]) -> Option<&mut T> {
        let offset = layout::offset(&self.shape, &self.strides, &index)?;
        self.storage.as_mut_slice().get_mut(offset)
    }
}

fn dim<const N: usize>(values: [usize; N]) -> Dim<[Ix; N]>
where
    Dim<[Ix; N]>: Dimension,
{
    let mut dim = <Dim<[Ix; N]> as Dimension>::zeros(N);
    dim.slice_mut().copy_from_slice(&values);
    dim
}

impl<T: Element, const N: usize> JlTensor<T, N>
where
    Dim<[Ix; N]>: Dimension,
{
    /// Allocates a tensor shaped like `list` and copies its values in, `list[i][j]` becoming
    /// element `[i, j]`.
    ///
    /// ```
    /// use jltensor::{JlTensor, LocalRuntime};
    ///
    /// LocalRuntime::install_global().unwrap();
    /// let t = JlTensor::<i32, 2>::from_nested(vec![vec![1, 2, 3], vec![4, 5, 6]]).unwrap();
    /// assert_eq!(t[[1, 0]], 4);
    /// ```
    pub fn from_nested<L: Nested<T>>(list: L) -> Result<Self> {
        if L::DEPTH != N {
            return Err(Error::RankMismatch {
                expected: N,
                found: L::DEPTH,
            });
        }
        let shape = layout::fixed_shape(&nested::shape_of(&list)?)?;
        let mut tensor = Self::allocate(shape)?;
        {
            let mut view = tensor.view_mut();
            let mut slots = view.iter_mut();
            list.for_each(&mut |value| {
                if let Some(slot) = slots.next() {
                    *slot = value;
                }
            });
        }
        Ok(tensor)
    }

    /// Materialises an `ndarray` expression into a new foreign array.
    pub fn from_expr<S, D>(expr: &ArrayBase<S, D>) -> Result<Self>
    where
        S: Data<Elem = T>,
        D: Dimension,
    {
        let shape = layout::fixed_shape(expr.shape())?;
        let mut tensor = Self::allocate(shape)?;
        tensor.view_mut().assign(expr);
        Ok(tensor)
    }

    /// Assigns `expr` to `self`. A matching shape is written in place into the foreign buffer;
    /// any other shape of the same rank reallocates.
    pub fn assign_expr<S, D>(&mut self, expr: &ArrayBase<S, D>) -> Result<()>
    where
        S: Data<Elem = T>,
        D: Dimension,
    {
        let shape: [usize; N] = layout::fixed_shape(expr.shape())?;
        if shape == self.shape {
            self.view_mut().assign(expr);
        } else {
            *self = Self::from_expr(expr)?;
        }
        Ok(())
    }

    pub fn view(&self) -> ArrayView<'_, T, Dim<[Ix; N]>> {
        let strides = dim(self.strides.map(|s| s as usize));
        unsafe { ArrayView::from_shape_ptr(dim(self.shape).strides(strides), self.storage.as_ptr()) }
    }

    pub fn view_mut(&mut self) -> ArrayViewMut<'_, T, Dim<[Ix; N]>> {
        let strides = dim(self.strides.map(|s| s as usize));
        let shape = dim(self.shape);
        unsafe { ArrayViewMut::from_shape_ptr(shape.strides(strides), self.storage.as_mut_ptr()) }
    }
}

impl<T: Element, const N: usize> Index<[usize; N]> for JlTensor<T, N> {
    type Output = T;

    fn index(&self, index: [usize; N]) -> &T {
        match self.get(index) {
            Some(value) => value,
            None => panic!("index {:?} out of bounds for shape {:?}", index, self.shape),
        }
    }
}

impl<T: Element, const N: usize> IndexMut<[usize; N]> for JlTensor<T, N> {
    fn index_mut(&mut self, index: [usize; N]) -> &mut T {
        let shape = self.shape;
        match self.get_mut(index) {
            Some(value) => value,
            None => panic!("index {:?} out of bounds for shape {:?}", index, shape),
        }
    }
}

impl<T: Element + fmt::Debug, const N: usize> fmt::Debug for JlTensor<T, N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JlTensor")
            .field("shape", &self.shape)
            .field("strides", &self.strides)
            .field("storage", &self.storage)
            .field("handle", &self.handle.as_ptr())
            .finish()
    }
}

#[cfg(all(test, feature = "local-runtime"))]
mod tests {
    use std::mem;

    use ndarray::{array, Array, Array1, Array2};
    use num_complex::Complex64;

    use super::*;
    use crate::datatype::{ElementType, StorageStrategy};
    use crate::local::LocalRuntime;

    fn rt() -> &'static LocalRuntime {
        LocalRuntime::install_global().unwrap()
    }

    fn share<T: Element, const N: usize>(t: &JlTensor<T, N>) -> ArrayHandle {
        unsafe { ArrayHandle::from_raw(t.handle().as_non_null()).unwrap() }
    }

    #[test]
    fn default_holds_one_element() {
        rt();
        let t = JlTensor::<f64, 3>::new().unwrap();
        assert_eq!(t.shape(), &[1, 1, 1]);
        assert_eq!(t.strides(), &[0, 0, 0]);
        assert_eq!(t.as_slice(), &[0.0]);
        assert_eq!(t.handle().dims(), &[1, 1, 1]);
    }

    #[test]
    fn shape_and_strides() {
        rt();
        let t = JlTensor::<i16, 3>::allocate([2, 3, 4]).unwrap();
        assert_eq!(t.shape(), &[2, 3, 4]);
        assert_eq!(t.strides(), &[1, 2, 6]);
        assert_eq!(t.backstrides(), &[1, 4, 18]);
        assert_eq!(t.len(), 24);
        assert_eq!(t.handle().dims(), &[2, 3, 4]);
        assert_eq!(t.storage().strategy(), StorageStrategy::Bits { size: 2 });
    }

    #[test]
    fn filled_and_from_shape() {
        rt();
        let t = JlTensor::<u8, 2>::filled([3, 2], 7).unwrap();
        assert!(t.as_slice().iter().all(|v| *v == 7));

        let t = JlTensor::<f32, 2>::from_shape(vec![4usize, 5]).unwrap();
        assert_eq!(t.shape(), &[4, 5]);
        assert!(matches!(
            JlTensor::<f32, 2>::from_shape(&[4usize, 5, 6][..]),
            Err(Error::RankMismatch {
                expected: 2,
                found: 3
            })
        ));
    }

    #[test]
    fn nested_literal_keeps_index_correspondence() {
        rt();
        let t = JlTensor::<i32, 2>::from_nested(vec![vec![1, 2, 3], vec![4, 5, 6]]).unwrap();
        assert_eq!(t.shape(), &[2, 3]);
        assert_eq!(t[[0, 2]], 3);
        assert_eq!(t[[1, 1]], 5);
        assert_eq!(t.as_slice(), &[1, 4, 2, 5, 3, 6]);

        let cube = JlTensor::<u16, 3>::from_nested([[[1u16, 2], [3, 4]], [[5, 6], [7, 8]]]).unwrap();
        assert_eq!(cube[[1, 0, 1]], 6);

        assert!(matches!(
            JlTensor::<f64, 2>::from_nested(vec![1.0, 2.0]),
            Err(Error::RankMismatch {
                expected: 2,
                found: 1
            })
        ));
        assert!(matches!(
            JlTensor::<f64, 2>::from_nested(vec![vec![1.0], vec![]]),
            Err(Error::RaggedList { level: 1 })
        ));
    }

    #[test]
    fn complex_literal_uses_native_complex_layout() {
        rt();
        let values: Vec<Complex64> = (1..=6).map(|v| Complex64::new(v as f64, 0.0)).collect();
        let t = JlTensor::<Complex64, 1>::from_nested(values).unwrap();
        assert_eq!(t.shape(), &[6]);
        assert_eq!(t[[3]], Complex64::new(4.0, 0.0));
        assert_eq!(
            t.storage().strategy(),
            StorageStrategy::Complex {
                part: ElementType::float(64)
            }
        );
        assert_eq!(t.handle().elsize(), 16);

        // foreign side sees interleaved re/im pairs
        let raw = t.handle().data() as *const f64;
        unsafe {
            assert_eq!(*raw.add(6), 4.0);
            assert_eq!(*raw.add(7), 0.0);
        }
    }

    #[test]
    fn wrap_is_zero_copy() {
        rt();
        let mut a = JlTensor::<f64, 2>::filled([2, 2], 1.0).unwrap();
        let b = JlTensor::<f64, 2>::wrap(share(&a)).unwrap();
        assert_eq!(b.shape(), a.shape());
        assert_eq!(b.as_slice().as_ptr(), a.as_slice().as_ptr());

        a[[1, 0]] = 3.0;
        assert_eq!(b[[1, 0]], 3.0);
    }

    #[test]
    fn wrap_rejects_wrong_rank() {
        let rt = rt();
        let a = JlTensor::<f64, 2>::allocate([2, 3]).unwrap();
        assert!(matches!(
            JlTensor::<f64, 3>::wrap(share(&a)),
            Err(Error::DimensionMismatch {
                expected: 3,
                found: 2
            })
        ));

        let ptr = a.handle().as_non_null();
        let before = rt.preserve_count(ptr);
        let err = unsafe { JlTensor::<f64, 1>::from_raw(ptr) };
        assert!(matches!(err, Err(Error::DimensionMismatch { .. })));
        assert_eq!(rt.preserve_count(ptr), before);
    }

    #[test]
    fn wrap_rejects_wrong_element_size() {
        rt();
        let a = JlTensor::<f64, 1>::allocate([4]).unwrap();
        assert!(matches!(
            JlTensor::<f32, 1>::wrap(share(&a)),
            Err(Error::ElementSizeMismatch {
                expected: 4,
                found: 8
            })
        ));
    }

    #[test]
    fn wrap_rejects_other_element_types_of_the_same_width() {
        rt();
        let bytes = JlTensor::<u8, 1>::filled([1], 7).unwrap();
        assert!(matches!(
            JlTensor::<bool, 1>::wrap(bytes.into_handle()),
            Err(Error::ElementTypeMismatch(ty)) if ty == ElementType::bool()
        ));

        let ints = JlTensor::<i64, 1>::filled([2], -1).unwrap();
        assert!(matches!(
            JlTensor::<f64, 1>::wrap(ints.into_handle()),
            Err(Error::ElementTypeMismatch(ty)) if ty == ElementType::float(64)
        ));

        let same = JlTensor::<i64, 1>::filled([2], -1).unwrap();
        let back = JlTensor::<i64, 1>::wrap(same.into_handle()).unwrap();
        assert_eq!(back.as_slice(), &[-1, -1]);
    }

    #[test]
    fn wrap_rejects_length_disagreeing_with_extents() {
        rt();
        let t = JlTensor::<f32, 2>::allocate([2, 3]).unwrap();
        let handle = t.into_handle();
        unsafe { (*handle.as_ptr()).length = 7 };
        assert!(matches!(
            JlTensor::<f32, 2>::wrap(handle),
            Err(Error::LengthMismatch {
                expected: 6,
                found: 7
            })
        ));
    }

    #[test]
    fn copies_do_not_alias() {
        rt();
        let mut a = JlTensor::<i64, 2>::filled([2, 3], 1).unwrap();
        let mut b = a.try_clone().unwrap();
        assert_ne!(a.wrapped(), b.wrapped());

        b[[0, 0]] = 5;
        assert_eq!(a[[0, 0]], 1);
        a[[1, 2]] = 9;
        assert_eq!(b[[1, 2]], 1);

        let mut c = JlTensor::<i64, 2>::new().unwrap();
        c.assign_from(&a).unwrap();
        assert_eq!(c.shape(), a.shape());
        assert_eq!(c.as_slice(), a.as_slice());
        assert_ne!(c.wrapped(), a.wrapped());
    }

    #[test]
    fn failed_copy_assign_leaves_target_untouched() {
        let rt = rt();
        let mut a = JlTensor::<f64, 2>::filled([2, 2], 1.0).unwrap();
        let b = JlTensor::<f64, 2>::filled([3, 3], 2.0).unwrap();
        let before = a.wrapped();

        rt.fail_next_allocation();
        assert!(matches!(a.assign_from(&b), Err(Error::Runtime(_))));
        assert_eq!(a.wrapped(), before);
        assert_eq!(a.shape(), &[2, 2]);
        assert!(a.as_slice().iter().all(|v| *v == 1.0));
    }

    #[test]
    fn moves_keep_the_foreign_array() {
        rt();
        let a = JlTensor::<u32, 1>::from_nested(vec![1u32, 2, 3]).unwrap();
        let ptr = a.wrapped();
        let data = a.as_slice().as_ptr();

        let mut b = a;
        assert_eq!(b.wrapped(), ptr);
        assert_eq!(b.as_slice().as_ptr(), data);
        assert_eq!(b.strides(), &[1]);

        let c = mem::replace(&mut b, JlTensor::new().unwrap());
        assert_eq!(c.wrapped(), ptr);
        assert_ne!(b.wrapped(), ptr);
        assert_eq!(b.shape(), &[1]);
    }

    #[test]
    fn expression_materialises_elementwise() {
        rt();
        let base = Array::from_shape_fn((2, 3), |(i, j)| (10 * i + j) as f64);
        let e: Array2<f64> = &base * 2.0 + 1.0;
        let t = JlTensor::<f64, 2>::from_expr(&e).unwrap();
        assert_eq!(t.shape(), &[2, 3]);
        for i in 0..2 {
            for j in 0..3 {
                assert_eq!(t[[i, j]], e[[i, j]]);
            }
        }
        assert!(t.view().abs_diff_eq(&e, 1e-12));

        let flat: Array1<f64> = Array1::zeros(6);
        assert!(matches!(
            JlTensor::<f64, 2>::from_expr(&flat),
            Err(Error::RankMismatch {
                expected: 2,
                found: 1
            })
        ));
    }

    #[test]
    fn assign_expression() {
        rt();
        let mut t = JlTensor::<f64, 2>::allocate([2, 2]).unwrap();
        let ptr = t.wrapped();

        t.assign_expr(&array![[1., 2.], [3., 4.]]).unwrap();
        assert_eq!(t.wrapped(), ptr);
        assert_eq!(t.as_slice(), &[1., 3., 2., 4.]);

        t.assign_expr(&array![[1., 2., 3.]]).unwrap();
        assert_eq!(t.shape(), &[1, 3]);
        assert_ne!(t.wrapped(), ptr);

        assert!(t.assign_expr(&array![1., 2.]).is_err());
        assert_eq!(t.shape(), &[1, 3]);
    }

    #[test]
    fn views_write_through() {
        rt();
        let mut t = JlTensor::<f32, 2>::filled([2, 3], 1.0).unwrap();
        {
            let mut v = t.view_mut();
            v += 1.0;
            v.column_mut(2).fill(5.0);
        }
        assert_eq!(t.as_slice(), &[2.0, 2.0, 2.0, 2.0, 5.0, 5.0]);
        assert_eq!(t.view().sum(), 18.0);
    }

    #[test]
    fn resize_reallocates_only_on_change() {
        rt();
        let mut t = JlTensor::<i8, 1>::allocate([3]).unwrap();
        let ptr = t.wrapped();
        t.resize([3]).unwrap();
        assert_eq!(t.wrapped(), ptr);
        t.resize([5]).unwrap();
        assert_eq!(t.len(), 5);
        assert_ne!(t.wrapped(), ptr);
    }

    #[test]
    fn tensor_keeps_array_alive() {
        let rt = rt();
        let t = JlTensor::<f64, 1>::filled([8], 2.5).unwrap();
        let id = rt.object_id(t.handle().as_non_null()).unwrap();
        rt.collect();
        assert!(rt.is_live(id));
        assert_eq!(t.as_slice(), &[2.5; 8]);

        drop(t);
        rt.collect();
        assert!(!rt.is_live(id));
    }

    #[test]
    fn index_out_of_bounds() {
        rt();
        let t = JlTensor::<f64, 2>::allocate([2, 2]).unwrap();
        assert_eq!(t.get([2, 0]), None);
        assert!(t.get([1, 1]).is_some());
    }

    #[test]
    #[should_panic(expected = "out of bounds")]
    fn index_panics_past_the_end() {
        rt();
        let t = JlTensor::<f64, 1>::allocate([2]).unwrap();
        assert_eq!(t[[2]], 0.0);
    }
}
